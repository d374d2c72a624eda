//! Upload API response contract.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::UploadError;

/// Status codes whose bodies are parsed as API responses.
const RECOGNIZED_STATUSES: &[u16] = &[200, 400, 401, 404, 420, 500];

/// Resource metadata returned by a successful call.
///
/// Intermediate chunks of a chunked upload return a partial body; only the
/// last chunk carries the full resource description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Every other field of the body.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Maps a raw HTTP status and body onto the response contract.
///
/// - Unrecognised status: [`UploadError::UnexpectedResponse`].
/// - Body that is not JSON: [`UploadError::Server`] named `Error`.
/// - JSON with an `error` object: [`UploadError::Server`] carrying its message.
pub fn parse_response(status: u16, body: &[u8]) -> Result<UploadResponse, UploadError> {
    if !RECOGNIZED_STATUSES.contains(&status) {
        return Err(UploadError::UnexpectedResponse(status));
    }

    let value: Value = serde_json::from_slice(body).map_err(|err| UploadError::Server {
        http_code: status,
        message: format!("Server return invalid JSON response. Status Code {status}. {err}"),
        name: "Error".into(),
    })?;

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| error.to_string());
        let name = error
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("Error")
            .to_owned();
        return Err(UploadError::Server {
            http_code: status,
            message,
            name,
        });
    }

    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_resource_fields() {
        let body = br#"{
            "public_id": "sample",
            "version": 1234,
            "bytes": 120253,
            "format": "jpg",
            "width": 864,
            "height": 576,
            "tags": ["a"]
        }"#;
        let resp = parse_response(200, body).unwrap();
        assert_eq!(resp.public_id.as_deref(), Some("sample"));
        assert_eq!(resp.version, Some(1234));
        assert_eq!(resp.bytes, Some(120_253));
        assert_eq!(resp.width, Some(864));
        assert_eq!(resp.extra["tags"], serde_json::json!(["a"]));
    }

    #[test]
    fn error_payload_becomes_server_error() {
        let body = br#"{"error":{"message":"Invalid Signature"}}"#;
        let err = parse_response(401, body).unwrap_err();
        assert_eq!(err.to_string(), "Invalid Signature");
        assert_eq!(err.http_code(), Some(401));
        assert_eq!(err.name(), "Error");
    }

    #[test]
    fn malformed_body_is_coerced() {
        let err = parse_response(500, b"<html>oops</html>").unwrap_err();
        assert!(
            err.to_string()
                .starts_with("Server return invalid JSON response. Status Code 500.")
        );
        assert_eq!(err.name(), "Error");
        assert_eq!(err.http_code(), Some(500));
    }

    #[test]
    fn unrecognised_status_is_unexpected() {
        let err = parse_response(502, b"{}").unwrap_err();
        assert!(matches!(err, UploadError::UnexpectedResponse(502)));
        assert_eq!(err.to_string(), "Server returned unexpected status code - 502");
    }
}
