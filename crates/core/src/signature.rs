//! Request signing.
//!
//! Signatures are a hash over the sorted `key=value` parameter list with the
//! API secret appended. The byte layout must match the remote service
//! exactly, so every step here is deterministic and locale independent.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::options::{Options, is_truthy, param_string, present};
use crate::{Config, ConfigurationError};

/// Default validity window for notification signatures: two hours.
const NOTIFICATION_VALID_FOR_SECS: i64 = 7200;

/// Hash used for request and URL signatures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureAlgorithm {
    #[default]
    Sha1,
    Sha256,
}

impl SignatureAlgorithm {
    /// Parses `sha1` / `sha256` (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Some(Self::Sha1),
            "sha256" => Some(Self::Sha256),
            _ => None,
        }
    }

    /// Resolves the algorithm from an option override, falling back to `config`.
    pub fn resolve(options: &Options, config: &Config) -> Self {
        options
            .get("signature_algorithm")
            .and_then(Value::as_str)
            .and_then(Self::parse)
            .unwrap_or(config.signature_algorithm)
    }
}

/// Hashes `input` with `algorithm` and returns the raw digest bytes.
pub fn compute_hash(input: &str, algorithm: SignatureAlgorithm) -> Vec<u8> {
    match algorithm {
        SignatureAlgorithm::Sha1 => Sha1::digest(input.as_bytes()).to_vec(),
        SignatureAlgorithm::Sha256 => Sha256::digest(input.as_bytes()).to_vec(),
    }
}

/// Signs `params` with `secret` and returns the lowercase hex digest.
///
/// Null and empty values are skipped, keys are sorted ascending, list values
/// are joined with `,` and the secret is appended without a separator.
pub fn api_sign_request(params: &Options, secret: &str, algorithm: SignatureAlgorithm) -> String {
    let mut pairs: Vec<(&str, String)> = params
        .iter()
        .filter(|(_, v)| present(v))
        .map(|(k, v)| (k.as_str(), param_string(v)))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let to_sign = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    hex::encode(compute_hash(&format!("{to_sign}{secret}"), algorithm))
}

/// Reads a credential from the options, falling back to the config.
fn credential<'a>(
    options: &'a Options,
    from_config: Option<&'a str>,
    key: &str,
) -> Result<&'a str, ConfigurationError> {
    options
        .get(key)
        .and_then(Value::as_str)
        .or(from_config)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigurationError::new(format!("Must supply {key}")))
}

/// Returns `params` without nulls, plus `signature` and `api_key`.
pub fn sign_request(
    mut params: Options,
    options: &Options,
    config: &Config,
) -> Result<Options, ConfigurationError> {
    let api_key = credential(options, config.api_key.as_deref(), "api_key")?.to_string();
    let api_secret = credential(options, config.api_secret.as_deref(), "api_secret")?;
    let algorithm = SignatureAlgorithm::resolve(options, config);

    params.retain(|_, v| !v.is_null());
    let signature = api_sign_request(&params, api_secret, algorithm);
    params.insert("signature".into(), Value::String(signature));
    params.insert("api_key".into(), Value::String(api_key));
    Ok(params)
}

/// Prepares request parameters according to the authentication mode.
///
/// - `unsigned`: drops `timestamp`, no signature.
/// - OAuth token configured: parameters pass through untouched.
/// - caller-supplied `signature` option: the options are forwarded as-is.
/// - otherwise: [`sign_request`].
pub fn process_request_params(
    mut params: Options,
    options: &Options,
    config: &Config,
) -> Result<Options, ConfigurationError> {
    if options.get("unsigned").is_some_and(is_truthy) {
        params.remove("timestamp");
        params.retain(|_, v| !v.is_null());
        return Ok(params);
    }
    let has_oauth = options.get("oauth_token").is_some_and(present) || config.oauth_token.is_some();
    if has_oauth {
        params.retain(|_, v| !v.is_null());
        return Ok(params);
    }
    if options.get("signature").is_some_and(present) {
        return Ok(options.clone());
    }
    sign_request(params, options, config)
}

/// Signature of a notification body as sent by the service.
pub fn webhook_signature(
    data: &str,
    timestamp: i64,
    api_secret: &str,
    algorithm: SignatureAlgorithm,
) -> String {
    hex::encode(compute_hash(&format!("{data}{timestamp}{api_secret}"), algorithm))
}

/// Verifies a notification's signature and freshness.
///
/// Returns `false` if the timestamp is older than `valid_for_secs`
/// (default two hours), no secret is configured, or the signature differs.
pub fn verify_notification_signature(
    body: &str,
    timestamp: i64,
    signature: &str,
    valid_for_secs: Option<i64>,
    config: &Config,
) -> bool {
    let now = chrono::Utc::now().timestamp();
    verify_notification_signature_at(body, timestamp, signature, valid_for_secs, now, config)
}

fn verify_notification_signature_at(
    body: &str,
    timestamp: i64,
    signature: &str,
    valid_for_secs: Option<i64>,
    now: i64,
    config: &Config,
) -> bool {
    let valid_for = valid_for_secs.unwrap_or(NOTIFICATION_VALID_FOR_SECS);
    if timestamp < now - valid_for {
        return false;
    }
    let Some(secret) = config.api_secret.as_deref() else {
        return false;
    };
    webhook_signature(body, timestamp, secret, config.signature_algorithm) == signature
}

/// Builds the `{resource_type}/upload/v{version}/{public_id}.{format}#{signature}`
/// identifier for a preloaded upload result.
pub fn signed_preloaded_image(result: &Options) -> String {
    let field = |k: &str| result.get(k).map(param_string).unwrap_or_default();
    let name = [field("public_id"), field("format")]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(".");
    format!(
        "{}/upload/v{}/{}#{}",
        field("resource_type"),
        field("version"),
        name,
        field("signature")
    )
}
