//! Upload API parameter building.

use cloudinary_core::{ConfigurationError, Options, param_string, present, to_list};
use cloudinary_url::{build_eager, generate_transformation_string};
use percent_encoding::percent_decode_str;
use serde_json::{Value, json};

/// Flags sent as `1`/`0`.
const BOOLEAN_PARAMS: &[&str] = &[
    "accessibility_analysis",
    "async",
    "auto_chaptering",
    "auto_transcription",
    "backup",
    "cinemagraph_analysis",
    "colors",
    "discard_original_filename",
    "eager_async",
    "exif",
    "faces",
    "image_metadata",
    "invalidate",
    "media_metadata",
    "overwrite",
    "phash",
    "quality_analysis",
    "return_delete_token",
    "unique_filename",
    "use_asset_folder_as_public_id_prefix",
    "use_filename",
    "use_filename_as_display_name",
    "visual_search",
];

/// Options copied as-is when present.
const PLAIN_PARAMS: &[&str] = &[
    "access_mode",
    "asset_folder",
    "auto_tagging",
    "background_removal",
    "callback",
    "categorization",
    "detection",
    "display_name",
    "eager_notification_url",
    "filename_override",
    "folder",
    "format",
    "moderation",
    "notification_url",
    "ocr",
    "on_success",
    "proxy",
    "public_id",
    "public_id_prefix",
    "quality_override",
    "raw_convert",
    "similarity_search",
    "type",
    "upload_preset",
];

/// Current Unix time in seconds.
pub fn timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// `true`/`"true"`/`1` become `1`, anything else `0`; null stays absent.
pub fn as_safe_bool(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(json!(u8::from(*b))),
        Value::String(s) if s == "true" || s == "1" => Some(json!(1)),
        Value::Number(n) if n.as_f64() == Some(1.0) => Some(json!(1)),
        _ => Some(json!(0)),
    }
}

/// Builds the parameter set for `upload`/`explicit` from caller options.
///
/// Null options are omitted, booleans are canonised, `transformation` and
/// `eager` are compiled, and `timestamp` defaults to now.
pub fn build_upload_params(options: &Options) -> Result<Options, ConfigurationError> {
    let mut params = Options::new();
    let ts = options
        .get("timestamp")
        .filter(|v| present(v))
        .cloned()
        .unwrap_or_else(|| json!(timestamp()));
    params.insert("timestamp".into(), ts);

    for &key in PLAIN_PARAMS {
        if let Some(value) = options.get(key).filter(|v| present(v)) {
            params.insert(key.into(), value.clone());
        }
    }
    for &key in BOOLEAN_PARAMS {
        if let Some(value) = options.get(key).and_then(as_safe_bool) {
            params.insert(key.into(), value);
        }
    }

    let mut transformation_options = options.clone();
    let transformation = generate_transformation_string(&mut transformation_options)?;
    if !transformation.is_empty() {
        let decoded = percent_decode_str(&transformation).decode_utf8_lossy().into_owned();
        params.insert("transformation".into(), Value::String(decoded));
    }
    if let Some(eager) = options.get("eager").filter(|v| present(v)) {
        params.insert("eager".into(), Value::String(build_eager(eager)?));
    }

    insert_with(&mut params, options, "allowed_formats", |v| {
        join_list(v, ",")
    });
    insert_with(&mut params, options, "tags", |v| join_list(v, ","));
    insert_with(&mut params, options, "context", encode_context);
    insert_with(&mut params, options, "metadata", encode_context);
    insert_with(&mut params, options, "custom_coordinates", encode_double_array);
    insert_with(&mut params, options, "face_coordinates", encode_double_array);
    insert_with(&mut params, options, "headers", build_custom_headers);
    insert_with(&mut params, options, "access_control", json_array_param);
    insert_with(&mut params, options, "responsive_breakpoints", json_array_param);

    Ok(params)
}

/// `build_upload_params` plus `type: upload` default and the given id, as
/// sent by `explicit`.
pub fn build_explicit_params(
    public_id: &str,
    options: &Options,
) -> Result<Options, ConfigurationError> {
    let mut params = build_upload_params(options)?;
    params.entry("type").or_insert_with(|| json!("upload"));
    params.insert("public_id".into(), json!(public_id));
    Ok(params)
}

/// Archive flags sent as `1`/`0`.
const ARCHIVE_BOOLEAN_PARAMS: &[&str] = &[
    "allow_missing",
    "async",
    "flatten_folders",
    "flatten_transformations",
    "keep_derived",
    "skip_transformation_name",
    "use_original_filename",
];

/// Archive options copied as-is.
const ARCHIVE_PLAIN_PARAMS: &[&str] = &[
    "expires_at",
    "mode",
    "notification_url",
    "target_format",
    "target_public_id",
    "type",
];

/// Archive selectors sent as repeated `key[]` fields.
const ARCHIVE_LIST_PARAMS: &[&str] = &[
    "fully_qualified_public_ids",
    "prefixes",
    "public_ids",
    "tags",
    "target_tags",
];

/// Parameters of a `generate_archive` call.
///
/// `transformations` are compiled like `eager`; list selectors stay arrays
/// so they expand to repeated fields.
pub fn build_archive_params(options: &Options) -> Result<Options, ConfigurationError> {
    let mut params = Options::new();
    let ts = options
        .get("timestamp")
        .filter(|v| present(v))
        .cloned()
        .unwrap_or_else(|| json!(timestamp()));
    params.insert("timestamp".into(), ts);

    for &key in ARCHIVE_PLAIN_PARAMS {
        if let Some(value) = options.get(key).filter(|v| present(v)) {
            params.insert(key.into(), value.clone());
        }
    }
    for &key in ARCHIVE_BOOLEAN_PARAMS {
        if let Some(value) = options.get(key).and_then(as_safe_bool) {
            params.insert(key.into(), value);
        }
    }
    for &key in ARCHIVE_LIST_PARAMS {
        if let Some(value) = options.get(key).filter(|v| present(v)) {
            params.insert(key.into(), Value::Array(to_list(Some(value.clone()))));
        }
    }
    if let Some(transformations) = options.get("transformations").filter(|v| present(v)) {
        params.insert(
            "transformations".into(),
            Value::String(build_eager(transformations)?),
        );
    }
    Ok(params)
}

/// Flattens parameters into form fields; lists become repeated `key[]`
/// fields and nulls are dropped.
pub fn hash_to_parameters(params: &Options) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    for (key, value) in params {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items.iter().filter(|v| !v.is_null()) {
                    fields.push((format!("{key}[]"), param_string(item)));
                }
            }
            other => fields.push((key.clone(), param_string(other))),
        }
    }
    fields
}

/// `key=value|key2=value2`, with `=` and `|` in values backslash-escaped.
/// Strings pass through unchanged.
pub fn encode_context(context: &Value) -> String {
    let Value::Object(map) = context else {
        return param_string(context);
    };
    map.iter()
        .map(|(key, value)| match value {
            Value::Array(items) => {
                let quoted = items
                    .iter()
                    .map(|v| format!("\"{}\"", escape_context_value(&param_string(v))))
                    .collect::<Vec<_>>()
                    .join(",");
                format!("{key}=[{quoted}]")
            }
            other => format!("{key}={}", escape_context_value(&param_string(other))),
        })
        .collect::<Vec<_>>()
        .join("|")
}

fn escape_context_value(value: &str) -> String {
    value.replace('=', "\\=").replace('|', "\\|")
}

/// `[[1,2,3,4],[5,6,7,8]]` into `1,2,3,4|5,6,7,8`.
pub fn encode_double_array(value: &Value) -> String {
    let items = to_list(Some(value.clone()));
    if !items.iter().any(Value::is_array) {
        return join_list(value, ",");
    }
    items
        .iter()
        .map(|row| join_list(row, ","))
        .collect::<Vec<_>>()
        .join("|")
}

/// Custom headers for the stored asset, one `Key: value` per line.
fn build_custom_headers(headers: &Value) -> String {
    match headers {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{k}: {}", param_string(v)))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Array(items) => join_list(&Value::Array(items.clone()), "\n"),
        other => param_string(other),
    }
}

/// JSON-encodes a value as an array (objects are wrapped).
fn json_array_param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(_) => value.to_string(),
        other => Value::Array(vec![other.clone()]).to_string(),
    }
}

fn join_list(value: &Value, separator: &str) -> String {
    to_list(Some(value.clone()))
        .iter()
        .map(param_string)
        .collect::<Vec<_>>()
        .join(separator)
}

fn insert_with(
    params: &mut Options,
    options: &Options,
    key: &str,
    encode: impl Fn(&Value) -> String,
) {
    if let Some(value) = options.get(key).filter(|v| !v.is_null()) {
        params.insert(key.into(), Value::String(encode(value)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(v: Value) -> Options {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn canonizes_booleans() {
        let params = build_upload_params(&opts(json!({
            "backup": true,
            "use_filename": false,
            "colors": "true",
            "image_metadata": "false",
            "invalidate": 1
        })))
        .unwrap();
        assert_eq!(params["backup"], json!(1));
        assert_eq!(params["use_filename"], json!(0));
        assert_eq!(params["colors"], json!(1));
        assert_eq!(params["image_metadata"], json!(0));
        assert_eq!(params["invalidate"], json!(1));
    }

    #[test]
    fn null_options_are_omitted() {
        let params = build_upload_params(&opts(json!({"backup": null}))).unwrap();
        assert!(!params.contains_key("backup"));
        let params = build_upload_params(&Options::new()).unwrap();
        assert!(!params.contains_key("backup"));
        assert!(params.contains_key("timestamp"));
    }

    #[test]
    fn compiles_transformation_and_eager() {
        let params = build_upload_params(&opts(json!({
            "public_id": "sample",
            "width": 100,
            "crop": "scale",
            "eager": [
                {"width": 100, "height": 200, "crop": "scale"},
                {"width": 400, "crop": "lfill", "effect": "sepia"}
            ],
            "tags": ["a", "b"]
        })))
        .unwrap();
        assert_eq!(params["transformation"], json!("c_scale,w_100"));
        assert_eq!(params["eager"], json!("c_scale,h_200,w_100|c_lfill,e_sepia,w_400"));
        assert_eq!(params["tags"], json!("a,b"));
        assert_eq!(params["public_id"], json!("sample"));
    }

    #[test]
    fn keeps_caller_timestamp() {
        let params = build_upload_params(&opts(json!({"timestamp": 1234}))).unwrap();
        assert_eq!(params["timestamp"], json!(1234));
    }

    #[test]
    fn explicit_defaults_type() {
        let options = opts(json!({"moderation": "manual", "phash": true}));
        let params = build_explicit_params("some_id", &options).unwrap();
        assert_eq!(params["type"], json!("upload"));
        assert_eq!(params["public_id"], json!("some_id"));
        assert_eq!(params["moderation"], json!("manual"));
        assert_eq!(params["phash"], json!(1));
    }

    #[test]
    fn context_encoding() {
        assert_eq!(
            encode_context(&json!({"caption": "a=b|c", "alt": "x"})),
            "alt=x|caption=a\\=b\\|c"
        );
        assert_eq!(encode_context(&json!({"list": ["a", "b"]})), "list=[\"a\",\"b\"]");
        assert_eq!(encode_context(&json!("k=v")), "k=v");
    }

    #[test]
    fn double_arrays() {
        assert_eq!(encode_double_array(&json!([1, 2, 3, 4])), "1,2,3,4");
        assert_eq!(
            encode_double_array(&json!([[1, 2, 3, 4], [5, 6, 7, 8]])),
            "1,2,3,4|5,6,7,8"
        );
    }

    #[test]
    fn lists_expand_to_repeated_fields() {
        let fields = hash_to_parameters(&opts(json!({
            "public_ids": ["a", "b"],
            "timestamp": 1,
            "skip": null
        })));
        assert_eq!(
            fields,
            vec![
                ("public_ids[]".to_string(), "a".to_string()),
                ("public_ids[]".to_string(), "b".to_string()),
                ("timestamp".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn archive_params() {
        let params = build_archive_params(&opts(json!({
            "tags": "kitten",
            "public_ids": ["a", "b"],
            "transformations": [{"width": 100, "crop": "scale"}, {"effect": "sepia"}],
            "flatten_folders": true,
            "target_format": "zip",
            "timestamp": 1234
        })))
        .unwrap();
        assert_eq!(params["tags"], json!(["kitten"]));
        assert_eq!(params["public_ids"], json!(["a", "b"]));
        assert_eq!(params["transformations"], json!("c_scale,w_100|e_sepia"));
        assert_eq!(params["flatten_folders"], json!(1));
        assert_eq!(params["target_format"], json!("zip"));
        assert_eq!(params["timestamp"], json!(1234));
        assert!(!params.contains_key("mode"));
    }

    #[test]
    fn access_control_is_json_array() {
        let params = build_upload_params(&opts(json!({
            "access_control": {"access_type": "anonymous"}
        })))
        .unwrap();
        assert_eq!(params["access_control"], json!(r#"[{"access_type":"anonymous"}]"#));
    }
}
