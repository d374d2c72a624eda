//! The dynamic option bag passed to every URL and upload call.
//!
//! Keys that an operation understands are *consumed* (removed) as they are
//! read; whatever remains afterwards is handed back to the caller as
//! leftover options.

use serde_json::{Number, Value};

/// Caller supplied options: parameter name to scalar, list or nested map.
pub type Options = serde_json::Map<String, Value>;

/// Removes `key` from `options` and returns its value.
///
/// An explicit `null` is removed as well but reported as absent.
pub fn consume(options: &mut Options, key: &str) -> Option<Value> {
    match options.remove(key) {
        Some(Value::Null) | None => None,
        Some(v) => Some(v),
    }
}

/// Whether a value counts as "set": not null and not rendering to an empty string.
pub fn present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

/// Loose truthiness used for flag-like options (`sign_url`, `unsigned`, ...).
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Renders a value the way it appears in a signed parameter or URL segment.
///
/// Lists are joined with `,`; whole floats print without a fractional part.
pub fn param_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => number_string(n),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(param_string)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => value.to_string(),
    }
}

fn number_string(n: &Number) -> String {
    if n.is_f64() {
        if let Some(f) = n.as_f64() {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                return format!("{}", f as i64);
            }
        }
    }
    n.to_string()
}

/// Normalises a scalar-or-list value into a list (null becomes empty).
pub fn to_list(value: Option<Value>) -> Vec<Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items,
        Some(v) => vec![v],
    }
}

/// Parses a number out of a numeric or numeric-looking string value.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn consume_removes_key() {
        let mut options = json!({"crop": "fill", "width": 10}).as_object().cloned().unwrap();
        assert_eq!(consume(&mut options, "crop"), Some(json!("fill")));
        assert!(!options.contains_key("crop"));
        assert_eq!(consume(&mut options, "crop"), None);
    }

    #[test]
    fn consume_treats_null_as_absent() {
        let mut options = json!({"format": null}).as_object().cloned().unwrap();
        assert_eq!(consume(&mut options, "format"), None);
        assert!(options.is_empty());
    }

    #[test]
    fn present_rules() {
        assert!(!present(&Value::Null));
        assert!(!present(&json!("")));
        assert!(!present(&json!([])));
        assert!(present(&json!(0)));
        assert!(present(&json!(false)));
        assert!(present(&json!("x")));
    }

    #[test]
    fn param_string_formats() {
        assert_eq!(param_string(&json!(12)), "12");
        assert_eq!(param_string(&json!(0.4)), "0.4");
        assert_eq!(param_string(&json!(10.0)), "10");
        assert_eq!(param_string(&json!(["a", 1, "b"])), "a,1,b");
        assert_eq!(param_string(&json!(true)), "true");
    }

    #[test]
    fn to_list_wraps_scalars() {
        assert_eq!(to_list(Some(json!("a"))), vec![json!("a")]);
        assert_eq!(to_list(Some(json!(["a", "b"]))).len(), 2);
        assert!(to_list(None).is_empty());
    }
}
