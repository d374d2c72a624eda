//! Transformation compiler.
//!
//! Turns an option bag such as `{width: 100, height: 100, crop: "crop"}` into
//! the comma/slash separated string that sits in a delivery URL
//! (`c_crop,h_100,w_100`). Parameters are rendered `{short}_{value}` and
//! sorted by short code; nested chains under `transformation` become their
//! own slash-separated segments ahead of the current one.
//!
//! Every key the compiler understands is consumed from the option bag. What
//! remains afterwards is the caller's leftover set.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use cloudinary_core::{ConfigurationError, Options, as_f64, consume, param_string, present, to_list};
use serde_json::Value;

use crate::expression::normalize_expression;
use crate::layer::process_layer;

/// Options rendered verbatim under their short code.
const SIMPLE_PARAMS: &[(&str, &str)] = &[
    ("audio_codec", "ac"),
    ("audio_frequency", "af"),
    ("bit_rate", "br"),
    ("color_space", "cs"),
    ("default_image", "d"),
    ("delay", "dl"),
    ("density", "dn"),
    ("fetch_format", "f"),
    ("gravity", "g"),
    ("page", "pg"),
    ("prefix", "p"),
    ("streaming_profile", "sp"),
    ("video_sampling", "vs"),
];

/// Options whose values are expressions.
const EXPRESSION_PARAMS: &[(&str, &str)] = &[
    ("aspect_ratio", "ar"),
    ("dpr", "dpr"),
    ("keyframe_interval", "ki"),
    ("opacity", "o"),
    ("x", "x"),
    ("y", "y"),
    ("zoom", "z"),
];

/// Offset-like options: `"30%"`/`"30p"` become `30p`.
const RANGE_PARAMS: &[(&str, &str)] = &[
    ("duration", "du"),
    ("end_offset", "eo"),
    ("start_offset", "so"),
];

/// Result of [`compile`]: the rendered string plus the options that were
/// not consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub query_string: String,
    pub leftover: Options,
}

/// Compiles `options` without mutating them.
pub fn compile(options: &Options) -> Result<Compiled, ConfigurationError> {
    let mut leftover = options.clone();
    let query_string = generate_transformation_string(&mut leftover)?;
    Ok(Compiled {
        query_string,
        leftover,
    })
}

/// Compiles a transformation, consuming every recognised key from `options`.
///
/// `width`/`height` stay in `options` only when no crop mode, angle or
/// layer was given and the value is neither relative (`< 1`) nor `auto`.
pub fn generate_transformation_string(options: &mut Options) -> Result<String, ConfigurationError> {
    if let Some(size) = consume(options, "size") {
        if let Some((w, h)) = param_string(&size).split_once('x') {
            options.insert("width".into(), Value::String(w.to_string()));
            options.insert("height".into(), Value::String(h.to_string()));
        }
    }

    let has_layer = ["overlay", "underlay"]
        .iter()
        .any(|k| options.get(*k).is_some_and(present));
    let crop = take_string(options, "crop");
    let angle = consume(options, "angle")
        .map(|a| normalize_expression(&join(&to_list(Some(a)), ".")));
    let keep_dimensions = crop.is_none() && angle.is_none() && !has_layer;
    let width = take_dimension(options, "width", keep_dimensions);
    let height = take_dimension(options, "height", keep_dimensions);

    let background = take_string(options, "background").map(|b| rgb(&b));
    let color = take_string(options, "color").map(|c| rgb(&c));

    let mut segments = Vec::new();
    let mut named = None;
    let chain = to_list(consume(options, "transformation"));
    if chain.iter().any(Value::is_object) {
        for item in chain {
            let mut nested = match item {
                Value::Object(map) => map,
                other => {
                    let mut map = Options::new();
                    map.insert("transformation".into(), other);
                    map
                }
            };
            segments.push(generate_transformation_string(&mut nested)?);
        }
    } else if !chain.is_empty() {
        named = Some(join(&chain, "."));
    }

    let effect = consume(options, "effect").map(|e| {
        let rendered = match e {
            Value::Array(items) => join(&items, ":"),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| format!("{k}:{}", param_string(v)))
                .collect::<Vec<_>>()
                .join(","),
            other => param_string(&other),
        };
        normalize_expression(&rendered)
    });

    let border = match consume(options, "border") {
        Some(Value::Object(b)) => {
            let width = b.get("width").filter(|v| present(v)).map(param_string);
            let color = b.get("color").filter(|v| present(v)).map(param_string);
            Some(format!(
                "{}px_solid_{}",
                width.as_deref().unwrap_or("2"),
                rgb(color.as_deref().unwrap_or("black"))
            ))
        }
        Some(plain) if is_digits(&param_string(&plain)) => {
            // A bare number is an HTML attribute, not a transformation.
            options.insert("border".into(), plain);
            None
        }
        Some(other) => Some(param_string(&other)),
        None => None,
    };

    let flags = consume(options, "flags").map(|f| join(&to_list(Some(f)), "."));

    if let Some(offset) = consume(options, "offset") {
        let (start, end) = split_range(&offset);
        if let Some(start) = start {
            options.insert("start_offset".into(), start);
        }
        if let Some(end) = end {
            options.insert("end_offset".into(), end);
        }
    }

    let overlay = consume(options, "overlay").map(|l| process_layer(&l)).transpose()?;
    let underlay = consume(options, "underlay").map(|l| process_layer(&l)).transpose()?;
    let radius = consume(options, "radius").map(|r| process_radius(&r)).transpose()?;
    let condition = consume(options, "if").map(|c| normalize_expression(&param_string(&c)));
    let function = match consume(options, "custom_function") {
        Some(f) => Some(process_custom_function(&f)),
        None => consume(options, "custom_pre_function")
            .map(|f| format!("pre:{}", process_custom_function(&f))),
    };
    let fps = consume(options, "fps").map(|f| join(&to_list(Some(f)), "-"));
    let quality = consume(options, "quality").map(|q| validate_quality(&q)).transpose()?;
    let video_codec = consume(options, "video_codec").map(|v| process_video_codec(&v));
    let variables = take_variables(options);

    let mut params: Vec<(&str, Option<String>)> = vec![
        ("a", angle),
        ("b", background),
        ("bo", border),
        ("c", crop),
        ("co", color),
        ("e", effect),
        ("fl", flags),
        ("fn", function),
        ("fps", fps),
        ("h", height.map(|v| normalize_value(&v))),
        ("l", overlay),
        ("q", quality),
        ("r", radius),
        ("t", named),
        ("u", underlay),
        ("vc", video_codec),
        ("w", width.map(|v| normalize_value(&v))),
    ];
    for &(key, short) in EXPRESSION_PARAMS {
        params.push((short, consume(options, key).map(|v| normalize_value(&v))));
    }
    for &(key, short) in SIMPLE_PARAMS {
        params.push((short, consume(options, key).map(|v| param_string(&v))));
    }
    for &(key, short) in RANGE_PARAMS {
        params.push((short, consume(options, key).map(|v| norm_range_value(&v))));
    }

    let mut rendered: Vec<(&str, String)> = params
        .into_iter()
        .filter_map(|(short, value)| value.filter(|v| !v.is_empty()).map(|v| (short, v)))
        .collect();
    rendered.sort_by(|a, b| a.0.cmp(b.0));
    let rendered = rendered
        .iter()
        .map(|(short, value)| format!("{short}_{value}"))
        .collect::<Vec<_>>()
        .join(",");

    let raw = take_string(options, "raw_transformation");
    let current = [
        condition.map(|c| format!("if_{c}")),
        Some(variables),
        Some(rendered),
        raw,
    ]
    .into_iter()
    .flatten()
    .filter(|s| !s.is_empty())
    .collect::<Vec<_>>()
    .join(",");

    segments.push(current);
    Ok(segments
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Compiles an `eager` list: each entry is compiled (or passed through when
/// it is already a string) and gets its `format` appended; entries are
/// joined with `|`.
pub fn build_eager(eager: &Value) -> Result<String, ConfigurationError> {
    let mut entries = Vec::new();
    for item in to_list(Some(eager.clone())) {
        let entry = match item {
            Value::Object(mut options) => {
                let format = consume(&mut options, "format");
                let compiled = generate_transformation_string(&mut options)?;
                match format {
                    Some(format) => format!("{compiled}/{}", param_string(&format)),
                    None => compiled,
                }
            }
            other => param_string(&other),
        };
        entries.push(entry);
    }
    Ok(entries.join("|"))
}

fn take_string(options: &mut Options, key: &str) -> Option<String> {
    consume(options, key)
        .filter(present)
        .map(|v| param_string(&v))
}

fn take_dimension(options: &mut Options, key: &str, keep: bool) -> Option<Value> {
    let value = match options.get(key) {
        Some(v) if present(v) => v.clone(),
        Some(_) => {
            options.remove(key);
            return None;
        }
        None => return None,
    };
    let relative = as_f64(&value).is_some_and(|f| f < 1.0);
    let auto = matches!(&value, Value::String(s) if s.starts_with("auto"));
    if !keep || relative || auto {
        options.remove(key);
    }
    Some(value)
}

fn take_variables(options: &mut Options) -> String {
    let keys: Vec<String> = options
        .keys()
        .filter(|k| k.starts_with('$'))
        .cloned()
        .collect();
    let mut assignments: Vec<String> = keys
        .iter()
        .filter_map(|k| {
            options
                .remove(k)
                .map(|v| format!("{k}_{}", normalize_value(&v)))
        })
        .collect();
    assignments.sort();

    if let Some(Value::Array(list)) = consume(options, "variables") {
        for pair in list {
            if let Value::Array(pair) = pair {
                if let [name, value] = pair.as_slice() {
                    let name = param_string(name);
                    let name = if name.starts_with('$') { name } else { format!("${name}") };
                    assignments.push(format!("{name}_{}", normalize_value(value)));
                }
            }
        }
    }
    assignments.join(",")
}

fn normalize_value(value: &Value) -> String {
    match value {
        Value::String(s) => normalize_expression(s),
        other => param_string(other),
    }
}

fn join(values: &[Value], separator: &str) -> String {
    values
        .iter()
        .map(param_string)
        .collect::<Vec<_>>()
        .join(separator)
}

fn rgb(color: &str) -> String {
    match color.strip_prefix('#') {
        Some(hex) => format!("rgb:{hex}"),
        None => color.to_string(),
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Corner radii: a single value or 1-4 values joined with `:`.
fn process_radius(radius: &Value) -> Result<String, ConfigurationError> {
    match radius {
        Value::Array(corners) => {
            if corners.is_empty() || corners.len() > 4 {
                return Err(ConfigurationError::new(
                    "Radius array should contain between 1 and 4 values",
                ));
            }
            if corners.iter().any(Value::is_null) {
                return Err(ConfigurationError::new("Corner: Cannot be null"));
            }
            Ok(corners
                .iter()
                .map(normalize_value)
                .collect::<Vec<_>>()
                .join(":"))
        }
        other => Ok(normalize_value(other)),
    }
}

/// `{function_type}:{source}`; remote sources are base64url encoded.
fn process_custom_function(function: &Value) -> String {
    match function {
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            let kind = map.get("function_type").map(param_string).unwrap_or_default();
            let source = map.get("source").map(param_string).unwrap_or_default();
            if kind == "remote" {
                format!("{kind}:{}", URL_SAFE_NO_PAD.encode(source))
            } else {
                format!("{kind}:{source}")
            }
        }
        _ => ":".to_string(),
    }
}

/// `{codec[:profile[:level]]}` from an object, otherwise the plain value.
fn process_video_codec(codec: &Value) -> String {
    let Value::Object(map) = codec else {
        return param_string(codec);
    };
    let mut out = map.get("codec").map(param_string).unwrap_or_default();
    if let Some(profile) = map.get("profile").filter(|v| present(v)) {
        out.push(':');
        out.push_str(&param_string(profile));
        if let Some(level) = map.get("level").filter(|v| present(v)) {
            out.push(':');
            out.push_str(&param_string(level));
        }
    }
    out
}

/// `"a..b"` or `[a, b]` into a start and end offset.
fn split_range(range: &Value) -> (Option<Value>, Option<Value>) {
    let non_empty = |v: &Value| Some(v.clone()).filter(present);
    match range {
        Value::Array(items) if items.len() == 2 => (non_empty(&items[0]), non_empty(&items[1])),
        Value::String(s) => match s.split_once("..") {
            Some((start, end)) => (
                non_empty(&Value::String(start.to_string())),
                non_empty(&Value::String(end.to_string())),
            ),
            None => (None, None),
        },
        _ => (None, None),
    }
}

fn norm_range_value(value: &Value) -> String {
    let s = param_string(value);
    let numeric = |n: &str| !n.is_empty() && n.parse::<f64>().is_ok();
    match s.strip_suffix(['%', 'p', 'P']) {
        Some(number) if numeric(number) => format!("{number}p"),
        _ => s,
    }
}

/// Accepts a number, `N:chroma`, `auto`, `auto:<policy>`, `jpegmini[:n]` or
/// a `$variable` expression.
fn validate_quality(quality: &Value) -> Result<String, ConfigurationError> {
    let rendered = param_string(quality);
    let valid = match quality {
        Value::Number(_) => true,
        Value::String(s) => {
            let (head, tail) = match s.split_once(':') {
                Some((h, t)) => (h, Some(t)),
                None => (s.as_str(), None),
            };
            let tail_ok = tail.is_none_or(|t| {
                !t.is_empty() && t.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            });
            let head_ok = head.parse::<f64>().is_ok()
                || head == "auto"
                || head == "jpegmini"
                || head.starts_with('$');
            head_ok && tail_ok
        }
        _ => false,
    };
    if valid {
        Ok(normalize_expression(&rendered))
    } else {
        Err(ConfigurationError::new(format!(
            "Invalid quality value '{rendered}'"
        )))
    }
}
