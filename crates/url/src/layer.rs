//! Overlay/underlay layer descriptors.
//!
//! A layer is either a ready-made string (`text:hello`, `sample`,
//! `fetch:http://...`) or an object describing a public id, a text with a
//! font style, or a remote URL.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use cloudinary_core::{ConfigurationError, Options, param_string, present};
use serde_json::Value;

use crate::escape::escape_layer_text;

/// Style keywords and the value that means "leave it out".
const KEYWORD_PARAMS: &[(&str, Option<&str>)] = &[
    ("font_weight", Some("normal")),
    ("font_style", Some("normal")),
    ("text_decoration", Some("none")),
    ("text_align", None),
    ("stroke", Some("none")),
];

/// Renders a layer value into its `l_`/`u_` parameter form.
pub fn process_layer(layer: &Value) -> Result<String, ConfigurationError> {
    match layer {
        Value::Object(map) => object_layer(map),
        Value::String(s) => match s.strip_prefix("fetch:") {
            Some(url) if !url.is_empty() => Ok(fetch_layer(url)),
            _ => Ok(s.clone()),
        },
        other => Ok(param_string(other)),
    }
}

fn fetch_layer(url: &str) -> String {
    format!("fetch:{}", URL_SAFE.encode(url))
}

fn field(layer: &Options, key: &str) -> Option<String> {
    layer.get(key).filter(|v| present(v)).map(param_string)
}

fn object_layer(layer: &Options) -> Result<String, ConfigurationError> {
    let mut resource_type = field(layer, "resource_type").unwrap_or_else(|| "image".into());
    if resource_type == "fetch" || layer.get("url").is_some_and(present) {
        return Ok(fetch_layer(&field(layer, "url").unwrap_or_default()));
    }

    let mut kind = Some(field(layer, "type").unwrap_or_else(|| "upload".into()));
    let public_id = field(layer, "public_id").map(|id| {
        let id = id.replace('/', ":");
        match field(layer, "format") {
            Some(format) => format!("{id}.{format}"),
            None => id,
        }
    });
    let mut text = field(layer, "text");
    let mut style = None;

    if text.is_none() && resource_type != "text" {
        if public_id.is_none() {
            return Err(ConfigurationError::new(
                "Must supply public_id for resource_type layer_parameter",
            ));
        }
        if resource_type == "subtitles" {
            style = text_style(layer)?;
        }
    } else {
        resource_type = "text".into();
        kind = None;
        style = text_style(layer)?;
        if let Some(t) = text.take() {
            if public_id.is_some() == style.is_some() {
                return Err(ConfigurationError::new(
                    "Must supply either style parameters or a public_id with a text parameter",
                ));
            }
            text = Some(escape_layer_text(&t));
        }
    }

    let mut components = Vec::new();
    if resource_type != "image" {
        components.push(resource_type);
    }
    if let Some(kind) = kind.filter(|k| k != "upload") {
        components.push(kind);
    }
    components.extend(style);
    components.extend(public_id);
    components.extend(text);
    Ok(components
        .into_iter()
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(":"))
}

/// `{font_family}_{font_size}[_{keyword}...]`, or `None` when the layer
/// carries no style at all.
fn text_style(layer: &Options) -> Result<Option<String>, ConfigurationError> {
    let mut keywords = Vec::new();
    for (key, default) in KEYWORD_PARAMS {
        if let Some(value) = field(layer, key) {
            if Some(value.as_str()) != *default {
                keywords.push(value);
            }
        }
    }
    for (key, value) in layer {
        let value = param_string(value);
        match key.as_str() {
            "letter_spacing" | "line_spacing" => keywords.push(format!("{key}_{value}")),
            "font_hinting" => keywords.push(format!("hinting_{value}")),
            "font_antialiasing" => keywords.push(format!("antialias_{value}")),
            _ => {}
        }
    }

    let styled = layer.contains_key("font_size")
        || layer.contains_key("font_family")
        || !keywords.is_empty();
    if !styled {
        return Ok(None);
    }
    let size = field(layer, "font_size").ok_or_else(|| {
        ConfigurationError::new("Must supply font_size for text in overlay/underlay")
    })?;
    let family = field(layer, "font_family").ok_or_else(|| {
        ConfigurationError::new("Must supply font_family for text in overlay/underlay")
    })?;

    let mut parts = vec![family, size];
    parts.extend(keywords);
    Ok(Some(parts.join("_")))
}
