//! Placeholder substitution over structured request templates.
//!
//! A template is any JSON value. Every string leaf has `{{phone}}` and
//! `{{message}}` replaced verbatim; no escaping is applied here; transports
//! encode the rendered value for their wire format afterwards.

use serde_json::Value;

pub const PHONE_TOKEN: &str = "{{phone}}";
pub const MESSAGE_TOKEN: &str = "{{message}}";

/// Values substituted into a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateVars<'a> {
    pub phone: &'a str,
    pub message: &'a str,
}

impl<'a> TemplateVars<'a> {
    pub fn new(phone: &'a str, message: &'a str) -> Self {
        Self { phone, message }
    }
}

/// Render a structured template. Object keys are left untouched.
pub fn render(template: &Value, vars: &TemplateVars<'_>) -> Value {
    match template {
        Value::String(s) => Value::String(render_str(s, vars)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Render a single string.
///
/// Substitution is single-pass, so a variable value that itself contains a
/// placeholder is emitted as-is.
pub fn render_str(input: &str, vars: &TemplateVars<'_>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix(PHONE_TOKEN) {
            out.push_str(vars.phone);
            rest = after;
        } else if let Some(after) = tail.strip_prefix(MESSAGE_TOKEN) {
            out.push_str(vars.message);
            rest = after;
        } else {
            out.push_str("{{");
            rest = &tail[2..];
        }
    }
    out.push_str(rest);
    out
}
