//! Provider records and their transport configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::error::{TemplateError, ValidationError};
use crate::template::{self, TemplateVars};
use crate::transport::RenderedRequest;

/// Polymorphic tag selecting which transport interprets a provider's config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum TransportType {
    GenericHttp,
}

impl TransportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::GenericHttp => "genericHttp",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl FromStr for HttpMethod {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(TemplateError::InvalidField {
                key: "method",
                reason: format!("unsupported method {:?}", other),
            }),
        }
    }
}

/// Config of a `genericHttp` provider: a fully templated HTTP request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    pub url: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body_template: Value,
}

impl HttpConfig {
    /// Validate an untyped config object.
    pub fn from_value(value: &Value) -> Result<Self, TemplateError> {
        let obj = value.as_object().ok_or(TemplateError::NotAnObject)?;

        let url = required_str(obj, "url")?;
        check_url(url)?;

        let method: HttpMethod = required_str(obj, "method")?.parse()?;

        let headers: BTreeMap<String, String> = match obj.get("headers") {
            None | Some(Value::Null) => BTreeMap::new(),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| match v {
                    Value::String(s) => Ok((k.clone(), s.clone())),
                    _ => Err(TemplateError::InvalidField {
                        key: "headers",
                        reason: format!("value for {:?} must be a string", k),
                    }),
                })
                .collect::<Result<_, _>>()?,
            Some(_) => {
                return Err(TemplateError::InvalidField {
                    key: "headers",
                    reason: "must be an object of strings".into(),
                })
            }
        };

        for (name, value) in &headers {
            check_header(name, value)?;
        }

        let body_template = obj
            .get("bodyTemplate")
            .cloned()
            .ok_or(TemplateError::MissingKey("bodyTemplate"))?;

        Ok(Self {
            url: url.to_string(),
            method,
            headers,
            body_template,
        })
    }

    pub fn render(&self, vars: &TemplateVars<'_>) -> HttpRequest {
        HttpRequest {
            method: self.method,
            url: render_url(&self.url, vars),
            headers: self
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), template::render_str(v, vars)))
                .collect(),
            body: template::render(&self.body_template, vars),
        }
    }
}

/// Stand-in values used to check a template before any real send.
const SAMPLE_VARS: TemplateVars<'static> = TemplateVars {
    phone: "+10000000000",
    message: "sample message",
};

/// Substitute into a URL template, percent-encoding the variables so that
/// `+`, `&`, `#` and friends survive as data.
fn render_url(url: &str, vars: &TemplateVars<'_>) -> String {
    let phone = urlencoding::encode(vars.phone);
    let message = urlencoding::encode(vars.message);
    template::render_str(url, &TemplateVars::new(&phone, &message))
}

fn check_url(raw: &str) -> Result<(), TemplateError> {
    let invalid = |reason: String| TemplateError::InvalidField { key: "url", reason };
    let parsed = url::Url::parse(&render_url(raw, &SAMPLE_VARS)).map_err(|e| invalid(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {:?}", parsed.scheme())));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".into()));
    }
    Ok(())
}

fn check_header(name: &str, value: &str) -> Result<(), TemplateError> {
    http::HeaderName::from_bytes(name.as_bytes()).map_err(|_| TemplateError::InvalidField {
        key: "headers",
        reason: format!("invalid header name {:?}", name),
    })?;
    http::HeaderValue::from_str(&template::render_str(value, &SAMPLE_VARS)).map_err(|_| {
        TemplateError::InvalidField {
            key: "headers",
            reason: format!("invalid value for header {:?}", name),
        }
    })?;
    Ok(())
}

fn required_str<'a>(obj: &'a Map<String, Value>, key: &'static str) -> Result<&'a str, TemplateError> {
    match obj.get(key) {
        None | Some(Value::Null) => Err(TemplateError::MissingKey(key)),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.as_str()),
        Some(_) => Err(TemplateError::InvalidField {
            key,
            reason: "must be a non-empty string".into(),
        }),
    }
}

/// A rendered `genericHttp` request, ready to be issued.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

/// Transport-specific provider configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
#[non_exhaustive]
pub enum ProviderConfig {
    GenericHttp(HttpConfig),
}

impl ProviderConfig {
    /// Validate `raw` against the schema of `transport_type`.
    ///
    /// A string is parsed as JSON first, so configs pasted as text are accepted.
    pub fn parse(transport_type: TransportType, raw: &Value) -> Result<Self, TemplateError> {
        let parsed;
        let value = match raw {
            Value::String(text) => {
                parsed = serde_json::from_str::<Value>(text)
                    .map_err(|e| TemplateError::NotStructured(e.to_string()))?;
                &parsed
            }
            other => other,
        };
        match transport_type {
            TransportType::GenericHttp => HttpConfig::from_value(value).map(ProviderConfig::GenericHttp),
        }
    }

    pub fn transport_type(&self) -> TransportType {
        match self {
            ProviderConfig::GenericHttp(_) => TransportType::GenericHttp,
        }
    }

    pub fn render(&self, vars: &TemplateVars<'_>) -> RenderedRequest {
        match self {
            ProviderConfig::GenericHttp(http) => RenderedRequest::Http(http.render(vars)),
        }
    }
}

/// A configured SMS gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub id: String,
    pub name: String,
    pub transport_type: TransportType,
    pub config: ProviderConfig,
    /// Higher is attempted first.
    pub priority: i64,
    pub is_active: bool,
    pub cost_per_message: BigDecimal,
    pub currency: String,
    /// Creation order, used to break priority ties.
    pub created_seq: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Provider record as submitted by an admin, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDraft {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default = "default_transport_type")]
    pub transport_type: TransportType,
    pub config: Value,
    pub priority: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub cost_per_message: BigDecimal,
    pub currency: String,
}

fn default_transport_type() -> TransportType {
    TransportType::GenericHttp
}

fn default_active() -> bool {
    true
}

impl ProviderDraft {
    /// Decode an admin-submitted JSON record.
    ///
    /// A fractional or non-numeric priority is reported as
    /// [`ValidationError::NonIntegerPriority`] rather than a decode failure.
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        if let Some(priority) = value.get("priority") {
            if priority.as_i64().is_none() {
                return Err(ValidationError::NonIntegerPriority);
            }
        }
        serde_json::from_value(value).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    /// Field checks that do not involve the transport config.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.cost_per_message < BigDecimal::zero() {
            return Err(ValidationError::NegativeCost(self.cost_per_message.to_string()));
        }
        let currency = self.currency.trim();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::InvalidCurrency(self.currency.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft_json() -> Value {
        json!({
            "name": "Libyana",
            "config": {
                "url": "https://gw.example.com/send?to={{phone}}",
                "method": "post",
                "headers": {"Authorization": "Bearer abc"},
                "bodyTemplate": {"to": "{{phone}}", "text": "{{message}}"}
            },
            "priority": 10,
            "costPerMessage": "0.035",
            "currency": "LYD"
        })
    }

    #[test]
    fn decodes_admin_draft_with_defaults() {
        let draft = ProviderDraft::from_value(draft_json()).unwrap();
        assert_eq!(draft.transport_type, TransportType::GenericHttp);
        assert!(draft.is_active);
        assert_eq!(draft.priority, 10);
        draft.validate().unwrap();
    }

    #[test]
    fn rejects_fractional_priority() {
        let mut value = draft_json();
        value["priority"] = json!(2.5);
        assert_eq!(
            ProviderDraft::from_value(value),
            Err(ValidationError::NonIntegerPriority)
        );

        let mut value = draft_json();
        value["priority"] = json!("high");
        assert_eq!(
            ProviderDraft::from_value(value),
            Err(ValidationError::NonIntegerPriority)
        );
    }

    #[test]
    fn rejects_negative_cost_and_bad_currency() {
        let mut value = draft_json();
        value["costPerMessage"] = json!("-0.01");
        let draft = ProviderDraft::from_value(value).unwrap();
        assert!(matches!(draft.validate(), Err(ValidationError::NegativeCost(_))));

        let mut value = draft_json();
        value["currency"] = json!("DINAR");
        let draft = ProviderDraft::from_value(value).unwrap();
        assert!(matches!(draft.validate(), Err(ValidationError::InvalidCurrency(_))));
    }

    #[test]
    fn zero_cost_is_allowed() {
        let mut value = draft_json();
        value["costPerMessage"] = json!(0);
        ProviderDraft::from_value(value).unwrap().validate().unwrap();
    }

    #[test]
    fn parses_http_config_and_normalises_method() {
        let config = ProviderConfig::parse(TransportType::GenericHttp, &draft_json()["config"]).unwrap();
        let ProviderConfig::GenericHttp(http) = &config;
        assert_eq!(http.method, HttpMethod::Post);
        assert_eq!(config.transport_type(), TransportType::GenericHttp);
    }

    #[test]
    fn parses_config_given_as_text() {
        let text = draft_json()["config"].to_string();
        ProviderConfig::parse(TransportType::GenericHttp, &Value::String(text)).unwrap();

        let err = ProviderConfig::parse(TransportType::GenericHttp, &json!("{not json")).unwrap_err();
        assert!(matches!(err, TemplateError::NotStructured(_)));
    }

    #[test]
    fn reports_missing_required_keys() {
        for key in ["url", "method", "bodyTemplate"] {
            let mut config = draft_json()["config"].clone();
            config.as_object_mut().unwrap().remove(key);
            assert_eq!(
                ProviderConfig::parse(TransportType::GenericHttp, &config),
                Err(TemplateError::MissingKey(key))
            );
        }
    }

    #[test]
    fn rejects_non_string_headers_and_unknown_methods() {
        let mut config = draft_json()["config"].clone();
        config["headers"] = json!({"X-Retry": 3});
        assert!(matches!(
            HttpConfig::from_value(&config),
            Err(TemplateError::InvalidField { key: "headers", .. })
        ));

        let mut config = draft_json()["config"].clone();
        config["method"] = json!("TRACE");
        assert!(matches!(
            HttpConfig::from_value(&config),
            Err(TemplateError::InvalidField { key: "method", .. })
        ));
    }

    #[test]
    fn renders_url_headers_and_body() {
        let mut config = draft_json()["config"].clone();
        config["headers"] = json!({"X-To": "{{phone}}"});
        let http = HttpConfig::from_value(&config).unwrap();
        let request = http.render(&TemplateVars::new("+218911234567", "hi"));
        assert_eq!(request.url, "https://gw.example.com/send?to=%2B218911234567");
        assert_eq!(request.headers["X-To"], "+218911234567");
        assert_eq!(request.body, json!({"to": "+218911234567", "text": "hi"}));
    }

    #[test]
    fn url_variables_are_percent_encoded() {
        let mut config = draft_json()["config"].clone();
        config["url"] = json!("https://gw.example.com/send?to={{phone}}&text={{message}}");
        let http = HttpConfig::from_value(&config).unwrap();
        let request = http.render(&TemplateVars::new("+218911234567", "50% off & more #1"));
        assert_eq!(
            request.url,
            "https://gw.example.com/send?to=%2B218911234567&text=50%25%20off%20%26%20more%20%231"
        );
        // the body is left for the transport to encode
        assert_eq!(request.body["text"], "50% off & more #1");
    }

    #[test]
    fn rejects_unusable_urls() {
        for url in ["http://", "ftp://gw.example.com/send", "gw.example.com/send", "https://exa mple.com"] {
            let mut config = draft_json()["config"].clone();
            config["url"] = json!(url);
            assert!(
                matches!(
                    HttpConfig::from_value(&config),
                    Err(TemplateError::InvalidField { key: "url", .. })
                ),
                "{} should be rejected",
                url
            );
        }
    }

    #[test]
    fn rejects_invalid_header_names_and_values() {
        let mut config = draft_json()["config"].clone();
        config["headers"] = json!({"Bad Header": "x"});
        assert!(matches!(
            HttpConfig::from_value(&config),
            Err(TemplateError::InvalidField { key: "headers", .. })
        ));

        let mut config = draft_json()["config"].clone();
        config["headers"] = json!({"X-Token": "line\nbreak"});
        assert!(matches!(
            HttpConfig::from_value(&config),
            Err(TemplateError::InvalidField { key: "headers", .. })
        ));
    }
}
