//! # Generic HTTP transport
//!
//! [`TransportClient`] for providers of type `genericHttp`: the provider's
//! config describes the whole request (method, URL, headers, body template),
//! so no vendor-specific code is needed.
//!
//! Body encoding after placeholder substitution:
//! - `GET`: an object body becomes query parameters, anything else is dropped
//! - a `Content-Type: application/x-www-form-urlencoded` header with an object
//!   body sends a form
//! - a string body is sent as-is
//! - everything else is sent as JSON

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sms_core::transport::raw_response;
use sms_core::{
    HttpMethod, HttpRequest, Outcome, Provider, RenderedRequest, TransportClient, TransportFailure,
    TransportType,
};
use tracing::{debug, warn};

/// Upper bound on the provider body kept in a failure reason.
const MAX_ERROR_BODY: usize = 512;

/// `genericHttp` transport backed by reqwest.
#[derive(Clone, Debug)]
pub struct GenericHttpTransport {
    http: reqwest::Client,
    timeout: Duration,
}

impl GenericHttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), timeout)
    }

    /// Use a preconfigured client (proxies, TLS roots, ...).
    pub fn with_client(http: reqwest::Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn build(&self, req: &HttpRequest) -> reqwest::RequestBuilder {
        let method = match req.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self
            .http
            .request(method, &req.url)
            .timeout(self.timeout);
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        match (&req.method, &req.body) {
            (HttpMethod::Get, Value::Object(_)) => builder.query(&flatten(&req.body)),
            (HttpMethod::Get, _) | (_, Value::Null) => builder,
            (_, Value::Object(_)) if is_form(req) => builder.form(&flatten(&req.body)),
            (_, Value::String(text)) => builder.body(text.clone()),
            (_, body) => builder.json(body),
        }
    }
}

fn is_form(req: &HttpRequest) -> bool {
    req.headers.iter().any(|(k, v)| {
        k.eq_ignore_ascii_case("content-type")
            && v.to_ascii_lowercase().starts_with("application/x-www-form-urlencoded")
    })
}

/// Flatten a top-level object into string pairs; nested values are JSON-encoded.
fn flatten(body: &Value) -> Vec<(String, String)> {
    body.as_object()
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    (k.clone(), v)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn classify(err: reqwest::Error) -> TransportFailure {
    if err.is_timeout() {
        TransportFailure::Timeout
    } else {
        TransportFailure::Network(err.to_string())
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

#[async_trait]
impl TransportClient for GenericHttpTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::GenericHttp
    }

    async fn call(&self, provider: &Provider, request: &RenderedRequest) -> Outcome {
        let req = match request {
            RenderedRequest::Http(req) => req,
            _ => {
                return Outcome::failure(TransportFailure::Unsupported(
                    "non-http request".to_string(),
                ))
            }
        };
        debug!(
            provider_id = %provider.id,
            method = req.method.as_str(),
            "issuing gateway request"
        );

        let res = match self.build(req).send().await {
            Ok(res) => res,
            Err(e) => {
                let reason = classify(e);
                warn!(provider_id = %provider.id, %reason, "gateway request failed");
                return Outcome::failure(reason);
            }
        };

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Outcome::failure(TransportFailure::Status {
                status: status.as_u16(),
                body: truncate(body),
            });
        }

        match res.text().await {
            Ok(text) => Outcome::success(raw_response(&text)),
            Err(e) => Outcome::failure(classify(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::any;
    use axum::{Json, Router};
    use bigdecimal::BigDecimal;
    use serde_json::json;
    use sms_core::{HttpConfig, ProviderConfig, TemplateVars};
    use std::collections::{BTreeMap, HashMap};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn echo(
        headers: HeaderMap,
        Query(query): Query<HashMap<String, String>>,
        body: String,
    ) -> Json<Value> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Json(json!({
            "auth": header("authorization"),
            "contentType": header("content-type"),
            "query": query,
            "body": body,
        }))
    }

    fn provider(url: &str, method: HttpMethod, headers: &[(&str, &str)], body: Value) -> Provider {
        Provider {
            id: "gw-1".into(),
            name: "Gateway".into(),
            transport_type: TransportType::GenericHttp,
            config: ProviderConfig::GenericHttp(HttpConfig {
                url: url.to_string(),
                method,
                headers: headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
                body_template: body,
            }),
            priority: 0,
            is_active: true,
            cost_per_message: BigDecimal::from(1),
            currency: "USD".into(),
            created_seq: 0,
            created_at: time::OffsetDateTime::now_utc(),
        }
    }

    fn render(provider: &Provider) -> RenderedRequest {
        provider
            .config
            .render(&TemplateVars::new("+218911234567", "Hello \"there\""))
    }

    #[tokio::test]
    async fn posts_rendered_json() {
        let base = serve(Router::new().route("/send", any(echo))).await;
        let p = provider(
            &format!("{}/send", base),
            HttpMethod::Post,
            &[("Authorization", "Bearer k-1")],
            json!({"to": "{{phone}}", "text": "{{message}}"}),
        );
        let transport = GenericHttpTransport::new(Duration::from_secs(5));

        let Outcome::Success { raw } = transport.call(&p, &render(&p)).await else {
            panic!("expected success");
        };
        assert_eq!(raw["auth"], "Bearer k-1");
        let sent: Value = serde_json::from_str(raw["body"].as_str().unwrap()).unwrap();
        assert_eq!(sent, json!({"to": "+218911234567", "text": "Hello \"there\""}));
    }

    #[tokio::test]
    async fn get_sends_query_parameters() {
        let base = serve(Router::new().route("/send", any(echo))).await;
        let p = provider(
            &format!("{}/send", base),
            HttpMethod::Get,
            &[],
            json!({"dst": "{{phone}}", "msg": "{{message}}", "unicode": 1}),
        );
        let transport = GenericHttpTransport::new(Duration::from_secs(5));

        let Outcome::Success { raw } = transport.call(&p, &render(&p)).await else {
            panic!("expected success");
        };
        assert_eq!(raw["query"]["dst"], "+218911234567");
        assert_eq!(raw["query"]["msg"], "Hello \"there\"");
        assert_eq!(raw["query"]["unicode"], "1");
    }

    #[tokio::test]
    async fn form_header_switches_encoding() {
        let base = serve(Router::new().route("/send", any(echo))).await;
        let p = provider(
            &format!("{}/send", base),
            HttpMethod::Post,
            &[("Content-Type", "application/x-www-form-urlencoded")],
            json!({"To": "{{phone}}", "Body": "{{message}}"}),
        );
        let transport = GenericHttpTransport::new(Duration::from_secs(5));

        let Outcome::Success { raw } = transport.call(&p, &render(&p)).await else {
            panic!("expected success");
        };
        let body = raw["body"].as_str().unwrap();
        assert!(body.contains("To=%2B218911234567"), "{}", body);
    }

    #[tokio::test]
    async fn non_2xx_is_failure_with_status() {
        let router = Router::new().route(
            "/send",
            any(|| async { (StatusCode::PAYMENT_REQUIRED, "insufficient balance") }),
        );
        let base = serve(router).await;
        let p = provider(&format!("{}/send", base), HttpMethod::Post, &[], json!({}));
        let transport = GenericHttpTransport::new(Duration::from_secs(5));

        assert_eq!(
            transport.call(&p, &render(&p)).await,
            Outcome::failure(TransportFailure::Status {
                status: 402,
                body: "insufficient balance".into()
            })
        );
    }

    #[tokio::test]
    async fn slow_gateway_times_out() {
        let router = Router::new().route(
            "/send",
            any(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                "late"
            }),
        );
        let base = serve(router).await;
        let p = provider(&format!("{}/send", base), HttpMethod::Post, &[], json!({}));
        let transport = GenericHttpTransport::new(Duration::from_millis(100));

        assert_eq!(
            transport.call(&p, &render(&p)).await,
            Outcome::failure(TransportFailure::Timeout)
        );
    }

    #[tokio::test]
    async fn refused_connection_is_network_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let p = provider(&format!("http://{}/send", addr), HttpMethod::Post, &[], json!({}));
        let transport = GenericHttpTransport::new(Duration::from_secs(5));

        let outcome = transport.call(&p, &render(&p)).await;
        assert!(matches!(
            outcome,
            Outcome::Failure {
                reason: TransportFailure::Network(_)
            }
        ));
    }

    #[test]
    fn truncates_on_char_boundary() {
        let long = "é".repeat(MAX_ERROR_BODY);
        let cut = truncate(long);
        assert!(cut.len() <= MAX_ERROR_BODY);
        assert!(cut.chars().all(|c| c == 'é'));
    }
}
