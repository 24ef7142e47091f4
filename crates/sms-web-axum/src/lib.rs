use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::Deserialize;
use sms_core::{
    DeliveryLedger, DeliveryStatus, DispatchError, Dispatcher, Headers, LedgerQuery,
};
use sms_web_generic::{HeaderConverter, ReceiptProcessor, ResponseConverter};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<dyn Dispatcher>,
    pub receipts: ReceiptProcessor,
    pub ledger: Arc<dyn DeliveryLedger>,
}

/// Build the HTTP surface:
/// - `POST /messages`
/// - `POST /receipts/{provider}`
/// - `GET /deliveries`, `GET /deliveries/{id}`
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/messages", post(send_message))
        .route("/receipts/{provider}", post(delivery_receipt))
        .route("/deliveries", get(list_deliveries))
        .route("/deliveries/{id}", get(get_delivery))
        .with_state(state)
}

/// Axum-specific header converter
pub struct AxumHeaderConverter;

impl HeaderConverter for AxumHeaderConverter {
    type HeaderType = HeaderMap;

    fn to_generic_headers(headers: &Self::HeaderType) -> Headers {
        headers
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    v.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }
}

/// Axum-specific response converter
pub struct AxumResponseConverter;

impl ResponseConverter for AxumResponseConverter {
    type ResponseType = Response;

    fn from_webhook_response(response: sms_core::WebhookResponse) -> Self::ResponseType {
        let status = StatusCode::from_u16(response.status.as_u16())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            [(axum::http::header::CONTENT_TYPE, response.content_type)],
            response.body,
        )
            .into_response()
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

#[derive(Debug, Deserialize)]
pub struct SendMessage {
    pub recipient: String,
    pub message: String,
}

/// `POST /messages`: dispatch one message. Delivery failure is a 200 with a
/// FAILED entry; only invalid input is an error.
pub async fn send_message(State(state): State<AppState>, Json(req): Json<SendMessage>) -> Response {
    match state.dispatcher.send(&req.recipient, &req.message).await {
        Ok(entry) => Json(entry).into_response(),
        Err(DispatchError::Validation(e)) => {
            error_response(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string())
        }
        Err(DispatchError::Ledger(e)) => {
            error!(error = %e, "ledger unavailable during dispatch");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "ledger unavailable")
        }
        Err(e @ DispatchError::Aborted(_)) => {
            error!(error = %e, "dispatch did not complete");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "dispatch failed")
        }
    }
}

/// `POST /receipts/{provider}`: asynchronous delivery receipt.
pub async fn delivery_receipt(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let generic_headers = AxumHeaderConverter::to_generic_headers(&headers);
    let response = state.receipts.process_receipt(&provider, generic_headers, &body);
    AxumResponseConverter::from_webhook_response(response)
}

/// Query string of `GET /deliveries`.
#[derive(Debug, Default, Deserialize)]
pub struct DeliveryFilter {
    pub status: Option<String>,
    pub recipient: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl DeliveryFilter {
    pub fn into_query(self) -> Result<LedgerQuery, String> {
        let parse_time = |value: Option<String>| {
            value
                .map(|v| OffsetDateTime::parse(&v, &Rfc3339).map_err(|e| format!("{}: {}", v, e)))
                .transpose()
        };
        Ok(LedgerQuery {
            status: self
                .status
                .map(|s| DeliveryStatus::from_str(&s))
                .transpose()?,
            recipient: self.recipient.filter(|r| !r.is_empty()),
            since: parse_time(self.since)?,
            until: parse_time(self.until)?,
            offset: self.offset.unwrap_or_default(),
            limit: self.limit,
        })
    }
}

pub async fn list_deliveries(
    State(state): State<AppState>,
    Query(filter): Query<DeliveryFilter>,
) -> Response {
    let query = match filter.into_query() {
        Ok(query) => query,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    match state.ledger.list(&query) {
        Ok(page) => Json(page).into_response(),
        Err(e) => {
            error!(error = %e, "ledger list failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "ledger unavailable")
        }
    }
}

pub async fn get_delivery(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.ledger.get(&id) {
        Ok(Some(entry)) => Json(entry).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "unknown entry"),
        Err(e) => {
            error!(error = %e, "ledger lookup failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "ledger unavailable")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use sms_core::{
        InMemoryLedger, JsonReceiptParser, LedgerEntry, ReceiptRegistry, ValidationError,
    };
    use tower::ServiceExt;

    /// Records every message as FAILED without touching a network.
    struct Recorder {
        ledger: Arc<InMemoryLedger>,
    }

    #[async_trait]
    impl Dispatcher for Recorder {
        async fn send(&self, recipient: &str, message: &str) -> Result<LedgerEntry, DispatchError> {
            if recipient.is_empty() {
                return Err(ValidationError::EmptyRecipient.into());
            }
            let mut entry = LedgerEntry::pending(recipient, message);
            self.ledger.record(&entry)?;
            entry.mark_failed(json!({"error": "noActiveProviders"}));
            self.ledger.complete(&entry)?;
            Ok(entry)
        }
    }

    fn app() -> Router {
        let ledger = Arc::new(InMemoryLedger::new());
        let receipts = ReceiptProcessor::new(
            ReceiptRegistry::new().with_fallback(Arc::new(JsonReceiptParser::new("json"))),
            ledger.clone(),
        );
        router(AppState {
            dispatcher: Arc::new(Recorder {
                ledger: ledger.clone(),
            }),
            receipts,
            ledger,
        })
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn send_then_list_and_fetch() {
        let app = app();
        let (status, entry) = call(
            &app,
            post_json("/messages", json!({"recipient": "+218911234567", "message": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(entry["status"], "FAILED");
        assert_eq!(entry["cost"], Value::Null);

        let (status, page) = call(
            &app,
            Request::get("/deliveries?status=FAILED&recipient=2189")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 1);

        let uri = format!("/deliveries/{}", entry["id"].as_str().unwrap());
        let (status, fetched) = call(&app, Request::get(uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["id"], entry["id"]);
    }

    #[tokio::test]
    async fn empty_recipient_is_unprocessable() {
        let app = app();
        let (status, body) = call(
            &app,
            post_json("/messages", json!({"recipient": "", "message": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "recipient must not be empty");
    }

    #[tokio::test]
    async fn receipt_for_failed_entry_conflicts() {
        let app = app();
        let (_, entry) = call(
            &app,
            post_json("/messages", json!({"recipient": "+1", "message": "hi"})),
        )
        .await;
        let (status, _) = call(
            &app,
            post_json(
                "/receipts/any-gateway",
                json!({"entryId": entry["id"], "status": "DELIVRD"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn bad_filters_are_rejected() {
        let app = app();
        let (status, _) = call(
            &app,
            Request::get("/deliveries?since=yesterday")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            Request::get("/deliveries/missing").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
