//! # SMS Core
//!
//! Core traits and types for the smsgate outbound dispatch engine.
//!
//! This crate provides the building blocks shared by every other crate:
//! - [`Provider`] records and their validated transport configuration
//! - the [`template`] renderer that resolves `{{phone}}` / `{{message}}`
//! - the [`TransportClient`] trait, one implementation per transport type
//! - [`LedgerEntry`] and the [`DeliveryLedger`] persistence contract
//! - [`ReceiptParser`] for asynchronous delivery receipts
//! - the error taxonomy and HTTP-neutral webhook responses
//!
//! ## Example
//!
//! ```rust,ignore
//! use sms_core::{Dispatcher, DeliveryStatus};
//!
//! // Callers never pick a provider; the dispatcher does.
//! let entry = dispatcher.send("+218911234567", "Your code is 4821").await?;
//! assert_ne!(entry.status, DeliveryStatus::Pending);
//! ```

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

pub mod error;
pub mod ledger;
pub mod provider;
pub mod receipt;
pub mod template;
pub mod transport;

pub use error::{
    DispatchError, LedgerError, TemplateError, TransportFailure, ValidationError, WebhookError,
};
pub use ledger::{
    DeliveryLedger, DeliveryStatus, InMemoryLedger, LedgerEntry, LedgerPage, LedgerQuery,
};
pub use provider::{
    HttpConfig, HttpMethod, HttpRequest, Provider, ProviderConfig, ProviderDraft, TransportType,
};
pub use receipt::{DeliveryReceipt, JsonReceiptParser, ReceiptParser, ReceiptRegistry, ReceiptStatus};
pub use template::TemplateVars;
pub use transport::{Outcome, RenderedRequest, TransportClient};

/// HTTP status code for web responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpStatus {
    Ok = 200,
    BadRequest = 400,
    Unauthorized = 401,
    NotFound = 404,
    Conflict = 409,
    UnprocessableEntity = 422,
    InternalServerError = 500,
}

impl HttpStatus {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Generic webhook response that can be converted to any framework's response type
#[derive(Debug, Clone)]
pub struct WebhookResponse {
    pub status: HttpStatus,
    pub body: String,
    pub content_type: String,
}

impl WebhookResponse {
    pub fn success<T: Serialize>(payload: &T) -> Self {
        Self {
            status: HttpStatus::Ok,
            body: serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string()),
            content_type: "application/json".to_string(),
        }
    }

    pub fn error(status: HttpStatus, message: &str) -> Self {
        Self {
            status,
            body: serde_json::json!({ "error": message }).to_string(),
            content_type: "application/json".to_string(),
        }
    }
}

/// Sole entry point for sending a message.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Send one message; returns the concluded ledger entry.
    async fn send(&self, recipient: &str, message: &str) -> Result<LedgerEntry, DispatchError>;
}

/// Utility to create a fresh identifier for providers and ledger entries.
pub fn fallback_id() -> String {
    Uuid::new_v4().to_string()
}

/// Lightweight header representation to avoid tying the core to any HTTP framework.
pub type Headers = Vec<(String, String)>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_escapes_message() {
        let response = WebhookResponse::error(HttpStatus::Conflict, r#"bad "state""#);
        assert_eq!(response.status.as_u16(), 409);
        let body: serde_json::Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body["error"], r#"bad "state""#);
    }
}
