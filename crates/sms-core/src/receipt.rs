//! Asynchronous delivery receipts reported by providers.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::error::WebhookError;
use crate::ledger::DeliveryStatus;
use crate::Headers;

/// Terminal outcome a provider can report after accepting a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Delivered,
    Failed,
}

impl ReceiptStatus {
    /// Map a provider status word, including common SMPP DLR `stat:` codes.
    pub fn parse(word: &str) -> Option<Self> {
        match word.trim().to_ascii_uppercase().as_str() {
            "DELIVERED" | "DELIVRD" => Some(ReceiptStatus::Delivered),
            "FAILED" | "UNDELIV" | "UNDELIVERED" | "REJECTD" | "REJECTED" | "EXPIRED" => {
                Some(ReceiptStatus::Failed)
            }
            _ => None,
        }
    }
}

impl From<ReceiptStatus> for DeliveryStatus {
    fn from(status: ReceiptStatus) -> Self {
        match status {
            ReceiptStatus::Delivered => DeliveryStatus::Delivered,
            ReceiptStatus::Failed => DeliveryStatus::Failed,
        }
    }
}

/// Normalized delivery receipt correlated to a ledger entry.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReceipt {
    pub entry_id: String,
    pub status: ReceiptStatus,
    pub response: Option<Value>,
}

/// Provider-specific receipt webhook decoding.
pub trait ReceiptParser: Send + Sync {
    /// Provider id this parser is registered under.
    fn provider(&self) -> &str;

    fn parse_receipt(&self, headers: &Headers, body: &[u8]) -> Result<DeliveryReceipt, WebhookError>;

    /// Optional signature verification (no-op by default).
    fn verify(&self, _headers: &Headers, _body: &[u8]) -> Result<(), WebhookError> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonReceipt {
    entry_id: String,
    status: String,
    #[serde(default)]
    response: Option<Value>,
}

/// Accepts `{"entryId": "...", "status": "delivered", "response": {...}}`.
#[derive(Debug, Clone)]
pub struct JsonReceiptParser {
    provider: String,
}

impl JsonReceiptParser {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }
}

impl ReceiptParser for JsonReceiptParser {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn parse_receipt(&self, _headers: &Headers, body: &[u8]) -> Result<DeliveryReceipt, WebhookError> {
        let receipt: JsonReceipt = serde_json::from_slice(body)
            .map_err(|e| WebhookError::ParseError(format!("json decode: {}", e)))?;
        let status = ReceiptStatus::parse(&receipt.status)
            .ok_or_else(|| WebhookError::ParseError(format!("unknown status {:?}", receipt.status)))?;
        Ok(DeliveryReceipt {
            entry_id: receipt.entry_id,
            status,
            response: receipt.response,
        })
    }
}

/// Receipt parsers keyed by provider id, with an optional fallback.
#[derive(Default, Clone)]
pub struct ReceiptRegistry {
    map: Arc<HashMap<String, Arc<dyn ReceiptParser>>>,
    fallback: Option<Arc<dyn ReceiptParser>>,
}

impl ReceiptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, parser: Arc<dyn ReceiptParser>) -> Self {
        let mut m = (*self.map).clone();
        m.insert(parser.provider().to_string(), parser);
        self.map = Arc::new(m);
        self
    }

    /// Parser used for providers with no dedicated registration.
    pub fn with_fallback(mut self, parser: Arc<dyn ReceiptParser>) -> Self {
        self.fallback = Some(parser);
        self
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn ReceiptParser>> {
        self.map.get(provider).cloned().or_else(|| self.fallback.clone())
    }
}
