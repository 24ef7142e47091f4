use std::sync::Arc;

use sms_core::{
    DeliveryLedger, Headers, HttpStatus, LedgerEntry, LedgerError, ReceiptRegistry, WebhookError,
    WebhookResponse,
};
use tracing::{info, warn};

/// Framework-agnostic processor for provider delivery receipts.
#[derive(Clone)]
pub struct ReceiptProcessor {
    registry: ReceiptRegistry,
    ledger: Arc<dyn DeliveryLedger>,
}

impl ReceiptProcessor {
    pub fn new(registry: ReceiptRegistry, ledger: Arc<dyn DeliveryLedger>) -> Self {
        Self { registry, ledger }
    }

    /// Process an incoming receipt webhook and return a framework-agnostic response
    pub fn process_receipt(&self, provider: &str, headers: Headers, body: &[u8]) -> WebhookResponse {
        match self.process_receipt_internal(provider, headers, body) {
            Ok(entry) => WebhookResponse::success(&entry),
            Err(e) => {
                warn!(provider, error = %e, "delivery receipt rejected");
                self.error_to_response(e)
            }
        }
    }

    fn process_receipt_internal(
        &self,
        provider: &str,
        headers: Headers,
        body: &[u8],
    ) -> Result<LedgerEntry, WebhookError> {
        let parser = self
            .registry
            .get(provider)
            .ok_or_else(|| WebhookError::ParserNotFound(provider.to_string()))?;

        parser
            .verify(&headers, body)
            .map_err(|e| WebhookError::VerificationFailed(e.to_string()))?;

        let receipt = parser.parse_receipt(&headers, body)?;

        // Only the gateway that accepted a message may report on it.
        let current = self
            .ledger
            .get(&receipt.entry_id)?
            .ok_or_else(|| LedgerError::NotFound(receipt.entry_id.clone()))?;
        if let Some(owner) = current.provider_id.as_deref() {
            if owner != provider {
                return Err(WebhookError::ProviderMismatch {
                    entry_id: receipt.entry_id,
                    provider: provider.to_string(),
                });
            }
        }

        let entry = self
            .ledger
            .update_status(&receipt.entry_id, receipt.status.into(), receipt.response)?;
        info!(provider, entry_id = %entry.id, status = %entry.status, "delivery receipt applied");
        Ok(entry)
    }

    fn error_to_response(&self, error: WebhookError) -> WebhookResponse {
        match error {
            WebhookError::ParserNotFound(_) => {
                WebhookResponse::error(HttpStatus::NotFound, "unknown provider")
            }
            WebhookError::VerificationFailed(msg) => WebhookResponse::error(
                HttpStatus::Unauthorized,
                &format!("verification failed: {}", msg),
            ),
            WebhookError::ParseError(msg) => {
                WebhookResponse::error(HttpStatus::BadRequest, &format!("parse error: {}", msg))
            }
            e @ WebhookError::ProviderMismatch { .. } => {
                WebhookResponse::error(HttpStatus::Conflict, &e.to_string())
            }
            WebhookError::Ledger(LedgerError::NotFound(id)) => {
                WebhookResponse::error(HttpStatus::NotFound, &format!("unknown entry: {}", id))
            }
            WebhookError::Ledger(e @ LedgerError::InvalidStateTransition { .. }) => {
                WebhookResponse::error(HttpStatus::Conflict, &e.to_string())
            }
            WebhookError::Ledger(e) => WebhookResponse::error(
                HttpStatus::InternalServerError,
                &format!("ledger error: {}", e),
            ),
        }
    }
}

/// Helper trait for framework adapters to convert headers
pub trait HeaderConverter {
    type HeaderType;

    fn to_generic_headers(headers: &Self::HeaderType) -> Headers;
}

/// Helper trait for framework adapters to convert responses
pub trait ResponseConverter {
    type ResponseType;

    fn from_webhook_response(response: WebhookResponse) -> Self::ResponseType;
}
