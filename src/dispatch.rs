//! One message, many candidate gateways, at most one charge.
//!
//! A dispatch records a PENDING ledger entry, takes a registry snapshot and
//! tries each active provider in order, strictly one at a time. The first
//! success is charged and ends the dispatch; failures fall through to the next
//! candidate. The entry is concluded exactly once, as SENT or FAILED.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use sms_core::{
    DeliveryLedger, DispatchError, Dispatcher, LedgerEntry, Outcome, Provider, TemplateVars,
    TransportFailure, ValidationError,
};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::registry::{ProviderRegistry, Snapshot};
use crate::transport::TransportSet;

/// One failed provider attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptFailure {
    pub provider_id: String,
    pub reason: TransportFailure,
}

/// State of one in-flight dispatch. Never persisted.
#[derive(Debug)]
struct DispatchAttempt<'a> {
    recipient: &'a str,
    message: &'a str,
    candidates: Snapshot,
    failures: Vec<AttemptFailure>,
}

impl<'a> DispatchAttempt<'a> {
    fn new(recipient: &'a str, message: &'a str, candidates: Snapshot) -> Self {
        Self {
            recipient,
            message,
            candidates,
            failures: Vec::new(),
        }
    }

    fn vars(&self) -> TemplateVars<'a> {
        TemplateVars::new(self.recipient, self.message)
    }

    fn fail(&mut self, provider: &Provider, reason: TransportFailure) {
        self.failures.push(AttemptFailure {
            provider_id: provider.id.clone(),
            reason,
        });
    }

    /// Ledger response for a dispatch that ended without a charge.
    fn failure_response(&self, error: &str) -> Value {
        let reason = self
            .failures
            .last()
            .map(|f| f.reason.to_string())
            .unwrap_or_else(|| error.to_string());
        let attempts: Vec<Value> = self
            .failures
            .iter()
            .map(|f| {
                json!({
                    "providerId": f.provider_id,
                    "kind": f.reason.kind(),
                    "reason": f.reason.to_string(),
                })
            })
            .collect();
        json!({ "error": error, "reason": reason, "attempts": attempts })
    }
}

/// Cancellation sources consulted between candidates.
struct CancelFlags {
    caller: Option<watch::Receiver<bool>>,
    /// Set once nobody is waiting for the result any more.
    abandoned: watch::Receiver<bool>,
}

impl CancelFlags {
    fn is_set(&self) -> bool {
        *self.abandoned.borrow() || self.caller.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

/// Raises the abandoned flag when the waiting caller goes away.
struct CancelOnDrop(watch::Sender<bool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

struct Shared {
    registry: Arc<ProviderRegistry>,
    transports: TransportSet,
    ledger: Arc<dyn DeliveryLedger>,
    call_timeout: Duration,
}

/// Orchestrates message sends across the configured gateways.
///
/// The candidate loop runs on its own task. A caller that stops waiting only
/// stops further candidates from being tried; the call in flight resolves and
/// the entry is still concluded.
pub struct DispatchEngine {
    shared: Arc<Shared>,
}

impl DispatchEngine {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        transports: TransportSet,
        ledger: Arc<dyn DeliveryLedger>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                transports,
                ledger,
                call_timeout,
            }),
        }
    }

    /// Send one message to `recipient`.
    ///
    /// Returns the concluded ledger entry; a FAILED entry is a normal result.
    pub async fn send(&self, recipient: &str, message: &str) -> Result<LedgerEntry, DispatchError> {
        self.dispatch(recipient, message, None).await
    }

    /// Like [`send`](Self::send), but stops advancing to further candidates
    /// once `cancel` reads `true`. A call already in flight always resolves
    /// first.
    pub async fn send_with_cancel(
        &self,
        recipient: &str,
        message: &str,
        cancel: watch::Receiver<bool>,
    ) -> Result<LedgerEntry, DispatchError> {
        self.dispatch(recipient, message, Some(cancel)).await
    }

    async fn dispatch(
        &self,
        recipient: &str,
        message: &str,
        caller: Option<watch::Receiver<bool>>,
    ) -> Result<LedgerEntry, DispatchError> {
        let recipient = recipient.trim();
        if recipient.is_empty() {
            return Err(ValidationError::EmptyRecipient.into());
        }
        if message.trim().is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }

        let entry = LedgerEntry::pending(recipient, message);
        self.shared.ledger.record(&entry)?;
        let entry_id = entry.id.clone();

        let (abandon, abandoned) = watch::channel(false);
        let _guard = CancelOnDrop(abandon);
        let cancel = CancelFlags { caller, abandoned };
        let task = tokio::spawn(Arc::clone(&self.shared).run(entry, cancel));

        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!(entry_id = %entry_id, error = %e, "dispatch task died");
                Err(DispatchError::Aborted(e.to_string()))
            }
        }
    }
}

impl Shared {
    #[instrument(skip_all, fields(entry_id = %entry.id, recipient = %entry.recipient))]
    async fn run(
        self: Arc<Self>,
        mut entry: LedgerEntry,
        cancel: CancelFlags,
    ) -> Result<LedgerEntry, DispatchError> {
        let recipient = entry.recipient.clone();
        let message = entry.message.clone();
        let mut attempt = DispatchAttempt::new(&recipient, &message, self.registry.snapshot());
        let candidates = attempt.candidates.clone();
        debug!(candidates = candidates.len(), "dispatch started");

        if candidates.is_empty() {
            warn!("no active providers");
            entry.mark_failed(attempt.failure_response("noActiveProviders"));
            self.ledger.complete(&entry)?;
            return Ok(entry);
        }

        let vars = attempt.vars();
        for (index, provider) in candidates.iter().enumerate() {
            if cancel.is_set() {
                warn!(attempted = index, "dispatch cancelled");
                entry.mark_failed(attempt.failure_response("cancelled"));
                self.ledger.complete(&entry)?;
                return Ok(entry);
            }

            match self.call(provider, &vars).await {
                Outcome::Success { raw } => {
                    entry.mark_sent(provider, raw);
                    if let Err(e) = self.ledger.complete(&entry) {
                        error!(
                            entry_id = %entry.id,
                            provider_id = %provider.id,
                            error = %e,
                            "provider accepted message but ledger completion failed"
                        );
                        return Err(e.into());
                    }
                    info!(provider_id = %provider.id, attempt = index + 1, "message sent");
                    return Ok(entry);
                }
                Outcome::Failure { reason } => {
                    warn!(
                        provider_id = %provider.id,
                        attempt = index + 1,
                        %reason,
                        "provider attempt failed"
                    );
                    attempt.fail(provider, reason);
                }
            }
        }

        warn!(attempts = attempt.failures.len(), "all providers failed");
        entry.mark_failed(attempt.failure_response("providerExhausted"));
        self.ledger.complete(&entry)?;
        Ok(entry)
    }

    /// One bounded call to one provider.
    async fn call(&self, provider: &Provider, vars: &TemplateVars<'_>) -> Outcome {
        let Some(transport) = self.transports.get(provider.transport_type) else {
            return Outcome::failure(TransportFailure::Unsupported(
                provider.transport_type.to_string(),
            ));
        };
        let request = provider.config.render(vars);
        match tokio::time::timeout(self.call_timeout, transport.call(provider, &request)).await {
            Ok(outcome) => outcome,
            Err(_) => Outcome::failure(TransportFailure::Timeout),
        }
    }
}

#[async_trait]
impl Dispatcher for DispatchEngine {
    async fn send(&self, recipient: &str, message: &str) -> Result<LedgerEntry, DispatchError> {
        DispatchEngine::send(self, recipient, message).await
    }
}
