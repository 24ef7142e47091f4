use crate::ledger::DeliveryStatus;

/// Malformed input to a dispatch or to a registry mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("recipient must not be empty")]
    EmptyRecipient,
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("provider name must not be empty")]
    EmptyName,
    #[error("priority must be an integer")]
    NonIntegerPriority,
    #[error("cost per message must not be negative: {0}")]
    NegativeCost(String),
    #[error("invalid currency code: {0:?}")]
    InvalidCurrency(String),
    #[error("malformed provider record: {0}")]
    Malformed(String),
}

/// Provider configuration that cannot be used to build requests.
///
/// Raised when a provider is created or updated, never while dispatching.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("config is not valid structured data: {0}")]
    NotStructured(String),
    #[error("config must be an object")]
    NotAnObject,
    #[error("config is missing required key `{0}`")]
    MissingKey(&'static str),
    #[error("config key `{key}` is invalid: {reason}")]
    InvalidField { key: &'static str, reason: String },
}

/// Why a single provider attempt failed.
///
/// These are ordinary outcomes that trigger failover, not errors surfaced to
/// the dispatch caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportFailure {
    #[error("timeout")]
    Timeout,
    #[error("http status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("no transport registered for {0}")]
    Unsupported(String),
}

impl TransportFailure {
    /// Short machine-readable tag stored alongside the human-readable reason.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportFailure::Timeout => "timeout",
            TransportFailure::Status { .. } => "status",
            TransportFailure::Network(_) => "network",
            TransportFailure::Unsupported(_) => "unsupported",
        }
    }
}

/// Errors raised by a [`DeliveryLedger`](crate::DeliveryLedger).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger entry not found: {0}")]
    NotFound(String),
    #[error("ledger entry already exists: {0}")]
    Duplicate(String),
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },
    #[error("storage error: {0}")]
    Storage(String),
}

/// Errors surfaced synchronously by a dispatch.
///
/// Failing to deliver is not one of them: that is a FAILED ledger entry.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("dispatch task aborted: {0}")]
    Aborted(String),
}

/// Errors raised while handling an inbound delivery-receipt webhook.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("no receipt parser for provider: {0}")]
    ParserNotFound(String),
    #[error("signature verification failed: {0}")]
    VerificationFailed(String),
    #[error("parsing failed: {0}")]
    ParseError(String),
    #[error("entry {entry_id} was not sent through provider {provider}")]
    ProviderMismatch { entry_id: String, provider: String },
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}
