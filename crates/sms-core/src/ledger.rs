//! Delivery accounting: one entry per dispatch.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::LedgerError;
use crate::provider::Provider;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::Sent => "SENT",
            DeliveryStatus::Delivered => "DELIVERED",
            DeliveryStatus::Failed => "FAILED",
        }
    }

    /// Whether a provider has been charged for an entry in this status.
    pub fn is_charged(&self) -> bool {
        matches!(self, DeliveryStatus::Sent | DeliveryStatus::Delivered)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(DeliveryStatus::Pending),
            "SENT" => Ok(DeliveryStatus::Sent),
            "DELIVERED" => Ok(DeliveryStatus::Delivered),
            "FAILED" => Ok(DeliveryStatus::Failed),
            _ => Err(format!("unknown delivery status: {}", s)),
        }
    }
}

/// Durable record of one dispatch.
///
/// `cost`, `currency` and `provider_id` are set together, and only while the
/// status is SENT or DELIVERED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: String,
    pub provider_id: Option<String>,
    pub recipient: String,
    pub message: String,
    pub status: DeliveryStatus,
    pub response: Option<Value>,
    pub cost: Option<BigDecimal>,
    pub currency: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub sent_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl LedgerEntry {
    pub fn pending(recipient: &str, message: &str) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: crate::fallback_id(),
            provider_id: None,
            recipient: recipient.to_string(),
            message: message.to_string(),
            status: DeliveryStatus::Pending,
            response: None,
            cost: None,
            currency: None,
            sent_at: now,
            updated_at: now,
        }
    }

    /// Charge `provider` and mark the entry SENT.
    pub fn mark_sent(&mut self, provider: &Provider, raw: Value) {
        self.status = DeliveryStatus::Sent;
        self.provider_id = Some(provider.id.clone());
        self.cost = Some(provider.cost_per_message.clone());
        self.currency = Some(provider.currency.clone());
        self.response = Some(raw);
        self.updated_at = OffsetDateTime::now_utc();
    }

    pub fn mark_failed(&mut self, response: Value) {
        self.status = DeliveryStatus::Failed;
        self.provider_id = None;
        self.cost = None;
        self.currency = None;
        self.response = Some(response);
        self.updated_at = OffsetDateTime::now_utc();
    }

    /// Apply an asynchronous delivery receipt.
    ///
    /// Only SENT → DELIVERED and SENT → FAILED are accepted.
    pub fn apply_receipt(&mut self, status: DeliveryStatus, response: Option<Value>) -> Result<(), LedgerError> {
        let allowed = self.status == DeliveryStatus::Sent
            && matches!(status, DeliveryStatus::Delivered | DeliveryStatus::Failed);
        if !allowed {
            return Err(LedgerError::InvalidStateTransition {
                from: self.status,
                to: status,
            });
        }
        if status == DeliveryStatus::Failed {
            let response = response.or_else(|| self.response.take()).unwrap_or(Value::Null);
            self.mark_failed(response);
            return Ok(());
        }
        self.status = status;
        if response.is_some() {
            self.response = response;
        }
        self.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    /// Whether the charge fields agree with the status.
    pub fn is_consistent(&self) -> bool {
        let charged = self.status.is_charged();
        self.cost.is_some() == charged
            && self.provider_id.is_some() == charged
            && self.currency.is_some() == charged
    }
}

/// Check that `next` is a valid dispatch conclusion for `current`.
pub fn check_completion(current: DeliveryStatus, next: DeliveryStatus) -> Result<(), LedgerError> {
    let allowed = current == DeliveryStatus::Pending
        && matches!(next, DeliveryStatus::Sent | DeliveryStatus::Failed);
    if allowed {
        Ok(())
    } else {
        Err(LedgerError::InvalidStateTransition {
            from: current,
            to: next,
        })
    }
}

/// Filter and page for the admin log view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerQuery {
    pub status: Option<DeliveryStatus>,
    /// Substring match on the recipient.
    pub recipient: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub since: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub until: Option<OffsetDateTime>,
    #[serde(default)]
    pub offset: usize,
    pub limit: Option<usize>,
}

impl LedgerQuery {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.status.is_none_or(|s| s == entry.status)
            && self
                .recipient
                .as_deref()
                .is_none_or(|r| entry.recipient.contains(r))
            && self.since.is_none_or(|t| entry.sent_at >= t)
            && self.until.is_none_or(|t| entry.sent_at < t)
    }
}

/// One page of ledger entries, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerPage {
    pub entries: Vec<LedgerEntry>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

/// Persistence contract for delivery accounting.
///
/// Production: SQLite. Testing and single-process setups: [`InMemoryLedger`].
pub trait DeliveryLedger: Send + Sync {
    /// Insert a new PENDING entry.
    fn record(&self, entry: &LedgerEntry) -> Result<(), LedgerError>;

    /// Replace a PENDING entry with its SENT or FAILED conclusion.
    fn complete(&self, entry: &LedgerEntry) -> Result<(), LedgerError>;

    /// Advance a SENT entry from a delivery receipt.
    fn update_status(
        &self,
        id: &str,
        status: DeliveryStatus,
        response: Option<Value>,
    ) -> Result<LedgerEntry, LedgerError>;

    fn get(&self, id: &str) -> Result<Option<LedgerEntry>, LedgerError>;

    fn list(&self, query: &LedgerQuery) -> Result<LedgerPage, LedgerError>;
}

#[derive(Debug, Default)]
struct Entries {
    items: Vec<LedgerEntry>,
    index: HashMap<String, usize>,
}

/// Process-local ledger.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    inner: Mutex<Entries>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Entries>, LedgerError> {
        self.inner
            .lock()
            .map_err(|_| LedgerError::Storage("ledger mutex poisoned".into()))
    }
}

impl DeliveryLedger for InMemoryLedger {
    fn record(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        if entry.status != DeliveryStatus::Pending {
            return Err(LedgerError::InvalidStateTransition {
                from: DeliveryStatus::Pending,
                to: entry.status,
            });
        }
        let mut entries = self.lock()?;
        if entries.index.contains_key(&entry.id) {
            return Err(LedgerError::Duplicate(entry.id.clone()));
        }
        let pos = entries.items.len();
        entries.index.insert(entry.id.clone(), pos);
        entries.items.push(entry.clone());
        Ok(())
    }

    fn complete(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let mut entries = self.lock()?;
        let pos = *entries
            .index
            .get(&entry.id)
            .ok_or_else(|| LedgerError::NotFound(entry.id.clone()))?;
        check_completion(entries.items[pos].status, entry.status)?;
        entries.items[pos] = entry.clone();
        Ok(())
    }

    fn update_status(
        &self,
        id: &str,
        status: DeliveryStatus,
        response: Option<Value>,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut entries = self.lock()?;
        let pos = *entries
            .index
            .get(id)
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
        let entry = &mut entries.items[pos];
        entry.apply_receipt(status, response)?;
        Ok(entry.clone())
    }

    fn get(&self, id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let entries = self.lock()?;
        Ok(entries.index.get(id).map(|&pos| entries.items[pos].clone()))
    }

    fn list(&self, query: &LedgerQuery) -> Result<LedgerPage, LedgerError> {
        let entries = self.lock()?;
        let limit = query.effective_limit();
        let matching: Vec<&LedgerEntry> = entries
            .items
            .iter()
            .rev()
            .filter(|e| query.matches(e))
            .collect();
        Ok(LedgerPage {
            total: matching.len(),
            entries: matching
                .into_iter()
                .skip(query.offset)
                .take(limit)
                .cloned()
                .collect(),
            offset: query.offset,
            limit,
        })
    }
}
