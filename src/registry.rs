//! Configured gateways and the point-in-time snapshots dispatch reads.
//!
//! The catalog is copy-on-write: every mutation builds a new sorted list and
//! swaps it in under a brief write lock. A [`Snapshot`] is just a clone of the
//! active list's `Arc`, so a dispatch holding one never blocks an admin edit
//! and never sees a half-applied one.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use sms_core::{
    Provider, ProviderConfig, ProviderDraft, TemplateError, ValidationError, fallback_id,
};
use time::OffsetDateTime;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("provider not found: {0}")]
    NotFound(String),
}

/// Immutable, ordered view of the active providers.
#[derive(Debug, Clone)]
pub struct Snapshot(Arc<[Provider]>);

impl Default for Snapshot {
    fn default() -> Self {
        Snapshot(Arc::from(Vec::new()))
    }
}

impl Deref for Snapshot {
    type Target = [Provider];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Default)]
struct Catalog {
    /// Every provider, in dispatch order.
    all: Vec<Provider>,
    active: Snapshot,
}

impl Catalog {
    fn build(mut all: Vec<Provider>) -> Self {
        all.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_seq.cmp(&b.created_seq))
        });
        let active: Vec<Provider> = all.iter().filter(|p| p.is_active).cloned().collect();
        Self {
            all,
            active: Snapshot(Arc::from(active)),
        }
    }
}

/// The current set of configured gateways.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    catalog: RwLock<Arc<Catalog>>,
    next_seq: AtomicU64,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> Arc<Catalog> {
        // The catalog is swapped whole, so a poisoned lock still guards a valid value.
        let guard = self.catalog.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Apply `change` to a copy of the provider list and publish the result.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Vec<Provider>) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let mut guard = self.catalog.write().unwrap_or_else(|e| e.into_inner());
        let mut all = guard.all.clone();
        let out = change(&mut all)?;
        *guard = Arc::new(Catalog::build(all));
        Ok(out)
    }

    /// Active providers, priority descending, ties by creation order.
    pub fn snapshot(&self) -> Snapshot {
        self.current().active.clone()
    }

    /// Every provider, including inactive ones, in dispatch order.
    pub fn list(&self) -> Vec<Provider> {
        self.current().all.clone()
    }

    pub fn get(&self, id: &str) -> Option<Provider> {
        self.current().all.iter().find(|p| p.id == id).cloned()
    }

    /// Create a provider, or replace the one with the draft's id.
    ///
    /// The config is validated against the declared transport type before the
    /// provider becomes visible to any dispatch.
    pub fn upsert(&self, draft: ProviderDraft) -> Result<Provider, RegistryError> {
        draft.validate()?;
        let config = ProviderConfig::parse(draft.transport_type, &draft.config)?;

        let provider = self.mutate(|all| {
            let existing = draft
                .id
                .as_deref()
                .and_then(|id| all.iter().position(|p| p.id == id));
            let (id, created_seq, created_at) = match existing {
                Some(pos) => {
                    let old = all.remove(pos);
                    (old.id, old.created_seq, old.created_at)
                }
                None => (
                    draft.id.clone().unwrap_or_else(fallback_id),
                    self.next_seq.fetch_add(1, Ordering::Relaxed),
                    OffsetDateTime::now_utc(),
                ),
            };
            let provider = Provider {
                id,
                name: draft.name.trim().to_string(),
                transport_type: config.transport_type(),
                config,
                priority: draft.priority,
                is_active: draft.is_active,
                cost_per_message: draft.cost_per_message.clone(),
                currency: draft.currency.trim().to_ascii_uppercase(),
                created_seq,
                created_at,
            };
            all.push(provider.clone());
            Ok(provider)
        })?;

        info!(
            provider_id = %provider.id,
            priority = provider.priority,
            active = provider.is_active,
            "provider saved"
        );
        Ok(provider)
    }

    /// Decode an admin-submitted JSON record and [`upsert`](Self::upsert) it.
    pub fn upsert_json(&self, value: Value) -> Result<Provider, RegistryError> {
        self.upsert(ProviderDraft::from_value(value)?)
    }

    pub fn remove(&self, id: &str) -> Result<Provider, RegistryError> {
        let removed = self.mutate(|all| {
            let pos = all
                .iter()
                .position(|p| p.id == id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            Ok(all.remove(pos))
        })?;
        info!(provider_id = %id, "provider removed");
        Ok(removed)
    }

    pub fn set_active(&self, id: &str, active: bool) -> Result<Provider, RegistryError> {
        let provider = self.mutate(|all| {
            let provider = all
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            provider.is_active = active;
            Ok(provider.clone())
        })?;
        info!(provider_id = %id, active, "provider toggled");
        Ok(provider)
    }
}
