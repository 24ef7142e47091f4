//! Wiring: turn an [`AppConfig`] into a running gateway.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use serde_json::Value;
use sms_core::{DeliveryLedger, InMemoryLedger, JsonReceiptParser, LedgerError, ReceiptRegistry};
use sms_http::GenericHttpTransport;
use sms_ledger_sqlite::SqliteLedger;
use sms_web_axum::AppState;
use sms_web_generic::ReceiptProcessor;
use tracing::info;

use crate::config::{AppConfig, LedgerBackend, LedgerConfig};
use crate::dispatch::DispatchEngine;
use crate::registry::{ProviderRegistry, RegistryError};
use crate::transport::TransportSet;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("providers file {path}: {reason}")]
    ProvidersFile { path: String, reason: String },
    #[error("provider #{index}: {source}")]
    Provider {
        index: usize,
        source: RegistryError,
    },
}

/// Everything a running gateway shares between requests.
#[derive(Clone)]
pub struct Gateway {
    pub registry: Arc<ProviderRegistry>,
    pub ledger: Arc<dyn DeliveryLedger>,
    pub engine: Arc<DispatchEngine>,
    pub receipts: ReceiptProcessor,
}

impl Gateway {
    /// Assemble a gateway from explicit parts; the registry may be edited
    /// after construction and dispatches pick the change up on their next
    /// snapshot.
    pub fn new(
        registry: Arc<ProviderRegistry>,
        transports: TransportSet,
        ledger: Arc<dyn DeliveryLedger>,
        config: &AppConfig,
    ) -> Self {
        let engine = Arc::new(DispatchEngine::new(
            registry.clone(),
            transports,
            ledger.clone(),
            config.dispatch.call_timeout(),
        ));
        let receipts = ReceiptProcessor::new(
            ReceiptRegistry::new().with_fallback(Arc::new(JsonReceiptParser::new("default"))),
            ledger.clone(),
        );
        Self {
            registry,
            ledger,
            engine,
            receipts,
        }
    }

    /// Open the configured ledger, seed the registry and register the HTTP
    /// transport.
    pub fn from_config(config: &AppConfig) -> Result<Self, BootstrapError> {
        let ledger = open_ledger(&config.ledger)?;
        let registry = Arc::new(ProviderRegistry::new());
        if let Some(path) = &config.providers_file {
            seed_providers(&registry, Path::new(path))?;
        }
        let transports = TransportSet::new().with(Arc::new(GenericHttpTransport::new(
            config.dispatch.call_timeout(),
        )));
        Ok(Self::new(registry, transports, ledger, config))
    }

    pub fn router(&self) -> Router {
        sms_web_axum::router(AppState {
            dispatcher: self.engine.clone(),
            receipts: self.receipts.clone(),
            ledger: self.ledger.clone(),
        })
    }
}

pub fn open_ledger(config: &LedgerConfig) -> Result<Arc<dyn DeliveryLedger>, BootstrapError> {
    let ledger: Arc<dyn DeliveryLedger> = match config.backend {
        LedgerBackend::Memory => Arc::new(InMemoryLedger::new()),
        LedgerBackend::Sqlite => Arc::new(SqliteLedger::open(&config.path)?),
    };
    info!(backend = ?config.backend, "delivery ledger opened");
    Ok(ledger)
}

/// Load a JSON array of provider records into `registry`.
///
/// Records go through the same validation as admin edits; the first invalid
/// one aborts startup.
pub fn seed_providers(registry: &ProviderRegistry, path: &Path) -> Result<usize, BootstrapError> {
    let shown = path.display().to_string();
    let text = fs::read_to_string(path).map_err(|source| BootstrapError::Io {
        path: shown.clone(),
        source,
    })?;
    let records: Vec<Value> =
        serde_json::from_str(&text).map_err(|e| BootstrapError::ProvidersFile {
            path: shown.clone(),
            reason: e.to_string(),
        })?;

    let count = records.len();
    for (index, record) in records.into_iter().enumerate() {
        registry
            .upsert_json(record)
            .map_err(|source| BootstrapError::Provider { index, source })?;
    }
    info!(path = %shown, count, "providers seeded");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}.json", name, sms_core::fallback_id()));
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn seeds_providers_in_priority_order() {
        let path = write_temp(
            "providers",
            r#"[
              {"name": "backup", "priority": 1, "costPerMessage": "0.05", "currency": "LYD",
               "config": {"url": "https://b.example.com", "method": "POST", "bodyTemplate": {"to": "{{phone}}"}}},
              {"name": "primary", "priority": 10, "costPerMessage": "0.03", "currency": "LYD",
               "config": {"url": "https://a.example.com", "method": "GET",
                          "headers": {"X-Api-Key": "k"}, "bodyTemplate": {"To": "{{phone}}", "Body": "{{message}}"}}}
            ]"#,
        );
        let registry = ProviderRegistry::new();
        assert_eq!(seed_providers(&registry, &path).unwrap(), 2);

        let names: Vec<_> = registry.snapshot().iter().map(|p| p.name.clone()).collect();
        assert_eq!(names, vec!["primary", "backup"]);
        fs::remove_file(path).ok();
    }

    #[test]
    fn invalid_seed_record_is_reported_by_index() {
        let path = write_temp(
            "providers-bad",
            r#"[{"name": "x", "priority": 2.5, "costPerMessage": "0.01", "currency": "USD",
                 "config": {"url": "https://x.example.com", "method": "POST", "bodyTemplate": {}}}]"#,
        );
        let registry = ProviderRegistry::new();
        let err = seed_providers(&registry, &path).unwrap_err();
        assert!(matches!(err, BootstrapError::Provider { index: 0, .. }));
        assert!(registry.list().is_empty());
        fs::remove_file(path).ok();
    }

    #[test]
    fn missing_providers_file_fails_startup() {
        let mut config = AppConfig::default();
        config.ledger.backend = LedgerBackend::Memory;
        config.providers_file = Some("/nonexistent/providers.json".into());
        assert!(matches!(
            Gateway::from_config(&config),
            Err(BootstrapError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn memory_gateway_builds_router() {
        let mut config = AppConfig::default();
        config.ledger.backend = LedgerBackend::Memory;
        let gateway = Gateway::from_config(&config).unwrap();
        assert!(gateway.registry.snapshot().is_empty());
        let _router = gateway.router();
    }
}
