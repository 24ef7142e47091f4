//! # smsgate
//!
//! Priority-ordered outbound SMS dispatch with gateway failover and delivery
//! accounting.
//!
//! ## Features
//!
//! - **Provider registry**: admin-editable gateways, each with a priority, an
//!   active flag, a per-message cost and a request template
//! - **Failover**: a send walks the active providers in priority order and
//!   stops at the first success
//! - **At most one charge**: every send leaves exactly one ledger entry, and
//!   only a successful provider's cost is ever recorded
//! - **Delivery receipts**: asynchronous DELIVERED / FAILED updates per entry
//! - **Pluggable storage**: in-memory or SQLite delivery ledger
//! - **Observability**: structured `tracing` logs, JSON or pretty
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use smsgate::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!     let gateway = Gateway::from_config(&config)?;
//!
//!     gateway.registry.upsert_json(serde_json::json!({
//!         "name": "primary",
//!         "priority": 10,
//!         "costPerMessage": "0.03",
//!         "currency": "LYD",
//!         "config": {
//!             "url": "https://gw.example.com/send",
//!             "method": "POST",
//!             "bodyTemplate": {"to": "{{phone}}", "text": "{{message}}"}
//!         }
//!     }))?;
//!
//!     let entry = gateway.engine.send("+218911234567", "Your code is 4821").await?;
//!     println!("{} via {:?}", entry.status, entry.provider_id);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Settings are layered from `config/default`, `config/{RUN_MODE}`,
//! `config/local` and `SMSGATE__*` environment variables:
//!
//! ```rust,ignore
//! use smsgate::config::AppConfig;
//!
//! let config = AppConfig::load()?;
//! println!("per-call timeout: {:?}", config.dispatch.call_timeout());
//! ```

pub mod app;
pub mod config;
pub mod dispatch;
pub mod registry;
pub mod telemetry;
pub mod transport;

pub use app::{BootstrapError, Gateway};
pub use config::*;
pub use dispatch::{AttemptFailure, DispatchEngine};
pub use registry::{ProviderRegistry, RegistryError, Snapshot};
pub use transport::TransportSet;

/// Common imports for smsgate usage
pub mod prelude {
    pub use crate::app::{BootstrapError, Gateway};
    pub use crate::config::{
        AppConfig, DispatchConfig, LedgerBackend, LedgerConfig, LoggingConfig, ServerConfig,
    };
    pub use crate::dispatch::DispatchEngine;
    pub use crate::registry::{ProviderRegistry, RegistryError, Snapshot};
    pub use crate::transport::TransportSet;
    pub use sms_core::*;
}
