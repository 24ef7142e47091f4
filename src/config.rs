use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Dispatch configuration
    pub dispatch: DispatchConfig,
    /// Delivery ledger configuration
    pub ledger: LedgerConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// JSON file holding the initial provider records (optional)
    ///
    /// Kept outside the layered config so template keys keep their case.
    pub providers_file: Option<String>,
}

/// Server configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// Server host (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 3000)
    pub port: u16,
}

/// Dispatch configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DispatchConfig {
    /// Timeout applied to every provider call in milliseconds (default: 10000)
    pub call_timeout_ms: u64,
}

impl DispatchConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Memory,
    Sqlite,
}

/// Delivery ledger configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LedgerConfig {
    /// Storage backend: memory or sqlite (default: sqlite)
    pub backend: LedgerBackend,
    /// Database file for the sqlite backend (default: smsgate.db)
    pub path: String,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: json or pretty (default: json)
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 10_000,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::Sqlite,
            path: "smsgate.db".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(Config::try_from(&AppConfig::default())?)
            // Add configuration file based on environment
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local configuration file (gitignored)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables (prefixed with SMSGATE__)
            .add_source(Environment::with_prefix("SMSGATE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            dispatch: DispatchConfig::default(),
            ledger: LedgerConfig::default(),
            logging: LoggingConfig::default(),
            providers_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server.port, 3000);
        assert_eq!(cfg.dispatch.call_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.ledger.backend, LedgerBackend::Sqlite);
        assert!(cfg.providers_file.is_none());
    }

    #[test]
    fn layered_sources_override_defaults() {
        let cfg: AppConfig = Config::builder()
            .add_source(Config::try_from(&AppConfig::default()).unwrap())
            .set_override("dispatch.call_timeout_ms", 2500)
            .unwrap()
            .set_override("ledger.backend", "memory")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.dispatch.call_timeout(), Duration::from_millis(2500));
        assert_eq!(cfg.ledger.backend, LedgerBackend::Memory);
        assert_eq!(cfg.logging.level, "info");
    }
}
