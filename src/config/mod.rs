//! # Consolidator Configuration
//!
//! Typed configuration for the consolidation service. Every section has
//! working defaults so a bare environment starts an in-memory pipeline; files
//! and `CONSOLIDATOR_*` environment variables override them.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use consolidation_core::config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new().load()?;
//! println!("store backend: {:?}", config.store.backend);
//! # Ok(())
//! # }
//! ```

pub mod loader;

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConsolidationError, Result};

pub use loader::ConfigLoader;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidatorConfig {
    pub environment: String,
    pub logging: LoggingConfig,
    pub store: StoreConfig,
    pub messaging: MessagingConfig,
    pub dispatcher: DispatcherConfig,
    pub engines: Vec<EngineBinding>,
    pub completeness: CompletenessConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, `RUST_LOG` takes precedence when set
    pub level: String,
    pub format: LogFormat,
    pub with_target: bool,
    pub with_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            with_target: true,
            with_thread_ids: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// Actions per bulk request
    pub bulk_chunk_size: usize,
    /// Bulk requests in flight at once
    pub bulk_concurrency: usize,
    pub request_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url: None,
            max_connections: 10,
            bulk_chunk_size: 500,
            bulk_concurrency: 4,
            request_timeout_ms: 30_000,
        }
    }
}

impl StoreConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingBackend {
    Memory,
    Pgmq,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    pub backend: MessagingBackend,
    pub database_url: Option<String>,
    pub visibility_timeout_seconds: u32,
    pub poll_interval_ms: u64,
    pub batch_size: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            backend: MessagingBackend::Memory,
            database_url: None,
            visibility_timeout_seconds: 60,
            poll_interval_ms: 250,
            batch_size: 10,
        }
    }
}

impl MessagingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Concurrent workers per input queue
    pub workers: usize,
    /// Maximum ids per outbound report message
    pub report_chunk_size: usize,
    /// Queue every outbound report is also published to, if any
    pub output_queue: Option<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            report_chunk_size: 1000,
            output_queue: None,
        }
    }
}

/// What an engine does when some input ids cannot be found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingInputPolicy {
    /// Fail the message so it is requeued and retried later
    #[default]
    Requeue,
    /// Log and carry on with the ids that were found
    Drop,
}

/// What an engine does when the store itself is unreachable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorPolicy {
    #[default]
    Retry,
    Reject,
}

/// Routes one routing-key pattern to an ordered chain of engines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineBinding {
    /// AMQP-style topic pattern, `*` is one word and `#` is zero or more
    pub routing_key: String,
    pub input_queue: String,
    pub engines: Vec<String>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub missing_input_policy: MissingInputPolicy,
    #[serde(default)]
    pub on_store_error: StoreErrorPolicy,
    #[serde(default = "default_send_reports")]
    pub send_reports: bool,
}

fn default_send_reports() -> bool {
    true
}

impl EngineBinding {
    pub fn new(routing_key: impl Into<String>, input_queue: impl Into<String>, engines: &[&str]) -> Self {
        Self {
            routing_key: routing_key.into(),
            input_queue: input_queue.into(),
            engines: engines.iter().map(|name| (*name).to_string()).collect(),
            chunk_size: None,
            missing_input_policy: MissingInputPolicy::default(),
            on_store_error: StoreErrorPolicy::default(),
            send_reports: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletenessConfig {
    /// Slack allowed when matching a product against a datatake window
    pub datatake_time_delta_seconds: i64,
    /// Periods closer than this are merged by `reduce_periods`
    pub reduce_tolerance_seconds: i64,
    /// Products per datatake lookup round trip
    pub parent_lookup_batch_size: usize,
}

impl Default for CompletenessConfig {
    fn default() -> Self {
        Self {
            datatake_time_delta_seconds: 20,
            reduce_tolerance_seconds: 0,
            parent_lookup_batch_size: 100,
        }
    }
}

impl ConsolidatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.store.bulk_chunk_size == 0 {
            return Err(ConsolidationError::configuration("store.bulk_chunk_size must be positive"));
        }
        if self.store.bulk_concurrency == 0 {
            return Err(ConsolidationError::configuration("store.bulk_concurrency must be positive"));
        }
        if self.store.backend == StoreBackend::Postgres && self.store.database_url.is_none() {
            return Err(ConsolidationError::configuration(
                "store.database_url is required for the postgres backend",
            ));
        }
        if self.messaging.backend == MessagingBackend::Pgmq
            && self.messaging.database_url.is_none()
            && self.store.database_url.is_none()
        {
            return Err(ConsolidationError::configuration(
                "messaging.database_url is required for the pgmq backend",
            ));
        }
        if self.messaging.batch_size == 0 {
            return Err(ConsolidationError::configuration("messaging.batch_size must be positive"));
        }
        if self.dispatcher.workers == 0 {
            return Err(ConsolidationError::configuration("dispatcher.workers must be positive"));
        }
        if self.dispatcher.report_chunk_size == 0 {
            return Err(ConsolidationError::configuration(
                "dispatcher.report_chunk_size must be positive",
            ));
        }
        if self.completeness.parent_lookup_batch_size == 0 {
            return Err(ConsolidationError::configuration(
                "completeness.parent_lookup_batch_size must be positive",
            ));
        }

        let mut seen = HashSet::new();
        for binding in &self.engines {
            if !seen.insert(binding.routing_key.as_str()) {
                return Err(ConsolidationError::configuration(format!(
                    "routing key {} is bound more than once",
                    binding.routing_key
                )));
            }
            if binding.engines.is_empty() {
                return Err(ConsolidationError::configuration(format!(
                    "routing key {} has no engines",
                    binding.routing_key
                )));
            }
            if binding.chunk_size == Some(0) {
                return Err(ConsolidationError::configuration(format!(
                    "routing key {} has a zero chunk_size",
                    binding.routing_key
                )));
            }
        }
        Ok(())
    }

    /// Database url used by pgmq, falling back to the store's
    pub fn messaging_database_url(&self) -> Option<&str> {
        self.messaging
            .database_url
            .as_deref()
            .or(self.store.database_url.as_deref())
    }

    /// Input queues in binding order, without duplicates
    pub fn input_queues(&self) -> Vec<String> {
        let mut queues: Vec<String> = Vec::new();
        for binding in &self.engines {
            if !queues.contains(&binding.input_queue) {
                queues.push(binding.input_queue.clone());
            }
        }
        queues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ConsolidatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = ConsolidatorConfig::default();
        config.store.bulk_chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = ConsolidatorConfig::default();
        config.store.backend = StoreBackend::Postgres;
        assert!(config.validate().is_err());

        let mut config = ConsolidatorConfig::default();
        config.engines = vec![
            EngineBinding::new("new.raw-dd-product", "products", &["product"]),
            EngineBinding::new("new.raw-dd-product", "other", &["product"]),
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_input_queues_are_deduplicated() {
        let mut config = ConsolidatorConfig::default();
        config.engines = vec![
            EngineBinding::new("new.raw-dd-product", "raw", &["product"]),
            EngineBinding::new("new.raw-lta-product", "raw", &["product"]),
            EngineBinding::new("*.product", "consolidated", &["datatake-completeness"]),
        ];
        assert_eq!(config.input_queues(), vec!["raw", "consolidated"]);
    }

    #[test]
    fn test_messaging_url_falls_back_to_store() {
        let mut config = ConsolidatorConfig::default();
        config.store.database_url = Some("postgres://store".into());
        assert_eq!(config.messaging_database_url(), Some("postgres://store"));
        config.messaging.database_url = Some("postgres://queue".into());
        assert_eq!(config.messaging_database_url(), Some("postgres://queue"));
    }
}
