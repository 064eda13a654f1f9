#![deny(
    trivial_numeric_casts,
    missing_docs,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unused_extern_crates,
    unused_results
)]
#![warn(rust_2021_compatibility, unreachable_pub)]

//! A single YAML-backed configuration document for every tunable the bus
//! recognizes: WAL persistence, the handler dispatcher, the cognitive
//! dispatcher, the backpressure controller, and the dead-letter queue
//! (including its per-event-type retry policies).
//!
//! Generalized from the reference pipeline library's `DynConfig`/
//! `PipelineConfig` loader: one `serde_yaml` document, `validator` range
//! checks on the numeric fields, and `#[serde(default = ...)]` everywhere
//! so a caller may load a partial document or just call
//! `BusConfig::default()` in tests.

use std::{collections::HashMap, fs::File, io::BufReader, path::Path};

use backpressure::BackpressureConfig;
use cognitive::DispatcherConfig as CognitiveDispatcherConfig;
use dlq::{default_retry_config, DlqConfig, RetryConfig};
use dispatch::DispatcherConfig as EventDispatcherConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use types::CognitiveEventType;
use validator::Validate;
use wal::WalConfig;

/// Errors raised while loading or validating a `BusConfig`.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The config file could not be opened or parsed.
    #[error("invalid configuration file `{file}` - {message}")]
    InvalidConfig {
        /// The path to the config file.
        file: String,
        /// The error message.
        message: String,
    },
    /// The parsed document failed a `validator` range check.
    #[error("configuration validation failed for `{file}` - {source}")]
    Validation {
        /// The path to the config file.
        file: String,
        /// The validator error.
        #[source]
        source: validator::ValidationErrors,
    },
}

/// The dead-letter queue's configuration section: the base `DlqConfig`
/// plus a per-`CognitiveEventType` retry policy map. Types absent from
/// the map fall back to `dlq::default_retry_config` for that type.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DlqSection {
    /// Poison detection, analytics/retry cadence, and the (currently
    /// no-op) persistence path.
    #[validate(nested)]
    pub base: DlqConfig,
    /// Overrides of `dlq::default_retry_config` keyed by event type.
    pub retry_policies: HashMap<CognitiveEventType, RetryConfig>,
}

impl Default for DlqSection {
    fn default() -> Self {
        Self {
            base: DlqConfig::default(),
            retry_policies: HashMap::new(),
        }
    }
}

impl DlqSection {
    /// The retry policy for `event_type`: the configured override, or
    /// `dlq::default_retry_config(event_type)` if none was configured.
    pub fn retry_policy(&self, event_type: CognitiveEventType) -> RetryConfig {
        self.retry_policies
            .get(&event_type)
            .cloned()
            .unwrap_or_else(|| default_retry_config(event_type))
    }
}

/// Every tunable the event bus and cognitive dispatcher recognize, loaded
/// from a single YAML document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BusConfig {
    /// WAL persistence: directories, rotation thresholds, fsync policy.
    #[validate(nested)]
    pub persistence: WalConfig,
    /// The handler dispatcher's concurrency cap and per-handler timeout.
    #[validate(nested)]
    pub dispatcher: EventDispatcherConfig,
    /// The cognitive dispatcher's routing and health-check tunables.
    #[validate(nested)]
    pub cognitive: CognitiveDispatcherConfig,
    /// The backpressure controller's thresholds, token bucket, and
    /// circuit breaker tunables.
    #[validate(nested)]
    pub backpressure: BackpressureConfig,
    /// The dead-letter queue's base config and per-type retry policies.
    #[validate(nested)]
    pub dlq: DlqSection,
}

impl BusConfig {
    /// Loads a `BusConfig` from a YAML file at `path`, then validates it.
    /// A missing field in the document falls back to its `#[serde(default
    /// = ...)]`, so a caller may supply only the sections it wants to
    /// override.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file_name = path.as_ref().display().to_string();
        debug!(file = %file_name, "loading bus configuration");

        let file = File::open(path.as_ref()).map_err(|err| Error::InvalidConfig {
            file: file_name.clone(),
            message: err.to_string(),
        })?;
        let reader = BufReader::new(file);
        let config: BusConfig = serde_yaml::from_reader(reader).map_err(|err| Error::InvalidConfig {
            file: file_name.clone(),
            message: err.to_string(),
        })?;
        config.validate().map_err(|source| Error::Validation { file: file_name.clone(), source })?;

        debug!(file = %file_name, "bus configuration loaded");
        Ok(config)
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(BusConfig::default().validate().is_ok());
    }

    #[test]
    fn load_partial_document_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "persistence:\n  max_lines_per_file: 3\ndlq:\n  retry_policies:\n    MemoryWriteInitiated:\n      strategy: exponential\n      max_attempts: 9\n      initial_delay_seconds: 1.0\n      max_delay_seconds: 300.0\n      backoff_multiplier: 2.0\n      jitter_factor: 0.1\n"
        )
        .unwrap();

        let config = BusConfig::load(file.path()).unwrap();
        assert_eq!(config.persistence.max_lines_per_file, 3);
        assert_eq!(config.persistence.max_file_size_mb, WalConfig::default().max_file_size_mb);
        assert_eq!(config.dlq.retry_policy(CognitiveEventType::MemoryWriteInitiated).max_attempts, 9);
        assert_eq!(
            config.dlq.retry_policy(CognitiveEventType::RecallContextRequested).max_attempts,
            default_retry_config(CognitiveEventType::RecallContextRequested).max_attempts
        );
    }

    #[test]
    fn out_of_range_field_fails_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "backpressure:\n  cognitive_load_warning: 1.5\n").unwrap();

        let err = BusConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
