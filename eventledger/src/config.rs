//! Ledger configuration with type-safe validation.
//!
//! Every parameter is a `nutype` newtype validated at construction, so a
//! [`LedgerConfig`] value is always usable. Values can be built in code with the
//! `with_*` methods or read from the process environment with
//! [`LedgerConfig::from_env`].

use std::time::Duration;

use nutype::nutype;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SchemaVersion;

/// Environment variable holding the freshness threshold in milliseconds.
pub const ENV_REQUEST_TIME_THRESHOLD_MS: &str = "LEDGER_REQUEST_TIME_THRESHOLD_MS";
/// Environment variable holding the per-operation timeout in milliseconds.
pub const ENV_OPERATION_TIMEOUT_MS: &str = "LEDGER_OPERATION_TIMEOUT_MS";
/// Environment variable holding the event schema version tag.
pub const ENV_EVENT_VERSION: &str = "LEDGER_EVENT_VERSION";

/// Maximum allowed distance between a request's timestamp and "now", in milliseconds.
///
/// Validated to be between 1 ms and 24 hours.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 86_400_000),
    default = 300_000,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Default,
        Serialize,
        Deserialize
    )
)]
pub struct RequestTimeThresholdMs(u64);

impl RequestTimeThresholdMs {
    /// Convert to Duration.
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.into())
    }
}

/// Upper bound on how long one workflow may run, in milliseconds.
///
/// Validated to be between 100 ms and 10 minutes. When the bound is hit the unit of
/// work is dropped and rolled back.
#[nutype(
    validate(greater_or_equal = 100, less_or_equal = 600_000),
    default = 30_000,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Default,
        Serialize,
        Deserialize
    )
)]
pub struct OperationTimeoutMs(u64);

impl OperationTimeoutMs {
    /// Convert to Duration for use with `tokio::time::timeout`.
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.into())
    }
}

/// Errors raised while reading configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was present but could not be parsed or failed validation.
    #[error("invalid value '{value}' for {name}: {reason}")]
    InvalidValue {
        /// Variable name
        name: &'static str,
        /// The rejected raw value
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Runtime configuration of a [`Ledger`](crate::ledger::Ledger).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Freshness window applied to request timestamps
    pub request_time_threshold: RequestTimeThresholdMs,
    /// Deadline for one workflow including all storage calls
    pub operation_timeout: OperationTimeoutMs,
    /// Schema version stamped on new events
    pub event_version: SchemaVersion,
}

impl LedgerConfig {
    /// Sets the freshness threshold.
    #[must_use]
    pub const fn with_request_time_threshold(mut self, threshold: RequestTimeThresholdMs) -> Self {
        self.request_time_threshold = threshold;
        self
    }

    /// Sets the workflow timeout.
    #[must_use]
    pub const fn with_operation_timeout(mut self, timeout: OperationTimeoutMs) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Sets the schema version stamped on new events.
    #[must_use]
    pub fn with_event_version(mut self, version: SchemaVersion) -> Self {
        self.event_version = version;
        self
    }

    /// Reads configuration from the process environment.
    ///
    /// Missing variables fall back to defaults; present but malformed ones are
    /// rejected.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_REQUEST_TIME_THRESHOLD_MS) {
            let millis = parse_millis(ENV_REQUEST_TIME_THRESHOLD_MS, &raw)?;
            config.request_time_threshold = RequestTimeThresholdMs::try_new(millis)
                .map_err(|e| invalid(ENV_REQUEST_TIME_THRESHOLD_MS, &raw, &e))?;
        }

        if let Some(raw) = lookup(ENV_OPERATION_TIMEOUT_MS) {
            let millis = parse_millis(ENV_OPERATION_TIMEOUT_MS, &raw)?;
            config.operation_timeout = OperationTimeoutMs::try_new(millis)
                .map_err(|e| invalid(ENV_OPERATION_TIMEOUT_MS, &raw, &e))?;
        }

        if let Some(raw) = lookup(ENV_EVENT_VERSION) {
            config.event_version = SchemaVersion::try_new(raw.clone())
                .map_err(|e| invalid(ENV_EVENT_VERSION, &raw, &e))?;
        }

        Ok(config)
    }
}

fn parse_millis(name: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse::<u64>().map_err(|e| invalid(name, raw, &e))
}

fn invalid(name: &'static str, raw: &str, reason: &dyn std::fmt::Display) -> ConfigError {
    ConfigError::InvalidValue {
        name,
        value: raw.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_are_five_minutes_thirty_seconds_and_v1() {
        let config = LedgerConfig::default();

        assert_eq!(
            config.request_time_threshold.as_duration(),
            Duration::from_secs(300)
        );
        assert_eq!(config.operation_timeout.as_duration(), Duration::from_secs(30));
        assert_eq!(config.event_version.as_ref(), "v1");
    }

    #[test]
    fn threshold_bounds_are_enforced() {
        assert!(RequestTimeThresholdMs::try_new(0).is_err());
        assert!(RequestTimeThresholdMs::try_new(1).is_ok());
        assert!(RequestTimeThresholdMs::try_new(86_400_000).is_ok());
        assert!(RequestTimeThresholdMs::try_new(86_400_001).is_err());
    }

    #[test]
    fn operation_timeout_bounds_are_enforced() {
        assert!(OperationTimeoutMs::try_new(99).is_err());
        assert!(OperationTimeoutMs::try_new(100).is_ok());
        assert!(OperationTimeoutMs::try_new(600_001).is_err());
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = LedgerConfig::from_lookup(|_| None).expect("defaults are valid");
        assert_eq!(config, LedgerConfig::default());
    }

    #[test]
    fn environment_overrides_every_field() {
        let config = LedgerConfig::from_lookup(lookup_from(&[
            (ENV_REQUEST_TIME_THRESHOLD_MS, "60000"),
            (ENV_OPERATION_TIMEOUT_MS, " 5000 "),
            (ENV_EVENT_VERSION, "v2"),
        ]))
        .expect("valid overrides should parse");

        assert_eq!(
            config.request_time_threshold.as_duration(),
            Duration::from_secs(60)
        );
        assert_eq!(config.operation_timeout.as_duration(), Duration::from_secs(5));
        assert_eq!(config.event_version.as_ref(), "v2");
    }

    #[test]
    fn malformed_number_is_rejected_with_variable_name() {
        let error = LedgerConfig::from_lookup(lookup_from(&[(ENV_OPERATION_TIMEOUT_MS, "soon")]))
            .expect_err("non-numeric timeout must fail");

        assert!(matches!(
            error,
            ConfigError::InvalidValue { name, ref value, .. }
                if name == ENV_OPERATION_TIMEOUT_MS && value == "soon"
        ));
    }

    #[test]
    fn out_of_range_value_is_rejected() {
        let result =
            LedgerConfig::from_lookup(lookup_from(&[(ENV_REQUEST_TIME_THRESHOLD_MS, "0")]));
        assert!(result.is_err());
    }

    #[test]
    fn builder_methods_replace_fields() {
        let config = LedgerConfig::default()
            .with_request_time_threshold(RequestTimeThresholdMs::try_new(1_000).unwrap())
            .with_operation_timeout(OperationTimeoutMs::try_new(250).unwrap())
            .with_event_version(SchemaVersion::try_new("v9").unwrap());

        assert_eq!(config.request_time_threshold.as_duration(), Duration::from_secs(1));
        assert_eq!(config.operation_timeout.as_duration(), Duration::from_millis(250));
        assert_eq!(config.event_version.as_ref(), "v9");
    }
}
