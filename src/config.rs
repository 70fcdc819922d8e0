//! File and environment configuration.
//!
//! [`ToolkitConfig`] bundles the settings of the primitives that are usually configured per
//! deployment. It loads from YAML or JSON and then applies `FLOWGUARD_*` environment
//! overrides:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `FLOWGUARD_CONCURRENCY` | `batch.concurrency` |
//! | `FLOWGUARD_MAX_RETRIES` | `batch.max_retries` |
//! | `FLOWGUARD_RETRY_DELAY_MS` | `batch.retry_delay_ms` |
//! | `FLOWGUARD_RATE_LIMIT` | `batch.rate_limit` (e.g. `100/minute`) |
//! | `FLOWGUARD_FAILURE_THRESHOLD` | `circuit_breaker.failure_threshold` |
//! | `FLOWGUARD_SUCCESS_THRESHOLD` | `circuit_breaker.success_threshold` |
//! | `FLOWGUARD_RESET_TIMEOUT_MS` | `circuit_breaker.reset_timeout_ms` |

use crate::batch::BatchConfig;
use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::rate_limiter::parse_rate_limit;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Serde adapter storing a [`Duration`] as whole milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolkitConfig {
    pub batch: BatchConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl ToolkitConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Load a `.json`, `.yaml` or `.yml` file. Environment overrides are not applied.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            other => Err(Error::configuration_with_context(
                "unsupported config file extension",
                ErrorContext::new()
                    .with_field_path(path.display().to_string())
                    .with_details(format!("got {:?}, expected json, yaml or yml", other))
                    .with_source("config_loader"),
            )),
        }
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (the environment in production).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parsed::<usize>(&lookup, "FLOWGUARD_CONCURRENCY").filter(|v| *v > 0) {
            self.batch.concurrency = v;
        }
        if let Some(v) = parsed::<u32>(&lookup, "FLOWGUARD_MAX_RETRIES") {
            self.batch.max_retries = v;
        }
        if let Some(v) = parsed::<u64>(&lookup, "FLOWGUARD_RETRY_DELAY_MS") {
            self.batch.retry_delay = Duration::from_millis(v);
        }
        if let Some(raw) = lookup("FLOWGUARD_RATE_LIMIT") {
            let cfg = parse_rate_limit(&raw).map_err(|e| {
                Error::configuration_with_context(
                    e.to_string(),
                    ErrorContext::new()
                        .with_field_path("FLOWGUARD_RATE_LIMIT")
                        .with_source("config_loader"),
                )
            })?;
            self.batch.rate_limit = Some(cfg);
        }
        if let Some(v) = parsed::<u32>(&lookup, "FLOWGUARD_FAILURE_THRESHOLD") {
            self.circuit_breaker.failure_threshold = v;
        }
        if let Some(v) = parsed::<u32>(&lookup, "FLOWGUARD_SUCCESS_THRESHOLD") {
            self.circuit_breaker.success_threshold = v;
        }
        if let Some(v) = parsed::<u64>(&lookup, "FLOWGUARD_RESET_TIMEOUT_MS") {
            self.circuit_breaker.reset_timeout = Duration::from_millis(v);
        }
        Ok(self)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable override");
            None
        }
    }
}
