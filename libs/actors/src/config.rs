//! Runtime Configuration
//!
//! Scheduler timing and request defaults. Loadable from a TOML file with
//! `GRAPH_ACTORS_*` environment overrides.

use crate::error::RuntimeError;
use anyhow::Context;
use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Scheduler and correlation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Tick interval while messages are flowing
    pub fast_interval_ms: u64,
    /// Tick interval after the graph has been idle for a while
    pub slow_interval_ms: u64,
    /// Consecutive empty ticks before dropping to the slow interval
    pub idle_ticks_before_slow: u32,
    /// Minimum lifetime of any request
    pub request_timeout_floor_ms: u64,
    /// Timeout used by `request_default`
    pub default_request_timeout_ms: u64,
    /// Maximum chain of filters one envelope may traverse in a tick
    pub max_route_depth: u32,
    /// Spawn the tick driver on `start`; when false the host calls `tick()`
    pub autotick: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            fast_interval_ms: 1,
            slow_interval_ms: 20,
            idle_ticks_before_slow: 100,
            request_timeout_floor_ms: 10,
            default_request_timeout_ms: 1_000,
            max_route_depth: 16,
            autotick: true,
        }
    }
}

impl RuntimeConfig {
    /// Defaults with the tick driver disabled
    pub fn manual() -> Self {
        Self {
            autotick: false,
            ..Self::default()
        }
    }

    /// Load from a TOML file, then apply `GRAPH_ACTORS_*` environment overrides
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading runtime config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("GRAPH_ACTORS")
                .prefix_separator("_")
                .try_parsing(true),
        );

        let config: RuntimeConfig = builder
            .build()
            .context("Failed to build runtime configuration")?
            .try_deserialize()
            .context("Failed to deserialize runtime configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the runtime configuration
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.fast_interval_ms == 0 {
            return Err(RuntimeError::configuration(
                "fast_interval_ms cannot be zero",
                Some("fast_interval_ms"),
            ));
        }

        if self.slow_interval_ms < self.fast_interval_ms {
            return Err(RuntimeError::configuration(
                "slow_interval_ms must not be below fast_interval_ms",
                Some("slow_interval_ms"),
            ));
        }

        if self.max_route_depth == 0 {
            return Err(RuntimeError::configuration(
                "max_route_depth cannot be zero",
                Some("max_route_depth"),
            ));
        }

        Ok(())
    }

    pub fn fast_interval(&self) -> Duration {
        Duration::from_millis(self.fast_interval_ms)
    }

    pub fn slow_interval(&self) -> Duration {
        Duration::from_millis(self.slow_interval_ms)
    }

    pub fn request_timeout_floor(&self) -> Duration {
        Duration::from_millis(self.request_timeout_floor_ms)
    }

    pub fn default_request_timeout(&self) -> Duration {
        Duration::from_millis(self.default_request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        assert!(RuntimeConfig::default().validate().is_ok());
        assert!(!RuntimeConfig::manual().autotick);
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("runtime.toml");
        fs::write(
            &config_path,
            r#"
fast_interval_ms = 2
request_timeout_floor_ms = 25
"#,
        )
        .unwrap();

        let config = RuntimeConfig::load(Some(&config_path)).unwrap();
        assert_eq!(config.fast_interval_ms, 2);
        assert_eq!(config.request_timeout_floor(), Duration::from_millis(25));
        assert_eq!(config.slow_interval_ms, RuntimeConfig::default().slow_interval_ms);
    }

    #[test]
    fn test_inverted_intervals_rejected() {
        let config = RuntimeConfig {
            fast_interval_ms: 50,
            slow_interval_ms: 5,
            ..RuntimeConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RuntimeError::Configuration { field: Some(f), .. }) if f == "slow_interval_ms"
        ));
    }
}
