//! Pool configuration structures.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::PolicyError;

/// Declarative sizing policy of a pool.
///
/// The pool reconciles its contents against these bounds after every state change.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct PoolPolicy {
    /// Lower bound on the total number of resources, including ones being created.
    #[serde(default)]
    pub min_pool_size: usize,
    /// Upper bound on the total number of resources.
    ///
    /// Unbounded if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pool_size: Option<usize>,
    /// Lower bound on resources that will eventually be free for immediate acquisition.
    #[serde(default)]
    pub min_available: usize,
    /// Upper bound on idle resources kept in the pool.
    ///
    /// Unbounded if not set. Only enforced for factories able to destroy resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_available: Option<usize>,
    /// Validate idle resources before handing them out, discarding failures.
    #[serde(default)]
    pub test_before_acquire: bool,
    /// Validate resources on release, discarding failures.
    #[serde(default)]
    pub test_after_release: bool,
    /// Fail the oldest pending acquisition when a resource creation fails.
    ///
    /// When disabled, creation failures are only logged, and waiters keep waiting.
    #[serde(default)]
    pub reject_waiters_on_create_error: bool,
}

impl Default for PoolPolicy {
    fn default() -> Self {
        Self {
            min_pool_size: 0,
            max_pool_size: None,
            min_available: 0,
            max_available: None,
            test_before_acquire: false,
            test_after_release: false,
            reject_waiters_on_create_error: false,
        }
    }
}

impl PoolPolicy {
    /// Set minimum pool size.
    #[must_use]
    pub fn with_min_pool_size(mut self, min_pool_size: usize) -> Self {
        self.min_pool_size = min_pool_size;
        self
    }

    /// Set maximum pool size.
    #[must_use]
    pub fn with_max_pool_size(mut self, max_pool_size: usize) -> Self {
        self.max_pool_size = Some(max_pool_size);
        self
    }

    /// Set minimum number of eventually available resources.
    #[must_use]
    pub fn with_min_available(mut self, min_available: usize) -> Self {
        self.min_available = min_available;
        self
    }

    /// Set maximum number of idle resources.
    #[must_use]
    pub fn with_max_available(mut self, max_available: usize) -> Self {
        self.max_available = Some(max_available);
        self
    }

    /// Enable or disable resource validation before acquisition.
    #[must_use]
    pub fn with_test_before_acquire(mut self, enabled: bool) -> Self {
        self.test_before_acquire = enabled;
        self
    }

    /// Enable or disable resource validation on release.
    #[must_use]
    pub fn with_test_after_release(mut self, enabled: bool) -> Self {
        self.test_after_release = enabled;
        self
    }

    /// Enable or disable reporting of creation failures to waiters.
    #[must_use]
    pub fn with_reject_waiters_on_create_error(mut self, enabled: bool) -> Self {
        self.reject_waiters_on_create_error = enabled;
        self
    }

    /// Check that all bounds can be satisfied at the same time.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.min_available > self.min_pool_size {
            return Err(PolicyError::MinAvailableOverMinSize {
                min_available: self.min_available,
                min_pool_size: self.min_pool_size,
            });
        }
        if let Some(max_pool_size) = self.max_pool_size {
            if self.min_pool_size > max_pool_size {
                return Err(PolicyError::MinSizeOverMaxSize {
                    min_pool_size: self.min_pool_size,
                    max_pool_size,
                });
            }
        }
        if let Some(max_available) = self.max_available {
            if self.min_available > max_available {
                return Err(PolicyError::MinAvailableOverMaxAvailable {
                    min_available: self.min_available,
                    max_available,
                });
            }
        }
        Ok(())
    }
}

/// Complete pool configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Pool name, used in metrics and traces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Sizing policy.
    #[serde(default)]
    pub policy: PoolPolicy,
    /// Minimum interval between two recordings of pool state gauges.
    #[serde(default = "PoolConfig::default_metrics_interval", with = "humantime_serde")]
    pub metrics_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            label: None,
            policy: PoolPolicy::default(),
            metrics_interval: Self::default_metrics_interval(),
        }
    }
}

impl PoolConfig {
    /// Create builder for pool configuration.
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    /// Set pool name.
    #[must_use]
    pub fn with_label(mut self, label: impl ToString) -> Self {
        self.label = Some(label.to_string());
        self
    }

    /// Set sizing policy.
    #[must_use]
    pub fn with_policy(mut self, policy: PoolPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set minimum interval between pool state gauge recordings.
    #[must_use]
    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    /// Default value for [`Self::metrics_interval`].
    #[must_use]
    #[inline]
    fn default_metrics_interval() -> Duration {
        Duration::from_secs(15)
    }
}

/// Pool configuration loading error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Configuration builder error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

/// Builder for pool configuration.
#[must_use]
pub struct PoolConfigBuilder {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
}

impl PoolConfigBuilder {
    /// Alternative method to construct a pool configuration builder.
    pub fn new() -> Self {
        Self {
            builder: config::Config::builder(),
        }
    }

    /// Try to build configuration object from preconfigured sources.
    ///
    /// This method will do all the I/O necessary to load the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Err` if some configuration loading was unsuccessful.
    pub fn build(self) -> Result<PoolConfig, ConfigError> {
        self.builder.build()?.try_deserialize().map_err(Into::into)
    }

    /// Add a custom object implementing [`Source`] trait as a source of pool configuration.
    ///
    /// [`Source`]: config::Source
    pub fn with_source<T>(mut self, source: T) -> Self
    where
        T: config::Source + Send + Sync + 'static,
    {
        self.builder = self.builder.add_source(source);
        self
    }

    /// Add file as a source of pool configuration.
    pub fn with_file(self, name: impl AsRef<str>) -> Self {
        self.with_source(config::File::with_name(name.as_ref()))
    }

    /// Add optional file as a source of pool configuration.
    ///
    /// Missing file is not an error.
    pub fn with_optional_file(self, name: impl AsRef<str>) -> Self {
        self.with_source(config::File::with_name(name.as_ref()).required(false))
    }

    /// Add environment variables as a source of pool configuration.
    ///
    /// Nested keys are separated by a double underscore, as in `PREFIX_POLICY__MIN_POOL_SIZE`.
    pub fn with_env(self, prefix: impl AsRef<str>) -> Self {
        self.with_source(
            config::Environment::with_prefix(prefix.as_ref())
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
    }
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use config::{File, FileFormat};
    use serde_json::{from_str, json, to_value};

    use super::*;

    /// Deserialize - empty object yields defaults.
    #[test]
    fn policy_de_default() {
        let policy: PoolPolicy = from_str("{}").unwrap();
        assert_eq!(policy, PoolPolicy::default());
        assert_eq!(policy.max_pool_size, None);
        assert_eq!(policy.max_available, None);
    }

    /// Serialize - unbounded limits are omitted.
    #[test]
    fn policy_ser_unbounded() {
        let policy = PoolPolicy::default().with_min_available(2);
        assert_eq!(
            to_value(policy).unwrap(),
            json!({
                "min_pool_size": 0,
                "min_available": 2,
                "test_before_acquire": false,
                "test_after_release": false,
                "reject_waiters_on_create_error": false
            })
        );
    }

    /// Sane policy passes validation.
    #[test]
    fn policy_validate_ok() {
        let policy = PoolPolicy::default()
            .with_min_pool_size(4)
            .with_min_available(2)
            .with_max_available(3)
            .with_max_pool_size(8);
        assert_eq!(policy.validate(), Ok(()));
        assert_eq!(PoolPolicy::default().validate(), Ok(()));
    }

    /// Every kind of inconsistency is reported.
    #[test]
    fn policy_validate_errors() {
        let policy = PoolPolicy::default().with_min_available(3);
        assert_eq!(
            policy.validate(),
            Err(PolicyError::MinAvailableOverMinSize {
                min_available: 3,
                min_pool_size: 0,
            })
        );
        let policy = PoolPolicy::default()
            .with_min_pool_size(5)
            .with_max_pool_size(2);
        assert_eq!(
            policy.validate(),
            Err(PolicyError::MinSizeOverMaxSize {
                min_pool_size: 5,
                max_pool_size: 2,
            })
        );
        let policy = PoolPolicy::default()
            .with_min_pool_size(5)
            .with_min_available(4)
            .with_max_available(1);
        assert_eq!(
            policy.validate(),
            Err(PolicyError::MinAvailableOverMaxAvailable {
                min_available: 4,
                max_available: 1,
            })
        );
    }

    /// Load full configuration from YAML.
    #[test]
    fn config_from_yaml() {
        let yaml = r#"
label: workers
metrics_interval: 1m 30s
policy:
  min_pool_size: 2
  max_pool_size: 10
  max_available: 4
  test_before_acquire: true
"#;
        let config = PoolConfig::builder()
            .with_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap();
        assert_eq!(config.label.as_deref(), Some("workers"));
        assert_eq!(config.metrics_interval, Duration::from_secs(90));
        assert_eq!(
            config.policy,
            PoolPolicy::default()
                .with_min_pool_size(2)
                .with_max_pool_size(10)
                .with_max_available(4)
                .with_test_before_acquire(true)
        );
    }

    /// Missing sections fall back to defaults.
    #[test]
    fn config_defaults() {
        let config = PoolConfig::builder()
            .with_source(File::from_str("label: db", FileFormat::Yaml))
            .build()
            .unwrap();
        assert_eq!(config, PoolConfig::default().with_label("db"));
        assert_eq!(config.metrics_interval, Duration::from_secs(15));
    }
}
