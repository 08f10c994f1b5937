//! Configuration types

use crate::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Characters with glob meaning in cache key patterns.
const GLOB_METACHARACTERS: &[char] = &['*', '?', '[', ']', '\\'];

/// Configuration of the reference-index rebuild job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildConfig {
    /// Prefix of every key in the derived index.
    pub namespace_prefix: String,
    /// Cache key of the advisory rebuild flag.
    pub guard_key: String,
    /// How long the rebuild flag survives without an explicit release.
    pub guard_ttl: Duration,
    /// Keys scanned and deleted per invalidation batch.
    pub invalidation_batch_size: usize,
    /// Names of the plugins to probe for a static data loader, in order.
    pub plugins: Vec<String>,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            namespace_prefix: DEFAULT_NAMESPACE_PREFIX.to_string(),
            guard_key: DEFAULT_GUARD_KEY.to_string(),
            guard_ttl: Duration::from_secs(DEFAULT_GUARD_TTL_SECS),
            invalidation_batch_size: DEFAULT_INVALIDATION_BATCH_SIZE,
            plugins: Vec::new(),
        }
    }
}

impl RebuildConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `STATICDEX_NAMESPACE_PREFIX`: Key prefix of the index (default: care_static_data)
    /// - `STATICDEX_GUARD_KEY`: Rebuild flag key (default: redis_index_loading)
    /// - `STATICDEX_GUARD_TTL_SECS`: Rebuild flag TTL (default: 120)
    /// - `STATICDEX_INVALIDATION_BATCH_SIZE`: Keys per invalidation batch (default: 25000)
    /// - `STATICDEX_PLUGINS`: Comma separated plugin names (default: none)
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Same as [`RebuildConfig::from_env`], reading variables through `lookup`.
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Self {
            namespace_prefix: lookup("STATICDEX_NAMESPACE_PREFIX")
                .unwrap_or(defaults.namespace_prefix),
            guard_key: lookup("STATICDEX_GUARD_KEY").unwrap_or(defaults.guard_key),
            guard_ttl: lookup("STATICDEX_GUARD_TTL_SECS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.guard_ttl),
            invalidation_batch_size: lookup("STATICDEX_INVALIDATION_BATCH_SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.invalidation_batch_size),
            plugins: lookup("STATICDEX_PLUGINS")
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or(defaults.plugins),
        }
    }

    /// The namespace described by `namespace_prefix`.
    pub fn namespace(&self) -> CacheNamespace {
        CacheNamespace::new(self.namespace_prefix.clone())
    }

    /// The guard key described by `guard_key`.
    pub fn guard(&self) -> GuardKey {
        GuardKey::new(self.guard_key.clone())
    }

    /// The configured plugins as descriptors, in order.
    pub fn plugin_descriptors(&self) -> Vec<PluginDescriptor> {
        self.plugins.iter().map(PluginDescriptor::new).collect()
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - namespace_prefix is non-empty and free of glob metacharacters
    /// - guard_key is non-empty and outside the namespace
    /// - guard_ttl is positive and at most `MAX_GUARD_TTL_SECS`
    /// - invalidation_batch_size is positive
    /// - plugin names are non-empty and unique
    pub fn validate(&self) -> IndexResult<()> {
        if self.namespace_prefix.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "namespace_prefix".to_string(),
            }
            .into());
        }

        if self.namespace_prefix.contains(GLOB_METACHARACTERS) {
            return Err(ConfigError::InvalidValue {
                field: "namespace_prefix".to_string(),
                value: self.namespace_prefix.clone(),
                reason: "namespace_prefix must not contain glob metacharacters".to_string(),
            }
            .into());
        }

        if self.guard_key.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "guard_key".to_string(),
            }
            .into());
        }

        // Invalidation runs before the guard check and would delete the flag.
        if self.namespace().contains(&self.guard_key) {
            return Err(ConfigError::InvalidValue {
                field: "guard_key".to_string(),
                value: self.guard_key.clone(),
                reason: "guard_key must not fall inside the namespace".to_string(),
            }
            .into());
        }

        if self.guard_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "guard_ttl".to_string(),
                value: format!("{:?}", self.guard_ttl),
                reason: "guard_ttl must be positive".to_string(),
            }
            .into());
        }

        if self.guard_ttl > Duration::from_secs(MAX_GUARD_TTL_SECS) {
            return Err(ConfigError::InvalidValue {
                field: "guard_ttl".to_string(),
                value: format!("{:?}", self.guard_ttl),
                reason: format!("guard_ttl must not exceed {MAX_GUARD_TTL_SECS}s"),
            }
            .into());
        }

        if self.invalidation_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "invalidation_batch_size".to_string(),
                value: self.invalidation_batch_size.to_string(),
                reason: "invalidation_batch_size must be greater than 0".to_string(),
            }
            .into());
        }

        let mut seen = HashSet::new();
        for plugin in &self.plugins {
            if plugin.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "plugins".to_string(),
                    value: plugin.clone(),
                    reason: "plugin names must not be empty".to_string(),
                }
                .into());
            }
            if !seen.insert(plugin.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "plugins".to_string(),
                    value: plugin.clone(),
                    reason: "plugin listed more than once".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = RebuildConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.guard_ttl, Duration::from_secs(120));
        assert_eq!(config.invalidation_batch_size, 25_000);
        assert_eq!(config.namespace().pattern(), "care_static_data*");
    }

    #[test]
    fn test_from_vars_overrides() {
        let config = RebuildConfig::from_vars(lookup_from(&[
            ("STATICDEX_NAMESPACE_PREFIX", "ref_index"),
            ("STATICDEX_GUARD_TTL_SECS", "30"),
            ("STATICDEX_INVALIDATION_BATCH_SIZE", "500"),
            ("STATICDEX_PLUGINS", "abdm, hcx,,scribe "),
        ]));
        assert_eq!(config.namespace_prefix, "ref_index");
        assert_eq!(config.guard_key, DEFAULT_GUARD_KEY);
        assert_eq!(config.guard_ttl, Duration::from_secs(30));
        assert_eq!(config.invalidation_batch_size, 500);
        assert_eq!(config.plugins, vec!["abdm", "hcx", "scribe"]);
    }

    #[test]
    fn test_from_vars_unparseable_falls_back() {
        let config = RebuildConfig::from_vars(lookup_from(&[
            ("STATICDEX_GUARD_TTL_SECS", "two minutes"),
            ("STATICDEX_INVALIDATION_BATCH_SIZE", "-1"),
        ]));
        assert_eq!(config.guard_ttl, Duration::from_secs(DEFAULT_GUARD_TTL_SECS));
        assert_eq!(config.invalidation_batch_size, DEFAULT_INVALIDATION_BATCH_SIZE);
    }

    #[test]
    fn test_validate_rejects_guard_inside_namespace() {
        let config = RebuildConfig {
            guard_key: "care_static_data_loading".to_string(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("guard_key"));
    }

    #[test]
    fn test_validate_rejects_glob_prefix() {
        let config = RebuildConfig {
            namespace_prefix: "care*".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = RebuildConfig {
            guard_ttl: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RebuildConfig {
            invalidation_batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unbounded_guard_ttl() {
        let config = RebuildConfig::from_vars(lookup_from(&[(
            "STATICDEX_GUARD_TTL_SECS",
            "10000000000000",
        )]));
        assert_eq!(config.guard_ttl, Duration::from_secs(10_000_000_000_000));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("guard_ttl"));

        let config = RebuildConfig {
            guard_ttl: Duration::from_secs(MAX_GUARD_TTL_SECS),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_plugins() {
        let config = RebuildConfig {
            plugins: vec!["abdm".to_string(), "abdm".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StaticIndexError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_plugin_descriptors_keep_order() {
        let config = RebuildConfig {
            plugins: vec!["hcx".to_string(), "abdm".to_string()],
            ..Default::default()
        };
        let names: Vec<_> = config
            .plugin_descriptors()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["hcx", "abdm"]);
    }
}
