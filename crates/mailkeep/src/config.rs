//! Connection manager configuration.

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::profile::{ProfileOverrides, ProviderProfile, ProviderTag};

/// Configuration for a [`ConnectionManager`](crate::ConnectionManager).
///
/// Can be built in code or loaded from a JSON document:
///
/// ```json
/// { "provider": "outlook", "overrides": { "max_retries": 2 }, "keep_alive": true }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Provider whose profile is used as the base.
    pub provider: ProviderTag,
    /// Per-field overrides merged over the provider profile.
    pub overrides: ProfileOverrides,
    /// Whether to arm the keep-alive probe after each successful connect.
    pub keep_alive: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            provider: ProviderTag::Generic,
            overrides: ProfileOverrides::default(),
            keep_alive: true,
        }
    }
}

impl ManagerConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> ManagerConfigBuilder {
        ManagerConfigBuilder::default()
    }

    /// Parses a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or the resulting
    /// profile is invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.profile()?;
        Ok(config)
    }

    /// Resolves the effective profile: provider defaults with overrides.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the merged
    /// profile violates an invariant.
    pub fn profile(&self) -> Result<ProviderProfile> {
        ProviderProfile::for_provider(self.provider).with_overrides(&self.overrides)
    }
}

/// Builder for manager configuration.
#[derive(Debug, Clone, Default)]
pub struct ManagerConfigBuilder {
    config: ManagerConfig,
}

impl ManagerConfigBuilder {
    /// Sets the provider.
    #[must_use]
    pub const fn provider(mut self, provider: ProviderTag) -> Self {
        self.config.provider = provider;
        self
    }

    /// Picks the provider from an account address.
    #[must_use]
    pub fn provider_for_address(mut self, address: &str) -> Self {
        self.config.provider = ProviderTag::from_address(address);
        self
    }

    /// Sets the profile overrides.
    #[must_use]
    pub const fn overrides(mut self, overrides: ProfileOverrides) -> Self {
        self.config.overrides = overrides;
        self
    }

    /// Enables or disables the keep-alive probe.
    #[must_use]
    pub const fn keep_alive(mut self, enabled: bool) -> Self {
        self.config.keep_alive = enabled;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ManagerConfig {
        self.config
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::Error;

    #[test]
    fn test_default_config() {
        let config = ManagerConfig::default();
        assert_eq!(config.provider, ProviderTag::Generic);
        assert!(config.keep_alive);
        assert_eq!(config.profile().unwrap(), ProviderProfile::default());
    }

    #[test]
    fn test_builder() {
        let config = ManagerConfig::builder()
            .provider_for_address("someone@yahoo.com")
            .overrides(ProfileOverrides {
                connection_timeout_ms: Some(5_000),
                ..Default::default()
            })
            .keep_alive(false)
            .build();

        assert_eq!(config.provider, ProviderTag::Yahoo);
        assert!(!config.keep_alive);
        let profile = config.profile().unwrap();
        assert_eq!(profile.connection_timeout, Duration::from_secs(5));
        assert_eq!(profile.max_retries, 4);
    }

    #[test]
    fn test_from_json() {
        let config = ManagerConfig::from_json(
            r#"{ "provider": "outlook", "overrides": { "max_retries": 2 } }"#,
        )
        .unwrap();
        assert_eq!(config.provider, ProviderTag::Outlook);
        assert!(config.keep_alive);
        assert_eq!(config.profile().unwrap().max_retries, 2);
    }

    #[test]
    fn test_from_json_rejects_bad_documents() {
        assert!(matches!(
            ManagerConfig::from_json("{ not json"),
            Err(Error::Serde(_))
        ));
        assert!(matches!(
            ManagerConfig::from_json(r#"{ "overrides": { "max_retries": 0 } }"#),
            Err(Error::Config(_))
        ));
    }
}
