//! Provider profiles.
//!
//! Mail providers differ in how quickly they accept connections, how long
//! they tolerate an idle session and how aggressively they rate-limit
//! logins. A [`ProviderProfile`] bundles the timeout and retry tuning for
//! one provider; [`ProfileOverrides`] lets callers replace individual fields.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Known mail providers with their own tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderTag {
    /// Gmail / Google Workspace (imap.gmail.com).
    Gmail,
    /// Microsoft Outlook / Office 365.
    Outlook,
    /// Yahoo Mail.
    Yahoo,
    /// Apple iCloud Mail.
    ICloud,
    /// Fastmail.
    Fastmail,
    /// Any other IMAP server.
    #[default]
    Generic,
}

impl ProviderTag {
    /// Returns the canonical lowercase tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
            Self::Outlook => "outlook",
            Self::Yahoo => "yahoo",
            Self::ICloud => "icloud",
            Self::Fastmail => "fastmail",
            Self::Generic => "generic",
        }
    }

    /// Parses a tag, falling back to [`ProviderTag::Generic`] for anything
    /// unrecognized.
    #[must_use]
    pub fn parse_lenient(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "gmail" | "google" | "googlemail" => Self::Gmail,
            "outlook" | "office365" | "hotmail" | "live" | "microsoft" => Self::Outlook,
            "yahoo" => Self::Yahoo,
            "icloud" | "apple" | "me" => Self::ICloud,
            "fastmail" => Self::Fastmail,
            _ => Self::Generic,
        }
    }

    /// Detects the provider from an email address domain.
    #[must_use]
    pub fn from_address(address: &str) -> Self {
        address
            .rsplit_once('@')
            .map_or(Self::Generic, |(_, domain)| match domain.to_lowercase().as_str() {
                "gmail.com" | "googlemail.com" => Self::Gmail,
                "outlook.com" | "hotmail.com" | "live.com" | "msn.com" => Self::Outlook,
                "yahoo.com" | "ymail.com" | "rocketmail.com" => Self::Yahoo,
                "icloud.com" | "me.com" | "mac.com" => Self::ICloud,
                "fastmail.com" | "fastmail.fm" => Self::Fastmail,
                _ => Self::Generic,
            })
    }

    /// Detects the provider from an IMAP host name.
    #[must_use]
    pub fn from_host(host: &str) -> Self {
        let lower = host.to_lowercase();
        if lower.ends_with("gmail.com") || lower.ends_with("googlemail.com") {
            Self::Gmail
        } else if lower.contains("office365") || lower.contains("outlook") {
            Self::Outlook
        } else if lower.contains("yahoo") {
            Self::Yahoo
        } else if lower.contains("icloud") || lower.ends_with(".me.com") {
            Self::ICloud
        } else if lower.contains("fastmail") {
            Self::Fastmail
        } else {
            Self::Generic
        }
    }
}

impl fmt::Display for ProviderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderTag {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse_lenient(s))
    }
}

impl From<String> for ProviderTag {
    fn from(tag: String) -> Self {
        Self::parse_lenient(&tag)
    }
}

impl From<ProviderTag> for String {
    fn from(tag: ProviderTag) -> Self {
        tag.as_str().to_string()
    }
}

/// Timeout and retry tuning for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderProfile {
    /// Maximum connect attempts per `connect()` call.
    pub max_retries: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    pub retry_delay: Duration,
    /// Upper bound for any single backoff delay.
    pub retry_delay_max: Duration,
    /// Budget for one connect + authenticate attempt.
    pub connection_timeout: Duration,
    /// Budget for one protocol operation (NOOP, LIST, LOGOUT).
    pub operation_timeout: Duration,
    /// Keep-alive probe cadence.
    pub idle_timeout: Duration,
}

impl ProviderProfile {
    /// Returns the built-in profile for a provider.
    #[must_use]
    pub const fn for_provider(tag: ProviderTag) -> Self {
        match tag {
            ProviderTag::Gmail | ProviderTag::Generic => {
                Self::from_millis(3, 2_000, 10_000, 30_000, 60_000, 180_000)
            }
            ProviderTag::Outlook => Self::from_millis(5, 3_000, 30_000, 45_000, 90_000, 240_000),
            ProviderTag::Yahoo => Self::from_millis(4, 2_000, 20_000, 30_000, 60_000, 120_000),
            ProviderTag::ICloud => Self::from_millis(3, 2_000, 15_000, 30_000, 60_000, 180_000),
            ProviderTag::Fastmail => Self::from_millis(3, 1_000, 8_000, 20_000, 45_000, 300_000),
        }
    }

    /// Looks up a profile by string tag; unknown tags get the generic profile.
    #[must_use]
    pub fn for_tag(tag: &str) -> Self {
        Self::for_provider(ProviderTag::parse_lenient(tag))
    }

    const fn from_millis(
        max_retries: u32,
        retry_delay: u64,
        retry_delay_max: u64,
        connection_timeout: u64,
        operation_timeout: u64,
        idle_timeout: u64,
    ) -> Self {
        Self {
            max_retries,
            retry_delay: Duration::from_millis(retry_delay),
            retry_delay_max: Duration::from_millis(retry_delay_max),
            connection_timeout: Duration::from_millis(connection_timeout),
            operation_timeout: Duration::from_millis(operation_timeout),
            idle_timeout: Duration::from_millis(idle_timeout),
        }
    }

    /// Merges overrides over this profile, field by field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the merged profile violates an invariant.
    pub fn with_overrides(self, overrides: &ProfileOverrides) -> Result<Self> {
        let ms = Duration::from_millis;
        let merged = Self {
            max_retries: overrides.max_retries.unwrap_or(self.max_retries),
            retry_delay: overrides.retry_delay_ms.map_or(self.retry_delay, ms),
            retry_delay_max: overrides.retry_delay_max_ms.map_or(self.retry_delay_max, ms),
            connection_timeout: overrides
                .connection_timeout_ms
                .map_or(self.connection_timeout, ms),
            operation_timeout: overrides
                .operation_timeout_ms
                .map_or(self.operation_timeout, ms),
            idle_timeout: overrides.idle_timeout_ms.map_or(self.idle_timeout, ms),
        };
        merged.validate()?;
        Ok(merged)
    }

    /// Checks the profile invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first violated invariant.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries must be at least 1".into()));
        }
        if self.retry_delay > self.retry_delay_max {
            return Err(Error::Config(format!(
                "retry_delay ({:?}) exceeds retry_delay_max ({:?})",
                self.retry_delay, self.retry_delay_max
            )));
        }
        if self.idle_timeout.is_zero() {
            return Err(Error::Config("idle_timeout must be greater than zero".into()));
        }
        if self.connection_timeout.is_zero() || self.operation_timeout.is_zero() {
            return Err(Error::Config("timeouts must be greater than zero".into()));
        }
        Ok(())
    }
}

impl Default for ProviderProfile {
    fn default() -> Self {
        Self::for_provider(ProviderTag::Generic)
    }
}

/// Partial profile supplied by the caller. Missing fields keep the
/// provider default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfileOverrides {
    /// Maximum connect attempts.
    pub max_retries: Option<u32>,
    /// Base backoff delay in milliseconds.
    pub retry_delay_ms: Option<u64>,
    /// Backoff cap in milliseconds.
    pub retry_delay_max_ms: Option<u64>,
    /// Connect attempt budget in milliseconds.
    pub connection_timeout_ms: Option<u64>,
    /// Protocol operation budget in milliseconds.
    pub operation_timeout_ms: Option<u64>,
    /// Keep-alive cadence in milliseconds.
    pub idle_timeout_ms: Option<u64>,
}

impl ProfileOverrides {
    /// Returns true if no field is overridden.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.max_retries.is_none()
            && self.retry_delay_ms.is_none()
            && self.retry_delay_max_ms.is_none()
            && self.connection_timeout_ms.is_none()
            && self.operation_timeout_ms.is_none()
            && self.idle_timeout_ms.is_none()
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
    use super::*;

    const ALL: [ProviderTag; 6] = [
        ProviderTag::Gmail,
        ProviderTag::Outlook,
        ProviderTag::Yahoo,
        ProviderTag::ICloud,
        ProviderTag::Fastmail,
        ProviderTag::Generic,
    ];

    #[test]
    fn test_builtin_profiles_are_valid() {
        for tag in ALL {
            let profile = ProviderProfile::for_provider(tag);
            assert!(profile.validate().is_ok(), "{tag} profile is invalid");
            assert!(profile.retry_delay <= profile.retry_delay_max);
        }
    }

    #[test]
    fn test_unknown_tag_falls_back_to_generic() {
        assert_eq!(
            ProviderProfile::for_tag("some-isp"),
            ProviderProfile::for_provider(ProviderTag::Generic)
        );
        assert_eq!(ProviderProfile::for_tag(""), ProviderProfile::default());
    }

    #[test]
    fn test_tag_aliases() {
        assert_eq!(ProviderTag::parse_lenient("Office365"), ProviderTag::Outlook);
        assert_eq!(ProviderTag::parse_lenient(" GMAIL "), ProviderTag::Gmail);
        assert_eq!("apple".parse::<ProviderTag>().unwrap(), ProviderTag::ICloud);
    }

    #[test]
    fn test_detect_from_address() {
        assert_eq!(ProviderTag::from_address("me@GoogleMail.com"), ProviderTag::Gmail);
        assert_eq!(ProviderTag::from_address("me@hotmail.com"), ProviderTag::Outlook);
        assert_eq!(ProviderTag::from_address("me@example.org"), ProviderTag::Generic);
        assert_eq!(ProviderTag::from_address("not-an-address"), ProviderTag::Generic);
    }

    #[test]
    fn test_detect_from_host() {
        assert_eq!(ProviderTag::from_host("imap.gmail.com"), ProviderTag::Gmail);
        assert_eq!(ProviderTag::from_host("outlook.office365.com"), ProviderTag::Outlook);
        assert_eq!(ProviderTag::from_host("imap.mail.me.com"), ProviderTag::ICloud);
        assert_eq!(ProviderTag::from_host("mail.example.org"), ProviderTag::Generic);
    }

    #[test]
    fn test_overrides_win_per_field() {
        let overrides = ProfileOverrides {
            max_retries: Some(7),
            idle_timeout_ms: Some(60_000),
            ..Default::default()
        };
        let base = ProviderProfile::for_provider(ProviderTag::Outlook);
        let merged = base.with_overrides(&overrides).unwrap();

        assert_eq!(merged.max_retries, 7);
        assert_eq!(merged.idle_timeout, Duration::from_secs(60));
        assert_eq!(merged.retry_delay, base.retry_delay);
        assert_eq!(merged.connection_timeout, base.connection_timeout);
    }

    #[test]
    fn test_overrides_rejected_when_invariant_breaks() {
        let overrides = ProfileOverrides {
            retry_delay_ms: Some(60_000),
            ..Default::default()
        };
        let err = ProviderProfile::default()
            .with_overrides(&overrides)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let zero_idle = ProfileOverrides {
            idle_timeout_ms: Some(0),
            ..Default::default()
        };
        assert!(ProviderProfile::default().with_overrides(&zero_idle).is_err());
    }

    #[test]
    fn test_overrides_deserialize() {
        let overrides: ProfileOverrides =
            serde_json::from_str(r#"{ "max_retries": 2, "retry_delay_ms": 500 }"#).unwrap();
        assert_eq!(overrides.max_retries, Some(2));
        assert_eq!(overrides.retry_delay_ms, Some(500));
        assert_eq!(overrides.idle_timeout_ms, None);
        assert!(!overrides.is_empty());
        assert!(ProfileOverrides::default().is_empty());

        assert!(serde_json::from_str::<ProfileOverrides>(r#"{ "retries": 2 }"#).is_err());
    }

    #[test]
    fn test_tag_serde_is_lenient() {
        let tag: ProviderTag = serde_json::from_str(r#""Yahoo""#).unwrap();
        assert_eq!(tag, ProviderTag::Yahoo);
        let tag: ProviderTag = serde_json::from_str(r#""unheard-of""#).unwrap();
        assert_eq!(tag, ProviderTag::Generic);
        assert_eq!(serde_json::to_string(&ProviderTag::ICloud).unwrap(), r#""icloud""#);
    }
}
