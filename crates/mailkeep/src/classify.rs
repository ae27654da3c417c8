//! Failure classification and recovery decisions.
//!
//! [`classify`] maps a raw session failure to a coarse [`ErrorCategory`];
//! [`RecoveryStrategy::for_attempt`] turns a category and attempt number
//! into a retry decision. Keeping the two apart lets the mapping be tested
//! without any timing.

use std::fmt;
use std::time::Duration;

use crate::backoff::delay_for;
use crate::profile::ProviderProfile;
use crate::session::SessionError;

/// Markers that identify a rejected login, matched case-insensitively.
///
/// Covers RFC 5530 response codes and the wording used by the big
/// providers (Gmail, Outlook, Yahoo, iCloud).
const AUTH_MARKERS: &[&str] = &[
    "authentication failed",
    "authenticationfailed",
    "authorizationfailed",
    "invalid credentials",
    "login failed",
    "logondenied",
    "[auth]",
    "web login required",
    "application-specific password",
    "username and password not accepted",
];

/// Coarse failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Credentials were rejected. Never retried.
    Authentication,
    /// Transient transport or server trouble. Retried with backoff.
    Network,
    /// Client-side misuse or anything unexplained.
    Unknown,
}

impl ErrorCategory {
    /// Maximum attempts worth making for this category.
    ///
    /// Independent of the profile's `max_retries`; the smaller of the two
    /// wins.
    #[must_use]
    pub const fn max_attempts(self) -> u32 {
        match self {
            Self::Authentication | Self::Unknown => 1,
            Self::Network => 5,
        }
    }

    /// Returns true if another attempt can ever help.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        self.max_attempts() > 1
    }

    /// Actionable advice for the user once this category is final.
    #[must_use]
    pub const fn hint(self) -> &'static str {
        match self {
            Self::Authentication => {
                "The server rejected the credentials, not the network. Confirm the address \
                 and password format; many providers require an app-specific password."
            }
            Self::Network => {
                "Verify network reachability of the mail server and that the host and port \
                 are correct."
            }
            Self::Unknown => {
                "Check the connection settings (host, port, TLS) before trying again."
            }
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Authentication => "authentication",
            Self::Network => "network",
            Self::Unknown => "unknown",
        })
    }
}

/// Maps a session failure to its category.
#[must_use]
pub fn classify(error: &SessionError) -> ErrorCategory {
    let text = error.to_string().to_lowercase();
    if AUTH_MARKERS.iter().any(|marker| text.contains(marker)) {
        return ErrorCategory::Authentication;
    }
    match error {
        SessionError::InvalidInput(_) => ErrorCategory::Unknown,
        _ => ErrorCategory::Network,
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryStrategy {
    /// Whether another attempt should be made.
    pub should_retry: bool,
    /// Attempt cap for the category.
    pub max_attempts: u32,
    /// Wait before the next attempt. Zero when not retrying.
    pub delay: Duration,
    /// Human-readable status line.
    pub user_message: String,
}

impl RecoveryStrategy {
    /// Decides how to recover from failed attempt `attempt` (1-based).
    #[must_use]
    pub fn for_attempt(category: ErrorCategory, attempt: u32, profile: &ProviderProfile) -> Self {
        let max_attempts = category.max_attempts();

        if category == ErrorCategory::Authentication || attempt >= max_attempts {
            return Self {
                should_retry: false,
                max_attempts,
                delay: Duration::ZERO,
                user_message: category.hint().to_string(),
            };
        }

        let delay = delay_for(profile, attempt);
        Self {
            should_retry: true,
            max_attempts,
            delay,
            user_message: format!(
                "Connection attempt {attempt} failed, retrying in {}",
                format_delay(delay)
            ),
        }
    }
}

fn format_delay(delay: Duration) -> String {
    let millis = delay.as_millis();
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{millis}ms")
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
    use std::io;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_classify_auth_markers() {
        let cases = [
            SessionError::Rejected("[AUTHENTICATIONFAILED] Invalid credentials (Failure)".into()),
            SessionError::Rejected("LOGIN failed.".into()),
            SessionError::Other("Authentication Failed".into()),
            SessionError::Rejected("[ALERT] Application-specific password required".into()),
            SessionError::Closed("Username and Password not accepted".into()),
        ];
        for error in &cases {
            assert_eq!(classify(error), ErrorCategory::Authentication, "{error}");
        }
    }

    #[test]
    fn test_classify_transport_as_network() {
        let refused = SessionError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert_eq!(classify(&refused), ErrorCategory::Network);
        assert_eq!(
            classify(&SessionError::Timeout(Duration::from_secs(30))),
            ErrorCategory::Network
        );
        assert_eq!(
            classify(&SessionError::Closed("BYE server shutting down".into())),
            ErrorCategory::Network
        );
        assert_eq!(
            classify(&SessionError::Rejected("[UNAVAILABLE] try later".into())),
            ErrorCategory::Network
        );
    }

    #[test]
    fn test_classify_client_error_as_unknown() {
        assert_eq!(
            classify(&SessionError::InvalidInput("host must not be empty".into())),
            ErrorCategory::Unknown
        );
        // An auth marker still wins.
        assert_eq!(
            classify(&SessionError::InvalidInput("login failed: empty password".into())),
            ErrorCategory::Authentication
        );
    }

    #[test]
    fn test_network_strategy_names_wait_and_attempt() {
        let profile = ProviderProfile::default();
        let strategy = RecoveryStrategy::for_attempt(ErrorCategory::Network, 2, &profile);
        assert!(strategy.should_retry);
        assert_eq!(strategy.delay, Duration::from_secs(4));
        assert_eq!(strategy.user_message, "Connection attempt 2 failed, retrying in 4s");
    }

    #[test]
    fn test_network_strategy_stops_at_cap() {
        let profile = ProviderProfile::default();
        let cap = ErrorCategory::Network.max_attempts();
        let strategy = RecoveryStrategy::for_attempt(ErrorCategory::Network, cap, &profile);
        assert!(!strategy.should_retry);
        assert_eq!(strategy.delay, Duration::ZERO);
    }

    #[test]
    fn test_unknown_is_not_retryable() {
        assert!(!ErrorCategory::Unknown.is_retryable());
        assert!(!ErrorCategory::Authentication.is_retryable());
        assert!(ErrorCategory::Network.is_retryable());
    }

    #[test]
    fn test_format_delay() {
        assert_eq!(format_delay(Duration::from_millis(2000)), "2s");
        assert_eq!(format_delay(Duration::from_millis(1500)), "1500ms");
    }

    proptest! {
        #[test]
        fn prop_authentication_never_retries(attempt in 0_u32..10_000) {
            let strategy = RecoveryStrategy::for_attempt(
                ErrorCategory::Authentication,
                attempt,
                &ProviderProfile::default(),
            );
            prop_assert!(!strategy.should_retry);
        }

        #[test]
        fn prop_retryable_below_cap(attempt in 1_u32..5) {
            let category = ErrorCategory::Network;
            prop_assume!(attempt < category.max_attempts());
            let strategy =
                RecoveryStrategy::for_attempt(category, attempt, &ProviderProfile::default());
            prop_assert!(strategy.should_retry);
            prop_assert!(strategy.delay > Duration::ZERO);
        }
    }
}
