//! Exponential backoff between connect attempts.
//!
//! Delays are deterministic: `retry_delay * 2^(attempt - 1)`, capped at
//! `retry_delay_max`. There is no jitter.

use std::time::Duration;

use crate::profile::ProviderProfile;

/// Returns the wait after the given failed attempt (1-based).
///
/// Attempt 0 is treated as attempt 1. Arithmetic saturates, so the result
/// never exceeds `profile.retry_delay_max`.
#[must_use]
pub fn delay_for(profile: &ProviderProfile, attempt: u32) -> Duration {
    let exponent = attempt.max(1) - 1;
    let factor = 1_u32.checked_shl(exponent).unwrap_or(u32::MAX);
    profile
        .retry_delay
        .saturating_mul(factor)
        .min(profile.retry_delay_max)
}

/// The waits between a profile's connect attempts, in order.
///
/// Yields `max_retries - 1` delays: one after every attempt but the last.
#[derive(Debug, Clone)]
pub struct Backoff {
    profile: ProviderProfile,
    attempt: u32,
}

impl Backoff {
    /// Creates the schedule for a profile.
    #[must_use]
    pub const fn new(profile: ProviderProfile) -> Self {
        Self {
            profile,
            attempt: 0,
        }
    }

    const fn remaining(&self) -> u32 {
        self.profile
            .max_retries
            .saturating_sub(1)
            .saturating_sub(self.attempt)
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining() == 0 {
            return None;
        }
        self.attempt += 1;
        Some(delay_for(&self.profile, self.attempt))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.remaining()).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Backoff {}

/// Upper bound on how long one full connect loop can take.
///
/// Every attempt may run until `connection_timeout`, and every attempt but
/// the last is followed by a backoff wait.
#[must_use]
pub fn worst_case_connect(profile: &ProviderProfile) -> Duration {
    let attempts = profile.max_retries.max(1);
    let waits = Backoff::new(*profile).fold(Duration::ZERO, Duration::saturating_add);
    profile
        .connection_timeout
        .saturating_mul(attempts)
        .saturating_add(waits)
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
    use proptest::prelude::*;

    use super::*;
    use crate::profile::{ProfileOverrides, ProviderTag};

    fn profile(retry_delay_ms: u64, retry_delay_max_ms: u64) -> ProviderProfile {
        ProviderProfile::default()
            .with_overrides(&ProfileOverrides {
                max_retries: Some(3),
                retry_delay_ms: Some(retry_delay_ms),
                retry_delay_max_ms: Some(retry_delay_max_ms),
                ..Default::default()
            })
            .unwrap()
    }

    #[test]
    fn test_doubles_until_capped() {
        let p = profile(2000, 10000);
        let delays: Vec<u128> = (1..=5).map(|n| delay_for(&p, n).as_millis()).collect();
        assert_eq!(delays, vec![2000, 4000, 8000, 10000, 10000]);
    }

    #[test]
    fn test_attempt_zero_is_first_attempt() {
        let p = profile(2000, 10000);
        assert_eq!(delay_for(&p, 0), delay_for(&p, 1));
    }

    #[test]
    fn test_huge_attempt_saturates_to_cap() {
        let p = profile(2000, 10000);
        assert_eq!(delay_for(&p, 40), Duration::from_secs(10));
        assert_eq!(delay_for(&p, u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_schedule() {
        let generic: Vec<_> = Backoff::new(ProviderProfile::default()).collect();
        assert_eq!(generic, vec![Duration::from_secs(2), Duration::from_secs(4)]);

        let outlook = Backoff::new(ProviderProfile::for_provider(ProviderTag::Outlook));
        assert_eq!(outlook.len(), 4);
        let delays: Vec<u64> = outlook.map(|d| d.as_secs()).collect();
        assert_eq!(delays, vec![3, 6, 12, 24]);
    }

    #[test]
    fn test_backoff_single_attempt_has_no_waits() {
        let p = ProviderProfile::default()
            .with_overrides(&ProfileOverrides {
                max_retries: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(Backoff::new(p).next(), None);
    }

    #[test]
    fn test_worst_case_connect() {
        let p = ProviderProfile::for_provider(ProviderTag::Generic);
        // 3 x 30s attempts, waits of 2s and 4s in between.
        assert_eq!(worst_case_connect(&p), Duration::from_secs(96));
    }

    proptest! {
        #[test]
        fn prop_delay_never_exceeds_cap(
            base in 1_u64..60_000,
            extra in 0_u64..600_000,
            attempt in 1_u32..200,
        ) {
            let p = profile(base, base + extra);
            prop_assert!(delay_for(&p, attempt) <= p.retry_delay_max);
        }

        #[test]
        fn prop_delay_is_non_decreasing(
            base in 1_u64..60_000,
            extra in 0_u64..600_000,
            attempt in 1_u32..200,
        ) {
            let p = profile(base, base + extra);
            prop_assert!(delay_for(&p, attempt) <= delay_for(&p, attempt + 1));
        }
    }
}
