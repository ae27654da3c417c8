//! Periodic keep-alive probing.
//!
//! The task probes once per period. A probe runs inline in the task loop,
//! so probes never overlap; ticks missed while a slow probe is pending are
//! skipped rather than queued.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

/// Something the keep-alive task can probe.
pub(crate) trait Probe: Send + Sync + 'static {
    /// Runs one probe. `None` means the target is gone and the task should
    /// stop; otherwise the probe's health verdict.
    fn probe(&self) -> impl Future<Output = Option<bool>> + Send;
}

/// Handle to a running keep-alive task.
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub(crate) struct KeepAlive {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl KeepAlive {
    /// Spawns the probe loop. The first probe fires one `period` from now.
    pub(crate) fn spawn<P: Probe>(period: Duration, target: P) -> Self {
        let token = CancellationToken::new();
        let handle = tokio::spawn(run(period, target, token.clone()));
        tracing::debug!(period_ms = period.as_millis(), "keep-alive armed");
        Self { token, handle }
    }

    /// Stops the task. Safe to call more than once.
    pub(crate) fn stop(&self) {
        if !self.token.is_cancelled() {
            self.token.cancel();
            tracing::debug!("keep-alive stopped");
        }
    }

    /// Returns true while the task loop is still running.
    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.stop();
        self.handle.abort();
    }
}

async fn run<P: Probe>(period: Duration, target: P, token: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let verdict = tokio::select! {
            () = token.cancelled() => break,
            verdict = target.probe() => verdict,
        };

        match verdict {
            Some(true) => tracing::trace!("keep-alive probe ok"),
            Some(false) => tracing::debug!("keep-alive probe reported an unhealthy session"),
            None => break,
        }
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
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    #[derive(Clone, Default)]
    struct CountingProbe {
        calls: Arc<AtomicUsize>,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
        latency: Duration,
        gone: Arc<AtomicBool>,
    }

    impl Probe for CountingProbe {
        async fn probe(&self) -> Option<bool> {
            if self.gone.load(Ordering::SeqCst) {
                return None;
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Some(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_probes_once_per_period() {
        let probe = CountingProbe::default();
        let keep_alive = KeepAlive::spawn(Duration::from_secs(10), probe.clone());

        tokio::time::sleep(Duration::from_millis(9_999)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);

        // Now just short of 40s: probes at 10, 20 and 30.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
        assert!(keep_alive.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_never_overlaps() {
        let probe = CountingProbe {
            latency: Duration::from_secs(25),
            ..Default::default()
        };
        let _keep_alive = KeepAlive::spawn(Duration::from_secs(10), probe.clone());

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(probe.max_in_flight.load(Ordering::SeqCst), 1);
        // Ticks that came due during a 25s probe collapse into one.
        let calls = probe.calls.load(Ordering::SeqCst);
        assert!((3..=4).contains(&calls), "unexpected probe count {calls}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_and_drop_cancel_the_task() {
        let probe = CountingProbe::default();
        let keep_alive = KeepAlive::spawn(Duration::from_secs(10), probe.clone());
        keep_alive.stop();
        keep_alive.stop();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
        assert!(!keep_alive.is_running());

        let keep_alive = KeepAlive::spawn(Duration::from_secs(10), probe.clone());
        drop(keep_alive);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_ends_when_target_is_gone() {
        let probe = CountingProbe::default();
        probe.gone.store(true, Ordering::SeqCst);
        let keep_alive = KeepAlive::spawn(Duration::from_secs(10), probe.clone());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!keep_alive.is_running());
    }
}
