//! Integration tests for the connection manager.
//!
//! These tests drive the manager against a scripted mock connector on a
//! paused Tokio clock, so backoff delays and keep-alive periods elapse
//! instantly and can be asserted exactly.

#![allow(clippy::unwrap_used, clippy::unreadable_literal)]

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

use mailkeep::{
    ConnectionManager, ConnectionState, Connector, Credentials, Error, ErrorCategory, Folder,
    ManagerConfig, ProtocolSession, ProviderProfile, ProviderTag, SessionError, SessionEvent,
    SessionSettings,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn credentials() -> Credentials {
    Credentials::new("user@example.com", "hunter2", "imap.example.com")
}

fn refused() -> SessionError {
    SessionError::Io(io::Error::new(
        io::ErrorKind::ConnectionRefused,
        "connection refused",
    ))
}

fn rejected_login() -> SessionError {
    SessionError::Rejected("[AUTHENTICATIONFAILED] Invalid credentials (Failure)".into())
}

/// What the next connect attempt does.
enum Step {
    Succeed,
    Fail(SessionError),
    /// Never completes; only the connection timeout ends it.
    Hang,
    /// Succeeds after a delay.
    Delay(Duration),
}

#[derive(Default)]
struct Shared {
    script: Mutex<VecDeque<Step>>,
    attempts: Mutex<Vec<Instant>>,
    live: AtomicUsize,
    max_live: AtomicUsize,
    noops: AtomicUsize,
    logouts: AtomicUsize,
    current_health: Mutex<Option<Arc<AtomicBool>>>,
    current_stall: Mutex<Option<Arc<AtomicBool>>>,
    events: Mutex<Option<UnboundedSender<SessionEvent>>>,
}

/// Connector that plays back a script of outcomes. An empty script means
/// every attempt succeeds.
#[derive(Clone, Default)]
struct MockConnector {
    shared: Arc<Shared>,
}

impl MockConnector {
    fn with_script(steps: impl IntoIterator<Item = Step>) -> Self {
        let connector = Self::default();
        connector.push(steps);
        connector
    }

    fn push(&self, steps: impl IntoIterator<Item = Step>) {
        self.shared.script.lock().unwrap().extend(steps);
    }

    fn calls(&self) -> usize {
        self.shared.attempts.lock().unwrap().len()
    }

    /// Time between consecutive connect attempts.
    fn gaps(&self) -> Vec<Duration> {
        let attempts = self.shared.attempts.lock().unwrap();
        attempts.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }

    fn live(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    fn max_live(&self) -> usize {
        self.shared.max_live.load(Ordering::SeqCst)
    }

    fn noops(&self) -> usize {
        self.shared.noops.load(Ordering::SeqCst)
    }

    fn logouts(&self) -> usize {
        self.shared.logouts.load(Ordering::SeqCst)
    }

    /// Silently breaks the current session: its commands start failing.
    fn kill_current(&self) {
        if let Some(health) = self.shared.current_health.lock().unwrap().as_ref() {
            health.store(false, Ordering::SeqCst);
        }
    }

    /// Makes the current session stop answering: NOOP and LOGOUT hang.
    fn stall_current(&self) {
        if let Some(stall) = self.shared.current_stall.lock().unwrap().as_ref() {
            stall.store(true, Ordering::SeqCst);
        }
    }

    fn emit(&self, event: SessionEvent) {
        let events = self.shared.events.lock().unwrap();
        events.as_ref().unwrap().send(event).unwrap();
    }

    fn open_session(&self) -> MockSession {
        let live = self.shared.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_live.fetch_max(live, Ordering::SeqCst);

        let healthy = Arc::new(AtomicBool::new(true));
        *self.shared.current_health.lock().unwrap() = Some(Arc::clone(&healthy));

        let stalled = Arc::new(AtomicBool::new(false));
        *self.shared.current_stall.lock().unwrap() = Some(Arc::clone(&stalled));

        let (tx, rx) = unbounded_channel();
        *self.shared.events.lock().unwrap() = Some(tx);

        MockSession {
            shared: Arc::clone(&self.shared),
            healthy,
            stalled,
            events: Some(rx),
        }
    }
}

impl Connector for MockConnector {
    type Session = MockSession;

    async fn connect(&self, _settings: &SessionSettings<'_>) -> Result<MockSession, SessionError> {
        self.shared.attempts.lock().unwrap().push(Instant::now());
        let step = self
            .shared
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Succeed);

        match step {
            Step::Succeed => {}
            Step::Fail(error) => return Err(error),
            Step::Hang => std::future::pending::<()>().await,
            Step::Delay(delay) => tokio::time::sleep(delay).await,
        }
        Ok(self.open_session())
    }
}

struct MockSession {
    shared: Arc<Shared>,
    healthy: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
    events: Option<UnboundedReceiver<SessionEvent>>,
}

impl MockSession {
    async fn stall_if_requested(&self) {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }

    fn check(&self) -> Result<(), SessionError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SessionError::Closed("connection reset by peer".into()))
        }
    }
}

impl ProtocolSession for MockSession {
    async fn noop(&mut self) -> Result<(), SessionError> {
        self.shared.noops.fetch_add(1, Ordering::SeqCst);
        self.stall_if_requested().await;
        self.check()
    }

    async fn list(&mut self) -> Result<Vec<Folder>, SessionError> {
        self.check()?;
        Ok(vec![
            Folder::new("INBOX", Some('/')),
            Folder::new("Archive/2024", Some('/')),
        ])
    }

    async fn logout(&mut self) -> Result<(), SessionError> {
        self.shared.logouts.fetch_add(1, Ordering::SeqCst);
        self.stall_if_requested().await;
        self.check()
    }

    fn take_events(&mut self) -> Option<UnboundedReceiver<SessionEvent>> {
        self.events.take()
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.shared.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for MockSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockSession")
            .field("healthy", &self.healthy.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

fn manager(connector: &MockConnector) -> ConnectionManager<MockConnector> {
    ConnectionManager::with_profile(connector.clone(), ProviderProfile::default()).unwrap()
}

// === Connect retry loop ===

#[tokio::test(start_paused = true)]
async fn test_connect_succeeds_first_try() {
    init_tracing();
    let connector = MockConnector::default();
    let manager = manager(&connector);

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_ok!(manager.connect(credentials()).await);

    assert!(manager.is_connected());
    assert_eq!(connector.calls(), 1);
    assert_eq!(connector.live(), 1);
    assert!(manager.session().await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_network_failures_exhaust_profile_attempts() {
    init_tracing();
    let connector = MockConnector::with_script([
        Step::Fail(refused()),
        Step::Fail(refused()),
        Step::Fail(refused()),
    ]);
    let manager = manager(&connector);

    let error = assert_err!(manager.connect(credentials()).await);
    match error {
        Error::CapacityExhausted {
            attempts,
            category,
            message,
            ..
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(category, ErrorCategory::Network);
            assert!(message.contains("connection refused"), "{message}");
            assert!(message.contains("reachability"), "{message}");
        }
        other => panic!("expected CapacityExhausted, got {other:?}"),
    }

    assert_eq!(connector.calls(), 3);
    assert_eq!(
        connector.gaps(),
        vec![Duration::from_secs(2), Duration::from_secs(4)]
    );
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_is_capped_for_outlook() {
    let connector = MockConnector::with_script((0..5).map(|_| Step::Fail(refused())));
    let config = ManagerConfig::builder()
        .provider(ProviderTag::Outlook)
        .keep_alive(false)
        .build();
    let manager = ConnectionManager::new(connector.clone(), &config).unwrap();

    assert_err!(manager.connect(credentials()).await);

    assert_eq!(connector.calls(), 5);
    assert_eq!(
        connector.gaps(),
        vec![
            Duration::from_secs(3),
            Duration::from_secs(6),
            Duration::from_secs(12),
            Duration::from_secs(24),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_rejected_login_fails_without_retry() {
    init_tracing();
    let connector = MockConnector::with_script([Step::Fail(rejected_login()), Step::Succeed]);
    let manager = manager(&connector);
    let start = Instant::now();

    let error = assert_err!(manager.connect(credentials()).await);

    assert!(error.is_credential_problem());
    assert!(error.to_string().contains("AUTHENTICATIONFAILED"));
    assert!(error.to_string().contains("app-specific password"));
    assert_eq!(connector.calls(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_client_error_is_not_retried() {
    let connector = MockConnector::with_script([Step::Fail(SessionError::InvalidInput(
        "host must not be empty".into(),
    ))]);
    let manager = manager(&connector);

    let error = assert_err!(manager.connect(credentials()).await);
    assert!(matches!(
        error,
        Error::CapacityExhausted {
            attempts: 1,
            category: ErrorCategory::Unknown,
            ..
        }
    ));
    assert_eq!(connector.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hung_attempt_times_out_and_is_retried() {
    let connector = MockConnector::with_script([Step::Hang, Step::Succeed]);
    let manager = manager(&connector);
    let start = Instant::now();

    assert_ok!(manager.connect(credentials()).await);

    assert_eq!(connector.calls(), 2);
    // 30s connection timeout, then the 2s first backoff step.
    assert_eq!(start.elapsed(), Duration::from_secs(32));
    assert!(manager.is_connected());
    assert_eq!(connector.max_live(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_replaces_previous_session() {
    let connector = MockConnector::default();
    let manager = manager(&connector);

    assert_ok!(manager.connect(credentials()).await);
    assert_ok!(manager.connect(credentials()).await);

    assert_eq!(connector.calls(), 2);
    assert_eq!(connector.live(), 1);
    assert_eq!(connector.max_live(), 1);
    assert_eq!(connector.logouts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_backoff() {
    init_tracing();
    let connector = MockConnector::with_script([Step::Fail(refused()), Step::Fail(refused())]);
    let manager = manager(&connector);

    let task = tokio::spawn({
        let manager = manager.clone();
        async move { manager.connect(credentials()).await }
    });

    // Inside the 2s backoff after the first failure.
    tokio::time::sleep(Duration::from_secs(1)).await;
    manager.disconnect().await;

    let outcome = task.await.unwrap();
    assert!(matches!(outcome, Err(Error::Cancelled)), "{outcome:?}");
    assert_eq!(connector.calls(), 1);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

// === Disconnect ===

#[tokio::test(start_paused = true)]
async fn test_disconnect_is_idempotent() {
    let connector = MockConnector::default();
    let manager = manager(&connector);

    manager.disconnect().await;
    assert_ok!(manager.connect(credentials()).await);
    manager.disconnect().await;
    manager.disconnect().await;

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(connector.live(), 0);
    assert_eq!(connector.logouts(), 1);
    assert!(manager.session().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_forgets_credentials() {
    let connector = MockConnector::default();
    let manager = manager(&connector);

    assert_ok!(manager.connect(credentials()).await);
    manager.disconnect().await;

    assert!(!manager.ensure_connected().await);
    assert!(matches!(
        manager.list_folders().await,
        Err(Error::NotConnected(_))
    ));
    assert_eq!(connector.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_keep_alive() {
    let connector = MockConnector::default();
    let manager = manager(&connector);

    assert_ok!(manager.connect(credentials()).await);
    manager.disconnect().await;
    tokio::time::sleep(Duration::from_secs(600)).await;

    assert_eq!(connector.noops(), 0);
}

// === Activity and keep-alive ===

#[tokio::test(start_paused = true)]
async fn test_idle_time_tracks_activity() {
    let connector = MockConnector::default();
    let manager = manager(&connector);

    assert_ok!(manager.connect(credentials()).await);
    assert_eq!(manager.idle_time(), Duration::ZERO);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(manager.idle_time(), Duration::from_secs(5));

    manager.update_activity();
    assert_eq!(manager.idle_time(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_keep_alive_probes_healthy_session() {
    let connector = MockConnector::default();
    let manager = manager(&connector);

    assert_ok!(manager.connect(credentials()).await);
    tokio::time::sleep(Duration::from_millis(3 * 180_000 + 1)).await;

    assert_eq!(connector.noops(), 3);
    assert!(manager.is_connected());
    assert_eq!(connector.calls(), 1);
    // Each successful probe counts as activity.
    assert_eq!(manager.idle_time(), Duration::from_millis(1));
}

#[tokio::test(start_paused = true)]
async fn test_keep_alive_disabled_by_config() {
    let connector = MockConnector::default();
    let config = ManagerConfig::builder().keep_alive(false).build();
    let manager = ConnectionManager::new(connector.clone(), &config).unwrap();

    assert_ok!(manager.connect(credentials()).await);
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(connector.noops(), 0);

    manager.start_keep_alive();
    tokio::time::sleep(Duration::from_millis(180_001)).await;
    assert_eq!(connector.noops(), 1);

    manager.stop_keep_alive();
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(connector.noops(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_keep_alive_detects_dead_session_then_ensure_reconnects() {
    init_tracing();
    let connector = MockConnector::default();
    let manager = manager(&connector);

    assert_ok!(manager.connect(credentials()).await);
    connector.kill_current();

    tokio::time::sleep(Duration::from_millis(180_001)).await;
    assert!(!manager.is_connected());
    assert_eq!(manager.state(), ConnectionState::Unhealthy);
    // The keep-alive never reconnects on its own.
    assert_eq!(connector.calls(), 1);

    assert!(manager.ensure_connected().await);
    assert_eq!(connector.calls(), 2);
    assert!(manager.is_connected());
    assert_eq!(connector.live(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_session_close_event_marks_unhealthy() {
    let connector = MockConnector::default();
    let manager = manager(&connector);
    let mut states = manager.subscribe_state();

    assert_ok!(manager.connect(credentials()).await);
    assert_eq!(*states.borrow_and_update(), ConnectionState::Connected);

    connector.emit(SessionEvent::Closed);
    assert_ok!(states.changed().await);
    assert_eq!(*states.borrow(), ConnectionState::Unhealthy);
}

// === ensure_connected ===

#[tokio::test(start_paused = true)]
async fn test_ensure_connected_without_connect() {
    let connector = MockConnector::default();
    let manager = manager(&connector);

    assert!(!manager.ensure_connected().await);
    assert_eq!(connector.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_ensure_connected_probes_live_session() {
    let connector = MockConnector::default();
    let manager = manager(&connector);

    assert_ok!(manager.connect(credentials()).await);
    assert!(manager.ensure_connected().await);

    assert_eq!(connector.noops(), 1);
    assert_eq!(connector.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_ensure_connected_does_not_trust_cached_state() {
    let connector = MockConnector::default();
    let manager = manager(&connector);

    assert_ok!(manager.connect(credentials()).await);
    connector.kill_current();
    // Still reported as connected; nothing has probed yet.
    assert!(manager.is_connected());

    assert!(manager.ensure_connected().await);
    assert_eq!(connector.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_ensure_connected_reconnects_once() {
    init_tracing();
    let connector = MockConnector::default();
    let manager = manager(&connector);

    assert_ok!(manager.connect(credentials()).await);
    connector.kill_current();
    connector.push([Step::Delay(Duration::from_secs(5))]);

    let (first, second) = tokio::join!(manager.ensure_connected(), manager.ensure_connected());

    assert!(first);
    assert!(second);
    assert_eq!(connector.calls(), 2);
    assert_eq!(connector.max_live(), 1);
    assert!(manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_reconnect_forgets_credentials() {
    let connector = MockConnector::default();
    let manager = manager(&connector);

    assert_ok!(manager.connect(credentials()).await);
    connector.kill_current();
    connector.push([Step::Fail(rejected_login())]);

    assert!(!manager.ensure_connected().await);
    assert_eq!(connector.calls(), 2);

    // No credentials left to retry with.
    assert!(!manager.ensure_connected().await);
    assert_eq!(connector.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_network_reconnect_keeps_credentials() {
    let connector = MockConnector::default();
    let manager = manager(&connector);

    assert_ok!(manager.connect(credentials()).await);
    connector.kill_current();
    connector.push((0..3).map(|_| Step::Fail(refused())));

    assert!(!manager.ensure_connected().await);
    assert_eq!(connector.calls(), 4);
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    // The network came back.
    assert!(manager.ensure_connected().await);
    assert_eq!(connector.calls(), 5);
}

// === list_folders ===

#[tokio::test(start_paused = true)]
async fn test_list_folders_requires_connect() {
    let connector = MockConnector::default();
    let manager = manager(&connector);

    let error = assert_err!(manager.list_folders().await);
    assert!(matches!(error, Error::NotConnected(_)));
}

#[tokio::test(start_paused = true)]
async fn test_list_folders() {
    let connector = MockConnector::default();
    let manager = manager(&connector);

    assert_ok!(manager.connect(credentials()).await);
    tokio::time::sleep(Duration::from_secs(10)).await;

    let folders = assert_ok!(manager.list_folders().await);
    let names: Vec<_> = folders.iter().map(Folder::name).collect();
    assert_eq!(names, ["INBOX", "2024"]);
    assert_eq!(manager.idle_time(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_list_folders_restores_dead_session() {
    let connector = MockConnector::default();
    let manager = manager(&connector);

    assert_ok!(manager.connect(credentials()).await);
    connector.kill_current();

    let folders = assert_ok!(manager.list_folders().await);
    assert_eq!(folders.len(), 2);
    assert_eq!(connector.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_list_folders_reports_unrecoverable_session() {
    let connector = MockConnector::default();
    let manager = manager(&connector);

    assert_ok!(manager.connect(credentials()).await);
    connector.kill_current();
    connector.push((0..3).map(|_| Step::Fail(refused())));

    let error = assert_err!(manager.list_folders().await);
    match error {
        Error::Connection { message, .. } => {
            assert!(message.contains("reachability"), "{message}");
        }
        other => panic!("expected Connection, got {other:?}"),
    }
}

// === Borrowed sessions ===

#[tokio::test(start_paused = true)]
async fn test_list_folders_while_session_is_borrowed() {
    let connector = MockConnector::default();
    let manager = manager(&connector);
    assert_ok!(manager.connect(credentials()).await);

    let guard = manager.session().await.unwrap();
    let start = Instant::now();
    let outcome = tokio::time::timeout(Duration::from_secs(3600), manager.list_folders()).await;

    let error = assert_err!(assert_ok!(outcome));
    assert!(matches!(error, Error::Connection { .. }), "{error:?}");
    assert_eq!(start.elapsed(), Duration::from_secs(60));
    // A borrowed session is busy, not dead.
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(connector.calls(), 1);

    drop(guard);
    let folders = assert_ok!(manager.list_folders().await);
    assert_eq!(folders.len(), 2);
    assert_eq!(connector.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_long_operation_does_not_trigger_reconnect() {
    let connector = MockConnector::default();
    let manager = manager(&connector);
    assert_ok!(manager.connect(credentials()).await);

    let fetch = tokio::spawn({
        let manager = manager.clone();
        async move {
            let _session = manager.session().await.unwrap();
            tokio::time::sleep(Duration::from_secs(70)).await;
        }
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(manager.ensure_connected().await);
    assert_ok!(fetch.await);

    assert_eq!(connector.calls(), 1);
    assert_eq!(connector.logouts(), 0);
    assert!(manager.is_connected());
    assert!(manager.ensure_connected().await);
    assert_eq!(connector.noops(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_gives_up_on_borrowed_session() {
    let connector = MockConnector::default();
    let manager = manager(&connector);
    assert_ok!(manager.connect(credentials()).await);

    let guard = manager.session().await.unwrap();
    let error = assert_err!(manager.connect(credentials()).await);
    assert!(matches!(error, Error::Connection { .. }), "{error:?}");
    assert_eq!(connector.calls(), 1);
    drop(guard);

    // The old session and its credentials are still usable.
    assert!(manager.ensure_connected().await);
    assert!(manager.is_connected());
    assert_eq!(connector.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_with_borrowed_session_logs_out_later() {
    let connector = MockConnector::default();
    let manager = manager(&connector);
    assert_ok!(manager.connect(credentials()).await);

    let guard = manager.session().await.unwrap();
    let start = Instant::now();
    manager.disconnect().await;
    assert_eq!(start.elapsed(), Duration::from_secs(60));
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert_eq!(connector.logouts(), 0);

    drop(guard);
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(connector.logouts(), 1);
    assert_eq!(connector.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_late_caller_outlasts_slow_reconnect() {
    init_tracing();
    let connector = MockConnector::default();
    let manager = manager(&connector);
    assert_ok!(manager.connect(credentials()).await);

    // NOOP and LOGOUT each burn a full 60s operation timeout, then two hung
    // attempts (30s each, 2s and 4s backoff) precede a slow success.
    connector.stall_current();
    connector.push([
        Step::Hang,
        Step::Hang,
        Step::Delay(Duration::from_secs(29)),
    ]);

    let start = Instant::now();
    let (first, second) = tokio::join!(manager.ensure_connected(), manager.ensure_connected());

    assert_eq!(start.elapsed(), Duration::from_secs(215));
    assert!(first);
    assert!(second);
    assert_eq!(connector.calls(), 4);
}
