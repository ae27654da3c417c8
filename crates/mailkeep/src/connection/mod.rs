//! Connection state machine.
//!
//! [`ConnectionManager`] owns the live session and drives its lifecycle:
//! the connect retry loop, keep-alive probing, guarded reconnection and
//! teardown. It is cheap to clone; clones share one session.
//!
//! ## Concurrency
//!
//! - Session establishment (`connect()` and the reconnect inside
//!   `ensure_connected()`) is serialized by a single-slot gate. A caller
//!   that finds a reconnect in flight waits for it and reports its outcome
//!   instead of starting a second one.
//! - The keep-alive task and the session event watcher hold only weak
//!   references and are stopped whenever the session is torn down.
//! - `disconnect()` cancels an in-flight connect loop.
//! - Waits for a session borrowed through `session()` are bounded by
//!   `operation_timeout`. A borrowed session counts as in use, not dead.

mod keepalive;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;

use self::keepalive::{KeepAlive, Probe};
use crate::backoff::worst_case_connect;
use crate::classify::{ErrorCategory, RecoveryStrategy, classify};
use crate::config::ManagerConfig;
use crate::profile::ProviderProfile;
use crate::session::{
    Connector, Credentials, Folder, ProtocolSession, SessionError, SessionEvent, SessionSettings,
};
use crate::{Error, Result};

/// Lifecycle state of the managed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No session.
    #[default]
    Disconnected,
    /// First connect loop running.
    Connecting,
    /// Session established and believed healthy.
    Connected,
    /// A probe failed or the session reported an error or close.
    Unhealthy,
    /// Connect loop running to replace an unhealthy session.
    Reconnecting,
}

impl ConnectionState {
    /// Returns true if a connect loop is running.
    #[must_use]
    pub const fn is_transitioning(self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Unhealthy => "unhealthy",
            Self::Reconnecting => "reconnecting",
        })
    }
}

/// Borrowed access to the live session.
///
/// While the guard is held, health probes treat the session as in use, and
/// reconnects, teardown and `list_folders()` wait for it for at most
/// `operation_timeout`. Drop it as soon as the protocol operation is done.
pub type SessionGuard<'a, S> = MappedMutexGuard<'a, S>;

/// Owns one protocol session and keeps it usable.
pub struct ConnectionManager<C: Connector> {
    inner: Arc<Inner<C>>,
}

struct Inner<C: Connector> {
    connector: C,
    profile: ProviderProfile,
    keep_alive_enabled: bool,
    session: Mutex<Option<C::Session>>,
    /// Bumped each time a new session is installed.
    generation: AtomicU64,
    /// Kept for reconnects; cleared on disconnect.
    credentials: StdMutex<Option<Credentials>>,
    state: watch::Sender<ConnectionState>,
    last_activity: StdMutex<Instant>,
    reconnect_gate: Mutex<()>,
    keep_alive: StdMutex<Option<KeepAlive>>,
    event_watcher: StdMutex<Option<JoinHandle<()>>>,
    /// Cancelled by `disconnect()` and replaced with a fresh token.
    cancel: StdMutex<CancellationToken>,
}

fn lock<T>(mutex: &StdMutex<T>) -> StdMutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<C: Connector> Inner<C> {
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "Connection state changed");
        }
    }

    fn mark_unhealthy(&self, reason: &str) {
        let flipped = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Unhealthy;
                true
            } else {
                false
            }
        });
        if flipped {
            tracing::warn!(reason, "Session marked unhealthy");
        }
    }

    fn mark_healthy(&self) {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Unhealthy {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        });
    }

    fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    fn credentials(&self) -> Option<Credentials> {
        lock(&self.credentials).clone()
    }

    fn has_credentials(&self) -> bool {
        lock(&self.credentials).is_some()
    }

    fn clear_credentials(&self) {
        lock(&self.credentials).take();
    }

    fn current_token(&self) -> CancellationToken {
        lock(&self.cancel).clone()
    }

    fn cancel_in_flight(&self) {
        let mut token = lock(&self.cancel);
        token.cancel();
        *token = CancellationToken::new();
    }

    fn stop_keep_alive(&self) {
        lock(&self.keep_alive).take();
    }

    fn stop_event_watcher(&self) {
        if let Some(handle) = lock(&self.event_watcher).take() {
            handle.abort();
        }
    }
}

impl<C: Connector> Drop for Inner<C> {
    fn drop(&mut self) {
        lock(&self.cancel).cancel();
        self.stop_event_watcher();
    }
}

impl<C: Connector> Probe for Weak<Inner<C>> {
    async fn probe(&self) -> Option<bool> {
        let manager = ConnectionManager {
            inner: self.upgrade()?,
        };
        if manager.state() != ConnectionState::Connected {
            // Recovery is caller-driven via ensure_connected().
            return Some(false);
        }
        Some(manager.check_health().await)
    }
}

impl<C: Connector> ConnectionManager<C> {
    /// Creates a manager from a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configured profile is invalid.
    pub fn new(connector: C, config: &ManagerConfig) -> Result<Self> {
        let profile = config.profile()?;
        Ok(Self::build(connector, profile, config.keep_alive))
    }

    /// Creates a manager with an explicit profile and keep-alive enabled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the profile is invalid.
    pub fn with_profile(connector: C, profile: ProviderProfile) -> Result<Self> {
        profile.validate()?;
        Ok(Self::build(connector, profile, true))
    }

    fn build(connector: C, profile: ProviderProfile, keep_alive_enabled: bool) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                connector,
                profile,
                keep_alive_enabled,
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
                credentials: StdMutex::new(None),
                state,
                last_activity: StdMutex::new(Instant::now()),
                reconnect_gate: Mutex::new(()),
                keep_alive: StdMutex::new(None),
                event_watcher: StdMutex::new(None),
                cancel: StdMutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Returns the effective profile.
    #[must_use]
    pub fn profile(&self) -> &ProviderProfile {
        &self.inner.profile
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Returns true if the session is established and believed healthy.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Time since the last successful interaction (connect, probe, LIST or
    /// [`update_activity`](Self::update_activity)).
    #[must_use]
    pub fn idle_time(&self) -> Duration {
        lock(&self.inner.last_activity).elapsed()
    }

    /// Records activity performed by a collaborator on the session.
    pub fn update_activity(&self) {
        self.inner.touch();
    }

    /// Borrows the live session for further protocol operations.
    ///
    /// Returns `None` when there is no session. See [`SessionGuard`].
    /// Reconnects and teardown wait at most `operation_timeout` for the
    /// guard to be dropped.
    pub async fn session(&self) -> Option<SessionGuard<'_, C::Session>> {
        MutexGuard::try_map(self.inner.session.lock().await, |slot| slot.as_mut()).ok()
    }

    /// Connects and authenticates, retrying transient failures with backoff.
    ///
    /// Makes up to `profile.max_retries` attempts, fewer if the failure's
    /// category allows fewer. Any previous session is torn down first.
    /// Use [`session`](Self::session) to borrow the new session.
    ///
    /// # Errors
    ///
    /// - [`Error::Authentication`] on the first rejected login
    /// - [`Error::CapacityExhausted`] once attempts run out
    /// - [`Error::Cancelled`] if `disconnect()` runs meanwhile
    /// - [`Error::Connection`] if the previous session stays borrowed
    pub async fn connect(&self, credentials: Credentials) -> Result<()> {
        let _gate = self.inner.reconnect_gate.lock().await;

        let previous = lock(&self.inner.credentials).replace(credentials.clone());
        let outcome = self
            .establish(&credentials, ConnectionState::Connecting)
            .await;
        if let Err(error) = &outcome {
            // A busy previous session is still in place, and so are its credentials.
            *lock(&self.inner.credentials) = if matches!(error, Error::Connection { .. }) {
                previous
            } else {
                None
            };
        }
        outcome
    }

    /// Makes sure the session is usable, reconnecting if needed.
    ///
    /// Probes the session; only if the probe fails does it re-run the
    /// connect loop with the stored credentials. If another caller is
    /// already reconnecting, waits for that attempt and reports its result.
    ///
    /// Returns false if `connect()` never succeeded, the manager was
    /// disconnected, or reconnection failed.
    pub async fn ensure_connected(&self) -> bool {
        let _gate = match self.inner.reconnect_gate.try_lock() {
            Ok(gate) => gate,
            Err(_) => return self.await_in_flight_reconnect().await,
        };

        if !self.inner.has_credentials() {
            tracing::debug!("ensure_connected called without an established session");
            return false;
        }

        if self.check_health().await {
            return true;
        }

        let Some(credentials) = self.inner.credentials() else {
            return false;
        };

        tracing::info!(host = %credentials.host, "Session unhealthy, reconnecting");
        match self
            .establish(&credentials, ConnectionState::Reconnecting)
            .await
        {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(%error, "Reconnect failed");
                if error.is_credential_problem() {
                    self.inner.clear_credentials();
                }
                false
            }
        }
    }

    async fn await_in_flight_reconnect(&self) -> bool {
        tracing::debug!("Reconnect already in flight, waiting for its outcome");
        let limit = reconnect_budget(&self.inner.profile);
        if timeout(limit, self.inner.reconnect_gate.lock()).await.is_err() {
            tracing::warn!(limit_ms = limit.as_millis(), "Gave up waiting for in-flight reconnect");
            return false;
        }
        self.is_connected()
    }

    /// Sends a NOOP, bounded by `operation_timeout`.
    ///
    /// Returns true iff it succeeded. A failure marks the session
    /// unhealthy; nothing is raised. A session currently borrowed through
    /// [`session`](Self::session) is not probed; the current state stands.
    pub async fn check_health(&self) -> bool {
        let Ok(mut slot) = self.inner.session.try_lock() else {
            tracing::trace!("Session in use, skipping health probe");
            return self.is_connected();
        };
        let Some(session) = slot.as_mut() else {
            return false;
        };

        let limit = self.inner.profile.operation_timeout;
        match timeout(limit, session.noop()).await {
            Ok(Ok(())) => {
                self.inner.touch();
                self.inner.mark_healthy();
                true
            }
            Ok(Err(error)) => {
                self.inner.mark_unhealthy(&error.to_string());
                false
            }
            Err(_) => {
                self.inner.mark_unhealthy("health probe timed out");
                false
            }
        }
    }

    /// Tears everything down. Safe to call from any state, any number of
    /// times.
    ///
    /// Cancels an in-flight connect loop, stops the keep-alive, logs out
    /// best-effort and forgets the credentials.
    ///
    /// If the session is still borrowed after `operation_timeout`, returns
    /// anyway; the logout then runs once the guard is dropped.
    pub async fn disconnect(&self) {
        self.inner.cancel_in_flight();
        if !self.teardown_session().await {
            self.inner.stop_keep_alive();
            self.inner.stop_event_watcher();
            self.defer_teardown();
        }
        self.inner.clear_credentials();
        self.inner.set_state(ConnectionState::Disconnected);
        tracing::info!("Disconnected");
    }

    /// Arms the periodic keep-alive probe at `profile.idle_timeout`.
    ///
    /// A failing probe marks the session unhealthy; it never reconnects on
    /// its own. Replaces any running keep-alive.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_keep_alive(&self) {
        let keep_alive = KeepAlive::spawn(self.inner.profile.idle_timeout, Arc::downgrade(&self.inner));
        if lock(&self.inner.keep_alive).replace(keep_alive).is_some() {
            tracing::debug!("Replaced running keep-alive");
        }
    }

    /// Disarms the keep-alive probe.
    pub fn stop_keep_alive(&self) {
        self.inner.stop_keep_alive();
    }

    /// Lists all folders, restoring the session first if necessary.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if `connect()` never succeeded
    /// - [`Error::Connection`] if the session cannot be restored, or stays
    ///   borrowed for longer than `operation_timeout`
    /// - [`Error::Session`] if LIST itself fails
    pub async fn list_folders(&self) -> Result<Vec<Folder>> {
        if !self.inner.has_credentials() {
            return Err(Error::NotConnected(
                "call connect() before listing folders".into(),
            ));
        }

        if !self.ensure_connected().await {
            return Err(Error::Connection {
                message: format!(
                    "the session is unhealthy and could not be re-established. {}",
                    ErrorCategory::Network.hint()
                ),
                source: None,
            });
        }

        let limit = self.inner.profile.operation_timeout;
        let Ok(mut slot) = timeout(limit, self.inner.session.lock()).await else {
            return Err(session_busy(limit));
        };
        let Some(session) = slot.as_mut() else {
            return Err(Error::NotConnected(
                "session was torn down before LIST could run".into(),
            ));
        };

        match timeout(limit, session.list()).await {
            Ok(Ok(folders)) => {
                self.inner.touch();
                tracing::debug!(count = folders.len(), "Listed folders");
                Ok(folders)
            }
            Ok(Err(error)) => {
                if error.is_transport() {
                    self.inner.mark_unhealthy(&error.to_string());
                }
                Err(Error::Session(error))
            }
            Err(_) => {
                self.inner.mark_unhealthy("LIST timed out");
                Err(Error::Session(SessionError::Timeout(limit)))
            }
        }
    }

    // === Private helpers ===

    /// The connect retry loop.
    async fn establish(&self, credentials: &Credentials, phase: ConnectionState) -> Result<()> {
        let profile = self.inner.profile;
        let cancel = self.inner.current_token();
        let settings = SessionSettings {
            credentials,
            connection_timeout: profile.connection_timeout,
            operation_timeout: profile.operation_timeout,
        };
        let mut attempt = 0_u32;

        loop {
            attempt += 1;
            self.inner.set_state(phase);
            if !self.teardown_session().await {
                self.inner.set_state(ConnectionState::Unhealthy);
                return Err(session_busy(profile.operation_timeout));
            }

            tracing::info!(
                attempt,
                max_attempts = profile.max_retries,
                host = %credentials.host,
                port = credentials.port,
                "Connecting"
            );

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                outcome = timeout(profile.connection_timeout, self.inner.connector.connect(&settings)) => Some(outcome),
            };

            let error = match outcome {
                None => return Err(self.cancelled()),
                Some(Ok(Ok(session))) => {
                    if !self.install(session, &cancel).await {
                        return Err(self.cancelled());
                    }
                    tracing::info!(attempt, host = %credentials.host, "Connected");
                    return Ok(());
                }
                Some(Ok(Err(error))) => error,
                Some(Err(_)) => SessionError::Timeout(profile.connection_timeout),
            };

            let category = classify(&error);
            let strategy = RecoveryStrategy::for_attempt(category, attempt, &profile);

            if !strategy.should_retry || attempt >= profile.max_retries {
                tracing::warn!(attempt, %category, %error, "Giving up on connection");
                self.inner.set_state(ConnectionState::Disconnected);
                return Err(terminal_error(category, attempt, error));
            }

            tracing::warn!(
                attempt,
                %category,
                %error,
                delay_ms = strategy.delay.as_millis(),
                "{}",
                strategy.user_message
            );

            let interrupted = tokio::select! {
                biased;
                () = cancel.cancelled() => true,
                () = tokio::time::sleep(strategy.delay) => false,
            };
            if interrupted {
                return Err(self.cancelled());
            }
        }
    }

    /// Stores a fresh session and arms its watchers. Returns false, and
    /// discards the session, if the connect loop was cancelled meanwhile.
    async fn install(&self, mut session: C::Session, cancel: &CancellationToken) -> bool {
        let events = session.take_events();
        let mut slot = self.inner.session.lock().await;

        if cancel.is_cancelled() {
            drop(slot);
            discard(session, self.inner.profile.operation_timeout).await;
            return false;
        }

        *slot = Some(session);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.touch();
        self.inner.set_state(ConnectionState::Connected);
        if let Some(events) = events {
            self.watch_events(events);
        }
        if self.inner.keep_alive_enabled {
            self.start_keep_alive();
        }
        true
    }

    /// Removes the current session, if any, and logs it out best-effort.
    ///
    /// Returns false, leaving the session in place, if it stays borrowed
    /// for longer than `operation_timeout`.
    async fn teardown_session(&self) -> bool {
        let limit = self.inner.profile.operation_timeout;
        let Ok(mut slot) = timeout(limit, self.inner.session.lock()).await else {
            tracing::warn!(limit_ms = limit.as_millis(), "Session still borrowed, cannot tear it down");
            return false;
        };
        let previous = slot.take();
        self.inner.stop_keep_alive();
        self.inner.stop_event_watcher();
        drop(slot);

        if let Some(session) = previous {
            discard(session, limit).await;
        }
        true
    }

    /// Logs out the current session once its borrower lets go, unless a
    /// newer session has replaced it by then.
    fn defer_teardown(&self) {
        let inner = Arc::clone(&self.inner);
        let generation = inner.generation.load(Ordering::SeqCst);
        tracing::debug!("Session borrowed during disconnect, deferring logout");
        tokio::spawn(async move {
            let mut slot = inner.session.lock().await;
            if inner.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            let Some(session) = slot.take() else {
                return;
            };
            drop(slot);
            discard(session, inner.profile.operation_timeout).await;
        });
    }

    fn watch_events(&self, mut events: UnboundedReceiver<SessionEvent>) {
        let inner = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                match event {
                    SessionEvent::Error(message) => inner.mark_unhealthy(&message),
                    SessionEvent::Closed => inner.mark_unhealthy("session closed by peer"),
                }
            }
        });
        if let Some(previous) = lock(&self.inner.event_watcher).replace(handle) {
            previous.abort();
        }
    }

    fn cancelled(&self) -> Error {
        tracing::info!("Connect loop cancelled by disconnect");
        self.inner.set_state(ConnectionState::Disconnected);
        Error::Cancelled
    }
}

/// Logs a session out, ignoring failures.
async fn discard<S: ProtocolSession>(mut session: S, limit: Duration) {
    match timeout(limit, session.logout()).await {
        Ok(Ok(())) => tracing::debug!("Previous session logged out"),
        Ok(Err(error)) => tracing::debug!(%error, "Ignoring logout failure during teardown"),
        Err(_) => tracing::debug!(limit_ms = limit.as_millis(), "Logout timed out during teardown"),
    }
}

/// How long a caller waits for someone else's reconnect.
///
/// The reconnecting caller may spend one `operation_timeout` on the health
/// probe, one waiting for a borrowed session and one logging it out, then a
/// full connect loop.
fn reconnect_budget(profile: &ProviderProfile) -> Duration {
    worst_case_connect(profile).saturating_add(profile.operation_timeout.saturating_mul(3))
}

fn session_busy(limit: Duration) -> Error {
    Error::Connection {
        message: format!(
            "the session stayed borrowed for {limit:?}. Drop the guard returned by session() \
             before reconnecting or listing folders."
        ),
        source: Some(SessionError::Timeout(limit)),
    }
}

fn terminal_error(category: ErrorCategory, attempts: u32, source: SessionError) -> Error {
    let message = format!("{source}. {}", category.hint());
    match category {
        ErrorCategory::Authentication => Error::Authentication { message, source },
        _ => Error::CapacityExhausted {
            attempts,
            category,
            message,
            source,
        },
    }
}

impl<C: Connector> Clone for ConnectionManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("profile", &self.inner.profile)
            .field("idle_time", &self.idle_time())
            .finish_non_exhaustive()
    }
}
