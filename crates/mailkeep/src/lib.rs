//! # mailkeep
//!
//! Keeps an authenticated IMAP session alive for the rest of the client.
//!
//! The wire protocol lives behind the [`Connector`] and [`ProtocolSession`]
//! traits; this crate is the policy layer around them:
//!
//! - **Provider profiles**: per-provider timeout and retry tuning, with
//!   per-field overrides
//! - **Failure classification**: authentication failures stop immediately,
//!   transport failures are retried
//! - **Exponential backoff**: deterministic, capped delays between attempts
//! - **Connection state machine**: connect, keep-alive probing, guarded
//!   reconnect and teardown
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailkeep::{ConnectionManager, Credentials, ManagerConfig, ProviderTag};
//!
//! let config = ManagerConfig::builder()
//!     .provider(ProviderTag::Gmail)
//!     .build();
//! let manager = ConnectionManager::new(my_connector, &config)?;
//!
//! let credentials = Credentials::new("user@gmail.com", "app-password", "imap.gmail.com");
//! manager.connect(credentials).await?;
//!
//! // Later, from any task holding a clone of the manager:
//! for folder in manager.list_folders().await? {
//!     println!("{}", folder.path);
//! }
//!
//! manager.disconnect().await;
//! ```
//!
//! ## Connection States
//!
//! ```text
//! Disconnected ── connect() ──→ Connecting ── success ──→ Connected
//!      ▲                            │                        │
//!      └── auth failure / exhausted ┘          probe fails / close event
//!                                                            ▼
//!   Connected ←── success ── Reconnecting ←── ensure_connected() ── Unhealthy
//! ```
//!
//! `disconnect()` returns to `Disconnected` from any state.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod backoff;
pub mod classify;
pub mod config;
pub mod connection;
mod error;
pub mod profile;
pub mod session;

pub use backoff::{Backoff, delay_for, worst_case_connect};
pub use classify::{ErrorCategory, RecoveryStrategy, classify};
pub use config::{ManagerConfig, ManagerConfigBuilder};
pub use connection::{ConnectionManager, ConnectionState, SessionGuard};
pub use error::{Error, Result};
pub use profile::{ProfileOverrides, ProviderProfile, ProviderTag};
pub use session::{
    Connector, Credentials, Folder, ProtocolSession, SessionError, SessionEvent, SessionSettings,
};
