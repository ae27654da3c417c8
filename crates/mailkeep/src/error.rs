//! Error types for the connection layer.

use thiserror::Error;

use crate::classify::ErrorCategory;
use crate::session::SessionError;

/// Errors surfaced by the connection manager.
///
/// Failures inside a single connect attempt never escape on their own; they
/// are classified and either retried or turned into one of these variants.
#[derive(Debug, Error)]
pub enum Error {
    /// The server rejected the credentials. Retrying will not help.
    #[error("Authentication failed: {message}")]
    Authentication {
        /// Technical cause followed by a remediation hint.
        message: String,
        /// The failure reported by the session layer.
        #[source]
        source: SessionError,
    },

    /// The session is unusable and could not be restored.
    #[error("Connection failed: {message}")]
    Connection {
        /// Technical cause followed by a remediation hint.
        message: String,
        /// The underlying failure, when one was observed.
        #[source]
        source: Option<SessionError>,
    },

    /// Every allowed attempt for the failure's category was used up.
    #[error("Gave up after {attempts} attempt(s): {message}")]
    CapacityExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Category of the last failure.
        category: ErrorCategory,
        /// Technical cause followed by a remediation hint.
        message: String,
        /// The last failure reported by the session layer.
        #[source]
        source: SessionError,
    },

    /// Operation attempted before `connect()` or after `disconnect()`.
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// `disconnect()` interrupted an in-flight connect loop.
    #[error("Connection attempt cancelled by disconnect")]
    Cancelled,

    /// Invalid profile or configuration values.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A configuration document could not be parsed.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A protocol operation failed on an otherwise healthy session.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

impl Error {
    /// Returns true if the error is final for the current credentials.
    ///
    /// Callers should prompt for new credentials instead of retrying.
    #[must_use]
    pub const fn is_credential_problem(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
