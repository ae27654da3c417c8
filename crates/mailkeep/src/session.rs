//! The protocol-session seam.
//!
//! The wire protocol is not implemented here. A [`Connector`] opens and
//! authenticates a [`ProtocolSession`]; the connection manager only drives
//! the policy around it (timeouts, retries, probes, teardown).

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use zeroize::Zeroizing;

/// Errors reported by the protocol-session layer.
#[derive(Debug, Error)]
pub enum SessionError {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation timed out.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Server answered NO or BAD.
    #[error("Server rejected command: {0}")]
    Rejected(String),

    /// Server sent BYE or the stream closed.
    #[error("Connection closed: {0}")]
    Closed(String),

    /// The request was malformed on the client side.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Anything else the session layer wants to report.
    #[error("{0}")]
    Other(String),
}

impl SessionError {
    /// Returns true if the failure means the transport itself is gone or
    /// stuck, as opposed to the server refusing one command.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Timeout(_) | Self::Closed(_))
    }
}

/// Asynchronous notifications pushed by a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The transport reported an error outside of any command.
    Error(String),
    /// The server or the transport closed the session.
    Closed,
}

/// A mailbox as returned by LIST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    /// Full path including hierarchy.
    pub path: String,
    /// Hierarchy delimiter, if the server reported one.
    pub delimiter: Option<char>,
}

impl Folder {
    /// Creates a folder entry.
    #[must_use]
    pub fn new(path: impl Into<String>, delimiter: Option<char>) -> Self {
        Self {
            path: path.into(),
            delimiter,
        }
    }

    /// Returns the last hierarchy segment of the path.
    #[must_use]
    pub fn name(&self) -> &str {
        match self.delimiter {
            Some(delimiter) => self
                .path
                .rsplit(delimiter)
                .next()
                .unwrap_or(&self.path),
            None => &self.path,
        }
    }
}

/// Login details for one account.
///
/// The secret is wiped from memory when the value is dropped and is never
/// shown by `Debug`.
#[derive(Clone)]
pub struct Credentials {
    /// Account address, used as the IMAP username.
    pub address: String,
    secret: Zeroizing<String>,
    /// Server hostname.
    pub host: String,
    /// Server port (default: 993).
    pub port: u16,
    /// Whether to use implicit TLS.
    pub use_tls: bool,
}

impl Credentials {
    /// Creates credentials for implicit TLS on port 993.
    #[must_use]
    pub fn new(
        address: impl Into<String>,
        secret: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            secret: Zeroizing::new(secret.into()),
            host: host.into(),
            port: 993,
            use_tls: true,
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enables or disables implicit TLS.
    #[must_use]
    pub const fn use_tls(mut self, enabled: bool) -> Self {
        self.use_tls = enabled;
        self
    }

    /// Returns the secret. Do not log or store the result.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("address", &self.address)
            .field("secret", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_tls", &self.use_tls)
            .finish()
    }
}

/// Everything a connector needs for one connect attempt.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings<'a> {
    /// Login details.
    pub credentials: &'a Credentials,
    /// Budget for the whole attempt. The manager enforces it as well.
    pub connection_timeout: Duration,
    /// Budget the session should apply to single commands.
    pub operation_timeout: Duration,
}

/// Opens authenticated sessions.
pub trait Connector: Send + Sync + 'static {
    /// The session type produced by this connector.
    type Session: ProtocolSession;

    /// Connects to the server and authenticates.
    fn connect(
        &self,
        settings: &SessionSettings<'_>,
    ) -> impl Future<Output = Result<Self::Session, SessionError>> + Send;
}

/// A live, authenticated protocol session.
pub trait ProtocolSession: Send + 'static {
    /// Sends NOOP.
    fn noop(&mut self) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Lists all mailboxes.
    fn list(&mut self) -> impl Future<Output = Result<Vec<Folder>, SessionError>> + Send;

    /// Sends LOGOUT.
    fn logout(&mut self) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Hands over the receiving end of the session's event channel.
    ///
    /// Called once, right after the session is established. Sessions that
    /// do not push events return `None`.
    fn take_events(&mut self) -> Option<UnboundedReceiver<SessionEvent>> {
        None
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

    #[test]
    fn test_credentials_defaults() {
        let creds = Credentials::new("user@example.com", "hunter2", "imap.example.com");
        assert_eq!(creds.port, 993);
        assert!(creds.use_tls);
        assert_eq!(creds.secret(), "hunter2");

        let plain = creds.port(143).use_tls(false);
        assert_eq!(plain.port, 143);
        assert!(!plain.use_tls);
    }

    #[test]
    fn test_credentials_debug_hides_secret() {
        let creds = Credentials::new("user@example.com", "hunter2", "imap.example.com");
        let debug = format!("{creds:?}");
        assert!(debug.contains("user@example.com"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_folder_name() {
        assert_eq!(Folder::new("Work/Projects/2024", Some('/')).name(), "2024");
        assert_eq!(Folder::new("INBOX", Some('.')).name(), "INBOX");
        assert_eq!(Folder::new("[Gmail]/Sent Mail", None).name(), "[Gmail]/Sent Mail");
    }

    #[test]
    fn test_transport_errors() {
        assert!(SessionError::Timeout(Duration::from_secs(1)).is_transport());
        assert!(SessionError::Closed("BYE".into()).is_transport());
        assert!(!SessionError::Rejected("NO mailbox".into()).is_transport());
        assert!(!SessionError::InvalidInput("empty host".into()).is_transport());
    }
}
