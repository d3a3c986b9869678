//! Error types for keel

use std::fmt;

/// Unified error type for all keel operations
#[derive(Debug)]
pub enum KeelError {
    /// I/O error
    Io(std::io::Error),

    /// Configuration error
    Config(String),

    /// Protocol error (malformed or unexpected wire data)
    Protocol(String),

    /// Security error (rejected secret material, invalid keys)
    Security(String),

    /// Key exchange failed (bad DH value, unverifiable host signature, missing algorithm)
    KeyExchange(String),

    /// Peer speaks a protocol version we do not support
    UnsupportedVersion(String),

    /// Received packet carried a MAC that does not match its contents
    MacMismatch {
        /// Inbound sequence number of the offending packet
        sequence: u32,
    },

    /// Outbound channel data would exceed the peer's window or maximum packet size
    WindowExceeded {
        /// Bytes the caller tried to send
        requested: usize,
        /// Bytes the peer currently allows
        available: usize,
    },

    /// User authentication was rejected too many times
    AuthenticationFailed(String),

    /// Peer sent SSH_MSG_DISCONNECT
    Disconnected {
        /// Numeric disconnect reason code
        reason: u32,
        /// Human-readable description supplied by the peer
        description: String,
    },

    /// The transport is closed
    ConnectionClosed,

    /// Other error
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl KeelError {
    /// Numeric SSH disconnect reason to send to the peer for this error.
    ///
    /// Returns `None` when no DISCONNECT should be sent, either because the
    /// peer already left or because the transport is gone.
    pub fn disconnect_reason(&self) -> Option<u32> {
        match self {
            KeelError::Protocol(_) => Some(2),
            KeelError::KeyExchange(_) => Some(3),
            KeelError::MacMismatch { .. } => Some(5),
            KeelError::UnsupportedVersion(_) => Some(8),
            KeelError::AuthenticationFailed(_) => Some(14),
            KeelError::Security(_) | KeelError::Config(_) | KeelError::Other(_) => Some(11),
            KeelError::WindowExceeded { .. } => None,
            KeelError::Io(_) | KeelError::Disconnected { .. } | KeelError::ConnectionClosed => {
                None
            }
        }
    }
}

impl fmt::Display for KeelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeelError::Io(e) => write!(f, "IO error: {}", e),
            KeelError::Config(msg) => write!(f, "Configuration error: {}", msg),
            KeelError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            KeelError::Security(msg) => write!(f, "Security error: {}", msg),
            KeelError::KeyExchange(msg) => write!(f, "Key exchange failed: {}", msg),
            KeelError::UnsupportedVersion(v) => write!(f, "Unsupported protocol version: {}", v),
            KeelError::MacMismatch { sequence } => {
                write!(f, "MAC verification failed for packet {}", sequence)
            }
            KeelError::WindowExceeded {
                requested,
                available,
            } => write!(
                f,
                "Channel window exceeded: {} bytes requested, {} available",
                requested, available
            ),
            KeelError::AuthenticationFailed(msg) => write!(f, "Authentication failed: {}", msg),
            KeelError::Disconnected {
                reason,
                description,
            } => write!(f, "Disconnected by peer (reason {}): {}", reason, description),
            KeelError::ConnectionClosed => write!(f, "Connection closed"),
            KeelError::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for KeelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KeelError::Io(e) => Some(e),
            KeelError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for KeelError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe => KeelError::ConnectionClosed,
            _ => KeelError::Io(err),
        }
    }
}

/// Result type for keel operations
pub type KeelResult<T> = Result<T, KeelError>;
