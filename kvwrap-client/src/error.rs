//! # Error Types
//!
//! Every fallible call in the crate returns [`WrapperResult`]. Failures are
//! never retried internally; they propagate to the immediate caller, who can
//! branch on [`WrapperError::kind`] to tell transport trouble apart from
//! conversion or liveness problems.

use thiserror::Error;

/// Result type used throughout the client.
pub type WrapperResult<T> = Result<T, WrapperError>;

/// Errors surfaced by the wrapper, its pool, and the RESP codec.
#[derive(Debug, Error)]
pub enum WrapperError {
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// RESP framing or parse error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server answered with an error reply.
    #[error("server error: {0}")]
    Server(String),

    /// Reply could not be converted to the requested type.
    #[error("cannot convert {reply} to {target}")]
    Conversion { target: &'static str, reply: String },

    /// Reply was nil where a value was required (the key is absent).
    #[error("nil reply")]
    Nil,

    /// Command succeeded at the transport level but the reply was not the
    /// acknowledgement the operation expects.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// PING answered with something other than the liveness token.
    #[error("server responded with {0}")]
    LivenessMismatch(String),

    /// Pool is at capacity and no idle connections are available.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Waited for a free connection slot until the deadline passed.
    #[error("timed out waiting for a pooled connection")]
    PoolTimeout,

    /// Pool was closed; no further connections are handed out.
    #[error("connection pool closed")]
    PoolClosed,

    /// Dialing a new connection failed.
    #[error("dial {addr} failed: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Address could not be resolved into a socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Configuration rejected before any connection was made.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Coarse classification of a [`WrapperError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The pool could not supply a connection.
    Connection,
    /// Transmission or reply parsing failed.
    Network,
    /// The server rejected the command.
    Server,
    /// The reply did not fit the requested type (including nil).
    Conversion,
    /// A well-formed reply was not the expected acknowledgement.
    Liveness,
    /// The wrapper was misconfigured.
    Config,
}

impl WrapperError {
    /// Returns the taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WrapperError::Io(_) | WrapperError::Protocol(_) => ErrorKind::Network,
            WrapperError::Server(_) => ErrorKind::Server,
            WrapperError::Conversion { .. } | WrapperError::Nil => ErrorKind::Conversion,
            WrapperError::UnexpectedReply(_) | WrapperError::LivenessMismatch(_) => {
                ErrorKind::Liveness
            }
            WrapperError::PoolExhausted
            | WrapperError::PoolTimeout
            | WrapperError::PoolClosed
            | WrapperError::Dial { .. }
            | WrapperError::InvalidAddress(_) => ErrorKind::Connection,
            WrapperError::Config(_) => ErrorKind::Config,
        }
    }

    /// True when the failure happened on the wire and the connection that
    /// produced it must not be reused.
    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Network
    }

    pub(crate) fn conversion(target: &'static str, reply: impl Into<String>) -> Self {
        WrapperError::Conversion {
            target,
            reply: reply.into(),
        }
    }
}
