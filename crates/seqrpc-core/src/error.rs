//! Error types for seqrpc.
//!
//! `RpcError` covers everything a caller of this crate can observe: transport
//! failures, undecodable frames, faults reported by the remote service and
//! local configuration problems.

use crate::protocol::FaultKind;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the seqrpc library.
#[derive(Debug, Error)]
pub enum RpcError {
    // Connection errors
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Malformed frame: {message}")]
    MalformedFrame { message: String },

    #[error("Connection closed")]
    Closed,

    // Call errors
    #[error("Remote error ({kind}): {message}")]
    Remote { kind: FaultKind, message: String },

    #[error("Deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    // Server-side errors
    #[error("Worker pool is shut down")]
    PoolClosed,

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for seqrpc operations.
pub type Result<T> = std::result::Result<T, RpcError>;

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::Transport {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::MalformedFrame {
            message: err.to_string(),
        }
    }
}

impl RpcError {
    /// Create a transport error that has no underlying I/O error.
    pub fn transport(message: impl Into<String>) -> Self {
        RpcError::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a malformed-frame error.
    pub fn malformed(message: impl Into<String>) -> Self {
        RpcError::MalformedFrame {
            message: message.into(),
        }
    }

    /// Whether the connection this error was observed on is unusable afterwards.
    ///
    /// Remote faults and deadlines affect a single call only.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            RpcError::Transport { .. } | RpcError::MalformedFrame { .. } | RpcError::Closed
        )
    }

    /// The remote fault kind, if this error was reported by the server.
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            RpcError::Remote { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
