use thiserror::Error;

use crate::app::event::NetId;

/// Failures surfaced by the client core.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TLS server name {0:?}")]
    InvalidServerName(String),

    #[error("TLS handshake with {address} failed: {source}")]
    Tls {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("authentication failed on {net_id} ({numeric}): {reason}")]
    AuthenticationFailed {
        net_id: NetId,
        numeric: String,
        reason: String,
    },

    #[error("connection {net_id} lost and reconnection is disabled: {reason}")]
    ConnectionLost { net_id: NetId, reason: String },

    #[error("gave up reconnecting {net_id} after {attempts} attempts")]
    ReconnectExhausted { net_id: NetId, attempts: u32 },

    #[error("message is {len} bytes, limit is {max}")]
    MessageTooLong { len: usize, max: usize },

    #[error("no connection named {0}")]
    UnknownNetwork(String),
}

impl ClientError {
    /// Process exit status for a fatal error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ClientError::ConnectionLost { .. } | ClientError::ReconnectExhausted { .. } => 2,
            _ => 1,
        }
    }
}
