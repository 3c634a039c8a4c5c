use thiserror::Error;

use crate::types::events::DisconnectReason;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to open session store: {0}")]
    Store(#[source] anyhow::Error),
    #[error("failed to create socket: {0}")]
    Socket(#[source] anyhow::Error),
    #[error("QR code was generated {max} times without being scanned")]
    QrAttemptsExceeded { max: u32 },
    #[error("session was logged out: {reason}")]
    LoggedOut { reason: DisconnectReason },
    #[error("gave up after {attempts} reconnect attempts")]
    ReconnectExhausted { attempts: u32 },
    #[error("a connection for {0} is already in progress")]
    AlreadyConnecting(String),
    #[error("socket stopped reporting connection updates")]
    EventsClosed,
    #[error("session was closed while reconnecting")]
    Closed,
}

impl ConnectError {
    /// Whether calling `connect` again later could succeed without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectError::Store(_)
                | ConnectError::Socket(_)
                | ConnectError::ReconnectExhausted { .. }
                | ConnectError::EventsClosed
        )
    }
}
