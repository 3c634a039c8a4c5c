use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::jid::Jid;
use crate::store::AuthState;
use crate::types::events::EventEmitter;
use crate::types::message::GroupMetadata;

/// Options handed to the protocol library when a socket is created.
#[derive(Clone)]
pub struct SocketConfig {
    pub auth: AuthState,
    pub print_qr_in_terminal: bool,
    /// Chats for which the socket should not emit events at all.
    pub ignore_jid: fn(&str) -> bool,
}

impl SocketConfig {
    pub fn should_ignore_jid(&self, jid: &str) -> bool {
        (self.ignore_jid)(jid)
    }
}

impl fmt::Debug for SocketConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketConfig")
            .field("auth", &self.auth)
            .field("print_qr_in_terminal", &self.print_qr_in_terminal)
            .finish_non_exhaustive()
    }
}

/// A live protocol session. Framing, encryption and the handshake all live
/// behind this trait.
#[async_trait]
pub trait Socket: Send + Sync {
    /// The emitter on which the socket publishes everything it observes.
    fn events(&self) -> &EventEmitter;

    /// Closes the underlying transport.
    async fn close(&self);

    /// Unlinks this device from the account.
    async fn logout(&self) -> Result<(), anyhow::Error>;

    async fn group_metadata(&self, jid: &Jid) -> Result<GroupMetadata, anyhow::Error>;
}

/// Creates sockets; one per connection attempt.
#[async_trait]
pub trait SocketFactory: Send + Sync {
    async fn create_socket(&self, config: SocketConfig) -> Result<Arc<dyn Socket>, anyhow::Error>;
}
