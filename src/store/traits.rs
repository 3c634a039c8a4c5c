use async_trait::async_trait;
use std::sync::Arc;

use crate::jid::Jid;
use crate::socket::Socket;
use crate::types::events::EventEmitter;
use crate::types::message::GroupMetadata;

/// Persisted authentication state, opaque to this crate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthState {
    pub creds: serde_json::Value,
}

impl AuthState {
    /// Nothing stored yet, so the socket will ask for QR pairing.
    pub fn is_empty(&self) -> bool {
        self.creds.is_null()
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn save_creds(&self, creds: &serde_json::Value) -> Result<(), anyhow::Error>;
}

/// Keeps chat data in sync with a socket's event stream.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Registers whatever listeners the store needs on the socket's emitter.
    fn bind(&self, events: &EventEmitter);

    async fn fetch_group_metadata(
        &self,
        jid: &Jid,
        socket: &dyn Socket,
    ) -> Result<GroupMetadata, anyhow::Error>;
}

/// Everything needed to start a session for one phone number.
#[derive(Clone)]
pub struct StoreBundle {
    pub state: AuthState,
    pub creds: Arc<dyn CredentialStore>,
    pub data_store: Arc<dyn DataStore>,
}

#[async_trait]
pub trait StoreFactory: Send + Sync {
    async fn open(&self, phone: &str) -> Result<StoreBundle, anyhow::Error>;
}
