use async_trait::async_trait;
use dashmap::DashMap;
use log::debug;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;

use crate::jid::Jid;
use crate::socket::Socket;
use crate::store::traits::*;
use crate::types::events::{EventEmitter, EventKind, SocketEvent};
use crate::types::message::{GroupMetadata, MessageKey, WebMessage};

#[derive(Default)]
pub struct MemoryCredentialStore {
    creds: RwLock<serde_json::Value>,
    saves: AtomicU32,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self) -> serde_json::Value {
        self.creds.read().await.clone()
    }

    pub fn save_count(&self) -> u32 {
        self.saves.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn save_creds(&self, creds: &serde_json::Value) -> Result<(), anyhow::Error> {
        let mut current = self.creds.write().await;
        // Updates are partial; merge objects key by key.
        match (&mut *current, creds) {
            (serde_json::Value::Object(existing), serde_json::Value::Object(update)) => {
                for (k, v) in update {
                    existing.insert(k.clone(), v.clone());
                }
            }
            (slot, _) => *slot = creds.clone(),
        }
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

type ChatMessages = DashMap<String, VecDeque<WebMessage>>;

/// Messages kept per chat unless configured otherwise.
pub const DEFAULT_HISTORY_PER_CHAT: usize = 500;

/// Keeps the latest upserted messages per chat, dropping deleted ones.
///
/// Each chat holds at most `history_limit` messages; the oldest are evicted
/// first. The number of chats is not bounded.
#[derive(Clone)]
pub struct MemoryDataStore {
    messages: Arc<ChatMessages>,
    history_limit: usize,
}

impl Default for MemoryDataStore {
    fn default() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_PER_CHAT)
    }
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            messages: Arc::new(DashMap::new()),
            history_limit: history_limit.max(1),
        }
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub fn messages(&self, chat: &str) -> Vec<WebMessage> {
        self.messages
            .get(chat)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn load_message(&self, key: &MessageKey) -> Option<WebMessage> {
        self.messages
            .get(&key.remote_jid)?
            .iter()
            .find(|m| m.key.id == key.id)
            .cloned()
    }

    fn record(messages: &ChatMessages, history_limit: usize, event: &SocketEvent) {
        match event {
            SocketEvent::MessagesUpsert(upsert) => {
                for msg in &upsert.messages {
                    let mut chat = messages.entry(msg.key.remote_jid.clone()).or_default();
                    match chat.iter_mut().find(|m| m.key.id == msg.key.id) {
                        Some(existing) => *existing = msg.clone(),
                        None => {
                            if chat.len() >= history_limit {
                                chat.pop_front();
                            }
                            chat.push_back(msg.clone());
                        }
                    }
                }
            }
            SocketEvent::MessagesDelete(delete) => {
                for key in &delete.keys {
                    if let Some(mut chat) = messages.get_mut(&key.remote_jid) {
                        chat.retain(|m| m.key.id != key.id);
                    }
                }
            }
            _ => {}
        }
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    fn bind(&self, events: &EventEmitter) {
        for kind in [EventKind::MessagesUpsert, EventKind::MessagesDelete] {
            let messages = self.messages.clone();
            let history_limit = self.history_limit;
            events.on(kind, move |event: &SocketEvent| {
                MemoryDataStore::record(&messages, history_limit, event)
            });
        }
    }

    async fn fetch_group_metadata(
        &self,
        jid: &Jid,
        socket: &dyn Socket,
    ) -> Result<GroupMetadata, anyhow::Error> {
        debug!(target: "Store/Memory", "Fetching group metadata for {jid}");
        socket.group_metadata(jid).await
    }
}

struct PhoneStores {
    creds: Arc<MemoryCredentialStore>,
    data_store: Arc<MemoryDataStore>,
}

/// Hands out one credential store and one data store per phone, reused
/// across reconnects so saved credentials carry over.
#[derive(Default)]
pub struct MemoryStoreFactory {
    phones: DashMap<String, PhoneStores>,
}

impl MemoryStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credentials(&self, phone: &str) -> Option<Arc<MemoryCredentialStore>> {
        self.phones.get(phone).map(|s| s.creds.clone())
    }

    pub fn data_store(&self, phone: &str) -> Option<Arc<MemoryDataStore>> {
        self.phones.get(phone).map(|s| s.data_store.clone())
    }
}

#[async_trait]
impl StoreFactory for MemoryStoreFactory {
    async fn open(&self, phone: &str) -> Result<StoreBundle, anyhow::Error> {
        let (creds, data_store) = {
            let stores = self
                .phones
                .entry(phone.to_string())
                .or_insert_with(|| PhoneStores {
                    creds: Arc::new(MemoryCredentialStore::new()),
                    data_store: Arc::new(MemoryDataStore::new()),
                });
            (stores.creds.clone(), stores.data_store.clone())
        };

        Ok(StoreBundle {
            state: AuthState {
                creds: creds.current().await,
            },
            creds,
            data_store,
        })
    }
}
