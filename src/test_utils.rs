use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::client::Client;
use crate::jid::Jid;
use crate::socket::{Socket, SocketConfig, SocketFactory};
use crate::types::events::{EventEmitter, EventKind, SocketEvent};
use crate::types::message::{GroupMetadata, GroupParticipant, Incoming};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn group_metadata(id: &str, subject: &str) -> GroupMetadata {
    GroupMetadata {
        id: id.to_string(),
        subject: subject.to_string(),
        owner: Some("5511999999999@s.whatsapp.net".to_string()),
        creation: Some(1_700_000_000),
        participants: vec![GroupParticipant {
            id: "5511999999999@s.whatsapp.net".to_string(),
            admin: Some("superadmin".to_string()),
        }],
    }
}

/// A socket whose events are driven by the test.
#[derive(Default)]
pub struct MockSocket {
    events: EventEmitter,
    groups: DashMap<String, GroupMetadata>,
    closed: AtomicBool,
    logouts: AtomicU32,
}

impl MockSocket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_group(&self, metadata: GroupMetadata) {
        self.groups.insert(metadata.id.clone(), metadata);
    }

    pub fn emit(&self, event: SocketEvent) -> usize {
        self.events.emit(&event)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self) -> u32 {
        self.logouts.load(Ordering::SeqCst)
    }

    /// Simulates a socket that stops reporting connection updates.
    pub fn drop_connection_listeners(&self) {
        self.events.remove_all_listeners(EventKind::ConnectionUpdate);
    }

    pub fn total_listeners(&self) -> usize {
        EventKind::ALL
            .iter()
            .map(|kind| self.events.listener_count(*kind))
            .sum()
    }

    /// Yields until the session has subscribed to connection updates.
    pub async fn wait_for_listeners(&self) {
        for _ in 0..10_000 {
            if self.events.listener_count(EventKind::ConnectionUpdate) > 0 {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("session never subscribed to connection updates");
    }
}

#[async_trait]
impl Socket for MockSocket {
    fn events(&self) -> &EventEmitter {
        &self.events
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    async fn logout(&self) -> Result<(), anyhow::Error> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn group_metadata(&self, jid: &Jid) -> Result<GroupMetadata, anyhow::Error> {
        self.groups
            .get(&jid.to_string())
            .map(|m| m.value().clone())
            .ok_or_else(|| anyhow::anyhow!("item-not-found: {jid}"))
    }
}

/// Hands every created socket to the test through a channel.
pub struct MockSocketFactory {
    sockets: mpsc::UnboundedSender<Arc<MockSocket>>,
    configs: Mutex<Vec<SocketConfig>>,
    failures_left: AtomicU32,
}

impl MockSocketFactory {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Arc<MockSocket>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                sockets: tx,
                configs: Mutex::new(Vec::new()),
                failures_left: AtomicU32::new(0),
            },
            rx,
        )
    }

    /// The next `n` calls to `create_socket` fail.
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn configs(&self) -> Vec<SocketConfig> {
        self.configs.lock().expect("mutex poisoned").clone()
    }
}

#[async_trait]
impl SocketFactory for MockSocketFactory {
    async fn create_socket(&self, config: SocketConfig) -> Result<Arc<dyn Socket>, anyhow::Error> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(anyhow::anyhow!("dial failed"));
        }
        self.configs.lock().expect("mutex poisoned").push(config);
        let socket = Arc::new(MockSocket::new());
        let _ = self.sockets.send(socket.clone());
        Ok(socket)
    }
}

/// A client that records everything it is given.
pub struct RecordingClient {
    phone: String,
    batches: tokio::sync::Mutex<Vec<Vec<Incoming>>>,
    statuses: tokio::sync::Mutex<Vec<String>>,
    fail_receive: bool,
}

impl RecordingClient {
    pub fn new(phone: &str) -> Self {
        Self {
            phone: phone.to_string(),
            batches: tokio::sync::Mutex::new(Vec::new()),
            statuses: tokio::sync::Mutex::new(Vec::new()),
            fail_receive: false,
        }
    }

    pub fn failing_receive(mut self) -> Self {
        self.fail_receive = true;
        self
    }

    pub async fn batches(&self) -> Vec<Vec<Incoming>> {
        self.batches.lock().await.clone()
    }

    pub async fn received(&self) -> Vec<Incoming> {
        self.batches.lock().await.iter().flatten().cloned().collect()
    }

    pub async fn statuses(&self) -> Vec<String> {
        self.statuses.lock().await.clone()
    }
}

#[async_trait]
impl Client for RecordingClient {
    fn phone(&self) -> &str {
        &self.phone
    }

    async fn receive(&self, messages: Vec<Incoming>) -> Result<(), anyhow::Error> {
        self.batches.lock().await.push(messages);
        if self.fail_receive {
            return Err(anyhow::anyhow!("receiver unavailable"));
        }
        Ok(())
    }

    async fn send_status(&self, message: &str) -> Result<(), anyhow::Error> {
        self.statuses.lock().await.push(message.to_string());
        Ok(())
    }
}
