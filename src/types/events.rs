use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use super::message::{MessageKey, MessageUpdate, ReceiptUpdate, WebMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Close,
}

/// Status codes the server (or the socket) attaches to a closed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisconnectReason {
    LoggedOut,
    Forbidden,
    ConnectionLost,
    MultideviceMismatch,
    ConnectionClosed,
    ConnectionReplaced,
    BadSession,
    UnavailableService,
    RestartRequired,
    Unknown(i32),
}

impl From<i32> for DisconnectReason {
    fn from(code: i32) -> Self {
        match code {
            401 => Self::LoggedOut,
            403 => Self::Forbidden,
            408 => Self::ConnectionLost,
            411 => Self::MultideviceMismatch,
            428 => Self::ConnectionClosed,
            440 => Self::ConnectionReplaced,
            500 => Self::BadSession,
            503 => Self::UnavailableService,
            515 => Self::RestartRequired,
            _ => Self::Unknown(code),
        }
    }
}

impl DisconnectReason {
    pub fn code(&self) -> i32 {
        match self {
            Self::LoggedOut => 401,
            Self::Forbidden => 403,
            Self::ConnectionLost => 408,
            Self::MultideviceMismatch => 411,
            Self::ConnectionClosed => 428,
            Self::ConnectionReplaced => 440,
            Self::BadSession => 500,
            Self::UnavailableService => 503,
            Self::RestartRequired => 515,
            Self::Unknown(code) => *code,
        }
    }

    pub fn is_logged_out(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }

    /// The server asked for a fresh stream, typically right after pairing.
    pub fn is_restart_required(&self) -> bool {
        matches!(self, Self::RestartRequired)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::LoggedOut => "logged out",
            Self::Forbidden => "forbidden",
            Self::ConnectionLost => "connection lost",
            Self::MultideviceMismatch => "multi-device mismatch",
            Self::ConnectionClosed => "connection closed",
            Self::ConnectionReplaced => "connection replaced",
            Self::BadSession => "bad session",
            Self::UnavailableService => "service unavailable",
            Self::RestartRequired => "restart required",
            Self::Unknown(_) => "unknown",
        };
        write!(f, "{} ({})", msg, self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastDisconnect {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i32>,
}

impl LastDisconnect {
    pub fn new(error: impl Into<String>, status_code: Option<i32>) -> Self {
        Self {
            error: error.into(),
            status_code,
        }
    }

    /// `None` when the socket gave no status code at all.
    pub fn reason(&self) -> Option<DisconnectReason> {
        self.status_code.map(DisconnectReason::from)
    }

    pub fn is_logged_out(&self) -> bool {
        self.reason().is_some_and(|r| r.is_logged_out())
    }
}

/// A partial connection state as reported by `connection.update`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_disconnect: Option<LastDisconnect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_new_login: Option<bool>,
}

impl ConnectionUpdate {
    pub fn state(connection: ConnectionState) -> Self {
        Self {
            connection: Some(connection),
            ..Default::default()
        }
    }

    pub fn closed(last_disconnect: LastDisconnect) -> Self {
        Self {
            connection: Some(ConnectionState::Close),
            last_disconnect: Some(last_disconnect),
            ..Default::default()
        }
    }

    pub fn qr(code: impl Into<String>) -> Self {
        Self {
            qr: Some(code.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertType {
    Notify,
    Append,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagesUpsert {
    pub messages: Vec<WebMessage>,
    #[serde(rename = "type")]
    pub kind: UpsertType,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessagesDelete {
    #[serde(default)]
    pub keys: Vec<MessageKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConnectionUpdate,
    CredsUpdate,
    MessagesUpsert,
    MessagesUpdate,
    MessageReceiptUpdate,
    MessagesDelete,
}

impl EventKind {
    /// Every kind a session registers listeners for.
    pub const ALL: [EventKind; 6] = [
        EventKind::MessagesDelete,
        EventKind::MessageReceiptUpdate,
        EventKind::MessagesUpdate,
        EventKind::MessagesUpsert,
        EventKind::CredsUpdate,
        EventKind::ConnectionUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ConnectionUpdate => "connection.update",
            EventKind::CredsUpdate => "creds.update",
            EventKind::MessagesUpsert => "messages.upsert",
            EventKind::MessagesUpdate => "messages.update",
            EventKind::MessageReceiptUpdate => "message-receipt.update",
            EventKind::MessagesDelete => "messages.delete",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    ConnectionUpdate(ConnectionUpdate),
    CredsUpdate(serde_json::Value),
    MessagesUpsert(MessagesUpsert),
    MessagesUpdate(Vec<MessageUpdate>),
    MessageReceiptUpdate(Vec<ReceiptUpdate>),
    MessagesDelete(MessagesDelete),
}

impl SocketEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SocketEvent::ConnectionUpdate(_) => EventKind::ConnectionUpdate,
            SocketEvent::CredsUpdate(_) => EventKind::CredsUpdate,
            SocketEvent::MessagesUpsert(_) => EventKind::MessagesUpsert,
            SocketEvent::MessagesUpdate(_) => EventKind::MessagesUpdate,
            SocketEvent::MessageReceiptUpdate(_) => EventKind::MessageReceiptUpdate,
            SocketEvent::MessagesDelete(_) => EventKind::MessagesDelete,
        }
    }
}

pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &SocketEvent);
}

impl<F> EventHandler for F
where
    F: Fn(&SocketEvent) + Send + Sync,
{
    fn handle_event(&self, event: &SocketEvent) {
        self(event)
    }
}

/// Named-listener event bus exposed by a socket.
///
/// Listeners are invoked synchronously, in registration order, on the thread
/// that emits. They must not block; long work belongs on a task.
#[derive(Default, Clone)]
pub struct EventEmitter {
    handlers: Arc<RwLock<HashMap<EventKind, Vec<Arc<dyn EventHandler>>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<H>(&self, kind: EventKind, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.add_handler(kind, Arc::new(handler));
    }

    pub fn add_handler(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .expect("RwLock should not be poisoned")
            .entry(kind)
            .or_default()
            .push(handler);
    }

    pub fn remove_all_listeners(&self, kind: EventKind) {
        self.handlers
            .write()
            .expect("RwLock should not be poisoned")
            .remove(&kind);
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.handlers
            .read()
            .expect("RwLock should not be poisoned")
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Returns the number of listeners that saw the event.
    pub fn emit(&self, event: &SocketEvent) -> usize {
        // Snapshot so listeners may (un)register while being dispatched.
        let handlers = match self
            .handlers
            .read()
            .expect("RwLock should not be poisoned")
            .get(&event.kind())
        {
            Some(list) => list.clone(),
            None => return 0,
        };
        for handler in &handlers {
            handler.handle_event(event);
        }
        handlers.len()
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read().expect("RwLock should not be poisoned");
        let mut map = f.debug_map();
        for (kind, list) in handlers.iter() {
            map.entry(&kind.as_str(), &list.len());
        }
        map.finish()
    }
}
