//! Connection lifecycle for one phone number: pairing, the reconnect loop and
//! supervision of an open session.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

use crate::client::Client;
use crate::config::SessionConfig;
use crate::error::ConnectError;
use crate::jid::is_jid_broadcast;
use crate::qrcode::QrAttemptTracker;
use crate::relay::EventRelay;
use crate::socket::{Socket, SocketConfig, SocketFactory};
use crate::store::{CredentialStore, DataStore, StoreBundle, StoreFactory};
use crate::types::events::{
    ConnectionState, ConnectionUpdate, DisconnectReason, EventEmitter, EventKind, LastDisconnect,
    SocketEvent,
};

pub const STATUS_CONNECTING: &str = "Connecting...";
pub const STATUS_CONNECTED: &str = "Connected!";
pub const STATUS_LOGGED_OUT: &str = "Disconnected: this device was logged out";

pub fn qr_exhausted_status(max: u32) -> String {
    format!("QR code was generated {max} times without being scanned, giving up")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Reconnecting { attempt: u32 },
    LoggedOut,
    Closed,
    Failed(String),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::LoggedOut | SessionState::Closed | SessionState::Failed(_)
        )
    }
}

struct ConnectionInner {
    phone: String,
    current: RwLock<(Arc<dyn Socket>, Arc<dyn DataStore>)>,
    state: watch::Sender<SessionState>,
}

/// An open session. Clones share the same underlying session.
///
/// The socket and data store are swapped in place when the session
/// reconnects, so callers should fetch them per use rather than hold on.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    fn new(phone: String, socket: Arc<dyn Socket>, data_store: Arc<dyn DataStore>) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                phone,
                current: RwLock::new((socket, data_store)),
                state: watch::Sender::new(SessionState::Open),
            }),
        }
    }

    pub fn phone(&self) -> &str {
        &self.inner.phone
    }

    pub fn socket(&self) -> Arc<dyn Socket> {
        self.inner
            .current
            .read()
            .expect("RwLock should not be poisoned")
            .0
            .clone()
    }

    pub fn data_store(&self) -> Arc<dyn DataStore> {
        self.inner
            .current
            .read()
            .expect("RwLock should not be poisoned")
            .1
            .clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn is_active(&self) -> bool {
        !self.state().is_terminal()
    }

    /// Unlinks the device and tears the session down for good.
    pub async fn logout(&self) -> Result<(), anyhow::Error> {
        info!(target: "Session", "Logging out {}", self.phone());
        self.set_state(SessionState::LoggedOut);
        let socket = self.socket();
        detach(socket.events());
        let result = socket.logout().await;
        socket.close().await;
        result
    }

    /// Closes the transport without unlinking; stored credentials stay valid.
    pub async fn close(&self) {
        info!(target: "Session", "Closing session for {}", self.phone());
        self.set_state(SessionState::Closed);
        let socket = self.socket();
        detach(socket.events());
        socket.close().await;
    }

    /// Terminal states are final and never overwritten.
    fn set_state(&self, next: SessionState) -> bool {
        self.inner.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        })
    }

    fn replace(&self, socket: Arc<dyn Socket>, data_store: Arc<dyn DataStore>) {
        *self
            .inner
            .current
            .write()
            .expect("RwLock should not be poisoned") = (socket, data_store);
        self.set_state(SessionState::Open);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("phone", &self.inner.phone)
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

/// A socket that reached `open`, with the rest of its connection updates.
struct OpenSocket {
    socket: Arc<dyn Socket>,
    data_store: Arc<dyn DataStore>,
    updates: mpsc::UnboundedReceiver<ConnectionUpdate>,
}

enum AttemptOutcome {
    Open(OpenSocket),
    Closed(LastDisconnect),
}

/// Owns the per-phone session state: QR attempt counters and the set of
/// phones with a connect in flight or a supervised session.
pub struct SessionManager {
    socket_factory: Arc<dyn SocketFactory>,
    store: Arc<dyn StoreFactory>,
    config: SessionConfig,
    qr: QrAttemptTracker,
    active: DashMap<String, ()>,
}

impl SessionManager {
    pub fn new(
        socket_factory: Arc<dyn SocketFactory>,
        store: Arc<dyn StoreFactory>,
        config: SessionConfig,
    ) -> Self {
        let qr = QrAttemptTracker::new(config.max_qr_attempts);
        Self {
            socket_factory,
            store,
            config,
            qr,
            active: DashMap::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn qr_tracker(&self) -> &QrAttemptTracker {
        &self.qr
    }

    pub fn is_active(&self, phone: &str) -> bool {
        self.active.contains_key(phone)
    }

    /// Connects the client's phone and returns once the session is open.
    ///
    /// Transient closes are retried per the reconnect policy, both before the
    /// session opens and for as long as it stays up afterwards.
    pub async fn connect(self: &Arc<Self>, client: Arc<dyn Client>) -> Result<Connection, ConnectError> {
        let phone = client.phone().to_string();
        match self.active.entry(phone.clone()) {
            Entry::Occupied(_) => {
                warn!(target: "Session", "Connect for {phone} rejected: already in progress");
                return Err(ConnectError::AlreadyConnecting(phone));
            }
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }
        // Released on any early exit, including the future being dropped.
        let guard = scopeguard::guard(phone, |phone| self.release(&phone));

        let opened = self.open_session(&client, None, None).await?;
        let phone = scopeguard::ScopeGuard::into_inner(guard);

        let connection = Connection::new(phone, opened.socket, opened.data_store);
        tokio::spawn(
            self.clone()
                .supervise(client, connection.clone(), opened.updates),
        );
        Ok(connection)
    }

    fn release(&self, phone: &str) {
        self.active.remove(phone);
        self.qr.reset(phone);
    }

    /// Runs attempts until one opens. `pending` is the close that triggered a
    /// reconnect, if any.
    async fn open_session(
        &self,
        client: &Arc<dyn Client>,
        mut pending: Option<LastDisconnect>,
        connection: Option<&Connection>,
    ) -> Result<OpenSocket, ConnectError> {
        let phone = client.phone();
        let policy = &self.config.reconnect;
        let mut reconnects = 0u32;

        loop {
            if let Some(disconnect) = pending.take() {
                if disconnect.reason().is_some_and(|r| r.is_restart_required()) {
                    info!(target: "Session", "Server requested a restart for {phone}, reconnecting immediately");
                } else {
                    reconnects += 1;
                    if reconnects > policy.max_attempts {
                        error!(target: "Session", "Giving up on {phone} after {} reconnect attempts", policy.max_attempts);
                        return Err(ConnectError::ReconnectExhausted {
                            attempts: policy.max_attempts,
                        });
                    }
                    let delay = policy.delay_for(reconnects);
                    info!(target: "Session", "Will reconnect {phone} in {delay:?} (attempt {reconnects})");
                    if let Some(connection) = connection {
                        connection.set_state(SessionState::Reconnecting {
                            attempt: reconnects,
                        });
                    }
                    tokio::select! {
                        biased;
                        _ = terminated(connection) => return Err(ConnectError::Closed),
                        () = sleep(delay) => {}
                    }
                }
            }

            if connection.is_some_and(|c| !c.is_active()) {
                return Err(ConnectError::Closed);
            }

            match self.attempt(client, connection).await {
                Ok(AttemptOutcome::Open(opened)) => {
                    if connection.is_some_and(|c| !c.is_active()) {
                        detach(opened.socket.events());
                        opened.socket.close().await;
                        return Err(ConnectError::Closed);
                    }
                    return Ok(opened);
                }
                Ok(AttemptOutcome::Closed(disconnect)) => pending = Some(disconnect),
                Err(ConnectError::Socket(e)) => {
                    warn!(target: "Session", "Failed to create socket for {phone}: {e:?}");
                    pending = Some(LastDisconnect::new(e.to_string(), None));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One socket, from creation to its first terminal connection state.
    ///
    /// When reconnecting an open session, the attempt is abandoned as soon as
    /// the user closes or logs out that session.
    async fn attempt(
        &self,
        client: &Arc<dyn Client>,
        session: Option<&Connection>,
    ) -> Result<AttemptOutcome, ConnectError> {
        let phone = client.phone();
        let StoreBundle {
            state,
            creds,
            data_store,
        } = self.store.open(phone).await.map_err(ConnectError::Store)?;

        let config = SocketConfig {
            auth: state,
            print_qr_in_terminal: self.config.print_qr_in_terminal,
            ignore_jid: is_jid_broadcast,
        };
        let socket = self
            .socket_factory
            .create_socket(config)
            .await
            .map_err(ConnectError::Socket)?;

        let events = socket.events();
        data_store.bind(events);
        spawn_creds_saver(events, creds, phone.to_string());
        EventRelay::bind(&socket, data_store.clone(), client.clone());
        let mut updates = subscribe_connection_updates(events);

        loop {
            let update = tokio::select! {
                biased;
                state = terminated(session) => {
                    info!(target: "Session", "Session for {phone} ended while reconnecting ({state:?})");
                    detach(events);
                    if state == SessionState::LoggedOut
                        && let Err(e) = socket.logout().await
                    {
                        warn!(target: "Session", "Logout of reconnecting socket failed for {phone}: {e:?}");
                    }
                    socket.close().await;
                    return Err(ConnectError::Closed);
                }
                update = updates.recv() => match update {
                    Some(update) => update,
                    None => {
                        warn!(target: "Session", "Socket for {phone} stopped reporting connection updates");
                        detach(events);
                        socket.close().await;
                        return Err(ConnectError::EventsClosed);
                    }
                },
            };
            let ConnectionUpdate {
                connection,
                last_disconnect,
                qr,
                ..
            } = &update;

            match (connection, last_disconnect) {
                (Some(ConnectionState::Close), Some(disconnect)) => {
                    let should_reconnect = !disconnect.is_logged_out();
                    info!(
                        target: "Session",
                        "Connection for {phone} closed due to {:?} ({}), reconnecting: {should_reconnect}",
                        disconnect.error,
                        disconnect.reason().map_or_else(|| "no status".to_string(), |r| r.to_string()),
                    );
                    detach(events);
                    if should_reconnect {
                        return Ok(AttemptOutcome::Closed(disconnect.clone()));
                    }
                    notify(client, STATUS_LOGGED_OUT).await;
                    return Err(ConnectError::LoggedOut {
                        reason: disconnect.reason().unwrap_or(DisconnectReason::LoggedOut),
                    });
                }
                (Some(ConnectionState::Open), _) => {
                    info!(target: "Session", "Connection for {phone} is open");
                    notify(client, STATUS_CONNECTED).await;
                    self.qr.reset(phone);
                    return Ok(AttemptOutcome::Open(OpenSocket {
                        socket,
                        data_store,
                        updates,
                    }));
                }
                _ => {}
            }

            if let Some(code) = qr {
                if !self.qr.on_qr_code(client.as_ref(), code).await {
                    let max = self.qr.max_attempts();
                    warn!(target: "Session", "QR code for {phone} was not scanned after {max} attempts");
                    detach(events);
                    socket.close().await;
                    if let Err(e) = socket.logout().await {
                        warn!(target: "Session", "Logout after QR exhaustion failed for {phone}: {e:?}");
                    }
                    notify(client, &qr_exhausted_status(max)).await;
                    return Err(ConnectError::QrAttemptsExceeded { max });
                }
            } else if *connection == Some(ConnectionState::Connecting) {
                notify(client, STATUS_CONNECTING).await;
            } else {
                debug!(target: "Session", "connection.update {update:?}");
            }
        }
    }

    /// Watches an open session and reconnects it until it ends.
    async fn supervise(
        self: Arc<Self>,
        client: Arc<dyn Client>,
        connection: Connection,
        mut updates: mpsc::UnboundedReceiver<ConnectionUpdate>,
    ) {
        let phone = connection.phone().to_string();

        while let Some(disconnect) = next_disconnect(&client, &mut updates).await {
            detach(connection.socket().events());

            if disconnect.is_logged_out() {
                info!(target: "Session", "Session for {phone} was logged out");
                notify(&client, STATUS_LOGGED_OUT).await;
                connection.set_state(SessionState::LoggedOut);
                break;
            }
            info!(target: "Session", "Open session for {phone} closed due to {:?}, reconnecting", disconnect.error);

            match self
                .open_session(&client, Some(disconnect), Some(&connection))
                .await
            {
                Ok(opened) => {
                    connection.replace(opened.socket, opened.data_store);
                    updates = opened.updates;
                }
                Err(ConnectError::Closed) => break,
                Err(e) => {
                    warn!(target: "Session", "Session for {phone} ended: {e}");
                    connection.set_state(SessionState::Failed(e.to_string()));
                    break;
                }
            }
        }

        self.release(&phone);
        debug!(target: "Session", "Supervisor for {phone} stopped");
    }
}

/// Resolves with the terminal state once the session has ended. Never resolves
/// while there is no session yet.
async fn terminated(connection: Option<&Connection>) -> SessionState {
    let Some(connection) = connection else {
        return std::future::pending().await;
    };
    let mut states = connection.subscribe();
    match states.wait_for(SessionState::is_terminal).await {
        Ok(state) => (*state).clone(),
        Err(_) => SessionState::Closed,
    }
}

/// Waits for the next close of an open socket. `None` once the session's
/// listeners were removed.
async fn next_disconnect(
    client: &Arc<dyn Client>,
    updates: &mut mpsc::UnboundedReceiver<ConnectionUpdate>,
) -> Option<LastDisconnect> {
    while let Some(update) = updates.recv().await {
        match (update.connection, update.last_disconnect) {
            (Some(ConnectionState::Close), Some(disconnect)) => return Some(disconnect),
            (Some(ConnectionState::Connecting), _) => notify(client, STATUS_CONNECTING).await,
            (connection, _) => {
                debug!(target: "Session", "Ignoring update {connection:?} on open session")
            }
        }
    }
    None
}

async fn notify(client: &Arc<dyn Client>, message: &str) {
    if let Err(e) = client.send_status(message).await {
        warn!(target: "Session", "Failed to send status to {}: {e:?}", client.phone());
    }
}

fn detach(events: &EventEmitter) {
    for kind in EventKind::ALL {
        events.remove_all_listeners(kind);
    }
}

fn subscribe_connection_updates(events: &EventEmitter) -> mpsc::UnboundedReceiver<ConnectionUpdate> {
    let (tx, rx) = mpsc::unbounded_channel();
    events.on(EventKind::ConnectionUpdate, move |event: &SocketEvent| {
        if let SocketEvent::ConnectionUpdate(update) = event {
            let _ = tx.send(update.clone());
        }
    });
    rx
}

/// Saves credential updates in the order the socket emits them.
fn spawn_creds_saver(events: &EventEmitter, creds: Arc<dyn CredentialStore>, phone: String) {
    let (tx, mut rx) = mpsc::unbounded_channel::<serde_json::Value>();
    events.on(EventKind::CredsUpdate, move |event: &SocketEvent| {
        if let SocketEvent::CredsUpdate(update) = event {
            let _ = tx.send(update.clone());
        }
    });
    tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            if let Err(e) = creds.save_creds(&update).await {
                error!(target: "Session", "Failed to save credentials for {phone}: {e:?}");
            }
        }
    });
}
