use futures_util::future::join_all;
use log::{debug, warn};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::Client;
use crate::jid::{Jid, is_individual_jid};
use crate::socket::Socket;
use crate::store::DataStore;
use crate::types::events::{EventKind, SocketEvent};
use crate::types::message::{Incoming, MessageKey, MessageStatus, MessageUpdate, WebMessage};

/// Event kinds forwarded to the client.
pub const RELAYED_EVENTS: [EventKind; 4] = [
    EventKind::MessagesUpsert,
    EventKind::MessagesUpdate,
    EventKind::MessageReceiptUpdate,
    EventKind::MessagesDelete,
];

/// Forwards message traffic from a socket to a client.
///
/// Listeners only enqueue; a single worker task transforms and delivers the
/// events so batches reach the client in the order the socket emitted them.
pub struct EventRelay {
    socket: Weak<dyn Socket>,
    data_store: Arc<dyn DataStore>,
    client: Arc<dyn Client>,
}

impl EventRelay {
    /// Registers the relay on the socket's emitter and spawns its worker.
    ///
    /// The worker exits once the relay's listeners are removed from the
    /// emitter and everything already queued has been delivered.
    pub fn bind(
        socket: &Arc<dyn Socket>,
        data_store: Arc<dyn DataStore>,
        client: Arc<dyn Client>,
    ) -> JoinHandle<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        for kind in RELAYED_EVENTS {
            let tx = tx.clone();
            socket.events().on(kind, move |event: &SocketEvent| {
                let _ = tx.send(event.clone());
            });
        }

        let relay = EventRelay {
            socket: Arc::downgrade(socket),
            data_store,
            client,
        };
        tokio::spawn(relay.run(rx))
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<SocketEvent>) {
        while let Some(event) = rx.recv().await {
            let kind = event.kind();
            let batch = self.transform(event).await;
            if batch.is_empty() {
                debug!(target: "Session/Relay", "Skipping empty {kind} batch");
                continue;
            }
            if let Err(e) = self.client.receive(batch).await {
                warn!(
                    target: "Session/Relay",
                    "Client {} failed to receive {kind}: {e:?}",
                    self.client.phone()
                );
            }
        }
        debug!(target: "Session/Relay", "Relay for {} stopped", self.client.phone());
    }

    async fn transform(&self, event: SocketEvent) -> Vec<Incoming> {
        match event {
            SocketEvent::MessagesUpsert(upsert) => {
                join_all(upsert.messages.into_iter().map(|m| self.with_group_metadata(m)))
                    .await
                    .into_iter()
                    .map(Incoming::Message)
                    .collect()
            }
            SocketEvent::MessagesUpdate(updates) => {
                updates.into_iter().map(Incoming::Update).collect()
            }
            SocketEvent::MessageReceiptUpdate(receipts) => {
                receipts.into_iter().map(Incoming::Receipt).collect()
            }
            SocketEvent::MessagesDelete(delete) => deleted_updates(delete.keys)
                .into_iter()
                .map(Incoming::Update)
                .collect(),
            SocketEvent::ConnectionUpdate(_) | SocketEvent::CredsUpdate(_) => Vec::new(),
        }
    }

    async fn with_group_metadata(&self, mut message: WebMessage) -> WebMessage {
        let remote_jid = &message.key.remote_jid;
        if is_individual_jid(remote_jid) {
            return message;
        }

        let jid: Jid = match remote_jid.parse() {
            Ok(jid) => jid,
            Err(e) => {
                warn!(target: "Session/Relay", "Cannot parse chat {remote_jid}: {e}");
                return message;
            }
        };
        let Some(socket) = self.socket.upgrade() else {
            debug!(target: "Session/Relay", "Socket gone, relaying {jid} without metadata");
            return message;
        };

        match self.data_store.fetch_group_metadata(&jid, socket.as_ref()).await {
            Ok(metadata) => message.group_metadata = Some(metadata),
            Err(e) => {
                warn!(target: "Session/Relay", "Failed to fetch group metadata for {jid}: {e:?}")
            }
        }
        message
    }
}

/// Turns deleted message keys into `DELETED` status updates, one per key.
pub fn deleted_updates(keys: Vec<MessageKey>) -> Vec<MessageUpdate> {
    keys.into_iter()
        .map(|key| MessageUpdate::with_status(key, MessageStatus::Deleted))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDataStore;
    use crate::test_utils::{MockSocket, RecordingClient, group_metadata};
    use crate::types::events::{MessagesDelete, MessagesUpsert, UpsertType};
    use crate::types::message::{Receipt, ReceiptUpdate};

    const GROUP: &str = "120363025246125888@g.us";
    const USER: &str = "5511999999999@s.whatsapp.net";

    fn message(chat: &str, id: &str) -> WebMessage {
        WebMessage {
            key: MessageKey::new(chat, id),
            message_timestamp: 1_700_000_000,
            ..Default::default()
        }
    }

    struct Harness {
        socket: Arc<MockSocket>,
        client: Arc<RecordingClient>,
        worker: JoinHandle<()>,
    }

    impl Harness {
        fn new() -> Self {
            let socket = Arc::new(MockSocket::new());
            socket.add_group(group_metadata(GROUP, "Family"));
            let client = Arc::new(RecordingClient::new("5511999999999"));
            let dyn_socket: Arc<dyn Socket> = socket.clone();
            let worker = EventRelay::bind(
                &dyn_socket,
                Arc::new(MemoryDataStore::new()),
                client.clone(),
            );
            Self {
                socket,
                client,
                worker,
            }
        }

        /// Detaches the relay and waits until everything queued is delivered.
        async fn drain(self) -> Vec<Vec<Incoming>> {
            for kind in RELAYED_EVENTS {
                self.socket.events().remove_all_listeners(kind);
            }
            self.worker.await.expect("relay worker panicked");
            self.client.batches().await
        }
    }

    #[test]
    fn deletions_map_one_to_one() {
        let keys = vec![MessageKey::new(USER, "A"), MessageKey::new(GROUP, "B")];
        let updates = deleted_updates(keys.clone());
        assert_eq!(updates.len(), 2);
        for (update, key) in updates.iter().zip(keys) {
            assert_eq!(update.key, key);
            assert_eq!(update.update.status, Some(MessageStatus::Deleted));
        }
    }

    #[tokio::test]
    async fn group_messages_carry_metadata() {
        let harness = Harness::new();
        harness.socket.emit(SocketEvent::MessagesUpsert(MessagesUpsert {
            messages: vec![message(GROUP, "G1"), message(USER, "U1")],
            kind: UpsertType::Notify,
        }));

        let batches = harness.drain().await;
        assert_eq!(batches.len(), 1);
        let [Incoming::Message(group), Incoming::Message(user)] = batches[0].as_slice() else {
            panic!("unexpected batch {:?}", batches[0]);
        };
        assert_eq!(
            group.group_metadata.as_ref().map(|m| m.subject.as_str()),
            Some("Family")
        );
        assert!(user.group_metadata.is_none());
    }

    #[tokio::test]
    async fn metadata_failure_still_relays() {
        let harness = Harness::new();
        harness.socket.emit(SocketEvent::MessagesUpsert(MessagesUpsert {
            messages: vec![message("999@g.us", "G2")],
            kind: UpsertType::Notify,
        }));

        let batches = harness.drain().await;
        let [Incoming::Message(msg)] = batches[0].as_slice() else {
            panic!("unexpected batch {:?}", batches[0]);
        };
        assert!(msg.group_metadata.is_none());
    }

    #[tokio::test]
    async fn updates_receipts_and_deletes_keep_order() {
        let harness = Harness::new();
        let update = MessageUpdate::with_status(MessageKey::new(USER, "A"), MessageStatus::Read);
        let receipt = ReceiptUpdate {
            key: MessageKey::new(GROUP, "B"),
            receipt: Receipt {
                user_jid: USER.to_string(),
                read_timestamp: Some(5),
                ..Default::default()
            },
        };

        harness
            .socket
            .emit(SocketEvent::MessagesUpdate(vec![update.clone()]));
        harness
            .socket
            .emit(SocketEvent::MessageReceiptUpdate(vec![receipt.clone()]));
        harness.socket.emit(SocketEvent::MessagesDelete(MessagesDelete {
            keys: vec![MessageKey::new(USER, "C")],
        }));
        harness
            .socket
            .emit(SocketEvent::MessagesDelete(MessagesDelete::default()));

        let batches = harness.drain().await;
        assert_eq!(
            batches,
            vec![
                vec![Incoming::Update(update)],
                vec![Incoming::Receipt(receipt)],
                vec![Incoming::Update(MessageUpdate::with_status(
                    MessageKey::new(USER, "C"),
                    MessageStatus::Deleted
                ))],
            ]
        );
    }

    #[tokio::test]
    async fn unmodelled_payloads_are_relayed_intact() {
        let harness = Harness::new();
        let mut group_message: WebMessage = serde_json::from_value(serde_json::json!({
            "key": { "remoteJid": GROUP, "id": "V1" },
            "message": { "videoMessage": { "url": "https://mmg.whatsapp.net/v", "seconds": 12 } },
            "messageTimestamp": 1_700_000_000
        }))
        .unwrap();
        let update: MessageUpdate = serde_json::from_value(serde_json::json!({
            "key": { "remoteJid": USER, "id": "E1" },
            "update": { "message": { "editedMessage": { "conversation": "fixed typo" } } }
        }))
        .unwrap();

        harness.socket.emit(SocketEvent::MessagesUpsert(MessagesUpsert {
            messages: vec![group_message.clone()],
            kind: UpsertType::Notify,
        }));
        harness
            .socket
            .emit(SocketEvent::MessagesUpdate(vec![update.clone()]));

        let batches = harness.drain().await;
        group_message.group_metadata = Some(group_metadata(GROUP, "Family"));
        assert_eq!(
            batches,
            vec![
                vec![Incoming::Message(group_message)],
                vec![Incoming::Update(update)],
            ]
        );
        let Incoming::Message(relayed) = &batches[0][0] else {
            unreachable!()
        };
        assert_eq!(
            relayed.message.as_ref().unwrap().extra["videoMessage"]["seconds"],
            12
        );
    }
}
