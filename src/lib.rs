//! Lifecycle management for a single WhatsApp session: QR pairing,
//! reconnection and relaying of inbound message traffic to a client.
//!
//! The protocol itself (framing, encryption, credential persistence) is
//! provided by whatever implements [`socket::SocketFactory`] and
//! [`store::StoreFactory`].

pub mod client;
pub mod config;
pub mod error;
pub mod jid;
pub mod message_id;
pub mod qrcode;
pub mod relay;
pub mod session;
pub mod socket;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use client::Client;
pub use config::{ReconnectPolicy, SessionConfig};
pub use error::ConnectError;
pub use session::{Connection, SessionManager, SessionState};
