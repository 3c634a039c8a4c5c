use async_trait::async_trait;

use crate::types::message::Incoming;

/// The downstream side of a session: whoever owns the phone number and wants
/// its traffic.
#[async_trait]
pub trait Client: Send + Sync {
    fn phone(&self) -> &str;

    /// Receives a batch of inbound messages, updates or receipts.
    async fn receive(&self, messages: Vec<Incoming>) -> Result<(), anyhow::Error>;

    /// Receives a human readable connection status line.
    async fn send_status(&self, message: &str) -> Result<(), anyhow::Error>;
}
