use chrono::Utc;
use dashmap::DashMap;
use log::{debug, info, warn};

use crate::client::Client;
use crate::config::DEFAULT_MAX_QR_ATTEMPTS;
use crate::jid::phone_number_to_jid;
use crate::message_id::new_message_id;
use crate::types::message::{ImageMessage, Incoming, MessageContent, MessageKey, WebMessage};

/// Counts how many QR codes each phone has been shown during pairing.
#[derive(Debug)]
pub struct QrAttemptTracker {
    counts: DashMap<String, u32>,
    max: u32,
}

impl Default for QrAttemptTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QR_ATTEMPTS)
    }
}

impl QrAttemptTracker {
    pub fn new(max: u32) -> Self {
        Self {
            counts: DashMap::new(),
            max: max.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max
    }

    pub fn attempts(&self, phone: &str) -> u32 {
        self.counts.get(phone).map_or(0, |c| *c)
    }

    pub fn reset(&self, phone: &str) {
        self.counts.remove(phone);
    }

    /// Records a new QR code for the client's phone and delivers it as an
    /// image message.
    ///
    /// Returns `false` once the phone has used up its attempts; the counter is
    /// cleared at that point so a later pairing starts from zero.
    pub async fn on_qr_code(&self, client: &dyn Client, code: &str) -> bool {
        let phone = client.phone();
        let attempt = {
            let mut count = self.counts.entry(phone.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        debug!(target: "Session/Qr", "Received QR code {code} for {phone}");
        info!(target: "Session/Qr", "QR code attempt {attempt} of {} for {phone}", self.max);

        let message = qr_code_message(phone, code, attempt, self.max);
        if let Err(e) = client.receive(vec![Incoming::Message(message)]).await {
            warn!(target: "Session/Qr", "Failed to deliver QR code to {phone}: {e:?}");
        }

        if attempt >= self.max {
            self.reset(phone);
            return false;
        }
        true
    }
}

/// Wraps a QR code into an inbound image message addressed to the phone's own chat.
pub fn qr_code_message(phone: &str, code: &str, attempt: u32, max: u32) -> WebMessage {
    let remote_jid = phone_number_to_jid(phone);
    let media_key = new_message_id();
    let message_timestamp = Utc::now().timestamp_millis();

    WebMessage {
        key: MessageKey::new(remote_jid, media_key.clone()),
        message: Some(MessageContent {
            image_message: Some(ImageMessage {
                url: code.to_string(),
                mimetype: "image/png".to_string(),
                file_name: format!("qrcode-{message_timestamp}.png"),
                media_key,
                file_length: code.len() as u64,
                caption: Some(format!(
                    "Please, read the QR Code to connect on Whatsapp Web, attempt {attempt} of {max}"
                )),
            }),
            ..Default::default()
        }),
        message_timestamp,
        ..Default::default()
    }
}
