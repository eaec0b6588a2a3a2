//! JSON models exchanged with peers.
//!
//! Text messages and contact requests carry a [`MessengerRequest`] as their
//! overlay payload; file transfers carry the same model inside the archive,
//! optionally next to a [`RecordingDescriptor`].

use serde::{Deserialize, Serialize};

use crate::constants::MAX_MESSAGE_SIZE;
use crate::error::ProtocolError;
use crate::types::{EncryptionKey, MessageId, PeerKey};

/// The logical request a peer sends: message body plus the sender's current
/// contact details and per-chat policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessengerRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_text: Option<String>,
    /// Sender-side id of the message, echoed back in progress reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    /// Snapshot of the text being replied to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_message_text: Option<String>,
    /// Overlay address of the sender (includes the public key).
    pub sender_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_local_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_encryption_key: Option<EncryptionKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_peer_key: Option<PeerKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_push_token: Option<String>,
    #[serde(default)]
    pub can_save_media: bool,
    #[serde(default = "default_true")]
    pub is_chat_history_stored: bool,
}

fn default_true() -> bool {
    true
}

impl MessengerRequest {
    /// Minimal request for `sender_address` with everything else empty.
    pub fn new(sender_address: impl Into<String>) -> Self {
        Self {
            message_text: None,
            message_id: None,
            reply_message_text: None,
            sender_address: sender_address.into(),
            sender_local_address: None,
            sender_encryption_key: None,
            sender_peer_key: None,
            sender_push_token: None,
            can_save_media: false,
            is_chat_history_stored: true,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.message_text = Some(text.into());
        self
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Serialize for a single overlay text message, enforcing the transport's
    /// size limit.
    pub fn to_wire_text(&self) -> Result<String, ProtocolError> {
        let json = self.to_json()?;
        if json.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: json.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(json)
    }

    pub fn from_json(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Metadata of a voice recording attached to a file transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingDescriptor {
    /// Length of the recording in seconds.
    pub duration: f64,
    /// Normalized amplitude samples for the waveform preview.
    #[serde(default)]
    pub waveform: Vec<f32>,
    /// Archive entry holding the audio data (lower-cased like every
    /// attachment).
    pub file_name: String,
}

impl RecordingDescriptor {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(data)?)
    }
}
