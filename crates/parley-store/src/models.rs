//! Domain model structs persisted in the local SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the UI layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use parley_shared::protocol::RecordingDescriptor;
use parley_shared::types::{EncryptionKey, MessageId, PeerKey, PresenceStatus, TransportMessageId};

// ---------------------------------------------------------------------------
// Peer
// ---------------------------------------------------------------------------

/// A remote correspondent. The primary key is the overlay public key, which
/// never changes once the record exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Peer {
    pub key: PeerKey,
    /// Full overlay address; refreshed when the peer renegotiates.
    pub address: String,
    /// Address on the local mesh network, if the peer announced one.
    pub local_address: Option<String>,
    pub display_name: Option<String>,
    pub status: PresenceStatus,
    pub is_typing: bool,
    /// Key used to seal archive passwords; may arrive after the peer itself.
    pub encryption_key: Option<EncryptionKey>,
    pub push_token: Option<String>,
    pub has_unseen: bool,
    /// Whether the peer allows received media to be saved.
    pub can_save_media: bool,
    /// Whether the conversation history is kept on disk.
    pub retain_history: bool,
    pub is_password_protected: bool,
    pub created_at: DateTime<Utc>,
}

impl Peer {
    pub fn new(key: PeerKey, address: impl Into<String>, status: PresenceStatus) -> Self {
        Self {
            key,
            address: address.into(),
            local_address: None,
            display_name: None,
            status,
            is_typing: false,
            encryption_key: None,
            push_token: None,
            has_unseen: false,
            can_save_media: false,
            retain_history: true,
            is_password_protected: false,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Own,
    Received,
    /// Locally generated notice (e.g. "contact accepted").
    System,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageDirection::Own => "own",
            MessageDirection::Received => "received",
            MessageDirection::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "own" => Some(Self::Own),
            "received" => Some(Self::Received),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Delivery status of a message.
///
/// `Read` is part of the display model but nothing produces it; every
/// transition into or out of it is rejected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sending,
    Sent,
    Failed,
    Read,
}

/// Rejected status change.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid message status transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: MessageStatus,
    pub to: MessageStatus,
}

impl MessageStatus {
    /// The single authority on status changes:
    /// `Sending -> Sent`, `Sending -> Failed`, `Failed -> Sending`.
    pub fn transition(self, next: MessageStatus) -> Result<MessageStatus, InvalidTransition> {
        use MessageStatus::*;
        match (self, next) {
            (Sending, Sent) | (Sending, Failed) | (Failed, Sending) => Ok(next),
            (from, to) => Err(InvalidTransition { from, to }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
            MessageStatus::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sending" => Some(Self::Sending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

/// An attachment stored next to the database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaRef {
    pub kind: MediaKind,
    /// Lower-cased file name, as carried in the archive.
    pub file_name: String,
    /// Local path once the file is on disk.
    pub path: Option<String>,
}

/// A single chat entry belonging to exactly one peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub peer_key: PeerKey,
    pub direction: MessageDirection,
    pub status: MessageStatus,
    pub body: String,
    /// Snapshot of the text this message replies to.
    pub reply_to: Option<String>,
    pub media: Vec<MediaRef>,
    pub recording: Option<RecordingDescriptor>,
    pub created_at: DateTime<Utc>,
    /// Transport id of the pending submission; cleared on acknowledgement.
    pub temp_id: Option<TransportMessageId>,
}

impl Message {
    /// A message composed locally, not yet submitted.
    pub fn outgoing(peer_key: PeerKey, body: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            peer_key,
            direction: MessageDirection::Own,
            status: MessageStatus::Sending,
            body: body.into(),
            reply_to: None,
            media: Vec::new(),
            recording: None,
            created_at: Utc::now(),
            temp_id: None,
        }
    }

    /// A message that arrived from `peer_key`.
    pub fn incoming(peer_key: PeerKey, body: impl Into<String>) -> Self {
        Self {
            direction: MessageDirection::Received,
            status: MessageStatus::Sent,
            ..Self::outgoing(peer_key, body)
        }
    }
}
