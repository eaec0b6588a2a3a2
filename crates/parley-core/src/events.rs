//! Notifications from the core to the embedding UI layer.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::mpsc;

use parley_shared::types::{FileId, MessageId, PeerKey, PresenceStatus, TransportHandle};
use parley_store::{Message, MessageStatus};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreEvent {
    /// Raw poll result, one entry per enumerable peer.
    PresenceSnapshot { online: HashMap<PeerKey, bool> },
    /// A stored contact changed presence.
    PresenceChanged { peer: PeerKey, status: PresenceStatus },
    PeerTyping { peer: PeerKey, is_typing: bool },
    MessageStatusChanged {
        peer: PeerKey,
        message_id: MessageId,
        status: MessageStatus,
    },
    MessageReceived { message: Message },
    ContactRequest { peer: PeerKey },
    FileSendProgress {
        handle: TransportHandle,
        file_id: FileId,
        message_id: Option<MessageId>,
        progress: u8,
    },
    FileSendCompleted {
        handle: TransportHandle,
        file_id: FileId,
        message_id: Option<MessageId>,
    },
    FileSendFailed {
        handle: TransportHandle,
        file_id: FileId,
        message_id: Option<MessageId>,
        reason: String,
    },
    FileReceiveProgress {
        handle: TransportHandle,
        file_id: FileId,
        progress: u8,
    },
}

/// Sending half of the event stream. Cheap to clone.
///
/// Events are dropped (with a warning) when the receiver is gone or full;
/// the core never waits on the UI.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::Sender<CoreEvent>>,
}

impl EventSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<CoreEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: CoreEvent) {
        let Some(tx) = &self.tx else { return };
        if let Err(e) = tx.try_send(event) {
            tracing::warn!(error = %e, "Failed to emit core event");
        }
    }
}
