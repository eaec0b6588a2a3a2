//! The overlay transport seam.
//!
//! The peer-to-peer network (friend directory, message delivery, file
//! transfers) is an external collaborator. Everything the messaging core
//! needs from it is expressed by [`OverlayTransport`]; everything it reports
//! back arrives as an [`OverlayEvent`] on a channel the embedder drives.

use async_trait::async_trait;
use thiserror::Error;

use parley_shared::types::{ConnectionStatus, FileId, PeerKey, TransportHandle, TransportMessageId};

use crate::chunks::ChunkRequest;

/// Length of an overlay address in hex characters: public key (64),
/// nospam (8) and checksum (4).
pub const OVERLAY_ADDRESS_LEN: usize = 76;

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Peer not found")]
    PeerNotFound,

    #[error("Peer is not connected")]
    NotConnected,

    #[error("Invalid overlay address: {0}")]
    InvalidAddress(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Transport closed")]
    Closed,
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Operations consumed from the overlay network.
///
/// Implementations must be callable from any task; the core never holds a
/// lock across these calls.
#[async_trait]
pub trait OverlayTransport: Send + Sync {
    /// Resolve the overlay-local handle of a peer from its public key.
    async fn resolve_peer_handle(&self, key: &PeerKey) -> Option<TransportHandle>;

    /// Reverse lookup of [`resolve_peer_handle`](Self::resolve_peer_handle).
    async fn peer_key(&self, handle: TransportHandle) -> Option<PeerKey>;

    /// Enumerate every peer handle the overlay knows about.
    async fn list_peers(&self) -> TransportResult<Vec<TransportHandle>>;

    async fn connection_status(&self, handle: TransportHandle) -> ConnectionStatus;

    /// Submit a text message. Returns the overlay's id for delivery
    /// acknowledgement; submission does not imply delivery.
    async fn send_text(&self, handle: TransportHandle, text: &str)
        -> TransportResult<TransportMessageId>;

    /// Announce a file of `size` bytes. Chunks are then requested on demand
    /// through [`OverlayEvent::ChunkRequested`].
    async fn begin_file_transfer(
        &self,
        handle: TransportHandle,
        name: &str,
        size: u64,
    ) -> TransportResult<FileId>;

    /// Answer a chunk request with the bytes at `position`.
    async fn push_chunk(
        &self,
        handle: TransportHandle,
        file_id: FileId,
        position: u64,
        data: &[u8],
    ) -> TransportResult<()>;

    /// Send a contact request to a full overlay address.
    async fn add_peer(&self, address: &str, intro: &str) -> TransportResult<TransportHandle>;

    async fn remove_peer(&self, handle: TransportHandle) -> bool;

    async fn set_typing_state(&self, handle: TransportHandle, is_typing: bool)
        -> TransportResult<()>;

    /// Advertise our own presence: online, or away while the embedding app
    /// is in the background.
    async fn set_self_online(&self, online: bool) -> TransportResult<()>;
}

/// Notifications sent *from* the overlay to the messaging core.
#[derive(Debug, Clone)]
pub enum OverlayEvent {
    /// A text message arrived from a known peer.
    MessageReceived { handle: TransportHandle, text: String },
    /// An unknown peer asked to become a contact.
    ContactRequest { key: PeerKey, text: String },
    /// The peer confirmed receipt of a submitted message.
    DeliveryAck {
        handle: TransportHandle,
        message_id: TransportMessageId,
    },
    Typing { handle: TransportHandle, is_typing: bool },
    ConnectionChanged {
        handle: TransportHandle,
        status: ConnectionStatus,
    },
    /// The overlay wants the next chunk of an outbound file.
    ChunkRequested(ChunkRequest),
    /// A peer offered a file.
    FileOffered {
        handle: TransportHandle,
        file_id: FileId,
        name: String,
        size: u64,
    },
    /// A chunk of an inbound file arrived.
    ChunkReceived {
        handle: TransportHandle,
        file_id: FileId,
        position: u64,
        data: Vec<u8>,
    },
}

/// Extract the public key from a full overlay address (the first 32 bytes).
pub fn peer_key_from_address(address: &str) -> TransportResult<PeerKey> {
    let address = address.trim();
    if !address.is_ascii() || address.len() != OVERLAY_ADDRESS_LEN {
        return Err(TransportError::InvalidAddress(format!(
            "expected {OVERLAY_ADDRESS_LEN} hex chars, got {}",
            address.len()
        )));
    }
    PeerKey::from_hex(&address[..64]).map_err(|e| TransportError::InvalidAddress(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_key_from_address() {
        let key = PeerKey([0xab; 32]);
        let address = format!("{}{}", key.to_hex(), "0123456789ab");

        assert_eq!(peer_key_from_address(&address).unwrap(), key);
    }

    #[test]
    fn test_peer_key_from_short_address() {
        assert!(matches!(
            peer_key_from_address("abcdef"),
            Err(TransportError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_peer_key_from_non_hex_address() {
        let address = "z".repeat(OVERLAY_ADDRESS_LEN);
        assert!(peer_key_from_address(&address).is_err());
    }
}
