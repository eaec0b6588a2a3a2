use parley_shared::protocol::MessengerRequest;
use parley_shared::types::{EncryptionKey, PeerKey};
use parley_store::Peer;

/// What the local user tells peers about themselves in every request.
#[derive(Debug, Clone)]
pub struct LocalProfile {
    /// Our full overlay address.
    pub address: String,
    pub peer_key: PeerKey,
    pub encryption_key: EncryptionKey,
    pub local_address: Option<String>,
    pub push_token: Option<String>,
}

impl LocalProfile {
    /// Request skeleton addressed to `peer`, carrying that chat's policy.
    pub fn request_for(&self, peer: &Peer) -> MessengerRequest {
        MessengerRequest {
            can_save_media: peer.can_save_media,
            is_chat_history_stored: peer.retain_history,
            ..self.request()
        }
    }

    /// Request skeleton with default chat policy (contact handshakes).
    pub fn request(&self) -> MessengerRequest {
        MessengerRequest {
            sender_local_address: self.local_address.clone(),
            sender_encryption_key: Some(self.encryption_key),
            sender_peer_key: Some(self.peer_key),
            sender_push_token: self.push_token.clone(),
            ..MessengerRequest::new(self.address.clone())
        }
    }
}
