//! Deterministic in-memory overlay.
//!
//! Records every call made against it and lets tests flip peer status or
//! inject failures. Used as the transport double throughout the workspace.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use parley_shared::types::{ConnectionStatus, FileId, PeerKey, TransportHandle, TransportMessageId};

use crate::peers::PeerDirectory;
use crate::transport::{peer_key_from_address, OverlayTransport, TransportError, TransportResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentText {
    pub handle: TransportHandle,
    pub message_id: TransportMessageId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BegunTransfer {
    pub handle: TransportHandle,
    pub file_id: FileId,
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedChunk {
    pub handle: TransportHandle,
    pub file_id: FileId,
    pub position: u64,
    pub data: Vec<u8>,
}

#[derive(Default)]
struct State {
    directory: PeerDirectory,
    sent: Vec<SentText>,
    transfers: Vec<BegunTransfer>,
    chunks: Vec<PushedChunk>,
    typing: Vec<(TransportHandle, bool)>,
    requests: Vec<(String, String)>,
    removed: Vec<TransportHandle>,
    self_online: Option<bool>,
    next_message_id: u32,
    next_file_id: u32,
    fail_sends: bool,
    fail_listing: bool,
    fail_chunks: bool,
}

#[derive(Default)]
pub struct MemoryOverlay {
    state: Mutex<State>,
}

impl MemoryOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a peer as if it were already in the overlay's friend list.
    pub fn add_known_peer(&self, key: PeerKey, status: ConnectionStatus) -> TransportHandle {
        let mut state = self.state();
        let handle = state.directory.insert(key, None);
        state.directory.set_status(handle, status);
        handle
    }

    pub fn set_status(&self, key: &PeerKey, status: ConnectionStatus) {
        let mut state = self.state();
        if let Some(handle) = state.directory.handle_of(key) {
            state.directory.set_status(handle, status);
        }
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state().fail_sends = fail;
    }

    pub fn fail_listing(&self, fail: bool) {
        self.state().fail_listing = fail;
    }

    pub fn fail_chunk_pushes(&self, fail: bool) {
        self.state().fail_chunks = fail;
    }

    pub fn sent_texts(&self) -> Vec<SentText> {
        self.state().sent.clone()
    }

    pub fn begun_transfers(&self) -> Vec<BegunTransfer> {
        self.state().transfers.clone()
    }

    pub fn pushed_chunks(&self) -> Vec<PushedChunk> {
        self.state().chunks.clone()
    }

    pub fn typing_states(&self) -> Vec<(TransportHandle, bool)> {
        self.state().typing.clone()
    }

    /// `(address, intro)` of every contact request sent.
    pub fn contact_requests(&self) -> Vec<(String, String)> {
        self.state().requests.clone()
    }

    pub fn removed_peers(&self) -> Vec<TransportHandle> {
        self.state().removed.clone()
    }

    /// Last presence advertised through `set_self_online`.
    pub fn self_online(&self) -> Option<bool> {
        self.state().self_online
    }
}

fn connected(state: &State, handle: TransportHandle) -> TransportResult<()> {
    match state.directory.get(handle) {
        None => Err(TransportError::PeerNotFound),
        Some(entry) if !entry.status.is_online() => Err(TransportError::NotConnected),
        Some(_) => Ok(()),
    }
}

#[async_trait]
impl OverlayTransport for MemoryOverlay {
    async fn resolve_peer_handle(&self, key: &PeerKey) -> Option<TransportHandle> {
        self.state().directory.handle_of(key)
    }

    async fn peer_key(&self, handle: TransportHandle) -> Option<PeerKey> {
        self.state().directory.key_of(handle)
    }

    async fn list_peers(&self) -> TransportResult<Vec<TransportHandle>> {
        let state = self.state();
        if state.fail_listing {
            return Err(TransportError::Closed);
        }
        Ok(state.directory.handles())
    }

    async fn connection_status(&self, handle: TransportHandle) -> ConnectionStatus {
        self.state().directory.status(handle)
    }

    async fn send_text(
        &self,
        handle: TransportHandle,
        text: &str,
    ) -> TransportResult<TransportMessageId> {
        let mut state = self.state();
        connected(&state, handle)?;
        if state.fail_sends {
            return Err(TransportError::SendFailed("injected failure".into()));
        }

        let message_id = TransportMessageId(state.next_message_id);
        state.next_message_id += 1;
        state.sent.push(SentText {
            handle,
            message_id,
            text: text.to_string(),
        });
        debug!(handle = handle.0, message_id = message_id.0, "Memory overlay accepted text");
        Ok(message_id)
    }

    async fn begin_file_transfer(
        &self,
        handle: TransportHandle,
        name: &str,
        size: u64,
    ) -> TransportResult<FileId> {
        let mut state = self.state();
        connected(&state, handle)?;
        if state.fail_sends {
            return Err(TransportError::SendFailed("injected failure".into()));
        }

        let file_id = FileId(state.next_file_id);
        state.next_file_id += 1;
        state.transfers.push(BegunTransfer {
            handle,
            file_id,
            name: name.to_string(),
            size,
        });
        Ok(file_id)
    }

    async fn push_chunk(
        &self,
        handle: TransportHandle,
        file_id: FileId,
        position: u64,
        data: &[u8],
    ) -> TransportResult<()> {
        let mut state = self.state();
        if state.fail_chunks {
            return Err(TransportError::SendFailed("injected chunk failure".into()));
        }
        connected(&state, handle)?;
        state.chunks.push(PushedChunk {
            handle,
            file_id,
            position,
            data: data.to_vec(),
        });
        Ok(())
    }

    async fn add_peer(&self, address: &str, intro: &str) -> TransportResult<TransportHandle> {
        let key = peer_key_from_address(address)?;
        let mut state = self.state();
        if state.fail_sends {
            return Err(TransportError::SendFailed("injected failure".into()));
        }
        let handle = state.directory.insert(key, Some(address.to_string()));
        state.requests.push((address.to_string(), intro.to_string()));
        Ok(handle)
    }

    async fn remove_peer(&self, handle: TransportHandle) -> bool {
        let mut state = self.state();
        let removed = state.directory.remove(handle);
        if removed {
            state.removed.push(handle);
        }
        removed
    }

    async fn set_typing_state(&self, handle: TransportHandle, is_typing: bool) -> TransportResult<()> {
        let mut state = self.state();
        connected(&state, handle)?;
        state.typing.push((handle, is_typing));
        Ok(())
    }

    async fn set_self_online(&self, online: bool) -> TransportResult<()> {
        let mut state = self.state();
        if state.fail_sends {
            return Err(TransportError::Closed);
        }
        state.self_online = Some(online);
        Ok(())
    }
}
