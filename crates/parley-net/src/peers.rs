//! Overlay-side peer directory.
//!
//! Maps overlay handles to public keys and tracks each peer's current
//! connection status. Handles are allocated sequentially and never reused
//! while the directory lives.

use std::collections::HashMap;

use tracing::debug;

use parley_shared::types::{ConnectionStatus, PeerKey, TransportHandle};

/// Information about a known peer.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    /// The overlay-local handle.
    pub handle: TransportHandle,
    /// The peer's stable public key.
    pub key: PeerKey,
    /// Full overlay address, if known (inbound requests only carry the key).
    pub address: Option<String>,
    pub status: ConnectionStatus,
    /// Timestamp of the last status change (Unix epoch millis).
    pub changed_at: u64,
}

/// Tracks all peers the overlay knows about.
#[derive(Debug, Clone)]
pub struct PeerDirectory {
    peers: HashMap<TransportHandle, DirectoryEntry>,
    next_handle: u32,
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl PeerDirectory {
    /// Create a new, empty directory.
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
            next_handle: 0,
        }
    }

    /// Register a peer, returning its handle. A key that is already present
    /// keeps its handle; only the address is refreshed.
    pub fn insert(&mut self, key: PeerKey, address: Option<String>) -> TransportHandle {
        if let Some(handle) = self.handle_of(&key) {
            if let (Some(entry), Some(address)) = (self.peers.get_mut(&handle), address) {
                entry.address = Some(address);
            }
            return handle;
        }

        let handle = TransportHandle(self.next_handle);
        self.next_handle += 1;

        debug!(peer = %key.short(), handle = handle.0, "Tracking new peer");

        self.peers.insert(
            handle,
            DirectoryEntry {
                handle,
                key,
                address,
                status: ConnectionStatus::None,
                changed_at: now_millis(),
            },
        );
        handle
    }

    /// Forget a peer. Returns whether it was known.
    pub fn remove(&mut self, handle: TransportHandle) -> bool {
        let removed = self.peers.remove(&handle).is_some();
        if removed {
            debug!(handle = handle.0, "Removed peer from directory");
        }
        removed
    }

    pub fn set_status(&mut self, handle: TransportHandle, status: ConnectionStatus) -> bool {
        match self.peers.get_mut(&handle) {
            Some(entry) => {
                entry.status = status;
                entry.changed_at = now_millis();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, handle: TransportHandle) -> Option<&DirectoryEntry> {
        self.peers.get(&handle)
    }

    pub fn handle_of(&self, key: &PeerKey) -> Option<TransportHandle> {
        self.peers
            .values()
            .find(|entry| &entry.key == key)
            .map(|entry| entry.handle)
    }

    pub fn key_of(&self, handle: TransportHandle) -> Option<PeerKey> {
        self.peers.get(&handle).map(|entry| entry.key)
    }

    /// Connection status of a handle; unknown handles are `None`.
    pub fn status(&self, handle: TransportHandle) -> ConnectionStatus {
        self.peers
            .get(&handle)
            .map(|entry| entry.status)
            .unwrap_or(ConnectionStatus::None)
    }

    /// All known handles in allocation order.
    pub fn handles(&self) -> Vec<TransportHandle> {
        let mut handles: Vec<_> = self.peers.keys().copied().collect();
        handles.sort();
        handles
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn online_count(&self) -> usize {
        self.peers
            .values()
            .filter(|entry| entry.status.is_online())
            .count()
    }
}

impl Default for PeerDirectory {
    fn default() -> Self {
        Self::new()
    }
}
