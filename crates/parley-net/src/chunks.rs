//! Request/response channel for on-demand file chunks.
//!
//! The overlay pulls outbound file data: it sends a [`ChunkRequest`] with an
//! offset and a length, the sender answers with a [`ChunkReply`]. A request
//! of length zero is the overlay's completion signal.

use bytes::Bytes;
use tokio::sync::mpsc;

use parley_shared::types::{FileId, TransportHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRequest {
    pub handle: TransportHandle,
    pub file_id: FileId,
    pub position: u64,
    pub length: usize,
}

impl ChunkRequest {
    pub fn new(handle: TransportHandle, file_id: FileId, position: u64, length: usize) -> Self {
        Self {
            handle,
            file_id,
            position,
            length,
        }
    }

    /// Zero-length requests terminate a successful transfer.
    pub fn is_completion(&self) -> bool {
        self.length == 0
    }

    /// Exclusive end offset of the requested range.
    pub fn end(&self) -> u64 {
        self.position.saturating_add(self.length as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkReply {
    /// Bytes for `[position, position + data.len())`.
    Data { position: u64, data: Bytes },
    /// The transfer is complete; nothing more to send.
    Done,
}

/// Create the channel the overlay uses to submit chunk requests.
pub fn chunk_channel(capacity: usize) -> (mpsc::Sender<ChunkRequest>, mpsc::Receiver<ChunkRequest>) {
    mpsc::channel(capacity)
}
