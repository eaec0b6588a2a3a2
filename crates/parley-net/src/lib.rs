// Overlay transport seam: the P2P network itself lives outside this crate.

pub mod chunks;
pub mod memory;
pub mod peers;
pub mod presence;
pub mod transport;

pub use chunks::{chunk_channel, ChunkReply, ChunkRequest};
pub use memory::MemoryOverlay;
pub use peers::{DirectoryEntry, PeerDirectory};
pub use presence::{PresenceSnapshot, PresenceTracker};
pub use transport::{
    peer_key_from_address, OverlayEvent, OverlayTransport, TransportError, TransportResult,
};
