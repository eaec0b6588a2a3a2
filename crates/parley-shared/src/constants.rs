/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// X25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Maximum text payload handed to the overlay in one message (the transport
/// rejects anything larger).
pub const MAX_MESSAGE_SIZE: usize = 1372;

/// Maximum archive size in bytes (50 MiB)
pub const MAX_FILE_SIZE: usize = 50 * 1024 * 1024;

/// Default presence poll interval in seconds
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default pagination window
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Default length of the one-time archive password
pub const DEFAULT_PASSWORD_LENGTH: usize = 32;

/// Archive entry holding the serialized request model
pub const ARCHIVE_REQUEST_ENTRY: &str = "request.json";

/// Archive entry holding the optional voice recording descriptor
pub const ARCHIVE_RECORDING_ENTRY: &str = "recording.json";

/// Extension appended to the archive name announced to the transport
pub const ARCHIVE_EXTENSION: &str = "parcel";

/// Magic prefix of a sealed archive body
pub const ARCHIVE_MAGIC: &[u8; 4] = b"PRLA";

/// Archive container format version
pub const ARCHIVE_VERSION: u8 = 2;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_ARCHIVE_KEY: &str = "parley-archive-key-v1";
pub const KDF_CONTEXT_SEALED_BOX: &str = "parley-sealed-box-v1";
