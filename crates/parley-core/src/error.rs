use thiserror::Error;

use parley_net::TransportError;
use parley_shared::error::{CryptoError, ProtocolError};
use parley_store::StoreError;

/// Errors from the messaging side (send, retry, contacts).
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Peer not found")]
    PeerNotFound,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Contact request to {0} failed")]
    ContactRequestFailed(String),

    #[error("Sender address does not belong to the requesting peer")]
    AddressMismatch,

    #[error("Messages with attachments are resent as a new transfer")]
    HasAttachments,

    #[error("Contact is in state {0}, expected {1}")]
    UnexpectedPeerState(&'static str, &'static str),
}

/// Errors from the encrypted archive container.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Not an archive (bad magic)")]
    BadMagic,

    #[error("Unsupported archive version {0}")]
    UnsupportedVersion(u8),

    #[error("Archive encryption failed")]
    Encryption,

    #[error("Archive decryption failed: wrong password or corrupted data")]
    Decryption,

    #[error("Malformed archive: {0}")]
    Malformed(String),

    #[error("Archive is missing required entry {0}")]
    MissingEntry(&'static str),

    #[error("Invalid archive entry name: {0}")]
    InvalidEntryName(String),

    #[error("Duplicate archive entry: {0}")]
    DuplicateEntry(String),

    #[error("Invalid metadata: {0}")]
    Metadata(#[from] ProtocolError),
}

/// Errors from sending or receiving a file transfer.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("File is empty: {0}")]
    EmptyFile(String),

    #[error("Payload too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },

    #[error("Recipient has no encryption key")]
    MissingEncryptionKey,

    #[error("No transfer session for this file")]
    UnknownSession,

    #[error("Chunk [{position}, {end}) is outside the {size}-byte payload")]
    OutOfRange { position: u64, end: u64, size: u64 },

    #[error("Archive name does not carry a password: {0}")]
    InvalidArchiveName(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the [`Messenger`](crate::Messenger) facade.
#[derive(Error, Debug)]
pub enum MessengerError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
