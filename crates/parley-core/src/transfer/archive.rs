//! Password-sealed archive container.
//!
//! Layout: `MAGIC (4) || VERSION (1) || nonce (24) || ciphertext`, where the
//! plaintext is the deflated bincode encoding of the entry list and the key
//! is derived from the password with BLAKE3.

use std::collections::HashSet;
use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use parley_shared::constants::{ARCHIVE_MAGIC, ARCHIVE_VERSION, KDF_CONTEXT_ARCHIVE_KEY};
use parley_shared::crypto;

use crate::error::ArchiveError;

const HEADER_LEN: usize = ARCHIVE_MAGIC.len() + 1;

/// Upper bound on the inflated entry list.
const MAX_EXPANDED_SIZE: u64 = 256 * 1024 * 1024;

/// One named file inside an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub name: String,
    pub data: Vec<u8>,
}

impl ArchiveEntry {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

pub fn seal(entries: &[ArchiveEntry], password: &str) -> Result<Vec<u8>, ArchiveError> {
    check_names(entries)?;
    let body = bincode::serialize(entries).map_err(|e| ArchiveError::Malformed(e.to_string()))?;
    let body = deflate(&body)?;

    let key = crypto::derive_key_from_passphrase(password.as_bytes(), KDF_CONTEXT_ARCHIVE_KEY);
    let sealed = crypto::encrypt(&key, &body).map_err(|_| ArchiveError::Encryption)?;

    let mut out = Vec::with_capacity(HEADER_LEN + sealed.len());
    out.extend_from_slice(ARCHIVE_MAGIC);
    out.push(ARCHIVE_VERSION);
    out.extend_from_slice(&sealed);
    Ok(out)
}

pub fn open(data: &[u8], password: &str) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    if data.len() < HEADER_LEN || &data[..ARCHIVE_MAGIC.len()] != ARCHIVE_MAGIC {
        return Err(ArchiveError::BadMagic);
    }
    let version = data[ARCHIVE_MAGIC.len()];
    if version != ARCHIVE_VERSION {
        return Err(ArchiveError::UnsupportedVersion(version));
    }

    let key = crypto::derive_key_from_passphrase(password.as_bytes(), KDF_CONTEXT_ARCHIVE_KEY);
    let body = crypto::decrypt(&key, &data[HEADER_LEN..]).map_err(|_| ArchiveError::Decryption)?;
    let body = inflate(&body)?;

    let entries: Vec<ArchiveEntry> =
        bincode::deserialize(&body).map_err(|e| ArchiveError::Malformed(e.to_string()))?;
    check_names(&entries)?;
    Ok(entries)
}

fn deflate(body: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
    encoder
        .write_all(body)
        .map_err(|e| ArchiveError::Malformed(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| ArchiveError::Malformed(e.to_string()))
}

fn inflate(body: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    let mut out = Vec::new();
    DeflateDecoder::new(body)
        .take(MAX_EXPANDED_SIZE + 1)
        .read_to_end(&mut out)
        .map_err(|e| ArchiveError::Malformed(e.to_string()))?;
    if out.len() as u64 > MAX_EXPANDED_SIZE {
        return Err(ArchiveError::Malformed("inflated archive too large".into()));
    }
    Ok(out)
}

/// Entry names become file names on extraction: reject anything that could
/// escape the destination directory, and duplicates.
fn check_names(entries: &[ArchiveEntry]) -> Result<(), ArchiveError> {
    let mut seen = HashSet::with_capacity(entries.len());
    for entry in entries {
        let name = entry.name.as_str();
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains('\0')
            || name.contains("..")
        {
            return Err(ArchiveError::InvalidEntryName(entry.name.clone()));
        }
        if !seen.insert(name) {
            return Err(ArchiveError::DuplicateEntry(entry.name.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<ArchiveEntry> {
        vec![
            ArchiveEntry::new("request.json", br#"{"senderAddress":"a"}"#.to_vec()),
            ArchiveEntry::new("photo.jpg", vec![0xff, 0xd8, 0xff]),
        ]
    }

    #[test]
    fn test_seal_open() {
        let sealed = seal(&sample(), "hunter2").unwrap();
        assert_eq!(&sealed[..4], b"PRLA");
        assert_eq!(open(&sealed, "hunter2").unwrap(), sample());
    }

    #[test]
    fn test_wrong_password() {
        let sealed = seal(&sample(), "right").unwrap();
        assert!(matches!(open(&sealed, "wrong"), Err(ArchiveError::Decryption)));
    }

    #[test]
    fn test_bad_header() {
        assert!(matches!(open(b"ZIP!\x01rest", "pw"), Err(ArchiveError::BadMagic)));
        assert!(matches!(open(b"PR", "pw"), Err(ArchiveError::BadMagic)));

        let mut sealed = seal(&sample(), "pw").unwrap();
        sealed[4] = 9;
        assert!(matches!(open(&sealed, "pw"), Err(ArchiveError::UnsupportedVersion(9))));
    }

    #[test]
    fn test_traversal_names_rejected() {
        for name in ["../etc/passwd", "a/b", "a\\b", ""] {
            let entries = vec![ArchiveEntry::new(name, vec![1])];
            assert!(matches!(
                seal(&entries, "pw"),
                Err(ArchiveError::InvalidEntryName(_))
            ));
        }
    }

    #[test]
    fn test_body_is_compressed() {
        let text = "hello from parley ".repeat(500);
        let entries = vec![ArchiveEntry::new("request.json", text.clone().into_bytes())];
        let sealed = seal(&entries, "pw").unwrap();
        assert!(sealed.len() < text.len() / 4);
        assert_eq!(open(&sealed, "pw").unwrap(), entries);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let entries = vec![ArchiveEntry::new("a.jpg", vec![1]), ArchiveEntry::new("a.jpg", vec![2])];
        assert!(matches!(seal(&entries, "pw"), Err(ArchiveError::DuplicateEntry(_))));
    }
}
