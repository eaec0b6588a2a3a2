//! Column decoding helpers shared by the row mappers.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;

use parley_shared::types::{EncryptionKey, PeerKey};

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
struct UnknownValue {
    kind: &'static str,
    value: String,
}

pub(crate) fn conversion_err<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn unknown_value(idx: usize, kind: &'static str, value: &str) -> rusqlite::Error {
    conversion_err(
        idx,
        UnknownValue {
            kind,
            value: value.to_string(),
        },
    )
}

pub(crate) fn peer_key(idx: usize, hex_key: &str) -> rusqlite::Result<PeerKey> {
    PeerKey::from_hex(hex_key).map_err(|e| conversion_err(idx, e))
}

pub(crate) fn encryption_key(idx: usize, hex_key: Option<String>) -> rusqlite::Result<Option<EncryptionKey>> {
    hex_key
        .map(|k| EncryptionKey::from_hex(&k).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

pub(crate) fn timestamp(idx: usize, ts: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}
