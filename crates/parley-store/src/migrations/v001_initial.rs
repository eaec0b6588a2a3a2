//! v001 -- Initial schema creation.
//!
//! Creates the `peers` and `messages` tables.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Peers
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS peers (
    pubkey                TEXT PRIMARY KEY NOT NULL,  -- hex-encoded 32-byte overlay key
    address               TEXT NOT NULL,              -- full overlay address
    local_address         TEXT,
    display_name          TEXT,
    status                TEXT NOT NULL,              -- initial / requested / online / offline
    is_typing             INTEGER NOT NULL DEFAULT 0,
    encryption_key        TEXT,                       -- hex-encoded X25519 key
    push_token            TEXT,
    has_unseen            INTEGER NOT NULL DEFAULT 0,
    can_save_media        INTEGER NOT NULL DEFAULT 0,
    retain_history        INTEGER NOT NULL DEFAULT 1,
    is_password_protected INTEGER NOT NULL DEFAULT 0,
    created_at            TEXT NOT NULL               -- RFC-3339
);

CREATE INDEX IF NOT EXISTS idx_peers_address ON peers(address);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,  -- log position, never reused
    id           TEXT NOT NULL UNIQUE,               -- UUID v4
    peer_pubkey  TEXT NOT NULL,                      -- FK -> peers(pubkey)
    direction    TEXT NOT NULL,                      -- own / received / system
    status       TEXT NOT NULL,                      -- sending / sent / failed / read
    body         TEXT NOT NULL,
    reply_to     TEXT,
    media        TEXT NOT NULL DEFAULT '[]',         -- JSON array of MediaRef
    recording    TEXT,                               -- JSON RecordingDescriptor
    temp_id      INTEGER,                            -- pending transport message id
    created_at   TEXT NOT NULL,

    FOREIGN KEY (peer_pubkey) REFERENCES peers(pubkey) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_peer_seq ON messages(peer_pubkey, seq);
CREATE INDEX IF NOT EXISTS idx_messages_temp_id ON messages(peer_pubkey, temp_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
