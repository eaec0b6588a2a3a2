//! CRUD operations for [`Peer`] records.

use rusqlite::{params, OptionalExtension};

use parley_shared::types::{PeerKey, PresenceStatus};

use crate::columns;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Peer;

const PEER_COLUMNS: &str = "pubkey, address, local_address, display_name, status, is_typing,
     encryption_key, push_token, has_unseen, can_save_media, retain_history,
     is_password_protected, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Create / update
    // ------------------------------------------------------------------

    /// Insert a peer, or update every mutable field of the existing record
    /// with the same public key. `created_at` of an existing record is kept.
    ///
    /// This is an in-place update, never a delete + insert, so the peer's
    /// message log survives.
    pub fn upsert_peer(&self, peer: &Peer) -> Result<()> {
        self.conn().execute(
            "INSERT INTO peers (pubkey, address, local_address, display_name, status, is_typing,
                                encryption_key, push_token, has_unseen, can_save_media,
                                retain_history, is_password_protected, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(pubkey) DO UPDATE SET
                address               = excluded.address,
                local_address         = excluded.local_address,
                display_name          = excluded.display_name,
                status                = excluded.status,
                is_typing             = excluded.is_typing,
                encryption_key        = excluded.encryption_key,
                push_token            = excluded.push_token,
                has_unseen            = excluded.has_unseen,
                can_save_media        = excluded.can_save_media,
                retain_history        = excluded.retain_history,
                is_password_protected = excluded.is_password_protected",
            params![
                peer.key.to_hex(),
                peer.address,
                peer.local_address,
                peer.display_name,
                peer.status.as_str(),
                peer.is_typing,
                peer.encryption_key.map(|k| k.to_hex()),
                peer.push_token,
                peer.has_unseen,
                peer.can_save_media,
                peer.retain_history,
                peer.is_password_protected,
                peer.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_peer(&self, key: &PeerKey) -> Result<Peer> {
        self.conn()
            .query_row(
                &format!("SELECT {PEER_COLUMNS} FROM peers WHERE pubkey = ?1"),
                params![key.to_hex()],
                row_to_peer,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Look a peer up by its full overlay address.
    pub fn get_peer_by_address(&self, address: &str) -> Result<Option<Peer>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {PEER_COLUMNS} FROM peers WHERE address = ?1"),
                params![address],
                row_to_peer,
            )
            .optional()?)
    }

    /// List all peers, oldest first.
    pub fn list_peers(&self) -> Result<Vec<Peer>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {PEER_COLUMNS} FROM peers ORDER BY created_at ASC, pubkey ASC"
        ))?;

        let rows = stmt.query_map([], row_to_peer)?;

        let mut peers = Vec::new();
        for row in rows {
            peers.push(row?);
        }
        Ok(peers)
    }

    // ------------------------------------------------------------------
    // Field updates
    // ------------------------------------------------------------------

    /// Returns `false` if no such peer exists.
    pub fn set_peer_status(&self, key: &PeerKey, status: PresenceStatus) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE peers SET status = ?1 WHERE pubkey = ?2",
            params![status.as_str(), key.to_hex()],
        )?;
        Ok(affected > 0)
    }

    pub fn set_peer_typing(&self, key: &PeerKey, is_typing: bool) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE peers SET is_typing = ?1 WHERE pubkey = ?2",
            params![is_typing, key.to_hex()],
        )?;
        Ok(affected > 0)
    }

    /// Move every online peer to offline. Pending requests keep their
    /// status. Returns the number of peers changed.
    pub fn set_all_peers_offline(&self) -> Result<usize> {
        Ok(self.conn().execute(
            "UPDATE peers SET status = ?1 WHERE status = ?2",
            params![
                PresenceStatus::Offline.as_str(),
                PresenceStatus::Online.as_str()
            ],
        )?)
    }

    pub fn set_all_peers_not_typing(&self) -> Result<usize> {
        Ok(self
            .conn()
            .execute("UPDATE peers SET is_typing = 0 WHERE is_typing != 0", [])?)
    }

    pub fn mark_seen(&self, key: &PeerKey) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE peers SET has_unseen = 0 WHERE pubkey = ?1",
            params![key.to_hex()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a peer together with its whole message log.
    pub fn delete_peer(&self, key: &PeerKey) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM peers WHERE pubkey = ?1", params![key.to_hex()])?;
        Ok(affected > 0)
    }
}

fn row_to_peer(row: &rusqlite::Row<'_>) -> rusqlite::Result<Peer> {
    let key_hex: String = row.get(0)?;
    let status_str: String = row.get(4)?;
    let encryption_hex: Option<String> = row.get(6)?;
    let ts_str: String = row.get(12)?;

    let status = PresenceStatus::parse(&status_str)
        .ok_or_else(|| columns::unknown_value(4, "presence status", &status_str))?;

    Ok(Peer {
        key: columns::peer_key(0, &key_hex)?,
        address: row.get(1)?,
        local_address: row.get(2)?,
        display_name: row.get(3)?,
        status,
        is_typing: row.get(5)?,
        encryption_key: columns::encryption_key(6, encryption_hex)?,
        push_token: row.get(7)?,
        has_unseen: row.get(8)?,
        can_save_media: row.get(9)?,
        retain_history: row.get(10)?,
        is_password_protected: row.get(11)?,
        created_at: columns::timestamp(12, &ts_str)?,
    })
}
