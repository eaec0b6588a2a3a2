//! Per-peer message log.
//!
//! Messages are ordered by their insertion position (`seq`), which never
//! changes: retrying a failed message updates it in place.

use rusqlite::params;
use uuid::Uuid;

use parley_shared::types::{MessageId, PeerKey, TransportMessageId};

use crate::columns;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Message, MessageDirection, MessageStatus};

const MESSAGE_COLUMNS: &str =
    "id, peer_pubkey, direction, status, body, reply_to, media, recording, temp_id, created_at";

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, peer_pubkey, direction, status, body, reply_to,
                                   media, recording, temp_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                message.id.0.to_string(),
                message.peer_key.to_hex(),
                message.direction.as_str(),
                message.status.as_str(),
                message.body,
                message.reply_to,
                serde_json::to_string(&message.media)?,
                message
                    .recording
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                message.temp_id.map(|t| t.0),
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.0.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// The whole log of one peer, oldest first.
    pub fn messages_for_peer(&self, peer: &PeerKey) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE peer_pubkey = ?1 ORDER BY seq ASC"
        ))?;

        let rows = stmt.query_map(params![peer.to_hex()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Every message currently in `status`, across all peers.
    pub fn messages_with_status(&self, status: MessageStatus) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE status = ?1 ORDER BY seq ASC"
        ))?;

        let rows = stmt.query_map(params![status.as_str()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Move a message to `next`, validated by [`MessageStatus::transition`].
    /// Returns the updated message.
    pub fn transition_message(&self, id: MessageId, next: MessageStatus) -> Result<Message> {
        let tx = self.conn().unchecked_transaction()?;

        let mut message = self.get_message(id)?;
        message.status = message.status.transition(next)?;

        tx.execute(
            "UPDATE messages SET status = ?1 WHERE id = ?2",
            params![message.status.as_str(), id.0.to_string()],
        )?;
        tx.commit()?;

        Ok(message)
    }

    pub fn set_message_temp_id(
        &self,
        id: MessageId,
        temp_id: Option<TransportMessageId>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET temp_id = ?1 WHERE id = ?2",
            params![temp_id.map(|t| t.0), id.0.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Drop every pending transport id. Transport ids do not survive an
    /// overlay restart.
    pub fn clear_all_temp_ids(&self) -> Result<usize> {
        Ok(self
            .conn()
            .execute("UPDATE messages SET temp_id = NULL WHERE temp_id IS NOT NULL", [])?)
    }

    pub fn delete_message(&self, id: MessageId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM messages WHERE id = ?1",
            params![id.0.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Delete the whole log of one peer, keeping the peer.
    pub fn clear_history(&self, peer: &PeerKey) -> Result<usize> {
        Ok(self.conn().execute(
            "DELETE FROM messages WHERE peer_pubkey = ?1",
            params![peer.to_hex()],
        )?)
    }

    /// Remove every peer and message.
    pub fn clear_all(&self) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;
        tx.execute("DELETE FROM messages", [])?;
        tx.execute("DELETE FROM peers", [])?;
        tx.commit()?;
        Ok(())
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let peer_hex: String = row.get(1)?;
    let direction_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let media_json: String = row.get(6)?;
    let recording_json: Option<String> = row.get(7)?;
    let temp_id: Option<u32> = row.get(8)?;
    let ts_str: String = row.get(9)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| columns::conversion_err(0, e))?;
    let direction = MessageDirection::parse(&direction_str)
        .ok_or_else(|| columns::unknown_value(2, "message direction", &direction_str))?;
    let status = MessageStatus::parse(&status_str)
        .ok_or_else(|| columns::unknown_value(3, "message status", &status_str))?;
    let media = serde_json::from_str(&media_json).map_err(|e| columns::conversion_err(6, e))?;
    let recording = recording_json
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| columns::conversion_err(7, e))?;

    Ok(Message {
        id: MessageId(id),
        peer_key: columns::peer_key(1, &peer_hex)?,
        direction,
        status,
        body: row.get(4)?,
        reply_to: row.get(5)?,
        media,
        recording,
        created_at: columns::timestamp(9, &ts_str)?,
        temp_id: temp_id.map(TransportMessageId),
    })
}
