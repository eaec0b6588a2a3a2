//! Contact lifecycle: requests in both directions, presence persistence,
//! removal.

use std::sync::Arc;

use tracing::{debug, info, warn};

use parley_net::{peer_key_from_address, OverlayTransport, PresenceSnapshot};
use parley_shared::protocol::MessengerRequest;
use parley_shared::types::{PeerKey, PresenceStatus};
use parley_store::{Peer, StoreError};

use crate::dispatcher::MessageDispatcher;
use crate::error::DispatchError;
use crate::events::{CoreEvent, EventSink};
use crate::{lock_db, SharedDatabase};

/// Refresh a stored contact from the details carried in one of its
/// requests. The address is only replaced by one that belongs to the same
/// key.
pub(crate) fn apply_request(contact: &mut Peer, request: &MessengerRequest) {
    let address = request.sender_address.trim();
    if matches!(peer_key_from_address(address), Ok(key) if key == contact.key) {
        contact.address = address.to_string();
    }
    if let Some(local) = &request.sender_local_address {
        contact.local_address = Some(local.clone());
    }
    if let Some(key) = request.sender_encryption_key {
        contact.encryption_key = Some(key);
    }
    if let Some(token) = &request.sender_push_token {
        contact.push_token = Some(token.clone());
    }
    contact.can_save_media = request.can_save_media;
    contact.retain_history = request.is_chat_history_stored;
}

pub struct ContactManager {
    transport: Arc<dyn OverlayTransport>,
    db: SharedDatabase,
    dispatcher: Arc<MessageDispatcher>,
    events: EventSink,
}

impl ContactManager {
    pub fn new(
        transport: Arc<dyn OverlayTransport>,
        db: SharedDatabase,
        dispatcher: Arc<MessageDispatcher>,
        events: EventSink,
    ) -> Self {
        Self {
            transport,
            db,
            dispatcher,
            events,
        }
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    /// Ask the owner of `address` to become a contact. The peer is stored as
    /// `Requested` until presence polling sees it online.
    pub async fn request_contact(
        &self,
        address: &str,
        intro: Option<String>,
    ) -> Result<Peer, DispatchError> {
        let request = MessengerRequest {
            message_text: intro,
            ..self.dispatcher.profile().request()
        };
        let payload = request.to_wire_text()?;

        let key = self
            .dispatcher
            .initiate_contact(address, &payload)
            .await
            .ok_or_else(|| DispatchError::ContactRequestFailed(address.to_string()))?;

        let db = lock_db(&self.db);
        let peer = match db.get_peer(&key) {
            Ok(mut existing) => {
                existing.address = address.to_string();
                existing
            }
            Err(StoreError::NotFound) => Peer::new(key, address, PresenceStatus::Requested),
            Err(e) => return Err(e.into()),
        };
        db.upsert_peer(&peer)?;
        Ok(peer)
    }

    /// An unknown peer asked to become a contact. Stored as `Initial`; a
    /// request from an existing contact only refreshes its details.
    pub fn on_contact_request(&self, key: PeerKey, text: &str) -> Result<Peer, DispatchError> {
        let request = MessengerRequest::from_json(text.as_bytes())?;
        let address = request.sender_address.trim();
        match peer_key_from_address(address) {
            Ok(owner) if owner == key => {}
            _ => {
                warn!(peer = %key.short(), "Contact request with foreign sender address");
                return Err(DispatchError::AddressMismatch);
            }
        }

        let (peer, is_new) = {
            let db = lock_db(&self.db);
            let (mut peer, is_new) = match db.get_peer(&key) {
                Ok(existing) => (existing, false),
                Err(StoreError::NotFound) => (Peer::new(key, address, PresenceStatus::Initial), true),
                Err(e) => return Err(e.into()),
            };
            apply_request(&mut peer, &request);
            db.upsert_peer(&peer)?;
            (peer, is_new)
        };

        if is_new {
            info!(peer = %key.short(), "Incoming contact request");
            self.events.emit(CoreEvent::ContactRequest { peer: key });
        } else {
            debug!(peer = %key.short(), "Contact renegotiated");
        }
        Ok(peer)
    }

    /// Accept an `Initial` contact by adding it on the overlay.
    pub async fn accept_contact(&self, key: &PeerKey) -> Result<Peer, DispatchError> {
        let mut peer = self.get_contact(key)?.ok_or(DispatchError::PeerNotFound)?;
        if peer.status != PresenceStatus::Initial {
            return Err(DispatchError::UnexpectedPeerState(
                peer.status.as_str(),
                PresenceStatus::Initial.as_str(),
            ));
        }

        let payload = self.dispatcher.profile().request_for(&peer).to_wire_text()?;
        self.transport.add_peer(&peer.address, &payload).await?;

        peer.status = PresenceStatus::Offline;
        lock_db(&self.db).upsert_peer(&peer)?;
        info!(peer = %key.short(), "Contact accepted");
        self.events.emit(CoreEvent::PresenceChanged {
            peer: *key,
            status: peer.status,
        });
        Ok(peer)
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn get_contact(&self, key: &PeerKey) -> Result<Option<Peer>, DispatchError> {
        match lock_db(&self.db).get_peer(key) {
            Ok(peer) => Ok(Some(peer)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_contact_by_address(&self, address: &str) -> Result<Option<Peer>, DispatchError> {
        Ok(lock_db(&self.db).get_peer_by_address(address)?)
    }

    pub fn list_contacts(&self) -> Result<Vec<Peer>, DispatchError> {
        Ok(lock_db(&self.db).list_peers()?)
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Remove a contact from the overlay and the store, including its whole
    /// message log.
    pub async fn remove_contact(&self, key: &PeerKey) -> Result<bool, DispatchError> {
        if let Some(handle) = self.transport.resolve_peer_handle(key).await {
            if !self.transport.remove_peer(handle).await {
                warn!(peer = %key.short(), "Overlay did not know the removed peer");
            }
        }
        self.dispatcher.on_peer_offline(key);

        let removed = lock_db(&self.db).delete_peer(key)?;
        if removed {
            info!(peer = %key.short(), "Contact removed");
        }
        Ok(removed)
    }

    pub fn set_status(&self, key: &PeerKey, status: PresenceStatus) -> Result<bool, DispatchError> {
        let updated = lock_db(&self.db).set_peer_status(key, status)?;
        if updated {
            self.events.emit(CoreEvent::PresenceChanged { peer: *key, status });
        }
        Ok(updated)
    }

    pub fn set_all_offline(&self) -> Result<usize, DispatchError> {
        Ok(lock_db(&self.db).set_all_peers_offline()?)
    }

    pub fn set_all_not_typing(&self) -> Result<usize, DispatchError> {
        Ok(lock_db(&self.db).set_all_peers_not_typing()?)
    }

    pub fn mark_seen(&self, key: &PeerKey) -> Result<bool, DispatchError> {
        Ok(lock_db(&self.db).mark_seen(key)?)
    }

    pub fn clear_history(&self, key: &PeerKey) -> Result<usize, DispatchError> {
        Ok(lock_db(&self.db).clear_history(key)?)
    }

    /// Forget every contact and message.
    pub fn clear_all(&self) -> Result<(), DispatchError> {
        lock_db(&self.db).clear_all()?;
        warn!("All contacts and messages cleared");
        Ok(())
    }

    /// Persist a presence snapshot. Contacts absent from the snapshot are
    /// left alone; `Initial` contacts never change, and `Requested` ones
    /// only move once the peer comes online (it accepted).
    ///
    /// Contacts that went offline have their pending messages failed.
    /// Returns every contact whose status changed.
    pub fn apply_presence(
        &self,
        snapshot: &PresenceSnapshot,
    ) -> Result<Vec<(PeerKey, PresenceStatus)>, DispatchError> {
        let changes = {
            let db = lock_db(&self.db);
            let mut changes = Vec::new();
            for contact in db.list_peers()? {
                let Some(&online) = snapshot.get(&contact.key) else {
                    continue;
                };
                let next = match (contact.status, online) {
                    (PresenceStatus::Initial, _) | (PresenceStatus::Requested, false) => continue,
                    (_, online) => PresenceStatus::from_online(online),
                };
                if next == contact.status {
                    continue;
                }
                db.set_peer_status(&contact.key, next)?;
                if next == PresenceStatus::Offline {
                    db.set_peer_typing(&contact.key, false)?;
                }
                changes.push((contact.key, next));
            }
            changes
        };

        for (key, status) in &changes {
            debug!(peer = %key.short(), status = status.as_str(), "Presence changed");
            if *status == PresenceStatus::Offline {
                self.dispatcher.on_peer_offline(key);
            }
            self.events.emit(CoreEvent::PresenceChanged {
                peer: *key,
                status: *status,
            });
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{add_contact, harness, Harness};
    use parley_shared::types::{ConnectionStatus, EncryptionKey};
    use parley_store::{Message, MessageStatus};

    fn contacts(h: &Harness) -> ContactManager {
        ContactManager::new(
            h.overlay.clone(),
            h.db.clone(),
            h.dispatcher.clone(),
            EventSink::disabled(),
        )
    }

    fn address_of(key: &PeerKey) -> String {
        format!("{}00000000abcd", key.to_hex())
    }

    #[tokio::test]
    async fn test_request_contact() {
        let h = harness();
        let manager = contacts(&h);
        let key = PeerKey([0x31; 32]);

        let peer = manager
            .request_contact(&address_of(&key), Some("hi, it's me".into()))
            .await
            .unwrap();
        assert_eq!(peer.key, key);
        assert_eq!(peer.status, PresenceStatus::Requested);

        let (_, intro) = &h.overlay.contact_requests()[0];
        let request = MessengerRequest::from_json(intro.as_bytes()).unwrap();
        assert_eq!(request.message_text.as_deref(), Some("hi, it's me"));
        assert_eq!(request.sender_address, h.dispatcher.profile().address);
    }

    #[tokio::test]
    async fn test_request_contact_invalid_address() {
        let h = harness();
        assert!(matches!(
            contacts(&h).request_contact("nope", None).await,
            Err(DispatchError::ContactRequestFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_incoming_request_then_accept() {
        let h = harness();
        let manager = contacts(&h);
        let key = PeerKey([0x32; 32]);
        let mut request = MessengerRequest::new(address_of(&key)).with_text("add me");
        request.sender_encryption_key = Some(EncryptionKey([5; 32]));

        let peer = manager
            .on_contact_request(key, &request.to_json().unwrap())
            .unwrap();
        assert_eq!(peer.status, PresenceStatus::Initial);
        assert_eq!(peer.encryption_key, Some(EncryptionKey([5; 32])));

        let accepted = manager.accept_contact(&key).await.unwrap();
        assert_eq!(accepted.status, PresenceStatus::Offline);
        assert!(h.overlay.resolve_peer_handle(&key).await.is_some());

        assert!(matches!(
            manager.accept_contact(&key).await,
            Err(DispatchError::UnexpectedPeerState(..))
        ));
    }

    #[tokio::test]
    async fn test_request_with_foreign_address_rejected() {
        let h = harness();
        let request = MessengerRequest::new(address_of(&PeerKey([1; 32])));
        assert!(matches!(
            contacts(&h).on_contact_request(PeerKey([2; 32]), &request.to_json().unwrap()),
            Err(DispatchError::AddressMismatch)
        ));
    }

    #[tokio::test]
    async fn test_remove_contact_cascades() {
        let h = harness();
        let manager = contacts(&h);
        let (key, handle) = add_contact(&h, 0x33, ConnectionStatus::Full);
        lock_db(&h.db)
            .insert_message(&Message::incoming(key, "old"))
            .unwrap();

        assert!(manager.remove_contact(&key).await.unwrap());
        assert_eq!(h.overlay.removed_peers(), vec![handle]);
        assert!(manager.get_contact(&key).unwrap().is_none());
        assert!(lock_db(&h.db).messages_for_peer(&key).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_presence() {
        let h = harness();
        let manager = contacts(&h);
        let (online, _) = add_contact(&h, 0x34, ConnectionStatus::Full);
        let (requested, _) = add_contact(&h, 0x35, ConnectionStatus::None);
        manager.set_status(&requested, PresenceStatus::Requested).unwrap();
        manager.set_status(&online, PresenceStatus::Offline).unwrap();

        let mut snapshot = PresenceSnapshot::new();
        snapshot.insert(online, true);
        snapshot.insert(requested, false);

        let changes = manager.apply_presence(&snapshot).unwrap();
        assert_eq!(changes, vec![(online, PresenceStatus::Online)]);
        assert_eq!(
            manager.get_contact(&requested).unwrap().unwrap().status,
            PresenceStatus::Requested
        );

        // Applying the same snapshot again changes nothing.
        assert!(manager.apply_presence(&snapshot).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_going_offline_fails_pending_messages() {
        let h = harness();
        let manager = contacts(&h);
        let (key, _) = add_contact(&h, 0x36, ConnectionStatus::Full);
        manager.set_status(&key, PresenceStatus::Online).unwrap();
        let message = h.dispatcher.submit(&key, "pending", None).await.unwrap();

        let mut snapshot = PresenceSnapshot::new();
        snapshot.insert(key, false);
        manager.apply_presence(&snapshot).unwrap();

        let stored = lock_db(&h.db).get_message(message.id).unwrap();
        assert_eq!(stored.status, MessageStatus::Failed);
    }

    #[tokio::test]
    async fn test_bulk_updates() {
        let h = harness();
        let manager = contacts(&h);
        let (key, _) = add_contact(&h, 0x37, ConnectionStatus::Full);
        manager.set_status(&key, PresenceStatus::Online).unwrap();
        lock_db(&h.db).set_peer_typing(&key, true).unwrap();

        assert_eq!(manager.set_all_offline().unwrap(), 1);
        assert_eq!(manager.set_all_not_typing().unwrap(), 1);
        let peer = manager.get_contact(&key).unwrap().unwrap();
        assert_eq!(peer.status, PresenceStatus::Offline);
        assert!(!peer.is_typing);

        manager.clear_all().unwrap();
        assert!(manager.list_contacts().unwrap().is_empty());
    }
}
