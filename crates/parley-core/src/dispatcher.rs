//! Text message send/receive and the delivery state machine.
//!
//! A locally composed message is stored as `Sending`, submitted to the
//! overlay, and only becomes `Sent` when the overlay acknowledges the
//! transport id it was submitted under. Submission failure or the peer going
//! offline first moves it to `Failed`; [`MessageDispatcher::retry`] resubmits
//! under a fresh transport id while the message keeps its id and position.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use parley_net::{peer_key_from_address, OverlayTransport};
use parley_shared::protocol::{MessengerRequest, RecordingDescriptor};
use parley_shared::types::{MessageId, PeerKey, TransportHandle, TransportMessageId};
use parley_store::{MediaRef, Message, MessageStatus, Peer, StoreError};

use crate::contacts::apply_request;
use crate::error::DispatchError;
use crate::events::{CoreEvent, EventSink};
use crate::profile::LocalProfile;
use crate::{lock_db, SharedDatabase};

type Submission = (PeerKey, TransportMessageId);

/// Acks held for submissions not registered yet. An overlay may confirm
/// delivery before `send_text` has returned to us.
const MAX_EARLY_ACKS: usize = 64;

#[derive(Default)]
struct InFlight {
    pending: HashMap<Submission, MessageId>,
    early_acks: VecDeque<Submission>,
}

impl InFlight {
    /// Register a submission. Returns `true` if its ack already arrived.
    fn register(&mut self, submission: Submission, id: MessageId) -> bool {
        if let Some(index) = self.early_acks.iter().position(|s| *s == submission) {
            self.early_acks.remove(index);
            return true;
        }
        self.pending.insert(submission, id);
        false
    }

    /// Claim the message an ack belongs to, or hold the ack for a
    /// submission still being registered.
    fn acknowledge(&mut self, submission: Submission) -> Option<MessageId> {
        let claimed = self.pending.remove(&submission);
        if claimed.is_none() {
            if self.early_acks.len() == MAX_EARLY_ACKS {
                self.early_acks.pop_front();
            }
            self.early_acks.push_back(submission);
        }
        claimed
    }

    fn drain_peer(&mut self, peer: &PeerKey) -> Vec<MessageId> {
        self.early_acks.retain(|(owner, _)| owner != peer);
        let mut drained = Vec::new();
        self.pending.retain(|(owner, _), id| {
            if owner == peer {
                drained.push(*id);
                false
            } else {
                true
            }
        });
        drained
    }

    fn clear(&mut self) {
        self.pending.clear();
        self.early_acks.clear();
    }
}

pub struct MessageDispatcher {
    transport: Arc<dyn OverlayTransport>,
    db: SharedDatabase,
    profile: LocalProfile,
    events: EventSink,
    in_flight: Mutex<InFlight>,
}

impl MessageDispatcher {
    pub fn new(
        transport: Arc<dyn OverlayTransport>,
        db: SharedDatabase,
        profile: LocalProfile,
        events: EventSink,
    ) -> Self {
        Self {
            transport,
            db,
            profile,
            events,
            in_flight: Mutex::new(InFlight::default()),
        }
    }

    pub fn profile(&self) -> &LocalProfile {
        &self.profile
    }

    // ------------------------------------------------------------------
    // Transport-level operations
    // ------------------------------------------------------------------

    /// Submit `payload` to the peer owning `peer`. Returns the transport id
    /// to expect an acknowledgement for, or `None` if the peer cannot be
    /// resolved or the overlay refused the submission.
    pub async fn send(&self, peer: &PeerKey, payload: &str) -> Option<TransportMessageId> {
        let Some(handle) = self.transport.resolve_peer_handle(peer).await else {
            debug!(peer = %peer.short(), "Cannot send, peer handle unresolved");
            return None;
        };

        match self.transport.send_text(handle, payload).await {
            Ok(id) => {
                debug!(peer = %peer.short(), transport_id = id.0, "Text submitted");
                Some(id)
            }
            Err(e) => {
                warn!(peer = %peer.short(), error = %e, "Text submission failed");
                None
            }
        }
    }

    /// Send a contact request to a full overlay address. Returns the key of
    /// the now pending peer.
    pub async fn initiate_contact(&self, address: &str, payload: &str) -> Option<PeerKey> {
        let key = match peer_key_from_address(address) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "Refusing contact request to invalid address");
                return None;
            }
        };

        match self.transport.add_peer(address, payload).await {
            Ok(handle) => {
                info!(peer = %key.short(), handle = handle.0, "Contact request sent");
                Some(key)
            }
            Err(e) => {
                warn!(peer = %key.short(), error = %e, "Contact request failed");
                None
            }
        }
    }

    /// Best-effort typing notification. Fails with `PeerNotFound` unless the
    /// peer resolves to a connected handle.
    pub async fn set_typing(&self, is_typing: bool, peer: &PeerKey) -> Result<(), DispatchError> {
        let handle = self
            .transport
            .resolve_peer_handle(peer)
            .await
            .ok_or(DispatchError::PeerNotFound)?;

        if !self.transport.connection_status(handle).await.is_online() {
            return Err(DispatchError::PeerNotFound);
        }

        self.transport.set_typing_state(handle, is_typing).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Message lifecycle
    // ------------------------------------------------------------------

    /// Store a new outgoing message and submit it. The returned message is
    /// `Sending` (with a temp id) or `Failed`.
    pub async fn submit(
        &self,
        peer: &PeerKey,
        body: impl Into<String>,
        reply_to: Option<String>,
    ) -> Result<Message, DispatchError> {
        let contact = self.load_peer(peer)?;

        let mut message = Message::outgoing(*peer, body);
        message.reply_to = reply_to;
        let wire = self.wire_text(&contact, &message)?;

        lock_db(&self.db).insert_message(&message)?;
        self.emit_status(&message);

        self.deliver(message, &wire).await
    }

    /// Resubmit a failed message under a fresh transport id.
    pub async fn retry(&self, id: MessageId) -> Result<Message, DispatchError> {
        let (contact, message) = {
            let db = lock_db(&self.db);
            let message = db.get_message(id)?;
            let contact = db.get_peer(&message.peer_key).map_err(not_found_as_peer)?;
            (contact, message)
        };
        if !message.media.is_empty() {
            return Err(DispatchError::HasAttachments);
        }
        let wire = self.wire_text(&contact, &message)?;

        let message = lock_db(&self.db).transition_message(id, MessageStatus::Sending)?;
        info!(message_id = %id, peer = %message.peer_key.short(), "Retrying message");
        self.emit_status(&message);

        self.deliver(message, &wire).await
    }

    async fn deliver(&self, mut message: Message, wire: &str) -> Result<Message, DispatchError> {
        match self.send(&message.peer_key, wire).await {
            Some(temp_id) => {
                lock_db(&self.db).set_message_temp_id(message.id, Some(temp_id))?;
                let acked = self
                    .in_flight()
                    .register((message.peer_key, temp_id), message.id);
                if acked {
                    debug!(message_id = %message.id, "Ack arrived before registration");
                    return Ok(self.mark_sent(message.id)?);
                }
                message.temp_id = Some(temp_id);
                Ok(message)
            }
            None => {
                let failed = lock_db(&self.db).transition_message(message.id, MessageStatus::Failed)?;
                self.emit_status(&failed);
                Ok(failed)
            }
        }
    }

    /// Store an outgoing message whose payload travels as a file transfer.
    /// It stays `Sending` until [`settle`](Self::settle) is called.
    pub(crate) fn record_outgoing(&self, message: &Message) -> Result<(), DispatchError> {
        lock_db(&self.db).insert_message(message)?;
        self.emit_status(message);
        Ok(())
    }

    /// Move a message to `status` through the transition function.
    pub(crate) fn settle(&self, id: MessageId, status: MessageStatus) -> Result<Message, DispatchError> {
        let message = lock_db(&self.db).transition_message(id, status)?;
        self.emit_status(&message);
        Ok(message)
    }

    /// The overlay confirmed delivery of `temp_id`. Each transport id is
    /// honoured at most once. An ack for a submission that is not
    /// registered yet is held until the send path registers it; such acks
    /// and repeated ones return `None`.
    pub async fn on_delivery_ack(
        &self,
        handle: TransportHandle,
        temp_id: TransportMessageId,
    ) -> Option<Message> {
        let peer = self.transport.peer_key(handle).await?;
        let Some(id) = self.in_flight().acknowledge((peer, temp_id)) else {
            debug!(peer = %peer.short(), transport_id = temp_id.0, "Holding ack for unregistered submission");
            return None;
        };

        match self.mark_sent(id) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(message_id = %id, error = %e, "Could not mark message sent");
                None
            }
        }
    }

    fn mark_sent(&self, id: MessageId) -> Result<Message, StoreError> {
        let mut message = {
            let db = lock_db(&self.db);
            let message = db.transition_message(id, MessageStatus::Sent)?;
            db.set_message_temp_id(id, None)?;
            message
        };
        message.temp_id = None;
        debug!(message_id = %id, "Message delivered");
        self.emit_status(&message);
        Ok(message)
    }

    /// Fail every unacknowledged submission to `peer`. Returns the ids of
    /// the messages moved to `Failed`.
    pub fn on_peer_offline(&self, peer: &PeerKey) -> Vec<MessageId> {
        let pending = self.in_flight().drain_peer(peer);

        let mut failed = Vec::new();
        for id in pending {
            let result = {
                let db = lock_db(&self.db);
                db.transition_message(id, MessageStatus::Failed)
                    .and_then(|message| db.set_message_temp_id(id, None).map(|_| message))
            };
            match result {
                Ok(message) => {
                    self.emit_status(&message);
                    failed.push(id);
                }
                Err(e) => warn!(message_id = %id, error = %e, "Could not fail message"),
            }
        }

        if !failed.is_empty() {
            info!(peer = %peer.short(), count = failed.len(), "Peer went offline, pending messages failed");
        }
        failed
    }

    /// Transport ids do not survive a restart: fail whatever was still
    /// `Sending` and forget all pending ids.
    pub fn reset_after_restart(&self) -> Result<usize, DispatchError> {
        self.in_flight().clear();

        let db = lock_db(&self.db);
        let stale = db.messages_with_status(MessageStatus::Sending)?;
        for message in &stale {
            db.transition_message(message.id, MessageStatus::Failed)?;
        }
        db.clear_all_temp_ids()?;
        Ok(stale.len())
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight().pending.len()
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// A text arrived from `handle`. Messages from peers that are not in the
    /// contact store are dropped (`Ok(None)`).
    pub async fn on_message_received(
        &self,
        handle: TransportHandle,
        text: &str,
    ) -> Result<Option<Message>, DispatchError> {
        let Some(peer) = self.transport.peer_key(handle).await else {
            warn!(handle = handle.0, "Message from unresolvable handle dropped");
            return Ok(None);
        };
        let request = MessengerRequest::from_json(text.as_bytes())?;
        self.record_incoming(MessageId::new(), &peer, &request, Vec::new(), None)
    }

    pub async fn on_typing(&self, handle: TransportHandle, is_typing: bool) -> Result<(), DispatchError> {
        let Some(peer) = self.transport.peer_key(handle).await else {
            return Ok(());
        };
        if lock_db(&self.db).set_peer_typing(&peer, is_typing)? {
            self.events.emit(CoreEvent::PeerTyping { peer, is_typing });
        }
        Ok(())
    }

    /// Store an inbound message (text or extracted archive) under `id` and
    /// refresh the sender's contact details from the request.
    pub(crate) fn record_incoming(
        &self,
        id: MessageId,
        peer: &PeerKey,
        request: &MessengerRequest,
        media: Vec<MediaRef>,
        recording: Option<RecordingDescriptor>,
    ) -> Result<Option<Message>, DispatchError> {
        let message = {
            let db = lock_db(&self.db);
            let mut contact = match db.get_peer(peer) {
                Ok(contact) => contact,
                Err(StoreError::NotFound) => {
                    warn!(peer = %peer.short(), "Message from unknown peer dropped");
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            };

            apply_request(&mut contact, request);
            contact.has_unseen = true;
            db.upsert_peer(&contact)?;

            let mut message = Message::incoming(*peer, request.message_text.clone().unwrap_or_default());
            message.id = id;
            message.reply_to = request.reply_message_text.clone();
            message.media = media;
            message.recording = recording;
            db.insert_message(&message)?;
            message
        };

        info!(peer = %peer.short(), message_id = %message.id, "Message received");
        self.events.emit(CoreEvent::MessageReceived {
            message: message.clone(),
        });
        Ok(Some(message))
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn load_peer(&self, peer: &PeerKey) -> Result<Peer, DispatchError> {
        lock_db(&self.db).get_peer(peer).map_err(not_found_as_peer)
    }

    fn wire_text(&self, contact: &Peer, message: &Message) -> Result<String, DispatchError> {
        let request = MessengerRequest {
            message_text: Some(message.body.clone()),
            message_id: Some(message.id),
            reply_message_text: message.reply_to.clone(),
            ..self.profile.request_for(contact)
        };
        Ok(request.to_wire_text()?)
    }

    fn emit_status(&self, message: &Message) {
        self.events.emit(CoreEvent::MessageStatusChanged {
            peer: message.peer_key,
            message_id: message.id,
            status: message.status,
        });
    }

    fn in_flight(&self) -> MutexGuard<'_, InFlight> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn not_found_as_peer(e: StoreError) -> DispatchError {
    match e {
        StoreError::NotFound => DispatchError::PeerNotFound,
        other => DispatchError::Store(other),
    }
}
