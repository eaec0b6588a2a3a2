//! Wiring of the core services around one overlay and one database.
//!
//! The embedder feeds overlay notifications into [`Messenger::run`] (or
//! [`Messenger::handle_event`]) and reads [`CoreEvent`]s from the channel it
//! passed in. Chunk requests may instead arrive on their own channel, served
//! by [`Messenger::serve_chunks`]; both paths settle file messages the same
//! way.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_net::{ChunkRequest, OverlayEvent, OverlayTransport, PresenceSnapshot, PresenceTracker};
use parley_shared::crypto::CryptoProvider;
use parley_shared::protocol::{MessengerRequest, RecordingDescriptor};
use parley_shared::types::{FileId, MessageId, PeerKey, TransportHandle};
use parley_store::{Database, MediaRef, Message, MessageStatus, StoreError};

use crate::config::CoreConfig;
use crate::contacts::ContactManager;
use crate::dispatcher::MessageDispatcher;
use crate::error::{DispatchError, MessengerError, TransferError};
use crate::events::{CoreEvent, EventSink};
use crate::pagination;
use crate::profile::LocalProfile;
use crate::transfer::{media_kind, CompletedDownload, FileTransferEngine};
use crate::{lock_db, shared, SharedDatabase};

pub struct Messenger {
    config: CoreConfig,
    transport: Arc<dyn OverlayTransport>,
    db: SharedDatabase,
    dispatcher: Arc<MessageDispatcher>,
    contacts: Arc<ContactManager>,
    transfers: Arc<FileTransferEngine>,
    presence: PresenceTracker,
    events: EventSink,
}

impl Messenger {
    pub fn new(
        config: CoreConfig,
        transport: Arc<dyn OverlayTransport>,
        db: Database,
        crypto: Arc<dyn CryptoProvider>,
        profile: LocalProfile,
        events: EventSink,
    ) -> Self {
        let db = shared(db);
        let dispatcher = Arc::new(MessageDispatcher::new(
            transport.clone(),
            db.clone(),
            profile,
            events.clone(),
        ));
        let contacts = Arc::new(ContactManager::new(
            transport.clone(),
            db.clone(),
            dispatcher.clone(),
            events.clone(),
        ));
        let transfers = Arc::new(FileTransferEngine::new(
            transport.clone(),
            crypto,
            events.clone(),
            &config,
        ));
        let presence = PresenceTracker::new(transport.clone());

        Self {
            config,
            transport,
            db,
            dispatcher,
            contacts,
            transfers,
            presence,
            events,
        }
    }

    /// Open the database under `config.data_dir` and build the services.
    pub fn open(
        config: CoreConfig,
        transport: Arc<dyn OverlayTransport>,
        crypto: Arc<dyn CryptoProvider>,
        profile: LocalProfile,
        events: EventSink,
    ) -> Result<Self, MessengerError> {
        std::fs::create_dir_all(&config.data_dir)?;
        let db = Database::open_at(&config.database_path())?;
        info!(path = %config.database_path().display(), "Messenger database opened");
        Ok(Self::new(config, transport, db, crypto, profile, events))
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<MessageDispatcher> {
        &self.dispatcher
    }

    pub fn contacts(&self) -> &Arc<ContactManager> {
        &self.contacts
    }

    pub fn transfers(&self) -> &Arc<FileTransferEngine> {
        &self.transfers
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Reset state left over from a previous run and start presence polling.
    pub fn start(&self) -> Result<(), MessengerError> {
        let failed = self.dispatcher.reset_after_restart()?;
        self.contacts.set_all_offline()?;
        self.contacts.set_all_not_typing()?;
        if failed > 0 {
            info!(count = failed, "Pending messages from the previous run marked failed");
        }

        let contacts = self.contacts.clone();
        let events = self.events.clone();
        self.presence
            .start_polling(self.config.poll_interval, move |snapshot: PresenceSnapshot| {
                if let Err(e) = contacts.apply_presence(&snapshot) {
                    warn!(error = %e, "Failed to apply presence snapshot");
                }
                events.emit(CoreEvent::PresenceSnapshot { online: snapshot });
            });
        Ok(())
    }

    pub fn stop(&self) {
        self.presence.stop_polling();
    }

    pub fn is_running(&self) -> bool {
        self.presence.is_running()
    }

    /// Advertise our own presence to contacts. Embedders call this with
    /// `false` when the app moves to the background.
    pub async fn set_self_online(&self, online: bool) -> Result<(), MessengerError> {
        self.transport
            .set_self_online(online)
            .await
            .map_err(DispatchError::from)?;
        debug!(online, "Own presence updated");
        Ok(())
    }

    /// Process overlay notifications until the channel closes.
    pub async fn run(self: Arc<Self>, mut overlay_events: mpsc::Receiver<OverlayEvent>) {
        info!("Messenger event loop started");
        while let Some(event) = overlay_events.recv().await {
            self.handle_event(event).await;
        }
        warn!("Messenger event loop ended");
    }

    /// Route one overlay notification. Failures are logged; they never stop
    /// the event loop.
    pub async fn handle_event(&self, event: OverlayEvent) {
        match event {
            OverlayEvent::MessageReceived { handle, text } => {
                if let Err(e) = self.dispatcher.on_message_received(handle, &text).await {
                    warn!(handle = handle.0, error = %e, "Inbound message rejected");
                }
            }

            OverlayEvent::ContactRequest { key, text } => {
                if let Err(e) = self.contacts.on_contact_request(key, &text) {
                    warn!(peer = %key.short(), error = %e, "Contact request rejected");
                }
            }

            OverlayEvent::DeliveryAck { handle, message_id } => {
                self.dispatcher.on_delivery_ack(handle, message_id).await;
            }

            OverlayEvent::Typing { handle, is_typing } => {
                if let Err(e) = self.dispatcher.on_typing(handle, is_typing).await {
                    warn!(handle = handle.0, error = %e, "Failed to store typing state");
                }
            }

            OverlayEvent::ConnectionChanged { handle, status } => {
                let Some(key) = self.transport.peer_key(handle).await else {
                    debug!(handle = handle.0, "Connection change for unknown handle");
                    return;
                };
                let snapshot = PresenceSnapshot::from([(key, status.is_online())]);
                if let Err(e) = self.contacts.apply_presence(&snapshot) {
                    warn!(peer = %key.short(), error = %e, "Failed to apply connection change");
                }
            }

            OverlayEvent::ChunkRequested(request) => self.answer_chunk(request).await,

            OverlayEvent::FileOffered {
                handle,
                file_id,
                name,
                size,
            } => {
                if let Err(e) = self.transfers.begin_incoming(handle, file_id, &name, size) {
                    warn!(handle = handle.0, file_id = file_id.0, error = %e, "File offer refused");
                }
            }

            OverlayEvent::ChunkReceived {
                handle,
                file_id,
                position,
                data,
            } => match self
                .transfers
                .write_incoming_chunk(handle, file_id, position, &data)
            {
                Ok(Some(download)) => {
                    if let Err(e) = self.accept_download(download).await {
                        warn!(handle = handle.0, file_id = file_id.0, error = %e, "Received archive rejected");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(handle = handle.0, file_id = file_id.0, error = %e, "Inbound chunk rejected"),
            },
        }
    }

    /// Process chunk requests arriving on a dedicated channel until it
    /// closes.
    pub async fn serve_chunks(self: Arc<Self>, mut requests: mpsc::Receiver<ChunkRequest>) {
        while let Some(request) = requests.recv().await {
            self.answer_chunk(request).await;
        }
        debug!("Chunk request channel closed");
    }

    /// Serve one chunk request and settle the file message when the
    /// transfer completes or fails.
    async fn answer_chunk(&self, request: ChunkRequest) {
        let message = self
            .transfers
            .session_message(request.handle, request.file_id);
        let outcome = self.transfers.answer_chunk(request).await;
        let settled = match (&outcome, message) {
            (Ok(()), Some(id)) if request.is_completion() => Some((id, MessageStatus::Sent)),
            (Err(_), Some(id)) => Some((id, MessageStatus::Failed)),
            _ => None,
        };
        if let Err(e) = &outcome {
            debug!(file_id = request.file_id.0, error = %e, "Chunk request failed");
        }
        if let Some((id, status)) = settled {
            if let Err(e) = self.dispatcher.settle(id, status) {
                warn!(message_id = %id, error = %e, "Failed to settle file message");
            }
        }
    }

    /// Extract a finished download into `media/<peer>/<message id>/` and
    /// store the message.
    async fn accept_download(&self, download: CompletedDownload) -> Result<(), MessengerError> {
        let Some(peer) = self.transport.peer_key(download.handle).await else {
            warn!(handle = download.handle.0, "Archive from unresolvable handle dropped");
            return Ok(());
        };
        let id = MessageId::new();
        let dest = self
            .config
            .media_dir()
            .join(peer.to_hex())
            .join(id.to_string());
        let received = self
            .transfers
            .receive_archive(&download.name, &download.data, &dest)
            .await?;
        let media = received.media();
        self.dispatcher
            .record_incoming(id, &peer, &received.request, media, received.recording)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    pub async fn send_text(
        &self,
        peer: &PeerKey,
        body: impl Into<String>,
        reply_to: Option<String>,
    ) -> Result<Message, MessengerError> {
        Ok(self.dispatcher.submit(peer, body, reply_to).await?)
    }

    pub async fn retry(&self, id: MessageId) -> Result<Message, MessengerError> {
        Ok(self.dispatcher.retry(id).await?)
    }

    /// Send attachments (and an optional recording) as one archive. The
    /// stored message stays `Sending` until the overlay's final chunk
    /// request, and fails when the transfer cannot start.
    pub async fn send_files(
        &self,
        peer: &PeerKey,
        text: Option<String>,
        recording: Option<RecordingDescriptor>,
        files: &[PathBuf],
    ) -> Result<Message, MessengerError> {
        let contact = match lock_db(&self.db).get_peer(peer) {
            Ok(contact) => contact,
            Err(StoreError::NotFound) => return Err(DispatchError::PeerNotFound.into()),
            Err(e) => return Err(e.into()),
        };
        let recipient_key = contact
            .encryption_key
            .ok_or(TransferError::MissingEncryptionKey)?;

        let mut message = Message::outgoing(*peer, text.unwrap_or_default());
        message.media = outgoing_media(files);
        message.recording = recording.clone();
        let request = MessengerRequest {
            message_text: Some(message.body.clone()),
            message_id: Some(message.id),
            ..self.dispatcher.profile().request_for(&contact)
        };

        self.dispatcher.record_outgoing(&message)?;
        let outcome = self
            .transfers
            .send_files(peer, &recipient_key, &request, recording.as_ref(), files)
            .await;

        match outcome {
            Ok(Some(file_id)) => {
                debug!(message_id = %message.id, file_id = file_id.0, "File message submitted");
                Ok(message)
            }
            Ok(None) | Err(TransferError::Transport(_)) => {
                Ok(self.dispatcher.settle(message.id, MessageStatus::Failed)?)
            }
            Err(e) => {
                // Rejected before reaching the overlay: nothing was sent.
                lock_db(&self.db).delete_message(message.id)?;
                Err(e.into())
            }
        }
    }

    /// One window of a peer's history, oldest first.
    pub fn history(&self, peer: &PeerKey, before: Option<MessageId>) -> Result<Vec<Message>, MessengerError> {
        let all = lock_db(&self.db).messages_for_peer(peer)?;
        Ok(pagination::window(before, &all, self.config.page_size))
    }

    /// Outbound transfers still being served.
    pub fn active_transfers(&self) -> Vec<(TransportHandle, FileId)> {
        self.transfers.active_sessions()
    }
}

fn outgoing_media(files: &[PathBuf]) -> Vec<MediaRef> {
    files
        .iter()
        .filter_map(|path| {
            let file_name = path.file_name()?.to_string_lossy().to_lowercase();
            Some(MediaRef {
                kind: media_kind(&file_name)?,
                file_name,
                path: Some(path.to_string_lossy().into_owned()),
            })
        })
        .collect()
}
