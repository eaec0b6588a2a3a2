//! File transfers: one sealed archive per send, served to the overlay chunk
//! by chunk on demand, and reassembled on the receiving side.
//!
//! Every outbound send owns its archive bytes in a session keyed by
//! `(peer handle, file id)`, so any number of transfers can run at once.

pub mod archive;
pub mod incoming;
pub mod password;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tracing::{debug, info, warn};

use parley_net::{ChunkReply, ChunkRequest, OverlayTransport};
use parley_shared::constants::{ARCHIVE_RECORDING_ENTRY, ARCHIVE_REQUEST_ENTRY};
use parley_shared::crypto::{generate_password, CryptoProvider};
use parley_shared::error::CryptoError;
use parley_shared::protocol::{MessengerRequest, RecordingDescriptor};
use parley_shared::types::{EncryptionKey, FileId, MessageId, PeerKey, TransportHandle};
use parley_store::{MediaKind, MediaRef};

use crate::config::CoreConfig;
use crate::error::{ArchiveError, TransferError};
use crate::events::{CoreEvent, EventSink};

use archive::ArchiveEntry;
use incoming::{percent, IncomingFile};

type SessionKey = (TransportHandle, FileId);

struct OutboundSession {
    peer: PeerKey,
    message_id: Option<MessageId>,
    payload: Bytes,
    progress: u8,
}

/// An inbound archive whose bytes have all arrived.
#[derive(Debug)]
pub struct CompletedDownload {
    pub handle: TransportHandle,
    pub file_id: FileId,
    pub name: String,
    pub data: Vec<u8>,
}

/// Contents of an opened archive. Attachments are written to disk; the
/// metadata stays in memory.
#[derive(Debug)]
pub struct ReceivedArchive {
    pub request: MessengerRequest,
    pub recording: Option<RecordingDescriptor>,
    pub files: Vec<PathBuf>,
}

impl ReceivedArchive {
    /// Image and video attachments. The recording's audio file and unknown
    /// types are not media.
    pub fn media(&self) -> Vec<MediaRef> {
        self.files
            .iter()
            .filter_map(|path| {
                let file_name = path.file_name()?.to_string_lossy().into_owned();
                if self.recording.as_ref().is_some_and(|r| r.file_name == file_name) {
                    return None;
                }
                Some(MediaRef {
                    kind: media_kind(&file_name)?,
                    file_name,
                    path: Some(path.to_string_lossy().into_owned()),
                })
            })
            .collect()
    }
}

pub fn media_kind(file_name: &str) -> Option<MediaKind> {
    let extension = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "jpg" | "jpeg" | "png" | "gif" | "heic" | "webp" => Some(MediaKind::Image),
        "mp4" | "mov" | "m4v" | "webm" => Some(MediaKind::Video),
        _ => None,
    }
}

pub struct FileTransferEngine {
    transport: Arc<dyn OverlayTransport>,
    crypto: Arc<dyn CryptoProvider>,
    events: EventSink,
    password_length: usize,
    max_file_size: u64,
    outbound: Mutex<HashMap<SessionKey, OutboundSession>>,
    inbound: Mutex<HashMap<SessionKey, IncomingFile>>,
}

impl FileTransferEngine {
    pub fn new(
        transport: Arc<dyn OverlayTransport>,
        crypto: Arc<dyn CryptoProvider>,
        events: EventSink,
        config: &CoreConfig,
    ) -> Self {
        Self {
            transport,
            crypto,
            events,
            password_length: config.password_length,
            max_file_size: config.max_file_size,
            outbound: Mutex::new(HashMap::new()),
            inbound: Mutex::new(HashMap::new()),
        }
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Seal `files` (plus the request and an optional recording) into one
    /// archive and announce it to `recipient`.
    ///
    /// Returns `Ok(None)` without touching the transport when the peer
    /// cannot be resolved.
    pub async fn send_files(
        &self,
        recipient: &PeerKey,
        recipient_key: &EncryptionKey,
        request: &MessengerRequest,
        recording: Option<&RecordingDescriptor>,
        files: &[PathBuf],
    ) -> Result<Option<FileId>, TransferError> {
        let mut attachments = Vec::with_capacity(files.len());
        for path in files {
            let data = tokio::fs::read(path).await?;
            if data.is_empty() {
                return Err(TransferError::EmptyFile(path.display().to_string()));
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .ok_or_else(|| ArchiveError::InvalidEntryName(path.display().to_string()))?;
            attachments.push(ArchiveEntry::new(name, data));
        }

        let mut entries = vec![ArchiveEntry::new(ARCHIVE_REQUEST_ENTRY, request.to_json()?)];
        if let Some(recording) = recording {
            let recording = RecordingDescriptor {
                file_name: recording.file_name.to_lowercase(),
                ..recording.clone()
            };
            entries.push(ArchiveEntry::new(ARCHIVE_RECORDING_ENTRY, recording.to_json()?));
        }
        entries.extend(attachments);

        let password = generate_password(self.password_length);
        let sealed_password = self.crypto.encrypt(password.as_bytes(), recipient_key)?;
        let name = password::archive_name(&sealed_password);
        let payload = archive::seal(&entries, &password)?;

        let size = payload.len() as u64;
        if size > self.max_file_size {
            return Err(TransferError::TooLarge {
                size,
                max: self.max_file_size,
            });
        }

        let Some(handle) = self.transport.resolve_peer_handle(recipient).await else {
            warn!(peer = %recipient.short(), "File send aborted: peer not resolvable");
            return Ok(None);
        };
        let file_id = self.transport.begin_file_transfer(handle, &name, size).await?;

        self.outbound().insert(
            (handle, file_id),
            OutboundSession {
                peer: *recipient,
                message_id: request.message_id,
                payload: Bytes::from(payload),
                progress: 0,
            },
        );
        info!(
            peer = %recipient.short(),
            file_id = file_id.0,
            size,
            entries = entries.len(),
            "File transfer announced"
        );
        Ok(Some(file_id))
    }

    /// Answer one chunk request from the session's own archive bytes.
    ///
    /// A zero-length request completes the transfer. A range past the end
    /// of the archive fails and discards the session.
    pub fn handle_chunk_request(&self, request: ChunkRequest) -> Result<ChunkReply, TransferError> {
        let key = (request.handle, request.file_id);
        let mut sessions = self.outbound();
        let Some(session) = sessions.get_mut(&key) else {
            return Err(TransferError::UnknownSession);
        };

        if request.is_completion() {
            let (peer, message_id) = (session.peer, session.message_id);
            sessions.remove(&key);
            drop(sessions);
            info!(peer = %peer.short(), file_id = request.file_id.0, "File transfer complete");
            self.events.emit(CoreEvent::FileSendProgress {
                handle: request.handle,
                file_id: request.file_id,
                message_id,
                progress: 100,
            });
            self.events.emit(CoreEvent::FileSendCompleted {
                handle: request.handle,
                file_id: request.file_id,
                message_id,
            });
            return Ok(ChunkReply::Done);
        }

        let size = session.payload.len() as u64;
        let end = request.end();
        if end > size {
            let (peer, message_id) = (session.peer, session.message_id);
            sessions.remove(&key);
            drop(sessions);
            let error = TransferError::OutOfRange {
                position: request.position,
                end,
                size,
            };
            warn!(peer = %peer.short(), file_id = request.file_id.0, %error, "Chunk request out of range");
            self.emit_failed(key, message_id, &error);
            return Err(error);
        }

        let data = session.payload.slice(request.position as usize..end as usize);
        session.progress = session.progress.max(percent(end, size));
        let (progress, message_id) = (session.progress, session.message_id);
        drop(sessions);

        self.events.emit(CoreEvent::FileSendProgress {
            handle: request.handle,
            file_id: request.file_id,
            message_id,
            progress,
        });
        Ok(ChunkReply::Data {
            position: request.position,
            data,
        })
    }

    /// Answer a chunk request and push the bytes to the overlay. A push
    /// failure after the transfer reached 100% is ignored.
    pub async fn answer_chunk(&self, request: ChunkRequest) -> Result<(), TransferError> {
        let ChunkReply::Data { position, data } = self.handle_chunk_request(request)? else {
            return Ok(());
        };
        let Err(error) = self
            .transport
            .push_chunk(request.handle, request.file_id, position, &data)
            .await
        else {
            return Ok(());
        };

        let key = (request.handle, request.file_id);
        let failed = {
            let mut sessions = self.outbound();
            match sessions.get(&key).map(|s| s.progress) {
                Some(progress) if progress < 100 => sessions.remove(&key).map(|s| s.message_id),
                _ => None,
            }
        };
        let Some(message_id) = failed else {
            debug!(file_id = request.file_id.0, %error, "Ignoring chunk error after completion");
            return Ok(());
        };

        let error = TransferError::Transport(error);
        warn!(file_id = request.file_id.0, %error, "Chunk push failed");
        self.emit_failed(key, message_id, &error);
        Err(error)
    }

    /// Outbound transfers still waiting for chunk requests.
    pub fn active_sessions(&self) -> Vec<(TransportHandle, FileId)> {
        let mut keys: Vec<_> = self.outbound().keys().copied().collect();
        keys.sort();
        keys
    }

    /// Message the outbound transfer belongs to, while it is active.
    pub fn session_message(&self, handle: TransportHandle, file_id: FileId) -> Option<MessageId> {
        self.outbound()
            .get(&(handle, file_id))
            .and_then(|s| s.message_id)
    }

    pub fn session_progress(&self, handle: TransportHandle, file_id: FileId) -> Option<u8> {
        self.outbound().get(&(handle, file_id)).map(|s| s.progress)
    }

    // ------------------------------------------------------------------
    // Receiving
    // ------------------------------------------------------------------

    pub fn begin_incoming(
        &self,
        handle: TransportHandle,
        file_id: FileId,
        name: &str,
        size: u64,
    ) -> Result<(), TransferError> {
        if size == 0 {
            return Err(TransferError::EmptyFile(name.to_string()));
        }
        if size > self.max_file_size {
            return Err(TransferError::TooLarge {
                size,
                max: self.max_file_size,
            });
        }
        self.inbound()
            .insert((handle, file_id), IncomingFile::new(name, size));
        debug!(handle = handle.0, file_id = file_id.0, size, "Incoming file started");
        Ok(())
    }

    /// Store one inbound chunk. Returns the whole archive once every byte
    /// has arrived; a chunk outside the declared size drops the download.
    pub fn write_incoming_chunk(
        &self,
        handle: TransportHandle,
        file_id: FileId,
        position: u64,
        data: &[u8],
    ) -> Result<Option<CompletedDownload>, TransferError> {
        let key = (handle, file_id);
        let (progress, completed) = {
            let mut inbound = self.inbound();
            let file = inbound.get_mut(&key).ok_or(TransferError::UnknownSession)?;
            if let Err(e) = file.write(position, data) {
                inbound.remove(&key);
                return Err(e);
            }
            let progress = file.progress();
            let completed = if file.is_complete() {
                inbound.remove(&key).map(|file| CompletedDownload {
                    handle,
                    file_id,
                    name: file.name().to_string(),
                    data: file.into_bytes(),
                })
            } else {
                None
            };
            (progress, completed)
        };

        self.events.emit(CoreEvent::FileReceiveProgress {
            handle,
            file_id,
            progress,
        });
        Ok(completed)
    }

    /// Open a downloaded archive: recover the password from `name` with the
    /// local private key, decrypt, and extract attachments into `dest_dir`.
    pub async fn receive_archive(
        &self,
        name: &str,
        data: &[u8],
        dest_dir: &Path,
    ) -> Result<ReceivedArchive, TransferError> {
        let sealed_password = password::sealed_password_from_name(name)?;
        let password = String::from_utf8(self.crypto.decrypt(&sealed_password)?)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        let mut request = None;
        let mut recording = None;
        let mut attachments = Vec::new();
        for entry in archive::open(data, &password)? {
            match entry.name.as_str() {
                ARCHIVE_REQUEST_ENTRY => {
                    request = Some(
                        MessengerRequest::from_json(&entry.data).map_err(ArchiveError::Metadata)?,
                    );
                }
                ARCHIVE_RECORDING_ENTRY => {
                    recording = Some(
                        RecordingDescriptor::from_json(&entry.data).map_err(ArchiveError::Metadata)?,
                    );
                }
                _ => attachments.push(entry),
            }
        }
        let request = request.ok_or(ArchiveError::MissingEntry(ARCHIVE_REQUEST_ENTRY))?;

        tokio::fs::create_dir_all(dest_dir).await?;
        let mut files = Vec::with_capacity(attachments.len());
        for entry in attachments {
            let path = dest_dir.join(&entry.name);
            tokio::fs::write(&path, &entry.data).await?;
            files.push(path);
        }

        info!(files = files.len(), "Archive extracted");
        Ok(ReceivedArchive {
            request,
            recording,
            files,
        })
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn emit_failed(&self, (handle, file_id): SessionKey, message_id: Option<MessageId>, error: &TransferError) {
        self.events.emit(CoreEvent::FileSendFailed {
            handle,
            file_id,
            message_id,
            reason: error.to_string(),
        });
    }

    fn outbound(&self) -> MutexGuard<'_, HashMap<SessionKey, OutboundSession>> {
        self.outbound.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn inbound(&self) -> MutexGuard<'_, HashMap<SessionKey, IncomingFile>> {
        self.inbound.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use parley_net::MemoryOverlay;
    use parley_shared::crypto::SealedBoxProvider;
    use parley_shared::identity::Identity;
    use parley_shared::types::ConnectionStatus;
    use tempfile::TempDir;

    struct Setup {
        overlay: Arc<MemoryOverlay>,
        engine: FileTransferEngine,
        events: mpsc::Receiver<CoreEvent>,
        recipient: PeerKey,
        recipient_identity: Identity,
        dir: TempDir,
    }

    fn setup() -> Setup {
        let overlay = Arc::new(MemoryOverlay::new());
        let recipient = PeerKey([0x42; 32]);
        overlay.add_known_peer(recipient, ConnectionStatus::Full);
        let (sink, events) = EventSink::channel(64);
        let engine = FileTransferEngine::new(
            overlay.clone(),
            Arc::new(SealedBoxProvider::new(Identity::generate())),
            sink,
            &CoreConfig::default(),
        );
        Setup {
            overlay,
            engine,
            events,
            recipient,
            recipient_identity: Identity::generate(),
            dir: TempDir::new().unwrap(),
        }
    }

    fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    fn send_progress(events: &mut mpsc::Receiver<CoreEvent>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let CoreEvent::FileSendProgress { progress, .. } = event {
                out.push(progress);
            }
        }
        out
    }

    /// Register a session over raw bytes, bypassing archive construction.
    fn raw_session(engine: &FileTransferEngine, key: SessionKey, payload: Vec<u8>) {
        engine.outbound().insert(
            key,
            OutboundSession {
                peer: PeerKey([1; 32]),
                message_id: None,
                payload: Bytes::from(payload),
                progress: 0,
            },
        );
    }

    #[tokio::test]
    async fn test_send_then_receive() {
        let s = setup();
        let receiver = FileTransferEngine::new(
            s.overlay.clone(),
            Arc::new(SealedBoxProvider::new(s.recipient_identity.clone())),
            EventSink::disabled(),
            &CoreConfig::default(),
        );
        let photo = write_file(&s.dir, "Holiday.JPG", b"jpeg bytes");
        let voice = write_file(&s.dir, "Voice.M4A", b"audio bytes");
        let request = MessengerRequest::new("sender").with_text("look");
        let recording = RecordingDescriptor {
            duration: 2.0,
            waveform: vec![0.1, 0.5],
            file_name: "Voice.M4A".into(),
        };

        let file_id = s
            .engine
            .send_files(
                &s.recipient,
                &s.recipient_identity.public_key(),
                &request,
                Some(&recording),
                &[photo, voice],
            )
            .await
            .unwrap()
            .unwrap();

        let begun = &s.overlay.begun_transfers()[0];
        assert_eq!(begun.file_id, file_id);
        assert!(begun.name.ends_with(".parcel"));

        let reply = s
            .engine
            .handle_chunk_request(ChunkRequest::new(begun.handle, file_id, 0, begun.size as usize))
            .unwrap();
        let ChunkReply::Data { data, .. } = reply else {
            panic!("expected data");
        };

        let out = TempDir::new().unwrap();
        let received = receiver
            .receive_archive(&begun.name, &data, out.path())
            .await
            .unwrap();
        assert_eq!(received.request, request);
        assert_eq!(received.recording.as_ref().unwrap().file_name, "voice.m4a");
        assert_eq!(received.files.len(), 2);
        assert_eq!(
            std::fs::read(out.path().join("holiday.jpg")).unwrap(),
            b"jpeg bytes"
        );

        let media = received.media();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].kind, MediaKind::Image);
        assert_eq!(media[0].file_name, "holiday.jpg");
    }

    #[tokio::test]
    async fn test_wrong_recipient_cannot_open() {
        let s = setup();
        let stranger = FileTransferEngine::new(
            s.overlay.clone(),
            Arc::new(SealedBoxProvider::new(Identity::generate())),
            EventSink::disabled(),
            &CoreConfig::default(),
        );
        let file = write_file(&s.dir, "a.png", b"png");
        let file_id = s
            .engine
            .send_files(
                &s.recipient,
                &s.recipient_identity.public_key(),
                &MessengerRequest::new("sender"),
                None,
                &[file],
            )
            .await
            .unwrap()
            .unwrap();
        let begun = &s.overlay.begun_transfers()[0];
        let Ok(ChunkReply::Data { data, .. }) = s.engine.handle_chunk_request(ChunkRequest::new(
            begun.handle,
            file_id,
            0,
            begun.size as usize,
        )) else {
            panic!("expected data");
        };

        let out = TempDir::new().unwrap();
        assert!(matches!(
            stranger.receive_archive(&begun.name, &data, out.path()).await,
            Err(TransferError::Crypto(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_file_rejected_before_transport() {
        let s = setup();
        let empty = write_file(&s.dir, "empty.jpg", b"");
        let result = s
            .engine
            .send_files(
                &s.recipient,
                &s.recipient_identity.public_key(),
                &MessengerRequest::new("sender"),
                None,
                &[empty],
            )
            .await;

        assert!(matches!(result, Err(TransferError::EmptyFile(_))));
        assert!(s.overlay.begun_transfers().is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_peer_is_noop() {
        let s = setup();
        let file = write_file(&s.dir, "a.jpg", b"data");
        let result = s
            .engine
            .send_files(
                &PeerKey([0x99; 32]),
                &s.recipient_identity.public_key(),
                &MessengerRequest::new("sender"),
                None,
                &[file],
            )
            .await
            .unwrap();

        assert_eq!(result, None);
        assert!(s.overlay.begun_transfers().is_empty());
        assert!(s.engine.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_progress_sequence() {
        let mut s = setup();
        let key = (TransportHandle(1), FileId(7));
        let payload: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        raw_session(&s.engine, key, payload.clone());

        let mut assembled = Vec::new();
        for (position, length) in [(0, 4096), (4096, 4096), (8192, 1808)] {
            let reply = s
                .engine
                .handle_chunk_request(ChunkRequest::new(key.0, key.1, position, length))
                .unwrap();
            let ChunkReply::Data { position: at, data } = reply else {
                panic!("expected data");
            };
            assert_eq!(at as usize, assembled.len());
            assembled.extend_from_slice(&data);
        }
        let done = s
            .engine
            .handle_chunk_request(ChunkRequest::new(key.0, key.1, 10_000, 0))
            .unwrap();

        assert_eq!(done, ChunkReply::Done);
        assert_eq!(assembled, payload);
        assert_eq!(send_progress(&mut s.events), vec![41, 82, 100, 100]);
        assert!(s.engine.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_fails_session() {
        let mut s = setup();
        let key = (TransportHandle(1), FileId(3));
        raw_session(&s.engine, key, vec![0; 100]);

        assert!(matches!(
            s.engine
                .handle_chunk_request(ChunkRequest::new(key.0, key.1, 90, 20)),
            Err(TransferError::OutOfRange { end: 110, size: 100, .. })
        ));
        assert!(s.engine.active_sessions().is_empty());
        assert!(matches!(
            s.events.try_recv(),
            Ok(CoreEvent::FileSendFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let s = setup();
        let a = (TransportHandle(1), FileId(0));
        let b = (TransportHandle(2), FileId(0));
        raw_session(&s.engine, a, vec![b'a'; 10]);
        raw_session(&s.engine, b, vec![b'b'; 20]);

        let Ok(ChunkReply::Data { data, .. }) =
            s.engine.handle_chunk_request(ChunkRequest::new(b.0, b.1, 0, 20))
        else {
            panic!("expected data");
        };
        assert_eq!(&data[..], &[b'b'; 20]);
        assert_eq!(s.engine.session_progress(a.0, a.1), Some(0));
        assert_eq!(s.engine.session_progress(b.0, b.1), Some(100));
    }

    #[tokio::test]
    async fn test_push_failure_after_completion_ignored() {
        let s = setup();
        let handle = s.overlay.resolve_peer_handle(&s.recipient).await.unwrap();
        let key = (handle, FileId(0));
        raw_session(&s.engine, key, vec![0; 10]);
        s.overlay.fail_chunk_pushes(true);

        s.engine
            .answer_chunk(ChunkRequest::new(handle, key.1, 0, 10))
            .await
            .unwrap();
        assert_eq!(s.engine.active_sessions(), vec![key]);
    }

    #[tokio::test]
    async fn test_push_failure_before_completion_surfaces() {
        let s = setup();
        let handle = s.overlay.resolve_peer_handle(&s.recipient).await.unwrap();
        let key = (handle, FileId(0));
        raw_session(&s.engine, key, vec![0; 10]);
        s.overlay.fail_chunk_pushes(true);

        assert!(matches!(
            s.engine.answer_chunk(ChunkRequest::new(handle, key.1, 0, 5)).await,
            Err(TransferError::Transport(_))
        ));
        assert!(s.engine.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_incoming_download() {
        let s = setup();
        let handle = TransportHandle(5);
        s.engine.begin_incoming(handle, FileId(1), "x.parcel", 6).unwrap();

        assert!(s
            .engine
            .write_incoming_chunk(handle, FileId(1), 0, b"abc")
            .unwrap()
            .is_none());
        let done = s
            .engine
            .write_incoming_chunk(handle, FileId(1), 3, b"def")
            .unwrap()
            .unwrap();
        assert_eq!(done.name, "x.parcel");
        assert_eq!(done.data, b"abcdef");

        assert!(matches!(
            s.engine.write_incoming_chunk(handle, FileId(1), 0, b"a"),
            Err(TransferError::UnknownSession)
        ));
        assert!(matches!(
            s.engine.begin_incoming(handle, FileId(2), "empty", 0),
            Err(TransferError::EmptyFile(_))
        ));
    }

    #[test]
    fn test_media_kind() {
        assert_eq!(media_kind("a.jpeg"), Some(MediaKind::Image));
        assert_eq!(media_kind("clip.MOV"), Some(MediaKind::Video));
        assert_eq!(media_kind("notes.txt"), None);
        assert_eq!(media_kind("noext"), None);
    }
}
