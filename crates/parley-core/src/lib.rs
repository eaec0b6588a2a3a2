// Messaging core: contacts, message dispatch, file transfer and history
// windows on top of the overlay transport and the local store.

pub mod config;
pub mod contacts;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod logging;
pub mod messenger;
pub mod pagination;
pub mod profile;
pub mod transfer;

use std::sync::{Arc, Mutex, MutexGuard};

use parley_store::Database;

pub use config::CoreConfig;
pub use contacts::ContactManager;
pub use dispatcher::MessageDispatcher;
pub use error::{ArchiveError, DispatchError, MessengerError, TransferError};
pub use events::{CoreEvent, EventSink};
pub use messenger::Messenger;
pub use profile::LocalProfile;
pub use transfer::{FileTransferEngine, ReceivedArchive};

/// Database handle shared by the core components. Never held across an
/// `.await`.
pub type SharedDatabase = Arc<Mutex<Database>>;

pub fn shared(db: Database) -> SharedDatabase {
    Arc::new(Mutex::new(db))
}

/// A panic while holding the lock leaves SQLite consistent, so a poisoned
/// lock is simply taken over.
pub(crate) fn lock_db(db: &SharedDatabase) -> MutexGuard<'_, Database> {
    db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use parley_net::MemoryOverlay;
    use parley_shared::types::{ConnectionStatus, EncryptionKey, PeerKey, PresenceStatus, TransportHandle};
    use parley_store::{Database, MessageStatus, Peer};

    use crate::dispatcher::MessageDispatcher;
    use crate::events::{CoreEvent, EventSink};
    use crate::profile::LocalProfile;
    use crate::{lock_db, shared, SharedDatabase};

    pub struct Harness {
        pub overlay: Arc<MemoryOverlay>,
        pub db: SharedDatabase,
        pub dispatcher: Arc<MessageDispatcher>,
        pub events: mpsc::Receiver<CoreEvent>,
    }

    pub fn local_profile() -> LocalProfile {
        let key = PeerKey([0xaa; 32]);
        LocalProfile {
            address: format!("{}00000000beef", key.to_hex()),
            peer_key: key,
            encryption_key: EncryptionKey([0xbb; 32]),
            local_address: None,
            push_token: None,
        }
    }

    pub fn harness() -> Harness {
        let overlay = Arc::new(MemoryOverlay::new());
        let db = shared(Database::open_in_memory().unwrap());
        let (sink, events) = EventSink::channel(64);
        let dispatcher = Arc::new(MessageDispatcher::new(
            overlay.clone(),
            db.clone(),
            local_profile(),
            sink,
        ));
        Harness {
            overlay,
            db,
            dispatcher,
            events,
        }
    }

    /// Register a peer built from `byte` with the overlay and store it as a
    /// contact whose presence matches `status`.
    pub fn add_contact(h: &Harness, byte: u8, status: ConnectionStatus) -> (PeerKey, TransportHandle) {
        let key = PeerKey([byte; 32]);
        let handle = h.overlay.add_known_peer(key, status);
        let address = format!("{}00000000abcd", key.to_hex());
        let peer = Peer::new(key, address, PresenceStatus::from_online(status.is_online()));
        lock_db(&h.db).upsert_peer(&peer).unwrap();
        (key, handle)
    }

    /// Skip ahead to the next message status notification.
    pub async fn next_status(events: &mut mpsc::Receiver<CoreEvent>) -> MessageStatus {
        loop {
            match events.recv().await {
                Some(CoreEvent::MessageStatusChanged { status, .. }) => return status,
                Some(_) => continue,
                None => panic!("event stream closed"),
            }
        }
    }
}
