use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::mpsc;

use parley_core::{CoreConfig, CoreEvent, EventSink, LocalProfile, Messenger};
use parley_net::{ChunkRequest, MemoryOverlay, OverlayEvent, OverlayTransport};
use parley_shared::crypto::SealedBoxProvider;
use parley_shared::identity::Identity;
use parley_shared::protocol::MessengerRequest;
use parley_shared::types::{ConnectionStatus, PeerKey, PresenceStatus};
use parley_store::{Database, MessageStatus};

struct Node {
    key: PeerKey,
    identity: Identity,
    overlay: Arc<MemoryOverlay>,
    messenger: Messenger,
    events: mpsc::Receiver<CoreEvent>,
    _dir: TempDir,
}

fn address_of(key: &PeerKey) -> String {
    format!("{}00000000abcd", key.to_hex())
}

fn node(byte: u8) -> Node {
    let key = PeerKey([byte; 32]);
    let identity = Identity::generate();
    let overlay = Arc::new(MemoryOverlay::new());
    let dir = TempDir::new().unwrap();
    let (sink, events) = EventSink::channel(512);
    let profile = LocalProfile {
        address: address_of(&key),
        peer_key: key,
        encryption_key: identity.public_key(),
        local_address: None,
        push_token: None,
    };
    let config = CoreConfig {
        data_dir: dir.path().to_path_buf(),
        ..CoreConfig::default()
    };
    let messenger = Messenger::new(
        config,
        overlay.clone(),
        Database::open_in_memory().unwrap(),
        Arc::new(SealedBoxProvider::new(identity.clone())),
        profile,
        sink,
    );
    Node {
        key,
        identity,
        overlay,
        messenger,
        events,
        _dir: dir,
    }
}

/// Make `other` an accepted, online contact of `node`.
async fn befriend(node: &Node, other: &Node) {
    node.overlay.add_known_peer(other.key, ConnectionStatus::Full);
    let mut request = MessengerRequest::new(address_of(&other.key));
    request.sender_encryption_key = Some(other.identity.public_key());
    node.messenger
        .contacts()
        .on_contact_request(other.key, &request.to_json().unwrap())
        .unwrap();
    node.messenger.contacts().accept_contact(&other.key).await.unwrap();
    node.messenger
        .contacts()
        .set_status(&other.key, PresenceStatus::Online)
        .unwrap();
}

fn drain(events: &mut mpsc::Receiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn test_send_to_offline_peer() {
    let alice = node(0xa1);
    let bob = node(0xb0);
    befriend(&alice, &bob).await;
    alice.overlay.set_status(&bob.key, ConnectionStatus::None);

    assert_eq!(alice.messenger.dispatcher().send(&bob.key, "hi").await, None);

    let message = alice.messenger.send_text(&bob.key, "hi", None).await.unwrap();
    assert_eq!(message.status, MessageStatus::Failed);
    assert!(alice.overlay.sent_texts().is_empty());
    assert!(alice
        .messenger
        .history(&bob.key, None)
        .unwrap()
        .iter()
        .all(|m| m.status != MessageStatus::Sent));
}

#[tokio::test]
async fn test_retry_passes_through_sending() {
    let mut alice = node(0xa2);
    let bob = node(0xb1);
    befriend(&alice, &bob).await;
    let handle = alice.overlay.resolve_peer_handle(&bob.key).await.unwrap();

    alice.overlay.set_status(&bob.key, ConnectionStatus::None);
    let failed = alice.messenger.send_text(&bob.key, "later", None).await.unwrap();
    assert_eq!(failed.status, MessageStatus::Failed);
    drain(&mut alice.events);

    alice.overlay.set_status(&bob.key, ConnectionStatus::Full);
    let retried = alice.messenger.retry(failed.id).await.unwrap();
    assert_eq!(retried.id, failed.id);
    assert_eq!(retried.status, MessageStatus::Sending);
    let temp_id = retried.temp_id.unwrap();

    alice
        .messenger
        .handle_event(OverlayEvent::DeliveryAck {
            handle,
            message_id: temp_id,
        })
        .await;

    let statuses: Vec<MessageStatus> = drain(&mut alice.events)
        .into_iter()
        .filter_map(|event| match event {
            CoreEvent::MessageStatusChanged { message_id, status, .. } if message_id == failed.id => {
                Some(status)
            }
            _ => None,
        })
        .collect();
    assert_eq!(statuses, vec![MessageStatus::Sending, MessageStatus::Sent]);

    let history = alice.messenger.history(&bob.key, None).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, MessageStatus::Sent);
}

#[tokio::test]
async fn test_history_windows() {
    let bob = node(0xb2);
    let alice = node(0xa3);
    befriend(&bob, &alice).await;
    let handle = bob.overlay.resolve_peer_handle(&alice.key).await.unwrap();

    for i in 1..=50 {
        let request = MessengerRequest::new(address_of(&alice.key)).with_text(format!("m{i}"));
        bob.messenger
            .handle_event(OverlayEvent::MessageReceived {
                handle,
                text: request.to_json().unwrap(),
            })
            .await;
    }

    let first = bob.messenger.history(&alice.key, None).unwrap();
    assert_eq!(first.len(), 20);
    assert_eq!(first[0].body, "m1");
    assert_eq!(first[19].body, "m20");

    let next = bob.messenger.history(&alice.key, Some(first[19].id)).unwrap();
    assert_eq!(next.first().unwrap().body, "m20");
    assert_eq!(next.last().unwrap().body, "m40");

    let tail = bob.messenger.history(&alice.key, Some(next.last().unwrap().id)).unwrap();
    assert_eq!(tail.first().unwrap().body, "m40");
    assert_eq!(tail.last().unwrap().body, "m50");
}

#[tokio::test]
async fn test_file_transfer_end_to_end() {
    let mut alice = node(0xa4);
    let bob = node(0xb3);
    befriend(&alice, &bob).await;
    befriend(&bob, &alice).await;
    let alice_side = alice.overlay.resolve_peer_handle(&bob.key).await.unwrap();
    let bob_side = bob.overlay.resolve_peer_handle(&alice.key).await.unwrap();

    let files = TempDir::new().unwrap();
    let photo = files.path().join("Sunset.JPG");
    let photo_bytes: Vec<u8> = (0..9000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&photo, &photo_bytes).unwrap();

    let sent = alice
        .messenger
        .send_files(&bob.key, Some("look".into()), None, &[photo])
        .await
        .unwrap();
    assert_eq!(sent.status, MessageStatus::Sending);
    let begun = alice.overlay.begun_transfers()[0].clone();

    // Alice serves the archive in 4096-byte chunks, then the completion request.
    let mut position = 0;
    while position < begun.size {
        let length = 4096.min(begun.size - position) as usize;
        alice
            .messenger
            .handle_event(OverlayEvent::ChunkRequested(ChunkRequest::new(
                alice_side,
                begun.file_id,
                position,
                length,
            )))
            .await;
        position += length as u64;
    }
    alice
        .messenger
        .handle_event(OverlayEvent::ChunkRequested(ChunkRequest::new(
            alice_side,
            begun.file_id,
            begun.size,
            0,
        )))
        .await;

    let progress: Vec<u8> = drain(&mut alice.events)
        .into_iter()
        .filter_map(|event| match event {
            CoreEvent::FileSendProgress { progress, .. } => Some(progress),
            _ => None,
        })
        .collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&100));
    assert_eq!(
        alice.messenger.history(&bob.key, None).unwrap()[0].status,
        MessageStatus::Sent
    );

    // Bob receives exactly the chunks Alice pushed.
    let chunks = alice.overlay.pushed_chunks();
    let covered: u64 = chunks.iter().map(|c| c.data.len() as u64).sum();
    assert_eq!(covered, begun.size);

    bob.messenger
        .handle_event(OverlayEvent::FileOffered {
            handle: bob_side,
            file_id: begun.file_id,
            name: begun.name.clone(),
            size: begun.size,
        })
        .await;
    for chunk in chunks {
        bob.messenger
            .handle_event(OverlayEvent::ChunkReceived {
                handle: bob_side,
                file_id: chunk.file_id,
                position: chunk.position,
                data: chunk.data,
            })
            .await;
    }

    let inbox = bob.messenger.history(&alice.key, None).unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].body, "look");
    assert_eq!(inbox[0].media.len(), 1);
    assert_eq!(inbox[0].media[0].file_name, "sunset.jpg");

    let stored = inbox[0].media[0].path.as_ref().unwrap();
    assert_eq!(std::fs::read(stored).unwrap(), photo_bytes);
    assert!(bob.messenger.contacts().get_contact(&alice.key).unwrap().unwrap().has_unseen);
}

/// Send `files` from `sender` to `receiver` and play the whole transfer
/// through both overlays.
async fn transfer(sender: &Node, receiver: &Node, text: &str, files: &[PathBuf]) {
    let outgoing = sender.overlay.resolve_peer_handle(&receiver.key).await.unwrap();
    let incoming = receiver.overlay.resolve_peer_handle(&sender.key).await.unwrap();
    let already_pushed = sender.overlay.pushed_chunks().len();

    sender
        .messenger
        .send_files(&receiver.key, Some(text.into()), None, files)
        .await
        .unwrap();
    let begun = sender.overlay.begun_transfers().last().unwrap().clone();
    for request in [
        ChunkRequest::new(outgoing, begun.file_id, 0, begun.size as usize),
        ChunkRequest::new(outgoing, begun.file_id, begun.size, 0),
    ] {
        sender
            .messenger
            .handle_event(OverlayEvent::ChunkRequested(request))
            .await;
    }

    receiver
        .messenger
        .handle_event(OverlayEvent::FileOffered {
            handle: incoming,
            file_id: begun.file_id,
            name: begun.name,
            size: begun.size,
        })
        .await;
    for chunk in sender.overlay.pushed_chunks().into_iter().skip(already_pushed) {
        receiver
            .messenger
            .handle_event(OverlayEvent::ChunkReceived {
                handle: incoming,
                file_id: chunk.file_id,
                position: chunk.position,
                data: chunk.data,
            })
            .await;
    }
}

#[tokio::test]
async fn test_same_named_attachments_kept_apart() {
    let alice = node(0xa6);
    let bob = node(0xb5);
    befriend(&alice, &bob).await;
    befriend(&bob, &alice).await;

    let files = TempDir::new().unwrap();
    let photo = files.path().join("photo.jpg");
    std::fs::write(&photo, b"FIRST PHOTO").unwrap();
    transfer(&alice, &bob, "one", &[photo.clone()]).await;
    std::fs::write(&photo, b"SECOND PHOTO").unwrap();
    transfer(&alice, &bob, "two", &[photo]).await;

    let inbox = bob.messenger.history(&alice.key, None).unwrap();
    assert_eq!(inbox.len(), 2);
    let first = inbox[0].media[0].path.as_ref().unwrap();
    let second = inbox[1].media[0].path.as_ref().unwrap();
    assert_ne!(first, second);
    assert_eq!(std::fs::read(first).unwrap(), b"FIRST PHOTO");
    assert_eq!(std::fs::read(second).unwrap(), b"SECOND PHOTO");
}

#[tokio::test]
async fn test_remove_contact_deletes_history() {
    let alice = node(0xa5);
    let bob = node(0xb4);
    befriend(&alice, &bob).await;

    alice.messenger.send_text(&bob.key, "one", None).await.unwrap();
    alice.messenger.send_text(&bob.key, "two", None).await.unwrap();
    assert_eq!(alice.messenger.history(&bob.key, None).unwrap().len(), 2);

    assert!(alice.messenger.contacts().remove_contact(&bob.key).await.unwrap());
    assert!(alice.messenger.history(&bob.key, None).unwrap().is_empty());
    assert!(alice.overlay.resolve_peer_handle(&bob.key).await.is_none());
}
