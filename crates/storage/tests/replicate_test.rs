//! File stores talking to each other over real TCP connections.

use corelib::{MemberIdentity, MemberList, MembershipRing};
use std::sync::Arc;
use std::time::Duration;
use storage::FileStore;
use streaming::codec::{read_frame, write_frame};
use streaming::{Destination, FileMessage, FileMessageKind, Message, Transport};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

// ============================================================================
// Helpers
// ============================================================================

/// Bind a listener, open a store for it and serve file requests until the
/// test ends.
async fn serving_store(dir: &tempfile::TempDir, ring: &MemberList) -> (MemberIdentity, Arc<FileStore>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let identity = MemberIdentity::new("127.0.0.1", port, port as u64);

    let store = Arc::new(
        FileStore::open(dir.path().join(port.to_string()), ring.reader(), Transport::default())
            .await
            .unwrap(),
    );

    let serving = Arc::clone(&store);
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let store = Arc::clone(&serving);
            tokio::spawn(async move {
                if let Ok(Message::File(message)) = read_frame::<_, Message>(&mut stream).await {
                    let _ = store.handle(message, &mut stream).await;
                }
            });
        }
    });

    (identity, store)
}

fn push_request(name: &str) -> Message {
    Message::File(FileMessage::request(
        FileMessageKind::Put,
        Destination::FileServer,
        name,
    ))
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_push_then_replicate_between_stores() {
    let dir = tempfile::tempdir().unwrap();
    let ring = MemberList::new(MembershipRing::new(MemberIdentity::new("127.0.0.1", 1, 1)));

    let (first_id, first) = serving_store(&dir, &ring).await;
    let (_second_id, second) = serving_store(&dir, &ring).await;
    ring.add(first_id.clone());

    let source = dir.path().join("source.txt");
    std::fs::write(&source, b"replicated body").unwrap();

    let confirmation = Transport::default()
        .push_file(&first_id, &push_request("doc_1.txt"), &source)
        .await
        .unwrap();
    assert!(confirmation.is_ok());
    assert!(first.contains("doc_1.txt"));

    let outcome = second.replicate("doc_1.txt", vec![first_id]).await;
    assert_eq!(outcome, FileMessageKind::Ok);
    assert_eq!(
        std::fs::read(second.root().join("doc_1.txt")).unwrap(),
        b"replicated body"
    );
}

#[tokio::test]
async fn test_replicate_request_over_tcp() {
    let dir = tempfile::tempdir().unwrap();
    let ring = MemberList::new(MembershipRing::new(MemberIdentity::new("127.0.0.1", 1, 1)));

    let (first_id, _first) = serving_store(&dir, &ring).await;
    let (second_id, second) = serving_store(&dir, &ring).await;
    ring.add(first_id.clone());

    let source = dir.path().join("source.txt");
    std::fs::write(&source, b"v1").unwrap();
    Transport::default()
        .push_file(&first_id, &push_request("doc_1.txt"), &source)
        .await
        .unwrap();

    let order = Message::File(
        FileMessage::request(FileMessageKind::Replicate, Destination::FileServer, "doc_1.txt")
            .with_nodes(vec![first_id]),
    );
    let reply: FileMessage = Transport::default().request(&second_id, &order).await.unwrap();
    assert_eq!(reply.kind, FileMessageKind::Ok);

    let again: FileMessage = Transport::default().request(&second_id, &order).await.unwrap();
    assert_eq!(again.kind, FileMessageKind::FileExists);
    assert!(second.contains("doc_1.txt"));
}

#[tokio::test]
async fn test_delete_message_removes_versions() {
    let dir = tempfile::tempdir().unwrap();
    let ring = MemberList::new(MembershipRing::new(MemberIdentity::new("127.0.0.1", 1, 1)));
    let (id, store) = serving_store(&dir, &ring).await;

    let source = dir.path().join("source.txt");
    std::fs::write(&source, b"v").unwrap();
    for name in ["doc_1.txt", "doc_2.txt"] {
        Transport::default()
            .push_file(&id, &push_request(name), &source)
            .await
            .unwrap();
    }

    let delete = Message::File(FileMessage::request(
        FileMessageKind::Delete,
        Destination::FileServer,
        "doc.txt",
    ));
    Transport::default().send(&id, &delete).await.unwrap();

    for _ in 0..50 {
        if store.local_files().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(store.local_files().is_empty());
}

#[tokio::test]
async fn test_truncated_pull_is_not_stored() {
    let dir = tempfile::tempdir().unwrap();
    let ring = MemberList::new(MembershipRing::new(MemberIdentity::new("127.0.0.1", 1, 1)));
    let (_id, store) = serving_store(&dir, &ring).await;

    // A holder that dies partway through the body.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let holder = MemberIdentity::new("127.0.0.1", listener.local_addr().unwrap().port(), 1);
    ring.add(holder.clone());
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _: Message = read_frame(&mut stream).await.unwrap();
        write_frame(&mut stream, &FileMessage::ok().with_size(100)).await.unwrap();
        stream.write_all(b"cut off").await.unwrap();
    });

    let outcome = store.replicate("doc_1.txt", vec![holder]).await;
    assert_eq!(outcome, FileMessageKind::Fail);
    assert!(!store.contains("doc_1.txt"));
    assert!(!store.root().join("doc_1.txt").exists());
}
