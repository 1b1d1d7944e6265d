//! Whole-cluster behaviour over real localhost sockets.

use corelib::MemberIdentity;
use membership::{Introducer, Member, MemberConfig, MembershipError};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use storage::StorageError;
use streaming::{MembershipMessage, Message, Transport, TransportConfig};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Helpers
// ============================================================================

fn fast_transport() -> TransportConfig {
    TransportConfig {
        connect_timeout: Duration::from_millis(500),
        io_timeout: Duration::from_secs(2),
        transfer_timeout: Duration::from_secs(5),
    }
}

async fn start_introducer() -> (String, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let shutdown = CancellationToken::new();
    let introducer = Introducer::new(Transport::new(fast_transport()));
    tokio::spawn(introducer.serve(listener, shutdown.clone()));
    (address, shutdown)
}

fn member(storage: &Path, introducer: &str) -> Member {
    Member::new(member_config(storage, introducer))
}

fn member_config(storage: &Path, introducer: &str) -> MemberConfig {
    MemberConfig {
        introducer: Some(introducer.to_string()),
        storage_root: storage.to_path_buf(),
        protocol_period: Duration::from_millis(100),
        ping_timeout: Duration::from_millis(200),
        repair_period: Duration::from_millis(200),
        transport: fast_transport(),
        ..MemberConfig::default()
    }
}

/// A port nothing is bound to right now.
async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Tell `victim` it was declared crashed.
async fn report_crash(victim: &MemberIdentity) {
    let report = Message::Membership(MembershipMessage::Crash(victim.clone()));
    Transport::new(fast_transport())
        .send(victim, &report)
        .await
        .unwrap();
}

async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

fn sees(member: &Member, count: usize, coordinator: &MemberIdentity) -> bool {
    match member.list_members() {
        Ok(listing) => {
            listing.snapshot.members.len() == count
                && listing.snapshot.coordinator.as_ref() == Some(coordinator)
        }
        Err(_) => false,
    }
}

/// Three members joined through one introducer, the first one coordinating.
async fn three_members(storage: &Path) -> (Vec<Arc<Member>>, Vec<MemberIdentity>, CancellationToken) {
    let (introducer, shutdown) = start_introducer().await;

    let mut members = Vec::new();
    let mut identities = Vec::new();
    for _ in 0..3 {
        let member = Arc::new(member(storage, &introducer));
        identities.push(member.join().await.unwrap());
        members.push(member);
    }

    let founder = identities[0].clone();
    assert!(
        eventually(|| {
            let converged = members.iter().all(|m| sees(m, 3, &founder));
            async move { converged }
        })
        .await,
        "membership did not converge"
    );
    (members, identities, shutdown)
}

async fn confirmed(member: &Member, remote: &str, version: u64) -> bool {
    match member.list_versions(remote).await {
        Ok(versions) => versions.get(&version).map(|h| !h.is_empty()).unwrap_or(false),
        Err(_) => false,
    }
}

// ============================================================================
// Membership
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_first_member_coordinates_itself() {
    let dir = tempfile::tempdir().unwrap();
    let (introducer, _shutdown) = start_introducer().await;

    let solo = member(dir.path(), &introducer);
    let identity = solo.join().await.unwrap();

    assert_eq!(solo.list_self().unwrap(), identity);
    assert_eq!(solo.coordinator().unwrap(), Some(identity));
    assert!(matches!(
        solo.join().await,
        Err(MembershipError::AlreadyJoined(_))
    ));

    solo.leave().await.unwrap();
    assert!(!solo.is_joined());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unreachable_introducer_fails_join() {
    let dir = tempfile::tempdir().unwrap();
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = closed.local_addr().unwrap().to_string();
    drop(closed);

    let orphan = member(dir.path(), &address);
    assert!(matches!(
        orphan.join().await,
        Err(MembershipError::IntroducerUnreachable { .. })
    ));
    assert!(!orphan.is_joined());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_coordinator_leave_triggers_election() {
    let dir = tempfile::tempdir().unwrap();
    let (members, identities, _shutdown) = three_members(dir.path()).await;

    members[0].leave().await.unwrap();

    let expected = identities[1].clone().max(identities[2].clone());
    assert!(
        eventually(|| {
            let agreed = sees(&members[1], 2, &expected) && sees(&members[2], 2, &expected);
            async move { agreed }
        })
        .await,
        "survivors did not elect {expected}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_crash_report_about_self_evicts_silently() {
    let dir = tempfile::tempdir().unwrap();
    let (members, identities, _shutdown) = three_members(dir.path()).await;

    report_crash(&identities[2]).await;

    assert!(
        eventually(|| {
            let left = !members[2].is_joined();
            async move { left }
        })
        .await
    );

    // The others never got a Leave; the failure detector removes the victim.
    let founder = identities[0].clone();
    assert!(
        eventually(|| {
            let pruned = sees(&members[0], 2, &founder) && sees(&members[1], 2, &founder);
            async move { pruned }
        })
        .await,
        "silent member was not detected"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_silent_coordinator_is_detected_and_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let (members, identities, _shutdown) = three_members(dir.path()).await;

    // The coordinator stops answering without a Leave.
    report_crash(&identities[0]).await;

    let expected = identities[1].clone().max(identities[2].clone());
    assert!(
        eventually(|| {
            let agreed = sees(&members[1], 2, &expected) && sees(&members[2], 2, &expected);
            async move { agreed }
        })
        .await,
        "survivors did not replace the silent coordinator with {expected}"
    );
    assert!(!members[0].is_joined());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rejoin_on_fixed_port_after_crash_report() {
    let dir = tempfile::tempdir().unwrap();
    let (introducer, _shutdown) = start_introducer().await;

    let founder = member(dir.path(), &introducer);
    let founder_id = founder.join().await.unwrap();

    let port = free_port().await;
    let fixed = Member::new(MemberConfig {
        port,
        ..member_config(dir.path(), &introducer)
    });
    let first = fixed.join().await.unwrap();
    assert_eq!(first.port, port);

    report_crash(&first).await;
    assert!(
        eventually(|| {
            let left = !fixed.is_joined();
            async move { left }
        })
        .await
    );

    let second = fixed.join().await.unwrap();
    assert_eq!(second.port, port);
    assert_ne!(second, first);
    assert!(
        eventually(|| {
            let seen = sees(&founder, 2, &founder_id)
                && founder
                    .list_members()
                    .map(|listing| listing.snapshot.members.contains(&second))
                    .unwrap_or(false);
            async move { seen }
        })
        .await,
        "founder did not take the new incarnation in place of the old one"
    );
    assert_eq!(fixed.list_members().unwrap().snapshot.members.len(), 2);
}

// ============================================================================
// Files
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_put_get_versions_delete() {
    let dir = tempfile::tempdir().unwrap();
    let storage = dir.path().join("nodes");
    let (members, _identities, _shutdown) = three_members(&storage).await;

    let source = dir.path().join("report.txt");
    std::fs::write(&source, b"first draft").unwrap();
    let receipt = members[1].put(&source, "docs/report.txt").await.unwrap();
    assert_eq!(receipt.version, 1);
    assert_eq!(receipt.stored_on.len(), 3);
    assert!(eventually(|| confirmed(&members[0], "docs/report.txt", 1)).await);

    std::fs::write(&source, b"second draft").unwrap();
    let receipt = members[2].put(&source, "docs/report.txt").await.unwrap();
    assert_eq!(receipt.version, 2);
    assert!(eventually(|| confirmed(&members[0], "docs/report.txt", 2)).await);

    let fetched = dir.path().join("fetched.txt");
    members[0].get("docs/report.txt", &fetched).await.unwrap();
    assert_eq!(std::fs::read(&fetched).unwrap(), b"second draft");

    let history = dir.path().join("history.txt");
    let versions = members[1]
        .get_versions("docs/report.txt", 5, &history)
        .await
        .unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].0, 2);
    assert_eq!(std::fs::read(dir.path().join("history_1.txt")).unwrap(), b"first draft");

    assert!(members[1]
        .list_local_files()
        .unwrap()
        .contains(&"docs/report_1.txt".to_string()));

    members[2].delete("docs/report.txt").await.unwrap();
    assert!(matches!(
        members[0].get("docs/report.txt", &fetched).await,
        Err(MembershipError::Storage(StorageError::NotFound(_)))
    ));
    assert!(
        eventually(|| {
            let empty = members
                .iter()
                .all(|m| m.list_local_files().map(|f| f.is_empty()).unwrap_or(false));
            async move { empty }
        })
        .await
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_new_coordinator_recovers_files() {
    let dir = tempfile::tempdir().unwrap();
    let storage = dir.path().join("nodes");
    let (members, _identities, _shutdown) = three_members(&storage).await;

    let source = dir.path().join("data.bin");
    std::fs::write(&source, b"survives failover").unwrap();
    members[1].put(&source, "data.bin").await.unwrap();
    assert!(eventually(|| confirmed(&members[0], "data.bin", 1)).await);

    members[0].leave().await.unwrap();

    let fetched = dir.path().join("after.bin");
    assert!(
        eventually(|| {
            let member = Arc::clone(&members[2]);
            let fetched = fetched.clone();
            async move { member.get("data.bin", &fetched).await.is_ok() }
        })
        .await,
        "file not available after failover"
    );
    assert_eq!(std::fs::read(&fetched).unwrap(), b"survives failover");
}
