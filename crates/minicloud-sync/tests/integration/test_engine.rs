//! Integration tests for full synchronization passes

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

use minicloud_core::checksum::fingerprint;
use minicloud_core::crypto::{CryptoStream, SecretKey, DEFAULT_CIPHER};
use minicloud_core::domain::{User, UserListing};
use minicloud_sync::{DownloadEvent, SyncEvent, SyncFolder, SyncPhase, UploadEvent};

use crate::common::{self, FakeRemote};

fn engine(remote: &Arc<FakeRemote>, local: &Path) -> (SyncFolder, UnboundedReceiver<SyncEvent>) {
    let engine = SyncFolder::new(common::folder_config(local), remote.clone()).unwrap();
    let events = common::capture(engine.events());
    (engine, events)
}

fn is_end(event: &SyncEvent) -> bool {
    !matches!(
        event,
        SyncEvent::External(_) | SyncEvent::Upload(_) | SyncEvent::Download(_)
    )
}

/// Runs one pass and returns every event it produced
async fn run_pass(engine: &SyncFolder, events: &mut UnboundedReceiver<SyncEvent>) -> Vec<SyncEvent> {
    assert!(engine.sync());
    common::events_until(events, is_end).await
}

fn uploads_started(events: &[SyncEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SyncEvent::Upload(UploadEvent::Started { .. })))
        .count()
}

fn downloads_started(events: &[SyncEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SyncEvent::Download(DownloadEvent::Started { .. })))
        .count()
}

fn user_with_key(key: &[u8]) -> User {
    let listing: UserListing =
        serde_json::from_value(serde_json::json!({"id": 1, "name": "alice"})).unwrap();
    let mut user = User::from_listing(listing).unwrap();
    user.set_key(SecretKey::from(key));
    user
}

#[tokio::test]
async fn test_second_pass_without_changes_is_idle() {
    let temp = TempDir::new().unwrap();
    let remote = FakeRemote::new();
    remote.add_file("", "a.txt", b"hello", 10);
    remote.add_file("sub", "b.txt", b"world", 10);
    common::write_file(temp.path(), "local/new.txt", b"from disk", 10);
    let (engine, mut events) = engine(&remote, temp.path());

    let first = run_pass(&engine, &mut events).await;
    assert!(matches!(first.last(), Some(SyncEvent::Done { .. })));
    assert_eq!(downloads_started(&first), 2);
    assert_eq!(uploads_started(&first), 1);
    assert_eq!(std::fs::read(temp.path().join("a.txt")).unwrap(), b"hello");
    assert_eq!(std::fs::read(temp.path().join("sub/b.txt")).unwrap(), b"world");
    assert_eq!(remote.uploads()[0].form.target_path.as_deref(), Some("docs/local"));
    assert!(engine.config().last > 0);
    assert_eq!(engine.phase(), SyncPhase::Idle);
    assert!(!engine.is_syncing());

    let second = run_pass(&engine, &mut events).await;
    assert!(matches!(second.last(), Some(SyncEvent::Done { .. })));
    assert_eq!(downloads_started(&second), 0);
    assert_eq!(uploads_started(&second), 0);
    assert_eq!(remote.download_count(), 2);
    assert_eq!(remote.uploads().len(), 1);
    assert_eq!(remote.tree_requests(), 2);
}

#[tokio::test]
async fn test_newer_local_file_is_uploaded_as_new_version() {
    let temp = TempDir::new().unwrap();
    let remote = FakeRemote::new();
    let id = remote.add_file("", "a.txt", b"Y", 50);
    common::write_file(temp.path(), "a.txt", b"X", 100);
    let (engine, mut events) = engine(&remote, temp.path());

    let seen = run_pass(&engine, &mut events).await;
    assert!(matches!(seen.last(), Some(SyncEvent::Done { .. })));
    assert_eq!(downloads_started(&seen), 0);

    let upload = &remote.uploads()[0];
    assert_eq!(upload.form.replace.map(|f| f.get()), Some(id));
    assert!(upload.form.create_version);
    assert_eq!(upload.form.checksum, fingerprint(b"X"));
    assert_eq!(remote.files()[0].version, 2);
    assert_eq!(std::fs::read(temp.path().join("a.txt")).unwrap(), b"X");
}

#[tokio::test]
async fn test_older_local_file_is_overwritten() {
    let temp = TempDir::new().unwrap();
    let remote = FakeRemote::new();
    remote.add_file("", "a.txt", b"Y", 50);
    common::write_file(temp.path(), "a.txt", b"X", 10);
    let (engine, mut events) = engine(&remote, temp.path());

    let seen = run_pass(&engine, &mut events).await;
    assert!(matches!(seen.last(), Some(SyncEvent::Done { .. })));
    assert_eq!(uploads_started(&seen), 0);
    assert!(remote.uploads().is_empty());
    assert_eq!(std::fs::read(temp.path().join("a.txt")).unwrap(), b"Y");
}

#[tokio::test]
async fn test_filtered_files_are_never_transferred() {
    let temp = TempDir::new().unwrap();
    let remote = FakeRemote::new();
    remote.add_file("", "remote.tmp", b"x", 10);
    remote.add_file("", "huge.bin", &[1u8; 500], 10);
    common::write_file(temp.path(), "cache/local.tmp", b"x", 10);
    common::write_file(temp.path(), "big.bin", &[2u8; 500], 10);

    let mut config = common::folder_config(temp.path());
    config.max_size = 100;
    config.regexp = Some(r".*\.tmp".to_string());
    let engine = SyncFolder::new(config, remote.clone()).unwrap();
    let mut events = common::capture(engine.events());

    let seen = run_pass(&engine, &mut events).await;
    assert!(matches!(seen.last(), Some(SyncEvent::Done { .. })));
    assert_eq!(uploads_started(&seen) + downloads_started(&seen), 0);
    assert!(!temp.path().join("remote.tmp").exists());
    assert!(!temp.path().join("huge.bin").exists());
}

#[tokio::test]
async fn test_encrypted_round_trip_between_folders() {
    let key = [9u8; 16];
    let remote = FakeRemote::new();

    let source = TempDir::new().unwrap();
    common::write_file(source.path(), "secret.txt", b"classified", 10);
    let (uploading, mut up_events) = engine(&remote, source.path());
    uploading.set_user(user_with_key(&key));
    uploading.set_encryption(DEFAULT_CIPHER);
    let seen = run_pass(&uploading, &mut up_events).await;
    assert!(matches!(seen.last(), Some(SyncEvent::Done { .. })));

    let stored = &remote.files()[0];
    assert_eq!(stored.encryption, DEFAULT_CIPHER);
    assert_eq!(stored.checksum, fingerprint(b"classified"));
    let cipher = CryptoStream::new(&key, DEFAULT_CIPHER).unwrap();
    assert_eq!(cipher.decrypt_bytes(&stored.content).unwrap(), b"classified");
    drop(uploading);

    let target = TempDir::new().unwrap();
    let (downloading, mut down_events) = engine(&remote, target.path());
    downloading.set_user(user_with_key(&key));
    let seen = run_pass(&downloading, &mut down_events).await;
    assert!(matches!(seen.last(), Some(SyncEvent::Done { .. })));
    assert_eq!(
        std::fs::read(target.path().join("secret.txt")).unwrap(),
        b"classified"
    );
}

#[tokio::test]
async fn test_missing_key_aborts_with_encryption_failed() {
    let temp = TempDir::new().unwrap();
    let remote = FakeRemote::new();
    remote.add_file("", "a.txt", b"a", 10);
    let (engine, mut events) = engine(&remote, temp.path());
    engine.set_encryption(DEFAULT_CIPHER);

    let seen = run_pass(&engine, &mut events).await;
    assert!(matches!(seen.last(), Some(SyncEvent::EncryptionFailed { .. })));
    assert_eq!(remote.download_count(), 0);
    assert!(!engine.is_syncing());
    assert_eq!(engine.config().last, 0);
}

#[tokio::test]
async fn test_remote_error_aborts_pass() {
    let temp = TempDir::new().unwrap();
    let remote = FakeRemote::new();
    remote.fail_tree("No such path");
    let (engine, mut events) = engine(&remote, temp.path());

    let seen = run_pass(&engine, &mut events).await;
    assert!(matches!(seen[0], SyncEvent::External(_)));
    match seen.last() {
        Some(SyncEvent::RemoteFailed { reason }) => assert_eq!(reason, "No such path"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(engine.phase(), SyncPhase::Idle);

    // The guard is released, so a new pass can start
    let seen = run_pass(&engine, &mut events).await;
    assert!(matches!(seen.last(), Some(SyncEvent::Done { .. })));
}

#[tokio::test]
async fn test_sync_rejects_reentry() {
    let temp = TempDir::new().unwrap();
    let remote = FakeRemote::new();
    let (engine, mut events) = engine(&remote, temp.path());

    assert!(engine.sync());
    assert_eq!(engine.phase(), SyncPhase::Reconciling);
    assert!(!engine.sync());
    assert_eq!(remote.tree_requests(), 1);

    let seen = common::events_until(&mut events, is_end).await;
    assert!(matches!(seen.last(), Some(SyncEvent::Done { .. })));
    common::assert_quiet(&mut events).await;
}

#[tokio::test]
async fn test_missing_local_root_is_created() {
    let temp = TempDir::new().unwrap();
    let local = temp.path().join("not/yet/there");
    let remote = FakeRemote::new();
    remote.add_file("", "a.txt", b"a", 10);
    let (engine, mut events) = engine(&remote, &local);

    let seen = run_pass(&engine, &mut events).await;
    assert!(matches!(seen.last(), Some(SyncEvent::Done { .. })));
    assert!(local.join("a.txt").is_file());
}

#[tokio::test]
async fn test_uncreatable_local_root_reports_path() {
    let temp = TempDir::new().unwrap();
    let blocker = common::write_file(temp.path(), "file", b"", 1);
    let local = blocker.join("sub");
    let remote = FakeRemote::new();
    let (engine, mut events) = engine(&remote, &local);

    let seen = run_pass(&engine, &mut events).await;
    match seen.last() {
        Some(SyncEvent::MkdirFailed { path }) => assert_eq!(path, &local),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(remote.tree_requests(), 0);
    assert!(!engine.is_syncing());
}

#[tokio::test]
async fn test_unreadable_local_file_aborts_with_checksum_failed() {
    let temp = TempDir::new().unwrap();
    let remote = FakeRemote::new();
    remote.add_file("", "a.txt", b"remote", 10);
    remote.add_file("", "b.txt", b"b", 10);
    // A directory where the listing has a file cannot be fingerprinted
    std::fs::create_dir_all(temp.path().join("a.txt")).unwrap();
    common::write_file(temp.path(), "new.txt", b"n", 10);
    let (engine, mut events) = engine(&remote, temp.path());

    let seen = run_pass(&engine, &mut events).await;
    match seen.last() {
        Some(SyncEvent::ChecksumFailed { path }) => assert_eq!(path, &temp.path().join("a.txt")),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(uploads_started(&seen) + downloads_started(&seen), 0);
    common::assert_quiet(&mut events).await;
    assert_eq!(remote.download_count(), 0);
    assert!(remote.uploads().is_empty());
    assert!(!temp.path().join("b.txt").exists());
    assert!(!engine.is_syncing());
    assert_eq!(engine.phase(), SyncPhase::Idle);
    assert_eq!(engine.config().last, 0);
}

#[tokio::test]
async fn test_uncreatable_download_folder_reports_path() {
    let temp = TempDir::new().unwrap();
    let remote = FakeRemote::new();
    remote.add_file("sub", "n.txt", b"n", 10);
    let blocker = common::write_file(temp.path(), "sub", b"", 1);
    let (engine, mut events) = engine(&remote, temp.path());

    let seen = run_pass(&engine, &mut events).await;
    match seen.last() {
        Some(SyncEvent::MkdirFailed { path }) => assert_eq!(path, &blocker),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(uploads_started(&seen) + downloads_started(&seen), 0);
    common::assert_quiet(&mut events).await;
    assert_eq!(remote.download_count(), 0);
    assert!(remote.uploads().is_empty());
    assert!(blocker.is_file());
    assert!(!engine.is_syncing());
}

#[tokio::test]
async fn test_failed_transfer_waits_for_continue() {
    let temp = TempDir::new().unwrap();
    let remote = FakeRemote::new();
    let bad = remote.add_file("", "a.txt", b"a", 10);
    remote.add_file("", "b.txt", b"b", 10);
    remote.fail_download(bad);
    let (engine, mut events) = engine(&remote, temp.path());

    assert!(engine.sync());
    let seen = common::events_until(&mut events, |e| {
        matches!(e, SyncEvent::Download(DownloadEvent::Failed { .. }))
    })
    .await;
    assert!(!seen.iter().any(|e| matches!(e, SyncEvent::Done { .. })));
    assert_eq!(engine.phase(), SyncPhase::Transferring);
    assert!(engine.is_syncing());

    assert!(engine.continue_transfers());
    let seen = common::events_until(&mut events, is_end).await;
    assert!(matches!(seen.last(), Some(SyncEvent::Done { .. })));
    assert!(temp.path().join("b.txt").is_file());
    assert!(!temp.path().join("a.txt").exists());
}

#[tokio::test]
async fn test_stop_ends_pass_and_ignores_late_reply() {
    let temp = TempDir::new().unwrap();
    let remote = FakeRemote::new();
    remote.add_file("", "a.txt", b"a", 10);
    let (engine, mut events) = engine(&remote, temp.path());

    assert!(engine.sync());
    engine.stop();
    assert!(matches!(
        common::next_event(&mut events).await,
        SyncEvent::Stopped
    ));
    assert_eq!(engine.phase(), SyncPhase::Idle);
    assert!(!engine.is_syncing());

    // The tree reply still arrives but belongs to no running pass
    common::assert_quiet(&mut events).await;
    assert_eq!(remote.download_count(), 0);
    assert!(!temp.path().join("a.txt").exists());
}
