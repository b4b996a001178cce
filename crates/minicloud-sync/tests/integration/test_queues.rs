//! Integration tests for the upload and download queues

use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream;
use tokio::io::AsyncReadExt;

use minicloud_core::checksum::fingerprint;
use minicloud_core::crypto::{CryptoStream, SecretKey, DEFAULT_CIPHER};
use minicloud_core::domain::{FileListing, RemoteFile};
use minicloud_core::ports::{ByteStream, IRemoteClient};
use minicloud_sync::{DownloadEvent, DownloadItem, Downloader, UploadEvent, UploadItem, Uploader};

use crate::common::{self, FakeRemote};

fn body(data: &[u8]) -> ByteStream {
    let chunks: Vec<std::io::Result<Bytes>> = vec![Ok(Bytes::copy_from_slice(data))];
    Box::pin(stream::iter(chunks))
}

fn stream_item(name: &str, data: &[u8]) -> UploadItem {
    UploadItem::stream(name, body(data), Some(data.len() as u64), fingerprint(data))
}

fn remote_file(id: i64, name: &str, encryption: &str) -> Arc<RemoteFile> {
    let listing: FileListing = serde_json::from_value(serde_json::json!({
        "id": id, "filename": name, "path": common::ROOT, "encryption": encryption
    }))
    .unwrap();
    RemoteFile::from_listing(listing)
}

#[tokio::test]
async fn test_upload_queue_drains_in_order() {
    let remote = FakeRemote::new();
    let uploader = Uploader::new(remote.clone(), None);
    let mut events = common::capture(uploader.events());

    let big = vec![b'z'; 10_000];
    uploader.enqueue(stream_item("a.txt", b"first"));
    uploader.enqueue(stream_item("b.bin", &big));
    uploader.enqueue(stream_item("c.txt", b"third"));
    assert!(uploader.start("docs"));
    assert!(!uploader.start("docs"));

    let seen = common::events_until(&mut events, |e| matches!(e, UploadEvent::AllDone)).await;
    common::assert_quiet(&mut events).await;

    let started: Vec<&str> = seen
        .iter()
        .filter_map(|e| match e {
            UploadEvent::Started { name, target } => {
                assert_eq!(target.as_deref(), Some("docs"));
                Some(name.as_str())
            }
            _ => None,
        })
        .collect();
    assert_eq!(started, vec!["a.txt", "b.bin", "c.txt"]);
    assert_eq!(
        seen.iter()
            .filter(|e| matches!(e, UploadEvent::FileDone { .. }))
            .count(),
        3
    );

    let progress: Vec<u64> = seen
        .iter()
        .filter_map(|e| match e {
            UploadEvent::Progress { name, sent, total } if name == "b.bin" => {
                assert_eq!(*total, Some(10_000));
                Some(*sent)
            }
            _ => None,
        })
        .collect();
    assert!(progress.len() >= 3, "chunked progress: {progress:?}");
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*progress.last().unwrap(), 10_000);

    let uploads = remote.uploads();
    assert_eq!(uploads.len(), 3);
    assert_eq!(uploads[1].body, big);
    assert_eq!(uploads[1].form.checksum, fingerprint(&big));
    assert_eq!(uploads[1].form.encryption, "");
    assert!(uploader.is_empty());
    assert!(!uploader.is_running());
}

#[tokio::test]
async fn test_encrypted_upload_replaces_existing_file() {
    let remote = FakeRemote::new();
    let id = remote.add_file("", "a.txt", b"old", 10);
    let existing = remote_file(id, "a.txt", "");

    let cipher = CryptoStream::new(&[7u8; 16], DEFAULT_CIPHER).unwrap();
    let uploader = Uploader::new(remote.clone(), Some(cipher.clone()));
    let mut events = common::capture(uploader.events());

    uploader.enqueue(stream_item("a.txt", b"secret contents").replacing(Arc::clone(&existing)));
    uploader.start("ignored");

    let seen = common::events_until(&mut events, |e| matches!(e, UploadEvent::AllDone)).await;
    assert!(matches!(
        &seen[0],
        UploadEvent::Started { target: None, .. }
    ));
    assert_eq!(existing.encryption(), DEFAULT_CIPHER);

    let upload = &remote.uploads()[0];
    assert_eq!(upload.form.replace.map(|id| id.get()), Some(id));
    assert_eq!(upload.form.target_path, None);
    assert_eq!(upload.form.encryption, DEFAULT_CIPHER);
    assert_eq!(upload.form.checksum, fingerprint(b"secret contents"));
    assert!(upload.form.create_version);
    assert_ne!(upload.body, b"secret contents");
    assert_eq!(cipher.decrypt_bytes(&upload.body).unwrap(), b"secret contents");
}

#[tokio::test]
async fn test_upload_failure_halts_until_resumed() {
    let remote = FakeRemote::new();
    remote.fail_upload("b.txt");
    let uploader = Uploader::new(remote.clone(), None);
    let mut events = common::capture(uploader.events());

    for name in ["a.txt", "b.txt", "c.txt"] {
        uploader.enqueue(stream_item(name, name.as_bytes()));
    }
    uploader.start("docs");

    let seen =
        common::events_until(&mut events, |e| matches!(e, UploadEvent::Failed { .. })).await;
    match seen.last() {
        Some(UploadEvent::Failed { name, error }) => {
            assert_eq!(name, "b.txt");
            assert!(error.contains("disk full"), "{error}");
        }
        other => panic!("unexpected {other:?}"),
    }
    common::assert_quiet(&mut events).await;
    assert!(uploader.is_halted());
    assert_eq!(uploader.len(), 1);

    assert!(uploader.resume());
    let seen = common::events_until(&mut events, |e| matches!(e, UploadEvent::AllDone)).await;
    assert!(seen
        .iter()
        .any(|e| matches!(e, UploadEvent::FileDone { name, .. } if name == "c.txt")));

    let names: Vec<String> = remote.uploads().into_iter().map(|u| u.form.file_name).collect();
    assert_eq!(names, vec!["a.txt", "c.txt"]);
}

#[tokio::test]
async fn test_stop_cancels_running_upload() {
    let remote = FakeRemote::new();
    let uploader = Uploader::new(remote.clone(), None);
    let mut events = common::capture(uploader.events());

    // A body that never ends keeps the first transfer in flight
    let pending: ByteStream = Box::pin(stream::pending::<std::io::Result<Bytes>>());
    uploader.enqueue(UploadItem::stream("slow.bin", pending, None, "x"));
    uploader.enqueue(stream_item("never.txt", b"n"));
    uploader.start("docs");

    assert!(matches!(
        common::next_event(&mut events).await,
        UploadEvent::Started { .. }
    ));
    uploader.stop();

    assert!(matches!(
        common::next_event(&mut events).await,
        UploadEvent::Stopped
    ));
    common::assert_quiet(&mut events).await;
    assert!(uploader.is_empty());
    assert!(remote.uploads().is_empty());
}

#[tokio::test]
async fn test_download_to_path_and_sink() {
    let temp = tempfile::TempDir::new().unwrap();
    let remote = FakeRemote::new();
    let content = vec![b'q'; 9_000];
    let first = remote.add_file("", "a.txt", &content, 10);
    let second = remote.add_file("", "b.txt", b"to the sink", 10);

    let downloader = Downloader::new(remote.clone(), None);
    let mut events = common::capture(downloader.events());
    let (writer, mut reader) = tokio::io::duplex(64 * 1024);

    downloader.enqueue(DownloadItem::new(remote_file(first, "a.txt", "")));
    downloader.enqueue(DownloadItem::new(remote_file(second, "b.txt", "")).to_sink(Box::new(writer)));
    assert!(downloader.start(temp.path()));

    let seen = common::events_until(&mut events, |e| matches!(e, DownloadEvent::AllDone)).await;
    assert_eq!(std::fs::read(temp.path().join("a.txt")).unwrap(), content);
    assert!(!temp.path().join("a.txt.part").exists());

    let progress: Vec<u64> = seen
        .iter()
        .filter_map(|e| match e {
            DownloadEvent::Progress {
                file, downloaded, ..
            } if file.get() == first => Some(*downloaded),
            _ => None,
        })
        .collect();
    // 9000 bytes in 1000-byte network chunks, at most 4096 per write
    assert_eq!(progress.len(), 9);
    assert_eq!(*progress.last().unwrap(), 9_000);

    drop(downloader);
    let mut sunk = Vec::new();
    reader.read_to_end(&mut sunk).await.unwrap();
    assert_eq!(sunk, b"to the sink");
}

#[tokio::test]
async fn test_encrypted_download_is_decrypted() {
    let temp = tempfile::TempDir::new().unwrap();
    let key = [4u8; 16];
    let cipher = CryptoStream::new(&key, DEFAULT_CIPHER).unwrap();
    let remote = FakeRemote::new();
    let id = remote.add_file("", "s.txt", &cipher.encrypt_bytes(b"plain text").unwrap(), 10);

    let downloader = Downloader::new(remote.clone(), Some(SecretKey::from(&key[..])));
    let mut events = common::capture(downloader.events());
    downloader.enqueue(DownloadItem::new(remote_file(id, "s.txt", DEFAULT_CIPHER)));
    downloader.start(temp.path());

    common::events_until(&mut events, |e| matches!(e, DownloadEvent::AllDone)).await;
    assert_eq!(std::fs::read(temp.path().join("s.txt")).unwrap(), b"plain text");
}

#[tokio::test]
async fn test_encrypted_download_without_key_fails() {
    let temp = tempfile::TempDir::new().unwrap();
    let remote = FakeRemote::new();
    let id = remote.add_file("", "s.txt", b"ciphertext", 10);

    let downloader = Downloader::new(remote.clone(), None);
    let mut events = common::capture(downloader.events());
    downloader.enqueue(DownloadItem::new(remote_file(id, "s.txt", DEFAULT_CIPHER)));
    downloader.start(temp.path());

    let seen =
        common::events_until(&mut events, |e| matches!(e, DownloadEvent::Failed { .. })).await;
    assert!(matches!(seen.last(), Some(DownloadEvent::Failed { .. })));
    assert!(!temp.path().join("s.txt").exists());
    assert!(!temp.path().join("s.txt.part").exists());
    assert!(downloader.is_halted());

    // Nothing left: resuming completes right away
    assert!(downloader.resume());
    assert!(matches!(
        common::next_event(&mut events).await,
        DownloadEvent::AllDone
    ));
}

#[tokio::test]
async fn test_missing_remote_file_fails_download() {
    let temp = tempfile::TempDir::new().unwrap();
    let remote = FakeRemote::new();
    let downloader = Downloader::new(remote.clone() as Arc<dyn IRemoteClient>, None);
    let mut events = common::capture(downloader.events());

    downloader.enqueue(DownloadItem::new(remote_file(42, "gone.txt", "")));
    downloader.start(temp.path());

    match common::events_until(&mut events, |e| matches!(e, DownloadEvent::Failed { .. }))
        .await
        .last()
    {
        Some(DownloadEvent::Failed { error, .. }) => assert!(error.contains("404"), "{error}"),
        other => panic!("unexpected {other:?}"),
    }
}
