//! Shared helpers: an in-memory remote and event capture

use std::collections::{BTreeSet, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use tokio::sync::mpsc;

use minicloud_core::checksum::fingerprint;
use minicloud_core::domain::{
    ActionId, FileId, PathListing, RemotePath, SyncFolderConfig, VersionId,
};
use minicloud_core::events::EventBus;
use minicloud_core::ports::{
    ApiEvent, ByteStream, DownloadResponse, IRemoteClient, RemoteError, UploadForm,
};

/// Remote folder every fake listing is rooted at
pub const ROOT: &str = "docs";

/// A file held by [`FakeRemote`]
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub id: i64,
    pub folder: String,
    pub name: String,
    /// Stored bytes, encrypted when `encryption` is set
    pub content: Vec<u8>,
    /// Fingerprint of the unencrypted content
    pub checksum: String,
    pub encryption: String,
    /// Epoch seconds
    pub mdtime: i64,
    pub version: i64,
}

/// One upload as the server saw it
#[derive(Debug, Clone)]
pub struct ReceivedUpload {
    pub form: UploadForm,
    pub body: Vec<u8>,
}

/// In-memory stand-in for the Minicloud server
///
/// Uploads are stored and show up in later listings, so consecutive passes
/// behave as they would against a real server.
#[derive(Default)]
pub struct FakeRemote {
    events: Arc<EventBus<ApiEvent>>,
    counter: AtomicU64,
    next_file: AtomicU64,
    files: Mutex<Vec<StoredFile>>,
    uploads: Mutex<Vec<ReceivedUpload>>,
    downloads: AtomicUsize,
    tree_requests: AtomicUsize,
    tree_error: Mutex<Option<String>>,
    failing_downloads: Mutex<HashSet<i64>>,
    failing_uploads: Mutex<HashSet<String>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        let remote = Self::default();
        remote.next_file.store(100, Ordering::Relaxed);
        Arc::new(remote)
    }

    /// Stores a plain file under `ROOT/<folder>` and returns its id
    pub fn add_file(&self, folder: &str, name: &str, content: &[u8], mdtime: i64) -> i64 {
        let id = self.next_file.fetch_add(1, Ordering::Relaxed) as i64;
        self.files.lock().unwrap().push(StoredFile {
            id,
            folder: join(ROOT, folder),
            name: name.to_string(),
            content: content.to_vec(),
            checksum: fingerprint(content),
            encryption: String::new(),
            mdtime,
            version: 1,
        });
        id
    }

    pub fn files(&self) -> Vec<StoredFile> {
        self.files.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<ReceivedUpload> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::Relaxed)
    }

    pub fn tree_requests(&self) -> usize {
        self.tree_requests.load(Ordering::Relaxed)
    }

    /// Makes the next tree request fail with `message`
    pub fn fail_tree(&self, message: &str) {
        *self.tree_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_download(&self, id: i64) {
        self.failing_downloads.lock().unwrap().insert(id);
    }

    pub fn fail_upload(&self, name: &str) {
        self.failing_uploads.lock().unwrap().insert(name.to_string());
    }

    fn listing(&self) -> serde_json::Value {
        let files = self.files.lock().unwrap();
        let mut folders: BTreeSet<String> = BTreeSet::new();
        for file in files.iter() {
            let mut folder = file.folder.as_str();
            while folder != ROOT {
                folders.insert(folder.to_string());
                folder = match folder.rsplit_once('/') {
                    Some((parent, _)) => parent,
                    None => break,
                };
            }
        }
        node(ROOT, 1, -1, &files, &folders)
    }
}

fn join(root: &str, folder: &str) -> String {
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        root.to_string()
    } else {
        format!("{root}/{folder}")
    }
}

fn node(
    path: &str,
    id: i64,
    parent: i64,
    files: &[StoredFile],
    folders: &BTreeSet<String>,
) -> serde_json::Value {
    let own: Vec<serde_json::Value> = files
        .iter()
        .filter(|f| f.folder == path)
        .map(|f| {
            serde_json::json!({
                "id": f.id, "size": f.content.len(), "filename": f.name, "path": f.folder,
                "checksum": f.checksum, "encryption": f.encryption,
                "mktime": f.mdtime, "mdtime": f.mdtime, "public": 0,
                "version": f.version, "versions": [{"version": f.version, "created": f.mdtime}]
            })
        })
        .collect();
    let children: Vec<serde_json::Value> = folders
        .iter()
        .enumerate()
        .filter(|(_, f)| f.rsplit_once('/').map(|(p, _)| p) == Some(path))
        .map(|(i, f)| node(f, 1000 + i as i64, id, files, folders))
        .collect();
    serde_json::json!({
        "id": id, "parent_id": parent, "path": path, "files": own, "paths": children
    })
}

async fn collect(mut body: ByteStream) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    while let Some(chunk) = body.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}

#[async_trait]
impl IRemoteClient for FakeRemote {
    fn events(&self) -> &EventBus<ApiEvent> {
        &self.events
    }

    fn next_action_id(&self) -> ActionId {
        ActionId::from(self.counter.fetch_add(1, Ordering::Relaxed))
    }

    fn get_path_as(&self, path: &str, _recursive: bool, action_id: ActionId) {
        self.tree_requests.fetch_add(1, Ordering::Relaxed);
        assert_eq!(path.trim_matches('/'), ROOT);

        let event = match self.tree_error.lock().unwrap().take() {
            Some(message) => ApiEvent::Error {
                action_id: Some(action_id),
                message: Some(message),
            },
            None => {
                let listing: PathListing = serde_json::from_value(self.listing()).unwrap();
                ApiEvent::Path {
                    action_id: Some(action_id),
                    path: Some(RemotePath::from_listing(listing)),
                }
            }
        };
        let events = Arc::clone(&self.events);
        tokio::spawn(async move {
            events.publish(&event);
        });
    }

    async fn upload_file(
        &self,
        form: UploadForm,
        body: ByteStream,
    ) -> Result<serde_json::Value, RemoteError> {
        let body = collect(body)
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        if self.failing_uploads.lock().unwrap().contains(&form.file_name) {
            return Err(RemoteError::Status {
                status: 500,
                body: "disk full".to_string(),
            });
        }

        let now = chrono::Utc::now().timestamp();
        {
            let mut files = self.files.lock().unwrap();
            match form.replace {
                Some(id) => {
                    let file = files
                        .iter_mut()
                        .find(|f| f.id == id.get())
                        .ok_or_else(|| RemoteError::Protocol("no such file".to_string()))?;
                    file.content = body.clone();
                    file.checksum = form.checksum.clone();
                    file.encryption = form.encryption.clone();
                    file.mdtime = now;
                    if form.create_version {
                        file.version += 1;
                    }
                }
                None => {
                    let id = self.next_file.fetch_add(1, Ordering::Relaxed) as i64;
                    files.push(StoredFile {
                        id,
                        folder: form.target_path.clone().unwrap_or_else(|| ROOT.to_string()),
                        name: form.file_name.clone(),
                        content: body.clone(),
                        checksum: form.checksum.clone(),
                        encryption: form.encryption.clone(),
                        mdtime: now,
                        version: 1,
                    });
                }
            }
        }

        self.uploads.lock().unwrap().push(ReceivedUpload { form, body });
        Ok(serde_json::json!({"type": "", "action_id": null, "data": true}))
    }

    async fn download_file(
        &self,
        file: FileId,
        _version: Option<VersionId>,
    ) -> Result<DownloadResponse, RemoteError> {
        if self.failing_downloads.lock().unwrap().remove(&file.get()) {
            return Err(RemoteError::Status {
                status: 404,
                body: "gone".to_string(),
            });
        }
        let content = self
            .files
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.id == file.get())
            .map(|f| f.content.clone())
            .ok_or_else(|| RemoteError::Status {
                status: 404,
                body: "not found".to_string(),
            })?;
        self.downloads.fetch_add(1, Ordering::Relaxed);

        // Odd-sized network chunks so re-chunking is exercised
        let chunks: Vec<std::io::Result<Bytes>> = content
            .chunks(1000)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(DownloadResponse {
            content_length: Some(content.len() as u64),
            body: Box::pin(stream::iter(chunks)),
        })
    }
}

// ============================================================================
// Events
// ============================================================================

/// Forwards every event published on `bus` into a channel
pub fn capture<E>(bus: &EventBus<E>) -> mpsc::UnboundedReceiver<E>
where
    E: Clone + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    bus.subscribe_fn(move |event: &E| {
        tx.send(event.clone())
            .map_err(|_| anyhow::anyhow!("test receiver dropped"))
    });
    rx
}

pub async fn next_event<E>(rx: &mut mpsc::UnboundedReceiver<E>) -> E {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Collects events up to and including the first one matching `last`
pub async fn events_until<E>(
    rx: &mut mpsc::UnboundedReceiver<E>,
    last: impl Fn(&E) -> bool,
) -> Vec<E> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = last(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Asserts that nothing arrives within a short grace period
pub async fn assert_quiet<E: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<E>) {
    if let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
        panic!("unexpected event: {event:?}");
    }
}

// ============================================================================
// Filesystem
// ============================================================================

/// Writes `content` to `root/relative` with the given mtime in epoch seconds
pub fn write_file(root: &Path, relative: &str, content: &[u8], mtime_secs: u64) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(UNIX_EPOCH + Duration::from_secs(mtime_secs))
        .unwrap();
    path
}

pub fn folder_config(local: &Path) -> SyncFolderConfig {
    SyncFolderConfig::new(local, ROOT)
}
