//! Download queue
//!
//! The [`Downloader`] fetches queued remote files one at a time. Files whose
//! stored cipher configuration is non-empty are decrypted with the user's
//! content key while they are written.
//!
//! ## Design Notes
//!
//! - Path destinations are written to a sibling `<name>.part` file and
//!   renamed into place once the last byte is flushed, so an interrupted
//!   download never leaves a truncated file under the real name.
//! - The destination is created only after the server answered, so a
//!   failed request leaves nothing behind.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

use minicloud_core::crypto::{CipherSink, CipherTransform, CryptoError, CryptoStream, SecretKey};
use minicloud_core::domain::{FileId, RemoteFile, VersionId};
use minicloud_core::events::EventBus;
use minicloud_core::ports::{DownloadResponse, IRemoteClient};

use crate::queue::{Next, QueueState, Resume, Worker};
use crate::{TransferError, CHUNK_SIZE};

/// Suffix of in-progress downloads
pub const PART_SUFFIX: &str = ".part";

// ============================================================================
// DownloadEvent
// ============================================================================

/// Progress and outcome of queued downloads
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    /// An item left the queue; `target` is `None` for sink destinations
    Started {
        file: FileId,
        name: String,
        target: Option<PathBuf>,
    },
    /// Bytes received so far
    Progress {
        file: FileId,
        downloaded: u64,
        total: Option<u64>,
    },
    FileDone {
        file: FileId,
        name: String,
        target: Option<PathBuf>,
    },
    /// The item failed and the queue halted
    Failed {
        file: FileId,
        name: String,
        error: String,
    },
    /// The queue was stopped
    Stopped,
    /// Every queued item was downloaded
    AllDone,
}

// ============================================================================
// DownloadItem
// ============================================================================

/// Where downloaded bytes go
pub enum DownloadTarget {
    /// A local file, replaced atomically
    Path(PathBuf),
    /// Any async writer; it is flushed but not closed
    Sink(Box<dyn AsyncWrite + Send + Unpin>),
}

impl fmt::Debug for DownloadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Sink(_) => f.write_str("Sink(..)"),
        }
    }
}

/// One queued download
#[derive(Debug)]
pub struct DownloadItem {
    pub file: Arc<RemoteFile>,
    /// Version to fetch; the server's current one when `None`
    pub version: Option<VersionId>,
    /// Destination; `<queue folder>/<file name>` when `None`
    pub target: Option<DownloadTarget>,
}

impl DownloadItem {
    /// Download of the file's current version into the queue's folder
    pub fn new(file: Arc<RemoteFile>) -> Self {
        let version = file.current_version().map(|v| v.id());
        Self {
            file,
            version,
            target: None,
        }
    }

    pub fn version(mut self, version: VersionId) -> Self {
        self.version = Some(version);
        self
    }

    pub fn to_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.target = Some(DownloadTarget::Path(path.into()));
        self
    }

    pub fn to_sink(mut self, sink: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        self.target = Some(DownloadTarget::Sink(sink));
        self
    }
}

/// `<path>.part`
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

// ============================================================================
// Downloader
// ============================================================================

struct Inner {
    remote: Arc<dyn IRemoteClient>,
    key: Option<SecretKey>,
    queue: QueueState<DownloadItem, PathBuf>,
    events: EventBus<DownloadEvent>,
}

/// Sequential download queue
///
/// Cheap to clone; clones share the queue and its event bus.
#[derive(Clone)]
pub struct Downloader {
    inner: Arc<Inner>,
}

impl Downloader {
    /// Creates an empty queue
    ///
    /// # Arguments
    /// * `remote` - Client the downloads are fetched through
    /// * `key` - The user's content key; required only for encrypted files
    pub fn new(remote: Arc<dyn IRemoteClient>, key: Option<SecretKey>) -> Self {
        Self {
            inner: Arc::new(Inner {
                remote,
                key,
                queue: QueueState::new(),
                events: EventBus::new(),
            }),
        }
    }

    pub fn events(&self) -> &EventBus<DownloadEvent> {
        &self.inner.events
    }

    pub fn enqueue(&self, item: DownloadItem) {
        debug!(file = %item.file.id(), name = item.file.name(), "Queued download");
        self.inner.queue.push(item);
    }

    /// Items not yet started
    pub fn len(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.queue.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.inner.queue.is_running()
    }

    pub fn is_halted(&self) -> bool {
        self.inner.queue.is_halted()
    }

    /// Starts draining the queue into `target_folder`
    ///
    /// # Returns
    /// `false` if a worker already runs or nothing is queued
    pub fn start(&self, target_folder: impl Into<PathBuf>) -> bool {
        let target_folder = target_folder.into();
        let folder = target_folder.display().to_string();
        match self.inner.queue.try_start(target_folder) {
            Some(worker) => {
                info!(target = %folder, pending = self.len(), "Starting downloads");
                tokio::spawn(Arc::clone(&self.inner).run(worker));
                true
            }
            None => false,
        }
    }

    /// Continues after a failed item
    ///
    /// Publishes [`DownloadEvent::AllDone`] right away when nothing is left.
    pub fn resume(&self) -> bool {
        match self.inner.queue.resume() {
            Resume::Start(worker) => {
                info!(pending = self.len(), "Resuming downloads");
                tokio::spawn(Arc::clone(&self.inner).run(worker));
                true
            }
            Resume::Drained => {
                self.inner.events.publish(&DownloadEvent::AllDone);
                true
            }
            Resume::Ignored => false,
        }
    }

    /// Cancels the running download and discards the queue
    pub fn stop(&self) {
        if self.inner.queue.stop() {
            info!("Stopping downloads");
        }
    }
}

impl fmt::Debug for Downloader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Downloader")
            .field("has_key", &self.inner.key.is_some())
            .field("pending", &self.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Inner {
    fn publish(&self, event: &DownloadEvent) {
        self.events.publish(event);
    }

    async fn run(self: Arc<Self>, worker: Worker) {
        loop {
            let (item, folder) = match self.queue.next(&worker) {
                Next::Item { item, target } => (item, target),
                Next::Drained => {
                    info!("All downloads done");
                    self.publish(&DownloadEvent::AllDone);
                    return;
                }
                Next::Cancelled => {
                    self.publish(&DownloadEvent::Stopped);
                    return;
                }
            };

            let file = Arc::clone(&item.file);
            let target = match item.target {
                Some(target) => target,
                None => DownloadTarget::Path(folder.join(file.name())),
            };
            let path = match &target {
                DownloadTarget::Path(path) => Some(path.clone()),
                DownloadTarget::Sink(_) => None,
            };
            self.publish(&DownloadEvent::Started {
                file: file.id(),
                name: file.name().to_string(),
                target: path.clone(),
            });

            match self.transfer(&file, item.version, target, &worker).await {
                Ok(()) => {
                    info!(file = %file.id(), name = file.name(), "Download finished");
                    self.publish(&DownloadEvent::FileDone {
                        file: file.id(),
                        name: file.name().to_string(),
                        target: path,
                    });
                }
                Err(TransferError::Cancelled) => {
                    info!(file = %file.id(), "Download stopped");
                    self.publish(&DownloadEvent::Stopped);
                    return;
                }
                Err(e) => {
                    warn!(file = %file.id(), name = file.name(), error = %e, "Download failed");
                    self.queue.halt(&worker);
                    self.publish(&DownloadEvent::Failed {
                        file: file.id(),
                        name: file.name().to_string(),
                        error: e.to_string(),
                    });
                    return;
                }
            }
        }
    }

    /// Decrypting transform for `file`, `None` when it is stored plain
    fn decryptor(&self, file: &RemoteFile) -> Result<Option<CipherTransform>, CryptoError> {
        let config = file.encryption();
        if config.is_empty() {
            return Ok(None);
        }
        let key = self.key.as_ref().ok_or(CryptoError::MissingKey)?;
        CryptoStream::new(key.as_bytes(), &config)?.decryptor().map(Some)
    }

    #[tracing::instrument(skip(self, file, target, worker), fields(file = %file.id()))]
    async fn transfer(
        &self,
        file: &RemoteFile,
        version: Option<VersionId>,
        target: DownloadTarget,
        worker: &Worker,
    ) -> Result<(), TransferError> {
        let transform = self.decryptor(file)?;

        let response = tokio::select! {
            biased;
            _ = worker.cancel_token().cancelled() => return Err(TransferError::Cancelled),
            response = self.remote.download_file(file.id(), version) => response?,
        };
        let total = response.content_length.or(Some(file.size()));
        debug!(?total, encrypted = transform.is_some(), "Download opened");

        match target {
            DownloadTarget::Path(path) => {
                let part = part_path(&path);
                let out = tokio::fs::File::create(&part).await?;
                let sink = CipherSink::new(out, transform);
                let written = self.pump(file.id(), sink, response, total, worker).await;
                match written {
                    Ok(out) => {
                        out.sync_all().await?;
                        drop(out);
                        tokio::fs::rename(&part, &path).await?;
                        Ok(())
                    }
                    Err(e) => {
                        if let Err(remove) = tokio::fs::remove_file(&part).await {
                            debug!(path = %part.display(), error = %remove, "Could not remove partial file");
                        }
                        Err(e)
                    }
                }
            }
            DownloadTarget::Sink(out) => {
                let sink = CipherSink::new(out, transform);
                self.pump(file.id(), sink, response, total, worker).await?;
                Ok(())
            }
        }
    }

    /// Copies the response body into `sink` in [`CHUNK_SIZE`] pieces
    async fn pump<W: AsyncWrite + Unpin>(
        &self,
        file: FileId,
        mut sink: CipherSink<W>,
        response: DownloadResponse,
        total: Option<u64>,
        worker: &Worker,
    ) -> Result<W, TransferError> {
        let mut body = response.body;
        let mut downloaded = 0u64;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = worker.cancel_token().cancelled() => return Err(TransferError::Cancelled),
                chunk = body.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;

            for piece in chunk.chunks(CHUNK_SIZE) {
                if worker.is_cancelled() {
                    return Err(TransferError::Cancelled);
                }
                sink.write_chunk(piece).await?;
                downloaded += piece.len() as u64;
                self.publish(&DownloadEvent::Progress {
                    file,
                    downloaded,
                    total,
                });
            }
        }

        Ok(sink.finish().await?)
    }
}
