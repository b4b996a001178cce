//! Upload queue
//!
//! The [`Uploader`] streams queued items to the server one at a time. Each
//! body is read in [`CHUNK_SIZE`] pieces and, when the uploader was built with
//! a content cipher, encrypted on the fly. The fingerprint sent with the form
//! is always computed over the unencrypted bytes.
//!
//! ## Usage
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use minicloud_core::ports::IRemoteClient;
//! use minicloud_sync::{UploadItem, Uploader};
//!
//! # fn example(remote: Arc<dyn IRemoteClient>) {
//! let uploader = Uploader::new(remote, None);
//! uploader.enqueue(UploadItem::file("/home/me/Cloud/notes.txt"));
//! uploader.start("docs");
//! # }
//! ```

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use minicloud_core::checksum::file_fingerprint;
use minicloud_core::crypto::{CipherTransform, CryptoStream};
use minicloud_core::domain::RemoteFile;
use minicloud_core::events::EventBus;
use minicloud_core::ports::{ByteStream, IRemoteClient, UploadForm};

use crate::queue::{Next, QueueState, Resume, Worker};
use crate::{TransferError, CHUNK_SIZE};

// ============================================================================
// UploadEvent
// ============================================================================

/// Progress and outcome of queued uploads
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// An item left the queue; `target` is the remote folder, `None` when
    /// replacing an existing file
    Started { name: String, target: Option<String> },
    /// Unencrypted bytes read so far
    Progress {
        name: String,
        sent: u64,
        total: Option<u64>,
    },
    /// The server accepted the file; `reply` is its parsed answer
    FileDone {
        name: String,
        reply: serde_json::Value,
    },
    /// The item failed and the queue halted
    Failed { name: String, error: String },
    /// The queue was stopped
    Stopped,
    /// Every queued item was uploaded
    AllDone,
}

// ============================================================================
// UploadItem
// ============================================================================

/// Where the bytes of an upload come from
pub enum UploadSource {
    /// A local file, fingerprinted before sending
    File(PathBuf),
    /// An arbitrary stream whose fingerprint the caller already knows
    Stream {
        body: ByteStream,
        size: Option<u64>,
        checksum: String,
    },
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Stream { size, checksum, .. } => f
                .debug_struct("Stream")
                .field("size", size)
                .field("checksum", checksum)
                .finish_non_exhaustive(),
        }
    }
}

/// One queued upload
#[derive(Debug)]
pub struct UploadItem {
    pub source: UploadSource,
    /// File name on the server
    pub name: String,
    /// Remote folder; the queue's folder when `None` and nothing is replaced
    pub target: Option<String>,
    /// Existing remote file to overwrite
    pub existing: Option<Arc<RemoteFile>>,
    pub public: bool,
    /// When false the server keeps the current version instead of adding one
    pub create_version: bool,
}

impl UploadItem {
    /// Upload of a local file under its own name
    pub fn file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::with_source(UploadSource::File(path), name)
    }

    /// Upload of an in-memory or piped stream
    ///
    /// # Arguments
    /// * `name` - File name on the server
    /// * `body` - Unencrypted content
    /// * `size` - Content length if known, used for progress only
    /// * `checksum` - Fingerprint of the content
    pub fn stream(
        name: impl Into<String>,
        body: ByteStream,
        size: Option<u64>,
        checksum: impl Into<String>,
    ) -> Self {
        Self::with_source(
            UploadSource::Stream {
                body,
                size,
                checksum: checksum.into(),
            },
            name.into(),
        )
    }

    fn with_source(source: UploadSource, name: String) -> Self {
        Self {
            source,
            name,
            target: None,
            existing: None,
            public: false,
            create_version: true,
        }
    }

    pub fn to_folder(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Overwrites `existing` instead of creating a new file
    pub fn replacing(mut self, existing: Arc<RemoteFile>) -> Self {
        self.public = existing.is_public();
        self.existing = Some(existing);
        self
    }

    pub fn public(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    /// Asks the server not to record a new version
    pub fn without_version(mut self) -> Self {
        self.create_version = false;
        self
    }

    /// Remote folder this item goes to when the queue's folder is `default`
    fn effective_target(&self, default: &str) -> Option<String> {
        match (&self.target, &self.existing) {
            (Some(target), _) => Some(target.clone()),
            (None, None) => Some(default.to_string()),
            (None, Some(_)) => None,
        }
    }
}

// ============================================================================
// Uploader
// ============================================================================

struct Inner {
    remote: Arc<dyn IRemoteClient>,
    encryptor: Option<CryptoStream>,
    queue: QueueState<UploadItem, String>,
    events: EventBus<UploadEvent>,
}

/// Sequential upload queue
///
/// Cheap to clone; clones share the queue and its event bus.
#[derive(Clone)]
pub struct Uploader {
    inner: Arc<Inner>,
}

impl Uploader {
    /// Creates an empty queue
    ///
    /// # Arguments
    /// * `remote` - Client the uploads are sent through
    /// * `encryptor` - Content cipher applied to every body; `None` for plain
    pub fn new(remote: Arc<dyn IRemoteClient>, encryptor: Option<CryptoStream>) -> Self {
        Self {
            inner: Arc::new(Inner {
                remote,
                encryptor,
                queue: QueueState::new(),
                events: EventBus::new(),
            }),
        }
    }

    pub fn events(&self) -> &EventBus<UploadEvent> {
        &self.inner.events
    }

    /// Cipher configuration sent with every upload; empty when plain
    pub fn encryption(&self) -> &str {
        self.inner.encryption()
    }

    pub fn enqueue(&self, item: UploadItem) {
        debug!(name = %item.name, "Queued upload");
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
    pub fn start(&self, target_folder: &str) -> bool {
        match self.inner.queue.try_start(target_folder.to_string()) {
            Some(worker) => {
                info!(target = %target_folder, pending = self.len(), "Starting uploads");
                tokio::spawn(Arc::clone(&self.inner).run(worker));
                true
            }
            None => false,
        }
    }

    /// Continues after a failed item
    ///
    /// Publishes [`UploadEvent::AllDone`] right away when nothing is left.
    pub fn resume(&self) -> bool {
        match self.inner.queue.resume() {
            Resume::Start(worker) => {
                info!(pending = self.len(), "Resuming uploads");
                tokio::spawn(Arc::clone(&self.inner).run(worker));
                true
            }
            Resume::Drained => {
                self.inner.publish(&UploadEvent::AllDone);
                true
            }
            Resume::Ignored => false,
        }
    }

    /// Cancels the running upload and discards the queue
    pub fn stop(&self) {
        if self.inner.queue.stop() {
            info!("Stopping uploads");
        }
    }
}

impl fmt::Debug for Uploader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uploader")
            .field("encryption", &self.encryption())
            .field("pending", &self.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Inner {
    fn encryption(&self) -> &str {
        self.encryptor.as_ref().map_or("", CryptoStream::config)
    }

    fn publish(&self, event: &UploadEvent) {
        self.events.publish(event);
    }

    async fn run(self: Arc<Self>, worker: Worker) {
        loop {
            let (item, default_target) = match self.queue.next(&worker) {
                Next::Item { item, target } => (item, target),
                Next::Drained => {
                    info!("All uploads done");
                    self.publish(&UploadEvent::AllDone);
                    return;
                }
                Next::Cancelled => {
                    self.publish(&UploadEvent::Stopped);
                    return;
                }
            };

            let name = item.name.clone();
            let target = item.effective_target(&default_target);
            self.publish(&UploadEvent::Started {
                name: name.clone(),
                target: target.clone(),
            });

            match Arc::clone(&self).transfer(item, target, &worker).await {
                Ok(reply) => {
                    info!(name = %name, "Upload finished");
                    self.publish(&UploadEvent::FileDone { name, reply });
                }
                Err(TransferError::Cancelled) => {
                    info!(name = %name, "Upload stopped");
                    self.publish(&UploadEvent::Stopped);
                    return;
                }
                Err(e) => {
                    warn!(name = %name, error = %e, "Upload failed");
                    self.queue.halt(&worker);
                    self.publish(&UploadEvent::Failed {
                        name,
                        error: e.to_string(),
                    });
                    return;
                }
            }
        }
    }

    #[tracing::instrument(skip(self, item, worker), fields(name = %item.name))]
    async fn transfer(
        self: Arc<Self>,
        item: UploadItem,
        target: Option<String>,
        worker: &Worker,
    ) -> Result<serde_json::Value, TransferError> {
        let UploadItem {
            source,
            name,
            existing,
            public,
            create_version,
            ..
        } = item;

        let (reader, total, checksum): (Box<dyn AsyncRead + Send + Unpin>, _, _) = match source
        {
            UploadSource::File(path) => {
                let hash_path = path.clone();
                let checksum = tokio::task::spawn_blocking(move || file_fingerprint(&hash_path))
                    .await
                    .map_err(io::Error::other)??;
                let file = tokio::fs::File::open(&path).await?;
                let size = file.metadata().await?.len();
                (Box::new(file), Some(size), checksum)
            }
            UploadSource::Stream {
                body,
                size,
                checksum,
            } => (Box::new(StreamReader::new(body)), size, checksum),
        };

        let encryption = self.encryption().to_string();
        let transform = self
            .encryptor
            .as_ref()
            .map(CryptoStream::encryptor)
            .transpose()?;
        if let Some(file) = &existing {
            file.set_encryption(&encryption);
        }

        let form = UploadForm {
            target_path: target,
            file_name: name.clone(),
            encryption,
            replace: existing.map(|file| file.id()),
            checksum,
            public,
            create_version,
        };
        debug!(?form, "Sending upload");

        let progress = {
            let inner = Arc::clone(&self);
            move |sent: u64| {
                inner.publish(&UploadEvent::Progress {
                    name: name.clone(),
                    sent,
                    total,
                });
            }
        };
        let body = body_stream(Body {
            reader,
            transform,
            cancel: worker.cancel_token().clone(),
            sent: 0,
            finished: false,
            on_progress: Box::new(progress),
        });

        tokio::select! {
            biased;
            _ = worker.cancel_token().cancelled() => Err(TransferError::Cancelled),
            result = self.remote.upload_file(form, body) => match result {
                Ok(reply) => Ok(reply),
                Err(_) if worker.is_cancelled() => Err(TransferError::Cancelled),
                Err(e) => Err(e.into()),
            },
        }
    }
}

// ============================================================================
// Body stream
// ============================================================================

struct Body {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    transform: Option<CipherTransform>,
    cancel: CancellationToken,
    sent: u64,
    finished: bool,
    on_progress: Box<dyn Fn(u64) + Send>,
}

/// Reads `body` chunk by chunk, encrypting when a transform is set
///
/// Cancellation is checked before every chunk and ends the stream with an
/// `Interrupted` error.
fn body_stream(body: Body) -> ByteStream {
    Box::pin(stream::unfold(body, |mut body| async move {
        if body.finished {
            return None;
        }
        if body.cancel.is_cancelled() {
            body.finished = true;
            let err = io::Error::new(io::ErrorKind::Interrupted, "upload cancelled");
            return Some((Err(err), body));
        }

        let mut buf = vec![0u8; CHUNK_SIZE];
        match body.reader.read(&mut buf).await {
            Ok(0) => {
                body.finished = true;
                let transform = body.transform.take()?;
                let tail = transform
                    .finish()
                    .map(Bytes::from)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
                Some((tail, body))
            }
            Ok(n) => {
                body.sent += n as u64;
                (body.on_progress)(body.sent);
                let out = match body.transform.as_mut() {
                    Some(transform) => transform.update(&buf[..n]),
                    None => {
                        buf.truncate(n);
                        buf
                    }
                };
                Some((Ok(Bytes::from(out)), body))
            }
            Err(e) => {
                body.finished = true;
                Some((Err(e), body))
            }
        }
    }))
}
