//! Folder synchronization engine
//!
//! A [`SyncFolder`] keeps one local directory in sync with one remote
//! folder. A pass moves through three phases:
//!
//! 1. **Reconciling**: the recursive remote tree is requested under a
//!    correlation id recorded before the request is sent. The reply arrives
//!    on the client's event bus; the engine's listener picks it out by id.
//! 2. The local directory is diffed against the tree on a blocking worker
//!    (see [`crate::reconcile`]), then the plan is loaded into a fresh
//!    [`Uploader`] and [`Downloader`].
//! 3. **Transferring**: both queues run concurrently. The pass completes when
//!    each of them has reported `AllDone`; `last` is then set to now and
//!    [`SyncEvent::Done`] is published.
//!
//! ## Design Notes
//!
//! - A guard flag rejects `sync()` while a pass runs.
//! - Every pass gets a generation number. Replies and queue events that
//!   belong to an earlier, stopped pass are ignored.
//! - Events are always published with no engine lock held, so listeners
//!   may call back into the engine.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use regex::Regex;
use tracing::{debug, info, warn};

use minicloud_core::crypto::{CryptoError, CryptoStream, SecretKey};
use minicloud_core::domain::{ActionId, RemotePath, SyncFolderConfig, User};
use minicloud_core::events::{EventBus, Listener, SubscriptionId};
use minicloud_core::ports::{ApiEvent, IRemoteClient};

use crate::downloader::{DownloadEvent, Downloader};
use crate::reconcile::{self, SyncPlan};
use crate::uploader::{UploadEvent, Uploader};
use crate::SyncError;

// ============================================================================
// SyncEvent
// ============================================================================

/// Observable progress of a synchronization pass
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A reply seen on the client's bus while the pass ran
    External(ApiEvent),
    Upload(UploadEvent),
    Download(DownloadEvent),
    /// A required local directory could not be created
    MkdirFailed { path: PathBuf },
    /// A local file could not be read
    ChecksumFailed { path: PathBuf },
    /// The content cipher could not be built
    EncryptionFailed { reason: String },
    /// The remote tree request failed
    RemoteFailed { reason: String },
    /// The pass aborted for any other reason
    Failed { reason: String },
    /// Both queues drained; `last` is the new completion time in epoch ms
    Done { last: i64 },
    /// `stop()` ended the pass
    Stopped,
}

impl From<SyncError> for SyncEvent {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::MkdirFailed(path) => Self::MkdirFailed { path },
            SyncError::ChecksumFailed { path, .. } => Self::ChecksumFailed { path },
            SyncError::EncryptionFailed(e) => Self::EncryptionFailed {
                reason: e.to_string(),
            },
            SyncError::DomainError(e) => Self::Failed {
                reason: e.to_string(),
            },
        }
    }
}

/// Where a pass currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    /// The remote tree was requested and the reply is pending or being diffed
    Reconciling,
    Transferring,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Reconciling => "reconciling",
            Self::Transferring => "transferring",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Internal state
// ============================================================================

struct Pass {
    phase: SyncPhase,
    generation: u64,
    action_id: Option<ActionId>,
    uploader: Option<Uploader>,
    downloader: Option<Downloader>,
    uploads_done: bool,
    downloads_done: bool,
}

impl Pass {
    /// Back to idle; anything still tied to the old generation is ignored
    fn reset(&mut self) -> (Option<Uploader>, Option<Downloader>) {
        self.phase = SyncPhase::Idle;
        self.generation += 1;
        self.action_id = None;
        self.uploads_done = false;
        self.downloads_done = false;
        (self.uploader.take(), self.downloader.take())
    }
}

#[derive(Default)]
struct Credentials {
    user: Option<User>,
    encryption: String,
}

impl Credentials {
    fn encryptor(&self) -> Result<Option<CryptoStream>, CryptoError> {
        match &self.user {
            Some(user) => user.encryptor(&self.encryption),
            None if self.encryption.is_empty() => Ok(None),
            None => Err(CryptoError::MissingKey),
        }
    }

    fn key(&self) -> Option<SecretKey> {
        self.user.as_ref().and_then(|u| u.key().cloned())
    }
}

struct Inner {
    remote: Arc<dyn IRemoteClient>,
    config: Mutex<SyncFolderConfig>,
    exclusion: Option<Regex>,
    credentials: Mutex<Credentials>,
    syncing: AtomicBool,
    pass: Mutex<Pass>,
    events: EventBus<SyncEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// SyncFolder
// ============================================================================

/// One synchronized folder pair
///
/// Must be used from within a Tokio runtime: replies are handled and
/// transfers run on spawned tasks.
pub struct SyncFolder {
    inner: Arc<Inner>,
    subscription: SubscriptionId,
}

impl SyncFolder {
    /// Creates an engine and subscribes it to the client's reply bus
    ///
    /// # Errors
    /// [`SyncError::DomainError`] if the local path is not absolute or the
    /// exclusion pattern does not compile
    pub fn new(
        config: SyncFolderConfig,
        remote: Arc<dyn IRemoteClient>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let exclusion = config.exclusion()?;

        let inner = Arc::new(Inner {
            remote: Arc::clone(&remote),
            config: Mutex::new(config),
            exclusion,
            credentials: Mutex::new(Credentials::default()),
            syncing: AtomicBool::new(false),
            pass: Mutex::new(Pass {
                phase: SyncPhase::Idle,
                generation: 0,
                action_id: None,
                uploader: None,
                downloader: None,
                uploads_done: false,
                downloads_done: false,
            }),
            events: EventBus::new(),
        });

        let listener = Arc::new(ReplyListener(Arc::downgrade(&inner)));
        let subscription = remote.events().subscribe(listener);

        Ok(Self {
            inner,
            subscription,
        })
    }

    /// Bus on which [`SyncEvent`]s are published
    pub fn events(&self) -> &EventBus<SyncEvent> {
        &self.inner.events
    }

    /// Snapshot of the folder configuration, including the updated `last`
    pub fn config(&self) -> SyncFolderConfig {
        lock(&self.inner.config).clone()
    }

    pub fn phase(&self) -> SyncPhase {
        lock(&self.inner.pass).phase
    }

    /// True from `sync()` until the pass completes, aborts or is stopped
    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::Acquire)
    }

    /// Sets the user whose content key encrypts uploads and decrypts downloads
    pub fn set_user(&self, user: User) {
        lock(&self.inner.credentials).user = Some(user);
    }

    /// Cipher configuration for uploads; empty uploads in plain
    pub fn set_encryption(&self, config: impl Into<String>) {
        lock(&self.inner.credentials).encryption = config.into();
    }

    /// Milliseconds added to remote timestamps before comparing them
    pub fn set_time_offset(&self, offset_ms: i64) {
        lock(&self.inner.config).time_offset_ms = offset_ms;
    }

    /// Starts a pass
    ///
    /// Creates the local root if it is missing, then requests the remote
    /// tree. Everything after that is reported on [`events`](Self::events).
    ///
    /// # Returns
    /// `false` if a pass is already running
    #[tracing::instrument(skip(self))]
    pub fn sync(&self) -> bool {
        if self
            .inner
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Pass already running, ignoring sync request");
            return false;
        }

        let (local, remote) = {
            let config = lock(&self.inner.config);
            (config.local.clone(), config.remote.clone())
        };

        if !local.is_dir() {
            if let Err(e) = std::fs::create_dir_all(&local) {
                warn!(path = %local.display(), error = %e, "Failed to create local folder");
                self.inner.abort(SyncEvent::MkdirFailed { path: local });
                return true;
            }
        }

        let action_id = self.inner.remote.next_action_id();
        {
            let mut pass = lock(&self.inner.pass);
            pass.reset();
            pass.phase = SyncPhase::Reconciling;
            pass.action_id = Some(action_id.clone());
        }

        info!(local = %local.display(), remote = %remote, action_id = %action_id, "Requesting remote tree");
        self.inner.remote.get_path_as(&remote, true, action_id);
        true
    }

    /// Stops both queues and ends the pass
    ///
    /// Pending transfers are discarded. A remote tree request already in
    /// flight is not cancelled; its reply is ignored.
    pub fn stop(&self) {
        let (uploader, downloader) = {
            let mut pass = lock(&self.inner.pass);
            if pass.phase == SyncPhase::Idle && !self.is_syncing() {
                return;
            }
            pass.reset()
        };
        if let Some(uploader) = uploader {
            uploader.stop();
        }
        if let Some(downloader) = downloader {
            downloader.stop();
        }
        self.inner.syncing.store(false, Ordering::Release);
        info!("Pass stopped");
        self.inner.publish(&SyncEvent::Stopped);
    }

    /// Resumes queues halted by a failed transfer
    ///
    /// # Returns
    /// `true` if at least one queue resumed
    pub fn continue_transfers(&self) -> bool {
        let (uploader, downloader) = {
            let pass = lock(&self.inner.pass);
            if pass.phase != SyncPhase::Transferring {
                return false;
            }
            (pass.uploader.clone(), pass.downloader.clone())
        };
        let uploads = uploader.is_some_and(|u| u.resume());
        let downloads = downloader.is_some_and(|d| d.resume());
        uploads || downloads
    }
}

impl Drop for SyncFolder {
    fn drop(&mut self) {
        self.inner.remote.events().unsubscribe(self.subscription);
        let (uploader, downloader) = lock(&self.inner.pass).reset();
        if let Some(uploader) = uploader {
            uploader.stop();
        }
        if let Some(downloader) = downloader {
            downloader.stop();
        }
    }
}

impl fmt::Debug for SyncFolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let config = self.config();
        f.debug_struct("SyncFolder")
            .field("local", &config.local)
            .field("remote", &config.remote)
            .field("phase", &self.phase())
            .finish()
    }
}

// ============================================================================
// Reply handling
// ============================================================================

struct ReplyListener(Weak<Inner>);

impl Listener<ApiEvent> for ReplyListener {
    fn handle_event(&self, event: &ApiEvent) -> anyhow::Result<()> {
        if let Some(inner) = self.0.upgrade() {
            inner.on_reply(event);
        }
        Ok(())
    }
}

impl Inner {
    fn publish(&self, event: &SyncEvent) {
        let failures = self.events.publish(event);
        if failures > 0 {
            debug!(failures, "Some sync listeners failed");
        }
    }

    /// Ends the pass with `event`
    fn abort(&self, event: SyncEvent) {
        let (uploader, downloader) = lock(&self.pass).reset();
        if let Some(uploader) = uploader {
            uploader.stop();
        }
        if let Some(downloader) = downloader {
            downloader.stop();
        }
        self.syncing.store(false, Ordering::Release);
        self.publish(&event);
    }

    /// Aborts only if the pass of `generation` is still current
    fn abort_if_current(&self, generation: u64, event: SyncEvent) {
        let current = lock(&self.pass).generation == generation;
        if current {
            self.abort(event);
        }
    }

    fn on_reply(self: Arc<Self>, event: &ApiEvent) {
        if !self.syncing.load(Ordering::Acquire) {
            return;
        }
        self.publish(&SyncEvent::External(event.clone()));

        let generation = {
            let mut pass = lock(&self.pass);
            let pending = pass.phase == SyncPhase::Reconciling
                && pass.action_id.is_some()
                && pass.action_id.as_ref() == event.action_id();
            if !pending {
                return;
            }
            pass.action_id = None;
            pass.generation
        };

        match event {
            ApiEvent::Path { path, .. } => {
                debug!(generation, found = path.is_some(), "Remote tree received");
                let tree = path.clone();
                tokio::spawn(self.reconcile(generation, tree));
            }
            ApiEvent::Error { message, .. } => {
                let reason = message
                    .clone()
                    .unwrap_or_else(|| "server reported an error".to_string());
                warn!(reason = %reason, "Remote tree request failed");
                self.abort(SyncEvent::RemoteFailed { reason });
            }
            ApiEvent::Unauthorized { message, .. } => {
                warn!("Remote tree request was not authorized");
                self.abort(SyncEvent::RemoteFailed {
                    reason: format!("unauthorized: {message}"),
                });
            }
            ApiEvent::ConnectionError { reason, .. } => {
                warn!(reason = %reason, "Remote tree request did not reach the server");
                self.abort(SyncEvent::RemoteFailed {
                    reason: reason.clone(),
                });
            }
            other => {
                self.abort(SyncEvent::RemoteFailed {
                    reason: format!("unexpected {} reply", other.kind()),
                });
            }
        }
    }

    async fn reconcile(self: Arc<Self>, generation: u64, tree: Option<Arc<RemotePath>>) {
        let (encryptor, key) = {
            let credentials = lock(&self.credentials);
            (credentials.encryptor(), credentials.key())
        };
        let encryptor = match encryptor {
            Ok(encryptor) => encryptor,
            Err(e) => {
                warn!(error = %e, "Cannot build the upload cipher");
                self.abort_if_current(generation, SyncError::EncryptionFailed(e).into());
                return;
            }
        };

        let config = lock(&self.config).clone();
        let local_root = config.local.clone();
        let exclusion = self.exclusion.clone();
        let planned = tokio::task::spawn_blocking(move || {
            reconcile::plan(&config, exclusion.as_ref(), tree.as_deref())
        })
        .await;

        let plan = match planned {
            Ok(Ok(plan)) => plan,
            Ok(Err(e)) => {
                warn!(error = %e, "Reconciliation failed");
                self.abort_if_current(generation, e.into());
                return;
            }
            Err(e) => {
                warn!(error = %e, "Reconciliation worker failed");
                self.abort_if_current(
                    generation,
                    SyncEvent::Failed {
                        reason: format!("scan of {} failed: {e}", local_root.display()),
                    },
                );
                return;
            }
        };

        if plan.is_empty() {
            {
                let mut pass = lock(&self.pass);
                if pass.generation != generation || pass.phase != SyncPhase::Reconciling {
                    return;
                }
                pass.phase = SyncPhase::Transferring;
                pass.uploads_done = true;
                pass.downloads_done = true;
            }
            self.check_if_complete(generation);
            return;
        }

        self.start_transfers(generation, plan, encryptor, key);
    }

    fn start_transfers(
        self: &Arc<Self>,
        generation: u64,
        plan: SyncPlan,
        encryptor: Option<CryptoStream>,
        key: Option<SecretKey>,
    ) {
        let uploader = Uploader::new(Arc::clone(&self.remote), encryptor);
        let downloader = Downloader::new(Arc::clone(&self.remote), key);

        let weak = Arc::downgrade(self);
        uploader.events().subscribe_fn(move |event: &UploadEvent| {
            if let Some(inner) = weak.upgrade() {
                inner.on_upload_event(generation, event);
            }
            Ok(())
        });
        let weak = Arc::downgrade(self);
        downloader.events().subscribe_fn(move |event: &DownloadEvent| {
            if let Some(inner) = weak.upgrade() {
                inner.on_download_event(generation, event);
            }
            Ok(())
        });

        let uploads_done = plan.uploads.is_empty();
        let downloads_done = plan.downloads.is_empty();
        for download in plan.downloads {
            downloader.enqueue(download.into_item());
        }
        for upload in plan.uploads {
            uploader.enqueue(upload.into_item());
        }

        let (local, remote) = {
            let config = lock(&self.config);
            (config.local.clone(), config.remote.clone())
        };
        {
            let mut pass = lock(&self.pass);
            if pass.generation != generation || pass.phase != SyncPhase::Reconciling {
                debug!(generation, "Pass ended during reconciliation, dropping plan");
                return;
            }
            pass.phase = SyncPhase::Transferring;
            pass.uploads_done = uploads_done;
            pass.downloads_done = downloads_done;
            pass.uploader = Some(uploader.clone());
            pass.downloader = Some(downloader.clone());
        }

        info!(
            downloads = downloader.len(),
            uploads = uploader.len(),
            "Starting transfers"
        );
        downloader.start(local);
        uploader.start(&remote);
    }

    fn on_upload_event(&self, generation: u64, event: &UploadEvent) {
        self.publish(&SyncEvent::Upload(event.clone()));
        if matches!(event, UploadEvent::AllDone) {
            {
                let mut pass = lock(&self.pass);
                if pass.generation != generation {
                    return;
                }
                pass.uploads_done = true;
            }
            self.check_if_complete(generation);
        }
    }

    fn on_download_event(&self, generation: u64, event: &DownloadEvent) {
        self.publish(&SyncEvent::Download(event.clone()));
        if matches!(event, DownloadEvent::AllDone) {
            {
                let mut pass = lock(&self.pass);
                if pass.generation != generation {
                    return;
                }
                pass.downloads_done = true;
            }
            self.check_if_complete(generation);
        }
    }

    /// Completes the pass once both queues reported `AllDone`
    fn check_if_complete(&self, generation: u64) {
        let last = {
            let mut pass = lock(&self.pass);
            let complete = pass.generation == generation
                && pass.phase == SyncPhase::Transferring
                && pass.uploads_done
                && pass.downloads_done;
            if !complete {
                return;
            }
            pass.reset();

            let mut config = lock(&self.config);
            config.mark_synced(Utc::now());
            config.last
        };

        self.syncing.store(false, Ordering::Release);
        info!(last, "Pass complete");
        self.publish(&SyncEvent::Done { last });
    }
}
