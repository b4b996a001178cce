//! Minicloud Sync - Folder synchronization engine
//!
//! Provides:
//! - Sequential upload and download queues with in-line encryption
//! - Reconciliation of a remote folder tree against a local directory
//! - The [`SyncFolder`] engine that ties both together
//!
//! ## Modules
//!
//! - [`queue`] - Shared state machine of the two transfer queues
//! - [`uploader`] - Upload queue, streams local files to the server
//! - [`downloader`] - Download queue, writes remote files to disk or a sink
//! - [`reconcile`] - Pure diff of local and remote trees into a transfer plan
//! - [`engine`] - One synchronized folder pair and its pass lifecycle

pub mod downloader;
pub mod engine;
pub mod queue;
pub mod reconcile;
pub mod uploader;

use std::path::PathBuf;

use thiserror::Error;

use minicloud_core::crypto::CryptoError;
use minicloud_core::domain::DomainError;
use minicloud_core::ports::RemoteError;

pub use downloader::{DownloadEvent, DownloadItem, DownloadTarget, Downloader};
pub use engine::{SyncEvent, SyncFolder, SyncPhase};
pub use reconcile::{PlannedDownload, PlannedUpload, SyncPlan};
pub use uploader::{UploadEvent, UploadItem, UploadSource, Uploader};

/// Size of one streamed chunk in both directions
pub const CHUNK_SIZE: usize = 4096;

/// Errors raised while running one transfer
#[derive(Debug, Error)]
pub enum TransferError {
    /// The server or the connection failed
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The cipher pipeline could not be built or rejected the data
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A local read or write failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// `stop()` was called while the transfer ran
    #[error("Transfer cancelled")]
    Cancelled,
}

/// Errors that abort a synchronization pass before anything is queued
#[derive(Debug, Error)]
pub enum SyncError {
    /// A required local directory could not be created
    #[error("Failed to create directory: {}", .0.display())]
    MkdirFailed(PathBuf),

    /// A local file could not be read to compute its fingerprint
    #[error("Failed to checksum {}: {source}", path.display())]
    ChecksumFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The content cipher for uploads could not be built
    #[error("Encryption unavailable: {0}")]
    EncryptionFailed(#[from] CryptoError),

    /// A domain-level error propagated from minicloud-core
    #[error("Domain error: {0}")]
    DomainError(#[from] DomainError),
}
