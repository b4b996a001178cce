//! Remote client port (driven/secondary port)
//!
//! Boundary between the sync engine and the Minicloud HTTP API. The engine
//! only relies on three operations: requesting a folder tree (reply delivered
//! asynchronously on the client's [`EventBus`]), streaming an upload and
//! streaming a download.
//!
//! ## Design Notes
//!
//! - Requests that produce typed replies return an [`ActionId`] immediately;
//!   the reply arrives later as an [`ApiEvent`] carrying the same id. The id
//!   can also be allocated up front so the caller records it before sending.
//! - Transfers are awaited directly because the transfer queues own their
//!   workers and report progress themselves.

use std::io;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use thiserror::Error;

use crate::domain::{
    ActionId, FileId, RemoteFile, RemotePath, ServerInfo, User, VersionId,
};
use crate::events::EventBus;

/// Body of a streamed transfer
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

// ============================================================================
// RemoteError
// ============================================================================

/// Failures at the remote boundary
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The request could not be sent or the connection broke
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-success status
    #[error("Server returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Credentials were rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The reply could not be parsed
    #[error("Malformed reply: {0}")]
    Protocol(String),

    /// The local side of a streamed body failed
    #[error("Stream error: {0}")]
    Stream(String),
}

// ============================================================================
// ApiEvent
// ============================================================================

/// Typed reply to a correlated request
///
/// One variant per reply `type` tag of the wire envelope, plus transport
/// level outcomes (`Unauthorized`, `ConnectionError`).
#[derive(Debug, Clone)]
pub enum ApiEvent {
    /// Empty `type`: the action succeeded without a payload of interest
    Success {
        action_id: Option<ActionId>,
        data: serde_json::Value,
    },
    /// A folder tree; `None` when the server returned no folder
    Path {
        action_id: Option<ActionId>,
        path: Option<Arc<RemotePath>>,
    },
    Paths {
        action_id: Option<ActionId>,
        paths: Vec<Arc<RemotePath>>,
    },
    File {
        action_id: Option<ActionId>,
        file: Arc<RemoteFile>,
    },
    Files {
        action_id: Option<ActionId>,
        files: Vec<Arc<RemoteFile>>,
    },
    User {
        action_id: Option<ActionId>,
        user: Box<User>,
    },
    ServerInfo {
        action_id: Option<ActionId>,
        info: ServerInfo,
    },
    Bool {
        action_id: Option<ActionId>,
        value: bool,
    },
    /// Server-side error; `message` is `None` for unparseable replies
    Error {
        action_id: Option<ActionId>,
        message: Option<String>,
    },
    /// The credential header was rejected
    Unauthorized {
        action_id: Option<ActionId>,
        message: String,
    },
    /// The request never produced a reply
    ConnectionError {
        action_id: Option<ActionId>,
        reason: String,
    },
}

impl ApiEvent {
    /// Correlation id echoed by the server, if any
    pub fn action_id(&self) -> Option<&ActionId> {
        match self {
            Self::Success { action_id, .. }
            | Self::Path { action_id, .. }
            | Self::Paths { action_id, .. }
            | Self::File { action_id, .. }
            | Self::Files { action_id, .. }
            | Self::User { action_id, .. }
            | Self::ServerInfo { action_id, .. }
            | Self::Bool { action_id, .. }
            | Self::Error { action_id, .. }
            | Self::Unauthorized { action_id, .. }
            | Self::ConnectionError { action_id, .. } => action_id.as_ref(),
        }
    }

    /// True for variants that report a failed request
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Error { .. } | Self::Unauthorized { .. } | Self::ConnectionError { .. }
        )
    }

    /// Short name of the variant, for logs and CLI output
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Path { .. } => "path",
            Self::Paths { .. } => "paths",
            Self::File { .. } => "file",
            Self::Files { .. } => "files",
            Self::User { .. } => "user",
            Self::ServerInfo { .. } => "server",
            Self::Bool { .. } => "bool",
            Self::Error { .. } => "error",
            Self::Unauthorized { .. } => "unauthorized",
            Self::ConnectionError { .. } => "connection_error",
        }
    }
}

// ============================================================================
// Transfers
// ============================================================================

/// Non-file fields of an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadForm {
    /// Remote folder to upload into
    pub target_path: Option<String>,
    /// Name of the file part
    pub file_name: String,
    /// Cipher configuration of the body; empty when plain
    pub encryption: String,
    /// Existing remote file to overwrite
    pub replace: Option<FileId>,
    /// Fingerprint of the unencrypted content
    pub checksum: String,
    pub public: bool,
    /// When false the server is asked not to record a new version
    pub create_version: bool,
}

/// Opened download stream
pub struct DownloadResponse {
    /// Length announced by the server
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

impl std::fmt::Debug for DownloadResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadResponse")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// IRemoteClient
// ============================================================================

/// Remote operations the sync engine depends on
#[async_trait]
pub trait IRemoteClient: Send + Sync {
    /// Bus on which correlated replies are published
    fn events(&self) -> &EventBus<ApiEvent>;

    /// Allocates a correlation id without sending anything
    fn next_action_id(&self) -> ActionId;

    /// Requests the folder at `path` under a caller-chosen correlation id
    ///
    /// The reply is an [`ApiEvent::Path`] carrying `action_id`. Callers that
    /// must be ready for the reply before it can arrive allocate the id with
    /// [`next_action_id`](Self::next_action_id) first.
    ///
    /// # Arguments
    /// * `path` - Remote folder path
    /// * `recursive` - Include every descendant folder
    /// * `action_id` - Correlation id the reply will carry
    fn get_path_as(&self, path: &str, recursive: bool, action_id: ActionId);

    /// Requests the folder at `path` under a fresh correlation id
    fn get_path(&self, path: &str, recursive: bool) -> ActionId {
        let action_id = self.next_action_id();
        self.get_path_as(path, recursive, action_id.clone());
        action_id
    }

    /// Streams an upload and returns the parsed server reply
    async fn upload_file(
        &self,
        form: UploadForm,
        body: ByteStream,
    ) -> Result<serde_json::Value, RemoteError>;

    /// Opens a download of `file`, at `version` or the server's current one
    async fn download_file(
        &self,
        file: FileId,
        version: Option<VersionId>,
    ) -> Result<DownloadResponse, RemoteError>;
}
