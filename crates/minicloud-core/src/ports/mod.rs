//! Port definitions (hexagonal architecture interfaces)
//!
//! ## Ports Overview
//!
//! - [`IRemoteClient`] - Minicloud API operations used by the sync engine

pub mod remote_client;

pub use remote_client::{
    ApiEvent, ByteStream, DownloadResponse, IRemoteClient, RemoteError, UploadForm,
};
