//! Minicloud API - HTTP client for a Minicloud server
//!
//! Provides an async client for:
//! - Form-encoded actions against `<server>/api.php` with correlated replies
//! - Streamed multipart uploads
//! - Streamed authenticated downloads
//!
//! ## Modules
//!
//! - [`client`] - `MinicloudClient`, credentials and action dispatch
//! - [`response`] - decoding of the `{type, action_id, data}` reply envelope
//! - [`upload`] - multipart upload of a streamed body
//! - [`download`] - download links and streamed downloads
//! - [`provider`] - `IRemoteClient` implementation used by the sync engine

pub mod client;
pub mod download;
pub mod provider;
pub mod response;
pub mod upload;

pub use client::MinicloudClient;
