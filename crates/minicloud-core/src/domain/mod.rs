//! Domain entities
//!
//! ## Modules
//!
//! - [`remote`] - `RemotePath` / `RemoteFile` / `RemoteFileVersion` tree
//! - [`user`] - authenticated user and content key
//! - [`server`] - server description and clock offset
//! - [`folder`] - `SyncFolderConfig`, one synchronized folder pair
//! - [`newtypes`] - typed identifiers
//! - [`errors`] - `DomainError`

pub mod errors;
pub mod folder;
mod lenient;
pub mod newtypes;
pub mod remote;
pub mod server;
pub mod user;

pub use errors::DomainError;
pub use folder::SyncFolderConfig;
pub use newtypes::{ActionId, FileId, PathId, UserId, VersionId};
pub use remote::{
    FileListing, PathListing, RemoteFile, RemoteFileVersion, RemotePath, VersionListing,
};
pub use server::{ServerInfo, ServerInfoListing};
pub use user::{User, UserListing};
