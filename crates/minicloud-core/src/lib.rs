//! Minicloud Core - Domain model, events and cryptography
//!
//! This crate contains the pieces every other Minicloud crate builds on:
//! - **Domain entities** - `RemotePath`, `RemoteFile`, `RemoteFileVersion`, `User`,
//!   `ServerInfo`, `SyncFolderConfig`
//! - **Events** - the generic `EventBus` used to deliver replies and progress
//! - **Cryptography** - `CryptoStream` (AES with a fixed zero IV) and the
//!   PBKDF2 key-encryption-key derivation used for user keys
//! - **Port definitions** - `IRemoteClient`, the boundary to the remote API
//!
//! # Architecture
//!
//! The crate follows the ports & adapters layout. Adapter crates (`minicloud-api`)
//! implement the ports; the sync crate only talks to the remote service through them.

pub mod checksum;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod events;
pub mod ports;
