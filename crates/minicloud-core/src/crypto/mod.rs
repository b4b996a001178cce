//! Cryptographic primitives for file content and user keys.
//!
//! This module provides:
//! - [`CryptoStream`] - AES stream transform built from a key and a cipher
//!   configuration string (`ALGORITHM/MODE/PADDING`)
//! - Streaming adapters for `std::io` readers/writers and tokio writers
//! - PBKDF2 derivation of the key-encryption key protecting a user's key
//! - [`SecretKey`], a zeroize-on-drop key container
//!
//! ## Compatibility constants
//!
//! The initialization vector is always a block of zero bytes and the PBKDF2
//! salt is sixteen zero bytes. Both are part of the storage format shared
//! with the server and other clients and must not be changed.

pub mod cipher;
pub mod kdf;
pub mod key;
pub mod stream;

pub use cipher::{CipherSpec, CipherTransform, CryptoStream, DEFAULT_CIPHER};
pub use kdf::derive_key_encryption_key;
pub use key::SecretKey;
pub use stream::{CipherReader, CipherSink, CipherWriter};

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Unsupported cipher configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("Invalid key length {got} for {config}")]
    InvalidKeyLength { config: String, got: usize },

    #[error("Input length {0} is not a multiple of the block size")]
    InvalidLength(usize),

    #[error("Bad padding - wrong key or corrupted data")]
    BadPadding,

    #[error("No key available for encrypted content")]
    MissingKey,
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
