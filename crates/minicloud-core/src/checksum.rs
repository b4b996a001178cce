//! Content fingerprints
//!
//! The server identifies file content by the lowercase hex MD5 of the
//! **unencrypted** bytes. It is a change-detection fingerprint only.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use md5::{Digest, Md5};
use sha2::Sha256;

const READ_BUFFER: usize = 64 * 1024;

/// Incremental fingerprint over streamed content
#[derive(Default, Clone)]
pub struct Fingerprint {
    hasher: Md5,
}

impl Fingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Lowercase hex digest
    pub fn finalize_hex(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

/// Fingerprint of an in-memory buffer
pub fn fingerprint(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

/// Fingerprint of a local file, read in 64 KiB blocks
pub fn file_fingerprint(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut fp = Fingerprint::new();
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        fp.update(&buf[..n]);
    }
    Ok(fp.finalize_hex())
}

/// Lowercase hex SHA-256, used for the credential header
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}
