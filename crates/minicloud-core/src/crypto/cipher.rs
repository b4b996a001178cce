//! AES stream transform driven by a cipher configuration string.
//!
//! Supported configurations:
//! - `AES/CBC/PKCS5Padding` (default), `AES/CBC/NoPadding`
//! - `AES/ECB/PKCS5Padding`, `AES/ECB/NoPadding`
//! - `AES` alone, which means `AES/ECB/PKCS5Padding`
//!
//! Key lengths 16, 24 and 32 select AES-128, AES-192 and AES-256.

use std::fmt;
use std::str::FromStr;

use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, InvalidLength, KeyInit, KeyIvInit};
use zeroize::Zeroize;

use super::key::SecretKey;
use super::stream::{CipherReader, CipherSink, CipherWriter};
use super::{CryptoError, Result};

/// Cipher configuration applied when none is given
pub const DEFAULT_CIPHER: &str = "AES/CBC/PKCS5Padding";

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

const ZERO_IV: [u8; BLOCK_SIZE] = [0u8; BLOCK_SIZE];

// ============================================================================
// CipherSpec
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    Cbc,
    Ecb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    Pkcs5,
    None,
}

/// Parsed form of an `ALGORITHM/MODE/PADDING` string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherSpec {
    pub mode: CipherMode,
    pub padding: Padding,
}

impl FromStr for CipherSpec {
    type Err = CryptoError;

    fn from_str(config: &str) -> Result<Self> {
        let unsupported = || CryptoError::UnsupportedConfiguration(config.to_string());
        let parts: Vec<&str> = config.trim().split('/').collect();

        if !parts[0].eq_ignore_ascii_case("AES") {
            return Err(unsupported());
        }

        match parts.as_slice() {
            [_] => Ok(Self {
                mode: CipherMode::Ecb,
                padding: Padding::Pkcs5,
            }),
            [_, mode, padding] => {
                let mode = match mode.to_ascii_uppercase().as_str() {
                    "CBC" => CipherMode::Cbc,
                    "ECB" => CipherMode::Ecb,
                    _ => return Err(unsupported()),
                };
                let padding = match padding.to_ascii_uppercase().as_str() {
                    "PKCS5PADDING" => Padding::Pkcs5,
                    "NOPADDING" => Padding::None,
                    _ => return Err(unsupported()),
                };
                Ok(Self { mode, padding })
            }
            _ => Err(unsupported()),
        }
    }
}

// ============================================================================
// Block engines
// ============================================================================

macro_rules! dispatch {
    ($engine:expr, $inner:ident => $body:expr) => {
        match $engine {
            Self::Cbc128($inner) => $body,
            Self::Cbc192($inner) => $body,
            Self::Cbc256($inner) => $body,
            Self::Ecb128($inner) => $body,
            Self::Ecb192($inner) => $body,
            Self::Ecb256($inner) => $body,
        }
    };
}

macro_rules! block_engine {
    ($name:ident, $cbc:ident, $ecb:ident) => {
        enum $name {
            Cbc128(cbc::$cbc<Aes128>),
            Cbc192(cbc::$cbc<Aes192>),
            Cbc256(cbc::$cbc<Aes256>),
            Ecb128(ecb::$ecb<Aes128>),
            Ecb192(ecb::$ecb<Aes192>),
            Ecb256(ecb::$ecb<Aes256>),
        }

        impl $name {
            fn new(spec: CipherSpec, config: &str, key: &[u8]) -> Result<Self> {
                let bad_key = |_: InvalidLength| CryptoError::InvalidKeyLength {
                    config: config.to_string(),
                    got: key.len(),
                };
                Ok(match (spec.mode, key.len()) {
                    (CipherMode::Cbc, 16) => {
                        Self::Cbc128(cbc::$cbc::new_from_slices(key, &ZERO_IV).map_err(bad_key)?)
                    }
                    (CipherMode::Cbc, 24) => {
                        Self::Cbc192(cbc::$cbc::new_from_slices(key, &ZERO_IV).map_err(bad_key)?)
                    }
                    (CipherMode::Cbc, 32) => {
                        Self::Cbc256(cbc::$cbc::new_from_slices(key, &ZERO_IV).map_err(bad_key)?)
                    }
                    (CipherMode::Ecb, 16) => {
                        Self::Ecb128(ecb::$ecb::new_from_slice(key).map_err(bad_key)?)
                    }
                    (CipherMode::Ecb, 24) => {
                        Self::Ecb192(ecb::$ecb::new_from_slice(key).map_err(bad_key)?)
                    }
                    (CipherMode::Ecb, 32) => {
                        Self::Ecb256(ecb::$ecb::new_from_slice(key).map_err(bad_key)?)
                    }
                    (_, got) => {
                        return Err(CryptoError::InvalidKeyLength {
                            config: config.to_string(),
                            got,
                        })
                    }
                })
            }
        }
    };
}

block_engine!(EncryptEngine, Encryptor, Encryptor);
block_engine!(DecryptEngine, Decryptor, Decryptor);

impl EncryptEngine {
    fn process(&mut self, block: &mut [u8]) {
        let block = aes::Block::from_mut_slice(block);
        dispatch!(self, c => c.encrypt_block_mut(block))
    }
}

impl DecryptEngine {
    fn process(&mut self, block: &mut [u8]) {
        let block = aes::Block::from_mut_slice(block);
        dispatch!(self, c => c.decrypt_block_mut(block))
    }
}

enum Engine {
    Encrypt(EncryptEngine),
    Decrypt(DecryptEngine),
}

// ============================================================================
// CipherTransform
// ============================================================================

/// Incremental encryptor or decryptor
///
/// Feed input with [`update`](Self::update) in chunks of any size and call
/// [`finish`](Self::finish) once at the end to flush the final (padded)
/// block. Decryption holds back the last complete block until `finish` so the
/// padding can be checked.
pub struct CipherTransform {
    engine: Engine,
    padding: Padding,
    pending: Vec<u8>,
}

impl CipherTransform {
    /// Transforms `input`, returning whatever complete output is ready
    pub fn update(&mut self, input: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(input);

        let mut ready = self.pending.len() / BLOCK_SIZE * BLOCK_SIZE;
        if matches!(self.engine, Engine::Decrypt(_))
            && self.padding == Padding::Pkcs5
            && ready == self.pending.len()
        {
            ready = ready.saturating_sub(BLOCK_SIZE);
        }

        let mut out: Vec<u8> = self.pending.drain(..ready).collect();
        self.process_blocks(&mut out);
        out
    }

    /// Flushes the remaining input
    ///
    /// Fails with [`CryptoError::BadPadding`] when decrypted padding is
    /// invalid, or [`CryptoError::InvalidLength`] when unpadded input does not
    /// end on a block boundary.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        let mut tail = std::mem::take(&mut self.pending);
        let decrypting = matches!(self.engine, Engine::Decrypt(_));

        match (decrypting, self.padding) {
            (false, Padding::Pkcs5) => {
                let pad = BLOCK_SIZE - tail.len() % BLOCK_SIZE;
                tail.resize(tail.len() + pad, pad as u8);
                self.process_blocks(&mut tail);
                Ok(tail)
            }
            (true, Padding::Pkcs5) => {
                if tail.is_empty() {
                    return Ok(tail);
                }
                if tail.len() != BLOCK_SIZE {
                    tail.zeroize();
                    return Err(CryptoError::InvalidLength(tail.len()));
                }
                self.process_blocks(&mut tail);
                let pad = tail[BLOCK_SIZE - 1] as usize;
                let valid = (1..=BLOCK_SIZE).contains(&pad)
                    && tail[BLOCK_SIZE - pad..].iter().all(|b| *b as usize == pad);
                if !valid {
                    tail.zeroize();
                    return Err(CryptoError::BadPadding);
                }
                tail.truncate(BLOCK_SIZE - pad);
                Ok(tail)
            }
            (_, Padding::None) => {
                if tail.is_empty() {
                    Ok(tail)
                } else {
                    let len = tail.len();
                    tail.zeroize();
                    Err(CryptoError::InvalidLength(len))
                }
            }
        }
    }

    fn process_blocks(&mut self, data: &mut [u8]) {
        for block in data.chunks_exact_mut(BLOCK_SIZE) {
            match &mut self.engine {
                Engine::Encrypt(e) => e.process(block),
                Engine::Decrypt(d) => d.process(block),
            }
        }
    }
}

impl Drop for CipherTransform {
    fn drop(&mut self) {
        self.pending.zeroize();
    }
}

// ============================================================================
// CryptoStream
// ============================================================================

/// Key plus cipher configuration, ready to build transforms
///
/// Construction validates both the configuration string and the key length,
/// so every later operation on a `CryptoStream` only fails on bad input data.
#[derive(Clone)]
pub struct CryptoStream {
    key: SecretKey,
    config: String,
    spec: CipherSpec,
}

impl CryptoStream {
    /// Creates a stream transform for `key` and `config`
    ///
    /// # Arguments
    /// * `key` - Raw key bytes (16, 24 or 32)
    /// * `config` - Cipher configuration, e.g. `AES/CBC/PKCS5Padding`
    pub fn new(key: &[u8], config: &str) -> Result<Self> {
        let spec: CipherSpec = config.parse()?;
        EncryptEngine::new(spec, config, key)?;
        Ok(Self {
            key: SecretKey::from(key),
            config: config.to_string(),
            spec,
        })
    }

    /// Creates a stream transform using [`DEFAULT_CIPHER`]
    pub fn with_default_config(key: &[u8]) -> Result<Self> {
        Self::new(key, DEFAULT_CIPHER)
    }

    /// The configuration string this stream was built from
    pub fn config(&self) -> &str {
        &self.config
    }

    pub fn spec(&self) -> CipherSpec {
        self.spec
    }

    pub fn encryptor(&self) -> Result<CipherTransform> {
        Ok(CipherTransform {
            engine: Engine::Encrypt(EncryptEngine::new(
                self.spec,
                &self.config,
                self.key.as_bytes(),
            )?),
            padding: self.spec.padding,
            pending: Vec::new(),
        })
    }

    pub fn decryptor(&self) -> Result<CipherTransform> {
        Ok(CipherTransform {
            engine: Engine::Decrypt(DecryptEngine::new(
                self.spec,
                &self.config,
                self.key.as_bytes(),
            )?),
            padding: self.spec.padding,
            pending: Vec::new(),
        })
    }

    /// Encrypts a whole buffer
    pub fn encrypt_bytes(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut transform = self.encryptor()?;
        let mut out = transform.update(data);
        out.extend(transform.finish()?);
        Ok(out)
    }

    /// Decrypts a whole buffer
    pub fn decrypt_bytes(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut transform = self.decryptor()?;
        let mut out = transform.update(data);
        out.extend(transform.finish()?);
        Ok(out)
    }

    /// Wraps `output` so that everything written to it is encrypted
    pub fn encrypt_writer<W: std::io::Write>(&self, output: W) -> Result<CipherWriter<W>> {
        Ok(CipherWriter::new(output, self.encryptor()?))
    }

    /// Wraps `input` so that everything read from it is decrypted
    pub fn decrypt_reader<R: std::io::Read>(&self, input: R) -> Result<CipherReader<R>> {
        Ok(CipherReader::new(input, self.decryptor()?))
    }

    /// Async sink that decrypts before writing to `output`
    pub fn decrypt_sink<W>(&self, output: W) -> Result<CipherSink<W>>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        Ok(CipherSink::new(output, Some(self.decryptor()?)))
    }

    /// Async sink that encrypts before writing to `output`
    pub fn encrypt_sink<W>(&self, output: W) -> Result<CipherSink<W>>
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        Ok(CipherSink::new(output, Some(self.encryptor()?)))
    }
}

impl fmt::Debug for CryptoStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoStream")
            .field("config", &self.config)
            .field("key", &self.key)
            .finish()
    }
}
