//! User account and content key handling
//!
//! The server stores each user's content key encrypted with a key derived
//! from their password (see [`crate::crypto::kdf`]). A freshly fetched
//! [`User`] therefore holds the encrypted key until
//! [`User::set_password`] is called with `decrypt = true`.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::lenient;
use super::newtypes::UserId;
use crate::crypto::{self, CryptoError, CryptoStream, SecretKey, DEFAULT_CIPHER};

/// User as returned by `get_user`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserListing {
    #[serde(deserialize_with = "lenient::i64_or_string")]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Base64 of the encrypted content key
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub key_encryption: Option<String>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub admin: bool,
}

/// An authenticated user and their content key
#[derive(Clone)]
pub struct User {
    id: UserId,
    name: String,
    email: Option<String>,
    key: Option<SecretKey>,
    key_encryption: String,
    admin: bool,
    key_encryption_key: Option<SecretKey>,
}

impl User {
    /// Builds a user from the server listing, decoding the stored key
    pub fn from_listing(listing: UserListing) -> Result<Self, DomainError> {
        let key = match listing.key.as_deref().map(str::trim) {
            Some(encoded) if !encoded.is_empty() => Some(SecretKey::new(
                STANDARD
                    .decode(encoded)
                    .map_err(|_| DomainError::InvalidEncoding("key".to_string()))?,
            )),
            _ => None,
        };

        Ok(Self {
            id: UserId::new(listing.id),
            name: listing.name,
            email: listing.email,
            key,
            key_encryption: listing.key_encryption.unwrap_or_default(),
            admin: listing.admin,
            key_encryption_key: None,
        })
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn is_admin(&self) -> bool {
        self.admin
    }

    /// Cipher configuration protecting the stored key
    pub fn key_encryption(&self) -> &str {
        if self.key_encryption.is_empty() {
            DEFAULT_CIPHER
        } else {
            &self.key_encryption
        }
    }

    /// Content key; plain only after a successful `set_password(.., true)`
    pub fn key(&self) -> Option<&SecretKey> {
        self.key.as_ref()
    }

    pub fn set_key(&mut self, key: SecretKey) {
        self.key = Some(key);
    }

    /// Derives the key-encryption key from `salt + password`
    ///
    /// # Arguments
    /// * `password` - Account password
    /// * `salt` - Prefix prepended to the password before derivation
    /// * `decrypt` - Also decrypt the stored content key in place
    pub fn set_password(
        &mut self,
        password: &str,
        salt: &str,
        decrypt: bool,
    ) -> Result<(), CryptoError> {
        let kek = crypto::derive_key_encryption_key(&format!("{salt}{password}"));

        if decrypt {
            if let Some(stored) = &self.key {
                let cipher = CryptoStream::new(kek.as_bytes(), self.key_encryption())?;
                self.key = Some(SecretKey::new(cipher.decrypt_bytes(stored.as_bytes())?));
            }
        }

        self.key_encryption_key = Some(kek);
        Ok(())
    }

    /// Base64 of the content key encrypted for storage
    pub fn encrypted_key(&self) -> Result<Option<String>, CryptoError> {
        let Some(key) = &self.key else {
            return Ok(None);
        };
        let kek = self
            .key_encryption_key
            .as_ref()
            .ok_or(CryptoError::MissingKey)?;
        let cipher = CryptoStream::new(kek.as_bytes(), self.key_encryption())?;
        Ok(Some(STANDARD.encode(cipher.encrypt_bytes(key.as_bytes())?)))
    }

    /// Content cipher for `config`, or `None` when `config` is empty
    pub fn encryptor(&self, config: &str) -> Result<Option<CryptoStream>, CryptoError> {
        if config.is_empty() {
            return Ok(None);
        }
        let key = self.key.as_ref().ok_or(CryptoError::MissingKey)?;
        CryptoStream::new(key.as_bytes(), config).map(Some)
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("key", &self.key)
            .field("key_encryption", &self.key_encryption)
            .field("admin", &self.admin)
            .finish()
    }
}
