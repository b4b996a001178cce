//! PBKDF2 derivation of the key-encryption key.
//!
//! A user's content key is stored on the server encrypted with a key derived
//! from their password:
//! - PRF: HMAC-SHA1
//! - Iterations: 1000
//! - Output length: 32 bytes (256 bits)
//! - Salt: 16 zero bytes

use sha1::Sha1;

use super::key::SecretKey;

/// PBKDF2 iteration count
pub const KEK_ITERATIONS: u32 = 1000;

/// Derived key length in bytes
pub const KEK_LENGTH: usize = 32;

const KEK_SALT: [u8; 16] = [0u8; 16];

fn pbkdf2_sha1(password: &[u8], salt: &[u8], rounds: u32, length: usize) -> Vec<u8> {
    let mut out = vec![0u8; length];
    pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, rounds, &mut out);
    out
}

/// Derives the key that encrypts the user's content key at rest
///
/// # Arguments
/// * `password` - Password text, already prefixed with the account salt if any
pub fn derive_key_encryption_key(password: &str) -> SecretKey {
    SecretKey::new(pbkdf2_sha1(
        password.as_bytes(),
        &KEK_SALT,
        KEK_ITERATIONS,
        KEK_LENGTH,
    ))
}
