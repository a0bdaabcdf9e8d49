//! AEAD: AES-256-GCM, no associated data.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use getrandom::getrandom;

use crate::wire::NONCE_BYTES;

/// Generate a random 12-byte nonce. Used during encryption only.
pub fn nonce() -> Result<[u8; NONCE_BYTES], getrandom::Error> {
    let mut n = [0u8; NONCE_BYTES];
    getrandom(&mut n)?;
    Ok(n)
}

/// AEAD seal. Output is ciphertext followed by the 16-byte tag.
pub fn aead_seal(
    key: &[u8; 32],
    nonce: &[u8; NONCE_BYTES],
    plaintext: &[u8],
) -> Result<Vec<u8>, aes_gcm::Error> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher.encrypt(Nonce::from_slice(nonce), plaintext)
}

/// AEAD open. Any failure (wrong key, tampered bytes) is the same opaque error.
pub fn aead_open(
    key: &[u8; 32],
    nonce: &[u8; NONCE_BYTES],
    ciphertext: &[u8],
) -> Result<Vec<u8>, aes_gcm::Error> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher.decrypt(Nonce::from_slice(nonce), ciphertext)
}
