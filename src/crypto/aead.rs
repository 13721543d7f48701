//! AEAD encryption
//!
//! ChaCha20-Poly1305 with a 64-bit counter nonce for handshake fields and
//! transport data, XChaCha20-Poly1305 with a random 24-byte nonce for
//! cookie replies.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce, XChaCha20Poly1305, XNonce,
};

use crate::error::CryptoError;

/// Authentication tag length
pub const TAG_LEN: usize = 16;

/// ChaCha20-Poly1305 key length
pub const KEY_LEN: usize = 32;

/// ChaCha20-Poly1305 nonce length
pub const NONCE_LEN: usize = 12;

/// XChaCha20-Poly1305 nonce length
pub const XNONCE_LEN: usize = 24;

/// Four zero bytes followed by the little-endian counter
fn counter_nonce(counter: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[4..].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// AEAD_Encrypt(key, counter, plaintext, aad) -> ciphertext || tag
pub fn encrypt(
    key: &[u8; KEY_LEN],
    counter: u64,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let nonce = counter_nonce(counter);
    ChaCha20Poly1305::new(Key::from_slice(key))
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::Encryption)
}

/// AEAD_Decrypt(key, counter, ciphertext || tag, aad)
pub fn decrypt(
    key: &[u8; KEY_LEN],
    counter: u64,
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::Decryption);
    }

    let nonce = counter_nonce(counter);
    ChaCha20Poly1305::new(Key::from_slice(key))
        .decrypt(Nonce::from_slice(&nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::Decryption)
}

/// Encrypt into a fixed-size output
///
/// Any other output length is reported as `KeyGeneration`, the failure of the
/// handshake step that asked for the fixed-size field.
pub fn encrypt_fixed<const N: usize>(
    key: &[u8; KEY_LEN],
    counter: u64,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<[u8; N], CryptoError> {
    encrypt(key, counter, plaintext, aad)?
        .try_into()
        .map_err(|_| CryptoError::KeyGeneration)
}

/// XAEAD_Encrypt (cookie replies)
pub fn xencrypt(
    key: &[u8; KEY_LEN],
    nonce: &[u8; XNONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    XChaCha20Poly1305::new(Key::from_slice(key))
        .encrypt(XNonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::Encryption)
}

/// XAEAD_Decrypt (cookie replies)
pub fn xdecrypt(
    key: &[u8; KEY_LEN],
    nonce: &[u8; XNONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::Decryption);
    }

    XChaCha20Poly1305::new(Key::from_slice(key))
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::Decryption)
}
