//! HKDF-style key derivation chain (KDF1/KDF2/KDF3)
//!
//! ```text
//! t0 = KeyedHash(key, input)
//! T1 = KeyedHash(t0, 0x01)
//! T2 = KeyedHash(t0, T1 || 0x02)
//! T3 = KeyedHash(t0, T2 || 0x03)
//! ```
//!
//! `t0` is the extract step and never leaves this module. The `*_with`
//! variants take the keyed hash as a parameter; the plain variants use
//! HMAC-BLAKE2s.

use zeroize::Zeroize;

use super::blake2s::{self, HASH_LEN};

/// A keyed hash producing 32 bytes
pub trait KeyedHash: Fn(&[u8], &[u8]) -> [u8; HASH_LEN] {}

impl<F> KeyedHash for F where F: Fn(&[u8], &[u8]) -> [u8; HASH_LEN] {}

fn expand<H: KeyedHash>(
    keyed_hash: &H,
    prk: &[u8; HASH_LEN],
    prev: &[u8; HASH_LEN],
    label: u8,
) -> [u8; HASH_LEN] {
    let mut input = [0u8; HASH_LEN + 1];
    input[..HASH_LEN].copy_from_slice(prev);
    input[HASH_LEN] = label;
    let out = keyed_hash(&prk[..], &input[..]);
    input.zeroize();
    out
}

pub fn kdf1_with<H: KeyedHash>(
    keyed_hash: &H,
    key: &[u8; HASH_LEN],
    input: &[u8],
) -> [u8; HASH_LEN] {
    let mut t0 = keyed_hash(&key[..], input);
    let t1 = keyed_hash(&t0[..], &[0x01]);
    t0.zeroize();
    t1
}

pub fn kdf2_with<H: KeyedHash>(
    keyed_hash: &H,
    key: &[u8; HASH_LEN],
    input: &[u8],
) -> ([u8; HASH_LEN], [u8; HASH_LEN]) {
    let mut t0 = keyed_hash(&key[..], input);
    let t1 = keyed_hash(&t0[..], &[0x01]);
    let t2 = expand(keyed_hash, &t0, &t1, 0x02);
    t0.zeroize();
    (t1, t2)
}

pub fn kdf3_with<H: KeyedHash>(
    keyed_hash: &H,
    key: &[u8; HASH_LEN],
    input: &[u8],
) -> ([u8; HASH_LEN], [u8; HASH_LEN], [u8; HASH_LEN]) {
    let mut t0 = keyed_hash(&key[..], input);
    let t1 = keyed_hash(&t0[..], &[0x01]);
    let t2 = expand(keyed_hash, &t0, &t1, 0x02);
    let t3 = expand(keyed_hash, &t0, &t2, 0x03);
    t0.zeroize();
    (t1, t2, t3)
}

/// KDF1 over HMAC-BLAKE2s
pub fn kdf1(key: &[u8; HASH_LEN], input: &[u8]) -> [u8; HASH_LEN] {
    kdf1_with(&blake2s::keyed_hash, key, input)
}

/// KDF2 over HMAC-BLAKE2s
pub fn kdf2(key: &[u8; HASH_LEN], input: &[u8]) -> ([u8; HASH_LEN], [u8; HASH_LEN]) {
    kdf2_with(&blake2s::keyed_hash, key, input)
}

/// KDF3 over HMAC-BLAKE2s
pub fn kdf3(
    key: &[u8; HASH_LEN],
    input: &[u8],
) -> ([u8; HASH_LEN], [u8; HASH_LEN], [u8; HASH_LEN]) {
    kdf3_with(&blake2s::keyed_hash, key, input)
}
