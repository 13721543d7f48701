//! BLAKE2s primitives
//!
//! `Hash`, `KeyedHash` and `MAC` as used by the handshake. `KeyedHash` is
//! RFC 2104 HMAC over BLAKE2s-256; `MAC` is keyed BLAKE2s with a 16-byte
//! output.

use blake2::{
    digest::{consts::U16, FixedOutput, Mac as MacTrait, Update},
    Blake2s256, Blake2sMac, Digest,
};
use hmac::SimpleHmac;

type HmacBlake2s = SimpleHmac<Blake2s256>;

/// Length of BLAKE2s-256 hash output
pub const HASH_LEN: usize = 32;

/// Length of a mac1/mac2/cookie value
pub const MAC_LEN: usize = 16;

/// HASH(data)
pub fn hash(data: &[u8]) -> [u8; HASH_LEN] {
    hash_many(&[data])
}

/// HASH(a || b)
pub fn hash_two(a: &[u8], b: &[u8]) -> [u8; HASH_LEN] {
    hash_many(&[a, b])
}

/// HASH over the concatenation of all parts, without allocating
pub fn hash_many(parts: &[&[u8]]) -> [u8; HASH_LEN] {
    let mut hasher = Blake2s256::new();
    for part in parts {
        Digest::update(&mut hasher, part);
    }
    hasher.finalize().into()
}

/// MAC(key, data): keyed BLAKE2s truncated to 16 bytes
///
/// Keys are 32 bytes for mac1 and 16 bytes (a cookie) for mac2; both are
/// within BLAKE2s' 1..=32 byte key range.
pub fn mac(key: &[u8], data: &[u8]) -> [u8; MAC_LEN] {
    let mut mac = Blake2sMac::<U16>::new_from_slice(key).expect("BLAKE2s key is 1..=32 bytes");
    MacTrait::update(&mut mac, data);
    mac.finalize_fixed().into()
}

/// KeyedHash(key, data): HMAC-BLAKE2s
pub fn keyed_hash(key: &[u8], data: &[u8]) -> [u8; HASH_LEN] {
    let mut mac = HmacBlake2s::new_from_slice(key).expect("HMAC accepts any key length");
    Update::update(&mut mac, data);
    mac.finalize_fixed().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_empty_vector() {
        // BLAKE2s-256("")
        let expected =
            hex::decode("69217a3079908094e11121d042354a7c1f55b6482ca1a51e1b250dfd1ed0eef9").unwrap();
        assert_eq!(hash(&[]).to_vec(), expected);
    }

    #[test]
    fn test_hash_two_is_concatenation() {
        let a = b"hello";
        let b = b"world";
        assert_eq!(hash_two(a, b), hash(b"helloworld"));
        assert_eq!(hash_many(&[b"hel", b"lo", b"world"]), hash(b"helloworld"));
    }

    #[test]
    fn test_mac_accepts_cookie_and_mac1_keys() {
        let data = b"test data";
        let with_32 = mac(&[0u8; 32], data);
        let with_16 = mac(&[0u8; 16], data);
        assert_eq!(with_32.len(), MAC_LEN);
        assert_ne!(with_32, with_16);
    }

    #[test]
    fn test_keyed_hash_depends_on_key() {
        let data = b"chaining";
        assert_ne!(keyed_hash(&[1u8; 32], data), keyed_hash(&[2u8; 32], data));
        assert_eq!(keyed_hash(&[1u8; 32], data), keyed_hash(&[1u8; 32], data));
    }
}
