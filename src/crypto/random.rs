//! Entropy and wall-clock inputs to the handshake

use rand::{rngs::OsRng, RngCore};
use tai64::Tai64N;

use crate::error::CryptoError;

/// Length of a TAI64N timestamp
pub const TIMESTAMP_LEN: usize = 12;

/// RandomBytes(n) from the operating system CSPRNG
pub fn random_bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut out = [0u8; N];
    OsRng
        .try_fill_bytes(&mut out)
        .map_err(|_| CryptoError::KeyGeneration)?;
    Ok(out)
}

/// TAI64N() -> 12-byte big-endian timestamp (8 seconds + 4 nanoseconds)
pub fn tai64n_now() -> [u8; TIMESTAMP_LEN] {
    Tai64N::now().to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bytes_differ() {
        let a: [u8; 24] = random_bytes().unwrap();
        let b: [u8; 24] = random_bytes().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tai64n_is_monotonic_big_endian() {
        let first = tai64n_now();
        let second = tai64n_now();
        // Byte-wise comparison is chronological for big-endian timestamps
        assert!(second >= first);
        // TAI64 label: high bit pattern 0x40 for dates after 1970
        assert_eq!(first[0], 0x40);
    }
}
