//! Secret buffers for key material
//!
//! Every buffer that holds a private key, a chaining key or a hash
//! transcript lives in a [`Secret`], which overwrites itself with zeros
//! when dropped or when [`Zeroize::zeroize`] is called at a protocol point.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Fixed-size byte buffer that is zeroed on drop
#[derive(Clone)]
pub struct Secret<const N: usize>([u8; N]);

/// 32-byte secret (private keys, chaining keys, symmetric keys)
pub type Secret32 = Secret<32>;

impl<const N: usize> Secret<N> {
    /// Take ownership of key material
    pub fn new(bytes: [u8; N]) -> Self {
        Self(bytes)
    }

    /// All-zero buffer
    pub fn zero() -> Self {
        Self([0u8; N])
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    /// True once the buffer has been wiped (or was never filled)
    pub fn is_zero(&self) -> bool {
        self.0.iter().fold(0u8, |acc, &b| acc | b) == 0
    }

    /// Constant-time comparison
    pub fn ct_eq(&self, other: &Self) -> bool {
        let diff = self
            .0
            .iter()
            .zip(other.0.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        diff == 0
    }
}

impl<const N: usize> Zeroize for Secret<N> {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl<const N: usize> Drop for Secret<N> {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl<const N: usize> ZeroizeOnDrop for Secret<N> {}

impl<const N: usize> From<[u8; N]> for Secret<N> {
    fn from(mut bytes: [u8; N]) -> Self {
        let secret = Self(bytes);
        bytes.zeroize();
        secret
    }
}

impl<const N: usize> fmt::Debug for Secret<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret<{}>(<redacted>)", N)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroize_in_place() {
        let mut secret = Secret32::new([7u8; 32]);
        assert!(!secret.is_zero());

        secret.zeroize();
        assert!(secret.is_zero());
        assert_eq!(secret.as_bytes(), &[0u8; 32]);
    }

    #[test]
    fn test_ct_eq() {
        let a = Secret32::new([1u8; 32]);
        let b = Secret32::new([1u8; 32]);
        let mut c_bytes = [1u8; 32];
        c_bytes[31] = 2;
        let c = Secret32::new(c_bytes);

        assert!(a.ct_eq(&b));
        assert!(!a.ct_eq(&c));
    }

    #[test]
    fn test_debug_is_redacted() {
        let secret = Secret32::new([0xAB; 32]);
        let rendered = format!("{:?}", secret);
        assert!(!rendered.contains("ab"));
        assert!(!rendered.contains("171"));
    }
}
