//! X25519 Diffie-Hellman key exchange
//!
//! Private keys never leave a [`Secret32`]; shared secrets are returned in
//! one as well so they are wiped once mixed into the chaining key.

use rand::{rngs::OsRng, RngCore};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use super::secret::Secret32;
use crate::error::CryptoError;

/// Key length for X25519 (both private and public keys are 32 bytes)
pub const KEY_LEN: usize = 32;

/// DH_Generate() -> (private, public)
pub fn generate_keypair() -> Result<(Secret32, [u8; KEY_LEN]), CryptoError> {
    let mut bytes = [0u8; KEY_LEN];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|_| CryptoError::KeyGeneration)?;

    let secret = StaticSecret::from(bytes);
    bytes.zeroize();
    let public = PublicKey::from(&secret).to_bytes();
    Ok((Secret32::new(secret.to_bytes()), public))
}

/// Derive public key from private key
pub fn public_key(private_key: &Secret32) -> [u8; KEY_LEN] {
    let secret = StaticSecret::from(*private_key.as_bytes());
    PublicKey::from(&secret).to_bytes()
}

/// DH(private, public) -> shared secret
///
/// An all-zero result means the peer sent a low-order point; it is
/// rejected rather than mixed into the chaining key.
pub fn dh(private_key: &Secret32, public_key: &[u8; KEY_LEN]) -> Result<Secret32, CryptoError> {
    let secret = StaticSecret::from(*private_key.as_bytes());
    let shared = secret.diffie_hellman(&PublicKey::from(*public_key));
    if !shared.was_contributory() {
        return Err(CryptoError::DiffieHellman);
    }
    Ok(Secret32::new(shared.to_bytes()))
}

/// Long-term static key pair of the local endpoint
#[derive(Clone)]
pub struct StaticKeypair {
    private: Secret32,
    public: [u8; KEY_LEN],
}

impl StaticKeypair {
    pub fn generate() -> Result<Self, CryptoError> {
        let (private, public) = generate_keypair()?;
        Ok(Self { private, public })
    }

    pub fn from_private(private: Secret32) -> Self {
        let public = public_key(&private);
        Self { private, public }
    }

    pub fn private(&self) -> &Secret32 {
        &self.private
    }

    pub fn public(&self) -> &[u8; KEY_LEN] {
        &self.public
    }
}

impl std::fmt::Debug for StaticKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticKeypair")
            .field("public", &hex::encode(self.public))
            .finish_non_exhaustive()
    }
}
