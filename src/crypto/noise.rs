//! Noise IKpsk2 symmetric state
//!
//! Pattern: Noise_IKpsk2_25519_ChaChaPoly_BLAKE2s. This holds the chaining
//! key and hash transcript and the operations that fold handshake data
//! into them; the message choreography lives in `protocol::handshake`.

use zeroize::{Zeroize, ZeroizeOnDrop};

use super::secret::Secret32;
use super::{aead, blake2s, kdf};
use crate::error::CryptoError;

/// Noise protocol construction string
pub const CONSTRUCTION: &[u8] = b"Noise_IKpsk2_25519_ChaChaPoly_BLAKE2s";

/// WireGuard identifier string
pub const IDENTIFIER: &[u8] = b"WireGuard v1 zx2c4 Jason@zx2c4.com";

/// Label for MAC1 key derivation
pub const LABEL_MAC1: &[u8] = b"mac1----";

/// Label for cookie key derivation
pub const LABEL_COOKIE: &[u8] = b"cookie--";

/// Hash length (also chaining key length)
pub const HASH_LEN: usize = 32;

/// Running chaining key and hash transcript of one handshake
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct NoiseState {
    chaining_key: Secret32,
    hash: Secret32,
}

impl NoiseState {
    /// Ci = HASH(CONSTRUCTION)
    pub fn initial_chain_key() -> [u8; HASH_LEN] {
        blake2s::hash(CONSTRUCTION)
    }

    /// Hi = HASH(HASH(Ci || IDENTIFIER) || responder_static_public)
    pub fn initial_hash(responder_static: &[u8; 32]) -> [u8; HASH_LEN] {
        let ck = Self::initial_chain_key();
        let h = blake2s::hash_two(&ck, IDENTIFIER);
        blake2s::hash_two(&h, responder_static)
    }

    /// Both sides start from the responder's static public key
    pub fn new(responder_static: &[u8; 32]) -> Self {
        Self {
            chaining_key: Secret32::new(Self::initial_chain_key()),
            hash: Secret32::new(Self::initial_hash(responder_static)),
        }
    }

    pub fn chaining_key(&self) -> &Secret32 {
        &self.chaining_key
    }

    pub fn hash(&self) -> &Secret32 {
        &self.hash
    }

    /// h = HASH(h || data)
    pub fn mix_hash(&mut self, data: &[u8]) {
        self.hash = Secret32::new(blake2s::hash_two(self.hash.as_bytes(), data));
    }

    /// Fold an unencrypted ephemeral public key: h = HASH(h || e), ck = KDF1(ck, e)
    pub fn mix_ephemeral(&mut self, ephemeral_public: &[u8; 32]) {
        self.mix_hash(ephemeral_public);
        self.chaining_key = Secret32::new(kdf::kdf1(self.chaining_key.as_bytes(), ephemeral_public));
    }

    /// Fold a DH result with no key output: ck = KDF1(ck, dh)
    pub fn mix_chain(&mut self, input: &Secret32) {
        self.chaining_key = Secret32::new(kdf::kdf1(self.chaining_key.as_bytes(), input.as_bytes()));
    }

    /// (ck, k) = KDF2(ck, input)
    pub fn mix_key(&mut self, input: &Secret32) -> Secret32 {
        let (ck, key) = kdf::kdf2(self.chaining_key.as_bytes(), input.as_bytes());
        self.chaining_key = Secret32::new(ck);
        Secret32::new(key)
    }

    /// (ck, t, k) = KDF3(ck, psk); h = HASH(h || t)
    pub fn mix_key_and_hash(&mut self, psk: &Secret32) -> Secret32 {
        let (ck, mut temp_h, key) = kdf::kdf3(self.chaining_key.as_bytes(), psk.as_bytes());
        self.chaining_key = Secret32::new(ck);
        self.mix_hash(&temp_h);
        temp_h.zeroize();
        Secret32::new(key)
    }

    /// c = AEAD(k, 0, plaintext, h); h = HASH(h || c)
    ///
    /// Fails unless the ciphertext is exactly `N` bytes.
    pub fn encrypt_and_hash<const N: usize>(
        &mut self,
        key: &Secret32,
        plaintext: &[u8],
    ) -> Result<[u8; N], CryptoError> {
        let ciphertext: [u8; N] =
            aead::encrypt_fixed(key.as_bytes(), 0, plaintext, self.hash.as_bytes())?;
        self.mix_hash(&ciphertext);
        Ok(ciphertext)
    }

    /// p = AEAD-Decrypt(k, 0, c, h); h = HASH(h || c)
    ///
    /// The transcript is only advanced when authentication succeeds.
    pub fn decrypt_and_hash(&mut self, key: &Secret32, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let plaintext = aead::decrypt(key.as_bytes(), 0, ciphertext, self.hash.as_bytes())?;
        self.mix_hash(ciphertext);
        Ok(plaintext)
    }

    /// (T1, T2) = KDF2(ck, "") oriented for the given side
    pub fn split(&self, initiator: bool) -> TransportKeys {
        let (t1, t2) = kdf::kdf2(self.chaining_key.as_bytes(), &[]);
        let (t1, t2) = (Secret32::new(t1), Secret32::new(t2));
        if initiator {
            TransportKeys {
                sending_key: t1,
                receiving_key: t2,
            }
        } else {
            TransportKeys {
                sending_key: t2,
                receiving_key: t1,
            }
        }
    }

    /// True once both buffers have been wiped
    pub fn is_zeroed(&self) -> bool {
        self.chaining_key.is_zero() && self.hash.is_zero()
    }
}

/// Directional transport keys derived from a completed handshake
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct TransportKeys {
    pub sending_key: Secret32,
    pub receiving_key: Secret32,
}

impl std::fmt::Debug for TransportKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TransportKeys(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_deterministic() {
        let peer = [42u8; 32];
        let a = NoiseState::new(&peer);
        let b = NoiseState::new(&peer);
        assert!(a.chaining_key().ct_eq(b.chaining_key()));
        assert!(a.hash().ct_eq(b.hash()));
        assert!(!a.chaining_key().is_zero());

        let other = NoiseState::new(&[1u8; 32]);
        assert!(!a.hash().ct_eq(other.hash()));
    }

    #[test]
    fn test_mix_key_advances_chain() {
        let mut state = NoiseState::new(&[0u8; 32]);
        let before = state.chaining_key().clone();

        let key = state.mix_key(&Secret32::new([5u8; 32]));
        assert!(!state.chaining_key().ct_eq(&before));
        assert!(!key.is_zero());
    }

    #[test]
    fn test_encrypt_decrypt_and_hash() {
        let mut sender = NoiseState::new(&[0u8; 32]);
        let mut receiver = sender.clone();
        let key = Secret32::new([42u8; 32]);

        let ciphertext: [u8; 48] = sender.encrypt_and_hash(&key, &[9u8; 32]).unwrap();
        let plaintext = receiver.decrypt_and_hash(&key, &ciphertext).unwrap();

        assert_eq!(plaintext, vec![9u8; 32]);
        assert!(sender.hash().ct_eq(receiver.hash()));
    }

    #[test]
    fn test_failed_decrypt_leaves_transcript() {
        let mut sender = NoiseState::new(&[0u8; 32]);
        let mut receiver = sender.clone();
        let key = Secret32::new([42u8; 32]);

        let mut ciphertext: [u8; 28] = sender.encrypt_and_hash(&key, &[1u8; 12]).unwrap();
        ciphertext[3] ^= 0x01;
        let before = receiver.hash().clone();

        assert!(receiver.decrypt_and_hash(&key, &ciphertext).is_err());
        assert!(receiver.hash().ct_eq(&before));
    }

    #[test]
    fn test_split_is_directional() {
        let state = NoiseState::new(&[3u8; 32]);
        let initiator = state.split(true);
        let responder = state.split(false);

        assert!(initiator.sending_key.ct_eq(&responder.receiving_key));
        assert!(initiator.receiving_key.ct_eq(&responder.sending_key));
        assert!(!initiator.sending_key.ct_eq(&initiator.receiving_key));
    }

    #[test]
    fn test_zeroize() {
        let mut state = NoiseState::new(&[3u8; 32]);
        state.mix_hash(b"data");
        state.zeroize();
        assert!(state.is_zeroed());
    }
}
