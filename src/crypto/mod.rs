//! Cryptographic primitives for the handshake core
//!
//! - BLAKE2s hashing, HMAC and MAC (blake2s)
//! - KDF1/KDF2/KDF3 chaining-key derivation (kdf)
//! - ChaCha20-Poly1305 and XChaCha20-Poly1305 AEAD (aead)
//! - X25519 Diffie-Hellman key exchange (x25519)
//! - Noise IKpsk2 symmetric state (noise)
//! - Entropy and TAI64N timestamps (random)
//! - Zero-on-drop key buffers (secret)

pub mod aead;
pub mod blake2s;
pub mod kdf;
pub mod noise;
pub mod random;
pub mod secret;
pub mod x25519;

pub use noise::{NoiseState, TransportKeys};
pub use secret::{Secret, Secret32};
pub use x25519::StaticKeypair;
