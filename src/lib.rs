//! noiseguard - WireGuard handshake and transport core
//!
//! The cryptographic heart of a WireGuard endpoint without the I/O around
//! it: the Noise IKpsk2 handshake, cookie-based DoS protection, transport
//! data encryption with replay protection, and the rekey/keepalive timers.
//! Sockets, TUN devices and routing are left to the caller.
//!
//! # Features
//!
//! - Noise IKpsk2 handshake with optional preshared key
//! - mac1/mac2 verification and Cookie Replies under load
//! - 2000-packet sliding replay window
//! - Session rotation with current and previous keys
//! - Timer predicates driven by an explicit clock
//!
//! # Usage
//!
//! ```no_run
//! use std::time::Instant;
//! use noiseguard::crypto::StaticKeypair;
//! use noiseguard::protocol::{process_initiation, Peer};
//!
//! fn main() -> noiseguard::Result<()> {
//!     let alice = StaticKeypair::generate()?;
//!     let bob = StaticKeypair::generate()?;
//!     let now = Instant::now();
//!
//!     let mut a = Peer::new(alice.clone(), *bob.public(), None, None);
//!     let mut b = Peer::new(bob.clone(), *alice.public(), None, None);
//!
//!     let init = a.create_initiation(now)?;
//!     let response = b.consume_initiation(process_initiation(&bob, &init)?, now)?;
//!     for packet in a.consume_response(&response, now)? {
//!         b.decrypt(&packet, now)?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod protocol;

pub use config::NoiseGuardConfig;
pub use error::{NoiseGuardError, Result};
