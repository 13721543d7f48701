//! Configuration parsing for noiseguard
//!
//! This module handles the key-material subset of WireGuard `.conf` files.

mod parser;

pub use parser::{encode_key, parse_key, InterfaceConfig, NoiseGuardConfig, PeerConfig};
