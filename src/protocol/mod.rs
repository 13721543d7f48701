//! WireGuard protocol implementation
//!
//! This module contains the core protocol components:
//! - Message wire formats
//! - Handshake logic (Noise IKpsk2)
//! - Cookie/DoS protection
//! - Transport encryption and replay protection
//! - Rekey and keepalive timers
//! - Per-peer session management

pub mod cookie;
pub mod handshake;
pub mod messages;
pub mod session;
pub mod timers;
pub mod transport;

pub use cookie::{ChangingSecret, CookieChecker, CookieState, MacVerdict};
pub use handshake::{
    finalize_pair, process_initiation, Handshake, HandshakeResult, InitiatorHandshake,
    ReceivedInitiation, ResponderHandshake,
};
pub use messages::{
    CookieReply, HandshakeInitiation, HandshakeResponse, Message, MessageType, TransportData,
};
pub use session::{Peer, Session};
pub use timers::{Role, TimerAction, Timers};
pub use transport::{ReplayWindow, TransportState};
