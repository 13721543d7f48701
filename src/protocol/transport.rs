//! Transport data encryption and replay protection
//!
//! Packets are padded to a multiple of 16 bytes and sealed with
//! ChaCha20-Poly1305 under the session's sending key, using the 64-bit
//! sending counter as nonce and no associated data.

use std::collections::BTreeSet;

use crate::crypto::aead;
use crate::crypto::noise::TransportKeys;
use crate::error::{NoiseGuardError, ProtocolError};
use crate::protocol::messages::TransportData;
use crate::protocol::timers::REJECT_AFTER_MESSAGES;

/// Number of counters below the greatest one that are still tracked
pub const REPLAY_WINDOW: u64 = 2000;

/// Plaintext is padded to a multiple of this
pub const PADDING_MULTIPLE: usize = 16;

/// Sliding-window nonce tracker
///
/// Counters are accepted at most once. Anything more than `REPLAY_WINDOW`
/// below the greatest counter seen is rejected outright, and `seen` never
/// holds entries older than that.
#[derive(Debug, Clone, Default)]
pub struct ReplayWindow {
    greatest_counter: u64,
    seen: BTreeSet<u64>,
}

impl ReplayWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn greatest_counter(&self) -> u64 {
        self.greatest_counter
    }

    /// Lowest counter that can still be admitted
    fn floor(&self) -> u64 {
        self.greatest_counter.saturating_sub(REPLAY_WINDOW)
    }

    /// Check a counter without recording it
    pub fn check(&self, counter: u64) -> Result<(), ProtocolError> {
        if counter < self.floor() || self.seen.contains(&counter) {
            return Err(ProtocolError::ReplayRejected { counter });
        }
        Ok(())
    }

    /// Admit(counter): record a counter, rejecting duplicates and stale values
    pub fn admit(&mut self, counter: u64) -> Result<(), ProtocolError> {
        self.check(counter)?;

        self.seen.insert(counter);
        if counter > self.greatest_counter {
            self.greatest_counter = counter;
            let floor = self.floor();
            self.seen = self.seen.split_off(&floor);
        }
        Ok(())
    }

    /// Number of counters currently remembered
    pub fn tracked(&self) -> usize {
        self.seen.len()
    }
}

/// Pad with trailing zeros to a multiple of 16 bytes
pub fn pad(plaintext: &[u8]) -> Vec<u8> {
    let padded_len = plaintext.len().div_ceil(PADDING_MULTIPLE) * PADDING_MULTIPLE;
    let mut padded = Vec::with_capacity(padded_len);
    padded.extend_from_slice(plaintext);
    padded.resize(padded_len, 0);
    padded
}

/// Transport keys and counters of one established session
#[derive(Debug)]
pub struct TransportState {
    keys: TransportKeys,
    sending_counter: u64,
    replay_window: ReplayWindow,
}

impl TransportState {
    /// Counters start at zero on both directions
    pub fn new(keys: TransportKeys) -> Self {
        Self {
            keys,
            sending_counter: 0,
            replay_window: ReplayWindow::new(),
        }
    }

    pub fn sending_counter(&self) -> u64 {
        self.sending_counter
    }

    /// EncryptPacket: seal `plaintext` for `receiver_index` and advance the counter
    pub fn encrypt(
        &mut self,
        receiver_index: u32,
        plaintext: &[u8],
    ) -> Result<TransportData, NoiseGuardError> {
        let counter = self.sending_counter;
        if counter >= REJECT_AFTER_MESSAGES {
            return Err(ProtocolError::CounterExhausted.into());
        }

        let encrypted_packet = aead::encrypt(self.keys.sending_key.as_bytes(), counter, &pad(plaintext), &[])?;
        self.sending_counter += 1;

        Ok(TransportData {
            receiver_index,
            counter,
            encrypted_packet,
        })
    }

    /// DecryptPacket: replay check, then authenticate and decrypt
    ///
    /// A rejected counter fails before any decryption is attempted. The
    /// counter is only recorded once the packet authenticates, so forged
    /// packets cannot burn counters.
    pub fn decrypt(&mut self, msg: &TransportData) -> Result<Vec<u8>, NoiseGuardError> {
        if msg.counter >= REJECT_AFTER_MESSAGES {
            return Err(ProtocolError::ReplayRejected { counter: msg.counter }.into());
        }
        self.replay_window.check(msg.counter)?;

        let plaintext = aead::decrypt(
            self.keys.receiving_key.as_bytes(),
            msg.counter,
            &msg.encrypted_packet,
            &[],
        )?;

        self.replay_window.admit(msg.counter)?;
        Ok(plaintext)
    }

    #[cfg(test)]
    pub(crate) fn set_sending_counter(&mut self, counter: u64) {
        self.sending_counter = counter;
    }
}
