//! Rekey and keepalive timers
//!
//! Nothing here blocks or schedules. The owner feeds packet and handshake
//! events in and asks [`Timers::poll`] what, if anything, is due at a given
//! instant.

use std::time::{Duration, Instant};

use rand::Rng;

/// Retry an unanswered initiation after this long (plus jitter)
pub const REKEY_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound of the random jitter added to `REKEY_TIMEOUT`
pub const REKEY_TIMEOUT_JITTER_MAX: Duration = Duration::from_millis(333);

/// Send a keepalive if a packet was received but nothing sent back for this long
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Initiator rekeys sessions older than this
pub const REKEY_AFTER_TIME: Duration = Duration::from_secs(120);

/// Sessions older than this are unusable
pub const REJECT_AFTER_TIME: Duration = Duration::from_secs(180);

/// Give up retrying a handshake after this long
pub const REKEY_ATTEMPT_TIME: Duration = Duration::from_secs(90);

/// Rekey once this many messages were sent under one key (2^64 - 2^16 - 1)
pub const REKEY_AFTER_MESSAGES: u64 = u64::MAX - (1 << 16);

/// Hard limit on messages under one key (2^64 - 2^4 - 1)
pub const REJECT_AFTER_MESSAGES: u64 = u64::MAX - (1 << 4);

/// Minimum spacing of initiations accepted from one peer
pub const HANDSHAKE_INITIATION_RATE: Duration = Duration::from_millis(50);

/// Wipe all key material after this long without a new key exchange
pub const ZERO_KEYS_AFTER: Duration = Duration::from_secs(3 * 180);

/// Which side of the handshake produced the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Direction of the last authenticated data packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No data since the session was established
    Waiting,
    Sent,
    Received,
}

/// Why a new handshake is due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RekeyReason {
    /// Data went out and nothing came back
    Unanswered,
    /// Session key reached its age limit
    SessionAge,
    /// Session key reached its message limit
    MessageCount,
}

/// Something the owner should do now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// Resend the handshake initiation
    RetryInitiation,
    /// Start a fresh handshake
    InitiateHandshake(RekeyReason),
    /// Send an empty transport packet
    SendKeepalive,
    /// Stop retrying and drop queued packets
    GiveUp,
    /// Destroy all ephemeral and session key material
    ZeroKeys,
}

/// Per-peer timer state
#[derive(Debug, Clone)]
pub struct Timers {
    role: Option<Role>,
    phase: SessionPhase,
    session_established: Option<Instant>,
    last_key_exchange: Option<Instant>,
    handshake_started: Option<Instant>,
    attempts_started: Option<Instant>,
    awaiting_response: bool,
    retry_jitter: Duration,
    last_sent: Option<Instant>,
    last_received: Option<Instant>,
    first_unanswered_send: Option<Instant>,
    packets_sent: u64,
    persistent_keepalive: Option<Duration>,
}

impl Default for Timers {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Timers {
    pub fn new(persistent_keepalive: Option<Duration>) -> Self {
        Self {
            role: None,
            phase: SessionPhase::Waiting,
            session_established: None,
            last_key_exchange: None,
            handshake_started: None,
            attempts_started: None,
            awaiting_response: false,
            retry_jitter: Duration::ZERO,
            last_sent: None,
            last_received: None,
            first_unanswered_send: None,
            packets_sent: 0,
            persistent_keepalive,
        }
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    pub fn awaiting_response(&self) -> bool {
        self.awaiting_response
    }

    /// Age of the current session key
    pub fn session_age(&self, now: Instant) -> Option<Duration> {
        self.session_established
            .map(|at| now.saturating_duration_since(at))
    }

    fn since(at: Option<Instant>, now: Instant) -> Option<Duration> {
        at.map(|at| now.saturating_duration_since(at))
    }

    // ---- events ----

    /// An initiation was just sent
    pub fn on_handshake_initiated(&mut self, now: Instant) {
        if self.attempts_started.is_none() {
            self.attempts_started = Some(now);
        }
        self.handshake_started = Some(now);
        self.awaiting_response = true;
        self.retry_jitter = Duration::from_millis(
            rand::thread_rng().gen_range(0..=REKEY_TIMEOUT_JITTER_MAX.as_millis() as u64),
        );
    }

    /// Transport keys were derived for a new session
    pub fn on_session_established(&mut self, role: Role, now: Instant) {
        self.role = Some(role);
        self.phase = SessionPhase::Waiting;
        self.session_established = Some(now);
        self.last_key_exchange = Some(now);
        self.attempts_started = None;
        self.awaiting_response = false;
        self.first_unanswered_send = None;
        self.packets_sent = 0;
    }

    /// An authenticated transport packet was sent; empty payloads are keepalives
    pub fn on_packet_sent(&mut self, keepalive: bool, now: Instant) {
        self.last_sent = Some(now);
        self.packets_sent = self.packets_sent.saturating_add(1);
        if !keepalive {
            self.phase = SessionPhase::Sent;
            if self.first_unanswered_send.is_none() {
                self.first_unanswered_send = Some(now);
            }
        }
    }

    /// An authenticated transport packet was received
    pub fn on_packet_received(&mut self, keepalive: bool, now: Instant) {
        self.last_received = Some(now);
        self.first_unanswered_send = None;
        if !keepalive {
            self.phase = SessionPhase::Received;
        }
    }

    /// A packet was explicitly queued for sending; restarts the attempt budget
    pub fn on_packet_queued(&mut self, now: Instant) {
        if self.attempts_started.is_some() {
            self.attempts_started = Some(now);
        }
    }

    /// Retries abandoned
    pub fn on_give_up(&mut self) {
        self.attempts_started = None;
        self.awaiting_response = false;
    }

    /// Key material destroyed
    pub fn on_keys_zeroed(&mut self) {
        self.role = None;
        self.phase = SessionPhase::Waiting;
        self.session_established = None;
        self.last_key_exchange = None;
        self.handshake_started = None;
        self.attempts_started = None;
        self.awaiting_response = false;
        self.first_unanswered_send = None;
        self.packets_sent = 0;
    }

    // ---- predicates ----

    /// Handshakes are initiated at most once per `REKEY_TIMEOUT`
    pub fn can_initiate(&self, now: Instant) -> bool {
        Self::since(self.handshake_started, now).map_or(true, |d| d >= REKEY_TIMEOUT)
    }

    /// Unanswered initiation older than `REKEY_TIMEOUT + jitter`
    pub fn should_retry_initiation(&self, now: Instant) -> bool {
        self.awaiting_response
            && Self::since(self.handshake_started, now)
                .map_or(false, |d| d >= REKEY_TIMEOUT + self.retry_jitter)
    }

    /// Data received, nothing sent back within `KEEPALIVE_TIMEOUT`
    pub fn should_send_keepalive(&self, now: Instant) -> bool {
        if self.session_established.is_none() {
            return false;
        }
        let unanswered = match (self.last_received, self.last_sent) {
            (Some(received), Some(sent)) => sent < received,
            (Some(_), None) => true,
            _ => false,
        };
        if self.phase == SessionPhase::Received
            && unanswered
            && Self::since(self.last_received, now).map_or(false, |d| d >= KEEPALIVE_TIMEOUT)
        {
            return true;
        }
        match self.persistent_keepalive {
            Some(interval) => {
                let idle_since = self.last_sent.or(self.session_established);
                Self::since(idle_since, now).map_or(false, |d| d >= interval)
            }
            None => false,
        }
    }

    /// Data sent, nothing received for `KEEPALIVE_TIMEOUT + REKEY_TIMEOUT`
    pub fn should_initiate_after_silence(&self, now: Instant) -> bool {
        Self::since(self.first_unanswered_send, now)
            .map_or(false, |d| d >= KEEPALIVE_TIMEOUT + REKEY_TIMEOUT)
    }

    /// Age- or count-based rekey; responders never rekey on age alone, and
    /// an idle session is left to expire
    pub fn rekey_due(&self, now: Instant) -> Option<RekeyReason> {
        let age = self.session_age(now)?;
        if self.packets_sent >= REKEY_AFTER_MESSAGES {
            return Some(RekeyReason::MessageCount);
        }
        if self.role != Some(Role::Initiator) || self.phase == SessionPhase::Waiting {
            return None;
        }
        let threshold = match self.phase {
            SessionPhase::Received => REKEY_AFTER_TIME - KEEPALIVE_TIMEOUT - REKEY_TIMEOUT,
            _ => REKEY_AFTER_TIME,
        };
        (age >= threshold).then_some(RekeyReason::SessionAge)
    }

    /// Transport packets under this key must be dropped
    pub fn should_drop_packet(&self, counter: u64, now: Instant) -> bool {
        counter >= REJECT_AFTER_MESSAGES
            || self.session_age(now).map_or(true, |age| age >= REJECT_AFTER_TIME)
    }

    /// Retries have run for `REKEY_ATTEMPT_TIME` without success
    pub fn should_give_up(&self, now: Instant) -> bool {
        Self::since(self.attempts_started, now).map_or(false, |d| d >= REKEY_ATTEMPT_TIME)
    }

    /// No new keys for `3 * REJECT_AFTER_TIME`
    pub fn should_zero_keys(&self, now: Instant) -> bool {
        Self::since(self.last_key_exchange, now).map_or(false, |d| d >= ZERO_KEYS_AFTER)
    }

    /// Everything due at `now`
    ///
    /// Zeroing keys and giving up are returned alone; nothing else applies
    /// once either is due.
    pub fn poll(&self, now: Instant) -> Vec<TimerAction> {
        let mut actions = Vec::new();

        if self.should_zero_keys(now) {
            actions.push(TimerAction::ZeroKeys);
            return actions;
        }
        if self.should_give_up(now) {
            actions.push(TimerAction::GiveUp);
            return actions;
        }

        if self.awaiting_response {
            if self.should_retry_initiation(now) {
                actions.push(TimerAction::RetryInitiation);
            }
        } else if self.can_initiate(now) {
            if self.should_initiate_after_silence(now) {
                actions.push(TimerAction::InitiateHandshake(RekeyReason::Unanswered));
            } else if let Some(reason) = self.rekey_due(now) {
                actions.push(TimerAction::InitiateHandshake(reason));
            }
        }

        if self.should_send_keepalive(now) {
            actions.push(TimerAction::SendKeepalive);
        }

        actions
    }

    #[cfg(test)]
    pub(crate) fn set_packets_sent(&mut self, packets: u64) {
        self.packets_sent = packets;
    }
}
