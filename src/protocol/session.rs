//! Per-peer session state
//!
//! A [`Peer`] ties together the handshake state machine, the current and
//! previous transport sessions, the stored cookie, the timers and a bounded
//! queue of packets waiting for a session. All methods take `&mut self`; callers
//! serialize access per peer.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::crypto::random::TIMESTAMP_LEN;
use crate::crypto::secret::Secret32;
use crate::crypto::x25519::StaticKeypair;
use crate::error::{NoiseGuardError, ProtocolError};
use crate::protocol::cookie::CookieState;
use crate::protocol::handshake::{
    Handshake, HandshakeResult, InitiatorHandshake, ReceivedInitiation,
};
use crate::protocol::messages::{
    CookieReply, HandshakeInitiation, HandshakeResponse, Message, TransportData,
};
use crate::protocol::timers::{
    Role, TimerAction, Timers, HANDSHAKE_INITIATION_RATE, REJECT_AFTER_TIME,
};
use crate::protocol::transport::TransportState;

/// Packets held while no session is usable
pub const MAX_QUEUED_PACKETS: usize = 1024;

/// Session state for an established WireGuard connection
#[derive(Debug)]
pub struct Session {
    /// Our local session index
    pub local_index: u32,
    /// Peer's session index
    pub remote_index: u32,
    /// Transport encryption state
    pub transport: TransportState,
    /// When the keys were derived
    pub created_at: Instant,
    /// Which side initiated the handshake
    pub role: Role,
}

impl Session {
    pub fn new(result: HandshakeResult, role: Role, now: Instant) -> Self {
        Self {
            local_index: result.local_index,
            remote_index: result.remote_index,
            transport: TransportState::new(result.keys),
            created_at: now,
            role,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// Check if this session is expired and should be rejected
    pub fn is_expired(&self, now: Instant) -> bool {
        self.age(now) >= REJECT_AFTER_TIME
    }
}

/// Generate a random sender index
pub fn generate_sender_index() -> u32 {
    use rand::Rng;
    rand::thread_rng().gen()
}

/// Everything the local endpoint knows about one remote peer
pub struct Peer {
    local: StaticKeypair,
    remote_static: [u8; 32],
    psk: Option<Secret32>,
    handshake: Handshake,
    current: Option<Session>,
    previous: Option<Session>,
    cookie: CookieState,
    timers: Timers,
    last_timestamp: Option<[u8; TIMESTAMP_LEN]>,
    last_initiation_consumed: Option<Instant>,
    queue: VecDeque<Vec<u8>>,
}

impl Peer {
    pub fn new(
        local: StaticKeypair,
        remote_static: [u8; 32],
        psk: Option<Secret32>,
        persistent_keepalive: Option<Duration>,
    ) -> Self {
        Self {
            local,
            remote_static,
            psk,
            handshake: Handshake::Idle,
            current: None,
            previous: None,
            cookie: CookieState::new(),
            timers: Timers::new(persistent_keepalive),
            last_timestamp: None,
            last_initiation_consumed: None,
            queue: VecDeque::new(),
        }
    }

    pub fn remote_static(&self) -> &[u8; 32] {
        &self.remote_static
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    pub fn previous(&self) -> Option<&Session> {
        self.previous.as_ref()
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// True if the current session can still carry data at `now`
    pub fn has_usable_session(&self, now: Instant) -> bool {
        self.current
            .as_ref()
            .map_or(false, |s| !self.timers.should_drop_packet(s.transport.sending_counter(), now))
    }

    /// Start (or restart) a handshake towards this peer
    pub fn create_initiation(&mut self, now: Instant) -> Result<HandshakeInitiation, NoiseGuardError> {
        if !self.timers.can_initiate(now) {
            return Err(ProtocolError::RateLimited.into());
        }

        let mut handshake =
            InitiatorHandshake::new(self.remote_static, self.psk.as_ref(), generate_sender_index());
        let msg = handshake.create_initiation(&self.local, self.cookie.cookie_at(now))?;

        self.handshake = Handshake::InitiationSent(handshake);
        self.timers.on_handshake_initiated(now);

        tracing::info!("Sending handshake initiation (sender index {})", msg.sender_index);
        Ok(msg)
    }

    /// Answer an authenticated initiation from this peer
    ///
    /// The initiation must carry a timestamp newer than any accepted before
    /// and must not follow the previous one within `HANDSHAKE_INITIATION_RATE`.
    /// Nothing changes if it is refused.
    pub fn consume_initiation(
        &mut self,
        received: ReceivedInitiation,
        now: Instant,
    ) -> Result<HandshakeResponse, NoiseGuardError> {
        if received.remote_static() != &self.remote_static {
            return Err(ProtocolError::UnknownPeer.into());
        }
        if let Some(last) = &self.last_timestamp {
            if received.timestamp() <= last {
                tracing::debug!("Dropping initiation with stale timestamp");
                return Err(ProtocolError::StaleTimestamp.into());
            }
        }
        if let Some(at) = self.last_initiation_consumed {
            if now.saturating_duration_since(at) < HANDSHAKE_INITIATION_RATE {
                return Err(ProtocolError::RateLimited.into());
            }
        }

        let timestamp = *received.timestamp();
        let (responder, msg) = received.create_response(
            self.psk.as_ref(),
            generate_sender_index(),
            self.cookie.cookie_at(now),
        )?;

        self.last_timestamp = Some(timestamp);
        self.last_initiation_consumed = Some(now);
        self.handshake = Handshake::InitiationReceived(responder);

        tracing::info!(
            "Sending handshake response (local index {}, remote index {})",
            msg.sender_index,
            msg.receiver_index
        );
        Ok(msg)
    }

    /// Complete our handshake with the peer's response
    ///
    /// Returns queued packets encrypted under the new session, or a single
    /// keepalive if nothing was waiting so the responder can confirm the keys.
    pub fn consume_response(
        &mut self,
        response: &HandshakeResponse,
        now: Instant,
    ) -> Result<Vec<TransportData>, NoiseGuardError> {
        let initiator = match &mut self.handshake {
            Handshake::InitiationSent(initiator) => initiator,
            _ => {
                return Err(ProtocolError::UnexpectedHandshakeState {
                    expected: "InitiationSent",
                }
                .into())
            }
        };

        initiator.process_response(&self.local, response)?;
        let result = initiator.finalize()?;
        self.handshake = Handshake::Established;

        self.install(Session::new(result, Role::Initiator, now));
        self.timers.on_session_established(Role::Initiator, now);

        if self.queue.is_empty() {
            self.queue.push_back(Vec::new());
        }
        self.flush_queue(now)
    }

    /// Store the cookie from a Cookie Reply to our last handshake message
    pub fn consume_cookie_reply(&mut self, reply: &CookieReply, now: Instant) -> Result<(), NoiseGuardError> {
        let (index, mac1) = match &self.handshake {
            Handshake::InitiationSent(h) => match h.last_mac1() {
                Some(mac1) => (h.sender_index(), *mac1),
                None => {
                    return Err(ProtocolError::UnexpectedHandshakeState {
                        expected: "InitiationSent",
                    }
                    .into())
                }
            },
            Handshake::InitiationReceived(h) => (h.local_index(), *h.last_mac1()),
            _ => {
                return Err(ProtocolError::UnexpectedHandshakeState {
                    expected: "handshake in progress",
                }
                .into())
            }
        };

        if reply.receiver_index != index {
            return Err(ProtocolError::InvalidReceiverIndex {
                index: reply.receiver_index,
            }
            .into());
        }

        self.cookie
            .process_cookie_reply(reply, &mac1, &self.remote_static, now)
    }

    /// Encrypt one packet under the current session
    pub fn encrypt(&mut self, payload: &[u8], now: Instant) -> Result<TransportData, NoiseGuardError> {
        let session = self.current.as_mut().ok_or(ProtocolError::NoSession)?;
        if self
            .timers
            .should_drop_packet(session.transport.sending_counter(), now)
        {
            return Err(if session.is_expired(now) {
                ProtocolError::SessionExpired
            } else {
                ProtocolError::CounterExhausted
            }
            .into());
        }

        let msg = session.transport.encrypt(session.remote_index, payload)?;
        self.timers.on_packet_sent(payload.is_empty(), now);

        tracing::trace!("Encrypted packet (counter {}, {} bytes)", msg.counter, payload.len());
        Ok(msg)
    }

    /// Hold a packet until a session is available
    ///
    /// The oldest packet is dropped once `MAX_QUEUED_PACKETS` are waiting.
    /// Returns an initiation if one should be sent now.
    pub fn queue_packet(
        &mut self,
        payload: Vec<u8>,
        now: Instant,
    ) -> Result<Option<HandshakeInitiation>, NoiseGuardError> {
        if self.queue.len() >= MAX_QUEUED_PACKETS {
            self.queue.pop_front();
            tracing::debug!("Outbound queue full, dropped oldest packet");
        }
        self.queue.push_back(payload);
        self.timers.on_packet_queued(now);

        if self.handshake.is_in_progress() || !self.timers.can_initiate(now) {
            return Ok(None);
        }
        self.create_initiation(now).map(Some)
    }

    /// Encrypt everything waiting in the queue under the current session
    pub fn flush_queue(&mut self, now: Instant) -> Result<Vec<TransportData>, NoiseGuardError> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some(payload) = self.queue.pop_front() {
            match self.encrypt(&payload, now) {
                Ok(msg) => out.push(msg),
                Err(e) => {
                    self.queue.push_front(payload);
                    return Err(e);
                }
            }
        }
        Ok(out)
    }

    /// Decrypt a transport packet addressed to one of our sessions
    ///
    /// A packet under a responder's pending handshake is tried against the
    /// keys that handshake would yield. The handshake is only wiped and the
    /// session installed once that packet authenticates.
    pub fn decrypt(&mut self, msg: &TransportData, now: Instant) -> Result<Vec<u8>, NoiseGuardError> {
        let index = msg.receiver_index;

        if let Handshake::InitiationReceived(responder) = &mut self.handshake {
            if responder.local_index() == index {
                let mut session = Session::new(responder.derive_session()?, Role::Responder, now);
                let plaintext = session.transport.decrypt(msg)?;
                responder.wipe();

                self.handshake = Handshake::Established;
                self.install(session);
                self.timers.on_session_established(Role::Responder, now);
                self.timers.on_packet_received(plaintext.is_empty(), now);
                return Ok(plaintext);
            }
        }

        let session = [self.current.as_mut(), self.previous.as_mut()]
            .into_iter()
            .flatten()
            .find(|s| s.local_index == index)
            .ok_or(ProtocolError::InvalidReceiverIndex { index })?;

        if session.is_expired(now) {
            return Err(ProtocolError::SessionExpired.into());
        }
        let plaintext = session.transport.decrypt(msg)?;
        self.timers.on_packet_received(plaintext.is_empty(), now);

        Ok(plaintext)
    }

    fn install(&mut self, session: Session) {
        tracing::info!(
            "Session established (local index {}, remote index {}, {:?})",
            session.local_index,
            session.remote_index,
            session.role
        );
        self.previous = self.current.replace(session);
    }

    /// Apply whatever the timers say is due at `now`
    ///
    /// Returns the messages that should be sent to the peer.
    pub fn tick(&mut self, now: Instant) -> Result<Vec<Message>, NoiseGuardError> {
        let mut out = Vec::new();

        for action in self.timers.poll(now) {
            match action {
                TimerAction::ZeroKeys => self.zero_keys(),
                TimerAction::GiveUp => {
                    tracing::info!(
                        "Handshake did not complete, dropping {} queued packets",
                        self.queue.len()
                    );
                    self.queue.clear();
                    self.handshake = Handshake::Idle;
                    self.timers.on_give_up();
                }
                TimerAction::RetryInitiation | TimerAction::InitiateHandshake(_) => {
                    tracing::debug!("Timer fired: {:?}", action);
                    out.push(Message::HandshakeInitiation(self.create_initiation(now)?));
                }
                TimerAction::SendKeepalive => {
                    if self.has_usable_session(now) {
                        out.push(Message::TransportData(self.encrypt(&[], now)?));
                    }
                }
            }
        }

        Ok(out)
    }

    /// Destroy every session and handshake secret held for this peer
    pub fn zero_keys(&mut self) {
        self.current = None;
        self.previous = None;
        self.handshake = Handshake::Idle;
        self.cookie.clear();
        self.timers.on_keys_zeroed();
        tracing::info!("Zeroed all key material");
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("remote_static", &hex::encode(self.remote_static))
            .field("handshake", &self.handshake.name())
            .field("current", &self.current.as_ref().map(|s| s.local_index))
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}
