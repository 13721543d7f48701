//! WireGuard handshake implementation
//!
//! Implements the Noise IKpsk2 handshake pattern for key exchange. The
//! initiator owns an [`InitiatorHandshake`] from the moment it sends message
//! 1; the responder turns a verified message 1 into a [`ReceivedInitiation`]
//! and then into a [`ResponderHandshake`] when it answers. Either side turns
//! its half into transport keys with `finalize`, which wipes every ephemeral
//! secret and the chaining key and hash transcript.
//!
//! Failed steps never touch the state they were called on: all work is done
//! on a copy of the symmetric state which is only committed once every AEAD
//! check has passed.

use zeroize::Zeroize;

use crate::crypto::noise::{NoiseState, TransportKeys};
use crate::crypto::random::{self, TIMESTAMP_LEN};
use crate::crypto::secret::Secret32;
use crate::crypto::x25519::{self, StaticKeypair};
use crate::error::{NoiseGuardError, ProtocolError};
use crate::protocol::cookie::{seal_macs, Cookie};
use crate::protocol::messages::{HandshakeInitiation, HandshakeResponse};

/// Where a peer's handshake currently stands
#[derive(Debug, Default)]
pub enum Handshake {
    /// No handshake in progress
    #[default]
    Idle,
    /// Initiation sent, waiting for the response
    InitiationSent(InitiatorHandshake),
    /// Initiation answered, waiting for the initiator's first transport packet
    InitiationReceived(ResponderHandshake),
    /// Transport keys derived and handshake secrets wiped
    Established,
}

impl Handshake {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::InitiationSent(_) => "InitiationSent",
            Self::InitiationReceived(_) => "InitiationReceived",
            Self::Established => "Established",
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::InitiationSent(_) | Self::InitiationReceived(_))
    }
}

/// Result of a successful handshake
#[derive(Debug, Clone)]
pub struct HandshakeResult {
    /// Our local session index
    pub local_index: u32,
    /// Peer's session index
    pub remote_index: u32,
    /// Directional transport keys
    pub keys: TransportKeys,
}

/// State for an in-progress handshake (initiator side)
pub struct InitiatorHandshake {
    peer_static: [u8; 32],
    psk: Secret32,
    sender_index: u32,
    ephemeral_private: Secret32,
    noise: NoiseState,
    last_mac1: Option<[u8; 16]>,
    remote_index: Option<u32>,
}

impl InitiatorHandshake {
    /// Prepare a handshake towards `peer_static`; an absent PSK is all zeros
    pub fn new(peer_static: [u8; 32], psk: Option<&Secret32>, sender_index: u32) -> Self {
        Self {
            peer_static,
            psk: psk.cloned().unwrap_or_else(Secret32::zero),
            sender_index,
            ephemeral_private: Secret32::zero(),
            noise: NoiseState::new(&peer_static),
            last_mac1: None,
            remote_index: None,
        }
    }

    pub fn sender_index(&self) -> u32 {
        self.sender_index
    }

    /// mac1 of the last initiation sent, needed to open a Cookie Reply
    pub fn last_mac1(&self) -> Option<&[u8; 16]> {
        self.last_mac1.as_ref()
    }

    /// BuildInitiation, stamped with the current TAI64N time
    pub fn create_initiation(
        &mut self,
        local: &StaticKeypair,
        cookie: Option<&Cookie>,
    ) -> Result<HandshakeInitiation, NoiseGuardError> {
        self.create_initiation_with_timestamp(local, cookie, &random::tai64n_now())
    }

    /// BuildInitiation with a caller-supplied timestamp
    ///
    /// Every call starts over from the initial chaining key with a fresh
    /// ephemeral key, so retries never reuse handshake state.
    pub fn create_initiation_with_timestamp(
        &mut self,
        local: &StaticKeypair,
        cookie: Option<&Cookie>,
        timestamp: &[u8; TIMESTAMP_LEN],
    ) -> Result<HandshakeInitiation, NoiseGuardError> {
        let mut noise = NoiseState::new(&self.peer_static);

        // e
        let (ephemeral_private, ephemeral_public) = x25519::generate_keypair()?;
        noise.mix_ephemeral(&ephemeral_public);

        // es
        let shared_es = x25519::dh(&ephemeral_private, &self.peer_static)?;
        let key = noise.mix_key(&shared_es);

        // s
        let encrypted_static: [u8; 48] = noise.encrypt_and_hash(&key, local.public())?;

        // ss
        let shared_ss = x25519::dh(local.private(), &self.peer_static)?;
        let key = noise.mix_key(&shared_ss);

        // {t}
        let encrypted_timestamp: [u8; 28] = noise.encrypt_and_hash(&key, timestamp)?;

        let mut msg = HandshakeInitiation {
            sender_index: self.sender_index,
            ephemeral_public,
            encrypted_static,
            encrypted_timestamp,
            mac1: [0u8; 16],
            mac2: [0u8; 16],
        };
        let mac1 = seal_macs(&mut msg, &self.peer_static, cookie);

        self.noise = noise;
        self.ephemeral_private = ephemeral_private;
        self.last_mac1 = Some(mac1);
        self.remote_index = None;

        tracing::debug!(
            "Created handshake initiation (sender index {}, cookie: {})",
            self.sender_index,
            cookie.is_some()
        );

        Ok(msg)
    }

    /// Consume the responder's message 2
    ///
    /// Leaves the handshake untouched on any failure, so a forged response
    /// cannot derail the real one.
    pub fn process_response(
        &mut self,
        local: &StaticKeypair,
        response: &HandshakeResponse,
    ) -> Result<(), NoiseGuardError> {
        if response.receiver_index != self.sender_index {
            return Err(ProtocolError::InvalidReceiverIndex {
                index: response.receiver_index,
            }
            .into());
        }
        if self.last_mac1.is_none() || self.remote_index.is_some() {
            return Err(ProtocolError::UnexpectedHandshakeState {
                expected: "InitiationSent",
            }
            .into());
        }

        let mut noise = self.noise.clone();

        // e
        noise.mix_ephemeral(&response.ephemeral_public);

        // ee
        let shared_ee = x25519::dh(&self.ephemeral_private, &response.ephemeral_public)?;
        noise.mix_chain(&shared_ee);

        // se
        let shared_se = x25519::dh(local.private(), &response.ephemeral_public)?;
        noise.mix_chain(&shared_se);

        // psk
        let key = noise.mix_key_and_hash(&self.psk);

        // {}
        noise
            .decrypt_and_hash(&key, &response.encrypted_nothing)
            .map_err(|_| ProtocolError::HandshakeAuthenticationFailed)?;

        self.noise = noise;
        self.remote_index = Some(response.sender_index);

        tracing::debug!(
            "Processed handshake response (local index {}, remote index {})",
            self.sender_index,
            response.sender_index
        );

        Ok(())
    }

    /// FinalizeSession: derive transport keys and wipe handshake secrets
    pub fn finalize(&mut self) -> Result<HandshakeResult, NoiseGuardError> {
        let remote_index = self
            .remote_index
            .filter(|_| !self.noise.is_zeroed())
            .ok_or(ProtocolError::UnexpectedHandshakeState {
                expected: "response processed",
            })?;

        let keys = self.noise.split(true);
        self.wipe();

        Ok(HandshakeResult {
            local_index: self.sender_index,
            remote_index,
            keys,
        })
    }

    fn wipe(&mut self) {
        self.noise.zeroize();
        self.ephemeral_private.zeroize();
        self.psk.zeroize();
    }

    /// True once the chaining key, hash and ephemeral key are all zero
    pub fn is_zeroed(&self) -> bool {
        self.noise.is_zeroed() && self.ephemeral_private.is_zero()
    }

    pub(crate) fn chaining_key(&self) -> &Secret32 {
        self.noise.chaining_key()
    }
}

impl std::fmt::Debug for InitiatorHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitiatorHandshake")
            .field("sender_index", &self.sender_index)
            .field("remote_index", &self.remote_index)
            .finish_non_exhaustive()
    }
}

/// A message 1 whose static key and timestamp have been authenticated
///
/// Produced by [`process_initiation`]. Nothing is committed to a peer yet:
/// the caller looks the peer up by [`ReceivedInitiation::remote_static`],
/// checks the timestamp against the last one accepted, and only then answers.
pub struct ReceivedInitiation {
    noise: NoiseState,
    remote_static: [u8; 32],
    remote_ephemeral: [u8; 32],
    remote_index: u32,
    timestamp: [u8; TIMESTAMP_LEN],
}

/// ProcessInitiation: authenticate message 1 addressed to `local`
pub fn process_initiation(
    local: &StaticKeypair,
    msg: &HandshakeInitiation,
) -> Result<ReceivedInitiation, NoiseGuardError> {
    let mut noise = NoiseState::new(local.public());

    // e
    noise.mix_ephemeral(&msg.ephemeral_public);

    // es
    let shared_es = x25519::dh(local.private(), &msg.ephemeral_public)?;
    let key = noise.mix_key(&shared_es);

    // s
    let mut decrypted = noise
        .decrypt_and_hash(&key, &msg.encrypted_static)
        .map_err(|_| ProtocolError::HandshakeAuthenticationFailed)?;
    let remote_static: [u8; 32] = decrypted
        .as_slice()
        .try_into()
        .map_err(|_| ProtocolError::HandshakeAuthenticationFailed)?;
    decrypted.zeroize();

    // ss
    let shared_ss = x25519::dh(local.private(), &remote_static)?;
    let key = noise.mix_key(&shared_ss);

    // {t}
    let decrypted = noise
        .decrypt_and_hash(&key, &msg.encrypted_timestamp)
        .map_err(|_| ProtocolError::HandshakeAuthenticationFailed)?;
    let timestamp: [u8; TIMESTAMP_LEN] = decrypted
        .as_slice()
        .try_into()
        .map_err(|_| ProtocolError::HandshakeAuthenticationFailed)?;

    tracing::debug!("Authenticated handshake initiation (sender index {})", msg.sender_index);

    Ok(ReceivedInitiation {
        noise,
        remote_static,
        remote_ephemeral: msg.ephemeral_public,
        remote_index: msg.sender_index,
        timestamp,
    })
}

impl ReceivedInitiation {
    /// Static public key the initiator proved it holds
    pub fn remote_static(&self) -> &[u8; 32] {
        &self.remote_static
    }

    /// Initiator's sender index
    pub fn remote_index(&self) -> u32 {
        self.remote_index
    }

    /// Decrypted TAI64N timestamp
    pub fn timestamp(&self) -> &[u8; TIMESTAMP_LEN] {
        &self.timestamp
    }

    /// BuildResponse: answer with message 2 and keep the responder state
    pub fn create_response(
        self,
        psk: Option<&Secret32>,
        local_index: u32,
        cookie: Option<&Cookie>,
    ) -> Result<(ResponderHandshake, HandshakeResponse), NoiseGuardError> {
        let Self {
            mut noise,
            remote_static,
            remote_ephemeral,
            remote_index,
            ..
        } = self;

        // e
        let (ephemeral_private, ephemeral_public) = x25519::generate_keypair()?;
        noise.mix_ephemeral(&ephemeral_public);

        // ee
        let shared_ee = x25519::dh(&ephemeral_private, &remote_ephemeral)?;
        noise.mix_chain(&shared_ee);

        // se
        let shared_se = x25519::dh(&ephemeral_private, &remote_static)?;
        noise.mix_chain(&shared_se);

        // psk
        let psk = psk.cloned().unwrap_or_else(Secret32::zero);
        let key = noise.mix_key_and_hash(&psk);

        // {}
        let encrypted_nothing: [u8; 16] = noise.encrypt_and_hash(&key, &[])?;

        let mut msg = HandshakeResponse {
            sender_index: local_index,
            receiver_index: remote_index,
            ephemeral_public,
            encrypted_nothing,
            mac1: [0u8; 16],
            mac2: [0u8; 16],
        };
        let last_mac1 = seal_macs(&mut msg, &remote_static, cookie);

        tracing::debug!(
            "Created handshake response (local index {}, remote index {})",
            local_index,
            remote_index
        );

        Ok((
            ResponderHandshake {
                noise,
                ephemeral_private,
                local_index,
                remote_index,
                last_mac1,
            },
            msg,
        ))
    }
}

impl std::fmt::Debug for ReceivedInitiation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceivedInitiation")
            .field("remote_static", &hex::encode(self.remote_static))
            .field("remote_index", &self.remote_index)
            .finish_non_exhaustive()
    }
}

/// State for an answered handshake (responder side)
pub struct ResponderHandshake {
    noise: NoiseState,
    ephemeral_private: Secret32,
    local_index: u32,
    remote_index: u32,
    last_mac1: [u8; 16],
}

impl ResponderHandshake {
    pub fn local_index(&self) -> u32 {
        self.local_index
    }

    pub fn remote_index(&self) -> u32 {
        self.remote_index
    }

    /// mac1 of the response we sent
    pub fn last_mac1(&self) -> &[u8; 16] {
        &self.last_mac1
    }

    /// Derive the transport keys this handshake would yield, leaving it intact
    ///
    /// Used to trial-decrypt the initiator's first packet before committing.
    pub fn derive_session(&self) -> Result<HandshakeResult, NoiseGuardError> {
        if self.noise.is_zeroed() {
            return Err(ProtocolError::UnexpectedHandshakeState {
                expected: "InitiationReceived",
            }
            .into());
        }

        Ok(HandshakeResult {
            local_index: self.local_index,
            remote_index: self.remote_index,
            keys: self.noise.split(false),
        })
    }

    /// FinalizeSession: derive transport keys and wipe handshake secrets
    pub fn finalize(&mut self) -> Result<HandshakeResult, NoiseGuardError> {
        let result = self.derive_session()?;
        self.wipe();
        Ok(result)
    }

    pub(crate) fn wipe(&mut self) {
        self.noise.zeroize();
        self.ephemeral_private.zeroize();
    }

    pub fn is_zeroed(&self) -> bool {
        self.noise.is_zeroed() && self.ephemeral_private.is_zero()
    }

    pub(crate) fn chaining_key(&self) -> &Secret32 {
        self.noise.chaining_key()
    }
}

impl std::fmt::Debug for ResponderHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponderHandshake")
            .field("local_index", &self.local_index)
            .field("remote_index", &self.remote_index)
            .finish_non_exhaustive()
    }
}

/// Finalize both halves of a handshake held in one process
///
/// The chaining keys are compared in constant time first. Both sides are
/// wiped whether or not they agree.
pub fn finalize_pair(
    initiator: &mut InitiatorHandshake,
    responder: &mut ResponderHandshake,
) -> Result<(HandshakeResult, HandshakeResult), NoiseGuardError> {
    if !initiator.chaining_key().ct_eq(responder.chaining_key()) {
        initiator.wipe();
        responder.wipe();
        tracing::error!("Chaining key mismatch, aborting handshake");
        return Err(ProtocolError::ChainingKeyMismatch.into());
    }

    let initiator_result = initiator.finalize();
    let responder_result = responder.finalize();
    Ok((initiator_result?, responder_result?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::cookie::compute_mac1;
    use crate::protocol::messages::MacMessage;

    struct Pair {
        alice: StaticKeypair,
        bob: StaticKeypair,
        psk: Secret32,
    }

    fn pair() -> Pair {
        Pair {
            alice: StaticKeypair::generate().unwrap(),
            bob: StaticKeypair::generate().unwrap(),
            psk: Secret32::new([0x5a; 32]),
        }
    }

    fn run(p: &Pair) -> (InitiatorHandshake, ResponderHandshake, HandshakeResponse) {
        let mut initiator = InitiatorHandshake::new(*p.bob.public(), Some(&p.psk), 1111);
        let init = initiator.create_initiation(&p.alice, None).unwrap();

        let received = process_initiation(&p.bob, &init).unwrap();
        assert_eq!(received.remote_static(), p.alice.public());
        assert_eq!(received.remote_index(), 1111);

        let (responder, response) = received
            .create_response(Some(&p.psk), 2222, None)
            .unwrap();
        initiator.process_response(&p.alice, &response).unwrap();
        (initiator, responder, response)
    }

    #[test]
    fn test_create_initiation() {
        let p = pair();
        let mut handshake = InitiatorHandshake::new(*p.bob.public(), None, 12345);

        let init = handshake.create_initiation(&p.alice, None).unwrap();

        assert_eq!(init.sender_index, 12345);
        assert!(!init.ephemeral_public.iter().all(|&b| b == 0));
        assert!(!init.mac1.iter().all(|&b| b == 0));
        assert!(init.mac2.iter().all(|&b| b == 0)); // No cookie, so zeros
        assert_eq!(handshake.last_mac1(), Some(&init.mac1));
        assert_eq!(init.to_bytes().len(), 148);

        let payload = init.encode();
        assert_eq!(
            compute_mac1(p.bob.public(), &payload[..HandshakeInitiation::MAC1_OFFSET]),
            init.mac1
        );
    }

    #[test]
    fn test_initiation_with_cookie() {
        let p = pair();
        let mut handshake = InitiatorHandshake::new(*p.bob.public(), None, 12345);

        let cookie = Cookie::new([42u8; 16]);
        let init = handshake.create_initiation(&p.alice, Some(&cookie)).unwrap();

        assert!(!init.mac2.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_full_handshake_keys_are_symmetric() {
        let p = pair();
        let (mut initiator, mut responder, response) = run(&p);
        assert_eq!(response.to_bytes().len(), 92);
        assert_eq!(response.receiver_index, 1111);

        let (i, r) = finalize_pair(&mut initiator, &mut responder).unwrap();

        assert_eq!(i.local_index, 1111);
        assert_eq!(i.remote_index, 2222);
        assert_eq!(r.local_index, 2222);
        assert_eq!(r.remote_index, 1111);
        assert!(i.keys.sending_key.ct_eq(&r.keys.receiving_key));
        assert!(i.keys.receiving_key.ct_eq(&r.keys.sending_key));
        assert!(!i.keys.sending_key.ct_eq(&i.keys.receiving_key));
    }

    #[test]
    fn test_finalize_zeroes_handshake_secrets() {
        let p = pair();
        let (mut initiator, mut responder, _) = run(&p);
        assert!(!initiator.is_zeroed());
        assert!(!responder.is_zeroed());

        initiator.finalize().unwrap();
        responder.finalize().unwrap();

        assert!(initiator.is_zeroed());
        assert!(responder.is_zeroed());
        assert!(initiator.finalize().is_err());
        assert!(responder.finalize().is_err());
    }

    #[test]
    fn test_derive_session_keeps_responder_state() {
        let p = pair();
        let (_, mut responder, _) = run(&p);

        let trial = responder.derive_session().unwrap();
        assert!(!responder.is_zeroed());

        let committed = responder.finalize().unwrap();
        assert_eq!(trial.local_index, committed.local_index);
        assert_eq!(trial.remote_index, committed.remote_index);
        assert_eq!(trial.keys.sending_key.as_bytes(), committed.keys.sending_key.as_bytes());
        assert_eq!(trial.keys.receiving_key.as_bytes(), committed.keys.receiving_key.as_bytes());
        assert!(responder.derive_session().is_err());
    }

    #[test]
    fn test_psk_mismatch_fails_response() {
        let p = pair();
        let mut initiator = InitiatorHandshake::new(*p.bob.public(), Some(&p.psk), 1);
        let init = initiator.create_initiation(&p.alice, None).unwrap();

        let received = process_initiation(&p.bob, &init).unwrap();
        let (_, response) = received.create_response(None, 2, None).unwrap();

        match initiator.process_response(&p.alice, &response) {
            Err(NoiseGuardError::Protocol(ProtocolError::HandshakeAuthenticationFailed)) => {}
            other => panic!("expected authentication failure, got {:?}", other),
        }
    }

    #[test]
    fn test_tampered_initiation_fields_rejected() {
        let p = pair();
        let mut initiator = InitiatorHandshake::new(*p.bob.public(), None, 1);
        let init = initiator.create_initiation(&p.alice, None).unwrap();

        let mut bad_static = init.clone();
        bad_static.encrypted_static[10] ^= 0x01;
        let mut bad_timestamp = init.clone();
        bad_timestamp.encrypted_timestamp[27] ^= 0x80;
        let mut bad_ephemeral = init.clone();
        bad_ephemeral.ephemeral_public[0] ^= 0x01;

        for msg in [bad_static, bad_timestamp, bad_ephemeral] {
            match process_initiation(&p.bob, &msg) {
                Err(NoiseGuardError::Protocol(ProtocolError::HandshakeAuthenticationFailed)) => {}
                other => panic!("expected authentication failure, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_initiation_to_wrong_responder_rejected() {
        let p = pair();
        let carol = StaticKeypair::generate().unwrap();
        let mut initiator = InitiatorHandshake::new(*p.bob.public(), None, 1);
        let init = initiator.create_initiation(&p.alice, None).unwrap();

        assert!(process_initiation(&carol, &init).is_err());
    }

    #[test]
    fn test_tampered_response_leaves_state() {
        let p = pair();
        let mut initiator = InitiatorHandshake::new(*p.bob.public(), None, 1);
        let init = initiator.create_initiation(&p.alice, None).unwrap();
        let received = process_initiation(&p.bob, &init).unwrap();
        let (mut responder, response) = received.create_response(None, 2, None).unwrap();

        let mut forged = response.clone();
        forged.encrypted_nothing[0] ^= 0x01;
        assert!(initiator.process_response(&p.alice, &forged).is_err());

        // The genuine response still completes the handshake
        initiator.process_response(&p.alice, &response).unwrap();
        assert!(finalize_pair(&mut initiator, &mut responder).is_ok());
    }

    #[test]
    fn test_response_with_wrong_receiver_index() {
        let p = pair();
        let mut initiator = InitiatorHandshake::new(*p.bob.public(), None, 1);
        let init = initiator.create_initiation(&p.alice, None).unwrap();
        let received = process_initiation(&p.bob, &init).unwrap();
        let (_, mut response) = received.create_response(None, 2, None).unwrap();

        response.receiver_index = 99;
        match initiator.process_response(&p.alice, &response) {
            Err(NoiseGuardError::Protocol(ProtocolError::InvalidReceiverIndex { index })) => {
                assert_eq!(index, 99)
            }
            other => panic!("expected index mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_response_before_initiation() {
        let p = pair();
        let mut initiator = InitiatorHandshake::new(*p.bob.public(), None, 1);
        let response = HandshakeResponse {
            sender_index: 2,
            receiver_index: 1,
            ephemeral_public: [9u8; 32],
            encrypted_nothing: [0u8; 16],
            mac1: [0u8; 16],
            mac2: [0u8; 16],
        };
        assert!(initiator.process_response(&p.alice, &response).is_err());
    }

    #[test]
    fn test_chaining_key_mismatch_detected() {
        let p = pair();
        let (mut initiator, _, _) = run(&p);
        let (_, mut other_responder, _) = run(&p);

        match finalize_pair(&mut initiator, &mut other_responder) {
            Err(NoiseGuardError::Protocol(ProtocolError::ChainingKeyMismatch)) => {}
            other => panic!("expected chaining key mismatch, got {:?}", other),
        }
        assert!(initiator.is_zeroed());
        assert!(other_responder.is_zeroed());
    }

    #[test]
    fn test_timestamp_round_trips() {
        let p = pair();
        let timestamp = [0x40, 0, 0, 0, 0x65, 0, 0, 1, 0, 0, 0, 7];
        let mut initiator = InitiatorHandshake::new(*p.bob.public(), None, 1);
        let init = initiator
            .create_initiation_with_timestamp(&p.alice, None, &timestamp)
            .unwrap();

        let received = process_initiation(&p.bob, &init).unwrap();
        assert_eq!(received.timestamp(), &timestamp);
    }

    #[test]
    fn test_handshake_names() {
        assert_eq!(Handshake::default().name(), "Idle");
        assert!(!Handshake::Established.is_in_progress());
    }
}
