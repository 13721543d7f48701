//! Cookie/MAC handling for DoS mitigation
//!
//! Every handshake message carries `mac1`, keyed by the receiver's static
//! public key, so a receiver can cheaply drop traffic from anyone who does
//! not know who it is talking to. Under load a responder also demands
//! `mac2`, keyed by a cookie it hands out in a Cookie Reply. The cookie is a
//! MAC of the sender's address under a secret that is rotated every two
//! minutes, so holding one proves the sender can receive at that address.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use zeroize::Zeroize;

use crate::crypto::secret::{Secret, Secret32};
use crate::crypto::{aead, blake2s, noise, random};
use crate::error::{CryptoError, NoiseGuardError, ProtocolError};
use crate::protocol::messages::{CookieReply, MacMessage};

/// Cookie validity (and secret rotation period)
pub const COOKIE_REFRESH_TIME: Duration = Duration::from_secs(120);

/// Length of a decrypted cookie
pub const COOKIE_LEN: usize = 16;

/// A decrypted cookie
pub type Cookie = Secret<COOKIE_LEN>;

/// mac1_key = HASH(LABEL_MAC1 || receiver_static_public)
pub fn mac1_key(receiver_public: &[u8; 32]) -> [u8; 32] {
    blake2s::hash_two(noise::LABEL_MAC1, receiver_public)
}

/// cookie_key = HASH(LABEL_COOKIE || receiver_static_public)
pub fn cookie_key(receiver_public: &[u8; 32]) -> [u8; 32] {
    blake2s::hash_two(noise::LABEL_COOKIE, receiver_public)
}

/// ComputeMac1: MAC(HASH(LABEL_MAC1 || receiver_public), msg[..offsetof(mac1)])
pub fn compute_mac1(receiver_public: &[u8; 32], payload: &[u8]) -> [u8; 16] {
    blake2s::mac(&mac1_key(receiver_public), payload)
}

/// ComputeMac2: MAC(cookie, msg[..offsetof(mac2)]), or zeros without a cookie
pub fn compute_mac2(cookie: Option<&Cookie>, payload_with_mac1: &[u8]) -> [u8; 16] {
    match cookie {
        Some(cookie) => blake2s::mac(cookie.as_bytes(), payload_with_mac1),
        None => [0u8; 16],
    }
}

/// Fill in mac1 and mac2 of an outgoing handshake message; returns mac1
pub fn seal_macs<M: MacMessage>(
    msg: &mut M,
    receiver_public: &[u8; 32],
    cookie: Option<&Cookie>,
) -> [u8; 16] {
    let bytes = msg.encode();
    let mac1 = compute_mac1(receiver_public, &bytes[..M::MAC1_OFFSET]);
    msg.set_mac1(mac1);

    let bytes = msg.encode();
    msg.set_mac2(compute_mac2(cookie, &bytes[..M::MAC1_OFFSET + 16]));
    mac1
}

fn ct_eq16(a: &[u8; 16], b: &[u8; 16]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Verify mac1 of an inbound handshake message addressed to `our_public`
pub fn verify_mac1<M: MacMessage>(msg: &M, our_public: &[u8; 32]) -> Result<(), ProtocolError> {
    let bytes = msg.encode();
    let expected = compute_mac1(our_public, &bytes[..M::MAC1_OFFSET]);
    if ct_eq16(&expected, msg.mac1()) {
        Ok(())
    } else {
        Err(ProtocolError::MacVerificationFailed)
    }
}

/// The bytes a cookie is computed over: IP address octets then port (big-endian)
fn source_bytes(src: &SocketAddr) -> Vec<u8> {
    let mut out = match src.ip() {
        IpAddr::V4(ip) => ip.octets().to_vec(),
        IpAddr::V6(ip) => ip.octets().to_vec(),
    };
    out.extend_from_slice(&src.port().to_be_bytes());
    out
}

/// Initiator-side store for the last cookie received from a peer
#[derive(Debug, Clone, Default)]
pub struct CookieState {
    cookie: Option<Cookie>,
    received_at: Option<Instant>,
}

impl CookieState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored cookie, if it was received less than 120 seconds before `now`
    pub fn cookie_at(&self, now: Instant) -> Option<&Cookie> {
        match (&self.cookie, self.received_at) {
            (Some(cookie), Some(received)) if now.saturating_duration_since(received) < COOKIE_REFRESH_TIME => {
                Some(cookie)
            }
            _ => None,
        }
    }

    /// Decrypt a Cookie Reply and keep the cookie for future mac2 values
    ///
    /// `our_last_mac1` is the mac1 of the handshake message the reply answers;
    /// `peer_public` is the static public key of the peer that sent it.
    pub fn process_cookie_reply(
        &mut self,
        reply: &CookieReply,
        our_last_mac1: &[u8; 16],
        peer_public: &[u8; 32],
        now: Instant,
    ) -> Result<(), NoiseGuardError> {
        let key = cookie_key(peer_public);
        let mut decrypted = aead::xdecrypt(&key, &reply.nonce, &reply.encrypted_cookie, our_last_mac1)?;

        let cookie: [u8; COOKIE_LEN] = decrypted
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::Decryption)?;
        decrypted.zeroize();

        self.cookie = Some(Cookie::new(cookie));
        self.received_at = Some(now);

        tracing::debug!(
            "Stored cookie for receiver index {} (valid for {}s)",
            reply.receiver_index,
            COOKIE_REFRESH_TIME.as_secs()
        );

        Ok(())
    }

    pub fn clear(&mut self) {
        self.cookie = None;
        self.received_at = None;
    }
}

/// Responder secret, rotated every two minutes
///
/// Double-buffered: cookies handed out under the previous secret are still
/// honoured until the next rotation, so a rotation never invalidates a
/// cookie younger than two minutes.
pub struct ChangingSecret {
    current: Secret32,
    previous: Option<Secret32>,
    rotated_at: Instant,
}

impl ChangingSecret {
    /// Start with a fresh random secret
    pub fn generate(now: Instant) -> Result<Self, CryptoError> {
        Ok(Self::from_secret(Secret32::new(random::random_bytes()?), now))
    }

    /// Start with a caller-chosen secret
    pub fn from_secret(secret: Secret32, now: Instant) -> Self {
        Self {
            current: secret,
            previous: None,
            rotated_at: now,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.rotated_at) >= COOKIE_REFRESH_TIME
    }

    /// Replace the current secret if it is two minutes old
    pub fn rotate_if_due(&mut self, now: Instant) -> Result<bool, CryptoError> {
        if !self.is_due(now) {
            return Ok(false);
        }
        self.rotate_to(Secret32::new(random::random_bytes()?), now);
        Ok(true)
    }

    /// Replace the current secret unconditionally
    pub fn rotate_to(&mut self, next: Secret32, now: Instant) {
        self.previous = Some(std::mem::replace(&mut self.current, next));
        self.rotated_at = now;
        tracing::debug!("Rotated cookie secret");
    }

    fn cookie_under(secret: &Secret32, src: &SocketAddr) -> Cookie {
        Cookie::new(blake2s::mac(secret.as_bytes(), &source_bytes(src)))
    }

    /// cookie = MAC(changing_secret, peer address)
    pub fn cookie_for(&self, src: &SocketAddr) -> Cookie {
        Self::cookie_under(&self.current, src)
    }

    fn candidate_cookies(&self, src: &SocketAddr) -> impl Iterator<Item = Cookie> + '_ {
        let src = *src;
        std::iter::once(&self.current)
            .chain(self.previous.iter())
            .map(move |secret| Self::cookie_under(secret, &src))
    }
}

/// Outcome of checking the MACs of an inbound handshake message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacVerdict {
    /// Process the handshake
    Accept,
    /// Under load without a valid mac2: answer with a Cookie Reply instead
    SendCookie,
    /// Invalid mac1: drop silently
    Reject,
}

/// Responder-side mac verification and Cookie Reply construction
pub struct CookieChecker {
    our_public: [u8; 32],
    cookie_key: [u8; 32],
    secret: ChangingSecret,
}

impl CookieChecker {
    pub fn new(our_public: [u8; 32], secret: ChangingSecret) -> Self {
        Self {
            our_public,
            cookie_key: cookie_key(&our_public),
            secret,
        }
    }

    pub fn secret_mut(&mut self) -> &mut ChangingSecret {
        &mut self.secret
    }

    /// mac2 must match a cookie for `src` under the current or previous secret
    pub fn verify_mac2<M: MacMessage>(&self, msg: &M, src: &SocketAddr) -> Result<(), ProtocolError> {
        let bytes = msg.encode();
        let covered = &bytes[..M::MAC1_OFFSET + 16];
        let valid = self
            .secret
            .candidate_cookies(src)
            .any(|cookie| ct_eq16(&compute_mac2(Some(&cookie), covered), msg.mac2()));

        if valid {
            Ok(())
        } else {
            Err(ProtocolError::MacVerificationFailed)
        }
    }

    /// Decide what to do with an inbound handshake message from `src`
    pub fn check<M: MacMessage>(&self, msg: &M, src: &SocketAddr, under_load: bool) -> MacVerdict {
        if verify_mac1(msg, &self.our_public).is_err() {
            return MacVerdict::Reject;
        }
        if !under_load || self.verify_mac2(msg, src).is_ok() {
            MacVerdict::Accept
        } else {
            MacVerdict::SendCookie
        }
    }

    /// BuildCookieReply for a handshake message that arrived from `src`
    ///
    /// `receiver_index` is the sender index of that message; `mac1` is its
    /// mac1, bound in as associated data.
    pub fn create_reply(
        &self,
        receiver_index: u32,
        mac1: &[u8; 16],
        src: &SocketAddr,
    ) -> Result<CookieReply, CryptoError> {
        let cookie = self.secret.cookie_for(src);
        let nonce: [u8; aead::XNONCE_LEN] = random::random_bytes()?;
        let encrypted = aead::xencrypt(&self.cookie_key, &nonce, cookie.as_bytes(), mac1)?;
        let encrypted_cookie: [u8; 32] = encrypted
            .try_into()
            .map_err(|_| CryptoError::Encryption)?;

        tracing::debug!("Sending cookie reply to {} (index {})", src, receiver_index);

        Ok(CookieReply {
            receiver_index,
            nonce,
            encrypted_cookie,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::HandshakeInitiation;

    fn sample_initiation() -> HandshakeInitiation {
        HandshakeInitiation {
            sender_index: 77,
            ephemeral_public: [1u8; 32],
            encrypted_static: [2u8; 48],
            encrypted_timestamp: [3u8; 28],
            mac1: [0u8; 16],
            mac2: [0u8; 16],
        }
    }

    fn src() -> SocketAddr {
        "192.0.2.7:51820".parse().unwrap()
    }

    #[test]
    fn test_seal_and_verify_mac1() {
        let responder_public = [9u8; 32];
        let mut msg = sample_initiation();

        let mac1 = seal_macs(&mut msg, &responder_public, None);
        assert_eq!(msg.mac1, mac1);
        assert_eq!(msg.mac2, [0u8; 16]);
        assert!(verify_mac1(&msg, &responder_public).is_ok());
        assert_eq!(
            verify_mac1(&msg, &[8u8; 32]),
            Err(ProtocolError::MacVerificationFailed)
        );

        msg.encrypted_static[0] ^= 1;
        assert!(verify_mac1(&msg, &responder_public).is_err());
    }

    #[test]
    fn test_cookie_state_empty() {
        let state = CookieState::new();
        assert!(state.cookie_at(Instant::now()).is_none());
    }

    #[test]
    fn test_cookie_freshness_window() {
        let t0 = Instant::now();
        let responder_public = [9u8; 32];
        let checker = CookieChecker::new(
            responder_public,
            ChangingSecret::from_secret(Secret32::new([4u8; 32]), t0),
        );

        let mut msg = sample_initiation();
        let mac1 = seal_macs(&mut msg, &responder_public, None);
        let reply = checker.create_reply(msg.sender_index, &mac1, &src()).unwrap();

        let mut state = CookieState::new();
        state
            .process_cookie_reply(&reply, &mac1, &responder_public, t0)
            .unwrap();

        assert!(state.cookie_at(t0 + Duration::from_secs(60)).is_some());
        assert!(state.cookie_at(t0 + Duration::from_secs(121)).is_none());

        state.clear();
        assert!(state.cookie_at(t0).is_none());
    }

    #[test]
    fn test_cookie_reply_bound_to_mac1() {
        let t0 = Instant::now();
        let responder_public = [9u8; 32];
        let checker = CookieChecker::new(
            responder_public,
            ChangingSecret::from_secret(Secret32::new([4u8; 32]), t0),
        );

        let reply = checker.create_reply(1, &[1u8; 16], &src()).unwrap();

        let mut state = CookieState::new();
        assert!(state
            .process_cookie_reply(&reply, &[2u8; 16], &responder_public, t0)
            .is_err());
        assert!(state.cookie_at(t0).is_none());
    }

    #[test]
    fn test_under_load_requires_mac2() {
        let t0 = Instant::now();
        let responder_public = [9u8; 32];
        let checker = CookieChecker::new(
            responder_public,
            ChangingSecret::from_secret(Secret32::new([4u8; 32]), t0),
        );

        let mut msg = sample_initiation();
        let mac1 = seal_macs(&mut msg, &responder_public, None);
        assert_eq!(checker.check(&msg, &src(), false), MacVerdict::Accept);
        assert_eq!(checker.check(&msg, &src(), true), MacVerdict::SendCookie);

        let reply = checker.create_reply(msg.sender_index, &mac1, &src()).unwrap();
        let mut state = CookieState::new();
        state
            .process_cookie_reply(&reply, &mac1, &responder_public, t0)
            .unwrap();

        let mut retry = sample_initiation();
        seal_macs(&mut retry, &responder_public, state.cookie_at(t0));
        assert_eq!(checker.check(&retry, &src(), true), MacVerdict::Accept);

        // Cookie is bound to the source address
        let other: SocketAddr = "192.0.2.8:51820".parse().unwrap();
        assert_eq!(checker.check(&retry, &other, true), MacVerdict::SendCookie);
    }

    #[test]
    fn test_bad_mac1_rejected() {
        let checker = CookieChecker::new(
            [9u8; 32],
            ChangingSecret::from_secret(Secret32::new([4u8; 32]), Instant::now()),
        );
        let msg = sample_initiation();
        assert_eq!(checker.check(&msg, &src(), false), MacVerdict::Reject);
    }

    #[test]
    fn test_previous_secret_still_honoured() {
        let t0 = Instant::now();
        let responder_public = [9u8; 32];
        let mut checker = CookieChecker::new(
            responder_public,
            ChangingSecret::from_secret(Secret32::new([4u8; 32]), t0),
        );

        let cookie = checker.secret.cookie_for(&src());
        let mut msg = sample_initiation();
        seal_macs(&mut msg, &responder_public, Some(&cookie));

        let t1 = t0 + COOKIE_REFRESH_TIME;
        assert!(checker.secret_mut().is_due(t1));
        checker.secret_mut().rotate_to(Secret32::new([5u8; 32]), t1);
        assert_eq!(checker.check(&msg, &src(), true), MacVerdict::Accept);

        checker
            .secret_mut()
            .rotate_to(Secret32::new([6u8; 32]), t1 + COOKIE_REFRESH_TIME);
        assert_eq!(checker.check(&msg, &src(), true), MacVerdict::SendCookie);
    }

    #[test]
    fn test_rotate_if_due() {
        let t0 = Instant::now();
        let mut secret = ChangingSecret::generate(t0).unwrap();
        assert!(!secret.rotate_if_due(t0 + Duration::from_secs(30)).unwrap());
        assert!(secret.rotate_if_due(t0 + Duration::from_secs(120)).unwrap());
        assert!(secret.previous.is_some());
    }
}
