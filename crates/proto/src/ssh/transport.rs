//! SSH session state machine (RFC 4253).
//!
//! [`TransportState`] is the per-connection context every packet passes
//! through. It owns:
//!
//! - The session [`State`]
//! - Both sequence counters (one increment per packet, never reset)
//! - The inbound [`PacketFramer`]
//! - The 3DES-CBC engine and both HMAC-SHA1 keys once they are active
//!
//! # Session States
//!
//! 1. **VersionExchange** - plaintext identification lines (not counted)
//! 2. **NegotiationInit** - SSH_MSG_KEXINIT in both directions
//! 3. **KeyExchange** - KEXDH_INIT / KEXDH_REPLY / NEWKEYS
//! 4. **SecuredKeysActive** - cipher and MAC switched on
//! 5. **ServiceRequest** - "ssh-userauth" requested
//! 6. **Authenticating** - password exchange
//! 7. **Connected** - channel traffic
//!
//! # Key Activation
//!
//! Keys are installed once the handshake produces them but stay dormant.
//! Protection switches on for both directions together, once NEWKEYS has
//! been both sent and received, so no packet is ever half protected.
//!
//! # Example
//!
//! ```rust
//! use keel_proto::ssh::transport::{State, TransportState};
//!
//! let mut transport = TransportState::new();
//! transport.transition(State::NegotiationInit).unwrap();
//!
//! let wire = transport.seal_payload(b"\x05hello").unwrap();
//! assert_eq!(transport.send_sequence(), 1);
//! assert_eq!(wire.len() % 8, 0);
//! ```

use keel_platform::{KeelError, KeelResult};
use tracing::{debug, trace};

use super::crypto::{MacKey, TripleDesCbc};
use super::kex_dh::SessionKeys;
use super::packet::{seal, Packet, PacketFramer};

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Identification strings are being exchanged.
    VersionExchange,
    /// KEXINIT messages are being exchanged.
    NegotiationInit,
    /// Diffie-Hellman exchange and NEWKEYS.
    KeyExchange,
    /// Cipher and MAC are active.
    SecuredKeysActive,
    /// Waiting for SERVICE_ACCEPT.
    ServiceRequest,
    /// User authentication in progress.
    Authenticating,
    /// Authenticated, channel traffic.
    Connected,
}

impl State {
    fn successor(self) -> Option<State> {
        match self {
            State::VersionExchange => Some(State::NegotiationInit),
            State::NegotiationInit => Some(State::KeyExchange),
            State::KeyExchange => Some(State::SecuredKeysActive),
            State::SecuredKeysActive => Some(State::ServiceRequest),
            State::ServiceRequest => Some(State::Authenticating),
            State::Authenticating => Some(State::Connected),
            State::Connected => None,
        }
    }
}

struct Protection {
    cipher: TripleDesCbc,
    mac_out: MacKey,
    mac_in: MacKey,
}

/// Per-connection transport context.
pub struct TransportState {
    state: State,
    send_seq: u32,
    recv_seq: u32,
    framer: PacketFramer,
    pending: Option<Protection>,
    active: Option<Protection>,
    newkeys_sent: bool,
    newkeys_received: bool,
    session_id: Option<[u8; 20]>,
}

impl Default for TransportState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportState")
            .field("state", &self.state)
            .field("send_seq", &self.send_seq)
            .field("recv_seq", &self.recv_seq)
            .field("protected", &self.is_protected())
            .field("buffered", &self.framer.buffered())
            .finish()
    }
}

impl TransportState {
    /// Creates a context in `VersionExchange` with both counters at zero.
    pub fn new() -> Self {
        Self {
            state: State::VersionExchange,
            send_seq: 0,
            recv_seq: 0,
            framer: PacketFramer::new(),
            pending: None,
            active: None,
            newkeys_sent: false,
            newkeys_received: false,
            session_id: None,
        }
    }

    /// Current state.
    pub fn current(&self) -> State {
        self.state
    }

    /// Moves to `next`.
    ///
    /// Only the next state in the fixed order (or the current one) is
    /// accepted. `SecuredKeysActive` additionally requires active keys.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] for any other transition.
    pub fn transition(&mut self, next: State) -> KeelResult<()> {
        if next == self.state {
            return Ok(());
        }

        if self.state.successor() != Some(next) {
            return Err(KeelError::Protocol(format!(
                "Invalid state transition: {:?} -> {:?}",
                self.state, next
            )));
        }

        if next == State::SecuredKeysActive && !self.is_protected() {
            return Err(KeelError::Protocol(
                "Invalid state transition: keys are not active".to_string(),
            ));
        }

        debug!(from = ?self.state, to = ?next, "session state transition");
        self.state = next;
        Ok(())
    }

    /// Packets sent so far.
    pub fn send_sequence(&self) -> u32 {
        self.send_seq
    }

    /// Packets received so far.
    pub fn recv_sequence(&self) -> u32 {
        self.recv_seq
    }

    /// Whether cipher and MAC are active.
    pub fn is_protected(&self) -> bool {
        self.active.is_some()
    }

    /// Session identifier (first exchange hash), once keys are installed.
    pub fn session_id(&self) -> Option<&[u8; 20]> {
        self.session_id.as_ref()
    }

    /// Encodes `payload` as the next outbound packet.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if the payload is too large.
    pub fn seal_payload(&mut self, payload: &[u8]) -> KeelResult<Vec<u8>> {
        let (mac, cipher) = match self.active.as_mut() {
            Some(p) => (Some(&p.mac_out), Some(&mut p.cipher)),
            None => (None, None),
        };

        let wire = seal(payload, self.send_seq, mac, cipher)?;
        trace!(seq = self.send_seq, len = payload.len(), "sent packet");
        self.send_seq = self.send_seq.wrapping_add(1);
        Ok(wire)
    }

    /// Buffers bytes read from the transport.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.framer.feed(bytes);
    }

    /// Bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.framer.buffered()
    }

    /// Decodes the next buffered packet, if complete.
    ///
    /// # Errors
    ///
    /// Returns framing errors and [`KeelError::MacMismatch`].
    pub fn next_packet(&mut self) -> KeelResult<Option<Packet>> {
        let (mac, cipher) = match self.active.as_mut() {
            Some(p) => (Some(&p.mac_in), Some(&mut p.cipher)),
            None => (None, None),
        };

        let packet = self.framer.next_packet(self.recv_seq, mac, cipher)?;
        if let Some(packet) = &packet {
            trace!(
                seq = self.recv_seq,
                len = packet.payload().len(),
                msg_type = ?packet.msg_type(),
                "received packet"
            );
            self.recv_seq = self.recv_seq.wrapping_add(1);
        }
        Ok(packet)
    }

    /// Installs freshly derived keys, dormant until both NEWKEYS are seen.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Security`] if a key has the wrong length.
    pub fn install_keys(&mut self, keys: &SessionKeys, session_id: &[u8; 20]) -> KeelResult<()> {
        let cipher = TripleDesCbc::new(&keys.key_out, &keys.iv_out, &keys.key_in, &keys.iv_in)?;
        let mac_out = MacKey::new(&keys.mac_out)?;
        let mac_in = MacKey::new(&keys.mac_in)?;

        self.pending = Some(Protection {
            cipher,
            mac_out,
            mac_in,
        });
        if self.session_id.is_none() {
            self.session_id = Some(*session_id);
        }
        debug!("session keys installed");
        Ok(())
    }

    /// Records that our NEWKEYS went out. Returns whether protection is now active.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if no keys are installed.
    pub fn newkeys_sent(&mut self) -> KeelResult<bool> {
        self.newkeys_sent = true;
        self.try_activate()
    }

    /// Records the peer's NEWKEYS. Returns whether protection is now active.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if no keys are installed.
    pub fn newkeys_received(&mut self) -> KeelResult<bool> {
        self.newkeys_received = true;
        self.try_activate()
    }

    fn try_activate(&mut self) -> KeelResult<bool> {
        if self.pending.is_none() && self.active.is_none() {
            return Err(KeelError::Protocol(
                "NEWKEYS before session keys were derived".to_string(),
            ));
        }

        if self.newkeys_sent && self.newkeys_received {
            if let Some(protection) = self.pending.take() {
                self.active = Some(protection);
                debug!(
                    send_seq = self.send_seq,
                    recv_seq = self.recv_seq,
                    "cipher and MAC active"
                );
            }
        }
        Ok(self.is_protected())
    }
}
