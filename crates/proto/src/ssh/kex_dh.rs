//! Diffie-Hellman group 1 key exchange and session key derivation
//! (RFC 4253 Sections 7.2 and 8).
//!
//! This module implements:
//! - diffie-hellman-group1-sha1 over the 1024-bit Oakley group 2 prime
//! - The exchange hash and its second SHA-1 pass used for the host signature
//! - Derivation of the six per-direction key streams
//!
//! # Flow
//!
//! ```text
//! Uninitialized --initiate--> Initiated --init_message--> AwaitingReply
//! AwaitingReply --process_reply--> Verified | Failed
//! ```
//!
//! # Security
//!
//! - The private exponent and shared secret are zeroized on drop
//! - `f` outside `[1, p-1]` is rejected before any exponentiation
//!
//! # Example
//!
//! ```rust
//! use keel_proto::ssh::kex_dh::{DhGroup1Exchange, KexState, KexTranscript};
//!
//! let transcript = KexTranscript {
//!     client_version: "SSH-2.0-keel".to_string(),
//!     server_version: "SSH-2.0-OpenSSH_3.9p1".to_string(),
//!     client_kexinit: vec![20],
//!     server_kexinit: vec![20],
//! };
//!
//! let mut exchange = DhGroup1Exchange::new(transcript);
//! exchange.initiate().unwrap();
//! let init = exchange.init_message().unwrap();
//! assert_eq!(exchange.state(), KexState::AwaitingReply);
//! assert_eq!(init.to_bytes()[0], 30);
//! ```

use std::fmt;

use keel_platform::{KeelError, KeelResult};
use num_bigint::{BigUint, RandBigInt};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use super::crypto::{sha1, HashAccumulator, DIGEST_SIZE, IV_SIZE, KEY_SIZE, MAC_KEY_SIZE};
use super::hostkey::{DssPublicKey, DssSignature};
use super::message::MessageType;
use super::mpint;
use super::wire::{WireReader, WireWriter};

/// Oakley group 2 parameters (RFC 2409 Section 6.2).
pub mod group1 {
    use num_bigint::BigUint;
    use once_cell::sync::Lazy;

    #[rustfmt::skip]
    const PRIME: [u8; 128] = [
        0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
        0xC9, 0x0F, 0xDA, 0xA2, 0x21, 0x68, 0xC2, 0x34,
        0xC4, 0xC6, 0x62, 0x8B, 0x80, 0xDC, 0x1C, 0xD1,
        0x29, 0x02, 0x4E, 0x08, 0x8A, 0x67, 0xCC, 0x74,
        0x02, 0x0B, 0xBE, 0xA6, 0x3B, 0x13, 0x9B, 0x22,
        0x51, 0x4A, 0x08, 0x79, 0x8E, 0x34, 0x04, 0xDD,
        0xEF, 0x95, 0x19, 0xB3, 0xCD, 0x3A, 0x43, 0x1B,
        0x30, 0x2B, 0x0A, 0x6D, 0xF2, 0x5F, 0x14, 0x37,
        0x4F, 0xE1, 0x35, 0x6D, 0x6D, 0x51, 0xC2, 0x45,
        0xE4, 0x85, 0xB5, 0x76, 0x62, 0x5E, 0x7E, 0xC6,
        0xF4, 0x4C, 0x42, 0xE9, 0xA6, 0x37, 0xED, 0x6B,
        0x0B, 0xFF, 0x5C, 0xB6, 0xF4, 0x06, 0xB7, 0xED,
        0xEE, 0x38, 0x6B, 0xFB, 0x5A, 0x89, 0x9F, 0xA5,
        0xAE, 0x9F, 0x24, 0x11, 0x7C, 0x4B, 0x1F, 0xE6,
        0x49, 0x28, 0x66, 0x51, 0xEC, 0xE6, 0x53, 0x81,
        0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    ];

    /// 1024-bit safe prime.
    pub static P: Lazy<BigUint> = Lazy::new(|| BigUint::from_bytes_be(&PRIME));

    /// Generator.
    pub static G: Lazy<BigUint> = Lazy::new(|| BigUint::from(2u32));

    /// Order of the prime-order subgroup, `(p - 1) / 2`.
    pub static Q: Lazy<BigUint> = Lazy::new(|| (&*P - 1u32) >> 1);
}

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KexState {
    /// No private exponent yet.
    Uninitialized,
    /// `x` and `e` chosen.
    Initiated,
    /// KEXDH_INIT handed out for sending.
    AwaitingReply,
    /// Reply processed and host signature valid.
    Verified,
    /// Reply processed and host signature invalid.
    Failed,
}

/// The verbatim inputs both peers contributed before the DH exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexTranscript {
    /// Client identification string without CR LF (`V_C`).
    pub client_version: String,
    /// Server identification string without CR LF (`V_S`).
    pub server_version: String,
    /// Client KEXINIT payload (`I_C`).
    pub client_kexinit: Vec<u8>,
    /// Server KEXINIT payload (`I_S`).
    pub server_kexinit: Vec<u8>,
}

/// SSH_MSG_KEXDH_INIT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexdhInit {
    /// Client public value.
    pub e: BigUint,
}

impl KexdhInit {
    /// Serializes the message.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::message(MessageType::KexdhInit);
        w.put_mpint(&self.e);
        w.finish()
    }

    /// Parses the message.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] on a wrong type byte or malformed mpint.
    pub fn from_bytes(data: &[u8]) -> KeelResult<Self> {
        let mut r = WireReader::new(data);
        r.expect_type(MessageType::KexdhInit)?;
        Ok(Self { e: r.read_mpint()? })
    }
}

/// SSH_MSG_KEXDH_REPLY.
///
/// ```text
/// byte      SSH_MSG_KEXDH_REPLY (31)
/// string    server public host key (K_S)
/// mpint     f
/// string    signature of H
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexdhReply {
    /// Host key blob.
    pub host_key_blob: Vec<u8>,
    /// Server public value.
    pub f: BigUint,
    /// Signature blob.
    pub signature_blob: Vec<u8>,
}

impl KexdhReply {
    /// Serializes the message.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::message(MessageType::KexdhReply);
        w.put_string(&self.host_key_blob)
            .put_mpint(&self.f)
            .put_string(&self.signature_blob);
        w.finish()
    }

    /// Parses the message.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if a field is truncated or the type
    /// byte is wrong.
    pub fn from_bytes(data: &[u8]) -> KeelResult<Self> {
        let mut r = WireReader::new(data);
        r.expect_type(MessageType::KexdhReply)?;
        let host_key_blob = r.read_string()?.to_vec();
        let f = r.read_mpint()?;
        let signature_blob = r.read_string()?.to_vec();

        Ok(Self {
            host_key_blob,
            f,
            signature_blob,
        })
    }
}

/// Result of processing the server's reply.
pub struct KexOutcome {
    shared_secret: Zeroizing<Vec<u8>>,
    exchange_hash: [u8; DIGEST_SIZE],
    signed_digest: [u8; DIGEST_SIZE],
    host_key: DssPublicKey,
    signature_valid: bool,
}

impl KexOutcome {
    /// Shared secret `K` in mpint wire form.
    pub fn shared_secret_mpint(&self) -> &[u8] {
        &self.shared_secret
    }

    /// Exchange hash `H`. Also the session identifier.
    pub fn exchange_hash(&self) -> &[u8; DIGEST_SIZE] {
        &self.exchange_hash
    }

    /// `SHA1(H)`, the digest the host signature covers.
    pub fn signed_digest(&self) -> &[u8; DIGEST_SIZE] {
        &self.signed_digest
    }

    /// The server's host key.
    pub fn host_key(&self) -> &DssPublicKey {
        &self.host_key
    }

    /// Whether the host signature verified.
    pub fn signature_valid(&self) -> bool {
        self.signature_valid
    }

    /// Derives the session keys from this outcome.
    pub fn session_keys(&self) -> SessionKeys {
        SessionKeys::derive(&self.shared_secret, &self.exchange_hash)
    }
}

impl fmt::Debug for KexOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KexOutcome")
            .field("exchange_hash", &hex::encode(self.exchange_hash))
            .field("host_key", &self.host_key)
            .field("signature_valid", &self.signature_valid)
            .finish_non_exhaustive()
    }
}

/// Client side of diffie-hellman-group1-sha1.
pub struct DhGroup1Exchange {
    state: KexState,
    transcript: KexTranscript,
    /// Private exponent, big-endian.
    x: Zeroizing<Vec<u8>>,
    e: BigUint,
}

impl DhGroup1Exchange {
    /// Binds the exchange to the captured transcript.
    pub fn new(transcript: KexTranscript) -> Self {
        Self {
            state: KexState::Uninitialized,
            transcript,
            x: Zeroizing::new(Vec::new()),
            e: BigUint::from(0u32),
        }
    }

    /// Creates an already-initiated exchange with a fixed private exponent.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::KeyExchange`] if `x` is not in `(1, q)` or
    /// gives `e >= q`.
    pub fn with_private_exponent(transcript: KexTranscript, x: &BigUint) -> KeelResult<Self> {
        if x <= &BigUint::from(1u32) || x >= &*group1::Q {
            return Err(KeelError::KeyExchange(
                "Private exponent outside (1, q)".to_string(),
            ));
        }

        let e = group1::G.modpow(x, &group1::P);
        if e >= *group1::Q {
            return Err(KeelError::KeyExchange(
                "Private exponent gives e >= q".to_string(),
            ));
        }

        Ok(Self {
            state: KexState::Initiated,
            transcript,
            x: Zeroizing::new(x.to_bytes_be()),
            e,
        })
    }

    /// Current state.
    pub fn state(&self) -> KexState {
        self.state
    }

    /// Client public value (zero before [`initiate`](Self::initiate)).
    pub fn e(&self) -> &BigUint {
        &self.e
    }

    /// The transcript this exchange hashes.
    pub fn transcript(&self) -> &KexTranscript {
        &self.transcript
    }

    /// Draws `x` uniformly from `(1, q)` and computes `e = g^x mod p`,
    /// redrawing while `e >= q`.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::KeyExchange`] unless the state is `Uninitialized`.
    pub fn initiate(&mut self) -> KeelResult<()> {
        self.expect_state(KexState::Uninitialized)?;

        let mut rng = rand::thread_rng();
        let low = BigUint::from(2u32);
        let mut draws = 0u32;
        loop {
            draws += 1;
            let x = rng.gen_biguint_range(&low, &group1::Q);
            let e = group1::G.modpow(&x, &group1::P);
            if e < *group1::Q {
                self.x = Zeroizing::new(x.to_bytes_be());
                self.e = e;
                break;
            }
        }

        debug!(draws, e_bits = self.e.bits(), "DH private exponent drawn");
        self.state = KexState::Initiated;
        Ok(())
    }

    /// Returns the KEXDH_INIT to send.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::KeyExchange`] unless the state is `Initiated`.
    pub fn init_message(&mut self) -> KeelResult<KexdhInit> {
        self.expect_state(KexState::Initiated)?;
        self.state = KexState::AwaitingReply;
        Ok(KexdhInit { e: self.e.clone() })
    }

    /// Processes the server's KEXDH_REPLY.
    ///
    /// Computes `K = f^x mod p`, the exchange hash `H`, and `H' = SHA1(H)`,
    /// then checks the host signature over `H'`. A bad signature does not
    /// return an error: the state becomes `Failed` and the outcome reports
    /// it, leaving the decision to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::KeyExchange`] if:
    /// - The state is not `AwaitingReply`
    /// - `f` is outside `[1, p-1]`
    /// - The host key or signature blob is not `ssh-dss`
    pub fn process_reply(&mut self, reply: &KexdhReply) -> KeelResult<KexOutcome> {
        self.expect_state(KexState::AwaitingReply)?;

        match self.compute_outcome(reply) {
            Ok(outcome) => {
                self.state = if outcome.signature_valid {
                    KexState::Verified
                } else {
                    warn!(
                        fingerprint = %outcome.host_key.fingerprint(),
                        "host signature verification failed"
                    );
                    KexState::Failed
                };
                Ok(outcome)
            }
            Err(e) => {
                self.state = KexState::Failed;
                Err(e)
            }
        }
    }

    fn compute_outcome(&self, reply: &KexdhReply) -> KeelResult<KexOutcome> {
        let p = &*group1::P;
        let f = &reply.f;
        if f < &BigUint::from(1u32) || f >= p {
            return Err(KeelError::KeyExchange(
                "Server DH value f outside [1, p-1]".to_string(),
            ));
        }

        let host_key = DssPublicKey::from_blob(&reply.host_key_blob)?;
        let signature = DssSignature::from_blob(&reply.signature_blob)?;

        let x = BigUint::from_bytes_be(&self.x);
        let k = f.modpow(&x, p);
        let shared_secret = Zeroizing::new(mpint::encode(&k));

        let h = exchange_hash(
            &self.transcript,
            &reply.host_key_blob,
            &self.e,
            f,
            &shared_secret,
        );
        let signed_digest = sha1(&h);
        let signature_valid = host_key.verify(&signed_digest, &signature);

        debug!(
            exchange_hash = %hex::encode(h),
            signature_valid,
            "processed KEXDH_REPLY"
        );

        Ok(KexOutcome {
            shared_secret,
            exchange_hash: h,
            signed_digest,
            host_key,
            signature_valid,
        })
    }

    fn expect_state(&self, expected: KexState) -> KeelResult<()> {
        if self.state != expected {
            return Err(KeelError::KeyExchange(format!(
                "Key exchange in state {:?}, expected {:?}",
                self.state, expected
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for DhGroup1Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DhGroup1Exchange")
            .field("state", &self.state)
            .field("e_bits", &self.e.bits())
            .finish_non_exhaustive()
    }
}

/// Computes the exchange hash
/// `H = SHA1(V_C || V_S || I_C || I_S || K_S || e || f || K)`.
///
/// Strings are length-prefixed and `e`, `f` are mpints. `shared_secret_mpint`
/// is `K` already in mpint form.
pub fn exchange_hash(
    transcript: &KexTranscript,
    host_key_blob: &[u8],
    e: &BigUint,
    f: &BigUint,
    shared_secret_mpint: &[u8],
) -> [u8; DIGEST_SIZE] {
    let mut acc = HashAccumulator::new();
    acc.add_string(transcript.client_version.as_bytes())
        .add_string(transcript.server_version.as_bytes())
        .add_string(&transcript.client_kexinit)
        .add_string(&transcript.server_kexinit)
        .add_string(host_key_blob)
        .add_mpint(e)
        .add_mpint(f)
        .add_bytes(shared_secret_mpint);
    acc.finalize()
}

/// Derives one key stream (RFC 4253 Section 7.2).
///
/// ```text
/// K1 = SHA1(K || H || letter || session_id)
/// Kn = SHA1(K || H || K1 || ... || Kn-1)
/// key = K1 || K2 || ...  truncated to `length`
/// ```
///
/// `shared_secret_mpint` is `K` in mpint form. The session identifier is
/// the exchange hash of the first key exchange, which is the only one this
/// client performs.
///
/// # Example
///
/// ```rust
/// use keel_proto::ssh::kex_dh::derive_key;
///
/// let key = derive_key(&[0, 0, 0, 1, 7], &[1u8; 20], b'C', 24);
/// assert_eq!(key.len(), 24);
/// ```
pub fn derive_key(
    shared_secret_mpint: &[u8],
    exchange_hash: &[u8],
    letter: u8,
    length: usize,
) -> Zeroizing<Vec<u8>> {
    let mut acc = HashAccumulator::new();
    acc.add_bytes(shared_secret_mpint)
        .add_bytes(exchange_hash)
        .add_u8(letter)
        .add_bytes(exchange_hash);

    let mut key = Zeroizing::new(acc.finalize().to_vec());

    while key.len() < length {
        acc.clear();
        acc.add_bytes(shared_secret_mpint)
            .add_bytes(exchange_hash)
            .add_bytes(&key);
        key.extend_from_slice(&acc.finalize());
    }

    key.truncate(length);
    key
}

/// The six key streams of one session, named from the client's side.
pub struct SessionKeys {
    /// Initial IV, client to server ('A').
    pub iv_out: Zeroizing<Vec<u8>>,
    /// Initial IV, server to client ('B').
    pub iv_in: Zeroizing<Vec<u8>>,
    /// Cipher key, client to server ('C').
    pub key_out: Zeroizing<Vec<u8>>,
    /// Cipher key, server to client ('D').
    pub key_in: Zeroizing<Vec<u8>>,
    /// MAC key, client to server ('E').
    pub mac_out: Zeroizing<Vec<u8>>,
    /// MAC key, server to client ('F').
    pub mac_in: Zeroizing<Vec<u8>>,
}

impl SessionKeys {
    /// Derives all six streams from `K` (mpint form) and `H`.
    pub fn derive(shared_secret_mpint: &[u8], exchange_hash: &[u8]) -> Self {
        let k = shared_secret_mpint;
        let h = exchange_hash;
        Self {
            iv_out: derive_key(k, h, b'A', IV_SIZE),
            iv_in: derive_key(k, h, b'B', IV_SIZE),
            key_out: derive_key(k, h, b'C', KEY_SIZE),
            key_in: derive_key(k, h, b'D', KEY_SIZE),
            mac_out: derive_key(k, h, b'E', MAC_KEY_SIZE),
            mac_in: derive_key(k, h, b'F', MAC_KEY_SIZE),
        }
    }

    /// The same keys seen from the server's side (in and out swapped).
    pub fn mirrored(self) -> Self {
        Self {
            iv_out: self.iv_in,
            iv_in: self.iv_out,
            key_out: self.key_in,
            key_in: self.key_out,
            mac_out: self.mac_in,
            mac_in: self.mac_out,
        }
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKeys([REDACTED])")
    }
}
