//! Cipher and integrity engines for the single supported suite.
//!
//! - **Cipher**: `3des-cbc` (RFC 4253 Section 6.3), three-key DES in
//!   encrypt-decrypt-encrypt order, chained in CBC mode
//! - **Integrity**: SHA-1 accumulator, and `hmac-sha1` (RFC 4253 Section 6.4)
//!   for per-packet tags
//!
//! # Chaining state
//!
//! CBC chaining vectors advance with every block processed and carry over
//! from one packet to the next. Each direction therefore keeps its own
//! long-lived encryptor or decryptor for the whole session.
//!
//! # Example
//!
//! ```rust
//! use keel_proto::ssh::crypto::{HashAccumulator, TripleDesCbc};
//!
//! let mut cipher = TripleDesCbc::new(&[7u8; 24], &[1u8; 8], &[7u8; 24], &[1u8; 8]).unwrap();
//! let mut block = *b"12345678";
//! cipher.encrypt(&mut block).unwrap();
//! cipher.decrypt(&mut block).unwrap();
//! assert_eq!(&block, b"12345678");
//!
//! let mut hash = HashAccumulator::new();
//! hash.add_string(b"ssh-userauth");
//! assert_eq!(hash.finalize().len(), 20);
//! ```

use std::fmt;

use cbc::{Decryptor, Encryptor};
use cipher::generic_array::GenericArray;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use des::TdesEde3;
use hmac::{Hmac, Mac};
use keel_platform::{KeelError, KeelResult};
use num_bigint::BigUint;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::mpint;

/// Cipher algorithm name.
pub const CIPHER_NAME: &str = "3des-cbc";

/// MAC algorithm name.
pub const MAC_NAME: &str = "hmac-sha1";

/// Cipher block size in bytes.
pub const BLOCK_SIZE: usize = 8;

/// 3DES key size in bytes (three 8-byte DES keys).
pub const KEY_SIZE: usize = 24;

/// CBC chaining vector size in bytes.
pub const IV_SIZE: usize = 8;

/// SHA-1 digest size, which is also the HMAC-SHA1 tag size.
pub const DIGEST_SIZE: usize = 20;

/// HMAC-SHA1 key size in bytes.
pub const MAC_KEY_SIZE: usize = 20;

type TdesCbcEnc = Encryptor<TdesEde3>;
type TdesCbcDec = Decryptor<TdesEde3>;
type HmacSha1 = Hmac<Sha1>;

/// 3DES-CBC state for both directions of a session.
pub struct TripleDesCbc {
    encryptor: TdesCbcEnc,
    decryptor: TdesCbcDec,
}

impl fmt::Debug for TripleDesCbc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TripleDesCbc")
            .field("algorithm", &CIPHER_NAME)
            .field("state", &"<redacted>")
            .finish()
    }
}

impl TripleDesCbc {
    /// Creates the engine from outbound and inbound keys and initial vectors.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Security`] if a key is not 24 bytes or an IV is
    /// not 8 bytes.
    pub fn new(
        key_out: &[u8],
        iv_out: &[u8],
        key_in: &[u8],
        iv_in: &[u8],
    ) -> KeelResult<Self> {
        let encryptor = TdesCbcEnc::new_from_slices(key_out, iv_out).map_err(|_| {
            KeelError::Security(format!(
                "Invalid 3des-cbc outbound key material: key {} bytes, iv {} bytes",
                key_out.len(),
                iv_out.len()
            ))
        })?;
        let decryptor = TdesCbcDec::new_from_slices(key_in, iv_in).map_err(|_| {
            KeelError::Security(format!(
                "Invalid 3des-cbc inbound key material: key {} bytes, iv {} bytes",
                key_in.len(),
                iv_in.len()
            ))
        })?;

        Ok(Self {
            encryptor,
            decryptor,
        })
    }

    /// Encrypts `data` in place with the outbound state.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if the length is not a multiple of 8.
    pub fn encrypt(&mut self, data: &mut [u8]) -> KeelResult<()> {
        check_block_aligned(data.len())?;
        for block in data.chunks_exact_mut(BLOCK_SIZE) {
            self.encryptor
                .encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }

    /// Decrypts `data` in place with the inbound state.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if the length is not a multiple of 8.
    pub fn decrypt(&mut self, data: &mut [u8]) -> KeelResult<()> {
        check_block_aligned(data.len())?;
        for block in data.chunks_exact_mut(BLOCK_SIZE) {
            self.decryptor
                .decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        Ok(())
    }
}

fn check_block_aligned(len: usize) -> KeelResult<()> {
    if len % BLOCK_SIZE != 0 {
        return Err(KeelError::Protocol(format!(
            "Cipher input of {} bytes is not a multiple of the {}-byte block size",
            len, BLOCK_SIZE
        )));
    }
    Ok(())
}

/// Append-only SHA-1 accumulator, optionally keyed as HMAC-SHA1.
///
/// Everything added since construction or the last [`clear`](Self::clear)
/// is covered by [`finalize`](Self::finalize).
#[derive(Clone, Default)]
pub struct HashAccumulator {
    buffer: Vec<u8>,
    key: Option<Zeroizing<Vec<u8>>>,
}

impl fmt::Debug for HashAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashAccumulator")
            .field("len", &self.buffer.len())
            .field("keyed", &self.key.is_some())
            .finish()
    }
}

impl HashAccumulator {
    /// Plain SHA-1 accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// HMAC-SHA1 accumulator under `key`.
    pub fn keyed(key: &[u8]) -> Self {
        Self {
            buffer: Vec::new(),
            key: Some(Zeroizing::new(key.to_vec())),
        }
    }

    /// Appends raw bytes.
    pub fn add_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(data);
        self
    }

    /// Appends a length-prefixed string.
    pub fn add_string(&mut self, data: &[u8]) -> &mut Self {
        self.add_u32(data.len() as u32);
        self.add_bytes(data)
    }

    /// Appends a big-endian uint32.
    pub fn add_u32(&mut self, value: u32) -> &mut Self {
        self.add_bytes(&value.to_be_bytes())
    }

    /// Appends a single byte.
    pub fn add_u8(&mut self, value: u8) -> &mut Self {
        self.buffer.push(value);
        self
    }

    /// Appends an integer in mpint wire form.
    pub fn add_mpint(&mut self, value: &BigUint) -> &mut Self {
        self.add_bytes(&mpint::encode(value))
    }

    /// Digest (or tag, when keyed) of everything accumulated so far.
    pub fn finalize(&self) -> [u8; DIGEST_SIZE] {
        let mut out = [0u8; DIGEST_SIZE];
        match &self.key {
            None => out.copy_from_slice(&Sha1::digest(&self.buffer)),
            Some(key) => {
                // HMAC accepts keys of any length.
                if let Ok(mut mac) = <HmacSha1 as Mac>::new_from_slice(key) {
                    mac.update(&self.buffer);
                    out.copy_from_slice(&mac.finalize().into_bytes());
                }
            }
        }
        out
    }

    /// Drops the accumulated bytes, keeping the key.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Number of bytes accumulated.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing has been accumulated.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// SHA-1 of `data`.
pub fn sha1(data: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut acc = HashAccumulator::new();
    acc.add_bytes(data);
    acc.finalize()
}

/// Per-direction HMAC-SHA1 packet authenticator (RFC 4253 Section 6.4).
///
/// `mac = HMAC(key, uint32 sequence_number || unencrypted_packet)`
pub struct MacKey {
    key: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for MacKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacKey")
            .field("algorithm", &MAC_NAME)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl MacKey {
    /// Creates a MAC key.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Security`] if fewer than 20 bytes are supplied.
    pub fn new(key_material: &[u8]) -> KeelResult<Self> {
        if key_material.len() < MAC_KEY_SIZE {
            return Err(KeelError::Security(format!(
                "Insufficient key material for MAC: expected {}, got {}",
                MAC_KEY_SIZE,
                key_material.len()
            )));
        }

        Ok(Self {
            key: Zeroizing::new(key_material[..MAC_KEY_SIZE].to_vec()),
        })
    }

    /// Tag for `packet` sent or received as number `sequence`.
    pub fn compute(&self, sequence: u32, packet: &[u8]) -> [u8; DIGEST_SIZE] {
        let mut acc = HashAccumulator::keyed(&self.key);
        acc.add_u32(sequence).add_bytes(packet);
        acc.finalize()
    }

    /// Checks a received tag in constant time.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::MacMismatch`] if the tag does not match.
    pub fn verify(&self, sequence: u32, packet: &[u8], received: &[u8]) -> KeelResult<()> {
        let expected = self.compute(sequence, packet);

        if received.len() == expected.len() && bool::from(expected[..].ct_eq(received)) {
            Ok(())
        } else {
            Err(KeelError::MacMismatch { sequence })
        }
    }
}
