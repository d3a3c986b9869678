//! Algorithm negotiation messages (RFC 4253 Section 7).
//!
//! This module implements:
//! - SSH_MSG_KEXINIT for the client's single fixed suite
//! - SSH_MSG_NEWKEYS
//! - Checking that the server offers every algorithm of that suite
//!
//! # Suite
//!
//! | Slot        | Algorithm                      |
//! |-------------|--------------------------------|
//! | kex         | `diffie-hellman-group1-sha1`   |
//! | host key    | `ssh-dss`                      |
//! | cipher      | `3des-cbc` (both directions)   |
//! | mac         | `hmac-sha1` (both directions)  |
//! | compression | `none` (both directions)       |
//!
//! # Example
//!
//! ```rust
//! use keel_proto::ssh::kex::{KexInit, NewKeys};
//!
//! let kexinit = KexInit::new_client();
//! assert_eq!(kexinit.kex_algorithms(), &["diffie-hellman-group1-sha1".to_string()]);
//!
//! let bytes = NewKeys::new().to_bytes();
//! assert_eq!(bytes, vec![21]);
//! ```

use keel_platform::{KeelError, KeelResult};
use rand::RngCore;

use super::crypto::{CIPHER_NAME, MAC_NAME};
use super::hostkey::DSS_ALGORITHM;
use super::message::MessageType;
use super::wire::{WireReader, WireWriter};

/// Key exchange method name.
pub const KEX_ALGORITHM: &str = "diffie-hellman-group1-sha1";

/// Compression method name.
pub const COMPRESSION_NONE: &str = "none";

/// SSH_MSG_KEXINIT message (RFC 4253 Section 7.1).
///
/// Each list is ordered by preference. The client sends exactly one name per
/// algorithm slot and leaves both language lists empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexInit {
    cookie: [u8; 16],
    kex_algorithms: Vec<String>,
    server_host_key_algorithms: Vec<String>,
    encryption_algorithms_client_to_server: Vec<String>,
    encryption_algorithms_server_to_client: Vec<String>,
    mac_algorithms_client_to_server: Vec<String>,
    mac_algorithms_server_to_client: Vec<String>,
    compression_algorithms_client_to_server: Vec<String>,
    compression_algorithms_server_to_client: Vec<String>,
    languages_client_to_server: Vec<String>,
    languages_server_to_client: Vec<String>,
    first_kex_packet_follows: bool,
}

impl KexInit {
    /// Creates the client's KEXINIT with a fresh random cookie.
    ///
    /// # Example
    ///
    /// ```rust
    /// use keel_proto::ssh::kex::KexInit;
    ///
    /// let a = KexInit::new_client();
    /// let b = KexInit::new_client();
    /// assert_ne!(a.cookie(), b.cookie());
    /// ```
    pub fn new_client() -> Self {
        let mut cookie = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut cookie);
        Self::with_cookie(cookie)
    }

    /// Creates the client's KEXINIT with a caller-chosen cookie.
    pub fn with_cookie(cookie: [u8; 16]) -> Self {
        let one = |name: &str| vec![name.to_string()];
        Self {
            cookie,
            kex_algorithms: one(KEX_ALGORITHM),
            server_host_key_algorithms: one(DSS_ALGORITHM),
            encryption_algorithms_client_to_server: one(CIPHER_NAME),
            encryption_algorithms_server_to_client: one(CIPHER_NAME),
            mac_algorithms_client_to_server: one(MAC_NAME),
            mac_algorithms_server_to_client: one(MAC_NAME),
            compression_algorithms_client_to_server: one(COMPRESSION_NONE),
            compression_algorithms_server_to_client: one(COMPRESSION_NONE),
            languages_client_to_server: vec![],
            languages_server_to_client: vec![],
            first_kex_packet_follows: false,
        }
    }

    /// Returns the cookie.
    pub fn cookie(&self) -> &[u8; 16] {
        &self.cookie
    }

    /// Returns key exchange algorithms.
    pub fn kex_algorithms(&self) -> &[String] {
        &self.kex_algorithms
    }

    /// Returns server host key algorithms.
    pub fn server_host_key_algorithms(&self) -> &[String] {
        &self.server_host_key_algorithms
    }

    /// Returns encryption algorithms (client to server).
    pub fn encryption_algorithms_client_to_server(&self) -> &[String] {
        &self.encryption_algorithms_client_to_server
    }

    /// Returns encryption algorithms (server to client).
    pub fn encryption_algorithms_server_to_client(&self) -> &[String] {
        &self.encryption_algorithms_server_to_client
    }

    /// Returns MAC algorithms (client to server).
    pub fn mac_algorithms_client_to_server(&self) -> &[String] {
        &self.mac_algorithms_client_to_server
    }

    /// Returns MAC algorithms (server to client).
    pub fn mac_algorithms_server_to_client(&self) -> &[String] {
        &self.mac_algorithms_server_to_client
    }

    /// Returns compression algorithms (client to server).
    pub fn compression_algorithms_client_to_server(&self) -> &[String] {
        &self.compression_algorithms_client_to_server
    }

    /// Returns compression algorithms (server to client).
    pub fn compression_algorithms_server_to_client(&self) -> &[String] {
        &self.compression_algorithms_server_to_client
    }

    /// Returns whether a guessed KEX packet follows.
    pub fn first_kex_packet_follows(&self) -> bool {
        self.first_kex_packet_follows
    }

    /// Serializes the KEXINIT message.
    ///
    /// # Wire Format
    ///
    /// ```text
    /// byte         SSH_MSG_KEXINIT (20)
    /// byte[16]     cookie
    /// name-list    kex_algorithms
    /// name-list    server_host_key_algorithms
    /// name-list    encryption_algorithms_client_to_server
    /// name-list    encryption_algorithms_server_to_client
    /// name-list    mac_algorithms_client_to_server
    /// name-list    mac_algorithms_server_to_client
    /// name-list    compression_algorithms_client_to_server
    /// name-list    compression_algorithms_server_to_client
    /// name-list    languages_client_to_server
    /// name-list    languages_server_to_client
    /// boolean      first_kex_packet_follows
    /// uint32       0 (reserved)
    /// ```
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::message(MessageType::KexInit);
        w.put_raw(&self.cookie);

        for list in self.name_lists() {
            let names: Vec<&str> = list.iter().map(String::as_str).collect();
            w.put_name_list(&names);
        }

        w.put_bool(self.first_kex_packet_follows).put_u32(0);
        w.finish()
    }

    /// Parses a KEXINIT message.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if:
    /// - The message type is not SSH_MSG_KEXINIT (20)
    /// - The cookie, a name-list or a trailing field is truncated
    pub fn from_bytes(data: &[u8]) -> KeelResult<Self> {
        let mut r = WireReader::new(data);
        r.expect_type(MessageType::KexInit)?;

        let mut cookie = [0u8; 16];
        cookie.copy_from_slice(r.read_raw(16)?);

        let kex_algorithms = r.read_name_list()?;
        let server_host_key_algorithms = r.read_name_list()?;
        let encryption_algorithms_client_to_server = r.read_name_list()?;
        let encryption_algorithms_server_to_client = r.read_name_list()?;
        let mac_algorithms_client_to_server = r.read_name_list()?;
        let mac_algorithms_server_to_client = r.read_name_list()?;
        let compression_algorithms_client_to_server = r.read_name_list()?;
        let compression_algorithms_server_to_client = r.read_name_list()?;
        let languages_client_to_server = r.read_name_list()?;
        let languages_server_to_client = r.read_name_list()?;
        let first_kex_packet_follows = r.read_bool()?;
        let _reserved = r.read_u32()?;

        Ok(Self {
            cookie,
            kex_algorithms,
            server_host_key_algorithms,
            encryption_algorithms_client_to_server,
            encryption_algorithms_server_to_client,
            mac_algorithms_client_to_server,
            mac_algorithms_server_to_client,
            compression_algorithms_client_to_server,
            compression_algorithms_server_to_client,
            languages_client_to_server,
            languages_server_to_client,
            first_kex_packet_follows,
        })
    }

    /// Checks that `server` offers every algorithm this KEXINIT names.
    ///
    /// Since the client offers one algorithm per slot, negotiation reduces
    /// to membership: the client's single choice must appear somewhere in
    /// the server's list.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::KeyExchange`] naming the first slot the server
    /// cannot satisfy.
    pub fn check_supported(&self, server: &KexInit) -> KeelResult<()> {
        const SLOTS: [&str; 8] = [
            "kex",
            "host key",
            "cipher c2s",
            "cipher s2c",
            "mac c2s",
            "mac s2c",
            "compression c2s",
            "compression s2c",
        ];

        let ours = self.name_lists();
        let theirs = server.name_lists();

        for (slot, (client, offered)) in SLOTS.iter().zip(ours.iter().zip(theirs.iter())) {
            negotiate_algorithm(client, offered).map_err(|_| {
                KeelError::KeyExchange(format!(
                    "Server does not support {} algorithm {:?} (offered: {:?})",
                    slot, client, offered
                ))
            })?;
        }

        Ok(())
    }

    /// Whether the packet following the server's KEXINIT must be dropped.
    ///
    /// A server that sets `first_kex_packet_follows` sends a packet for the
    /// method it guessed. The guess is right only when its preferred kex
    /// and host key algorithms are ours (RFC 4253 Section 7).
    pub fn discard_guessed_packet(&self, server: &KexInit) -> bool {
        server.first_kex_packet_follows
            && (server.kex_algorithms.first() != self.kex_algorithms.first()
                || server.server_host_key_algorithms.first()
                    != self.server_host_key_algorithms.first())
    }

    fn name_lists(&self) -> [&Vec<String>; 10] {
        [
            &self.kex_algorithms,
            &self.server_host_key_algorithms,
            &self.encryption_algorithms_client_to_server,
            &self.encryption_algorithms_server_to_client,
            &self.mac_algorithms_client_to_server,
            &self.mac_algorithms_server_to_client,
            &self.compression_algorithms_client_to_server,
            &self.compression_algorithms_server_to_client,
            &self.languages_client_to_server,
            &self.languages_server_to_client,
        ]
    }
}

/// SSH_MSG_NEWKEYS message (RFC 4253 Section 7.3).
///
/// Sent by both sides once the key exchange completes. Packets after it
/// in each direction use the derived keys. Sequence numbers keep counting.
///
/// # Example
///
/// ```rust
/// use keel_proto::ssh::kex::NewKeys;
///
/// let bytes = NewKeys::new().to_bytes();
/// assert_eq!(NewKeys::from_bytes(&bytes).unwrap(), NewKeys::new());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NewKeys;

impl NewKeys {
    /// Creates a new SSH_MSG_NEWKEYS message.
    pub const fn new() -> Self {
        Self
    }

    /// Serializes the message: a single byte 21.
    pub fn to_bytes(&self) -> Vec<u8> {
        vec![MessageType::NewKeys.as_u8()]
    }

    /// Parses a NEWKEYS message.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if the message is empty or of another type.
    pub fn from_bytes(data: &[u8]) -> KeelResult<Self> {
        WireReader::new(data).expect_type(MessageType::NewKeys)?;
        Ok(Self)
    }
}

/// Picks the first algorithm from `client_list` that `server_list` also
/// contains (RFC 4253 Section 7.1).
///
/// # Errors
///
/// Returns [`KeelError::Protocol`] if the lists share no algorithm.
///
/// # Example
///
/// ```rust
/// use keel_proto::ssh::kex::negotiate_algorithm;
///
/// let client = vec!["3des-cbc".to_string()];
/// let server = vec!["aes128-ctr".to_string(), "3des-cbc".to_string()];
/// assert_eq!(negotiate_algorithm(&client, &server).unwrap(), "3des-cbc");
/// ```
pub fn negotiate_algorithm(client_list: &[String], server_list: &[String]) -> KeelResult<String> {
    client_list
        .iter()
        .find(|alg| server_list.contains(alg))
        .cloned()
        .ok_or_else(|| {
            KeelError::Protocol(format!(
                "No common algorithm: client={:?}, server={:?}",
                client_list, server_list
            ))
        })
}
