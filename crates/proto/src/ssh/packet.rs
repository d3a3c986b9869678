//! SSH binary packet protocol (RFC 4253 Section 6).
//!
//! # Packet Format
//!
//! ```text
//! uint32    packet_length
//! byte      padding_length
//! byte[n1]  payload (n1 = packet_length - padding_length - 1)
//! byte[n2]  random padding (n2 = padding_length)
//! byte[m]   mac (20 bytes once hmac-sha1 is active)
//! ```
//!
//! # Constraints
//!
//! - `packet_length` excludes the MAC and the length field itself
//! - `padding_length` is between 4 and 255
//! - `packet_length + 4` is a multiple of 8 (the 3DES block size), and the
//!   unauthenticated packet is at least 16 bytes
//!
//! # Framing
//!
//! [`seal`] turns one payload into wire bytes: pad, tag, encrypt.
//! [`PacketFramer`] goes the other way over an arbitrary byte stream. The
//! transport only promises ordered bytes, so a read may hold half a packet
//! or several packets back to back. The framer buffers what it is given and
//! hands out whole packets one at a time, in arrival order.
//!
//! # Example
//!
//! ```rust
//! use keel_proto::ssh::packet::{seal, PacketFramer};
//!
//! let wire = seal(b"\x05hello", 0, None, None).unwrap();
//!
//! let mut framer = PacketFramer::new();
//! framer.feed(&wire[..7]);
//! assert!(framer.next_packet(0, None, None).unwrap().is_none());
//!
//! framer.feed(&wire[7..]);
//! let packet = framer.next_packet(0, None, None).unwrap().unwrap();
//! assert_eq!(packet.payload(), b"\x05hello");
//! ```

use bytes::{Buf, BufMut, BytesMut};
use keel_platform::{KeelError, KeelResult};
use rand::RngCore;
use tracing::trace;

use super::crypto::{MacKey, TripleDesCbc, BLOCK_SIZE, DIGEST_SIZE};

/// Maximum size of a packet we build, and the channel maximum packet size we
/// advertise.
pub const MAX_PACKET_SIZE: usize = 35000;

/// Largest `packet_length` accepted from the peer.
pub const MAX_INBOUND_PACKET_LENGTH: usize = 256 * 1024;

/// Minimum unauthenticated packet size in bytes.
pub const MIN_PACKET_SIZE: usize = 16;

/// Minimum padding length in bytes.
pub const MIN_PADDING_LEN: u8 = 4;

/// Maximum padding length in bytes (fits in u8).
pub const MAX_PADDING_LEN: u8 = 255;

const HEADER_LEN: usize = 5;

/// Smallest padding length for a payload of `payload_len` bytes.
///
/// The result `p` satisfies `(payload_len + 5 + p) % 8 == 0`,
/// `payload_len + 5 + p >= 16` and `4 <= p <= 255`.
///
/// # Example
///
/// ```rust
/// use keel_proto::ssh::packet::padding_len;
///
/// // 22-byte payload: 5 + 22 + 5 = 32
/// assert_eq!(padding_len(22), 5);
/// ```
pub fn padding_len(payload_len: usize) -> usize {
    let unpadded = HEADER_LEN + payload_len;
    let mut padding = MIN_PADDING_LEN as usize;
    while (unpadded + padding) % BLOCK_SIZE != 0 || unpadded + padding < MIN_PACKET_SIZE {
        padding += 1;
    }
    padding
}

/// A decoded SSH packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    payload: Vec<u8>,
    padding: Vec<u8>,
    mac: Option<Vec<u8>>,
}

impl Packet {
    /// Creates a packet around `payload` with fresh random padding.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if the packet would exceed
    /// [`MAX_PACKET_SIZE`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use keel_proto::ssh::Packet;
    ///
    /// let packet = Packet::new(b"\x02ignored data payload.".to_vec()).unwrap();
    /// assert_eq!(packet.padding().len(), 5);
    /// assert_eq!(packet.packet_length(), 28);
    /// ```
    pub fn new(payload: Vec<u8>) -> KeelResult<Self> {
        let padding_len = padding_len(payload.len());
        let total = HEADER_LEN + payload.len() + padding_len;

        if total > MAX_PACKET_SIZE {
            return Err(KeelError::Protocol(format!(
                "Packet size {} exceeds maximum {}",
                total, MAX_PACKET_SIZE
            )));
        }

        let mut padding = vec![0u8; padding_len];
        rand::thread_rng().fill_bytes(&mut padding);

        Ok(Self {
            payload,
            padding,
            mac: None,
        })
    }

    /// Message payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the packet, returning its payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Message type byte (first payload byte), if any.
    pub fn msg_type(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    /// Random padding.
    pub fn padding(&self) -> &[u8] {
        &self.padding
    }

    /// MAC received with or attached to this packet.
    pub fn mac(&self) -> Option<&[u8]> {
        self.mac.as_deref()
    }

    /// Attaches a MAC.
    pub fn set_mac(&mut self, mac: Vec<u8>) {
        self.mac = Some(mac);
    }

    /// Value of the `packet_length` field.
    pub fn packet_length(&self) -> u32 {
        (1 + self.payload.len() + self.padding.len()) as u32
    }

    /// Serializes the unencrypted packet, MAC excluded.
    pub fn to_plaintext(&self) -> Vec<u8> {
        let packet_length = self.packet_length() as usize;
        let mut buf = BytesMut::with_capacity(4 + packet_length);

        buf.put_u32(packet_length as u32);
        buf.put_u8(self.padding.len() as u8);
        buf.put_slice(&self.payload);
        buf.put_slice(&self.padding);

        buf.to_vec()
    }

    /// Serializes the unencrypted packet followed by its MAC, if any.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.to_plaintext();
        if let Some(mac) = &self.mac {
            bytes.extend_from_slice(mac);
        }
        bytes
    }

    /// Parses an unencrypted packet. Bytes after the declared length are
    /// taken as the MAC.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if:
    /// - Data is shorter than the 5-byte header or the declared length
    /// - The declared length exceeds [`MAX_INBOUND_PACKET_LENGTH`]
    /// - Padding is shorter than 4 bytes or does not fit the packet
    pub fn from_bytes(data: &[u8]) -> KeelResult<Self> {
        if data.len() < HEADER_LEN {
            return Err(KeelError::Protocol(format!(
                "Packet too short: {} bytes (minimum {})",
                data.len(),
                HEADER_LEN
            )));
        }

        let mut buf = data;
        let packet_length = buf.get_u32() as usize;
        check_packet_length(packet_length)?;

        if buf.len() < packet_length {
            return Err(KeelError::Protocol(format!(
                "Incomplete packet: expected {} bytes, got {} bytes",
                packet_length,
                buf.len()
            )));
        }

        let padding_length = buf.get_u8() as usize;
        if padding_length < MIN_PADDING_LEN as usize {
            return Err(KeelError::Protocol(format!(
                "Padding too short: {} bytes (minimum {})",
                padding_length, MIN_PADDING_LEN
            )));
        }
        if padding_length + 1 > packet_length {
            return Err(KeelError::Protocol(format!(
                "Invalid packet: packet_length ({}) too small for padding ({})",
                packet_length, padding_length
            )));
        }

        let payload_length = packet_length - 1 - padding_length;
        let payload = buf[..payload_length].to_vec();
        buf.advance(payload_length);
        let padding = buf[..padding_length].to_vec();
        buf.advance(padding_length);

        let mac = if buf.is_empty() {
            None
        } else {
            Some(buf.to_vec())
        };

        Ok(Self {
            payload,
            padding,
            mac,
        })
    }
}

fn check_packet_length(packet_length: usize) -> KeelResult<()> {
    if packet_length > MAX_INBOUND_PACKET_LENGTH {
        return Err(KeelError::Protocol(format!(
            "Packet too large: {} bytes (maximum {})",
            packet_length, MAX_INBOUND_PACKET_LENGTH
        )));
    }
    if (packet_length + 4) % BLOCK_SIZE != 0 || packet_length + 4 < MIN_PACKET_SIZE {
        return Err(KeelError::Protocol(format!(
            "Malformed packet length {}: total must be a multiple of {} and at least {}",
            packet_length, BLOCK_SIZE, MIN_PACKET_SIZE
        )));
    }
    Ok(())
}

/// Encodes `payload` as one wire packet.
///
/// With a MAC key, the tag is HMAC-SHA1 over `sequence || plaintext packet`.
/// With a cipher, everything but the trailing tag is encrypted.
///
/// # Errors
///
/// Returns [`KeelError::Protocol`] if the payload is too large.
pub fn seal(
    payload: &[u8],
    sequence: u32,
    mac: Option<&MacKey>,
    cipher: Option<&mut TripleDesCbc>,
) -> KeelResult<Vec<u8>> {
    let packet = Packet::new(payload.to_vec())?;
    let mut wire = packet.to_plaintext();

    let tag = mac.map(|key| key.compute(sequence, &wire));

    if let Some(cipher) = cipher {
        cipher.encrypt(&mut wire)?;
    }
    if let Some(tag) = tag {
        wire.extend_from_slice(&tag);
    }

    trace!(
        sequence,
        payload_len = payload.len(),
        wire_len = wire.len(),
        "sealed packet"
    );
    Ok(wire)
}

/// Inbound stream reassembler.
#[derive(Debug, Default)]
pub struct PacketFramer {
    buffer: BytesMut,
    /// First block of the next packet, already decrypted.
    header: Option<[u8; BLOCK_SIZE]>,
}

impl PacketFramer {
    /// Creates an empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes received from the transport.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet returned as a packet.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Extracts the next complete packet, if the buffer holds one.
    ///
    /// `Ok(None)` means more bytes are needed. The first cipher block of a
    /// packet is decrypted once and cached, so a partial packet can be
    /// retried after the next [`feed`](Self::feed) without disturbing the
    /// CBC chaining state.
    ///
    /// # Errors
    ///
    /// - [`KeelError::Protocol`] for a malformed length or padding
    /// - [`KeelError::MacMismatch`] if the packet's MAC does not verify
    pub fn next_packet(
        &mut self,
        sequence: u32,
        mac: Option<&MacKey>,
        mut cipher: Option<&mut TripleDesCbc>,
    ) -> KeelResult<Option<Packet>> {
        let header = match self.header {
            Some(header) => header,
            None => {
                if self.buffer.len() < BLOCK_SIZE {
                    return Ok(None);
                }
                let mut block = [0u8; BLOCK_SIZE];
                block.copy_from_slice(&self.buffer[..BLOCK_SIZE]);
                if let Some(cipher) = cipher.as_deref_mut() {
                    cipher.decrypt(&mut block)?;
                }
                self.header = Some(block);
                block
            }
        };

        let packet_length =
            u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        check_packet_length(packet_length)?;

        let mac_len = if mac.is_some() { DIGEST_SIZE } else { 0 };
        let total = 4 + packet_length + mac_len;
        if self.buffer.len() < total {
            trace!(
                needed = total,
                buffered = self.buffer.len(),
                "waiting for rest of packet"
            );
            return Ok(None);
        }

        let raw = self.buffer.split_to(total);
        self.header = None;

        let mut plain = Vec::with_capacity(4 + packet_length);
        plain.extend_from_slice(&header);
        let mut rest = raw[BLOCK_SIZE..4 + packet_length].to_vec();
        if let Some(cipher) = cipher {
            cipher.decrypt(&mut rest)?;
        }
        plain.extend_from_slice(&rest);

        let received_mac = &raw[4 + packet_length..];
        if let Some(key) = mac {
            key.verify(sequence, &plain, received_mac)?;
        }

        let mut packet = Packet::from_bytes(&plain)?;
        if mac.is_some() {
            packet.set_mac(received_mac.to_vec());
        }

        trace!(sequence, packet_length, "opened packet");
        Ok(Some(packet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher_pair() -> (TripleDesCbc, TripleDesCbc) {
        let k_out = [0x11u8; 24];
        let k_in = [0x22u8; 24];
        let iv_out = [0x33u8; 8];
        let iv_in = [0x44u8; 8];
        let client = TripleDesCbc::new(&k_out, &iv_out, &k_in, &iv_in).unwrap();
        let server = TripleDesCbc::new(&k_in, &iv_in, &k_out, &iv_out).unwrap();
        (client, server)
    }

    #[test]
    fn test_padding_invariant() {
        for len in 0..2000 {
            let p = padding_len(len);
            let total = len + 5 + p;
            assert_eq!(total % 8, 0, "payload {}", len);
            assert!(total >= 16, "payload {}", len);
            assert!((4..=255).contains(&p), "payload {}", len);
        }
    }

    #[test]
    fn test_padding_example() {
        let payload = b"eplefjes og tur i mark";
        assert_eq!(payload.len(), 22);
        assert_eq!(padding_len(payload.len()), 5);

        let packet = Packet::new(payload.to_vec()).unwrap();
        let plain = packet.to_plaintext();
        assert_eq!(plain.len(), 32);
        assert_eq!(&plain[..4], &[0, 0, 0, 28]);
        assert_eq!(plain[4], 5);
    }

    #[test]
    fn test_small_payloads_reach_minimum_size() {
        assert_eq!(padding_len(0), 11);
        assert_eq!(padding_len(1), 10);
        assert_eq!(padding_len(3), 8);
        assert_eq!(padding_len(4), 7);
    }

    #[test]
    fn test_packet_round_trip() {
        let packet = Packet::new(b"Test SSH packet payload".to_vec()).unwrap();
        let parsed = Packet::from_bytes(&packet.to_bytes()).unwrap();
        assert_eq!(parsed, packet);
        assert_eq!(parsed.msg_type(), Some(b'T'));
    }

    #[test]
    fn test_packet_too_large() {
        let result = Packet::new(vec![0u8; MAX_PACKET_SIZE]);
        assert!(matches!(result, Err(KeelError::Protocol(_))));
    }

    #[test]
    fn test_packet_invalid_padding_too_short() {
        let data = vec![
            0, 0, 0, 12, // packet_length = 12
            2,  // padding_length = 2
            0x48, 0x65, 0x6c, 0x6c, 0x6f, 0x21, 0x21, 0x21, 0x21, // payload
            0x00, 0x00, // padding
        ];
        match Packet::from_bytes(&data) {
            Err(KeelError::Protocol(msg)) => assert!(msg.contains("Padding too short")),
            other => panic!("Expected Protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_unaligned_length_is_fatal() {
        let mut framer = PacketFramer::new();
        framer.feed(&[0, 0, 0, 13, 4, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        assert!(matches!(
            framer.next_packet(0, None, None),
            Err(KeelError::Protocol(_))
        ));
    }

    #[test]
    fn test_oversized_length_is_fatal() {
        let mut framer = PacketFramer::new();
        framer.feed(&[0x00, 0x10, 0x00, 0x04, 4, 0, 0, 0]);
        assert!(framer.next_packet(0, None, None).is_err());
    }

    #[test]
    fn test_framer_plaintext_batched_read() {
        let a = seal(b"\x14first", 0, None, None).unwrap();
        let b = seal(b"\x15", 1, None, None).unwrap();
        let c = seal(b"\x02third packet", 2, None, None).unwrap();

        let mut stream = a.clone();
        stream.extend_from_slice(&b);
        stream.extend_from_slice(&c);
        stream.extend_from_slice(&[0, 0]);

        let mut framer = PacketFramer::new();
        framer.feed(&stream);

        let mut payloads = Vec::new();
        while let Some(packet) = framer.next_packet(0, None, None).unwrap() {
            payloads.push(packet.into_payload());
        }

        assert_eq!(
            payloads,
            vec![
                b"\x14first".to_vec(),
                b"\x15".to_vec(),
                b"\x02third packet".to_vec()
            ]
        );
        assert_eq!(framer.buffered(), 2);
    }

    #[test]
    fn test_framer_encrypted_split_reads() {
        let (mut client, mut server) = cipher_pair();
        let mac_key = MacKey::new(&[0x55; 20]).unwrap();

        let mut stream = Vec::new();
        for (seq, payload) in [b"\x5eone".as_ref(), b"\x5etwo two", b"\x5ethree three three"]
            .iter()
            .enumerate()
        {
            stream.extend(seal(payload, seq as u32, Some(&mac_key), Some(&mut client)).unwrap());
        }

        let mut framer = PacketFramer::new();
        let mut seq = 0u32;
        let mut received = Vec::new();

        // Deliver three bytes at a time.
        for chunk in stream.chunks(3) {
            framer.feed(chunk);
            while let Some(packet) = framer
                .next_packet(seq, Some(&mac_key), Some(&mut server))
                .unwrap()
            {
                assert_eq!(packet.mac().map(|m| m.len()), Some(20));
                received.push(packet.into_payload());
                seq += 1;
            }
        }

        assert_eq!(seq, 3);
        assert_eq!(received[0], b"\x5eone");
        assert_eq!(received[1], b"\x5etwo two");
        assert_eq!(received[2], b"\x5ethree three three");
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_framer_detects_tampered_mac() {
        let (mut client, mut server) = cipher_pair();
        let mac_key = MacKey::new(&[0x55; 20]).unwrap();

        let mut wire = seal(b"\x5edata", 7, Some(&mac_key), Some(&mut client)).unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0x01;

        let mut framer = PacketFramer::new();
        framer.feed(&wire);
        assert!(matches!(
            framer.next_packet(7, Some(&mac_key), Some(&mut server)),
            Err(KeelError::MacMismatch { sequence: 7 })
        ));
    }

    #[test]
    fn test_framer_detects_wrong_sequence() {
        let mac_key = MacKey::new(&[0x55; 20]).unwrap();
        let wire = seal(b"\x5edata", 1, Some(&mac_key), None).unwrap();

        let mut framer = PacketFramer::new();
        framer.feed(&wire);
        assert!(framer.next_packet(2, Some(&mac_key), None).is_err());
    }

    #[test]
    fn test_sealed_length_field() {
        let mac_key = MacKey::new(&[0x01; 20]).unwrap();
        let wire = seal(b"eplefjes og tur i mark", 0, Some(&mac_key), None).unwrap();

        assert_eq!(wire.len(), 32 + 20);
        assert_eq!(&wire[..4], &[0, 0, 0, 28]);
        assert_eq!(&wire[32..], &mac_key.compute(0, &wire[..32])[..]);
    }
}
