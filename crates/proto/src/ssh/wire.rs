//! Field-level encoding for SSH message payloads (RFC 4251 Section 5).
//!
//! [`WireWriter`] builds a payload by appending fields in order.
//! [`WireReader`] walks a received payload, checking every declared length
//! against the bytes actually present before slicing.

use bytes::{BufMut, BytesMut};
use keel_platform::{KeelError, KeelResult};
use num_bigint::BigUint;

use super::message::MessageType;
use super::mpint::MpInt;

/// Ordered payload builder.
#[derive(Debug, Default, Clone)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    /// Creates an empty payload.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Creates a payload that starts with the message type byte.
    pub fn message(msg_type: MessageType) -> Self {
        let mut writer = Self::new();
        writer.put_u8(msg_type.as_u8());
        writer
    }

    /// Appends a single byte.
    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    /// Appends a boolean (one byte, 0 or 1).
    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.buf.put_u8(u8::from(value));
        self
    }

    /// Appends a big-endian uint32.
    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32(value);
        self
    }

    /// Appends raw bytes without a length prefix.
    pub fn put_raw(&mut self, data: &[u8]) -> &mut Self {
        self.buf.put_slice(data);
        self
    }

    /// Appends a length-prefixed string.
    pub fn put_string(&mut self, data: &[u8]) -> &mut Self {
        self.buf.put_u32(data.len() as u32);
        self.buf.put_slice(data);
        self
    }

    /// Appends a length-prefixed UTF-8 string.
    pub fn put_str(&mut self, s: &str) -> &mut Self {
        self.put_string(s.as_bytes())
    }

    /// Appends a comma-separated name-list.
    pub fn put_name_list(&mut self, names: &[&str]) -> &mut Self {
        self.put_str(&names.join(","))
    }

    /// Appends an mpint.
    pub fn put_mpint(&mut self, value: &BigUint) -> &mut Self {
        self.buf.put_slice(&MpInt::new(value.clone()).to_wire());
        self
    }

    /// Current payload length.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finishes the payload.
    pub fn finish(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// Length-validated payload cursor.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> WireReader<'a> {
    /// Starts reading at the beginning of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Consumes the leading type byte, failing if it is not `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if the payload is empty or starts with
    /// another message type.
    pub fn expect_type(&mut self, expected: MessageType) -> KeelResult<()> {
        let got = self.read_u8()?;
        if got != expected.as_u8() {
            return Err(KeelError::Protocol(format!(
                "Invalid message type: expected {}, got {}",
                expected, got
            )));
        }
        Ok(())
    }

    /// Reads `n` raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if fewer than `n` bytes remain.
    pub fn read_raw(&mut self, n: usize) -> KeelResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                KeelError::Protocol(format!(
                    "Field truncated at offset {}: need {} bytes, {} remain",
                    self.offset,
                    n,
                    self.remaining()
                ))
            })?;

        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    /// Reads a single byte.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] at end of payload.
    pub fn read_u8(&mut self) -> KeelResult<u8> {
        Ok(self.read_raw(1)?[0])
    }

    /// Reads a boolean (any non-zero byte is true).
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] at end of payload.
    pub fn read_bool(&mut self) -> KeelResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a big-endian uint32.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if fewer than 4 bytes remain.
    pub fn read_u32(&mut self) -> KeelResult<u32> {
        let b = self.read_raw(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a length-prefixed string as raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if the declared length overruns the payload.
    pub fn read_string(&mut self) -> KeelResult<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.read_raw(len)
    }

    /// Reads a length-prefixed string and checks that it is UTF-8.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] on truncation or invalid UTF-8.
    pub fn read_utf8(&mut self) -> KeelResult<String> {
        let bytes = self.read_string()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| KeelError::Protocol("String field contains invalid UTF-8".to_string()))
    }

    /// Reads a comma-separated name-list.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] on truncation or invalid UTF-8.
    pub fn read_name_list(&mut self) -> KeelResult<Vec<String>> {
        let list = self.read_utf8()?;
        if list.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(list.split(',').map(String::from).collect())
        }
    }

    /// Reads an mpint.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] on truncation or a negative value.
    pub fn read_mpint(&mut self) -> KeelResult<BigUint> {
        let (value, used) = MpInt::from_wire(&self.data[self.offset..])?;
        self.offset += used;
        Ok(value.into_inner())
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Whether the whole payload has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Current offset into the payload.
    pub fn position(&self) -> usize {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_field_order() {
        let mut w = WireWriter::message(MessageType::ServiceRequest);
        w.put_str("ssh-userauth");
        let bytes = w.finish();

        assert_eq!(bytes[0], 5);
        assert_eq!(&bytes[1..5], &[0, 0, 0, 12]);
        assert_eq!(&bytes[5..], b"ssh-userauth");
    }

    #[test]
    fn test_reader_fields() {
        let mut w = WireWriter::new();
        w.put_u8(7)
            .put_bool(true)
            .put_u32(0xdeadbeef)
            .put_str("abc")
            .put_name_list(&["a", "b"])
            .put_mpint(&BigUint::from(0x80u32));
        let bytes = w.finish();

        let mut r = WireReader::new(&bytes);
        assert_eq!(r.read_u8().unwrap(), 7);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_u32().unwrap(), 0xdeadbeef);
        assert_eq!(r.read_utf8().unwrap(), "abc");
        assert_eq!(r.read_name_list().unwrap(), vec!["a", "b"]);
        assert_eq!(r.read_mpint().unwrap(), BigUint::from(0x80u32));
        assert!(r.is_empty());
    }

    #[test]
    fn test_empty_name_list() {
        let mut w = WireWriter::new();
        w.put_name_list(&[]);
        let bytes = w.finish();
        assert_eq!(bytes, vec![0, 0, 0, 0]);

        let mut r = WireReader::new(&bytes);
        assert!(r.read_name_list().unwrap().is_empty());
    }

    #[test]
    fn test_string_length_overrun() {
        let bytes = [0, 0, 0, 10, b'a', b'b'];
        let mut r = WireReader::new(&bytes);
        assert!(matches!(r.read_string(), Err(KeelError::Protocol(_))));
    }

    #[test]
    fn test_huge_length_does_not_overflow() {
        let bytes = [0xff, 0xff, 0xff, 0xff];
        let mut r = WireReader::new(&bytes);
        assert!(r.read_string().is_err());
    }

    #[test]
    fn test_expect_type() {
        let bytes = [21u8];
        let mut r = WireReader::new(&bytes);
        assert!(r.expect_type(MessageType::NewKeys).is_ok());

        let mut r = WireReader::new(&bytes);
        assert!(r.expect_type(MessageType::KexInit).is_err());

        let mut r = WireReader::new(&[]);
        assert!(r.expect_type(MessageType::KexInit).is_err());
    }
}
