//! SSH `mpint` wire codec (RFC 4251 Section 5).
//!
//! # Format
//!
//! ```text
//! uint32    length
//! byte[n]   two's complement big-endian value
//! ```
//!
//! Only non-negative values occur in this protocol (DH values, DSA
//! parameters, the shared secret). A value whose most significant byte has
//! its high bit set gets an extra leading `0x00` so that it is not read back
//! as negative. Zero is encoded with length 0.
//!
//! # Example
//!
//! ```rust
//! use keel_proto::ssh::mpint::MpInt;
//!
//! let value = MpInt::from_hex("80").unwrap();
//! assert_eq!(value.to_wire(), vec![0, 0, 0, 2, 0x00, 0x80]);
//!
//! let (decoded, used) = MpInt::from_wire(&value.to_wire()).unwrap();
//! assert_eq!(decoded, value);
//! assert_eq!(used, 6);
//! ```

use std::fmt;

use keel_platform::{KeelError, KeelResult};
use num_bigint::BigUint;

/// Upper bound on accepted mpint body size (16384-bit values).
pub const MAX_MPINT_LEN: usize = 2048;

/// Non-negative arbitrary-precision integer with SSH wire encoding.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MpInt {
    value: BigUint,
}

impl MpInt {
    /// Wraps an existing big integer.
    pub fn new(value: BigUint) -> Self {
        Self { value }
    }

    /// Parses a big-endian hexadecimal string.
    ///
    /// Odd digit counts are accepted (`"abc"` is `0x0abc`), as is an
    /// optional `0x` prefix.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if the string is empty or contains a
    /// non-hex character.
    pub fn from_hex(hex_str: &str) -> KeelResult<Self> {
        let digits = hex_str
            .strip_prefix("0x")
            .or_else(|| hex_str.strip_prefix("0X"))
            .unwrap_or(hex_str);

        if digits.is_empty() {
            return Err(KeelError::Protocol("Empty hex string".to_string()));
        }

        let padded;
        let even = if digits.len() % 2 == 1 {
            padded = format!("0{}", digits);
            padded.as_str()
        } else {
            digits
        };

        let bytes = hex::decode(even)
            .map_err(|e| KeelError::Protocol(format!("Invalid hex integer: {}", e)))?;

        Ok(Self::new(BigUint::from_bytes_be(&bytes)))
    }

    /// Lowercase hexadecimal rendering without leading zeros (`"0"` for zero).
    pub fn to_hex(&self) -> String {
        self.value.to_str_radix(16)
    }

    /// Decodes an mpint from the start of `data`.
    ///
    /// Returns the value and the number of bytes consumed (4 + length).
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if:
    /// - Fewer than 4 bytes are available for the length
    /// - The declared body is truncated or larger than [`MAX_MPINT_LEN`]
    /// - The value is negative (high bit set on the first body byte)
    pub fn from_wire(data: &[u8]) -> KeelResult<(Self, usize)> {
        if data.len() < 4 {
            return Err(KeelError::Protocol(format!(
                "mpint truncated: {} bytes, need 4 for length",
                data.len()
            )));
        }

        let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

        if length > MAX_MPINT_LEN {
            return Err(KeelError::Protocol(format!(
                "mpint too large: {} bytes (maximum {})",
                length, MAX_MPINT_LEN
            )));
        }

        let body = data.get(4..4 + length).ok_or_else(|| {
            KeelError::Protocol(format!(
                "mpint body truncated: expected {} bytes, got {}",
                length,
                data.len() - 4
            ))
        })?;

        if body.first().is_some_and(|b| b & 0x80 != 0) {
            return Err(KeelError::Protocol(
                "Negative mpint where a non-negative value is required".to_string(),
            ));
        }

        Ok((Self::new(BigUint::from_bytes_be(body)), 4 + length))
    }

    /// Encodes this value in wire form, length prefix included.
    pub fn to_wire(&self) -> Vec<u8> {
        let body = self.body();
        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&(body.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        out
    }

    /// Size of [`MpInt::to_wire`] output in bytes.
    pub fn wire_len(&self) -> usize {
        4 + self.body().len()
    }

    /// The underlying big integer.
    pub fn value(&self) -> &BigUint {
        &self.value
    }

    /// Consumes the wrapper, returning the big integer.
    pub fn into_inner(self) -> BigUint {
        self.value
    }

    fn body(&self) -> Vec<u8> {
        if self.value.bits() == 0 {
            return Vec::new();
        }

        let magnitude = self.value.to_bytes_be();
        if magnitude[0] & 0x80 != 0 {
            let mut body = Vec::with_capacity(magnitude.len() + 1);
            body.push(0);
            body.extend_from_slice(&magnitude);
            body
        } else {
            magnitude
        }
    }
}

impl From<BigUint> for MpInt {
    fn from(value: BigUint) -> Self {
        Self::new(value)
    }
}

impl From<u64> for MpInt {
    fn from(value: u64) -> Self {
        Self::new(BigUint::from(value))
    }
}

impl fmt::Debug for MpInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MpInt(0x{})", self.to_hex())
    }
}

impl fmt::Display for MpInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Encodes `value` in wire form.
pub fn encode(value: &BigUint) -> Vec<u8> {
    MpInt::new(value.clone()).to_wire()
}
