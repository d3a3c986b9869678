//! SSH-2 interactive shell client.
//!
//! This crate implements the client side of the Secure Shell protocols over
//! one fixed algorithm suite (3DES-CBC, HMAC-SHA1, Diffie-Hellman group 1,
//! ssh-dss host keys):
//!
//! - Binary packet framing over an arbitrary byte stream
//! - Key exchange with in-band host signature verification
//! - Password authentication
//! - One session channel carrying a pty and a shell
//!
//! # Features
//!
//! - `ssh` (default) - the SSH protocol stack
//!
//! # Example
//!
//! ```rust
//! use keel_proto::ssh::Packet;
//!
//! // Create and serialize an SSH packet
//! let packet = Packet::new(b"\x02ignored".to_vec()).unwrap();
//! let wire_format = packet.to_bytes();
//!
//! // Parse from wire format
//! let parsed = Packet::from_bytes(&wire_format).unwrap();
//! assert_eq!(parsed.payload(), b"\x02ignored");
//! ```
//!
//! # Security
//!
//! - Every received packet's MAC is verified in constant time (`subtle`)
//! - Session keys, the DH private exponent and passwords are zeroized on
//!   drop (`zeroize`)
//! - The suite is legacy: it exists to talk to old servers, not as a
//!   recommendation
//!
//! # References
//!
//! - [RFC 4251](https://datatracker.ietf.org/doc/html/rfc4251) - SSH Protocol Architecture
//! - [RFC 4252](https://datatracker.ietf.org/doc/html/rfc4252) - SSH Authentication Protocol
//! - [RFC 4253](https://datatracker.ietf.org/doc/html/rfc4253) - SSH Transport Layer Protocol
//! - [RFC 4254](https://datatracker.ietf.org/doc/html/rfc4254) - SSH Connection Protocol

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

#[cfg(feature = "ssh")]
pub mod ssh;

/// Protocol crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
