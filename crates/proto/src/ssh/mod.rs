//! SSH-2 client protocol stack.
//!
//! This module implements the client side of RFC 4251-4254 for a single,
//! fixed algorithm suite:
//!
//! | Slot | Algorithm |
//! |------|-----------|
//! | Key exchange | `diffie-hellman-group1-sha1` |
//! | Host key | `ssh-dss` |
//! | Cipher | `3des-cbc` |
//! | MAC | `hmac-sha1` |
//! | Compression | `none` |
//!
//! # Architecture
//!
//! The implementation is layered:
//!
//! 1. **Wire encoding** ([`wire`], [`mpint`]) - Field builder and reader, SSH big integers
//! 2. **Packet Layer** ([`packet`]) - Binary packet protocol (RFC 4253 Section 6)
//! 3. **Crypto** ([`crypto`]) - 3DES-CBC, SHA-1 accumulator, HMAC-SHA1
//! 4. **Key exchange** ([`kex`], [`kex_dh`], [`hostkey`]) - KEXINIT, DH group 1, DSA verification
//! 5. **Transport** ([`transport`], [`version`]) - Session state, sequence numbers, key activation
//! 6. **Authentication** ([`auth`]) - Service request, password authentication (RFC 4252)
//! 7. **Connection** ([`connection`], [`channel`]) - Session channel and flow control (RFC 4254)
//! 8. **Client** ([`client`], [`io`]) - The session driver and tokio transports
//!
//! # Example
//!
//! ```rust
//! use keel_proto::ssh::Packet;
//!
//! let packet = Packet::new(b"\x05\x00\x00\x00\x0cssh-userauth".to_vec()).unwrap();
//! let bytes = packet.to_bytes();
//!
//! let parsed = Packet::from_bytes(&bytes).unwrap();
//! assert_eq!(parsed.payload(), packet.payload());
//! assert_eq!(bytes.len() % 8, 0);
//! ```
//!
//! # References
//!
//! - [RFC 4251](https://datatracker.ietf.org/doc/html/rfc4251) - SSH Protocol Architecture
//! - [RFC 4252](https://datatracker.ietf.org/doc/html/rfc4252) - SSH Authentication Protocol
//! - [RFC 4253](https://datatracker.ietf.org/doc/html/rfc4253) - SSH Transport Layer Protocol
//! - [RFC 4254](https://datatracker.ietf.org/doc/html/rfc4254) - SSH Connection Protocol

pub mod auth;
pub mod channel;
pub mod client;
pub mod connection;
pub mod crypto;
pub mod hostkey;
pub mod io;
pub mod kex;
pub mod kex_dh;
pub mod logging;
pub mod message;
pub mod mpint;
pub mod packet;
pub mod transport;
pub mod version;
pub mod wire;

// Re-export main types
pub use auth::{AuthAttempts, AuthBanner, AuthFailure, AuthMethod, AuthRequest, ServiceRequest};
pub use channel::{translate_output, ChannelParams, ChannelState, SshChannel};
pub use client::{ShellEnd, SshClient, SshClientConfig};
pub use connection::{ChannelMessage, ChannelOpen, ChannelRequest, ChannelRequestType};
pub use crypto::{HashAccumulator, MacKey, TripleDesCbc};
pub use hostkey::{DssPublicKey, DssSignature};
pub use io::{StreamTransport, TcpTransport};
pub use kex::{KexInit, NewKeys};
pub use kex_dh::{derive_key, DhGroup1Exchange, KexOutcome, KexState, KexTranscript, SessionKeys};
pub use message::{DisconnectReason, Message, MessageType};
pub use mpint::MpInt;
pub use packet::{Packet, PacketFramer};
pub use transport::{State, TransportState};
pub use version::Version;
