//! SSH message kinds (RFC 4253 Section 12, RFC 4252, RFC 4254).
//!
//! Two layers live here:
//!
//! - [`MessageType`]: the numeric type byte that opens every payload
//! - [`Message`]: a received payload decoded once into a typed value, so the
//!   session and channel code can match exhaustively instead of peeking at
//!   bytes
//!
//! [`DisconnectReason`] carries the reason codes used in
//! SSH_MSG_DISCONNECT in both directions.
//!
//! # Example
//!
//! ```rust
//! use keel_proto::ssh::message::{Message, MessageType};
//!
//! assert_eq!(MessageType::KexInit as u8, 20);
//!
//! let msg = Message::decode(&[52]).unwrap();
//! assert_eq!(msg, Message::UserauthSuccess);
//! ```

use std::fmt;

use keel_platform::{KeelError, KeelResult};

use super::auth::{AuthBanner, AuthFailure};
use super::connection::ChannelMessage;
use super::kex::KexInit;
use super::kex_dh::KexdhReply;
use super::wire::{WireReader, WireWriter};

/// SSH message types used by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    // Transport layer generic (1-19)
    /// Terminates the connection.
    Disconnect = 1,
    /// Ignored by the receiver.
    Ignore = 2,
    /// Reply to a message type the peer does not know.
    Unimplemented = 3,
    /// Debugging text.
    Debug = 4,
    /// Request a service ("ssh-userauth").
    ServiceRequest = 5,
    /// Service request accepted.
    ServiceAccept = 6,

    // Algorithm negotiation (20-29)
    /// Algorithm negotiation.
    KexInit = 20,
    /// Switch to the new keys.
    NewKeys = 21,

    // Key exchange method specific (30-49)
    /// Client DH value e.
    KexdhInit = 30,
    /// Server host key, DH value f and signature.
    KexdhReply = 31,

    // User authentication generic (50-79)
    /// User authentication request.
    UserauthRequest = 50,
    /// User authentication failure.
    UserauthFailure = 51,
    /// User authentication success.
    UserauthSuccess = 52,
    /// Pre-authentication banner.
    UserauthBanner = 53,

    // Connection protocol generic (80-127)
    /// Global request.
    GlobalRequest = 80,
    /// Global request success.
    RequestSuccess = 81,
    /// Global request failure.
    RequestFailure = 82,
    /// Channel open.
    ChannelOpen = 90,
    /// Channel open confirmation.
    ChannelOpenConfirmation = 91,
    /// Channel open failure.
    ChannelOpenFailure = 92,
    /// Channel window adjust.
    ChannelWindowAdjust = 93,
    /// Channel data.
    ChannelData = 94,
    /// Channel extended data (stderr).
    ChannelExtendedData = 95,
    /// Channel EOF.
    ChannelEof = 96,
    /// Channel close.
    ChannelClose = 97,
    /// Channel request.
    ChannelRequest = 98,
    /// Channel request success.
    ChannelSuccess = 99,
    /// Channel request failure.
    ChannelFailure = 100,
}

impl MessageType {
    /// Converts a type byte to a message type.
    ///
    /// # Example
    ///
    /// ```rust
    /// use keel_proto::ssh::message::MessageType;
    ///
    /// assert_eq!(MessageType::from_u8(31), Some(MessageType::KexdhReply));
    /// assert_eq!(MessageType::from_u8(255), None);
    /// ```
    pub fn from_u8(byte: u8) -> Option<Self> {
        let msg_type = match byte {
            1 => MessageType::Disconnect,
            2 => MessageType::Ignore,
            3 => MessageType::Unimplemented,
            4 => MessageType::Debug,
            5 => MessageType::ServiceRequest,
            6 => MessageType::ServiceAccept,
            20 => MessageType::KexInit,
            21 => MessageType::NewKeys,
            30 => MessageType::KexdhInit,
            31 => MessageType::KexdhReply,
            50 => MessageType::UserauthRequest,
            51 => MessageType::UserauthFailure,
            52 => MessageType::UserauthSuccess,
            53 => MessageType::UserauthBanner,
            80 => MessageType::GlobalRequest,
            81 => MessageType::RequestSuccess,
            82 => MessageType::RequestFailure,
            90 => MessageType::ChannelOpen,
            91 => MessageType::ChannelOpenConfirmation,
            92 => MessageType::ChannelOpenFailure,
            93 => MessageType::ChannelWindowAdjust,
            94 => MessageType::ChannelData,
            95 => MessageType::ChannelExtendedData,
            96 => MessageType::ChannelEof,
            97 => MessageType::ChannelClose,
            98 => MessageType::ChannelRequest,
            99 => MessageType::ChannelSuccess,
            100 => MessageType::ChannelFailure,
            _ => return None,
        };
        Some(msg_type)
    }

    /// Numeric type byte.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Protocol name of the message type.
    ///
    /// # Example
    ///
    /// ```rust
    /// use keel_proto::ssh::message::MessageType;
    ///
    /// assert_eq!(MessageType::NewKeys.name(), "SSH_MSG_NEWKEYS");
    /// ```
    pub fn name(&self) -> &'static str {
        match self {
            MessageType::Disconnect => "SSH_MSG_DISCONNECT",
            MessageType::Ignore => "SSH_MSG_IGNORE",
            MessageType::Unimplemented => "SSH_MSG_UNIMPLEMENTED",
            MessageType::Debug => "SSH_MSG_DEBUG",
            MessageType::ServiceRequest => "SSH_MSG_SERVICE_REQUEST",
            MessageType::ServiceAccept => "SSH_MSG_SERVICE_ACCEPT",
            MessageType::KexInit => "SSH_MSG_KEXINIT",
            MessageType::NewKeys => "SSH_MSG_NEWKEYS",
            MessageType::KexdhInit => "SSH_MSG_KEXDH_INIT",
            MessageType::KexdhReply => "SSH_MSG_KEXDH_REPLY",
            MessageType::UserauthRequest => "SSH_MSG_USERAUTH_REQUEST",
            MessageType::UserauthFailure => "SSH_MSG_USERAUTH_FAILURE",
            MessageType::UserauthSuccess => "SSH_MSG_USERAUTH_SUCCESS",
            MessageType::UserauthBanner => "SSH_MSG_USERAUTH_BANNER",
            MessageType::GlobalRequest => "SSH_MSG_GLOBAL_REQUEST",
            MessageType::RequestSuccess => "SSH_MSG_REQUEST_SUCCESS",
            MessageType::RequestFailure => "SSH_MSG_REQUEST_FAILURE",
            MessageType::ChannelOpen => "SSH_MSG_CHANNEL_OPEN",
            MessageType::ChannelOpenConfirmation => "SSH_MSG_CHANNEL_OPEN_CONFIRMATION",
            MessageType::ChannelOpenFailure => "SSH_MSG_CHANNEL_OPEN_FAILURE",
            MessageType::ChannelWindowAdjust => "SSH_MSG_CHANNEL_WINDOW_ADJUST",
            MessageType::ChannelData => "SSH_MSG_CHANNEL_DATA",
            MessageType::ChannelExtendedData => "SSH_MSG_CHANNEL_EXTENDED_DATA",
            MessageType::ChannelEof => "SSH_MSG_CHANNEL_EOF",
            MessageType::ChannelClose => "SSH_MSG_CHANNEL_CLOSE",
            MessageType::ChannelRequest => "SSH_MSG_CHANNEL_REQUEST",
            MessageType::ChannelSuccess => "SSH_MSG_CHANNEL_SUCCESS",
            MessageType::ChannelFailure => "SSH_MSG_CHANNEL_FAILURE",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), *self as u8)
    }
}

/// SSH_MSG_DISCONNECT reason codes (RFC 4253 Section 11.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DisconnectReason {
    /// Host not allowed to connect.
    HostNotAllowedToConnect = 1,
    /// Protocol error.
    ProtocolError = 2,
    /// Key exchange failed.
    KeyExchangeFailed = 3,
    /// Reserved.
    Reserved = 4,
    /// MAC error.
    MacError = 5,
    /// Compression error.
    CompressionError = 6,
    /// Service not available.
    ServiceNotAvailable = 7,
    /// Protocol version not supported.
    ProtocolVersionNotSupported = 8,
    /// Host key not verifiable.
    HostKeyNotVerifiable = 9,
    /// Connection lost.
    ConnectionLost = 10,
    /// Disconnected by application.
    ByApplication = 11,
    /// Too many connections.
    TooManyConnections = 12,
    /// Authentication cancelled by user.
    AuthCancelledByUser = 13,
    /// No more authentication methods available.
    NoMoreAuthMethodsAvailable = 14,
    /// Illegal user name.
    IllegalUserName = 15,
}

impl DisconnectReason {
    /// Converts a reason code; `None` for codes outside 1–15.
    pub fn from_u32(code: u32) -> Option<Self> {
        let reason = match code {
            1 => DisconnectReason::HostNotAllowedToConnect,
            2 => DisconnectReason::ProtocolError,
            3 => DisconnectReason::KeyExchangeFailed,
            4 => DisconnectReason::Reserved,
            5 => DisconnectReason::MacError,
            6 => DisconnectReason::CompressionError,
            7 => DisconnectReason::ServiceNotAvailable,
            8 => DisconnectReason::ProtocolVersionNotSupported,
            9 => DisconnectReason::HostKeyNotVerifiable,
            10 => DisconnectReason::ConnectionLost,
            11 => DisconnectReason::ByApplication,
            12 => DisconnectReason::TooManyConnections,
            13 => DisconnectReason::AuthCancelledByUser,
            14 => DisconnectReason::NoMoreAuthMethodsAvailable,
            15 => DisconnectReason::IllegalUserName,
            _ => return None,
        };
        Some(reason)
    }

    /// Numeric reason code.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Symbolic name without the `SSH_DISCONNECT_` prefix.
    pub fn name(&self) -> &'static str {
        match self {
            DisconnectReason::HostNotAllowedToConnect => "HOST_NOT_ALLOWED_TO_CONNECT",
            DisconnectReason::ProtocolError => "PROTOCOL_ERROR",
            DisconnectReason::KeyExchangeFailed => "KEY_EXCHANGE_FAILED",
            DisconnectReason::Reserved => "RESERVED",
            DisconnectReason::MacError => "MAC_ERROR",
            DisconnectReason::CompressionError => "COMPRESSION_ERROR",
            DisconnectReason::ServiceNotAvailable => "SERVICE_NOT_AVAILABLE",
            DisconnectReason::ProtocolVersionNotSupported => "PROTOCOL_VERSION_NOT_SUPPORTED",
            DisconnectReason::HostKeyNotVerifiable => "HOST_KEY_NOT_VERIFIABLE",
            DisconnectReason::ConnectionLost => "CONNECTION_LOST",
            DisconnectReason::ByApplication => "BY_APPLICATION",
            DisconnectReason::TooManyConnections => "TOO_MANY_CONNECTIONS",
            DisconnectReason::AuthCancelledByUser => "AUTH_CANCELLED_BY_USER",
            DisconnectReason::NoMoreAuthMethodsAvailable => "NO_MORE_AUTH_METHODS_AVAILABLE",
            DisconnectReason::IllegalUserName => "ILLEGAL_USER_NAME",
        }
    }

    /// Name for an arbitrary code, `"UNKNOWN"` outside the table.
    pub fn name_of(code: u32) -> &'static str {
        Self::from_u32(code).map_or("UNKNOWN", |r| r.name())
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

/// SSH_MSG_DISCONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    /// Reason code.
    pub reason: u32,
    /// Description text.
    pub description: String,
    /// Language tag.
    pub language: String,
}

impl Disconnect {
    /// Disconnect for `reason` whose description is the reason's name.
    pub fn new(reason: DisconnectReason) -> Self {
        Self {
            reason: reason.code(),
            description: reason.name().to_string(),
            language: String::new(),
        }
    }

    /// Serializes the message.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::message(MessageType::Disconnect);
        w.put_u32(self.reason)
            .put_str(&self.description)
            .put_str(&self.language);
        w.finish()
    }

    /// Parses the message.
    ///
    /// Description and language are optional on input; some peers omit them.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if the type byte or reason is missing.
    pub fn from_bytes(data: &[u8]) -> KeelResult<Self> {
        let mut r = WireReader::new(data);
        r.expect_type(MessageType::Disconnect)?;
        let reason = r.read_u32()?;
        let description = if r.is_empty() {
            String::new()
        } else {
            String::from_utf8_lossy(r.read_string()?).into_owned()
        };
        let language = if r.is_empty() {
            String::new()
        } else {
            String::from_utf8_lossy(r.read_string()?).into_owned()
        };

        Ok(Self {
            reason,
            description,
            language,
        })
    }
}

/// A received payload, decoded once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Peer is closing the connection.
    Disconnect(Disconnect),
    /// Padding or keep-alive.
    Ignore,
    /// Peer did not understand the packet with this sequence number.
    Unimplemented {
        /// Rejected packet's sequence number.
        sequence: u32,
    },
    /// Debugging text.
    Debug {
        /// Whether the text should be shown to the user.
        always_display: bool,
        /// Text.
        message: String,
    },
    /// Service request accepted.
    ServiceAccept {
        /// Accepted service name.
        service: String,
    },
    /// Algorithm negotiation.
    KexInit(KexInit),
    /// Key switch.
    NewKeys,
    /// DH reply.
    KexdhReply(KexdhReply),
    /// Authentication rejected.
    UserauthFailure(AuthFailure),
    /// Authentication accepted.
    UserauthSuccess,
    /// Pre-authentication banner.
    UserauthBanner(AuthBanner),
    /// Global request from the server.
    GlobalRequest {
        /// Request name.
        name: String,
        /// Whether a reply is expected.
        want_reply: bool,
    },
    /// Connection-layer channel message.
    Channel(ChannelMessage),
    /// Any other type byte, including server-bound messages a client never
    /// expects to receive.
    Unknown {
        /// Raw type byte.
        msg_type: u8,
    },
}

impl Message {
    /// Decodes a packet payload.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if the payload is empty or the fields
    /// of a known message type are malformed.
    pub fn decode(payload: &[u8]) -> KeelResult<Self> {
        let type_byte = *payload
            .first()
            .ok_or_else(|| KeelError::Protocol("Empty message payload".to_string()))?;

        let Some(msg_type) = MessageType::from_u8(type_byte) else {
            return Ok(Message::Unknown {
                msg_type: type_byte,
            });
        };

        let message = match msg_type {
            MessageType::Disconnect => Message::Disconnect(Disconnect::from_bytes(payload)?),
            MessageType::Ignore => Message::Ignore,
            MessageType::Unimplemented => {
                let mut r = WireReader::new(&payload[1..]);
                Message::Unimplemented {
                    sequence: r.read_u32()?,
                }
            }
            MessageType::Debug => {
                let mut r = WireReader::new(&payload[1..]);
                let always_display = r.read_bool()?;
                let message = String::from_utf8_lossy(r.read_string()?).into_owned();
                Message::Debug {
                    always_display,
                    message,
                }
            }
            MessageType::ServiceAccept => {
                let mut r = WireReader::new(&payload[1..]);
                Message::ServiceAccept {
                    service: r.read_utf8()?,
                }
            }
            MessageType::KexInit => Message::KexInit(KexInit::from_bytes(payload)?),
            MessageType::NewKeys => Message::NewKeys,
            MessageType::KexdhReply => Message::KexdhReply(KexdhReply::from_bytes(payload)?),
            MessageType::UserauthFailure => {
                Message::UserauthFailure(AuthFailure::from_bytes(payload)?)
            }
            MessageType::UserauthSuccess => Message::UserauthSuccess,
            MessageType::UserauthBanner => {
                Message::UserauthBanner(AuthBanner::from_bytes(payload)?)
            }
            MessageType::GlobalRequest => {
                let mut r = WireReader::new(&payload[1..]);
                let name = r.read_utf8()?;
                let want_reply = r.read_bool()?;
                Message::GlobalRequest { name, want_reply }
            }
            MessageType::ChannelOpenConfirmation
            | MessageType::ChannelOpenFailure
            | MessageType::ChannelWindowAdjust
            | MessageType::ChannelData
            | MessageType::ChannelExtendedData
            | MessageType::ChannelEof
            | MessageType::ChannelClose
            | MessageType::ChannelRequest
            | MessageType::ChannelSuccess
            | MessageType::ChannelFailure => {
                Message::Channel(ChannelMessage::from_bytes(payload)?)
            }
            MessageType::ServiceRequest
            | MessageType::KexdhInit
            | MessageType::UserauthRequest
            | MessageType::RequestSuccess
            | MessageType::RequestFailure
            | MessageType::ChannelOpen => Message::Unknown {
                msg_type: type_byte,
            },
        };

        Ok(message)
    }

    /// Whether this is a transport-level message that may arrive at any
    /// point and is handled without consulting the current state.
    pub fn is_transport_generic(&self) -> bool {
        matches!(
            self,
            Message::Ignore | Message::Debug { .. } | Message::Unimplemented { .. }
        )
    }

    /// Short label for logging.
    pub fn label(&self) -> String {
        let msg_type = match self {
            Message::Channel(ch) => return ch.label().to_string(),
            Message::Unknown { msg_type } => return format!("UNKNOWN({})", msg_type),
            Message::Disconnect(_) => MessageType::Disconnect,
            Message::Ignore => MessageType::Ignore,
            Message::Unimplemented { .. } => MessageType::Unimplemented,
            Message::Debug { .. } => MessageType::Debug,
            Message::ServiceAccept { .. } => MessageType::ServiceAccept,
            Message::KexInit(_) => MessageType::KexInit,
            Message::NewKeys => MessageType::NewKeys,
            Message::KexdhReply(_) => MessageType::KexdhReply,
            Message::UserauthFailure(_) => MessageType::UserauthFailure,
            Message::UserauthSuccess => MessageType::UserauthSuccess,
            Message::UserauthBanner(_) => MessageType::UserauthBanner,
            Message::GlobalRequest { .. } => MessageType::GlobalRequest,
        };
        msg_type.name().to_string()
    }
}
