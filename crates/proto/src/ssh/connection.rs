//! Connection protocol messages (RFC 4254).
//!
//! This module covers the channel messages a single interactive session
//! needs:
//! - Opening a "session" channel and its confirmation or failure
//! - Flow control (window adjust)
//! - Data and extended data (stderr)
//! - Channel requests: pty-req, shell, exit-status
//! - EOF, close, success, failure
//!
//! Inbound channel messages are decoded once into [`ChannelMessage`].
//!
//! # Example
//!
//! ```rust
//! use keel_proto::ssh::connection::{ChannelMessage, ChannelOpen};
//!
//! let open = ChannelOpen::session(0, 15000, 35000);
//! let bytes = open.to_bytes();
//! assert_eq!(bytes[0], 90); // SSH_MSG_CHANNEL_OPEN
//! assert_eq!(ChannelOpen::from_bytes(&bytes).unwrap(), open);
//! ```

use keel_platform::{KeelError, KeelResult};

use super::message::MessageType;
use super::wire::{WireReader, WireWriter};

/// SSH_MSG_CHANNEL_OPEN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpen {
    /// Channel type, "session" for a shell.
    pub channel_type: String,
    /// Our channel number.
    pub sender_channel: u32,
    /// Bytes the peer may send before a window adjust.
    pub initial_window_size: u32,
    /// Largest data payload we accept.
    pub maximum_packet_size: u32,
}

impl ChannelOpen {
    /// Opens a "session" channel.
    pub fn session(sender_channel: u32, initial_window_size: u32, maximum_packet_size: u32) -> Self {
        Self {
            channel_type: "session".to_string(),
            sender_channel,
            initial_window_size,
            maximum_packet_size,
        }
    }

    /// Serializes the message.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::message(MessageType::ChannelOpen);
        w.put_str(&self.channel_type)
            .put_u32(self.sender_channel)
            .put_u32(self.initial_window_size)
            .put_u32(self.maximum_packet_size);
        w.finish()
    }

    /// Parses the message. Type-specific trailing data is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if the payload is malformed.
    pub fn from_bytes(data: &[u8]) -> KeelResult<Self> {
        let mut r = WireReader::new(data);
        r.expect_type(MessageType::ChannelOpen)?;
        Ok(Self {
            channel_type: r.read_utf8()?,
            sender_channel: r.read_u32()?,
            initial_window_size: r.read_u32()?,
            maximum_packet_size: r.read_u32()?,
        })
    }
}

/// SSH_MSG_CHANNEL_OPEN_CONFIRMATION.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpenConfirmation {
    /// Our channel number.
    pub recipient_channel: u32,
    /// The peer's channel number.
    pub sender_channel: u32,
    /// Bytes we may send before the peer adjusts its window.
    pub initial_window_size: u32,
    /// Largest data payload the peer accepts.
    pub maximum_packet_size: u32,
}

impl ChannelOpenConfirmation {
    /// Serializes the message.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::message(MessageType::ChannelOpenConfirmation);
        w.put_u32(self.recipient_channel)
            .put_u32(self.sender_channel)
            .put_u32(self.initial_window_size)
            .put_u32(self.maximum_packet_size);
        w.finish()
    }

    fn read(r: &mut WireReader<'_>) -> KeelResult<Self> {
        Ok(Self {
            recipient_channel: r.read_u32()?,
            sender_channel: r.read_u32()?,
            initial_window_size: r.read_u32()?,
            maximum_packet_size: r.read_u32()?,
        })
    }
}

/// Reason codes of SSH_MSG_CHANNEL_OPEN_FAILURE (RFC 4254 Section 5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOpenFailureReason {
    /// Administratively prohibited.
    AdministrativelyProhibited = 1,
    /// Connect failed.
    ConnectFailed = 2,
    /// Unknown channel type.
    UnknownChannelType = 3,
    /// Resource shortage.
    ResourceShortage = 4,
}

impl ChannelOpenFailureReason {
    /// Converts a reason code.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::AdministrativelyProhibited),
            2 => Some(Self::ConnectFailed),
            3 => Some(Self::UnknownChannelType),
            4 => Some(Self::ResourceShortage),
            _ => None,
        }
    }

    /// Symbolic name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdministrativelyProhibited => "ADMINISTRATIVELY_PROHIBITED",
            Self::ConnectFailed => "CONNECT_FAILED",
            Self::UnknownChannelType => "UNKNOWN_CHANNEL_TYPE",
            Self::ResourceShortage => "RESOURCE_SHORTAGE",
        }
    }
}

/// SSH_MSG_CHANNEL_OPEN_FAILURE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpenFailure {
    /// Our channel number.
    pub recipient_channel: u32,
    /// Raw reason code.
    pub reason_code: u32,
    /// Description text.
    pub description: String,
}

impl ChannelOpenFailure {
    /// Reason name, or "UNKNOWN".
    pub fn reason_name(&self) -> &'static str {
        ChannelOpenFailureReason::from_u32(self.reason_code).map_or("UNKNOWN", |r| r.as_str())
    }

    /// Serializes the message.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::message(MessageType::ChannelOpenFailure);
        w.put_u32(self.recipient_channel)
            .put_u32(self.reason_code)
            .put_str(&self.description)
            .put_str("");
        w.finish()
    }

    fn read(r: &mut WireReader<'_>) -> KeelResult<Self> {
        let recipient_channel = r.read_u32()?;
        let reason_code = r.read_u32()?;
        let description = if r.is_empty() {
            String::new()
        } else {
            String::from_utf8_lossy(r.read_string()?).into_owned()
        };
        Ok(Self {
            recipient_channel,
            reason_code,
            description,
        })
    }
}

/// Terminal request parameters (RFC 4254 Section 6.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    /// TERM value, e.g. "vt100".
    pub term: String,
    /// Width in characters.
    pub cols: u32,
    /// Height in rows.
    pub rows: u32,
    /// Width in pixels.
    pub width_px: u32,
    /// Height in pixels.
    pub height_px: u32,
    /// Encoded terminal modes.
    pub modes: Vec<u8>,
}

/// Channel request kinds this client sends or recognizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequestType {
    /// "pty-req".
    PtyReq(PtyRequest),
    /// "shell".
    Shell,
    /// "exit-status".
    ExitStatus(u32),
    /// Anything else; the request-specific data is kept raw.
    Other {
        /// Request name.
        name: String,
        /// Remaining payload.
        data: Vec<u8>,
    },
}

impl ChannelRequestType {
    /// Request name.
    pub fn name(&self) -> &str {
        match self {
            ChannelRequestType::PtyReq(_) => "pty-req",
            ChannelRequestType::Shell => "shell",
            ChannelRequestType::ExitStatus(_) => "exit-status",
            ChannelRequestType::Other { name, .. } => name,
        }
    }
}

/// SSH_MSG_CHANNEL_REQUEST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    /// Recipient channel number.
    pub recipient_channel: u32,
    /// Whether a SUCCESS/FAILURE reply is wanted.
    pub want_reply: bool,
    /// Request.
    pub request: ChannelRequestType,
}

impl ChannelRequest {
    /// Serializes the message.
    ///
    /// ```text
    /// byte      SSH_MSG_CHANNEL_REQUEST (98)
    /// uint32    recipient channel
    /// string    request type
    /// boolean   want reply
    /// ....      type-specific data
    /// ```
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = WireWriter::message(MessageType::ChannelRequest);
        w.put_u32(self.recipient_channel)
            .put_str(self.request.name())
            .put_bool(self.want_reply);

        match &self.request {
            ChannelRequestType::PtyReq(pty) => {
                w.put_str(&pty.term)
                    .put_u32(pty.cols)
                    .put_u32(pty.rows)
                    .put_u32(pty.width_px)
                    .put_u32(pty.height_px)
                    .put_string(&pty.modes);
            }
            ChannelRequestType::Shell => {}
            ChannelRequestType::ExitStatus(code) => {
                w.put_u32(*code);
            }
            ChannelRequestType::Other { data, .. } => {
                w.put_raw(data);
            }
        }
        w.finish()
    }

    fn read(r: &mut WireReader<'_>) -> KeelResult<Self> {
        let recipient_channel = r.read_u32()?;
        let name = r.read_utf8()?;
        let want_reply = r.read_bool()?;

        let request = match name.as_str() {
            "pty-req" => ChannelRequestType::PtyReq(PtyRequest {
                term: r.read_utf8()?,
                cols: r.read_u32()?,
                rows: r.read_u32()?,
                width_px: r.read_u32()?,
                height_px: r.read_u32()?,
                modes: r.read_string()?.to_vec(),
            }),
            "shell" => ChannelRequestType::Shell,
            "exit-status" => ChannelRequestType::ExitStatus(r.read_u32()?),
            _ => {
                let rest = r.read_raw(r.remaining())?.to_vec();
                ChannelRequestType::Other { name, data: rest }
            }
        };

        Ok(Self {
            recipient_channel,
            want_reply,
            request,
        })
    }
}

/// A decoded inbound channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    /// Open accepted.
    OpenConfirmation(ChannelOpenConfirmation),
    /// Open refused.
    OpenFailure(ChannelOpenFailure),
    /// Peer grants more window.
    WindowAdjust {
        /// Recipient channel.
        recipient_channel: u32,
        /// Bytes added.
        bytes_to_add: u32,
    },
    /// Ordinary data.
    Data {
        /// Recipient channel.
        recipient_channel: u32,
        /// Bytes.
        data: Vec<u8>,
    },
    /// Extended data (type 1 is stderr).
    ExtendedData {
        /// Recipient channel.
        recipient_channel: u32,
        /// Data type code.
        data_type: u32,
        /// Bytes.
        data: Vec<u8>,
    },
    /// Peer sends no more data.
    Eof {
        /// Recipient channel.
        recipient_channel: u32,
    },
    /// Peer closes the channel.
    Close {
        /// Recipient channel.
        recipient_channel: u32,
    },
    /// Channel request from the peer.
    Request(ChannelRequest),
    /// Request succeeded.
    Success {
        /// Recipient channel.
        recipient_channel: u32,
    },
    /// Request failed.
    Failure {
        /// Recipient channel.
        recipient_channel: u32,
    },
}

impl ChannelMessage {
    /// Decodes a channel message payload (type byte included).
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if the type is not a channel message
    /// or a field is truncated.
    pub fn from_bytes(data: &[u8]) -> KeelResult<Self> {
        let mut r = WireReader::new(data);
        let type_byte = r.read_u8()?;
        let msg_type = MessageType::from_u8(type_byte).ok_or_else(|| {
            KeelError::Protocol(format!("Unknown channel message type {}", type_byte))
        })?;

        let message = match msg_type {
            MessageType::ChannelOpenConfirmation => {
                ChannelMessage::OpenConfirmation(ChannelOpenConfirmation::read(&mut r)?)
            }
            MessageType::ChannelOpenFailure => {
                ChannelMessage::OpenFailure(ChannelOpenFailure::read(&mut r)?)
            }
            MessageType::ChannelWindowAdjust => ChannelMessage::WindowAdjust {
                recipient_channel: r.read_u32()?,
                bytes_to_add: r.read_u32()?,
            },
            MessageType::ChannelData => ChannelMessage::Data {
                recipient_channel: r.read_u32()?,
                data: r.read_string()?.to_vec(),
            },
            MessageType::ChannelExtendedData => ChannelMessage::ExtendedData {
                recipient_channel: r.read_u32()?,
                data_type: r.read_u32()?,
                data: r.read_string()?.to_vec(),
            },
            MessageType::ChannelEof => ChannelMessage::Eof {
                recipient_channel: r.read_u32()?,
            },
            MessageType::ChannelClose => ChannelMessage::Close {
                recipient_channel: r.read_u32()?,
            },
            MessageType::ChannelRequest => ChannelMessage::Request(ChannelRequest::read(&mut r)?),
            MessageType::ChannelSuccess => ChannelMessage::Success {
                recipient_channel: r.read_u32()?,
            },
            MessageType::ChannelFailure => ChannelMessage::Failure {
                recipient_channel: r.read_u32()?,
            },
            other => {
                return Err(KeelError::Protocol(format!(
                    "{} is not a channel message",
                    other
                )))
            }
        };

        Ok(message)
    }

    /// Message type of this message.
    pub fn msg_type(&self) -> MessageType {
        match self {
            ChannelMessage::OpenConfirmation(_) => MessageType::ChannelOpenConfirmation,
            ChannelMessage::OpenFailure(_) => MessageType::ChannelOpenFailure,
            ChannelMessage::WindowAdjust { .. } => MessageType::ChannelWindowAdjust,
            ChannelMessage::Data { .. } => MessageType::ChannelData,
            ChannelMessage::ExtendedData { .. } => MessageType::ChannelExtendedData,
            ChannelMessage::Eof { .. } => MessageType::ChannelEof,
            ChannelMessage::Close { .. } => MessageType::ChannelClose,
            ChannelMessage::Request(_) => MessageType::ChannelRequest,
            ChannelMessage::Success { .. } => MessageType::ChannelSuccess,
            ChannelMessage::Failure { .. } => MessageType::ChannelFailure,
        }
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        self.msg_type().name()
    }

    /// Recipient channel number.
    pub fn recipient_channel(&self) -> u32 {
        match self {
            ChannelMessage::OpenConfirmation(m) => m.recipient_channel,
            ChannelMessage::OpenFailure(m) => m.recipient_channel,
            ChannelMessage::Request(m) => m.recipient_channel,
            ChannelMessage::WindowAdjust {
                recipient_channel, ..
            }
            | ChannelMessage::Data {
                recipient_channel, ..
            }
            | ChannelMessage::ExtendedData {
                recipient_channel, ..
            }
            | ChannelMessage::Eof { recipient_channel }
            | ChannelMessage::Close { recipient_channel }
            | ChannelMessage::Success { recipient_channel }
            | ChannelMessage::Failure { recipient_channel } => *recipient_channel,
        }
    }
}

/// Encodes a message that carries only a recipient channel
/// (EOF, CLOSE, SUCCESS, FAILURE).
pub fn channel_only(msg_type: MessageType, recipient_channel: u32) -> Vec<u8> {
    let mut w = WireWriter::message(msg_type);
    w.put_u32(recipient_channel);
    w.finish()
}

/// Encodes SSH_MSG_CHANNEL_WINDOW_ADJUST.
pub fn window_adjust(recipient_channel: u32, bytes_to_add: u32) -> Vec<u8> {
    let mut w = WireWriter::message(MessageType::ChannelWindowAdjust);
    w.put_u32(recipient_channel).put_u32(bytes_to_add);
    w.finish()
}

/// Encodes SSH_MSG_CHANNEL_DATA.
pub fn channel_data(recipient_channel: u32, data: &[u8]) -> Vec<u8> {
    let mut w = WireWriter::message(MessageType::ChannelData);
    w.put_u32(recipient_channel).put_string(data);
    w.finish()
}

/// Encodes SSH_MSG_CHANNEL_EXTENDED_DATA.
pub fn channel_extended_data(recipient_channel: u32, data_type: u32, data: &[u8]) -> Vec<u8> {
    let mut w = WireWriter::message(MessageType::ChannelExtendedData);
    w.put_u32(recipient_channel)
        .put_u32(data_type)
        .put_string(data);
    w.finish()
}

/// Encodes SSH_MSG_REQUEST_FAILURE (reply to a global request).
pub fn request_failure() -> Vec<u8> {
    vec![MessageType::RequestFailure.as_u8()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_open_layout() {
        let bytes = ChannelOpen::session(0, 15000, 35000).to_bytes();
        let mut r = WireReader::new(&bytes);
        r.expect_type(MessageType::ChannelOpen).unwrap();
        assert_eq!(r.read_utf8().unwrap(), "session");
        assert_eq!(r.read_u32().unwrap(), 0);
        assert_eq!(r.read_u32().unwrap(), 15000);
        assert_eq!(r.read_u32().unwrap(), 35000);
        assert!(r.is_empty());
    }

    #[test]
    fn test_open_confirmation() {
        let confirm = ChannelOpenConfirmation {
            recipient_channel: 0,
            sender_channel: 7,
            initial_window_size: 2_097_152,
            maximum_packet_size: 32768,
        };
        assert_eq!(
            ChannelMessage::from_bytes(&confirm.to_bytes()).unwrap(),
            ChannelMessage::OpenConfirmation(confirm)
        );
    }

    #[test]
    fn test_open_failure() {
        let failure = ChannelOpenFailure {
            recipient_channel: 0,
            reason_code: 4,
            description: "no resources".to_string(),
        };
        match ChannelMessage::from_bytes(&failure.to_bytes()).unwrap() {
            ChannelMessage::OpenFailure(parsed) => {
                assert_eq!(parsed.reason_name(), "RESOURCE_SHORTAGE");
                assert_eq!(parsed.description, "no resources");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_pty_request_layout() {
        let request = ChannelRequest {
            recipient_channel: 3,
            want_reply: true,
            request: ChannelRequestType::PtyReq(PtyRequest {
                term: "vt100".to_string(),
                cols: 80,
                rows: 24,
                width_px: 640,
                height_px: 480,
                modes: vec![],
            }),
        };
        let bytes = request.to_bytes();

        let mut r = WireReader::new(&bytes);
        r.expect_type(MessageType::ChannelRequest).unwrap();
        assert_eq!(r.read_u32().unwrap(), 3);
        assert_eq!(r.read_utf8().unwrap(), "pty-req");
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_utf8().unwrap(), "vt100");
        assert_eq!(r.read_u32().unwrap(), 80);
        assert_eq!(r.read_u32().unwrap(), 24);
        assert_eq!(r.read_u32().unwrap(), 640);
        assert_eq!(r.read_u32().unwrap(), 480);
        assert_eq!(r.read_string().unwrap(), b"");
        assert!(r.is_empty());

        assert_eq!(
            ChannelMessage::from_bytes(&bytes).unwrap(),
            ChannelMessage::Request(request)
        );
    }

    #[test]
    fn test_exit_status_and_unknown_request() {
        let exit = ChannelRequest {
            recipient_channel: 0,
            want_reply: false,
            request: ChannelRequestType::ExitStatus(42),
        };
        assert_eq!(
            ChannelMessage::from_bytes(&exit.to_bytes()).unwrap(),
            ChannelMessage::Request(exit)
        );

        let other = ChannelRequest {
            recipient_channel: 0,
            want_reply: true,
            request: ChannelRequestType::Other {
                name: "keepalive@openssh.com".to_string(),
                data: vec![],
            },
        };
        let parsed = ChannelMessage::from_bytes(&other.to_bytes()).unwrap();
        assert_eq!(parsed, ChannelMessage::Request(other));
    }

    #[test]
    fn test_data_messages() {
        assert_eq!(
            ChannelMessage::from_bytes(&channel_data(1, b"ls\n")).unwrap(),
            ChannelMessage::Data {
                recipient_channel: 1,
                data: b"ls\n".to_vec()
            }
        );
        assert_eq!(
            ChannelMessage::from_bytes(&channel_extended_data(1, 1, b"err")).unwrap(),
            ChannelMessage::ExtendedData {
                recipient_channel: 1,
                data_type: 1,
                data: b"err".to_vec()
            }
        );
        assert_eq!(
            ChannelMessage::from_bytes(&window_adjust(2, 15000)).unwrap(),
            ChannelMessage::WindowAdjust {
                recipient_channel: 2,
                bytes_to_add: 15000
            }
        );
    }

    #[test]
    fn test_channel_only_messages() {
        for (msg_type, label) in [
            (MessageType::ChannelEof, "SSH_MSG_CHANNEL_EOF"),
            (MessageType::ChannelClose, "SSH_MSG_CHANNEL_CLOSE"),
            (MessageType::ChannelSuccess, "SSH_MSG_CHANNEL_SUCCESS"),
            (MessageType::ChannelFailure, "SSH_MSG_CHANNEL_FAILURE"),
        ] {
            let msg = ChannelMessage::from_bytes(&channel_only(msg_type, 9)).unwrap();
            assert_eq!(msg.recipient_channel(), 9);
            assert_eq!(msg.msg_type(), msg_type);
            assert_eq!(msg.label(), label);
        }
    }

    #[test]
    fn test_truncated_and_wrong_type() {
        assert!(ChannelMessage::from_bytes(&[94, 0, 0, 0, 1, 0, 0, 0, 5, b'a']).is_err());
        assert!(ChannelMessage::from_bytes(&[20]).is_err());
        assert!(ChannelMessage::from_bytes(&[]).is_err());
    }
}
