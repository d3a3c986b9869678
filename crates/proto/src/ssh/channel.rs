//! Session channel state machine and flow control.
//!
//! One "session" channel carries the remote shell. It moves through
//!
//! ```text
//! Closed --OPEN_CONFIRMATION--> Open --SUCCESS--> TtyOpen --SUCCESS--> ShellOpen
//! ```
//!
//! Each transition sends the next request (pty-req after the open, shell
//! after the pty). A FAILURE reply, or OPEN_FAILURE while still closed,
//! re-sends the request that belongs to the current state.
//!
//! [`SshChannel::handle`] is pure: it consumes a decoded channel message and
//! returns the payloads to send plus the bytes to show on the terminal. The
//! caller owns the transport.

use keel_platform::{KeelError, KeelResult, TerminalSize};
use tracing::{debug, trace, warn};

use super::connection::{
    channel_data, channel_only, window_adjust, ChannelMessage, ChannelOpen, ChannelRequest,
    ChannelRequestType, PtyRequest,
};
use super::message::MessageType;

/// Inbound window advertised at open and added per adjust.
pub const DEFAULT_INITIAL_WINDOW: u32 = 15000;

/// Inbound window below which a WINDOW_ADJUST is sent.
pub const DEFAULT_WINDOW_LOW_WATER: u32 = 5000;

/// Largest data payload we accept.
pub const DEFAULT_MAX_PACKET: u32 = 35000;

/// SSH_EXTENDED_DATA_STDERR.
pub const EXTENDED_DATA_STDERR: u32 = 1;

/// Channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Not open (initial, and after CLOSE).
    Closed,
    /// Open confirmed, pty not yet granted.
    Open,
    /// Pty granted, shell not yet started.
    TtyOpen,
    /// Shell running.
    ShellOpen,
}

/// Parameters fixed when the channel is created.
#[derive(Debug, Clone)]
pub struct ChannelParams {
    /// Our channel number.
    pub local_id: u32,
    /// Window advertised at open, also the adjust increment.
    pub initial_window: u32,
    /// Low-water mark of the inbound window.
    pub window_low_water: u32,
    /// Largest data payload we accept.
    pub max_packet: u32,
    /// TERM value for pty-req.
    pub terminal_type: String,
    /// Terminal size for pty-req.
    pub size: TerminalSize,
}

impl Default for ChannelParams {
    fn default() -> Self {
        Self {
            local_id: 0,
            initial_window: DEFAULT_INITIAL_WINDOW,
            window_low_water: DEFAULT_WINDOW_LOW_WATER,
            max_packet: DEFAULT_MAX_PACKET,
            terminal_type: "vt100".to_string(),
            size: TerminalSize::default(),
        }
    }
}

/// Result of handling one channel message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChannelStep {
    /// Payloads to send, in order.
    pub outbound: Vec<Vec<u8>>,
    /// Translated bytes for the terminal.
    pub output: Vec<u8>,
}

/// The interactive session channel.
#[derive(Debug)]
pub struct SshChannel {
    params: ChannelParams,
    state: ChannelState,
    remote_id: Option<u32>,
    /// Bytes the peer may still send us.
    window_in: u32,
    /// Bytes we may still send the peer.
    window_out: u32,
    remote_max_packet: u32,
    eof_received: bool,
    close_received: bool,
    close_sent: bool,
    exit_status: Option<u32>,
    open_retries: u32,
    request_retries: u32,
}

impl SshChannel {
    /// Creates a closed channel.
    pub fn new(params: ChannelParams) -> Self {
        let window_in = params.initial_window;
        Self {
            params,
            state: ChannelState::Closed,
            remote_id: None,
            window_in,
            window_out: 0,
            remote_max_packet: 0,
            eof_received: false,
            close_received: false,
            close_sent: false,
            exit_status: None,
            open_retries: 0,
            request_retries: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Our channel number.
    pub fn local_id(&self) -> u32 {
        self.params.local_id
    }

    /// Peer's channel number, once confirmed.
    pub fn remote_id(&self) -> Option<u32> {
        self.remote_id
    }

    /// Bytes the peer may still send before we adjust.
    pub fn window_in(&self) -> u32 {
        self.window_in
    }

    /// Bytes we may still send before the peer adjusts.
    pub fn window_out(&self) -> u32 {
        self.window_out
    }

    /// Peer's maximum data payload.
    pub fn remote_max_packet(&self) -> u32 {
        self.remote_max_packet
    }

    /// Whether the shell is running.
    pub fn is_shell_open(&self) -> bool {
        self.state == ChannelState::ShellOpen
    }

    /// Whether the peer closed the channel.
    pub fn is_closed(&self) -> bool {
        self.close_received
    }

    /// Whether the peer sent EOF.
    pub fn eof_received(&self) -> bool {
        self.eof_received
    }

    /// Exit status reported by the peer.
    pub fn exit_status(&self) -> Option<u32> {
        self.exit_status
    }

    /// Total retries of open, pty and shell requests.
    pub fn retries(&self) -> u32 {
        self.open_retries + self.request_retries
    }

    /// CHANNEL_OPEN for a session channel.
    pub fn open_message(&self) -> Vec<u8> {
        ChannelOpen::session(
            self.params.local_id,
            self.params.initial_window,
            self.params.max_packet,
        )
        .to_bytes()
    }

    fn pty_request(&self, remote_id: u32) -> Vec<u8> {
        let size = self.params.size;
        ChannelRequest {
            recipient_channel: remote_id,
            want_reply: true,
            request: ChannelRequestType::PtyReq(PtyRequest {
                term: self.params.terminal_type.clone(),
                cols: size.cols,
                rows: size.rows,
                width_px: size.pixel_width,
                height_px: size.pixel_height,
                modes: Vec::new(),
            }),
        }
        .to_bytes()
    }

    fn shell_request(&self, remote_id: u32) -> Vec<u8> {
        ChannelRequest {
            recipient_channel: remote_id,
            want_reply: true,
            request: ChannelRequestType::Shell,
        }
        .to_bytes()
    }

    fn confirmed_remote(&self) -> KeelResult<u32> {
        self.remote_id.ok_or_else(|| {
            KeelError::Protocol(format!(
                "Channel {} has no remote id in state {:?}",
                self.params.local_id, self.state
            ))
        })
    }

    /// Handles one inbound channel message.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if the message is addressed to another
    /// channel, arrives in a state where it makes no sense, or carries more
    /// data than the inbound window allows.
    pub fn handle(&mut self, msg: ChannelMessage) -> KeelResult<ChannelStep> {
        if msg.recipient_channel() != self.params.local_id {
            return Err(KeelError::Protocol(format!(
                "{} for unknown channel {}",
                msg.label(),
                msg.recipient_channel()
            )));
        }

        let mut step = ChannelStep::default();

        match msg {
            ChannelMessage::OpenConfirmation(confirm) => {
                if self.state != ChannelState::Closed || self.remote_id.is_some() {
                    return Err(KeelError::Protocol(format!(
                        "Unexpected open confirmation in state {:?}",
                        self.state
                    )));
                }
                self.remote_id = Some(confirm.sender_channel);
                self.window_out = confirm.initial_window_size;
                self.remote_max_packet = confirm.maximum_packet_size;
                self.state = ChannelState::Open;
                debug!(
                    local = self.params.local_id,
                    remote = confirm.sender_channel,
                    window = confirm.initial_window_size,
                    max_packet = confirm.maximum_packet_size,
                    "channel open"
                );
                step.outbound.push(self.pty_request(confirm.sender_channel));
            }

            ChannelMessage::OpenFailure(failure) => {
                if self.state != ChannelState::Closed || self.remote_id.is_some() {
                    return Err(KeelError::Protocol(format!(
                        "Unexpected open failure in state {:?}",
                        self.state
                    )));
                }
                self.open_retries += 1;
                warn!(
                    reason = failure.reason_name(),
                    description = %failure.description,
                    retry = self.open_retries,
                    "channel open refused, retrying"
                );
                step.outbound.push(self.open_message());
            }

            ChannelMessage::Success { .. } => match self.state {
                ChannelState::Open => {
                    self.state = ChannelState::TtyOpen;
                    debug!("pty granted");
                    step.outbound.push(self.shell_request(self.confirmed_remote()?));
                }
                ChannelState::TtyOpen => {
                    self.state = ChannelState::ShellOpen;
                    debug!("shell started");
                }
                ChannelState::ShellOpen => {
                    trace!("ignoring channel success while shell is open");
                }
                ChannelState::Closed => {
                    return Err(KeelError::Protocol(
                        "Channel success on a closed channel".to_string(),
                    ));
                }
            },

            ChannelMessage::Failure { .. } => {
                let retry = match self.state {
                    ChannelState::Closed => Some(self.open_message()),
                    ChannelState::Open => Some(self.pty_request(self.confirmed_remote()?)),
                    ChannelState::TtyOpen => Some(self.shell_request(self.confirmed_remote()?)),
                    ChannelState::ShellOpen => None,
                };
                match retry {
                    Some(request) => {
                        self.request_retries += 1;
                        warn!(state = ?self.state, retry = self.request_retries, "channel request failed, retrying");
                        step.outbound.push(request);
                    }
                    None => trace!("ignoring channel failure while shell is open"),
                }
            }

            ChannelMessage::WindowAdjust { bytes_to_add, .. } => {
                self.window_out = self.window_out.saturating_add(bytes_to_add);
                trace!(added = bytes_to_add, window = self.window_out, "peer window adjusted");
            }

            ChannelMessage::Data { data, .. } => {
                self.accept_inbound(&data, &mut step)?;
            }

            ChannelMessage::ExtendedData {
                data_type, data, ..
            } => {
                if data_type != EXTENDED_DATA_STDERR {
                    debug!(data_type, "extended data of unknown type");
                }
                self.accept_inbound(&data, &mut step)?;
            }

            ChannelMessage::Eof { .. } => {
                debug!("peer sent EOF");
                self.eof_received = true;
            }

            ChannelMessage::Close { .. } => {
                debug!("peer closed channel");
                self.close_received = true;
                if !self.close_sent {
                    if let Some(remote_id) = self.remote_id {
                        step.outbound
                            .push(channel_only(MessageType::ChannelClose, remote_id));
                        self.close_sent = true;
                    }
                }
                self.state = ChannelState::Closed;
            }

            ChannelMessage::Request(request) => {
                match &request.request {
                    ChannelRequestType::ExitStatus(code) => {
                        debug!(code, "remote exit status");
                        self.exit_status = Some(*code);
                    }
                    other => debug!(request = other.name(), "ignoring channel request"),
                }
                if request.want_reply {
                    step.outbound.push(channel_only(
                        MessageType::ChannelFailure,
                        self.confirmed_remote()?,
                    ));
                }
            }
        }

        Ok(step)
    }

    fn accept_inbound(&mut self, data: &[u8], step: &mut ChannelStep) -> KeelResult<()> {
        let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
        if len > self.window_in {
            return Err(KeelError::Protocol(format!(
                "Peer sent {} bytes with only {} bytes of window",
                len, self.window_in
            )));
        }
        self.window_in -= len;
        trace!(len, window = self.window_in, "channel data");

        step.output.extend_from_slice(&translate_output(data));

        if self.window_in < self.params.window_low_water {
            let remote_id = self.confirmed_remote()?;
            step.outbound
                .push(window_adjust(remote_id, self.params.initial_window));
            self.window_in = self.window_in.saturating_add(self.params.initial_window);
            trace!(window = self.window_in, "inbound window topped up");
        }
        Ok(())
    }

    /// Builds CHANNEL_DATA for `data` and charges it to the outbound window.
    ///
    /// # Errors
    ///
    /// - [`KeelError::Protocol`] if the shell is not open
    /// - [`KeelError::WindowExceeded`] if `data` exceeds the peer's window or
    ///   maximum packet size; nothing is charged in that case
    pub fn send_data(&mut self, data: &[u8]) -> KeelResult<Vec<u8>> {
        if self.state != ChannelState::ShellOpen {
            return Err(KeelError::Protocol(format!(
                "Cannot send data in channel state {:?}",
                self.state
            )));
        }
        let remote_id = self.confirmed_remote()?;

        let requested = data.len();
        if requested > self.remote_max_packet as usize {
            return Err(KeelError::WindowExceeded {
                requested,
                available: self.remote_max_packet as usize,
            });
        }
        if requested > self.window_out as usize {
            return Err(KeelError::WindowExceeded {
                requested,
                available: self.window_out as usize,
            });
        }

        // Bounded by window_out above.
        self.window_out -= requested as u32;
        Ok(channel_data(remote_id, data))
    }

    /// CHANNEL_CLOSE, unless already sent or the channel was never confirmed.
    pub fn close_message(&mut self) -> Option<Vec<u8>> {
        if self.close_sent {
            return None;
        }
        let remote_id = self.remote_id?;
        self.close_sent = true;
        Some(channel_only(MessageType::ChannelClose, remote_id))
    }
}

/// Whether `byte` passes to the terminal unchanged.
fn is_printable(byte: u8) -> bool {
    matches!(byte, b'\t' | b'\n' | 0x1b | 0x20..=0x7e)
}

/// Translates channel output for the terminal.
///
/// Backspace and carriage return both become a cursor-back `\x08`. All
/// other bytes, printable or not, pass through.
pub fn translate_output(data: &[u8]) -> Vec<u8> {
    data.iter()
        .map(|&b| match b {
            _ if is_printable(b) => b,
            0x08 | b'\r' => 0x08,
            other => other,
        })
        .collect()
}
