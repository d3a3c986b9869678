//! SSH client.
//!
//! [`SshClient`] drives one connection through the whole session:
//!
//! 1. Identification exchange
//! 2. KEXINIT, diffie-hellman-group1-sha1, host signature check, NEWKEYS
//! 3. "ssh-userauth" service request and password authentication
//! 4. A "session" channel with a pty and a shell
//! 5. The interactive loop, until the channel closes or the caller cancels
//!
//! The client never touches a socket or a tty directly. It is generic over a
//! [`Transport`] and talks to the user through [`Terminal`] and
//! [`Operator`].
//!
//! # Example
//!
//! ```rust,no_run
//! use keel_proto::ssh::client::{SshClient, SshClientConfig};
//! # use keel_platform::{KeelResult, Operator, Terminal, TerminalSize};
//! # struct Tty;
//! # impl Terminal for Tty {
//! #     fn dimensions(&self) -> TerminalSize { TerminalSize::default() }
//! #     fn set_echo(&mut self, _: bool) -> KeelResult<()> { Ok(()) }
//! #     fn write(&mut self, _: &[u8]) -> KeelResult<()> { Ok(()) }
//! # }
//! # struct User;
//! # impl Operator for User {
//! #     fn username(&mut self) -> KeelResult<String> { Ok("guest".into()) }
//! #     fn password(&mut self, _: &str) -> KeelResult<String> { Ok("guest".into()) }
//! #     fn confirm_insecure(&mut self, _: &str) -> KeelResult<bool> { Ok(false) }
//! # }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (input_tx, input_rx) = tokio::sync::mpsc::channel(64);
//! let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
//!
//! let mut client = SshClient::connect("10.0.0.5", 22, SshClientConfig::default()).await?;
//! let end = client
//!     .run(&mut User, &mut Tty, input_rx, cancel_rx)
//!     .await?;
//! println!("session ended: {:?}", end);
//! # drop((input_tx, cancel_tx));
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use keel_platform::{KeelError, KeelResult, Operator, Terminal, Transport};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};
use zeroize::Zeroizing;

use super::auth::{AuthAttempts, AuthRequest, ServiceRequest, USERAUTH_SERVICE};
use super::channel::{
    ChannelParams, SshChannel, DEFAULT_INITIAL_WINDOW, DEFAULT_MAX_PACKET,
    DEFAULT_WINDOW_LOW_WATER,
};
use super::connection::request_failure;
use super::hostkey::DssPublicKey;
use super::io::TcpTransport;
use super::kex::{KexInit, NewKeys};
use super::kex_dh::{DhGroup1Exchange, KexTranscript};
use super::logging;
use super::message::{Disconnect, DisconnectReason, Message, MessageType};
use super::transport::{State, TransportState};
use super::version::{scan_server_identification, ServerIdentification, Version};
use super::wire::WireWriter;

/// SSH client configuration.
#[derive(Debug, Clone)]
pub struct SshClientConfig {
    /// Software version token of our identification string.
    pub software_id: String,
    /// Optional comments; spaces become underscores.
    pub comments: Option<String>,
    /// Bound on the TCP connect and on reading the server identification.
    pub connect_timeout: Duration,
    /// Idle tick of the shell loop.
    pub poll_interval: Duration,
    /// Inbound window advertised at channel open, and the adjust increment.
    pub initial_window: u32,
    /// Inbound window below which a WINDOW_ADJUST is sent.
    pub window_low_water: u32,
    /// Largest channel data payload we accept.
    pub max_packet: u32,
    /// TERM value sent in pty-req.
    pub terminal_type: String,
    /// Password prompts before giving up.
    pub max_auth_attempts: u32,
    /// Whether to ask the operator before continuing after a failed host
    /// signature check. When false the connection is aborted.
    pub allow_insecure_prompt: bool,
}

impl Default for SshClientConfig {
    fn default() -> Self {
        Self {
            software_id: format!("keel_{}", crate::VERSION),
            comments: None,
            connect_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(10),
            initial_window: DEFAULT_INITIAL_WINDOW,
            window_low_water: DEFAULT_WINDOW_LOW_WATER,
            max_packet: DEFAULT_MAX_PACKET,
            terminal_type: "vt100".to_string(),
            max_auth_attempts: 3,
            allow_insecure_prompt: true,
        }
    }
}

/// Why the shell loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEnd {
    /// The server closed the channel.
    ChannelClosed {
        /// Exit status, if the server sent one.
        exit_status: Option<u32>,
    },
    /// The caller signalled cancellation.
    Cancelled,
    /// The transport reached end of stream.
    TransportClosed,
    /// The server sent DISCONNECT.
    PeerDisconnected {
        /// Reason code.
        reason: u32,
        /// Description text.
        description: String,
    },
}

/// SSH client over a [`Transport`].
pub struct SshClient<T> {
    transport: T,
    state: TransportState,
    config: SshClientConfig,
    client_version: Version,
    server_version: Option<Version>,
    /// Server identification line as sent, without CR LF.
    server_line: Option<String>,
    host_key: Option<DssPublicKey>,
    host_signature_valid: bool,
    username: Option<String>,
    channel: Option<SshChannel>,
    bytes_in: u64,
    bytes_out: u64,
}

impl<T> std::fmt::Debug for SshClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshClient")
            .field("state", &self.state)
            .field("server_version", &self.server_version)
            .field("username", &self.username)
            .field("channel", &self.channel.as_ref().map(|c| c.state()))
            .finish_non_exhaustive()
    }
}

impl SshClient<TcpTransport> {
    /// Opens a TCP connection to `host:port`.
    ///
    /// No bytes are exchanged yet; call [`run`](Self::run) or the individual
    /// phases.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Io`] if the connection fails or times out.
    pub async fn connect(host: &str, port: u16, config: SshClientConfig) -> KeelResult<Self> {
        let transport = TcpTransport::connect(host, port, config.connect_timeout).await?;
        Ok(Self::new(transport, config))
    }
}

impl<T: Transport> SshClient<T> {
    /// Wraps an already connected transport.
    pub fn new(transport: T, config: SshClientConfig) -> Self {
        let client_version = Version::new(&config.software_id, config.comments.as_deref());
        Self {
            transport,
            state: TransportState::new(),
            config,
            client_version,
            server_version: None,
            server_line: None,
            host_key: None,
            host_signature_valid: false,
            username: None,
            channel: None,
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    /// Session state.
    pub fn state(&self) -> State {
        self.state.current()
    }

    /// Transport context (sequence numbers, protection).
    pub fn transport_state(&self) -> &TransportState {
        &self.state
    }

    /// Our identification.
    pub fn client_version(&self) -> &Version {
        &self.client_version
    }

    /// Server identification, after the version exchange.
    pub fn server_version(&self) -> Option<&Version> {
        self.server_version.as_ref()
    }

    /// Server host key, after the key exchange.
    pub fn host_key(&self) -> Option<&DssPublicKey> {
        self.host_key.as_ref()
    }

    /// Whether the server's host signature verified.
    pub fn host_signature_verified(&self) -> bool {
        self.host_signature_valid
    }

    /// Session identifier.
    pub fn session_id(&self) -> Option<&[u8; 20]> {
        self.state.session_id()
    }

    /// Authenticated user name.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// The shell channel, once opened.
    pub fn channel(&self) -> Option<&SshChannel> {
        self.channel.as_ref()
    }

    /// Runs every phase and the shell loop.
    ///
    /// On failure a DISCONNECT with the error's reason code is sent before
    /// the error is returned. On a normal end a BY_APPLICATION DISCONNECT is
    /// sent. Both are best effort.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error of any phase.
    pub async fn run(
        &mut self,
        operator: &mut dyn Operator,
        terminal: &mut dyn Terminal,
        input: mpsc::Receiver<Vec<u8>>,
        cancel: watch::Receiver<bool>,
    ) -> KeelResult<ShellEnd> {
        let result = self.run_phases(operator, terminal, input, cancel).await;

        match result {
            Ok(end) => {
                if !matches!(end, ShellEnd::PeerDisconnected { .. }) {
                    self.disconnect(DisconnectReason::ByApplication).await;
                }
                Ok(end)
            }
            Err(err) => {
                self.abort(&err).await;
                Err(err)
            }
        }
    }

    async fn run_phases(
        &mut self,
        operator: &mut dyn Operator,
        terminal: &mut dyn Terminal,
        input: mpsc::Receiver<Vec<u8>>,
        cancel: watch::Receiver<bool>,
    ) -> KeelResult<ShellEnd> {
        self.handshake(operator).await?;
        self.authenticate(operator, terminal).await?;
        self.open_shell(terminal).await?;
        self.run_shell(terminal, input, cancel).await
    }

    /// Version exchange and key exchange.
    ///
    /// # Errors
    ///
    /// - [`KeelError::UnsupportedVersion`] for a server that does not speak 2.0
    /// - [`KeelError::KeyExchange`] if the server lacks our algorithms, sends
    ///   a bad DH value, or its signature fails and the operator declines
    /// - [`KeelError::Protocol`] for unexpected messages
    pub async fn handshake(&mut self, operator: &mut dyn Operator) -> KeelResult<()> {
        self.version_exchange().await?;
        self.key_exchange(operator).await
    }

    async fn version_exchange(&mut self) -> KeelResult<()> {
        self.transport.write(&self.client_version.to_wire()).await?;

        let timeout = self.config.connect_timeout;
        let (id, buf) = tokio::time::timeout(timeout, self.read_identification())
            .await
            .map_err(|_| {
                KeelError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "Timed out waiting for server identification",
                ))
            })??;

        self.state.feed(&buf[id.consumed..]);
        logging::log_version_exchange(&self.client_version.to_string(), &id.line);
        self.server_version = Some(id.version);
        self.server_line = Some(id.line);
        self.state.transition(State::NegotiationInit)
    }

    async fn read_identification(&mut self) -> KeelResult<(ServerIdentification, Vec<u8>)> {
        let mut buf = Vec::new();
        loop {
            if let Some(id) = scan_server_identification(&buf)? {
                return Ok((id, buf));
            }
            let chunk = self.transport.read().await?;
            if chunk.is_empty() {
                return Err(KeelError::ConnectionClosed);
            }
            buf.extend_from_slice(&chunk);
        }
    }

    async fn key_exchange(&mut self, operator: &mut dyn Operator) -> KeelResult<()> {
        let client_kexinit = KexInit::new_client();
        let client_kexinit_bytes = client_kexinit.to_bytes();
        self.send_payload(&client_kexinit_bytes).await?;

        let (message, server_kexinit_bytes) = self.receive().await?;
        let Message::KexInit(server_kexinit) = message else {
            return Err(unexpected("SSH_MSG_KEXINIT", &message));
        };
        client_kexinit.check_supported(&server_kexinit)?;
        if client_kexinit.discard_guessed_packet(&server_kexinit) {
            let guessed = self.next_payload().await?;
            debug!(
                message_type = guessed.first().copied().unwrap_or_default(),
                "discarding wrongly guessed kex packet"
            );
        }
        self.state.transition(State::KeyExchange)?;

        let server_line = self.server_line.clone().ok_or_else(|| {
            KeelError::Protocol("Key exchange before version exchange".to_string())
        })?;
        let transcript = KexTranscript {
            client_version: self.client_version.to_string(),
            server_version: server_line,
            client_kexinit: client_kexinit_bytes,
            server_kexinit: server_kexinit_bytes,
        };

        let mut exchange = DhGroup1Exchange::new(transcript);
        exchange.initiate()?;
        let init = exchange.init_message()?;
        self.send_payload(&init.to_bytes()).await?;

        let message = self.recv().await?;
        let Message::KexdhReply(reply) = message else {
            return Err(unexpected("SSH_MSG_KEXDH_REPLY", &message));
        };
        let outcome = exchange.process_reply(&reply)?;

        let fingerprint = outcome.host_key().fingerprint();
        if !outcome.signature_valid() {
            if !self.config.allow_insecure_prompt {
                return Err(KeelError::KeyExchange(format!(
                    "Host signature verification failed for key {}",
                    fingerprint
                )));
            }
            let prompt = format!(
                "The host signature could not be verified (key {}). Continue anyway?",
                fingerprint
            );
            if !operator.confirm_insecure(&prompt)? {
                return Err(KeelError::KeyExchange(
                    "Host signature verification failed".to_string(),
                ));
            }
            warn!(host_key = %fingerprint, "continuing with unverified host signature");
        }

        let keys = outcome.session_keys();
        self.state.install_keys(&keys, outcome.exchange_hash())?;
        self.host_signature_valid = outcome.signature_valid();
        self.host_key = Some(outcome.host_key().clone());

        self.send_payload(&NewKeys::new().to_bytes()).await?;
        self.state.newkeys_sent()?;

        let message = self.recv().await?;
        if message != Message::NewKeys {
            return Err(unexpected("SSH_MSG_NEWKEYS", &message));
        }
        if !self.state.newkeys_received()? {
            return Err(KeelError::KeyExchange(
                "Keys not active after NEWKEYS".to_string(),
            ));
        }
        self.state.transition(State::SecuredKeysActive)?;

        logging::log_kex_complete(
            &fingerprint,
            outcome.exchange_hash(),
            outcome.signature_valid(),
        );
        Ok(())
    }

    /// Service request and password authentication.
    ///
    /// Echo is turned off on `terminal` while the password is read.
    ///
    /// # Errors
    ///
    /// - [`KeelError::AuthenticationFailed`] once `max_auth_attempts`
    ///   passwords were rejected
    /// - [`KeelError::Protocol`] if the service is refused or an unexpected
    ///   message arrives
    pub async fn authenticate(
        &mut self,
        operator: &mut dyn Operator,
        terminal: &mut dyn Terminal,
    ) -> KeelResult<()> {
        self.send_payload(&ServiceRequest::userauth().to_bytes())
            .await?;
        self.state.transition(State::ServiceRequest)?;

        let message = self.recv().await?;
        match &message {
            Message::ServiceAccept { service } if service == USERAUTH_SERVICE => {}
            _ => return Err(unexpected("SSH_MSG_SERVICE_ACCEPT", &message)),
        }
        self.state.transition(State::Authenticating)?;

        let username = operator.username()?;
        let mut attempts = AuthAttempts::new(self.config.max_auth_attempts);

        loop {
            let attempt = attempts.next_attempt()?;

            terminal.set_echo(false)?;
            let password = operator.password(&username).map(Zeroizing::new);
            terminal.set_echo(true)?;
            let password = password?;

            let request = AuthRequest::password(&username, &password);
            self.send_payload(&request.to_bytes()).await?;
            debug!(user = %username, attempt, "password sent");

            loop {
                match self.recv().await? {
                    Message::UserauthBanner(banner) => operator.show_banner(banner.message()),
                    Message::UserauthSuccess => {
                        logging::log_auth_success(&username, attempt);
                        operator.notify("Login successful");
                        self.username = Some(username);
                        return self.state.transition(State::Connected);
                    }
                    Message::UserauthFailure(failure) => {
                        logging::log_auth_failure(
                            &username,
                            attempt,
                            self.config.max_auth_attempts,
                            failure.methods_can_continue(),
                        );
                        operator.notify("Access denied");
                        break;
                    }
                    other => return Err(unexpected("SSH_MSG_USERAUTH_*", &other)),
                }
            }
        }
    }

    /// Opens the session channel and starts a shell on a pty sized to
    /// `terminal`.
    ///
    /// Failure replies are retried as the channel state machine dictates.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if the server closes the channel
    /// before the shell starts or sends a non-channel message.
    pub async fn open_shell(&mut self, terminal: &mut dyn Terminal) -> KeelResult<()> {
        let params = ChannelParams {
            local_id: 0,
            initial_window: self.config.initial_window,
            window_low_water: self.config.window_low_water,
            max_packet: self.config.max_packet,
            terminal_type: self.config.terminal_type.clone(),
            size: terminal.dimensions(),
        };
        let mut channel = SshChannel::new(params);
        self.send_payload(&channel.open_message()).await?;

        while !channel.is_shell_open() {
            let message = self.recv().await?;
            let Message::Channel(channel_message) = message else {
                return Err(unexpected("channel message", &message));
            };
            let step = channel.handle(channel_message)?;
            for payload in &step.outbound {
                self.send_payload(payload).await?;
            }
            if !step.output.is_empty() {
                terminal.write(&step.output)?;
            }
            if channel.is_closed() {
                return Err(KeelError::Protocol(
                    "Channel closed before the shell started".to_string(),
                ));
            }
        }

        logging::log_shell_open(
            channel.remote_id().unwrap_or_default(),
            channel.window_out(),
            channel.remote_max_packet(),
        );
        self.channel = Some(channel);
        Ok(())
    }

    /// Runs the interactive loop.
    ///
    /// Server output is written to `terminal`; chunks from `input` are sent
    /// as channel data. The loop ends when the channel closes, the transport
    /// ends, the server disconnects, or `cancel` becomes true. The terminal
    /// is in raw mode for the duration of the loop.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Protocol`] if no shell is open, and any fatal
    /// transport or protocol error.
    pub async fn run_shell(
        &mut self,
        terminal: &mut dyn Terminal,
        mut input: mpsc::Receiver<Vec<u8>>,
        mut cancel: watch::Receiver<bool>,
    ) -> KeelResult<ShellEnd> {
        if !self.channel.as_ref().is_some_and(SshChannel::is_shell_open) {
            return Err(KeelError::Protocol("No shell is open".to_string()));
        }

        terminal.enter_raw_mode()?;
        let result = self.shell_loop(terminal, &mut input, &mut cancel).await;
        let restored = terminal.restore_mode();

        let exit_status = self.channel.as_ref().and_then(SshChannel::exit_status);
        logging::log_shell_closed(exit_status, self.bytes_in, self.bytes_out);

        let end = result?;
        restored?;
        Ok(end)
    }

    async fn shell_loop(
        &mut self,
        terminal: &mut dyn Terminal,
        input: &mut mpsc::Receiver<Vec<u8>>,
        cancel: &mut watch::Receiver<bool>,
    ) -> KeelResult<ShellEnd> {
        let mut tick = tokio::time::interval(self.config.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut input_open = true;
        let mut cancel_open = true;

        // Packets that arrived together with the last setup reply.
        if let Some(end) = self.drain_packets(terminal).await? {
            return Ok(end);
        }

        loop {
            if *cancel.borrow() {
                info!("shell cancelled");
                return Ok(ShellEnd::Cancelled);
            }

            tokio::select! {
                chunk = self.transport.read() => {
                    let chunk = chunk?;
                    if chunk.is_empty() {
                        return Ok(ShellEnd::TransportClosed);
                    }
                    self.state.feed(&chunk);
                    if let Some(end) = self.drain_packets(terminal).await? {
                        return Ok(end);
                    }
                }
                keys = input.recv(), if input_open => match keys {
                    Some(keys) => self.forward_input(&keys).await?,
                    None => {
                        debug!("input source closed");
                        input_open = false;
                    }
                },
                changed = cancel.changed(), if cancel_open => {
                    if changed.is_err() {
                        cancel_open = false;
                    }
                }
                _ = tick.tick() => {
                    if !self.transport.is_connected() {
                        return Ok(ShellEnd::TransportClosed);
                    }
                }
            }
        }
    }

    async fn forward_input(&mut self, keys: &[u8]) -> KeelResult<()> {
        let Some(channel) = self.channel.as_mut() else {
            return Err(KeelError::Protocol("No shell is open".to_string()));
        };
        match channel.send_data(keys) {
            Ok(payload) => {
                self.bytes_out += keys.len() as u64;
                self.send_payload(&payload).await
            }
            Err(KeelError::WindowExceeded {
                requested,
                available,
            }) => {
                warn!(requested, available, "input dropped, exceeds peer window");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Handles every complete packet in the buffer.
    async fn drain_packets(&mut self, terminal: &mut dyn Terminal) -> KeelResult<Option<ShellEnd>> {
        while let Some(packet) = self.state.next_packet()? {
            let message = Message::decode(packet.payload())?;
            let message = match self.handle_generic(message).await {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(KeelError::Disconnected {
                    reason,
                    description,
                }) => {
                    return Ok(Some(ShellEnd::PeerDisconnected {
                        reason,
                        description,
                    }))
                }
                Err(e) => return Err(e),
            };

            let Message::Channel(channel_message) = message else {
                return Err(unexpected("channel message", &message));
            };
            let Some(channel) = self.channel.as_mut() else {
                return Err(KeelError::Protocol("No shell is open".to_string()));
            };

            let step = channel.handle(channel_message)?;
            let closed = channel.is_closed();
            let exit_status = channel.exit_status();

            if !step.output.is_empty() {
                self.bytes_in += step.output.len() as u64;
                terminal.write(&step.output)?;
            }
            for payload in &step.outbound {
                self.send_payload(payload).await?;
            }
            if closed {
                return Ok(Some(ShellEnd::ChannelClosed { exit_status }));
            }
        }
        Ok(None)
    }

    /// Sends a DISCONNECT and closes the transport. Errors are logged and
    /// otherwise ignored.
    pub async fn disconnect(&mut self, reason: DisconnectReason) {
        if !self.transport.is_connected() {
            return;
        }
        if let Some(channel) = self.channel.as_mut() {
            if let Some(close) = channel.close_message() {
                if let Err(e) = self.send_payload(&close).await {
                    debug!(error = %e, "channel close not sent");
                }
            }
        }
        if let Err(e) = self.send_payload(&Disconnect::new(reason).to_bytes()).await {
            debug!(error = %e, "disconnect not sent");
        }
        if let Err(e) = self.transport.close().await {
            debug!(error = %e, "transport close failed");
        }
    }

    async fn abort(&mut self, err: &KeelError) {
        let Some(code) = err.disconnect_reason() else {
            return;
        };
        let reason = DisconnectReason::from_u32(code).unwrap_or(DisconnectReason::ByApplication);
        logging::log_fatal(code, reason.name(), &err.to_string());
        if !self.transport.is_connected() {
            return;
        }
        let mut disconnect = Disconnect::new(reason);
        disconnect.description = err.to_string();
        if let Err(e) = self.send_payload(&disconnect.to_bytes()).await {
            debug!(error = %e, "disconnect not sent");
        }
        if let Err(e) = self.transport.close().await {
            debug!(error = %e, "transport close failed");
        }
    }

    async fn send_payload(&mut self, payload: &[u8]) -> KeelResult<()> {
        if !self.transport.is_connected() {
            return Err(KeelError::ConnectionClosed);
        }
        let wire = self.state.seal_payload(payload)?;
        self.transport.write(&wire).await
    }

    /// Next message that is not handled at the transport level.
    async fn recv(&mut self) -> KeelResult<Message> {
        Ok(self.receive().await?.0)
    }

    /// Like [`recv`](Self::recv), also returning the raw payload.
    async fn receive(&mut self) -> KeelResult<(Message, Vec<u8>)> {
        loop {
            let payload = self.next_payload().await?;
            let message = Message::decode(&payload)?;
            if let Some(message) = self.handle_generic(message).await? {
                return Ok((message, payload));
            }
        }
    }

    /// Payload of the next packet, with no message handling.
    async fn next_payload(&mut self) -> KeelResult<Vec<u8>> {
        loop {
            if let Some(packet) = self.state.next_packet()? {
                return Ok(packet.into_payload());
            }

            let chunk = self.transport.read().await?;
            if chunk.is_empty() {
                return Err(KeelError::ConnectionClosed);
            }
            self.state.feed(&chunk);
        }
    }

    /// Handles messages that may arrive at any time. Returns the message if
    /// it is not one of them.
    async fn handle_generic(&mut self, message: Message) -> KeelResult<Option<Message>> {
        match message {
            Message::Ignore => {
                trace!("ignore message");
                Ok(None)
            }
            Message::Debug {
                always_display,
                message,
            } => {
                if always_display {
                    info!(message = %message, "server debug message");
                } else {
                    debug!(message = %message, "server debug message");
                }
                Ok(None)
            }
            Message::Unimplemented { sequence } => {
                warn!(sequence, "server did not implement one of our packets");
                Ok(None)
            }
            Message::Disconnect(disconnect) => {
                logging::log_peer_disconnect(
                    disconnect.reason,
                    DisconnectReason::name_of(disconnect.reason),
                    &disconnect.description,
                );
                Err(KeelError::Disconnected {
                    reason: disconnect.reason,
                    description: format!(
                        "{}: {}",
                        DisconnectReason::name_of(disconnect.reason),
                        disconnect.description
                    ),
                })
            }
            Message::GlobalRequest { name, want_reply } => {
                debug!(request = %name, want_reply, "global request");
                if want_reply {
                    self.send_payload(&request_failure()).await?;
                }
                Ok(None)
            }
            Message::Unknown { msg_type } => {
                let sequence = self.state.recv_sequence().wrapping_sub(1);
                warn!(msg_type, sequence, "unknown message type");
                let mut w = WireWriter::message(MessageType::Unimplemented);
                w.put_u32(sequence);
                self.send_payload(&w.finish()).await?;
                Ok(None)
            }
            other => Ok(Some(other)),
        }
    }
}

fn unexpected(expected: &str, got: &Message) -> KeelError {
    // Only the initial key exchange is supported.
    if let Message::KexInit(_) = got {
        return KeelError::KeyExchange(format!(
            "Server requested re-key while expecting {}, re-key not supported",
            expected
        ));
    }
    KeelError::Protocol(format!("Expected {}, got {}", expected, got.label()))
}
