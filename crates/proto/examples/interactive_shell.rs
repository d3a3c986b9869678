//! Interactive Shell Example
//!
//! Connects to an SSH server, logs in with a password and attaches stdin and
//! stdout to a remote shell.
//!
//! Usage:
//!   cargo run --example interactive_shell <host> [port] [username]
//!
//! The password is taken from `KEEL_PASSWORD` or read from stdin. Set
//! `KEEL_ACCEPT_UNVERIFIED=1` to continue when the host signature cannot be
//! verified. Logs go to stderr; tune them with `RUST_LOG`.
//!
//! Example:
//!   RUST_LOG=keel_proto=debug cargo run --example interactive_shell 10.0.0.5 22 admin

use std::env;
use std::io::{self, BufRead, Write};

use keel_platform::{KeelError, KeelResult, Operator, Terminal, TerminalSize};
use keel_proto::ssh::client::{SshClient, SshClientConfig};
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

/// stdout as the remote terminal. Echo and raw mode are left to the local tty.
struct StdoutTerminal {
    size: TerminalSize,
}

impl StdoutTerminal {
    fn from_env() -> Self {
        let read = |name: &str| env::var(name).ok().and_then(|v| v.parse::<u32>().ok());
        let defaults = TerminalSize::default();
        Self {
            size: TerminalSize {
                rows: read("LINES").unwrap_or(defaults.rows),
                cols: read("COLUMNS").unwrap_or(defaults.cols),
                ..defaults
            },
        }
    }
}

impl Terminal for StdoutTerminal {
    fn dimensions(&self) -> TerminalSize {
        self.size
    }

    fn set_echo(&mut self, _enabled: bool) -> KeelResult<()> {
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> KeelResult<()> {
        let mut out = io::stdout().lock();
        out.write_all(bytes)?;
        out.flush()?;
        Ok(())
    }
}

/// Credentials collected before connecting.
struct PromptedOperator {
    username: String,
    password: Option<String>,
    accept_unverified: bool,
}

impl Operator for PromptedOperator {
    fn username(&mut self) -> KeelResult<String> {
        Ok(self.username.clone())
    }

    fn password(&mut self, username: &str) -> KeelResult<String> {
        if let Some(password) = self.password.take() {
            return Ok(password);
        }
        eprint!("{}'s password: ", username);
        io::stderr().flush()?;
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Err(KeelError::Config("no password on stdin".to_string()));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn confirm_insecure(&mut self, reason: &str) -> KeelResult<bool> {
        eprintln!("WARNING: {}", reason);
        Ok(self.accept_unverified)
    }

    fn show_banner(&mut self, message: &str) {
        eprintln!("{}", message);
    }

    fn notify(&mut self, message: &str) {
        eprintln!("{}", message);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keel_proto=info")),
        )
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args.len() > 4 {
        eprintln!("Usage: {} <host> [port] [username]", args[0]);
        std::process::exit(1);
    }

    let host = &args[1];
    let port = match args.get(2) {
        Some(port) => port.parse::<u16>()?,
        None => 22,
    };
    let username = match args.get(3) {
        Some(user) => user.clone(),
        None => env::var("USER").unwrap_or_else(|_| "root".to_string()),
    };

    let mut operator = PromptedOperator {
        username,
        password: env::var("KEEL_PASSWORD").ok(),
        accept_unverified: env::var("KEEL_ACCEPT_UNVERIFIED").is_ok_and(|v| v == "1"),
    };
    let mut terminal = StdoutTerminal::from_env();

    let mut client = SshClient::connect(host, port, SshClientConfig::default()).await?;
    client.handshake(&mut operator).await?;
    if let Some(key) = client.host_key() {
        eprintln!("Host key fingerprint: {}", key.fingerprint());
    }
    client.authenticate(&mut operator, &mut terminal).await?;
    client.open_shell(&mut terminal).await?;

    // Keystrokes are read only once the shell is open, so the password
    // prompt above owns stdin until then.
    let (input_tx, input_rx) = mpsc::channel::<Vec<u8>>(64);
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if input_tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let end = client.run_shell(&mut terminal, input_rx, cancel_rx).await?;
    client
        .disconnect(keel_proto::ssh::DisconnectReason::ByApplication)
        .await;
    eprintln!("\r\nSession ended: {:?}", end);

    Ok(())
}
