//! Collaborator contracts consumed by the protocol core
//!
//! The SSH stack never touches a socket, a tty or stdin directly. It talks to
//! these three traits instead, which keeps the protocol logic testable against
//! in-memory peers and scripted operators.

use crate::KeelResult;

/// Byte-stream transport to the remote host
///
/// Delivery guarantees are those of a stream: bytes arrive in order, but
/// reads may split or merge what the peer wrote.
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Write all of `data` to the peer
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is closed or the write fails
    async fn write(&mut self, data: &[u8]) -> KeelResult<()>;

    /// Wait for the next chunk of bytes from the peer
    ///
    /// An empty vector means the peer closed the stream. Implementations must
    /// be cancel-safe: dropping the future before completion loses no data.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails
    async fn read(&mut self) -> KeelResult<Vec<u8>>;

    /// Whether the transport is still usable
    fn is_connected(&self) -> bool;

    /// Close the transport
    ///
    /// # Errors
    ///
    /// Returns an error if shutdown fails
    async fn close(&mut self) -> KeelResult<()>;
}

/// Dimensions of the local terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    /// Rows (characters)
    pub rows: u32,
    /// Columns (characters)
    pub cols: u32,
    /// Width in pixels, 0 if unknown
    pub pixel_width: u32,
    /// Height in pixels, 0 if unknown
    pub pixel_height: u32,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

/// Local terminal the remote shell is presented on
pub trait Terminal: Send {
    /// Current terminal dimensions
    fn dimensions(&self) -> TerminalSize;

    /// Turn local echo on or off
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal mode cannot be changed
    fn set_echo(&mut self, enabled: bool) -> KeelResult<()>;

    /// Switch to non-canonical, non-echoing input
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal mode cannot be changed
    fn enter_raw_mode(&mut self) -> KeelResult<()> {
        self.set_echo(false)
    }

    /// Restore the mode that was active before [`Terminal::enter_raw_mode`]
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal mode cannot be restored
    fn restore_mode(&mut self) -> KeelResult<()> {
        self.set_echo(true)
    }

    /// Write already-translated output bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal cannot be written
    fn write(&mut self, bytes: &[u8]) -> KeelResult<()>;
}

/// The human driving the client
pub trait Operator: Send {
    /// Ask for the login name
    ///
    /// # Errors
    ///
    /// Returns an error if input cannot be read
    fn username(&mut self) -> KeelResult<String>;

    /// Ask for the password of `username`
    ///
    /// The caller disables terminal echo around this call.
    ///
    /// # Errors
    ///
    /// Returns an error if input cannot be read
    fn password(&mut self, username: &str) -> KeelResult<String>;

    /// Ask whether to continue although the host signature did not verify
    ///
    /// # Errors
    ///
    /// Returns an error if input cannot be read
    fn confirm_insecure(&mut self, reason: &str) -> KeelResult<bool>;

    /// Display a pre-authentication banner sent by the server
    fn show_banner(&mut self, _message: &str) {}

    /// Display a short status line ("Login successful", ...)
    fn notify(&mut self, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTerminal {
        echo: bool,
        written: Vec<u8>,
    }

    impl Terminal for EchoTerminal {
        fn dimensions(&self) -> TerminalSize {
            TerminalSize::default()
        }

        fn set_echo(&mut self, enabled: bool) -> KeelResult<()> {
            self.echo = enabled;
            Ok(())
        }

        fn write(&mut self, bytes: &[u8]) -> KeelResult<()> {
            self.written.extend_from_slice(bytes);
            Ok(())
        }
    }

    struct FixedOperator;

    impl Operator for FixedOperator {
        fn username(&mut self) -> KeelResult<String> {
            Ok("alice".to_string())
        }

        fn password(&mut self, _username: &str) -> KeelResult<String> {
            Ok("secret".to_string())
        }

        fn confirm_insecure(&mut self, _reason: &str) -> KeelResult<bool> {
            Ok(false)
        }
    }

    #[test]
    fn test_terminal_raw_mode_defaults() {
        let mut term = EchoTerminal {
            echo: true,
            written: Vec::new(),
        };
        term.enter_raw_mode().unwrap();
        assert!(!term.echo);
        term.restore_mode().unwrap();
        assert!(term.echo);

        term.write(b"hi").unwrap();
        assert_eq!(term.written, b"hi");
    }

    #[test]
    fn test_terminal_size_default() {
        let size = TerminalSize::default();
        assert_eq!(size.rows, 24);
        assert_eq!(size.cols, 80);
        assert_eq!(size.pixel_width, 0);
    }

    #[test]
    fn test_operator_defaults() {
        let mut op = FixedOperator;
        assert_eq!(op.username().unwrap(), "alice");
        assert_eq!(op.password("alice").unwrap(), "secret");
        assert!(!op.confirm_insecure("bad signature").unwrap());
        op.show_banner("welcome");
        op.notify("ok");
    }
}
