//! [`Transport`] implementations over tokio byte streams.
//!
//! [`StreamTransport`] wraps anything that is `AsyncRead + AsyncWrite`, which
//! covers TCP sockets as well as the in-memory `tokio::io::duplex` pipes the
//! tests use.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use keel_proto::ssh::io::TcpTransport;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = TcpTransport::connect("10.0.0.5", 22, Duration::from_secs(10)).await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use keel_platform::{KeelError, KeelResult, Transport};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Read chunk size.
const READ_CHUNK: usize = 8192;

/// A [`Transport`] over a tokio stream.
#[derive(Debug)]
pub struct StreamTransport<S> {
    stream: S,
    connected: bool,
    buf: Box<[u8]>,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps a connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            connected: true,
            buf: vec![0u8; READ_CHUNK].into_boxed_slice(),
        }
    }

    /// Returns the inner stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, data: &[u8]) -> KeelResult<()> {
        if !self.connected {
            return Err(KeelError::ConnectionClosed);
        }
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        trace!(len = data.len(), "transport write");
        Ok(())
    }

    async fn read(&mut self) -> KeelResult<Vec<u8>> {
        if !self.connected {
            return Ok(Vec::new());
        }
        let n = self.stream.read(&mut self.buf).await?;
        if n == 0 {
            debug!("transport closed by peer");
            self.connected = false;
        }
        trace!(len = n, "transport read");
        Ok(self.buf[..n].to_vec())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn close(&mut self) -> KeelResult<()> {
        if self.connected {
            self.connected = false;
            self.stream.shutdown().await?;
        }
        Ok(())
    }
}

/// TCP transport.
pub type TcpTransport = StreamTransport<TcpStream>;

impl StreamTransport<TcpStream> {
    /// Connects to `host:port` within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Io`] if the connection fails or times out.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> KeelResult<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                KeelError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("Connection to {}:{} timed out", host, port),
                ))
            })??;
        stream.set_nodelay(true)?;
        debug!(host, port, "tcp connected");
        Ok(Self::new(stream))
    }
}
