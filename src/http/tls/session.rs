//! TLS session operations
//!
//! This module implements the SessionOps trait for TLS connections,
//! enabling transparent switching between plain TCP and TLS I/O.

use super::config::{TlsConfig, TlsError};
use crate::http::session::{poll_fd, PollEvents, SessionOps};
use crate::http::{Error, Result as HttpResult};
use openssl::ssl::{ErrorCode as SslErrorCode, Ssl, SslStream};
use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::os::fd::AsRawFd;
use std::time::Duration;
use tracing::{debug, warn};

/// TLS session operations
///
/// Implements SessionOps trait for TLS-encrypted connections.
/// Wraps an OpenSSL SslStream and provides poll/read/write/close operations.
pub struct TlsSessionOps {
    stream: SslStream<TcpStream>,
    failed: bool,
}

impl TlsSessionOps {
    /// Create a client TLS connection (perform handshake)
    pub fn connect(tcp_stream: TcpStream, config: TlsConfig) -> HttpResult<Self> {
        let mut ssl = Ssl::new(&config.ctx).map_err(TlsError::from)?;

        if let Some(ref servername) = config.servername {
            ssl.set_hostname(servername).map_err(TlsError::from)?;
            if config.verify_peer {
                ssl.param_mut().set_host(servername).map_err(TlsError::from)?;
            }
        }

        // The handshake runs in blocking mode
        let ssl_stream = ssl
            .connect(tcp_stream)
            .map_err(|e| TlsError::HandshakeFailed(format!("connection failed: {}", e)))?;

        let session = TlsSessionOps {
            stream: ssl_stream,
            failed: false,
        };
        debug!(
            version = session.version(),
            alpn = ?session.negotiated_protocol().map(String::from_utf8_lossy),
            "tls handshake complete"
        );

        if let Some(required) = &config.required_protocol {
            if session.negotiated_protocol() != Some(required.as_slice()) {
                let selected = session
                    .negotiated_protocol()
                    .map(|p| String::from_utf8_lossy(p).into_owned())
                    .unwrap_or_else(|| "none".to_string());
                warn!(%selected, "server did not select h2");
                return Err(Error::AlpnFailed(format!(
                    "expected {}, server selected {}",
                    String::from_utf8_lossy(required),
                    selected
                )));
            }
        }

        Ok(session)
    }

    /// Protocol selected through ALPN, if any
    pub fn negotiated_protocol(&self) -> Option<&[u8]> {
        self.stream.ssl().selected_alpn_protocol()
    }

    /// Negotiated TLS version
    pub fn version(&self) -> &'static str {
        self.stream.ssl().version_str()
    }

    /// Check if TLS failed
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Get reference to underlying TCP stream
    pub fn get_ref(&self) -> &TcpStream {
        self.stream.get_ref()
    }
}

impl SessionOps for TlsSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> HttpResult<bool> {
        // Decrypted bytes already buffered inside OpenSSL never show up on the fd
        if matches!(events, PollEvents::Read | PollEvents::Both) && self.stream.ssl().pending() > 0 {
            return Ok(true);
        }
        poll_fd(self.stream.get_ref().as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> HttpResult<usize> {
        match self.stream.ssl_read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.code() == SslErrorCode::ZERO_RETURN => Ok(0),
            Err(e) => {
                self.failed = true;
                match e.into_io_error() {
                    Ok(io_err) => Err(Error::Io(io_err)),
                    Err(e) => Err(Error::Protocol(format!("TLS read failed: {}", e))),
                }
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> HttpResult<usize> {
        match self.stream.write(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.failed = true;
                Err(Error::Io(e))
            }
        }
    }

    fn close(&mut self) -> HttpResult<()> {
        if !self.failed {
            // close_notify is best effort
            let _ = self.stream.shutdown();
        }
        match self.stream.get_mut().shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }
}

