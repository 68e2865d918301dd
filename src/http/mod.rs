//! Transport layer for the HTTP/2 engine
//!
//! The engine itself is sans-I/O; this module supplies the byte channel it
//! is driven over.
//!
//! # Architecture
//!
//! The transport uses a session operations abstraction that allows
//! seamless switching between plain TCP and TLS connections:
//!
//! - `SessionOps` trait defines operations (poll, read, write, close)
//! - `FdSessionOps` implements them for a plain TCP socket
//! - `tls::TlsSessionOps` implements them for an OpenSSL stream
//! - `HttpSession` adds timeouts on top of any `SessionOps`
//!
//! # Examples
//!
//! ```no_run
//! use h2mux::http::{FdSessionOps, HttpSession};
//! use std::time::Duration;
//!
//! let addr = "127.0.0.1:8080".parse().unwrap();
//! let ops = FdSessionOps::connect(addr, Some(Duration::from_secs(5))).unwrap();
//! let mut session = HttpSession::new(ops);
//! session.write_all(b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n").unwrap();
//! ```

pub mod h2;
pub mod session;
pub mod tls;

pub use session::{FdSessionOps, HttpSession, PollEvents, SessionOps};

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] tls::TlsError),

    #[error("ALPN negotiation failed: {0}")]
    AlpnFailed(String),

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),
}
