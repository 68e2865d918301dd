//! TLS support for HTTP/2 connections
//!
//! Client-side TLS built on OpenSSL. The handshake offers `h2` through ALPN
//! and, by default, refuses to continue unless the server selects it.
//!
//! # Architecture
//!
//! The TLS implementation uses the session operations abstraction pattern:
//!
//! 1. `TlsConfig` defines TLS settings (versions, ciphers, ALPN, SNI)
//! 2. `TlsSessionOps` implements the `SessionOps` trait for encrypted I/O
//! 3. The HTTP/2 driver transparently uses TLS operations
//!
//! # Examples
//!
//! ```no_run
//! use h2mux::http::tls::{TlsConfig, TlsVersion};
//! use std::net::TcpStream;
//!
//! let tls_config = TlsConfig::client()
//!     .version(TlsVersion::Tls13)
//!     .servername("example.com")
//!     .verify_peer(true)
//!     .build()
//!     .unwrap();
//!
//! let tcp = TcpStream::connect("example.com:443").unwrap();
//! let session = tls_config.connect(tcp).unwrap();
//! assert_eq!(session.negotiated_protocol(), Some(&b"h2"[..]));
//! ```

pub mod config;
pub mod session;

pub use config::{ClientConfigBuilder, TlsConfig, TlsError, TlsVersion, ALPN_H2};
pub use session::TlsSessionOps;
