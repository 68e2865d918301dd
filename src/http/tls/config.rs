//! TLS configuration
//!
//! This module provides the TLS configuration builder for the client side.
//! Nothing touches OpenSSL until [`ClientConfigBuilder::build`], so every
//! failure surfaces there as a [`TlsError`].

use super::session::TlsSessionOps;
use openssl::ssl::{SslContext, SslContextBuilder, SslMethod, SslVerifyMode, SslVersion};
use std::net::TcpStream;
use std::path::PathBuf;

/// ALPN identifier of HTTP/2 over TLS
pub const ALPN_H2: &str = "h2";

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Parse TLS version from string (case-insensitive)
    pub fn from_str(s: &str) -> Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }

    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(&self) -> SslVersion {
        match self {
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Get version as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
}

/// TLS client configuration (immutable after building)
#[derive(Clone)]
pub struct TlsConfig {
    pub(crate) ctx: SslContext,
    pub(crate) servername: Option<String>,
    pub(crate) verify_peer: bool,
    /// Protocol the server must select through ALPN
    pub(crate) required_protocol: Option<Vec<u8>>,
}

impl TlsConfig {
    /// Create a new client configuration builder
    pub fn client() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Connect to a server with TLS
    ///
    /// Fails with [`crate::http::Error::AlpnFailed`] when the server does
    /// not select the required protocol.
    pub fn connect(&self, stream: TcpStream) -> crate::http::Result<TlsSessionOps> {
        TlsSessionOps::connect(stream, self.clone())
    }
}

/// Client configuration builder
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    min_version: Option<TlsVersion>,
    max_version: Option<TlsVersion>,
    servername: Option<String>,
    alpn: Vec<String>,
    require_alpn: bool,
    verify_peer: bool,
    ca_file: Option<PathBuf>,
    cipher_list: Option<String>,
    ciphersuites: Option<String>,
}

impl ClientConfigBuilder {
    fn new() -> Self {
        ClientConfigBuilder {
            min_version: Some(TlsVersion::Tls12),
            max_version: None,
            servername: None,
            alpn: vec![ALPN_H2.to_string()],
            require_alpn: true,
            verify_peer: false,
            ca_file: None,
            cipher_list: None,
            ciphersuites: None,
        }
    }

    /// Set TLS version (both min and max)
    pub fn version(self, version: TlsVersion) -> Self {
        self.version_range(version, version)
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.min_version = Some(min);
        self.max_version = Some(max);
        self
    }

    /// Set cipher list (for TLS <= 1.2)
    pub fn cipher_list(mut self, ciphers: impl Into<String>) -> Self {
        self.cipher_list = Some(ciphers.into());
        self
    }

    /// Set cipher suites (for TLS 1.3)
    pub fn ciphersuites(mut self, ciphers: impl Into<String>) -> Self {
        self.ciphersuites = Some(ciphers.into());
        self
    }

    /// Set ALPN protocols offered, in preference order (default: `h2`)
    pub fn alpn(mut self, protocols: &[&str]) -> Self {
        self.alpn = protocols.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Whether the handshake must end with `h2` selected (default: true)
    pub fn require_h2(mut self, require: bool) -> Self {
        self.require_alpn = require;
        self
    }

    /// Set SNI servername
    pub fn servername(mut self, name: impl Into<String>) -> Self {
        self.servername = Some(name.into());
        self
    }

    /// Enable/disable peer certificate verification
    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.verify_peer = verify;
        self
    }

    /// Trust anchors used when verifying the peer
    pub fn ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        let mut ctx = SslContextBuilder::new(SslMethod::tls_client())?;

        ctx.set_min_proto_version(self.min_version.map(|v| v.to_openssl_version()))?;
        ctx.set_max_proto_version(self.max_version.map(|v| v.to_openssl_version()))?;

        if let Some(ciphers) = &self.cipher_list {
            ctx.set_cipher_list(ciphers)?;
        }
        if let Some(ciphers) = &self.ciphersuites {
            ctx.set_ciphersuites(ciphers)?;
        }

        if !self.alpn.is_empty() {
            // Length-prefixed wire encoding
            let mut alpn_bytes = Vec::new();
            for proto in &self.alpn {
                if proto.is_empty() || proto.len() > 255 {
                    return Err(TlsError::InvalidConfig(format!(
                        "invalid ALPN protocol {:?}",
                        proto
                    )));
                }
                alpn_bytes.push(proto.len() as u8);
                alpn_bytes.extend_from_slice(proto.as_bytes());
            }
            ctx.set_alpn_protos(&alpn_bytes)?;
        }

        if self.require_alpn && !self.alpn.iter().any(|p| p == ALPN_H2) {
            return Err(TlsError::InvalidConfig(
                "h2 is required but not offered through ALPN".to_string(),
            ));
        }

        if self.verify_peer {
            ctx.set_verify(SslVerifyMode::PEER);
            match &self.ca_file {
                Some(path) => ctx.set_ca_file(path)?,
                None => ctx.set_default_verify_paths()?,
            }
        } else {
            ctx.set_verify(SslVerifyMode::NONE);
        }

        Ok(TlsConfig {
            ctx: ctx.build(),
            servername: self.servername,
            verify_peer: self.verify_peer,
            required_protocol: self
                .require_alpn
                .then(|| ALPN_H2.as_bytes().to_vec()),
        })
    }
}
