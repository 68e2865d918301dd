//! HTTP/2 frame transport and stream multiplexing
//!
//! This module implements the framing layer of RFC 7540: it turns a
//! possibly fragmented byte stream into typed frames, negotiates settings,
//! tracks flow-control windows and routes frames between the connection and
//! its streams.
//!
//! # Architecture
//!
//! The engine is sans-I/O. [`Connection`] consumes bytes through
//! [`Connection::receive`] and produces bytes through
//! [`Connection::take_output`]; it never touches a socket. [`H2Client`]
//! drives a `Connection` over any [`SessionOps`](crate::http::SessionOps)
//! transport on an I/O thread and hands out blocking [`StreamHandle`]s.
//!
//! ## Components
//!
//! - **Frames**: immutable [`Frame`] plus typed views per frame type
//! - **Codec**: incremental [`FrameParser`] and stateless [`FrameSerializer`]
//! - **Settings**: [`SettingsTable`] with atomic remote application and
//!   acknowledged local updates
//! - **Flow control**: [`WindowTracker`] for connection and stream windows
//! - **Streams**: [`StreamMultiplexer`] for id allocation, routing and
//!   per-stream inboxes
//! - **HPACK**: [`HeaderCodec`] on top of the `hpack` crate
//!
//! # Examples
//!
//! ## Two peers in memory
//!
//! ```
//! use h2mux::http::h2::{Connection, ConnectionConfig, HeaderField, StreamEvent};
//!
//! let mut client = Connection::client(ConnectionConfig::default());
//! let mut server = Connection::server(ConnectionConfig::default());
//! client.start().unwrap();
//! server.start().unwrap();
//!
//! let id = client.open_stream().unwrap();
//! client
//!     .send_headers(id, &[HeaderField::new(":method", "GET")], true)
//!     .unwrap();
//!
//! server.receive(&client.take_output()).unwrap();
//! let event = server.poll_stream(id).unwrap().unwrap();
//! assert!(matches!(event, StreamEvent::Headers { end_stream: true, .. }));
//! ```
//!
//! ## Blocking client over TCP
//!
//! ```no_run
//! use h2mux::http::h2::{H2ClientBuilder, HeaderField};
//! use h2mux::http::FdSessionOps;
//! use std::time::Duration;
//!
//! let addr = "127.0.0.1:8080".parse().unwrap();
//! let session = FdSessionOps::connect(addr, Some(Duration::from_secs(5))).unwrap();
//! let client = H2ClientBuilder::new().connect(session).unwrap();
//!
//! let stream = client.open_stream().unwrap();
//! stream
//!     .send_headers(&[HeaderField::new(":method", "GET"), HeaderField::new(":path", "/")], true)
//!     .unwrap();
//! while let Some(event) = stream.recv().unwrap() {
//!     println!("{:?}", event);
//! }
//! ```

pub mod client;
pub mod codec;
pub mod connection;
pub mod error;
pub mod flow_control;
pub mod frames;
pub mod hpack;
pub mod settings;
pub mod stream;

pub use client::{H2Client, H2ClientBuilder, StreamHandle};
pub use codec::{FrameParser, FrameSerializer};
pub use connection::{Connection, ConnectionConfig, ConnectionConfigBuilder, Event};
pub use error::{Error, ErrorCode, Result};
pub use flow_control::{ConnectionWindow, FlowControlWindow, WindowTracker};
pub use frames::{
    DataFrame, Frame, FrameFlags, FrameType, GoawayFrame, HeadersFrame, PingFrame, PriorityFrame,
    PushPromiseFrame, RstStreamFrame, SettingsFrame, WindowUpdateFrame,
};
pub use hpack::{HeaderCodec, HeaderField};
pub use settings::{Settings, SettingsBuilder, SettingsTable, SettingsUpdate, SyncState};
pub use stream::{Role, StreamEvent, StreamId, StreamMultiplexer, StreamState};

/// HTTP/2 connection preface that must be sent by clients
///
/// From RFC 7540 Section 3.5:
/// "PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default initial window size (65535 bytes)
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default maximum frame size (16384 bytes)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Default header table size (4096 bytes)
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// Maximum stream ID value (2^31 - 1)
pub const MAX_STREAM_ID: u32 = 0x7FFFFFFF;

/// Largest flow-control window (2^31 - 1)
pub const MAX_WINDOW_SIZE: u32 = 0x7FFFFFFF;

/// Stream ID 0 (connection-level)
pub const CONNECTION_STREAM_ID: u32 = 0;
