//! h2mux - HTTP/2 frame transport and stream multiplexing
//!
//! This crate implements the framing layer of HTTP/2: an incremental frame
//! codec, settings negotiation, flow control and a stream multiplexer,
//! composed into a sans-I/O connection. A blocking client driver runs that
//! connection over plain TCP or TLS (ALPN `h2`).

pub mod http;
