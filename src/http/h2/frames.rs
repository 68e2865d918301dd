//! HTTP/2 frame types and utilities
//!
//! This module defines the frame types specified in RFC 7540 Section 6.
//!
//! [`Frame`] is the generic, immutable wire representation produced by the
//! parser and consumed by the serializer. The typed views (`DataFrame`,
//! `HeadersFrame`, ...) decode and build the type-specific payload layouts.

use super::error::{Error, ErrorCode, Result};
use super::settings::Settings;
use super::stream::StreamId;
use super::{CONNECTION_STREAM_ID, MAX_STREAM_ID};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// HTTP/2 frame types (RFC 7540 Section 6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// DATA frame (0x0) - Conveys arbitrary, variable-length sequences of octets
    Data = 0x0,
    /// HEADERS frame (0x1) - Opens a stream and carries header block fragment
    Headers = 0x1,
    /// PRIORITY frame (0x2) - Specifies sender-advised priority of a stream
    Priority = 0x2,
    /// RST_STREAM frame (0x3) - Allows immediate termination of a stream
    RstStream = 0x3,
    /// SETTINGS frame (0x4) - Conveys configuration parameters
    Settings = 0x4,
    /// PUSH_PROMISE frame (0x5) - Used to notify peer of intent to initiate stream
    PushPromise = 0x5,
    /// PING frame (0x6) - Mechanism for measuring round-trip time
    Ping = 0x6,
    /// GOAWAY frame (0x7) - Initiates shutdown of connection
    Goaway = 0x7,
    /// WINDOW_UPDATE frame (0x8) - Implements flow control
    WindowUpdate = 0x8,
    /// CONTINUATION frame (0x9) - Continues sequence of header block fragments
    Continuation = 0x9,
}

impl FrameType {
    /// Convert frame type to u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Create frame type from u8
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(FrameType::Data),
            0x1 => Some(FrameType::Headers),
            0x2 => Some(FrameType::Priority),
            0x3 => Some(FrameType::RstStream),
            0x4 => Some(FrameType::Settings),
            0x5 => Some(FrameType::PushPromise),
            0x6 => Some(FrameType::Ping),
            0x7 => Some(FrameType::Goaway),
            0x8 => Some(FrameType::WindowUpdate),
            0x9 => Some(FrameType::Continuation),
            _ => None,
        }
    }

    /// Get frame type name
    pub fn name(&self) -> &'static str {
        match self {
            FrameType::Data => "DATA",
            FrameType::Headers => "HEADERS",
            FrameType::Priority => "PRIORITY",
            FrameType::RstStream => "RST_STREAM",
            FrameType::Settings => "SETTINGS",
            FrameType::PushPromise => "PUSH_PROMISE",
            FrameType::Ping => "PING",
            FrameType::Goaway => "GOAWAY",
            FrameType::WindowUpdate => "WINDOW_UPDATE",
            FrameType::Continuation => "CONTINUATION",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u8())
    }
}

/// HTTP/2 frame flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Create empty flags
    pub fn empty() -> Self {
        FrameFlags(0)
    }

    /// Create from u8
    pub fn from_u8(flags: u8) -> Self {
        FrameFlags(flags)
    }

    /// Get raw u8 value
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Set a flag
    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    /// Return a copy with `flag` set
    pub fn with(mut self, flag: u8) -> Self {
        self.set(flag);
        self
    }

    /// Return a copy with `flag` cleared
    pub fn without(self, flag: u8) -> Self {
        FrameFlags(self.0 & !flag)
    }

    /// Check if a flag is set
    pub fn is_set(&self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    /// END_STREAM flag (0x1)
    pub const END_STREAM: u8 = 0x1;

    /// ACK flag (0x1) - used for SETTINGS and PING
    pub const ACK: u8 = 0x1;

    /// END_HEADERS flag (0x4)
    pub const END_HEADERS: u8 = 0x4;

    /// PADDED flag (0x8)
    pub const PADDED: u8 = 0x8;

    /// PRIORITY flag (0x20)
    pub const PRIORITY: u8 = 0x20;

    /// Check if END_STREAM is set
    pub fn is_end_stream(&self) -> bool {
        self.is_set(Self::END_STREAM)
    }

    /// Check if ACK is set
    pub fn is_ack(&self) -> bool {
        self.is_set(Self::ACK)
    }

    /// Check if END_HEADERS is set
    pub fn is_end_headers(&self) -> bool {
        self.is_set(Self::END_HEADERS)
    }

    /// Check if PADDED is set
    pub fn is_padded(&self) -> bool {
        self.is_set(Self::PADDED)
    }

    /// Check if PRIORITY is set
    pub fn is_priority(&self) -> bool {
        self.is_set(Self::PRIORITY)
    }
}

/// Generic HTTP/2 frame
///
/// Immutable once built. The length field is never stored: it is always the
/// length of the payload, so a stale length cannot reach the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    frame_type: FrameType,
    flags: FrameFlags,
    stream_id: StreamId,
    payload: Bytes,
}

impl Frame {
    /// Create a new frame. The reserved bit of the stream id is cleared.
    pub fn new(
        frame_type: FrameType,
        flags: FrameFlags,
        stream_id: StreamId,
        payload: impl Into<Bytes>,
    ) -> Self {
        Frame {
            frame_type,
            flags,
            stream_id: stream_id & MAX_STREAM_ID,
            payload: payload.into(),
        }
    }

    /// Frame type
    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    /// Frame flags
    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    /// Stream identifier (0 for connection-level frames)
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Frame payload
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the frame, keeping only its payload
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Payload length as written to the 24-bit length field
    pub fn length(&self) -> usize {
        self.payload.len()
    }

    /// Whether the frame addresses the connection rather than a stream
    pub fn is_connection_level(&self) -> bool {
        self.stream_id == CONNECTION_STREAM_ID
    }

    /// END_STREAM on a DATA or HEADERS frame
    pub fn is_end_stream(&self) -> bool {
        matches!(self.frame_type, FrameType::Data | FrameType::Headers) && self.flags.is_end_stream()
    }

    /// ACK on a SETTINGS or PING frame
    pub fn is_ack(&self) -> bool {
        matches!(self.frame_type, FrameType::Settings | FrameType::Ping) && self.flags.is_ack()
    }

    fn expect_type(&self, expected: FrameType) -> Result<()> {
        if self.frame_type != expected {
            return Err(Error::Internal(format!(
                "expected {} frame, got {}",
                expected.name(),
                self.frame_type.name()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} stream={} flags=0x{:02x} len={}",
            self.frame_type.name(),
            self.stream_id,
            self.flags.as_u8(),
            self.payload.len()
        )
    }
}

/// Strip the pad length byte and the trailing padding of a PADDED frame
fn strip_padding(frame: &Frame) -> Result<(Bytes, Option<u8>)> {
    let mut payload = frame.payload().clone();
    if !frame.flags().is_padded() {
        return Ok((payload, None));
    }
    if payload.is_empty() {
        return Err(Error::FrameSize(format!(
            "{} frame is PADDED but has no pad length",
            frame.frame_type().name()
        )));
    }
    let pad_len = payload.get_u8();
    if pad_len as usize > payload.len() {
        return Err(Error::Protocol(format!(
            "{} padding ({}) exceeds payload ({})",
            frame.frame_type().name(),
            pad_len,
            payload.len()
        )));
    }
    payload.truncate(payload.len() - pad_len as usize);
    Ok((payload, Some(pad_len)))
}

fn put_padded(buf: &mut BytesMut, padding: Option<u8>, body: impl FnOnce(&mut BytesMut)) {
    if let Some(pad_len) = padding {
        buf.put_u8(pad_len);
    }
    body(buf);
    if let Some(pad_len) = padding {
        buf.put_bytes(0, pad_len as usize);
    }
}

/// DATA frame (RFC 7540 Section 6.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    /// Stream ID
    pub stream_id: StreamId,
    /// Data payload
    pub data: Bytes,
    /// END_STREAM flag
    pub end_stream: bool,
    /// Padding length (if PADDED flag is set)
    pub padding: Option<u8>,
}

impl DataFrame {
    /// Create a new DATA frame
    pub fn new(stream_id: StreamId, data: Bytes, end_stream: bool) -> Self {
        DataFrame {
            stream_id,
            data,
            end_stream,
            padding: None,
        }
    }

    /// Set padding
    pub fn with_padding(mut self, padding: u8) -> Self {
        self.padding = Some(padding);
        self
    }

    /// Get total frame size including padding
    ///
    /// This is the amount charged against flow-control windows.
    pub fn frame_size(&self) -> usize {
        let mut size = self.data.len();
        if let Some(pad_len) = self.padding {
            size += 1 + pad_len as usize;
        }
        size
    }
}

impl From<DataFrame> for Frame {
    fn from(frame: DataFrame) -> Frame {
        let mut flags = FrameFlags::empty();
        if frame.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }
        if frame.padding.is_none() {
            return Frame::new(FrameType::Data, flags, frame.stream_id, frame.data);
        }
        flags.set(FrameFlags::PADDED);
        let mut buf = BytesMut::with_capacity(frame.frame_size());
        put_padded(&mut buf, frame.padding, |buf| buf.put_slice(&frame.data));
        Frame::new(FrameType::Data, flags, frame.stream_id, buf.freeze())
    }
}

impl TryFrom<&Frame> for DataFrame {
    type Error = Error;

    fn try_from(frame: &Frame) -> Result<Self> {
        frame.expect_type(FrameType::Data)?;
        let (data, padding) = strip_padding(frame)?;
        Ok(DataFrame {
            stream_id: frame.stream_id(),
            data,
            end_stream: frame.flags().is_end_stream(),
            padding,
        })
    }
}

/// HEADERS frame (RFC 7540 Section 6.2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersFrame {
    /// Stream ID
    pub stream_id: StreamId,
    /// Header block fragment
    pub header_block: Bytes,
    /// END_STREAM flag
    pub end_stream: bool,
    /// END_HEADERS flag
    pub end_headers: bool,
    /// Priority information (if PRIORITY flag is set)
    pub priority: Option<PrioritySpec>,
    /// Padding length (if PADDED flag is set)
    pub padding: Option<u8>,
}

impl HeadersFrame {
    /// Create a new HEADERS frame
    pub fn new(stream_id: StreamId, header_block: Bytes, end_stream: bool, end_headers: bool) -> Self {
        HeadersFrame {
            stream_id,
            header_block,
            end_stream,
            end_headers,
            priority: None,
            padding: None,
        }
    }

    /// Set priority
    pub fn with_priority(mut self, priority: PrioritySpec) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set padding
    pub fn with_padding(mut self, padding: u8) -> Self {
        self.padding = Some(padding);
        self
    }
}

impl From<HeadersFrame> for Frame {
    fn from(frame: HeadersFrame) -> Frame {
        let mut flags = FrameFlags::empty();
        if frame.end_stream {
            flags.set(FrameFlags::END_STREAM);
        }
        if frame.end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }
        if frame.priority.is_some() {
            flags.set(FrameFlags::PRIORITY);
        }
        if frame.padding.is_some() {
            flags.set(FrameFlags::PADDED);
        }

        let mut buf = BytesMut::with_capacity(frame.header_block.len() + 6);
        put_padded(&mut buf, frame.padding, |buf| {
            if let Some(priority) = &frame.priority {
                priority.encode(buf);
            }
            buf.put_slice(&frame.header_block);
        });
        Frame::new(FrameType::Headers, flags, frame.stream_id, buf.freeze())
    }
}

impl TryFrom<&Frame> for HeadersFrame {
    type Error = Error;

    fn try_from(frame: &Frame) -> Result<Self> {
        frame.expect_type(FrameType::Headers)?;
        let (mut block, padding) = strip_padding(frame)?;
        let priority = if frame.flags().is_priority() {
            if block.len() < 5 {
                return Err(Error::FrameSize(
                    "HEADERS priority block truncated".to_string(),
                ));
            }
            Some(PrioritySpec::decode(&mut block))
        } else {
            None
        };
        Ok(HeadersFrame {
            stream_id: frame.stream_id(),
            header_block: block,
            end_stream: frame.flags().is_end_stream(),
            end_headers: frame.flags().is_end_headers(),
            priority,
            padding,
        })
    }
}

/// Priority specification (RFC 7540 Section 6.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioritySpec {
    /// Stream dependency
    pub stream_dependency: StreamId,
    /// Exclusive flag
    pub exclusive: bool,
    /// Weight as sent on the wire (actual weight minus one)
    pub weight: u8,
}

impl PrioritySpec {
    /// Create a new priority specification
    pub fn new(stream_dependency: StreamId, exclusive: bool, weight: u8) -> Self {
        PrioritySpec {
            stream_dependency,
            exclusive,
            weight,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        let mut dep = self.stream_dependency & MAX_STREAM_ID;
        if self.exclusive {
            dep |= 0x8000_0000;
        }
        buf.put_u32(dep);
        buf.put_u8(self.weight);
    }

    /// Caller guarantees at least 5 bytes
    fn decode(buf: &mut Bytes) -> Self {
        let dep = buf.get_u32();
        let weight = buf.get_u8();
        PrioritySpec {
            stream_dependency: dep & MAX_STREAM_ID,
            exclusive: dep & 0x8000_0000 != 0,
            weight,
        }
    }
}

/// PRIORITY frame (RFC 7540 Section 6.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityFrame {
    /// Stream ID
    pub stream_id: StreamId,
    /// Priority specification
    pub priority: PrioritySpec,
}

impl From<PriorityFrame> for Frame {
    fn from(frame: PriorityFrame) -> Frame {
        let mut buf = BytesMut::with_capacity(5);
        frame.priority.encode(&mut buf);
        Frame::new(FrameType::Priority, FrameFlags::empty(), frame.stream_id, buf.freeze())
    }
}

impl TryFrom<&Frame> for PriorityFrame {
    type Error = Error;

    fn try_from(frame: &Frame) -> Result<Self> {
        frame.expect_type(FrameType::Priority)?;
        if frame.length() != 5 {
            return Err(Error::stream(
                frame.stream_id(),
                ErrorCode::FrameSizeError,
                format!("PRIORITY payload must be 5 bytes, got {}", frame.length()),
            ));
        }
        let mut payload = frame.payload().clone();
        Ok(PriorityFrame {
            stream_id: frame.stream_id(),
            priority: PrioritySpec::decode(&mut payload),
        })
    }
}

/// RST_STREAM frame (RFC 7540 Section 6.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RstStreamFrame {
    /// Stream ID
    pub stream_id: StreamId,
    /// Error code
    pub error_code: ErrorCode,
}

impl RstStreamFrame {
    /// Create a new RST_STREAM frame
    pub fn new(stream_id: StreamId, error_code: ErrorCode) -> Self {
        RstStreamFrame {
            stream_id,
            error_code,
        }
    }
}

impl From<RstStreamFrame> for Frame {
    fn from(frame: RstStreamFrame) -> Frame {
        let payload = frame.error_code.as_u32().to_be_bytes();
        Frame::new(
            FrameType::RstStream,
            FrameFlags::empty(),
            frame.stream_id,
            Bytes::copy_from_slice(&payload),
        )
    }
}

impl TryFrom<&Frame> for RstStreamFrame {
    type Error = Error;

    fn try_from(frame: &Frame) -> Result<Self> {
        frame.expect_type(FrameType::RstStream)?;
        if frame.length() != 4 {
            return Err(Error::FrameSize(format!(
                "RST_STREAM payload must be 4 bytes, got {}",
                frame.length()
            )));
        }
        let code = frame.payload().clone().get_u32();
        Ok(RstStreamFrame {
            stream_id: frame.stream_id(),
            error_code: ErrorCode::from_wire(code),
        })
    }
}

/// SETTINGS frame (RFC 7540 Section 6.5)
#[derive(Debug, Clone)]
pub struct SettingsFrame {
    /// ACK flag
    pub ack: bool,
    /// Settings parameters
    pub settings: Settings,
}

impl SettingsFrame {
    /// Create a new SETTINGS frame
    pub fn new(settings: Settings) -> Self {
        SettingsFrame {
            ack: false,
            settings,
        }
    }

    /// Create a SETTINGS ACK frame
    pub fn ack() -> Self {
        SettingsFrame {
            ack: true,
            settings: Settings::default(),
        }
    }
}

impl From<SettingsFrame> for Frame {
    fn from(frame: SettingsFrame) -> Frame {
        if frame.ack {
            return Frame::new(
                FrameType::Settings,
                FrameFlags::from_u8(FrameFlags::ACK),
                CONNECTION_STREAM_ID,
                Bytes::new(),
            );
        }
        Frame::new(
            FrameType::Settings,
            FrameFlags::empty(),
            CONNECTION_STREAM_ID,
            frame.settings.encode_payload(),
        )
    }
}

/// PUSH_PROMISE frame (RFC 7540 Section 6.6)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushPromiseFrame {
    /// Stream ID
    pub stream_id: StreamId,
    /// Promised stream ID
    pub promised_stream_id: StreamId,
    /// Header block fragment
    pub header_block: Bytes,
    /// END_HEADERS flag
    pub end_headers: bool,
    /// Padding length (if PADDED flag is set)
    pub padding: Option<u8>,
}

impl From<PushPromiseFrame> for Frame {
    fn from(frame: PushPromiseFrame) -> Frame {
        let mut flags = FrameFlags::empty();
        if frame.end_headers {
            flags.set(FrameFlags::END_HEADERS);
        }
        if frame.padding.is_some() {
            flags.set(FrameFlags::PADDED);
        }
        let mut buf = BytesMut::with_capacity(frame.header_block.len() + 5);
        put_padded(&mut buf, frame.padding, |buf| {
            buf.put_u32(frame.promised_stream_id & MAX_STREAM_ID);
            buf.put_slice(&frame.header_block);
        });
        Frame::new(FrameType::PushPromise, flags, frame.stream_id, buf.freeze())
    }
}

impl TryFrom<&Frame> for PushPromiseFrame {
    type Error = Error;

    fn try_from(frame: &Frame) -> Result<Self> {
        frame.expect_type(FrameType::PushPromise)?;
        let (mut block, padding) = strip_padding(frame)?;
        if block.len() < 4 {
            return Err(Error::FrameSize(
                "PUSH_PROMISE missing promised stream id".to_string(),
            ));
        }
        let promised_stream_id = block.get_u32() & MAX_STREAM_ID;
        Ok(PushPromiseFrame {
            stream_id: frame.stream_id(),
            promised_stream_id,
            header_block: block,
            end_headers: frame.flags().is_end_headers(),
            padding,
        })
    }
}

/// PING frame (RFC 7540 Section 6.7)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingFrame {
    /// ACK flag
    pub ack: bool,
    /// Opaque data (8 bytes)
    pub data: [u8; 8],
}

impl PingFrame {
    /// Create a new PING frame
    pub fn new(data: [u8; 8]) -> Self {
        PingFrame { ack: false, data }
    }

    /// Create a PING ACK frame
    pub fn ack(data: [u8; 8]) -> Self {
        PingFrame { ack: true, data }
    }
}

impl From<PingFrame> for Frame {
    fn from(frame: PingFrame) -> Frame {
        let flags = if frame.ack {
            FrameFlags::from_u8(FrameFlags::ACK)
        } else {
            FrameFlags::empty()
        };
        Frame::new(
            FrameType::Ping,
            flags,
            CONNECTION_STREAM_ID,
            Bytes::copy_from_slice(&frame.data),
        )
    }
}

impl TryFrom<&Frame> for PingFrame {
    type Error = Error;

    fn try_from(frame: &Frame) -> Result<Self> {
        frame.expect_type(FrameType::Ping)?;
        if frame.length() != 8 {
            return Err(Error::FrameSize(format!(
                "PING payload must be 8 bytes, got {}",
                frame.length()
            )));
        }
        let mut data = [0u8; 8];
        data.copy_from_slice(frame.payload());
        Ok(PingFrame {
            ack: frame.flags().is_ack(),
            data,
        })
    }
}

/// GOAWAY frame (RFC 7540 Section 6.8)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoawayFrame {
    /// Last stream ID
    pub last_stream_id: StreamId,
    /// Error code
    pub error_code: ErrorCode,
    /// Debug data
    pub debug_data: Bytes,
}

impl GoawayFrame {
    /// Create a new GOAWAY frame
    pub fn new(last_stream_id: StreamId, error_code: ErrorCode, debug_data: Bytes) -> Self {
        GoawayFrame {
            last_stream_id,
            error_code,
            debug_data,
        }
    }
}

impl From<GoawayFrame> for Frame {
    fn from(frame: GoawayFrame) -> Frame {
        let mut buf = BytesMut::with_capacity(8 + frame.debug_data.len());
        buf.put_u32(frame.last_stream_id & MAX_STREAM_ID);
        buf.put_u32(frame.error_code.as_u32());
        buf.put_slice(&frame.debug_data);
        Frame::new(FrameType::Goaway, FrameFlags::empty(), CONNECTION_STREAM_ID, buf.freeze())
    }
}

impl TryFrom<&Frame> for GoawayFrame {
    type Error = Error;

    fn try_from(frame: &Frame) -> Result<Self> {
        frame.expect_type(FrameType::Goaway)?;
        if frame.length() < 8 {
            return Err(Error::FrameSize(format!(
                "GOAWAY payload must be at least 8 bytes, got {}",
                frame.length()
            )));
        }
        let mut payload = frame.payload().clone();
        let last_stream_id = payload.get_u32() & MAX_STREAM_ID;
        let error_code = ErrorCode::from_wire(payload.get_u32());
        Ok(GoawayFrame {
            last_stream_id,
            error_code,
            debug_data: payload,
        })
    }
}

/// WINDOW_UPDATE frame (RFC 7540 Section 6.9)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUpdateFrame {
    /// Stream ID (0 for connection-level)
    pub stream_id: StreamId,
    /// Window size increment
    pub size_increment: u32,
}

impl WindowUpdateFrame {
    /// Create a new WINDOW_UPDATE frame
    pub fn new(stream_id: StreamId, size_increment: u32) -> Self {
        WindowUpdateFrame {
            stream_id,
            size_increment,
        }
    }
}

impl From<WindowUpdateFrame> for Frame {
    fn from(frame: WindowUpdateFrame) -> Frame {
        let payload = (frame.size_increment & MAX_STREAM_ID).to_be_bytes();
        Frame::new(
            FrameType::WindowUpdate,
            FrameFlags::empty(),
            frame.stream_id,
            Bytes::copy_from_slice(&payload),
        )
    }
}

impl TryFrom<&Frame> for WindowUpdateFrame {
    type Error = Error;

    fn try_from(frame: &Frame) -> Result<Self> {
        frame.expect_type(FrameType::WindowUpdate)?;
        if frame.length() != 4 {
            return Err(Error::FrameSize(format!(
                "WINDOW_UPDATE payload must be 4 bytes, got {}",
                frame.length()
            )));
        }
        let increment = frame.payload().clone().get_u32() & MAX_STREAM_ID;
        Ok(WindowUpdateFrame {
            stream_id: frame.stream_id(),
            size_increment: increment,
        })
    }
}

/// CONTINUATION frame (RFC 7540 Section 6.10)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationFrame {
    /// Stream ID
    pub stream_id: StreamId,
    /// Header block fragment
    pub header_block: Bytes,
    /// END_HEADERS flag
    pub end_headers: bool,
}

impl From<ContinuationFrame> for Frame {
    fn from(frame: ContinuationFrame) -> Frame {
        let flags = if frame.end_headers {
            FrameFlags::from_u8(FrameFlags::END_HEADERS)
        } else {
            FrameFlags::empty()
        };
        Frame::new(FrameType::Continuation, flags, frame.stream_id, frame.header_block)
    }
}
