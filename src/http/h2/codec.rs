//! HTTP/2 frame encoding and decoding
//!
//! [`FrameParser`] turns an arbitrarily fragmented byte stream into frames.
//! It keeps the partially read header and payload between calls, so input
//! may be split at any byte boundary. [`FrameSerializer`] writes frames back
//! out in the RFC 7540 Section 4.1 layout.

use super::error::{Error, Result};
use super::frames::{Frame, FrameFlags, FrameType};
use super::{DEFAULT_MAX_FRAME_SIZE, MAX_STREAM_ID};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

/// HTTP/2 frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = 9;

/// Maximum frame payload size (16MB - 1)
pub const MAX_FRAME_SIZE: usize = 0x00FF_FFFF;

/// Encode a frame header
pub fn encode_header(
    frame_type: u8,
    flags: FrameFlags,
    stream_id: u32,
    length: usize,
) -> [u8; FRAME_HEADER_SIZE] {
    let mut header = [0u8; FRAME_HEADER_SIZE];

    // Length (24 bits, big-endian)
    header[0] = ((length >> 16) & 0xFF) as u8;
    header[1] = ((length >> 8) & 0xFF) as u8;
    header[2] = (length & 0xFF) as u8;

    header[3] = frame_type;
    header[4] = flags.as_u8();

    // Stream ID (31 bits, reserved bit is 0)
    header[5..9].copy_from_slice(&(stream_id & MAX_STREAM_ID).to_be_bytes());

    header
}

/// Decode a frame header into (raw type, flags, stream id, length)
///
/// The reserved bit is masked off; callers that must reject it look at
/// `bytes[5]` themselves.
pub fn decode_header(bytes: &[u8; FRAME_HEADER_SIZE]) -> (u8, FrameFlags, u32, usize) {
    let length = ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | (bytes[2] as usize);
    let stream_id = u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & MAX_STREAM_ID;
    (bytes[3], FrameFlags::from_u8(bytes[4]), stream_id, length)
}

/// Frame whose header is complete but whose payload is still arriving
#[derive(Debug)]
struct PendingFrame {
    /// `None` for frame types this implementation does not know
    frame_type: Option<FrameType>,
    raw_type: u8,
    flags: FrameFlags,
    stream_id: u32,
    remaining: usize,
    payload: BytesMut,
}

/// Incremental frame parser
///
/// One parser per connection. It never holds a complete frame across calls:
/// each frame is returned as soon as its last payload byte arrives.
#[derive(Debug)]
pub struct FrameParser {
    header: [u8; FRAME_HEADER_SIZE],
    header_len: usize,
    pending: Option<PendingFrame>,
    max_frame_size: u32,
    poisoned: bool,
}

impl FrameParser {
    /// Create a parser enforcing the default 16384 byte frame size limit
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a parser with a specific frame size limit
    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        FrameParser {
            header: [0u8; FRAME_HEADER_SIZE],
            header_len: 0,
            pending: None,
            max_frame_size,
            poisoned: false,
        }
    }

    /// Largest payload accepted before a FRAME_SIZE_ERROR
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Change the frame size limit; applies from the next frame header on
    pub fn set_max_frame_size(&mut self, max_frame_size: u32) {
        self.max_frame_size = max_frame_size;
    }

    /// Whether a previous error has made the parser unusable
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Whether the parser sits on a frame boundary
    pub fn is_idle(&self) -> bool {
        self.header_len == 0 && self.pending.is_none()
    }

    /// Feed a chunk of bytes and collect every frame it completes
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        let mut input = data;
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame(&mut input)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Consume bytes from `input` until one frame is complete
    ///
    /// Returns `Ok(None)` once `input` is exhausted without completing a
    /// frame. Bytes after the returned frame are left in `input`.
    pub fn next_frame(&mut self, input: &mut &[u8]) -> Result<Option<Frame>> {
        if self.poisoned {
            return Err(Error::Protocol(
                "frame parser unusable after a previous error".to_string(),
            ));
        }
        match self.advance(input) {
            Ok(frame) => Ok(frame),
            Err(err) => {
                self.poisoned = true;
                Err(err)
            }
        }
    }

    fn advance(&mut self, input: &mut &[u8]) -> Result<Option<Frame>> {
        loop {
            if self.pending.is_none() {
                if !self.read_header(input)? {
                    return Ok(None);
                }
                self.begin_payload();
            }

            let pending = match self.pending.as_mut() {
                Some(pending) => pending,
                None => return Ok(None),
            };

            let take = pending.remaining.min(input.len());
            if pending.frame_type.is_some() {
                pending.payload.put_slice(&input[..take]);
            }
            pending.remaining -= take;
            *input = &input[take..];

            if pending.remaining > 0 {
                return Ok(None);
            }

            let done = match self.pending.take() {
                Some(done) => done,
                None => return Ok(None),
            };
            match done.frame_type {
                Some(frame_type) => {
                    let frame = Frame::new(frame_type, done.flags, done.stream_id, done.payload.freeze());
                    trace!(%frame, "parsed frame");
                    return Ok(Some(frame));
                }
                None => {
                    trace!(
                        frame_type = done.raw_type,
                        stream_id = done.stream_id,
                        "discarding frame of unknown type"
                    );
                }
            }
        }
    }

    /// Fill the header buffer, validating each field as soon as it is
    /// complete. Returns true once all nine bytes are in.
    fn read_header(&mut self, input: &mut &[u8]) -> Result<bool> {
        while self.header_len < FRAME_HEADER_SIZE {
            if input.is_empty() {
                return Ok(false);
            }
            // Stop at the end of the length field and after the first
            // stream id byte so both can be checked before reading on.
            let boundary = match self.header_len {
                0..=2 => 3,
                3..=5 => 6,
                _ => FRAME_HEADER_SIZE,
            };
            let take = (boundary - self.header_len).min(input.len());
            self.header[self.header_len..self.header_len + take].copy_from_slice(&input[..take]);
            self.header_len += take;
            *input = &input[take..];

            if self.header_len == 3 {
                let length = ((self.header[0] as u32) << 16)
                    | ((self.header[1] as u32) << 8)
                    | (self.header[2] as u32);
                if length > self.max_frame_size {
                    return Err(Error::FrameSize(format!(
                        "frame length {} exceeds maximum {}",
                        length, self.max_frame_size
                    )));
                }
            }
            if self.header_len == 6 && self.header[5] & 0x80 != 0 {
                return Err(Error::Protocol(
                    "reserved bit set in stream identifier".to_string(),
                ));
            }
        }
        Ok(true)
    }

    fn begin_payload(&mut self) {
        let (raw_type, flags, stream_id, length) = decode_header(&self.header);
        let frame_type = FrameType::from_u8(raw_type);
        let capacity = if frame_type.is_some() { length } else { 0 };
        self.pending = Some(PendingFrame {
            frame_type,
            raw_type,
            flags,
            stream_id,
            remaining: length,
            payload: BytesMut::with_capacity(capacity),
        });
        self.header_len = 0;
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame serializer
///
/// Stateless: every call writes one complete frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameSerializer;

impl FrameSerializer {
    /// Serialize a frame into a fresh buffer
    pub fn serialize(frame: &Frame) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.length());
        Self::serialize_into(frame, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Append a frame to an existing buffer
    pub fn serialize_into(frame: &Frame, buf: &mut BytesMut) -> Result<()> {
        if frame.length() > MAX_FRAME_SIZE {
            return Err(Error::FrameSize(format!(
                "payload of {} bytes does not fit the 24-bit length field",
                frame.length()
            )));
        }
        let header = encode_header(
            frame.frame_type().as_u8(),
            frame.flags(),
            frame.stream_id(),
            frame.length(),
        );
        buf.reserve(FRAME_HEADER_SIZE + frame.length());
        buf.put_slice(&header);
        buf.put_slice(frame.payload());
        trace!(%frame, "serialized frame");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::frames::DataFrame;

    const HELLO: [u8; 14] = [
        0x00, 0x00, 0x05, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, b'h', b'e', b'l', b'l', b'o',
    ];

    #[test]
    fn test_encode_decode_header() {
        let flags = FrameFlags::from_u8(FrameFlags::END_STREAM | FrameFlags::END_HEADERS);
        let header = encode_header(FrameType::Headers.as_u8(), flags, 42, 1234);
        let (raw_type, decoded_flags, stream_id, length) = decode_header(&header);

        assert_eq!(raw_type, FrameType::Headers.as_u8());
        assert_eq!(decoded_flags, flags);
        assert_eq!(stream_id, 42);
        assert_eq!(length, 1234);
    }

    #[test]
    fn test_parse_data_hello() {
        let mut parser = FrameParser::new();
        let frames = parser.feed(&HELLO).unwrap();

        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.frame_type(), FrameType::Data);
        assert!(frame.is_end_stream());
        assert_eq!(frame.stream_id(), 1);
        assert_eq!(frame.length(), 5);
        assert_eq!(&frame.payload()[..], b"hello");
        assert!(parser.is_idle());
    }

    #[test]
    fn test_parse_byte_at_a_time() {
        let mut parser = FrameParser::new();
        let mut frames = Vec::new();
        for byte in HELLO.iter() {
            frames.extend(parser.feed(std::slice::from_ref(byte)).unwrap());
            if frames.is_empty() {
                assert!(!parser.is_idle());
            }
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].payload()[..], b"hello");
    }

    #[test]
    fn test_parse_multiple_frames_in_one_chunk() {
        let mut input = HELLO.to_vec();
        input.extend_from_slice(&HELLO);
        // Zero-length SETTINGS ACK
        input.extend_from_slice(&[0, 0, 0, 0x4, 0x1, 0, 0, 0, 0]);

        let frames = FrameParser::new().feed(&input).unwrap();
        assert_eq!(frames.len(), 3);
        assert!(frames[2].is_ack());
        assert_eq!(frames[2].length(), 0);
    }

    #[test]
    fn test_next_frame_leaves_surplus() {
        let mut parser = FrameParser::new();
        let mut input = HELLO.to_vec();
        input.extend_from_slice(&HELLO[..4]);
        let mut cursor = &input[..];

        assert!(parser.next_frame(&mut cursor).unwrap().is_some());
        assert_eq!(cursor.len(), 4);
        assert!(parser.next_frame(&mut cursor).unwrap().is_none());
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_oversize_frame_rejected_after_length() {
        let mut parser = FrameParser::new();
        // 16385 bytes announced; only the length field is delivered
        let err = parser.feed(&[0x00, 0x40, 0x01]).unwrap_err();
        assert!(matches!(err, Error::FrameSize(_)));
        assert!(parser.is_poisoned());
        assert!(parser.feed(&HELLO).is_err());
    }

    #[test]
    fn test_raised_limit_accepts_larger_frames() {
        let mut parser = FrameParser::with_max_frame_size(32768);
        let frame = Frame::new(FrameType::Data, FrameFlags::empty(), 1, vec![7u8; 20000]);
        let bytes = FrameSerializer::serialize(&frame).unwrap();
        assert_eq!(parser.feed(&bytes).unwrap(), vec![frame]);
    }

    #[test]
    fn test_reserved_bit_rejected() {
        let mut parser = FrameParser::new();
        let err = parser
            .feed(&[0x00, 0x00, 0x00, 0x04, 0x00, 0x80])
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(parser.is_poisoned());
    }

    #[test]
    fn test_unknown_type_discarded() {
        let mut input = vec![0x00, 0x00, 0x03, 0xfa, 0x00, 0x00, 0x00, 0x00, 0x01, 1, 2, 3];
        input.extend_from_slice(&HELLO);
        let frames = FrameParser::new().feed(&input).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type(), FrameType::Data);
    }

    #[test]
    fn test_serialize_data_frame() {
        let frame: Frame = DataFrame::new(1, Bytes::from("hello"), true).into();
        let encoded = FrameSerializer::serialize(&frame).unwrap();
        assert_eq!(&encoded[..], &HELLO[..]);
    }

    #[test]
    fn test_serialize_rejects_oversize_payload() {
        let frame = Frame::new(
            FrameType::Data,
            FrameFlags::empty(),
            1,
            vec![0u8; MAX_FRAME_SIZE + 1],
        );
        assert!(matches!(
            FrameSerializer::serialize(&frame),
            Err(Error::FrameSize(_))
        ));
    }

    #[test]
    fn test_serialize_into_appends() {
        let mut buf = BytesMut::new();
        let frame: Frame = DataFrame::new(1, Bytes::from("hello"), true).into();
        FrameSerializer::serialize_into(&frame, &mut buf).unwrap();
        FrameSerializer::serialize_into(&frame, &mut buf).unwrap();
        assert_eq!(buf.len(), 2 * HELLO.len());
    }
}
