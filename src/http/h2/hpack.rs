//! HPACK header block coding
//!
//! Header compression itself is delegated to the `hpack` crate. Each
//! connection owns one [`HeaderCodec`]; its dynamic tables only stay in sync
//! with the peer if every header block is encoded and decoded exactly once,
//! in wire order.

use super::error::{Error, Result};
use bytes::Bytes;
use ::hpack::{Decoder as HpackDecoder, Encoder as HpackEncoder};
use std::fmt;

/// Per-entry overhead counted by SETTINGS_MAX_HEADER_LIST_SIZE
/// (RFC 7540 Section 6.5.2)
pub const HEADER_ENTRY_OVERHEAD: usize = 32;

/// One decoded header field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeaderField {
    /// Field name, lowercase on the wire
    pub name: Bytes,
    /// Field value
    pub value: Bytes,
}

impl HeaderField {
    /// Create a header field
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        HeaderField {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Size of the field as counted against MAX_HEADER_LIST_SIZE
    pub fn list_size(&self) -> usize {
        self.name.len() + self.value.len() + HEADER_ENTRY_OVERHEAD
    }
}

impl fmt::Display for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}",
            String::from_utf8_lossy(&self.name),
            String::from_utf8_lossy(&self.value)
        )
    }
}

impl<N: Into<Bytes>, V: Into<Bytes>> From<(N, V)> for HeaderField {
    fn from((name, value): (N, V)) -> Self {
        HeaderField::new(name, value)
    }
}

/// Total list size of a header block
pub fn header_list_size(fields: &[HeaderField]) -> usize {
    fields.iter().map(HeaderField::list_size).sum()
}

/// HPACK encoder/decoder pair for one connection
pub struct HeaderCodec {
    encoder: HpackEncoder<'static>,
    decoder: HpackDecoder<'static>,
}

impl HeaderCodec {
    /// Create a codec with empty dynamic tables
    pub fn new() -> Self {
        HeaderCodec {
            encoder: HpackEncoder::new(),
            decoder: HpackDecoder::new(),
        }
    }

    /// Encode a header list into one header block
    pub fn encode(&mut self, fields: &[HeaderField]) -> Result<Bytes> {
        let tuples: Vec<(&[u8], &[u8])> = fields
            .iter()
            .map(|field| (&field.name[..], &field.value[..]))
            .collect();
        let mut block = Vec::new();
        self.encoder
            .encode_into(tuples, &mut block)
            .map_err(|e| Error::Internal(format!("HPACK encode error: {}", e)))?;
        Ok(Bytes::from(block))
    }

    /// Decode a complete header block
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<HeaderField>> {
        let decoded = self
            .decoder
            .decode(block)
            .map_err(|e| Error::Compression(format!("HPACK decode error: {:?}", e)))?;
        Ok(decoded
            .into_iter()
            .map(|(name, value)| HeaderField::new(name, value))
            .collect())
    }
}

impl Default for HeaderCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HeaderCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderCodec").finish_non_exhaustive()
    }
}
