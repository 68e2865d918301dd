//! HTTP/2 settings management
//!
//! This module implements HTTP/2 SETTINGS frames and parameters
//! as defined in RFC 7540 Section 6.5.
//!
//! [`SettingsTable`] holds both directions: the remote table is replaced
//! atomically whenever the peer sends SETTINGS, the local table only changes
//! when the peer acknowledges a proposal.

use super::error::{Error, ErrorCode, Result};
use super::frames::{Frame, FrameFlags, FrameType, SettingsFrame};
use super::{
    CONNECTION_STREAM_ID, DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE,
    DEFAULT_MAX_FRAME_SIZE, MAX_WINDOW_SIZE,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::VecDeque;
use std::fmt;
use tracing::debug;

/// Largest legal SETTINGS_MAX_FRAME_SIZE (2^24 - 1)
pub const MAX_MAX_FRAME_SIZE: u32 = 0x00FF_FFFF;

/// Size of one identifier/value pair in a SETTINGS payload
pub const SETTINGS_ENTRY_SIZE: usize = 6;

/// HTTP/2 settings parameters (RFC 7540 Section 6.5.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SettingsParameter {
    /// SETTINGS_HEADER_TABLE_SIZE (0x1)
    /// Allows the sender to inform the remote endpoint of the maximum size
    /// of the header compression table
    HeaderTableSize = 0x1,

    /// SETTINGS_ENABLE_PUSH (0x2)
    /// Used to disable server push
    EnablePush = 0x2,

    /// SETTINGS_MAX_CONCURRENT_STREAMS (0x3)
    /// Indicates the maximum number of concurrent streams
    MaxConcurrentStreams = 0x3,

    /// SETTINGS_INITIAL_WINDOW_SIZE (0x4)
    /// Indicates the sender's initial window size for stream-level flow control
    InitialWindowSize = 0x4,

    /// SETTINGS_MAX_FRAME_SIZE (0x5)
    /// Indicates the size of the largest frame payload
    MaxFrameSize = 0x5,

    /// SETTINGS_MAX_HEADER_LIST_SIZE (0x6)
    /// Advises peer of the maximum size of header list
    MaxHeaderListSize = 0x6,
}

impl SettingsParameter {
    /// Convert to u16
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Create from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x1 => Some(SettingsParameter::HeaderTableSize),
            0x2 => Some(SettingsParameter::EnablePush),
            0x3 => Some(SettingsParameter::MaxConcurrentStreams),
            0x4 => Some(SettingsParameter::InitialWindowSize),
            0x5 => Some(SettingsParameter::MaxFrameSize),
            0x6 => Some(SettingsParameter::MaxHeaderListSize),
            _ => None,
        }
    }

    /// Get parameter name
    pub fn name(&self) -> &'static str {
        match self {
            SettingsParameter::HeaderTableSize => "HEADER_TABLE_SIZE",
            SettingsParameter::EnablePush => "ENABLE_PUSH",
            SettingsParameter::MaxConcurrentStreams => "MAX_CONCURRENT_STREAMS",
            SettingsParameter::InitialWindowSize => "INITIAL_WINDOW_SIZE",
            SettingsParameter::MaxFrameSize => "MAX_FRAME_SIZE",
            SettingsParameter::MaxHeaderListSize => "MAX_HEADER_LIST_SIZE",
        }
    }
}

impl fmt::Display for SettingsParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u16())
    }
}

/// HTTP/2 settings for one direction of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Header table size (default: 4096)
    pub header_table_size: u32,

    /// Enable server push (default: true)
    pub enable_push: bool,

    /// Maximum concurrent streams (default: unlimited)
    pub max_concurrent_streams: Option<u32>,

    /// Initial window size (default: 65535, at most 2^31-1)
    pub initial_window_size: u32,

    /// Maximum frame size (default: 16384, range: 16384-16777215)
    pub max_frame_size: u32,

    /// Maximum header list size (default: unlimited)
    pub max_header_list_size: Option<u32>,
}

impl Settings {
    /// Look up a parameter; `None` for unbounded values
    pub fn get(&self, param: SettingsParameter) -> Option<u32> {
        match param {
            SettingsParameter::HeaderTableSize => Some(self.header_table_size),
            SettingsParameter::EnablePush => Some(self.enable_push as u32),
            SettingsParameter::MaxConcurrentStreams => self.max_concurrent_streams,
            SettingsParameter::InitialWindowSize => Some(self.initial_window_size),
            SettingsParameter::MaxFrameSize => Some(self.max_frame_size),
            SettingsParameter::MaxHeaderListSize => self.max_header_list_size,
        }
    }

    /// Range check and store a raw wire value
    pub fn set(&mut self, param: SettingsParameter, value: u32) -> Result<()> {
        match param {
            SettingsParameter::HeaderTableSize => self.header_table_size = value,
            SettingsParameter::EnablePush => {
                self.enable_push = match value {
                    0 => false,
                    1 => true,
                    _ => {
                        return Err(Error::InvalidSettings {
                            code: ErrorCode::ProtocolError,
                            reason: format!("ENABLE_PUSH must be 0 or 1, got {}", value),
                        })
                    }
                }
            }
            SettingsParameter::MaxConcurrentStreams => self.max_concurrent_streams = Some(value),
            SettingsParameter::InitialWindowSize => {
                check_initial_window_size(value)?;
                self.initial_window_size = value;
            }
            SettingsParameter::MaxFrameSize => {
                check_max_frame_size(value)?;
                self.max_frame_size = value;
            }
            SettingsParameter::MaxHeaderListSize => self.max_header_list_size = Some(value),
        }
        Ok(())
    }

    /// Validate settings values
    pub fn validate(&self) -> Result<()> {
        check_initial_window_size(self.initial_window_size)?;
        check_max_frame_size(self.max_frame_size)
    }

    /// Encode every bounded parameter as a SETTINGS payload
    pub fn encode_payload(&self) -> Bytes {
        let params = [
            SettingsParameter::HeaderTableSize,
            SettingsParameter::EnablePush,
            SettingsParameter::MaxConcurrentStreams,
            SettingsParameter::InitialWindowSize,
            SettingsParameter::MaxFrameSize,
            SettingsParameter::MaxHeaderListSize,
        ];
        let mut buf = BytesMut::with_capacity(params.len() * SETTINGS_ENTRY_SIZE);
        for param in params {
            if let Some(value) = self.get(param) {
                buf.put_u16(param.as_u16());
                buf.put_u32(value);
            }
        }
        buf.freeze()
    }

    /// Parameters whose value differs between `self` and `other`
    pub fn diff(&self, other: &Settings) -> Vec<SettingsParameter> {
        [
            SettingsParameter::HeaderTableSize,
            SettingsParameter::EnablePush,
            SettingsParameter::MaxConcurrentStreams,
            SettingsParameter::InitialWindowSize,
            SettingsParameter::MaxFrameSize,
            SettingsParameter::MaxHeaderListSize,
        ]
        .into_iter()
        .filter(|param| self.get(*param) != other.get(*param))
        .collect()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: None,
        }
    }
}

fn check_initial_window_size(value: u32) -> Result<()> {
    if value > MAX_WINDOW_SIZE {
        return Err(Error::InvalidSettings {
            code: ErrorCode::FlowControlError,
            reason: format!("initial window size {} exceeds maximum (2^31-1)", value),
        });
    }
    Ok(())
}

fn check_max_frame_size(value: u32) -> Result<()> {
    if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&value) {
        return Err(Error::InvalidSettings {
            code: ErrorCode::ProtocolError,
            reason: format!(
                "max frame size {} outside valid range (16384-16777215)",
                value
            ),
        });
    }
    Ok(())
}

/// Builder for HTTP/2 settings
///
/// Starts from the RFC 7540 defaults.
#[derive(Debug, Clone, Default)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    /// Create a new settings builder
    pub fn new() -> Self {
        SettingsBuilder {
            settings: Settings::default(),
        }
    }

    /// Set header table size
    pub fn header_table_size(mut self, size: u32) -> Self {
        self.settings.header_table_size = size;
        self
    }

    /// Set enable push
    pub fn enable_push(mut self, enable: bool) -> Self {
        self.settings.enable_push = enable;
        self
    }

    /// Set max concurrent streams
    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings.max_concurrent_streams = Some(max);
        self
    }

    /// Set initial window size
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings.initial_window_size = size;
        self
    }

    /// Set max frame size
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings.max_frame_size = size;
        self
    }

    /// Set max header list size
    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.settings.max_header_list_size = Some(size);
        self
    }

    /// Build the settings
    pub fn build(self) -> Result<Settings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}

/// Whether local settings are waiting for the peer's acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// At least one local SETTINGS frame is unacknowledged
    UpdatingLocal,
    /// Every local SETTINGS frame has been acknowledged
    Synced,
}

/// Outcome of applying an inbound SETTINGS frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsUpdate {
    /// The peer changed its settings; an ACK must be sent
    Remote {
        /// Remote table before the frame
        previous: Settings,
        /// Remote table after the frame
        current: Settings,
    },
    /// The peer acknowledged our oldest pending proposal
    Acknowledged {
        /// Local table in effect before the ACK
        previous: Settings,
        /// Local table now in effect
        current: Settings,
    },
}

impl SettingsUpdate {
    /// Parameters that changed
    pub fn changed(&self) -> Vec<SettingsParameter> {
        match self {
            SettingsUpdate::Remote { previous, current }
            | SettingsUpdate::Acknowledged { previous, current } => previous.diff(current),
        }
    }

    /// INITIAL_WINDOW_SIZE change as (old, new), if any
    pub fn initial_window_change(&self) -> Option<(u32, u32)> {
        let (previous, current) = match self {
            SettingsUpdate::Remote { previous, current }
            | SettingsUpdate::Acknowledged { previous, current } => (previous, current),
        };
        if previous.initial_window_size == current.initial_window_size {
            return None;
        }
        Some((previous.initial_window_size, current.initial_window_size))
    }
}

/// Settings of both peers plus the local proposals in flight
#[derive(Debug, Clone, Default)]
pub struct SettingsTable {
    local: Settings,
    pending_local: VecDeque<Settings>,
    remote: Settings,
    remote_received: bool,
}

impl SettingsTable {
    /// Both directions start at the RFC 7540 defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Local settings the peer has acknowledged
    pub fn local(&self) -> &Settings {
        &self.local
    }

    /// Most recent local settings sent, acknowledged or not
    pub fn advertised(&self) -> &Settings {
        self.pending_local.back().unwrap_or(&self.local)
    }

    /// Settings announced by the peer
    pub fn remote(&self) -> &Settings {
        &self.remote
    }

    /// Whether the peer has sent at least one SETTINGS frame
    pub fn remote_received(&self) -> bool {
        self.remote_received
    }

    /// Local synchronization state
    pub fn sync_state(&self) -> SyncState {
        if self.pending_local.is_empty() {
            SyncState::Synced
        } else {
            SyncState::UpdatingLocal
        }
    }

    /// Apply an inbound SETTINGS frame
    ///
    /// The remote table is only replaced when every entry is valid.
    pub fn apply(&mut self, frame: &Frame) -> Result<SettingsUpdate> {
        if frame.frame_type() != FrameType::Settings {
            return Err(Error::Internal(format!(
                "{} frame passed to the settings table",
                frame.frame_type().name()
            )));
        }
        if frame.stream_id() != CONNECTION_STREAM_ID {
            return Err(Error::Protocol(format!(
                "SETTINGS on stream {}",
                frame.stream_id()
            )));
        }

        if frame.flags().is_ack() {
            if frame.length() != 0 {
                return Err(Error::FrameSize(format!(
                    "SETTINGS ACK with {} byte payload",
                    frame.length()
                )));
            }
            let previous = self.local;
            match self.pending_local.pop_front() {
                Some(settings) => self.local = settings,
                None => debug!("SETTINGS ACK without pending local settings"),
            }
            debug!(settings = ?self.local, "local settings acknowledged");
            return Ok(SettingsUpdate::Acknowledged {
                previous,
                current: self.local,
            });
        }

        if frame.length() % SETTINGS_ENTRY_SIZE != 0 {
            return Err(Error::FrameSize(format!(
                "SETTINGS payload of {} bytes is not a multiple of 6",
                frame.length()
            )));
        }

        let mut updated = self.remote;
        let mut payload = frame.payload().clone();
        while payload.has_remaining() {
            let id = payload.get_u16();
            let value = payload.get_u32();
            match SettingsParameter::from_u16(id) {
                Some(param) => updated.set(param, value)?,
                None => debug!(id, value, "ignoring unknown setting"),
            }
        }

        let previous = self.remote;
        self.remote = updated;
        self.remote_received = true;
        debug!(settings = ?self.remote, "remote settings applied");
        Ok(SettingsUpdate::Remote {
            previous,
            current: updated,
        })
    }

    /// Serialize the most recent local settings
    pub fn to_frame(&self) -> Frame {
        SettingsFrame::new(*self.advertised()).into()
    }

    /// An empty SETTINGS frame with the ACK flag
    pub fn acknowledge_frame(&self) -> Frame {
        Frame::new(
            FrameType::Settings,
            FrameFlags::from_u8(FrameFlags::ACK),
            CONNECTION_STREAM_ID,
            Bytes::new(),
        )
    }

    /// Queue new local settings; they take effect once acknowledged
    pub fn propose_local(&mut self, settings: Settings) -> Result<Frame> {
        settings.validate()?;
        self.pending_local.push_back(settings);
        debug!(?settings, pending = self.pending_local.len(), "proposing local settings");
        Ok(self.to_frame())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_frame(entries: &[(u16, u32)]) -> Frame {
        let mut buf = BytesMut::new();
        for (id, value) in entries {
            buf.put_u16(*id);
            buf.put_u32(*value);
        }
        Frame::new(FrameType::Settings, FrameFlags::empty(), 0, buf.freeze())
    }

    #[test]
    fn test_settings_parameter_conversion() {
        assert_eq!(SettingsParameter::HeaderTableSize.as_u16(), 0x1);
        assert_eq!(SettingsParameter::EnablePush.as_u16(), 0x2);

        assert_eq!(
            SettingsParameter::from_u16(0x1),
            Some(SettingsParameter::HeaderTableSize)
        );
        assert_eq!(
            SettingsParameter::from_u16(0x6),
            Some(SettingsParameter::MaxHeaderListSize)
        );
        assert_eq!(SettingsParameter::from_u16(0x8), None);
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.header_table_size, 4096);
        assert!(settings.enable_push);
        assert_eq!(settings.max_concurrent_streams, None);
        assert_eq!(settings.initial_window_size, 65535);
        assert_eq!(settings.max_frame_size, 16384);
        assert_eq!(settings.max_header_list_size, None);
    }

    #[test]
    fn test_settings_builder() {
        let settings = SettingsBuilder::new()
            .header_table_size(8192)
            .enable_push(false)
            .max_concurrent_streams(100)
            .initial_window_size(65535)
            .build()
            .unwrap();

        assert_eq!(settings.header_table_size, 8192);
        assert!(!settings.enable_push);
        assert_eq!(settings.max_concurrent_streams, Some(100));
        assert_eq!(settings.initial_window_size, 65535);
    }

    #[test]
    fn test_settings_validation() {
        assert!(SettingsBuilder::new()
            .initial_window_size(65535)
            .max_frame_size(16384)
            .build()
            .is_ok());

        let err = SettingsBuilder::new()
            .initial_window_size(0x8000_0000)
            .build()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::FlowControlError);

        let err = SettingsBuilder::new().max_frame_size(1024).build().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProtocolError);

        assert!(SettingsBuilder::new().max_frame_size(16_777_216).build().is_err());
    }

    #[test]
    fn test_encode_payload() {
        let settings = SettingsBuilder::new().max_concurrent_streams(10).build().unwrap();
        let payload = settings.encode_payload();
        // Header list size stays unbounded and is omitted
        assert_eq!(payload.len(), 5 * SETTINGS_ENTRY_SIZE);
        assert_eq!(&payload[..6], &[0, 1, 0, 0, 0x10, 0]);
    }

    #[test]
    fn test_apply_remote() {
        let mut table = SettingsTable::new();
        let update = table
            .apply(&settings_frame(&[(0x3, 100), (0x4, 1_000_000), (0xff, 9)]))
            .unwrap();

        assert_eq!(table.remote().max_concurrent_streams, Some(100));
        assert_eq!(table.remote().initial_window_size, 1_000_000);
        assert!(table.remote_received());
        assert_eq!(update.initial_window_change(), Some((65535, 1_000_000)));
        assert_eq!(
            update.changed(),
            vec![
                SettingsParameter::MaxConcurrentStreams,
                SettingsParameter::InitialWindowSize
            ]
        );
    }

    #[test]
    fn test_apply_enable_push_two() {
        let mut table = SettingsTable::new();
        let err = table.apply(&settings_frame(&[(0x2, 2)])).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProtocolError);
        assert!(table.remote().enable_push);
    }

    #[test]
    fn test_apply_is_atomic() {
        let mut table = SettingsTable::new();
        // The valid first entry must not survive the invalid second one
        let err = table
            .apply(&settings_frame(&[(0x1, 8192), (0x5, 100)]))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProtocolError);
        assert_eq!(table.remote().header_table_size, 4096);
        assert!(!table.remote_received());
    }

    #[test]
    fn test_apply_bad_length() {
        let mut table = SettingsTable::new();
        let frame = Frame::new(
            FrameType::Settings,
            FrameFlags::empty(),
            0,
            Bytes::from_static(&[0, 1, 0, 0, 0x20, 0, 0]),
        );
        assert!(matches!(table.apply(&frame), Err(Error::FrameSize(_))));
        assert_eq!(*table.remote(), Settings::default());
    }

    #[test]
    fn test_apply_window_too_large() {
        let mut table = SettingsTable::new();
        let err = table.apply(&settings_frame(&[(0x4, 0x8000_0000)])).unwrap_err();
        assert_eq!(err.code(), ErrorCode::FlowControlError);
    }

    #[test]
    fn test_apply_on_stream_rejected() {
        let mut table = SettingsTable::new();
        let frame = Frame::new(FrameType::Settings, FrameFlags::empty(), 1, Bytes::new());
        assert!(matches!(table.apply(&frame), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_ack_with_payload() {
        let mut table = SettingsTable::new();
        let frame = Frame::new(
            FrameType::Settings,
            FrameFlags::from_u8(FrameFlags::ACK),
            0,
            Bytes::from_static(&[0, 1, 0, 0, 0, 0]),
        );
        assert!(matches!(table.apply(&frame), Err(Error::FrameSize(_))));
    }

    #[test]
    fn test_local_proposals_take_effect_on_ack() {
        let mut table = SettingsTable::new();
        let first = SettingsBuilder::new().initial_window_size(1000).build().unwrap();
        let second = SettingsBuilder::new().initial_window_size(2000).build().unwrap();

        table.propose_local(first).unwrap();
        table.propose_local(second).unwrap();
        assert_eq!(table.sync_state(), SyncState::UpdatingLocal);
        assert_eq!(table.local().initial_window_size, 65535);
        assert_eq!(table.advertised().initial_window_size, 2000);

        let ack = table.acknowledge_frame();
        let update = table.apply(&ack).unwrap();
        assert_eq!(update.initial_window_change(), Some((65535, 1000)));
        assert_eq!(table.sync_state(), SyncState::UpdatingLocal);

        table.apply(&ack).unwrap();
        assert_eq!(table.local().initial_window_size, 2000);
        assert_eq!(table.sync_state(), SyncState::Synced);
    }

    #[test]
    fn test_to_frame_round_trips_through_apply() {
        let mut local = SettingsTable::new();
        let settings = SettingsBuilder::new()
            .enable_push(false)
            .max_frame_size(32768)
            .max_header_list_size(8192)
            .build()
            .unwrap();
        let frame = local.propose_local(settings).unwrap();

        let mut peer = SettingsTable::new();
        peer.apply(&frame).unwrap();
        assert_eq!(*peer.remote(), settings);
    }
}
