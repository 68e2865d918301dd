//! HTTP/2 stream management
//!
//! This module implements stream management as defined in RFC 7540 Section 5.1.
//!
//! The [`StreamMultiplexer`] owns every stream entry of a connection. It
//! allocates local stream ids, decides whether a frame belongs to the
//! connection or to a stream, and applies stream-scoped frames to the
//! owning entry. Delivered events wait in a per-stream inbox until the
//! application polls them.

use super::error::{Error, ErrorCode, Result};
use super::flow_control::FlowControlWindow;
use super::frames::{DataFrame, Frame, FrameType, PriorityFrame, RstStreamFrame};
use super::hpack::HeaderField;
use super::{CONNECTION_STREAM_ID, DEFAULT_INITIAL_WINDOW_SIZE, MAX_STREAM_ID};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, trace};

/// Stream ID type
pub type StreamId = u32;

/// Which end of the connection we are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiates odd-numbered streams
    Client,
    /// Initiates even-numbered streams
    Server,
}

impl Role {
    /// First stream id this role allocates
    pub fn first_stream_id(self) -> StreamId {
        match self {
            Role::Client => 1,
            Role::Server => 2,
        }
    }

    /// Whether `stream_id` is one this role allocates
    pub fn owns(self, stream_id: StreamId) -> bool {
        stream_id != CONNECTION_STREAM_ID && stream_id % 2 == self.first_stream_id() % 2
    }
}

/// Stream state as defined in RFC 7540 Section 5.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Idle: No frames have been sent/received
    Idle,
    /// Reserved (remote): PUSH_PROMISE received
    ReservedRemote,
    /// Open: Both sides can send frames
    Open,
    /// Half-closed (local): We can't send, they can
    HalfClosedLocal,
    /// Half-closed (remote): They can't send, we can
    HalfClosedRemote,
    /// Closed: Stream is closed
    Closed,
}

impl StreamState {
    /// Check if stream can send data
    pub fn can_send(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Check if stream can receive data
    pub fn can_receive(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    /// Check if stream is closed
    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }

    /// Whether the peer has finished sending
    pub fn is_remote_closed(&self) -> bool {
        matches!(self, StreamState::HalfClosedRemote | StreamState::Closed)
    }

    fn after_local_end(self) -> StreamState {
        match self {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        }
    }

    fn after_remote_end(self) -> StreamState {
        match self {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        }
    }
}

/// Something delivered to a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A decoded header block (initial headers or trailers)
    Headers {
        /// Decoded header list
        fields: Vec<HeaderField>,
        /// END_STREAM was set on the HEADERS frame
        end_stream: bool,
    },
    /// Body bytes from one DATA frame, padding removed
    Data {
        /// Payload
        data: Bytes,
        /// END_STREAM was set on the frame
        end_stream: bool,
    },
}

impl StreamEvent {
    /// Whether this is the last event the peer sends on the stream
    pub fn is_end_stream(&self) -> bool {
        match self {
            StreamEvent::Headers { end_stream, .. } | StreamEvent::Data { end_stream, .. } => {
                *end_stream
            }
        }
    }
}

/// A complete, decoded header block ready for dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderBlock {
    /// Stream the block belongs to
    pub stream_id: StreamId,
    /// Decoded header list
    pub fields: Vec<HeaderField>,
    /// END_STREAM from the HEADERS frame
    pub end_stream: bool,
}

/// Result of dispatching a stream-scoped frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// An event was queued on the stream's inbox
    Delivered(StreamId),
    /// The peer reset the stream
    Reset {
        /// Stream that was reset
        stream_id: StreamId,
        /// Code the peer gave
        code: ErrorCode,
    },
    /// Nothing to do (PRIORITY, RST_STREAM for a forgotten stream)
    Ignored,
}

/// Where an inbound frame is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Connection-level processing
    Connection,
    /// Processing by the owning stream
    Stream(StreamId),
}

/// HTTP/2 stream
#[derive(Debug)]
pub struct StreamEntry {
    id: StreamId,
    state: StreamState,
    send_window: FlowControlWindow,
    recv_window: FlowControlWindow,
    inbox: VecDeque<StreamEvent>,
    /// DATA payload bytes waiting in the inbox
    unread: usize,
    cancelled: Option<ErrorCode>,
    attached: bool,
}

impl StreamEntry {
    /// Create a new stream with specified window sizes
    pub fn with_window_sizes(id: StreamId, send_size: u32, recv_size: u32) -> Self {
        StreamEntry {
            id,
            state: StreamState::Idle,
            send_window: FlowControlWindow::with_initial_size(send_size),
            recv_window: FlowControlWindow::with_initial_size(recv_size),
            inbox: VecDeque::new(),
            unread: 0,
            cancelled: None,
            attached: true,
        }
    }

    /// Get stream ID
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Get stream state
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Set stream state
    pub fn set_state(&mut self, state: StreamState) {
        self.state = state;
    }

    /// Outbound flow-control window
    pub fn send_window(&self) -> &FlowControlWindow {
        &self.send_window
    }

    /// Mutable outbound flow-control window
    pub fn send_window_mut(&mut self) -> &mut FlowControlWindow {
        &mut self.send_window
    }

    /// Inbound flow-control window
    pub fn recv_window(&self) -> &FlowControlWindow {
        &self.recv_window
    }

    /// Mutable inbound flow-control window
    pub fn recv_window_mut(&mut self) -> &mut FlowControlWindow {
        &mut self.recv_window
    }

    /// Code the stream was torn down with, if any
    pub fn cancelled(&self) -> Option<ErrorCode> {
        self.cancelled
    }

    /// Events waiting to be polled
    pub fn pending_events(&self) -> usize {
        self.inbox.len()
    }

    /// DATA bytes delivered but not yet polled
    pub fn unread_bytes(&self) -> usize {
        self.unread
    }

    /// Whether a handle still refers to the stream
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Force the stream closed, dropping undelivered events
    ///
    /// Returns the DATA bytes dropped with the inbox.
    fn cancel(&mut self, code: ErrorCode) -> usize {
        if self.cancelled.is_none() && !self.state.is_closed() {
            self.cancelled = Some(code);
        }
        self.state = StreamState::Closed;
        self.inbox.clear();
        std::mem::take(&mut self.unread)
    }

    fn pop_event(&mut self) -> Option<StreamEvent> {
        let event = self.inbox.pop_front()?;
        if let StreamEvent::Data { data, .. } = &event {
            self.unread -= data.len();
            self.recv_window.release(data.len());
        }
        Some(event)
    }

    fn is_reapable(&self) -> bool {
        self.state.is_closed() && self.inbox.is_empty() && !self.attached
    }

    fn check_send_headers(&self) -> Result<()> {
        match self.state {
            StreamState::Idle | StreamState::Open | StreamState::HalfClosedRemote => Ok(()),
            _ => Err(Error::StreamClosed(self.id)),
        }
    }

    fn on_send_headers(&mut self, end_stream: bool) -> Result<()> {
        self.check_send_headers()?;
        self.state = match self.state {
            StreamState::Idle if end_stream => StreamState::HalfClosedLocal,
            StreamState::Idle => StreamState::Open,
            state if end_stream => state.after_local_end(),
            state => state,
        };
        Ok(())
    }

    fn on_send_data(&mut self, end_stream: bool) -> Result<()> {
        if !self.state.can_send() {
            return Err(Error::StreamClosed(self.id));
        }
        if end_stream {
            self.state = self.state.after_local_end();
        }
        Ok(())
    }

    fn on_recv_headers(&mut self, fields: Vec<HeaderField>, end_stream: bool) -> Result<()> {
        match self.state {
            StreamState::Idle => {
                self.state = if end_stream {
                    StreamState::HalfClosedRemote
                } else {
                    StreamState::Open
                };
            }
            StreamState::ReservedRemote => {
                self.state = if end_stream {
                    StreamState::Closed
                } else {
                    StreamState::HalfClosedLocal
                };
            }
            StreamState::Open | StreamState::HalfClosedLocal => {
                // Trailers
                if end_stream {
                    self.state = self.state.after_remote_end();
                }
            }
            StreamState::HalfClosedRemote | StreamState::Closed => {
                return Err(Error::stream(
                    self.id,
                    ErrorCode::StreamClosed,
                    format!("HEADERS received in state {:?}", self.state),
                ));
            }
        }
        self.inbox.push_back(StreamEvent::Headers { fields, end_stream });
        Ok(())
    }

    /// Queue a DATA frame; returns the padding bytes, which nobody reads
    fn on_recv_data(&mut self, frame: &Frame) -> Result<usize> {
        match self.state {
            StreamState::Open | StreamState::HalfClosedLocal => {}
            StreamState::Idle | StreamState::ReservedRemote => {
                return Err(Error::stream(
                    self.id,
                    ErrorCode::ProtocolError,
                    format!("DATA received in state {:?}", self.state),
                ));
            }
            StreamState::HalfClosedRemote | StreamState::Closed => {
                return Err(Error::stream(
                    self.id,
                    ErrorCode::StreamClosed,
                    format!("DATA received in state {:?}", self.state),
                ));
            }
        }

        let length = frame.length();
        if length as i64 > self.recv_window.size() {
            return Err(Error::stream(
                self.id,
                ErrorCode::FlowControlError,
                format!(
                    "DATA of {} bytes exceeds stream receive window {}",
                    length,
                    self.recv_window.size()
                ),
            ));
        }

        let data = DataFrame::try_from(frame)?;
        let padding = length - data.data.len();
        self.recv_window.decrease(length);
        self.recv_window.release(padding);
        if data.end_stream {
            self.state = self.state.after_remote_end();
        }
        self.unread += data.data.len();
        self.inbox.push_back(StreamEvent::Data {
            data: data.data,
            end_stream: data.end_stream,
        });
        Ok(padding)
    }
}

/// Pool of the streams of one connection
#[derive(Debug)]
pub struct StreamMultiplexer {
    role: Role,
    streams: HashMap<StreamId, StreamEntry>,
    /// Next locally allocated stream ID (client: odd, server: even)
    next_stream_id: StreamId,
    /// Highest stream id the peer has opened or promised
    last_peer_stream_id: StreamId,
    /// Peer's MAX_CONCURRENT_STREAMS
    peer_max_concurrent_streams: Option<u32>,
    /// Our own MAX_CONCURRENT_STREAMS
    local_max_concurrent_streams: Option<u32>,
    initial_send_window: u32,
    initial_recv_window: u32,
    /// DATA bytes that left the inboxes (read, dropped or padding) and
    /// are owed back to the connection receive window
    released: usize,
}

impl StreamMultiplexer {
    /// Create an empty pool
    pub fn new(role: Role) -> Self {
        StreamMultiplexer {
            role,
            streams: HashMap::new(),
            next_stream_id: role.first_stream_id(),
            last_peer_stream_id: 0,
            peer_max_concurrent_streams: None,
            local_max_concurrent_streams: None,
            initial_send_window: DEFAULT_INITIAL_WINDOW_SIZE,
            initial_recv_window: DEFAULT_INITIAL_WINDOW_SIZE,
            released: 0,
        }
    }

    /// Our role on the connection
    pub fn role(&self) -> Role {
        self.role
    }

    /// Set the peer's concurrency limit for streams we open
    pub fn set_peer_max_concurrent_streams(&mut self, max: Option<u32>) {
        self.peer_max_concurrent_streams = max;
    }

    /// Set our concurrency limit for streams the peer opens
    pub fn set_local_max_concurrent_streams(&mut self, max: Option<u32>) {
        self.local_max_concurrent_streams = max;
    }

    /// Send window given to new streams
    pub fn set_initial_send_window(&mut self, size: u32) {
        self.initial_send_window = size;
    }

    /// Receive window given to new streams
    pub fn set_initial_recv_window(&mut self, size: u32) {
        self.initial_recv_window = size;
    }

    /// Get next stream ID (without allocating it)
    pub fn peek_next_stream_id(&self) -> StreamId {
        self.next_stream_id
    }

    /// Highest peer-initiated stream id seen so far
    pub fn last_peer_stream_id(&self) -> StreamId {
        self.last_peer_stream_id
    }

    /// Whether another local stream fits under the peer's limit
    pub fn can_open_stream(&self) -> bool {
        match self.peer_max_concurrent_streams {
            Some(max) => self.active_count(true) < max as usize,
            None => true,
        }
    }

    /// Allocate the next local stream id and create its entry in Idle
    ///
    /// Ids wrap back to the first id of our parity after 2^31-1 and skip
    /// ids still held in the pool.
    pub fn open_stream(&mut self) -> Result<StreamId> {
        if !self.can_open_stream() {
            return Err(Error::TooManyStreams);
        }

        let mut candidate = self.next_stream_id;
        let mut attempts = 0usize;
        while self.streams.contains_key(&candidate) {
            attempts += 1;
            if attempts > self.streams.len() {
                return Err(Error::TooManyStreams);
            }
            candidate = self.successor(candidate);
        }
        self.next_stream_id = self.successor(candidate);

        let entry =
            StreamEntry::with_window_sizes(candidate, self.initial_send_window, self.initial_recv_window);
        self.streams.insert(candidate, entry);
        debug!(stream_id = candidate, "opened stream");
        Ok(candidate)
    }

    fn successor(&self, id: StreamId) -> StreamId {
        match id.checked_add(2) {
            Some(next) if next <= MAX_STREAM_ID => next,
            _ => self.role.first_stream_id(),
        }
    }

    /// Get a stream by ID
    pub fn get(&self, stream_id: StreamId) -> Option<&StreamEntry> {
        self.streams.get(&stream_id)
    }

    /// Get a mutable stream by ID
    pub fn get_mut(&mut self, stream_id: StreamId) -> Option<&mut StreamEntry> {
        self.streams.get_mut(&stream_id)
    }

    /// Iterate over every entry
    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut StreamEntry> {
        self.streams.values_mut()
    }

    /// Number of entries in the pool
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Whether the pool is empty
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Streams not yet closed, counting only one side's initiations
    pub fn active_count(&self, local: bool) -> usize {
        self.streams
            .values()
            .filter(|s| !s.state().is_closed() && self.role.owns(s.id()) == local)
            .count()
    }

    /// Decide whether a frame is connection- or stream-scoped
    ///
    /// A stream-scoped frame sent on stream 0 comes back as a stream error
    /// for stream 0, which cannot be answered with RST_STREAM.
    pub fn route(&self, frame: &Frame) -> Result<Scope> {
        let stream_id = frame.stream_id();
        match frame.frame_type() {
            FrameType::Settings => {
                if stream_id != CONNECTION_STREAM_ID {
                    return Err(Error::Protocol(format!("SETTINGS on stream {}", stream_id)));
                }
                Ok(Scope::Connection)
            }
            FrameType::Ping | FrameType::Goaway => {
                if stream_id != CONNECTION_STREAM_ID {
                    return Err(Error::stream(
                        stream_id,
                        ErrorCode::ProtocolError,
                        format!("{} on stream {}", frame.frame_type().name(), stream_id),
                    ));
                }
                Ok(Scope::Connection)
            }
            FrameType::WindowUpdate | FrameType::Priority => {
                if stream_id == CONNECTION_STREAM_ID {
                    Ok(Scope::Connection)
                } else {
                    Ok(Scope::Stream(stream_id))
                }
            }
            FrameType::Data
            | FrameType::Headers
            | FrameType::PushPromise
            | FrameType::Continuation
            | FrameType::RstStream => {
                if stream_id == CONNECTION_STREAM_ID {
                    return Err(Error::stream(
                        CONNECTION_STREAM_ID,
                        ErrorCode::ProtocolError,
                        format!("{} on stream 0", frame.frame_type().name()),
                    ));
                }
                Ok(Scope::Stream(stream_id))
            }
        }
    }

    /// Apply a stream-scoped DATA, RST_STREAM or PRIORITY frame
    ///
    /// Header blocks arrive through [`Self::dispatch_headers`] once they are
    /// reassembled and decoded.
    pub fn dispatch(&mut self, frame: Frame) -> Result<Dispatched> {
        let stream_id = frame.stream_id();
        match frame.frame_type() {
            FrameType::Data => {
                let entry = match self.streams.get_mut(&stream_id) {
                    Some(entry) => entry,
                    None => return Err(self.unknown_stream_error(stream_id, "DATA")),
                };
                self.released += entry.on_recv_data(&frame)?;
                trace!(stream_id, len = frame.length(), "delivered DATA");
                Ok(Dispatched::Delivered(stream_id))
            }
            FrameType::RstStream => {
                let rst = RstStreamFrame::try_from(&frame)?;
                match self.streams.get_mut(&stream_id) {
                    Some(entry) if !entry.state().is_closed() => {
                        debug!(stream_id, code = %rst.error_code, "stream reset by peer");
                        self.released += entry.cancel(rst.error_code);
                        Ok(Dispatched::Reset {
                            stream_id,
                            code: rst.error_code,
                        })
                    }
                    _ => {
                        trace!(stream_id, "ignoring RST_STREAM for unknown or closed stream");
                        Ok(Dispatched::Ignored)
                    }
                }
            }
            FrameType::Priority => {
                let priority = PriorityFrame::try_from(&frame)?;
                if priority.priority.stream_dependency == stream_id {
                    return Err(Error::stream(
                        stream_id,
                        ErrorCode::ProtocolError,
                        "stream depends on itself",
                    ));
                }
                Ok(Dispatched::Ignored)
            }
            other => Err(Error::Internal(format!(
                "{} frame cannot be dispatched to a stream",
                other.name()
            ))),
        }
    }

    /// Deliver a decoded header block, creating peer-initiated streams
    /// on first use
    pub fn dispatch_headers(&mut self, block: HeaderBlock) -> Result<Dispatched> {
        let stream_id = block.stream_id;
        if !self.streams.contains_key(&stream_id) {
            self.accept_peer_stream(stream_id)?;
        }
        let entry = match self.streams.get_mut(&stream_id) {
            Some(entry) => entry,
            None => return Err(Error::StreamNotFound(stream_id)),
        };
        entry.on_recv_headers(block.fields, block.end_stream)?;
        trace!(stream_id, end_stream = block.end_stream, "delivered HEADERS");
        Ok(Dispatched::Delivered(stream_id))
    }

    fn accept_peer_stream(&mut self, stream_id: StreamId) -> Result<()> {
        if self.role.owns(stream_id) || stream_id <= self.last_peer_stream_id {
            return Err(self.unknown_stream_error(stream_id, "HEADERS"));
        }
        self.last_peer_stream_id = stream_id;
        if let Some(max) = self.local_max_concurrent_streams {
            if self.active_count(false) >= max as usize {
                return Err(Error::stream(
                    stream_id,
                    ErrorCode::RefusedStream,
                    "peer exceeded MAX_CONCURRENT_STREAMS",
                ));
            }
        }
        let entry =
            StreamEntry::with_window_sizes(stream_id, self.initial_send_window, self.initial_recv_window);
        self.streams.insert(stream_id, entry);
        debug!(stream_id, "peer opened stream");
        Ok(())
    }

    fn unknown_stream_error(&self, stream_id: StreamId, frame: &str) -> Error {
        let seen = if self.role.owns(stream_id) {
            stream_id < self.next_stream_id
        } else {
            stream_id <= self.last_peer_stream_id
        };
        if seen {
            Error::stream(
                stream_id,
                ErrorCode::StreamClosed,
                format!("{} on closed stream", frame),
            )
        } else {
            Error::stream(
                stream_id,
                ErrorCode::ProtocolError,
                format!("{} on idle stream", frame),
            )
        }
    }

    /// Reserve a stream announced by PUSH_PROMISE
    pub fn reserve_remote(&mut self, promised_stream_id: StreamId) -> Result<()> {
        if self.role.owns(promised_stream_id)
            || promised_stream_id == CONNECTION_STREAM_ID
            || promised_stream_id <= self.last_peer_stream_id
        {
            return Err(Error::Protocol(format!(
                "invalid promised stream id {}",
                promised_stream_id
            )));
        }
        self.last_peer_stream_id = promised_stream_id;
        let mut entry = StreamEntry::with_window_sizes(
            promised_stream_id,
            self.initial_send_window,
            self.initial_recv_window,
        );
        entry.set_state(StreamState::ReservedRemote);
        self.streams.insert(promised_stream_id, entry);
        debug!(stream_id = promised_stream_id, "reserved pushed stream");
        Ok(())
    }

    /// Whether a header block may be sent on the stream, without changing it
    pub fn check_send_headers(&self, stream_id: StreamId) -> Result<()> {
        self.streams
            .get(&stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?
            .check_send_headers()
    }

    /// State transition for outbound HEADERS
    pub fn on_send_headers(&mut self, stream_id: StreamId, end_stream: bool) -> Result<()> {
        self.streams
            .get_mut(&stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?
            .on_send_headers(end_stream)
    }

    /// State transition for outbound DATA
    pub fn on_send_data(&mut self, stream_id: StreamId, end_stream: bool) -> Result<()> {
        self.streams
            .get_mut(&stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?
            .on_send_data(end_stream)
    }

    /// Close a stream with a cancellation code
    ///
    /// Returns false when the stream was unknown or already closed.
    pub fn cancel(&mut self, stream_id: StreamId, code: ErrorCode) -> bool {
        let cancelled = match self.streams.get_mut(&stream_id) {
            Some(entry) if !entry.state().is_closed() => {
                self.released += entry.cancel(code);
                true
            }
            _ => false,
        };
        self.reap(stream_id);
        cancelled
    }

    /// Cancel every stream that is still open
    pub fn cancel_all(&mut self, code: ErrorCode) {
        for entry in self.streams.values_mut() {
            if !entry.state().is_closed() {
                self.released += entry.cancel(code);
            }
        }
        self.streams.retain(|_, entry| !entry.is_reapable());
    }

    /// Cancel our own streams above the peer's GOAWAY last stream id
    pub fn cancel_above(&mut self, last_stream_id: StreamId, code: ErrorCode) -> Vec<StreamId> {
        let role = self.role;
        let mut cancelled = Vec::new();
        for entry in self.streams.values_mut() {
            if role.owns(entry.id()) && entry.id() > last_stream_id && !entry.state().is_closed() {
                self.released += entry.cancel(code);
                cancelled.push(entry.id());
            }
        }
        self.streams.retain(|_, entry| !entry.is_reapable());
        cancelled.sort_unstable();
        cancelled
    }

    /// Take the next event of a stream
    ///
    /// `Ok(None)` means nothing is queued; [`Self::is_finished`] tells
    /// whether more can arrive. A cancelled stream reports
    /// [`Error::Cancelled`] once its queue is empty.
    pub fn poll(&mut self, stream_id: StreamId) -> Result<Option<StreamEvent>> {
        let entry = self
            .streams
            .get_mut(&stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?;
        if let Some(event) = entry.pop_event() {
            if let StreamEvent::Data { data, .. } = &event {
                self.released += data.len();
            }
            return Ok(Some(event));
        }
        if let Some(code) = entry.cancelled {
            return Err(Error::Cancelled { stream_id, code });
        }
        Ok(None)
    }

    /// Whether the peer has finished sending and every event was taken
    pub fn is_finished(&self, stream_id: StreamId) -> bool {
        match self.streams.get(&stream_id) {
            Some(entry) => entry.state().is_remote_closed() && entry.inbox.is_empty(),
            None => true,
        }
    }

    /// Drop the handle's claim on a stream; the entry is removed once it
    /// is closed and drained
    pub fn release(&mut self, stream_id: StreamId) {
        if let Some(entry) = self.streams.get_mut(&stream_id) {
            entry.attached = false;
        }
        self.reap(stream_id);
    }

    fn reap(&mut self, stream_id: StreamId) {
        if self.streams.get(&stream_id).map_or(false, StreamEntry::is_reapable) {
            self.streams.remove(&stream_id);
            trace!(stream_id, "reaped stream");
        }
    }

    /// Take the bytes owed back to the connection receive window
    pub fn take_released(&mut self) -> usize {
        std::mem::take(&mut self.released)
    }

    /// Remove every closed, drained and detached entry
    pub fn reap_closed(&mut self) {
        self.streams.retain(|_, entry| !entry.is_reapable());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::frames::{FrameFlags, PrioritySpec};

    fn data(stream_id: StreamId, payload: &'static [u8], end_stream: bool) -> Frame {
        DataFrame::new(stream_id, Bytes::from_static(payload), end_stream).into()
    }

    fn headers(stream_id: StreamId, end_stream: bool) -> HeaderBlock {
        HeaderBlock {
            stream_id,
            fields: vec![HeaderField::new(":status", "200")],
            end_stream,
        }
    }

    #[test]
    fn test_stream_state_transitions() {
        let mut streams = StreamMultiplexer::new(Role::Client);
        let id = streams.open_stream().unwrap();
        assert_eq!(streams.get(id).unwrap().state(), StreamState::Idle);

        streams.on_send_headers(id, false).unwrap();
        assert_eq!(streams.get(id).unwrap().state(), StreamState::Open);

        streams.on_send_data(id, true).unwrap();
        assert_eq!(streams.get(id).unwrap().state(), StreamState::HalfClosedLocal);
        assert!(matches!(streams.on_send_data(id, false), Err(Error::StreamClosed(_))));

        streams.dispatch_headers(headers(id, false)).unwrap();
        streams.dispatch(data(id, b"body", true)).unwrap();
        assert_eq!(streams.get(id).unwrap().state(), StreamState::Closed);
    }

    #[test]
    fn test_client_ids() {
        let mut streams = StreamMultiplexer::new(Role::Client);
        assert_eq!(streams.peek_next_stream_id(), 1);
        assert_eq!(streams.open_stream().unwrap(), 1);
        assert_eq!(streams.open_stream().unwrap(), 3);
        assert_eq!(streams.open_stream().unwrap(), 5);
        assert_eq!(streams.active_count(true), 3);
    }

    #[test]
    fn test_server_ids() {
        let mut streams = StreamMultiplexer::new(Role::Server);
        assert_eq!(streams.open_stream().unwrap(), 2);
        assert_eq!(streams.open_stream().unwrap(), 4);
    }

    #[test]
    fn test_id_wraps_to_first() {
        let mut streams = StreamMultiplexer::new(Role::Client);
        streams.next_stream_id = MAX_STREAM_ID;
        assert_eq!(streams.open_stream().unwrap(), MAX_STREAM_ID);
        assert_eq!(streams.peek_next_stream_id(), 1);
        assert_eq!(streams.open_stream().unwrap(), 1);
    }

    #[test]
    fn test_id_skips_ids_in_use() {
        let mut streams = StreamMultiplexer::new(Role::Client);
        assert_eq!(streams.open_stream().unwrap(), 1);
        streams.next_stream_id = 1;
        assert_eq!(streams.open_stream().unwrap(), 3);
    }

    #[test]
    fn test_max_concurrent() {
        let mut streams = StreamMultiplexer::new(Role::Client);
        streams.set_peer_max_concurrent_streams(Some(2));

        let id1 = streams.open_stream().unwrap();
        streams.open_stream().unwrap();
        assert!(matches!(streams.open_stream(), Err(Error::TooManyStreams)));

        streams.cancel(id1, ErrorCode::Cancel);
        assert!(streams.open_stream().is_ok());
    }

    #[test]
    fn test_route() {
        let streams = StreamMultiplexer::new(Role::Client);

        let settings = Frame::new(FrameType::Settings, FrameFlags::empty(), 0, Bytes::new());
        assert_eq!(streams.route(&settings).unwrap(), Scope::Connection);

        let settings = Frame::new(FrameType::Settings, FrameFlags::empty(), 3, Bytes::new());
        assert!(streams.route(&settings).unwrap_err().is_connection_error());

        let ping = Frame::new(FrameType::Ping, FrameFlags::empty(), 3, vec![0u8; 8]);
        assert!(matches!(
            streams.route(&ping),
            Err(Error::StreamError { stream_id: 3, .. })
        ));

        assert!(matches!(
            streams.route(&data(0, b"x", false)),
            Err(Error::StreamError { stream_id: 0, .. })
        ));
        assert_eq!(streams.route(&data(5, b"x", false)).unwrap(), Scope::Stream(5));

        let priority: Frame = PriorityFrame {
            stream_id: 0,
            priority: PrioritySpec::new(1, false, 16),
        }
        .into();
        assert_eq!(streams.route(&priority).unwrap(), Scope::Connection);
    }

    #[test]
    fn test_data_on_idle_and_closed_streams() {
        let mut streams = StreamMultiplexer::new(Role::Client);
        let id = streams.open_stream().unwrap();

        let err = streams.dispatch(data(id, b"x", false)).unwrap_err();
        assert!(matches!(err, Error::StreamError { code: ErrorCode::ProtocolError, .. }));

        streams.cancel(id, ErrorCode::Cancel);
        let err = streams.dispatch(data(id, b"x", false)).unwrap_err();
        assert!(matches!(err, Error::StreamError { code: ErrorCode::StreamClosed, .. }));

        let err = streams.dispatch(data(41, b"x", false)).unwrap_err();
        assert!(matches!(err, Error::StreamError { code: ErrorCode::ProtocolError, .. }));
    }

    #[test]
    fn test_peer_stream_created_lazily() {
        let mut streams = StreamMultiplexer::new(Role::Server);
        streams.dispatch_headers(headers(1, false)).unwrap();
        assert_eq!(streams.get(1).unwrap().state(), StreamState::Open);
        assert_eq!(streams.last_peer_stream_id(), 1);

        // Trailers on an open stream are fine
        streams.dispatch_headers(headers(1, false)).unwrap();
        streams.dispatch(data(1, b"", true)).unwrap();
        let err = streams.dispatch_headers(headers(1, false)).unwrap_err();
        assert!(matches!(err, Error::StreamError { code: ErrorCode::StreamClosed, .. }));
    }

    #[test]
    fn test_local_concurrency_limit_refuses() {
        let mut streams = StreamMultiplexer::new(Role::Server);
        streams.set_local_max_concurrent_streams(Some(1));
        streams.dispatch_headers(headers(1, false)).unwrap();
        let err = streams.dispatch_headers(headers(3, false)).unwrap_err();
        assert!(matches!(err, Error::StreamError { code: ErrorCode::RefusedStream, .. }));
    }

    #[test]
    fn test_rst_clears_inbox_and_cancels() {
        let mut streams = StreamMultiplexer::new(Role::Client);
        let id = streams.open_stream().unwrap();
        streams.on_send_headers(id, true).unwrap();
        streams.dispatch_headers(headers(id, false)).unwrap();
        assert_eq!(streams.get(id).unwrap().pending_events(), 1);

        let rst: Frame = RstStreamFrame::new(id, ErrorCode::Cancel).into();
        assert_eq!(
            streams.dispatch(rst.clone()).unwrap(),
            Dispatched::Reset {
                stream_id: id,
                code: ErrorCode::Cancel
            }
        );
        assert!(matches!(
            streams.poll(id),
            Err(Error::Cancelled { code: ErrorCode::Cancel, .. })
        ));

        // A second RST for the same stream is ignored
        assert_eq!(streams.dispatch(rst).unwrap(), Dispatched::Ignored);
    }

    #[test]
    fn test_stream_receive_window() {
        let mut streams = StreamMultiplexer::new(Role::Client);
        streams.set_initial_recv_window(4);
        let id = streams.open_stream().unwrap();
        streams.on_send_headers(id, true).unwrap();
        streams.dispatch_headers(headers(id, false)).unwrap();

        streams.dispatch(data(id, b"abc", false)).unwrap();
        let err = streams.dispatch(data(id, b"de", false)).unwrap_err();
        assert!(matches!(err, Error::StreamError { code: ErrorCode::FlowControlError, .. }));
    }

    #[test]
    fn test_unread_data_released_on_poll_and_cancel() {
        let mut streams = StreamMultiplexer::new(Role::Client);
        let id = streams.open_stream().unwrap();
        streams.on_send_headers(id, true).unwrap();
        streams.dispatch_headers(headers(id, false)).unwrap();
        streams.dispatch(data(id, b"hello", false)).unwrap();
        streams.dispatch(data(id, b"world", false)).unwrap();
        assert_eq!(streams.get(id).unwrap().unread_bytes(), 10);
        assert_eq!(streams.get(id).unwrap().recv_window().size(), 65525);
        assert_eq!(streams.take_released(), 0);

        streams.poll(id).unwrap();
        streams.poll(id).unwrap();
        assert_eq!(streams.take_released(), 5);
        assert_eq!(streams.get(id).unwrap().unread_bytes(), 5);
        assert_eq!(streams.get(id).unwrap().recv_window().released(), 5);

        streams.cancel(id, ErrorCode::Cancel);
        assert_eq!(streams.take_released(), 5);
        assert_eq!(streams.get(id).unwrap().unread_bytes(), 0);
    }

    #[test]
    fn test_padding_released_on_arrival() {
        let mut streams = StreamMultiplexer::new(Role::Client);
        let id = streams.open_stream().unwrap();
        streams.on_send_headers(id, true).unwrap();
        streams.dispatch_headers(headers(id, false)).unwrap();

        let padded: Frame = DataFrame::new(id, Bytes::from_static(b"abc"), false)
            .with_padding(6)
            .into();
        streams.dispatch(padded).unwrap();
        assert_eq!(streams.take_released(), 7);
        let entry = streams.get(id).unwrap();
        assert_eq!(entry.unread_bytes(), 3);
        assert_eq!(entry.recv_window().size(), 65535 - 10);
        assert_eq!(entry.recv_window().released(), 7);
    }

    #[test]
    fn test_poll_and_release() {
        let mut streams = StreamMultiplexer::new(Role::Client);
        let id = streams.open_stream().unwrap();
        streams.on_send_headers(id, true).unwrap();
        streams.dispatch_headers(headers(id, false)).unwrap();
        streams.dispatch(data(id, b"hello", true)).unwrap();

        assert!(!streams.is_finished(id));
        assert!(matches!(streams.poll(id).unwrap(), Some(StreamEvent::Headers { .. })));
        let event = streams.poll(id).unwrap().unwrap();
        assert!(event.is_end_stream());
        assert_eq!(streams.poll(id).unwrap(), None);
        assert!(streams.is_finished(id));

        streams.release(id);
        assert!(streams.get(id).is_none());
    }

    #[test]
    fn test_release_keeps_undrained_stream() {
        let mut streams = StreamMultiplexer::new(Role::Client);
        let id = streams.open_stream().unwrap();
        streams.on_send_headers(id, true).unwrap();
        streams.dispatch_headers(headers(id, true)).unwrap();

        streams.release(id);
        assert!(streams.get(id).is_some());
        streams.poll(id).unwrap();
        streams.reap_closed();
        assert!(streams.is_empty());
    }

    #[test]
    fn test_cancel_above() {
        let mut streams = StreamMultiplexer::new(Role::Client);
        for _ in 0..3 {
            let id = streams.open_stream().unwrap();
            streams.on_send_headers(id, false).unwrap();
        }
        let cancelled = streams.cancel_above(1, ErrorCode::RefusedStream);
        assert_eq!(cancelled, vec![3, 5]);
        assert_eq!(streams.get(1).unwrap().state(), StreamState::Open);
        assert_eq!(streams.get(3).unwrap().cancelled(), Some(ErrorCode::RefusedStream));
    }

    #[test]
    fn test_reserve_remote() {
        let mut streams = StreamMultiplexer::new(Role::Client);
        streams.reserve_remote(2).unwrap();
        assert_eq!(streams.get(2).unwrap().state(), StreamState::ReservedRemote);

        streams.dispatch_headers(headers(2, false)).unwrap();
        assert_eq!(streams.get(2).unwrap().state(), StreamState::HalfClosedLocal);

        assert!(streams.reserve_remote(2).unwrap_err().is_connection_error());
        assert!(streams.reserve_remote(7).is_err());
    }

    #[test]
    fn test_priority_self_dependency() {
        let mut streams = StreamMultiplexer::new(Role::Client);
        let frame: Frame = PriorityFrame {
            stream_id: 3,
            priority: PrioritySpec::new(3, false, 0),
        }
        .into();
        assert!(matches!(
            streams.dispatch(frame),
            Err(Error::StreamError { stream_id: 3, .. })
        ));
    }
}
