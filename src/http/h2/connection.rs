//! HTTP/2 connection context
//!
//! [`Connection`] composes the frame parser, the settings table, the window
//! tracker, the HPACK codec and the stream multiplexer into one sans-I/O
//! unit. Bytes read from the transport go into [`Connection::receive`];
//! bytes to write come out of [`Connection::take_output`]. Nothing here
//! blocks or touches a socket.
//!
//! Connection errors queue a GOAWAY, cancel every stream and close the
//! connection. Stream errors queue a RST_STREAM for the offending stream and
//! leave everything else running.

use super::codec::{FrameParser, FrameSerializer};
use super::error::{Error, ErrorCode, Result};
use super::flow_control::{ConnectionWindow, WindowTracker};
use super::frames::{
    ContinuationFrame, DataFrame, Frame, FrameType, GoawayFrame, HeadersFrame, PingFrame,
    PushPromiseFrame, RstStreamFrame,
};
use super::hpack::{header_list_size, HeaderCodec, HeaderField};
use super::settings::{Settings, SettingsTable, SettingsUpdate};
use super::stream::{
    Dispatched, HeaderBlock, Role, Scope, StreamEvent, StreamId, StreamMultiplexer, StreamState,
};
use super::{CONNECTION_PREFACE, DEFAULT_MAX_FRAME_SIZE};
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use tracing::{debug, trace, warn};

/// Connection-level configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Local settings sent in the initial SETTINGS frame
    pub settings: Settings,
    /// Connection receive window to announce right after the preface
    pub connection_window_size: Option<u32>,
    /// Start the connection send window at 65535 instead of waiting for
    /// the peer's first connection-level WINDOW_UPDATE
    pub assume_default_connection_window: bool,
}

impl ConnectionConfig {
    /// Create a configuration builder
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            settings: Settings::default(),
            connection_window_size: None,
            assume_default_connection_window: false,
        }
    }
}

/// Builder for [`ConnectionConfig`]
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Create a builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Local settings
    pub fn settings(mut self, settings: Settings) -> Self {
        self.config.settings = settings;
        self
    }

    /// Enlarge the connection receive window after the preface
    pub fn connection_window_size(mut self, size: u32) -> Self {
        self.config.connection_window_size = Some(size);
        self
    }

    /// Assume the RFC default connection send window from the start
    pub fn assume_default_connection_window(mut self, assume: bool) -> Self {
        self.config.assume_default_connection_window = assume;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<ConnectionConfig> {
        self.config.settings.validate()?;
        Ok(self.config)
    }
}

/// Connection-level event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The peer's SETTINGS were applied (and acknowledged)
    RemoteSettings(Settings),
    /// The peer acknowledged our settings; they are now in effect
    SettingsAcknowledged(Settings),
    /// Reply to one of our PINGs
    PingAck([u8; 8]),
    /// The peer reserved a stream for a pushed response
    PushPromise {
        /// Stream the promise was sent on
        stream_id: StreamId,
        /// Reserved stream
        promised_stream_id: StreamId,
        /// Decoded request headers of the promise
        fields: Vec<HeaderField>,
    },
    /// The peer is shutting the connection down
    GoAway {
        /// Highest stream the peer may still process
        last_stream_id: StreamId,
        /// Reason
        code: ErrorCode,
        /// Opaque debug data
        debug_data: Bytes,
    },
    /// The peer reset a stream
    StreamReset {
        /// Stream that was reset
        stream_id: StreamId,
        /// Code the peer gave
        code: ErrorCode,
    },
    /// We reset a stream after a stream-scoped protocol violation
    StreamError {
        /// Offending stream
        stream_id: StreamId,
        /// Code sent in RST_STREAM
        code: ErrorCode,
    },
    /// A frame on stream 0 that only streams may carry; it was discarded
    ProtocolViolation {
        /// Code the violation maps to
        code: ErrorCode,
        /// What was wrong
        reason: String,
    },
    /// The connection is closed; no more frames are processed
    Closed {
        /// NO_ERROR for an orderly close, the error code otherwise
        code: ErrorCode,
    },
}

/// What a header block under reassembly will become
#[derive(Debug)]
enum BlockKind {
    Headers { end_stream: bool, self_dependent: bool },
    PushPromise { promised_stream_id: StreamId },
}

/// Header block fragments collected across HEADERS/PUSH_PROMISE and
/// CONTINUATION frames
#[derive(Debug)]
struct PartialBlock {
    stream_id: StreamId,
    kind: BlockKind,
    fragments: BytesMut,
}

/// One HTTP/2 connection, either side
#[derive(Debug)]
pub struct Connection {
    config: ConnectionConfig,
    parser: FrameParser,
    settings: SettingsTable,
    windows: WindowTracker,
    streams: StreamMultiplexer,
    hpack: HeaderCodec,
    output: BytesMut,
    events: VecDeque<Event>,
    header_block: Option<PartialBlock>,
    /// Client preface bytes still expected (server only)
    preface_remaining: usize,
    started: bool,
    goaway_sent: bool,
    goaway_received: Option<(StreamId, ErrorCode)>,
    closed: Option<ErrorCode>,
}

impl Connection {
    /// Create the client end of a connection
    pub fn client(config: ConnectionConfig) -> Self {
        Self::new(Role::Client, config)
    }

    /// Create the server end of a connection
    pub fn server(config: ConnectionConfig) -> Self {
        Self::new(Role::Server, config)
    }

    fn new(role: Role, config: ConnectionConfig) -> Self {
        let send_window = if config.assume_default_connection_window {
            ConnectionWindow::with_default()
        } else {
            ConnectionWindow::lazy()
        };
        let preface_remaining = match role {
            Role::Client => 0,
            Role::Server => CONNECTION_PREFACE.len(),
        };
        Connection {
            config,
            parser: FrameParser::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE),
            settings: SettingsTable::new(),
            windows: WindowTracker::new(send_window),
            streams: StreamMultiplexer::new(role),
            hpack: HeaderCodec::new(),
            output: BytesMut::new(),
            events: VecDeque::new(),
            header_block: None,
            preface_remaining,
            started: false,
            goaway_sent: false,
            goaway_received: None,
            closed: None,
        }
    }

    /// Our role on the connection
    pub fn role(&self) -> Role {
        self.streams.role()
    }

    /// Settings of both peers
    pub fn settings(&self) -> &SettingsTable {
        &self.settings
    }

    /// Connection-level flow-control windows
    pub fn windows(&self) -> &WindowTracker {
        &self.windows
    }

    /// The stream pool
    pub fn streams(&self) -> &StreamMultiplexer {
        &self.streams
    }

    /// Queue the connection preface
    ///
    /// The client writes the 24-byte preface; both sides then send their
    /// initial SETTINGS and, when configured, a connection WINDOW_UPDATE.
    /// Calling it again does nothing.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;

        if self.role() == Role::Client {
            self.output.extend_from_slice(CONNECTION_PREFACE);
        }

        let frame = self.settings.propose_local(self.config.settings)?;
        self.raise_parser_limit(self.config.settings.max_frame_size);
        self.queue_frame(frame)?;

        if let Some(size) = self.config.connection_window_size {
            if let Some(update) = self.windows.enlarge_recv_window(size)? {
                self.queue_frame(update)?;
            }
        }
        debug!(role = ?self.role(), "connection started");
        Ok(())
    }

    /// Feed bytes read from the transport
    ///
    /// Every frame completed by `data` is dispatched before the next one is
    /// parsed. A connection error closes the connection and is returned;
    /// stream errors are handled internally.
    pub fn receive(&mut self, data: &[u8]) -> Result<()> {
        if self.closed.is_some() {
            return Err(Error::ConnectionClosed);
        }
        if !self.started {
            self.start()?;
        }

        let mut input = data;
        if self.preface_remaining > 0 {
            let offset = CONNECTION_PREFACE.len() - self.preface_remaining;
            let n = self.preface_remaining.min(input.len());
            if input[..n] != CONNECTION_PREFACE[offset..offset + n] {
                return Err(self.fail(Error::MissingPreface));
            }
            self.preface_remaining -= n;
            input = &input[n..];
            if self.preface_remaining == 0 {
                trace!("client preface received");
            }
        }

        loop {
            let frame = match self.parser.next_frame(&mut input) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => return Err(self.fail(e)),
            };
            if let Err(e) = self.handle_frame(frame) {
                return Err(self.fail(e));
            }
            if self.closed.is_some() {
                break;
            }
        }
        Ok(())
    }

    /// Drain every byte queued for the transport
    pub fn take_output(&mut self) -> Bytes {
        self.output.split().freeze()
    }

    /// Whether bytes are waiting to be written
    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Take the next connection-level event
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Take the next event of one stream
    ///
    /// Returns [`Error::Cancelled`] once a reset stream has nothing left to
    /// deliver. Taking DATA hands its bytes back to the receive windows, so
    /// WINDOW_UPDATE frames may be queued here.
    pub fn poll_stream(&mut self, stream_id: StreamId) -> Result<Option<StreamEvent>> {
        let event = self.streams.poll(stream_id)?;
        if let Some(StreamEvent::Data { .. }) = &event {
            self.replenish(Some(stream_id))?;
        }
        Ok(event)
    }

    /// Whether the peer finished the stream and every event was taken
    pub fn is_stream_finished(&self, stream_id: StreamId) -> bool {
        self.streams.is_finished(stream_id)
    }

    /// Current state of a stream, if it is still in the pool
    pub fn stream_state(&self, stream_id: StreamId) -> Option<StreamState> {
        self.streams.get(stream_id).map(|entry| entry.state())
    }

    /// Bytes of DATA that could be sent on a stream right now
    pub fn send_capacity(&self, stream_id: StreamId) -> Result<usize> {
        let entry = self
            .streams
            .get(stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?;
        Ok(self.windows.send_capacity(entry))
    }

    /// Whether another local stream fits under the peer's limit
    pub fn can_open_stream(&self) -> bool {
        self.streams.can_open_stream()
    }

    /// True once the peer's initial SETTINGS has been received and
    /// acknowledged
    pub fn is_ready(&self) -> bool {
        self.started && self.closed.is_none() && self.settings.remote_received()
    }

    /// Whether the connection has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    /// Allocate a new local stream
    pub fn open_stream(&mut self) -> Result<StreamId> {
        self.ensure_open()?;
        if let Some((last_stream_id, code)) = self.goaway_received {
            return Err(Error::GoingAway {
                last_stream_id,
                code,
            });
        }
        self.streams.open_stream()
    }

    /// Queue a raw frame
    ///
    /// The frame bypasses stream state and flow-control accounting; only
    /// the peer's maximum frame size is checked.
    pub fn send_frame(&mut self, frame: Frame) -> Result<()> {
        self.ensure_open()?;
        let max = self.settings.remote().max_frame_size as usize;
        if frame.length() > max {
            return Err(Error::FrameSize(format!(
                "{} frame of {} bytes exceeds peer maximum {}",
                frame.frame_type().name(),
                frame.length(),
                max
            )));
        }
        self.queue_frame(frame)
    }

    /// Encode and queue a header block
    ///
    /// Blocks larger than the peer's maximum frame size are split into
    /// HEADERS followed by CONTINUATION frames.
    pub fn send_headers(
        &mut self,
        stream_id: StreamId,
        fields: &[HeaderField],
        end_stream: bool,
    ) -> Result<()> {
        self.ensure_open()?;
        self.ensure_not_cancelled(stream_id)?;
        self.streams.check_send_headers(stream_id)?;

        // The encoder's dynamic table moves on, so the block must go out
        let mut block = self.hpack.encode(fields)?;
        self.streams.on_send_headers(stream_id, end_stream)?;
        let max = self.settings.remote().max_frame_size as usize;

        let first = block.split_to(block.len().min(max));
        let headers = HeadersFrame::new(stream_id, first, end_stream, block.is_empty());
        self.queue_frame(headers.into())?;
        while !block.is_empty() {
            let fragment = block.split_to(block.len().min(max));
            let continuation = ContinuationFrame {
                stream_id,
                header_block: fragment,
                end_headers: block.is_empty(),
            };
            self.queue_frame(continuation.into())?;
        }
        trace!(stream_id, fields = fields.len(), end_stream, "queued header block");
        Ok(())
    }

    /// Queue as much of `data` as the flow-control windows allow
    ///
    /// Sent bytes are split off the front of `data`. Returns the number of
    /// bytes queued; 0 with non-empty `data` means the stream is blocked
    /// until a WINDOW_UPDATE arrives. END_STREAM goes out with the last
    /// chunk only once all of `data` has been sent.
    pub fn send_data(&mut self, stream_id: StreamId, data: &mut Bytes, end_stream: bool) -> Result<usize> {
        self.ensure_open()?;
        self.ensure_not_cancelled(stream_id)?;
        match self.streams.get(stream_id) {
            Some(entry) if !entry.state().can_send() => return Err(Error::StreamClosed(stream_id)),
            Some(_) => {}
            None => return Err(Error::StreamNotFound(stream_id)),
        }

        if data.is_empty() {
            if end_stream {
                self.streams.on_send_data(stream_id, true)?;
                self.queue_frame(DataFrame::new(stream_id, Bytes::new(), true).into())?;
            }
            return Ok(0);
        }

        let max_frame = self.settings.remote().max_frame_size as usize;
        let mut sent = 0;
        while !data.is_empty() {
            let entry = match self.streams.get_mut(stream_id) {
                Some(entry) => entry,
                None => break,
            };
            let capacity = self.windows.send_capacity(entry).min(max_frame);
            if capacity == 0 {
                break;
            }
            let chunk = data.split_to(capacity.min(data.len()));
            let last = end_stream && data.is_empty();
            self.windows.consume_send(entry, chunk.len());
            self.streams.on_send_data(stream_id, last)?;

            sent += chunk.len();
            self.queue_frame(DataFrame::new(stream_id, chunk, last).into())?;
        }
        if sent == 0 {
            trace!(stream_id, pending = data.len(), "stream blocked on flow control");
        }
        Ok(sent)
    }

    /// Reset a stream with RST_STREAM
    ///
    /// Streams that never left Idle are dropped without a frame; closed or
    /// unknown streams are left alone.
    pub fn reset_stream(&mut self, stream_id: StreamId, code: ErrorCode) -> Result<()> {
        self.ensure_open()?;
        let was_idle = match self.streams.get(stream_id) {
            Some(entry) => entry.state() == StreamState::Idle,
            None => return Ok(()),
        };
        if self.streams.cancel(stream_id, code) && !was_idle {
            debug!(stream_id, %code, "resetting stream");
            self.queue_frame(RstStreamFrame::new(stream_id, code).into())?;
        }
        self.replenish(None)
    }

    /// Send a PING; the reply surfaces as [`Event::PingAck`]
    pub fn ping(&mut self, data: [u8; 8]) -> Result<()> {
        self.ensure_open()?;
        self.queue_frame(PingFrame::new(data).into())
    }

    /// Propose new local settings; they apply once the peer acknowledges
    pub fn update_settings(&mut self, settings: Settings) -> Result<()> {
        self.ensure_open()?;
        let frame = self.settings.propose_local(settings)?;
        self.raise_parser_limit(settings.max_frame_size);
        self.queue_frame(frame)
    }

    /// Send GOAWAY without closing; streams already running may finish
    pub fn go_away(&mut self, code: ErrorCode, debug_data: Bytes) -> Result<()> {
        self.ensure_open()?;
        let last_stream_id = self.streams.last_peer_stream_id();
        debug!(last_stream_id, %code, "sending GOAWAY");
        self.goaway_sent = true;
        self.queue_frame(GoawayFrame::new(last_stream_id, code, debug_data).into())
    }

    /// Close the connection: GOAWAY(NO_ERROR) and cancel every stream
    ///
    /// Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.closed.is_some() {
            return;
        }
        if self.started {
            let goaway = GoawayFrame::new(
                self.streams.last_peer_stream_id(),
                ErrorCode::NoError,
                Bytes::new(),
            );
            if let Err(e) = self.queue_frame(goaway.into()) {
                warn!(error = %e, "failed to queue GOAWAY");
            }
            self.goaway_sent = true;
        }
        self.streams.cancel_all(ErrorCode::Cancel);
        self.closed = Some(ErrorCode::NoError);
        self.events.push_back(Event::Closed {
            code: ErrorCode::NoError,
        });
        debug!("connection closed");
    }

    /// The transport went away underneath the connection
    pub fn on_transport_closed(&mut self) {
        if self.closed.is_some() {
            return;
        }
        debug!("transport closed");
        self.streams.cancel_all(ErrorCode::Cancel);
        self.closed = Some(ErrorCode::Cancel);
        self.events.push_back(Event::Closed {
            code: ErrorCode::Cancel,
        });
    }

    /// Detach the handle of a stream
    ///
    /// A stream that is still running is reset with CANCEL; its entry
    /// leaves the pool once closed.
    pub fn release_stream(&mut self, stream_id: StreamId) {
        if let Some(state) = self.stream_state(stream_id) {
            if !state.is_closed() && self.closed.is_none() {
                if let Err(e) = self.reset_stream(stream_id, ErrorCode::Cancel) {
                    warn!(stream_id, error = %e, "failed to reset released stream");
                }
            }
        }
        // Nobody is left to read what is still queued
        while let Ok(Some(_)) = self.streams.poll(stream_id) {}
        self.streams.release(stream_id);
        if let Err(e) = self.replenish(None) {
            warn!(stream_id, error = %e, "failed to return window credit");
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.is_some() {
            return Err(Error::ConnectionClosed);
        }
        if !self.started {
            return Err(Error::NotReady);
        }
        Ok(())
    }

    fn ensure_not_cancelled(&self, stream_id: StreamId) -> Result<()> {
        match self.streams.get(stream_id) {
            Some(entry) => match entry.cancelled() {
                Some(code) => Err(Error::Cancelled { stream_id, code }),
                None => Ok(()),
            },
            None => Err(Error::StreamNotFound(stream_id)),
        }
    }

    /// Queue WINDOW_UPDATEs for DATA that left the stream inboxes
    ///
    /// `stream_id` names a stream whose own window may be due as well.
    fn replenish(&mut self, stream_id: Option<StreamId>) -> Result<()> {
        let released = self.streams.take_released();
        if self.closed.is_some() {
            return Ok(());
        }
        if let Some(stream_id) = stream_id {
            if let Some(update) = self.windows.stream_update(stream_id, &mut self.streams) {
                self.queue_frame(update)?;
            }
        }
        self.windows.release_recv(released);
        if let Some(update) = self.windows.connection_update() {
            self.queue_frame(update)?;
        }
        Ok(())
    }

    fn queue_frame(&mut self, frame: Frame) -> Result<()> {
        trace!(%frame, "queued");
        FrameSerializer::serialize_into(&frame, &mut self.output)
    }

    /// Frames up to the largest size we have advertised are accepted
    /// until the peer confirms a smaller one
    fn raise_parser_limit(&mut self, proposed: u32) {
        let limit = self.parser.max_frame_size().max(proposed);
        self.parser.set_max_frame_size(limit);
    }

    /// Tear the connection down after a connection error
    fn fail(&mut self, error: Error) -> Error {
        if self.closed.is_some() {
            return error;
        }
        let code = error.code();
        warn!(%error, %code, "connection error");
        let goaway = GoawayFrame::new(
            self.streams.last_peer_stream_id(),
            code,
            Bytes::from(error.to_string()),
        );
        if let Err(e) = self.queue_frame(goaway.into()) {
            warn!(error = %e, "failed to queue GOAWAY");
        }
        self.goaway_sent = true;
        self.header_block = None;
        self.streams.cancel_all(code);
        self.closed = Some(code);
        self.events.push_back(Event::Closed { code });
        error
    }

    /// Answer a stream error with RST_STREAM, keeping the connection
    fn stream_error(&mut self, stream_id: StreamId, code: ErrorCode, reason: &str) -> Result<()> {
        warn!(stream_id, %code, reason, "stream error");
        self.streams.cancel(stream_id, code);
        self.events.push_back(Event::StreamError { stream_id, code });
        self.queue_frame(RstStreamFrame::new(stream_id, code).into())?;
        self.replenish(None)
    }

    /// Turn stream errors into RST_STREAM; pass connection errors up
    fn absorb(&mut self, result: Result<()>) -> Result<()> {
        match result {
            Err(Error::StreamError {
                stream_id,
                code,
                reason,
            }) => self.stream_error(stream_id, code, &reason),
            other => other,
        }
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        trace!(%frame, "received");

        if let Some(block) = &self.header_block {
            if frame.frame_type() != FrameType::Continuation || frame.stream_id() != block.stream_id {
                return Err(Error::Protocol(format!(
                    "{} on stream {} inside the header block of stream {}",
                    frame.frame_type().name(),
                    frame.stream_id(),
                    block.stream_id
                )));
            }
        }

        if !self.settings.remote_received()
            && (frame.frame_type() != FrameType::Settings || frame.is_ack())
        {
            return Err(Error::Protocol(format!(
                "expected SETTINGS as first frame, got {}",
                frame.frame_type().name()
            )));
        }

        let scope = match self.streams.route(&frame) {
            Ok(scope) => scope,
            Err(Error::StreamError {
                stream_id: 0,
                code,
                reason,
            }) => {
                warn!(%frame, %reason, "discarding frame illegal on stream 0");
                self.events
                    .push_back(Event::ProtocolViolation { code, reason });
                return Ok(());
            }
            Err(e) => return self.absorb(Err(e)),
        };

        match frame.frame_type() {
            FrameType::Settings => self.on_settings(&frame),
            FrameType::Ping => self.on_ping(&frame),
            FrameType::Goaway => self.on_goaway(&frame),
            FrameType::WindowUpdate => {
                let result = self.windows.on_window_update(&frame, &mut self.streams);
                self.absorb(result)
            }
            FrameType::Priority => match scope {
                Scope::Connection => Ok(()),
                Scope::Stream(_) => self.on_stream_frame(frame),
            },
            FrameType::Headers => self.on_headers(&frame),
            FrameType::PushPromise => self.on_push_promise(&frame),
            FrameType::Continuation => self.on_continuation(frame),
            FrameType::Data => self.on_data(frame),
            FrameType::RstStream => self.on_stream_frame(frame),
        }
    }

    fn on_settings(&mut self, frame: &Frame) -> Result<()> {
        let update = self.settings.apply(frame)?;
        match update {
            SettingsUpdate::Remote { current, .. } => {
                self.streams
                    .set_peer_max_concurrent_streams(current.max_concurrent_streams);
                if let Some((old, new)) = update.initial_window_change() {
                    self.windows
                        .on_settings_initial_window_change(old, new, &mut self.streams)?;
                }
                let ack = self.settings.acknowledge_frame();
                self.queue_frame(ack)?;
                self.events.push_back(Event::RemoteSettings(current));
            }
            SettingsUpdate::Acknowledged { current, .. } => {
                let limit = current
                    .max_frame_size
                    .max(self.settings.advertised().max_frame_size);
                self.parser.set_max_frame_size(limit);
                self.streams
                    .set_local_max_concurrent_streams(current.max_concurrent_streams);
                if let Some((old, new)) = update.initial_window_change() {
                    self.windows
                        .on_local_initial_window_change(old, new, &mut self.streams)?;
                }
                self.events.push_back(Event::SettingsAcknowledged(current));
            }
        }
        Ok(())
    }

    fn on_ping(&mut self, frame: &Frame) -> Result<()> {
        let ping = PingFrame::try_from(frame)?;
        if ping.ack {
            self.events.push_back(Event::PingAck(ping.data));
            Ok(())
        } else {
            self.queue_frame(PingFrame::ack(ping.data).into())
        }
    }

    fn on_goaway(&mut self, frame: &Frame) -> Result<()> {
        let goaway = GoawayFrame::try_from(frame)?;
        debug!(
            last_stream_id = goaway.last_stream_id,
            code = %goaway.error_code,
            "peer sent GOAWAY"
        );
        self.goaway_received = Some((goaway.last_stream_id, goaway.error_code));
        let refused = self
            .streams
            .cancel_above(goaway.last_stream_id, ErrorCode::RefusedStream);
        if !refused.is_empty() {
            debug!(?refused, "streams refused by GOAWAY");
            self.replenish(None)?;
        }
        self.events.push_back(Event::GoAway {
            last_stream_id: goaway.last_stream_id,
            code: goaway.error_code,
            debug_data: goaway.debug_data,
        });
        Ok(())
    }

    fn on_headers(&mut self, frame: &Frame) -> Result<()> {
        let headers = HeadersFrame::try_from(frame)?;
        let self_dependent = headers
            .priority
            .map_or(false, |p| p.stream_dependency == headers.stream_id);
        self.header_block = Some(PartialBlock {
            stream_id: headers.stream_id,
            kind: BlockKind::Headers {
                end_stream: headers.end_stream,
                self_dependent,
            },
            fragments: BytesMut::from(&headers.header_block[..]),
        });
        if headers.end_headers {
            self.finish_header_block()?;
        }
        Ok(())
    }

    fn on_push_promise(&mut self, frame: &Frame) -> Result<()> {
        if self.role() == Role::Server {
            return Err(Error::Protocol("client sent PUSH_PROMISE".to_string()));
        }
        if !self.settings.local().enable_push {
            return Err(Error::Protocol(
                "PUSH_PROMISE received with push disabled".to_string(),
            ));
        }
        let promise = PushPromiseFrame::try_from(frame)?;
        self.streams.reserve_remote(promise.promised_stream_id)?;
        self.header_block = Some(PartialBlock {
            stream_id: promise.stream_id,
            kind: BlockKind::PushPromise {
                promised_stream_id: promise.promised_stream_id,
            },
            fragments: BytesMut::from(&promise.header_block[..]),
        });
        if promise.end_headers {
            self.finish_header_block()?;
        }
        Ok(())
    }

    fn on_continuation(&mut self, frame: Frame) -> Result<()> {
        let block = match self.header_block.as_mut() {
            Some(block) => block,
            None => {
                return Err(Error::Protocol(format!(
                    "CONTINUATION on stream {} without a header block",
                    frame.stream_id()
                )))
            }
        };
        block.fragments.extend_from_slice(frame.payload());
        if frame.flags().is_end_headers() {
            self.finish_header_block()?;
        }
        Ok(())
    }

    /// Decode a complete header block and hand it to its stream
    fn finish_header_block(&mut self) -> Result<()> {
        let block = match self.header_block.take() {
            Some(block) => block,
            None => return Ok(()),
        };
        // Decoded even when the stream is refused, to keep HPACK state in step
        let fields = self.hpack.decode(&block.fragments)?;
        let stream_id = block.stream_id;

        match block.kind {
            BlockKind::Headers {
                end_stream,
                self_dependent,
            } => {
                if self.goaway_sent && self.streams.get(stream_id).is_none() {
                    trace!(stream_id, "ignoring stream opened after GOAWAY");
                    return Ok(());
                }
                if self_dependent {
                    return self.stream_error(
                        stream_id,
                        ErrorCode::ProtocolError,
                        "stream depends on itself",
                    );
                }
                if let Some(limit) = self.settings.local().max_header_list_size {
                    let size = header_list_size(&fields);
                    if size > limit as usize {
                        return self.stream_error(
                            stream_id,
                            ErrorCode::ProtocolError,
                            &format!("header list of {} bytes exceeds limit {}", size, limit),
                        );
                    }
                }
                let result = self
                    .streams
                    .dispatch_headers(HeaderBlock {
                        stream_id,
                        fields,
                        end_stream,
                    })
                    .map(|_| ());
                self.absorb(result)
            }
            BlockKind::PushPromise { promised_stream_id } => {
                debug!(stream_id, promised_stream_id, "push promised");
                self.events.push_back(Event::PushPromise {
                    stream_id,
                    promised_stream_id,
                    fields,
                });
                Ok(())
            }
        }
    }

    /// Credit comes back once the application polls the payload; a
    /// rejected frame is credited to the connection right away
    fn on_data(&mut self, frame: Frame) -> Result<()> {
        let stream_id = frame.stream_id();
        let length = frame.length();
        self.windows.on_data_received(length)?;

        match self.streams.dispatch(frame) {
            Ok(_) => self.replenish(Some(stream_id)),
            Err(e) => {
                self.windows.release_recv(length);
                self.absorb(Err(e))?;
                self.replenish(None)
            }
        }
    }

    fn on_stream_frame(&mut self, frame: Frame) -> Result<()> {
        match self.streams.dispatch(frame) {
            Ok(Dispatched::Reset { stream_id, code }) => {
                self.events.push_back(Event::StreamReset { stream_id, code });
                self.replenish(None)
            }
            Ok(_) => Ok(()),
            Err(e) => self.absorb(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::codec::FrameParser;
    use crate::http::h2::frames::FrameFlags;
    use crate::http::h2::settings::SettingsBuilder;

    fn pump(from: &mut Connection, to: &mut Connection) {
        let bytes = from.take_output();
        if !bytes.is_empty() {
            to.receive(&bytes).unwrap();
        }
    }

    fn handshake_with(client: ConnectionConfig, server: ConnectionConfig) -> (Connection, Connection) {
        let mut client = Connection::client(client);
        let mut server = Connection::server(server);
        client.start().unwrap();
        server.start().unwrap();
        pump(&mut client, &mut server);
        pump(&mut server, &mut client);
        pump(&mut client, &mut server);
        (client, server)
    }

    fn handshake() -> (Connection, Connection) {
        handshake_with(ConnectionConfig::default(), ConnectionConfig::default())
    }

    fn frames_of(bytes: &[u8]) -> Vec<Frame> {
        FrameParser::with_max_frame_size(16_777_215).feed(bytes).unwrap()
    }

    fn request() -> Vec<HeaderField> {
        vec![
            HeaderField::new(":method", "GET"),
            HeaderField::new(":path", "/"),
            HeaderField::new(":scheme", "http"),
            HeaderField::new(":authority", "localhost"),
        ]
    }

    fn drain_events(conn: &mut Connection) -> Vec<Event> {
        std::iter::from_fn(|| conn.poll_event()).collect()
    }

    #[test]
    fn test_client_start_queues_preface_and_settings() {
        let mut client = Connection::client(ConnectionConfig::default());
        client.start().unwrap();
        client.start().unwrap();

        let out = client.take_output();
        assert!(out.starts_with(CONNECTION_PREFACE));
        let frames = frames_of(&out[CONNECTION_PREFACE.len()..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type(), FrameType::Settings);
        assert!(!frames[0].is_ack());
    }

    #[test]
    fn test_connection_window_enlarged_at_start() {
        let config = ConnectionConfig::builder()
            .connection_window_size(1 << 20)
            .build()
            .unwrap();
        let mut server = Connection::server(config);
        server.start().unwrap();
        let frames = frames_of(&server.take_output());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].frame_type(), FrameType::WindowUpdate);
        assert_eq!(frames[1].stream_id(), 0);
    }

    #[test]
    fn test_handshake_becomes_ready() {
        let (mut client, mut server) = handshake();
        assert!(client.is_ready());
        assert!(server.is_ready());

        let events = drain_events(&mut client);
        assert!(events.iter().any(|e| matches!(e, Event::RemoteSettings(_))));
        assert!(events.iter().any(|e| matches!(e, Event::SettingsAcknowledged(_))));
        assert!(drain_events(&mut server)
            .iter()
            .any(|e| matches!(e, Event::SettingsAcknowledged(_))));
    }

    #[test]
    fn test_server_rejects_bad_preface() {
        let mut server = Connection::server(ConnectionConfig::default());
        let err = server.receive(b"GET / HTTP/1.1\r\n\r\n").unwrap_err();
        assert!(matches!(err, Error::MissingPreface));
        assert!(server.is_closed());

        let frames = frames_of(&server.take_output());
        let goaway = frames.last().unwrap();
        assert_eq!(goaway.frame_type(), FrameType::Goaway);
        let goaway = GoawayFrame::try_from(goaway).unwrap();
        assert_eq!(goaway.error_code, ErrorCode::ProtocolError);
    }

    #[test]
    fn test_preface_split_across_reads() {
        let mut client = Connection::client(ConnectionConfig::default());
        let mut server = Connection::server(ConnectionConfig::default());
        client.start().unwrap();
        let bytes = client.take_output();
        for chunk in bytes.chunks(5) {
            server.receive(chunk).unwrap();
        }
        assert!(server.settings().remote_received());
    }

    #[test]
    fn test_first_frame_must_be_settings() {
        let mut client = Connection::client(ConnectionConfig::default());
        client.start().unwrap();
        let ping: Frame = PingFrame::new([0; 8]).into();
        let bytes = FrameSerializer::serialize(&ping).unwrap();
        assert!(matches!(client.receive(&bytes), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_request_and_response() {
        let (mut client, mut server) = handshake();

        let id = client.open_stream().unwrap();
        assert_eq!(id, 1);
        client.send_headers(id, &request(), false).unwrap();
        let mut body = Bytes::from_static(b"hello");
        assert_eq!(client.send_data(id, &mut body, true).unwrap(), 5);
        assert!(body.is_empty());
        pump(&mut client, &mut server);

        match server.poll_stream(id).unwrap() {
            Some(StreamEvent::Headers { fields, end_stream }) => {
                assert_eq!(fields, request());
                assert!(!end_stream);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            server.poll_stream(id).unwrap(),
            Some(StreamEvent::Data {
                data: Bytes::from_static(b"hello"),
                end_stream: true
            })
        );
        assert_eq!(server.stream_state(id), Some(StreamState::HalfClosedRemote));

        server
            .send_headers(id, &[HeaderField::new(":status", "200")], true)
            .unwrap();
        pump(&mut server, &mut client);
        let event = client.poll_stream(id).unwrap().unwrap();
        assert!(event.is_end_stream());
        assert!(client.is_stream_finished(id));
        assert_eq!(client.stream_state(id), Some(StreamState::Closed));

        client.release_stream(id);
        assert!(client.stream_state(id).is_none());
    }

    #[test]
    fn test_ping_is_acknowledged() {
        let (mut client, mut server) = handshake();
        drain_events(&mut client);
        client.ping(*b"12345678").unwrap();
        pump(&mut client, &mut server);
        pump(&mut server, &mut client);
        assert_eq!(client.poll_event(), Some(Event::PingAck(*b"12345678")));
    }

    #[test]
    fn test_data_on_stream_zero_is_violation() {
        let (mut client, mut server) = handshake();
        drain_events(&mut server);

        let frame = Frame::new(
            FrameType::Data,
            FrameFlags::empty(),
            0,
            Bytes::from_static(b"x"),
        );
        client.send_frame(frame).unwrap();
        pump(&mut client, &mut server);

        assert!(matches!(
            server.poll_event(),
            Some(Event::ProtocolViolation {
                code: ErrorCode::ProtocolError,
                ..
            })
        ));
        assert!(!server.is_closed());
        assert!(!server.has_output());
    }

    #[test]
    fn test_data_on_idle_stream_resets() {
        let (mut client, mut server) = handshake();
        drain_events(&mut server);

        let frame: Frame = DataFrame::new(7, Bytes::from_static(b"x"), false).into();
        client.send_frame(frame).unwrap();
        pump(&mut client, &mut server);

        assert_eq!(
            server.poll_event(),
            Some(Event::StreamError {
                stream_id: 7,
                code: ErrorCode::ProtocolError
            })
        );
        let frames = frames_of(&server.take_output());
        assert_eq!(frames[0].frame_type(), FrameType::RstStream);
        assert_eq!(frames[0].stream_id(), 7);
        assert!(!server.is_closed());
    }

    #[test]
    fn test_large_header_block_uses_continuation() {
        let (mut client, mut server) = handshake();
        let id = client.open_stream().unwrap();
        let mut fields = request();
        fields.push(HeaderField::new("x-large", vec![b'a'; 40_000]));
        client.send_headers(id, &fields, true).unwrap();

        let out = client.take_output();
        let types: Vec<FrameType> = frames_of(&out).iter().map(Frame::frame_type).collect();
        assert_eq!(types, vec![FrameType::Headers, FrameType::Continuation]);

        server.receive(&out).unwrap();
        match server.poll_stream(id).unwrap() {
            Some(StreamEvent::Headers { fields: received, end_stream }) => {
                assert_eq!(received, fields);
                assert!(end_stream);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_interleaved_frame_in_header_block_is_fatal() {
        let (mut client, mut server) = handshake();
        let id = client.open_stream().unwrap();
        client.streams.on_send_headers(id, false).unwrap();
        let block = client.hpack.encode(&request()).unwrap();
        client
            .send_frame(HeadersFrame::new(id, block, false, false).into())
            .unwrap();
        client.ping([0; 8]).unwrap();

        let err = server.receive(&client.take_output()).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(server.is_closed());
        assert_eq!(
            drain_events(&mut server).last(),
            Some(&Event::Closed {
                code: ErrorCode::ProtocolError
            })
        );
    }

    #[test]
    fn test_push_promise_with_push_disabled_is_fatal() {
        let config = ConnectionConfig::builder()
            .settings(SettingsBuilder::new().enable_push(false).build().unwrap())
            .build()
            .unwrap();
        let (mut client, mut server) = handshake_with(config, ConnectionConfig::default());

        let id = client.open_stream().unwrap();
        client.send_headers(id, &request(), true).unwrap();
        pump(&mut client, &mut server);

        let promise = PushPromiseFrame {
            stream_id: id,
            promised_stream_id: 2,
            header_block: server.hpack.encode(&request()).unwrap(),
            end_headers: true,
            padding: None,
        };
        server.send_frame(promise.into()).unwrap();
        let err = client.receive(&server.take_output()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProtocolError);
        assert!(client.is_closed());
    }

    #[test]
    fn test_push_promise_reserves_stream() {
        let (mut client, mut server) = handshake();
        let id = client.open_stream().unwrap();
        client.send_headers(id, &request(), true).unwrap();
        pump(&mut client, &mut server);
        drain_events(&mut client);

        let promise = PushPromiseFrame {
            stream_id: id,
            promised_stream_id: 2,
            header_block: server.hpack.encode(&request()).unwrap(),
            end_headers: true,
            padding: None,
        };
        server.send_frame(promise.into()).unwrap();
        pump(&mut server, &mut client);

        assert_eq!(client.stream_state(2), Some(StreamState::ReservedRemote));
        match client.poll_event() {
            Some(Event::PushPromise {
                stream_id,
                promised_stream_id,
                fields,
            }) => {
                assert_eq!(stream_id, id);
                assert_eq!(promised_stream_id, 2);
                assert_eq!(fields, request());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_peer_reset_cancels_stream() {
        let (mut client, mut server) = handshake();
        let id = client.open_stream().unwrap();
        client.send_headers(id, &request(), false).unwrap();
        pump(&mut client, &mut server);
        drain_events(&mut client);

        server.reset_stream(id, ErrorCode::Cancel).unwrap();
        pump(&mut server, &mut client);

        assert_eq!(
            client.poll_event(),
            Some(Event::StreamReset {
                stream_id: id,
                code: ErrorCode::Cancel
            })
        );
        assert!(matches!(
            client.poll_stream(id),
            Err(Error::Cancelled {
                code: ErrorCode::Cancel,
                ..
            })
        ));
        let mut body = Bytes::from_static(b"late");
        assert!(matches!(
            client.send_data(id, &mut body, true),
            Err(Error::Cancelled { .. })
        ));
    }

    #[test]
    fn test_reset_idle_stream_sends_nothing() {
        let (mut client, _server) = handshake();
        let id = client.open_stream().unwrap();
        client.reset_stream(id, ErrorCode::Cancel).unwrap();
        assert!(!client.has_output());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut client, _server) = handshake();
        let id = client.open_stream().unwrap();
        client.send_headers(id, &request(), false).unwrap();
        client.take_output();
        drain_events(&mut client);

        client.close();
        client.close();
        let frames = frames_of(&client.take_output());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type(), FrameType::Goaway);
        assert_eq!(
            drain_events(&mut client),
            vec![Event::Closed {
                code: ErrorCode::NoError
            }]
        );
        assert!(matches!(
            client.poll_stream(id),
            Err(Error::Cancelled { .. })
        ));
        assert!(matches!(client.open_stream(), Err(Error::ConnectionClosed)));
        assert!(matches!(client.receive(b""), Err(Error::ConnectionClosed)));
    }

    #[test]
    fn test_goaway_refuses_streams_above_last() {
        let (mut client, mut server) = handshake();
        let first = client.open_stream().unwrap();
        client.send_headers(first, &request(), false).unwrap();
        pump(&mut client, &mut server);
        let second = client.open_stream().unwrap();
        client.send_headers(second, &request(), false).unwrap();

        server.go_away(ErrorCode::NoError, Bytes::new()).unwrap();
        pump(&mut server, &mut client);

        assert_eq!(client.stream_state(first), Some(StreamState::Open));
        assert!(matches!(
            client.poll_stream(second),
            Err(Error::Cancelled {
                code: ErrorCode::RefusedStream,
                ..
            })
        ));
        assert!(matches!(
            client.open_stream(),
            Err(Error::GoingAway {
                last_stream_id: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_rejected_headers_leave_stream_and_hpack_untouched() {
        let (mut client, mut server) = handshake();
        let id = client.open_stream().unwrap();
        client.send_headers(id, &request(), true).unwrap();
        pump(&mut client, &mut server);

        let custom = vec![HeaderField::new("x-trace", "abc123")];
        assert!(matches!(
            client.send_headers(id, &custom, false),
            Err(Error::StreamClosed(_))
        ));
        assert!(!client.has_output());
        assert_eq!(client.stream_state(id), Some(StreamState::HalfClosedLocal));

        // The peer's decoder still agrees with our encoder
        let next = client.open_stream().unwrap();
        client.send_headers(next, &custom, true).unwrap();
        pump(&mut client, &mut server);
        assert!(!server.is_closed());
        while server.poll_stream(id).unwrap().is_some() {}
        assert_eq!(
            server.poll_stream(next).unwrap(),
            Some(StreamEvent::Headers {
                fields: custom,
                end_stream: true,
            })
        );
    }

    #[test]
    fn test_flow_control_blocks_and_resumes() {
        let server_config = ConnectionConfig::builder()
            .settings(SettingsBuilder::new().initial_window_size(10).build().unwrap())
            .build()
            .unwrap();
        let (mut client, mut server) = handshake_with(ConnectionConfig::default(), server_config);

        let id = client.open_stream().unwrap();
        client.send_headers(id, &request(), false).unwrap();
        let mut body = Bytes::from(vec![7u8; 25]);
        assert_eq!(client.send_data(id, &mut body, true).unwrap(), 10);
        assert_eq!(client.send_data(id, &mut body, true).unwrap(), 0);
        assert_eq!(body.len(), 15);

        // Credit returns only once the server reads what it received
        pump(&mut client, &mut server);
        pump(&mut server, &mut client);
        assert_eq!(client.send_capacity(id).unwrap(), 0);

        while server.poll_stream(id).unwrap().is_some() {}
        pump(&mut server, &mut client);
        assert_eq!(client.send_capacity(id).unwrap(), 10);
        assert_eq!(client.send_data(id, &mut body, true).unwrap(), 10);
        pump(&mut client, &mut server);
        while server.poll_stream(id).unwrap().is_some() {}
        pump(&mut server, &mut client);
        assert_eq!(client.send_data(id, &mut body, true).unwrap(), 5);
        assert_eq!(client.stream_state(id), Some(StreamState::HalfClosedLocal));
    }

    #[test]
    fn test_header_list_limit_resets_stream() {
        let server_config = ConnectionConfig::builder()
            .settings(SettingsBuilder::new().max_header_list_size(64).build().unwrap())
            .build()
            .unwrap();
        let (mut client, mut server) = handshake_with(ConnectionConfig::default(), server_config);
        drain_events(&mut server);

        let id = client.open_stream().unwrap();
        client.send_headers(id, &request(), true).unwrap();
        pump(&mut client, &mut server);
        assert_eq!(
            server.poll_event(),
            Some(Event::StreamError {
                stream_id: id,
                code: ErrorCode::ProtocolError
            })
        );
        assert!(!server.is_closed());
    }

    #[test]
    fn test_settings_ack_applies_frame_size() {
        let (mut client, mut server) = handshake();
        let settings = SettingsBuilder::new().max_frame_size(32_768).build().unwrap();
        server.update_settings(settings).unwrap();
        // Accepted as soon as it is advertised
        assert_eq!(server.parser.max_frame_size(), 32_768);
        pump(&mut server, &mut client);

        // The client uses the larger size once it has seen the SETTINGS
        assert_eq!(client.settings().remote().max_frame_size, 32_768);
        let id = client.open_stream().unwrap();
        client.send_headers(id, &request(), false).unwrap();
        let mut body = Bytes::from(vec![1u8; 20_000]);
        client.send_data(id, &mut body, false).unwrap();
        pump(&mut client, &mut server);
        assert_eq!(server.settings().local().max_frame_size, 32_768);

        match (server.poll_stream(id).unwrap(), server.poll_stream(id).unwrap()) {
            (Some(StreamEvent::Headers { .. }), Some(StreamEvent::Data { data, .. })) => {
                assert_eq!(data.len(), 20_000)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_invalid_remote_settings_close_connection() {
        let (_client, mut server) = handshake();
        let frame = Frame::new(
            FrameType::Settings,
            FrameFlags::empty(),
            0,
            Bytes::from_static(&[0x00, 0x02, 0x00, 0x00, 0x00, 0x02]),
        );
        let bytes = FrameSerializer::serialize(&frame).unwrap();
        let err = server.receive(&bytes).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProtocolError);
        assert!(server.settings().remote().enable_push);
        assert!(server.is_closed());
    }
}
