//! HTTP/2 flow control
//!
//! This module implements flow control as defined in RFC 7540 Section 5.2.
//!
//! HTTP/2 uses flow control to prevent senders from overwhelming receivers
//! with data. Flow control is applied at both the connection and stream level.
//!
//! The connection send window starts unset: until the peer sends its first
//! connection-level WINDOW_UPDATE only stream windows limit outbound DATA.
//! [`ConnectionWindow::with_default`] opts into the RFC 7540 starting value
//! of 65,535 instead.

use super::error::{Error, ErrorCode, Result};
use super::frames::{Frame, WindowUpdateFrame};
use super::stream::{StreamEntry, StreamId, StreamMultiplexer};
use super::{CONNECTION_STREAM_ID, DEFAULT_INITIAL_WINDOW_SIZE, MAX_WINDOW_SIZE};
use tracing::{debug, trace};

/// Flow control window
///
/// Tracks the available window size for one direction of a stream, or the
/// connection receive window.
#[derive(Debug, Clone)]
pub struct FlowControlWindow {
    /// Initial window size
    initial_size: u32,
    /// Current window size (can be negative if over-committed)
    current_size: i64,
    /// Received bytes the application is done with, not yet given back
    released: u64,
}

impl FlowControlWindow {
    /// Create a new flow control window with default size
    pub fn new() -> Self {
        Self::with_initial_size(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    /// Create a new flow control window with specified initial size
    pub fn with_initial_size(initial_size: u32) -> Self {
        FlowControlWindow {
            initial_size,
            current_size: initial_size as i64,
            released: 0,
        }
    }

    /// Get current window size
    pub fn size(&self) -> i64 {
        self.current_size
    }

    /// Get initial window size
    pub fn initial_size(&self) -> u32 {
        self.initial_size
    }

    /// Bytes that may be sent right now
    pub fn available(&self) -> usize {
        self.current_size.max(0) as usize
    }

    /// Check if window can send specified amount
    pub fn can_send(&self, amount: usize) -> bool {
        self.current_size >= amount as i64
    }

    /// Consume window capacity for sending data
    ///
    /// Returns the actual amount that can be sent (may be less than requested)
    pub fn consume(&mut self, amount: usize) -> usize {
        let to_send = amount.min(self.available());
        self.current_size -= to_send as i64;
        to_send
    }

    /// Increase window size (WINDOW_UPDATE)
    ///
    /// Returns the new window size
    pub fn increase(&mut self, increment: u32) -> Result<i64> {
        let new_size = self.current_size + increment as i64;

        // RFC 7540 Section 6.9.1
        if new_size > MAX_WINDOW_SIZE as i64 {
            return Err(Error::FlowControl(format!(
                "window size {} exceeds maximum (2^31-1)",
                new_size
            )));
        }

        self.current_size = new_size;
        Ok(self.current_size)
    }

    /// Decrease window size (receiving data)
    pub fn decrease(&mut self, amount: usize) {
        self.current_size -= amount as i64;
    }

    /// Update initial window size from SETTINGS
    ///
    /// Applies the difference to the current size, which may go negative.
    pub fn update_initial_size(&mut self, new_initial_size: u32) -> Result<()> {
        let diff = new_initial_size as i64 - self.initial_size as i64;
        let new_current = self.current_size + diff;

        if new_current > MAX_WINDOW_SIZE as i64 {
            return Err(Error::FlowControl(format!(
                "new window size {} exceeds maximum (2^31-1)",
                new_current
            )));
        }

        self.initial_size = new_initial_size;
        self.current_size = new_current;

        Ok(())
    }

    /// Mark received bytes as consumed by the application
    ///
    /// Released bytes become credit for the next WINDOW_UPDATE; bytes still
    /// waiting to be read keep holding the window.
    pub fn release(&mut self, amount: usize) {
        self.released += amount as u64;
    }

    /// Bytes released but not yet returned to the peer
    pub fn released(&self) -> u64 {
        self.released
    }

    /// Increment due once released bytes reach half of the initial size
    pub fn window_update_increment(&self) -> Option<u32> {
        if self.released == 0 || self.released < (self.initial_size / 2) as u64 {
            return None;
        }
        let room = (MAX_WINDOW_SIZE as i64 - self.current_size).max(0) as u64;
        match self.released.min(room) {
            0 => None,
            increment => Some(increment as u32),
        }
    }

    /// Take the due increment and credit it to the window
    pub fn take_window_update(&mut self) -> Option<u32> {
        let increment = self.window_update_increment()?;
        self.increase(increment).ok()?;
        self.released -= increment as u64;
        Some(increment)
    }
}

impl Default for FlowControlWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection-level send window
#[derive(Debug, Clone, Default)]
pub struct ConnectionWindow {
    window_size: Option<u64>,
}

impl ConnectionWindow {
    /// Window without a baseline; established by the first WINDOW_UPDATE
    pub fn lazy() -> Self {
        ConnectionWindow { window_size: None }
    }

    /// Window starting at the RFC 7540 default of 65,535
    pub fn with_default() -> Self {
        ConnectionWindow {
            window_size: Some(DEFAULT_INITIAL_WINDOW_SIZE as u64),
        }
    }

    /// Current size, `None` while no baseline exists
    pub fn size(&self) -> Option<u64> {
        self.window_size
    }

    /// Bytes the connection window allows; `None` when it does not gate sends
    pub fn available(&self) -> Option<usize> {
        self.window_size.map(|size| size as usize)
    }

    /// Charge sent bytes against the window
    pub fn consume(&mut self, amount: usize) {
        if let Some(size) = self.window_size.as_mut() {
            *size = size.saturating_sub(amount as u64);
        }
    }

    /// Apply a connection-level WINDOW_UPDATE increment
    pub fn increase(&mut self, increment: u32) -> Result<u64> {
        let new_size = match self.window_size {
            None => increment as u64,
            Some(size) => size.saturating_add(increment as u64),
        };
        if new_size > MAX_WINDOW_SIZE as u64 {
            return Err(Error::FlowControl(format!(
                "connection window {} exceeds maximum (2^31-1)",
                new_size
            )));
        }
        self.window_size = Some(new_size);
        Ok(new_size)
    }
}

/// Flow-control bookkeeping for one connection
///
/// Owns the connection windows; stream windows live in the stream entries
/// and are reached through the multiplexer.
#[derive(Debug, Clone)]
pub struct WindowTracker {
    send: ConnectionWindow,
    recv: FlowControlWindow,
}

impl WindowTracker {
    /// Create a tracker with the given connection send window
    pub fn new(send: ConnectionWindow) -> Self {
        WindowTracker {
            send,
            recv: FlowControlWindow::new(),
        }
    }

    /// Connection send window
    pub fn send_window(&self) -> &ConnectionWindow {
        &self.send
    }

    /// Connection receive window
    pub fn recv_window(&self) -> &FlowControlWindow {
        &self.recv
    }

    /// Enlarge the connection receive window beyond the default
    ///
    /// Returns the WINDOW_UPDATE announcing the extra credit.
    pub fn enlarge_recv_window(&mut self, target: u32) -> Result<Option<Frame>> {
        let target = target.min(MAX_WINDOW_SIZE);
        if target <= self.recv.initial_size() {
            return Ok(None);
        }
        let increment = target - self.recv.initial_size();
        self.recv.update_initial_size(target)?;
        debug!(target, increment, "enlarging connection receive window");
        Ok(Some(
            WindowUpdateFrame::new(CONNECTION_STREAM_ID, increment).into(),
        ))
    }

    /// Process an inbound WINDOW_UPDATE frame
    pub fn on_window_update(&mut self, frame: &Frame, streams: &mut StreamMultiplexer) -> Result<()> {
        let update = WindowUpdateFrame::try_from(frame)?;
        let stream_id = update.stream_id;

        if stream_id == CONNECTION_STREAM_ID {
            if update.size_increment == 0 {
                return Err(Error::Protocol(
                    "connection WINDOW_UPDATE with zero increment".to_string(),
                ));
            }
            let size = self.send.increase(update.size_increment)?;
            trace!(increment = update.size_increment, size, "connection window update");
            return Ok(());
        }

        if update.size_increment == 0 {
            return Err(Error::stream(
                stream_id,
                ErrorCode::ProtocolError,
                "WINDOW_UPDATE with zero increment",
            ));
        }

        let entry = match streams.get_mut(stream_id) {
            Some(entry) if !entry.state().is_closed() => entry,
            _ => {
                trace!(stream_id, "ignoring WINDOW_UPDATE for unknown or closed stream");
                return Ok(());
            }
        };
        match entry.send_window_mut().increase(update.size_increment) {
            Ok(size) => {
                trace!(stream_id, increment = update.size_increment, size, "stream window update");
                Ok(())
            }
            Err(_) => Err(Error::stream(
                stream_id,
                ErrorCode::FlowControlError,
                "stream window exceeds 2^31-1",
            )),
        }
    }

    /// Adjust every open stream's send window to a new peer
    /// INITIAL_WINDOW_SIZE; windows may go negative
    pub fn on_settings_initial_window_change(
        &mut self,
        old: u32,
        new: u32,
        streams: &mut StreamMultiplexer,
    ) -> Result<()> {
        debug!(old, new, "peer initial window size changed");
        streams.set_initial_send_window(new);
        for entry in streams.entries_mut() {
            if entry.state().is_closed() {
                continue;
            }
            entry.send_window_mut().update_initial_size(new)?;
        }
        Ok(())
    }

    /// Adjust stream receive windows once our own INITIAL_WINDOW_SIZE
    /// change has been acknowledged
    pub fn on_local_initial_window_change(
        &mut self,
        old: u32,
        new: u32,
        streams: &mut StreamMultiplexer,
    ) -> Result<()> {
        debug!(old, new, "local initial window size in effect");
        streams.set_initial_recv_window(new);
        for entry in streams.entries_mut() {
            if entry.state().is_closed() {
                continue;
            }
            entry.recv_window_mut().update_initial_size(new)?;
        }
        Ok(())
    }

    /// Bytes of DATA that may be sent on `stream_id` right now
    pub fn send_capacity(&self, entry: &StreamEntry) -> usize {
        let stream = entry.send_window().available();
        match self.send.available() {
            Some(connection) => stream.min(connection),
            None => stream,
        }
    }

    /// Charge outbound DATA against the connection and stream windows
    pub fn consume_send(&mut self, entry: &mut StreamEntry, amount: usize) {
        entry.send_window_mut().consume(amount);
        self.send.consume(amount);
    }

    /// Charge inbound DATA against the connection receive window
    pub fn on_data_received(&mut self, amount: usize) -> Result<()> {
        if amount as i64 > self.recv.size() {
            return Err(Error::FlowControl(format!(
                "DATA of {} bytes exceeds connection receive window {}",
                amount,
                self.recv.size()
            )));
        }
        self.recv.decrease(amount);
        Ok(())
    }

    /// Give bytes the application consumed back to the connection
    /// receive window
    pub fn release_recv(&mut self, amount: usize) {
        self.recv.release(amount);
    }

    /// WINDOW_UPDATE restoring the connection receive window, if due
    pub fn connection_update(&mut self) -> Option<Frame> {
        let increment = self.recv.take_window_update()?;
        trace!(increment, "replenishing connection receive window");
        Some(WindowUpdateFrame::new(CONNECTION_STREAM_ID, increment).into())
    }

    /// WINDOW_UPDATE restoring a stream receive window, if due
    ///
    /// Streams the peer can no longer send on get no credit.
    pub fn stream_update(&mut self, stream_id: StreamId, streams: &mut StreamMultiplexer) -> Option<Frame> {
        let entry = streams.get_mut(stream_id)?;
        if !entry.state().can_receive() {
            return None;
        }
        let increment = entry.recv_window_mut().take_window_update()?;
        trace!(stream_id, increment, "replenishing stream receive window");
        Some(WindowUpdateFrame::new(stream_id, increment).into())
    }
}

impl Default for WindowTracker {
    fn default() -> Self {
        Self::new(ConnectionWindow::lazy())
    }
}
