//! Blocking HTTP/2 client driver
//!
//! [`H2Client`] runs a client [`Connection`] over any [`SessionOps`]
//! transport. One I/O thread owns the transport: it writes whatever the
//! connection has queued and feeds everything it reads back in. Stream
//! handles live on any thread and only ever touch the connection under its
//! mutex; they suspend on a condition variable until the I/O thread reports
//! progress.

use super::connection::{Connection, ConnectionConfig, Event};
use super::error::{Error, ErrorCode, Result};
use super::hpack::HeaderField;
use super::settings::{Settings, SyncState};
use super::stream::{StreamEvent, StreamId};
use crate::http::{HttpSession, SessionOps};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Connection events kept for [`H2Client::poll_event`] before the oldest
/// are dropped
const MAX_BUFFERED_EVENTS: usize = 1024;

struct Inner {
    conn: Connection,
    events: VecDeque<Event>,
    pongs: VecDeque<[u8; 8]>,
}

impl Inner {
    fn collect_events(&mut self) {
        while let Some(event) = self.conn.poll_event() {
            match event {
                Event::PingAck(data) => self.pongs.push_back(data),
                Event::PushPromise {
                    promised_stream_id, ..
                } => {
                    // No handle can ever claim a pushed stream
                    debug!(promised_stream_id, "refusing pushed stream");
                    self.conn.release_stream(promised_stream_id);
                    self.buffer(event);
                }
                other => self.buffer(other),
            }
        }
    }

    fn buffer(&mut self, event: Event) {
        if self.events.len() == MAX_BUFFERED_EVENTS {
            trace!("dropping oldest connection event");
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

struct Shared {
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock()
    }

    /// Re-evaluate `check` every time the connection changes until it
    /// yields a value, fails, or `deadline` passes
    fn wait_until<T>(
        &self,
        guard: &mut MutexGuard<'_, Inner>,
        deadline: Option<Instant>,
        mut check: impl FnMut(&mut Inner) -> Result<Option<T>>,
    ) -> Result<T> {
        loop {
            if let Some(value) = check(&mut **guard)? {
                return Ok(value);
            }
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(guard, deadline).timed_out() {
                        return match check(&mut **guard)? {
                            Some(value) => Ok(value),
                            None => Err(Error::Timeout),
                        };
                    }
                }
                None => self.changed.wait(guard),
            }
        }
    }

    fn transport_failed(&self, reason: &str) {
        let mut inner = self.lock();
        if !inner.conn.is_closed() {
            warn!(reason, "transport failed");
        }
        inner.conn.on_transport_closed();
        inner.collect_events();
        drop(inner);
        self.changed.notify_all();
    }
}

/// Settings for the I/O thread
#[derive(Debug, Clone, Copy)]
struct IoLoop {
    poll_interval: Duration,
    read_buffer_size: usize,
}

impl IoLoop {
    fn run<S: SessionOps>(self, shared: Arc<Shared>, mut session: HttpSession<S>) {
        let mut buf = vec![0u8; self.read_buffer_size];
        loop {
            let (output, closed) = {
                let mut inner = shared.lock();
                (inner.conn.take_output(), inner.conn.is_closed())
            };
            if !output.is_empty() {
                trace!(len = output.len(), "writing");
                if let Err(e) = session.write_all(&output) {
                    shared.transport_failed(&e.to_string());
                    break;
                }
            }
            if closed {
                break;
            }

            match session.poll_read(Some(self.poll_interval)) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    shared.transport_failed(&e.to_string());
                    break;
                }
            }
            let n = match session.read(&mut buf) {
                Ok(0) => {
                    shared.transport_failed("connection closed by peer");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    shared.transport_failed(&e.to_string());
                    break;
                }
            };
            trace!(len = n, "read");

            let mut inner = shared.lock();
            if let Err(e) = inner.conn.receive(&buf[..n]) {
                debug!(error = %e, "connection failed while processing input");
            }
            inner.collect_events();
            drop(inner);
            shared.changed.notify_all();
        }

        if let Err(e) = session.close() {
            debug!(error = %e, "error closing transport");
        }
        debug!("I/O thread finished");
    }
}

/// HTTP/2 client builder
#[derive(Debug, Clone)]
pub struct H2ClientBuilder {
    config: ConnectionConfig,
    settings_timeout: Duration,
    poll_interval: Duration,
    read_buffer_size: usize,
    write_timeout: Option<Duration>,
    enable_push: bool,
}

impl H2ClientBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        H2ClientBuilder {
            config: ConnectionConfig::default(),
            settings_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(5),
            read_buffer_size: 16 * 1024,
            write_timeout: Some(Duration::from_secs(10)),
            enable_push: false,
        }
    }

    /// Connection configuration
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Local settings sent with the preface
    pub fn settings(mut self, settings: Settings) -> Self {
        self.config.settings = settings;
        self
    }

    /// How long to wait for the peer's SETTINGS and for acknowledgements
    pub fn settings_timeout(mut self, timeout: Duration) -> Self {
        self.settings_timeout = timeout;
        self
    }

    /// How often the I/O thread checks for queued output while idle
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Size of the transport read buffer
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Timeout for a single transport write
    pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Advertise SETTINGS_ENABLE_PUSH
    ///
    /// Off by default and overrides the configured settings. Pushed streams
    /// are still refused with CANCEL; only the promise is reported as
    /// [`Event::PushPromise`].
    pub fn enable_push(mut self, enable: bool) -> Self {
        self.enable_push = enable;
        self
    }

    /// Start the connection over `session` and wait until it is ready
    ///
    /// Fails with [`Error::SettingsTimeout`] when the server's SETTINGS do
    /// not arrive within the settings timeout.
    pub fn connect<S>(self, session: S) -> Result<H2Client>
    where
        S: SessionOps + Send + 'static,
    {
        let mut config = self.config;
        config.settings.enable_push = self.enable_push;
        let mut conn = Connection::client(config);
        conn.start()?;

        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                conn,
                events: VecDeque::new(),
                pongs: VecDeque::new(),
            }),
            changed: Condvar::new(),
        });

        let mut session = HttpSession::new(session);
        session.set_timeout(self.write_timeout);
        let io = IoLoop {
            poll_interval: self.poll_interval,
            read_buffer_size: self.read_buffer_size,
        };
        let io_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("h2-io".to_string())
            .spawn(move || io.run(io_shared, session))?;

        let client = H2Client {
            shared,
            io_thread: Mutex::new(Some(handle)),
            settings_timeout: self.settings_timeout,
            next_ping: AtomicU64::new(1),
        };

        let deadline = Instant::now() + self.settings_timeout;
        let ready = {
            let mut guard = client.shared.lock();
            client.shared.wait_until(&mut guard, Some(deadline), |inner| {
                if inner.conn.is_ready() {
                    Ok(Some(()))
                } else if inner.conn.is_closed() {
                    Err(Error::ConnectionClosed)
                } else {
                    Ok(None)
                }
            })
        };
        match ready {
            Ok(()) => {
                debug!("HTTP/2 connection ready");
                Ok(client)
            }
            Err(Error::Timeout) => Err(Error::SettingsTimeout),
            Err(e) => Err(e),
        }
    }
}

impl Default for H2ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP/2 client
///
/// Dropping the client closes the connection.
pub struct H2Client {
    shared: Arc<Shared>,
    io_thread: Mutex<Option<JoinHandle<()>>>,
    settings_timeout: Duration,
    next_ping: AtomicU64,
}

impl H2Client {
    /// Connect with default settings
    pub fn connect<S>(session: S) -> Result<Self>
    where
        S: SessionOps + Send + 'static,
    {
        H2ClientBuilder::new().connect(session)
    }

    /// Open a new stream, waiting for a slot under the server's
    /// MAX_CONCURRENT_STREAMS
    pub fn open_stream(&self) -> Result<StreamHandle> {
        let mut guard = self.shared.lock();
        let id = self.shared.wait_until(&mut guard, None, |inner| {
            if inner.conn.can_open_stream() || inner.conn.is_closed() {
                inner.conn.open_stream().map(Some)
            } else {
                Ok(None)
            }
        })?;
        Ok(StreamHandle {
            shared: Arc::clone(&self.shared),
            id,
        })
    }

    /// Send a PING and wait for its acknowledgement
    ///
    /// Returns the measured round trip time.
    pub fn ping(&self, timeout: Duration) -> Result<Duration> {
        let data = self.next_ping.fetch_add(1, Ordering::Relaxed).to_be_bytes();
        let start = Instant::now();
        let mut guard = self.shared.lock();
        guard.conn.ping(data)?;
        self.shared
            .wait_until(&mut guard, Some(start + timeout), |inner| {
                if let Some(pos) = inner.pongs.iter().position(|pong| *pong == data) {
                    inner.pongs.remove(pos);
                    return Ok(Some(()));
                }
                if inner.conn.is_closed() {
                    return Err(Error::ConnectionClosed);
                }
                Ok(None)
            })?;
        Ok(start.elapsed())
    }

    /// Propose new local settings and wait until the server acknowledges them
    pub fn update_settings(&self, settings: Settings) -> Result<()> {
        let deadline = Instant::now() + self.settings_timeout;
        let mut guard = self.shared.lock();
        guard.conn.update_settings(settings)?;
        let result = self.shared.wait_until(&mut guard, Some(deadline), |inner| {
            if inner.conn.settings().sync_state() == SyncState::Synced {
                Ok(Some(()))
            } else if inner.conn.is_closed() {
                Err(Error::ConnectionClosed)
            } else {
                Ok(None)
            }
        });
        match result {
            Err(Error::Timeout) => Err(Error::SettingsTimeout),
            other => other,
        }
    }

    /// Settings most recently received from the server
    pub fn remote_settings(&self) -> Settings {
        *self.shared.lock().conn.settings().remote()
    }

    /// Local settings the server has acknowledged
    pub fn local_settings(&self) -> Settings {
        *self.shared.lock().conn.settings().local()
    }

    /// Take the next connection event without waiting
    pub fn poll_event(&self) -> Option<Event> {
        self.shared.lock().events.pop_front()
    }

    /// Wait up to `timeout` for the next connection event
    pub fn wait_event(&self, timeout: Duration) -> Result<Event> {
        let mut guard = self.shared.lock();
        self.shared
            .wait_until(&mut guard, Some(Instant::now() + timeout), |inner| {
                Ok(inner.events.pop_front())
            })
    }

    /// Send GOAWAY; streams already open keep running
    pub fn go_away(&self, code: ErrorCode, debug_data: Bytes) -> Result<()> {
        self.shared.lock().conn.go_away(code, debug_data)
    }

    /// Whether the connection has been closed
    pub fn is_closed(&self) -> bool {
        self.shared.lock().conn.is_closed()
    }

    /// Streams the connection still holds, including finished ones whose
    /// handle is alive
    pub fn stream_count(&self) -> usize {
        self.shared.lock().conn.streams().len()
    }

    /// Close the connection and wait for the I/O thread to finish
    ///
    /// Every stream still running is cancelled. Closing twice is fine.
    pub fn close(&self) -> Result<()> {
        {
            let mut inner = self.shared.lock();
            inner.conn.close();
            inner.collect_events();
        }
        self.shared.changed.notify_all();

        let handle = self.io_thread.lock().take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| Error::Internal("I/O thread panicked".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for H2Client {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "error closing HTTP/2 client");
        }
    }
}

/// Handle to one stream of an [`H2Client`]
///
/// Dropping the handle resets the stream with CANCEL if it is still
/// running.
pub struct StreamHandle {
    shared: Arc<Shared>,
    id: StreamId,
}

impl StreamHandle {
    /// Stream ID
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Send a header block
    pub fn send_headers(&self, fields: &[HeaderField], end_stream: bool) -> Result<()> {
        self.shared.lock().conn.send_headers(self.id, fields, end_stream)
    }

    /// Send body bytes, waiting for flow-control credit as needed
    pub fn send_data(&self, data: impl Into<Bytes>, end_stream: bool) -> Result<()> {
        let id = self.id;
        let mut data = data.into();
        let mut guard = self.shared.lock();
        self.shared.wait_until(&mut guard, None, |inner| {
            let sent = inner.conn.send_data(id, &mut data, end_stream)?;
            if data.is_empty() {
                return Ok(Some(()));
            }
            if sent == 0 {
                trace!(stream_id = id, remaining = data.len(), "waiting for window");
            }
            Ok(None)
        })
    }

    /// Wait for the next event of the stream
    ///
    /// `Ok(None)` once the server has finished the stream and every event
    /// was taken. A reset stream fails with [`Error::Cancelled`].
    pub fn recv(&self) -> Result<Option<StreamEvent>> {
        self.recv_until(None)
    }

    /// Like [`Self::recv`], failing with [`Error::Timeout`] after `timeout`
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<StreamEvent>> {
        self.recv_until(Some(Instant::now() + timeout))
    }

    fn recv_until(&self, deadline: Option<Instant>) -> Result<Option<StreamEvent>> {
        let id = self.id;
        let mut guard = self.shared.lock();
        self.shared.wait_until(&mut guard, deadline, |inner| {
            match inner.conn.poll_stream(id)? {
                Some(event) => Ok(Some(Some(event))),
                None if inner.conn.is_stream_finished(id) => Ok(Some(None)),
                None if inner.conn.is_closed() => Err(Error::ConnectionClosed),
                None => Ok(None),
            }
        })
    }

    /// Read every remaining event, concatenating DATA payloads
    ///
    /// Header blocks received on the way are returned in order.
    pub fn read_to_end(&self) -> Result<(Vec<Vec<HeaderField>>, Bytes)> {
        let mut headers = Vec::new();
        let mut body = Vec::new();
        while let Some(event) = self.recv()? {
            match event {
                StreamEvent::Headers { fields, .. } => headers.push(fields),
                StreamEvent::Data { data, .. } => body.extend_from_slice(&data),
            }
        }
        Ok((headers, Bytes::from(body)))
    }

    /// Reset the stream
    pub fn reset(&self, code: ErrorCode) -> Result<()> {
        let result = self.shared.lock().conn.reset_stream(self.id, code);
        self.shared.changed.notify_all();
        result
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.shared.lock().conn.release_stream(self.id);
        // A concurrency slot may have opened up
        self.shared.changed.notify_all();
    }
}
