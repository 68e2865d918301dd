//! Shared helpers for the integration tests

#![allow(dead_code)]

use h2mux::http::h2::{
    Connection, ConnectionConfig, Event, Frame, FrameParser, FrameSerializer, HeaderField,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Once;
use std::thread::{self, JoinHandle};
use std::time::Duration;

static TRACING: Once = Once::new();

/// Install a test-friendly subscriber; `RUST_LOG` selects the level
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Move queued output of `from` into `to`
pub fn pump(from: &mut Connection, to: &mut Connection) {
    let bytes = from.take_output();
    if !bytes.is_empty() {
        to.receive(&bytes).unwrap();
    }
}

/// Shuttle bytes both ways until neither side has anything to send
pub fn settle(client: &mut Connection, server: &mut Connection) {
    for _ in 0..64 {
        if !client.has_output() && !server.has_output() {
            return;
        }
        pump(client, server);
        pump(server, client);
    }
    panic!("connections did not settle");
}

/// Start both ends and complete the SETTINGS exchange
pub fn handshake(client: ConnectionConfig, server: ConnectionConfig) -> (Connection, Connection) {
    let mut client = Connection::client(client);
    let mut server = Connection::server(server);
    client.start().unwrap();
    server.start().unwrap();
    settle(&mut client, &mut server);
    assert!(client.is_ready() && server.is_ready());
    drain_events(&mut client);
    drain_events(&mut server);
    (client, server)
}

pub fn default_handshake() -> (Connection, Connection) {
    handshake(ConnectionConfig::default(), ConnectionConfig::default())
}

pub fn drain_events(conn: &mut Connection) -> Vec<Event> {
    std::iter::from_fn(|| conn.poll_event()).collect()
}

/// Raw bytes of a frame
pub fn wire(frame: Frame) -> Vec<u8> {
    FrameSerializer::serialize(&frame).unwrap().to_vec()
}

/// Parse every frame in `bytes`, accepting any size
pub fn frames(bytes: &[u8]) -> Vec<Frame> {
    FrameParser::with_max_frame_size(16_777_215).feed(bytes).unwrap()
}

pub fn get(path: &str) -> Vec<HeaderField> {
    vec![
        HeaderField::new(":method", "GET"),
        HeaderField::new(":path", path.to_string()),
        HeaderField::new(":scheme", "http"),
        HeaderField::new(":authority", "localhost"),
    ]
}

pub fn status(code: u16) -> Vec<HeaderField> {
    vec![HeaderField::new(":status", code.to_string())]
}

/// What a scripted server does with one completed read
pub type Handler = Box<dyn FnMut(&mut Connection) + Send>;

/// Run a sans-I/O server over a loopback TCP socket
///
/// `handler` runs after every read so it can answer streams; the server
/// stops when the peer hangs up or the connection closes.
pub fn spawn_server(config: ConnectionConfig, mut handler: Handler) -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        serve(stream, config, &mut handler);
    });
    (port, handle)
}

pub fn serve<S: Read + Write>(mut stream: S, config: ConnectionConfig, handler: &mut Handler) {
    let mut conn = Connection::server(config);
    conn.start().unwrap();
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let out = conn.take_output();
        if !out.is_empty() && stream.write_all(&out).is_err() {
            return;
        }
        if conn.is_closed() {
            return;
        }
        let n = match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        if conn.receive(&buf[..n]).is_err() {
            let _ = stream.write_all(&conn.take_output());
            return;
        }
        handler(&mut conn);
    }
}

pub fn tcp(port: u16) -> TcpStream {
    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.set_nodelay(true).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}
