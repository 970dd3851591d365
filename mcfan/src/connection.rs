//! One connection to one memcache server.
//!
//! A connection owns its socket, the outgoing segment queue, the queue of
//! request keys awaiting replies, the receive buffer, and the streaming
//! reader that fills the per-connection result lists. Connects are lazy:
//! `init` only resolves the address, and the socket is established on first
//! use (or re-established after the dead cool-down elapses).

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use mcfan_proto::{ParseError, ParseMode, Progress, ResponseReader, quit_line};

use crate::sendq::SendQueue;

/// Outcome of running the reader over the buffered bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessStatus {
    /// The response is fully parsed.
    Complete,
    /// More bytes are needed.
    Incomplete,
    /// Unparseable reply; the connection should be retired with a retry
    /// delay.
    Protocol,
    /// The server replied `SERVER_ERROR`; retire with zero delay.
    ServerError,
}

pub struct Connection {
    name: String,
    addrs: Vec<SocketAddr>,
    stream: Option<TcpStream>,
    dead_until: Instant,
    connect_timeout: Duration,

    send_queue: SendQueue,
    request_keys: VecDeque<Bytes>,
    recv_buf: BytesMut,
    pub(crate) reader: ResponseReader,

    /// Command units queued this operation, noreply included.
    pub(crate) send_units: usize,
    /// Reply units to receive this operation; zero for all-noreply batches.
    pub(crate) recv_units: usize,
}

impl Connection {
    /// Resolve `host:port` and set up an unconnected slot. The second
    /// element reports whether resolution produced at least one address; a
    /// connection that failed to resolve stays permanently unusable.
    pub(crate) fn open(
        host: &str,
        port: u16,
        alias: Option<&str>,
        connect_timeout: Duration,
    ) -> (Self, bool) {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map(Iterator::collect)
            .unwrap_or_default();
        let ok = !addrs.is_empty();
        let name = match alias {
            Some(alias) => alias.to_owned(),
            None => format!("{host}:{port}"),
        };
        let conn = Self {
            name,
            addrs,
            stream: None,
            dead_until: Instant::now(),
            connect_timeout,
            send_queue: SendQueue::default(),
            request_keys: VecDeque::new(),
            recv_buf: BytesMut::new(),
            reader: ResponseReader::new(),
            send_units: 0,
            recv_units: 0,
        };
        (conn, ok)
    }

    /// Server identity: the configured alias or `host:port`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a usable socket exists right now.
    pub fn alive(&self) -> bool {
        self.stream.is_some()
    }

    /// Raw descriptor for readiness polling; -1 when unconnected.
    pub fn socket_fd(&self) -> RawFd {
        self.stream.as_ref().map_or(-1, AsRawFd::as_raw_fd)
    }

    /// Attempt a connect if the cool-down has elapsed. Returns whether a
    /// usable socket exists afterwards.
    pub fn try_reconnect(&mut self) -> bool {
        if self.stream.is_some() {
            return true;
        }
        if Instant::now() < self.dead_until {
            return false;
        }
        for addr in &self.addrs {
            if let Ok(stream) = TcpStream::connect_timeout(addr, self.connect_timeout) {
                let _ = stream.set_nodelay(true);
                if stream.set_nonblocking(true).is_ok() {
                    self.stream = Some(stream);
                    return true;
                }
            }
        }
        false
    }

    /// Close the socket and start the cool-down.
    pub fn mark_dead(&mut self, delay: Duration) {
        self.stream = None;
        self.dead_until = Instant::now() + delay;
    }

    pub(crate) fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    /// Queue an outgoing wire segment (zero-copy for shared `Bytes`).
    pub(crate) fn push_segment(&mut self, segment: Bytes) {
        self.send_queue.push(segment);
    }

    /// Enqueue a key that expects a reply, in send order.
    pub(crate) fn add_request_key(&mut self, key: Bytes) {
        self.request_keys.push_back(key);
    }

    pub(crate) fn request_key_count(&self) -> usize {
        self.request_keys.len()
    }

    pub(crate) fn set_parse_mode(&mut self, mode: ParseMode) {
        self.reader.set_mode(mode);
    }

    /// Dispatch is done for this connection: from here on the counter means
    /// replies to receive, not commands to send.
    pub(crate) fn begin_recv_phase(&mut self) {
        self.recv_units = self.request_keys.len();
        self.reader.set_expected(self.recv_units);
    }

    /// Broadcast commands expect one response unit and queue no request key.
    pub(crate) fn expect_one_reply(&mut self) {
        self.recv_units = 1;
        self.reader.set_expected(1);
    }

    /// Flush queued segments. Returns bytes still queued (0 = all sent);
    /// would-block is not an error.
    pub(crate) fn send(&mut self) -> io::Result<usize> {
        match self.stream.as_mut() {
            Some(stream) => self.send_queue.write_to(stream),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    /// Read once into the receive buffer. Returns bytes read; 0 means EOF.
    pub(crate) fn recv(&mut self) -> io::Result<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        let mut chunk = [0u8; 8192];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => return Ok(0),
                Ok(n) => {
                    self.recv_buf.extend_from_slice(&chunk[..n]);
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Run the reader over whatever has been received so far.
    pub(crate) fn process(&mut self) -> ProcessStatus {
        match self.reader.drive(&mut self.recv_buf, &mut self.request_keys) {
            Ok(Progress::Complete) => ProcessStatus::Complete,
            Ok(Progress::Incomplete) => ProcessStatus::Incomplete,
            Err(ParseError::Server) => ProcessStatus::ServerError,
            Err(_) => ProcessStatus::Protocol,
        }
    }

    /// Drop all per-operation state. The socket and cool-down survive.
    pub(crate) fn reset(&mut self) {
        self.send_queue.clear();
        self.request_keys.clear();
        self.recv_buf.clear();
        self.reader.reset();
        self.send_units = 0;
        self.recv_units = 0;
    }

    /// Best-effort `quit` then close. The next use reconnects immediately.
    pub(crate) fn quit(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.set_nonblocking(false);
            let _ = stream.write_all(&quit_line());
        }
        self.dead_until = Instant::now();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("alive", &self.alive())
            .field("send_units", &self.send_units)
            .field("recv_units", &self.recv_units)
            .finish()
    }
}
