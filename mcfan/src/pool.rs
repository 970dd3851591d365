//! Request orchestration over the connection set.
//!
//! Every operation runs the same three phases:
//!
//! 1. **dispatch** — validate keys, route each to a connection, append the
//!    encoded command to that connection's send queue, and mark connections
//!    with queued work as active;
//! 2. **wait** — a `poll(2)` loop over the active sockets until each is
//!    satisfied or retired, with errors attributed to the offending
//!    connection;
//! 3. **collect** — drain the per-connection result lists, then `reset`.
//!
//! The phase methods are public so adapter layers can collect surviving
//! results from a partially failed batch; [`Client`](crate::Client) wraps
//! them into plain `Result`s.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use mcfan_proto::{
    BroadcastResult, BroadcastVerb, CounterVerb, MessageResult, ParseMode, RetrievalResult,
    RetrievalVerb, StorageVerb, counter_line, crlf, delete_line, is_valid_key, retrieval_prefix,
    space, storage_header, touch_line,
};

use crate::config::{Config, ServerSpec};
use crate::connection::{Connection, ProcessStatus};
use crate::error::ErrorCode;
use crate::selector::Selector;

/// One item of a storage batch.
///
/// The value is `Bytes` so dispatch can queue it for the socket without
/// copying the body.
#[derive(Clone, Debug)]
pub struct StoreItem<'a> {
    pub key: &'a [u8],
    pub value: Bytes,
    pub flags: u32,
    /// CAS token; only read by the `cas` verb.
    pub cas: u64,
}

impl<'a> StoreItem<'a> {
    pub fn new(key: &'a [u8], value: impl Into<Bytes>) -> Self {
        Self {
            key,
            value: value.into(),
            flags: 0,
            cas: 0,
        }
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }
}

pub struct ConnectionPool {
    conns: Vec<Connection>,
    selector: Selector,
    /// Connection indices with queued work this operation.
    active: Vec<usize>,
    /// Active connections not yet satisfied or retired.
    n_active: usize,
    n_invalid_key: usize,

    poll_timeout_ms: i32,
    connect_timeout: Duration,
    retry_timeout: Duration,
}

impl ConnectionPool {
    pub fn new(config: &Config) -> Self {
        Self {
            conns: Vec::new(),
            selector: Selector::new(config.hasher),
            active: Vec::new(),
            n_active: 0,
            n_invalid_key: 0,
            poll_timeout_ms: config.poll_timeout_ms,
            connect_timeout: Duration::from_millis(config.connect_timeout_ms.max(1)),
            retry_timeout: Duration::from_millis(config.retry_timeout_ms),
        }
    }

    /// Replace the server set. Connections are resolved but not connected;
    /// returns the number of endpoints that failed to resolve.
    pub fn init(&mut self, servers: &[ServerSpec]) -> usize {
        self.conns.clear();
        self.selector.reset();
        self.active.clear();
        self.n_active = 0;
        self.n_invalid_key = 0;

        let mut failures = 0;
        for spec in servers {
            let (conn, ok) = Connection::open(
                &spec.host,
                spec.port,
                spec.alias.as_deref(),
                self.connect_timeout,
            );
            if !ok {
                failures += 1;
            }
            self.conns.push(conn);
        }

        let nodes: Vec<(String, u32)> = servers
            .iter()
            .map(|spec| (spec.identity(), spec.weight))
            .collect();
        self.selector.rebuild(&nodes);
        failures
    }

    pub fn set_failover(&mut self, enabled: bool) {
        self.selector.set_failover(enabled);
    }

    pub fn set_hasher(&mut self, hasher: ketama::Hasher) {
        self.selector.set_hasher(hasher);
    }

    pub fn set_poll_timeout(&mut self, timeout_ms: i32) {
        self.poll_timeout_ms = timeout_ms;
    }

    pub fn set_connect_timeout(&mut self, timeout_ms: u64) {
        self.connect_timeout = Duration::from_millis(timeout_ms.max(1));
        for conn in &mut self.conns {
            conn.set_connect_timeout(self.connect_timeout);
        }
    }

    pub fn set_retry_timeout(&mut self, timeout_ms: u64) {
        self.retry_timeout = Duration::from_millis(timeout_ms);
    }

    /// Ring-nominal server identity for `key`, ignoring liveness.
    pub fn server_address_by_key(&self, key: &[u8]) -> Option<&str> {
        let idx = self.selector.select(key, false, |_| true)?;
        Some(self.conns[idx].name())
    }

    /// Identities of all configured servers, in init order.
    pub fn server_names(&self) -> Vec<&str> {
        self.conns.iter().map(Connection::name).collect()
    }

    /// Liveness flags of all configured servers, in init order.
    pub fn server_alive(&self) -> Vec<bool> {
        self.conns.iter().map(Connection::alive).collect()
    }

    // -- Dispatch ------------------------------------------------------------

    /// Route `key`, probing (and lazily reconnecting) the chosen server.
    fn conn_for_key(&mut self, key: &[u8]) -> Option<usize> {
        let Self {
            selector, conns, ..
        } = self;
        let idx = selector.select(key, true, |i| {
            let conn = &mut conns[i];
            conn.alive() || conn.try_reconnect()
        })?;
        let conn = &mut conns[idx];
        (conn.alive() || conn.try_reconnect()).then_some(idx)
    }

    pub fn dispatch_storage(
        &mut self,
        verb: StorageVerb,
        items: &[StoreItem<'_>],
        exptime: i64,
        noreply: bool,
    ) {
        for item in items {
            if !is_valid_key(item.key) {
                self.n_invalid_key += 1;
                continue;
            }
            let Some(idx) = self.conn_for_key(item.key) else {
                continue;
            };
            let key = Bytes::copy_from_slice(item.key);
            let cas = (verb == StorageVerb::Cas).then_some(item.cas);
            let header = storage_header(
                verb,
                &key,
                item.flags,
                exptime,
                item.value.len(),
                cas,
                noreply,
            );
            let conn = &mut self.conns[idx];
            conn.push_segment(header);
            conn.push_segment(item.value.clone());
            conn.push_segment(crlf());
            if !noreply {
                conn.add_request_key(key);
            }
            conn.send_units += 1;
        }
        self.activate(ParseMode::Counting);
    }

    pub fn dispatch_retrieval(&mut self, verb: RetrievalVerb, keys: &[&[u8]]) {
        for &key in keys {
            if !is_valid_key(key) {
                self.n_invalid_key += 1;
                continue;
            }
            let Some(idx) = self.conn_for_key(key) else {
                continue;
            };
            let conn = &mut self.conns[idx];
            if conn.send_units == 0 {
                conn.push_segment(retrieval_prefix(verb));
            }
            conn.send_units += 1;
            let key = Bytes::copy_from_slice(key);
            conn.push_segment(space());
            conn.push_segment(key.clone());
            conn.add_request_key(key);
        }
        for conn in &mut self.conns {
            if conn.send_units > 0 {
                conn.push_segment(crlf());
            }
        }
        self.activate(ParseMode::EndState);
    }

    pub fn dispatch_deletion(&mut self, keys: &[&[u8]], noreply: bool) {
        for &key in keys {
            if !is_valid_key(key) {
                self.n_invalid_key += 1;
                continue;
            }
            let Some(idx) = self.conn_for_key(key) else {
                continue;
            };
            let conn = &mut self.conns[idx];
            conn.push_segment(delete_line(key, noreply));
            if !noreply {
                conn.add_request_key(Bytes::copy_from_slice(key));
            }
            conn.send_units += 1;
        }
        self.activate(ParseMode::Counting);
    }

    pub fn dispatch_touch(&mut self, keys: &[&[u8]], exptime: i64, noreply: bool) {
        for &key in keys {
            if !is_valid_key(key) {
                self.n_invalid_key += 1;
                continue;
            }
            let Some(idx) = self.conn_for_key(key) else {
                continue;
            };
            let conn = &mut self.conns[idx];
            conn.push_segment(touch_line(key, exptime, noreply));
            if !noreply {
                conn.add_request_key(Bytes::copy_from_slice(key));
            }
            conn.send_units += 1;
        }
        self.activate(ParseMode::Counting);
    }

    /// INCR/DECR is single-key by protocol.
    pub fn dispatch_counter(&mut self, verb: CounterVerb, key: &[u8], delta: u64, noreply: bool) {
        if !is_valid_key(key) {
            self.n_invalid_key += 1;
            return;
        }
        let Some(idx) = self.conn_for_key(key) else {
            return;
        };
        let conn = &mut self.conns[idx];
        conn.push_segment(counter_line(verb, key, delta, noreply));
        if !noreply {
            conn.add_request_key(Bytes::copy_from_slice(key));
        }
        conn.send_units += 1;
        self.activate(ParseMode::Counting);
    }

    /// Send one command line to every server, waking dead connections.
    pub fn dispatch_broadcast(&mut self, verb: BroadcastVerb) {
        let line = verb.line();
        // flush_all answers with a counted OK; version/stats end themselves.
        let mode = match verb {
            BroadcastVerb::FlushAll => ParseMode::Counting,
            _ => ParseMode::EndState,
        };
        for (idx, conn) in self.conns.iter_mut().enumerate() {
            if !conn.alive() && !conn.try_reconnect() {
                continue;
            }
            conn.push_segment(line.clone());
            conn.send_units += 1;
            conn.set_parse_mode(mode);
            conn.expect_one_reply();
            self.active.push(idx);
            self.n_active += 1;
        }
    }

    /// Mark connections with queued work active and flip their counter from
    /// send accounting to receive accounting.
    fn activate(&mut self, mode: ParseMode) {
        for (idx, conn) in self.conns.iter_mut().enumerate() {
            if conn.send_units == 0 {
                continue;
            }
            conn.set_parse_mode(mode);
            conn.begin_recv_phase();
            self.active.push(idx);
            self.n_active += 1;
        }
    }

    // -- Wait ----------------------------------------------------------------

    /// Drive every active connection to completion or death.
    ///
    /// Per-connection failures retire that connection and record the code;
    /// a poll-level failure or timeout retires every still-awaited
    /// connection and aborts the batch.
    pub fn wait_poll(&mut self) -> ErrorCode {
        if self.n_active == 0 {
            return if self.n_invalid_key > 0 {
                ErrorCode::InvalidKey
            } else {
                ErrorCode::McServer
            };
        }

        let mut fds: Vec<libc::pollfd> = self
            .active
            .iter()
            .map(|&idx| libc::pollfd {
                fd: self.conns[idx].socket_fd(),
                events: libc::POLLOUT,
                revents: 0,
            })
            .collect();

        let mut code = ErrorCode::Ok;
        while self.n_active > 0 {
            let rv = unsafe {
                libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, self.poll_timeout_ms)
            };
            if rv < 0 {
                if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                self.mark_dead_awaited(&fds);
                return ErrorCode::Poll;
            }
            if rv == 0 {
                // A silent server poisons its connection: reset all awaited
                // sockets so the next request starts clean.
                self.mark_dead_awaited(&fds);
                return ErrorCode::PollTimeout;
            }

            for slot in 0..fds.len() {
                if fds[slot].fd < 0 {
                    continue;
                }
                let revents = fds[slot].revents;
                if revents == 0 {
                    continue;
                }
                let idx = self.active[slot];

                if revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
                    self.retire(slot, &mut fds, self.retry_timeout);
                    code = ErrorCode::ConnPoll;
                    continue;
                }

                if revents & libc::POLLOUT != 0 {
                    match self.conns[idx].send() {
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                        Err(_) => {
                            self.retire(slot, &mut fds, Duration::ZERO);
                            code = ErrorCode::Send;
                            continue;
                        }
                        Ok(remaining) => {
                            // Replies may start before the queue drains.
                            fds[slot].events |= libc::POLLIN;
                            if remaining == 0 {
                                fds[slot].events &= !libc::POLLOUT;
                                if self.conns[idx].recv_units == 0 {
                                    // All units were noreply: send-only.
                                    self.finish(slot, &mut fds);
                                    continue;
                                }
                            }
                        }
                    }
                }

                if revents & libc::POLLIN != 0 {
                    match self.conns[idx].recv() {
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                        Ok(0) | Err(_) => {
                            self.retire(slot, &mut fds, Duration::ZERO);
                            code = ErrorCode::Recv;
                        }
                        Ok(_) => match self.conns[idx].process() {
                            ProcessStatus::Complete => self.finish(slot, &mut fds),
                            ProcessStatus::Incomplete => {}
                            ProcessStatus::Protocol => {
                                self.retire(slot, &mut fds, self.retry_timeout);
                                code = ErrorCode::Programming;
                            }
                            ProcessStatus::ServerError => {
                                self.retire(slot, &mut fds, Duration::ZERO);
                                code = ErrorCode::McServer;
                            }
                        },
                    }
                }
            }
        }
        code
    }

    /// Retire a connection mid-wait: kill the socket, start its cool-down,
    /// and stop polling it.
    fn retire(&mut self, slot: usize, fds: &mut [libc::pollfd], delay: Duration) {
        let idx = self.active[slot];
        self.conns[idx].mark_dead(delay);
        fds[slot].fd = -1;
        fds[slot].events = 0;
        self.n_active -= 1;
    }

    /// A connection finished cleanly; stop polling it.
    fn finish(&mut self, slot: usize, fds: &mut [libc::pollfd]) {
        fds[slot].fd = -1;
        fds[slot].events = 0;
        self.n_active -= 1;
    }

    /// Batch-fatal poll failure: kill every connection still being awaited.
    fn mark_dead_awaited(&mut self, fds: &[libc::pollfd]) {
        for (slot, pfd) in fds.iter().enumerate() {
            if pfd.fd >= 0 && pfd.events & (libc::POLLIN | libc::POLLOUT) != 0 {
                let idx = self.active[slot];
                self.conns[idx].mark_dead(Duration::ZERO);
            }
        }
    }

    // -- Collect -------------------------------------------------------------

    /// Completed retrieval records from all active connections. Records
    /// whose value body never finished are dropped.
    pub fn collect_retrievals(&mut self, out: &mut Vec<RetrievalResult>) {
        for i in 0..self.active.len() {
            let conn = &mut self.conns[self.active[i]];
            out.extend(
                conn.reader
                    .retrievals
                    .drain(..)
                    .filter(|r| r.bytes_remain == 0),
            );
        }
    }

    /// Message results in connection-iteration order; within a connection,
    /// replies align with the keys dispatched to it.
    pub fn collect_messages(&mut self, out: &mut Vec<MessageResult>) {
        for i in 0..self.active.len() {
            let conn = &mut self.conns[self.active[i]];
            out.append(&mut conn.reader.messages);
        }
    }

    /// The single INCR/DECR reply. `None` for NOT_FOUND (or when nothing
    /// was dispatched).
    pub fn collect_unsigned(&mut self) -> Option<u64> {
        if self.active.len() != 1 {
            return None;
        }
        let conn = &self.conns[self.active[0]];
        conn.reader.numerics.first().copied()
    }

    /// Per-host line bundles for every configured server, dead ones
    /// included (with empty lines).
    pub fn collect_broadcasts(&mut self, out: &mut Vec<BroadcastResult>) {
        for conn in &mut self.conns {
            out.push(BroadcastResult {
                host: conn.name().to_owned(),
                lines: conn.reader.lines.drain(..).collect(),
            });
        }
    }

    /// Clear per-operation state on every touched connection. Sockets and
    /// dead/alive status survive for the next operation.
    pub fn reset(&mut self) {
        let active = std::mem::take(&mut self.active);
        for idx in active {
            self.conns[idx].reset();
        }
        self.n_active = 0;
        self.n_invalid_key = 0;
    }

    /// Politely close every connection.
    pub fn quit_all(&mut self) {
        for conn in &mut self.conns {
            conn.quit();
        }
    }
}
