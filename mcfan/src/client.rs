//! Public command surface.
//!
//! A [`Client`] owns one [`ConnectionPool`] and must not be shared across
//! threads; run one client per thread and let ketama keep their key
//! placement identical. Batch commands return the collected results, with
//! missing entries standing for keys whose server was unavailable.

use bytes::Bytes;
use ketama::Hasher;
use mcfan_proto::{
    BroadcastResult, BroadcastVerb, CounterVerb, MessageResult, RetrievalResult, RetrievalVerb,
    StorageVerb,
};

use crate::config::{Config, ServerSpec};
use crate::error::Error;
use crate::pool::{ConnectionPool, StoreItem};

pub struct Client {
    pool: ConnectionPool,
}

impl Client {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            pool: ConnectionPool::new(&config),
        }
    }

    /// Replace the server set and failover policy. Returns the number of
    /// endpoints that failed to resolve; those servers stay configured but
    /// can never connect.
    pub fn init(&mut self, servers: &[ServerSpec], failover: bool) -> usize {
        self.pool.set_failover(failover);
        self.pool.init(servers)
    }

    // -- Configuration -------------------------------------------------------

    pub fn set_poll_timeout(&mut self, timeout_ms: i32) {
        self.pool.set_poll_timeout(timeout_ms);
    }

    pub fn set_connect_timeout(&mut self, timeout_ms: u64) {
        self.pool.set_connect_timeout(timeout_ms);
    }

    pub fn set_retry_timeout(&mut self, timeout_ms: u64) {
        self.pool.set_retry_timeout(timeout_ms);
    }

    /// Select the key hash function. Takes effect at the next [`init`],
    /// which rebuilds the ring.
    ///
    /// [`init`]: Client::init
    pub fn set_hash_function(&mut self, hasher: Hasher) {
        self.pool.set_hasher(hasher);
    }

    // -- Introspection -------------------------------------------------------

    /// Ring-nominal server for `key`, ignoring liveness.
    pub fn server_address_by_key(&self, key: &[u8]) -> Option<&str> {
        self.pool.server_address_by_key(key)
    }

    pub fn server_names(&self) -> Vec<&str> {
        self.pool.server_names()
    }

    pub fn server_alive(&self) -> Vec<bool> {
        self.pool.server_alive()
    }

    /// Direct access to the pool phases, for adapters that need partial
    /// results from failed batches.
    pub fn pool_mut(&mut self) -> &mut ConnectionPool {
        &mut self.pool
    }

    // -- Retrieval -----------------------------------------------------------

    /// Fetch values for a batch of keys. Misses and unroutable keys are
    /// simply absent from the result.
    pub fn get(&mut self, keys: &[&[u8]]) -> Result<Vec<RetrievalResult>, Error> {
        self.pool.dispatch_retrieval(RetrievalVerb::Get, keys);
        self.finish_retrieval()
    }

    /// Like [`get`], with CAS tokens in the results.
    ///
    /// [`get`]: Client::get
    pub fn gets(&mut self, keys: &[&[u8]]) -> Result<Vec<RetrievalResult>, Error> {
        self.pool.dispatch_retrieval(RetrievalVerb::Gets, keys);
        self.finish_retrieval()
    }

    // -- Storage -------------------------------------------------------------

    pub fn set(
        &mut self,
        items: &[StoreItem<'_>],
        exptime: i64,
        noreply: bool,
    ) -> Result<Vec<MessageResult>, Error> {
        self.store(StorageVerb::Set, items, exptime, noreply)
    }

    pub fn add(
        &mut self,
        items: &[StoreItem<'_>],
        exptime: i64,
        noreply: bool,
    ) -> Result<Vec<MessageResult>, Error> {
        self.store(StorageVerb::Add, items, exptime, noreply)
    }

    pub fn replace(
        &mut self,
        items: &[StoreItem<'_>],
        exptime: i64,
        noreply: bool,
    ) -> Result<Vec<MessageResult>, Error> {
        self.store(StorageVerb::Replace, items, exptime, noreply)
    }

    pub fn append(
        &mut self,
        items: &[StoreItem<'_>],
        exptime: i64,
        noreply: bool,
    ) -> Result<Vec<MessageResult>, Error> {
        self.store(StorageVerb::Append, items, exptime, noreply)
    }

    pub fn prepend(
        &mut self,
        items: &[StoreItem<'_>],
        exptime: i64,
        noreply: bool,
    ) -> Result<Vec<MessageResult>, Error> {
        self.store(StorageVerb::Prepend, items, exptime, noreply)
    }

    /// Compare-and-swap; each item's `cas` field carries the token from a
    /// prior [`gets`](Client::gets).
    pub fn cas(
        &mut self,
        items: &[StoreItem<'_>],
        exptime: i64,
        noreply: bool,
    ) -> Result<Vec<MessageResult>, Error> {
        self.store(StorageVerb::Cas, items, exptime, noreply)
    }

    // -- Deletion / touch ----------------------------------------------------

    pub fn delete(&mut self, keys: &[&[u8]], noreply: bool) -> Result<Vec<MessageResult>, Error> {
        self.pool.dispatch_deletion(keys, noreply);
        self.finish_messages()
    }

    pub fn touch(
        &mut self,
        keys: &[&[u8]],
        exptime: i64,
        noreply: bool,
    ) -> Result<Vec<MessageResult>, Error> {
        self.pool.dispatch_touch(keys, exptime, noreply);
        self.finish_messages()
    }

    // -- Counters ------------------------------------------------------------

    /// Increment; `Ok(None)` when the key does not exist (or noreply).
    pub fn incr(&mut self, key: &[u8], delta: u64, noreply: bool) -> Result<Option<u64>, Error> {
        self.pool.dispatch_counter(CounterVerb::Incr, key, delta, noreply);
        self.finish_counter()
    }

    /// Decrement; `Ok(None)` when the key does not exist (or noreply).
    pub fn decr(&mut self, key: &[u8], delta: u64, noreply: bool) -> Result<Option<u64>, Error> {
        self.pool.dispatch_counter(CounterVerb::Decr, key, delta, noreply);
        self.finish_counter()
    }

    // -- Broadcast -----------------------------------------------------------

    /// Version string from every server.
    pub fn version(&mut self) -> Result<Vec<BroadcastResult>, Error> {
        self.pool.dispatch_broadcast(BroadcastVerb::Version);
        self.finish_broadcast()
    }

    /// `STAT` lines from every server.
    pub fn stats(&mut self) -> Result<Vec<BroadcastResult>, Error> {
        self.pool.dispatch_broadcast(BroadcastVerb::Stats);
        self.finish_broadcast()
    }

    /// Flush every server. One OK message per reachable server.
    pub fn flush_all(&mut self) -> Result<Vec<MessageResult>, Error> {
        self.pool.dispatch_broadcast(BroadcastVerb::FlushAll);
        self.finish_messages()
    }

    /// Politely close every connection; the next command reconnects.
    pub fn quit(&mut self) {
        self.pool.quit_all();
    }

    // -- Phase plumbing ------------------------------------------------------

    fn finish_retrieval(&mut self) -> Result<Vec<RetrievalResult>, Error> {
        let code = self.pool.wait_poll();
        let mut out = Vec::new();
        self.pool.collect_retrievals(&mut out);
        self.pool.reset();
        code.into_result().map(|()| out)
    }

    fn finish_messages(&mut self) -> Result<Vec<MessageResult>, Error> {
        let code = self.pool.wait_poll();
        let mut out = Vec::new();
        self.pool.collect_messages(&mut out);
        self.pool.reset();
        code.into_result().map(|()| out)
    }

    fn finish_counter(&mut self) -> Result<Option<u64>, Error> {
        let code = self.pool.wait_poll();
        let value = self.pool.collect_unsigned();
        self.pool.reset();
        code.into_result().map(|()| value)
    }

    fn finish_broadcast(&mut self) -> Result<Vec<BroadcastResult>, Error> {
        let code = self.pool.wait_poll();
        let mut out = Vec::new();
        self.pool.collect_broadcasts(&mut out);
        self.pool.reset();
        code.into_result().map(|()| out)
    }

    fn store(
        &mut self,
        verb: StorageVerb,
        items: &[StoreItem<'_>],
        exptime: i64,
        noreply: bool,
    ) -> Result<Vec<MessageResult>, Error> {
        self.pool.dispatch_storage(verb, items, exptime, noreply);
        self.finish_messages()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience: one-line construction of a storage batch from parallel
/// slices, the shape C adapters hand over.
pub fn store_items<'a>(
    keys: &[&'a [u8]],
    values: &[Bytes],
    flags: &[u32],
) -> Vec<StoreItem<'a>> {
    keys.iter()
        .zip(values)
        .zip(flags)
        .map(|((&key, value), &flags)| StoreItem::new(key, value.clone()).flags(flags))
        .collect()
}
