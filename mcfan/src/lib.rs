//! Fan-out memcache client.
//!
//! mcfan speaks the memcache ASCII protocol to a fixed set of servers,
//! routing each key with a ketama consistent-hash ring and multiplexing
//! the selected sockets with a single-threaded `poll(2)` loop. Responses
//! are parsed incrementally by per-connection streaming readers, so a
//! value split across reads costs no extra copies or buffering policy.
//!
//! A client instance is strictly single-threaded: at most one operation
//! runs at a time and the readiness poll is its only suspension point.
//! Failed servers are observed lazily — a connection marked dead cools
//! down for the retry timeout and is reconnected on the next use.
//!
//! # Example
//!
//! ```no_run
//! use mcfan::{Client, ServerSpec, StoreItem};
//!
//! let mut client = Client::new();
//! client.init(
//!     &[
//!         ServerSpec::new("127.0.0.1", 11211),
//!         ServerSpec::new("127.0.0.1", 11212),
//!     ],
//!     true, // failover
//! );
//!
//! client.set(&[StoreItem::new(b"hello", &b"world"[..])], 0, false)?;
//! let values = client.get(&[b"hello"])?;
//! assert_eq!(values[0].data, b"world");
//! # Ok::<(), mcfan::Error>(())
//! ```

mod client;
mod config;
mod connection;
mod error;
mod pool;
mod selector;
mod sendq;

pub use client::{Client, store_items};
pub use config::{
    Config, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_POLL_TIMEOUT_MS, DEFAULT_RETRY_TIMEOUT_MS,
    ServerSpec,
};
pub use connection::{Connection, ProcessStatus};
pub use error::{Error, ErrorCode};
pub use pool::{ConnectionPool, StoreItem};

// The codec types flow through the public surface.
pub use ketama::Hasher;
pub use mcfan_proto::{BroadcastResult, MessageKind, MessageResult, RetrievalResult};
