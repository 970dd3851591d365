//! Typed result records produced by the response reader.
//!
//! All records own their byte memory; they outlive the receive buffer they
//! were parsed from and survive until the owning connection is reset.

use bytes::Bytes;

/// One `VALUE` block from a GET/GETS response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalResult {
    /// The key, as echoed by the server.
    pub key: Bytes,
    /// Client-defined flags stored with the item.
    pub flags: u32,
    /// CAS unique token. Zero when the server sent none (plain `get`).
    pub cas: u64,
    /// The value body.
    pub data: Vec<u8>,
    /// Body bytes still outstanding. Non-zero while the value arrives in
    /// pieces; collect phases skip records that are still incomplete.
    pub bytes_remain: usize,
}

/// The reply word of a storage/delete/touch response line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Stored,
    NotStored,
    Exists,
    NotFound,
    Deleted,
    Touched,
    Error,
    ClientError,
    ServerError,
    Ok,
}

/// A single reply line paired with the request key it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageResult {
    pub kind: MessageKind,
    /// The request key this reply answers, empty where the protocol implies
    /// none (broadcasts, error lines with no queued key).
    pub key: Bytes,
}

/// Per-host bundle returned by broadcast commands (`version`, `stats`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastResult {
    /// Server identity (`host:port` or the configured alias).
    pub host: String,
    /// Reply lines: the version payload, or one line per `STAT`.
    pub lines: Vec<Bytes>,
}
