//! Client-side request encoding for the memcache ASCII protocol.
//!
//! Commands are encoded as discrete wire segments (`Bytes`) so that a
//! connection's send queue can interleave formatted header lines with
//! caller-owned value bodies without copying the bodies: a storage command
//! is `header` + `value` + CRLF, three segments, and only the header is
//! freshly allocated.

use bytes::{BufMut, Bytes, BytesMut};

/// Storage command family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageVerb {
    Set,
    Add,
    Replace,
    Append,
    Prepend,
    Cas,
}

impl StorageVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageVerb::Set => "set",
            StorageVerb::Add => "add",
            StorageVerb::Replace => "replace",
            StorageVerb::Append => "append",
            StorageVerb::Prepend => "prepend",
            StorageVerb::Cas => "cas",
        }
    }
}

/// Retrieval command family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalVerb {
    Get,
    Gets,
}

/// INCR/DECR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterVerb {
    Incr,
    Decr,
}

/// Commands sent to every server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastVerb {
    Version,
    Stats,
    FlushAll,
}

impl BroadcastVerb {
    /// The full command line including CRLF.
    pub fn line(&self) -> Bytes {
        match self {
            BroadcastVerb::Version => Bytes::from_static(b"version\r\n"),
            BroadcastVerb::Stats => Bytes::from_static(b"stats\r\n"),
            BroadcastVerb::FlushAll => Bytes::from_static(b"flush_all\r\n"),
        }
    }
}

/// `\r\n`
#[inline]
pub fn crlf() -> Bytes {
    Bytes::from_static(b"\r\n")
}

/// A single space, used to join coalesced retrieval keys.
#[inline]
pub fn space() -> Bytes {
    Bytes::from_static(b" ")
}

/// `get` / `gets` without trailing space or CRLF; the pool appends
/// ` <key>` segments and a final CRLF.
#[inline]
pub fn retrieval_prefix(verb: RetrievalVerb) -> Bytes {
    match verb {
        RetrievalVerb::Get => Bytes::from_static(b"get"),
        RetrievalVerb::Gets => Bytes::from_static(b"gets"),
    }
}

/// `quit\r\n`
#[inline]
pub fn quit_line() -> Bytes {
    Bytes::from_static(b"quit\r\n")
}

/// `<verb> <key> <flags> <exptime> <bytes>[ <cas>][ noreply]\r\n`
///
/// The value body and its trailing CRLF are separate segments.
pub fn storage_header(
    verb: StorageVerb,
    key: &[u8],
    flags: u32,
    exptime: i64,
    value_len: usize,
    cas: Option<u64>,
    noreply: bool,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(key.len() + 64);
    buf.put_slice(verb.as_str().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(key);
    put_number(&mut buf, flags);
    put_number(&mut buf, exptime);
    put_number(&mut buf, value_len);
    if let Some(cas) = cas {
        put_number(&mut buf, cas);
    }
    if noreply {
        buf.put_slice(b" noreply");
    }
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// `delete <key>[ noreply]\r\n`
pub fn delete_line(key: &[u8], noreply: bool) -> Bytes {
    command_line(b"delete ", key, None, noreply)
}

/// `touch <key> <exptime>[ noreply]\r\n`
pub fn touch_line(key: &[u8], exptime: i64, noreply: bool) -> Bytes {
    command_line(b"touch ", key, Some(Numeric::Signed(exptime)), noreply)
}

/// `incr|decr <key> <delta>[ noreply]\r\n`
pub fn counter_line(verb: CounterVerb, key: &[u8], delta: u64, noreply: bool) -> Bytes {
    let prefix: &[u8] = match verb {
        CounterVerb::Incr => b"incr ",
        CounterVerb::Decr => b"decr ",
    };
    command_line(prefix, key, Some(Numeric::Unsigned(delta)), noreply)
}

enum Numeric {
    Signed(i64),
    Unsigned(u64),
}

fn command_line(prefix: &[u8], key: &[u8], arg: Option<Numeric>, noreply: bool) -> Bytes {
    let mut buf = BytesMut::with_capacity(prefix.len() + key.len() + 32);
    buf.put_slice(prefix);
    buf.put_slice(key);
    match arg {
        Some(Numeric::Signed(n)) => put_number(&mut buf, n),
        Some(Numeric::Unsigned(n)) => put_number(&mut buf, n),
        None => {}
    }
    if noreply {
        buf.put_slice(b" noreply");
    }
    buf.put_slice(b"\r\n");
    buf.freeze()
}

#[inline]
fn put_number(buf: &mut BytesMut, n: impl itoa::Integer) {
    let mut scratch = itoa::Buffer::new();
    buf.put_u8(b' ');
    buf.put_slice(scratch.format(n).as_bytes());
}
