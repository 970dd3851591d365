//! Memcache ASCII wire codec.
//!
//! Client-side protocol support for a fan-out memcache client: request
//! encoding as discrete wire segments, key validation, and a streaming
//! response reader that turns incrementally arriving bytes into typed
//! result records.
//!
//! # Example
//!
//! ```
//! use std::collections::VecDeque;
//! use bytes::BytesMut;
//! use mcfan_proto::{ParseMode, Progress, ResponseReader};
//!
//! let mut reader = ResponseReader::new();
//! reader.set_mode(ParseMode::EndState);
//!
//! let mut buf = BytesMut::from(&b"VALUE mykey 0 5\r\nhello\r\nEND\r\n"[..]);
//! let mut request_keys = VecDeque::new();
//! let progress = reader.drive(&mut buf, &mut request_keys).unwrap();
//! assert_eq!(progress, Progress::Complete);
//! assert_eq!(reader.retrievals[0].data, b"hello");
//! ```

mod error;
mod key;
mod reader;
mod request;
mod result;

pub use error::ParseError;
pub use key::{MAX_KEY_LEN, is_valid_key};
pub use reader::{ParseMode, Progress, ResponseReader};
pub use request::{
    BroadcastVerb, CounterVerb, RetrievalVerb, StorageVerb, counter_line, crlf, delete_line,
    quit_line, retrieval_prefix, space, storage_header, touch_line,
};
pub use result::{BroadcastResult, MessageKind, MessageResult, RetrievalResult};
