//! Streaming response reader.
//!
//! One reader per connection. Bytes arrive in arbitrary chunks; the reader
//! consumes whole reply units from the front of the receive buffer and
//! appends typed records to its result lists. Two completion policies:
//!
//! - [`ParseMode::EndState`]: the response ends at a sentinel the server
//!   chooses — `END` for retrievals and stats, the single `VERSION` line for
//!   version. Used where the number of reply lines is server-determined.
//! - [`ParseMode::Counting`]: the response is exactly `expected` reply
//!   units, one per request key that expects a reply. Used for storage,
//!   delete, touch and incr/decr.
//!
//! A `VALUE` body that is only partially buffered is recorded immediately
//! with `bytes_remain > 0` and completed across later [`drive`] calls; the
//! unconsumed suffix of the buffer is left in place between calls.
//!
//! [`drive`]: ResponseReader::drive

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};

use crate::error::ParseError;
use crate::result::{MessageKind, MessageResult, RetrievalResult};

/// Completion policy for a response.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ParseMode {
    /// Terminated by a server-chosen sentinel line.
    #[default]
    EndState,
    /// Terminated after a fixed number of reply units.
    Counting,
}

/// Outcome of a successful drive call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    /// The response is fully parsed; consumed bytes have been released.
    Complete,
    /// More data is needed. Parser state and unconsumed bytes persist.
    Incomplete,
}

/// In-flight value body state, carried across drive calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Body {
    #[default]
    None,
    /// `remain` body bytes still to copy into the newest retrieval record.
    Data { remain: usize },
    /// Body complete; the trailing CRLF has not been consumed yet.
    Terminator,
}

/// Streaming parser state plus the result lists it fills.
#[derive(Debug, Default)]
pub struct ResponseReader {
    mode: ParseMode,
    /// Counting mode: reply units that make the response complete.
    expected: usize,
    /// Counting mode: reply units consumed so far.
    consumed: usize,
    /// EndState mode: sentinel seen.
    finished: bool,
    body: Body,

    pub retrievals: Vec<RetrievalResult>,
    pub messages: Vec<MessageResult>,
    pub numerics: Vec<u64>,
    pub lines: Vec<Bytes>,
}

impl ResponseReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the completion policy for the next response.
    pub fn set_mode(&mut self, mode: ParseMode) {
        self.mode = mode;
    }

    /// Counting mode: number of reply units to consume before completion.
    pub fn set_expected(&mut self, units: usize) {
        self.expected = units;
    }

    pub fn mode(&self) -> ParseMode {
        self.mode
    }

    /// Drop all results and parser state. Ready for the next operation.
    pub fn reset(&mut self) {
        self.mode = ParseMode::default();
        self.expected = 0;
        self.consumed = 0;
        self.finished = false;
        self.body = Body::None;
        self.retrievals.clear();
        self.messages.clear();
        self.numerics.clear();
        self.lines.clear();
    }

    /// Consume as much of `buf` as possible, pairing counting-mode replies
    /// FIFO with `request_keys`.
    ///
    /// Returns [`Progress::Complete`] once the response terminated,
    /// [`Progress::Incomplete`] when more bytes are needed, or an error for
    /// unrecognised input (`SERVER_ERROR` is surfaced as
    /// [`ParseError::Server`] after being recorded as a message result).
    pub fn drive(
        &mut self,
        buf: &mut BytesMut,
        request_keys: &mut VecDeque<Bytes>,
    ) -> Result<Progress, ParseError> {
        loop {
            match self.body {
                Body::Data { remain } => {
                    if remain > 0 {
                        if buf.is_empty() {
                            return Ok(Progress::Incomplete);
                        }
                        let take = remain.min(buf.len());
                        let chunk = buf.split_to(take);
                        let record = self
                            .retrievals
                            .last_mut()
                            .ok_or(ParseError::Protocol("value body without header"))?;
                        record.data.extend_from_slice(&chunk);
                        record.bytes_remain = remain - take;
                        if record.bytes_remain > 0 {
                            self.body = Body::Data {
                                remain: remain - take,
                            };
                            return Ok(Progress::Incomplete);
                        }
                    }
                    self.body = Body::Terminator;
                    continue;
                }
                Body::Terminator => {
                    if buf.len() < 2 {
                        return Ok(Progress::Incomplete);
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(ParseError::Protocol("missing value terminator"));
                    }
                    buf.advance(2);
                    self.body = Body::None;
                }
                Body::None => {}
            }

            if self.is_complete() {
                return Ok(Progress::Complete);
            }

            let Some(eol) = find_crlf(buf) else {
                return Ok(Progress::Incomplete);
            };
            let line = buf.split_to(eol + 2).freeze().slice(..eol);
            self.consume_line(&line, request_keys)?;
        }
    }

    fn is_complete(&self) -> bool {
        match self.mode {
            ParseMode::EndState => self.finished,
            ParseMode::Counting => self.consumed >= self.expected,
        }
    }

    fn consume_line(
        &mut self,
        line: &Bytes,
        request_keys: &mut VecDeque<Bytes>,
    ) -> Result<(), ParseError> {
        if let Some(rest) = strip_prefix(line, b"VALUE ") {
            return self.begin_value(&rest);
        }
        match &line[..] {
            b"END" => {
                if self.mode != ParseMode::EndState {
                    return Err(ParseError::Protocol("unexpected END"));
                }
                self.finished = true;
            }
            b"STORED" => self.push_message(MessageKind::Stored, request_keys),
            b"NOT_STORED" => self.push_message(MessageKind::NotStored, request_keys),
            b"EXISTS" => self.push_message(MessageKind::Exists, request_keys),
            b"NOT_FOUND" => self.push_message(MessageKind::NotFound, request_keys),
            b"DELETED" => self.push_message(MessageKind::Deleted, request_keys),
            b"TOUCHED" => self.push_message(MessageKind::Touched, request_keys),
            b"OK" => self.push_message(MessageKind::Ok, request_keys),
            b"ERROR" => {
                self.push_message(MessageKind::Error, request_keys);
                if self.mode == ParseMode::EndState {
                    self.finished = true;
                }
            }
            _ => {
                if strip_prefix(line, b"CLIENT_ERROR").is_some() {
                    self.push_message(MessageKind::ClientError, request_keys);
                    if self.mode == ParseMode::EndState {
                        self.finished = true;
                    }
                } else if strip_prefix(line, b"SERVER_ERROR").is_some() {
                    self.push_message(MessageKind::ServerError, request_keys);
                    return Err(ParseError::Server);
                } else if let Some(version) = strip_prefix(line, b"VERSION ") {
                    if self.mode != ParseMode::EndState {
                        return Err(ParseError::Protocol("unexpected VERSION"));
                    }
                    self.lines.push(version);
                    self.finished = true;
                } else if let Some(stat) = strip_prefix(line, b"STAT ") {
                    if self.mode != ParseMode::EndState {
                        return Err(ParseError::Protocol("unexpected STAT"));
                    }
                    self.lines.push(stat);
                } else if !line.is_empty() && line.iter().all(u8::is_ascii_digit) {
                    if self.mode != ParseMode::Counting {
                        return Err(ParseError::Protocol("unexpected numeric reply"));
                    }
                    self.numerics.push(parse_u64(line)?);
                    request_keys.pop_front();
                    self.consumed += 1;
                } else {
                    return Err(ParseError::Protocol("unknown response"));
                }
            }
        }
        Ok(())
    }

    /// Parse `<key> <flags> <bytes> [<cas>]` and open the body state.
    fn begin_value(&mut self, fields: &Bytes) -> Result<(), ParseError> {
        let mut parts = fields.split(|&b| b == b' ').filter(|p| !p.is_empty());
        let key = parts.next().ok_or(ParseError::Protocol("VALUE without key"))?;
        let flags = parse_u32(parts.next().ok_or(ParseError::Protocol("VALUE without flags"))?)?;
        let len = parse_usize(parts.next().ok_or(ParseError::Protocol("VALUE without length"))?)?;
        let cas = match parts.next() {
            Some(token) => parse_u64(token)?,
            None => 0,
        };
        if parts.next().is_some() {
            return Err(ParseError::Protocol("trailing VALUE fields"));
        }

        self.retrievals.push(RetrievalResult {
            key: Bytes::copy_from_slice(key),
            flags,
            cas,
            data: Vec::with_capacity(len),
            bytes_remain: len,
        });
        self.body = Body::Data { remain: len };
        Ok(())
    }

    fn push_message(&mut self, kind: MessageKind, request_keys: &mut VecDeque<Bytes>) {
        let key = request_keys.pop_front().unwrap_or_else(Bytes::new);
        self.messages.push(MessageResult { kind, key });
        self.consumed += 1;
    }
}

/// Find `\r\n` in `buf`, returning the position of `\r`.
fn find_crlf(buf: &[u8]) -> Option<usize> {
    memchr::memchr(b'\r', buf).filter(|&pos| pos + 1 < buf.len() && buf[pos + 1] == b'\n')
}

/// Zero-copy prefix strip over the frozen line.
fn strip_prefix(line: &Bytes, prefix: &[u8]) -> Option<Bytes> {
    line.starts_with(prefix).then(|| line.slice(prefix.len()..))
}

fn parse_u32(token: &[u8]) -> Result<u32, ParseError> {
    std::str::from_utf8(token)
        .map_err(|_| ParseError::InvalidNumber)?
        .parse()
        .map_err(|_| ParseError::InvalidNumber)
}

fn parse_u64(token: &[u8]) -> Result<u64, ParseError> {
    std::str::from_utf8(token)
        .map_err(|_| ParseError::InvalidNumber)?
        .parse()
        .map_err(|_| ParseError::InvalidNumber)
}

fn parse_usize(token: &[u8]) -> Result<usize, ParseError> {
    std::str::from_utf8(token)
        .map_err(|_| ParseError::InvalidNumber)?
        .parse()
        .map_err(|_| ParseError::InvalidNumber)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(items: &[&[u8]]) -> VecDeque<Bytes> {
        items.iter().map(|k| Bytes::copy_from_slice(k)).collect()
    }

    fn feed(reader: &mut ResponseReader, data: &[u8], ks: &mut VecDeque<Bytes>) -> Progress {
        let mut buf = BytesMut::from(data);
        reader.drive(&mut buf, ks).unwrap()
    }

    #[test]
    fn get_miss() {
        let mut reader = ResponseReader::new();
        reader.set_mode(ParseMode::EndState);
        let mut ks = keys(&[b"foo"]);
        assert_eq!(feed(&mut reader, b"END\r\n", &mut ks), Progress::Complete);
        assert!(reader.retrievals.is_empty());
    }

    #[test]
    fn get_hit() {
        let mut reader = ResponseReader::new();
        reader.set_mode(ParseMode::EndState);
        let mut ks = keys(&[b"foo"]);
        assert_eq!(
            feed(&mut reader, b"VALUE foo 0 5\r\nhello\r\nEND\r\n", &mut ks),
            Progress::Complete
        );
        assert_eq!(reader.retrievals.len(), 1);
        let r = &reader.retrievals[0];
        assert_eq!(r.key, &b"foo"[..]);
        assert_eq!(r.flags, 0);
        assert_eq!(r.cas, 0);
        assert_eq!(r.data, b"hello");
        assert_eq!(r.bytes_remain, 0);
    }

    #[test]
    fn gets_hit_carries_cas() {
        let mut reader = ResponseReader::new();
        reader.set_mode(ParseMode::EndState);
        let mut ks = keys(&[b"foo"]);
        feed(&mut reader, b"VALUE foo 7 5 1234\r\nhello\r\nEND\r\n", &mut ks);
        assert_eq!(reader.retrievals[0].cas, 1234);
        assert_eq!(reader.retrievals[0].flags, 7);
    }

    #[test]
    fn multi_value() {
        let mut reader = ResponseReader::new();
        reader.set_mode(ParseMode::EndState);
        let mut ks = keys(&[b"k1", b"k2"]);
        feed(
            &mut reader,
            b"VALUE k1 0 3\r\nfoo\r\nVALUE k2 0 3\r\nbar\r\nEND\r\n",
            &mut ks,
        );
        assert_eq!(reader.retrievals.len(), 2);
        assert_eq!(reader.retrievals[0].data, b"foo");
        assert_eq!(reader.retrievals[1].data, b"bar");
    }

    #[test]
    fn value_body_split_across_reads() {
        let mut reader = ResponseReader::new();
        reader.set_mode(ParseMode::EndState);
        let mut ks = keys(&[b"foo"]);

        let mut buf = BytesMut::from(&b"VALUE foo 0 10\r\nhel"[..]);
        assert_eq!(reader.drive(&mut buf, &mut ks).unwrap(), Progress::Incomplete);
        assert_eq!(reader.retrievals.len(), 1);
        assert_eq!(reader.retrievals[0].bytes_remain, 7);
        assert_eq!(reader.retrievals[0].data, b"hel");

        buf.extend_from_slice(b"lo12345\r\nEND\r\n");
        assert_eq!(reader.drive(&mut buf, &mut ks).unwrap(), Progress::Complete);
        assert_eq!(reader.retrievals.len(), 1);
        assert_eq!(reader.retrievals[0].bytes_remain, 0);
        assert_eq!(reader.retrievals[0].data, b"hello12345");
    }

    #[test]
    fn terminator_split_across_reads() {
        let mut reader = ResponseReader::new();
        reader.set_mode(ParseMode::EndState);
        let mut ks = keys(&[b"k"]);

        let mut buf = BytesMut::from(&b"VALUE k 0 2\r\nab\r"[..]);
        assert_eq!(reader.drive(&mut buf, &mut ks).unwrap(), Progress::Incomplete);
        buf.extend_from_slice(b"\nEND\r\n");
        assert_eq!(reader.drive(&mut buf, &mut ks).unwrap(), Progress::Complete);
        assert_eq!(reader.retrievals[0].data, b"ab");
    }

    #[test]
    fn empty_value_body() {
        let mut reader = ResponseReader::new();
        reader.set_mode(ParseMode::EndState);
        let mut ks = keys(&[b"k"]);
        feed(&mut reader, b"VALUE k 0 0\r\n\r\nEND\r\n", &mut ks);
        assert!(reader.retrievals[0].data.is_empty());
        assert_eq!(reader.retrievals[0].bytes_remain, 0);
    }

    #[test]
    fn corrupt_value_terminator() {
        let mut reader = ResponseReader::new();
        reader.set_mode(ParseMode::EndState);
        let mut ks = keys(&[b"k"]);
        let mut buf = BytesMut::from(&b"VALUE k 0 5\r\nhelloXXEND\r\n"[..]);
        assert_eq!(
            reader.drive(&mut buf, &mut ks),
            Err(ParseError::Protocol("missing value terminator"))
        );
    }

    #[test]
    fn counting_pairs_keys_fifo() {
        let mut reader = ResponseReader::new();
        reader.set_mode(ParseMode::Counting);
        reader.set_expected(2);
        let mut ks = keys(&[b"a", b"b"]);
        assert_eq!(
            feed(&mut reader, b"STORED\r\nNOT_STORED\r\n", &mut ks),
            Progress::Complete
        );
        assert_eq!(reader.messages.len(), 2);
        assert_eq!(reader.messages[0].kind, MessageKind::Stored);
        assert_eq!(reader.messages[0].key, &b"a"[..]);
        assert_eq!(reader.messages[1].kind, MessageKind::NotStored);
        assert_eq!(reader.messages[1].key, &b"b"[..]);
    }

    #[test]
    fn counting_stops_at_expected() {
        let mut reader = ResponseReader::new();
        reader.set_mode(ParseMode::Counting);
        reader.set_expected(1);
        let mut ks = keys(&[b"a"]);
        let mut buf = BytesMut::from(&b"STORED\r\nSTORED\r\n"[..]);
        assert_eq!(reader.drive(&mut buf, &mut ks).unwrap(), Progress::Complete);
        // Only the expected unit is consumed; the rest stays buffered.
        assert_eq!(reader.messages.len(), 1);
        assert_eq!(&buf[..], b"STORED\r\n");
    }

    #[test]
    fn counting_incomplete_until_all_units() {
        let mut reader = ResponseReader::new();
        reader.set_mode(ParseMode::Counting);
        reader.set_expected(2);
        let mut ks = keys(&[b"a", b"b"]);
        let mut buf = BytesMut::from(&b"STORED\r\n"[..]);
        assert_eq!(reader.drive(&mut buf, &mut ks).unwrap(), Progress::Incomplete);
        buf.extend_from_slice(b"STORED\r\n");
        assert_eq!(reader.drive(&mut buf, &mut ks).unwrap(), Progress::Complete);
    }

    #[test]
    fn numeric_reply() {
        let mut reader = ResponseReader::new();
        reader.set_mode(ParseMode::Counting);
        reader.set_expected(1);
        let mut ks = keys(&[b"n"]);
        assert_eq!(feed(&mut reader, b"42\r\n", &mut ks), Progress::Complete);
        assert_eq!(reader.numerics, vec![42]);
        assert!(ks.is_empty(), "numeric reply consumes its request key");
    }

    #[test]
    fn numeric_reply_max() {
        let mut reader = ResponseReader::new();
        reader.set_mode(ParseMode::Counting);
        reader.set_expected(1);
        let mut ks = keys(&[b"n"]);
        feed(&mut reader, b"18446744073709551615\r\n", &mut ks);
        assert_eq!(reader.numerics, vec![u64::MAX]);
    }

    #[test]
    fn incr_on_missing_key() {
        let mut reader = ResponseReader::new();
        reader.set_mode(ParseMode::Counting);
        reader.set_expected(1);
        let mut ks = keys(&[b"n"]);
        assert_eq!(feed(&mut reader, b"NOT_FOUND\r\n", &mut ks), Progress::Complete);
        assert!(reader.numerics.is_empty());
        assert_eq!(reader.messages[0].kind, MessageKind::NotFound);
    }

    #[test]
    fn server_error_is_soft_failure() {
        let mut reader = ResponseReader::new();
        reader.set_mode(ParseMode::Counting);
        reader.set_expected(1);
        let mut ks = keys(&[b"a"]);
        let mut buf = BytesMut::from(&b"SERVER_ERROR out of memory\r\n"[..]);
        assert_eq!(reader.drive(&mut buf, &mut ks), Err(ParseError::Server));
        assert_eq!(reader.messages[0].kind, MessageKind::ServerError);
    }

    #[test]
    fn client_error_counts_as_unit() {
        let mut reader = ResponseReader::new();
        reader.set_mode(ParseMode::Counting);
        reader.set_expected(2);
        let mut ks = keys(&[b"a", b"b"]);
        assert_eq!(
            feed(&mut reader, b"CLIENT_ERROR bad data chunk\r\nSTORED\r\n", &mut ks),
            Progress::Complete
        );
        assert_eq!(reader.messages[0].kind, MessageKind::ClientError);
        assert_eq!(reader.messages[1].kind, MessageKind::Stored);
        assert_eq!(reader.messages[1].key, &b"b"[..]);
    }

    #[test]
    fn version_line() {
        let mut reader = ResponseReader::new();
        reader.set_mode(ParseMode::EndState);
        let mut ks = VecDeque::new();
        assert_eq!(feed(&mut reader, b"VERSION 1.6.21\r\n", &mut ks), Progress::Complete);
        assert_eq!(reader.lines.len(), 1);
        assert_eq!(reader.lines[0], &b"1.6.21"[..]);
    }

    #[test]
    fn stats_lines_until_end() {
        let mut reader = ResponseReader::new();
        reader.set_mode(ParseMode::EndState);
        let mut ks = VecDeque::new();
        assert_eq!(
            feed(
                &mut reader,
                b"STAT pid 1\r\nSTAT uptime 100\r\nEND\r\n",
                &mut ks
            ),
            Progress::Complete
        );
        assert_eq!(reader.lines.len(), 2);
        assert_eq!(reader.lines[0], &b"pid 1"[..]);
        assert_eq!(reader.lines[1], &b"uptime 100"[..]);
    }

    #[test]
    fn unknown_token_is_programming_error() {
        let mut reader = ResponseReader::new();
        reader.set_mode(ParseMode::EndState);
        let mut ks = VecDeque::new();
        let mut buf = BytesMut::from(&b"BOGUS\r\n"[..]);
        assert_eq!(
            reader.drive(&mut buf, &mut ks),
            Err(ParseError::Protocol("unknown response"))
        );
    }

    #[test]
    fn partial_line_is_incomplete() {
        let mut reader = ResponseReader::new();
        reader.set_mode(ParseMode::Counting);
        reader.set_expected(1);
        let mut ks = keys(&[b"a"]);
        let mut buf = BytesMut::from(&b"STOR"[..]);
        assert_eq!(reader.drive(&mut buf, &mut ks).unwrap(), Progress::Incomplete);
        buf.extend_from_slice(b"ED\r\n");
        assert_eq!(reader.drive(&mut buf, &mut ks).unwrap(), Progress::Complete);
    }

    #[test]
    fn bad_value_length_field() {
        let mut reader = ResponseReader::new();
        reader.set_mode(ParseMode::EndState);
        let mut ks = keys(&[b"k"]);
        let mut buf = BytesMut::from(&b"VALUE k 0 xyz\r\nhello\r\nEND\r\n"[..]);
        assert_eq!(reader.drive(&mut buf, &mut ks), Err(ParseError::InvalidNumber));
    }

    #[test]
    fn end_in_counting_mode_rejected() {
        let mut reader = ResponseReader::new();
        reader.set_mode(ParseMode::Counting);
        reader.set_expected(1);
        let mut ks = keys(&[b"a"]);
        let mut buf = BytesMut::from(&b"END\r\n"[..]);
        assert_eq!(
            reader.drive(&mut buf, &mut ks),
            Err(ParseError::Protocol("unexpected END"))
        );
    }

    #[test]
    fn reset_clears_everything() {
        let mut reader = ResponseReader::new();
        reader.set_mode(ParseMode::Counting);
        reader.set_expected(1);
        let mut ks = keys(&[b"a"]);
        feed(&mut reader, b"STORED\r\n", &mut ks);
        reader.reset();
        assert!(reader.messages.is_empty());
        assert_eq!(reader.mode(), ParseMode::EndState);

        // Reusable for a retrieval afterwards.
        let mut ks = keys(&[b"foo"]);
        assert_eq!(
            feed(&mut reader, b"VALUE foo 0 2\r\nhi\r\nEND\r\n", &mut ks),
            Progress::Complete
        );
        assert_eq!(reader.retrievals.len(), 1);
    }
}
