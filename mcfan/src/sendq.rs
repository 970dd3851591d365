//! Outgoing scatter-gather queue.
//!
//! Wire segments (`Bytes`) are queued without copying and flushed with one
//! vectored write per call. A short write advances the head segment in
//! place, so value bodies shared with the caller are never reallocated.

use std::collections::VecDeque;
use std::io::{self, IoSlice, Write};

use bytes::{Buf, Bytes};

/// Gather-vector cap per flush. Writes past this many segments take another
/// readiness cycle.
const MAX_IOVECS: usize = 64;

#[derive(Debug, Default)]
pub(crate) struct SendQueue {
    segments: VecDeque<Bytes>,
    queued: usize,
}

impl SendQueue {
    /// Queue a segment. Empty segments are dropped.
    pub fn push(&mut self, segment: Bytes) {
        if !segment.is_empty() {
            self.queued += segment.len();
            self.segments.push_back(segment);
        }
    }

    /// Bytes still queued.
    pub fn len(&self) -> usize {
        self.queued
    }

    pub fn is_empty(&self) -> bool {
        self.queued == 0
    }

    pub fn clear(&mut self) {
        self.segments.clear();
        self.queued = 0;
    }

    /// Flush with a single vectored write, advancing past whatever the
    /// writer accepted. Returns the bytes still queued afterwards; a
    /// would-block leaves the queue as is.
    pub fn write_to<W: Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        if self.segments.is_empty() {
            return Ok(0);
        }

        let written = {
            let iovecs: Vec<IoSlice<'_>> = self
                .segments
                .iter()
                .take(MAX_IOVECS)
                .map(|segment| IoSlice::new(segment))
                .collect();
            loop {
                match writer.write_vectored(&iovecs) {
                    Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                    Ok(n) => break n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break 0,
                    Err(e) => return Err(e),
                }
            }
        };

        self.advance(written);
        Ok(self.queued)
    }

    /// Consume `written` bytes from the front, splitting the head segment
    /// when the write stopped inside it.
    fn advance(&mut self, mut written: usize) {
        self.queued -= written;
        while written > 0 {
            let head = self
                .segments
                .front_mut()
                .expect("advance past end of send queue");
            if written >= head.len() {
                written -= head.len();
                self.segments.pop_front();
            } else {
                head.advance(written);
                written = 0;
            }
        }
    }
}
