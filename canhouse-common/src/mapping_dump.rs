//! Framing of mapping table dumps
//!
//! A relay answers a MAPPINGS request with its table as `(node_id, output_number)` pairs, four
//! pairs per MAPPINGS_REPLY frame. The table is closed by a `0xFF, 0xFF` pair, after which the
//! last partially filled frame is flushed. The terminator may land at the start of a fresh frame.

use crate::constants::{ERASE_OUTPUT, UNMAPPED_NODE_ID};
use crate::messages::{CanHeader, CanMessage, MessageClass, MAX_DATA_LENGTH};

/// The pair closing a dump
pub const TERMINATOR: (u8, u8) = (UNMAPPED_NODE_ID, ERASE_OUTPUT);

/// Packs mapping pairs into MAPPINGS_REPLY frames and hands each completed frame to a sink
pub struct MappingDumpWriter<F: FnMut(CanMessage)> {
    header: CanHeader,
    buf: [u8; MAX_DATA_LENGTH],
    len: usize,
    sink: F,
}

impl<F: FnMut(CanMessage)> MappingDumpWriter<F> {
    /// Start a dump sent with the floor value `floor_value`
    pub fn new(floor_value: u8, sink: F) -> Self {
        Self {
            header: CanHeader::new(MessageClass::MappingsReply, floor_value),
            buf: [0; MAX_DATA_LENGTH],
            len: 0,
            sink,
        }
    }

    /// Append one pair, flushing the frame once it is full
    pub fn push(&mut self, node_id: u8, output_number: u8) {
        self.buf[self.len] = node_id;
        self.buf[self.len + 1] = output_number;
        self.len += 2;
        if self.len == MAX_DATA_LENGTH {
            self.flush();
        }
    }

    /// Append the terminator and flush whatever is left
    pub fn finish(mut self) {
        self.push(TERMINATOR.0, TERMINATOR.1);
        if self.len > 0 {
            self.flush();
        }
    }

    fn flush(&mut self) {
        let msg = CanMessage::with_header(self.header, &self.buf[..self.len]);
        (self.sink)(msg);
        self.len = 0;
    }
}

/// Collects the pairs of a dump from received MAPPINGS_REPLY payloads
#[derive(Debug, Default, Clone, Copy)]
pub struct MappingDumpReader {
    complete: bool,
}

impl MappingDumpReader {
    /// Create a reader
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame payload, passing each mapping pair to `f`
    ///
    /// Returns true once the terminator has been seen. Data after the terminator is ignored.
    pub fn feed(&mut self, payload: &[u8], mut f: impl FnMut(u8, u8)) -> bool {
        if self.complete {
            return true;
        }
        for pair in payload.chunks_exact(2) {
            if (pair[0], pair[1]) == TERMINATOR {
                self.complete = true;
                break;
            }
            f(pair[0], pair[1]);
        }
        self.complete
    }

    /// Returns true once the terminator has been seen
    pub fn is_complete(&self) -> bool {
        self.complete
    }
}
