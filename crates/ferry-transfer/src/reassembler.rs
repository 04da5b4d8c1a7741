//! Receiver-side ordering state for one session.
//!
//! [`Reassembler`] turns decoded packets, in whatever order and multiplicity
//! they arrive, into an in-order append-only write stream and tells the caller
//! what to acknowledge. It owns no socket.
//!
//! Invariants after every [`Reassembler::accept`]:
//! - bytes reach the output strictly in sequence order, each sequence once;
//! - the buffer never holds `expected_seq`;
//! - the session is complete only when a marker has been seen, its sequence
//!   equals `expected_seq` and the buffer is empty.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io::{self, Write};

use crate::protocol::Packet;

/// What the caller must do after a packet was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Acknowledge data packet `seq`.
    Ack(u32),
    /// Acknowledge data packet `seq`, then the marker `eof_seq`. Session over.
    AckAndFinish { seq: u32, eof_seq: u32 },
    /// Acknowledge the marker `eof_seq`. Session over.
    Finish { eof_seq: u32 },
    /// Marker arrived early and was remembered. Nothing to send.
    Deferred { eof_seq: u32 },
}

/// Counters for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub chunks_written: u32,
    pub bytes_written: u64,
    /// Data packets for sequences already written or already buffered.
    pub duplicates: u64,
    /// Data packets stored because they arrived ahead of `expected_seq`.
    pub out_of_order: u64,
    pub peak_buffered: usize,
}

pub struct Reassembler<W> {
    expected_seq: u32,
    buffer: BTreeMap<u32, Vec<u8>>,
    eof_seq: Option<u32>,
    output: Option<W>,
    stats: ReassemblyStats,
    finished: bool,
}

impl<W: Write> Default for Reassembler<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> Reassembler<W> {
    pub fn new() -> Self {
        Self {
            expected_seq: 0,
            buffer: BTreeMap::new(),
            eof_seq: None,
            output: None,
            stats: ReassemblyStats::default(),
            finished: false,
        }
    }

    /// Next sequence to write.
    pub fn expected_seq(&self) -> u32 {
        self.expected_seq
    }

    /// Remembered marker sequence, if one arrived.
    pub fn eof_seq(&self) -> Option<u32> {
        self.eof_seq
    }

    /// Sequences held ahead of `expected_seq`.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// True once a data packet opened the output.
    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn stats(&self) -> &ReassemblyStats {
        &self.stats
    }

    fn is_complete(&self) -> bool {
        self.eof_seq == Some(self.expected_seq) && self.buffer.is_empty()
    }

    /// Process one decoded packet. `open` creates the output on the first data
    /// packet of the session and is not called otherwise.
    pub fn accept<F>(&mut self, packet: Packet<'_>, open: F) -> io::Result<Action>
    where
        F: FnOnce() -> io::Result<W>,
    {
        debug_assert!(!self.finished, "packet accepted after session end");

        if packet.is_eof() {
            let eof_seq = packet.seq;
            self.eof_seq = Some(eof_seq);
            if self.is_complete() {
                self.finished = true;
                return Ok(Action::Finish { eof_seq });
            }
            return Ok(Action::Deferred { eof_seq });
        }

        if self.output.is_none() {
            self.output = Some(open()?);
        }

        let seq = packet.seq;
        let advanced = match seq.cmp(&self.expected_seq) {
            Ordering::Equal => {
                self.write(packet.payload)?;
                while let Some(next) = self.buffer.remove(&self.expected_seq) {
                    self.write(&next)?;
                }
                true
            }
            Ordering::Greater => {
                if self.buffer.contains_key(&seq) {
                    self.stats.duplicates += 1;
                } else {
                    self.buffer.insert(seq, packet.payload.to_vec());
                    self.stats.out_of_order += 1;
                    self.stats.peak_buffered = self.stats.peak_buffered.max(self.buffer.len());
                }
                false
            }
            Ordering::Less => {
                self.stats.duplicates += 1;
                false
            }
        };

        if advanced && self.is_complete() {
            self.finished = true;
            if let Some(eof_seq) = self.eof_seq {
                return Ok(Action::AckAndFinish { seq, eof_seq });
            }
        }
        Ok(Action::Ack(seq))
    }

    /// Append `payload` for `expected_seq` and move past it.
    fn write(&mut self, payload: &[u8]) -> io::Result<()> {
        if let Some(ref mut output) = self.output {
            output.write_all(payload)?;
        }
        self.expected_seq += 1;
        self.stats.chunks_written += 1;
        self.stats.bytes_written += payload.len() as u64;
        Ok(())
    }

    /// Flush and hand back the output (if one was opened) with the counters.
    pub fn finish(mut self) -> io::Result<(Option<W>, ReassemblyStats)> {
        if let Some(ref mut output) = self.output {
            output.flush()?;
        }
        Ok((self.output, self.stats))
    }
}
