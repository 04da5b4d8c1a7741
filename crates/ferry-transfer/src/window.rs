//! Selective-repeat send window.
//!
//! [`Window`] tracks which chunks of a transfer are in flight and which are
//! acknowledged. It owns no socket; the [`crate::sender`] loop asks it what to
//! transmit and feeds it acknowledgments.
//!
//! ```text
//!   acked prefix      base            next_seq        base+window_size
//!  ──────────────────┼───────────────┼───────────────┼──────────▶ seq
//!                    │ <─ in flight ─▶│ <─ sendable ─▶│
//! ```
//!
//! Acknowledgments may arrive in any order; `base` only moves through the
//! contiguous acknowledged run starting at `base`.

use std::collections::{HashMap, HashSet};

/// Result of feeding one acknowledgment to the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Newly acknowledged and `base` moved from `from` to `to`.
    Advanced { from: u32, to: u32 },
    /// Newly acknowledged above a gap; `base` stays.
    Recorded,
    /// Duplicate or out of range.
    Ignored,
}

/// A chunk ran out of transmissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendBudgetExhausted {
    pub seq: u32,
    pub sends: u32,
}

/// Send-side window state for one transfer of `total` chunks.
#[derive(Debug)]
pub struct Window {
    base: u32,
    next_seq: u32,
    total: u32,
    window_size: u32,
    max_sends: u32,
    /// Acknowledged sequences at or above `base`.
    acked: HashSet<u32>,
    /// Transmissions per sequence at or above `base`.
    send_counts: HashMap<u32, u32>,
}

impl Window {
    /// # Panics
    /// Panics if `window_size` is zero.
    pub fn new(total: u32, window_size: u32, max_sends: u32) -> Self {
        assert!(window_size >= 1, "window_size must be at least 1");
        Self {
            base: 0,
            next_seq: 0,
            total,
            window_size,
            max_sends,
            acked: HashSet::new(),
            send_counts: HashMap::new(),
        }
    }

    /// Lowest unacknowledged sequence.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// One past the highest sequence sent so far.
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    /// True once every chunk is acknowledged.
    pub fn is_complete(&self) -> bool {
        self.base == self.total
    }

    fn limit(&self) -> u32 {
        self.base.saturating_add(self.window_size).min(self.total)
    }

    pub fn is_acked(&self, seq: u32) -> bool {
        seq < self.base || self.acked.contains(&seq)
    }

    /// Sent but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        (self.base..self.next_seq)
            .filter(|seq| !self.acked.contains(seq))
            .count()
    }

    /// Transmissions recorded for `seq`, or 0 once it has slid out.
    pub fn sends(&self, seq: u32) -> u32 {
        self.send_counts.get(&seq).copied().unwrap_or(0)
    }

    /// Extend `next_seq` to the window edge and return the newly opened
    /// sequences that still need a first transmission.
    pub fn open_slots(&mut self) -> Vec<u32> {
        let limit = self.limit();
        let mut fresh = Vec::new();
        while self.next_seq < limit {
            if !self.acked.contains(&self.next_seq) {
                fresh.push(self.next_seq);
            }
            self.next_seq += 1;
        }
        fresh
    }

    /// Every unacknowledged sequence in `[base, next_seq)`, the retransmission
    /// set after an ack timeout.
    pub fn outstanding(&self) -> Vec<u32> {
        (self.base..self.next_seq)
            .filter(|seq| !self.acked.contains(seq))
            .collect()
    }

    /// Count one transmission of `seq`. Fails once the count exceeds
    /// `max_sends`; the caller must not transmit in that case.
    pub fn record_send(&mut self, seq: u32) -> Result<u32, SendBudgetExhausted> {
        let count = self.send_counts.entry(seq).or_insert(0);
        *count += 1;
        if *count > self.max_sends {
            return Err(SendBudgetExhausted {
                seq,
                sends: self.max_sends,
            });
        }
        Ok(*count)
    }

    /// Apply an acknowledgment for `seq`.
    pub fn acknowledge(&mut self, seq: u32) -> AckOutcome {
        if seq >= self.total || self.is_acked(seq) {
            return AckOutcome::Ignored;
        }
        self.acked.insert(seq);

        let from = self.base;
        while self.acked.remove(&self.base) {
            self.send_counts.remove(&self.base);
            self.base += 1;
        }
        // An ack for a sequence never sent still counts; keep base <= next_seq.
        self.next_seq = self.next_seq.max(self.base);

        if self.base > from {
            AckOutcome::Advanced {
                from,
                to: self.base,
            }
        } else {
            AckOutcome::Recorded
        }
    }
}
