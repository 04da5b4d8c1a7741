//! Shared progress counters and cancellation flag.
//!
//! The protocol loops are single-threaded; a [`Progress`] is the only thing
//! they share with the outside world. Binaries poll it for periodic progress
//! logs and flip [`Progress::cancel`] on Ctrl+C.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

/// Lifecycle of a sender or receiver loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransferState {
    Idle = 0,
    Sending = 1,
    Finishing = 2,
    Receiving = 3,
    Complete = 4,
    Failed = 5,
    Cancelled = 6,
}

impl TransferState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Sending,
            2 => Self::Finishing,
            3 => Self::Receiving,
            4 => Self::Complete,
            5 => Self::Failed,
            6 => Self::Cancelled,
            _ => Self::Idle,
        }
    }
}

/// Progress tracking for either side of a transfer.
#[derive(Debug)]
pub struct Progress {
    state: AtomicU8,
    cancelled: AtomicBool,
    pub chunks_total: AtomicU64,
    /// Sender: chunks acknowledged. Receiver: chunks written.
    pub chunks_done: AtomicU64,
    pub bytes_done: AtomicU64,
    pub datagrams_sent: AtomicU64,
    pub retransmits: AtomicU64,
    pub sessions_completed: AtomicU64,
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(TransferState::Idle as u8),
            cancelled: AtomicBool::new(false),
            chunks_total: AtomicU64::new(0),
            chunks_done: AtomicU64::new(0),
            bytes_done: AtomicU64::new(0),
            datagrams_sent: AtomicU64::new(0),
            retransmits: AtomicU64::new(0),
            sessions_completed: AtomicU64::new(0),
        }
    }

    /// Ask the loop to stop at its next wake-up.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> TransferState {
        TransferState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn set_state(&self, state: TransferState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    /// Fraction of chunks done, 0.0 - 1.0. An empty transfer counts as done.
    pub fn fraction(&self) -> f64 {
        let total = self.chunks_total.load(Ordering::Relaxed);
        if total == 0 {
            return 1.0;
        }
        self.chunks_done.load(Ordering::Relaxed) as f64 / total as f64
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}
