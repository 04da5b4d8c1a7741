//! In-memory lossy link for deterministic testing.
//!
//! Real networks drop, duplicate and reorder datagrams. [`link`] returns two
//! connected [`LinkEnd`]s implementing [`Transport`]; every datagram handed to
//! `send_to` goes through a seeded fault model before it is queued for the
//! other end:
//!
//! | Fault       | Description                                               |
//! |-------------|-----------------------------------------------------------|
//! | Loss        | Drop the datagram with probability `loss_rate`.           |
//! | Duplication | Queue it twice with probability `duplicate_rate`.         |
//! | Reordering  | Hold it back with probability `reorder_rate`; it is       |
//! |             | released right after the next datagram from the same end. |

use std::cell::RefCell;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::transport::Transport;

/// Fault model. Probabilities are in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy)]
pub struct LinkConfig {
    pub loss_rate: f64,
    pub duplicate_rate: f64,
    pub reorder_rate: f64,
    pub seed: u64,
}

impl LinkConfig {
    /// No impairments.
    pub fn perfect() -> Self {
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            seed: 0,
        }
    }

    /// Independent loss only.
    pub fn lossy(loss_rate: f64, seed: u64) -> Self {
        Self {
            loss_rate,
            seed,
            ..Self::perfect()
        }
    }
}

/// What one end did with the datagrams it was asked to send.
#[derive(Debug, Default)]
pub struct LinkStats {
    pub offered: AtomicU64,
    pub dropped: AtomicU64,
    pub duplicated: AtomicU64,
    pub reordered: AtomicU64,
}

impl LinkStats {
    pub fn offered(&self) -> u64 {
        self.offered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

type Datagram = (Vec<u8>, SocketAddr);

/// One side of an in-memory link.
pub struct LinkEnd {
    addr: SocketAddr,
    peer_addr: SocketAddr,
    tx: Sender<Datagram>,
    rx: Receiver<Datagram>,
    config: LinkConfig,
    rng: RefCell<StdRng>,
    held: RefCell<Option<Vec<u8>>>,
    stats: Arc<LinkStats>,
}

/// Build a link between `a` and `b`. Each direction gets its own seeded RNG.
///
/// # Panics
/// Panics if a probability in `config` is outside `[0.0, 1.0]`.
pub fn link(a: SocketAddr, b: SocketAddr, config: LinkConfig) -> (LinkEnd, LinkEnd) {
    for p in [config.loss_rate, config.duplicate_rate, config.reorder_rate] {
        assert!((0.0..=1.0).contains(&p), "probability out of range: {}", p);
    }

    let (a_tx, b_rx) = unbounded();
    let (b_tx, a_rx) = unbounded();

    let end_a = LinkEnd::new(a, b, a_tx, a_rx, config, config.seed);
    let end_b = LinkEnd::new(b, a, b_tx, b_rx, config, config.seed.wrapping_add(1));
    (end_a, end_b)
}

impl LinkEnd {
    fn new(
        addr: SocketAddr,
        peer_addr: SocketAddr,
        tx: Sender<Datagram>,
        rx: Receiver<Datagram>,
        config: LinkConfig,
        seed: u64,
    ) -> Self {
        Self {
            addr,
            peer_addr,
            tx,
            rx,
            config,
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
            held: RefCell::new(None),
            stats: Arc::new(LinkStats::default()),
        }
    }

    /// Counters for datagrams sent from this end.
    pub fn stats(&self) -> Arc<LinkStats> {
        self.stats.clone()
    }

    fn deliver(&self, datagram: Vec<u8>) {
        // A vanished peer behaves like a black hole, not an error.
        let _ = self.tx.send((datagram, self.addr));
    }
}

impl Transport for LinkEnd {
    fn send_to(&self, datagram: &[u8], peer: SocketAddr) -> io::Result<()> {
        self.stats.offered.fetch_add(1, Ordering::Relaxed);
        if peer != self.peer_addr {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let mut rng = self.rng.borrow_mut();
        if rng.random_bool(self.config.loss_rate) {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        let duplicate = rng.random_bool(self.config.duplicate_rate);
        let reorder = rng.random_bool(self.config.reorder_rate);
        drop(rng);

        let mut held = self.held.borrow_mut();
        if reorder && held.is_none() {
            self.stats.reordered.fetch_add(1, Ordering::Relaxed);
            *held = Some(datagram.to_vec());
            return Ok(());
        }

        self.deliver(datagram.to_vec());
        if duplicate {
            self.stats.duplicated.fetch_add(1, Ordering::Relaxed);
            self.deliver(datagram.to_vec());
        }
        if let Some(late) = held.take() {
            self.deliver(late);
        }
        Ok(())
    }

    fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.rx.recv_timeout(timeout) {
            Ok((datagram, src)) => {
                // Same truncation semantics as a UDP socket.
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok(Some((len, src)))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                // Nobody left to talk to: look like a quiet network.
                std::thread::sleep(timeout);
                Ok(None)
            }
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}
