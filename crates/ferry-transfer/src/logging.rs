//! Transfer logging trait for structured logs.
//!
//! The sender window, the EOF handshake and the receiver listener report what
//! they do through a [`TransferLogger`]. Binaries plug in [`TracingLogger`];
//! tests usually run without a logger or with a recording one.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use uuid::Uuid;

/// Structured log entry for a transfer operation.
#[derive(Debug, Clone)]
pub struct TransferLog {
    pub component: &'static str,
    pub session_id: Uuid,
    pub peer: SocketAddr,
    pub event: TransferEvent,
}

/// Transfer events that can be logged.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Sender: socket ready, chunks prepared
    SendStarted {
        local_addr: String,
        chunks: u32,
        bytes: u64,
    },
    /// Sender: window base slid forward
    WindowAdvanced {
        base: u32,
        next_seq: u32,
    },
    /// Sender: ack wait timed out, outstanding window resent
    WindowRetransmitted {
        base: u32,
        count: usize,
    },
    /// Sender: a chunk ran out of sends
    DeliveryFailed {
        seq: u32,
        sends: u32,
    },
    /// Sender: end-of-stream marker sent
    EofSent {
        eof_seq: u32,
        round: u32,
    },
    /// Sender: end-of-stream marker never acknowledged
    EofHandshakeFailed {
        eof_seq: u32,
        rounds: u32,
    },
    /// Sender: transfer confirmed by the receiver
    TransferComplete {
        bytes: u64,
        datagrams: u64,
        retransmits: u64,
        duration_ms: u64,
    },
    /// Receiver: listening for datagrams
    ListenStarted {
        bind_addr: String,
    },
    /// Receiver: first data packet of a session arrived, output opened
    SessionOpened,
    /// Receiver: datagram shorter than the header
    MalformedDropped {
        len: usize,
    },
    /// Receiver: datagram from an address other than the session peer
    ForeignPeerDropped {
        from: SocketAddr,
    },
    /// Receiver: end-of-stream marker arrived early and was remembered
    EofDeferred {
        eof_seq: u32,
        expected_seq: u32,
        buffered: usize,
    },
    /// Receiver: repeated marker of the previous session acknowledged again
    EofReacknowledged {
        eof_seq: u32,
    },
    /// Receiver: late data copy from the previous session acknowledged again
    StaleDataReacknowledged {
        seq: u32,
    },
    /// Receiver: session finished, output closed
    SessionComplete {
        chunks: u32,
        bytes: u64,
        duplicates: u64,
        duration_ms: u64,
    },
    /// Error occurred
    Error {
        message: String,
    },
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SendStarted { local_addr, chunks, bytes } => {
                write!(f, "send_started local={} chunks={} bytes={}", local_addr, chunks, bytes)
            }
            Self::WindowAdvanced { base, next_seq } => {
                write!(f, "window_advanced base={} next={}", base, next_seq)
            }
            Self::WindowRetransmitted { base, count } => {
                write!(f, "window_retransmitted base={} count={}", base, count)
            }
            Self::DeliveryFailed { seq, sends } => {
                write!(f, "delivery_failed seq={} sends={}", seq, sends)
            }
            Self::EofSent { eof_seq, round } => {
                write!(f, "eof_sent seq={} round={}", eof_seq, round)
            }
            Self::EofHandshakeFailed { eof_seq, rounds } => {
                write!(f, "eof_handshake_failed seq={} rounds={}", eof_seq, rounds)
            }
            Self::TransferComplete { bytes, datagrams, retransmits, duration_ms } => {
                write!(
                    f,
                    "transfer_complete bytes={} datagrams={} retransmits={} duration_ms={}",
                    bytes, datagrams, retransmits, duration_ms
                )
            }
            Self::ListenStarted { bind_addr } => {
                write!(f, "listen_started bind={}", bind_addr)
            }
            Self::SessionOpened => write!(f, "session_opened"),
            Self::MalformedDropped { len } => {
                write!(f, "malformed_dropped len={}", len)
            }
            Self::ForeignPeerDropped { from } => {
                write!(f, "foreign_peer_dropped from={}", from)
            }
            Self::EofDeferred { eof_seq, expected_seq, buffered } => {
                write!(f, "eof_deferred seq={} expected={} buffered={}", eof_seq, expected_seq, buffered)
            }
            Self::EofReacknowledged { eof_seq } => {
                write!(f, "eof_reacknowledged seq={}", eof_seq)
            }
            Self::StaleDataReacknowledged { seq } => {
                write!(f, "stale_data_reacknowledged seq={}", seq)
            }
            Self::SessionComplete { chunks, bytes, duplicates, duration_ms } => {
                write!(
                    f,
                    "session_complete chunks={} bytes={} duplicates={} duration_ms={}",
                    chunks, bytes, duplicates, duration_ms
                )
            }
            Self::Error { message } => {
                write!(f, "error: {}", message)
            }
        }
    }
}

/// Trait for transfer logging.
pub trait TransferLogger: Send + Sync {
    fn log(&self, entry: TransferLog);
}

/// Logger that uses the `tracing` crate.
pub struct TracingLogger;

impl TransferLogger for TracingLogger {
    fn log(&self, entry: TransferLog) {
        let sid = entry.session_id.simple().to_string();
        // Lifecycle at info, failures at warn, per-packet chatter at debug
        match &entry.event {
            TransferEvent::DeliveryFailed { .. }
            | TransferEvent::EofHandshakeFailed { .. }
            | TransferEvent::Error { .. } => {
                tracing::warn!(
                    component = entry.component,
                    session_id = %sid,
                    peer = %entry.peer,
                    "{}",
                    entry.event,
                );
            }
            TransferEvent::SendStarted { .. }
            | TransferEvent::TransferComplete { .. }
            | TransferEvent::ListenStarted { .. }
            | TransferEvent::SessionOpened
            | TransferEvent::SessionComplete { .. } => {
                tracing::info!(
                    component = entry.component,
                    session_id = %sid,
                    peer = %entry.peer,
                    "{}",
                    entry.event,
                );
            }
            _ => {
                tracing::debug!(
                    component = entry.component,
                    session_id = %sid,
                    peer = %entry.peer,
                    "{}",
                    entry.event,
                );
            }
        }
    }
}

/// No-op logger that discards all log entries.
pub struct NullLogger;

impl TransferLogger for NullLogger {
    fn log(&self, _entry: TransferLog) {}
}

/// Binds an optional logger to one session so call sites only name the event.
#[derive(Clone)]
pub(crate) struct SessionLog {
    logger: Option<Arc<dyn TransferLogger>>,
    component: &'static str,
    session_id: Uuid,
    peer: SocketAddr,
}

impl SessionLog {
    pub(crate) fn new(
        logger: Option<Arc<dyn TransferLogger>>,
        component: &'static str,
        peer: SocketAddr,
    ) -> Self {
        Self {
            logger,
            component,
            session_id: Uuid::new_v4(),
            peer,
        }
    }

    /// Same logger and peer under a fresh session id.
    pub(crate) fn renewed(&self) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            ..self.clone()
        }
    }

    /// Attribute subsequent entries to `peer`.
    pub(crate) fn set_peer(&mut self, peer: SocketAddr) {
        self.peer = peer;
    }

    pub(crate) fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub(crate) fn emit(&self, event: TransferEvent) {
        if let Some(ref logger) = self.logger {
            logger.log(TransferLog {
                component: self.component,
                session_id: self.session_id,
                peer: self.peer,
                event,
            });
        }
    }
}
