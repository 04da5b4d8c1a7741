//! Receiver: one socket, one session at a time, sessions back to back.
//!
//! ```text
//! [Transport] --> decode --> peer filter --> [Reassembler] --> output (W)
//!                   |            |                 |
//!                 drop short   drop foreign     ack each packet
//!                                               ack_copies times
//! ```
//!
//! A session belongs to the first address that sends it a packet. Once a
//! chunk from that peer has been written, datagrams from any other address are
//! dropped. A session that has not written anything yet (even if it buffered
//! or opened an output) is handed over to a new address instead, so a stray
//! packet cannot lock the listener.
//!
//! After a session completes, its sender may still be repeating the marker
//! because our acks were lost, and second copies of data packets may still be
//! in flight. Until the next session writes a chunk, packets from the previous
//! peer that belong to the finished transfer (the same marker, or data below
//! it) are acknowledged again and go no further: they never open an output.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::config::ReceiverConfig;
use crate::error::ReceiveError;
use crate::logging::{SessionLog, TransferEvent};
use crate::progress::{Progress, TransferState};
use crate::protocol::{decode_packet, encode_ack};
use crate::reassembler::{Action, Reassembler};
use crate::transport::{Transport, send_copies};

/// Summary of one completed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub peer: SocketAddr,
    /// Sequence of the end-of-stream marker, equal to the chunk count.
    pub eof_seq: u32,
    pub chunks_written: u32,
    pub bytes_written: u64,
    pub duplicates: u64,
    pub out_of_order: u64,
    /// Datagrams too short to carry a header.
    pub malformed: u64,
    /// Datagrams from addresses other than the session peer.
    pub foreign: u64,
    pub elapsed: Duration,
}

/// Receives files on a transport. `open_output` is called with the sender's
/// address when the first data packet of a session arrives.
pub struct Listener<T, F> {
    transport: T,
    config: ReceiverConfig,
    progress: Arc<Progress>,
    open_output: F,
    /// Peer and marker of the last completed session.
    last_completed: Option<(SocketAddr, u32)>,
    log: SessionLog,
}

impl<T, F, W> Listener<T, F>
where
    T: Transport,
    F: FnMut(SocketAddr) -> io::Result<W>,
    W: Write,
{
    pub fn new(
        transport: T,
        config: ReceiverConfig,
        progress: Arc<Progress>,
        open_output: F,
    ) -> Result<Self, ReceiveError> {
        config.validate()?;
        let local = transport.local_addr()?;
        let log = SessionLog::new(config.logger.clone(), "receiver", local);
        log.emit(TransferEvent::ListenStarted {
            bind_addr: local.to_string(),
        });
        Ok(Self {
            transport,
            config,
            progress,
            open_output,
            last_completed: None,
            log,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn progress(&self) -> &Arc<Progress> {
        &self.progress
    }

    /// Hand the transport back, releasing the socket when dropped.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Serve sessions until cancelled, passing each completed one to
    /// `on_session`. Returns [`ReceiveError::Interrupted`] on cancellation.
    pub fn serve<H>(&mut self, mut on_session: H) -> Result<(), ReceiveError>
    where
        H: FnMut(SessionReport, Option<W>),
    {
        loop {
            match self.serve_session() {
                Ok((report, output)) => on_session(report, output),
                Err(ReceiveError::Interrupted) => return Err(ReceiveError::Interrupted),
                Err(e) => {
                    self.log.emit(TransferEvent::Error {
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }
    }

    /// Block until one session completes. The output is `None` for an empty
    /// transfer, which never opens one.
    pub fn serve_session(&mut self) -> Result<(SessionReport, Option<W>), ReceiveError> {
        let mut recv_buf = vec![0u8; self.config.max_datagram];
        let mut reassembler: Reassembler<W> = Reassembler::new();
        let mut session_log = self.log.renewed();
        let mut peer: Option<SocketAddr> = None;
        let mut started: Option<Instant> = None;
        let mut malformed = 0u64;
        let mut foreign = 0u64;

        self.progress.chunks_done.store(0, Ordering::Relaxed);
        self.progress.bytes_done.store(0, Ordering::Relaxed);
        self.progress.set_state(TransferState::Receiving);

        let (eof_seq, from) = loop {
            if self.progress.is_cancelled() {
                // Flush what was written; the file stays truncated.
                if let Err(e) = reassembler.finish() {
                    session_log.emit(TransferEvent::Error {
                        message: format!("flush after interrupt failed: {}", e),
                    });
                }
                self.progress.set_state(TransferState::Cancelled);
                return Err(ReceiveError::Interrupted);
            }

            let Some((len, from)) = self
                .transport
                .recv_from(&mut recv_buf, self.config.poll_interval)?
            else {
                continue;
            };

            let packet = match decode_packet(&recv_buf[..len]) {
                Ok(packet) => packet,
                Err(_) => {
                    malformed += 1;
                    session_log.emit(TransferEvent::MalformedDropped { len });
                    continue;
                }
            };

            if let Some((last_peer, last_eof)) = self.last_completed {
                if last_peer == from && reassembler.stats().chunks_written == 0 {
                    if packet.is_eof() && packet.seq == last_eof {
                        self.ack(packet.seq, from)?;
                        session_log.emit(TransferEvent::EofReacknowledged { eof_seq: last_eof });
                        continue;
                    }
                    if !packet.is_eof() && packet.seq < last_eof {
                        self.ack(packet.seq, from)?;
                        session_log.emit(TransferEvent::StaleDataReacknowledged { seq: packet.seq });
                        continue;
                    }
                }
            }

            match peer {
                Some(current) if current == from => {}
                Some(_) if reassembler.stats().chunks_written > 0 => {
                    foreign += 1;
                    session_log.emit(TransferEvent::ForeignPeerDropped { from });
                    continue;
                }
                _ => {
                    if peer.is_some() {
                        // Nothing written yet: start over for the new address.
                        // An output opened for the old one is dropped unwritten.
                        reassembler = Reassembler::new();
                    }
                    peer = Some(from);
                    session_log.set_peer(from);
                    started = Some(Instant::now());
                }
            }

            let opening = !packet.is_eof() && !reassembler.has_output();
            let action = reassembler.accept(packet, || (self.open_output)(from))?;
            if opening {
                session_log.emit(TransferEvent::SessionOpened);
            }

            let stats = reassembler.stats();
            if stats.chunks_written > 0 {
                self.last_completed = None;
            }
            self.progress
                .chunks_done
                .store(stats.chunks_written as u64, Ordering::Relaxed);
            self.progress
                .bytes_done
                .store(stats.bytes_written, Ordering::Relaxed);

            match action {
                Action::Ack(seq) => self.ack(seq, from)?,
                Action::Deferred { eof_seq } => {
                    session_log.emit(TransferEvent::EofDeferred {
                        eof_seq,
                        expected_seq: reassembler.expected_seq(),
                        buffered: reassembler.buffered(),
                    });
                }
                Action::Finish { eof_seq } => {
                    self.ack(eof_seq, from)?;
                    break (eof_seq, from);
                }
                Action::AckAndFinish { seq, eof_seq } => {
                    self.ack(seq, from)?;
                    self.ack(eof_seq, from)?;
                    break (eof_seq, from);
                }
            }
        };

        let (output, stats) = reassembler.finish()?;
        let elapsed = started.map(|s| s.elapsed()).unwrap_or_default();
        self.last_completed = Some((from, eof_seq));
        Progress::add(&self.progress.sessions_completed, 1);
        self.progress.set_state(TransferState::Complete);

        session_log.emit(TransferEvent::SessionComplete {
            chunks: stats.chunks_written,
            bytes: stats.bytes_written,
            duplicates: stats.duplicates,
            duration_ms: elapsed.as_millis() as u64,
        });

        let report = SessionReport {
            session_id: session_log.session_id(),
            peer: from,
            eof_seq,
            chunks_written: stats.chunks_written,
            bytes_written: stats.bytes_written,
            duplicates: stats.duplicates,
            out_of_order: stats.out_of_order,
            malformed,
            foreign,
            elapsed,
        };
        Ok((report, output))
    }

    fn ack(&self, seq: u32, peer: SocketAddr) -> io::Result<()> {
        send_copies(&self.transport, &encode_ack(seq), peer, self.config.ack_copies)
    }
}
