//! Sender: selective-repeat window loop followed by the EOF handshake.
//!
//! ```text
//! [Source] ---> [Window loop] ---------------------> [EOF handshake]
//! read fixed     send each open slot twice           marker (seq = N) in pairs
//! size chunks    wait ack_timeout for an ack         until acked or rounds out
//!                on timeout resend the outstanding
//!                window
//! ```
//!
//! One call transfers one source and consumes its transport, so the socket is
//! released on every exit path.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crate::config::SenderConfig;
use crate::eof;
use crate::error::SendError;
use crate::logging::{SessionLog, TransferEvent};
use crate::progress::{Progress, TransferState};
use crate::protocol::*;
use crate::transport::{Transport, UdpTransport, send_copies};
use crate::window::{AckOutcome, Window};

/// Summary of a confirmed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub chunks: u32,
    pub bytes: u64,
    /// Every datagram put on the wire, copies included.
    pub datagrams_sent: u64,
    /// Chunk sends beyond the first.
    pub retransmissions: u64,
    /// Ack waits that expired.
    pub timeouts: u64,
    /// EOF rounds needed for confirmation.
    pub eof_rounds: u32,
    pub elapsed: Duration,
}

/// Split a byte source into chunks of at most `max_payload` bytes.
///
/// Every chunk but the last is exactly `max_payload` bytes; none is empty, so
/// no data packet can be mistaken for the end-of-stream marker.
pub fn read_chunks<R: Read>(mut reader: R, max_payload: usize) -> io::Result<Vec<Vec<u8>>> {
    let mut chunks = Vec::new();
    loop {
        let mut chunk = Vec::with_capacity(max_payload);
        let n = reader
            .by_ref()
            .take(max_payload as u64)
            .read_to_end(&mut chunk)?;
        if n == 0 {
            break;
        }
        chunks.push(chunk);
        if n < max_payload {
            break;
        }
    }
    Ok(chunks)
}

/// Send the file at `path` to `peer` over a fresh UDP socket.
pub fn send_file(
    path: impl AsRef<Path>,
    peer: SocketAddr,
    config: &SenderConfig,
    progress: &Progress,
) -> Result<TransferReport, SendError> {
    let file = File::open(path.as_ref())?;
    config.validate()?;
    let chunks = chunk_count(file.metadata()?.len(), config.max_payload);
    if chunks > u32::MAX as u64 {
        return Err(SendError::TooManyChunks { chunks });
    }
    let transport = UdpTransport::for_peer(peer)?;
    send_reader(transport, peer, BufReader::new(file), config, progress)
}

/// Read `reader` to the end and transfer it to `peer`.
pub fn send_reader<T: Transport, R: Read>(
    transport: T,
    peer: SocketAddr,
    reader: R,
    config: &SenderConfig,
    progress: &Progress,
) -> Result<TransferReport, SendError> {
    config.validate()?;
    let chunks = read_chunks(reader, config.max_payload)?;
    send_chunks(transport, peer, &chunks, config, progress)
}

fn send_chunks<T: Transport>(
    transport: T,
    peer: SocketAddr,
    chunks: &[Vec<u8>],
    config: &SenderConfig,
    progress: &Progress,
) -> Result<TransferReport, SendError> {
    let total = u32::try_from(chunks.len()).map_err(|_| SendError::TooManyChunks {
        chunks: chunks.len() as u64,
    })?;
    let bytes: u64 = chunks.iter().map(|c| c.len() as u64).sum();

    let log = SessionLog::new(config.logger.clone(), "sender", peer);
    let local_addr = transport
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "?".into());
    log.emit(TransferEvent::SendStarted {
        local_addr,
        chunks: total,
        bytes,
    });

    progress.chunks_total.store(total as u64, Ordering::Relaxed);
    progress.set_state(TransferState::Sending);

    let start = Instant::now();
    let mut session = SendSession {
        transport: &transport,
        peer,
        chunks,
        config,
        progress,
        log,
        send_buf: vec![0u8; HEADER_LEN + config.max_payload],
        datagrams_sent: 0,
        retransmissions: 0,
        timeouts: 0,
    };

    let result = session.run_window(total).and_then(|()| {
        progress.set_state(TransferState::Finishing);
        eof::finish(
            session.transport,
            peer,
            total,
            config,
            progress,
            &session.log,
        )
    });

    let handshake = match result {
        Ok(handshake) => handshake,
        Err(e) => {
            if let SendError::Io(ref err) = e {
                session.log.emit(TransferEvent::Error {
                    message: err.to_string(),
                });
            }
            progress.set_state(match e {
                SendError::Interrupted => TransferState::Cancelled,
                _ => TransferState::Failed,
            });
            return Err(e);
        }
    };

    let report = TransferReport {
        chunks: total,
        bytes,
        datagrams_sent: session.datagrams_sent + handshake.datagrams_sent,
        retransmissions: session.retransmissions,
        timeouts: session.timeouts,
        eof_rounds: handshake.rounds,
        elapsed: start.elapsed(),
    };
    session.log.emit(TransferEvent::TransferComplete {
        bytes,
        datagrams: report.datagrams_sent,
        retransmits: report.retransmissions,
        duration_ms: report.elapsed.as_millis() as u64,
    });
    progress.set_state(TransferState::Complete);
    Ok(report)
}

/// Per-transfer state of the window loop.
struct SendSession<'a, T: Transport> {
    transport: &'a T,
    peer: SocketAddr,
    chunks: &'a [Vec<u8>],
    config: &'a SenderConfig,
    progress: &'a Progress,
    log: SessionLog,
    send_buf: Vec<u8>,
    datagrams_sent: u64,
    retransmissions: u64,
    timeouts: u64,
}

impl<T: Transport> SendSession<'_, T> {
    /// Drive the window until every chunk is acknowledged.
    fn run_window(&mut self, total: u32) -> Result<(), SendError> {
        let mut window = Window::new(total, self.config.window_size, self.config.max_sends);
        let mut ack_buf = [0u8; 64];

        while !window.is_complete() {
            if self.progress.is_cancelled() {
                return Err(SendError::Interrupted);
            }

            for seq in window.open_slots() {
                self.transmit(&mut window, seq)?;
            }

            match self.transport.recv_from(&mut ack_buf, self.config.ack_timeout)? {
                Some((len, _src)) => {
                    // Short datagrams cannot carry a sequence; skip them.
                    let Ok(seq) = decode_ack(&ack_buf[..len]) else {
                        continue;
                    };
                    let outcome = window.acknowledge(seq);
                    if outcome == AckOutcome::Ignored {
                        continue;
                    }
                    Progress::add(&self.progress.chunks_done, 1);
                    Progress::add(
                        &self.progress.bytes_done,
                        self.chunks[seq as usize].len() as u64,
                    );
                    if let AckOutcome::Advanced { to, .. } = outcome {
                        self.log.emit(TransferEvent::WindowAdvanced {
                            base: to,
                            next_seq: window.next_seq(),
                        });
                    }
                }
                None => {
                    self.timeouts += 1;
                    let outstanding = window.outstanding();
                    self.log.emit(TransferEvent::WindowRetransmitted {
                        base: window.base(),
                        count: outstanding.len(),
                    });
                    for seq in outstanding {
                        self.transmit(&mut window, seq)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Count and send one chunk, `data_copies` times.
    fn transmit(&mut self, window: &mut Window, seq: u32) -> Result<(), SendError> {
        let sends = match window.record_send(seq) {
            Ok(sends) => sends,
            Err(exhausted) => {
                self.log.emit(TransferEvent::DeliveryFailed {
                    seq: exhausted.seq,
                    sends: exhausted.sends,
                });
                return Err(SendError::DeliveryFailed {
                    seq: exhausted.seq,
                    sends: exhausted.sends,
                });
            }
        };
        if sends > 1 {
            self.retransmissions += 1;
            Progress::add(&self.progress.retransmits, 1);
        }

        let len = encode_packet(&mut self.send_buf, seq, &self.chunks[seq as usize]);
        send_copies(
            self.transport,
            &self.send_buf[..len],
            self.peer,
            self.config.data_copies,
        )?;
        let copies = self.config.data_copies as u64;
        self.datagrams_sent += copies;
        Progress::add(&self.progress.datagrams_sent, copies);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn chunks_are_full_except_the_last() {
        let chunks = read_chunks(Cursor::new(vec![7u8; 10]), 4).unwrap();
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        let chunks = read_chunks(Cursor::new(vec![1u8; 8]), 4).unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() == 4));
    }

    #[test]
    fn empty_source_has_no_chunks() {
        assert!(read_chunks(Cursor::new(Vec::new()), 4).unwrap().is_empty());
    }

    /// Hands out at most three bytes per read, like a slow pipe.
    struct Trickle(Cursor<Vec<u8>>);

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(3);
            self.0.read(&mut buf[..n])
        }
    }

    #[test]
    fn short_reads_still_fill_chunks() {
        let data: Vec<u8> = (0..20).collect();
        let chunks = read_chunks(Trickle(Cursor::new(data.clone())), 8).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), data);
    }

    #[test]
    fn invalid_config_is_rejected_before_sending() {
        let (a, b) = ("10.0.0.1:1".parse().unwrap(), "10.0.0.2:2".parse().unwrap());
        let (end, _peer) = crate::link::link(a, b, crate::link::LinkConfig::perfect());
        let config = SenderConfig {
            window_size: 0,
            ..SenderConfig::default()
        };
        let err = send_reader(end, b, Cursor::new(vec![1u8]), &config, &Progress::new())
            .unwrap_err();
        assert!(matches!(err, SendError::Config(_)));
    }
}
