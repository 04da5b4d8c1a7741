//! End-of-stream handshake, sender side.
//!
//! Runs after the window loop confirmed every chunk. The marker is a header
//! with no payload whose sequence is the chunk count N. Each round sends it
//! `data_copies` times and waits `ack_timeout` for an ack equal to N; acks for
//! anything else (late data acks) are skipped without ending the round.

use std::net::SocketAddr;
use std::time::Instant;

use crate::config::SenderConfig;
use crate::error::SendError;
use crate::logging::{SessionLog, TransferEvent};
use crate::progress::Progress;
use crate::protocol::{decode_ack, encode_eof};
use crate::transport::{Transport, send_copies};

/// How the handshake went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Handshake {
    pub rounds: u32,
    pub datagrams_sent: u64,
}

/// Exchange the end-of-stream marker for a transfer of `eof_seq` chunks.
pub(crate) fn finish<T: Transport + ?Sized>(
    transport: &T,
    peer: SocketAddr,
    eof_seq: u32,
    config: &SenderConfig,
    progress: &Progress,
    log: &SessionLog,
) -> Result<Handshake, SendError> {
    let marker = encode_eof(eof_seq);
    let mut ack_buf = [0u8; 64];
    let mut datagrams_sent = 0u64;

    for round in 1..=config.eof_max_rounds {
        if progress.is_cancelled() {
            return Err(SendError::Interrupted);
        }

        send_copies(transport, &marker, peer, config.data_copies)?;
        datagrams_sent += config.data_copies as u64;
        Progress::add(&progress.datagrams_sent, config.data_copies as u64);
        log.emit(TransferEvent::EofSent { eof_seq, round });

        let deadline = Instant::now() + config.ack_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match transport.recv_from(&mut ack_buf, remaining)? {
                Some((len, _src)) => {
                    if decode_ack(&ack_buf[..len]) == Ok(eof_seq) {
                        return Ok(Handshake {
                            rounds: round,
                            datagrams_sent,
                        });
                    }
                }
                None => break,
            }
        }
    }

    log.emit(TransferEvent::EofHandshakeFailed {
        eof_seq,
        rounds: config.eof_max_rounds,
    });
    Err(SendError::EofHandshakeFailed {
        eof_seq,
        rounds: config.eof_max_rounds,
    })
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::link::{LinkConfig, link};
    use crate::protocol::{decode_packet, encode_ack};

    fn addrs() -> (SocketAddr, SocketAddr) {
        ("10.0.0.1:1000".parse().unwrap(), "10.0.0.2:2000".parse().unwrap())
    }

    fn quick_config(rounds: u32) -> SenderConfig {
        SenderConfig {
            ack_timeout: Duration::from_millis(20),
            eof_max_rounds: rounds,
            ..SenderConfig::default()
        }
    }

    fn silent_log(peer: SocketAddr) -> SessionLog {
        SessionLog::new(None, "sender", peer)
    }

    #[test]
    fn confirmed_after_matching_ack() {
        let (s_addr, r_addr) = addrs();
        let (sender_end, receiver_end) = link(s_addr, r_addr, LinkConfig::perfect());

        let peer = thread::spawn(move || {
            let mut buf = [0u8; 64];
            let (len, src) = receiver_end
                .recv_from(&mut buf, Duration::from_secs(2))
                .unwrap()
                .unwrap();
            let pkt = decode_packet(&buf[..len]).unwrap();
            assert!(pkt.is_eof());
            // A stale data ack first, then the real one.
            receiver_end.send_to(&encode_ack(1), src).unwrap();
            receiver_end.send_to(&encode_ack(pkt.seq), src).unwrap();
            receiver_end
        });

        let config = SenderConfig {
            ack_timeout: Duration::from_secs(2),
            ..quick_config(5)
        };
        let progress = Progress::new();
        let handshake = finish(
            &sender_end,
            r_addr,
            4,
            &config,
            &progress,
            &silent_log(r_addr),
        )
        .unwrap();
        assert_eq!(handshake.rounds, 1);
        assert_eq!(handshake.datagrams_sent, 2);
        peer.join().unwrap();
    }

    #[test]
    fn fails_distinctly_when_never_acked() {
        let (s_addr, r_addr) = addrs();
        let (sender_end, _receiver_end) = link(s_addr, r_addr, LinkConfig::perfect());

        let progress = Progress::new();
        let err = finish(
            &sender_end,
            r_addr,
            3,
            &quick_config(3),
            &progress,
            &silent_log(r_addr),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SendError::EofHandshakeFailed { eof_seq: 3, rounds: 3 }
        ));
    }

    #[test]
    fn cancellation_stops_the_handshake() {
        let (s_addr, r_addr) = addrs();
        let (sender_end, _receiver_end) = link(s_addr, r_addr, LinkConfig::perfect());

        let progress = Progress::new();
        progress.cancel();
        let err = finish(
            &sender_end,
            r_addr,
            0,
            &quick_config(3),
            &progress,
            &silent_log(r_addr),
        )
        .unwrap_err();
        assert!(matches!(err, SendError::Interrupted));
    }
}
