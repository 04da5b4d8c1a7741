//! Integration test: transfers over the in-memory link under loss,
//! duplication and reordering, plus the two distinct failure outcomes.

mod common;

use std::collections::BTreeSet;
use std::io::{self, Cursor};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use ferry_transfer::{
    LinkConfig, LinkEnd, Progress, SendError, SenderConfig, TransferState, Transport,
    decode_packet, encode_ack, link, read_chunks, send_reader,
};

use common::{pattern, quick_sender, serve};

fn addrs() -> (SocketAddr, SocketAddr) {
    ("10.0.0.1:40000".parse().unwrap(), "10.0.0.2:12001".parse().unwrap())
}

/// Records the sequence of every packet sent through the inner transport.
struct Recording<T> {
    inner: T,
    seqs: Mutex<Vec<u32>>,
}

impl<T: Transport> Transport for Recording<T> {
    fn send_to(&self, datagram: &[u8], peer: SocketAddr) -> io::Result<()> {
        if let Ok(packet) = decode_packet(datagram) {
            self.seqs.lock().unwrap().push(packet.seq);
        }
        self.inner.send_to(datagram, peer)
    }

    fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        self.inner.recv_from(buf, timeout)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[test]
fn ten_thousand_bytes_split_as_expected() {
    let chunks = read_chunks(Cursor::new(pattern(10_000)), 4092).unwrap();
    let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![4092, 4092, 1816]);
}

#[test]
fn ten_thousand_bytes_survive_twenty_percent_loss() {
    let (s_addr, r_addr) = addrs();
    let (sender_end, receiver_end) = link(s_addr, r_addr, LinkConfig::lossy(0.2, 42));
    let data = pattern(10_000);

    let served = serve(receiver_end);
    let report = send_reader(
        sender_end,
        r_addr,
        Cursor::new(data.clone()),
        &quick_sender(),
        &Progress::new(),
    )
    .unwrap();
    let (session, output) = served.next_session();
    served.stop();

    assert_eq!(report.chunks, 3);
    assert_eq!(session.eof_seq, 3);
    assert_eq!(session.peer, s_addr);
    assert_eq!(output.unwrap(), data);
}

#[test]
fn duplication_and_reordering_do_not_corrupt_output() {
    let (s_addr, r_addr) = addrs();
    let config = LinkConfig {
        loss_rate: 0.1,
        duplicate_rate: 0.3,
        reorder_rate: 0.3,
        seed: 7,
    };
    let (sender_end, receiver_end) = link(s_addr, r_addr, config);
    let data = pattern(200_000);

    let served = serve(receiver_end);
    send_reader(
        sender_end,
        r_addr,
        Cursor::new(data.clone()),
        &quick_sender(),
        &Progress::new(),
    )
    .unwrap();
    let (session, output) = served.next_session();
    served.stop();

    assert_eq!(session.chunks_written, 49);
    assert_eq!(output.unwrap(), data);
}

#[test]
fn heavy_loss_forces_retransmissions() {
    let (s_addr, r_addr) = addrs();
    let (sender_end, receiver_end) = link(s_addr, r_addr, LinkConfig::lossy(0.5, 3));
    let data = pattern(3_000);
    let config = SenderConfig {
        max_payload: 100,
        ..quick_sender()
    };

    let served = serve(receiver_end);
    let progress = Progress::new();
    let report = send_reader(sender_end, r_addr, Cursor::new(data.clone()), &config, &progress)
        .unwrap();
    let (_, output) = served.next_session();
    served.stop();

    assert_eq!(report.chunks, 30);
    assert!(report.retransmissions > 0);
    assert!(report.timeouts > 0);
    assert_eq!(progress.retransmits.load(Ordering::Relaxed), report.retransmissions);
    assert_eq!(progress.chunks_done.load(Ordering::Relaxed), 30);
    assert_eq!(output.unwrap(), data);
}

#[test]
fn wire_carries_every_chunk_and_one_marker() {
    let (s_addr, r_addr) = addrs();
    let (sender_end, receiver_end) = link(s_addr, r_addr, LinkConfig::lossy(0.2, 11));
    let recording = Recording {
        inner: sender_end,
        seqs: Mutex::new(Vec::new()),
    };
    let config = SenderConfig {
        max_payload: 512,
        ..quick_sender()
    };

    let served = serve(receiver_end);
    send_reader(&recording, r_addr, Cursor::new(pattern(5_000)), &config, &Progress::new())
        .unwrap();
    served.next_session();
    served.stop();

    // ceil(5000 / 512) = 10 chunks, sequences 0..=10 with 10 the marker.
    let distinct: BTreeSet<u32> = recording.seqs.into_inner().unwrap().into_iter().collect();
    assert_eq!(distinct, (0..=10).collect());
}

#[test]
fn total_loss_fails_delivery_of_first_chunk() {
    let (s_addr, r_addr) = addrs();
    let (sender_end, _receiver_end) = link(s_addr, r_addr, LinkConfig::lossy(1.0, 1));
    let config = SenderConfig {
        max_sends: 3,
        ack_timeout: Duration::from_millis(10),
        ..SenderConfig::default()
    };

    let progress = Progress::new();
    let err = send_reader(sender_end, r_addr, Cursor::new(pattern(10_000)), &config, &progress)
        .unwrap_err();
    assert!(matches!(err, SendError::DeliveryFailed { seq: 0, sends: 3 }));
    assert_eq!(progress.state(), TransferState::Failed);
}

#[test]
fn unacknowledged_marker_fails_the_handshake() {
    let (s_addr, r_addr) = addrs();
    let (sender_end, peer_end) = link(s_addr, r_addr, LinkConfig::perfect());

    // A peer that acknowledges data but never the end-of-stream marker.
    let peer = thread::spawn(move || {
        let mut buf = [0u8; 8192];
        while let Some((len, src)) = peer_end
            .recv_from(&mut buf, Duration::from_millis(300))
            .unwrap()
        {
            let packet = decode_packet(&buf[..len]).unwrap();
            if !packet.is_eof() {
                peer_end.send_to(&encode_ack(packet.seq), src).unwrap();
            }
        }
    });

    let config = SenderConfig {
        eof_max_rounds: 3,
        ..quick_sender()
    };
    let progress = Progress::new();
    let err = send_reader(sender_end, r_addr, Cursor::new(pattern(10_000)), &config, &progress)
        .unwrap_err();
    peer.join().unwrap();

    assert!(matches!(
        err,
        SendError::EofHandshakeFailed { eof_seq: 3, rounds: 3 }
    ));
    assert_eq!(progress.chunks_done.load(Ordering::Relaxed), 3);
    assert_eq!(progress.state(), TransferState::Failed);
}

#[test]
fn cancelled_sender_stops_before_sending() {
    let (s_addr, r_addr) = addrs();
    let (sender_end, receiver_end): (LinkEnd, LinkEnd) =
        link(s_addr, r_addr, LinkConfig::perfect());

    let progress = Progress::new();
    progress.cancel();
    let err = send_reader(sender_end, r_addr, Cursor::new(pattern(100)), &quick_sender(), &progress)
        .unwrap_err();
    assert!(matches!(err, SendError::Interrupted));
    assert_eq!(progress.state(), TransferState::Cancelled);

    let mut buf = [0u8; 64];
    assert!(
        receiver_end
            .recv_from(&mut buf, Duration::from_millis(20))
            .unwrap()
            .is_none()
    );
}
