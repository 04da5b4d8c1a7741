//! Integration test: send files to localhost over real UDP sockets and verify
//! they arrive intact.

mod common;

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

use ferry_transfer::{MAX_PAYLOAD, Progress, TransferState, UdpTransport, send_file};

use common::{pattern, quick_sender, serve};

fn loopback() -> UdpTransport {
    UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap()
}

fn input_file(name: &str, data: &[u8]) -> PathBuf {
    let dir = std::env::temp_dir().join("ferry_loopback_test");
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, data).unwrap();
    path
}

fn roundtrip(name: &str, size: usize) {
    let data = pattern(size);
    let path = input_file(name, &data);

    let served = serve(loopback());
    let progress = Progress::new();
    let report = send_file(&path, served.addr, &quick_sender(), &progress).unwrap();

    let (session, output) = served.next_session();
    served.stop();

    let expected_chunks = size.div_ceil(MAX_PAYLOAD) as u32;
    assert_eq!(report.chunks, expected_chunks);
    assert_eq!(report.bytes, size as u64);
    assert_eq!(progress.state(), TransferState::Complete);

    assert_eq!(session.eof_seq, expected_chunks);
    assert_eq!(session.chunks_written, expected_chunks);
    assert_eq!(output.unwrap_or_default(), data);
}

#[test]
fn loopback_ten_thousand_bytes() {
    roundtrip("ten_thousand.bin", 10_000);
}

#[test]
fn loopback_exact_chunk_boundary() {
    roundtrip("boundary.bin", MAX_PAYLOAD * 3);
}

#[test]
fn loopback_one_megabyte() {
    roundtrip("one_megabyte.bin", 1024 * 1024);
}

#[test]
fn loopback_empty_file_opens_no_output() {
    let path = input_file("empty.bin", &[]);

    let served = serve(loopback());
    let report = send_file(&path, served.addr, &quick_sender(), &Progress::new()).unwrap();
    let (session, output) = served.next_session();
    served.stop();

    assert_eq!(report.chunks, 0);
    assert!(report.eof_rounds >= 1);
    assert_eq!(session.eof_seq, 0);
    assert!(output.is_none());
}

#[test]
fn loopback_sessions_back_to_back() {
    let first = pattern(9_000);
    let second: Vec<u8> = pattern(5_000).into_iter().rev().collect();
    let first_path = input_file("first.bin", &first);
    let second_path = input_file("second.bin", &second);

    let served = serve(loopback());
    send_file(&first_path, served.addr, &quick_sender(), &Progress::new()).unwrap();
    send_file(&second_path, served.addr, &quick_sender(), &Progress::new()).unwrap();

    let (one, one_out) = served.next_session();
    let (two, two_out) = served.next_session();
    let completed = served
        .progress
        .sessions_completed
        .load(std::sync::atomic::Ordering::Relaxed);
    served.stop();

    assert_eq!(one.chunks_written, 3);
    assert_eq!(two.chunks_written, 2);
    assert_eq!(one_out.unwrap(), first);
    assert_eq!(two_out.unwrap(), second);
    assert_eq!(completed, 2);
}

#[test]
fn missing_file_is_an_io_error() {
    let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
    let missing = std::env::temp_dir().join("ferry_loopback_test_does_not_exist.bin");
    let err = send_file(&missing, peer, &quick_sender(), &Progress::new()).unwrap_err();
    assert!(matches!(err, ferry_transfer::SendError::Io(_)));
}
