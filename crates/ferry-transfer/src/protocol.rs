//! Datagram format for ferry transfers.
//!
//! ```text
//! data / EOF packet:  [0..4] Sequence number (u32 BE)
//!                     [4..]  Payload (0..=max_payload bytes)
//! acknowledgment:     [0..4] Sequence number (u32 BE)
//! ```
//!
//! A packet with an empty payload is the end-of-stream marker; its sequence
//! number is the total chunk count of the transfer. There is no checksum and
//! no version field: integrity is left to the underlying transport.

use crate::error::DecodeError;

/// Header size in bytes.
pub const HEADER_LEN: usize = 4;

/// Default maximum payload bytes per datagram.
pub const MAX_PAYLOAD: usize = 4092;

/// Default datagram size (header + payload) = 4096.
pub const MAX_DATAGRAM: usize = HEADER_LEN + MAX_PAYLOAD;

/// Largest payload that still fits a single IPv4 UDP datagram.
pub const MAX_UDP_PAYLOAD: usize = 65_507 - HEADER_LEN;

/// Default number of chunks in flight.
pub const WINDOW_SIZE: u32 = 10;

/// Default cap on transmissions of a single chunk before the transfer aborts.
pub const MAX_SENDS: u32 = 1000;

/// Default ack wait, doubling as the retransmission clock (ms).
pub const ACK_TIMEOUT_MS: u64 = 200;

/// Default number of EOF send rounds before giving up.
pub const EOF_MAX_ROUNDS: u32 = 100;

/// Copies of every data or EOF packet put on the wire per send.
pub const DATA_COPIES: u32 = 2;

/// Copies of every acknowledgment put on the wire.
pub const ACK_COPIES: u32 = 3;

/// Receiver socket poll interval used to notice cancellation (ms).
pub const POLL_INTERVAL_MS: u64 = 100;

/// OS socket buffer size (4 MB).
pub const UDP_SOCKET_BUFFER: usize = 4 * 1024 * 1024;

/// A decoded data or end-of-stream packet borrowing the datagram it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
    pub seq: u32,
    pub payload: &'a [u8],
}

impl Packet<'_> {
    /// True for the end-of-stream marker (empty payload).
    #[inline]
    pub fn is_eof(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Encode a packet into the provided buffer. Returns bytes written.
///
/// # Panics
/// Panics if `buf` is smaller than `HEADER_LEN + payload.len()`.
pub fn encode_packet(buf: &mut [u8], seq: u32, payload: &[u8]) -> usize {
    let total = HEADER_LEN + payload.len();
    assert!(buf.len() >= total);

    buf[0..HEADER_LEN].copy_from_slice(&seq.to_be_bytes());
    buf[HEADER_LEN..total].copy_from_slice(payload);
    total
}

/// Encode the end-of-stream marker for a transfer of `chunk_count` chunks.
pub fn encode_eof(chunk_count: u32) -> [u8; HEADER_LEN] {
    chunk_count.to_be_bytes()
}

/// Encode an acknowledgment for `seq`.
pub fn encode_ack(seq: u32) -> [u8; HEADER_LEN] {
    seq.to_be_bytes()
}

/// Decode a data or end-of-stream packet.
pub fn decode_packet(data: &[u8]) -> Result<Packet<'_>, DecodeError> {
    let seq = read_seq(data)?;
    Ok(Packet {
        seq,
        payload: &data[HEADER_LEN..],
    })
}

/// Decode an acknowledgment. Bytes past the header are ignored.
pub fn decode_ack(data: &[u8]) -> Result<u32, DecodeError> {
    read_seq(data)
}

fn read_seq(data: &[u8]) -> Result<u32, DecodeError> {
    match data.first_chunk::<HEADER_LEN>() {
        Some(header) => Ok(u32::from_be_bytes(*header)),
        None => Err(DecodeError::Truncated { len: data.len() }),
    }
}

/// Number of data chunks for a source of `size` bytes: ceil(size / max_payload).
pub fn chunk_count(size: u64, max_payload: usize) -> u64 {
    size.div_ceil(max_payload as u64)
}
