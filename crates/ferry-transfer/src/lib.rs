//! Ferry: reliable, ordered, single-file transfer over UDP.
//!
//! - Sender: selective-repeat window of fixed-size chunks, each data packet
//!   sent twice, whole outstanding window resent on ack timeout
//! - Receiver: reorder buffer, append-only in-order writes, every ack sent
//!   three times
//! - End of stream: an empty packet whose sequence is the chunk count,
//!   exchanged until acknowledged
//! - [`Transport`] seam with a real UDP socket and an in-memory lossy link

mod eof;

pub mod config;
pub mod error;
pub mod link;
pub mod listener;
pub mod logging;
pub mod progress;
pub mod protocol;
pub mod reassembler;
pub mod sender;
pub mod transport;
pub mod window;

// Re-export key types for convenience.
pub use config::{ReceiverConfig, SenderConfig, env_setting};
pub use error::{ConfigError, DecodeError, ReceiveError, SendError};
pub use link::{LinkConfig, LinkEnd, LinkStats, link};
pub use listener::{Listener, SessionReport};
pub use logging::{NullLogger, TracingLogger, TransferEvent, TransferLog, TransferLogger};
pub use progress::{Progress, TransferState};
pub use protocol::{
    HEADER_LEN, MAX_DATAGRAM, MAX_PAYLOAD, Packet, decode_ack, decode_packet, encode_ack,
    encode_eof, encode_packet,
};
pub use reassembler::{Action, Reassembler, ReassemblyStats};
pub use sender::{TransferReport, read_chunks, send_file, send_reader};
pub use transport::{Transport, UdpTransport, create_udp_socket};
pub use window::{AckOutcome, Window};
