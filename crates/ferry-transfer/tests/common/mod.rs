//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, unbounded};

use ferry_transfer::{
    Listener, Progress, ReceiveError, ReceiverConfig, SenderConfig, SessionReport, Transport,
};

/// Deterministic file contents with a prime period.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Sender tuned for tests: short ack clock, default everything else.
pub fn quick_sender() -> SenderConfig {
    SenderConfig {
        ack_timeout: Duration::from_millis(20),
        ..SenderConfig::default()
    }
}

pub fn quick_receiver() -> ReceiverConfig {
    ReceiverConfig {
        poll_interval: Duration::from_millis(10),
        ..ReceiverConfig::default()
    }
}

/// A listener serving sessions on its own thread until [`Served::stop`].
pub struct Served {
    pub addr: SocketAddr,
    pub progress: Arc<Progress>,
    sessions: Receiver<(SessionReport, Option<Vec<u8>>)>,
    handle: JoinHandle<Result<(), ReceiveError>>,
}

pub fn serve<T: Transport + Send + 'static>(transport: T) -> Served {
    let addr = transport.local_addr().unwrap();
    let progress = Arc::new(Progress::new());
    let (tx, sessions) = unbounded();

    let worker_progress = progress.clone();
    let handle = thread::spawn(move || {
        let mut listener = Listener::new(transport, quick_receiver(), worker_progress, |_| {
            Ok(Vec::new())
        })?;
        listener.serve(|report, output| {
            let _ = tx.send((report, output));
        })
    });

    Served {
        addr,
        progress,
        sessions,
        handle,
    }
}

impl Served {
    /// Wait for the next completed session.
    pub fn next_session(&self) -> (SessionReport, Option<Vec<u8>>) {
        self.sessions
            .recv_timeout(Duration::from_secs(10))
            .expect("no session completed")
    }

    /// Cancel the listener and wait for it to release its transport.
    pub fn stop(self) {
        self.progress.cancel();
        let result = self.handle.join().unwrap();
        assert!(matches!(result, Err(ReceiveError::Interrupted)));
    }
}
