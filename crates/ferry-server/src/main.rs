use std::fs::File;
use std::io::BufWriter;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use ferry_transfer::{
    Listener, Progress, ReceiveError, ReceiverConfig, TracingLogger, UdpTransport,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_recv=info,ferry_transfer=info".into()),
        )
        .init();

    // Config
    let host = std::env::var("FERRY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("FERRY_PORT")
        .unwrap_or_else(|_| "12001".into())
        .parse()?;
    let output_dir: PathBuf = std::env::var("FERRY_OUTPUT_DIR")
        .unwrap_or_else(|_| ".".into())
        .into();
    let ext = std::env::var("FERRY_OUTPUT_EXT").unwrap_or_else(|_| "jpg".into());

    let mut config = match ReceiverConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {}", e);
            std::process::exit(1);
        }
    };
    config.logger = Some(Arc::new(TracingLogger));

    std::fs::create_dir_all(&output_dir)?;

    let bind_addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let transport = UdpTransport::bind(bind_addr)?;
    info!("Receiver listening on {}", bind_addr);
    info!(
        "Each file is saved as {} based on the sender",
        output_path(&output_dir, "<ip>_<port>", &ext).display()
    );

    let progress = Arc::new(Progress::new());
    let worker_progress = progress.clone();
    let mut worker = tokio::task::spawn_blocking(move || -> Result<(), ReceiveError> {
        let mut listener = Listener::new(transport, config, worker_progress, |peer| {
            let path = output_path(&output_dir, &sender_tag(peer), &ext);
            info!("Writing transfer from {} to {}", peer, path.display());
            File::create(&path).map(BufWriter::new)
        })?;
        listener.serve(|report, output| {
            // Dropping the writer closes the file.
            drop(output);
            info!(
                "Received {} bytes in {} chunks from {} ({} duplicates, {:.1}s)",
                report.bytes_written,
                report.chunks_written,
                report.peer,
                report.duplicates,
                report.elapsed.as_secs_f64(),
            );
        })
    });

    tokio::select! {
        result = &mut worker => {
            // serve only returns on failure
            result??;
            return Ok(());
        }
        _ = shutdown_signal() => {}
    }

    progress.cancel();
    match worker.await? {
        Ok(()) | Err(ReceiveError::Interrupted) => {
            info!("Receiver socket closed");
            Ok(())
        }
        Err(e) => {
            warn!("Receiver stopped with error: {}", e);
            Err(e.into())
        }
    }
}

/// `<ip>_<port>` with IPv6 colons made filesystem-safe.
fn sender_tag(peer: SocketAddr) -> String {
    format!("{}_{}", peer.ip().to_string().replace(':', "-"), peer.port())
}

fn output_path(dir: &Path, tag: &str, ext: &str) -> PathBuf {
    dir.join(format!("received_{}.{}", tag, ext))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
