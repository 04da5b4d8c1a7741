use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};

use ferry_transfer::{Progress, SendError, SenderConfig, TracingLogger, TransferState, send_file};

/// Exit status for a transfer stopped by Ctrl+C / SIGTERM.
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_send=info,ferry_transfer=info".into()),
        )
        .init();

    // Config: the file comes from the first argument or FERRY_FILE.
    let target = std::env::var("FERRY_TARGET").unwrap_or_else(|_| "127.0.0.1:12000".into());
    let target: SocketAddr = target
        .to_socket_addrs()
        .with_context(|| format!("cannot resolve FERRY_TARGET {}", target))?
        .next()
        .with_context(|| format!("FERRY_TARGET {} resolved to no address", target))?;

    let Some(file) = std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("FERRY_FILE"))
        .map(PathBuf::from)
    else {
        eprintln!("FATAL: no file to send.");
        eprintln!("       Usage: ferry-send <file>  (or set FERRY_FILE)");
        std::process::exit(1);
    };
    if !file.is_file() {
        eprintln!("FATAL: file '{}' not found.", file.display());
        std::process::exit(1);
    }

    let mut config = match SenderConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {}", e);
            std::process::exit(1);
        }
    };
    config.logger = Some(Arc::new(TracingLogger));

    info!("Sending '{}' to {}", file.display(), target);

    let progress = Arc::new(Progress::new());
    let worker_progress = progress.clone();
    let mut worker =
        tokio::task::spawn_blocking(move || send_file(&file, target, &config, &worker_progress));

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut cancelled = false;

    let result = loop {
        tokio::select! {
            result = &mut worker => break result?,
            _ = ticker.tick() => log_progress(&progress),
            _ = &mut shutdown, if !cancelled => {
                cancelled = true;
                progress.cancel();
            }
        }
    };

    match result {
        Ok(report) => {
            info!(
                "File transmission complete: {} bytes in {} chunks, {} retransmissions, {:.1}s",
                report.bytes,
                report.chunks,
                report.retransmissions,
                report.elapsed.as_secs_f64(),
            );
            Ok(())
        }
        Err(SendError::Interrupted) => {
            warn!("Transfer interrupted, socket closed");
            std::process::exit(EXIT_INTERRUPTED);
        }
        Err(e) => {
            error!("File transmission failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn log_progress(progress: &Progress) {
    match progress.state() {
        TransferState::Sending => info!(
            "Progress: {}/{} chunks ({:.0}%), {} retransmissions",
            progress.chunks_done.load(Ordering::Relaxed),
            progress.chunks_total.load(Ordering::Relaxed),
            progress.fraction() * 100.0,
            progress.retransmits.load(Ordering::Relaxed),
        ),
        TransferState::Finishing => info!("All chunks acknowledged, closing the stream"),
        _ => {}
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, stopping transfer..."),
            _ = sigterm.recv() => info!("Received SIGTERM, stopping transfer..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, stopping transfer...");
    }
}
