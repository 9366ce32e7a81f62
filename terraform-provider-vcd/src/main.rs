//! Terraform Provider for VMware Cloud Director
//!
//! Speaks the line-delimited JSON-RPC plugin protocol on stdin/stdout.
//! Requests are handled concurrently; responses are written in completion
//! order and matched by id. Logs go to stderr and, optionally, to a file.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use terraform_provider_vcd::provider::VcdProvider;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE_NAME: &str = "terraform-provider-vcd.log";

/// Terraform Provider for VMware Cloud Director
#[derive(Parser, Debug)]
#[command(name = "terraform-provider-vcd")]
#[command(about = "Terraform provider for VMware Cloud Director")]
struct Args {
    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Log level used when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, env = "TF_LOG", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Directory for a daily rotated log file
    #[arg(long, env = "VCD_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

fn init_logging(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let level = if args.debug {
        "debug".to_string()
    } else {
        args.log_level.to_ascii_lowercase()
    };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries the protocol, so the console layer writes to stderr
    let console_layer = if args.json_logs {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_ansi(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_thread_ids(true)
                .json()
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guard = init_logging(&args);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting Terraform provider for vCD");

    let provider = Arc::new(VcdProvider::new());
    let (tx, mut rx) = mpsc::channel::<String>(64);

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(response) = rx.recv().await {
            stdout.write_all(response.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let provider = Arc::clone(&provider);
        let tx = tx.clone();
        tokio::spawn(async move {
            let response = provider.handle_request(&line).await;
            if tx.send(response).await.is_err() {
                tracing::error!("response writer has stopped");
            }
        });
    }

    // Writer exits once every in-flight request has sent its response
    drop(tx);
    writer.await??;

    tracing::info!("Terraform provider shutting down");
    Ok(())
}
