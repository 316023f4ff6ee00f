#![windows_subsystem = "windows"]
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use futures::FutureExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ct_translate_core::protocol::{self, Core};
use ct_translate_core::services::config;

/// Line-delimited JSON core for translating Cheat Engine table descriptions.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file; defaults to config.json beside the executable.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // stdout carries the protocol; diagnostics go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = args.config.unwrap_or_else(config::default_path);
    info!(config = %config_path.display(), "core starting");

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
            {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let core = Arc::new(Core::new(config_path, tx.clone()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(l)) => l,
            Ok(None) => break,
            Err(e) => {
                error!("failed to read stdin: {e}");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let core = Arc::clone(&core);
        let tx = tx.clone();

        tokio::spawn(async move {
            let result = AssertUnwindSafe(protocol::handle(&core, &line))
                .catch_unwind()
                .await;

            let response = match result {
                Ok(resp) => resp,
                Err(_) => serde_json::json!({
                    "status": "error",
                    "message": "internal core error"
                })
                .to_string(),
            };

            let _ = tx.send(response);
        });
    }

    // The writer stops once every in-flight request has dropped its sender.
    drop(tx);
    drop(core);
    let _ = writer.await;
}
