// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

/// Transparent packet delay engine.
#[derive(Debug, Parser)]
#[command(name = "delayline", version, about)]
struct Args {
    /// Per-packet hold time in milliseconds (0..=1000).
    #[arg(long, env = "DELAYLINE_DELAY_MS", default_value_t = 100)]
    delay_ms: u64,

    /// WinDivert filter expression; "true" captures all traffic.
    #[arg(long, env = "DELAYLINE_FILTER", default_value = "true")]
    filter: String,

    /// Log as JSON lines instead of text.
    #[arg(long, env = "DELAYLINE_LOG_JSON")]
    log_json: bool,
}

fn main() {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    if let Err(e) = run(args) {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

#[cfg(windows)]
fn run(args: Args) -> anyhow::Result<()> {
    use tracing::{info, warn};

    use delayline::{Engine, EngineEvent};

    let engine = Engine::windivert(args.filter);
    engine.on_event(|event| match event {
        EngineEvent::Status { text } => info!("{text}"),
        EngineEvent::Error { text } => warn!("{text}"),
    });

    engine
        .start(args.delay_ms)
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let stdin = std::io::stdin();
    delayline::console::run(&engine, stdin.lock(), std::io::stdout())?;
    Ok(())
}

#[cfg(not(windows))]
fn run(args: Args) -> anyhow::Result<()> {
    anyhow::bail!(
        "packet diversion needs the WinDivert driver, which is Windows-only \
         (requested {}ms delay, filter {:?})",
        args.delay_ms,
        args.filter
    );
}
