//! PeerChat CLI: console front-end for a PeerChat endpoint.
//!
//! Loads the config, starts a [`PeerNode`], connects to the peers marked
//! `autoconnect`, and then reads `/commands` from stdin until `/quit`,
//! EOF or Ctrl+C. Incoming events are printed to stdout.

mod cli;
mod commands;
mod config;
mod output;

use crate::cli::Cli;
use crate::commands::{autoconnect, execute, parse_command, Flow};
use clap::Parser;
use peerchat_types::ChatConfig;
use peerchat_wire::{NodeConfig, PeerNode};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tracing::{error, info};

fn env_filter(default_level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

fn init_tracing_stderr(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level))
        .with_writer(std::io::stderr)
        .init();
}

/// Send tracing to a file so log lines don't mix with chat output.
fn init_tracing_file(path: &Path, default_level: &str) {
    if let Some(dir) = path.parent() {
        let _ = std::fs::create_dir_all(dir);
    }
    match std::fs::OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter(default_level))
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        Err(e) => {
            eprintln!("cannot open log file {}: {e}; logging to stderr", path.display());
            init_tracing_stderr(default_level);
        }
    }
}

async fn resolve_listen_addr(config: &ChatConfig) -> Result<SocketAddr, String> {
    let endpoint = config.listen_endpoint();
    let mut addrs = tokio::net::lookup_host(endpoint.as_str())
        .await
        .map_err(|e| format!("cannot resolve listen address {endpoint}: {e}"))?;
    let addr = addrs.next();
    addr.ok_or_else(|| format!("listen address {endpoint} resolved to nothing"))
}

async fn run(config: ChatConfig, json: bool) -> i32 {
    let listen_addr = match resolve_listen_addr(&config).await {
        Ok(addr) => addr,
        Err(e) => {
            error!("{e}");
            eprintln!("peerchat: {e}");
            return 2;
        }
    };

    let printer = Arc::new(output::Printer::new(json));
    let node = match PeerNode::start(NodeConfig { listen_addr }, printer).await {
        Ok(node) => node,
        Err(e) => {
            eprintln!("peerchat: {e}");
            return 1;
        }
    };
    info!(name = %config.name, addr = %node.local_addr(), "PeerChat endpoint started");

    autoconnect(&node, &config).await;

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "failed to read stdin");
                break;
            }
        };
        match parse_command(&line) {
            Ok(Some(command)) => {
                if execute(&node, &config, command).await == Flow::Quit {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => eprintln!("error: {e}"),
        }
    }

    node.stop().await;
    0
}

fn main() {
    let cli = Cli::parse();

    let (mut config, source) = config::load_config(cli.config.as_deref());
    cli.apply(&mut config);

    match config.logging.file.clone() {
        Some(path) => init_tracing_file(&path, &config.log_level),
        None => init_tracing_stderr(&config.log_level),
    }
    source.log();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("peerchat: failed to create Tokio runtime: {e}");
            std::process::exit(1);
        }
    };
    let code = rt.block_on(run(config, cli.json));
    // A pending stdin read sits on a blocking thread and would stall a plain drop.
    rt.shutdown_timeout(std::time::Duration::from_millis(200));
    std::process::exit(code);
}
