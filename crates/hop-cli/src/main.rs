//! hop CLI - two-hop TCP tunnel
//!
//! Thin front end over the hop-proxy library: parses flags, sets up
//! logging, starts one hop and runs it until Ctrl-C.

mod cli;
mod config;
mod error;
mod output;

use clap::Parser;
use cli::{Cli, Commands, ForwardArgs, ProxyArgs};
use error::{CliError, Result};
use hop_proxy::TunnelHandle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    if let Err(e) = run(cli) {
        error!("{}", e);
        eprintln!("hop: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    match cli.command {
        Commands::Proxy(args) => rt.block_on(run_proxy(args, cli.silent)),
        Commands::Forward(args) => rt.block_on(run_forward(args, cli.silent)),
    }
}

/// Run the CONNECT proxy hop until Ctrl-C
async fn run_proxy(args: ProxyArgs, silent: bool) -> Result<()> {
    let config = config::proxy_config(&args)?;
    let handle = hop_proxy::start_proxy(config.clone()).await?;
    output::print_proxy_banner(silent, handle.local_addr, &config);
    serve_until_interrupted(handle).await
}

/// Run the chained forwarder hop until Ctrl-C
async fn run_forward(args: ForwardArgs, silent: bool) -> Result<()> {
    let config = config::forwarder_config(&args)?;
    let handle = hop_proxy::start_forwarder(config.clone()).await?;
    output::print_forward_banner(silent, handle.local_addr, &config);
    serve_until_interrupted(handle).await
}

/// Serve until Ctrl-C, or until the listening socket fails.
async fn serve_until_interrupted(handle: TunnelHandle) -> Result<()> {
    let mut signal_err = None;
    handle
        .run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Interrupted, shutting down"),
                Err(e) => signal_err = Some(e),
            }
        })
        .await?;

    match signal_err {
        Some(e) => Err(CliError::Signal(e)),
        None => Ok(()),
    }
}
