//! kubectl-probe - network reachability tests for Kubernetes workloads
//!
//! Injects a probe container into a running pod, watches it dial a
//! destination, and reports whether each declared case passed.

use std::path::PathBuf;

use clap::Parser;
use kubectl_probe::commands::{self, Commands, SuiteOptions};
use kubectl_probe::common::logging;
use kubectl_probe::Error;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "kubectl-probe", about = "Test network reachability between Kubernetes workloads")]
#[command(version, long_about = None)]
struct Cli {
    /// Test suite file (YAML or TOML)
    #[arg(long, short, env = "CONFIG")]
    config: Option<PathBuf>,

    /// Probe image to inject (default: ghcr.io/superorbital/kubectl-probe:latest)
    #[arg(long, env = "PROBE_IMAGE")]
    image: Option<String>,

    /// Kubeconfig context to use instead of the current one
    #[arg(long)]
    context: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Probe(_)) => logging::init_agent(),
        _ => logging::init_cli(cli.debug),
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::warn!("Interrupted, stopping");
        interrupt.cancel();
    });

    let result = match cli.command {
        Some(Commands::Probe(args)) => commands::run_probe(args, &cancel).await,
        Some(Commands::Sink(args)) => commands::run_sink(args, &cancel).await,
        None => match &cli.config {
            Some(config) => {
                commands::run_suite_file(
                    SuiteOptions {
                        config,
                        image: cli.image.as_deref(),
                        context: cli.context.as_deref(),
                    },
                    &cancel,
                )
                .await
            }
            None => Err(Error::Config(
                "no test suite given; pass --config or set CONFIG".to_string(),
            )),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Resolve on SIGINT or SIGTERM
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            tracing::debug!(error = %e, "Cannot install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT (Ctrl+C)"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
