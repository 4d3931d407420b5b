//! CLI command definitions
//!
//! Defines the clap commands for kubectl-probe and the handlers behind them.

use clap::{Args, Subcommand};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::sink::Sink;
use crate::agent::{self, AgentConfig, Protocol};
use crate::cluster::{ClusterApi, KubeClient};
use crate::common::config::DEFAULT_PROBE_IMAGE;
use crate::common::Result;
use crate::probe::RandomSuffix;
use crate::testing::{load_suite, run_suite, RunContext};

#[derive(Subcommand)]
pub enum Commands {
    /// Run the probe agent (inside the injected container)
    Probe(ProbeArgs),

    /// Listen for probe traffic and log what arrives
    Sink(SinkArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ProbeArgs {
    /// Transport to dial with
    #[arg(long, env = "PROTOCOL", value_enum, ignore_case = true, default_value_t = Protocol::Tcp)]
    pub protocol: Protocol,

    /// Destination host name or IP address
    #[arg(long, env = "ADDRESS")]
    pub address: String,

    /// Destination port
    #[arg(long, env = "PORT")]
    pub port: u16,

    /// Payload sent on every attempt
    #[arg(long, env = "MESSAGE", default_value = "hello world")]
    pub message: String,

    /// Delay between attempts, e.g. 500ms, 5s, 1m30s
    #[arg(long, env = "INTERVAL", default_value = "5s", value_parser = humantime::parse_duration)]
    pub interval: Duration,
}

impl From<ProbeArgs> for AgentConfig {
    fn from(args: ProbeArgs) -> Self {
        AgentConfig {
            protocol: args.protocol,
            address: args.address,
            port: args.port,
            message: args.message,
            interval: args.interval,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SinkArgs {
    /// Transport to listen on
    #[arg(long, env = "PROTOCOL", value_enum, ignore_case = true, default_value_t = Protocol::Tcp)]
    pub protocol: Protocol,

    /// Address to bind
    #[arg(long, env = "ADDRESS", default_value = "0.0.0.0")]
    pub address: String,

    /// Port to bind
    #[arg(long, env = "PORT")]
    pub port: u16,
}

/// Options for running a suite
pub struct SuiteOptions<'a> {
    pub config: &'a Path,
    pub image: Option<&'a str>,
    pub context: Option<&'a str>,
}

/// Load a suite, connect to the cluster and run every case
pub async fn run_suite_file(options: SuiteOptions<'_>, cancel: &CancellationToken) -> Result<()> {
    let suite = load_suite(options.config)?;
    let cluster: Arc<dyn ClusterApi> = Arc::new(KubeClient::connect(options.context).await?);

    let image = options
        .image
        .or(suite.probe_image.as_deref())
        .unwrap_or(DEFAULT_PROBE_IMAGE);

    let ctx = RunContext {
        cluster: cluster.as_ref(),
        names: &RandomSuffix,
        image,
        timeouts: &suite.timeouts,
        cancel,
    };
    run_suite(&suite, &ctx).await.into_result()
}

/// Run the probe agent, writing status records to stdout
pub async fn run_probe(args: ProbeArgs, cancel: &CancellationToken) -> Result<()> {
    let config = AgentConfig::from(args);
    let mut stdout = tokio::io::stdout();
    agent::run(&config, &mut stdout, cancel).await
}

/// Run a sink until cancelled, logging every message received
pub async fn run_sink(args: SinkArgs, cancel: &CancellationToken) -> Result<()> {
    let sink = Sink::bind(args.protocol, &args.address, args.port).await?;
    tracing::info!(protocol = %args.protocol, addr = %sink.local_addr()?, "Sink listening");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut server = tokio::spawn(sink.serve(tx, cancel.clone()));

    let served = loop {
        tokio::select! {
            served = &mut server => break served,
            received = rx.recv() => match received {
                Some(received) => tracing::info!(
                    peer = %received.peer,
                    message = %String::from_utf8_lossy(&received.payload),
                    "Received"
                ),
                None => break (&mut server).await,
            },
        }
    };

    match served {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::other(e).into()),
    }
}
