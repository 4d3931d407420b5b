//! In-pod probe agent
//!
//! Runs inside the injected container. Every interval it dials the
//! destination once, sends the configured message and writes one JSON
//! status record with cumulative counters to stdout.

pub mod sink;

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;

use crate::common::{Error, Result};
use crate::probe::stream::WireRecord;

/// Upper bound on a single dial-and-send attempt
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport used to reach the destination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    #[serde(alias = "TCP")]
    Tcp,
    #[serde(alias = "UDP")]
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// Agent settings, taken from flags or the environment of the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub protocol: Protocol,
    pub address: String,
    pub port: u16,
    pub message: String,
    pub interval: Duration,
}

/// Cumulative dial outcomes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub success: u64,
    pub fail: u64,
}

impl Counters {
    fn record(&mut self, ok: bool) {
        if ok {
            self.success += 1;
        } else {
            self.fail += 1;
        }
    }
}

/// Run the dial loop until cancelled, writing one record per cycle to `out`
pub async fn run<W: AsyncWrite + Unpin>(
    config: &AgentConfig,
    out: &mut W,
    cancel: &CancellationToken,
) -> Result<()> {
    if config.interval.is_zero() {
        return Err(Error::Config("interval must be greater than zero".to_string()));
    }

    let mut counters = Counters::default();
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::info!(
        protocol = %config.protocol,
        address = %config.address,
        port = config.port,
        "Probe agent started"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = dial_with_timeout(config) => outcome,
        };

        counters.record(outcome.is_ok());
        if let Err(e) = &outcome {
            tracing::debug!(error = %e, "Dial failed");
        }

        let record = WireRecord {
            success: Some(counters.success),
            fail: Some(counters.fail),
            msg: Some(config.message.clone()),
            error: outcome.err().map(|e| e.to_string()),
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        out.write_all(&line).await?;
        out.flush().await?;
    }

    tracing::info!(
        success = counters.success,
        fail = counters.fail,
        "Probe agent stopped"
    );
    Ok(())
}

async fn dial_with_timeout(config: &AgentConfig) -> Result<()> {
    match tokio::time::timeout(DIAL_TIMEOUT, dial_once(config)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("dial timed out after {}s", DIAL_TIMEOUT.as_secs()),
        ))),
    }
}

/// One connect-and-send attempt
pub async fn dial_once(config: &AgentConfig) -> Result<()> {
    let target = resolve(&config.address, config.port).await?;
    match config.protocol {
        Protocol::Tcp => {
            let mut stream = TcpStream::connect(target).await?;
            stream.write_all(config.message.as_bytes()).await?;
            stream.shutdown().await?;
        }
        Protocol::Udp => {
            let bind: SocketAddr = if target.is_ipv4() {
                ([0, 0, 0, 0], 0).into()
            } else {
                ([0u16; 8], 0).into()
            };
            let socket = UdpSocket::bind(bind).await?;
            socket.connect(target).await?;
            socket.send(config.message.as_bytes()).await?;
        }
    }
    Ok(())
}

async fn resolve(address: &str, port: u16) -> Result<SocketAddr> {
    lookup_host((address, port))
        .await?
        .next()
        .ok_or_else(|| Error::Config(format!("address '{}' did not resolve", address)))
}
