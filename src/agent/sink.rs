//! Receiving end for probe traffic
//!
//! A listener that accepts whatever probes send, useful as a destination
//! when verifying a path into a workload that has no server of its own.

use std::net::SocketAddr;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::common::Result;

use super::Protocol;

const MAX_MESSAGE: usize = 64 * 1024;

/// A message received from a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub peer: SocketAddr,
    pub payload: Vec<u8>,
}

enum Socket {
    Tcp(TcpListener),
    Udp(UdpSocket),
}

/// A bound listener
pub struct Sink {
    socket: Socket,
}

impl Sink {
    pub async fn bind(protocol: Protocol, address: &str, port: u16) -> Result<Self> {
        let socket = match protocol {
            Protocol::Tcp => Socket::Tcp(TcpListener::bind((address, port)).await?),
            Protocol::Udp => Socket::Udp(UdpSocket::bind((address, port)).await?),
        };
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(match &self.socket {
            Socket::Tcp(listener) => listener.local_addr()?,
            Socket::Udp(socket) => socket.local_addr()?,
        })
    }

    /// Accept messages until cancelled, forwarding each one to `received`
    pub async fn serve(
        self,
        received: mpsc::UnboundedSender<Received>,
        cancel: CancellationToken,
    ) -> Result<()> {
        match self.socket {
            Socket::Tcp(listener) => loop {
                let (mut stream, peer) = tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    accepted = listener.accept() => accepted?,
                };
                let received = received.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let mut payload = Vec::new();
                    let mut limited = (&mut stream).take(MAX_MESSAGE as u64);
                    // Idle peers must not hold the sender open past shutdown
                    let read = tokio::select! {
                        _ = cancel.cancelled() => return,
                        read = limited.read_to_end(&mut payload) => read,
                    };
                    match read {
                        Ok(_) => {
                            let _ = received.send(Received { peer, payload });
                        }
                        Err(e) => tracing::debug!(%peer, error = %e, "Read from peer failed"),
                    }
                });
            },
            Socket::Udp(socket) => {
                let mut buf = vec![0u8; MAX_MESSAGE];
                loop {
                    let (len, peer) = tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        datagram = socket.recv_from(&mut buf) => datagram?,
                    };
                    let _ = received.send(Received {
                        peer,
                        payload: buf[..len].to_vec(),
                    });
                }
            }
        }
    }
}
