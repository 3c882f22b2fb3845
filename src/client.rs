//! # Command Protocol Client
//!
//! Minimal TCP client for servers speaking the command protocol, used by the binary's
//! callers, integration tests and benchmarks.

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;
use tracing::debug;

use crate::codec::{CodecError, CommandCodec, ResponseFrame, ResponseFrameCodec};
use crate::models::Command;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to connect: {0}")]
    Connect(#[source] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Connection closed before a response arrived")]
    ConnectionClosed,

    #[error("No response within {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },
}

/// One connection to a command server; requests are answered in order
#[derive(Debug)]
pub struct CommandClient {
    framed: Framed<TcpStream, ResponseFrameCodec>,
    peer: SocketAddr,
}

impl CommandClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        Self::connect_with_codec(addr, CommandCodec::default()).await
    }

    pub async fn connect_with_codec(
        addr: impl ToSocketAddrs,
        codec: CommandCodec,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await.map_err(ClientError::Connect)?;
        let peer = stream.peer_addr().map_err(ClientError::Connect)?;
        debug!(peer = %peer, "Connected to command server");

        Ok(Self {
            framed: Framed::new(stream, ResponseFrameCodec::new(codec)),
            peer,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Send a command and wait for its response
    pub async fn send(&mut self, command: Command) -> Result<ResponseFrame, ClientError> {
        self.framed.send(command).await?;
        match self.framed.next().await {
            Some(frame) => Ok(frame?),
            None => Err(ClientError::ConnectionClosed),
        }
    }

    pub async fn send_with_timeout(
        &mut self,
        command: Command,
        timeout: Duration,
    ) -> Result<ResponseFrame, ClientError> {
        tokio::time::timeout(timeout, self.send(command))
            .await
            .map_err(|_| ClientError::TimedOut {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })?
    }
}
