//! Tokio TCP server for the command protocol
//!
//! ```text
//! accept loop ── connection slot? ──┬─ persistent: Framed<CommandFrameCodec>, command after command
//!      │                            └─ one_shot:   read one command, respond, close
//!      └── shutdown (broadcast) stops accepting and ends idle connections
//! ```

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock, Semaphore};
use tokio::time::{sleep, Instant};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use super::ServerError;
use crate::adapters::CommandProtocolAdapter;
use crate::codec::{write_response, CodecError, CommandCodec, CommandFrameCodec};
use crate::config::{ConnectionMode, ProxyConfig, ServerConfig};
use crate::logging::log_connection_event;
use crate::models::{Command, ProxyResult};

/// TCP front end serving the command protocol through a [`CommandProtocolAdapter`]
///
/// # Examples
///
/// ```rust,no_run
/// use switchyard_core::adapters::{CommandProtocolAdapter, ServiceProxy};
/// use switchyard_core::config::ProxyConfig;
/// use switchyard_core::events::EventPublisher;
/// use switchyard_core::server::TcpCommandServer;
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ProxyConfig::default();
///     let proxy = ServiceProxy::from_config(&config, Arc::new(EventPublisher::default()));
///     let server = TcpCommandServer::from_config(&config, CommandProtocolAdapter::new(proxy));
///
///     let addr = server.start().await?;
///     println!("listening on {addr}");
///     server.stop().await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct TcpCommandServer {
    config: ServerConfig,
    codec: CommandCodec,
    adapter: CommandProtocolAdapter,
    shutdown_tx: broadcast::Sender<()>,
    state: Arc<RwLock<ServerState>>,
    counters: Arc<ServerCounters>,
    connection_slots: Arc<Semaphore>,
}

#[derive(Debug, Default)]
struct ServerState {
    running: bool,
    start_time: Option<DateTime<Utc>>,
    local_addr: Option<SocketAddr>,
}

#[derive(Debug, Default)]
struct ServerCounters {
    total_connections: AtomicU64,
    active_connections: AtomicUsize,
    rejected_connections: AtomicU64,
    commands_processed: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    pub running: bool,
    pub local_addr: Option<SocketAddr>,
    pub connection_mode: ConnectionMode,
    pub uptime_seconds: u64,
    pub total_connections: u64,
    pub active_connections: usize,
    pub rejected_connections: u64,
    pub commands_processed: u64,
}

impl TcpCommandServer {
    pub fn new(config: ServerConfig, codec: CommandCodec, adapter: CommandProtocolAdapter) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        let connection_slots = Arc::new(Semaphore::new(config.max_connections));

        Self {
            config,
            codec,
            adapter,
            shutdown_tx,
            state: Arc::new(RwLock::new(ServerState::default())),
            counters: Arc::new(ServerCounters::default()),
            connection_slots,
        }
    }

    pub fn from_config(config: &ProxyConfig, adapter: CommandProtocolAdapter) -> Self {
        Self::new(
            config.server.clone(),
            CommandCodec::new(config.codec.max_line_size),
            adapter,
        )
    }

    /// Bind and start accepting connections; returns the bound address
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut state = self.state.write().await;
        if state.running {
            return Err(ServerError::ServerAlreadyRunning);
        }

        let bind_failed = |e: std::io::Error| ServerError::BindFailed {
            address: self.config.bind_address.clone(),
            error: e.to_string(),
        };
        let listener = TcpListener::bind(&self.config.bind_address)
            .await
            .map_err(bind_failed)?;
        let local_addr = listener.local_addr().map_err(bind_failed)?;

        state.running = true;
        state.start_time = Some(Utc::now());
        state.local_addr = Some(local_addr);
        drop(state);

        info!(
            address = %local_addr,
            mode = %self.config.connection_mode,
            max_connections = self.config.max_connections,
            "🚀 Command server listening"
        );

        let server = self.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            server.accept_connections(listener, shutdown_rx).await;
        });

        Ok(local_addr)
    }

    /// Stop accepting, signal open connections and wait for them to drain
    ///
    /// Commands already executing are allowed to finish and answer, up to the configured
    /// graceful shutdown timeout.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let mut state = self.state.write().await;
        if !state.running {
            return Ok(());
        }

        info!("Stopping command server gracefully");
        let _ = self.shutdown_tx.send(());

        let deadline = Instant::now() + self.config.graceful_shutdown_timeout();
        while self.counters.active_connections.load(Ordering::Acquire) > 0
            && Instant::now() < deadline
        {
            sleep(Duration::from_millis(10)).await;
        }

        let remaining = self.counters.active_connections.load(Ordering::Acquire);
        if remaining > 0 {
            warn!(
                remaining = remaining,
                "Graceful shutdown timeout elapsed with connections still open"
            );
        }

        state.running = false;
        state.local_addr = None;
        info!("Command server stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.running
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.state.read().await.local_addr
    }

    pub async fn stats(&self) -> ServerStats {
        let state = self.state.read().await;

        ServerStats {
            running: state.running,
            local_addr: state.local_addr,
            connection_mode: self.config.connection_mode,
            uptime_seconds: state
                .start_time
                .filter(|_| state.running)
                .map(|start| (Utc::now() - start).num_seconds().max(0) as u64)
                .unwrap_or(0),
            total_connections: self.counters.total_connections.load(Ordering::Acquire),
            active_connections: self.counters.active_connections.load(Ordering::Acquire),
            rejected_connections: self.counters.rejected_connections.load(Ordering::Acquire),
            commands_processed: self.counters.commands_processed.load(Ordering::Acquire),
        }
    }

    async fn accept_connections(&self, listener: TcpListener, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.spawn_connection(stream, peer),
                        Err(e) => error!(error = %e, "Failed to accept connection"),
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("Connection acceptance loop shutting down");
                    break;
                }
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let permit = match self.connection_slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.counters
                    .rejected_connections
                    .fetch_add(1, Ordering::AcqRel);
                warn!(
                    peer = %peer,
                    max_connections = self.config.max_connections,
                    "Connection limit reached; refusing connection"
                );
                tokio::spawn(refuse_connection(stream));
                return;
            }
        };

        self.counters.total_connections.fetch_add(1, Ordering::AcqRel);
        let active = self.counters.active_connections.fetch_add(1, Ordering::AcqRel) + 1;
        log_connection_event("accepted", &peer.to_string(), active, None);

        let server = self.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let _permit = permit;
            let outcome = match server.config.connection_mode {
                ConnectionMode::Persistent => server.serve_persistent(stream, shutdown_rx).await,
                ConnectionMode::OneShot => server.serve_one_shot(stream, shutdown_rx).await,
            };

            let active = server
                .counters
                .active_connections
                .fetch_sub(1, Ordering::AcqRel)
                .saturating_sub(1);
            let details = outcome.err().map(|e| e.to_string());
            log_connection_event("closed", &peer.to_string(), active, details.as_deref());
        });
    }

    /// Serve commands until the client closes, goes idle, sends garbage or shutdown is signalled
    async fn serve_persistent(
        &self,
        stream: TcpStream,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), CodecError> {
        let mut framed = Framed::new(stream, CommandFrameCodec::new(self.codec));
        let idle_timeout = self.config.idle_timeout();

        loop {
            let next = tokio::select! {
                _ = shutdown_rx.recv() => return Ok(()),
                next = tokio::time::timeout(idle_timeout, framed.next()) => next,
            };

            match next {
                Err(_) => {
                    debug!(idle_ms = self.config.idle_timeout_ms, "Closing idle connection");
                    return Ok(());
                }
                Ok(None) => return Ok(()),
                Ok(Some(Ok(command))) => {
                    let result = self.process(command).await;
                    framed.send(result).await?;
                }
                Ok(Some(Err(e))) => {
                    if e.is_parse_error() {
                        warn!(error = %e, "Rejecting unparseable command");
                        framed.send(ProxyResult::failure(e.to_string())).await?;
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn serve_one_shot(
        &self,
        mut stream: TcpStream,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), CodecError> {
        let read = tokio::select! {
            _ = shutdown_rx.recv() => return Ok(()),
            read = tokio::time::timeout(self.config.idle_timeout(), self.codec.read_command(&mut stream)) => read,
        };

        let result = match read {
            Err(_) => {
                debug!(idle_ms = self.config.idle_timeout_ms, "Closing idle connection");
                return Ok(());
            }
            Ok(Ok(command)) => self.process(command).await,
            Ok(Err(e)) if e.is_parse_error() => {
                warn!(error = %e, "Rejecting unparseable command");
                ProxyResult::failure(e.to_string())
            }
            Ok(Err(e)) => return Err(e),
        };

        write_response(&mut stream, Some(&result)).await?;
        stream.shutdown().await?;
        Ok(())
    }

    async fn process(&self, command: Command) -> ProxyResult {
        self.counters
            .commands_processed
            .fetch_add(1, Ordering::AcqRel);
        self.adapter.handle(command).await
    }
}

async fn refuse_connection(mut stream: TcpStream) {
    let refusal = ProxyResult::failure("Too many connections");
    if write_response(&mut stream, Some(&refusal)).await.is_ok() {
        let _ = stream.shutdown().await;
    }
}

impl std::fmt::Debug for TcpCommandServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpCommandServer")
            .field("bind_address", &self.config.bind_address)
            .field("connection_mode", &self.config.connection_mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ServiceProxy;
    use crate::events::NullSink;
    use crate::execution::InvocationContext;
    use crate::registry::{Handler, HandlerError};
    use async_trait::async_trait;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn commands(&self) -> Vec<String> {
            vec!["echo".to_string(), "hold".to_string()]
        }

        async fn invoke(
            &self,
            _ctx: &InvocationContext,
            command: &Command,
        ) -> Result<Option<ProxyResult>, HandlerError> {
            if command.name == "hold" {
                sleep(Duration::from_millis(200)).await;
            }
            Ok(Some(
                ProxyResult::success()
                    .with_message(command.param("say").unwrap_or("ok"))
                    .with_data(command.payload_bytes().to_vec()),
            ))
        }
    }

    async fn server(mode: ConnectionMode, max_connections: usize) -> TcpCommandServer {
        let mut config = ProxyConfig::default();
        config.server.bind_address = "127.0.0.1:0".to_string();
        config.server.connection_mode = mode;
        config.server.max_connections = max_connections;
        config.server.graceful_shutdown_timeout_ms = 500;

        let proxy = ServiceProxy::from_config(&config, Arc::new(NullSink));
        proxy.registry().register(Arc::new(Echo)).await.unwrap();
        TcpCommandServer::from_config(&config, CommandProtocolAdapter::new(proxy))
    }

    #[tokio::test]
    async fn test_start_stop() {
        let server = server(ConnectionMode::Persistent, 10).await;
        assert!(!server.is_running().await);

        let addr = server.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(server.is_running().await);
        assert!(matches!(
            server.start().await,
            Err(ServerError::ServerAlreadyRunning)
        ));

        server.stop().await.unwrap();
        assert!(!server.is_running().await);
        assert_eq!(server.local_addr().await, None);
    }

    #[tokio::test]
    async fn test_persistent_connection_serves_many_commands() {
        let server = server(ConnectionMode::Persistent, 10).await;
        let addr = server.start().await.unwrap();

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half.write_all(b"echo say=one\necho say=two 3\nabc").await.unwrap();

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "one\n");

        line.clear();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "two 3\n");
        let mut payload = [0u8; 3];
        reader.read_exact(&mut payload).await.unwrap();
        assert_eq!(&payload, b"abc");

        server.stop().await.unwrap();
        assert_eq!(server.stats().await.commands_processed, 2);
    }

    #[tokio::test]
    async fn test_parse_error_answers_and_closes() {
        let server = server(ConnectionMode::Persistent, 10).await;
        let addr = server.start().await.unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"echo =oops\n").await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("Invalid syntax in command"));
        assert!(response.ends_with('\n'));

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_one_shot_closes_after_response() {
        let server = server(ConnectionMode::OneShot, 10).await;
        let addr = server.start().await.unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"echo say=hi\necho say=ignored\n").await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert_eq!(response, "hi\n");

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let server = server(ConnectionMode::Persistent, 1).await;
        let addr = server.start().await.unwrap();

        let mut first = TcpStream::connect(addr).await.unwrap();
        first.write_all(b"echo\n").await.unwrap();
        let mut buf = [0u8; 3];
        first.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok\n");

        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut response = String::new();
        second.read_to_string(&mut response).await.unwrap();
        assert_eq!(response, "Too many connections\n");
        assert_eq!(server.stats().await.rejected_connections, 1);

        drop(first);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_lets_in_flight_command_answer() {
        let server = server(ConnectionMode::Persistent, 10).await;
        let addr = server.start().await.unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"hold say=late\n").await.unwrap();
        sleep(Duration::from_millis(50)).await;

        let stopping = {
            let server = server.clone();
            tokio::spawn(async move { server.stop().await })
        };

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert_eq!(response, "late\n");
        stopping.await.unwrap().unwrap();
    }
}
