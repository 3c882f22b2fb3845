//! Switchyard command server
//!
//! Loads configuration, registers the sample `ping` and arithmetic handlers and serves the
//! command protocol over TCP until Ctrl-C.

use std::sync::Arc;
use tokio::signal;
use tracing::info;

use switchyard_core::adapters::{CommandProtocolAdapter, ServiceProxy};
use switchyard_core::config::{ConfigManager, ConfigurationError};
use switchyard_core::error::Result;
use switchyard_core::events::{EventPublisher, RequestLogger};
use switchyard_core::handlers::{ArithmeticHandler, PingHandler};
use switchyard_core::logging::init_structured_logging;
use switchyard_core::server::TcpCommandServer;

#[tokio::main]
async fn main() -> Result<()> {
    init_structured_logging();

    let manager = match ConfigManager::load() {
        Ok(manager) => manager,
        Err(ConfigurationError::ConfigFileNotFound { .. }) => {
            ConfigManager::with_defaults(&ConfigManager::detect_environment())
        }
        Err(e) => return Err(e.into()),
    };
    let config = manager.config();

    let publisher = EventPublisher::new(config.events.channel_capacity);
    let request_logger = config
        .events
        .request_logging
        .then(|| RequestLogger::new(&publisher).spawn());

    let proxy = ServiceProxy::from_config(config, Arc::new(publisher));
    proxy.registry().register(Arc::new(PingHandler)).await?;
    proxy.registry().register(Arc::new(ArithmeticHandler)).await?;
    info!(commands = ?proxy.registry().commands(), "Handlers registered");

    let server = TcpCommandServer::from_config(config, CommandProtocolAdapter::new(proxy.clone()));
    let addr = server.start().await?;
    info!(address = %addr, environment = %manager.environment(), "Switchyard ready");

    signal::ctrl_c().await?;
    info!("Shutdown signal received");

    server.stop().await?;
    proxy.registry().shutdown_all().await;
    if let Some(task) = request_logger {
        task.abort();
    }

    info!(stats = ?server.stats().await, "Switchyard stopped");
    Ok(())
}
