//! Crate-level error type.
//!
//! Each subsystem owns a focused error enum; [`ProxyError`] aggregates them for
//! callers that drive several subsystems at once (bootstrap, adapters, the binary).

use thiserror::Error;

use crate::client::ClientError;
use crate::codec::CodecError;
use crate::config::ConfigurationError;
use crate::execution::ExecutionError;
use crate::registry::RegistryError;
use crate::server::ServerError;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Server error: {0}")]
    Server(#[from] ServerError),
    #[error("Client error: {0}")]
    Client(#[from] ClientError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
