//! # Command Protocol Server
//!
//! Tokio TCP transport for the command protocol. Decoding, dispatch and encoding are
//! delegated to the codec and [`CommandProtocolAdapter`](crate::adapters::CommandProtocolAdapter);
//! this module only owns sockets, connection limits and shutdown.

pub mod tcp;

pub use tcp::{ServerStats, TcpCommandServer};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Server is already running")]
    ServerAlreadyRunning,

    #[error("Failed to bind to address {address}: {error}")]
    BindFailed { address: String, error: String },

    #[error("Connection error: {message}")]
    ConnectionError { message: String },
}
