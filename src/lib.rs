#![allow(clippy::doc_markdown)] // Allow technical terms in docs without backticks
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Switchyard Core
//!
//! Protocol-agnostic service proxy core: a command-protocol codec, a handler registry,
//! and an execution engine that runs every call behind a bulkhead with a deadline, an
//! optional fallback and request-scoped de-duplication.
//!
//! ## Architecture
//!
//! ```text
//! bytes ─ codec ─ Command ─ adapter ─ registry.resolve ─ engine.execute ─ ProxyResult ─ codec ─ bytes
//!                                                          │
//!                                                          └─ one ExecutionEvent per call ─ EventSink
//! ```
//!
//! ## Module Organization
//!
//! - [`codec`] - Command protocol parsing (framed and replayable) and response encoding
//! - [`registry`] - Handler SPI, handler settings and command resolution
//! - [`execution`] - Bulkheads, execution state machine, request cache and the engine
//! - [`events`] - Execution events and sinks
//! - [`adapters`] - `ServiceProxy` facade and the command-protocol adapter
//! - [`server`] / [`client`] - TCP transport for the command protocol
//! - [`config`] - YAML configuration with environment overrides
//! - [`error`] - Crate-level error aggregation
//! - [`logging`] - Structured logging bootstrap
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use switchyard_core::adapters::ServiceProxy;
//! use switchyard_core::config::ProxyConfig;
//! use switchyard_core::events::NullSink;
//! use switchyard_core::handlers::PingHandler;
//! use switchyard_core::models::{Command, RequestContext};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let proxy = ServiceProxy::from_config(&ProxyConfig::default(), Arc::new(NullSink));
//! proxy.registry().register(Arc::new(PingHandler)).await?;
//!
//! let result = proxy
//!     .dispatch(Command::new("ping"), "", RequestContext::new())
//!     .await?;
//! assert_eq!(result.message.as_deref(), Some("pong"));
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod client;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod execution;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod registry;
pub mod server;

pub use adapters::{CommandProtocolAdapter, ServiceProxy};
pub use codec::{CodecError, CommandCodec, ReadMode};
pub use config::{ConfigManager, ProxyConfig};
pub use error::{ProxyError, Result};
pub use events::{EventPublisher, EventSink, ExecutionEvent};
pub use execution::{ExecutionEngine, ExecutionError, ExecutionState};
pub use models::{Command, ProxyResult, RequestContext};
pub use registry::{Handler, HandlerError, HandlerRegistry};
