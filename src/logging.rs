//! # Structured Logging Module
//!
//! Environment-aware structured logging: a console layer always, plus a JSON file layer
//! when `SWITCHYARD_LOG_DIR` is set.

use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::ConfigManager;
use crate::constants::env as env_vars;
use crate::events::ExecutionEvent;
use crate::execution::ExecutionState;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
///
/// Safe to call more than once; only the first call installs anything, and an already
/// installed global subscriber is left in place.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = ConfigManager::detect_environment();
        let log_level = std::env::var("RUST_LOG")
            .ok()
            .filter(|filter| !filter.trim().is_empty())
            .unwrap_or_else(|| get_log_level(&environment).to_string());

        let console = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .with_filter(EnvFilter::new(&log_level));

        let log_file = std::env::var(env_vars::LOG_DIR)
            .ok()
            .map(PathBuf::from)
            .and_then(|dir| match fs::create_dir_all(&dir) {
                Ok(()) => Some(dir),
                Err(e) => {
                    eprintln!("switchyard: cannot create log directory {}: {e}", dir.display());
                    None
                }
            })
            .map(|dir| {
                let file_name = format!(
                    "{}.{}.{}.log",
                    environment,
                    process::id(),
                    Utc::now().format("%Y%m%d_%H%M%S")
                );
                (dir, file_name)
            });

        let file_layer = log_file.as_ref().map(|(dir, file_name)| {
            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            // The writer flushes on guard drop; logging lives for the whole process.
            std::mem::forget(guard);

            fmt::layer()
                .with_writer(file_writer)
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_filter(EnvFilter::new(&log_level))
        });

        let subscriber = tracing_subscriber::registry().with(console).with(file_layer);
        if subscriber.try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
            return;
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            log_level = %log_level,
            log_file = log_file
                .as_ref()
                .map(|(dir, name)| dir.join(name).display().to_string()),
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Default filter for an environment when `RUST_LOG` is not set
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log the outcome of one execution at a level matching its severity
pub fn log_execution_outcome(event: &ExecutionEvent) {
    match event.outcome {
        ExecutionState::Succeeded => tracing::debug!(
            command = %event.command_name,
            pool = %event.pool_name,
            request_id = %event.request_id,
            handler = %event.handler_type,
            elapsed_ms = event.elapsed_ms,
            cached = event.cached,
            "✅ EXECUTION"
        ),
        ExecutionState::FailedFallback => tracing::info!(
            command = %event.command_name,
            pool = %event.pool_name,
            request_id = %event.request_id,
            handler = %event.handler_type,
            elapsed_ms = event.elapsed_ms,
            cached = event.cached,
            "↩️ EXECUTION: served by fallback"
        ),
        outcome => tracing::warn!(
            command = %event.command_name,
            pool = %event.pool_name,
            request_id = %event.request_id,
            handler = %event.handler_type,
            outcome = %outcome,
            elapsed_ms = event.elapsed_ms,
            fell_back = event.fell_back,
            fallback_failed = event.fallback_failed,
            cached = event.cached,
            error = event.error.as_deref(),
            "❌ EXECUTION"
        ),
    }
}

/// Log structured data for registry operations
pub fn log_registry_operation(
    operation: &str,
    handler: &str,
    commands: &[String],
    generation: u64,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        handler = %handler,
        commands = ?commands,
        generation = generation,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📚 REGISTRY_OPERATION"
    );
}

/// Log structured data for server connection lifecycle
pub fn log_connection_event(
    operation: &str,
    peer: &str,
    active_connections: usize,
    details: Option<&str>,
) {
    tracing::debug!(
        operation = %operation,
        peer = %peer,
        active_connections = active_connections,
        details = details,
        "🔌 CONNECTION"
    );
}
