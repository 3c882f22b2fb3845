//! # Protocol Constants and Defaults
//!
//! Constants that define the operational boundaries of the proxy: command-protocol
//! framing bytes, response status words, and the fallback values used when neither a
//! handler nor the configuration supplies a setting.

/// Command-protocol framing and response vocabulary
pub mod protocol {
    /// Maximum size of a command line (command, params and length) in bytes
    pub const MAX_COMMAND_INPUT: usize = 20_480;

    pub const LINE_FEED: u8 = b'\n';
    pub const CARRIAGE_RETURN: u8 = b'\r';
    pub const DEFAULT_DELIMITER: u8 = b' ';
    pub const PARAM_VALUE_SEPARATOR: u8 = b'=';

    /// Value given to a bare parameter name (`name` with no `=value`)
    pub const DEFAULT_PARAM_VALUE: &str = "true";

    pub const SUCCESS: &str = "SUCCESS";
    pub const ERROR: &str = "ERROR";
}

/// Well-known command parameters interpreted by the adapters
pub mod params {
    /// Routes a command through a named bulkhead instead of one named after the command
    pub const POOL: &str = "pool";

    /// Correlation id supplied by the caller
    pub const REQUEST_ID: &str = "requestID";

    /// Name of the command to run in a handler's initialization command list
    pub const COMMAND_NAME: &str = "commandName";
}

/// Messages used for results synthesised by the engine and adapters
pub mod messages {
    pub const NO_RESULT: &str = "The command returned no result";
    pub const ASYNC_QUEUED: &str = "The command dispatched for async execution";
}

/// Execution defaults applied when neither handler settings nor configuration override them
pub mod defaults {
    pub const POOL_SIZE: usize = 10;
    pub const EXECUTOR_TIMEOUT_MS: u64 = 1_000;
    pub const QUEUE_CAPACITY: usize = 0;
    pub const SEMAPHORE_ACQUIRE_TIMEOUT_MS: u64 = 0;
    pub const EVENT_CHANNEL_CAPACITY: usize = 1_000;
    pub const BIND_ADDRESS: &str = "127.0.0.1:8080";
    pub const MAX_CONNECTIONS: usize = 1_000;
    pub const IDLE_TIMEOUT_MS: u64 = 30_000;
    pub const GRACEFUL_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;
}

/// Environment variables consulted by configuration and logging bootstrap
pub mod env {
    pub const ENVIRONMENT: &str = "SWITCHYARD_ENV";
    pub const FALLBACK_ENVIRONMENT: &str = "APP_ENV";
    pub const CONFIG_DIR: &str = "SWITCHYARD_CONFIG_DIR";
    pub const LOG_DIR: &str = "SWITCHYARD_LOG_DIR";
    pub const DEFAULT_ENVIRONMENT: &str = "development";
}
