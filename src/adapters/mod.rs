//! # Adapters
//!
//! Front ends over the registry and engine. [`ServiceProxy`] is the programmatic entry
//! point; [`CommandProtocolAdapter`] serves decoded command-protocol requests.

pub mod command;
pub mod proxy;

pub use command::CommandProtocolAdapter;
pub use proxy::ServiceProxy;
