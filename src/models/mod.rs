pub mod command;
pub mod context;
pub mod result;

// Re-export core models for easy access
pub use command::Command;
pub use context::RequestContext;
pub use result::{ProxyResult, ResultData};
