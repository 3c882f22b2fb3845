//! Sample handlers served by the `switchyard` binary

pub mod arithmetic;
pub mod ping;

pub use arithmetic::ArithmeticHandler;
pub use ping::PingHandler;
