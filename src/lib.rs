//! Hardware-in-the-Loop (HIL) test engine.
//!
//! Drives physical test fixtures over a binary serial protocol and resolves
//! high-level `(board, net)` signal names to concrete hardware operations.
//! See [`Facade`] for the user-facing entry point.

pub mod can_store;
pub mod config;
pub mod dbc;
pub mod device;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod facade;
pub mod manager;
pub mod netmap;
pub mod protocol;
pub mod resolve;
pub mod serial;

pub use error::{EngineError, Result};
pub use facade::Facade;

/// Install a `tracing_subscriber` formatter driven by `RUST_LOG`
/// (`info` by default). Call once from a binary's `main` or a test's
/// setup; calling it more than once in the same process is a no-op
/// rather than a panic.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init();
}
