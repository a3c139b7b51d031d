/* Crate-wide error taxonomy. Every fallible operation in the engine returns
 * `Result<T, EngineError>` so that callers can match on the failure kind
 * instead of parsing a message string. */

use thiserror::Error;

/// The failure kinds produced by the HIL engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed JSON/CSV, duplicate ids, missing required fields.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Name resolution has no answer, or is ambiguous, or targets an
    /// unmanaged device.
    #[error("connection error: {0}")]
    Connection(String),

    /// Discovery failed, the device reported `ERROR`, a response arrived
    /// with an unexpected leading byte, or a response never arrived before
    /// its deadline.
    #[error("serial error: {0}")]
    Serial(String),

    /// An internal invariant was violated: action not supported on the
    /// resolved port, serial handle not yet attached, or a response with an
    /// unexpected byte count.
    #[error("engine error: {0}")]
    Engine(String),

    /// A value was outside the calibrated range for a DAC or POT.
    #[error("range error: {0}")]
    Range(String),

    /// Wraps a lower-level I/O failure (serial link open/read/write).
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// Wraps a JSON parse failure from a config file.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Wraps a CSV parse failure from a net-map file.
    #[error("CSV parse error: {0}")]
    Csv(#[from] csv::Error),
}

impl EngineError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn serial(msg: impl Into<String>) -> Self {
        Self::Serial(msg.into())
    }

    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }

    pub fn range(msg: impl Into<String>) -> Self {
        Self::Range(msg.into())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;
