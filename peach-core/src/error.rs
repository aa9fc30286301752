//! Shared error taxonomy for the Peach mining worker.
//!
//! One enum covers both the device driver and the Stratum client; each
//! component recovers at its own boundary (per-device, per-connection) and
//! never propagates a single-component failure to process scope.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid arguments at `attach` (e.g. a null/unusable device context).
    #[error("config error: {0}")]
    Config(String),

    /// The underlying compute API refused an operation.
    #[error("device error: {0}")]
    Device(String),

    /// Host-side allocation failure during driver setup.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// Kernel source missing or failed to compile; build log is attached.
    #[error("kernel build error: {message}\n{build_log}")]
    KernelBuild { message: String, build_log: String },

    /// Socket create/connect/send/recv failure.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed or unexpected Stratum payload.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// `mining.authorize` returned a non-truthy result.
    #[error("authorization failed: {0}")]
    Auth(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Network(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
