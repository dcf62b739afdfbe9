//! Error types for runtime operations

use thiserror::Error;

use crate::fsm::EngineError;
use crate::registry::RegistryError;
use crate::store::StoreError;

/// Errors that can occur across the runtime façade.
///
/// Module-level errors (`EngineError`, `StoreError`, `RegistryError`) are
/// returned directly by their own APIs; this enum is the umbrella type
/// [`crate::runtime::MachineRuntime`] folds them into, matching
/// `InfrastructureError`'s role of unifying the teacher's per-module errors
/// at the service boundary.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// FSM engine error (see [`EngineError`]).
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Registry error (see [`RegistryError`]).
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Storage backend error (see [`StoreError`]).
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Archival queue is full beyond its configured bound.
    #[error("archival backpressure: {0}")]
    Backpressure(String),

    /// A shutdown cancelled an in-flight operation.
    #[error("operation interrupted: {0}")]
    Interrupted(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Generic runtime error
    #[error("runtime error: {0}")]
    Generic(String),
}

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

impl From<serde_json::Error> for RuntimeError {
    fn from(err: serde_json::Error) -> Self {
        RuntimeError::Generic(format!("serialization error: {err}"))
    }
}
