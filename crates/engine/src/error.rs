use curvesim_core::CoreError;
use curvesim_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("no active curve")]
    NoActiveCurve,

    #[error("edit targets {got} but the active curve is {expected}")]
    KeyMismatch { expected: String, got: String },

    #[error("sync version counter exhausted")]
    VersionExhausted,

    #[error("serialization error: {0}")]
    Serialization(String),
}
