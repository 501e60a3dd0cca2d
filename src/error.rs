//! Error types for the model framework.
//!
//! Every failure is a typed result. Fatal and warning classes are also
//! written to the shared [`ErrorSink`](crate::status::ErrorSink) by the
//! component that detects them; the types here only describe the failure.

use thiserror::Error;

use crate::codec::TypeTag;

/// Failure to take or use the flip semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The bounded wait elapsed before the semaphore was released.
    #[error("timed out waiting for semaphore")]
    Timeout,
    /// The semaphore was torn down.
    #[error("semaphore has been closed")]
    Closed,
}

/// Conversion failure between a storage cell and `f64`.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CodecError {
    /// The codec has no representation for this type tag.
    #[error("unsupported data type {0:?}")]
    Unsupported(TypeTag),
    /// The value cannot be stored in a cell of this type (e.g. NaN into an integer).
    #[error("value {value} is not representable as {tag:?}")]
    NotRepresentable { value: f64, tag: TypeTag },
}

/// Parameter store errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    /// Parameter index is not registered.
    #[error("parameter index {index} is out of bounds (count {count})")]
    UnknownParameter { index: usize, count: usize },

    /// Element index exceeds the parameter's width.
    #[error("parameter {index} subindex {subindex} is out of bounds (width {width})")]
    OutOfBounds {
        index: usize,
        subindex: usize,
        width: usize,
    },

    /// Vector length differs from the registered width.
    #[error("parameter {index} length is incorrect: expected {expected}, got {actual}")]
    LengthMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    /// Conversion into the storage type failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Queued edits were discarded because inline edits intervened.
    #[error("inline and queued edits collided; queued edits since the last commit were lost")]
    ConflictLostEdit,

    /// The pending batch failed earlier (or execution stopped) and was rolled back.
    #[error("parameter transaction failed; pending edits were rolled back")]
    TransactionFailed,

    /// The flip semaphore could not be taken.
    #[error("parameter flip failed: {0}")]
    Sync(#[from] SyncError),
}

/// Error returned by user model code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ModelError {
    pub message: String,
}

impl ModelError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Step scheduling errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScheduleError {
    /// Execution was stopped by a fatal error; no further steps run.
    #[error("execution halted")]
    Halted,

    /// `schedule`/`acknowledge` were not called in strict alternation.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// Input or output buffer does not match the model's port count.
    #[error("{port} buffer has {actual} values, model expects {expected}")]
    PortMismatch {
        port: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The step guard could not be taken.
    #[error("step guard unavailable: {0}")]
    ResourceExhaustion(SyncError),

    /// The step function reported failure.
    #[error("step failed: {0}")]
    StepFailed(#[from] ModelError),
}

/// Model description errors.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("failed to read model description: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed model description: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown data type '{0}'")]
    UnknownType(String),

    #[error("invalid model description: {0}")]
    Invalid(String),
}

/// Kernel lifecycle errors.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error("model initialization failed: {0}")]
    Initialize(ModelError),

    #[error("model start failed: {0}")]
    Start(ModelError),

    #[error("model finalization failed: {0}")]
    Finalize(ModelError),

    #[error("model has already been started")]
    AlreadyStarted,

    #[error("initial value for parameter '{name}' rejected: {source}")]
    InitialValue { name: String, source: CodecError },
}

pub type ParamResult<T> = std::result::Result<T, ParamError>;
