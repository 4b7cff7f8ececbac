//! Error taxonomy (spec §7) and its mapping onto `tonic::Status`.
//!
//! LVM/mount driver errors are folded in with `message` carrying their
//! original text verbatim, so operators still see the underlying LVM
//! complaint in the RPC status and in the logs.

use tonic::{Code, Status};

#[derive(thiserror::Error, Debug, Clone)]
pub enum CoreError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    FailedPrecondition(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    OutOfRange(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Aborted(String),

    #[error("Method not implemented")]
    Unimplemented,

    #[error("{0}")]
    Internal(String),

    #[error("{0}")]
    Canceled(String),
}

impl CoreError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        CoreError::InvalidArgument(msg.into())
    }

    pub fn failed_precondition(msg: impl Into<String>) -> Self {
        CoreError::FailedPrecondition(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        CoreError::Internal(msg.into())
    }
}

impl From<CoreError> for Status {
    fn from(err: CoreError) -> Status {
        let code = match &err {
            CoreError::InvalidArgument(_) => Code::InvalidArgument,
            CoreError::FailedPrecondition(_) => Code::FailedPrecondition,
            CoreError::NotFound(_) => Code::NotFound,
            CoreError::AlreadyExists(_) => Code::AlreadyExists,
            CoreError::OutOfRange(_) => Code::OutOfRange,
            CoreError::Unavailable(_) => Code::Unavailable,
            CoreError::Aborted(_) => Code::Aborted,
            CoreError::Unimplemented => Code::Unimplemented,
            CoreError::Internal(_) => Code::Internal,
            CoreError::Canceled(_) => Code::Cancelled,
        };
        Status::new(code, err.to_string())
    }
}

/// Errors surfaced by the `LvmDriver` implementation, distinguishable at
/// least for "not found" vs "other" per spec §6.
#[derive(thiserror::Error, Debug, Clone)]
pub enum LvmError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl From<LvmError> for CoreError {
    fn from(err: LvmError) -> CoreError {
        match err {
            LvmError::NotFound(msg) => CoreError::NotFound(msg),
            LvmError::Other(msg) => CoreError::Internal(msg),
        }
    }
}

/// Errors surfaced by the `MountAdapter` implementation.
#[derive(thiserror::Error, Debug, Clone)]
pub enum MountError {
    #[error("{0}")]
    Io(String),
}

impl From<MountError> for CoreError {
    fn from(err: MountError) -> CoreError {
        match err {
            MountError::Io(msg) => CoreError::Internal(msg),
        }
    }
}
