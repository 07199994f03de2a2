// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy shared by every core operation.

use nexus_abi::Status;

/// Result type returned by core operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors produced by the IPC core.
///
/// Each variant corresponds to exactly one non-OK [`Status`]; conversions in both directions are
/// lossless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum Error {
    /// The operation was cancelled because the handle was closed underneath it.
    #[error("operation cancelled")]
    Cancelled,
    /// Unknown failure.
    #[error("unknown failure")]
    Unknown,
    /// Invalid handle or argument.
    #[error("invalid argument")]
    InvalidArgument,
    /// The deadline passed before the operation completed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// Entity not found.
    #[error("not found")]
    NotFound,
    /// Entity already exists.
    #[error("already exists")]
    AlreadyExists,
    /// The handle does not permit the operation.
    #[error("permission denied")]
    PermissionDenied,
    /// A table or size limit was reached.
    #[error("resource exhausted")]
    ResourceExhausted,
    /// The operation can never succeed in the current state (e.g. peer closed).
    #[error("failed precondition")]
    FailedPrecondition,
    /// The operation was aborted.
    #[error("aborted")]
    Aborted,
    /// An argument is out of range for the current state.
    #[error("out of range")]
    OutOfRange,
    /// The resource kind does not support the operation.
    #[error("operation not supported by this resource")]
    NotSupported,
    /// Internal invariant failure.
    #[error("internal error")]
    Internal,
    /// Unavailable.
    #[error("unavailable")]
    Unavailable,
    /// Data loss.
    #[error("data loss")]
    DataLoss,
    /// The handle is in use (e.g. in transit).
    #[error("resource busy")]
    Busy,
    /// Retry after waiting.
    #[error("should wait")]
    ShouldWait,
}

impl Error {
    /// Returns the ABI status for this error.
    pub const fn status(self) -> Status {
        match self {
            Self::Cancelled => Status::Cancelled,
            Self::Unknown => Status::Unknown,
            Self::InvalidArgument => Status::InvalidArgument,
            Self::DeadlineExceeded => Status::DeadlineExceeded,
            Self::NotFound => Status::NotFound,
            Self::AlreadyExists => Status::AlreadyExists,
            Self::PermissionDenied => Status::PermissionDenied,
            Self::ResourceExhausted => Status::ResourceExhausted,
            Self::FailedPrecondition => Status::FailedPrecondition,
            Self::Aborted => Status::Aborted,
            Self::OutOfRange => Status::OutOfRange,
            Self::NotSupported => Status::Unimplemented,
            Self::Internal => Status::Internal,
            Self::Unavailable => Status::Unavailable,
            Self::DataLoss => Status::DataLoss,
            Self::Busy => Status::Busy,
            Self::ShouldWait => Status::ShouldWait,
        }
    }

    /// Converts an ABI status into a result.
    pub const fn from_status(status: Status) -> Result<()> {
        Err(match status {
            Status::Ok => return Ok(()),
            Status::Cancelled => Self::Cancelled,
            Status::Unknown => Self::Unknown,
            Status::InvalidArgument => Self::InvalidArgument,
            Status::DeadlineExceeded => Self::DeadlineExceeded,
            Status::NotFound => Self::NotFound,
            Status::AlreadyExists => Self::AlreadyExists,
            Status::PermissionDenied => Self::PermissionDenied,
            Status::ResourceExhausted => Self::ResourceExhausted,
            Status::FailedPrecondition => Self::FailedPrecondition,
            Status::Aborted => Self::Aborted,
            Status::OutOfRange => Self::OutOfRange,
            Status::Unimplemented => Self::NotSupported,
            Status::Internal => Self::Internal,
            Status::Unavailable => Self::Unavailable,
            Status::DataLoss => Self::DataLoss,
            Status::Busy => Self::Busy,
            Status::ShouldWait => Self::ShouldWait,
        })
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        err.status()
    }
}

/// Collapses a result into its ABI status.
pub fn status_of<T>(result: &Result<T>) -> Status {
    match result {
        Ok(_) => Status::Ok,
        Err(err) => err.status(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_status_maps_back_to_itself() {
        for raw in 1..=17u32 {
            let status = Status::from_raw(raw).unwrap();
            let err = Error::from_status(status).unwrap_err();
            assert_eq!(err.status(), status);
        }
        assert_eq!(Error::from_status(Status::Ok), Ok(()));
    }
}
