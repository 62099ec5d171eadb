// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use thiserror::Error;

use crate::CallerId;

/// Any error that may arise from operating on a [`BlockBuffer`][crate::BlockBuffer], its cursors
/// or the [`Encoder`][crate::Encoder] built on top of them.
///
/// Every failed operation leaves the buffer exactly as it was before the call, with the exception
/// of [`Error::InvariantViolation`] (the buffer was already found to be inconsistent) and
/// [`Error::Io`] raised part-way through a streaming copy (the bytes copied so far remain).
///
/// # Thread safety
///
/// This type is thread-safe.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A position, length or configuration value is out of its valid range.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// The operation is not valid in the current state of the object, e.g. closing a header
    /// that was never opened or finishing an encoder that still has open headers.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Another caller already holds the mutation lock of the buffer.
    #[error("mutation already in progress by caller {holder}")]
    LockConflict {
        /// The caller currently holding the mutation lock.
        holder: CallerId,
    },

    /// The caller's view of the buffer is out of date: it wants to mutate version `actual`
    /// but the buffer has since moved on to version `expected`.
    #[error("buffer is at version {expected} but the caller is at version {actual}")]
    VersionConflict {
        /// The version of the buffer.
        expected: u64,

        /// The version the caller assumed.
        actual: u64,
    },

    /// A mutation was ended while the buffer was not in the version state recorded when the
    /// mutation began, which includes ending a mutation that was never started.
    #[error("mutation bookkeeping mismatch: buffer at version {version}, pending {pending:?}")]
    VersionMismatch {
        /// The version of the buffer.
        version: u64,

        /// The version recorded when the mutation began, if any.
        pending: Option<u64>,
    },

    /// A mutation was ended by a caller other than the one that started it.
    #[error("caller {caller} does not hold the mutation lock (holder: {holder:?})")]
    CallerMismatch {
        /// The caller that tried to end the mutation.
        caller: CallerId,

        /// The caller that holds the mutation lock, if any.
        holder: Option<CallerId>,
    },

    /// The buffer was mutated through another path since the cursor last synchronized with it.
    ///
    /// The cursor keeps reporting this until `sync()` makes it accept the current version.
    #[error("buffer was modified concurrently: cursor at version {cursor}, buffer at version {buffer}")]
    ConcurrentModification {
        /// The version the cursor last observed.
        cursor: u64,

        /// The version of the buffer.
        buffer: u64,
    },

    /// The cursor was closed and can no longer be used.
    #[error("cursor is closed")]
    Closed,

    /// The cursor was handed a buffer other than the one it was created for.
    #[error("cursor belongs to a different buffer")]
    ForeignBuffer,

    /// The structural self-check of the buffer failed.
    #[error("buffer invariant violated: {0}")]
    InvariantViolation(String),

    /// A variable-length unsigned integer does not fit into 64 bits or into the space reserved for it.
    #[error("var-uint overflow: {0}")]
    VarUIntOverflow(String),

    /// The data ended in the middle of an encoded value.
    #[error("unexpected end of data at position {position}")]
    UnexpectedEnd {
        /// The position at which more data was expected.
        position: usize,
    },

    /// We are forwarding an error received from the standard library's I/O APIs.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A specialized `Result` for use with buffer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a buffer error as a standard I/O error, used by the `std::io` adapters.
impl From<Error> for std::io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::Io(error) => error,
            Error::IllegalArgument(_) => Self::new(std::io::ErrorKind::InvalidInput, value),
            Error::UnexpectedEnd { .. } => Self::new(std::io::ErrorKind::UnexpectedEof, value),
            _ => Self::other(value),
        }
    }
}
