use crate::sync::MAX_NAME;
use thiserror::Error;

/// Result codes returned by the lock and condition variable services.
///
/// These are always returned, never fatal, and a failed call leaves the
/// tables untouched. The only fatal path is calling a kernel service from
/// user mode, which kills the offending process instead of returning.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    #[error("name is empty")]
    EmptyName,

    #[error("name exceeds {MAX_NAME} bytes")]
    NameTooLong,

    #[error("name already in use")]
    DuplicateName,

    #[error("all lock slots are in use")]
    TooManyLocks,

    #[error("all condition variable slots are in use")]
    TooManyConds,

    #[error("no lock with that id")]
    InvalidLock,

    #[error("no condition variable with that id")]
    InvalidCond,

    #[error("lock is not held by the calling process")]
    LockNotHeld,

    #[error("lock is currently held")]
    LockBusy,

    #[error("lock already has a condition variable bound to it")]
    AlreadyBound,

    #[error("processes are blocked on this object")]
    BlockedProcesses,
}
