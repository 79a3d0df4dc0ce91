//! Lock and condition variable tables.
//!
//! Both are fixed-capacity arenas indexed by the small-integer ids handed to
//! callers. The tables hold pure state; blocking and wakeup are orchestrated
//! by the [`Kernel`](crate::Kernel), which owns both tables plus the process
//! subsystem behind a single critical-section guard.

pub mod cond;
pub mod lock;

pub use cond::{CondTable, Condition};
pub use lock::{Lock, LockState, LockTable};

use crate::error::SyncError;

/// Capacity of the lock table.
pub const MAX_LOCKS: usize = 32;

/// Capacity of the condition variable table.
pub const MAX_CONDS: usize = 32;

/// Longest accepted object name, in bytes.
pub const MAX_NAME: usize = 80;

pub(crate) fn check_name(name: &str) -> Result<(), SyncError> {
    if name.is_empty() {
        return Err(SyncError::EmptyName);
    }
    if name.len() > MAX_NAME {
        return Err(SyncError::NameTooLong);
    }
    Ok(())
}
