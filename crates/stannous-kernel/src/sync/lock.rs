use super::{check_name, MAX_LOCKS};
use crate::error::SyncError;
use stannous_proc::types::Pid;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Free,
    Busy,
}

/// One slot of the lock table.
///
/// `state == Busy` iff `owner` is set; `release` keeps the invariant when it
/// hands the lock to a waiter by moving `owner` without touching `state`.
pub struct Lock {
    pub(crate) in_use: bool,
    pub(crate) name: String,
    pub(crate) state: LockState,
    pub(crate) owner: Option<Pid>,
    pub(crate) bound_cond: Option<usize>,
    pub(crate) waiters: VecDeque<Pid>,
}

impl Lock {
    fn vacant() -> Self {
        Self {
            in_use: false,
            name: String::new(),
            state: LockState::Free,
            owner: None,
            bound_cond: None,
            waiters: VecDeque::new(),
        }
    }
}

/// Fixed-capacity arena of locks. Slot indices are the lock ids handed to
/// callers; the lowest free slot is always allocated first, so an id is
/// reused deterministically once its lock is freed.
pub struct LockTable {
    slots: Vec<Lock>,
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_LOCKS).map(|_| Lock::vacant()).collect(),
        }
    }

    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            *slot = Lock::vacant();
        }
    }

    pub(crate) fn get(&self, lid: usize) -> Result<&Lock, SyncError> {
        self.slots
            .get(lid)
            .filter(|l| l.in_use)
            .ok_or(SyncError::InvalidLock)
    }

    pub(crate) fn get_mut(&mut self, lid: usize) -> Result<&mut Lock, SyncError> {
        self.slots
            .get_mut(lid)
            .filter(|l| l.in_use)
            .ok_or(SyncError::InvalidLock)
    }

    /// Allocate the lowest free slot under `name`.
    pub fn create(&mut self, name: &str) -> Result<usize, SyncError> {
        check_name(name)?;
        if self.slots.iter().any(|l| l.in_use && l.name == name) {
            return Err(SyncError::DuplicateName);
        }
        let lid = self
            .slots
            .iter()
            .position(|l| !l.in_use)
            .ok_or(SyncError::TooManyLocks)?;
        let slot = &mut self.slots[lid];
        slot.in_use = true;
        slot.name = name.to_string();
        slot.state = LockState::Free;
        slot.owner = None;
        slot.bound_cond = None;
        slot.waiters.clear();
        Ok(lid)
    }

    /// Return the slot to the allocator. Fails while any process waits on
    /// the lock, or while it is held.
    pub fn free(&mut self, lid: usize) -> Result<(), SyncError> {
        let slot = self.get_mut(lid)?;
        if !slot.waiters.is_empty() {
            return Err(SyncError::BlockedProcesses);
        }
        if slot.state == LockState::Busy {
            return Err(SyncError::LockBusy);
        }
        *slot = Lock::vacant();
        Ok(())
    }

    /// Copy the name into `buf`, truncating to the buffer's length. Returns
    /// the number of bytes written.
    pub fn name(&self, lid: usize, buf: &mut [u8]) -> Result<usize, SyncError> {
        let slot = self.get(lid)?;
        let n = buf.len().min(slot.name.len());
        buf[..n].copy_from_slice(&slot.name.as_bytes()[..n]);
        Ok(n)
    }
}
