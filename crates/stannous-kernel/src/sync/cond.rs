use super::{check_name, MAX_CONDS};
use crate::error::SyncError;
use stannous_proc::types::Pid;
use std::collections::VecDeque;

/// One slot of the condition variable table. The waiter count required by
/// the wait/signal protocol is the queue's length, so the two can never
/// disagree.
pub struct Condition {
    pub(crate) in_use: bool,
    pub(crate) name: String,
    pub(crate) bound_lock: usize,
    pub(crate) waiters: VecDeque<Pid>,
}

impl Condition {
    fn vacant() -> Self {
        Self {
            in_use: false,
            name: String::new(),
            bound_lock: 0,
            waiters: VecDeque::new(),
        }
    }
}

/// Fixed-capacity arena of condition variables, allocated lowest slot first
/// like the lock table. Binding to a lock is fixed at creation; the kernel
/// validates the lock and maintains the lock-side back-reference.
pub struct CondTable {
    slots: Vec<Condition>,
}

impl Default for CondTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CondTable {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_CONDS).map(|_| Condition::vacant()).collect(),
        }
    }

    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            *slot = Condition::vacant();
        }
    }

    pub(crate) fn get(&self, cid: usize) -> Result<&Condition, SyncError> {
        self.slots
            .get(cid)
            .filter(|c| c.in_use)
            .ok_or(SyncError::InvalidCond)
    }

    pub(crate) fn get_mut(&mut self, cid: usize) -> Result<&mut Condition, SyncError> {
        self.slots
            .get_mut(cid)
            .filter(|c| c.in_use)
            .ok_or(SyncError::InvalidCond)
    }

    /// Allocate the lowest free slot under `name`, bound to `lid`.
    pub fn create(&mut self, name: &str, lid: usize) -> Result<usize, SyncError> {
        check_name(name)?;
        if self.slots.iter().any(|c| c.in_use && c.name == name) {
            return Err(SyncError::DuplicateName);
        }
        let cid = self
            .slots
            .iter()
            .position(|c| !c.in_use)
            .ok_or(SyncError::TooManyConds)?;
        let slot = &mut self.slots[cid];
        slot.in_use = true;
        slot.name = name.to_string();
        slot.bound_lock = lid;
        slot.waiters.clear();
        Ok(cid)
    }

    /// Return the slot to the allocator. Fails while any process waits on
    /// the condition. Returns the bound lock id so the caller can clear the
    /// lock's back-reference.
    pub fn free(&mut self, cid: usize) -> Result<usize, SyncError> {
        let slot = self.get_mut(cid)?;
        if !slot.waiters.is_empty() {
            return Err(SyncError::BlockedProcesses);
        }
        let lid = slot.bound_lock;
        *slot = Condition::vacant();
        Ok(lid)
    }

    /// Copy the name into `buf`, truncating to the buffer's length. Returns
    /// the number of bytes written.
    pub fn name(&self, cid: usize, buf: &mut [u8]) -> Result<usize, SyncError> {
        let slot = self.get(cid)?;
        let n = buf.len().min(slot.name.len());
        buf[..n].copy_from_slice(&slot.name.as_bytes()[..n]);
        Ok(n)
    }
}
