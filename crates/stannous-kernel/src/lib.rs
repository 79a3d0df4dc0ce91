//! Stannous kernel: mutual-exclusion locks and condition variables for a
//! single-CPU, cooperatively scheduled machine.
//!
//! Simulated processes run on host threads, but a single CPU baton (the
//! `running` process plus a condvar) keeps exactly one of them logically
//! running at a time. Holding the kernel mutex is the machine's
//! "rescheduling disabled" state: every service acquires it on entry and the
//! RAII guard restores it on every exit path, early error returns included.

pub mod error;
pub mod sync;

use crate::error::SyncError;
use log::{debug, error, info};
use stannous_proc::pcb::{ProcState, WaitChannel};
use stannous_proc::types::{Mode, Pid};
use stannous_proc::ProcManager;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use sync::{CondTable, LockState, LockTable};

thread_local! {
    static CURRENT_PID: Cell<Option<Pid>> = const { Cell::new(None) };
}

fn current_pid() -> Pid {
    CURRENT_PID
        .with(|c| c.get())
        .unwrap_or_else(|| panic!("kernel service invoked outside a process context"))
}

/// Everything the kernel mutates while rescheduling is disabled.
struct KernelInner {
    procs: ProcManager,
    locks: LockTable,
    conds: CondTable,
}

/// The machine: one logical CPU shared cooperatively by simulated
/// processes, plus the lock and condition variable services.
pub struct Kernel {
    inner: Mutex<KernelInner>,
    resched: Condvar,
    // Handed to process threads so they can call back into the kernel.
    self_ref: Weak<Kernel>,
}

impl Kernel {
    /// Boot the machine and adopt the calling thread as the init process,
    /// running in kernel mode.
    pub fn new() -> Arc<Self> {
        let mut procs = ProcManager::new();
        let init = procs.adopt_boot_process("init");
        CURRENT_PID.with(|c| c.set(Some(init)));
        info!("boot: init process {:?}", init);
        Arc::new_cyclic(|me| Self {
            inner: Mutex::new(KernelInner {
                procs,
                locks: LockTable::new(),
                conds: CondTable::new(),
            }),
            resched: Condvar::new(),
            self_ref: me.clone(),
        })
    }

    /// Reset the lock table. The process subsystem exists from boot, which
    /// satisfies the ordering the lock subsystem requires.
    pub fn lock_init(&self) {
        let mut inner = self.lock_inner();
        Self::check_kernel(&inner, current_pid());
        inner.locks.reset();
    }

    /// Reset the condition variable table, initializing the lock subsystem
    /// first.
    pub fn cond_init(&self) {
        let mut inner = self.lock_inner();
        Self::check_kernel(&inner, current_pid());
        inner.locks.reset();
        inner.conds.reset();
    }

    // ------------------------------------------------------------------
    // Lock services
    // ------------------------------------------------------------------

    /// Create a lock named `name`, returning its id.
    pub fn lock_create(&self, name: &str) -> Result<usize, SyncError> {
        let mut inner = self.lock_inner();
        Self::check_kernel(&inner, current_pid());
        let lid = inner.locks.create(name)?;
        debug!("lock_create: {:?} -> {}", name, lid);
        Ok(lid)
    }

    /// Destroy a lock. Fails while the lock is held or has waiters.
    pub fn lock_free(&self, lid: usize) -> Result<(), SyncError> {
        let mut inner = self.lock_inner();
        Self::check_kernel(&inner, current_pid());
        inner.locks.free(lid)?;
        debug!("lock_free: {}", lid);
        Ok(())
    }

    /// Acquire `lid`, blocking while another process holds it. Waiters are
    /// granted the lock in arrival order.
    pub fn lock_acquire(&self, lid: usize) -> Result<(), SyncError> {
        let me = current_pid();
        let mut inner = self.lock_inner();
        Self::check_kernel(&inner, me);
        inner.locks.get(lid)?;
        inner = self.acquire_loop(inner, lid, me)?;
        drop(inner);
        Ok(())
    }

    /// Release `lid`. If processes are waiting, ownership passes directly
    /// to the one that has waited longest.
    pub fn lock_release(&self, lid: usize) -> Result<(), SyncError> {
        let me = current_pid();
        let mut inner = self.lock_inner();
        Self::check_kernel(&inner, me);
        if Self::release_owned(&mut inner, lid, me)? {
            inner = self.dispatch(inner);
        }
        drop(inner);
        Ok(())
    }

    /// Copy the lock's name into `buf`, truncating to the buffer's length.
    /// Returns the number of bytes written.
    pub fn lock_name(&self, lid: usize, buf: &mut [u8]) -> Result<usize, SyncError> {
        let inner = self.lock_inner();
        Self::check_kernel(&inner, current_pid());
        inner.locks.name(lid, buf)
    }

    /// Current owner of the lock, if any.
    pub fn lock_owner(&self, lid: usize) -> Result<Option<Pid>, SyncError> {
        let inner = self.lock_inner();
        Self::check_kernel(&inner, current_pid());
        Ok(inner.locks.get(lid)?.owner)
    }

    // ------------------------------------------------------------------
    // Condition variable services
    // ------------------------------------------------------------------

    /// Create a condition variable named `name`, bound to lock `lid` for
    /// its entire lifetime.
    pub fn cond_create(&self, name: &str, lid: usize) -> Result<usize, SyncError> {
        let mut inner = self.lock_inner();
        Self::check_kernel(&inner, current_pid());
        sync::check_name(name)?;
        if inner.locks.get(lid)?.bound_cond.is_some() {
            return Err(SyncError::AlreadyBound);
        }
        let cid = inner.conds.create(name, lid)?;
        inner.locks.get_mut(lid)?.bound_cond = Some(cid);
        debug!("cond_create: {:?} -> {} (lock {})", name, cid, lid);
        Ok(cid)
    }

    /// Destroy a condition variable. Fails while any process waits on it.
    pub fn cond_free(&self, cid: usize) -> Result<(), SyncError> {
        let mut inner = self.lock_inner();
        Self::check_kernel(&inner, current_pid());
        let lid = inner.conds.free(cid)?;
        if let Ok(lock) = inner.locks.get_mut(lid) {
            if lock.bound_cond == Some(cid) {
                lock.bound_cond = None;
            }
        }
        debug!("cond_free: {}", cid);
        Ok(())
    }

    /// Block on `cid` until signaled. The bound lock is released while the
    /// caller is blocked and reacquired before `cond_wait` returns.
    pub fn cond_wait(&self, cid: usize) -> Result<(), SyncError> {
        let me = current_pid();
        let mut inner = self.lock_inner();
        Self::check_kernel(&inner, me);
        let lid = inner.conds.get(cid)?.bound_lock;
        if inner.locks.get(lid)?.owner != Some(me) {
            return Err(SyncError::LockNotHeld);
        }
        inner.conds.get_mut(cid)?.waiters.push_back(me);
        Self::release_owned(&mut inner, lid, me)?;
        inner
            .procs
            .block_current(WaitChannel::Condition { cond: cid, lock: lid });
        debug!("cond {}: {:?} waiting (released lock {})", cid, me, lid);
        inner = self.dispatch(inner);
        // Woken by signal/broadcast/naked_signal; take the lock back before
        // returning to the caller.
        inner = self.acquire_loop(inner, lid, me)?;
        drop(inner);
        Ok(())
    }

    /// Wake the process that has waited longest on `cid`, if any. The woken
    /// process does not hold the lock until its own `cond_wait` reacquires
    /// it.
    pub fn cond_signal(&self, cid: usize) -> Result<(), SyncError> {
        let me = current_pid();
        let mut inner = self.lock_inner();
        Self::check_kernel(&inner, me);
        Self::signal_precondition(&inner, cid, me)?;
        if Self::signal_one(&mut inner, cid)? {
            inner = self.dispatch(inner);
        }
        drop(inner);
        Ok(())
    }

    /// Wake every process waiting on `cid`, one at a time; each contends
    /// for the bound lock independently.
    pub fn cond_broadcast(&self, cid: usize) -> Result<(), SyncError> {
        let me = current_pid();
        let mut inner = self.lock_inner();
        Self::check_kernel(&inner, me);
        Self::signal_precondition(&inner, cid, me)?;
        while Self::signal_one(&mut inner, cid)? {
            inner = self.dispatch(inner);
        }
        drop(inner);
        Ok(())
    }

    /// Signal without the lock-held contract, for kernel-internal wakeups.
    /// Only the condition id is validated.
    pub fn cond_naked_signal(&self, cid: usize) -> Result<(), SyncError> {
        let mut inner = self.lock_inner();
        Self::check_kernel(&inner, current_pid());
        if Self::signal_one(&mut inner, cid)? {
            inner = self.dispatch(inner);
        }
        drop(inner);
        Ok(())
    }

    /// Copy the condition variable's name into `buf`, truncating to the
    /// buffer's length. Returns the number of bytes written.
    pub fn cond_name(&self, cid: usize, buf: &mut [u8]) -> Result<usize, SyncError> {
        let inner = self.lock_inner();
        Self::check_kernel(&inner, current_pid());
        inner.conds.name(cid, buf)
    }

    /// Number of processes currently blocked on `cid`.
    pub fn cond_waiting(&self, cid: usize) -> Result<usize, SyncError> {
        let inner = self.lock_inner();
        Self::check_kernel(&inner, current_pid());
        Ok(inner.conds.get(cid)?.waiters.len())
    }

    // ------------------------------------------------------------------
    // Processes and dispatch
    // ------------------------------------------------------------------

    /// Create a kernel-mode process. The body runs when the process is
    /// first dispatched.
    pub fn spawn<F>(&self, name: &str, body: F) -> Pid
    where
        F: FnOnce(&Kernel) + Send + 'static,
    {
        self.spawn_with_mode(name, Mode::Kernel, body)
    }

    /// Create a user-mode process. Kernel services fault when it calls
    /// them.
    pub fn spawn_user<F>(&self, name: &str, body: F) -> Pid
    where
        F: FnOnce(&Kernel) + Send + 'static,
    {
        self.spawn_with_mode(name, Mode::User, body)
    }

    pub fn spawn_with_mode<F>(&self, name: &str, mode: Mode, body: F) -> Pid
    where
        F: FnOnce(&Kernel) + Send + 'static,
    {
        let pid = self.lock_inner().procs.create_process(name, mode);
        let kernel = self.self_ref.upgrade().unwrap();
        thread::spawn(move || kernel.run_process(pid, body));
        pid
    }

    /// Voluntarily give up the CPU; the caller resumes after every process
    /// ahead of it in the ready queue has run.
    pub fn yield_now(&self) {
        let mut inner = self.lock_inner();
        inner.procs.yield_current();
        let inner = self.dispatch(inner);
        drop(inner);
    }

    /// Cooperatively wait for `pid` to terminate, yielding the CPU until it
    /// does.
    pub fn join(&self, pid: Pid) {
        loop {
            {
                let inner = self.lock_inner();
                match inner.procs.state(pid) {
                    None | Some(ProcState::Terminated) => return,
                    _ => {}
                }
                if !inner.procs.has_ready() {
                    panic!("join: {:?} can never run again (deadlock)", pid);
                }
            }
            self.yield_now();
        }
    }

    pub fn process_state(&self, pid: Pid) -> Option<ProcState> {
        self.lock_inner().procs.state(pid)
    }

    /// Pid of the process running on the calling thread.
    pub fn current_process(&self) -> Pid {
        current_pid()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn lock_inner(&self) -> MutexGuard<'_, KernelInner> {
        // A faulted process may have poisoned the mutex while dying; the
        // machine state itself is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Kernel services may only be called from kernel mode. A user-mode
    /// caller takes a fatal illegal-instruction fault instead of an error
    /// return.
    fn check_kernel(inner: &KernelInner, me: Pid) {
        if inner.procs.mode(me) != Some(Mode::Kernel) {
            panic!("illegal instruction: {:?} called a kernel service from user mode", me);
        }
    }

    /// Hand the CPU off if the caller can no longer run, then park until
    /// the caller is dispatched again. A caller that is still `Running`
    /// keeps the CPU: the machine is cooperative and non-preemptive.
    fn dispatch<'a>(&self, mut inner: MutexGuard<'a, KernelInner>) -> MutexGuard<'a, KernelInner> {
        let me = current_pid();
        if inner.procs.running_is(me) {
            return inner;
        }
        match inner.procs.schedule_next() {
            Some(next) => {
                debug!("dispatch: {:?} -> {:?}", me, next);
                self.resched.notify_all();
            }
            None => panic!("dispatch: no runnable process (deadlock)"),
        }
        while !inner.procs.running_is(me) {
            inner = self
                .resched
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        inner
    }

    /// The spin-and-block loop at the heart of `lock_acquire`, shared with
    /// the reacquire step of `cond_wait`. Callers validated `lid` before
    /// any state changed.
    fn acquire_loop<'a>(
        &self,
        mut inner: MutexGuard<'a, KernelInner>,
        lid: usize,
        me: Pid,
    ) -> Result<MutexGuard<'a, KernelInner>, SyncError> {
        let mut was_blocked = false;
        loop {
            let granted = {
                let state = &mut *inner;
                let lock = state.locks.get_mut(lid)?;
                match lock.state {
                    LockState::Free => {
                        lock.state = LockState::Busy;
                        lock.owner = Some(me);
                        true
                    }
                    // `release` hands ownership straight to the longest
                    // waiter; the woken process finds itself already owner.
                    LockState::Busy if was_blocked && lock.owner == Some(me) => true,
                    LockState::Busy => {
                        lock.waiters.push_back(me);
                        state.procs.block_current(WaitChannel::Lock(lid));
                        was_blocked = true;
                        false
                    }
                }
            };
            if granted {
                debug!("lock {}: acquired by {:?}", lid, me);
                return Ok(inner);
            }
            inner = self.dispatch(inner);
        }
    }

    /// Core of `lock_release`, shared with `cond_wait`. Returns whether a
    /// waiter was woken.
    fn release_owned(inner: &mut KernelInner, lid: usize, me: Pid) -> Result<bool, SyncError> {
        let KernelInner { locks, procs, .. } = inner;
        let lock = locks.get_mut(lid)?;
        if lock.owner != Some(me) {
            return Err(SyncError::LockNotHeld);
        }
        match lock.waiters.pop_front() {
            Some(next) => {
                // Ownership moves directly; state stays Busy so "Busy iff
                // owner set" holds throughout.
                lock.owner = Some(next);
                procs.make_ready(next);
                debug!("lock {}: handed off {:?} -> {:?}", lid, me, next);
                Ok(true)
            }
            None => {
                lock.owner = None;
                lock.state = LockState::Free;
                debug!("lock {}: released by {:?}", lid, me);
                Ok(false)
            }
        }
    }

    fn signal_precondition(inner: &KernelInner, cid: usize, me: Pid) -> Result<(), SyncError> {
        let lid = inner.conds.get(cid)?.bound_lock;
        if inner.locks.get(lid)?.owner != Some(me) {
            return Err(SyncError::LockNotHeld);
        }
        Ok(())
    }

    /// Wake the longest-waiting process on `cid`, if any.
    fn signal_one(inner: &mut KernelInner, cid: usize) -> Result<bool, SyncError> {
        let KernelInner { conds, procs, .. } = inner;
        let cond = conds.get_mut(cid)?;
        match cond.waiters.pop_front() {
            Some(pid) => {
                procs.make_ready(pid);
                debug!("cond {}: woke {:?}", cid, pid);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn run_process<F>(self: Arc<Self>, pid: Pid, body: F)
    where
        F: FnOnce(&Kernel),
    {
        CURRENT_PID.with(|c| c.set(Some(pid)));
        {
            let mut inner = self.lock_inner();
            while !inner.procs.running_is(pid) {
                inner = self
                    .resched
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        let faulted = panic::catch_unwind(AssertUnwindSafe(|| body(&self))).is_err();
        let mut inner = self.lock_inner();
        if faulted {
            error!("process {:?} killed by fault", pid);
        }
        inner.procs.exit_current();
        match inner.procs.schedule_next() {
            Some(next) => {
                debug!("dispatch: {:?} exited -> {:?}", pid, next);
                self.resched.notify_all();
            }
            None => panic!("dispatch: no runnable process (deadlock)"),
        }
    }
}
