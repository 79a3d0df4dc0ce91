//! End-to-end tests driving the lock and condition variable services from
//! real cooperatively scheduled processes.

use stannous_kernel::error::SyncError;
use stannous_kernel::sync::MAX_LOCKS;
use stannous_kernel::Kernel;
use stannous_proc::pcb::{ProcState, WaitChannel};
use std::sync::{Arc, Mutex};

type Events = Arc<Mutex<Vec<String>>>;

fn events() -> Events {
    Arc::new(Mutex::new(Vec::new()))
}

fn push(events: &Events, event: impl Into<String>) {
    events.lock().unwrap().push(event.into());
}

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn waiters_are_granted_the_lock_in_arrival_order() {
    init_logs();
    let kernel = Kernel::new();
    kernel.lock_init();
    let lid = kernel.lock_create("disk").unwrap();
    kernel.lock_acquire(lid).unwrap();

    let log = events();
    let mut pids = Vec::new();
    for name in ["w1", "w2", "w3"] {
        let log = Arc::clone(&log);
        pids.push(kernel.spawn(name, move |k| {
            k.lock_acquire(lid).unwrap();
            push(&log, name);
            k.lock_release(lid).unwrap();
        }));
    }

    // One yield runs each waiter until it blocks on the held lock.
    kernel.yield_now();
    for &pid in &pids {
        assert_eq!(
            kernel.process_state(pid),
            Some(ProcState::Blocked(WaitChannel::Lock(lid)))
        );
    }

    kernel.lock_release(lid).unwrap();
    for &pid in &pids {
        kernel.join(pid);
    }

    assert_eq!(*log.lock().unwrap(), ["w1", "w2", "w3"]);
    kernel.lock_free(lid).unwrap();
}

#[test]
fn release_by_non_owner_fails_and_changes_nothing() {
    let kernel = Kernel::new();
    kernel.lock_init();
    let lid = kernel.lock_create("frame-table").unwrap();
    kernel.lock_acquire(lid).unwrap();
    let owner = kernel.current_process();

    let log = events();
    let observed = Arc::clone(&log);
    let intruder = kernel.spawn("intruder", move |k| {
        assert_eq!(k.lock_release(lid), Err(SyncError::LockNotHeld));
        push(&observed, format!("owner={:?}", k.lock_owner(lid).unwrap()));
    });

    kernel.join(intruder);
    assert_eq!(*log.lock().unwrap(), [format!("owner={:?}", Some(owner))]);

    // The rightful owner can still release.
    kernel.lock_release(lid).unwrap();
    kernel.lock_free(lid).unwrap();
}

#[test]
fn free_fails_until_waiters_drain() {
    let kernel = Kernel::new();
    kernel.lock_init();
    let lid = kernel.lock_create("queue").unwrap();
    kernel.lock_acquire(lid).unwrap();

    let waiter = kernel.spawn("waiter", move |k| {
        k.lock_acquire(lid).unwrap();
        k.lock_release(lid).unwrap();
    });
    kernel.yield_now();

    assert_eq!(kernel.lock_free(lid), Err(SyncError::BlockedProcesses));

    // Held with no waiters also refuses to free.
    kernel.lock_release(lid).unwrap();
    kernel.join(waiter);
    kernel.lock_acquire(lid).unwrap();
    assert_eq!(kernel.lock_free(lid), Err(SyncError::LockBusy));

    kernel.lock_release(lid).unwrap();
    kernel.lock_free(lid).unwrap();
}

/// The end-to-end wait/signal exchange: waiting fully releases the bound
/// lock, signaling makes the waiter ready without the lock, and the waiter
/// returns from `cond_wait` holding it again.
#[test]
fn wait_releases_the_lock_and_reacquires_before_returning() {
    init_logs();
    let kernel = Kernel::new();
    kernel.cond_init();
    let lid = kernel.lock_create("mailbox").unwrap();
    let cid = kernel.cond_create("mail-arrived", lid).unwrap();

    let log = events();
    let waiter_log = Arc::clone(&log);
    let waiter = kernel.spawn("waiter", move |k| {
        k.lock_acquire(lid).unwrap();
        k.cond_wait(cid).unwrap();
        // cond_wait only returns once the lock is ours again.
        assert_eq!(k.lock_owner(lid).unwrap(), Some(k.current_process()));
        push(&waiter_log, "resumed");
        k.lock_release(lid).unwrap();
    });

    kernel.yield_now();
    assert_eq!(
        kernel.process_state(waiter),
        Some(ProcState::Blocked(WaitChannel::Condition {
            cond: cid,
            lock: lid
        }))
    );
    // Fully released: nobody owns it and we can take it immediately.
    assert_eq!(kernel.lock_owner(lid).unwrap(), None);
    kernel.lock_acquire(lid).unwrap();

    kernel.cond_signal(cid).unwrap();
    // Ready, but not the owner until its pending reacquire runs.
    assert_eq!(kernel.process_state(waiter), Some(ProcState::Ready));
    assert_eq!(
        kernel.lock_owner(lid).unwrap(),
        Some(kernel.current_process())
    );
    assert!(log.lock().unwrap().is_empty());

    kernel.lock_release(lid).unwrap();
    kernel.join(waiter);
    assert_eq!(*log.lock().unwrap(), ["resumed"]);

    kernel.cond_free(cid).unwrap();
    kernel.lock_free(lid).unwrap();
}

#[test]
fn signal_with_no_waiters_is_a_successful_noop() {
    let kernel = Kernel::new();
    kernel.cond_init();
    let lid = kernel.lock_create("idle").unwrap();
    let cid = kernel.cond_create("never-waited", lid).unwrap();

    kernel.lock_acquire(lid).unwrap();
    kernel.cond_signal(cid).unwrap();
    kernel.cond_broadcast(cid).unwrap();
    assert_eq!(kernel.cond_waiting(cid).unwrap(), 0);
    kernel.lock_release(lid).unwrap();
}

#[test]
fn broadcast_wakes_every_waiter_exactly_once() {
    let kernel = Kernel::new();
    kernel.cond_init();
    let lid = kernel.lock_create("barrier").unwrap();
    let cid = kernel.cond_create("opened", lid).unwrap();

    let log = events();
    let mut pids = Vec::new();
    for name in ["a", "b", "c"] {
        let log = Arc::clone(&log);
        pids.push(kernel.spawn(name, move |k| {
            k.lock_acquire(lid).unwrap();
            k.cond_wait(cid).unwrap();
            push(&log, name);
            k.lock_release(lid).unwrap();
        }));
    }

    kernel.yield_now();
    assert_eq!(kernel.cond_waiting(cid).unwrap(), 3);

    kernel.lock_acquire(lid).unwrap();
    kernel.cond_broadcast(cid).unwrap();
    assert_eq!(kernel.cond_waiting(cid).unwrap(), 0);
    kernel.lock_release(lid).unwrap();

    for &pid in &pids {
        kernel.join(pid);
    }
    assert_eq!(*log.lock().unwrap(), ["a", "b", "c"]);

    kernel.cond_free(cid).unwrap();
    kernel.lock_free(lid).unwrap();
}

#[test]
fn naked_signal_skips_the_lock_contract() {
    let kernel = Kernel::new();
    kernel.cond_init();
    let lid = kernel.lock_create("inbox").unwrap();
    let cid = kernel.cond_create("posted", lid).unwrap();

    let waiter = kernel.spawn("waiter", move |k| {
        k.lock_acquire(lid).unwrap();
        k.cond_wait(cid).unwrap();
        k.lock_release(lid).unwrap();
    });
    kernel.yield_now();

    // An ordinary signal still demands the lock.
    assert_eq!(kernel.cond_signal(cid), Err(SyncError::LockNotHeld));
    kernel.cond_naked_signal(cid).unwrap();
    kernel.join(waiter);

    kernel.cond_free(cid).unwrap();
    kernel.lock_free(lid).unwrap();
}

#[test]
fn condition_creation_validates_name_lock_and_binding() {
    let kernel = Kernel::new();
    kernel.cond_init();
    let lid = kernel.lock_create("pool").unwrap();

    assert_eq!(kernel.cond_create("", lid), Err(SyncError::EmptyName));
    assert_eq!(kernel.cond_create("orphan", 31), Err(SyncError::InvalidLock));

    let cid = kernel.cond_create("replenished", lid).unwrap();
    assert_eq!(
        kernel.cond_create("replenished", lid),
        Err(SyncError::DuplicateName)
    );
    // One condition variable per lock at a time.
    assert_eq!(kernel.cond_create("second", lid), Err(SyncError::AlreadyBound));

    kernel.cond_free(cid).unwrap();
    kernel.cond_create("second", lid).unwrap();
}

#[test]
fn wait_and_signal_validate_their_ids_and_owner() {
    let kernel = Kernel::new();
    kernel.cond_init();
    let lid = kernel.lock_create("scratch").unwrap();
    let cid = kernel.cond_create("scratch-change", lid).unwrap();

    assert_eq!(kernel.cond_wait(17), Err(SyncError::InvalidCond));
    assert_eq!(kernel.cond_signal(17), Err(SyncError::InvalidCond));
    assert_eq!(kernel.cond_naked_signal(17), Err(SyncError::InvalidCond));
    // Not holding the bound lock.
    assert_eq!(kernel.cond_wait(cid), Err(SyncError::LockNotHeld));
    assert_eq!(kernel.cond_broadcast(cid), Err(SyncError::LockNotHeld));

    // Freeing the lock strands the condition variable.
    kernel.lock_free(lid).unwrap();
    assert_eq!(kernel.cond_wait(cid), Err(SyncError::InvalidLock));
    assert_eq!(kernel.cond_signal(cid), Err(SyncError::InvalidLock));
}

#[test]
fn cond_free_fails_while_processes_wait() {
    let kernel = Kernel::new();
    kernel.cond_init();
    let lid = kernel.lock_create("stage").unwrap();
    let cid = kernel.cond_create("curtain", lid).unwrap();

    let waiter = kernel.spawn("waiter", move |k| {
        k.lock_acquire(lid).unwrap();
        k.cond_wait(cid).unwrap();
        k.lock_release(lid).unwrap();
    });
    kernel.yield_now();

    assert_eq!(kernel.cond_free(cid), Err(SyncError::BlockedProcesses));

    kernel.cond_naked_signal(cid).unwrap();
    kernel.join(waiter);
    kernel.cond_free(cid).unwrap();
}

#[test]
fn lock_table_capacity_is_enforced() {
    let kernel = Kernel::new();
    kernel.lock_init();
    for i in 0..MAX_LOCKS {
        kernel.lock_create(&format!("lock{i}")).unwrap();
    }
    assert_eq!(kernel.lock_create("overflow"), Err(SyncError::TooManyLocks));

    // The failed create changed nothing: freeing a slot lets the same name in.
    kernel.lock_free(0).unwrap();
    assert_eq!(kernel.lock_create("overflow").unwrap(), 0);
}

#[test]
fn name_lookup_copies_through_a_short_buffer() {
    let kernel = Kernel::new();
    kernel.cond_init();
    let lid = kernel.lock_create("page-cache").unwrap();
    let cid = kernel.cond_create("page-ready", lid).unwrap();

    let mut buf = [0u8; 4];
    assert_eq!(kernel.lock_name(lid, &mut buf).unwrap(), 4);
    assert_eq!(&buf, b"page");

    let mut wide = [0u8; 64];
    let n = kernel.cond_name(cid, &mut wide).unwrap();
    assert_eq!(&wide[..n], b"page-ready");

    assert_eq!(kernel.lock_name(9, &mut buf), Err(SyncError::InvalidLock));
}

#[test]
fn init_entry_points_reset_the_tables() {
    let kernel = Kernel::new();
    kernel.cond_init();
    let lid = kernel.lock_create("a").unwrap();
    kernel.cond_create("b", lid).unwrap();

    kernel.cond_init();
    assert_eq!(kernel.lock_create("a").unwrap(), 0);
    assert_eq!(kernel.cond_create("b", 0).unwrap(), 0);
}

#[test]
fn user_mode_caller_is_killed_not_answered() {
    init_logs();
    let kernel = Kernel::new();
    kernel.lock_init();

    let rogue = kernel.spawn_user("rogue", move |k| {
        // Fatal: this never returns a result code.
        let _ = k.lock_create("stolen");
        unreachable!("survived a protection fault");
    });
    kernel.join(rogue);
    assert_eq!(kernel.process_state(rogue), Some(ProcState::Terminated));

    // The fault left the table untouched.
    assert_eq!(kernel.lock_create("stolen").unwrap(), 0);
}
