pub mod pcb;
pub mod scheduler;
pub mod types;

use log::debug;
use pcb::{Pcb, ProcState, WaitChannel};
use scheduler::{RoundRobin, Scheduler};
use std::collections::HashMap;
use types::{Mode, Pid};

/// Process table and ready queue. The machine has exactly one; the kernel
/// owns it and mutates it only inside its critical section.
pub struct ProcManager {
    procs: HashMap<Pid, Pcb>,
    scheduler: Box<dyn Scheduler>,
    current: Option<Pid>,
    next_pid: u32,
}

impl Default for ProcManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcManager {
    pub fn new() -> Self {
        Self {
            procs: HashMap::new(),
            scheduler: Box::new(RoundRobin::new()),
            current: None,
            next_pid: 1,
        }
    }

    /// Register a new process in `Ready` state and queue it for the CPU.
    pub fn create_process(&mut self, name: &str, mode: Mode) -> Pid {
        let pid = self.alloc_pid();
        let pcb = Pcb {
            pid,
            name: name.to_string(),
            mode,
            state: ProcState::Ready,
        };
        self.procs.insert(pid, pcb);
        self.scheduler.enqueue(pid);
        debug!("created process {:?} ({})", pid, name);
        pid
    }

    /// Register the boot process. It already holds the CPU, so it goes
    /// straight to `Running` without passing through the ready queue.
    pub fn adopt_boot_process(&mut self, name: &str) -> Pid {
        let pid = self.alloc_pid();
        let pcb = Pcb {
            pid,
            name: name.to_string(),
            mode: Mode::Kernel,
            state: ProcState::Running,
        };
        self.procs.insert(pid, pcb);
        self.current = Some(pid);
        pid
    }

    fn alloc_pid(&mut self) -> Pid {
        let pid = Pid::new(self.next_pid).unwrap();
        self.next_pid += 1;
        pid
    }

    pub fn current(&self) -> Option<Pid> {
        self.current
    }

    /// True while `pid` is the process holding the CPU.
    pub fn running_is(&self, pid: Pid) -> bool {
        self.current == Some(pid)
            && self
                .procs
                .get(&pid)
                .is_some_and(|p| p.state == ProcState::Running)
    }

    pub fn state(&self, pid: Pid) -> Option<ProcState> {
        self.procs.get(&pid).map(|p| p.state)
    }

    pub fn mode(&self, pid: Pid) -> Option<Mode> {
        self.procs.get(&pid).map(|p| p.mode)
    }

    pub fn name(&self, pid: Pid) -> Option<&str> {
        self.procs.get(&pid).map(|p| p.name.as_str())
    }

    /// Mark the running process blocked on `channel`. It stays current until
    /// the next dispatch hands the CPU to a successor.
    pub fn block_current(&mut self, channel: WaitChannel) {
        if let Some(current) = self.current {
            if let Some(pcb) = self.procs.get_mut(&current) {
                pcb.state = ProcState::Blocked(channel);
            }
        }
    }

    /// Move the running process back to the tail of the ready queue.
    pub fn yield_current(&mut self) {
        if let Some(current) = self.current {
            if let Some(pcb) = self.procs.get_mut(&current) {
                if pcb.state == ProcState::Running {
                    pcb.state = ProcState::Ready;
                    self.scheduler.enqueue(current);
                }
            }
        }
    }

    pub fn exit_current(&mut self) {
        if let Some(current) = self.current.take() {
            if let Some(pcb) = self.procs.get_mut(&current) {
                pcb.state = ProcState::Terminated;
            }
            debug!("process {:?} terminated", current);
        }
    }

    /// Make a blocked process runnable again. Anything else is left alone so
    /// a stray wakeup cannot resurrect a terminated process.
    pub fn make_ready(&mut self, pid: Pid) {
        if let Some(pcb) = self.procs.get_mut(&pid) {
            if matches!(pcb.state, ProcState::Blocked(_)) {
                pcb.state = ProcState::Ready;
                self.scheduler.enqueue(pid);
            }
        }
    }

    /// Hand the CPU to the next ready process, if any.
    pub fn schedule_next(&mut self) -> Option<Pid> {
        let next = self.scheduler.next()?;
        if let Some(pcb) = self.procs.get_mut(&next) {
            pcb.state = ProcState::Running;
        }
        self.current = Some(next);
        Some(next)
    }

    pub fn has_ready(&self) -> bool {
        self.scheduler.has_ready()
    }
}
