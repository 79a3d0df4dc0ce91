use crate::types::{Mode, Pid};

/// What a blocked process is waiting on. The ids are the kernel's
/// small-integer lock and condition variable handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitChannel {
    Lock(usize),
    Condition { cond: usize, lock: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Ready,
    Running,
    Blocked(WaitChannel),
    Terminated,
}

pub struct Pcb {
    pub pid: Pid,
    pub name: String,
    pub mode: Mode,
    pub state: ProcState,
}
