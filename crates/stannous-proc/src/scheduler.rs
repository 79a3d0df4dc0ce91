use crate::types::Pid;
use std::collections::VecDeque;

pub trait Scheduler: Send {
    /// Select next process to run
    fn next(&mut self) -> Option<Pid>;

    /// Add process to ready queue
    fn enqueue(&mut self, pid: Pid);

    /// Remove process from ready queue (e.g. if terminated early)
    fn remove(&mut self, pid: Pid) -> bool;

    /// Whether any process is waiting for the CPU
    fn has_ready(&self) -> bool;
}

pub struct RoundRobin {
    ready_queue: VecDeque<Pid>,
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            ready_queue: VecDeque::new(),
        }
    }
}

impl Scheduler for RoundRobin {
    fn next(&mut self) -> Option<Pid> {
        self.ready_queue.pop_front()
    }

    fn enqueue(&mut self, pid: Pid) {
        self.ready_queue.push_back(pid);
    }

    fn remove(&mut self, pid: Pid) -> bool {
        // Not efficient for deque but correct
        if let Some(pos) = self.ready_queue.iter().position(|&p| p == pid) {
            self.ready_queue.remove(pos);
            true
        } else {
            false
        }
    }

    fn has_ready(&self) -> bool {
        !self.ready_queue.is_empty()
    }
}
