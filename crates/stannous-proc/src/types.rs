use core::num::NonZeroU32;

/// Process identifier
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Pid(NonZeroU32);

impl Pid {
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    pub fn val(&self) -> u32 {
        self.0.get()
    }
}

/// Execution context a process runs in. Kernel services fault when invoked
/// from user mode.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Mode {
    Kernel,
    User,
}
