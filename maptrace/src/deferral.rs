//! Deferred write capture
//!
//! A store's effective address is only available before the instruction
//! runs, but the record should only be written once the store has
//! completed. The pre-execution callback parks the address and size here and
//! the post-execution (or taken-branch) callback takes them back out.
//!
//! Each instrumented store owns a [`PendingWrites`], and within it each
//! thread owns its own slot, so neither another store nor another thread can
//! overwrite a pending write between the two callbacks.

use crate::host::ThreadId;
use parking_lot::Mutex;
use std::collections::HashMap;

/// State of one in-flight store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteState {
    #[default]
    Idle,
    Pending { addr: u64, size: u32 },
}

impl WriteState {
    /// Park a write, replacing whatever was pending
    pub fn capture(&mut self, addr: u64, size: u32) {
        *self = WriteState::Pending { addr, size };
    }

    /// Take the pending write, leaving the slot idle
    pub fn take(&mut self) -> Option<(u64, u32)> {
        match std::mem::take(self) {
            WriteState::Idle => None,
            WriteState::Pending { addr, size } => Some((addr, size)),
        }
    }
}

/// Per-thread pending-write slots
#[derive(Debug, Default)]
pub struct PendingWrites {
    slots: Mutex<HashMap<ThreadId, WriteState>>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-execution half: remember the write for `thread`
    pub fn capture(&self, thread: ThreadId, addr: u64, size: u32) {
        self.slots.lock().entry(thread).or_default().capture(addr, size);
    }

    /// Post-execution half: consume the write pending for `thread`, if any
    ///
    /// Returns `None` when the pre-execution half did not fire for this
    /// dynamic instance, e.g. because the store's predicate was false.
    pub fn take(&self, thread: ThreadId) -> Option<(u64, u32)> {
        self.slots.lock().get_mut(&thread).and_then(WriteState::take)
    }

    /// Current state of the slot for `thread`
    pub fn state(&self, thread: ThreadId) -> WriteState {
        self.slots.lock().get(&thread).copied().unwrap_or_default()
    }
}
