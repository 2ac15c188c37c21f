use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Initializing = 0,
    Active = 1,
    Terminated = 2,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SessionState::Initializing,
            1 => SessionState::Active,
            _ => SessionState::Terminated,
        }
    }
}

/// Session lifecycle flag. `terminate` is a single check-and-set, so only
/// one caller ever wins the transition into `Terminated`.
#[derive(Debug)]
pub struct SessionCell(AtomicU8);

impl SessionCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(SessionState::Initializing as u8))
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn activate(&self) -> bool {
        self.0
            .compare_exchange(
                SessionState::Initializing as u8,
                SessionState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Returns true for the caller that performed the transition.
    pub fn terminate(&self) -> bool {
        self.0.swap(SessionState::Terminated as u8, Ordering::AcqRel) != SessionState::Terminated as u8
    }
}

impl Default for SessionCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Start timestamps of tasks that have begun but not ended.
#[derive(Debug, Default)]
pub struct TaskTimers {
    started: Mutex<HashMap<String, i64>>,
}

impl TaskTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restarting a running task resets its start time.
    pub fn start(&self, task_id: &str, now_ms: i64) {
        self.started
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(task_id.to_string(), now_ms);
    }

    /// Elapsed milliseconds since the matching start, consuming it.
    /// `None` if the task was never started.
    pub fn finish(&self, task_id: &str, now_ms: i64) -> Option<i64> {
        self.started
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(task_id)
            .map(|start| (now_ms - start).max(0))
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.started
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(task_id)
    }
}
