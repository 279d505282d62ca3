/*!
 * Control bus binding the worker pools to the orchestrator
 *
 * A single atomic word shared by every worker of a run. Legal transitions:
 * WORK -> PAUSE, PAUSE -> WORK, {WORK, PAUSE} -> EXIT. EXIT is terminal.
 */

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

/// Sleep interval for cooperative polling loops
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

const STATE_WORK: u8 = 0;
const STATE_PAUSE: u8 = 1;
const STATE_EXIT: u8 = 2;

/// Process-wide control word observed by every worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Work,
    Pause,
    Exit,
}

/// What a worker should do after a control checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSignal {
    /// Keep processing queue items
    Continue,
    /// Drain committed output and return
    Exit,
}

#[derive(Debug)]
pub struct ControlBus {
    state: AtomicU8,
}

impl Default for ControlBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlBus {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_WORK),
        }
    }

    /// Current state (non-blocking)
    pub fn read(&self) -> ControlState {
        match self.state.load(Ordering::Acquire) {
            STATE_PAUSE => ControlState::Pause,
            STATE_EXIT => ControlState::Exit,
            _ => ControlState::Work,
        }
    }

    /// WORK -> PAUSE. Ignored in any other state.
    pub fn request_pause(&self) -> bool {
        self.state
            .compare_exchange(STATE_WORK, STATE_PAUSE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// PAUSE -> WORK. Ignored in any other state.
    pub fn request_resume(&self) -> bool {
        self.state
            .compare_exchange(STATE_PAUSE, STATE_WORK, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// {WORK, PAUSE} -> EXIT. Terminal.
    pub fn request_cancel(&self) {
        self.state.store(STATE_EXIT, Ordering::Release);
    }

    /// Restore WORK at the start of a run. Only the orchestrator calls this,
    /// before any worker of the run exists.
    pub fn reset(&self) {
        self.state.store(STATE_WORK, Ordering::Release);
    }

    /// Worker-side checkpoint: returns immediately under WORK, sleeps through
    /// PAUSE in [`POLL_INTERVAL`] steps, reports EXIT.
    pub fn checkpoint(&self) -> WorkerSignal {
        loop {
            match self.read() {
                ControlState::Work => return WorkerSignal::Continue,
                ControlState::Exit => return WorkerSignal::Exit,
                ControlState::Pause => std::thread::sleep(POLL_INTERVAL),
            }
        }
    }
}
