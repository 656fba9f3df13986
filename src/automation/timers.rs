/// One-shot timers scheduled by world modules
///
/// `setTimeout` callbacks land here. The queue is shared by every module and
/// drained by the host loop; a task may schedule further timers while it
/// runs. Nothing is cancelled when a module reloads, so a superseded module's
/// pending timers still fire.

use crate::core::lock;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

/// Work to run when a timer fires
pub type TimerTask = Box<dyn FnOnce() + Send>;

/// Identifier of a scheduled timer
pub type TimerId = Uuid;

struct PendingTimer {
    id: TimerId,
    module: String,
    due: f64,
    seq: u64,
    task: TimerTask,
}

#[derive(Default)]
struct QueueState {
    pending: Vec<PendingTimer>,
    next_seq: u64,
}

/// Host-wide queue of one-shot timers
#[derive(Clone, Default)]
pub struct TimerQueue {
    state: Arc<Mutex<QueueState>>,
}

impl TimerQueue {
    pub fn new() -> Self {
        debug!("Creating new TimerQueue");
        Self::default()
    }

    /// Schedule `task` to run once the clock reaches `due` (seconds)
    pub fn schedule(&self, module: impl Into<String>, due: f64, task: TimerTask) -> TimerId {
        let id = Uuid::new_v4();
        let module = module.into();
        let mut state = lock(&self.state);
        let seq = state.next_seq;
        state.next_seq += 1;

        debug!("Module '{}' scheduled timer {} due at {:.3}", module, id, due);
        state.pending.push(PendingTimer {
            id,
            module,
            due,
            seq,
            task,
        });
        id
    }

    /// Run every timer due at `now`, earliest first
    ///
    /// Due tasks are taken out of the queue before any of them runs. Timers
    /// scheduled by those tasks wait for the next call even when already due.
    /// Returns the number of tasks run.
    pub fn run_due(&self, now: f64) -> usize {
        let mut due: Vec<PendingTimer> = {
            let mut state = lock(&self.state);
            let (ready, waiting): (Vec<_>, Vec<_>) =
                state.pending.drain(..).partition(|timer| timer.due <= now);
            state.pending = waiting;
            ready
        };

        if due.is_empty() {
            return 0;
        }

        due.sort_by(|a, b| a.due.total_cmp(&b.due).then(a.seq.cmp(&b.seq)));
        let count = due.len();
        for timer in due {
            debug!("Firing timer {} for module '{}'", timer.id, timer.module);
            (timer.task)();
        }

        info!("Fired {} timer(s)", count);
        count
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.state).pending.len()
    }
}
