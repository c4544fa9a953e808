//! Pin-aware assignment filter.
//!
//! Every worker asks [`PinFilter::allows`] before taking a task from any
//! queue, its own or another's. The filter is pure so the affinity rules
//! can be tested without threads:
//!
//! - A task pinned to worker `W` is only ever taken by `W`: immediately
//!   from `W`'s own queue, or from another queue once it has been overdue
//!   for the steal threshold.
//! - An unpinned task is taken by the worker whose queue holds it. Other
//!   workers may steal it once it has been overdue for the steal
//!   threshold, or at once while the queue's worker is busy with a pinned
//!   task.

use tessera_core::WorkerId;

/// What the filter needs to know about one queued task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskView {
    /// Monotonic time the task becomes due.
    pub due_at: u64,
    /// Worker whose queue holds the task.
    pub queue: WorkerId,
    /// Worker the task is pinned to.
    pub pinned_to: Option<WorkerId>,
    /// Whether the queue's worker is currently running a pinned task.
    pub queue_running_pinned: bool,
}

/// Assignment and steal predicate.
#[derive(Clone, Copy, Debug)]
pub struct PinFilter {
    steal_threshold_nanos: u64,
}

impl PinFilter {
    /// A filter letting tasks be stolen after `steal_threshold_nanos`.
    pub fn new(steal_threshold_nanos: u64) -> Self {
        Self {
            steal_threshold_nanos,
        }
    }

    /// Whether `taker` may run `task` at monotonic time `now`.
    pub fn allows(&self, task: &TaskView, taker: WorkerId, now: u64) -> bool {
        if now < task.due_at {
            return false;
        }
        let overdue = now - task.due_at >= self.steal_threshold_nanos;
        match task.pinned_to {
            Some(pinned) => taker == pinned && (task.queue == pinned || overdue),
            None => taker == task.queue || task.queue_running_pinned || overdue,
        }
    }

    /// Earliest time at which `taker` could be allowed `task`, assuming
    /// nothing else changes. `None` if it never could.
    pub fn earliest(&self, task: &TaskView, taker: WorkerId) -> Option<u64> {
        let immediate = match task.pinned_to {
            Some(pinned) if pinned != taker => return None,
            Some(pinned) => task.queue == pinned,
            None => taker == task.queue || task.queue_running_pinned,
        };
        if immediate {
            Some(task.due_at)
        } else {
            Some(task.due_at.saturating_add(self.steal_threshold_nanos))
        }
    }
}
