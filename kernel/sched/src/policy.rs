//! Pluggable scheduling policies.

use crate::task::{Task, TaskIdx, TaskTable};
use crate::SchedError;

/// A scheduling policy.
///
/// All hooks but [`pick_next`](Self::pick_next) have default
/// implementations; a policy overrides exactly what it needs.
pub trait SchedPolicy: Send {
    /// Called when the policy is installed.
    ///
    /// # Errors
    ///
    /// An error aborts the policy change.
    fn on_insert(&mut self, tasks: &TaskTable) -> Result<(), SchedError> {
        let _ = tasks;
        Ok(())
    }

    /// Called when the policy is removed.
    ///
    /// # Errors
    ///
    /// An error aborts the policy change.
    fn on_remove(&mut self, tasks: &TaskTable) -> Result<(), SchedError> {
        let _ = tasks;
        Ok(())
    }

    /// Attaches the policy's private data to a task, at task creation and
    /// when the policy is swapped in.
    ///
    /// # Errors
    ///
    /// An error fails the spawn or the policy change.
    fn init_task_data(&mut self, task: &mut Task) -> Result<(), SchedError> {
        task.set_policy_data(None);
        Ok(())
    }

    /// Picks the task to run after `current`. Returning the sentinel means
    /// nothing is runnable.
    fn pick_next(&mut self, tasks: &TaskTable, current: TaskIdx) -> TaskIdx;
}

/// The default policy: cycle through the list in order, skipping the
/// sentinel.
pub struct RoundRobin;

impl SchedPolicy for RoundRobin {
    fn pick_next(&mut self, tasks: &TaskTable, current: TaskIdx) -> TaskIdx {
        let mut next = tasks.next_of(current);
        if next == TaskIdx::SENTINEL {
            next = tasks.next_of(next);
        }
        next
    }
}
