//! In-memory task tracker.
//!
//! The tracker owns every task record; all status changes go through the
//! core state machine under the map's per-entry lock. Terminal tasks are
//! kept for a retention period so late `task.cancel` calls still get a
//! meaningful answer, then purged.

use asap_core::{AsapError, SharedClock, Task, TaskId, TaskStatus};
use dashmap::DashMap;
use std::time::Duration;

#[derive(Debug)]
pub struct TaskTracker {
    tasks: DashMap<TaskId, Task>,
    clock: SharedClock,
}

impl TaskTracker {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            tasks: DashMap::new(),
            clock,
        }
    }

    /// Record a new task in `submitted`.
    pub fn create(&self, conversation_id: &str) -> Task {
        let task = Task::new(conversation_id, self.clock.now());
        self.tasks.insert(task.id, task.clone());
        tracing::debug!(task_id = %task.id, conversation_id, "Task submitted");
        task
    }

    pub fn get(&self, task_id: &TaskId) -> Option<Task> {
        self.tasks.get(task_id).map(|t| t.clone())
    }

    /// Parse a wire task id and look it up.
    pub fn find(&self, raw_id: &str) -> Result<Task, AsapError> {
        raw_id
            .parse::<TaskId>()
            .ok()
            .and_then(|id| self.get(&id))
            .ok_or_else(|| AsapError::TaskNotFound {
                task_id: raw_id.to_string(),
            })
    }

    /// Apply a transition through the state machine.
    pub fn transition(&self, task_id: &TaskId, target: TaskStatus) -> Result<Task, AsapError> {
        let mut entry = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| AsapError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        let updated = entry.transition_at(target, self.clock.now())?;
        *entry = updated.clone();
        tracing::debug!(task_id = %task_id, status = %target, "Task transitioned");
        Ok(updated)
    }

    /// Cancel by wire id.
    pub fn cancel(&self, raw_id: &str) -> Result<Task, AsapError> {
        let id = raw_id
            .parse::<TaskId>()
            .map_err(|_| AsapError::TaskNotFound {
                task_id: raw_id.to_string(),
            })?;
        self.transition(&id, TaskStatus::Cancelled)
    }

    /// Copy of every tracked task, oldest first.
    pub fn snapshot(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.iter().map(|t| t.value().clone()).collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    /// Drop terminal tasks last updated at least `retention` ago.
    ///
    /// Returns how many were removed. Live tasks are never purged.
    pub fn purge_terminal(&self, retention: Duration) -> usize {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let now = self.clock.now();
        let before = self.tasks.len();
        self.tasks.retain(|_, task| {
            !(task.status.is_terminal() && now.signed_duration_since(task.updated_at) >= retention)
        });
        before.saturating_sub(self.tasks.len())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asap_core::ManualClock;
    use std::sync::Arc;

    fn tracker() -> (TaskTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        (TaskTracker::new(clock.clone()), clock)
    }

    #[test]
    fn test_lifecycle_through_tracker() {
        let (tracker, clock) = tracker();
        let task = tracker.create("conv");
        clock.advance(Duration::from_secs(2));
        let running = tracker.transition(&task.id, TaskStatus::Running).unwrap();
        assert!(running.updated_at > task.updated_at);
        tracker.transition(&task.id, TaskStatus::Completed).unwrap();
        assert_eq!(tracker.get(&task.id).unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn test_cancel_errors() {
        let (tracker, _) = tracker();
        assert_eq!(
            tracker.cancel("not-a-uuid").unwrap_err().code(),
            "protocol/task_not_found"
        );
        assert_eq!(
            tracker.cancel(&TaskId::new().to_string()).unwrap_err().code(),
            "protocol/task_not_found"
        );

        let task = tracker.create("conv");
        tracker.cancel(&task.id.to_string()).unwrap();
        let err = tracker.cancel(&task.id.to_string()).unwrap_err();
        assert_eq!(err.code(), "protocol/invalid_state_transition");
        assert_eq!(tracker.find(&task.id.to_string()).unwrap().status, TaskStatus::Cancelled);
    }

    #[test]
    fn test_purge_drops_only_expired_terminal_tasks() {
        let (tracker, clock) = tracker();
        let done = tracker.create("conv");
        tracker.transition(&done.id, TaskStatus::Running).unwrap();
        tracker.transition(&done.id, TaskStatus::Completed).unwrap();
        let cancelled = tracker.create("conv");
        tracker.cancel(&cancelled.id.to_string()).unwrap();
        let running = tracker.create("conv");
        tracker.transition(&running.id, TaskStatus::Running).unwrap();

        clock.advance(Duration::from_secs(30));
        let fresh = tracker.create("conv");
        tracker.cancel(&fresh.id.to_string()).unwrap();

        assert_eq!(tracker.purge_terminal(Duration::from_secs(60)), 0);

        clock.advance(Duration::from_secs(30));
        assert_eq!(tracker.purge_terminal(Duration::from_secs(60)), 2);
        assert!(tracker.get(&done.id).is_none());
        assert!(tracker.get(&cancelled.id).is_none());
        assert!(tracker.get(&fresh.id).is_some());

        // Running tasks stay however old they get
        clock.advance(Duration::from_secs(86_400));
        assert_eq!(tracker.purge_terminal(Duration::from_secs(60)), 1);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.get(&running.id).unwrap().status, TaskStatus::Running);
    }
}
