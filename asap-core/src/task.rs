//! Task lifecycle state machine.
//!
//! # State Transition Diagram
//!
//! ```text
//! Submitted ──→ Running ──┬──→ Completed (terminal)
//!     │            │      └──→ Failed    (terminal)
//!     └────────────┴─────────→ Cancelled (terminal)
//! ```
//!
//! Every change to a [`Task`] goes through [`Task::transition`]; terminal
//! states reject all transitions, including self-transitions.

use crate::error::AsapError;
use crate::ids::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// TASK STATUS
// ============================================================================

/// Status of a task owned by the receiving agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Submitted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Submitted,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Submitted => "submitted",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// States reachable from this one in a single step.
    pub fn allowed_targets(&self) -> &'static [TaskStatus] {
        match self {
            TaskStatus::Submitted => &[TaskStatus::Running, TaskStatus::Cancelled],
            TaskStatus::Running => &[
                TaskStatus::Completed,
                TaskStatus::Failed,
                TaskStatus::Cancelled,
            ],
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => &[],
        }
    }

    /// Whether `self → target` is an edge of the lifecycle graph.
    pub fn can_transition(&self, target: TaskStatus) -> bool {
        self.allowed_targets().contains(&target)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an invalid task status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid task status: {}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "submitted" => Ok(TaskStatus::Submitted),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" | "canceled" => Ok(TaskStatus::Cancelled),
            _ => Err(TaskStatusParseError(s.to_string())),
        }
    }
}

// ============================================================================
// TASK
// ============================================================================

/// A unit of work tracked by the receiving agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub conversation_id: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a freshly submitted task.
    pub fn new(conversation_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::new(),
            conversation_id: conversation_id.into(),
            status: TaskStatus::Submitted,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a transition at the given instant.
    ///
    /// Returns the updated task; `updated_at` never moves backwards.
    pub fn transition_at(
        &self,
        target: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<Task, AsapError> {
        if !self.status.can_transition(target) {
            return Err(AsapError::InvalidStateTransition {
                task_id: self.id.to_string(),
                from: self.status,
                to: target,
            });
        }
        Ok(Task {
            status: target,
            updated_at: now.max(self.updated_at),
            ..self.clone()
        })
    }

    /// Apply a transition stamped with the current system time.
    pub fn transition(&self, target: TaskStatus) -> Result<Task, AsapError> {
        self.transition_at(target, Utc::now())
    }
}
