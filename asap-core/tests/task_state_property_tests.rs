//! Property-based tests for the task lifecycle state machine.
//!
//! For any sequence of requested transitions, a task only ever moves along
//! an edge of the lifecycle graph, and once terminal it never moves again.

use asap_core::{Task, TaskStatus};
use chrono::{Duration, Utc};
use asap_test_utils::generators::arb_task_status;
use proptest::prelude::*;

fn is_edge(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Submitted, Running)
            | (Submitted, Cancelled)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Cancelled)
    )
}

proptest! {
    #[test]
    fn prop_only_graph_edges_accepted(from in arb_task_status(), to in arb_task_status()) {
        prop_assert_eq!(from.can_transition(to), is_edge(from, to));
        prop_assert_eq!(from.allowed_targets().contains(&to), is_edge(from, to));
    }

    #[test]
    fn prop_random_walk_respects_graph(targets in prop::collection::vec(arb_task_status(), 0..16)) {
        let start = Utc::now();
        let mut task = Task::new("conv", start);
        let mut terminal_seen = false;

        for (step, target) in targets.into_iter().enumerate() {
            let at = start + Duration::seconds(step as i64 + 1);
            let before = task.status;
            match task.transition_at(target, at) {
                Ok(next) => {
                    prop_assert!(!terminal_seen, "terminal task moved to {}", target);
                    prop_assert!(is_edge(before, target));
                    prop_assert_eq!(next.status, target);
                    prop_assert!(next.updated_at >= task.updated_at);
                    prop_assert_eq!(next.created_at, task.created_at);
                    task = next;
                }
                Err(err) => {
                    prop_assert!(!is_edge(before, target));
                    prop_assert_eq!(err.code(), "protocol/invalid_state_transition");
                }
            }
            terminal_seen = task.status.is_terminal();
        }
    }
}
