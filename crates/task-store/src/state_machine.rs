//! Task state machine enforcement.
//!
//! ```text
//! QUEUED -> RUNNING -> COMPLETED
//!    |         |
//!    |         +-> FAILED
//!    +-> FAILED          (enqueue failure)
//! COMPLETED/FAILED/CANCELLED -> (terminal, no further transitions)
//! ```
//!
//! The store never rejects a status write outright — every write here is an
//! upsert the handler may retry under at-least-once delivery, and a
//! rejected write would leave a handler failure unacked forever. Instead, a
//! write that would regress the task's progress is silently dropped: a
//! COMPLETED seen before a late RUNNING causes the later write to be
//! ignored at the store, and terminal state is monotonic. `should_apply`
//! is the single place this ordering is decided; callers upsert only when
//! it returns `true`.

use task_types::TaskState;

fn rank(state: TaskState) -> u8 {
    match state {
        TaskState::Queued => 0,
        TaskState::Running => 1,
        TaskState::Completed | TaskState::Failed | TaskState::Cancelled => 2,
    }
}

/// `true` if a transition from `from` to `to` should be written to the
/// store. Reordered or regressive writes (including a second, different
/// terminal state) are reported `false` rather than erroring.
pub fn should_apply(from: TaskState, to: TaskState) -> bool {
    if from.is_terminal() && to.is_terminal() && from != to {
        return false;
    }
    rank(from) <= rank(to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_can_move_to_running_or_failed() {
        assert!(should_apply(TaskState::Queued, TaskState::Running));
        assert!(should_apply(TaskState::Queued, TaskState::Failed));
    }

    #[test]
    fn queued_can_skip_straight_to_completed() {
        // QUEUED -> FAILED already skips RUNNING for the enqueue-failure
        // case, so the store treats rank order, not a strict
        // state-by-state walk, as the invariant.
        assert!(should_apply(TaskState::Queued, TaskState::Completed));
    }

    #[test]
    fn running_can_complete_or_fail() {
        assert!(should_apply(TaskState::Running, TaskState::Completed));
        assert!(should_apply(TaskState::Running, TaskState::Failed));
    }

    #[test]
    fn terminal_states_ignore_all_further_transitions() {
        for terminal in [TaskState::Completed, TaskState::Failed, TaskState::Cancelled] {
            for target in [
                TaskState::Queued,
                TaskState::Running,
                TaskState::Completed,
                TaskState::Failed,
                TaskState::Cancelled,
            ] {
                if terminal == target {
                    assert!(should_apply(terminal, target));
                } else {
                    assert!(!should_apply(terminal, target));
                }
            }
        }
    }

    #[test]
    fn late_running_after_completed_is_ignored() {
        assert!(!should_apply(TaskState::Completed, TaskState::Running));
    }

    #[test]
    fn regressive_running_to_queued_is_ignored() {
        assert!(!should_apply(TaskState::Running, TaskState::Queued));
    }
}
