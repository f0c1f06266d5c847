//! 请求生命周期状态
//!
//! Idle → Queued → Running → {Completed, TimedOut, Rejected}；Idle 也可直接进入 Running（有空闲槽位）
//! 或 Rejected（队列已满）。Queued 状态下超时直接进入 TimedOut。

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum RequestState {
    Idle,
    Queued,
    Running,
    Completed,
    TimedOut,
    Rejected,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::TimedOut | RequestState::Rejected
        )
    }

    /// 是否为合法的状态迁移
    pub fn can_transition_to(self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Idle, Queued)
                | (Idle, Running)
                | (Idle, Rejected)
                | (Queued, Running)
                | (Queued, TimedOut)
                | (Queued, Rejected)
                | (Running, Completed)
                | (Running, TimedOut)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::RequestState::*;

    #[test]
    fn test_transitions() {
        assert!(Idle.can_transition_to(Queued));
        assert!(Queued.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Queued.can_transition_to(TimedOut));
        assert!(!Running.can_transition_to(Queued));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Rejected.can_transition_to(Queued));
    }

    #[test]
    fn test_terminal_states() {
        assert!(Completed.is_terminal());
        assert!(TimedOut.is_terminal());
        assert!(Rejected.is_terminal());
        assert!(!Running.is_terminal());
        assert!(!Idle.is_terminal());
    }
}
