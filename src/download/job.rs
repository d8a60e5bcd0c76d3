use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of one extraction job.
///
/// ```text
/// Idle → Launched → Streaming → { Completed | Failed | Cancelled }
/// ```
///
/// Terminal states can also be entered straight from `Idle` or `Launched`
/// (launch failure, early exit, caller gone before the first byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
    Idle = 0,
    Launched = 1,
    Streaming = 2,
    Completed = 3,
    Failed = 4,
    Cancelled = 5,
}

impl JobState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => JobState::Idle,
            1 => JobState::Launched,
            2 => JobState::Streaming,
            3 => JobState::Completed,
            4 => JobState::Failed,
            _ => JobState::Cancelled,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Launched => "launched",
            JobState::Streaming => "streaming",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic holder of a [`JobState`].
///
/// Forward transitions go through compare-and-swap, so when the relay task,
/// the timeout path and a dropped response race to end a job, exactly one
/// terminal transition wins and the others observe `false`.
#[derive(Debug)]
pub struct JobLifecycle {
    state: AtomicU8,
}

impl Default for JobLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl JobLifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(JobState::Idle as u8),
        }
    }

    pub fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// `Idle → Launched`
    pub fn launched(&self) -> bool {
        self.advance(JobState::Idle, JobState::Launched)
    }

    /// `Launched → Streaming`
    pub fn streaming(&self) -> bool {
        self.advance(JobState::Launched, JobState::Streaming)
    }

    pub fn complete(&self) -> bool {
        self.finish(JobState::Completed)
    }

    pub fn fail(&self) -> bool {
        self.finish(JobState::Failed)
    }

    pub fn cancel(&self) -> bool {
        self.finish(JobState::Cancelled)
    }

    fn advance(&self, from: JobState, to: JobState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Moves any non-terminal state to `terminal`. Returns `true` for the one
    /// caller whose transition took effect.
    fn finish(&self, terminal: JobState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if JobState::from_u8(current).is_terminal() {
                return false;
            }
            match self
                .state
                .compare_exchange(current, terminal as u8, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_happy_path() {
        let job = JobLifecycle::new();
        assert_eq!(job.state(), JobState::Idle);
        assert!(job.launched());
        assert!(job.streaming());
        assert!(job.complete());
        assert_eq!(job.state(), JobState::Completed);
    }

    #[test]
    fn test_out_of_order_transitions_rejected() {
        let job = JobLifecycle::new();
        assert!(!job.streaming());
        assert!(job.launched());
        assert!(!job.launched());
    }

    #[test]
    fn test_terminal_state_is_final() {
        let job = JobLifecycle::new();
        job.launched();
        assert!(job.fail());
        assert!(!job.cancel());
        assert!(!job.complete());
        assert!(!job.streaming());
        assert_eq!(job.state(), JobState::Failed);
    }

    #[test]
    fn test_cancel_before_launch() {
        let job = JobLifecycle::new();
        assert!(job.cancel());
        assert!(!job.launched());
        assert_eq!(job.state(), JobState::Cancelled);
    }

    #[test]
    fn test_concurrent_terminal_transitions_single_winner() {
        for _ in 0..50 {
            let job = Arc::new(JobLifecycle::new());
            job.launched();
            job.streaming();

            let handles: Vec<_> = (0..3)
                .map(|i| {
                    let job = job.clone();
                    std::thread::spawn(move || match i {
                        0 => job.complete(),
                        1 => job.fail(),
                        _ => job.cancel(),
                    })
                })
                .collect();

            let winners = handles.into_iter().map(|h| h.join().unwrap()).filter(|w| *w).count();
            assert_eq!(winners, 1);
            assert!(job.is_terminal());
        }
    }
}
