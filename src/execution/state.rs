//! # Execution State
//!
//! Lifecycle of one execution:
//!
//! ```text
//! Created → Running → { Succeeded | FailedFallback | FailedNoFallback | Rejected | TimedOut }
//! ```
//!
//! Terminal states are mutually exclusive; [`ExecutionTracker`] enforces that exactly one
//! is reached with compare-and-swap transitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::error;

use super::ExecutionError;
use crate::models::ProxyResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Created = 0,
    Running = 1,
    /// The handler produced a successful result
    Succeeded = 2,
    /// The handler failed and the fallback produced the result
    FailedFallback = 3,
    /// The handler failed and no fallback result was available
    FailedNoFallback = 4,
    /// The bulkhead was saturated; see `fell_back` on the event for the fallback outcome
    Rejected = 5,
    /// The deadline expired; see `fell_back` on the event for the fallback outcome
    TimedOut = 6,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Created | Self::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl From<u8> for ExecutionState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Succeeded,
            3 => Self::FailedFallback,
            4 => Self::FailedNoFallback,
            5 => Self::Rejected,
            _ => Self::TimedOut,
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::FailedFallback => "failed_fallback",
            Self::FailedNoFallback => "failed_no_fallback",
            Self::Rejected => "rejected",
            Self::TimedOut => "timed_out",
        };
        f.write_str(name)
    }
}

impl FromStr for ExecutionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed_fallback" => Ok(Self::FailedFallback),
            "failed_no_fallback" => Ok(Self::FailedNoFallback),
            "rejected" => Ok(Self::Rejected),
            "timed_out" => Ok(Self::TimedOut),
            _ => Err(format!("Invalid execution state: {s}")),
        }
    }
}

/// Guards the `Created → Running → terminal` progression of one execution
#[derive(Debug)]
pub struct ExecutionTracker {
    state: AtomicU8,
}

impl Default for ExecutionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ExecutionState::Created as u8),
        }
    }

    pub fn state(&self) -> ExecutionState {
        ExecutionState::from(self.state.load(Ordering::Acquire))
    }

    /// `Created → Running`; false if the execution was already dispatched
    pub fn start(&self) -> bool {
        self.transition(ExecutionState::Created, ExecutionState::Running)
    }

    /// `Running → terminal`; false if a terminal state was already recorded
    pub fn finish(&self, terminal: ExecutionState) -> bool {
        if !terminal.is_terminal() {
            error!(state = %terminal, "Attempted to finish an execution with a non-terminal state");
            return false;
        }
        self.transition(ExecutionState::Running, terminal)
    }

    fn transition(&self, from: ExecutionState, to: ExecutionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Terminal record of an execution, shared through the request cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedExecution {
    pub state: ExecutionState,
    /// The returned result came from the handler's fallback
    pub fell_back: bool,
    /// A fallback was attempted and failed; the original error was returned
    pub fallback_failed: bool,
    pub result: Result<ProxyResult, ExecutionError>,
}

impl CompletedExecution {
    pub fn succeeded(result: ProxyResult) -> Self {
        Self {
            state: ExecutionState::Succeeded,
            fell_back: false,
            fallback_failed: false,
            result: Ok(result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!ExecutionState::Created.is_terminal());
        assert!(!ExecutionState::Running.is_terminal());
        for state in [
            ExecutionState::Succeeded,
            ExecutionState::FailedFallback,
            ExecutionState::FailedNoFallback,
            ExecutionState::Rejected,
            ExecutionState::TimedOut,
        ] {
            assert!(state.is_terminal());
            assert_eq!(state.to_string().parse::<ExecutionState>().unwrap(), state);
            assert_eq!(ExecutionState::from(state as u8), state);
        }
    }

    #[test]
    fn test_terminal_reached_once() {
        let tracker = ExecutionTracker::new();
        assert!(!tracker.finish(ExecutionState::Succeeded));

        assert!(tracker.start());
        assert!(!tracker.start());

        assert!(tracker.finish(ExecutionState::TimedOut));
        assert!(!tracker.finish(ExecutionState::Succeeded));
        assert_eq!(tracker.state(), ExecutionState::TimedOut);
    }

    #[test]
    fn test_non_terminal_finish_refused() {
        let tracker = ExecutionTracker::new();
        tracker.start();
        assert!(!tracker.finish(ExecutionState::Running));
        assert_eq!(tracker.state(), ExecutionState::Running);
    }
}
