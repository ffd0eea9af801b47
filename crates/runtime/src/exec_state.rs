//! Executor lifecycle states.

use std::fmt;

/// State of one executor. Negative values are transient, zero and above are
/// terminal; the process exits with the numeric code of the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum ExecState {
    Aborted = -3,
    Paused = -2,
    Running = -1,
    Success = 0,
    InvalidAssembly = 1,
    StackOverflow = 2,
    DivByZero = 3,
    AssertFailed = 4,
    Failed = 5,
    AllocFailed = 6,
}

impl ExecState {
    pub fn from_i8(val: i8) -> Option<ExecState> {
        Some(match val {
            -3 => ExecState::Aborted,
            -2 => ExecState::Paused,
            -1 => ExecState::Running,
            0 => ExecState::Success,
            1 => ExecState::InvalidAssembly,
            2 => ExecState::StackOverflow,
            3 => ExecState::DivByZero,
            4 => ExecState::AssertFailed,
            5 => ExecState::Failed,
            6 => ExecState::AllocFailed,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        self as i8 >= 0 || self == ExecState::Aborted
    }

    /// Process exit code for a terminal state.
    pub fn exit_code(self) -> i32 {
        match self {
            ExecState::Aborted => 7,
            _ => (self as i8).max(0) as i32,
        }
    }
}

impl fmt::Display for ExecState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecState::Aborted => "aborted",
            ExecState::Paused => "paused",
            ExecState::Running => "running",
            ExecState::Success => "success",
            ExecState::InvalidAssembly => "invalid-assembly",
            ExecState::StackOverflow => "stack-overflow",
            ExecState::DivByZero => "div-by-zero",
            ExecState::AssertFailed => "assert-failed",
            ExecState::Failed => "failed",
            ExecState::AllocFailed => "alloc-failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_codes_are_pinned() {
        assert_eq!(ExecState::Success as i8, 0);
        assert_eq!(ExecState::InvalidAssembly as i8, 1);
        assert_eq!(ExecState::StackOverflow as i8, 2);
        assert_eq!(ExecState::DivByZero as i8, 3);
        assert_eq!(ExecState::AssertFailed as i8, 4);
    }

    #[test]
    fn round_trips_through_i8() {
        for raw in -4..8i8 {
            if let Some(state) = ExecState::from_i8(raw) {
                assert_eq!(state as i8, raw);
            }
        }
    }

    #[test]
    fn transient_states_are_not_terminal() {
        assert!(!ExecState::Running.is_terminal());
        assert!(!ExecState::Paused.is_terminal());
        assert!(ExecState::Aborted.is_terminal());
        assert!(ExecState::DivByZero.is_terminal());
    }
}
