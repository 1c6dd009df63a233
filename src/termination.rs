use serde::{Deserialize, Serialize};

/// Budget kind a timeline deadline belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Budget {
    /// Wall-clock span since the frame was entered
    Entry,
    /// Time spent directly in user code
    User,
}

/// Reason why the monitor interrupted a running call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// A user entry exceeded its wall-clock budget
    EntryTimeLimit,

    /// A user entry exceeded its user-code budget
    UserTimeLimit,
}

impl TerminationReason {
    /// Returns true if this represents a resource limit violation
    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, Self::EntryTimeLimit | Self::UserTimeLimit)
    }

    pub fn budget(&self) -> Budget {
        match self {
            Self::EntryTimeLimit => Budget::Entry,
            Self::UserTimeLimit => Budget::User,
        }
    }

    /// Get a human-readable description
    pub fn description(&self) -> &str {
        match self {
            Self::EntryTimeLimit => "User code exceeded its entry time limit",
            Self::UserTimeLimit => "User code exceeded its user time limit",
        }
    }
}

impl From<Budget> for TerminationReason {
    fn from(budget: Budget) -> Self {
        match budget {
            Budget::Entry => Self::EntryTimeLimit,
            Budget::User => Self::UserTimeLimit,
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl std::error::Error for TerminationReason {}

/// Published by the monitor every time it interrupts the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationEvent {
    pub reason: TerminationReason,
    /// Stack depth of the overrun frame (0 = root)
    pub depth: usize,
}

/// How a guarded call unwound
///
/// This is the catch-scope classification: the engine's own terminated
/// execution is kept apart from ordinary exceptions so that re-raising
/// never turns one into the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unwind<X> {
    /// Execution was terminated by the engine
    Terminated,

    /// Script threw an exception
    Exception(X),
}

impl<X> Unwind<X> {
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    pub fn exception(self) -> Option<X> {
        match self {
            Self::Terminated => None,
            Self::Exception(x) => Some(x),
        }
    }

    pub fn map_exception<Y>(self, f: impl FnOnce(X) -> Y) -> Unwind<Y> {
        match self {
            Self::Terminated => Unwind::Terminated,
            Self::Exception(x) => Unwind::Exception(f(x)),
        }
    }
}

impl<X: std::fmt::Display> std::fmt::Display for Unwind<X> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Terminated => write!(f, "execution terminated"),
            Self::Exception(x) => write!(f, "{x}"),
        }
    }
}

impl<X: std::fmt::Debug + std::fmt::Display> std::error::Error for Unwind<X> {}
