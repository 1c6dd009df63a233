//! Wall-clock execution budgets for embedded user code
//!
//! This crate supervises user code running inside a script engine. Every
//! guarded call pushes a frame on a per-group [`Schedule`]; a monitor thread
//! watches the deadlines of user frames and interrupts the engine once a
//! budget is exhausted. The [`Interceptor`] recognizes the interruption,
//! cancels it and lets the receiver's `onTerminateExecution` callback decide
//! whether the call resumes with a fallback value or termination proceeds.

mod context;
mod engine;
mod error;
mod frame;
mod guard;
mod interceptor;
mod limits;
mod monitor;
mod registry;
mod schedule;
mod termination;
mod timeline;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use context::{ContextId, UserContext};
pub use engine::{Engine, Realm, SafeForTermination};
pub use error::GovernorError;
pub use frame::{ApiFrame, Frame, FrameId, FrameStack, FrameTimes, UserFrame};
pub use guard::{ApiEntry, UserEntry};
pub use interceptor::{Call, CallState, Interceptor, Outcome};
pub use limits::{ExecutionLimits, MonitorConfig};
pub use registry::ScheduleRegistry;
pub use schedule::{ModificationLock, PreventTermination, Schedule};
pub use termination::{Budget, TerminationEvent, TerminationReason, Unwind};
pub use timeline::{Timeline, TimelineEntry};
