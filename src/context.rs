use crate::limits::ExecutionLimits;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a user execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "context#{}", self.0)
    }
}

/// A user execution context whose calls run under budgets
///
/// Budgets can be changed at any time; a call picks up the values in effect
/// when it is entered.
#[derive(Debug)]
pub struct UserContext {
    id: ContextId,
    limits: RwLock<ExecutionLimits>,
}

impl UserContext {
    pub fn new(limits: ExecutionLimits) -> Self {
        Self {
            id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
            limits: RwLock::new(limits),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn limits(&self) -> ExecutionLimits {
        self.limits.read().clone()
    }

    pub fn max_entry_time(&self) -> Option<Duration> {
        self.limits.read().max_entry_time()
    }

    pub fn set_max_entry_time(&self, value: Option<Duration>) {
        self.limits.write().set_max_entry_time(value);
    }

    pub fn max_user_time(&self) -> Option<Duration> {
        self.limits.read().max_user_time()
    }

    pub fn set_max_user_time(&self, value: Option<Duration>) {
        self.limits.write().set_max_user_time(value);
    }
}

impl Default for UserContext {
    fn default() -> Self {
        Self::new(ExecutionLimits::default())
    }
}
