//! Test doubles for embedding the governor
//!
//! [`FakeEngine`] records interruption requests and exposes a pending
//! termination flag that simulated script polls at its "safe points".
//! [`TestRealm`] is a tiny value world with closures as functions and
//! string-keyed objects as receivers.
//!
//! ```ignore
//! use openworkers_timeguard::testing::{FakeEngine, TestRealm, TestValue};
//!
//! let engine = std::sync::Arc::new(FakeEngine::new());
//! let callee = TestValue::function(move |_, _| {
//!     engine.run_until_terminated::<String>(std::time::Duration::from_secs(5))?;
//!     Ok(TestValue::Int(1))
//! });
//! ```

use crate::engine::{Engine, Realm};
use crate::termination::Unwind;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Engine stand-in recording interruption requests
#[derive(Debug, Default)]
pub struct FakeEngine {
    pending: AtomicBool,
    terminations: AtomicUsize,
    cancellations: AtomicUsize,
    safe_depth: AtomicIsize,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `terminate_execution` calls so far
    pub fn terminate_count(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    /// Number of `cancel_terminate_execution` calls so far
    pub fn cancel_count(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }

    /// Returns true if a termination is pending
    pub fn is_terminating(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Current nesting of safe-for-termination scopes
    pub fn safe_depth(&self) -> isize {
        self.safe_depth.load(Ordering::SeqCst)
    }

    /// A safe point: unwinds if a termination is pending
    pub fn checkpoint<X>(&self) -> Result<(), Unwind<X>> {
        if self.is_terminating() {
            Err(Unwind::Terminated)
        } else {
            Ok(())
        }
    }

    /// Busy-loop for up to `max`, unwinding as soon as a termination is
    /// delivered
    pub fn run_until_terminated<X>(&self, max: Duration) -> Result<(), Unwind<X>> {
        let started = Instant::now();
        while started.elapsed() < max {
            self.checkpoint()?;
            std::hint::spin_loop();
        }
        Ok(())
    }
}

impl Engine for FakeEngine {
    fn terminate_execution(&self) {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        self.pending.store(true, Ordering::SeqCst);
    }

    fn cancel_terminate_execution(&self) {
        self.cancellations.fetch_add(1, Ordering::SeqCst);
        self.pending.store(false, Ordering::SeqCst);
    }

    fn enter_safe_for_termination(&self) {
        self.safe_depth.fetch_add(1, Ordering::SeqCst);
    }

    fn exit_safe_for_termination(&self) {
        self.safe_depth.fetch_sub(1, Ordering::SeqCst);
    }
}

type NativeFn = dyn Fn(&TestValue, &[TestValue]) -> Result<TestValue, Unwind<String>>;

/// Value of the [`TestRealm`]
#[derive(Clone)]
pub enum TestValue {
    Undefined,
    Int(i64),
    Str(String),
    Array(Vec<TestValue>),
    Function(Rc<NativeFn>),
    Object(Rc<RefCell<HashMap<String, TestValue>>>),
    /// The sentinel a termination callback returns to keep terminating
    UnhandledTermination,
}

impl TestValue {
    pub fn function(
        f: impl Fn(&TestValue, &[TestValue]) -> Result<TestValue, Unwind<String>> + 'static,
    ) -> Self {
        Self::Function(Rc::new(f))
    }

    pub fn object() -> Self {
        Self::Object(Rc::new(RefCell::new(HashMap::new())))
    }

    /// Set a property; no-op on non-objects
    pub fn set(&self, key: &str, value: TestValue) {
        if let Self::Object(props) = self {
            props.borrow_mut().insert(key.to_string(), value);
        }
    }

    pub fn get(&self, key: &str) -> Option<TestValue> {
        match self {
            Self::Object(props) => props.borrow().get(key).cloned(),
            _ => None,
        }
    }
}

impl PartialEq for TestValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) => true,
            (Self::UnhandledTermination, Self::UnhandledTermination) => true,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for TestValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Array(items) => f.debug_list().entries(items).finish(),
            Self::Function(_) => write!(f, "[function]"),
            Self::Object(_) => write!(f, "[object]"),
            Self::UnhandledTermination => write!(f, "[unhandled termination]"),
        }
    }
}

/// Realm over [`TestValue`]s
#[derive(Debug, Default)]
pub struct TestRealm;

impl Realm for TestRealm {
    type Value = TestValue;
    type Exception = String;

    fn call(
        &self,
        function: &TestValue,
        this: &TestValue,
        args: &[TestValue],
    ) -> Result<TestValue, Unwind<String>> {
        match function {
            TestValue::Function(f) => f(this, args),
            other => Err(Unwind::Exception(format!("{other:?} is not a function"))),
        }
    }

    fn construct(
        &self,
        function: &TestValue,
        args: &[TestValue],
        new_target: Option<&TestValue>,
    ) -> Result<TestValue, Unwind<String>> {
        let this = new_target.cloned().unwrap_or(TestValue::Undefined);
        self.call(function, &this, args)
    }

    fn termination_callback(&self, receiver: &TestValue) -> Option<TestValue> {
        receiver
            .get("onTerminateExecution")
            .filter(|value| matches!(value, TestValue::Function(_)))
    }

    fn is_unhandled_termination(&self, value: &TestValue) -> bool {
        matches!(value, TestValue::UnhandledTermination)
    }

    fn array(&self, items: &[TestValue]) -> TestValue {
        TestValue::Array(items.to_vec())
    }

    fn undefined(&self) -> TestValue {
        TestValue::Undefined
    }
}
