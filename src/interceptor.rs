use crate::context::UserContext;
use crate::engine::{Realm, SafeForTermination};
use crate::guard::{ApiEntry, UserEntry};
use crate::schedule::{ModificationLock, Schedule};
use crate::termination::Unwind;

/// A guarded invocation: what was called, on what, with what
#[derive(Debug, Clone)]
pub struct Call<V> {
    pub callee: V,
    pub this: V,
    pub arguments: Vec<V>,
    pub new_target: Option<V>,
}

impl<V> Call<V> {
    pub fn new(callee: V, this: V, arguments: Vec<V>) -> Self {
        Self {
            callee,
            this,
            arguments,
            new_target: None,
        }
    }

    pub fn with_new_target(mut self, new_target: V) -> Self {
        self.new_target = Some(new_target);
        self
    }
}

/// How a guarded call was resolved
///
/// ```text
/// guarded call ──► Returned
///      │        ├─► Threw                      (ordinary exception, passed through)
///      │        └─► ExternallyTerminated       (termination the monitor did not issue)
///      ▼
/// interrupted ──► Unhandled                    (no usable onTerminateExecution)
///               ├► CallbackResumed             (callback value becomes the result)
///               ├► CallbackPropagates          (callback threw or was terminated)
///               └► CallbackRequestsTermination (callback returned the sentinel)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Returned,
    Threw,
    ExternallyTerminated,
    Unhandled,
    CallbackResumed,
    CallbackPropagates,
    CallbackRequestsTermination,
}

impl CallState {
    /// Returns true if the governor interrupted this call
    pub fn was_interrupted(&self) -> bool {
        matches!(
            self,
            Self::Unhandled
                | Self::CallbackResumed
                | Self::CallbackPropagates
                | Self::CallbackRequestsTermination
        )
    }
}

#[derive(Debug)]
pub struct Outcome<V, X> {
    pub state: CallState,
    pub result: Result<V, Unwind<X>>,
}

impl<V, X> Outcome<V, X> {
    fn new(state: CallState, result: Result<V, Unwind<X>>) -> Self {
        Self { state, result }
    }

    pub fn into_result(self) -> Result<V, Unwind<X>> {
        self.result
    }
}

enum Guarded<'a, V, X> {
    Returned(V),
    Threw(X),
    Foreign,
    Interrupted(ModificationLock<'a>),
}

/// Call-site integration for one schedule and realm
///
/// Once an interruption is observed the modification lock is held until the
/// call is resolved, so the monitor cannot interrupt the callback.
pub struct Interceptor<'a, R: Realm> {
    schedule: &'a Schedule,
    realm: &'a R,
}

impl<'a, R: Realm> Interceptor<'a, R> {
    pub fn new(schedule: &'a Schedule, realm: &'a R) -> Self {
        Self { schedule, realm }
    }

    /// Call a user function under `context`'s budgets
    pub fn apply(
        &self,
        context: &UserContext,
        receiver: &R::Value,
        call: &Call<R::Value>,
    ) -> Outcome<R::Value, R::Exception> {
        let guarded = self.guarded(
            || UserEntry::enter(self.schedule, context),
            || self.realm.call(&call.callee, &call.this, &call.arguments),
        );
        self.resolve(receiver, call, guarded)
    }

    /// Construct a user function under `context`'s budgets
    pub fn construct(
        &self,
        context: &UserContext,
        receiver: &R::Value,
        call: &Call<R::Value>,
    ) -> Outcome<R::Value, R::Exception> {
        let guarded = self.guarded(
            || UserEntry::enter(self.schedule, context),
            || {
                self.realm
                    .construct(&call.callee, &call.arguments, call.new_target.as_ref())
            },
        );
        self.resolve(receiver, call, guarded)
    }

    /// Call a host function on behalf of user code
    ///
    /// Time spent here does not count against the user budgets of the
    /// calling frames. With no guarded call in progress there is nothing to
    /// account for and the callee runs unguarded.
    pub fn invoke(
        &self,
        receiver: &R::Value,
        call: &Call<R::Value>,
    ) -> Outcome<R::Value, R::Exception> {
        if self.schedule.is_idle() {
            return match self.realm.call(&call.callee, receiver, &call.arguments) {
                Ok(value) => Outcome::new(CallState::Returned, Ok(value)),
                Err(Unwind::Exception(x)) => {
                    Outcome::new(CallState::Threw, Err(Unwind::Exception(x)))
                }
                Err(Unwind::Terminated) => {
                    Outcome::new(CallState::ExternallyTerminated, Err(Unwind::Terminated))
                }
            };
        }
        let guarded = self.guarded(
            || ApiEntry::enter(self.schedule),
            || self.realm.call(&call.callee, receiver, &call.arguments),
        );
        self.resolve(receiver, call, guarded)
    }

    fn guarded<G>(
        &self,
        enter: impl FnOnce() -> G,
        run: impl FnOnce() -> Result<R::Value, Unwind<R::Exception>>,
    ) -> Guarded<'a, R::Value, R::Exception> {
        let _safe = SafeForTermination::new(self.schedule.engine());
        let _entry = enter();
        match run() {
            Ok(value) => Guarded::Returned(value),
            Err(Unwind::Exception(x)) => Guarded::Threw(x),
            Err(Unwind::Terminated) => {
                // Taken before the frame pops, which may clear the flag.
                let lock = self.schedule.lock();
                if !self.schedule.has_terminated() {
                    return Guarded::Foreign;
                }
                self.schedule.acknowledge_interruption();
                Guarded::Interrupted(lock)
            }
        }
    }

    fn resolve(
        &self,
        receiver: &R::Value,
        call: &Call<R::Value>,
        guarded: Guarded<'a, R::Value, R::Exception>,
    ) -> Outcome<R::Value, R::Exception> {
        match guarded {
            Guarded::Returned(value) => Outcome::new(CallState::Returned, Ok(value)),
            Guarded::Threw(x) => Outcome::new(CallState::Threw, Err(Unwind::Exception(x))),
            Guarded::Foreign => {
                Outcome::new(CallState::ExternallyTerminated, Err(Unwind::Terminated))
            }
            Guarded::Interrupted(lock) => {
                let outcome = self.on_terminate(receiver, call);
                tracing::debug!(state = ?outcome.state, "interrupted call resolved");
                drop(lock);
                outcome
            }
        }
    }

    fn on_terminate(
        &self,
        receiver: &R::Value,
        call: &Call<R::Value>,
    ) -> Outcome<R::Value, R::Exception> {
        let engine = self.schedule.engine();
        let Some(callback) = self.realm.termination_callback(receiver) else {
            tracing::warn!("no onTerminateExecution callback, terminating");
            engine.terminate_execution();
            return Outcome::new(CallState::Unhandled, Err(Unwind::Terminated));
        };

        let args = [
            call.callee.clone(),
            call.this.clone(),
            self.realm.array(&call.arguments),
            call.new_target
                .clone()
                .unwrap_or_else(|| self.realm.undefined()),
        ];
        match self.realm.call(&callback, receiver, &args) {
            Ok(value) if self.realm.is_unhandled_termination(&value) => {
                engine.terminate_execution();
                Outcome::new(CallState::CallbackRequestsTermination, Err(Unwind::Terminated))
            }
            Ok(value) => {
                self.schedule.clear_terminated();
                Outcome::new(CallState::CallbackResumed, Ok(value))
            }
            Err(Unwind::Exception(x)) => {
                self.schedule.clear_terminated();
                Outcome::new(CallState::CallbackPropagates, Err(Unwind::Exception(x)))
            }
            Err(Unwind::Terminated) => {
                Outcome::new(CallState::CallbackPropagates, Err(Unwind::Terminated))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{ExecutionLimits, MonitorConfig};
    use crate::testing::{FakeEngine, TestRealm, TestValue};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::time::Duration;

    const SPIN: Duration = Duration::from_secs(10);

    struct Fixture {
        engine: Arc<FakeEngine>,
        schedule: Arc<Schedule>,
        realm: TestRealm,
        receiver: TestValue,
    }

    impl Fixture {
        fn new() -> Self {
            let engine = Arc::new(FakeEngine::new());
            let schedule =
                Schedule::spawn(engine.clone(), MonitorConfig::default()).expect("spawn monitor");
            Self {
                engine,
                schedule,
                realm: TestRealm,
                receiver: TestValue::object(),
            }
        }

        fn interceptor(&self) -> Interceptor<'_, TestRealm> {
            Interceptor::new(&self.schedule, &self.realm)
        }

        /// A callee that spins until the engine terminates it
        fn spinning(&self) -> TestValue {
            let engine = self.engine.clone();
            TestValue::function(move |_, _| {
                engine.run_until_terminated::<String>(SPIN)?;
                Ok(TestValue::Str("finished".into()))
            })
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.schedule.shutdown();
        }
    }

    fn entry_limited(ms: u64) -> UserContext {
        UserContext::new(ExecutionLimits::new(Some(Duration::from_millis(ms)), None))
    }

    #[test]
    fn returns_normally_within_budget() {
        let fx = Fixture::new();
        let context = entry_limited(5_000);
        let callee = TestValue::function(|_, args| Ok(args[0].clone()));
        let call = Call::new(callee, TestValue::Undefined, vec![TestValue::Int(42)]);

        let outcome = fx.interceptor().apply(&context, &fx.receiver, &call);
        assert_eq!(outcome.state, CallState::Returned);
        assert_eq!(outcome.result, Ok(TestValue::Int(42)));
        assert_eq!(fx.engine.terminate_count(), 0);
        assert_eq!(fx.engine.safe_depth(), 0);
        assert!(fx.schedule.is_idle());
    }

    #[test]
    fn ordinary_exceptions_pass_through() {
        let fx = Fixture::new();
        let context = entry_limited(5_000);
        let callee = TestValue::function(|_, _| Err(Unwind::Exception("TypeError".to_string())));
        let call = Call::new(callee, TestValue::Undefined, vec![]);

        let outcome = fx.interceptor().apply(&context, &fx.receiver, &call);
        assert_eq!(outcome.state, CallState::Threw);
        assert_eq!(outcome.result, Err(Unwind::Exception("TypeError".to_string())));
        assert_eq!(fx.engine.cancel_count(), 0);
    }

    #[test]
    fn interruption_without_callback_keeps_terminating() {
        let fx = Fixture::new();
        let context = entry_limited(20);
        let call = Call::new(fx.spinning(), TestValue::Undefined, vec![]);

        let outcome = fx.interceptor().apply(&context, &fx.receiver, &call);
        assert_eq!(outcome.state, CallState::Unhandled);
        assert_eq!(outcome.result, Err(Unwind::Terminated));
        assert_eq!(fx.engine.cancel_count(), 1);
        assert_eq!(fx.engine.terminate_count(), 2);
        assert!(fx.engine.is_terminating());
    }

    #[test]
    fn callback_value_resumes_the_call() {
        let fx = Fixture::new();
        let context = entry_limited(20);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let record = seen.clone();
        fx.receiver.set(
            "onTerminateExecution",
            TestValue::function(move |_, args| {
                record.borrow_mut().extend(args.iter().cloned());
                Ok(TestValue::Str("fallback".into()))
            }),
        );
        let callee = fx.spinning();
        let call = Call::new(callee.clone(), TestValue::Int(1), vec![TestValue::Int(2)]);

        let outcome = fx.interceptor().apply(&context, &fx.receiver, &call);
        assert_eq!(outcome.state, CallState::CallbackResumed);
        assert_eq!(outcome.result, Ok(TestValue::Str("fallback".into())));
        assert!(!fx.engine.is_terminating());
        assert!(!fx.schedule.has_terminated());
        assert_eq!(
            *seen.borrow(),
            vec![
                callee,
                TestValue::Int(1),
                TestValue::Array(vec![TestValue::Int(2)]),
                TestValue::Undefined,
            ]
        );

        // a later call under the same schedule is not pre-interrupted
        let seven = TestValue::function(|_, _| Ok(TestValue::Int(7)));
        let quick = Call::new(seven, TestValue::Undefined, vec![]);
        let outcome = fx.interceptor().apply(&context, &fx.receiver, &quick);
        assert_eq!(outcome.result, Ok(TestValue::Int(7)));
    }

    #[test]
    fn sentinel_continues_termination() {
        let fx = Fixture::new();
        let context = entry_limited(20);
        fx.receiver.set(
            "onTerminateExecution",
            TestValue::function(|_, _| Ok(TestValue::UnhandledTermination)),
        );
        let call = Call::new(fx.spinning(), TestValue::Undefined, vec![]);

        let outcome = fx.interceptor().apply(&context, &fx.receiver, &call);
        assert_eq!(outcome.state, CallState::CallbackRequestsTermination);
        assert_eq!(outcome.result, Err(Unwind::Terminated));
        assert!(fx.engine.is_terminating());
    }

    #[test]
    fn callback_exception_propagates() {
        let fx = Fixture::new();
        let context = entry_limited(20);
        fx.receiver.set(
            "onTerminateExecution",
            TestValue::function(|_, _| Err(Unwind::Exception("RangeError".to_string()))),
        );
        let call = Call::new(fx.spinning(), TestValue::Undefined, vec![]);

        let outcome = fx.interceptor().apply(&context, &fx.receiver, &call);
        assert_eq!(outcome.state, CallState::CallbackPropagates);
        assert_eq!(outcome.result, Err(Unwind::Exception("RangeError".to_string())));
        assert!(!fx.schedule.has_terminated());
    }

    #[test]
    fn construct_passes_new_target_to_callback() {
        let fx = Fixture::new();
        let context = entry_limited(20);
        let new_target = TestValue::function(|_, _| Ok(TestValue::Undefined));
        let received = Rc::new(RefCell::new(None));
        let record = received.clone();
        fx.receiver.set(
            "onTerminateExecution",
            TestValue::function(move |_, args| {
                *record.borrow_mut() = args.get(3).cloned();
                Ok(TestValue::object())
            }),
        );
        let call = Call::new(fx.spinning(), TestValue::Undefined, vec![])
            .with_new_target(new_target.clone());

        let outcome = fx.interceptor().construct(&context, &fx.receiver, &call);
        assert_eq!(outcome.state, CallState::CallbackResumed);
        assert_eq!(*received.borrow(), Some(new_target));
    }

    #[test]
    fn construct_without_budget_returns_instance() {
        let fx = Fixture::new();
        let context = UserContext::default();
        let callee = TestValue::function(|this, _| Ok(this.clone()));
        let target = TestValue::Int(9);
        let call = Call::new(callee, TestValue::Undefined, vec![]).with_new_target(target.clone());

        let outcome = fx.interceptor().construct(&context, &fx.receiver, &call);
        assert_eq!(outcome.result, Ok(target));
    }

    #[test]
    fn foreign_termination_is_left_alone() {
        let fx = Fixture::new();
        let context = UserContext::default();
        let callee = TestValue::function(|_, _| Err(Unwind::Terminated));
        fx.receiver.set(
            "onTerminateExecution",
            TestValue::function(|_, _| Ok(TestValue::Int(0))),
        );
        let call = Call::new(callee, TestValue::Undefined, vec![]);

        let outcome = fx.interceptor().apply(&context, &fx.receiver, &call);
        assert_eq!(outcome.state, CallState::ExternallyTerminated);
        assert_eq!(fx.engine.cancel_count(), 0);
    }

    #[test]
    fn terminated_callback_keeps_flag_for_outer_frames() {
        let fx = Fixture::new();
        let seen = Rc::new(RefCell::new(None));
        let record = seen.clone();
        let schedule = fx.schedule.clone();
        let spinning = fx.spinning();
        // user -> user; the inner call's callback is itself terminated
        let callee = TestValue::function(move |_, _| {
            let receiver = TestValue::object();
            receiver.set(
                "onTerminateExecution",
                TestValue::function(|_, _| Err(Unwind::Terminated)),
            );
            let call = Call::new(spinning.clone(), TestValue::Undefined, vec![]);
            let outcome =
                Interceptor::new(&schedule, &TestRealm).apply(&entry_limited(20), &receiver, &call);
            *record.borrow_mut() = Some((outcome.state, outcome.result, schedule.has_terminated()));
            Ok(TestValue::Int(0))
        });
        let call = Call::new(callee, TestValue::Undefined, vec![]);

        let outcome = fx.interceptor().apply(&UserContext::default(), &fx.receiver, &call);
        assert_eq!(outcome.state, CallState::Returned);
        assert_eq!(
            seen.borrow_mut().take(),
            Some((CallState::CallbackPropagates, Err(Unwind::Terminated), true))
        );
        assert_eq!(fx.engine.terminate_count(), 1);
        assert_eq!(fx.engine.cancel_count(), 1);
        // cleared once the stack emptied
        assert!(!fx.schedule.has_terminated());
    }

    #[test]
    fn invoke_handles_interruption_of_nested_user_call() {
        let fx = Fixture::new();
        let schedule = fx.schedule.clone();
        let spinning = fx.spinning();
        // host function calling back into user code that has no callback
        let host_fn = TestValue::function(move |_, _| {
            let call = Call::new(spinning.clone(), TestValue::Undefined, vec![]);
            Interceptor::new(&schedule, &TestRealm)
                .apply(&entry_limited(20), &TestValue::object(), &call)
                .into_result()
        });
        let host_receiver = TestValue::object();
        host_receiver.set(
            "onTerminateExecution",
            TestValue::function(|_, _| Ok(TestValue::Str("host fallback".into()))),
        );
        let invoke_schedule = fx.schedule.clone();
        let callee = TestValue::function(move |_, _| {
            let call = Call::new(host_fn.clone(), TestValue::Undefined, vec![]);
            let outcome =
                Interceptor::new(&invoke_schedule, &TestRealm).invoke(&host_receiver, &call);
            assert_eq!(outcome.state, CallState::CallbackResumed);
            outcome.into_result()
        });
        let call = Call::new(callee, TestValue::Undefined, vec![]);

        let outcome = fx.interceptor().apply(&UserContext::default(), &fx.receiver, &call);
        assert_eq!(outcome.state, CallState::Returned);
        assert_eq!(outcome.result, Ok(TestValue::Str("host fallback".into())));
        assert!(!fx.schedule.has_terminated());
        assert!(!fx.engine.is_terminating());
        // monitor + unhandled re-issue, each taken back by a guarded frame
        assert_eq!(fx.engine.terminate_count(), 2);
        assert_eq!(fx.engine.cancel_count(), 2);
    }

    #[test]
    fn invoke_runs_unguarded_when_idle() {
        let fx = Fixture::new();
        let callee = TestValue::function(|this, _| Ok(this.clone()));
        let call = Call::new(callee, TestValue::Undefined, vec![]);

        let outcome = fx.interceptor().invoke(&TestValue::Int(3), &call);
        assert_eq!(outcome.state, CallState::Returned);
        assert_eq!(outcome.result, Ok(TestValue::Int(3)));
        assert_eq!(fx.engine.safe_depth(), 0);
    }
}
