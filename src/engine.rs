use crate::termination::Unwind;

/// Interruption primitives of the embedded script engine
///
/// One engine handle is shared between the thread running script and the
/// schedule's monitor thread, so implementations must be thread-safe. Only
/// `terminate_execution` is ever called from the monitor thread.
pub trait Engine: Send + Sync + 'static {
    /// Force the running call to unwind with a terminated-execution signal
    /// at the next safe point
    fn terminate_execution(&self);

    /// Cancel a pending or just-delivered termination so script can run again
    fn cancel_terminate_execution(&self);

    /// Mark the start of a span during which termination may be delivered
    fn enter_safe_for_termination(&self) {}

    /// Mark the end of a span started by `enter_safe_for_termination`
    fn exit_safe_for_termination(&self) {}
}

/// Scope during which termination is safe to deliver
pub struct SafeForTermination<'a> {
    engine: &'a dyn Engine,
}

impl<'a> SafeForTermination<'a> {
    pub fn new(engine: &'a dyn Engine) -> Self {
        engine.enter_safe_for_termination();
        Self { engine }
    }
}

impl Drop for SafeForTermination<'_> {
    fn drop(&mut self) {
        self.engine.exit_safe_for_termination();
    }
}

/// Value-level entry points of the engine
///
/// Used on the thread running script only. Every call reports how it
/// unwound through [`Unwind`], which plays the role of the engine's catch
/// scope.
pub trait Realm {
    type Value: Clone;
    type Exception;

    /// Call `function` with the given receiver and arguments
    fn call(
        &self,
        function: &Self::Value,
        this: &Self::Value,
        args: &[Self::Value],
    ) -> Result<Self::Value, Unwind<Self::Exception>>;

    /// Construct `function`, using `new_target` when given
    fn construct(
        &self,
        function: &Self::Value,
        args: &[Self::Value],
        new_target: Option<&Self::Value>,
    ) -> Result<Self::Value, Unwind<Self::Exception>>;

    /// Look up the `onTerminateExecution` callback on `receiver`
    ///
    /// Returns `None` if the property is absent, cannot be read, or is not
    /// callable.
    fn termination_callback(&self, receiver: &Self::Value) -> Option<Self::Value>;

    /// Returns true if `value` is the sentinel a termination callback
    /// returns to let termination proceed
    fn is_unhandled_termination(&self, value: &Self::Value) -> bool;

    fn array(&self, items: &[Self::Value]) -> Self::Value;

    fn undefined(&self) -> Self::Value;
}
