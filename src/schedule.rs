use crate::engine::Engine;
use crate::error::GovernorError;
use crate::frame::{self, Frame, FrameId, FrameStack};
use crate::limits::MonitorConfig;
use crate::monitor;
use crate::termination::{TerminationEvent, TerminationReason};
use crate::timeline::Timeline;
use parking_lot::{Condvar, Mutex, ReentrantMutex, ReentrantMutexGuard};
use std::cell::{RefCell, RefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 16;

/// Mutable governor state, guarded by the schedule's modification lock
#[derive(Debug, Default)]
pub(crate) struct ScheduleState {
    pub(crate) stack: FrameStack,
    pub(crate) timeline: Timeline,
    /// Set between an interruption being issued and the stack emptying or
    /// a termination callback resuming
    pub(crate) has_terminated: bool,
    /// An interruption was issued and no guarded call has observed it yet
    pub(crate) interrupt_pending: bool,
    /// Interruption is vetoed while positive
    pub(crate) prevent_termination: usize,
    pub(crate) last_termination: Option<TerminationReason>,
}

/// Held modification lock
///
/// While held by the thread running script, the monitor cannot issue a new
/// interruption. The lock is re-entrant, so guarded calls made while it is
/// held still push and pop their frames.
pub struct ModificationLock<'a> {
    _guard: ReentrantMutexGuard<'a, RefCell<ScheduleState>>,
}

/// Governor state for one execution-context group
///
/// Frames, timeline and flags sit behind one re-entrant lock, which the
/// script thread never holds while a guarded callee runs. The monitor sleeps
/// on a separate mutex/condvar pair keyed by a wake generation.
pub struct Schedule {
    engine: Arc<dyn Engine>,
    config: MonitorConfig,
    state: ReentrantMutex<RefCell<ScheduleState>>,
    wake: Mutex<u64>,
    notifier: Condvar,
    disposed: AtomicBool,
    events: broadcast::Sender<TerminationEvent>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Schedule {
    /// Create a schedule and start its monitor thread
    pub fn spawn(
        engine: Arc<dyn Engine>,
        config: MonitorConfig,
    ) -> Result<Arc<Self>, GovernorError> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let schedule = Arc::new(Self {
            engine,
            config,
            state: ReentrantMutex::new(RefCell::new(ScheduleState::default())),
            wake: Mutex::new(0),
            notifier: Condvar::new(),
            disposed: AtomicBool::new(false),
            events,
            monitor: Mutex::new(None),
        });

        let observed = Arc::clone(&schedule);
        let handle = std::thread::Builder::new()
            .name(schedule.config.thread_name.clone())
            .spawn(move || monitor::run(observed))?;
        *schedule.monitor.lock() = Some(handle);

        tracing::debug!(thread = %schedule.config.thread_name, "schedule created");
        Ok(schedule)
    }

    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Acquire the modification lock
    pub fn lock(&self) -> ModificationLock<'_> {
        ModificationLock {
            _guard: self.state.lock(),
        }
    }

    /// Run `f` on the state under the modification lock.
    ///
    /// `f` must not call back into the schedule.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut ScheduleState) -> R) -> R {
        let guard = self.state.lock();
        let mut state: RefMut<'_, ScheduleState> = guard.borrow_mut();
        f(&mut state)
    }

    pub(crate) fn push_frame(&self, frame: Frame) -> FrameId {
        let (id, changed) =
            self.with_state(|state| frame::push(&mut state.stack, &mut state.timeline, frame));
        if changed {
            self.notify();
        }
        id
    }

    pub(crate) fn pop_frame(&self, id: FrameId) {
        let now = Instant::now();
        let outcome = self.with_state(|state| {
            let changed = frame::pop(&mut state.stack, &mut state.timeline, id, now)?;
            let mut stale = false;
            if state.stack.is_empty() {
                state.has_terminated = false;
                stale = std::mem::take(&mut state.interrupt_pending);
                debug_assert!(state.timeline.is_empty());
            }
            Some((changed, stale))
        });
        match outcome {
            Some((changed, stale)) => {
                if stale {
                    tracing::debug!("call returned before its interruption landed, cancelling");
                    self.engine.cancel_terminate_execution();
                }
                if changed {
                    self.notify();
                }
            }
            None => tracing::error!(depth = id.depth(), "frame left out of order"),
        }
    }

    /// Wake the monitor thread
    pub fn notify(&self) {
        let mut generation = self.wake.lock();
        *generation = generation.wrapping_add(1);
        self.notifier.notify_all();
    }

    pub(crate) fn wake_generation(&self) -> u64 {
        *self.wake.lock()
    }

    /// Block until notified after `seen`, until `deadline`, or until disposed
    pub(crate) fn wait(&self, seen: u64, deadline: Option<Instant>) {
        let mut generation = self.wake.lock();
        while *generation == seen && !self.is_disposed() {
            match deadline {
                Some(deadline) => {
                    if self.notifier.wait_until(&mut generation, deadline).timed_out() {
                        break;
                    }
                }
                None => self.notifier.wait(&mut generation),
            }
        }
    }

    pub(crate) fn publish(&self, event: TerminationEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Subscribe to interruptions issued by the monitor
    pub fn subscribe(&self) -> broadcast::Receiver<TerminationEvent> {
        self.events.subscribe()
    }

    /// Veto new interruptions until the returned scope is dropped
    pub fn prevent_termination(&self) -> PreventTermination<'_> {
        self.with_state(|state| state.prevent_termination += 1);
        PreventTermination { schedule: self }
    }

    pub fn prevention_count(&self) -> usize {
        self.with_state(|state| state.prevent_termination)
    }

    pub fn has_terminated(&self) -> bool {
        self.with_state(|state| state.has_terminated)
    }

    /// Take ownership of an issued interruption and cancel it in the engine
    pub(crate) fn acknowledge_interruption(&self) {
        self.with_state(|state| state.interrupt_pending = false);
        self.engine.cancel_terminate_execution();
    }

    /// Resume normal execution after a handled interruption
    pub(crate) fn clear_terminated(&self) {
        self.with_state(|state| state.has_terminated = false);
        self.notify();
    }

    /// Reason of the most recent interruption issued by the monitor
    pub fn last_termination(&self) -> Option<TerminationReason> {
        self.with_state(|state| state.last_termination.clone())
    }

    /// Number of live frames
    pub fn depth(&self) -> usize {
        self.with_state(|state| state.stack.len())
    }

    pub fn is_idle(&self) -> bool {
        self.with_state(|state| state.stack.is_empty())
    }

    /// Number of deadlines currently registered
    pub fn timeline_len(&self) -> usize {
        self.with_state(|state| state.timeline.len())
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Stop the monitor thread and wait for it to exit
    pub fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.notify();
        let handle = self.monitor.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                tracing::error!("monitor thread panicked");
            }
        }
        tracing::debug!(thread = %self.config.thread_name, "schedule disposed");
    }
}

impl std::fmt::Debug for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schedule")
            .field("config", &self.config)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

/// Scope during which the monitor does not issue interruptions
///
/// Interruptions already issued are not affected.
#[must_use = "termination is allowed again as soon as the scope is dropped"]
pub struct PreventTermination<'a> {
    schedule: &'a Schedule,
}

impl Drop for PreventTermination<'_> {
    fn drop(&mut self) {
        let released = self.schedule.with_state(|state| {
            state.prevent_termination = state.prevent_termination.saturating_sub(1);
            state.prevent_termination == 0
        });
        if released {
            self.schedule.notify();
        }
    }
}
