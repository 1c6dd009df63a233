use crate::schedule::Schedule;
use crate::termination::{TerminationEvent, TerminationReason};
use std::sync::Arc;
use std::time::Instant;

/// Decision taken by one scan of the timeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Scan {
    /// Interruption issued by this scan, with the depth of the overrun frame
    pub interrupted: Option<(TerminationReason, usize)>,
    /// When to look again, `None` to wait for a notification
    pub wake_at: Option<Instant>,
}

pub(crate) fn run(schedule: Arc<Schedule>) {
    tracing::debug!("monitor started");
    while !schedule.is_disposed() {
        let seen = schedule.wake_generation();
        let scan = scan(&schedule, Instant::now());
        schedule.wait(seen, scan.wake_at);
    }
    tracing::debug!("monitor stopped");
}

/// Check the timeline at `now` and interrupt the engine if a budget is
/// really exhausted.
pub(crate) fn scan(schedule: &Schedule, now: Instant) -> Scan {
    // Held across the decision and the interruption so that the thread
    // handling a previous interruption never races a new one.
    let _lock = schedule.lock();

    let (overrun, next, due) = schedule.with_state(|state| {
        let next = state.timeline.next_after(now);
        if !state.timeline.has_due(now) {
            return (None, next, false);
        }
        let overrun = state
            .timeline
            .due(now)
            .find(|(_, entry)| state.stack.is_overrun(*entry, now))
            .map(|(_, entry)| (TerminationReason::from(entry.budget), entry.frame.depth()));
        (overrun, next, true)
    });

    let Some((reason, depth)) = overrun else {
        let wake_at = if due {
            // due but not confirmed: look again shortly
            let recheck = now + schedule.config().recheck_interval();
            Some(next.map_or(recheck, |next| next.min(recheck)))
        } else {
            next
        };
        return Scan {
            interrupted: None,
            wake_at,
        };
    };

    let issue = schedule.with_state(|state| {
        if state.prevent_termination > 0 || state.has_terminated {
            return false;
        }
        state.has_terminated = true;
        state.interrupt_pending = true;
        state.last_termination = Some(reason.clone());
        true
    });

    if !issue {
        tracing::trace!(%reason, depth, "overrun confirmed, interruption suppressed");
        return Scan {
            interrupted: None,
            wake_at: next,
        };
    }

    tracing::info!(%reason, depth, "interrupting user code");
    schedule.engine().terminate_execution();
    schedule.publish(TerminationEvent {
        reason: reason.clone(),
        depth,
    });

    Scan {
        interrupted: Some((reason, depth)),
        wake_at: next,
    }
}
