use crate::context::UserContext;
use crate::frame::{Frame, FrameId, UserFrame};
use crate::schedule::Schedule;
use std::time::Instant;

/// Marks a call into host (API) code
#[must_use = "the frame is popped as soon as the guard is dropped"]
pub struct ApiEntry<'a> {
    schedule: &'a Schedule,
    id: FrameId,
}

impl<'a> ApiEntry<'a> {
    pub fn enter(schedule: &'a Schedule) -> Self {
        let id = schedule.push_frame(Frame::api(Instant::now()));
        Self { schedule, id }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }
}

impl Drop for ApiEntry<'_> {
    fn drop(&mut self) {
        self.schedule.pop_frame(self.id);
    }
}

/// Marks a call into user code, enforcing the context's budgets
#[must_use = "the frame is popped as soon as the guard is dropped"]
pub struct UserEntry<'a> {
    schedule: &'a Schedule,
    id: FrameId,
}

impl<'a> UserEntry<'a> {
    pub fn enter(schedule: &'a Schedule, context: &UserContext) -> Self {
        let limits = context.limits();
        let frame = UserFrame::new(
            context.id(),
            Instant::now(),
            limits.max_entry_time(),
            limits.max_user_time(),
        );
        let id = schedule.push_frame(Frame::User(frame));
        tracing::trace!(context = %context.id(), depth = id.depth(), "user entry");
        Self { schedule, id }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }
}

impl Drop for UserEntry<'_> {
    fn drop(&mut self) {
        self.schedule.pop_frame(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{ExecutionLimits, MonitorConfig};
    use crate::testing::FakeEngine;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn guards_push_and_pop_in_order() {
        let schedule = Schedule::spawn(Arc::new(FakeEngine::new()), MonitorConfig::default())
            .expect("spawn monitor");
        let context = UserContext::new(ExecutionLimits::new(
            Some(Duration::from_secs(60)),
            Some(Duration::from_secs(30)),
        ));

        {
            let outer = UserEntry::enter(&schedule, &context);
            assert_eq!(outer.id().depth(), 0);
            assert_eq!(schedule.timeline_len(), 2);
            {
                let api = ApiEntry::enter(&schedule);
                assert_eq!(api.id().depth(), 1);
                // user deadline withdrawn while host code runs
                assert_eq!(schedule.timeline_len(), 1);
                let inner = UserEntry::enter(&schedule, &context);
                assert_eq!(inner.id().depth(), 2);
                assert_eq!(schedule.timeline_len(), 3);
            }
            assert_eq!(schedule.depth(), 1);
            assert_eq!(schedule.timeline_len(), 2);
        }

        assert!(schedule.is_idle());
        assert_eq!(schedule.timeline_len(), 0);
        schedule.shutdown();
    }

    #[test]
    fn budgets_are_snapshotted_on_entry() {
        let schedule = Schedule::spawn(Arc::new(FakeEngine::new()), MonitorConfig::default())
            .expect("spawn monitor");
        let context = UserContext::default();
        let entry = UserEntry::enter(&schedule, &context);
        context.set_max_entry_time(Some(Duration::from_millis(1)));

        std::thread::sleep(Duration::from_millis(20));
        assert!(!schedule.has_terminated());
        assert_eq!(schedule.timeline_len(), 0);

        drop(entry);
        schedule.shutdown();
    }
}
