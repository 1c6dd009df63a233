use crate::context::ContextId;
use crate::termination::Budget;
use crate::timeline::{Timeline, TimelineEntry};
use std::time::{Duration, Instant};

/// Generation-checked handle to a frame on a [`FrameStack`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId {
    index: usize,
    serial: u64,
}

impl FrameId {
    pub(crate) fn new(index: usize, serial: u64) -> Self {
        Self { index, serial }
    }

    /// Stack depth of the frame (0 = root)
    pub fn depth(&self) -> usize {
        self.index
    }
}

/// Time bookkeeping shared by both frame kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTimes {
    pub entered_at: Instant,
    /// API time accumulated from finished children
    pub api_duration: Duration,
    /// User time accumulated from finished children
    pub user_duration: Duration,
}

impl FrameTimes {
    pub fn new(entered_at: Instant) -> Self {
        Self {
            entered_at,
            api_duration: Duration::ZERO,
            user_duration: Duration::ZERO,
        }
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.entered_at)
    }
}

/// Host (trusted) code entry
#[derive(Debug, Clone)]
pub struct ApiFrame {
    pub times: FrameTimes,
}

/// User (budgeted) code entry
#[derive(Debug, Clone)]
pub struct UserFrame {
    pub times: FrameTimes,
    pub context: ContextId,
    pub max_entry_duration: Option<Duration>,
    pub max_user_duration: Option<Duration>,
    /// Entry deadline currently registered in the timeline
    pub max_entry_timepoint: Option<Instant>,
    /// User deadline currently registered in the timeline
    pub max_user_timepoint: Option<Instant>,
}

impl UserFrame {
    pub fn new(
        context: ContextId,
        entered_at: Instant,
        max_entry_duration: Option<Duration>,
        max_user_duration: Option<Duration>,
    ) -> Self {
        Self {
            times: FrameTimes::new(entered_at),
            context,
            max_entry_duration,
            max_user_duration,
            max_entry_timepoint: None,
            max_user_timepoint: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Frame {
    Api(ApiFrame),
    User(UserFrame),
}

impl Frame {
    pub fn api(entered_at: Instant) -> Self {
        Self::Api(ApiFrame {
            times: FrameTimes::new(entered_at),
        })
    }

    pub fn times(&self) -> &FrameTimes {
        match self {
            Self::Api(f) => &f.times,
            Self::User(f) => &f.times,
        }
    }

    fn times_mut(&mut self) -> &mut FrameTimes {
        match self {
            Self::Api(f) => &mut f.times,
            Self::User(f) => &mut f.times,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User(_))
    }

    pub fn as_user(&self) -> Option<&UserFrame> {
        match self {
            Self::User(f) => Some(f),
            Self::Api(_) => None,
        }
    }

    /// Durations this frame hands to its parent when it leaves: `(api, user)`
    fn leave_report(&self, now: Instant) -> (Duration, Duration) {
        let times = self.times();
        let elapsed = times.elapsed(now);
        match self {
            Self::Api(_) => (elapsed.saturating_sub(times.user_duration), times.user_duration),
            Self::User(_) => (times.api_duration, elapsed.saturating_sub(times.api_duration)),
        }
    }
}

#[derive(Debug)]
struct Slot {
    serial: u64,
    frame: Frame,
}

/// The single active call path of a schedule
///
/// Index 0 is the root. Budgets are only recomputed at stack transitions: a
/// user frame's user deadline is armed iff no API frame lies above it, pushing
/// an API frame withdraws the deadlines of the user frames directly beneath
/// it, and popping re-arms them pushed back by their accumulated API time.
#[derive(Debug, Default)]
pub struct FrameStack {
    slots: Vec<Slot>,
    next_serial: u64,
}

impl FrameStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn root(&self) -> Option<FrameId> {
        self.slots.first().map(|s| FrameId::new(0, s.serial))
    }

    pub fn top(&self) -> Option<FrameId> {
        self.slots
            .last()
            .map(|s| FrameId::new(self.slots.len() - 1, s.serial))
    }

    pub fn get(&self, id: FrameId) -> Option<&Frame> {
        self.slots
            .get(id.index)
            .filter(|s| s.serial == id.serial)
            .map(|s| &s.frame)
    }

    fn push_slot(&mut self, frame: Frame) -> FrameId {
        self.next_serial += 1;
        let serial = self.next_serial;
        self.slots.push(Slot { serial, frame });
        FrameId::new(self.slots.len() - 1, serial)
    }

    /// API time nested under the user frame at `index`, or `None` if some
    /// API frame is currently open above it.
    fn nested_api_time(&self, index: usize) -> Option<Duration> {
        let mut total = Duration::ZERO;
        for slot in &self.slots[index..] {
            match &slot.frame {
                Frame::User(f) => total += f.times.api_duration,
                Frame::Api(_) => return None,
            }
        }
        Some(total)
    }

    /// Direct user time of a user frame as of `now`
    pub fn user_time(&self, id: FrameId, now: Instant) -> Option<Duration> {
        let frame = self.get(id)?.as_user()?;
        let nested_api = self.nested_api_time(id.index)?;
        Some(frame.times.elapsed(now).saturating_sub(nested_api))
    }

    /// Returns true if the budget behind a timeline entry has really been
    /// exhausted at `now`. Entries of popped frames or withdrawn budgets
    /// never count.
    pub fn is_overrun(&self, entry: TimelineEntry, now: Instant) -> bool {
        let Some(frame) = self.get(entry.frame).and_then(Frame::as_user) else {
            return false;
        };
        match entry.budget {
            Budget::Entry => frame
                .max_entry_duration
                .is_some_and(|max| frame.times.elapsed(now) >= max),
            Budget::User => frame.max_user_duration.is_some_and(|max| {
                self.user_time(entry.frame, now)
                    .is_some_and(|spent| spent >= max)
            }),
        }
    }
}

/// Link `frame` as the new top and register its deadlines.
///
/// Returns the new frame's handle and whether the timeline changed.
pub(crate) fn push(
    stack: &mut FrameStack,
    timeline: &mut Timeline,
    frame: Frame,
) -> (FrameId, bool) {
    let is_user = frame.is_user();
    let id = stack.push_slot(frame);
    let mut changed = false;

    if let Some(Frame::User(user)) = stack.slots.last_mut().map(|s| &mut s.frame) {
        let entered_at = user.times.entered_at;
        if let Some(deadline) = user
            .max_entry_duration
            .and_then(|max| entered_at.checked_add(max))
        {
            user.max_entry_timepoint = Some(deadline);
            timeline.insert(deadline, TimelineEntry { frame: id, budget: Budget::Entry });
            changed = true;
        }
        if let Some(deadline) = user
            .max_user_duration
            .and_then(|max| entered_at.checked_add(max))
        {
            user.max_user_timepoint = Some(deadline);
            timeline.insert(deadline, TimelineEntry { frame: id, budget: Budget::User });
            changed = true;
        }
    }

    // on_stack_enter for the previous top
    if !is_user && id.index > 0 {
        changed |= withdraw_user_run(stack, timeline, id.index - 1);
    }

    (id, changed)
}

/// Unlink the top frame, which must be `id`, hand its durations to the
/// parent and drop its deadlines.
///
/// Returns whether the timeline changed, or `None` if `id` is not the top.
pub(crate) fn pop(
    stack: &mut FrameStack,
    timeline: &mut Timeline,
    id: FrameId,
    now: Instant,
) -> Option<bool> {
    if stack.top() != Some(id) {
        return None;
    }
    let slot = stack.slots.pop()?;
    let mut changed = false;

    let (api, user) = slot.frame.leave_report(now);
    if let Some(parent) = stack.slots.last_mut() {
        // on_stack_leave
        let times = parent.frame.times_mut();
        times.api_duration += api;
        times.user_duration += user;
    }

    if let Frame::User(frame) = &slot.frame {
        if let Some(deadline) = frame.max_entry_timepoint {
            let entry = TimelineEntry {
                frame: id,
                budget: Budget::Entry,
            };
            changed |= timeline.remove(deadline, entry);
        }
        if let Some(deadline) = frame.max_user_timepoint {
            changed |= timeline.remove(deadline, TimelineEntry { frame: id, budget: Budget::User });
        }
    }

    if let Some(top) = stack.slots.len().checked_sub(1) {
        changed |= rearm_user_run(stack, timeline, top);
    }

    Some(changed)
}

/// Withdraw the user deadlines of the contiguous user frames ending at `top`.
fn withdraw_user_run(stack: &mut FrameStack, timeline: &mut Timeline, top: usize) -> bool {
    let mut changed = false;
    for index in (0..=top).rev() {
        let serial = stack.slots[index].serial;
        let Frame::User(frame) = &mut stack.slots[index].frame else {
            break;
        };
        if let Some(deadline) = frame.max_user_timepoint.take() {
            let entry = TimelineEntry {
                frame: FrameId::new(index, serial),
                budget: Budget::User,
            };
            changed |= timeline.remove(deadline, entry);
            tracing::trace!(depth = index, "user deadline withdrawn");
        }
    }
    changed
}

/// Re-arm the user deadlines of the contiguous user frames ending at `top`,
/// pushed back by the API time each has accumulated so far.
fn rearm_user_run(stack: &mut FrameStack, timeline: &mut Timeline, top: usize) -> bool {
    let mut changed = false;
    let mut nested_api = Duration::ZERO;
    for index in (0..=top).rev() {
        let serial = stack.slots[index].serial;
        let Frame::User(frame) = &mut stack.slots[index].frame else {
            break;
        };
        nested_api += frame.times.api_duration;
        let Some(max) = frame.max_user_duration else {
            continue;
        };
        let entry = TimelineEntry {
            frame: FrameId::new(index, serial),
            budget: Budget::User,
        };
        let deadline = frame
            .times
            .entered_at
            .checked_add(max)
            .and_then(|d| d.checked_add(nested_api));
        if frame.max_user_timepoint == deadline {
            continue;
        }
        if let Some(previous) = frame.max_user_timepoint.take() {
            timeline.remove(previous, entry);
        }
        if let Some(deadline) = deadline {
            frame.max_user_timepoint = Some(deadline);
            timeline.insert(deadline, entry);
        }
        changed = true;
        tracing::trace!(depth = index, ?nested_api, "user deadline re-armed");
    }
    changed
}
