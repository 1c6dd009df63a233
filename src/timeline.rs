use crate::frame::FrameId;
use crate::termination::Budget;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::time::Instant;

/// One registered deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineEntry {
    pub frame: FrameId,
    pub budget: Budget,
}

/// Multi-map from absolute deadline to the frame owning it
#[derive(Debug, Default)]
pub struct Timeline {
    entries: BTreeMap<Instant, Vec<TimelineEntry>>,
    len: usize,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, deadline: Instant, entry: TimelineEntry) {
        self.entries.entry(deadline).or_default().push(entry);
        self.len += 1;
    }

    /// Remove the entry registered at `deadline` for this frame and budget.
    ///
    /// Matching is by identity, not by deadline alone, since several frames
    /// may share a deadline.
    pub fn remove(&mut self, deadline: Instant, entry: TimelineEntry) -> bool {
        let Some(bucket) = self.entries.get_mut(&deadline) else {
            return false;
        };
        let Some(pos) = bucket.iter().position(|e| *e == entry) else {
            return false;
        };
        bucket.remove(pos);
        if bucket.is_empty() {
            self.entries.remove(&deadline);
        }
        self.len -= 1;
        true
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn first_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().copied()
    }

    /// Earliest deadline strictly after `now`
    pub fn next_after(&self, now: Instant) -> Option<Instant> {
        self.entries
            .range((Bound::Excluded(now), Bound::Unbounded))
            .next()
            .map(|(deadline, _)| *deadline)
    }

    /// Returns true if some deadline is at or before `now`
    pub fn has_due(&self, now: Instant) -> bool {
        self.first_deadline().is_some_and(|first| first <= now)
    }

    /// Entries whose deadline is at or before `now`, earliest first
    pub fn due(&self, now: Instant) -> impl Iterator<Item = (Instant, TimelineEntry)> + '_ {
        self.entries
            .range(..=now)
            .flat_map(|(deadline, bucket)| bucket.iter().map(move |e| (*deadline, *e)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Instant, TimelineEntry)> + '_ {
        self.entries
            .iter()
            .flat_map(|(deadline, bucket)| bucket.iter().map(move |e| (*deadline, *e)))
    }

    /// Returns true if any entry belongs to `frame`
    pub fn contains_frame(&self, frame: FrameId) -> bool {
        self.iter().any(|(_, e)| e.frame == frame)
    }
}
