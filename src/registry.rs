use crate::engine::Engine;
use crate::error::GovernorError;
use crate::limits::MonitorConfig;
use crate::schedule::Schedule;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// Schedules by group key, each created with its monitor thread on first use
pub struct ScheduleRegistry<K> {
    config: MonitorConfig,
    schedules: Mutex<HashMap<K, Arc<Schedule>>>,
}

impl<K: Eq + Hash + Clone + std::fmt::Debug> ScheduleRegistry<K> {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            schedules: Mutex::new(HashMap::new()),
        }
    }

    /// Schedule of `group`, created with `engine` if it doesn't exist yet
    pub fn get_or_create(
        &self,
        group: &K,
        engine: impl FnOnce() -> Arc<dyn Engine>,
    ) -> Result<Arc<Schedule>, GovernorError> {
        let mut schedules = self.schedules.lock();
        if let Some(schedule) = schedules.get(group) {
            return Ok(Arc::clone(schedule));
        }
        let schedule = Schedule::spawn(engine(), self.config.clone())?;
        tracing::debug!(?group, "schedule registered");
        schedules.insert(group.clone(), Arc::clone(&schedule));
        Ok(schedule)
    }

    pub fn get(&self, group: &K) -> Result<Arc<Schedule>, GovernorError> {
        self.schedules
            .lock()
            .get(group)
            .cloned()
            .ok_or(GovernorError::Disposed)
    }

    pub fn contains(&self, group: &K) -> bool {
        self.schedules.lock().contains_key(group)
    }

    pub fn len(&self) -> usize {
        self.schedules.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedules.lock().is_empty()
    }

    /// Tear down the schedule of `group` and stop its monitor thread
    ///
    /// Returns false if the group had no schedule.
    pub fn dispose(&self, group: &K) -> bool {
        let removed = self.schedules.lock().remove(group);
        match removed {
            Some(schedule) => {
                schedule.shutdown();
                tracing::debug!(?group, "schedule unregistered");
                true
            }
            None => false,
        }
    }

    pub fn dispose_all(&self) {
        let drained: Vec<_> = self.schedules.lock().drain().collect();
        for (_, schedule) in drained {
            schedule.shutdown();
        }
    }
}

impl<K> Drop for ScheduleRegistry<K> {
    fn drop(&mut self) {
        for (_, schedule) in self.schedules.get_mut().drain() {
            schedule.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;

    fn engine() -> Arc<dyn Engine> {
        Arc::new(FakeEngine::new())
    }

    #[test]
    fn schedules_are_created_once_per_group() {
        let registry = ScheduleRegistry::new(MonitorConfig::default());
        let a = registry.get_or_create(&"a", engine).expect("created");
        let again = registry
            .get_or_create(&"a", || unreachable!("already registered"))
            .expect("found");
        assert!(Arc::ptr_eq(&a, &again));

        registry.get_or_create(&"b", engine).expect("created");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn dispose_stops_the_monitor() {
        let registry = ScheduleRegistry::new(MonitorConfig::default());
        let schedule = registry.get_or_create(&1u32, engine).expect("created");

        assert!(registry.dispose(&1));
        assert!(schedule.is_disposed());
        assert!(!registry.dispose(&1));
        assert!(matches!(registry.get(&1), Err(GovernorError::Disposed)));
        assert!(registry.is_empty());
    }

    #[test]
    fn dispose_all_empties_registry() {
        let registry = ScheduleRegistry::new(MonitorConfig::default());
        let first = registry.get_or_create(&"x", engine).expect("created");
        let second = registry.get_or_create(&"y", engine).expect("created");

        registry.dispose_all();
        assert!(registry.is_empty());
        assert!(first.is_disposed() && second.is_disposed());
    }
}
