//! Target registry
//!
//! Holds the monitored targets together with their next-due time. All
//! mutations go through one lock so that the scheduler's "which targets are
//! due" query and the rescheduling of those targets happen atomically.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::target::{CheckClass, Target, TargetFilter};

/// Interval ticks and wall-clock due times drift apart by a few milliseconds;
/// a target this close to its due time counts as due.
const DUE_TOLERANCE_MS: i64 = 500;

#[derive(Debug, Clone)]
struct Entry {
    target: Target,

    /// `None` means due immediately
    next_due: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_due(&self, class: CheckClass, now: DateTime<Utc>) -> bool {
        self.target.enabled
            && self.target.check_class == class
            && self.next_due.is_none_or(|due| due <= now + Duration::milliseconds(DUE_TOLERANCE_MS))
    }
}

#[derive(Debug)]
pub struct TargetRegistry {
    /// Keyed by target id, which also gives `list_due` its stable order
    entries: Mutex<BTreeMap<String, Entry>>,
    interval_fast: Duration,
    interval_slow: Duration,
}

impl TargetRegistry {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_intervals(
            config.interval(CheckClass::Fast),
            config.interval(CheckClass::Slow),
        )
    }

    pub fn with_intervals(fast: std::time::Duration, slow: std::time::Duration) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            interval_fast: Duration::from_std(fast).unwrap_or(Duration::seconds(60)),
            interval_slow: Duration::from_std(slow).unwrap_or(Duration::seconds(300)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn interval(&self, class: CheckClass) -> Duration {
        match class {
            CheckClass::Fast => self.interval_fast,
            CheckClass::Slow => self.interval_slow,
        }
    }

    /// Add or replace a target. A new target is due immediately.
    pub fn add(&self, target: Target) {
        let mut entries = self.lock();
        let next_due = entries.get(&target.id).and_then(|e| e.next_due);
        debug!("registry: adding target {}", target.id);
        entries.insert(target.id.clone(), Entry { target, next_due });
    }

    pub fn remove(&self, target_id: &str) -> Option<Target> {
        let removed = self.lock().remove(target_id).map(|e| e.target);
        if removed.is_some() {
            debug!("registry: removed target {target_id}");
        }
        removed
    }

    /// Enable or disable a target without deleting it. Returns false for unknown ids.
    pub fn set_enabled(&self, target_id: &str, enabled: bool) -> bool {
        match self.lock().get_mut(target_id) {
            Some(entry) => {
                entry.target.enabled = enabled;
                debug!("registry: target {target_id} enabled={enabled}");
                true
            }
            None => false,
        }
    }

    /// Replace the whole target set, keeping the schedule of surviving targets
    pub fn replace_all(&self, targets: Vec<Target>) {
        let mut entries = self.lock();
        let previous = std::mem::take(&mut *entries);

        for target in targets {
            let next_due = previous.get(&target.id).and_then(|e| e.next_due);
            entries.insert(target.id.clone(), Entry { target, next_due });
        }

        info!(
            "registry reloaded: {} targets ({} previously)",
            entries.len(),
            previous.len()
        );
    }

    pub fn get(&self, target_id: &str) -> Option<Target> {
        self.lock().get(target_id).map(|e| e.target.clone())
    }

    pub fn contains(&self, target_id: &str) -> bool {
        self.lock().contains_key(target_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn list(&self, filter: &TargetFilter) -> Vec<Target> {
        self.lock()
            .values()
            .filter(|e| filter.matches(&e.target))
            .map(|e| e.target.clone())
            .collect()
    }

    /// Enabled targets of `class` whose next-due time is at or before `now`
    /// (within [`DUE_TOLERANCE_MS`])
    pub fn list_due(&self, class: CheckClass, now: DateTime<Utc>) -> Vec<Target> {
        self.lock()
            .values()
            .filter(|e| e.is_due(class, now))
            .map(|e| e.target.clone())
            .collect()
    }

    /// Record that `target_id` was scheduled at `now`
    pub fn mark_scheduled(&self, target_id: &str, now: DateTime<Utc>) {
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(target_id) {
            entry.next_due = Some(now + self.interval(entry.target.check_class));
        }
    }

    /// `list_due` and `mark_scheduled` for every returned target, under one lock
    pub fn take_due(&self, class: CheckClass, now: DateTime<Utc>) -> Vec<Target> {
        let next_due = now + self.interval(class);
        let mut entries = self.lock();

        entries
            .values_mut()
            .filter(|e| e.is_due(class, now))
            .map(|e| {
                e.next_due = Some(next_due);
                e.target.clone()
            })
            .collect()
    }

    pub fn next_due(&self, target_id: &str) -> Option<DateTime<Utc>> {
        self.lock().get(target_id).and_then(|e| e.next_due)
    }
}
