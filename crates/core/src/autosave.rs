//! Debounced background saving
//!
//! Each key holds at most one pending value. Marking a key dirty again
//! replaces the value and restarts its quiet window, so a burst of edits
//! produces one save once the user pauses. Failed saves are logged and
//! requeued; the next window retries them.
//!
//! Time is passed in by the caller so the UI loop drives the schedule and
//! tests control the clock.

use crate::error::Result;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_AUTOSAVE_DEBOUNCE: Duration = Duration::from_millis(1000);

#[derive(Debug)]
struct PendingSave<V> {
    value: V,
    last_marked_at: Instant,
}

impl<V> PendingSave<V> {
    fn should_write(&self, now: Instant, debounce: Duration) -> bool {
        now.saturating_duration_since(self.last_marked_at) >= debounce
    }
}

/// Outcome of one save pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    pub saved: usize,
    pub failed: usize,
}

impl std::ops::AddAssign for SaveReport {
    fn add_assign(&mut self, other: Self) {
        self.saved += other.saved;
        self.failed += other.failed;
    }
}

#[derive(Debug)]
pub struct AutoSaver<K, V> {
    debounce: Duration,
    pending: HashMap<K, PendingSave<V>>,
}

impl<K, V> AutoSaver<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending: HashMap::new(),
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Schedule `value` for `key`, restarting that key's quiet window.
    pub fn mark_dirty(&mut self, key: K, value: V, now: Instant) {
        self.pending.insert(
            key,
            PendingSave {
                value,
                last_marked_at: now,
            },
        );
    }

    pub fn is_dirty(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drop a scheduled save without writing it.
    pub fn cancel(&mut self, key: &K) -> Option<V> {
        self.pending.remove(key).map(|p| p.value)
    }

    /// When the earliest pending save becomes due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|p| p.last_marked_at + self.debounce)
            .min()
    }

    /// Remove and return every value whose quiet window has elapsed.
    pub fn take_due(&mut self, now: Instant) -> Vec<(K, V)> {
        self.take_due_where(now, |_| true)
    }

    /// Like [`take_due`](Self::take_due), leaving keys rejected by `ready` queued.
    pub fn take_due_where(&mut self, now: Instant, ready: impl Fn(&K) -> bool) -> Vec<(K, V)> {
        let debounce = self.debounce;
        self.take_matching(|k, p| ready(k) && p.should_write(now, debounce))
    }

    /// Remove and return everything pending, due or not.
    pub fn take_all(&mut self) -> Vec<(K, V)> {
        self.pending.drain().map(|(k, p)| (k, p.value)).collect()
    }

    /// Like [`take_all`](Self::take_all), leaving keys rejected by `ready` queued.
    pub fn take_all_where(&mut self, ready: impl Fn(&K) -> bool) -> Vec<(K, V)> {
        self.take_matching(|k, _| ready(k))
    }

    fn take_matching(&mut self, take: impl Fn(&K, &PendingSave<V>) -> bool) -> Vec<(K, V)> {
        let keys: Vec<K> = self
            .pending
            .iter()
            .filter(|(k, p)| take(k, p))
            .map(|(k, _)| k.clone())
            .collect();
        keys.into_iter()
            .filter_map(|k| self.pending.remove(&k).map(|p| (k, p.value)))
            .collect()
    }

    /// Put back a value whose save failed, unless a newer edit is already queued.
    pub fn requeue(&mut self, key: K, value: V, now: Instant) {
        self.pending.entry(key).or_insert(PendingSave {
            value,
            last_marked_at: now,
        });
    }

    /// Save every due value with `save`. Failures are logged and requeued.
    pub fn save_due(&mut self, now: Instant, save: impl FnMut(&K, &V) -> Result<()>) -> SaveReport {
        let due = self.take_due(now);
        self.write_batch(due, now, save)
    }

    /// Save everything pending immediately, e.g. before navigating away.
    pub fn flush(&mut self, now: Instant, save: impl FnMut(&K, &V) -> Result<()>) -> SaveReport {
        let all = self.take_all();
        self.write_batch(all, now, save)
    }

    fn write_batch(
        &mut self,
        batch: Vec<(K, V)>,
        now: Instant,
        mut save: impl FnMut(&K, &V) -> Result<()>,
    ) -> SaveReport {
        let results = batch
            .into_iter()
            .map(|(key, value)| {
                let result = save(&key, &value);
                (key, value, result)
            })
            .collect();
        self.settle(results, now)
    }

    /// Record the outcome of saves that ran elsewhere, requeueing failures.
    pub fn settle(&mut self, results: Vec<(K, V, Result<()>)>, now: Instant) -> SaveReport {
        let mut report = SaveReport::default();
        for (key, value, result) in results {
            match result {
                Ok(()) => {
                    debug!(?key, "auto-saved");
                    report.saved += 1;
                }
                Err(err) => {
                    warn!(?key, error = %err, "auto-save failed, will retry");
                    report.failed += 1;
                    self.requeue(key, value, now);
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MarkingError;

    fn saver() -> AutoSaver<u32, &'static str> {
        AutoSaver::new(Duration::from_millis(1000))
    }

    #[test]
    fn test_burst_produces_single_save() {
        let start = Instant::now();
        let mut saver = saver();
        saver.mark_dirty(1, "a", start);
        saver.mark_dirty(1, "ab", start + Duration::from_millis(600));
        saver.mark_dirty(1, "abc", start + Duration::from_millis(1200));

        assert!(saver.take_due(start + Duration::from_millis(2000)).is_empty());
        assert_eq!(
            saver.next_deadline(),
            Some(start + Duration::from_millis(2200))
        );

        let mut saved = Vec::new();
        let report = saver.save_due(start + Duration::from_millis(2200), |k, v| {
            saved.push((*k, *v));
            Ok(())
        });
        assert_eq!(report.saved, 1);
        assert_eq!(saved, vec![(1, "abc")]);
        assert!(!saver.has_pending());
    }

    #[test]
    fn test_keys_are_independent() {
        let start = Instant::now();
        let mut saver = saver();
        saver.mark_dirty(1, "one", start);
        saver.mark_dirty(2, "two", start + Duration::from_millis(500));

        let due = saver.take_due(start + Duration::from_millis(1000));
        assert_eq!(due, vec![(1, "one")]);
        assert!(saver.is_dirty(&2));
    }

    #[test]
    fn test_failed_save_is_requeued() {
        let start = Instant::now();
        let mut saver = saver();
        saver.mark_dirty(1, "a", start);

        let later = start + Duration::from_secs(1);
        let report = saver.save_due(later, |_, _| Err(MarkingError::Network("down".into())));
        assert_eq!(report, SaveReport { saved: 0, failed: 1 });
        assert!(saver.is_dirty(&1));
        assert_eq!(saver.next_deadline(), Some(later + Duration::from_secs(1)));
    }

    #[test]
    fn test_requeue_keeps_newer_edit() {
        let start = Instant::now();
        let mut saver = saver();
        saver.mark_dirty(1, "newer", start);
        saver.requeue(1, "older", start);
        assert_eq!(saver.take_all(), vec![(1, "newer")]);
    }

    #[test]
    fn test_take_where_skips_busy_keys() {
        let start = Instant::now();
        let mut saver = saver();
        saver.mark_dirty(1, "a", start);
        saver.mark_dirty(2, "b", start);

        let later = start + Duration::from_secs(1);
        assert_eq!(saver.take_due_where(later, |k| *k != 1), vec![(2, "b")]);
        assert!(saver.is_dirty(&1));
        assert_eq!(saver.take_all_where(|k| *k != 1), Vec::new());
        assert_eq!(saver.take_all_where(|_| true), vec![(1, "a")]);
    }

    #[test]
    fn test_settle_counts_and_requeues() {
        let start = Instant::now();
        let mut saver = saver();
        let report = saver.settle(
            vec![
                (1, "ok", Ok(())),
                (2, "lost", Err(MarkingError::Network("timeout".into()))),
            ],
            start,
        );
        assert_eq!(report, SaveReport { saved: 1, failed: 1 });
        assert!(!saver.is_dirty(&1));
        assert_eq!(saver.take_all(), vec![(2, "lost")]);
    }

    #[test]
    fn test_flush_ignores_debounce() {
        let start = Instant::now();
        let mut saver = saver();
        saver.mark_dirty(1, "a", start);
        saver.mark_dirty(2, "b", start);
        let report = saver.flush(start, |_, _| Ok(()));
        assert_eq!(report.saved, 2);
        assert!(!saver.has_pending());
    }
}
