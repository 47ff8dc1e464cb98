use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use url::Url;

use crate::LocalId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuccessDecision {
    FinalizeNow(Url),
    /// Item must stay at 100% until `due`.
    Deferred { due: Instant },
}

#[derive(Debug, Clone)]
struct ScheduledFinalize {
    due: Instant,
    remote_url: Url,
}

/// Holds fast transfers at 100% for at least `min_display` after acceptance.
#[derive(Debug)]
pub struct ProgressSmoother {
    min_display: Duration,
    started: HashMap<LocalId, Instant>,
    scheduled: HashMap<LocalId, ScheduledFinalize>,
}

impl ProgressSmoother {
    #[must_use]
    pub fn new(min_display: Duration) -> Self {
        Self {
            min_display,
            started: HashMap::new(),
            scheduled: HashMap::new(),
        }
    }

    pub fn min_display(&self) -> Duration {
        self.min_display
    }

    /// Records the start of an attempt and drops any finalize left over from an earlier one.
    pub fn start(&mut self, local_id: LocalId, now: Instant) {
        self.scheduled.remove(&local_id);
        self.started.insert(local_id, now);
    }

    pub fn is_started(&self, local_id: LocalId) -> bool {
        self.started.contains_key(&local_id)
    }

    pub fn on_success(&mut self, local_id: LocalId, remote_url: Url, now: Instant) -> SuccessDecision {
        self.scheduled.remove(&local_id);
        let Some(started) = self.started.get(&local_id).copied() else {
            return SuccessDecision::FinalizeNow(remote_url);
        };

        let elapsed = now.saturating_duration_since(started);
        if elapsed >= self.min_display {
            self.started.remove(&local_id);
            return SuccessDecision::FinalizeNow(remote_url);
        }

        let due = now + (self.min_display - elapsed);
        self.scheduled
            .insert(local_id, ScheduledFinalize { due, remote_url });
        SuccessDecision::Deferred { due }
    }

    pub fn is_pending(&self, local_id: LocalId) -> bool {
        self.scheduled.contains_key(&local_id)
    }

    /// Forgets `local_id` entirely. Returns true if a scheduled finalize was discarded.
    pub fn cancel(&mut self, local_id: LocalId) -> bool {
        self.started.remove(&local_id);
        self.scheduled.remove(&local_id).is_some()
    }

    /// Removes and returns every finalize due at `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<(LocalId, Url)> {
        let mut due: Vec<(Instant, LocalId)> = self
            .scheduled
            .iter()
            .filter(|(_, task)| task.due <= now)
            .map(|(local_id, task)| (task.due, *local_id))
            .collect();
        due.sort();

        due.into_iter()
            .filter_map(|(_, local_id)| {
                self.started.remove(&local_id);
                self.scheduled
                    .remove(&local_id)
                    .map(|task| (local_id, task.remote_url))
            })
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduled.values().map(|task| task.due).min()
    }

    pub fn clear(&mut self) {
        self.started.clear();
        self.scheduled.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://store.example/files/abc").unwrap()
    }

    #[test]
    fn slow_transfer_finalizes_immediately() {
        let t0 = Instant::now();
        let id = LocalId::new(1);
        let mut smoother = ProgressSmoother::new(Duration::from_millis(1000));
        smoother.start(id, t0);

        let decision = smoother.on_success(id, url(), t0 + Duration::from_millis(1000));
        assert_eq!(decision, SuccessDecision::FinalizeNow(url()));
        assert!(!smoother.is_started(id));
    }

    #[test]
    fn fast_transfer_is_held_for_the_remainder() {
        let t0 = Instant::now();
        let id = LocalId::new(1);
        let mut smoother = ProgressSmoother::new(Duration::from_millis(1000));
        smoother.start(id, t0);

        let decision = smoother.on_success(id, url(), t0 + Duration::from_millis(200));
        let due = t0 + Duration::from_millis(1000);
        assert_eq!(decision, SuccessDecision::Deferred { due });
        assert_eq!(smoother.next_deadline(), Some(due));

        assert!(smoother.take_due(t0 + Duration::from_millis(999)).is_empty());
        assert_eq!(smoother.take_due(due), vec![(id, url())]);
        assert!(smoother.next_deadline().is_none());
    }

    #[test]
    fn cancel_discards_scheduled_finalize() {
        let t0 = Instant::now();
        let id = LocalId::new(4);
        let mut smoother = ProgressSmoother::new(Duration::from_millis(1000));
        smoother.start(id, t0);
        smoother.on_success(id, url(), t0 + Duration::from_millis(10));

        assert!(smoother.cancel(id));
        assert!(smoother.take_due(t0 + Duration::from_secs(5)).is_empty());
        assert!(!smoother.cancel(id));
    }

    #[test]
    fn restart_replaces_pending_finalize() {
        let t0 = Instant::now();
        let id = LocalId::new(2);
        let mut smoother = ProgressSmoother::new(Duration::from_millis(500));
        smoother.start(id, t0);
        smoother.on_success(id, url(), t0 + Duration::from_millis(100));

        smoother.start(id, t0 + Duration::from_millis(200));
        assert!(!smoother.is_pending(id));
        assert!(smoother.next_deadline().is_none());
    }

    #[test]
    fn due_finalizes_come_out_earliest_first() {
        let t0 = Instant::now();
        let mut smoother = ProgressSmoother::new(Duration::from_millis(1000));
        let (a, b) = (LocalId::new(1), LocalId::new(2));
        smoother.start(b, t0);
        smoother.start(a, t0 + Duration::from_millis(100));
        smoother.on_success(b, url(), t0 + Duration::from_millis(900));
        smoother.on_success(a, url(), t0 + Duration::from_millis(200));

        let fired: Vec<LocalId> = smoother
            .take_due(t0 + Duration::from_secs(2))
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(fired, vec![b, a]);
    }
}
