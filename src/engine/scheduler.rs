//! Scheduler for delayed firings, suppression windows and countdowns.
//!
//! Key invariants:
//! - Firings pop in `(due, trigger id, scheduling sequence)` order, so ties
//!   at the same instant resolve by ascending trigger id and a single
//!   trigger's firings stay in due order.
//! - Cancellation is lazy: cancelled entries stay in the heap and are
//!   skipped when they surface.
//! - Nothing here survives an encounter; [`Scheduler::clear`] drops it all.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use chrono::{DateTime, Utc};

use crate::output::AlertId;
use crate::trigger::{Captures, TriggerId};

use super::enrichment::EnrichmentQuery;

/// A pending unit of work.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScheduledFiring {
    /// Index into the loaded set's trigger list.
    pub trigger: usize,
    pub trigger_id: TriggerId,
    pub matched_at: DateTime<Utc>,
    pub due: DateTime<Utc>,
    /// Field snapshot taken at match time.
    pub captures: Captures,
    /// Query captured at match time, sent when the firing comes due.
    pub query: Option<EnrichmentQuery>,
}

#[derive(Debug, Clone, Copy)]
struct ActiveCountdown {
    alert: AlertId,
    until: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    heap: BinaryHeap<Reverse<(DateTime<Utc>, TriggerId, u64)>>,
    pending: HashMap<u64, ScheduledFiring>,
    next_seq: u64,
    suppressed_until: HashMap<TriggerId, DateTime<Utc>>,
    countdowns: HashMap<TriggerId, ActiveCountdown>,
}

impl Scheduler {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues a firing; returns its sequence number.
    pub(crate) fn schedule(&mut self, firing: ScheduledFiring) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.heap.push(Reverse((firing.due, firing.trigger_id.clone(), seq)));
        self.pending.insert(seq, firing);
        seq
    }

    /// Due time of the earliest live firing.
    pub(crate) fn next_due(&mut self) -> Option<DateTime<Utc>> {
        while let Some(Reverse((due, _, seq))) = self.heap.peek() {
            if self.pending.contains_key(seq) {
                return Some(*due);
            }
            self.heap.pop();
        }
        None
    }

    /// Removes and returns the earliest firing due at or before `now`.
    pub(crate) fn pop_due(&mut self, now: DateTime<Utc>) -> Option<ScheduledFiring> {
        loop {
            let Reverse((due, _, seq)) = self.heap.peek()?;
            let (due, seq) = (*due, *seq);
            if !self.pending.contains_key(&seq) {
                self.heap.pop();
                continue;
            }
            if due > now {
                return None;
            }
            self.heap.pop();
            return self.pending.remove(&seq);
        }
    }

    /// Cancels every pending firing of `trigger_id`.
    pub(crate) fn cancel(&mut self, trigger_id: &TriggerId) -> usize {
        let doomed: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, f)| &f.trigger_id == trigger_id)
            .map(|(seq, _)| *seq)
            .collect();
        for seq in &doomed {
            self.pending.remove(seq);
        }
        doomed.len()
    }

    #[must_use]
    pub(crate) fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Whether a match at `at` falls inside the trigger's window.
    #[must_use]
    pub(crate) fn is_suppressed(&self, trigger_id: &TriggerId, at: DateTime<Utc>) -> bool {
        self.suppressed_until.get(trigger_id).is_some_and(|until| at < *until)
    }

    pub(crate) fn suppress_until(&mut self, trigger_id: TriggerId, until: DateTime<Utc>) {
        self.suppressed_until.insert(trigger_id, until);
    }

    /// Alert of the trigger's countdown if it is still active at `at`.
    #[must_use]
    pub(crate) fn active_countdown(&self, trigger_id: &TriggerId, at: DateTime<Utc>) -> Option<AlertId> {
        self.countdowns
            .get(trigger_id)
            .filter(|c| at < c.until)
            .map(|c| c.alert)
    }

    pub(crate) fn set_countdown(&mut self, trigger_id: TriggerId, alert: AlertId, until: DateTime<Utc>) {
        self.countdowns.insert(trigger_id, ActiveCountdown { alert, until });
    }

    /// Drops all pending firings, windows and countdowns. Returns the number
    /// of firings discarded.
    pub(crate) fn clear(&mut self) -> usize {
        let discarded = self.pending.len();
        self.heap.clear();
        self.pending.clear();
        self.suppressed_until.clear();
        self.countdowns.clear();
        discarded
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::event::{Event, EventKind};

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn firing(id: &str, due_ms: i64) -> ScheduledFiring {
        ScheduledFiring {
            trigger: 0,
            trigger_id: TriggerId::new(id),
            matched_at: at(0),
            due: at(due_ms),
            captures: Captures::of(&Event::new(EventKind::CastStarted, at(0))),
            query: None,
        }
    }

    fn drain(s: &mut Scheduler, now: DateTime<Utc>) -> Vec<String> {
        std::iter::from_fn(|| s.pop_due(now))
            .map(|f| f.trigger_id.to_string())
            .collect()
    }

    #[test]
    fn ties_fire_in_trigger_id_order() {
        let mut s = Scheduler::new();
        s.schedule(firing("c", 100));
        s.schedule(firing("a", 100));
        s.schedule(firing("b", 50));
        s.schedule(firing("a", 100));
        assert_eq!(drain(&mut s, at(100)), vec!["b", "a", "a", "c"]);
    }

    #[test]
    fn nothing_pops_before_due() {
        let mut s = Scheduler::new();
        s.schedule(firing("a", 5000));
        assert!(s.pop_due(at(4999)).is_none());
        assert_eq!(s.next_due(), Some(at(5000)));
        assert!(s.pop_due(at(5000)).is_some());
        assert_eq!(s.next_due(), None);
    }

    #[test]
    fn cancelled_firings_are_skipped() {
        let mut s = Scheduler::new();
        s.schedule(firing("a", 10));
        s.schedule(firing("b", 20));
        s.schedule(firing("a", 30));
        assert_eq!(s.cancel(&TriggerId::new("a")), 2);
        assert_eq!(s.pending(), 1);
        assert_eq!(s.next_due(), Some(at(20)));
        assert_eq!(drain(&mut s, at(100)), vec!["b"]);
    }

    #[test]
    fn suppression_window_is_half_open() {
        let mut s = Scheduler::new();
        let id = TriggerId::new("a");
        s.suppress_until(id.clone(), at(0) + Duration::seconds(10));
        assert!(s.is_suppressed(&id, at(3000)));
        assert!(!s.is_suppressed(&id, at(10_000)));
        assert!(!s.is_suppressed(&TriggerId::new("b"), at(3000)));
    }

    #[test]
    fn countdown_expires() {
        let mut s = Scheduler::new();
        let id = TriggerId::new("a");
        s.set_countdown(id.clone(), AlertId(7), at(1000));
        assert_eq!(s.active_countdown(&id, at(999)), Some(AlertId(7)));
        assert_eq!(s.active_countdown(&id, at(1000)), None);
    }

    #[test]
    fn clear_discards_everything() {
        let mut s = Scheduler::new();
        s.schedule(firing("a", 10));
        s.schedule(firing("b", 20));
        s.suppress_until(TriggerId::new("a"), at(100));
        assert_eq!(s.clear(), 2);
        assert!(s.pop_due(at(1000)).is_none());
        assert!(!s.is_suppressed(&TriggerId::new("a"), at(0)));
    }
}
