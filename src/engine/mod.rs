//! The trigger engine.
//!
//! [`TriggerEngine`] is a synchronous, clock-agnostic core: time advances only
//! through event timestamps and [`TriggerEngine::advance_to`]. Enrichment runs
//! on tokio tasks and comes back through [`TriggerEngine::next_enrichment`] or
//! [`TriggerEngine::pump_enrichment`]. [`runtime::EngineRuntime`] drives all of
//! this against the wall clock.

mod dispatcher;

/// Encounter identity and lifecycle.
pub mod encounter;
/// Enrichment gateway contract and the in-flight request broker.
pub mod enrichment;
mod matcher;
/// Tokio actor running an engine on the wall clock.
pub mod runtime;
mod scheduler;
/// Alert sinks.
pub mod stream;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::event::{Event, EventKind};
use crate::state::EncounterState;
use crate::trigger::{LoadedTriggerSet, TriggerSet};

use dispatcher::Dispatcher;

pub use dispatcher::{Stage, TriggerFailure};
pub use encounter::{EncounterId, EndReason};
pub use enrichment::{
    CombatantInfo, Completion, EnrichmentFuture, EnrichmentGateway, EnrichmentOutcome, EnrichmentQuery,
    EnrichmentResult, Ticket,
};
pub use runtime::EngineRuntime;
pub use stream::{alert_channel, AlertSink, AlertStream, ChannelSink};

use encounter::Encounter;

/// Live engine counters, shared with the host.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub(crate) events_submitted: AtomicU64,
    pub(crate) events_ignored: AtomicU64,
    pub(crate) triggers_matched: AtomicU64,
    pub(crate) firings_scheduled: AtomicU64,
    pub(crate) firings_cancelled: AtomicU64,
    pub(crate) alerts_emitted: AtomicU64,
    pub(crate) alerts_dropped: AtomicU64,
    pub(crate) trigger_failures: AtomicU64,
    pub(crate) suppressed: AtomicU64,
    pub(crate) enrichment_requests: AtomicU64,
    pub(crate) enrichment_timeouts: AtomicU64,
    pub(crate) stale_completions: AtomicU64,
}

impl EngineStats {
    /// Point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            events_submitted: get(&self.events_submitted),
            events_ignored: get(&self.events_ignored),
            triggers_matched: get(&self.triggers_matched),
            firings_scheduled: get(&self.firings_scheduled),
            firings_cancelled: get(&self.firings_cancelled),
            alerts_emitted: get(&self.alerts_emitted),
            alerts_dropped: get(&self.alerts_dropped),
            trigger_failures: get(&self.trigger_failures),
            suppressed: get(&self.suppressed),
            enrichment_requests: get(&self.enrichment_requests),
            enrichment_timeouts: get(&self.enrichment_timeouts),
            stale_completions: get(&self.stale_completions),
        }
    }
}

/// Plain copy of [`EngineStats`].
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub events_submitted: u64,
    pub events_ignored: u64,
    pub triggers_matched: u64,
    pub firings_scheduled: u64,
    pub firings_cancelled: u64,
    pub alerts_emitted: u64,
    pub alerts_dropped: u64,
    pub trigger_failures: u64,
    pub suppressed: u64,
    pub enrichment_requests: u64,
    pub enrichment_timeouts: u64,
    pub stale_completions: u64,
}

/// Combat-log trigger engine.
///
/// Feed it normalized events in log order with [`submit`](Self::submit).
/// Alerts go to the [`AlertSink`] given at construction.
///
/// ```
/// use chrono::Utc;
/// use raidcall::event::{Event, EventKind, Field};
/// use raidcall::output::Response;
/// use raidcall::trigger::{Pattern, Trigger, TriggerSet};
/// use raidcall::{alert_channel, EncounterId, EngineConfig, TriggerEngine};
///
/// let (sink, alerts) = alert_channel(16);
/// let mut engine = TriggerEngine::new(EngineConfig::default(), sink).unwrap();
/// engine
///     .load(
///         TriggerSet::new("demo").trigger(
///             Trigger::new("demo aoe")
///                 .on(EventKind::CastStarted)
///                 .pattern(Pattern::new().exact(Field::AbilityId, "100"))
///                 .respond(Response::info("aoe")),
///         ),
///     )
///     .unwrap();
/// engine.start(EncounterId::new()).unwrap();
/// engine.submit(Event::new(EventKind::CastStarted, Utc::now()).with(Field::AbilityId, "100"));
///
/// assert_eq!(alerts.recv().unwrap().payload.text, "aoe");
/// ```
pub struct TriggerEngine {
    config: EngineConfig,
    set: Option<Arc<LoadedTriggerSet>>,
    encounter: Option<Encounter>,
    dispatcher: Dispatcher,
    stats: Arc<EngineStats>,
    clock: Option<DateTime<Utc>>,
}

impl TriggerEngine {
    /// Creates an idle engine with no trigger set.
    pub fn new(config: EngineConfig, sink: impl AlertSink + 'static) -> EngineResult<Self> {
        config.validate()?;
        let stats = Arc::new(EngineStats::default());
        let dispatcher = Dispatcher::new(&config, Box::new(sink), Arc::clone(&stats));
        Ok(Self {
            config,
            set: None,
            encounter: None,
            dispatcher,
            stats,
            clock: None,
        })
    }

    /// Sets the enrichment gateway.
    #[must_use]
    pub fn with_gateway(mut self, gateway: Arc<dyn EnrichmentGateway>) -> Self {
        self.set_gateway(gateway);
        self
    }

    /// Installs or replaces the enrichment gateway.
    pub fn set_gateway(&mut self, gateway: Arc<dyn EnrichmentGateway>) {
        self.dispatcher.set_gateway(gateway);
    }

    /// Whether a gateway is installed.
    #[must_use]
    pub fn has_gateway(&self) -> bool {
        self.dispatcher.has_gateway()
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validates and installs `set`, returning its fingerprint.
    ///
    /// On error the previously loaded set stays in place. On success an
    /// active encounter is ended with [`EndReason::Reset`].
    pub fn load(&mut self, set: TriggerSet) -> EngineResult<String> {
        let loaded = match set.load(self.config.default_locale) {
            Ok(loaded) => loaded,
            Err(err) => {
                log::warn!(target: "raidcall::engine", "{err}");
                return Err(err.into());
            }
        };
        self.end(EndReason::Reset);
        log::info!(
            target: "raidcall::engine",
            "loaded trigger set '{}' ({} triggers, fingerprint {})",
            loaded.name(),
            loaded.len(),
            loaded.fingerprint()
        );
        let fingerprint = loaded.fingerprint().to_string();
        self.set = Some(Arc::new(loaded));
        Ok(fingerprint)
    }

    /// The loaded set, if any.
    #[must_use]
    pub fn trigger_set(&self) -> Option<&LoadedTriggerSet> {
        self.set.as_deref()
    }

    /// Starts an encounter, ending any active one with [`EndReason::Reset`].
    pub fn start(&mut self, id: EncounterId) -> EngineResult<()> {
        if self.set.is_none() {
            return Err(EngineError::NoTriggerSet);
        }
        self.end(EndReason::Reset);
        let at = self.now();
        self.begin(id, at);
        Ok(())
    }

    /// Ends the active encounter. Pending firings and in-flight enrichment
    /// are discarded. Returns `false` if there was nothing to end.
    pub fn end(&mut self, reason: EndReason) -> bool {
        let Some(encounter) = self.encounter.take() else {
            return false;
        };
        self.dispatcher.teardown();
        let elapsed = self.now() - encounter.started_at;
        log::info!(
            target: "raidcall::engine",
            "{} ended by {reason} after {}ms",
            encounter.id,
            elapsed.num_milliseconds()
        );
        true
    }

    /// Id of the active encounter.
    #[must_use]
    pub fn encounter_id(&self) -> Option<EncounterId> {
        self.encounter.as_ref().map(|e| e.id)
    }

    /// Whether an encounter is running.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.encounter.is_some()
    }

    /// Committed state of the active encounter.
    #[must_use]
    pub fn state(&self) -> Option<&EncounterState> {
        self.encounter.as_ref().map(|e| &e.state)
    }

    /// Latest time the engine has observed.
    #[must_use]
    pub const fn clock(&self) -> Option<DateTime<Utc>> {
        self.clock
    }

    /// Ingests one event.
    ///
    /// Firings due at or before the event's timestamp run first. Lifecycle
    /// events start and end encounters around their own fan-out.
    pub fn submit(&mut self, event: Event) {
        self.stats.events_submitted.fetch_add(1, Ordering::Relaxed);
        self.advance_to(event.timestamp);
        let at = self.now();

        match event.kind {
            EventKind::CombatStarted => {
                if self.encounter.is_none() && self.set.is_some() {
                    self.begin(EncounterId::new(), at);
                }
                self.dispatch(&event);
            }
            EventKind::ZoneChanged => {
                self.end(EndReason::ZoneChange);
                if self.set.as_ref().is_some_and(|s| s.applies_to(event.zone_id())) {
                    self.begin(EncounterId::new(), at);
                }
                self.dispatch(&event);
            }
            EventKind::Wipe => {
                self.dispatch(&event);
                self.end(EndReason::Wipe);
            }
            EventKind::Victory => {
                self.dispatch(&event);
                self.end(EndReason::Victory);
            }
            _ => self.dispatch(&event),
        }
    }

    /// Moves the clock to `t` and runs every firing due by then. The clock
    /// never moves backwards.
    pub fn advance_to(&mut self, t: DateTime<Utc>) {
        let now = self.clock.map_or(t, |c| c.max(t));
        self.clock = Some(now);
        if let (Some(set), Some(encounter)) = (self.set.as_deref(), self.encounter.as_mut()) {
            self.dispatcher.run_due(set, &mut encounter.state, now);
        }
    }

    /// Due time of the next scheduled firing.
    pub fn next_due(&mut self) -> Option<DateTime<Utc>> {
        self.dispatcher.next_due()
    }

    /// Delayed firings not yet due.
    #[must_use]
    pub fn pending_firings(&self) -> usize {
        self.dispatcher.pending_firings()
    }

    /// Firings parked on an enrichment request.
    #[must_use]
    pub fn pending_enrichment(&self) -> usize {
        self.dispatcher.in_flight()
    }

    /// Waits for the next enrichment completion. Cancel-safe; pends forever
    /// when nothing is in flight.
    pub async fn next_enrichment(&mut self) -> Option<Completion> {
        self.dispatcher.next_completion().await
    }

    /// Resumes the firing parked on `completion` at the current clock.
    pub fn complete_enrichment(&mut self, completion: Completion) {
        let now = self.now();
        let active = match (self.set.as_deref(), self.encounter.as_mut()) {
            (Some(set), Some(encounter)) => Some((set, &mut encounter.state)),
            _ => None,
        };
        self.dispatcher.complete(active, completion, now);
    }

    /// Applies every completion that has already arrived. Returns how many.
    pub fn pump_enrichment(&mut self) -> usize {
        let mut applied = 0;
        while let Some(completion) = self.dispatcher.try_completion() {
            self.complete_enrichment(completion);
            applied += 1;
        }
        applied
    }

    /// Shared counters. They stay live after the engine moves to a runtime.
    #[must_use]
    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    /// Most recent trigger failures, oldest first.
    #[must_use]
    pub fn recent_failures(&self) -> Vec<TriggerFailure> {
        self.dispatcher.failures().cloned().collect()
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.unwrap_or_else(Utc::now)
    }

    fn begin(&mut self, id: EncounterId, at: DateTime<Utc>) {
        let Some(set) = self.set.as_deref() else {
            return;
        };
        self.encounter = Some(Encounter::begin(id, at, set));
        log::info!(target: "raidcall::engine", "{id} started with set '{}'", set.name());
    }

    fn dispatch(&mut self, event: &Event) {
        match (self.set.as_deref(), self.encounter.as_mut()) {
            (Some(set), Some(encounter)) => self.dispatcher.fan_out(set, &mut encounter.state, event),
            _ => {
                self.stats.events_ignored.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl std::fmt::Debug for TriggerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerEngine")
            .field("set", &self.set.as_ref().map(|s| s.name()))
            .field("encounter", &self.encounter_id())
            .field("clock", &self.clock)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::event::Field;
    use crate::output::{Alert, Response};
    use crate::trigger::{Pattern, Trigger};

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn engine() -> (TriggerEngine, AlertStream) {
        let (sink, stream) = alert_channel(64);
        let mut engine = TriggerEngine::new(EngineConfig::default(), sink).unwrap();
        engine
            .load(
                TriggerSet::new("s").trigger(
                    Trigger::new("aoe")
                        .on(EventKind::CastStarted)
                        .pattern(Pattern::new().exact(Field::AbilityId, "100"))
                        .respond(Response::info("aoe")),
                ),
            )
            .unwrap();
        (engine, stream)
    }

    fn cast(ms: i64) -> Event {
        Event::new(EventKind::CastStarted, at(ms)).with(Field::AbilityId, "100")
    }

    #[test]
    fn idle_engine_ignores_events() {
        let (mut engine, alerts) = engine();
        engine.submit(cast(0));
        assert!(alerts.try_recv().is_none());
        assert_eq!(engine.stats().snapshot().events_ignored, 1);
    }

    #[test]
    fn start_requires_a_set() {
        let (sink, _alerts) = alert_channel(4);
        let mut engine = TriggerEngine::new(EngineConfig::default(), sink).unwrap();
        assert!(matches!(engine.start(EncounterId::new()), Err(EngineError::NoTriggerSet)));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfig {
            alert_queue_capacity: 0,
            ..EngineConfig::default()
        };
        let sink = |_: Alert| true;
        assert!(matches!(TriggerEngine::new(config, sink), Err(EngineError::Config(_))));
    }

    #[test]
    fn combat_started_opens_and_wipe_closes() {
        let (mut engine, alerts) = engine();
        engine.submit(Event::new(EventKind::CombatStarted, at(0)));
        assert!(engine.is_active());
        engine.submit(cast(10));
        assert_eq!(alerts.drain().len(), 1);
        engine.submit(Event::new(EventKind::Wipe, at(20)));
        assert!(!engine.is_active());
        engine.submit(cast(30));
        assert!(alerts.try_recv().is_none());
    }

    #[test]
    fn clock_is_monotonic() {
        let (mut engine, _alerts) = engine();
        engine.advance_to(at(500));
        engine.advance_to(at(100));
        assert_eq!(engine.clock(), Some(at(500)));
    }

    #[test]
    fn reload_resets_the_encounter() {
        let (mut engine, _alerts) = engine();
        engine.start(EncounterId::new()).unwrap();
        let first = engine.trigger_set().unwrap().fingerprint().to_string();
        let fingerprint = engine.load(TriggerSet::new("other")).unwrap();
        assert!(!engine.is_active());
        assert_ne!(first, fingerprint);
    }
}
