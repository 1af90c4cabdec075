//! Per-event fan-out and the firing pipeline.
//!
//! Work happens in units: one event's fan-out, one scheduled firing, or one
//! enrichment continuation. Inside a unit every trigger sees the committed
//! store plus its own pending writes; the unit's writes commit, in trigger
//! order, when it ends.
//!
//! A step that errors or panics is recorded against its trigger and that
//! trigger produces nothing for this unit. Sibling triggers are unaffected.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, PlayerContext};
use crate::error::TriggerError;
use crate::event::{Event, EventKind};
use crate::locale::Locale;
use crate::output::{Alert, AlertId, MessageBody, RenderablePayload};
use crate::state::{EncounterState, StateView, StateWrite};
use crate::trigger::{Captures, LoadedTriggerSet, MutationContext, TriggerContext, TriggerId};

use super::enrichment::{Completion, EnrichmentBroker, EnrichmentGateway, EnrichmentOutcome, EnrichmentQuery};
use super::matcher::{MatchOutput, Matcher};
use super::scheduler::{ScheduledFiring, Scheduler};
use super::stream::AlertSink;
use super::EngineStats;

/// Runs a trigger step, converting a panic into [`TriggerError::Panicked`].
pub(crate) fn guarded<T>(step: impl FnOnce() -> Result<T, TriggerError>) -> Result<T, TriggerError> {
    match panic::catch_unwind(AssertUnwindSafe(step)) {
        Ok(result) => result,
        Err(payload) => Err(TriggerError::Panicked {
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// `t + d`, saturating at the end of representable time.
pub(crate) fn after(t: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| t.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Pipeline step a failure happened in.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Guard,
    PreRun,
    Delay,
    Query,
    Output,
    Duration,
    Resolve,
    Run,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Guard => "guard",
            Self::PreRun => "pre-run",
            Self::Delay => "delay",
            Self::Query => "query",
            Self::Output => "output",
            Self::Duration => "duration",
            Self::Resolve => "resolve",
            Self::Run => "run",
        })
    }
}

/// One recorded trigger failure.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerFailure {
    pub trigger_id: TriggerId,
    pub stage: Stage,
    pub event_kind: EventKind,
    pub at: DateTime<Utc>,
    pub error: String,
}

/// A firing parked on an enrichment request.
#[derive(Debug)]
pub(crate) struct Continuation {
    trigger: usize,
    trigger_id: TriggerId,
    captures: Captures,
}

pub(crate) struct Dispatcher {
    matcher: Matcher,
    player: PlayerContext,
    display_locale: Locale,
    scheduler: Scheduler,
    broker: EnrichmentBroker<Continuation>,
    sink: Box<dyn AlertSink>,
    stats: Arc<EngineStats>,
    failures: VecDeque<TriggerFailure>,
    failure_history: usize,
    next_alert: u64,
}

impl Dispatcher {
    pub(crate) fn new(config: &EngineConfig, sink: Box<dyn AlertSink>, stats: Arc<EngineStats>) -> Self {
        Self {
            matcher: Matcher::new(config.game_locale),
            player: config.player.clone(),
            display_locale: config.display_locale,
            scheduler: Scheduler::new(),
            broker: EnrichmentBroker::new(config.enrichment_timeout()),
            sink,
            stats,
            failures: VecDeque::with_capacity(config.failure_history),
            failure_history: config.failure_history,
            next_alert: 0,
        }
    }

    pub(crate) fn set_gateway(&mut self, gateway: Arc<dyn EnrichmentGateway>) {
        self.broker.set_gateway(gateway);
    }

    pub(crate) fn has_gateway(&self) -> bool {
        self.broker.has_gateway()
    }

    pub(crate) fn next_due(&mut self) -> Option<DateTime<Utc>> {
        self.scheduler.next_due()
    }

    pub(crate) fn pending_firings(&self) -> usize {
        self.scheduler.pending()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.broker.in_flight()
    }

    pub(crate) fn try_completion(&mut self) -> Option<Completion> {
        self.broker.try_next()
    }

    pub(crate) async fn next_completion(&mut self) -> Option<Completion> {
        self.broker.next().await
    }

    pub(crate) fn failures(&self) -> impl Iterator<Item = &TriggerFailure> {
        self.failures.iter()
    }

    /// Drops every pending firing and in-flight request.
    pub(crate) fn teardown(&mut self) {
        let cancelled = self.scheduler.clear() + self.broker.abort_all();
        self.stats.firings_cancelled.fetch_add(cancelled as u64, Ordering::Relaxed);
    }

    /// Fans `event` out to every listening trigger in definition order.
    pub(crate) fn fan_out(&mut self, set: &LoadedTriggerSet, state: &mut EncounterState, event: &Event) {
        let listeners = set.listening_to(event.kind);
        let mut writes = Vec::new();
        for &index in listeners {
            writes.extend(self.evaluate(set, state, index, event));
        }
        log::trace!(
            target: "raidcall::dispatcher",
            "{:?} event fanned out to {} trigger(s), {} write(s)",
            event.kind,
            listeners.len(),
            writes.len()
        );
        state.apply(writes);
    }

    /// Fires everything due at or before `now`, one unit per firing.
    pub(crate) fn run_due(&mut self, set: &LoadedTriggerSet, state: &mut EncounterState, now: DateTime<Utc>) -> usize {
        let mut fired = 0;
        while let Some(firing) = self.scheduler.pop_due(now) {
            let writes = {
                let view = StateView::new(state, firing.trigger_id.as_str());
                self.begin_firing(set, firing.trigger, firing.captures, firing.query, firing.due, view)
            };
            state.apply(writes);
            fired += 1;
        }
        fired
    }

    /// Resumes the firing parked on `completion`, if it is still wanted.
    pub(crate) fn complete(
        &mut self,
        active: Option<(&LoadedTriggerSet, &mut EncounterState)>,
        completion: Completion,
        now: DateTime<Utc>,
    ) {
        let Some(cont) = self.broker.take(completion.ticket) else {
            self.stats.stale_completions.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                target: "raidcall::enrichment",
                "discarding stale completion for {}",
                completion.ticket
            );
            return;
        };
        let Some((set, state)) = active else {
            self.stats.stale_completions.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if completion.outcome == EnrichmentOutcome::TimedOut {
            self.stats.enrichment_timeouts.fetch_add(1, Ordering::Relaxed);
        }
        let writes = {
            let mut view = StateView::new(state, cont.trigger_id.as_str());
            self.fire(set, cont.trigger, &cont.captures, Some(&completion.outcome), now, &mut view);
            view.into_writes()
        };
        state.apply(writes);
    }

    /// Match-time half of the pipeline for one trigger. Returns the writes to
    /// commit at the end of the unit.
    fn evaluate(&mut self, set: &LoadedTriggerSet, state: &EncounterState, index: usize, event: &Event) -> Vec<StateWrite> {
        let trigger = &set.triggers()[index];
        let def = trigger.definition();
        let id = trigger.id();
        let now = event.timestamp;

        let MatchOutput::Match(captures) = self.matcher.pattern(trigger, event) else {
            return Vec::new();
        };
        if self.scheduler.is_suppressed(id, now) {
            self.stats.suppressed.fetch_add(1, Ordering::Relaxed);
            log::debug!(target: "raidcall::dispatcher", "trigger '{id}' suppressed");
            return Vec::new();
        }

        let mut view = StateView::new(state, id.as_str());

        let pass = {
            let ctx = TriggerContext {
                trigger_id: id,
                captures: &captures,
                state: &view,
                player: &self.player,
                enrichment: None,
                now,
            };
            self.matcher.guard(trigger, &ctx)
        };
        match pass {
            Ok(true) => {}
            Ok(false) => return Vec::new(),
            Err(e) => {
                self.fail(id, Stage::Guard, event.kind, now, &e);
                return Vec::new();
            }
        }
        self.stats.triggers_matched.fetch_add(1, Ordering::Relaxed);

        for step in def.pre_run_fns() {
            let result = {
                let mut ctx = MutationContext {
                    trigger_id: id,
                    captures: &captures,
                    state: &mut view,
                    player: &self.player,
                    enrichment: None,
                    now,
                };
                guarded(|| step(&mut ctx))
            };
            if let Err(e) = result {
                self.fail(id, Stage::PreRun, event.kind, now, &e);
                return Vec::new();
            }
        }

        let timing = def.timing_policy();
        let (delay, query) = {
            let ctx = TriggerContext {
                trigger_id: id,
                captures: &captures,
                state: &view,
                player: &self.player,
                enrichment: None,
                now,
            };
            let delay = timing
                .delay
                .as_ref()
                .map_or(Ok(Duration::ZERO), |span| guarded(|| span.evaluate(&ctx)));
            let query = def.query_fn().map_or(Ok(None), |q| guarded(|| q(&ctx)));
            (delay, query)
        };
        let delay = match delay {
            Ok(d) => d,
            Err(e) => {
                self.fail(id, Stage::Delay, event.kind, now, &e);
                return Vec::new();
            }
        };
        let query = match query {
            Ok(q) => q,
            Err(e) => {
                self.fail(id, Stage::Query, event.kind, now, &e);
                return Vec::new();
            }
        };

        if let Some(window) = timing.suppress {
            self.scheduler.suppress_until(id.clone(), after(now, window));
        }
        if timing.countdown {
            let replaced = self.scheduler.cancel(id) + self.broker.abort_where(|c| &c.trigger_id == id);
            if replaced > 0 {
                self.stats.firings_cancelled.fetch_add(replaced as u64, Ordering::Relaxed);
                log::debug!(
                    target: "raidcall::dispatcher",
                    "countdown '{id}' replaced {replaced} pending firing(s)"
                );
            }
        }

        if delay.is_zero() {
            return self.begin_firing(set, index, captures, query, now, view);
        }
        self.scheduler.schedule(ScheduledFiring {
            trigger: index,
            trigger_id: id.clone(),
            matched_at: now,
            due: after(now, delay),
            captures,
            query,
        });
        self.stats.firings_scheduled.fetch_add(1, Ordering::Relaxed);
        view.into_writes()
    }

    /// Fires now, or parks the firing on an enrichment request.
    fn begin_firing(
        &mut self,
        set: &LoadedTriggerSet,
        index: usize,
        captures: Captures,
        query: Option<EnrichmentQuery>,
        now: DateTime<Utc>,
        mut view: StateView<'_>,
    ) -> Vec<StateWrite> {
        let Some(query) = query else {
            self.fire(set, index, &captures, None, now, &mut view);
            return view.into_writes();
        };

        self.stats.enrichment_requests.fetch_add(1, Ordering::Relaxed);
        let cont = Continuation {
            trigger: index,
            trigger_id: set.triggers()[index].id().clone(),
            captures,
        };
        match self.broker.request(query, cont) {
            Ok(ticket) => {
                log::debug!(
                    target: "raidcall::enrichment",
                    "trigger '{}' waiting on {ticket}",
                    set.triggers()[index].id()
                );
            }
            Err((cont, outcome)) => {
                self.fire(set, index, &cont.captures, Some(&outcome), now, &mut view);
            }
        }
        view.into_writes()
    }

    /// Fire-time half of the pipeline: output, resolution, emission, post-run.
    fn fire(
        &mut self,
        set: &LoadedTriggerSet,
        index: usize,
        captures: &Captures,
        enrichment: Option<&EnrichmentOutcome>,
        now: DateTime<Utc>,
        view: &mut StateView<'_>,
    ) {
        let trigger = &set.triggers()[index];
        let def = trigger.definition();
        let id = trigger.id();
        let kind = captures.kind();

        let (response, duration) = {
            let ctx = TriggerContext {
                trigger_id: id,
                captures,
                state: &*view,
                player: &self.player,
                enrichment,
                now,
            };
            let response = def.output_fn().map_or(Ok(None), |out| guarded(|| out(&ctx)));
            let duration = def
                .timing_policy()
                .duration
                .as_ref()
                .map_or(Ok(None), |span| guarded(|| span.evaluate(&ctx)).map(Some));
            (response, duration)
        };
        let response = match response {
            Ok(r) => r,
            Err(e) => {
                self.fail(id, Stage::Output, kind, now, &e);
                return;
            }
        };
        let duration = match duration {
            Ok(d) => d,
            Err(e) => {
                self.fail(id, Stage::Duration, kind, now, &e);
                return;
            }
        };

        if let Some(response) = response {
            let mut payloads = Vec::with_capacity(response.messages().len());
            for message in response.into_emission_order() {
                let resolved = match message.body {
                    MessageBody::Template { key, params } => set.resolver().resolve_scoped(
                        Some(def.local_templates()),
                        message.severity,
                        &key,
                        &params,
                        self.display_locale,
                    ),
                    MessageBody::Literal(text) => Ok(RenderablePayload {
                        severity: message.severity,
                        text,
                        locale: self.display_locale,
                        duration: None,
                    }),
                };
                match resolved {
                    Ok(mut payload) => {
                        payload.duration = duration;
                        payloads.push(payload);
                    }
                    Err(e) => {
                        self.fail(id, Stage::Resolve, kind, now, &e);
                        return;
                    }
                }
            }
            self.emit(id, def.timing_policy().countdown, payloads, now, duration);
        }

        for step in def.run_fns() {
            let mut fork = view.clone();
            let result = {
                let mut ctx = MutationContext {
                    trigger_id: id,
                    captures,
                    state: &mut fork,
                    player: &self.player,
                    enrichment,
                    now,
                };
                guarded(|| step(&mut ctx))
            };
            match result {
                Ok(()) => *view = fork,
                Err(e) => {
                    self.fail(id, Stage::Run, kind, now, &e);
                    break;
                }
            }
        }
    }

    fn emit(
        &mut self,
        trigger_id: &TriggerId,
        countdown: bool,
        payloads: Vec<RenderablePayload>,
        now: DateTime<Utc>,
        duration: Option<Duration>,
    ) {
        let supersedes = if countdown {
            self.scheduler.active_countdown(trigger_id, now)
        } else {
            None
        };
        if let Some(previous) = supersedes {
            log::debug!(target: "raidcall::dispatcher", "countdown '{trigger_id}' supersedes {previous}");
        }

        let mut first = None;
        for payload in payloads {
            self.next_alert += 1;
            let id = AlertId(self.next_alert);
            first.get_or_insert(id);
            let alert = Alert {
                id,
                trigger_id: trigger_id.clone(),
                emitted_at: now,
                payload,
                supersedes,
            };
            if self.sink.deliver(alert) {
                self.stats.alerts_emitted.fetch_add(1, Ordering::Relaxed);
            } else {
                self.stats.alerts_dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!(target: "raidcall::dispatcher", "alert sink full; dropped {id} from '{trigger_id}'");
            }
        }

        if countdown {
            if let (Some(first), Some(duration)) = (first, duration) {
                self.scheduler.set_countdown(trigger_id.clone(), first, after(now, duration));
            }
        }
    }

    fn fail(&mut self, trigger_id: &TriggerId, stage: Stage, event_kind: EventKind, at: DateTime<Utc>, error: &dyn fmt::Display) {
        self.stats.trigger_failures.fetch_add(1, Ordering::Relaxed);
        log::warn!(
            target: "raidcall::dispatcher",
            "trigger '{trigger_id}' failed at {stage} on {event_kind:?} event: {error}"
        );
        if self.failure_history == 0 {
            return;
        }
        if self.failures.len() == self.failure_history {
            self.failures.pop_front();
        }
        self.failures.push_back(TriggerFailure {
            trigger_id: trigger_id.clone(),
            stage,
            event_kind,
            at,
            error: error.to_string(),
        });
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("matcher", &self.matcher)
            .field("scheduler", &self.scheduler)
            .field("broker", &self.broker)
            .field("failures", &self.failures.len())
            .field("next_alert", &self.next_alert)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_converts_panics() {
        let err = guarded::<()>(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(
            err,
            TriggerError::Panicked {
                message: "boom 7".to_string(),
            }
        );
        assert_eq!(guarded(|| Ok(3)).unwrap(), 3);
        assert_eq!(
            guarded::<()>(|| Err(TriggerError::failed("no"))).unwrap_err(),
            TriggerError::failed("no")
        );
    }

    #[test]
    fn after_saturates() {
        let t = Utc::now();
        assert_eq!(after(t, Duration::from_secs(5)), t + chrono::Duration::seconds(5));
        assert_eq!(after(t, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }
}
