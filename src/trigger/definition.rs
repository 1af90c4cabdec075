//! Trigger definitions.
//!
//! A [`Trigger`] is pure configuration plus step closures: which event kinds
//! it listens to, a structural pattern, an optional guard, a timing policy,
//! mutation steps before and after firing, an optional enrichment query and an
//! output step. Triggers hold no state of their own; everything persistent
//! lives in the encounter state store.
//!
//! Every step closure returns `Result<_, TriggerError>`. The engine also
//! catches panics from steps, so a misbehaving trigger only loses its own
//! firing.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PlayerContext;
use crate::engine::enrichment::{EnrichmentOutcome, EnrichmentQuery};
use crate::error::TriggerError;
use crate::event::{EventKind, Field};
use crate::locale::Locale;
use crate::output::{Response, Template, TemplateCatalog};
use crate::state::StateView;

use super::pattern::{Captures, Pattern};

/// Human-readable trigger id, unique within a loaded set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerId(String);

impl TriggerId {
    /// Wraps an id string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TriggerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TriggerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Read-only view handed to guard, delay, query and output steps.
pub struct TriggerContext<'a> {
    pub(crate) trigger_id: &'a TriggerId,
    pub(crate) captures: &'a Captures,
    pub(crate) state: &'a StateView<'a>,
    pub(crate) player: &'a PlayerContext,
    pub(crate) enrichment: Option<&'a EnrichmentOutcome>,
    pub(crate) now: DateTime<Utc>,
}

impl<'a> TriggerContext<'a> {
    /// Id of the trigger being evaluated.
    #[must_use]
    pub const fn trigger_id(&self) -> &'a TriggerId {
        self.trigger_id
    }

    /// Field values captured when the trigger matched.
    #[must_use]
    pub const fn captures(&self) -> &'a Captures {
        self.captures
    }

    /// Shorthand for `captures().get(field)`.
    #[must_use]
    pub fn field(&self, field: Field) -> Option<&'a str> {
        self.captures.get(field)
    }

    /// Encounter state, including this trigger's own pending writes.
    #[must_use]
    pub const fn state(&self) -> &'a StateView<'a> {
        self.state
    }

    /// The local player.
    #[must_use]
    pub const fn player(&self) -> &'a PlayerContext {
        self.player
    }

    /// Enrichment outcome; only set for the output step of a trigger with a
    /// query.
    #[must_use]
    pub const fn enrichment(&self) -> Option<&'a EnrichmentOutcome> {
        self.enrichment
    }

    /// Engine time of the current unit of work.
    #[must_use]
    pub const fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

/// Mutable view handed to pre-fire and post-fire mutation steps.
pub struct MutationContext<'a, 'b> {
    pub(crate) trigger_id: &'a TriggerId,
    pub(crate) captures: &'a Captures,
    pub(crate) state: &'a mut StateView<'b>,
    pub(crate) player: &'a PlayerContext,
    pub(crate) enrichment: Option<&'a EnrichmentOutcome>,
    pub(crate) now: DateTime<Utc>,
}

impl<'b> MutationContext<'_, 'b> {
    /// Id of the trigger being run.
    #[must_use]
    pub fn trigger_id(&self) -> &TriggerId {
        self.trigger_id
    }

    /// Fields captured at match time.
    #[must_use]
    pub fn captures(&self) -> &Captures {
        self.captures
    }

    /// Shorthand for `captures().get(field)`.
    #[must_use]
    pub fn field(&self, field: Field) -> Option<&str> {
        self.captures.get(field)
    }

    /// Read access to state, including this step's own writes.
    #[must_use]
    pub fn state(&self) -> &StateView<'b> {
        &*self.state
    }

    /// Stages writes that commit when the unit ends.
    pub fn state_mut(&mut self) -> &mut StateView<'b> {
        &mut *self.state
    }

    /// The local player.
    #[must_use]
    pub fn player(&self) -> &PlayerContext {
        self.player
    }

    /// Enrichment outcome, for post-fire steps of enriched triggers.
    #[must_use]
    pub fn enrichment(&self) -> Option<&EnrichmentOutcome> {
        self.enrichment
    }

    /// Engine time of this unit.
    #[must_use]
    pub const fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

/// Guard: a pure decision over state and captures.
pub type GuardFn = Arc<dyn Fn(&TriggerContext<'_>) -> Result<bool, TriggerError> + Send + Sync>;
/// Computes a delay or duration from captures.
pub type SpanFn = Arc<dyn Fn(&TriggerContext<'_>) -> Result<Duration, TriggerError> + Send + Sync>;
/// Builds an enrichment query at match time; `None` skips enrichment.
pub type QueryFn = Arc<dyn Fn(&TriggerContext<'_>) -> Result<Option<EnrichmentQuery>, TriggerError> + Send + Sync>;
/// Mutation step.
pub type MutateFn = Arc<dyn Fn(&mut MutationContext<'_, '_>) -> Result<(), TriggerError> + Send + Sync>;
/// Output step; `None` means no output this time.
pub type OutputFn = Arc<dyn Fn(&TriggerContext<'_>) -> Result<Option<Response>, TriggerError> + Send + Sync>;

/// A fixed span or one computed from the matched event.
#[derive(Clone)]
pub enum Span {
    /// Constant span.
    Fixed(Duration),
    /// Span computed from the trigger context.
    Computed(SpanFn),
}

impl Span {
    /// Seconds taken from a numeric field, e.g. a cast time.
    #[must_use]
    pub fn from_field(field: Field) -> Self {
        Self::Computed(Arc::new(move |ctx: &TriggerContext<'_>| {
            let secs = ctx.captures().number(field)?;
            Duration::try_from_secs_f64(secs.max(0.0)).map_err(|e| TriggerError::failed(e.to_string()))
        }))
    }

    pub(crate) fn evaluate(&self, ctx: &TriggerContext<'_>) -> Result<Duration, TriggerError> {
        match self {
            Self::Fixed(d) => Ok(*d),
            Self::Computed(f) => f(ctx),
        }
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(d) => f.debug_tuple("Fixed").field(d).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Delay, display duration, suppression window and countdown flag.
#[derive(Debug, Clone, Default)]
pub struct TimingPolicy {
    /// Time from match to firing.
    pub delay: Option<Span>,
    /// How long the rendered output stays up.
    pub duration: Option<Span>,
    /// Window after an accepted match during which further matches are dropped.
    pub suppress: Option<Duration>,
    /// A new match cancels and replaces this trigger's pending firing.
    pub countdown: bool,
}

/// One trigger definition.
///
/// ```
/// use std::time::Duration;
/// use raidcall::event::{EventKind, Field};
/// use raidcall::output::{Response, Template};
/// use raidcall::trigger::{Pattern, Trigger};
///
/// let trigger = Trigger::new("P4N Well Pinax")
///     .on(EventKind::CastStarted)
///     .pattern(Pattern::new().exact(Field::AbilityId, "6A3E"))
///     .delay(Duration::from_secs(4))
///     .template("text", Template::new().en("Middle Knockback").de("Rückstoß von der Mitte"))
///     .respond(Response::warning("text"));
/// assert_eq!(trigger.id().as_str(), "P4N Well Pinax");
/// ```
#[derive(Clone)]
pub struct Trigger {
    id: TriggerId,
    kinds: Vec<EventKind>,
    pattern: Pattern,
    localized: BTreeMap<Locale, Pattern>,
    guard: Option<GuardFn>,
    timing: TimingPolicy,
    query: Option<QueryFn>,
    pre_run: Vec<MutateFn>,
    run: Vec<MutateFn>,
    output: Option<OutputFn>,
    outputs: TemplateCatalog,
    disabled: bool,
}

impl Trigger {
    /// New trigger with no event kinds; add them with [`Trigger::on`].
    #[must_use]
    pub fn new(id: impl Into<TriggerId>) -> Self {
        Self {
            id: id.into(),
            kinds: Vec::new(),
            pattern: Pattern::new(),
            localized: BTreeMap::new(),
            guard: None,
            timing: TimingPolicy::default(),
            query: None,
            pre_run: Vec::new(),
            run: Vec::new(),
            output: None,
            outputs: TemplateCatalog::new(),
            disabled: false,
        }
    }

    /// Listens to `kind` (may be called more than once).
    #[must_use]
    pub fn on(mut self, kind: EventKind) -> Self {
        if !self.kinds.contains(&kind) {
            self.kinds.push(kind);
        }
        self
    }

    /// Structural pattern every event must satisfy.
    #[must_use]
    pub fn pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Pattern to use instead when the log is written in `locale`.
    #[must_use]
    pub fn pattern_for(mut self, locale: Locale, pattern: Pattern) -> Self {
        self.localized.insert(locale, pattern);
        self
    }

    /// Pure condition over captures and state, checked after the pattern.
    #[must_use]
    pub fn guard<F>(mut self, f: F) -> Self
    where
        F: Fn(&TriggerContext<'_>) -> Result<bool, TriggerError> + Send + Sync + 'static,
    {
        self.guard = Some(Arc::new(f));
        self
    }

    /// Fires this long after the match.
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.timing.delay = Some(Span::Fixed(delay));
        self
    }

    /// Delay computed from the matched event.
    #[must_use]
    pub fn delay_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&TriggerContext<'_>) -> Result<Duration, TriggerError> + Send + Sync + 'static,
    {
        self.timing.delay = Some(Span::Computed(Arc::new(f)));
        self
    }

    /// How long the emitted output stays active.
    #[must_use]
    pub fn duration(mut self, duration: Duration) -> Self {
        self.timing.duration = Some(Span::Fixed(duration));
        self
    }

    /// Display duration computed at fire time.
    #[must_use]
    pub fn duration_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&TriggerContext<'_>) -> Result<Duration, TriggerError> + Send + Sync + 'static,
    {
        self.timing.duration = Some(Span::Computed(Arc::new(f)));
        self
    }

    /// Replaces the whole timing policy.
    #[must_use]
    pub fn timing(mut self, timing: TimingPolicy) -> Self {
        self.timing = timing;
        self
    }

    /// Drops further matches for this long after an accepted match.
    ///
    /// The window opens when the match is accepted, before any delay or
    /// enrichment. A firing that later fails at output, duration or
    /// resolution still keeps the window open.
    #[must_use]
    pub fn suppress(mut self, window: Duration) -> Self {
        self.timing.suppress = Some(window);
        self
    }

    /// Marks the trigger as a single ongoing countdown.
    #[must_use]
    pub fn countdown(mut self) -> Self {
        self.timing.countdown = true;
        self
    }

    /// Captures an enrichment query at match time. The output step runs once
    /// the query resolves, fails or times out.
    #[must_use]
    pub fn enrich<F>(mut self, f: F) -> Self
    where
        F: Fn(&TriggerContext<'_>) -> Result<Option<EnrichmentQuery>, TriggerError> + Send + Sync + 'static,
    {
        self.query = Some(Arc::new(f));
        self
    }

    /// Adds a mutation step run after the guard, before any delay.
    #[must_use]
    pub fn pre_run<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut MutationContext<'_, '_>) -> Result<(), TriggerError> + Send + Sync + 'static,
    {
        self.pre_run.push(Arc::new(f));
        self
    }

    /// Adds a mutation step run after output.
    #[must_use]
    pub fn run<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut MutationContext<'_, '_>) -> Result<(), TriggerError> + Send + Sync + 'static,
    {
        self.run.push(Arc::new(f));
        self
    }

    /// Output step producing the response at fire time.
    #[must_use]
    pub fn output<F>(mut self, f: F) -> Self
    where
        F: Fn(&TriggerContext<'_>) -> Result<Option<Response>, TriggerError> + Send + Sync + 'static,
    {
        self.output = Some(Arc::new(f));
        self
    }

    /// Always responds with `response`.
    #[must_use]
    pub fn respond(self, response: Response) -> Self {
        self.output(move |_| Ok(Some(response.clone())))
    }

    /// Adds a trigger-local template.
    #[must_use]
    pub fn template(mut self, key: impl Into<String>, template: Template) -> Self {
        self.outputs.insert(key, template);
        self
    }

    /// Keeps the trigger loaded but never matches it.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Trigger id.
    #[must_use]
    pub const fn id(&self) -> &TriggerId {
        &self.id
    }

    /// Event kinds this trigger listens to.
    #[must_use]
    pub fn kinds(&self) -> &[EventKind] {
        &self.kinds
    }

    /// The pattern for `locale`, falling back to the base pattern.
    #[must_use]
    pub fn pattern_in(&self, locale: Locale) -> &Pattern {
        self.localized.get(&locale).unwrap_or(&self.pattern)
    }

    pub(crate) fn patterns(&self) -> impl Iterator<Item = (Option<Locale>, &Pattern)> {
        std::iter::once((None, &self.pattern)).chain(self.localized.iter().map(|(l, p)| (Some(*l), p)))
    }

    /// Delay, suppression, duration and countdown settings.
    #[must_use]
    pub const fn timing_policy(&self) -> &TimingPolicy {
        &self.timing
    }

    /// Disabled triggers are skipped at load.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Templates visible only to this trigger.
    #[must_use]
    pub const fn local_templates(&self) -> &TemplateCatalog {
        &self.outputs
    }

    pub(crate) const fn guard_fn(&self) -> Option<&GuardFn> {
        self.guard.as_ref()
    }

    pub(crate) const fn query_fn(&self) -> Option<&QueryFn> {
        self.query.as_ref()
    }

    pub(crate) fn pre_run_fns(&self) -> &[MutateFn] {
        &self.pre_run
    }

    pub(crate) fn run_fns(&self) -> &[MutateFn] {
        &self.run
    }

    pub(crate) const fn output_fn(&self) -> Option<&OutputFn> {
        self.output.as_ref()
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("id", &self.id)
            .field("kinds", &self.kinds)
            .field("pattern", &self.pattern)
            .field("localized", &self.localized.keys().collect::<Vec<_>>())
            .field("guard", &self.guard.is_some())
            .field("timing", &self.timing)
            .field("query", &self.query.is_some())
            .field("pre_run", &self.pre_run.len())
            .field("run", &self.run.len())
            .field("output", &self.output.is_some())
            .field("disabled", &self.disabled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::state::EncounterState;

    #[test]
    fn builder_collects_kinds_once() {
        let t = Trigger::new("E12S Promise Statue")
            .on(EventKind::CombatantAdded)
            .on(EventKind::CombatantAdded)
            .on(EventKind::AbilityUsed);
        assert_eq!(t.kinds(), &[EventKind::CombatantAdded, EventKind::AbilityUsed]);
        assert!(!t.is_disabled());
        assert!(t.clone().disabled().is_disabled());
    }

    #[test]
    fn localized_pattern_overrides_base() {
        let t = Trigger::new("P4N Elegant Evisceration")
            .on(EventKind::CastStarted)
            .pattern(Pattern::new().exact(Field::Source, "Hesperos"))
            .pattern_for(Locale::Fr, Pattern::new().exact(Field::Source, "Hespéros"));
        assert_eq!(t.pattern_in(Locale::Fr), &Pattern::new().exact(Field::Source, "Hespéros"));
        assert_eq!(t.pattern_in(Locale::De), &Pattern::new().exact(Field::Source, "Hesperos"));
        assert_eq!(t.patterns().count(), 2);
    }

    #[test]
    fn span_from_field_reads_cast_time() {
        let event = Event::new(EventKind::CastStarted, Utc::now()).with(Field::CastTime, "2.5");
        let captures = Captures::of(&event);
        let state = EncounterState::new();
        let view = StateView::new(&state, "t");
        let id = TriggerId::new("t");
        let player = PlayerContext::default();
        let ctx = TriggerContext {
            trigger_id: &id,
            captures: &captures,
            state: &view,
            player: &player,
            enrichment: None,
            now: event.timestamp,
        };
        let span = Span::from_field(Field::CastTime);
        assert_eq!(span.evaluate(&ctx).unwrap(), Duration::from_millis(2500));

        let missing = Span::from_field(Field::Duration);
        assert_eq!(
            missing.evaluate(&ctx).unwrap_err(),
            TriggerError::MissingCapture { field: Field::Duration }
        );
    }
}
