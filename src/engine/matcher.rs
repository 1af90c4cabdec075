//! Trigger matching.
//!
//! Matching is two-phase: a structural pattern test against the event, then
//! the trigger's guard over captures and current state. Guards are pure; a
//! guard that errors or panics counts as "did not match".

use crate::event::Event;
use crate::error::TriggerError;
use crate::locale::Locale;
use crate::trigger::{Captures, CompiledTrigger, TriggerContext};

use super::dispatcher::guarded;

/// Outcome of testing one trigger against one event.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MatchOutput {
    NoMatch,
    Match(Captures),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Matcher {
    game_locale: Locale,
}

impl Matcher {
    #[must_use]
    pub(crate) const fn new(game_locale: Locale) -> Self {
        Self { game_locale }
    }

    /// Structural test only. Disabled triggers and foreign kinds never match.
    #[must_use]
    pub(crate) fn pattern(&self, trigger: &CompiledTrigger, event: &Event) -> MatchOutput {
        let def = trigger.definition();
        if def.is_disabled() || !def.kinds().contains(&event.kind) {
            return MatchOutput::NoMatch;
        }
        match trigger.pattern_for(self.game_locale).matches(event) {
            Some(captures) => MatchOutput::Match(captures),
            None => MatchOutput::NoMatch,
        }
    }

    /// Runs the guard, if any. Triggers without a guard always pass.
    pub(crate) fn guard(&self, trigger: &CompiledTrigger, ctx: &TriggerContext<'_>) -> Result<bool, TriggerError> {
        match trigger.definition().guard_fn() {
            None => Ok(true),
            Some(guard) => guarded(|| guard(ctx)),
        }
    }
}
