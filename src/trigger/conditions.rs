//! Canned guards.
//!
//! Each function returns a closure for [`Trigger::guard`](super::Trigger::guard).

use crate::config::Role;
use crate::error::TriggerError;
use crate::event::Field;
use crate::value::StateValue;

use super::definition::TriggerContext;

/// The event's target is the local player.
pub fn target_is_you() -> impl Fn(&TriggerContext<'_>) -> Result<bool, TriggerError> + Send + Sync + Clone + 'static {
    |ctx: &TriggerContext<'_>| Ok(ctx.player().is(ctx.field(Field::Target), ctx.field(Field::TargetId)))
}

/// The event has a target and it is someone else.
pub fn target_is_not_you() -> impl Fn(&TriggerContext<'_>) -> Result<bool, TriggerError> + Send + Sync + Clone + 'static {
    |ctx: &TriggerContext<'_>| {
        let name = ctx.field(Field::Target);
        let id = ctx.field(Field::TargetId);
        Ok((name.is_some() || id.is_some()) && !ctx.player().is(name, id))
    }
}

/// The event's source is the local player.
pub fn caster_is_you() -> impl Fn(&TriggerContext<'_>) -> Result<bool, TriggerError> + Send + Sync + Clone + 'static {
    |ctx: &TriggerContext<'_>| Ok(ctx.player().is(ctx.field(Field::Source), ctx.field(Field::SourceId)))
}

/// Passes when the player has `role`.
pub fn role_is(role: Role) -> impl Fn(&TriggerContext<'_>) -> Result<bool, TriggerError> + Send + Sync + Clone + 'static {
    move |ctx: &TriggerContext<'_>| Ok(ctx.player().role == role)
}

/// State key `key` currently holds `value`.
pub fn state_equals(
    key: impl Into<String>,
    value: impl Into<StateValue>,
) -> impl Fn(&TriggerContext<'_>) -> Result<bool, TriggerError> + Send + Sync + Clone + 'static {
    let key = key.into();
    let value = value.into();
    move |ctx: &TriggerContext<'_>| Ok(ctx.state().get(&key) == Some(&value))
}

/// State key `key` is unset.
pub fn state_missing(
    key: impl Into<String>,
) -> impl Fn(&TriggerContext<'_>) -> Result<bool, TriggerError> + Send + Sync + Clone + 'static {
    let key = key.into();
    move |ctx: &TriggerContext<'_>| Ok(!ctx.state().contains(&key))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::config::PlayerContext;
    use crate::event::{Event, EventKind};
    use crate::state::{EncounterState, StateView};
    use crate::trigger::definition::TriggerId;
    use crate::trigger::pattern::Captures;

    fn check<F>(guard: F, event: &Event, state: &EncounterState) -> bool
    where
        F: Fn(&TriggerContext<'_>) -> Result<bool, TriggerError>,
    {
        let captures = Captures::of(event);
        let view = StateView::new(state, "t");
        let id = TriggerId::new("t");
        let player = PlayerContext::new("Tank One", "10FF0001", Role::Tank);
        let ctx = TriggerContext {
            trigger_id: &id,
            captures: &captures,
            state: &view,
            player: &player,
            enrichment: None,
            now: event.timestamp,
        };
        guard(&ctx).unwrap()
    }

    fn ability(source: &str, target: &str) -> Event {
        Event::new(EventKind::AbilityUsed, Utc::now())
            .with(Field::Source, source)
            .with(Field::Target, target)
    }

    #[test]
    fn target_and_caster_checks() {
        let state = EncounterState::new();
        let on_me = ability("Hesperos", "Tank One");
        let on_other = ability("Tank One", "Healer Two");

        assert!(check(target_is_you(), &on_me, &state));
        assert!(!check(target_is_you(), &on_other, &state));
        assert!(check(target_is_not_you(), &on_other, &state));
        assert!(!check(target_is_not_you(), &on_me, &state));
        assert!(check(caster_is_you(), &on_other, &state));

        let untargeted = Event::new(EventKind::AbilityUsed, Utc::now());
        assert!(!check(target_is_not_you(), &untargeted, &state));
    }

    #[test]
    fn role_and_state_checks() {
        let mut state = EncounterState::new();
        let event = ability("Hesperos", "Tank One");
        assert!(check(role_is(Role::Tank), &event, &state));
        assert!(!check(role_is(Role::Healer), &event, &state));

        assert!(check(state_missing("phase"), &event, &state));
        state.set("phase", StateValue::from("advanced"));
        assert!(check(state_equals("phase", "advanced"), &event, &state));
        assert!(!check(state_equals("phase", "door"), &event, &state));
        assert!(!check(state_missing("phase"), &event, &state));
    }
}
