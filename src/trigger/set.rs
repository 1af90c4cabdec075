//! Trigger sets and load-time validation.
//!
//! A [`TriggerSet`] is authored data. [`TriggerSet::load`] checks the whole
//! set and either returns a [`LoadedTriggerSet`] ready for dispatch or a
//! [`LoadError`] listing every violation. Nothing is partially loaded.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{LoadError, LoadViolation};
use crate::event::{EventKind, ZoneId};
use crate::locale::Locale;
use crate::output::{OutputResolver, Template, TemplateCatalog};
use crate::value::StateValue;

use super::definition::{Span, Trigger, TriggerId};
use super::pattern::CompiledPattern;
use super::responses;

/// Authored collection of triggers for one encounter.
#[derive(Debug, Clone)]
pub struct TriggerSet {
    name: String,
    zone: Option<ZoneId>,
    initial_state: Vec<(String, StateValue)>,
    templates: TemplateCatalog,
    triggers: Vec<Trigger>,
}

impl TriggerSet {
    /// Empty set.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            zone: None,
            initial_state: Vec::new(),
            templates: TemplateCatalog::new(),
            triggers: Vec::new(),
        }
    }

    /// Binds the set to a zone; lifecycle events from other zones do not
    /// start an encounter.
    #[must_use]
    pub fn zone(mut self, zone: ZoneId) -> Self {
        self.zone = Some(zone);
        self
    }

    /// Seeds a state key at every encounter start.
    #[must_use]
    pub fn initial(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.initial_state.push((key.into(), value.into()));
        self
    }

    /// Adds a set-level template.
    #[must_use]
    pub fn template(mut self, key: impl Into<String>, template: Template) -> Self {
        self.templates.insert(key, template);
        self
    }

    /// Appends a trigger (builder pattern).
    #[must_use]
    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// Set name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    /// True when there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Validates and compiles the set.
    pub fn load(self, default_locale: Locale) -> Result<LoadedTriggerSet, LoadError> {
        let mut violations = Vec::new();

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        let mut first_seen: Vec<&str> = Vec::new();
        for (index, trigger) in self.triggers.iter().enumerate() {
            let id = trigger.id().as_str();
            if id.trim().is_empty() {
                violations.push(LoadViolation::EmptyTriggerId { index });
                continue;
            }
            let count = counts.entry(id).or_insert(0);
            if *count == 0 {
                first_seen.push(id);
            }
            *count += 1;
        }
        for id in first_seen {
            let count = counts[id];
            if count > 1 {
                violations.push(LoadViolation::DuplicateTriggerId {
                    id: id.to_string(),
                    count,
                });
            }
        }

        let mut compiled = Vec::with_capacity(self.triggers.len());
        for trigger in &self.triggers {
            let id = trigger.id().to_string();
            if trigger.kinds().is_empty() {
                violations.push(LoadViolation::EmptyEventKinds { trigger: id.clone() });
            }

            let mut base = None;
            let mut localized = BTreeMap::new();
            for (locale, pattern) in trigger.patterns() {
                for (field, _) in pattern.fields() {
                    for &kind in trigger.kinds() {
                        if !kind.carries(field) {
                            violations.push(LoadViolation::FieldNotApplicable {
                                trigger: id.clone(),
                                field,
                                kind,
                            });
                        }
                    }
                }
                match pattern.compile() {
                    Ok(c) => match locale {
                        None => base = Some(c),
                        Some(l) => {
                            localized.insert(l, c);
                        }
                    },
                    Err(invalid) => {
                        for (field, reason) in invalid {
                            violations.push(LoadViolation::InvalidRegex {
                                trigger: id.clone(),
                                field,
                                reason,
                            });
                        }
                    }
                }
            }

            trigger.local_templates().validate(default_locale, &mut violations);

            if let Some(base) = base {
                compiled.push(CompiledTrigger {
                    def: trigger.clone(),
                    base,
                    localized,
                });
            }
        }

        self.templates.validate(default_locale, &mut violations);

        if !violations.is_empty() {
            return Err(LoadError {
                set: self.name,
                violations,
            });
        }

        let mut by_kind: HashMap<EventKind, Vec<usize>> = HashMap::new();
        for (index, trigger) in compiled.iter().enumerate() {
            for &kind in trigger.def.kinds() {
                by_kind.entry(kind).or_default().push(index);
            }
        }

        let fingerprint = fingerprint(&self.name, &self.triggers);
        let mut catalog = self.templates;
        catalog.merge_missing(responses::builtin_catalog());

        Ok(LoadedTriggerSet {
            name: self.name,
            zone: self.zone,
            initial_state: self.initial_state,
            triggers: compiled,
            by_kind,
            resolver: OutputResolver::new(default_locale, Arc::new(catalog)),
            fingerprint,
        })
    }
}

fn fingerprint(name: &str, triggers: &[Trigger]) -> String {
    fn span(h: &mut blake3::Hasher, span: Option<&Span>) {
        match span {
            None => h.update(b"-"),
            Some(Span::Fixed(d)) => h.update(&d.as_nanos().to_le_bytes()),
            Some(Span::Computed(_)) => h.update(b"fn"),
        };
    }

    let mut h = blake3::Hasher::new();
    h.update(name.as_bytes());
    for t in triggers {
        h.update(&[0]);
        h.update(t.id().as_str().as_bytes());
        for kind in t.kinds() {
            h.update(format!("{kind:?}").as_bytes());
        }
        let timing = t.timing_policy();
        span(&mut h, timing.delay.as_ref());
        span(&mut h, timing.duration.as_ref());
        let suppress = timing.suppress.map_or(0, |d| d.as_nanos());
        h.update(&suppress.to_le_bytes());
        h.update(&[u8::from(timing.countdown), u8::from(t.is_disabled())]);
    }
    h.finalize().to_hex().to_string()
}

/// A trigger with its patterns compiled.
#[derive(Debug, Clone)]
pub struct CompiledTrigger {
    pub(crate) def: Trigger,
    base: CompiledPattern,
    localized: BTreeMap<Locale, CompiledPattern>,
}

impl CompiledTrigger {
    /// The authored trigger.
    #[must_use]
    pub const fn definition(&self) -> &Trigger {
        &self.def
    }

    /// Trigger id.
    #[must_use]
    pub const fn id(&self) -> &TriggerId {
        self.def.id()
    }

    /// The compiled pattern for logs written in `locale`.
    #[must_use]
    pub fn pattern_for(&self, locale: Locale) -> &CompiledPattern {
        self.localized.get(&locale).unwrap_or(&self.base)
    }
}

/// A validated set ready for dispatch.
#[derive(Debug, Clone)]
pub struct LoadedTriggerSet {
    name: String,
    zone: Option<ZoneId>,
    initial_state: Vec<(String, StateValue)>,
    triggers: Vec<CompiledTrigger>,
    by_kind: HashMap<EventKind, Vec<usize>>,
    resolver: OutputResolver,
    fingerprint: String,
}

impl LoadedTriggerSet {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Zone this set is scoped to.
    #[must_use]
    pub const fn zone(&self) -> Option<ZoneId> {
        self.zone
    }

    /// Values seeded into every new encounter.
    #[must_use]
    pub fn initial_state(&self) -> &[(String, StateValue)] {
        &self.initial_state
    }

    /// Triggers in definition order.
    #[must_use]
    pub fn triggers(&self) -> &[CompiledTrigger] {
        &self.triggers
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Indices of triggers listening to `kind`, in definition order.
    #[must_use]
    pub fn listening_to(&self, kind: EventKind) -> &[usize] {
        self.by_kind.get(&kind).map_or(&[], Vec::as_slice)
    }

    /// Resolver over the set's templates and the built-in catalog.
    #[must_use]
    pub const fn resolver(&self) -> &OutputResolver {
        &self.resolver
    }

    /// blake3 digest of ids, kinds and timing in definition order.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Whether a zone change into `zone` should start an encounter.
    #[must_use]
    pub fn applies_to(&self, zone: Option<ZoneId>) -> bool {
        match self.zone {
            None => true,
            Some(bound) => zone == Some(bound),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::event::Field;
    use crate::output::Response;
    use crate::trigger::Pattern;

    fn cast(id: &str, ability: &str) -> Trigger {
        Trigger::new(id)
            .on(EventKind::CastStarted)
            .pattern(Pattern::new().exact(Field::AbilityId, ability))
            .respond(Response::info("aoe"))
    }

    #[test]
    fn valid_set_loads_with_kind_index() {
        let loaded = TriggerSet::new("p4n")
            .zone(ZoneId(1009))
            .trigger(cast("P4N Decollation", "6A51"))
            .trigger(
                Trigger::new("P4N Tether")
                    .on(EventKind::TetherLinked)
                    .pattern(Pattern::new().exact(Field::TetherId, "00AD")),
            )
            .trigger(cast("P4N Bloodrake", "6A40"))
            .load(Locale::En)
            .unwrap();

        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.listening_to(EventKind::CastStarted), &[0, 2]);
        assert_eq!(loaded.listening_to(EventKind::TetherLinked), &[1]);
        assert!(loaded.listening_to(EventKind::Wipe).is_empty());
        assert!(loaded.resolver().catalog().contains("aoe"));
        assert!(loaded.applies_to(Some(ZoneId(1009))));
        assert!(!loaded.applies_to(Some(ZoneId(1))));
    }

    #[test]
    fn every_violation_is_reported() {
        let err = TriggerSet::new("broken")
            .trigger(cast("A", "1"))
            .trigger(cast("A", "2"))
            .trigger(cast("B", "3"))
            .trigger(cast("B", "4"))
            .trigger(
                Trigger::new("C")
                    .on(EventKind::GameLog)
                    .pattern(Pattern::new().regex(Field::Line, "(oops")),
            )
            .load(Locale::En)
            .unwrap_err();

        assert_eq!(err.set, "broken");
        assert_eq!(err.violations.len(), 3);
        assert_eq!(
            err.violations[0],
            LoadViolation::DuplicateTriggerId {
                id: "A".to_string(),
                count: 2,
            }
        );
        assert!(matches!(err.violations[2], LoadViolation::InvalidRegex { .. }));
    }

    #[test]
    fn inapplicable_fields_and_empty_kinds_are_rejected() {
        let err = TriggerSet::new("s")
            .trigger(
                Trigger::new("wrong field")
                    .on(EventKind::AbilityUsed)
                    .pattern(Pattern::new().exact(Field::CastTime, "3.0")),
            )
            .trigger(Trigger::new("no kinds"))
            .trigger(Trigger::new(""))
            .load(Locale::En)
            .unwrap_err();

        assert!(err.violations.contains(&LoadViolation::EmptyTriggerId { index: 2 }));
        assert!(err.violations.contains(&LoadViolation::FieldNotApplicable {
            trigger: "wrong field".to_string(),
            field: Field::CastTime,
            kind: EventKind::AbilityUsed,
        }));
        assert!(err.violations.contains(&LoadViolation::EmptyEventKinds {
            trigger: "no kinds".to_string(),
        }));
    }

    #[test]
    fn template_problems_fail_the_load() {
        let err = TriggerSet::new("s")
            .template("onlyJa", Template::new().ja("前へ"))
            .trigger(cast("t", "1").template(
                "text",
                Template::new().en("On ${player}").params(["target"]),
            ))
            .load(Locale::En)
            .unwrap_err();
        assert_eq!(err.violations.len(), 2);
    }

    #[test]
    fn fingerprint_is_stable_and_sensitive_to_timing() {
        let build = |delay| {
            TriggerSet::new("p4n")
                .trigger(cast("P4N Well Pinax", "6A3E").delay(Duration::from_secs(delay)))
                .load(Locale::En)
                .unwrap()
        };
        assert_eq!(build(4).fingerprint(), build(4).fingerprint());
        assert_ne!(build(4).fingerprint(), build(5).fingerprint());
        assert_eq!(build(4).fingerprint().len(), 64);
    }
}
