//! Structural field patterns.
//!
//! A [`Pattern`] lists per-field requirements; unspecified fields are
//! wildcards. Patterns are compiled once at load time into a
//! [`CompiledPattern`] and matched against events without allocation on the
//! miss path.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::TriggerError;
use crate::event::{Event, EventKind, Field};

/// Requirement on a single field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPattern {
    /// The field equals this value.
    Exact(String),
    /// The field equals one of these values.
    OneOf(Vec<String>),
    /// The whole field matches this regex. Named groups are captured.
    Regex(String),
}

/// Per-field requirements for one trigger.
///
/// ```
/// use raidcall::event::Field;
/// use raidcall::trigger::Pattern;
///
/// let pattern = Pattern::new()
///     .one_of(Field::AbilityId, ["6A3F", "6A3E"])
///     .exact(Field::Source, "Hesperos");
/// assert_eq!(pattern.fields().count(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pattern {
    fields: BTreeMap<Field, FieldPattern>,
}

impl Pattern {
    /// Pattern that matches every event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `field` to equal `value`.
    #[must_use]
    pub fn exact(mut self, field: Field, value: impl Into<String>) -> Self {
        self.fields.insert(field, FieldPattern::Exact(value.into()));
        self
    }

    /// Requires `field` to equal one of `values`.
    #[must_use]
    pub fn one_of<I, S>(mut self, field: Field, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.fields.insert(field, FieldPattern::OneOf(values));
        self
    }

    /// Requires `field` to match `regex` in full.
    #[must_use]
    pub fn regex(mut self, field: Field, regex: impl Into<String>) -> Self {
        self.fields.insert(field, FieldPattern::Regex(regex.into()));
        self
    }

    /// Specified fields in field order.
    pub fn fields(&self) -> impl Iterator<Item = (Field, &FieldPattern)> {
        self.fields.iter().map(|(f, p)| (*f, p))
    }

    /// Compiles the pattern, returning every field whose regex is invalid.
    pub fn compile(&self) -> Result<CompiledPattern, Vec<(Field, String)>> {
        let mut checks = Vec::with_capacity(self.fields.len());
        let mut invalid = Vec::new();
        for (&field, pattern) in &self.fields {
            let fold = field.is_hex_id();
            let check = match pattern {
                FieldPattern::Exact(v) => Check::OneOf(vec![v.clone()], fold),
                FieldPattern::OneOf(vs) => Check::OneOf(vs.clone(), fold),
                FieldPattern::Regex(src) => {
                    let flags = if fold { "(?i)" } else { "" };
                    match Regex::new(&format!("{flags}^(?:{src})$")) {
                        Ok(re) => Check::Regex(re),
                        Err(e) => {
                            invalid.push((field, e.to_string()));
                            continue;
                        }
                    }
                }
            };
            checks.push((field, check));
        }
        if invalid.is_empty() {
            Ok(CompiledPattern { checks })
        } else {
            Err(invalid)
        }
    }
}

#[derive(Debug, Clone)]
enum Check {
    OneOf(Vec<String>, bool),
    Regex(Regex),
}

/// A validated, ready-to-match pattern.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    checks: Vec<(Field, Check)>,
}

impl CompiledPattern {
    /// Tests `event`; on success snapshots its fields and regex groups.
    #[must_use]
    pub fn matches(&self, event: &Event) -> Option<Captures> {
        let mut groups = BTreeMap::new();
        for (field, check) in &self.checks {
            let value = event.get(*field)?;
            match check {
                Check::OneOf(values, fold) => {
                    let hit = values.iter().any(|v| {
                        if *fold {
                            v.eq_ignore_ascii_case(value)
                        } else {
                            v == value
                        }
                    });
                    if !hit {
                        return None;
                    }
                }
                Check::Regex(re) => {
                    let caps = re.captures(value)?;
                    for name in re.capture_names().flatten() {
                        if let Some(m) = caps.name(name) {
                            groups.insert(name.to_string(), m.as_str().to_string());
                        }
                    }
                }
            }
        }
        Some(Captures {
            kind: event.kind,
            timestamp: event.timestamp,
            fields: event.fields.clone(),
            groups,
        })
    }
}

/// Field values bound to one firing, captured at match time.
#[derive(Debug, Clone, PartialEq)]
pub struct Captures {
    kind: EventKind,
    timestamp: DateTime<Utc>,
    fields: BTreeMap<Field, String>,
    groups: BTreeMap<String, String>,
}

impl Captures {
    /// Captures for an event with no pattern applied (every field kept).
    #[must_use]
    pub fn of(event: &Event) -> Self {
        Self {
            kind: event.kind,
            timestamp: event.timestamp,
            fields: event.fields.clone(),
            groups: BTreeMap::new(),
        }
    }

    /// Kind of the matched event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Timestamp of the matched event.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Captured value of `field`.
    #[must_use]
    pub fn get(&self, field: Field) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    /// Like [`Captures::get`], but a missing field is an error.
    pub fn require(&self, field: Field) -> Result<&str, TriggerError> {
        self.get(field).ok_or(TriggerError::MissingCapture { field })
    }

    /// Parses a numeric field (e.g. a cast time in seconds).
    pub fn number(&self, field: Field) -> Result<f64, TriggerError> {
        let raw = self.require(field)?;
        raw.trim().parse().map_err(|_| TriggerError::InvalidNumber {
            field,
            value: raw.to_string(),
        })
    }

    /// A named regex group.
    #[must_use]
    pub fn group(&self, name: &str) -> Option<&str> {
        self.groups.get(name).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cast(id: &str, source: &str) -> Event {
        Event::new(EventKind::CastStarted, Utc::now())
            .with(Field::AbilityId, id)
            .with(Field::Source, source)
            .with(Field::CastTime, "4.70")
    }

    #[test]
    fn unspecified_fields_are_wildcards() {
        let compiled = Pattern::new().exact(Field::AbilityId, "6A50").compile().unwrap();
        assert!(compiled.matches(&cast("6A50", "Hesperos")).is_some());
        assert!(compiled.matches(&cast("6A51", "Hesperos")).is_none());
    }

    #[test]
    fn hex_ids_compare_case_insensitively() {
        let compiled = Pattern::new().one_of(Field::AbilityId, ["6a3f", "6A3E"]).compile().unwrap();
        assert!(compiled.matches(&cast("6A3F", "Hesperos")).is_some());
        assert!(compiled.matches(&cast("6a3e", "Hesperos")).is_some());

        let names = Pattern::new().exact(Field::Source, "hesperos").compile().unwrap();
        assert!(names.matches(&cast("6A3F", "Hesperos")).is_none());
    }

    #[test]
    fn missing_field_never_matches() {
        let compiled = Pattern::new().exact(Field::Target, "Tank One").compile().unwrap();
        assert!(compiled.matches(&cast("6A50", "Hesperos")).is_none());
    }

    #[test]
    fn regex_is_anchored_and_captures_groups() {
        let compiled = Pattern::new()
            .regex(Field::Source, r"(?P<boss>Hesp\w+)")
            .compile()
            .unwrap();
        let captures = compiled.matches(&cast("6A50", "Hesperos")).unwrap();
        assert_eq!(captures.group("boss"), Some("Hesperos"));
        assert!(compiled.matches(&cast("6A50", "Not Hesperos")).is_none());
    }

    #[test]
    fn invalid_regexes_are_all_reported() {
        let errs = Pattern::new()
            .regex(Field::Source, "(unclosed")
            .regex(Field::Target, "[z-a]")
            .compile()
            .unwrap_err();
        let fields: Vec<Field> = errs.into_iter().map(|(f, _)| f).collect();
        assert_eq!(fields, vec![Field::Source, Field::Target]);
    }

    #[test]
    fn captures_parse_numbers() {
        let captures = Captures::of(&cast("6A50", "Hesperos"));
        assert!((captures.number(Field::CastTime).unwrap() - 4.7).abs() < f64::EPSILON);
        assert_eq!(
            captures.number(Field::Source).unwrap_err(),
            TriggerError::InvalidNumber {
                field: Field::Source,
                value: "Hesperos".to_string(),
            }
        );
        assert_eq!(
            captures.require(Field::Target).unwrap_err(),
            TriggerError::MissingCapture { field: Field::Target }
        );
    }
}
