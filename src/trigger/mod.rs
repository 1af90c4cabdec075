//! Trigger authoring.
//!
//! Trigger sets are built in code with builders, validated once by
//! [`TriggerSet::load`], and handed to the engine.

/// Canned guards.
pub mod conditions;
/// Trigger definitions and step contexts.
pub mod definition;
/// Structural field patterns.
pub mod pattern;
/// Canned responses and built-in templates.
pub mod responses;
/// Trigger sets and load-time validation.
pub mod set;

pub use definition::{
    GuardFn, MutateFn, MutationContext, OutputFn, QueryFn, Span, SpanFn, TimingPolicy, Trigger, TriggerContext,
    TriggerId,
};
pub use pattern::{Captures, CompiledPattern, FieldPattern, Pattern};
pub use set::{CompiledTrigger, LoadedTriggerSet, TriggerSet};
