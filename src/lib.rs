//! # raidcall - combat-log triggers
//!
//! raidcall turns a stream of normalized combat-log events into timed,
//! localized callouts. Trigger authors describe *what* to react to (event
//! kind, field patterns, guards over encounter state) and *what* to say
//! (templated messages per severity); the engine handles fan-out, delays,
//! suppression windows, countdowns, asynchronous enrichment and the
//! per-encounter state triggers share.
//!
//! ## Core Concepts
//!
//! - **Event**: one normalized log line with a kind, a timestamp and named fields
//! - **Trigger**: pattern + guard + timing + output, identified by a stable id
//! - **Encounter State**: key/value store shared by the triggers of one encounter
//! - **Alert**: a resolved message handed to the host's [`AlertSink`]
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//!
//! use chrono::Utc;
//! use raidcall::event::{Event, EventKind, Field};
//! use raidcall::output::{Response, Template};
//! use raidcall::trigger::{Pattern, Trigger, TriggerSet};
//! use raidcall::{alert_channel, EncounterId, EngineConfig, StateKey, StateValue, TriggerEngine};
//!
//! const PHASE: StateKey<String> = StateKey::new("phase");
//!
//! let set = TriggerSet::new("demo")
//!     .initial("phase", StateValue::from("opening"))
//!     .template("cleave", Template::new().en("Cleave on ${player}").params(["player"]))
//!     .trigger(
//!         Trigger::new("demo cleave")
//!             .on(EventKind::CastStarted)
//!             .pattern(Pattern::new().exact(Field::AbilityId, "2A10"))
//!             .suppress(Duration::from_secs(5))
//!             .output(|ctx| {
//!                 let target = ctx.captures().require(Field::Target)?;
//!                 Ok(Some(Response::warning("cleave").param("player", target)))
//!             })
//!             .run(|ctx| {
//!                 ctx.state_mut().set_typed(&PHASE, "cleaving".to_string());
//!                 Ok(())
//!             }),
//!     );
//!
//! let (sink, alerts) = alert_channel(16);
//! let mut engine = TriggerEngine::new(EngineConfig::default(), sink).unwrap();
//! engine.load(set).unwrap();
//! engine.start(EncounterId::new()).unwrap();
//! engine.submit(
//!     Event::new(EventKind::CastStarted, Utc::now())
//!         .with(Field::AbilityId, "2A10")
//!         .with(Field::Target, "Alisaie"),
//! );
//!
//! assert_eq!(alerts.recv().unwrap().payload.text, "Cleave on Alisaie");
//! assert_eq!(engine.state().unwrap().get("phase"), Some(&StateValue::from("cleaving")));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod event;
pub mod locale;
pub mod state;
pub mod value;

// Authoring and output
pub mod output;
pub mod trigger;

// Engine
pub mod config;
pub mod engine;

// Re-export primary types at crate root for convenience
pub use config::{EngineConfig, PlayerContext, Role};
pub use error::{ConfigError, EngineError, EngineResult, LoadError, LoadViolation, OutputError, TriggerError};
pub use event::{Event, EventKind, Field, ZoneId};
pub use locale::Locale;
pub use state::{EncounterState, StateKey, StateView};
pub use value::StateValue;

pub use output::{Alert, AlertId, Message, RenderablePayload, Response, Severity, Template, TemplateCatalog};
pub use trigger::{LoadedTriggerSet, Pattern, Trigger, TriggerContext, TriggerId, TriggerSet};

pub use engine::{
    alert_channel, AlertSink, AlertStream, ChannelSink, EncounterId, EndReason, EngineRuntime, EngineStats,
    EnrichmentGateway, EnrichmentOutcome, EnrichmentQuery, StatsSnapshot, TriggerEngine, TriggerFailure,
};
