//! Normalized combat-log events.
//!
//! Events are produced by an external normalizer (one per log line) and are
//! consumed read-only by the engine. Event kinds and field names are closed
//! enums so trigger patterns can be validated against them at load time.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discriminant of a normalized event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// An ability resolved.
    AbilityUsed,
    /// A cast bar started.
    CastStarted,
    /// A status effect was applied.
    StatusGained,
    /// A status effect fell off.
    StatusLost,
    /// A combatant appeared.
    CombatantAdded,
    /// A combatant disappeared.
    CombatantRemoved,
    /// Two combatants were tethered.
    TetherLinked,
    /// An overhead marker was shown on a combatant.
    MarkerShown,
    /// A game log (chat/system) line.
    GameLog,
    /// The player entered a zone.
    ZoneChanged,
    /// Combat began.
    CombatStarted,
    /// The party wiped.
    Wipe,
    /// The encounter was cleared.
    Victory,
}

impl EventKind {
    /// Fields the normalizer may populate for this kind.
    #[must_use]
    pub const fn fields(self) -> &'static [Field] {
        use Field::{
            Ability, AbilityId, CastTime, Code, CombatantId, Count, Duration, Effect, EffectId,
            Heading, Line, MarkerId, Name, NpcBaseId, NpcNameId, Source, SourceId, Target,
            TargetId, TetherId, ZoneId, ZoneName, X, Y, Z,
        };
        match self {
            Self::AbilityUsed => &[SourceId, Source, AbilityId, Ability, TargetId, Target, X, Y, Z, Heading],
            Self::CastStarted => &[
                SourceId, Source, AbilityId, Ability, TargetId, Target, CastTime, X, Y, Z, Heading,
            ],
            Self::StatusGained | Self::StatusLost => {
                &[EffectId, Effect, Duration, SourceId, Source, TargetId, Target, Count]
            }
            Self::CombatantAdded | Self::CombatantRemoved => {
                &[CombatantId, Name, NpcNameId, NpcBaseId, X, Y, Z, Heading]
            }
            Self::TetherLinked => &[SourceId, Source, TargetId, Target, TetherId],
            Self::MarkerShown => &[TargetId, Target, MarkerId],
            Self::GameLog => &[Code, Name, Line],
            Self::ZoneChanged => &[ZoneId, ZoneName],
            Self::CombatStarted | Self::Wipe | Self::Victory => &[],
        }
    }

    /// Whether events of this kind may carry `field`.
    #[must_use]
    pub fn carries(self, field: Field) -> bool {
        self.fields().contains(&field)
    }

    /// Events that drive the encounter lifecycle.
    #[must_use]
    pub const fn is_lifecycle(self) -> bool {
        matches!(self, Self::ZoneChanged | Self::CombatStarted | Self::Wipe | Self::Victory)
    }
}

/// Named fields extracted by the normalizer.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    SourceId,
    Source,
    TargetId,
    Target,
    AbilityId,
    Ability,
    EffectId,
    Effect,
    CastTime,
    Duration,
    Count,
    X,
    Y,
    Z,
    Heading,
    CombatantId,
    Name,
    NpcNameId,
    NpcBaseId,
    TetherId,
    MarkerId,
    Code,
    Line,
    ZoneId,
    ZoneName,
}

impl Field {
    /// Hex identifiers compare case-insensitively.
    #[must_use]
    pub const fn is_hex_id(self) -> bool {
        matches!(
            self,
            Self::SourceId
                | Self::TargetId
                | Self::AbilityId
                | Self::EffectId
                | Self::CombatantId
                | Self::TetherId
                | Self::MarkerId
        )
    }
}

/// Numeric zone identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(pub u32);

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable, normalized event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event kind; selects which triggers see it.
    pub kind: EventKind,
    /// Log timestamp; the only clock the core reads.
    pub timestamp: DateTime<Utc>,
    /// Raw field values as logged.
    #[serde(default)]
    pub fields: BTreeMap<Field, String>,
}

impl Event {
    /// Creates an event with no fields.
    #[must_use]
    pub fn new(kind: EventKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            timestamp,
            fields: BTreeMap::new(),
        }
    }

    /// Sets a field (builder pattern).
    #[must_use]
    pub fn with(mut self, field: Field, value: impl Into<String>) -> Self {
        self.fields.insert(field, value.into());
        self
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, field: Field) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    /// Zone carried by a `ZoneChanged` event, if parseable.
    ///
    /// Accepts decimal or `0x`-prefixed hex.
    #[must_use]
    pub fn zone_id(&self) -> Option<ZoneId> {
        let raw = self.get(Field::ZoneId)?.trim();
        let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => raw.parse().ok(),
        };
        parsed.map(ZoneId)
    }
}
