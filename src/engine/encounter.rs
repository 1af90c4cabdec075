use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::EncounterState;
use crate::trigger::LoadedTriggerSet;

/// Identifier of one encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncounterId(pub Uuid);

impl EncounterId {
    /// Fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EncounterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EncounterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "encounter:{}", self.0)
    }
}

/// Why an encounter ended.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Wipe,
    Victory,
    ZoneChange,
    /// Ended by the host, or by a trigger-set reload.
    Reset,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Wipe => "wipe",
            Self::Victory => "victory",
            Self::ZoneChange => "zone change",
            Self::Reset => "reset",
        })
    }
}

/// A live encounter and the state its triggers share.
#[derive(Debug)]
pub(crate) struct Encounter {
    pub(crate) id: EncounterId,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) state: EncounterState,
}

impl Encounter {
    pub(crate) fn begin(id: EncounterId, started_at: DateTime<Utc>, set: &LoadedTriggerSet) -> Self {
        Self {
            id,
            started_at,
            state: EncounterState::seeded(set.initial_state()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locale::Locale;
    use crate::trigger::TriggerSet;
    use crate::value::StateValue;

    #[test]
    fn begin_seeds_initial_state() {
        let set = TriggerSet::new("s").initial("phase", 1i64).load(Locale::En).unwrap();
        let encounter = Encounter::begin(EncounterId::new(), Utc::now(), &set);
        assert_eq!(encounter.state.get("phase"), Some(&StateValue::Int(1)));
        assert_eq!(encounter.state.len(), 1);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(EncounterId::new(), EncounterId::new());
        assert!(EncounterId::new().to_string().starts_with("encounter:"));
    }
}
