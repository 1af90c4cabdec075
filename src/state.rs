//! Per-encounter state store.
//!
//! Key invariants:
//! - Any trigger may read any key. Keys may declare an owner; writes from
//!   other triggers are allowed but logged.
//! - Writes never reach the committed store mid-unit. A [`StateView`] merges
//!   the committed store with the current trigger's own pending writes
//!   (merge-on-read); the engine commits all pending writes when the unit of
//!   work (an event fan-out, a scheduled firing, an enrichment continuation)
//!   ends.

use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;

use crate::error::TriggerError;
use crate::value::{StateType, StateValue};

/// A typed handle to a state key.
///
/// ```
/// use raidcall::StateKey;
///
/// const PHASE: StateKey<String> = StateKey::new("phase").owned_by("P4N Phase Tracker");
/// assert_eq!(PHASE.name(), "phase");
/// ```
#[derive(Debug)]
pub struct StateKey<T> {
    name: &'static str,
    owner: Option<&'static str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for StateKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StateKey<T> {}

impl<T> StateKey<T> {
    /// Declares a key.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            owner: None,
            _marker: PhantomData,
        }
    }

    /// Records the trigger id expected to write this key.
    #[must_use]
    pub const fn owned_by(self, owner: &'static str) -> Self {
        Self {
            name: self.name,
            owner: Some(owner),
            _marker: PhantomData,
        }
    }

    /// Store key.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Trigger id that owns writes to this key, if declared.
    #[must_use]
    pub const fn owner(&self) -> Option<&'static str> {
        self.owner
    }
}

/// One pending write (or delete when `value` is `None`).
#[derive(Debug, Clone, PartialEq)]
pub struct StateWrite {
    /// Key written.
    pub key: String,
    /// New value; `None` deletes.
    pub value: Option<StateValue>,
    /// Trigger id that staged the write.
    pub writer: String,
    /// Declared owner of the key, if the write went through a typed key.
    pub owner: Option<String>,
}

/// The committed key/value store for one encounter.
#[derive(Debug, Clone, Default)]
pub struct EncounterState {
    values: HashMap<String, StateValue>,
    owners: HashMap<String, String>,
}

impl EncounterState {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with initial values.
    #[must_use]
    pub fn seeded(initial: &[(String, StateValue)]) -> Self {
        let mut state = Self::new();
        for (key, value) in initial {
            state.set(key.clone(), value.clone());
        }
        state
    }

    /// Committed value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.values.get(key)
    }

    /// Writes straight to the committed store.
    pub fn set(&mut self, key: impl Into<String>, value: StateValue) {
        self.values.insert(key.into(), value);
    }

    /// Removes a key, returning its old value.
    pub fn delete(&mut self, key: &str) -> Option<StateValue> {
        self.values.remove(key)
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Commits pending writes in order; later writes win.
    pub fn apply(&mut self, writes: Vec<StateWrite>) {
        for w in writes {
            if let Some(owner) = &w.owner {
                let declared = self.owners.entry(w.key.clone()).or_insert_with(|| owner.clone());
                if declared != owner {
                    log::debug!(
                        target: "raidcall::state",
                        "state key '{}' re-declared owner '{}' (was '{}')",
                        w.key,
                        owner,
                        declared
                    );
                }
            }
            if let Some(owner) = self.owners.get(&w.key) {
                if owner != &w.writer {
                    log::debug!(
                        target: "raidcall::state",
                        "state key '{}' owned by '{}' written by '{}'",
                        w.key,
                        owner,
                        w.writer
                    );
                }
            }
            match w.value {
                Some(v) => {
                    self.values.insert(w.key, v);
                }
                None => {
                    self.values.remove(&w.key);
                }
            }
        }
    }
}

/// Read-your-writes view used by a single trigger during one unit of work.
#[derive(Debug, Clone)]
pub struct StateView<'a> {
    base: &'a EncounterState,
    overlay: BTreeMap<String, Option<StateValue>>,
    order: Vec<StateWrite>,
    writer: &'a str,
}

impl<'a> StateView<'a> {
    /// Creates a view for `writer` over the committed store.
    #[must_use]
    pub fn new(base: &'a EncounterState, writer: &'a str) -> Self {
        Self {
            base,
            overlay: BTreeMap::new(),
            order: Vec::new(),
            writer,
        }
    }

    /// Reads a key, preferring this trigger's pending writes.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&StateValue> {
        match self.overlay.get(key) {
            Some(pending) => pending.as_ref(),
            None => self.base.get(key),
        }
    }

    /// Returns true if the key is present (after pending writes).
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Reads a text value.
    #[must_use]
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(StateValue::as_text)
    }

    /// Reads a typed key. A value of the wrong shape is an error, a missing
    /// key is `Ok(None)`.
    pub fn typed<T: StateType>(&self, key: &StateKey<T>) -> Result<Option<T>, TriggerError> {
        match self.get(key.name()) {
            None => Ok(None),
            Some(v) => T::from_value(v).map(Some).ok_or_else(|| TriggerError::StateType {
                key: key.name().to_string(),
                expected: T::TYPE_NAME,
                found: v.type_name(),
            }),
        }
    }

    /// Stages a write.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<StateValue>) {
        self.stage(key.into(), Some(value.into()), None);
    }

    /// Stages a typed write, carrying the key's declared owner.
    pub fn set_typed<T: StateType>(&mut self, key: &StateKey<T>, value: T) {
        self.stage(
            key.name().to_string(),
            Some(value.into_value()),
            key.owner().map(str::to_string),
        );
    }

    /// Stages a delete.
    pub fn delete(&mut self, key: impl Into<String>) {
        self.stage(key.into(), None, None);
    }

    /// Appends to a list value, creating it if absent.
    pub fn push(&mut self, key: &str, item: impl Into<String>) -> Result<(), TriggerError> {
        let mut list = match self.get(key) {
            None | Some(StateValue::Null) => Vec::new(),
            Some(StateValue::List(v)) => v.clone(),
            Some(other) => {
                return Err(TriggerError::StateType {
                    key: key.to_string(),
                    expected: "list",
                    found: other.type_name(),
                })
            }
        };
        list.push(item.into());
        self.set(key, StateValue::List(list));
        Ok(())
    }

    /// Adds `delta` to an integer counter (missing counts as zero).
    pub fn increment(&mut self, key: &str, delta: i64) -> Result<i64, TriggerError> {
        let current = match self.get(key) {
            None | Some(StateValue::Null) => 0,
            Some(StateValue::Int(v)) => *v,
            Some(other) => {
                return Err(TriggerError::StateType {
                    key: key.to_string(),
                    expected: "int",
                    found: other.type_name(),
                })
            }
        };
        let next = current.saturating_add(delta);
        self.set(key, StateValue::Int(next));
        Ok(next)
    }

    /// Returns true if this view staged any writes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.order.is_empty()
    }

    /// Consumes the view, returning its writes in staging order.
    #[must_use]
    pub fn into_writes(self) -> Vec<StateWrite> {
        self.order
    }

    fn stage(&mut self, key: String, value: Option<StateValue>, owner: Option<String>) {
        self.overlay.insert(key.clone(), value.clone());
        self.order.push(StateWrite {
            key,
            value,
            writer: self.writer.to_string(),
            owner,
        });
    }
}
