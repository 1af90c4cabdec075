//! Values held in the encounter state store.
//!
//! Triggers write arbitrary keyed data (tether lists, phase names, counters,
//! per-player assignments). `StateValue` is the closed set of shapes such data
//! can take, and [`StateType`] maps Rust types onto it for typed keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A value stored under a state key.
///
/// # Examples
///
/// ```
/// use raidcall::StateValue;
///
/// let phase = StateValue::from("advanced");
/// let count = StateValue::from(3i64);
///
/// assert_eq!(phase.as_text(), Some("advanced"));
/// assert_eq!(count.as_float(), Some(3.0));
/// ```
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StateValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
    Map(BTreeMap<String, String>),
    Structured(serde_json::Value),
    #[default]
    Null,
}

impl StateValue {
    /// Boolean value, if this is one.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer value, if this is one.
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float value; ints widen.
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Text value, if this is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// List value, if this is one.
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(v) => Some(v),
            _ => None,
        }
    }

    /// Map value, if this is one.
    pub const fn as_map(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Self::Map(v) => Some(v),
            _ => None,
        }
    }

    /// True for [`StateValue::Null`].
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Structured(_) => "structured",
            Self::Null => "null",
        }
    }
}

impl std::fmt::Display for StateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
            Self::List(v) => write!(f, "list[{}]", v.len()),
            Self::Map(v) => write!(f, "map[{}]", v.len()),
            Self::Structured(v) => write!(f, "{v}"),
            Self::Null => write!(f, "null"),
        }
    }
}

impl From<bool> for StateValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for StateValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for StateValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for StateValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for StateValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for StateValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<Vec<String>> for StateValue {
    fn from(v: Vec<String>) -> Self {
        Self::List(v)
    }
}

impl From<BTreeMap<String, String>> for StateValue {
    fn from(v: BTreeMap<String, String>) -> Self {
        Self::Map(v)
    }
}

impl From<serde_json::Value> for StateValue {
    fn from(v: serde_json::Value) -> Self {
        Self::Structured(v)
    }
}

/// Rust types that can live behind a typed state key.
pub trait StateType: Sized {
    /// Name used in type-mismatch errors.
    const TYPE_NAME: &'static str;

    /// Converts into a stored value.
    fn into_value(self) -> StateValue;

    /// Reads back from a stored value; `None` on shape mismatch.
    fn from_value(value: &StateValue) -> Option<Self>;
}

impl StateType for bool {
    const TYPE_NAME: &'static str = "bool";

    fn into_value(self) -> StateValue {
        StateValue::Bool(self)
    }

    fn from_value(value: &StateValue) -> Option<Self> {
        value.as_bool()
    }
}

impl StateType for i64 {
    const TYPE_NAME: &'static str = "int";

    fn into_value(self) -> StateValue {
        StateValue::Int(self)
    }

    fn from_value(value: &StateValue) -> Option<Self> {
        value.as_int()
    }
}

impl StateType for f64 {
    const TYPE_NAME: &'static str = "float";

    fn into_value(self) -> StateValue {
        StateValue::Float(self)
    }

    fn from_value(value: &StateValue) -> Option<Self> {
        value.as_float()
    }
}

impl StateType for String {
    const TYPE_NAME: &'static str = "text";

    fn into_value(self) -> StateValue {
        StateValue::Text(self)
    }

    fn from_value(value: &StateValue) -> Option<Self> {
        value.as_text().map(str::to_string)
    }
}

impl StateType for Vec<String> {
    const TYPE_NAME: &'static str = "list";

    fn into_value(self) -> StateValue {
        StateValue::List(self)
    }

    fn from_value(value: &StateValue) -> Option<Self> {
        value.as_list().map(<[String]>::to_vec)
    }
}

impl StateType for BTreeMap<String, String> {
    const TYPE_NAME: &'static str = "map";

    fn into_value(self) -> StateValue {
        StateValue::Map(self)
    }

    fn from_value(value: &StateValue) -> Option<Self> {
        value.as_map().cloned()
    }
}
