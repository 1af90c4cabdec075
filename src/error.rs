//! Error types for raidcall.
//!
//! All errors are strongly typed using thiserror. Load-time problems are
//! collected into a single [`LoadError`] so authors see every violation at
//! once; per-trigger failures are [`TriggerError`]s that the dispatcher
//! catches and records without aborting the event.

use std::fmt;

use thiserror::Error;

use crate::event::{EventKind, Field};
use crate::locale::Locale;

/// A single problem found while validating a trigger set.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadViolation {
    #[error("trigger #{index} has an empty id")]
    EmptyTriggerId {
        index: usize,
    },

    #[error("trigger id '{id}' is defined {count} times")]
    DuplicateTriggerId {
        id: String,
        count: usize,
    },

    #[error("trigger '{trigger}' listens to no event kinds")]
    EmptyEventKinds {
        trigger: String,
    },

    #[error("trigger '{trigger}' matches field {field:?}, which {kind:?} events never carry")]
    FieldNotApplicable {
        trigger: String,
        field: Field,
        kind: EventKind,
    },

    #[error("trigger '{trigger}' has an invalid regex for {field:?}: {reason}")]
    InvalidRegex {
        trigger: String,
        field: Field,
        reason: String,
    },

    #[error("template '{template}' ({locale}) references undeclared parameter '{parameter}'")]
    UndefinedTemplateParameter {
        template: String,
        locale: Locale,
        parameter: String,
    },

    #[error("template '{template}' has no text for the default locale {locale}")]
    MissingDefaultLocale {
        template: String,
        locale: Locale,
    },
}

/// Startup failure for a trigger set. Nothing from the set is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadError {
    /// Name of the rejected set.
    pub set: String,
    /// Every problem found, in definition order.
    pub violations: Vec<LoadViolation>,
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trigger set '{}' failed to load with {} violation(s)",
            self.set,
            self.violations.len()
        )?;
        for v in &self.violations {
            write!(f, "\n  - {v}")?;
        }
        Ok(())
    }
}

impl std::error::Error for LoadError {}

/// Errors raised from inside a trigger's step closures.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TriggerError {
    #[error("event did not capture field {field:?}")]
    MissingCapture {
        field: Field,
    },

    #[error("field {field:?} value '{value}' is not a number")]
    InvalidNumber {
        field: Field,
        value: String,
    },

    #[error("state key '{key}' holds {found}, expected {expected}")]
    StateType {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("step panicked: {message}")]
    Panicked {
        message: String,
    },

    #[error("{message}")]
    Failed {
        message: String,
    },
}

impl TriggerError {
    /// Creates a free-form failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Errors turning a message request into renderable text.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutputError {
    #[error("unknown template '{key}'")]
    UnknownTemplate {
        key: String,
    },

    #[error("template '{key}' references undefined parameter '{parameter}'")]
    UndefinedParameter {
        key: String,
        parameter: String,
    },

    #[error("template '{key}' has no text for {locale} or the default locale")]
    MissingLocale {
        key: String,
        locale: Locale,
    },
}

/// Configuration loading/validation errors.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config field '{field}': {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// Top-level error type for raidcall.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("no trigger set is loaded")]
    NoTriggerSet,

    #[error("engine queue is full (capacity {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("engine channel '{path}' is disconnected")]
    Disconnected {
        path: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl EngineError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a load error.
    #[must_use]
    pub const fn is_load(&self) -> bool {
        matches!(self, Self::Load(_))
    }

    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueFull { .. })
    }
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
