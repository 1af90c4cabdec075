//! Output requests and renderable payloads.
//!
//! A trigger's output step yields a [`Response`]: one or more severity-tagged
//! [`Message`]s naming a localized template (or carrying literal text). The
//! [`OutputResolver`] turns each message into a [`RenderablePayload`], and the
//! engine wraps it in an [`Alert`] for the external renderer.

pub mod resolver;
pub mod template;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::locale::Locale;
use crate::trigger::TriggerId;

pub use resolver::OutputResolver;
pub use template::{Template, TemplateCatalog};

/// Named template parameters.
pub type Params = BTreeMap<String, String>;

/// Urgency passed through to the renderer.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Alarm,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Alarm => "alarm",
        })
    }
}

/// What a message says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// A template key plus its parameters.
    Template { key: String, params: Params },
    /// Pre-rendered text, used as-is.
    Literal(String),
}

/// One severity-tagged message request.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub severity: Severity,
    pub body: MessageBody,
}

impl Message {
    /// A message rendered from a template.
    #[must_use]
    pub fn template(severity: Severity, key: impl Into<String>) -> Self {
        Self {
            severity,
            body: MessageBody::Template {
                key: key.into(),
                params: Params::new(),
            },
        }
    }

    /// A message with literal text.
    #[must_use]
    pub fn literal(severity: Severity, text: impl Into<String>) -> Self {
        Self {
            severity,
            body: MessageBody::Literal(text.into()),
        }
    }

    /// Binds a template parameter (builder pattern). Ignored for literals.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let MessageBody::Template { params, .. } = &mut self.body {
            params.insert(name.into(), value.into());
        }
        self
    }
}

/// The result of one firing's output step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    messages: Vec<Message>,
}

impl Response {
    /// Empty response.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Single informational template message.
    #[must_use]
    pub fn info(key: impl Into<String>) -> Self {
        Message::template(Severity::Info, key).into()
    }

    /// Single warning template message.
    #[must_use]
    pub fn warning(key: impl Into<String>) -> Self {
        Message::template(Severity::Warning, key).into()
    }

    /// Single alarm template message.
    #[must_use]
    pub fn alarm(key: impl Into<String>) -> Self {
        Message::template(Severity::Alarm, key).into()
    }

    /// Adds a message (builder pattern).
    #[must_use]
    pub fn with(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Binds a parameter on every template message (builder pattern).
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        self.messages = self
            .messages
            .into_iter()
            .map(|m| m.param(name.clone(), value.clone()))
            .collect();
        self
    }

    /// Messages in the order they were added.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// True when there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages in emission order: alarm, then warning, then info. Messages
    /// of equal severity keep their authored order.
    #[must_use]
    pub fn into_emission_order(mut self) -> Vec<Message> {
        self.messages.sort_by(|a, b| b.severity.cmp(&a.severity));
        self.messages
    }
}

impl From<Message> for Response {
    fn from(message: Message) -> Self {
        Self {
            messages: vec![message],
        }
    }
}

/// Text ready for the renderer.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderablePayload {
    pub severity: Severity,
    pub text: String,
    pub locale: Locale,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
}

/// Sequential id of an emitted alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(pub u64);

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alert#{}", self.0)
    }
}

/// An emitted alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Sequential within one engine.
    pub id: AlertId,
    /// Trigger that fired.
    pub trigger_id: TriggerId,
    /// Engine time of the firing.
    pub emitted_at: DateTime<Utc>,
    /// Resolved text for the renderer.
    pub payload: RenderablePayload,
    /// Active countdown this alert replaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<AlertId>,
}
