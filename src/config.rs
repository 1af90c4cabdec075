//! Engine configuration.
//!
//! Settings are plain serde data so hosts can keep them in a JSON file next to
//! their own settings. Every field has a default; a partial file is valid.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::locale::Locale;

/// Combat role of the local player.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Tank,
    Healer,
    Dps,
    #[default]
    None,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tank => "tank",
            Self::Healer => "healer",
            Self::Dps => "dps",
            Self::None => "none",
        })
    }
}

/// Who "you" are, for conditions like "the target is you".
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerContext {
    pub name: String,
    /// Hex combatant id; compared case-insensitively.
    pub id: String,
    pub role: Role,
}

impl PlayerContext {
    /// Player with the given name, hex id and role.
    #[must_use]
    pub fn new(name: impl Into<String>, id: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            role,
        }
    }

    /// Whether a captured name or id refers to the local player.
    #[must_use]
    pub fn is(&self, name: Option<&str>, id: Option<&str>) -> bool {
        let by_name = !self.name.is_empty() && name == Some(self.name.as_str());
        let by_id = !self.id.is_empty() && id.is_some_and(|i| i.eq_ignore_ascii_case(&self.id));
        by_name || by_id
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Locale the combat log is written in; selects localized patterns.
    pub game_locale: Locale,
    /// Locale for output text.
    pub display_locale: Locale,
    /// Fallback when a template lacks the display locale.
    pub default_locale: Locale,
    pub player: PlayerContext,
    /// Upper bound on a single enrichment request.
    pub enrichment_timeout_ms: u64,
    /// Alerts buffered for the renderer before drops are counted.
    pub alert_queue_capacity: usize,
    /// Commands buffered by the async runtime before `try_submit` reports full.
    pub command_queue_capacity: usize,
    /// Recent trigger failures kept for diagnostics.
    pub failure_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            game_locale: Locale::En,
            display_locale: Locale::En,
            default_locale: Locale::En,
            player: PlayerContext::default(),
            enrichment_timeout_ms: 1000,
            alert_queue_capacity: 1024,
            command_queue_capacity: 4096,
            failure_history: 64,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Writes the config as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Checks capacities and timeouts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enrichment_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "enrichment_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.alert_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "alert_queue_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.command_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "command_queue_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// `enrichment_timeout_ms` as a [`Duration`].
    #[must_use]
    pub const fn enrichment_timeout(&self) -> Duration {
        Duration::from_millis(self.enrichment_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{ "display_locale": "de", "player": { "name": "Tank One", "role": "tank" } }"#,
        )
        .unwrap();
        assert_eq!(config.display_locale, Locale::De);
        assert_eq!(config.game_locale, Locale::En);
        assert_eq!(config.player.role, Role::Tank);
        assert_eq!(config.enrichment_timeout(), Duration::from_secs(1));
        assert_eq!(config.alert_queue_capacity, 1024);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = EngineConfig::from_json_str(r#"{ "enrichment_timeout_ms": 0 }"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "enrichment_timeout_ms",
                ..
            }
        ));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("raidcall.json");

        let config = EngineConfig {
            game_locale: Locale::Ja,
            player: PlayerContext::new("Healer Two", "10FF0002", Role::Healer),
            failure_history: 8,
            ..EngineConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempdir().unwrap();
        let err = EngineConfig::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn player_identity_matches_name_or_id() {
        let me = PlayerContext::new("Tank One", "10FF0001", Role::Tank);
        assert!(me.is(Some("Tank One"), None));
        assert!(me.is(None, Some("10ff0001")));
        assert!(!me.is(Some("Healer Two"), Some("10FF0002")));
        assert!(!PlayerContext::default().is(Some(""), Some("")));
    }
}
