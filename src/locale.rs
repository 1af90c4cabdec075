//! Locales for log parsing and output text.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Languages the game client writes logs in and that output text is
/// translated into.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    De,
    Fr,
    Ja,
    Cn,
    Ko,
}

impl Locale {
    /// All supported locales.
    pub const ALL: [Self; 6] = [Self::En, Self::De, Self::Fr, Self::Ja, Self::Cn, Self::Ko];

    /// Short language code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::De => "de",
            Self::Fr => "fr",
            Self::Ja => "ja",
            Self::Cn => "cn",
            Self::Ko => "ko",
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|l| l.code() == code)
            .ok_or_else(|| format!("unknown locale '{s}'"))
    }
}
