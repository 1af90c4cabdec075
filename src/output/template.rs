//! Localized template storage.
//!
//! A [`Template`] holds one text per locale for a stable key, with `${name}`
//! placeholders. When a template declares its parameters, load-time checks
//! reject texts that reference anything undeclared.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::LoadViolation;
use crate::locale::Locale;

pub(crate) fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex is valid"))
}

/// Placeholder names referenced by `text`, in first-appearance order.
#[must_use]
pub fn placeholders(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for cap in placeholder_regex().captures_iter(text) {
        let name = cap[1].to_string();
        if seen.insert(name.clone()) {
            out.push(name);
        }
    }
    out
}

/// Per-locale parameterized text for one stable key.
///
/// Placeholders are written `${name}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    texts: BTreeMap<Locale, String>,
    declared: Option<BTreeSet<String>>,
}

impl Template {
    /// Template with no texts yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the text for a locale (builder pattern).
    #[must_use]
    pub fn text(mut self, locale: Locale, text: impl Into<String>) -> Self {
        self.texts.insert(locale, text.into());
        self
    }

    /// English text.
    #[must_use]
    pub fn en(self, text: impl Into<String>) -> Self {
        self.text(Locale::En, text)
    }

    /// German text.
    #[must_use]
    pub fn de(self, text: impl Into<String>) -> Self {
        self.text(Locale::De, text)
    }

    /// French text.
    #[must_use]
    pub fn fr(self, text: impl Into<String>) -> Self {
        self.text(Locale::Fr, text)
    }

    /// Japanese text.
    #[must_use]
    pub fn ja(self, text: impl Into<String>) -> Self {
        self.text(Locale::Ja, text)
    }

    /// Chinese text.
    #[must_use]
    pub fn cn(self, text: impl Into<String>) -> Self {
        self.text(Locale::Cn, text)
    }

    /// Korean text.
    #[must_use]
    pub fn ko(self, text: impl Into<String>) -> Self {
        self.text(Locale::Ko, text)
    }

    /// Declares the parameters this template accepts. Declared templates are
    /// checked at load time: every locale may only reference declared names.
    #[must_use]
    pub fn params<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declared = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Text for `locale`, falling back to `default`.
    #[must_use]
    pub fn text_for(&self, locale: Locale, default: Locale) -> Option<(Locale, &str)> {
        self.texts
            .get(&locale)
            .map(|t| (locale, t.as_str()))
            .or_else(|| self.texts.get(&default).map(|t| (default, t.as_str())))
    }

    fn validate(&self, key: &str, default: Locale, out: &mut Vec<LoadViolation>) {
        if !self.texts.contains_key(&default) {
            out.push(LoadViolation::MissingDefaultLocale {
                template: key.to_string(),
                locale: default,
            });
        }
        let Some(declared) = &self.declared else {
            return;
        };
        for (locale, text) in &self.texts {
            for name in placeholders(text) {
                if !declared.contains(&name) {
                    out.push(LoadViolation::UndefinedTemplateParameter {
                        template: key.to_string(),
                        locale: *locale,
                        parameter: name,
                    });
                }
            }
        }
    }
}

/// Templates keyed by stable key.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: HashMap<String, Template>,
}

impl TemplateCatalog {
    /// Empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a template (builder pattern).
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, template: Template) -> Self {
        self.insert(key, template);
        self
    }

    /// Adds or replaces a template.
    pub fn insert(&mut self, key: impl Into<String>, template: Template) {
        self.templates.insert(key.into(), template);
    }

    /// Looks up `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Template> {
        self.templates.get(key)
    }

    /// Whether `key` is defined.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.templates.contains_key(key)
    }

    /// Number of templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// True when there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Copies templates from `other` whose keys are not defined here.
    pub fn merge_missing(&mut self, other: &Self) {
        for (key, template) in &other.templates {
            self.templates
                .entry(key.clone())
                .or_insert_with(|| template.clone());
        }
    }

    /// Load-time checks; violations are appended in key order.
    pub fn validate(&self, default: Locale, out: &mut Vec<LoadViolation>) {
        let mut keys: Vec<&String> = self.templates.keys().collect();
        keys.sort();
        for key in keys {
            self.templates[key].validate(key, default, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_deduplicated_in_order() {
        let names = placeholders("${player} then ${dir}, again ${player}");
        assert_eq!(names, vec!["player", "dir"]);
        assert!(placeholders("no params").is_empty());
    }

    #[test]
    fn text_for_falls_back_to_default_locale() {
        let t = Template::new().en("Go to Corner").de("In eine Ecke gehen");
        assert_eq!(t.text_for(Locale::De, Locale::En), Some((Locale::De, "In eine Ecke gehen")));
        assert_eq!(t.text_for(Locale::Ko, Locale::En), Some((Locale::En, "Go to Corner")));
        assert_eq!(Template::new().ja("x").text_for(Locale::De, Locale::En), None);
    }

    #[test]
    fn validate_flags_undeclared_parameters_and_missing_default() {
        let catalog = TemplateCatalog::new()
            .with(
                "tankBusterOnPlayer",
                Template::new()
                    .en("Tank Buster on ${player}")
                    .fr("Tankbuster sur ${joueur}")
                    .params(["player"]),
            )
            .with("onlyGerman", Template::new().de("Nur Deutsch"));

        let mut out = Vec::new();
        catalog.validate(Locale::En, &mut out);
        assert_eq!(
            out,
            vec![
                LoadViolation::MissingDefaultLocale {
                    template: "onlyGerman".to_string(),
                    locale: Locale::En,
                },
                LoadViolation::UndefinedTemplateParameter {
                    template: "tankBusterOnPlayer".to_string(),
                    locale: Locale::Fr,
                    parameter: "joueur".to_string(),
                },
            ]
        );
    }

    #[test]
    fn merge_missing_keeps_existing_keys() {
        let mut local = TemplateCatalog::new().with("aoe", Template::new().en("Raidwide"));
        let builtin = TemplateCatalog::new()
            .with("aoe", Template::new().en("aoe"))
            .with("spread", Template::new().en("Spread"));
        local.merge_missing(&builtin);
        assert_eq!(local.len(), 2);
        assert_eq!(local.get("aoe").and_then(|t| t.text_for(Locale::En, Locale::En)).map(|(_, s)| s), Some("Raidwide"));
    }
}
