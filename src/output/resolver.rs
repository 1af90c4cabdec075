//! Template resolution.
//!
//! Picks the template for a message, falls back across locales and
//! substitutes parameters in one pass.

use std::sync::Arc;

use crate::error::OutputError;
use crate::locale::Locale;

use super::template::{placeholder_regex, placeholders, Template, TemplateCatalog};
use super::{Params, RenderablePayload, Severity};

/// Turns template requests into renderable text.
///
/// Lookup order is the trigger-local catalog (when given), then the shared
/// catalog. Missing locales fall back to `default_locale`. Every placeholder
/// in the chosen text must be bound; extra parameters are ignored.
#[derive(Debug, Clone)]
pub struct OutputResolver {
    default_locale: Locale,
    catalog: Arc<TemplateCatalog>,
}

impl OutputResolver {
    /// Resolver over a shared catalog.
    #[must_use]
    pub fn new(default_locale: Locale, catalog: Arc<TemplateCatalog>) -> Self {
        Self {
            default_locale,
            catalog,
        }
    }

    /// Locale used when a template lacks the requested one.
    #[must_use]
    pub const fn default_locale(&self) -> Locale {
        self.default_locale
    }

    /// The shared catalog.
    #[must_use]
    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    /// Resolves a template from the shared catalog.
    pub fn resolve(
        &self,
        severity: Severity,
        key: &str,
        params: &Params,
        locale: Locale,
    ) -> Result<RenderablePayload, OutputError> {
        self.resolve_scoped(None, severity, key, params, locale)
    }

    /// Resolves a template, consulting `local` before the shared catalog.
    pub fn resolve_scoped(
        &self,
        local: Option<&TemplateCatalog>,
        severity: Severity,
        key: &str,
        params: &Params,
        locale: Locale,
    ) -> Result<RenderablePayload, OutputError> {
        let template = self.lookup(local, key)?;
        let (chosen, text) = template
            .text_for(locale, self.default_locale)
            .ok_or_else(|| OutputError::MissingLocale {
                key: key.to_string(),
                locale,
            })?;
        let text = substitute(key, text, params)?;
        Ok(RenderablePayload {
            severity,
            text,
            locale: chosen,
            duration: None,
        })
    }

    fn lookup<'a>(&'a self, local: Option<&'a TemplateCatalog>, key: &str) -> Result<&'a Template, OutputError> {
        local
            .and_then(|c| c.get(key))
            .or_else(|| self.catalog.get(key))
            .ok_or_else(|| OutputError::UnknownTemplate { key: key.to_string() })
    }
}

fn substitute(key: &str, text: &str, params: &Params) -> Result<String, OutputError> {
    if let Some(missing) = placeholders(text).into_iter().find(|name| !params.contains_key(name)) {
        return Err(OutputError::UndefinedParameter {
            key: key.to_string(),
            parameter: missing,
        });
    }
    // Single pass, so substituted values are never re-expanded.
    let out = placeholder_regex().replace_all(text, |caps: &regex::Captures<'_>| {
        params.get(&caps[1]).cloned().unwrap_or_default()
    });
    Ok(out.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> OutputResolver {
        let catalog = TemplateCatalog::new()
            .with(
                "tankBusterOnPlayer",
                Template::new()
                    .en("Tank Buster on ${player}")
                    .de("Tankbuster auf ${player}"),
            )
            .with("goFront", Template::new().en("Go Front").ja("前へ"));
        OutputResolver::new(Locale::En, Arc::new(catalog))
    }

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    #[test]
    fn substitutes_named_parameters() {
        let payload = resolver()
            .resolve(Severity::Alarm, "tankBusterOnPlayer", &params(&[("player", "Tank One")]), Locale::De)
            .unwrap();
        assert_eq!(payload.text, "Tankbuster auf Tank One");
        assert_eq!(payload.locale, Locale::De);
        assert_eq!(payload.severity, Severity::Alarm);
        assert_eq!(payload.duration, None);
    }

    #[test]
    fn missing_locale_falls_back_to_default() {
        let payload = resolver()
            .resolve(Severity::Info, "goFront", &Params::new(), Locale::Fr)
            .unwrap();
        assert_eq!(payload.text, "Go Front");
        assert_eq!(payload.locale, Locale::En);
    }

    #[test]
    fn unbound_parameter_is_an_error() {
        let err = resolver()
            .resolve(Severity::Info, "tankBusterOnPlayer", &Params::new(), Locale::En)
            .unwrap_err();
        assert_eq!(
            err,
            OutputError::UndefinedParameter {
                key: "tankBusterOnPlayer".to_string(),
                parameter: "player".to_string(),
            }
        );
    }

    #[test]
    fn extra_parameters_are_ignored() {
        let payload = resolver()
            .resolve(Severity::Info, "goFront", &params(&[("unused", "x")]), Locale::En)
            .unwrap();
        assert_eq!(payload.text, "Go Front");
    }

    #[test]
    fn unknown_key_is_an_error() {
        let err = resolver()
            .resolve(Severity::Info, "nope", &Params::new(), Locale::En)
            .unwrap_err();
        assert_eq!(err, OutputError::UnknownTemplate { key: "nope".to_string() });
    }

    #[test]
    fn local_catalog_shadows_shared_one() {
        let local = TemplateCatalog::new().with("goFront", Template::new().en("Front of boss"));
        let payload = resolver()
            .resolve_scoped(Some(&local), Severity::Info, "goFront", &Params::new(), Locale::En)
            .unwrap();
        assert_eq!(payload.text, "Front of boss");
    }
}
