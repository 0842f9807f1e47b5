//! Site translations.
//!
//! Two JSON catalogs (`es`, `en`) are looked up by dotted key paths such as
//! `hero.tagline`. Lookups fall back from the current locale to English and
//! finally to the key path itself.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

use crate::cache::{Network, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Locale {
    Es,
    En,
}

impl Locale {
    pub const SUPPORTED: [Locale; 2] = [Locale::Es, Locale::En];

    /// Locale used when a key is missing from the current catalog
    pub const FALLBACK: Locale = Locale::En;

    pub fn code(&self) -> &'static str {
        match self {
            Locale::Es => "es",
            Locale::En => "en",
        }
    }

    pub fn toggled(&self) -> Locale {
        match self {
            Locale::Es => Locale::En,
            Locale::En => Locale::Es,
        }
    }

    /// Catalog path on the site
    pub fn catalog_path(&self) -> String {
        format!("/lang/{}.json", self.code())
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Locale {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "es" => Ok(Locale::Es),
            "en" => Ok(Locale::En),
            other => Err(anyhow::anyhow!("Unsupported locale: {}", other)),
        }
    }
}

/// Locale picked at startup, and whether it should be remembered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocaleChoice {
    pub locale: Locale,
    pub persist: bool,
}

/// Pick the locale: an explicit `?lang=` wins (and is remembered), then the
/// stored preference, then the browser language.
pub fn detect_locale(
    query: Option<&str>,
    stored: Option<&str>,
    browser: Option<&str>,
) -> LocaleChoice {
    if let Some(locale) = query.and_then(|q| q.parse().ok()) {
        return LocaleChoice {
            locale,
            persist: true,
        };
    }
    if let Some(locale) = stored.and_then(|s| s.parse().ok()) {
        return LocaleChoice {
            locale,
            persist: false,
        };
    }
    let locale = match browser {
        Some(lang) if lang.to_lowercase().starts_with("es") => Locale::Es,
        _ => Locale::En,
    };
    LocaleChoice {
        locale,
        persist: false,
    }
}

#[derive(Debug, Clone)]
pub struct Translations {
    current: Locale,
    es: Value,
    en: Value,
}

impl Translations {
    pub fn new(current: Locale, es: Value, en: Value) -> Self {
        Self { current, es, en }
    }

    /// Load `<dir>/es.json` and `<dir>/en.json`
    pub fn load_dir(dir: &Path, current: Locale) -> Result<Self> {
        let read = |locale: Locale| -> Result<Value> {
            let path = dir.join(format!("{}.json", locale.code()));
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read catalog: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse catalog: {}", path.display()))
        };
        Ok(Self::new(current, read(Locale::Es)?, read(Locale::En)?))
    }

    /// Fetch both catalogs from the site, concurrently
    pub async fn fetch(network: &dyn Network, current: Locale) -> Result<Self> {
        let load = |locale: Locale| async move {
            let path = locale.catalog_path();
            let response = network
                .fetch(&Request::get(path.as_str()))
                .await
                .with_context(|| format!("Failed to fetch catalog {}", path))?;
            if !response.is_success() {
                anyhow::bail!("Catalog {} returned status {}", path, response.status);
            }
            serde_json::from_slice::<Value>(&response.body)
                .with_context(|| format!("Failed to parse catalog {}", path))
        };
        let (es, en) = futures::try_join!(load(Locale::Es), load(Locale::En))?;
        debug!(locale = %current, "Translations loaded");
        Ok(Self::new(current, es, en))
    }

    pub fn current(&self) -> Locale {
        self.current
    }

    pub fn set_current(&mut self, locale: Locale) {
        self.current = locale;
    }

    /// Switch between the two locales, returning the new one
    pub fn toggle(&mut self) -> Locale {
        self.current = self.current.toggled();
        self.current
    }

    fn catalog(&self, locale: Locale) -> &Value {
        match locale {
            Locale::Es => &self.es,
            Locale::En => &self.en,
        }
    }

    fn lookup<'a>(catalog: &'a Value, path: &str) -> Option<&'a Value> {
        path.split('.')
            .try_fold(catalog, |node, key| node.get(key))
            .filter(|v| !v.is_null())
    }

    pub fn value(&self, path: &str) -> Option<&Value> {
        Self::lookup(self.catalog(self.current), path)
            .or_else(|| Self::lookup(self.catalog(Locale::FALLBACK), path))
    }

    /// Translated string, or the key path itself when there is none
    pub fn text(&self, path: &str) -> String {
        match self.value(path) {
            Some(Value::String(s)) => s.clone(),
            _ => path.to_string(),
        }
    }

    /// Resolve a `attr:key|attr:key` binding list into attribute values.
    /// Pairs without a non-empty string translation are skipped.
    pub fn attribute_bindings(&self, mapping: &str) -> Vec<(String, String)> {
        mapping
            .split('|')
            .filter_map(|pair| {
                let (attr, key) = pair.split_once(':')?;
                match self.value(key.trim()) {
                    Some(Value::String(s)) if !s.is_empty() => {
                        Some((attr.trim().to_string(), s.clone()))
                    }
                    _ => None,
                }
            })
            .collect()
    }

    /// Link target of the "download CV" buttons for the current locale
    pub fn cv_download_path(&self) -> String {
        format!(
            "assets/docs/CV_{}.pdf",
            self.current.code().to_uppercase()
        )
    }
}
