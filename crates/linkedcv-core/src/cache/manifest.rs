use std::collections::HashSet;

use crate::error::ConfigError;

/// Assets the site needs to render offline
pub const DEFAULT_ASSETS: &[&str] = &[
    "/",
    "/index.html",
    "/css/styles.css",
    "/js/main.js",
    "/js/i18n.js",
    "/lang/es.json",
    "/lang/en.json",
    "/assets/images/profile.svg",
    "/assets/images/project-shophub.svg",
    "/assets/images/project-taskmaster.svg",
    "/assets/images/project-connecthub.svg",
    "/assets/images/project-fintech.svg",
    "/assets/images/project-devfolio.svg",
    "/assets/icons/github.svg",
    "/assets/icons/linkedin.svg",
    "/assets/icons/twitter.svg",
    "/assets/icons/favicon.svg",
];

/// Ordered set of absolute asset paths precached at install time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetManifest {
    paths: Vec<String>,
}

impl AssetManifest {
    pub fn new<I, S>(paths: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        for path in paths {
            let path = path.into();
            if !path.starts_with('/') {
                return Err(ConfigError::RelativeAsset(path));
            }
            if !seen.insert(path.clone()) {
                return Err(ConfigError::DuplicateAsset(path));
            }
            ordered.push(path);
        }
        Ok(Self { paths: ordered })
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }
}

impl Default for AssetManifest {
    fn default() -> Self {
        Self {
            paths: DEFAULT_ASSETS.iter().map(|p| p.to_string()).collect(),
        }
    }
}
