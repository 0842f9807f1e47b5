use std::path::{Path, PathBuf};

use tracing::info;

use super::VersionToken;
use crate::error::InjectError;

/// Placeholder the site sources carry wherever the version belongs
pub const DEFAULT_MARKER: &str = "BUILD_VERSION";

/// Files rewritten on every deployment, relative to the site root
pub const DEFAULT_TARGETS: &[&str] = &["sw.js", "index.html"];

/// Outcome of one injection run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectionReport {
    /// Each target with the number of markers replaced in it
    pub files: Vec<(PathBuf, usize)>,
}

impl InjectionReport {
    pub fn total_replacements(&self) -> usize {
        self.files.iter().map(|(_, count)| count).sum()
    }
}

/// Replaces the version marker in a fixed list of files, in place.
pub struct Injector {
    root: PathBuf,
    targets: Vec<PathBuf>,
    marker: String,
}

impl Injector {
    pub fn new(root: impl Into<PathBuf>, targets: Vec<PathBuf>, marker: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            targets,
            marker: marker.into(),
        }
    }

    /// Injector for the default site layout rooted at `root`
    pub fn for_site(root: impl Into<PathBuf>) -> Self {
        Self::new(
            root,
            DEFAULT_TARGETS.iter().map(PathBuf::from).collect(),
            DEFAULT_MARKER,
        )
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Stamp `token` into every target. Stops at the first file that can't be
    /// read or written; a deployment with unversioned assets must not ship.
    pub fn run(&self, token: &VersionToken) -> Result<InjectionReport, InjectError> {
        info!(version = %token, "Injecting build version");

        let mut report = InjectionReport::default();
        for target in &self.targets {
            let path = self.root.join(target);
            let count = self.inject_file(&path, token)?;
            info!(file = %target.display(), replacements = count, "Injected");
            report.files.push((target.clone(), count));
        }
        Ok(report)
    }

    fn inject_file(&self, path: &Path, token: &VersionToken) -> Result<usize, InjectError> {
        let original = std::fs::read_to_string(path).map_err(|source| InjectError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let count = if self.marker.is_empty() {
            0
        } else {
            original.matches(self.marker.as_str()).count()
        };
        if count == 0 {
            return Ok(0);
        }

        let updated = original.replace(self.marker.as_str(), token.as_str());
        std::fs::write(path, updated).map_err(|source| InjectError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(count)
    }
}
