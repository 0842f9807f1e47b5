//! Deployment versioning.
//!
//! A `VersionToken` is derived once per build from the source-control
//! revision (or the build time when no revision is available). The
//! `Injector` stamps it into the site files, and `CacheName` turns it into
//! the name of the offline cache generation for that deployment.

pub mod injector;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::utils::to_base36;

pub use injector::{InjectionReport, Injector};

/// Number of characters kept from the revision identifier
const TOKEN_LEN: usize = 8;

/// Environment variable the hosting platform sets to the commit SHA
pub const DEFAULT_REVISION_VAR: &str = "CF_PAGES_COMMIT_SHA";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn from_revision(revision: &str) -> Self {
        Self(revision.chars().take(TOKEN_LEN).collect())
    }

    /// Token for builds without a revision: the build time in base 36
    pub fn fallback(now: DateTime<Utc>) -> Self {
        let millis = u64::try_from(now.timestamp_millis()).unwrap_or_default();
        Self::from_revision(&to_base36(millis))
    }

    /// Use the revision when present and non-empty, otherwise fall back to the clock
    pub fn resolve(revision: Option<&str>, now: DateTime<Utc>) -> Self {
        match revision.map(str::trim) {
            Some(rev) if !rev.is_empty() => Self::from_revision(rev),
            _ => Self::fallback(now),
        }
    }

    pub fn from_env(var: &str) -> Self {
        let revision = std::env::var(var).ok();
        Self::resolve(revision.as_deref(), Utc::now())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of one cache generation: `<prefix>-v<token>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheName {
    name: String,
    token: VersionToken,
}

impl CacheName {
    pub fn new(prefix: &str, token: VersionToken) -> Result<Self, ConfigError> {
        if prefix.is_empty() {
            return Err(ConfigError::EmptyPrefix);
        }
        Ok(Self {
            name: format!("{}-v{}", prefix, token),
            token,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &VersionToken {
        &self.token
    }
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
