//! Configuration: optional YAML file, environment, and the immutable
//! [`RunConfig`] handed to the reconciler.
//!
//! # Storage layout
//!
//! ```text
//! ~/.propsync/
//!   config.yaml   (optional, every field has a default)
//! ```
//!
//! # API pattern
//!
//! Like the other path-based helpers, loading has two forms:
//! - `load_at(home: &Path)`: explicit home; used in tests with `TempDir`
//! - `load()`: derives home from `dirs::home_dir()`, delegates to `load_at`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::types::{DesiredState, SourceKind};

pub const TOKEN_VAR: &str = "GITHUB_TOKEN";
pub const ORG_VAR: &str = "GITHUB_ORG";
pub const API_URL_VAR: &str = "PROPSYNC_API_URL";

pub const DEFAULT_ORG: &str = "your-org";
pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// 1. Config file
// ---------------------------------------------------------------------------

/// Where a feed-backed adapter reads its `{entity: value}` document from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeedSpec {
    /// HTTP GET returning JSON. `pointer` selects a sub-document (RFC 6901).
    Url {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pointer: Option<String>,
    },
    /// Local JSON file, e.g. a nightly LDAP export.
    File {
        file: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pointer: Option<String>,
    },
    /// Values written directly into the config file.
    Inline { values: DesiredState },
}

/// On-disk `config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    /// `adapter-id → property → feed`.
    #[serde(default)]
    pub sources: BTreeMap<String, BTreeMap<String, FeedSpec>>,
}

impl ConfigFile {
    /// Feeds configured for `kind`, if any.
    pub fn feeds_for(&self, kind: SourceKind) -> Option<&BTreeMap<String, FeedSpec>> {
        self.sources.get(kind.adapter_id())
    }

    /// Reject `sources:` keys that do not name a known adapter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for id in self.sources.keys() {
            if !SourceKind::all().iter().any(|k| k.adapter_id() == id) {
                return Err(ConfigError::UnknownSource {
                    name: id.clone(),
                    expected: SourceKind::expected_ids(),
                });
            }
        }
        Ok(())
    }
}

/// `<home>/.propsync/config.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".propsync").join("config.yaml")
}

/// Load `<home>/.propsync/config.yaml`.
///
/// Returns the default configuration if the file does not exist.
pub fn load_at(home: &Path) -> Result<ConfigFile, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    load_from(&path)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<ConfigFile, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    load_at(&home)
}

/// Load an explicitly named config file. A missing file is an error here.
pub fn load_from(path: &Path) -> Result<ConfigFile, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    file.validate()?;
    Ok(file)
}

// ---------------------------------------------------------------------------
// 2. Environment
// ---------------------------------------------------------------------------

/// Settings taken from the process environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSettings {
    pub token: String,
    pub org: String,
    /// `true` when `GITHUB_ORG` was unset and [`DEFAULT_ORG`] is in use.
    pub org_defaulted: bool,
    pub api_url: Option<String>,
}

impl EnvSettings {
    /// Read from the real process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read through `lookup`; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let token = get(TOKEN_VAR).ok_or(ConfigError::MissingToken { var: TOKEN_VAR })?;
        let (org, org_defaulted) = match get(ORG_VAR) {
            Some(org) => (org, false),
            None => (DEFAULT_ORG.to_string(), true),
        };
        Ok(Self {
            token,
            org,
            org_defaulted,
            api_url: get(API_URL_VAR),
        })
    }
}

// ---------------------------------------------------------------------------
// 3. Run configuration
// ---------------------------------------------------------------------------

/// `all` or one named item; used for `--source` and `--property`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selector {
    #[default]
    All,
    Named(String),
}

impl Selector {
    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Selector::All => true,
            Selector::Named(name) => name == candidate,
        }
    }
}

impl FromStr for Selector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("value must not be empty".to_string());
        }
        if s.eq_ignore_ascii_case("all") {
            return Ok(Selector::All);
        }
        Ok(Selector::Named(s.to_string()))
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::All => write!(f, "all"),
            Selector::Named(name) => write!(f, "{name}"),
        }
    }
}

/// Command-line switches that feed into [`RunConfig`].
#[derive(Debug, Clone, Default)]
pub struct RunFlags {
    pub source: Selector,
    pub property: Selector,
    pub dry_run: bool,
    pub verbose: bool,
}

/// Immutable settings for one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub org: String,
    pub api_url: String,
    pub source: Selector,
    pub property: Selector,
    pub dry_run: bool,
    pub verbose: bool,
    /// Maximum number of entities reconciled at the same time.
    pub concurrency: usize,
    /// Upper bound on every individual remote call.
    pub timeout: Duration,
    pub output_dir: PathBuf,
}

impl RunConfig {
    /// Combine file, environment, and flags. Environment beats file for the
    /// API URL.
    pub fn resolve(
        file: &ConfigFile,
        env: &EnvSettings,
        flags: RunFlags,
    ) -> Result<Self, ConfigError> {
        if let Selector::Named(name) = &flags.source {
            SourceKind::from_str(name).map_err(|_| ConfigError::UnknownSource {
                name: name.clone(),
                expected: SourceKind::expected_ids(),
            })?;
        }

        let concurrency = file.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        let timeout_secs = file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }

        let api_url = env
            .api_url
            .clone()
            .or_else(|| file.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        Ok(Self {
            org: env.org.clone(),
            api_url: api_url.trim_end_matches('/').to_string(),
            source: flags.source,
            property: flags.property,
            dry_run: flags.dry_run,
            verbose: flags.verbose,
            concurrency,
            timeout: Duration::from_secs(timeout_secs),
            output_dir: file.output_dir.clone().unwrap_or_else(|| PathBuf::from(".")),
        })
    }

    /// A config suitable for tests and library callers: defaults everywhere.
    pub fn for_org(org: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            api_url: DEFAULT_API_URL.to_string(),
            source: Selector::All,
            property: Selector::All,
            dry_run: false,
            verbose: false,
            concurrency: DEFAULT_CONCURRENCY,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            output_dir: PathBuf::from("."),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
