//! Error types for propsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// Startup configuration failures. All of them are fatal before a run begins.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure reading the configuration file.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load, with file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// An explicitly requested configuration file does not exist.
    #[error("config file not found at {path}")]
    NotFound { path: PathBuf },

    /// `dirs::home_dir()` returned `None`, so we cannot locate `~/.propsync/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The remote API token is not set.
    #[error("{var} environment variable is required")]
    MissingToken { var: &'static str },

    /// `--source` (or a `sources:` key) names an adapter that does not exist.
    #[error("unknown source '{name}'; expected one of: {expected}")]
    UnknownSource { name: String, expected: String },

    /// `--source` names a known adapter that has no feed configured.
    #[error("source '{name}' is not configured; add it under `sources:` in the config file")]
    SourceNotConfigured { name: String },

    /// The source/property filter combination selects nothing to reconcile.
    #[error("nothing to sync for --source={source_filter} --property={property_filter}")]
    NothingToSync {
        source_filter: String,
        property_filter: String,
    },

    /// A setting has a value outside its allowed range.
    #[error("invalid setting '{key}': {reason}")]
    InvalidSetting { key: &'static str, reason: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
