//! propsync core library: domain types, configuration, errors.
//!
//! Public API surface:
//! - [`types`]: newtypes, desired state, diffs and per-entity errors
//! - [`error`]: [`ConfigError`]
//! - [`config`]: configuration file loading and [`RunConfig`] resolution

pub mod config;
pub mod error;
pub mod types;

pub use config::{ConfigFile, EnvSettings, FeedSpec, RunConfig, RunFlags, Selector};
pub use error::ConfigError;
pub use types::{
    Action, DesiredState, Diff, EntityId, PropertyName, PropertySpec, SourceKind, SyncError,
};
