//! # propsync-reconcile
//!
//! Property reconciliation engine.
//!
//! Build an [`AdapterRegistry`] of sources of truth, hand it to a
//! [`Reconciler`] together with a [`RemoteStateClient`] and a
//! [`RunConfig`](propsync_core::RunConfig), then call [`Reconciler::run`].

pub mod adapter;
pub mod diff;
pub mod error;
pub mod reconciler;
pub mod remote;
pub mod report;
pub mod teams;

pub use adapter::{AdapterRegistry, FeedAdapter, PropertyPlan, SourceAdapter};
pub use error::{AdapterError, ReconcileError, RemoteError};
pub use reconciler::{CompletedRun, EntityOutcome, Reconciler};
pub use remote::{GithubClient, RemoteStateClient, TeamDirectory};
pub use report::{PropertyResult, RunResult};
pub use teams::PlatformTeamsAdapter;
