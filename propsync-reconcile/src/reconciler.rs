//! Reconciliation run: adapters → entity listing → per-entity diff and write
//! → report.
//!
//! ## Run phases
//!
//! 1. `FetchingDesiredState`: every selected adapter, grouped by property.
//!    An adapter failure fails that property only.
//! 2. `EnumeratingEntities`: one `list_entities()` call for the whole run.
//!    Failure here aborts the run.
//! 3. `Reconciling`: per property, entities are read, diffed and (unless
//!    dry-run) written by at most `concurrency` blocking workers. A worker
//!    keeps its permit until its remote calls return, even after its entity
//!    timed out, so remote concurrency never exceeds the limit.
//! 4. `Reporting`: results are sorted, totalled and written to disk.
//!
//! Entity failures never abort the run. A shutdown signal stops dispatch and
//! turns every in-flight entity into an error, since its write may or may not
//! have reached the remote.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use propsync_core::{DesiredState, Diff, EntityId, PropertyName, RunConfig, SyncError};

use crate::adapter::{fetch_merged, AdapterRegistry, PropertyPlan};
use crate::diff::{diff, display_value};
use crate::error::{ReconcileError, RemoteError};
use crate::remote::RemoteStateClient;
use crate::report::{self, PropertyResult, RunResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Idle,
    FetchingDesiredState,
    EnumeratingEntities,
    Reconciling,
    Reporting,
    Done,
}

/// What happened to one (entity, property) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityOutcome {
    /// Current value already matches.
    Unchanged,
    /// Written, or would have been written in dry-run.
    Updated(Diff),
    /// The read or the write failed.
    Failed(SyncError),
}

/// A finished run and where its report was written.
#[derive(Debug, Clone)]
pub struct CompletedRun {
    pub result: RunResult,
    pub report_path: PathBuf,
}

/// A property whose desired state was fetched (or failed to be).
enum Prepared {
    Ready {
        plan: PropertyPlan,
        desired: DesiredState,
        fetch_seconds: f64,
    },
    Failed(PropertyResult),
}

/// Drives one reconciliation run.
pub struct Reconciler {
    config: RunConfig,
    registry: AdapterRegistry,
    client: Arc<dyn RemoteStateClient>,
    shutdown: Option<broadcast::Receiver<()>>,
    phase: RunPhase,
    cancelled: bool,
}

impl Reconciler {
    pub fn new(
        config: RunConfig,
        registry: AdapterRegistry,
        client: Arc<dyn RemoteStateClient>,
    ) -> Self {
        Self {
            config,
            registry,
            client,
            shutdown: None,
            phase: RunPhase::Idle,
            cancelled: false,
        }
    }

    /// Stop dispatching and wind the run down when a message arrives on
    /// `shutdown`.
    pub fn with_shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Execute the run and write its report to `config.output_dir`.
    pub async fn run(mut self) -> Result<CompletedRun, ReconcileError> {
        let start_time = Utc::now();
        let plans = self
            .registry
            .plan(&self.config.source, &self.config.property)?;

        self.enter(RunPhase::FetchingDesiredState);
        let mut prepared = Vec::with_capacity(plans.len());
        for plan in plans {
            prepared.push(self.fetch_desired(plan).await);
        }

        let mut results = Vec::with_capacity(prepared.len());
        let ready = prepared
            .iter()
            .any(|p| matches!(p, Prepared::Ready { .. }));
        let entities = if ready {
            self.enter(RunPhase::EnumeratingEntities);
            self.list_entities().await?
        } else {
            Vec::new()
        };

        self.enter(RunPhase::Reconciling);
        for item in prepared {
            match item {
                Prepared::Failed(result) => results.push(result),
                Prepared::Ready {
                    plan,
                    desired,
                    fetch_seconds,
                } => {
                    let started = Instant::now();
                    let (updates, errors) = self
                        .reconcile_property(&plan.property, &desired, &entities)
                        .await;
                    results.push(PropertyResult::completed(
                        plan.property.clone(),
                        plan.source_ids(),
                        updates,
                        errors,
                        fetch_seconds + started.elapsed().as_secs_f64(),
                    ));
                }
            }
        }

        self.enter(RunPhase::Reporting);
        let result = RunResult::assemble(
            self.config.org.clone(),
            self.config.dry_run,
            results,
            self.cancelled,
            start_time,
            Utc::now(),
        );
        let report_path = report::write_at(&self.config.output_dir, &result)?;
        self.enter(RunPhase::Done);

        Ok(CompletedRun {
            result,
            report_path,
        })
    }

    fn enter(&mut self, phase: RunPhase) {
        tracing::debug!(from = ?self.phase, to = ?phase, "run phase");
        self.phase = phase;
    }

    async fn fetch_desired(&self, plan: PropertyPlan) -> Prepared {
        let started = Instant::now();
        let sources = plan.source_ids();
        let worker_plan = plan.clone();
        let fetched = tokio::task::spawn_blocking(move || fetch_merged(&worker_plan)).await;
        let fetch_seconds = started.elapsed().as_secs_f64();

        let failure = match fetched {
            Ok(Ok(desired)) => {
                tracing::info!(
                    property = %plan.property,
                    sources = ?sources,
                    values = desired.len(),
                    "desired state ready"
                );
                return Prepared::Ready {
                    plan,
                    desired,
                    fetch_seconds,
                };
            }
            Ok(Err(err)) => err.to_string(),
            Err(join_err) => format!("adapter worker failed: {join_err}"),
        };
        tracing::error!(property = %plan.property, error = %failure, "skipping property");
        Prepared::Failed(PropertyResult::failed(
            plan.property,
            sources,
            failure,
            fetch_seconds,
        ))
    }

    async fn list_entities(&self) -> Result<Vec<EntityId>, ReconcileError> {
        let client = self.client.clone();
        let listed = tokio::task::spawn_blocking(move || client.list_entities())
            .await
            .map_err(|e| ReconcileError::Worker(e.to_string()))?;
        match listed {
            Ok(entities) => {
                tracing::info!(count = entities.len(), "enumerated entities");
                Ok(entities)
            }
            Err(err) => {
                let err = match err {
                    RemoteError::Unavailable { .. } => err,
                    other => RemoteError::Unavailable {
                        reason: other.to_string(),
                    },
                };
                Err(ReconcileError::RemoteUnavailable(err))
            }
        }
    }

    /// Reconcile one property across `entities`, returning unsorted updates
    /// and errors.
    async fn reconcile_property(
        &mut self,
        property: &PropertyName,
        desired: &DesiredState,
        entities: &[EntityId],
    ) -> (Vec<Diff>, Vec<SyncError>) {
        let mut updates = Vec::new();
        let mut errors = Vec::new();
        if self.cancelled {
            return (updates, errors);
        }

        let work = work_list(entities, desired);
        tracing::info!(%property, entities = work.len(), dry_run = self.config.dry_run, "syncing property");

        // Two remote calls per entity at most; each is bounded by the client.
        let budget = self.config.timeout * 2;
        let permits = Arc::new(Semaphore::new(self.config.concurrency));
        let mut queue = work.into_iter().peekable();
        let mut in_flight: BTreeSet<EntityId> = BTreeSet::new();
        let mut join_set = JoinSet::new();

        loop {
            while queue.peek().is_some() {
                let Ok(permit) = permits.clone().try_acquire_owned() else {
                    break;
                };
                let Some(entity) = queue.next() else { break };
                let value = desired.get(&entity).flatten().map(str::to_owned);
                let client = self.client.clone();
                let property = property.clone();
                let dry_run = self.config.dry_run;
                in_flight.insert(entity.clone());

                join_set.spawn(async move {
                    let worker_entity = entity.clone();
                    let worker_property = property.clone();
                    let work = tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        reconcile_entity(
                            client.as_ref(),
                            &worker_entity,
                            &worker_property,
                            value,
                            dry_run,
                        )
                    });
                    let outcome = match tokio::time::timeout(budget, work).await {
                        Ok(Ok(outcome)) => outcome,
                        Ok(Err(join_err)) => EntityOutcome::Failed(SyncError {
                            entity_id: entity.clone(),
                            property: property.clone(),
                            message: format!("worker failed: {join_err}"),
                        }),
                        Err(_) => EntityOutcome::Failed(SyncError {
                            entity_id: entity.clone(),
                            property: property.clone(),
                            message: format!("timed out after {budget:?}; outcome unconfirmed"),
                        }),
                    };
                    (entity, outcome)
                });
            }

            if join_set.is_empty() && queue.peek().is_none() {
                break;
            }

            tokio::select! {
                _ = wait_for_shutdown(&mut self.shutdown) => {
                    self.cancelled = true;
                    break;
                }
                Some(joined) = join_set.join_next(), if !join_set.is_empty() => {
                    match joined {
                        Ok((entity, outcome)) => {
                            in_flight.remove(&entity);
                            self.record(outcome, &mut updates, &mut errors);
                        }
                        Err(join_err) => {
                            tracing::error!(error = %join_err, "entity task failed");
                        }
                    }
                }
                // Every permit is held by a timed-out worker; wait for one back.
                permit = permits.clone().acquire_owned(), if join_set.is_empty() => {
                    drop(permit);
                }
            }
        }

        let reason = if self.cancelled {
            join_set.abort_all();
            let skipped = queue.count();
            tracing::warn!(
                %property,
                in_flight = in_flight.len(),
                skipped,
                "run interrupted; in-flight entities recorded as errors"
            );
            "run interrupted before the remote confirmed the outcome"
        } else {
            "worker lost before reporting an outcome"
        };
        for entity in in_flight {
            let error = SyncError {
                entity_id: entity,
                property: property.clone(),
                message: reason.to_string(),
            };
            self.record(EntityOutcome::Failed(error), &mut updates, &mut errors);
        }

        (updates, errors)
    }

    fn record(
        &self,
        outcome: EntityOutcome,
        updates: &mut Vec<Diff>,
        errors: &mut Vec<SyncError>,
    ) {
        match outcome {
            EntityOutcome::Unchanged => {}
            EntityOutcome::Updated(diff) => updates.push(diff),
            EntityOutcome::Failed(error) => {
                if self.config.verbose {
                    tracing::warn!(entity = %error.entity_id, property = %error.property, "{}", error.message);
                } else {
                    tracing::debug!(entity = %error.entity_id, property = %error.property, "{}", error.message);
                }
                errors.push(error);
            }
        }
    }
}

/// Entities to reconcile for one property.
///
/// Enumerated entities the desired state has an opinion about come first, in
/// enumeration order; desired-state entities the enumeration did not return
/// follow in desired-state order. Each entity appears once.
pub fn work_list(enumerated: &[EntityId], desired: &DesiredState) -> Vec<EntityId> {
    let mut seen = HashSet::new();
    let mut work = Vec::new();
    for id in enumerated {
        if desired.contains(id) && seen.insert(id.clone()) {
            work.push(id.clone());
        }
    }
    for id in desired.keys() {
        if seen.insert(id.clone()) {
            work.push(id.clone());
        }
    }
    work
}

/// Read, diff and (unless `dry_run`) write one entity. Blocking.
pub fn reconcile_entity(
    client: &dyn RemoteStateClient,
    entity: &EntityId,
    property: &PropertyName,
    desired: Option<String>,
    dry_run: bool,
) -> EntityOutcome {
    let failed = |err: RemoteError| {
        EntityOutcome::Failed(SyncError {
            entity_id: entity.clone(),
            property: property.clone(),
            message: err.to_string(),
        })
    };

    let current = match client.get_value(entity, property) {
        Ok(current) => current,
        Err(err) => return failed(err),
    };

    let diff = diff(entity, property, current, desired);
    if !diff.is_update() {
        tracing::debug!(%entity, %property, value = display_value(diff.old_value.as_deref()), "already correct");
        return EntityOutcome::Unchanged;
    }

    let old = display_value(diff.old_value.as_deref()).to_string();
    let new = display_value(diff.new_value.as_deref()).to_string();
    if dry_run {
        tracing::info!("[dry-run] {entity}: {property} = {old} → {new}");
        return EntityOutcome::Updated(diff);
    }

    if let Err(err) = client.set_value(entity, property, diff.new_value.as_deref()) {
        return failed(err);
    }
    tracing::info!("{entity}: {property} = {old} → {new}");
    EntityOutcome::Updated(diff)
}

/// Resolves once a shutdown message arrives. Never resolves without a
/// receiver or after the sender is gone.
async fn wait_for_shutdown(shutdown: &mut Option<broadcast::Receiver<()>>) {
    if let Some(rx) = shutdown {
        loop {
            match rx.recv().await {
                Ok(()) | Err(RecvError::Lagged(_)) => return,
                Err(RecvError::Closed) => break,
            }
        }
    }
    std::future::pending::<()>().await
}
