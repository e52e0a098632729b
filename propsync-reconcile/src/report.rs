//! Run results and the audit report written at the end of every run.
//!
//! The report is a pretty-printed JSON document at
//! `<output_dir>/sync-results-<unix-millis>.json`. It is written to a hidden
//! `.tmp` file first and then linked into place, so a crash never leaves a
//! truncated report and an existing report is never replaced. When another
//! run already claimed the name, `-1`, `-2`, ... is appended.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use propsync_core::{Diff, PropertyName, SyncError};

use crate::error::{io_err, ReconcileError};

/// Outcome for one property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyResult {
    pub property: PropertyName,
    /// Adapter ids merged for this property, in invocation order.
    pub sources: Vec<String>,
    pub updates_count: usize,
    pub errors_count: usize,
    pub updates: Vec<Diff>,
    pub errors: Vec<SyncError>,
    /// Set when the property could not be reconciled at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub duration_seconds: f64,
}

impl PropertyResult {
    /// Result of a property that went through reconciliation. Updates and
    /// errors are sorted by entity id so the report never depends on the
    /// order in which workers finished.
    pub fn completed(
        property: PropertyName,
        sources: Vec<String>,
        mut updates: Vec<Diff>,
        mut errors: Vec<SyncError>,
        duration_seconds: f64,
    ) -> Self {
        updates.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        errors.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        Self {
            property,
            sources,
            updates_count: updates.len(),
            errors_count: errors.len(),
            updates,
            errors,
            failure: None,
            duration_seconds,
        }
    }

    /// Result of a property whose desired state could not be fetched.
    pub fn failed(
        property: PropertyName,
        sources: Vec<String>,
        failure: String,
        duration_seconds: f64,
    ) -> Self {
        Self {
            property,
            sources,
            updates_count: 0,
            errors_count: 0,
            updates: Vec::new(),
            errors: Vec::new(),
            failure: Some(failure),
            duration_seconds,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Everything one reconciliation run did. Built once, never mutated after
/// it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub org: String,
    pub dry_run: bool,
    pub sources: Vec<PropertyResult>,
    pub total_updates: usize,
    pub total_errors: usize,
    pub failed_properties: usize,
    /// The run was interrupted; in-flight entities are reported as errors.
    pub cancelled: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
}

impl RunResult {
    pub fn assemble(
        org: String,
        dry_run: bool,
        sources: Vec<PropertyResult>,
        cancelled: bool,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        let total_updates = sources.iter().map(|s| s.updates_count).sum();
        let total_errors = sources.iter().map(|s| s.errors_count).sum();
        let failed_properties = sources.iter().filter(|s| s.is_failed()).count();
        let duration_seconds =
            (end_time - start_time).num_milliseconds().max(0) as f64 / 1000.0;
        Self {
            org,
            dry_run,
            sources,
            total_updates,
            total_errors,
            failed_properties,
            cancelled,
            start_time,
            end_time,
            duration_seconds,
        }
    }

    /// `true` when no entity errored, every property was fetched and the run
    /// was not interrupted.
    pub fn is_clean(&self) -> bool {
        self.total_errors == 0 && self.failed_properties == 0 && !self.cancelled
    }

    /// Process exit code: 0 when clean, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.is_clean() {
            0
        } else {
            1
        }
    }
}

/// `<dir>/sync-results-<end_time as unix millis>.json`. Pure, no I/O.
pub fn report_path_at(dir: &Path, result: &RunResult) -> PathBuf {
    dir.join(report_name(result, 0))
}

fn report_name(result: &RunResult, attempt: usize) -> String {
    let millis = result.end_time.timestamp_millis();
    match attempt {
        0 => format!("sync-results-{millis}.json"),
        n => format!("sync-results-{millis}-{n}.json"),
    }
}

/// Write `result` under `dir` and return the path. Starts at
/// [`report_path_at`] and never overwrites an existing file.
pub fn write_at(dir: &Path, result: &RunResult) -> Result<PathBuf, ReconcileError> {
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(result)?;
    let tmp = dir.join(format!(
        ".sync-results-{}-{}.json.tmp",
        result.end_time.timestamp_millis(),
        std::process::id()
    ));
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;

    let mut attempt = 0;
    let claimed = loop {
        let path = dir.join(report_name(result, attempt));
        match std::fs::hard_link(&tmp, &path) {
            Ok(()) => break Ok(path),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => break Err(io_err(&path, e)),
        }
    };
    let _ = std::fs::remove_file(&tmp);
    claimed
}

/// Read a previously written report.
pub fn load(path: &Path) -> Result<RunResult, ReconcileError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    Ok(serde_json::from_str(&contents)?)
}
