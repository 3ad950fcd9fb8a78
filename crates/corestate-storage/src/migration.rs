//! One-shot migration from the legacy on-disk KV store to the embedded
//! SQL store (spec §4.2, §8 scenario 6): "enumerate its records for the
//! metrics namespace, re-create each in the SQL store (ignoring
//! `already-exists`), then delete the legacy file." Best-effort (spec
//! §7): "log and proceed on failure, and unconditionally remove the
//! legacy file after attempt."

use corestate_api::context::RequestContext;
use corestate_api::core_state::{CoreState, CreateOptions, ListOptions};
use corestate_types::Result;
use std::path::Path;

use crate::ondisk::OnDiskDriver;
use crate::sql::SqlDriver;

/// How many records the migration moved, and how many were already
/// present in the SQL store and skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Records inserted into the SQL store.
    pub migrated: usize,
    /// Records that already existed in the SQL store and were skipped.
    pub skipped_existing: usize,
}

/// Runs the legacy-KV-to-SQL migration for the `metrics` namespace if
/// `legacy_path` exists, unconditionally removing it afterward regardless
/// of outcome.
pub async fn migrate_legacy_metrics_to_sql(legacy_path: &Path, sql: &SqlDriver) -> MigrationReport {
    if !legacy_path.exists() {
        return MigrationReport::default();
    }
    let report = run_migration(legacy_path, sql).await;
    if let Err(e) = std::fs::remove_file(legacy_path) {
        tracing::warn!(error = %e, path = %legacy_path.display(), "failed to remove legacy on-disk KV file after migration attempt");
    }
    report.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "legacy-to-sql migration failed; proceeding without it");
        MigrationReport::default()
    })
}

async fn run_migration(legacy_path: &Path, sql: &SqlDriver) -> Result<MigrationReport> {
    let legacy = OnDiskDriver::open(legacy_path, false)?;
    let ctx = RequestContext::internal("legacy-metrics-migration");

    let kinds = ["MachineStatusLink", "Counter", "Gauge"];
    let mut report = MigrationReport::default();
    for kind in kinds {
        let records = legacy.list("metrics", kind, &ListOptions::default(), &ctx).await?;
        for record in records {
            match sql.create(record, &CreateOptions::default(), &ctx).await {
                Ok(_) => report.migrated += 1,
                Err(e) if e.is_conflict() => report.skipped_existing += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping record during legacy-to-sql migration");
                }
            }
        }
    }
    Ok(report)
}
