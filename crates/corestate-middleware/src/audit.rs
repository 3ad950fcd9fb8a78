//! The audit middleware and its companion log (spec §4.4 item 1, §4.7).

use async_trait::async_trait;
use corestate_api::context::RequestContext;
use corestate_api::core_state::{
    BatchStream, CoreState, CreateOptions, DestroyOptions, EventStream, GetOptions, ListOptions,
    UpdateOptions, WatchOptions,
};
use corestate_types::access::Verb;
use corestate_types::error::CoreError;
use corestate_types::resource::{Labels, Resource, ResourcePointer};
use corestate_types::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use time::format_description::well_known::Rfc3339;
use time::{Duration as TimeDuration, OffsetDateTime};

/// A single audit record: a mutating operation plus its outcome.
///
/// Carries resource labels for operator visibility but never the payload
/// (spec §4.7: "no payload").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// RFC 3339 timestamp of the attempt.
    pub timestamp: String,
    /// The operation's verb.
    pub verb: String,
    /// The resource's namespace.
    pub namespace: String,
    /// The resource's kind.
    pub kind: String,
    /// The resource's id.
    pub id: String,
    /// The caller's declared role.
    pub actor_role: String,
    /// The caller's email/identity string, if known.
    pub actor_email: Option<String>,
    /// The caller's remote IP, if known.
    pub actor_remote_ip: Option<String>,
    /// The caller's user agent, if known.
    pub actor_user_agent: Option<String>,
    /// The resource's labels at the time of the attempt.
    pub labels: Labels,
    /// `"success"` or `"error"`.
    pub outcome: String,
    /// The error message, present only when `outcome == "error"`.
    pub error: Option<String>,
}

fn day_file_name(date: time::Date) -> String {
    format!("{date}.jsonlog")
}

/// Wraps an inner `CoreState`, writing one [`AuditRecord`] per mutating
/// call to a daily rolling JSON-Lines file and a companion SQLite table.
///
/// The record is written regardless of whether the inner call succeeds
/// (spec §4.7/§8 "audit atomicity": exactly one record per attempt, even
/// on backend failure), so the write lives in a single code path that
/// runs after the inner call either way.
pub struct AuditMiddleware {
    inner: Arc<dyn CoreState>,
    dir: PathBuf,
    db: Arc<Mutex<rusqlite::Connection>>,
}

impl AuditMiddleware {
    /// Opens (creating if absent) the audit directory and companion
    /// SQLite database at `dir/audit.db`.
    pub fn open(inner: Arc<dyn CoreState>, dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| CoreError::Internal(e.into()))?;
        let db = rusqlite::Connection::open(dir.join("audit.db")).map_err(|e| CoreError::Internal(e.into()))?;
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                verb TEXT NOT NULL,
                namespace TEXT NOT NULL,
                kind TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                actor_role TEXT NOT NULL,
                outcome TEXT NOT NULL,
                error TEXT
            )",
        )
        .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(Self { inner, dir, db: Arc::new(Mutex::new(db)) })
    }

    async fn write_record(&self, record: &AuditRecord) {
        if let Err(e) = self.append_jsonl(record).await {
            tracing::warn!(error = %e, "failed to append audit jsonl record");
        }
        if let Err(e) = self.insert_sql(record).await {
            tracing::warn!(error = %e, "failed to insert audit sql record");
        }
    }

    async fn append_jsonl(&self, record: &AuditRecord) -> Result<()> {
        let date = OffsetDateTime::now_utc().date();
        let path = self.dir.join(day_file_name(date));
        let mut line = serde_json::to_vec(record).map_err(|e| CoreError::Internal(e.into()))?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| CoreError::Internal(e.into()))?;
        tokio::io::AsyncWriteExt::write_all(&mut file, &line)
            .await
            .map_err(|e| CoreError::Internal(e.into()))
    }

    async fn insert_sql(&self, record: &AuditRecord) -> Result<()> {
        let db = self.db.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| CoreError::Internal(anyhow::anyhow!("audit db mutex poisoned")))?;
            conn.execute(
                "INSERT INTO audit_log (timestamp, verb, namespace, kind, resource_id, actor_role, outcome, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    record.timestamp,
                    record.verb,
                    record.namespace,
                    record.kind,
                    record.id,
                    record.actor_role,
                    record.outcome,
                    record.error,
                ],
            )
            .map_err(|e| CoreError::Internal(e.into()))?;
            Ok(())
        })
        .await
        .map_err(|e| CoreError::Internal(e.into()))?
    }

    fn record_for<T>(
        &self,
        verb: Verb,
        ptr: &ResourcePointer,
        labels: Labels,
        ctx: &RequestContext,
        outcome: &Result<T>,
    ) -> AuditRecord {
        AuditRecord {
            timestamp: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
            verb: verb.as_str().to_string(),
            namespace: ptr.namespace.clone(),
            kind: ptr.kind.clone(),
            id: ptr.id.clone(),
            actor_role: ctx.actor.role.clone(),
            actor_email: ctx.actor.email.clone(),
            actor_remote_ip: ctx.actor.remote_ip.clone(),
            actor_user_agent: ctx.actor.user_agent.clone(),
            labels,
            outcome: if outcome.is_ok() { "success".to_string() } else { "error".to_string() },
            error: outcome.as_ref().err().map(|e| e.to_string()),
        }
    }

    /// Returns every record whose timestamp falls in `[start, end]`,
    /// concatenating day files in chronological order (spec §4.7).
    pub async fn read_window(&self, start: OffsetDateTime, end: OffsetDateTime) -> Result<Vec<AuditRecord>> {
        let mut out = Vec::new();
        let mut day = start.date();
        let last_day = end.date();
        loop {
            let path = self.dir.join(day_file_name(day));
            if let Ok(contents) = tokio::fs::read_to_string(&path).await {
                for line in contents.lines() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let record: AuditRecord =
                        serde_json::from_str(line).map_err(|e| CoreError::Internal(e.into()))?;
                    let ts = OffsetDateTime::parse(&record.timestamp, &Rfc3339)
                        .map_err(|e| CoreError::Internal(e.into()))?;
                    if ts >= start && ts <= end {
                        out.push(record);
                    }
                }
            }
            if day >= last_day {
                break;
            }
            day = day.next_day().unwrap_or(last_day);
        }
        Ok(out)
    }

    /// Removes day files older than `retention_days` before today (UTC,
    /// truncated to day boundaries), as required by spec §4.7.
    pub async fn enforce_retention(&self, retention_days: u32) {
        let cutoff = OffsetDateTime::now_utc().date() - TimeDuration::days(retention_days as i64);
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(_) => return,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(date_part) = name.strip_suffix(".jsonlog") else { continue };
            let Ok(date) = time::Date::parse(
                date_part,
                time::macros::format_description!("[year]-[month]-[day]"),
            ) else {
                continue;
            };
            if date < cutoff {
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }
    }

    /// Spawns the periodic retention-cleanup loop named in spec §4.7,
    /// returning its join handle so the caller can cancel it.
    pub fn spawn_retention_loop(self: &Arc<Self>, retention_days: u32, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.enforce_retention(retention_days).await;
            }
        })
    }
}

#[async_trait]
impl CoreState for AuditMiddleware {
    async fn get(&self, ptr: &ResourcePointer, opts: &GetOptions, ctx: &RequestContext) -> Result<Resource> {
        self.inner.get(ptr, opts, ctx).await
    }

    async fn list(
        &self,
        namespace: &str,
        kind: &str,
        opts: &ListOptions,
        ctx: &RequestContext,
    ) -> Result<Vec<Resource>> {
        self.inner.list(namespace, kind, opts, ctx).await
    }

    async fn create(&self, res: Resource, opts: &CreateOptions, ctx: &RequestContext) -> Result<Resource> {
        let ptr = res.ptr.clone();
        let labels = res.labels.clone();
        let outcome = self.inner.create(res, opts, ctx).await;
        let record = self.record_for(Verb::Create, &ptr, labels, ctx, &outcome);
        self.write_record(&record).await;
        outcome
    }

    async fn update(&self, res: Resource, opts: &UpdateOptions, ctx: &RequestContext) -> Result<Resource> {
        let ptr = res.ptr.clone();
        let labels = res.labels.clone();
        let outcome = self.inner.update(res, opts, ctx).await;
        let record = self.record_for(Verb::Update, &ptr, labels, ctx, &outcome);
        self.write_record(&record).await;
        outcome
    }

    async fn destroy(&self, ptr: &ResourcePointer, opts: &DestroyOptions, ctx: &RequestContext) -> Result<()> {
        let outcome = self.inner.destroy(ptr, opts, ctx).await;
        let record = self.record_for(Verb::Destroy, ptr, Labels::new(), ctx, &outcome);
        self.write_record(&record).await;
        outcome
    }

    async fn watch(&self, ptr: &ResourcePointer, opts: &WatchOptions, ctx: &RequestContext) -> Result<EventStream> {
        self.inner.watch(ptr, opts, ctx).await
    }

    async fn watch_kind(
        &self,
        namespace: &str,
        kind: &str,
        opts: &WatchOptions,
        ctx: &RequestContext,
    ) -> Result<EventStream> {
        self.inner.watch_kind(namespace, kind, opts, ctx).await
    }

    async fn watch_kind_aggregated(
        &self,
        namespace: &str,
        kind: &str,
        opts: &WatchOptions,
        ctx: &RequestContext,
    ) -> Result<BatchStream> {
        self.inner.watch_kind_aggregated(namespace, kind, opts, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corestate_api::Actor;

    struct AlwaysOk;

    #[async_trait]
    impl CoreState for AlwaysOk {
        async fn get(&self, ptr: &ResourcePointer, _opts: &GetOptions, _ctx: &RequestContext) -> Result<Resource> {
            Ok(Resource::new(ptr.clone(), vec![]))
        }
        async fn list(&self, _ns: &str, _kind: &str, _opts: &ListOptions, _ctx: &RequestContext) -> Result<Vec<Resource>> {
            Ok(vec![])
        }
        async fn create(&self, res: Resource, _opts: &CreateOptions, _ctx: &RequestContext) -> Result<Resource> {
            Ok(res)
        }
        async fn update(&self, res: Resource, _opts: &UpdateOptions, _ctx: &RequestContext) -> Result<Resource> {
            Ok(res)
        }
        async fn destroy(&self, _ptr: &ResourcePointer, _opts: &DestroyOptions, _ctx: &RequestContext) -> Result<()> {
            Err(CoreError::FinalizerViolation("boom".into()))
        }
        async fn watch(&self, _ptr: &ResourcePointer, _opts: &WatchOptions, _ctx: &RequestContext) -> Result<EventStream> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
        async fn watch_kind(&self, _ns: &str, _kind: &str, _opts: &WatchOptions, _ctx: &RequestContext) -> Result<EventStream> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
        async fn watch_kind_aggregated(&self, _ns: &str, _kind: &str, _opts: &WatchOptions, _ctx: &RequestContext) -> Result<BatchStream> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Actor { role: "operator".into(), ..Default::default() }, "t1")
    }

    #[tokio::test]
    async fn records_both_success_and_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let mw = Arc::new(AuditMiddleware::open(Arc::new(AlwaysOk), tmp.path()).unwrap());

        let res = Resource::new(ResourcePointer::new("default", "Cluster", "c1"), vec![]);
        mw.create(res, &CreateOptions::default(), &ctx()).await.unwrap();

        let ptr = ResourcePointer::new("default", "Cluster", "c1");
        let err = mw.destroy(&ptr, &DestroyOptions::default(), &ctx()).await.unwrap_err();
        assert!(err.is_finalizer_violation());

        let start = OffsetDateTime::now_utc() - TimeDuration::hours(1);
        let end = OffsetDateTime::now_utc() + TimeDuration::hours(1);
        let records = mw.read_window(start, end).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].outcome, "success");
        assert_eq!(records[1].outcome, "error");
    }

    #[tokio::test]
    async fn retention_removes_old_day_files() {
        let tmp = tempfile::tempdir().unwrap();
        let mw = AuditMiddleware::open(Arc::new(AlwaysOk), tmp.path()).unwrap();
        let old_day = OffsetDateTime::now_utc().date() - TimeDuration::days(40);
        let old_path = tmp.path().join(day_file_name(old_day));
        tokio::fs::write(&old_path, b"{}\n").await.unwrap();

        mw.enforce_retention(30).await;
        assert!(!old_path.exists());
    }
}
