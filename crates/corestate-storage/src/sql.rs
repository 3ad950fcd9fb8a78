//! The embedded SQL driver (spec §4.2): "A file-backed relational store
//! used for the `metrics` namespace only. Table prefix `metrics_`.
//! Aggressive compaction (interval 5 min, min-age 10 min) because entries
//! are high-churn counters."

use async_trait::async_trait;
use corestate_api::context::RequestContext;
use corestate_api::core_state::{
    BatchStream, CoreState, CreateOptions, DestroyOptions, EventStream, GetOptions, ListOptions,
    UpdateOptions, WatchOptions,
};
use corestate_api::label_query::matches_all;
use corestate_types::event::Event;
use corestate_types::resource::{Phase, Resource, ResourcePointer, Version};
use corestate_types::{CoreError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

use crate::subscription::WatchRegistry;

const TABLE: &str = "metrics_resources";
/// Minimum interval between compaction runs (spec §4.2).
pub const COMPACTION_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Minimum age a compaction pass must wait past the previous one
/// (spec §4.2: "min-age 10 min").
pub const COMPACTION_MIN_AGE: Duration = Duration::from_secs(10 * 60);

fn encode_resource(res: &Resource) -> Result<(String, String, String, Vec<u8>)> {
    let labels = serde_json::to_string(&res.labels).map_err(|e| CoreError::Internal(e.into()))?;
    let annotations = serde_json::to_string(&res.annotations).map_err(|e| CoreError::Internal(e.into()))?;
    let finalizers = serde_json::to_string(&res.finalizers).map_err(|e| CoreError::Internal(e.into()))?;
    Ok((labels, annotations, finalizers, res.payload.clone()))
}

fn row_to_resource(
    namespace: String,
    kind: String,
    id: String,
    version: i64,
    phase: String,
    owner: Option<String>,
    labels_json: String,
    annotations_json: String,
    finalizers_json: String,
    payload: Vec<u8>,
) -> Result<Resource> {
    Ok(Resource {
        ptr: ResourcePointer::new(namespace, kind, id),
        version: Version(version as u64),
        phase: if phase == "tearing-down" { Phase::TearingDown } else { Phase::Running },
        owner,
        labels: serde_json::from_str(&labels_json).map_err(|e| CoreError::Internal(e.into()))?,
        annotations: serde_json::from_str(&annotations_json).map_err(|e| CoreError::Internal(e.into()))?,
        finalizers: serde_json::from_str(&finalizers_json).map_err(|e| CoreError::Internal(e.into()))?,
        payload,
    })
}

fn phase_str(phase: Phase) -> &'static str {
    match phase {
        Phase::Running => "running",
        Phase::TearingDown => "tearing-down",
    }
}

/// The `rusqlite`-backed driver used for the `metrics` namespace.
pub struct SqlDriver {
    conn: AsyncMutex<Connection>,
    watches: WatchRegistry,
    last_compaction: Mutex<Option<Instant>>,
}

impl SqlDriver {
    /// Opens (creating if absent) the SQL store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| CoreError::Internal(e.into()))?;
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {TABLE} (
                    namespace TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    id TEXT NOT NULL,
                    version INTEGER NOT NULL,
                    phase TEXT NOT NULL,
                    owner TEXT,
                    labels TEXT NOT NULL,
                    annotations TEXT NOT NULL,
                    finalizers TEXT NOT NULL,
                    payload BLOB NOT NULL,
                    PRIMARY KEY (namespace, kind, id)
                )"
            ),
            [],
        )
        .map_err(|e| CoreError::Internal(e.into()))?;
        Ok(Self { conn: AsyncMutex::new(conn), watches: WatchRegistry::default(), last_compaction: Mutex::new(None) })
    }

    /// Runs `VACUUM` if at least [`COMPACTION_MIN_AGE`] has elapsed since
    /// the previous compaction; callers typically drive this from a
    /// periodic task ticking at [`COMPACTION_INTERVAL`].
    pub async fn compact_if_due(&self) -> Result<bool> {
        let due = {
            let last = self.last_compaction.lock().unwrap();
            last.map(|t| t.elapsed() >= COMPACTION_MIN_AGE).unwrap_or(true)
        };
        if !due {
            return Ok(false);
        }
        let conn = self.conn.lock().await;
        conn.execute_batch("VACUUM").map_err(|e| CoreError::Internal(e.into()))?;
        *self.last_compaction.lock().unwrap() = Some(Instant::now());
        Ok(true)
    }
}

#[async_trait]
impl CoreState for SqlDriver {
    async fn get(&self, ptr: &ResourcePointer, _opts: &GetOptions, _ctx: &RequestContext) -> Result<Resource> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                &format!(
                    "SELECT version, phase, owner, labels, annotations, finalizers, payload FROM {TABLE}
                     WHERE namespace = ?1 AND kind = ?2 AND id = ?3"
                ),
                params![ptr.namespace, ptr.kind, ptr.id],
                |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, Option<String>>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, String>(4)?,
                        r.get::<_, String>(5)?,
                        r.get::<_, Vec<u8>>(6)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| CoreError::Internal(e.into()))?;
        match row {
            Some((version, phase, owner, labels, annotations, finalizers, payload)) => row_to_resource(
                ptr.namespace.clone(),
                ptr.kind.clone(),
                ptr.id.clone(),
                version,
                phase,
                owner,
                labels,
                annotations,
                finalizers,
                payload,
            ),
            None => Err(CoreError::NotFound(ptr.to_string())),
        }
    }

    async fn list(
        &self,
        namespace: &str,
        kind: &str,
        opts: &ListOptions,
        _ctx: &RequestContext,
    ) -> Result<Vec<Resource>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT id, version, phase, owner, labels, annotations, finalizers, payload FROM {TABLE}
                 WHERE namespace = ?1 AND kind = ?2"
            ))
            .map_err(|e| CoreError::Internal(e.into()))?;
        let rows = stmt
            .query_map(params![namespace, kind], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, Option<String>>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, String>(6)?,
                    r.get::<_, Vec<u8>>(7)?,
                ))
            })
            .map_err(|e| CoreError::Internal(e.into()))?;
        let mut out = Vec::new();
        for row in rows {
            let (id, version, phase, owner, labels, annotations, finalizers, payload) =
                row.map_err(|e| CoreError::Internal(e.into()))?;
            let res = row_to_resource(
                namespace.to_string(),
                kind.to_string(),
                id,
                version,
                phase,
                owner,
                labels,
                annotations,
                finalizers,
                payload,
            )?;
            if matches_all(&opts.label_queries, &res.labels) {
                out.push(res);
            }
        }
        Ok(out)
    }

    async fn create(&self, res: Resource, _opts: &CreateOptions, _ctx: &RequestContext) -> Result<Resource> {
        let mut stored = res;
        stored.version = stored.version.next();
        let (labels, annotations, finalizers, payload) = encode_resource(&stored)?;
        let conn = self.conn.lock().await;
        let inserted = conn
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO {TABLE}
                     (namespace, kind, id, version, phase, owner, labels, annotations, finalizers, payload)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    stored.ptr.namespace,
                    stored.ptr.kind,
                    stored.ptr.id,
                    stored.version.0 as i64,
                    phase_str(stored.phase),
                    stored.owner,
                    labels,
                    annotations,
                    finalizers,
                    payload
                ],
            )
            .map_err(|e| CoreError::Internal(e.into()))?;
        drop(conn);
        if inserted == 0 {
            return Err(CoreError::AlreadyExists(stored.ptr.to_string()));
        }
        self.watches.publish(&stored.ptr, &stored.labels, Event::created(stored.clone()));
        Ok(stored)
    }

    async fn update(&self, res: Resource, _opts: &UpdateOptions, ctx: &RequestContext) -> Result<Resource> {
        let current = self.get(&res.ptr, &GetOptions::default(), ctx).await?;
        if current.version != res.version {
            return Err(CoreError::VersionConflict(res.ptr.to_string()));
        }
        if current.phase == Phase::TearingDown && res.phase == Phase::Running {
            return Err(CoreError::validation(format!(
                "{} is tearing down and cannot return to running",
                res.ptr
            )));
        }
        let mut updated = res;
        updated.version = current.version.next();
        let (labels, annotations, finalizers, payload) = encode_resource(&updated)?;
        let conn = self.conn.lock().await;
        conn.execute(
            &format!(
                "UPDATE {TABLE} SET version = ?1, phase = ?2, owner = ?3, labels = ?4, annotations = ?5,
                 finalizers = ?6, payload = ?7 WHERE namespace = ?8 AND kind = ?9 AND id = ?10"
            ),
            params![
                updated.version.0 as i64,
                phase_str(updated.phase),
                updated.owner,
                labels,
                annotations,
                finalizers,
                payload,
                updated.ptr.namespace,
                updated.ptr.kind,
                updated.ptr.id,
            ],
        )
        .map_err(|e| CoreError::Internal(e.into()))?;
        drop(conn);
        self.watches.publish(&updated.ptr, &updated.labels, Event::updated(current, updated.clone()));
        Ok(updated)
    }

    async fn destroy(&self, ptr: &ResourcePointer, _opts: &DestroyOptions, ctx: &RequestContext) -> Result<()> {
        let current = self.get(ptr, &GetOptions::default(), ctx).await?;
        if !current.finalizers.is_empty() {
            return Err(CoreError::FinalizerViolation(ptr.to_string()));
        }
        let conn = self.conn.lock().await;
        conn.execute(
            &format!("DELETE FROM {TABLE} WHERE namespace = ?1 AND kind = ?2 AND id = ?3"),
            params![ptr.namespace, ptr.kind, ptr.id],
        )
        .map_err(|e| CoreError::Internal(e.into()))?;
        drop(conn);
        self.watches.publish(ptr, &current.labels, Event::destroyed(current));
        Ok(())
    }

    async fn watch(&self, ptr: &ResourcePointer, opts: &WatchOptions, ctx: &RequestContext) -> Result<EventStream> {
        let (rx, handle) = self.watches.subscribe_pointer(ptr.clone());
        if opts.bootstrap_contents {
            match self.get(ptr, &GetOptions::default(), ctx).await {
                Ok(r) => handle.deliver(Event::created(r)),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            handle.deliver(Event::bootstrapped());
        }
        Ok(rx)
    }

    async fn watch_kind(
        &self,
        namespace: &str,
        kind: &str,
        opts: &WatchOptions,
        ctx: &RequestContext,
    ) -> Result<EventStream> {
        let (rx, handle) = self.watches.subscribe_kind(namespace, kind, opts.label_queries.clone());
        if opts.bootstrap_contents {
            self.bootstrap_kind(namespace, kind, opts, ctx, &handle).await?;
        }
        Ok(rx)
    }

    async fn watch_kind_aggregated(
        &self,
        namespace: &str,
        kind: &str,
        opts: &WatchOptions,
        ctx: &RequestContext,
    ) -> Result<BatchStream> {
        let (rx, handle) =
            self.watches.subscribe_kind_aggregated(namespace, kind, opts.label_queries.clone(), opts.max_batch);
        if opts.bootstrap_contents {
            self.bootstrap_kind(namespace, kind, opts, ctx, &handle).await?;
        }
        Ok(rx)
    }
}

impl SqlDriver {
    async fn bootstrap_kind(
        &self,
        namespace: &str,
        kind: &str,
        opts: &WatchOptions,
        ctx: &RequestContext,
        handle: &crate::subscription::BootstrapHandle,
    ) -> Result<()> {
        let matching =
            self.list(namespace, kind, &ListOptions { label_queries: opts.label_queries.clone() }, ctx).await?;
        for r in matching {
            handle.deliver(Event::created(r));
        }
        handle.deliver(Event::bootstrapped());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ctx() -> RequestContext {
        RequestContext::internal("t1")
    }

    fn res(id: &str) -> Resource {
        Resource::new(ResourcePointer::new("metrics", "Counter", id), b"0".to_vec())
    }

    #[tokio::test]
    async fn create_get_update_destroy_round_trip() {
        let dir = tempdir().unwrap();
        let driver = SqlDriver::open(dir.path().join("metrics.sqlite")).unwrap();
        let created = driver.create(res("m1"), &CreateOptions::default(), &ctx()).await.unwrap();
        assert_eq!(driver.get(&created.ptr, &GetOptions::default(), &ctx()).await.unwrap().payload, b"0");

        let mut next = created.clone();
        next.payload = b"1".to_vec();
        let updated = driver.update(next, &UpdateOptions::default(), &ctx()).await.unwrap();
        assert_eq!(updated.payload, b"1");

        driver.destroy(&updated.ptr, &DestroyOptions::default(), &ctx()).await.unwrap();
        assert!(driver.get(&updated.ptr, &GetOptions::default(), &ctx()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn insert_or_ignore_surfaces_already_exists() {
        let dir = tempdir().unwrap();
        let driver = SqlDriver::open(dir.path().join("metrics.sqlite")).unwrap();
        driver.create(res("m1"), &CreateOptions::default(), &ctx()).await.unwrap();
        let err = driver.create(res("m1"), &CreateOptions::default(), &ctx()).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn compaction_respects_min_age() {
        let dir = tempdir().unwrap();
        let driver = SqlDriver::open(dir.path().join("metrics.sqlite")).unwrap();
        assert!(driver.compact_if_due().await.unwrap());
        assert!(!driver.compact_if_due().await.unwrap());
    }
}
