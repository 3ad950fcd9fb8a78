//! The on-disk KV driver (spec §4.2): "A local file-backed store with
//! optional online compaction on startup: if requested and a file
//! exists, move it aside, open a fresh file, stream-compact from old to
//! new in 64 KiB batches, then delete the old."
//!
//! Uses `redb` with a single flat table keyed by the resource pointer
//! rather than epoch-sharded tries.

use async_trait::async_trait;
use corestate_api::context::RequestContext;
use corestate_api::core_state::{
    BatchStream, CoreState, CreateOptions, DestroyOptions, EventStream, GetOptions, ListOptions,
    UpdateOptions, WatchOptions,
};
use corestate_api::label_query::matches_all;
use corestate_types::event::Event;
use corestate_types::resource::{Phase, Resource, ResourcePointer};
use corestate_types::{CoreError, Result};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::subscription::WatchRegistry;

const RESOURCES: TableDefinition<&str, &[u8]> = TableDefinition::new("resources");

/// Batches of roughly this many bytes are written per compaction
/// transaction (spec §4.2: "in 64 KiB batches").
const COMPACTION_BATCH_BYTES: usize = 64 * 1024;

fn storage_key(ptr: &ResourcePointer) -> String {
    format!("{}/{}/{}", ptr.namespace, ptr.kind, ptr.id)
}

fn encode(res: &Resource) -> Result<Vec<u8>> {
    serde_json::to_vec(res).map_err(|e| CoreError::Internal(e.into()))
}

fn decode(bytes: &[u8]) -> Result<Resource> {
    serde_json::from_slice(bytes).map_err(|e| CoreError::Internal(e.into()))
}

fn open_db(path: &Path) -> Result<Database> {
    Database::create(path).map_err(|e| CoreError::Internal(e.into()))
}

/// Moves `path` aside, opens a fresh database at the original path, and
/// streams every record from the old one into the new one in
/// [`COMPACTION_BATCH_BYTES`]-sized batches before deleting the old file
/// (spec §4.2).
fn compact_in_place(path: &Path) -> Result<Database> {
    let old_path: PathBuf = path.with_extension("old");
    std::fs::rename(path, &old_path).map_err(|e| CoreError::Internal(e.into()))?;
    let old_db = open_db(&old_path)?;
    let fresh = open_db(path)?;

    let read = old_db.begin_read().map_err(|e| CoreError::Internal(e.into()))?;
    let table = read.open_table(RESOURCES).map_err(|e| CoreError::Internal(e.into()))?;

    let mut batch: Vec<(String, Vec<u8>)> = Vec::new();
    let mut batch_bytes = 0usize;
    let flush = |fresh: &Database, batch: &mut Vec<(String, Vec<u8>)>| -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let write = fresh.begin_write().map_err(|e| CoreError::Internal(e.into()))?;
        {
            let mut t = write.open_table(RESOURCES).map_err(|e| CoreError::Internal(e.into()))?;
            for (k, v) in batch.drain(..) {
                t.insert(k.as_str(), v.as_slice()).map_err(|e| CoreError::Internal(e.into()))?;
            }
        }
        write.commit().map_err(|e| CoreError::Internal(e.into()))?;
        Ok(())
    };

    for entry in table.iter().map_err(|e| CoreError::Internal(e.into()))? {
        let (k, v) = entry.map_err(|e| CoreError::Internal(e.into()))?;
        let key = k.value().to_string();
        let value = v.value().to_vec();
        batch_bytes += key.len() + value.len();
        batch.push((key, value));
        if batch_bytes >= COMPACTION_BATCH_BYTES {
            flush(&fresh, &mut batch)?;
            batch_bytes = 0;
        }
    }
    flush(&fresh, &mut batch)?;
    drop(read);
    drop(old_db);
    std::fs::remove_file(&old_path).map_err(|e| CoreError::Internal(e.into()))?;
    Ok(fresh)
}

/// A `redb`-backed, file-resident `CoreState` driver.
pub struct OnDiskDriver {
    db: Arc<Database>,
    watches: WatchRegistry,
}

impl OnDiskDriver {
    /// Opens (creating if absent) the store at `path`. When
    /// `compact_on_startup` is set and a file already exists there, it is
    /// compacted in place before use.
    pub fn open(path: impl AsRef<Path>, compact_on_startup: bool) -> Result<Self> {
        let path = path.as_ref();
        let db = if compact_on_startup && path.exists() {
            compact_in_place(path)?
        } else {
            open_db(path)?
        };
        {
            let write = db.begin_write().map_err(|e| CoreError::Internal(e.into()))?;
            write.open_table(RESOURCES).map_err(|e| CoreError::Internal(e.into()))?;
            write.commit().map_err(|e| CoreError::Internal(e.into()))?;
        }
        Ok(Self { db: Arc::new(db), watches: WatchRegistry::default() })
    }

    fn read_one(&self, ptr: &ResourcePointer) -> Result<Option<Resource>> {
        let read = self.db.begin_read().map_err(|e| CoreError::Internal(e.into()))?;
        let table = read.open_table(RESOURCES).map_err(|e| CoreError::Internal(e.into()))?;
        match table.get(storage_key(ptr).as_str()).map_err(|e| CoreError::Internal(e.into()))? {
            Some(v) => Ok(Some(decode(v.value())?)),
            None => Ok(None),
        }
    }

    fn write_one(&self, res: &Resource) -> Result<()> {
        let write = self.db.begin_write().map_err(|e| CoreError::Internal(e.into()))?;
        {
            let mut table = write.open_table(RESOURCES).map_err(|e| CoreError::Internal(e.into()))?;
            table
                .insert(storage_key(&res.ptr).as_str(), encode(res)?.as_slice())
                .map_err(|e| CoreError::Internal(e.into()))?;
        }
        write.commit().map_err(|e| CoreError::Internal(e.into()))?;
        Ok(())
    }

    fn remove_one(&self, ptr: &ResourcePointer) -> Result<()> {
        let write = self.db.begin_write().map_err(|e| CoreError::Internal(e.into()))?;
        {
            let mut table = write.open_table(RESOURCES).map_err(|e| CoreError::Internal(e.into()))?;
            table.remove(storage_key(ptr).as_str()).map_err(|e| CoreError::Internal(e.into()))?;
        }
        write.commit().map_err(|e| CoreError::Internal(e.into()))?;
        Ok(())
    }

    fn scan(&self, namespace: &str, kind: &str) -> Result<Vec<Resource>> {
        let read = self.db.begin_read().map_err(|e| CoreError::Internal(e.into()))?;
        let table = read.open_table(RESOURCES).map_err(|e| CoreError::Internal(e.into()))?;
        let prefix = format!("{namespace}/{kind}/");
        let mut out = Vec::new();
        for entry in table.iter().map_err(|e| CoreError::Internal(e.into()))? {
            let (k, v) = entry.map_err(|e| CoreError::Internal(e.into()))?;
            if k.value().starts_with(&prefix) {
                out.push(decode(v.value())?);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl CoreState for OnDiskDriver {
    async fn get(&self, ptr: &ResourcePointer, _opts: &GetOptions, _ctx: &RequestContext) -> Result<Resource> {
        let db = self.db.clone();
        let ptr_owned = ptr.clone();
        let for_error = ptr.clone();
        let this = OnDiskDriver { db, watches: self.watches.clone() };
        tokio::task::spawn_blocking(move || this.read_one(&ptr_owned))
            .await
            .map_err(|e| CoreError::Internal(e.into()))??
            .ok_or_else(|| CoreError::NotFound(for_error.to_string()))
    }

    async fn list(
        &self,
        namespace: &str,
        kind: &str,
        opts: &ListOptions,
        _ctx: &RequestContext,
    ) -> Result<Vec<Resource>> {
        let db = self.db.clone();
        let ns = namespace.to_string();
        let kd = kind.to_string();
        let queries = opts.label_queries.clone();
        let this = OnDiskDriver { db, watches: self.watches.clone() };
        let all = tokio::task::spawn_blocking(move || this.scan(&ns, &kd))
            .await
            .map_err(|e| CoreError::Internal(e.into()))??;
        Ok(all.into_iter().filter(|r| matches_all(&queries, &r.labels)).collect())
    }

    async fn create(&self, res: Resource, _opts: &CreateOptions, _ctx: &RequestContext) -> Result<Resource> {
        let db = self.db.clone();
        let this = OnDiskDriver { db, watches: self.watches.clone() };
        let mut stored = res;
        let existing = {
            let ptr = stored.ptr.clone();
            let this2 = OnDiskDriver { db: this.db.clone(), watches: this.watches.clone() };
            tokio::task::spawn_blocking(move || this2.read_one(&ptr))
                .await
                .map_err(|e| CoreError::Internal(e.into()))??
        };
        if existing.is_some() {
            return Err(CoreError::AlreadyExists(stored.ptr.to_string()));
        }
        stored.version = stored.version.next();
        let to_write = stored.clone();
        tokio::task::spawn_blocking(move || this.write_one(&to_write))
            .await
            .map_err(|e| CoreError::Internal(e.into()))??;
        self.watches.publish(&stored.ptr, &stored.labels, Event::created(stored.clone()));
        Ok(stored)
    }

    async fn update(&self, res: Resource, _opts: &UpdateOptions, _ctx: &RequestContext) -> Result<Resource> {
        let this = OnDiskDriver { db: self.db.clone(), watches: self.watches.clone() };
        let ptr = res.ptr.clone();
        let current = tokio::task::spawn_blocking({
            let this = OnDiskDriver { db: this.db.clone(), watches: this.watches.clone() };
            let ptr = ptr.clone();
            move || this.read_one(&ptr)
        })
        .await
        .map_err(|e| CoreError::Internal(e.into()))??
        .ok_or_else(|| CoreError::NotFound(ptr.to_string()))?;
        if current.version != res.version {
            return Err(CoreError::VersionConflict(ptr.to_string()));
        }
        if current.phase == Phase::TearingDown && res.phase == Phase::Running {
            return Err(CoreError::validation(format!("{ptr} is tearing down and cannot return to running")));
        }
        let mut updated = res;
        updated.version = current.version.next();
        let to_write = updated.clone();
        tokio::task::spawn_blocking(move || this.write_one(&to_write))
            .await
            .map_err(|e| CoreError::Internal(e.into()))??;
        self.watches.publish(&updated.ptr, &updated.labels, Event::updated(current, updated.clone()));
        Ok(updated)
    }

    async fn destroy(&self, ptr: &ResourcePointer, _opts: &DestroyOptions, _ctx: &RequestContext) -> Result<()> {
        let this = OnDiskDriver { db: self.db.clone(), watches: self.watches.clone() };
        let ptr_owned = ptr.clone();
        let current = tokio::task::spawn_blocking({
            let this = OnDiskDriver { db: this.db.clone(), watches: this.watches.clone() };
            let ptr = ptr_owned.clone();
            move || this.read_one(&ptr)
        })
        .await
        .map_err(|e| CoreError::Internal(e.into()))??
        .ok_or_else(|| CoreError::NotFound(ptr_owned.to_string()))?;
        if !current.finalizers.is_empty() {
            return Err(CoreError::FinalizerViolation(ptr_owned.to_string()));
        }
        tokio::task::spawn_blocking({
            let ptr = ptr_owned.clone();
            move || this.remove_one(&ptr)
        })
        .await
        .map_err(|e| CoreError::Internal(e.into()))??;
        self.watches.publish(&ptr_owned, &current.labels, Event::destroyed(current));
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

impl OnDiskDriver {
    async fn bootstrap_kind(
        &self,
        namespace: &str,
        kind: &str,
        opts: &WatchOptions,
        ctx: &RequestContext,
        handle: &crate::subscription::BootstrapHandle,
    ) -> Result<()> {
        let matching = self.list(namespace, kind, &ListOptions { label_queries: opts.label_queries.clone() }, ctx).await?;
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
    use corestate_api::context::RequestContext;
    use tempfile::tempdir;

    fn ctx() -> RequestContext {
        RequestContext::internal("t1")
    }

    fn res(ns: &str, kind: &str, id: &str) -> Resource {
        Resource::new(ResourcePointer::new(ns, kind, id), b"payload".to_vec())
    }

    #[tokio::test]
    async fn round_trips_through_redb() {
        let dir = tempdir().unwrap();
        let driver = OnDiskDriver::open(dir.path().join("store.redb"), false).unwrap();
        let created = driver.create(res("default", "Cluster", "c1"), &CreateOptions::default(), &ctx()).await.unwrap();
        let got = driver.get(&created.ptr, &GetOptions::default(), &ctx()).await.unwrap();
        assert_eq!(got.payload, b"payload");
    }

    #[tokio::test]
    async fn compaction_preserves_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.redb");
        {
            let driver = OnDiskDriver::open(&path, false).unwrap();
            for i in 0..5 {
                driver
                    .create(res("default", "Cluster", &format!("c{i}")), &CreateOptions::default(), &ctx())
                    .await
                    .unwrap();
            }
        }
        let driver = OnDiskDriver::open(&path, true).unwrap();
        let all = driver.list("default", "Cluster", &ListOptions::default(), &ctx()).await.unwrap();
        assert_eq!(all.len(), 5);
    }
}
