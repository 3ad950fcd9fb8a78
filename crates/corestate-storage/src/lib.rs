#![cfg_attr(
    not(test),
    deny(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::unimplemented, clippy::todo)
)]

//! # corestate-storage
//!
//! The backend drivers (spec §4.2): in-memory, on-disk KV (`redb`),
//! embedded SQL (`rusqlite`), and distributed KV (`etcd-client` or an
//! embedded reuse of the on-disk engine), plus the one-shot legacy
//! migration into the SQL store.

/// Shared watch subscription registry used by every driver below.
pub mod subscription;

/// The pure in-memory driver.
pub mod memory;
/// The `redb`-backed on-disk KV driver.
pub mod ondisk;
/// The `rusqlite`-backed embedded SQL driver (metrics namespace).
pub mod sql;
/// The distributed-KV driver: external etcd or embedded single-process.
pub mod distributed;
/// The one-shot legacy-KV-to-SQL migration.
pub mod migration;

pub use distributed::{DistributedDriver, ExternalEtcdDriver, TlsConfig};
pub use memory::MemoryDriver;
pub use migration::{migrate_legacy_metrics_to_sql, MigrationReport};
pub use ondisk::OnDiskDriver;
pub use sql::SqlDriver;
pub use subscription::{BootstrapHandle, WatchRegistry};
