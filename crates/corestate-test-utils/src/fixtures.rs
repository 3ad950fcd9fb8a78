//! Reusable fixtures for tests across the workspace: a `CoreConfig`
//! builder with sane defaults, label-map helpers, and a temp-directory
//! wrapper.

use corestate_types::config::{
    AccountConfig, AuditConfig, AuthConfig, CoreConfig, DefaultStorageConfig, FeaturesConfig,
    LogsConfig, SecondaryStorageConfig, SqliteConfig, StorageConfig, StorageKind,
};
use corestate_types::resource::Labels;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Builds a minimal, valid `CoreConfig` pointed at a caller-supplied
/// temp directory, with elections and audit disabled by default so unit
/// tests don't need a cluster to construct one.
pub fn core_config(data_dir: &Path) -> CoreConfig {
    CoreConfig {
        storage: StorageConfig {
            default: DefaultStorageConfig {
                kind: StorageKind::OnDiskKv,
                path: Some(data_dir.join("state.db").display().to_string()),
                endpoints: vec![],
                cert_file: None,
                key_file: None,
                ca_file: None,
                embedded: false,
                embedded_db_path: None,
                embedded_unsafe_no_fsync: false,
                run_elections: false,
                dial_keep_alive_time_secs: 30,
                dial_keep_alive_timeout_secs: 10,
                private_key_source: None,
                public_key_files: vec![],
            },
            sqlite: SqliteConfig { path: data_dir.join("metrics.sqlite").display().to_string() },
            secondary: SecondaryStorageConfig::default(),
        },
        account: AccountConfig { id: "test-account".into(), name: "Test Account".into() },
        logs: LogsConfig {
            audit: AuditConfig { enabled: false, path: data_dir.join("audit").display().to_string(), retention_days: 30 },
        },
        auth: AuthConfig { saml_enabled: false, key_pruner_interval_secs: 0 },
        features: FeaturesConfig::default(),
    }
}

/// Builds a `Labels` map from `(key, value)` pairs.
pub fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// A scratch directory auto-removed on drop, scoping a test's on-disk
/// fixtures to its own lifetime.
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    /// Creates a new empty scratch directory.
    pub fn new() -> std::io::Result<Self> {
        Ok(Self { dir: TempDir::new()? })
    }

    /// The directory's path.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Joins a relative path under this directory.
    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.dir.path().join(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_config_builds_with_elections_disabled() {
        let scratch = ScratchDir::new().unwrap();
        let cfg = core_config(scratch.path());
        assert!(!cfg.storage.default.elections_required());
        assert!(!cfg.logs.audit.enabled);
    }

    #[test]
    fn labels_builds_expected_map() {
        let m = labels(&[("cluster", "c1"), ("role", "cp")]);
        assert_eq!(m.get("cluster").map(String::as_str), Some("c1"));
        assert_eq!(m.len(), 2);
    }
}
