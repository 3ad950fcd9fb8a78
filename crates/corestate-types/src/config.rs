//! Layered configuration (spec §6 Configuration), loaded with the `config`
//! crate: defaults, then an optional file, then environment overrides
//! (`CORESTATE_*`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The storage backend kind for `storage.default`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageKind {
    /// The local, file-backed KV driver.
    OnDiskKv,
    /// The distributed KV driver (external cluster or embedded single-node).
    DistributedKv,
}

/// `storage.default.*` — the primary backend for the `default` namespace
/// and any unmatched namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DefaultStorageConfig {
    /// Which driver backs this namespace.
    pub kind: StorageKind,
    /// On-disk KV: the data file path.
    pub path: Option<String>,
    /// Distributed KV: endpoint URLs.
    #[serde(default)]
    pub endpoints: Vec<String>,
    /// Distributed KV (external, mTLS): client certificate path.
    pub cert_file: Option<String>,
    /// Distributed KV (external, mTLS): client key path.
    pub key_file: Option<String>,
    /// Distributed KV (external, mTLS): CA bundle path.
    pub ca_file: Option<String>,
    /// Distributed KV: run an in-process single-node store instead of
    /// dialing `endpoints`.
    #[serde(default)]
    pub embedded: bool,
    /// Distributed KV (embedded): data directory.
    pub embedded_db_path: Option<String>,
    /// Distributed KV (embedded, testing only): skip fsync on write.
    #[serde(default)]
    pub embedded_unsafe_no_fsync: bool,
    /// Distributed KV: whether this backend must win a leader election
    /// before serving writes. Forced to `false` when `embedded` is true
    /// (spec §4.2 embedded-only caveat).
    #[serde(default = "default_true")]
    pub run_elections: bool,
    /// Distributed KV (external): TCP keep-alive interval, seconds.
    #[serde(default = "default_keep_alive_time")]
    pub dial_keep_alive_time_secs: u64,
    /// Distributed KV (external): TCP keep-alive timeout, seconds.
    #[serde(default = "default_keep_alive_timeout")]
    pub dial_keep_alive_timeout_secs: u64,
    /// The private-key source URI for the content cipher (spec §4.8).
    pub private_key_source: Option<String>,
    /// Additional public keys accepted for decryption.
    #[serde(default)]
    pub public_key_files: Vec<String>,
}

fn default_true() -> bool {
    true
}
fn default_keep_alive_time() -> u64 {
    30
}
fn default_keep_alive_timeout() -> u64 {
    10
}

impl DefaultStorageConfig {
    /// The configured keep-alive interval as a [`Duration`].
    pub fn dial_keep_alive_time(&self) -> Duration {
        Duration::from_secs(self.dial_keep_alive_time_secs)
    }

    /// The configured keep-alive timeout as a [`Duration`].
    pub fn dial_keep_alive_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_keep_alive_timeout_secs)
    }

    /// Elections are only ever mandatory for a non-embedded distributed
    /// backend; every other topology either has no election concept
    /// (on-disk KV) or explicitly opts out (embedded).
    pub fn elections_required(&self) -> bool {
        self.kind == StorageKind::DistributedKv && !self.embedded && self.run_elections
    }
}

/// `storage.sqlite.*` — the embedded SQL store backing the `metrics` namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SqliteConfig {
    /// File path for the embedded SQL database.
    pub path: String,
}

/// `storage.secondary.*` — the legacy on-disk KV path migrated from at
/// startup, if present (spec §4.2 one-shot migration).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SecondaryStorageConfig {
    /// Path to the legacy on-disk KV file, if migration is enabled.
    pub path: Option<String>,
}

/// `storage.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    /// The default/primary backend.
    pub default: DefaultStorageConfig,
    /// The embedded SQL store for the `metrics` namespace.
    pub sqlite: SqliteConfig,
    /// The legacy store eligible for one-shot migration.
    #[serde(default)]
    pub secondary: SecondaryStorageConfig,
}

/// `account.*` — tenancy identity, used as the distributed-KV key prefix
/// input and mixed into the cipher salt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AccountConfig {
    /// The tenant id, URL-escaped into backend key prefixes.
    pub id: String,
    /// A human-readable display name.
    pub name: String,
}

/// `logs.audit.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuditConfig {
    /// Whether the audit middleware and log writer are active.
    #[serde(default)]
    pub enabled: bool,
    /// Directory holding the daily `YYYY-MM-DD.jsonlog` files.
    pub path: String,
    /// Retention window in days before a day file is eligible for cleanup.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    30
}

/// `logs.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LogsConfig {
    /// Audit log settings.
    pub audit: AuditConfig,
}

/// `auth.saml.*` and `auth.key-pruner.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuthConfig {
    /// Whether SAML-managed identities are immutable except for destroy
    /// (scenario 3 in spec §8).
    #[serde(default)]
    pub saml_enabled: bool,
    /// Interval, in seconds, between key-pruner sweeps.
    #[serde(default)]
    pub key_pruner_interval_secs: u64,
}

/// `features.*` — operational toggles that change runtime behavior
/// without changing the contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FeaturesConfig {
    /// When true, the controller cache (spec §4.6) is bypassed and every
    /// read goes to the live middleware stack.
    #[serde(default)]
    pub disable_controller_runtime_cache: bool,
}

/// The top-level configuration object, covering every field enumerated in
/// spec §6. Fields with no bearing on the core subsystems specified here
/// (`services.api.url`, port ranges, `etcd-backup.*`) are retained as
/// opaque passthrough so a caller assembling the full control plane can
/// still read them from the same file, but this crate does not interpret
/// them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CoreConfig {
    /// Storage backend configuration.
    pub storage: StorageConfig,
    /// Tenancy identity.
    pub account: AccountConfig,
    /// Audit log configuration.
    pub logs: LogsConfig,
    /// Authorization-adjacent configuration not owned by a single
    /// middleware (SAML mode, key pruning cadence).
    #[serde(default)]
    pub auth: AuthConfig,
    /// Feature toggles.
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl CoreConfig {
    /// Loads configuration by layering defaults, an optional file at
    /// `path`, and `CORESTATE_`-prefixed environment variables using the
    /// `config` crate.
    pub fn load(path: Option<&str>) -> crate::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("CORESTATE")
                .separator("__")
                .try_parsing(true),
        );
        let raw = builder
            .build()
            .map_err(|e| crate::CoreError::Internal(e.into()))?;
        raw.try_deserialize()
            .map_err(|e| crate::CoreError::Internal(e.into()))
    }
}


impl Default for SecondaryStorageConfig {
    fn default() -> Self {
        Self { path: None }
    }
}
