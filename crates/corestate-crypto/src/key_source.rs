//! Private-key sources (spec §4.8): `file://`, a remote secret store with
//! a bearer token, or a remote secret store reached via a workload-identity
//! token exchange.

use crate::error::CryptoError;
use crate::secret_store::SecretKvClient;
use async_trait::async_trait;
use std::path::PathBuf;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A PEM-encoded private key, zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SensitiveBytes(pub Vec<u8>);

impl SensitiveBytes {
    /// Borrows the key material.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A parsed private-key source URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// `file://<path>` — read a PEM-encoded private key from disk.
    File {
        /// The filesystem path.
        path: PathBuf,
    },
    /// `<store>://<mount>/<path>` — fetch from a remote KV secret store
    /// using a bearer token supplied via `<STORE>_TOKEN`.
    Token {
        /// The secret store's identifier, used to derive env var names.
        store: String,
        /// The secret engine mount point.
        mount: String,
        /// The path within the mount.
        path: String,
    },
    /// `<store>://@<token-path>:/<mount>/<path>` — fetch using a
    /// workload-identity token loaded from disk, exchanged at a
    /// configured mount path for a short-lived client token.
    WorkloadIdentity {
        /// The secret store's identifier, used to derive env var names.
        store: String,
        /// The on-disk path to the workload-identity token.
        token_path: PathBuf,
        /// The secret engine mount point.
        mount: String,
        /// The path within the mount.
        path: String,
    },
}

/// Parses a private-key source URI, rejecting unknown shapes at parse
/// time (spec §9 DESIGN NOTES).
pub fn parse_key_source(uri: &str) -> Result<KeySource, CryptoError> {
    let (scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| CryptoError::MalformedUri(uri.to_string()))?;
    if scheme.is_empty() {
        return Err(CryptoError::UnknownScheme(uri.to_string()));
    }
    if scheme == "file" {
        if rest.is_empty() {
            return Err(CryptoError::MalformedUri(uri.to_string()));
        }
        return Ok(KeySource::File { path: PathBuf::from(rest) });
    }

    if let Some(workload_rest) = rest.strip_prefix('@') {
        // `@<token-path>:/<mount>/<path>`
        let (token_path, mount_path) = workload_rest
            .split_once(":/")
            .ok_or_else(|| CryptoError::MalformedUri(uri.to_string()))?;
        let (mount, path) = mount_path
            .split_once('/')
            .ok_or_else(|| CryptoError::MalformedUri(uri.to_string()))?;
        if token_path.is_empty() || mount.is_empty() || path.is_empty() {
            return Err(CryptoError::MalformedUri(uri.to_string()));
        }
        return Ok(KeySource::WorkloadIdentity {
            store: scheme.to_string(),
            token_path: PathBuf::from(token_path),
            mount: mount.to_string(),
            path: path.to_string(),
        });
    }

    // `<mount>/<path>`
    let (mount, path) = rest
        .split_once('/')
        .ok_or_else(|| CryptoError::MalformedUri(uri.to_string()))?;
    if mount.is_empty() || path.is_empty() {
        return Err(CryptoError::MalformedUri(uri.to_string()));
    }
    Ok(KeySource::Token {
        store: scheme.to_string(),
        mount: mount.to_string(),
        path: path.to_string(),
    })
}

/// Fetches PEM-encoded private key material from wherever it lives.
#[async_trait]
pub trait KeyFetcher: Send + Sync {
    /// Fetches and returns the private key.
    async fn fetch_private_key(&self) -> Result<SensitiveBytes, CryptoError>;
}

/// Reads a PEM file from disk.
pub struct FileKeyFetcher {
    path: PathBuf,
}

impl FileKeyFetcher {
    /// Builds a fetcher for the given path.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl KeyFetcher for FileKeyFetcher {
    async fn fetch_private_key(&self) -> Result<SensitiveBytes, CryptoError> {
        let bytes = tokio::fs::read(&self.path).await?;
        Ok(SensitiveBytes(bytes))
    }
}

/// Fetches from a remote secret store using a static bearer token.
pub struct TokenKeyFetcher {
    client: SecretKvClient,
    mount: String,
    path: String,
}

impl TokenKeyFetcher {
    /// Builds a fetcher from environment variables named
    /// `<STORE>_ADDR`/`<STORE>_TOKEN`.
    pub fn from_env(store: &str, mount: String, path: String) -> Result<Self, CryptoError> {
        let store_upper = store.to_uppercase();
        let addr = std::env::var(format!("{store_upper}_ADDR"))
            .map_err(|_| CryptoError::MissingEnv(format!("{store_upper}_ADDR")))?;
        let token = std::env::var(format!("{store_upper}_TOKEN"))
            .map_err(|_| CryptoError::MissingEnv(format!("{store_upper}_TOKEN")))?;
        Ok(Self { client: SecretKvClient::new(addr, token), mount, path })
    }
}

#[async_trait]
impl KeyFetcher for TokenKeyFetcher {
    async fn fetch_private_key(&self) -> Result<SensitiveBytes, CryptoError> {
        let pem = self.client.read_joined(&self.mount, &self.path).await?;
        Ok(SensitiveBytes(pem.into_bytes()))
    }
}

/// Fetches via a workload-identity token exchange: a token on disk is
/// presented to the store's login endpoint at a configured mount/role,
/// yielding a short-lived client token used for the actual secret read.
pub struct WorkloadIdentityKeyFetcher {
    client: SecretKvClient,
    login_role_mount: String,
    mount: String,
    path: String,
    token_path: PathBuf,
}

impl WorkloadIdentityKeyFetcher {
    /// Builds a fetcher from `<STORE>_ADDR`/`<STORE>_K8S_ROLE` env vars
    /// and the workload-identity token path parsed from the URI.
    pub fn from_env(
        store: &str,
        token_path: PathBuf,
        mount: String,
        path: String,
    ) -> Result<Self, CryptoError> {
        let store_upper = store.to_uppercase();
        let addr = std::env::var(format!("{store_upper}_ADDR"))
            .map_err(|_| CryptoError::MissingEnv(format!("{store_upper}_ADDR")))?;
        let role = std::env::var(format!("{store_upper}_K8S_ROLE"))
            .map_err(|_| CryptoError::MissingEnv(format!("{store_upper}_K8S_ROLE")))?;
        Ok(Self {
            client: SecretKvClient::new(addr, String::new()),
            login_role_mount: role,
            mount,
            path,
            token_path,
        })
    }
}

#[async_trait]
impl KeyFetcher for WorkloadIdentityKeyFetcher {
    async fn fetch_private_key(&self) -> Result<SensitiveBytes, CryptoError> {
        let identity_token = tokio::fs::read_to_string(&self.token_path).await?;
        let exchanged = self
            .client
            .exchange_workload_identity(&self.login_role_mount, identity_token.trim())
            .await?;
        let authenticated = self.client.clone_with_token(exchanged);
        let pem = authenticated.read_joined(&self.mount, &self.path).await?;
        Ok(SensitiveBytes(pem.into_bytes()))
    }
}

/// Builds the right [`KeyFetcher`] for a parsed [`KeySource`].
pub fn build_fetcher(source: KeySource) -> Result<Box<dyn KeyFetcher>, CryptoError> {
    match source {
        KeySource::File { path } => Ok(Box::new(FileKeyFetcher::new(path))),
        KeySource::Token { store, mount, path } => {
            Ok(Box::new(TokenKeyFetcher::from_env(&store, mount, path)?))
        }
        KeySource::WorkloadIdentity { store, token_path, mount, path } => Ok(Box::new(
            WorkloadIdentityKeyFetcher::from_env(&store, token_path, mount, path)?,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_file_scheme() {
        let src = parse_key_source("file:///etc/corestate/key.pem").unwrap();
        assert_eq!(src, KeySource::File { path: PathBuf::from("/etc/corestate/key.pem") });
    }

    #[test]
    fn parses_token_scheme() {
        let src = parse_key_source("secretkv://secret/corestate/private-key").unwrap();
        assert_eq!(
            src,
            KeySource::Token {
                store: "secretkv".into(),
                mount: "secret".into(),
                path: "corestate/private-key".into(),
            }
        );
    }

    #[test]
    fn parses_workload_identity_scheme() {
        let src =
            parse_key_source("secretkv://@/var/run/secrets/token:/secret/corestate/private-key")
                .unwrap();
        assert_eq!(
            src,
            KeySource::WorkloadIdentity {
                store: "secretkv".into(),
                token_path: PathBuf::from("/var/run/secrets/token"),
                mount: "secret".into(),
                path: "corestate/private-key".into(),
            }
        );
    }

    #[test]
    fn rejects_uri_without_scheme_separator() {
        assert!(parse_key_source("not-a-uri").is_err());
    }

    #[test]
    fn rejects_token_uri_missing_path_segment() {
        assert!(parse_key_source("secretkv://secret-only").is_err());
    }
}
