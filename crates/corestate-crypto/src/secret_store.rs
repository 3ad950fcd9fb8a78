//! A minimal HTTP client for a generic key-value secret store (spec
//! §4.8). The wire protocol is intentionally small: a `GET` of
//! `<addr>/v1/<mount>/<path>` returning either a scalar string or a list
//! of strings, and a login endpoint exchanging a workload-identity token
//! for a client token.

use crate::error::CryptoError;
use serde::Deserialize;

/// A value read back from the secret store: either one PEM blob or
/// several, to be newline-joined (spec §4.8: "the loader concatenates
/// list elements with newline separators").
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SecretValue {
    Scalar(String),
    List(Vec<String>),
}

impl SecretValue {
    fn joined(self) -> String {
        match self {
            SecretValue::Scalar(s) => s,
            SecretValue::List(items) => items.join("\n"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SecretReadResponse {
    data: SecretValue,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    client_token: String,
}

/// A thin `reqwest`-backed client for the secret store.
#[derive(Clone)]
pub struct SecretKvClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl SecretKvClient {
    /// Builds a client bound to `base_url`, authenticating with `token`
    /// (may be empty before a workload-identity exchange).
    pub fn new(base_url: String, token: String) -> Self {
        Self { http: reqwest::Client::new(), base_url, token }
    }

    /// Returns a clone of this client authenticated with a different
    /// (typically freshly-exchanged) token.
    pub fn clone_with_token(&self, token: String) -> Self {
        Self { http: self.http.clone(), base_url: self.base_url.clone(), token }
    }

    /// Reads `mount/path` and joins a scalar-or-list response into one
    /// string as spec §4.8 requires.
    pub async fn read_joined(&self, mount: &str, path: &str) -> Result<String, CryptoError> {
        let url = format!("{}/v1/{}/{}", self.base_url.trim_end_matches('/'), mount, path);
        let resp = self
            .http
            .get(&url)
            .header("X-Store-Token", &self.token)
            .send()
            .await
            .map_err(|e| CryptoError::SecretStore(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(CryptoError::SecretStore(format!(
                "secret store returned {} for {}",
                resp.status(),
                url
            )));
        }
        let parsed: SecretReadResponse = resp
            .json()
            .await
            .map_err(|e| CryptoError::SecretStore(format!("malformed secret response: {e}")))?;
        Ok(parsed.data.joined())
    }

    /// Exchanges a workload-identity token for a short-lived client token
    /// at `<addr>/v1/auth/<role_mount>/login`.
    pub async fn exchange_workload_identity(
        &self,
        role_mount: &str,
        identity_token: &str,
    ) -> Result<String, CryptoError> {
        let url = format!("{}/v1/auth/{}/login", self.base_url.trim_end_matches('/'), role_mount);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "jwt": identity_token }))
            .send()
            .await
            .map_err(|e| CryptoError::SecretStore(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(CryptoError::SecretStore(format!(
                "workload identity login returned {} for {}",
                resp.status(),
                url
            )));
        }
        let parsed: LoginResponse = resp
            .json()
            .await
            .map_err(|e| CryptoError::SecretStore(format!("malformed login response: {e}")))?;
        Ok(parsed.client_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_value_joins_list_with_newlines() {
        let v = SecretValue::List(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(v.joined(), "a\nb\nc");
    }

    #[test]
    fn secret_value_passes_scalar_through() {
        let v = SecretValue::Scalar("only-one".into());
        assert_eq!(v.joined(), "only-one");
    }
}
