//! A supervisor holding multiple concurrent election campaigns, keyed by
//! prefix, with explicit stop (spec §4.3: "Multiple election prefixes can
//! be held concurrently by the same process [...] A supervisor map keyed
//! by prefix permits explicit stop.").

use crate::session::{campaign, run_as_leader, LeaderSession};
use etcd_client::Client;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Campaign {
    cancellation: CancellationToken,
    handle: JoinHandle<()>,
}

/// Supervises zero or more concurrent leader elections, one per prefix.
#[derive(Default)]
pub struct ElectionSupervisor {
    campaigns: Mutex<HashMap<String, Campaign>>,
}

impl ElectionSupervisor {
    /// Builds an empty supervisor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts (or restarts, if already running) a campaign on `prefix`,
    /// running `protected` every time this process wins leadership.
    /// `protected` is re-invoked after each loss-then-rewin, since a
    /// session is never resumed — each campaign is a fresh one
    /// (spec §4.3 step 2).
    pub fn start<F, Fut>(&self, prefix: &str, client: Client, ttl_secs: i64, protected: F)
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stop(prefix);
        let cancellation = CancellationToken::new();
        let outer = cancellation.clone();
        let prefix_owned = prefix.to_string();
        let handle = tokio::spawn(async move {
            while !outer.is_cancelled() {
                let session: LeaderSession = match campaign(client.clone(), &prefix_owned, ttl_secs, &outer).await {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!(error = %e, prefix = %prefix_owned, "campaign failed, retrying");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        continue;
                    }
                };
                run_as_leader(session, &protected).await;
            }
        });
        self.campaigns.lock().unwrap().insert(prefix.to_string(), Campaign { cancellation, handle });
    }

    /// Stops the campaign on `prefix`, if one is running. Resignation of
    /// any currently-held leadership still runs under its own detached
    /// timeout (spec §4.3 step 4).
    pub fn stop(&self, prefix: &str) {
        if let Some(c) = self.campaigns.lock().unwrap().remove(prefix) {
            c.cancellation.cancel();
            c.handle.abort();
        }
    }

    /// Stops every running campaign.
    pub fn stop_all(&self) {
        let campaigns: Vec<Campaign> = self.campaigns.lock().unwrap().drain().map(|(_, c)| c).collect();
        for c in campaigns {
            c.cancellation.cancel();
            c.handle.abort();
        }
    }

    /// True if a campaign is currently registered for `prefix` (does not
    /// imply this process currently holds leadership there).
    pub fn is_running(&self, prefix: &str) -> bool {
        self.campaigns.lock().unwrap().contains_key(prefix)
    }
}

impl Drop for ElectionSupervisor {
    fn drop(&mut self) {
        self.stop_all();
    }
}
