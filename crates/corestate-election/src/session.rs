//! Single-leader election over a well-known key prefix (spec §4.3).
//!
//! Algorithm, per spec:
//! 1. Create a session (lease) on the KV. Session loss cancels the
//!    leader context.
//! 2. Generate a fresh random campaign key every time — never resume a
//!    prior campaign.
//! 3. Campaign; the winner runs the protected closure with a context
//!    cancelled on session-closed, observed-leader-key-changed, or
//!    outer-context-cancelled.
//! 4. On exit, resign with a detached 10-second timeout so cancelling
//!    the outer context doesn't leave a dangling lease.

use etcd_client::{Client, Compare, CompareOp, GetOptions, LeaseKeepAliveStream, LeaseKeeper, PutOptions, Txn, TxnOp};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// How long the election wrapper waits for resignation to complete
/// before abandoning it — the lease still expires on its own after the
/// session TTL (spec §4.3 step 4).
const RESIGN_TIMEOUT: Duration = Duration::from_secs(10);

/// A live campaign: the session lease, the randomly generated campaign
/// key this process is holding, and the cancellation token observers
/// should select on to learn that leadership has ended.
pub struct LeaderSession {
    client: Client,
    lease_id: i64,
    campaign_key: String,
    cancellation: CancellationToken,
}

impl LeaderSession {
    /// A context cancelled when this process stops being the leader
    /// (session loss, leader key change, or the outer context ending).
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Resigns the campaign: deletes the campaign key under a detached
    /// timeout (spec §4.3 step 4), regardless of whether the caller's
    /// own context is already cancelled.
    pub async fn resign(mut self) {
        self.cancellation.cancel();
        let key = self.campaign_key.clone();
        let resign = async move {
            if let Err(e) = self.client.delete(key, None).await {
                warn!(error = %e, "failed to delete campaign key on resignation");
            }
        };
        if tokio::time::timeout(RESIGN_TIMEOUT, resign).await.is_err() {
            warn!("resignation did not complete within the detached timeout; lease will expire on its own");
        }
    }
}

/// Creates a session lease with `ttl_secs`, generates a fresh random
/// campaign key under `prefix`, and blocks until this process becomes
/// the leader (lowest create-revision key under the prefix holds
/// leadership, the classic etcd election recipe).
pub async fn campaign(
    mut client: Client,
    prefix: &str,
    ttl_secs: i64,
    outer: &CancellationToken,
) -> Result<LeaderSession, etcd_client::Error> {
    let lease = client.lease_grant(ttl_secs, None).await?;
    let lease_id = lease.id();

    let (keeper, keep_alive_stream) = client.lease_keep_alive(lease_id).await?;
    let cancellation = outer.child_token();
    spawn_session_watchdog(keeper, keep_alive_stream, cancellation.clone());

    let campaign_key = format!("{prefix}/campaign/{}", Uuid::new_v4());
    let put_opts = PutOptions::new().with_lease(lease_id);
    let txn = Txn::new()
        .when(vec![Compare::create_revision(campaign_key.as_str(), CompareOp::Equal, 0)])
        .and_then(vec![TxnOp::put(campaign_key.as_str(), "leader", Some(put_opts))]);
    client.txn(txn).await?;

    wait_to_become_leader(&mut client, prefix, &campaign_key, &cancellation).await?;

    info!(%campaign_key, "campaign won, running as leader");
    Ok(LeaderSession { client, lease_id, campaign_key, cancellation })
}

/// Polls the prefix until `campaign_key` holds the lowest create
/// revision (i.e. is the current leader), watching the next-lower key
/// for deletion between attempts instead of busy-polling.
async fn wait_to_become_leader(
    client: &mut Client,
    prefix: &str,
    campaign_key: &str,
    cancellation: &CancellationToken,
) -> Result<(), etcd_client::Error> {
    loop {
        if cancellation.is_cancelled() {
            return Ok(());
        }
        let resp = client
            .get(format!("{prefix}/campaign/"), Some(GetOptions::new().with_prefix().with_sort(
                etcd_client::SortTarget::Create,
                etcd_client::SortOrder::Ascend,
            )))
            .await?;
        let kvs = resp.kvs();
        let our_index = kvs.iter().position(|kv| kv.key_str().unwrap_or_default() == campaign_key);
        match our_index {
            Some(0) => return Ok(()),
            Some(i) => {
                let predecessor_key = kvs[i - 1].key().to_vec();
                let mut watch_client = client.watch_client();
                let (_watcher, mut stream) = watch_client.watch(predecessor_key, None).await?;
                tokio::select! {
                    _ = cancellation.cancelled() => return Ok(()),
                    resp = stream.message() => {
                        if let Ok(Some(_)) = resp {
                            continue;
                        }
                    }
                }
            }
            None => {
                // Our key vanished (session expired mid-campaign); surface
                // as cancellation rather than looping forever.
                cancellation.cancel();
                return Ok(());
            }
        }
    }
}

/// Keeps the session lease alive until the keep-alive stream ends (the
/// server revoked it, or the connection was lost), at which point the
/// session is considered closed and `cancellation` fires (spec §4.3
/// step 1 and §8 election properties).
fn spawn_session_watchdog(
    mut keeper: LeaseKeeper,
    mut stream: LeaseKeepAliveStream,
    cancellation: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(1)) => {
                    if keeper.keep_alive().await.is_err() {
                        cancellation.cancel();
                        break;
                    }
                }
            }
            match stream.message().await {
                Ok(Some(_)) => continue,
                _ => {
                    cancellation.cancel();
                    break;
                }
            }
        }
    });
}

/// Runs `protected` while this process holds leadership, resigning
/// afterward regardless of how `protected` completed (spec §4.3 step 4:
/// "the election wrapper always resigns on exit even if the outer
/// context was cancelled").
pub async fn run_as_leader<F, Fut, T>(session: LeaderSession, protected: F) -> T
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = T>,
{
    let ctx = session.cancellation();
    let result = protected(ctx).await;
    session.resign().await;
    result
}
