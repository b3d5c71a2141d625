// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Real coordination store backend, against etcd.
//!
//! Grounded on `EtcdMetaStore` (`examples/varunpv-risingwave/src/meta/src/storage/etcd_meta_store.rs`)
//! for the key encoding and `Txn`/`Compare` create-if-absent pattern, and on
//! `rpc_serve`'s `ConnectOptions` setup (`examples/RisingwaveLabs-risingwave/src/meta/src/rpc/server.rs`)
//! for connection bootstrapping. Ephemeral nodes and leader election both ride etcd leases:
//! a lease is granted with a TTL and kept alive by a background task for as long as the
//! ephemeral node (or this process's election campaign) should stay live.

use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, DeleteOptions, GetOptions, PutOptions, Txn, TxnOp,
    WatchOptions,
};
use tokio::sync::oneshot;

use super::retry::{self, RetryPolicy};
use super::{ChildrenWatcher, CoordinationClient, LeadershipHandle};
use crate::error::{CoordinationError, SchedulerResult};

/// Lease TTL backing ephemeral nodes and election campaigns. Kept well above the 1s control
/// loop tick so a single missed heartbeat doesn't flap membership.
const LEASE_TTL_SECS: i64 = 10;

/// Runs `op` under the coordination client's default retry policy, retrying transient etcd
/// faults (connection loss, timeouts) to exhaustion with capped exponential backoff, and
/// converting the final `CoordinationError` into a `SchedulerError` at the boundary.
async fn retrying<T, Op, Fut>(op: Op) -> SchedulerResult<T>
where
    Op: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, CoordinationError>>,
{
    retry::execute(&RetryPolicy::coordination_default(), CoordinationError::is_transient, op)
        .await
        .map_err(Into::into)
}

#[derive(Clone)]
pub struct EtcdCoordinationClient {
    client: Client,
}

impl EtcdCoordinationClient {
    pub async fn connect(endpoints: Vec<String>) -> SchedulerResult<Self> {
        let client = retrying(|| {
            let endpoints = endpoints.clone();
            async move {
                let options =
                    ConnectOptions::new().with_keep_alive(Duration::from_secs(3), Duration::from_secs(5));
                Client::connect(endpoints, Some(options))
                    .await
                    .map_err(|e| CoordinationError::Transient(anyhow::anyhow!(e)))
            }
        })
        .await?;
        Ok(Self { client })
    }

    /// Grants a lease with [`LEASE_TTL_SECS`] and spawns a task that keeps it alive until the
    /// process exits or the keep-alive stream errors (session expiry).
    async fn grant_session_lease(&self) -> SchedulerResult<i64> {
        let (lease_id, mut keeper, mut stream) = retrying(|| {
            let mut client = self.client.clone();
            async move {
                let lease = client
                    .lease_grant(LEASE_TTL_SECS, None)
                    .await
                    .map_err(|e| CoordinationError::Transient(anyhow::anyhow!(e)))?;
                let lease_id = lease.id();
                let (keeper, stream) = client
                    .lease_keep_alive(lease_id)
                    .await
                    .map_err(|e| CoordinationError::Transient(anyhow::anyhow!(e)))?;
                Ok((lease_id, keeper, stream))
            }
        })
        .await?;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs((LEASE_TTL_SECS / 3).max(1) as u64));
            loop {
                ticker.tick().await;
                if keeper.keep_alive().await.is_err() {
                    tracing::warn!("lease {lease_id} keep-alive send failed, session likely lost");
                    break;
                }
                if stream.message().await.is_err() {
                    tracing::warn!("lease {lease_id} keep-alive response failed, session likely lost");
                    break;
                }
            }
        });
        Ok(lease_id)
    }
}

#[async_trait]
impl CoordinationClient for EtcdCoordinationClient {
    async fn create(
        &self,
        path: &str,
        value: Option<Vec<u8>>,
        ephemeral: bool,
    ) -> SchedulerResult<bool> {
        let value = value.unwrap_or_default();

        let lease_id = if ephemeral {
            self.grant_session_lease().await?
        } else {
            0
        };

        retrying(|| {
            let mut client = self.client.clone();
            let value = value.clone();
            async move {
                let put_options = if lease_id != 0 {
                    Some(PutOptions::new().with_lease(lease_id))
                } else {
                    None
                };
                let txn = Txn::new()
                    .when([Compare::version(path, CompareOp::Equal, 0)])
                    .and_then([TxnOp::put(path, value, put_options)]);
                let resp = client
                    .txn(txn)
                    .await
                    .map_err(|e| CoordinationError::Transient(anyhow::anyhow!(e)))?;
                Ok(resp.succeeded())
            }
        })
        .await
    }

    async fn set(&self, path: &str, value: Vec<u8>) -> SchedulerResult<()> {
        retrying(|| {
            let mut client = self.client.clone();
            let value = value.clone();
            async move {
                client
                    .put(path, value, None)
                    .await
                    .map_err(|e| CoordinationError::Transient(anyhow::anyhow!(e)))?;
                Ok(())
            }
        })
        .await
    }

    async fn get(&self, path: &str) -> SchedulerResult<Vec<u8>> {
        retrying(|| {
            let mut client = self.client.clone();
            async move {
                let resp = client
                    .get(path, None)
                    .await
                    .map_err(|e| CoordinationError::Transient(anyhow::anyhow!(e)))?;
                resp.kvs()
                    .first()
                    .map(|kv| kv.value().to_vec())
                    .ok_or_else(|| CoordinationError::NotFound(path.to_string()))
            }
        })
        .await
    }

    async fn children(&self, path: &str) -> SchedulerResult<Vec<String>> {
        retrying(|| {
            let mut client = self.client.clone();
            let prefix = format!("{path}/");
            async move {
                let resp = client
                    .get(prefix.clone(), Some(GetOptions::new().with_prefix()))
                    .await
                    .map_err(|e| CoordinationError::Transient(anyhow::anyhow!(e)))?;
                if resp.kvs().is_empty() {
                    return Err(CoordinationError::NotFound(path.to_string()));
                }
                let mut names: Vec<String> = resp
                    .kvs()
                    .iter()
                    .filter_map(|kv| kv.key_str().ok())
                    .filter_map(|key| key.strip_prefix(&prefix))
                    .map(|rest| rest.split('/').next().unwrap_or(rest).to_string())
                    .collect();
                names.sort_unstable();
                names.dedup();
                Ok(names)
            }
        })
        .await
    }

    async fn delete(&self, path: &str, recursive: bool) -> SchedulerResult<bool> {
        retrying(|| {
            let mut client = self.client.clone();
            async move {
                if !recursive {
                    let prefix = format!("{path}/");
                    let children = client
                        .get(prefix, Some(GetOptions::new().with_prefix().with_count_only()))
                        .await
                        .map_err(|e| CoordinationError::Transient(anyhow::anyhow!(e)))?;
                    if children.count() > 0 {
                        return Ok(false);
                    }
                    client
                        .delete(path, None)
                        .await
                        .map_err(|e| CoordinationError::Transient(anyhow::anyhow!(e)))?;
                    return Ok(true);
                }

                client
                    .delete(path, Some(DeleteOptions::new().with_prefix()))
                    .await
                    .map_err(|e| CoordinationError::Transient(anyhow::anyhow!(e)))?;
                Ok(true)
            }
        })
        .await
    }

    async fn watch_children(&self, path: &str, on_change: ChildrenWatcher) -> SchedulerResult<()> {
        self.create(path, None, false).await.ok();

        let prefix = format!("{path}/");
        let (_watcher, mut stream) = retrying(|| {
            let mut client = self.client.clone();
            let prefix = prefix.clone();
            async move {
                client
                    .watch(prefix, Some(WatchOptions::new().with_prefix()))
                    .await
                    .map_err(|e| CoordinationError::Transient(anyhow::anyhow!(e)))
            }
        })
        .await?;

        let initial = self.children(path).await.unwrap_or_default();
        on_change(initial);

        let this = self.clone();
        let path = path.to_string();
        tokio::spawn(async move {
            while let Ok(Some(resp)) = stream.message().await {
                if resp.events().is_empty() {
                    continue;
                }
                match this.children(&path).await {
                    Ok(children) => on_change(children),
                    Err(e) => tracing::warn!("failed to refresh children of {path}: {e}"),
                }
            }
            tracing::warn!("children watch on {path} ended");
        });
        Ok(())
    }

    async fn campaign(&self, path: &str, identity: &str) -> SchedulerResult<LeadershipHandle> {
        let lease_id = self.grant_session_lease().await?;
        retrying(|| {
            let mut election = self.client.clone().election_client();
            async move {
                election
                    .campaign(path, identity.to_string(), lease_id)
                    .await
                    .map_err(|e| CoordinationError::Transient(anyhow::anyhow!(e)))
            }
        })
        .await?;

        let (lost_tx, lost_rx) = oneshot::channel();
        let mut observe_election = self.client.clone().election_client();
        let path = path.to_string();
        let identity = identity.to_string();
        tokio::spawn(async move {
            let mut stream = match observe_election.observe(path.clone()).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("failed to observe election {path}: {e}");
                    let _ = lost_tx.send(());
                    return;
                }
            };
            while let Ok(Some(resp)) = stream.message().await {
                let Some(kv) = resp.kv() else { continue };
                if kv.value() != identity.as_bytes() {
                    tracing::info!("lost leadership of {path} to another campaign");
                    let _ = lost_tx.send(());
                    return;
                }
            }
            let _ = lost_tx.send(());
        });

        Ok(LeadershipHandle { lost: lost_rx })
    }
}
