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

//! Worker/Device Mapper — tracks worker membership via a coordination-store children-watch and
//! publishes the device-per-worker assignment produced by the balancer.
//!
//! Grounded on `examples/RisingwaveLabs-risingwave/src/meta/src/manager/cluster.rs`'s
//! `ClusterManager` (state behind a lock, mutated by async methods, read out as a snapshot)
//! combined with `examples/varunpv-risingwave/src/meta/src/manager/cluster.rs`'s lookup-by-host
//! pattern, adapted to index workers by `identity`. Per the distilled specification's explicit
//! preference (§9 "Watch callbacks vs control loop"), the watch callback never mutates shared
//! state directly — it publishes a fresh snapshot into a `tokio::sync::watch` channel that the
//! control loop reads on its own schedule.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;

use crate::coordination::CoordinationClient;
use crate::error::SchedulerResult;
use crate::model::{Device, Worker};

/// Each live worker creates an ephemeral child here, named by its identity.
pub const WORKER_SUBPATH: &str = "workers";
/// Children published by the scheduler; each child's value is the device ids assigned to that
/// worker.
pub const ASSIGN_SUBPATH: &str = "worker_dev";

pub struct WorkerDeviceMapper {
    client: Arc<dyn CoordinationClient>,
    worker_path: String,
    assign_path: String,
    workers_tx: watch::Sender<Vec<Worker>>,
    workers_rx: watch::Receiver<Vec<Worker>>,
}

impl WorkerDeviceMapper {
    /// Ensures `worker_path` exists and installs a persistent children-watch on it. The initial
    /// snapshot (and every subsequent one) pre-populates each worker's devices from
    /// `assign_path/{identity}`, tolerating a missing assignment node as "no prior devices".
    pub async fn new(
        client: Arc<dyn CoordinationClient>,
        worker_path: String,
        assign_path: String,
    ) -> SchedulerResult<Self> {
        client.create(&worker_path, None, false).await?;

        let (workers_tx, workers_rx) = watch::channel(Vec::new());
        let mapper = Self {
            client: client.clone(),
            worker_path: worker_path.clone(),
            assign_path: assign_path.clone(),
            workers_tx,
            workers_rx,
        };

        let tx = mapper.workers_tx.clone();
        let watch_client = client.clone();
        let watch_assign_path = assign_path.clone();
        client
            .watch_children(
                &worker_path,
                Arc::new(move |identities| {
                    let tx = tx.clone();
                    let client = watch_client.clone();
                    let assign_path = watch_assign_path.clone();
                    tokio::spawn(async move {
                        let workers = build_workers(&client, &assign_path, identities).await;
                        let _ = tx.send(workers);
                    });
                }),
            )
            .await?;

        Ok(mapper)
    }

    /// The latest known worker set, each pre-populated with its prior device assignment.
    pub fn workers(&self) -> Vec<Worker> {
        self.workers_rx.borrow().clone()
    }

    /// A receiver that resolves whenever the control loop should check for a fresh worker set.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Worker>> {
        self.workers_rx.clone()
    }

    /// Deletes `assign_path` recursively, then creates `assign_path/{identity}` for every
    /// worker with value = that worker's device id list. Deliberately non-atomic (§4.4):
    /// a concurrent reader may observe the old state, a transient absence, or the new state,
    /// but never a partial per-worker id list.
    pub async fn publish(&self, workers: &[Worker]) -> SchedulerResult<()> {
        self.client.delete(&self.assign_path, true).await?;
        self.client.create(&self.assign_path, None, false).await?;

        for worker in workers {
            let path = format!("{}/{}", self.assign_path, worker.identity());
            let value = crate::coordination::codec::encode(&worker.device_ids())?;
            self.client.create(&path, Some(value), false).await?;
        }
        Ok(())
    }

    pub fn worker_path(&self) -> &str {
        &self.worker_path
    }

    pub fn assign_path(&self) -> &str {
        &self.assign_path
    }
}

async fn build_workers(
    client: &Arc<dyn CoordinationClient>,
    assign_path: &str,
    identities: Vec<String>,
) -> Vec<Worker> {
    let mut workers = Vec::with_capacity(identities.len());
    for identity in identities {
        let mut worker = Worker::new(identity.clone());
        let node_path = format!("{assign_path}/{identity}");
        if let Ok(bytes) = client.get(&node_path).await {
            if let Ok(ids) = crate::coordination::codec::decode::<Vec<u64>>(&bytes) {
                let mut devices = HashMap::with_capacity(ids.len());
                for id in ids {
                    devices.insert(id, Device::new(id));
                }
                worker.set_devices(devices);
            }
        }
        workers.push(worker);
    }
    workers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::MemCoordinationClient;

    #[tokio::test]
    async fn picks_up_prior_assignment_on_rebuild() {
        let client: Arc<dyn CoordinationClient> = Arc::new(MemCoordinationClient::new());
        client.create("/processing/worker_dev", None, false).await.unwrap();
        let value = crate::coordination::codec::encode(&vec![1u64, 2, 3]).unwrap();
        client
            .create("/processing/worker_dev/w1", Some(value), false)
            .await
            .unwrap();
        client
            .create("/processing/workers/w1", None, true)
            .await
            .unwrap();

        let mapper = WorkerDeviceMapper::new(
            client.clone(),
            "/processing/workers".to_string(),
            "/processing/worker_dev".to_string(),
        )
        .await
        .unwrap();

        // Allow the spawned rebuild task to run.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let workers = mapper.workers();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].device_ids(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn publish_round_trips_through_get() {
        let client: Arc<dyn CoordinationClient> = Arc::new(MemCoordinationClient::new());
        let mapper = WorkerDeviceMapper::new(
            client.clone(),
            "/processing/workers".to_string(),
            "/processing/worker_dev".to_string(),
        )
        .await
        .unwrap();

        let mut w1 = Worker::new("w1");
        w1.set_devices(HashMap::from([(1, Device::new(1)), (2, Device::new(2))]));
        mapper.publish(&[w1]).await.unwrap();

        let bytes = client.get("/processing/worker_dev/w1").await.unwrap();
        let ids: Vec<u64> = crate::coordination::codec::decode(&bytes).unwrap();
        assert_eq!(ids, vec![1, 2]);
    }
}
