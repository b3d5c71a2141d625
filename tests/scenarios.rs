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

//! End-to-end scenario tests wiring the coordination client, mapper, and balancer together
//! against the in-memory coordination store double — the device catalog and metric cache are
//! out of scope here (they need a live Postgres/Redis), so these drive `balancer::balance` and
//! `WorkerDeviceMapper::publish` directly, the same shape `control_loop::ControlLoop::tick`
//! would produce. Mirrors the scenarios enumerated in the distilled specification's "worked
//! examples" section.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use devsched::balancer::{balance, WORKER_DEVIATION};
use devsched::cache::MetricCacheClient;
use devsched::coordination::{codec, CoordinationClient, MemCoordinationClient};
use devsched::error::SchedulerResult;
use devsched::mapper::WorkerDeviceMapper;
use devsched::model::{Device, Worker};
use parking_lot::Mutex;

#[derive(Default)]
struct EmptyCache;

#[async_trait]
impl MetricCacheClient for EmptyCache {
    async fn begin_batch(&self) {}
    async fn end_batch(&self) -> SchedulerResult<()> {
        Ok(())
    }
    async fn get_fields(&self, _key: &str, fields: &[&str]) -> SchedulerResult<Vec<Option<String>>> {
        Ok(vec![None; fields.len()])
    }
    async fn set_fields(&self, _key: &str, _fields: &[(&str, &str)]) -> SchedulerResult<()> {
        Ok(())
    }
    async fn increment(&self, _key: &str, _field: &str, _delta: f64) -> SchedulerResult<()> {
        Ok(())
    }
}

fn devices(ids: impl IntoIterator<Item = u64>) -> HashMap<u64, Device> {
    ids.into_iter().map(|id| (id, Device::new(id))).collect()
}

#[tokio::test]
async fn steady_state_then_device_added_via_mapper_publish() {
    let client: Arc<dyn CoordinationClient> = Arc::new(MemCoordinationClient::new());
    let mapper = WorkerDeviceMapper::new(
        client.clone(),
        "/processing/workers".to_string(),
        "/processing/worker_dev".to_string(),
    )
    .await
    .unwrap();

    client.create("/processing/workers/w1", None, true).await.unwrap();
    client.create("/processing/workers/w2", None, true).await.unwrap();
    client.create("/processing/workers/w3", None, true).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let cache = EmptyCache::default();
    let workers = mapper.workers();
    assert_eq!(workers.len(), 3);

    let balanced = balance(workers, devices(1..=8), &cache, WORKER_DEVIATION)
        .await
        .unwrap();
    mapper.publish(&balanced).await.unwrap();

    let mut counts: Vec<usize> = balanced.iter().map(Worker::device_count).collect();
    counts.sort_unstable();
    assert_eq!(counts, vec![2, 3, 3]);

    // Verify the publish actually reached the coordination store, per-worker.
    for worker in &balanced {
        let path = format!("/processing/worker_dev/{}", worker.identity());
        let bytes = client.get(&path).await.unwrap();
        let ids: Vec<u64> = codec::decode(&bytes).unwrap();
        assert_eq!(ids, worker.device_ids());
    }

    // Scenario: device 9 is added. Mapper still reports the same three workers (it rebuilds
    // devices from what was just published), so stickiness should hold and the new device
    // should land on whichever worker currently has the fewest.
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let workers_again = mapper.workers();
    let rebalanced = balance(workers_again, devices(1..=9), &cache, WORKER_DEVIATION)
        .await
        .unwrap();
    let mut counts: Vec<usize> = rebalanced.iter().map(Worker::device_count).collect();
    counts.sort_unstable();
    assert_eq!(counts, vec![3, 3, 3]);
}

#[tokio::test]
async fn worker_departure_is_observed_through_children_watch() {
    let client: Arc<dyn CoordinationClient> = Arc::new(MemCoordinationClient::new());
    let mapper = WorkerDeviceMapper::new(
        client.clone(),
        "/processing/workers".to_string(),
        "/processing/worker_dev".to_string(),
    )
    .await
    .unwrap();

    client.create("/processing/workers/w1", None, true).await.unwrap();
    client.create("/processing/workers/w2", None, true).await.unwrap();
    client.create("/processing/workers/w3", None, true).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert_eq!(mapper.workers().len(), 3);

    client.delete("/processing/workers/w3", false).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let remaining = mapper.workers();
    let identities: Vec<&str> = remaining.iter().map(Worker::identity).collect();
    assert_eq!(identities.len(), 2);
    assert!(!identities.contains(&"w3"));
}

#[tokio::test]
async fn leader_failover_hands_off_without_double_leadership() {
    let client = Arc::new(MemCoordinationClient::new());
    let path = "/processing/election";

    let coordination_client: Arc<dyn CoordinationClient> = client.clone();
    let handle_a = coordination_client.campaign(path, "replica-a").await.unwrap();

    // A second replica's campaign must not resolve while replica-a is still leading.
    let second_client = coordination_client.clone();
    let won_b = Arc::new(Mutex::new(false));
    let won_b_writer = won_b.clone();
    let join = tokio::spawn(async move {
        second_client.campaign(path, "replica-b").await.unwrap();
        *won_b_writer.lock() = true;
    });

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(!*won_b.lock(), "replica-b must not win while replica-a leads");

    client.force_leadership_loss(path);
    assert!(handle_a.lost.await.is_ok());

    join.await.unwrap();
    assert!(*won_b.lock(), "replica-b should win after replica-a's failure");
}
