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

//! Control Loop — ticks at a fixed interval, decides whether to rebalance, and publishes the
//! result.
//!
//! Grounded on the teacher's `tokio::select!`-driven service loops in
//! `examples/RisingwaveLabs-risingwave/src/meta/src/rpc/server.rs`, narrowed to a single
//! `tokio::time::interval` tick rather than a multi-branch select — this loop has exactly one
//! thing to wait on.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::balancer;
use crate::cache::MetricCacheClient;
use crate::catalog::DeviceSource;
use crate::error::SchedulerResult;
use crate::mapper::WorkerDeviceMapper;
use crate::model::Device;

/// Tick cadence.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);
/// A rebalance is forced at least this often even if nothing appears to have changed, so
/// telemetry accumulated under an unchanged worker/device set still gets folded in.
pub const FORCE_REBALANCE_INTERVAL: Duration = Duration::from_secs(30);

pub struct ControlLoop {
    catalog: Box<dyn DeviceSource>,
    mapper: WorkerDeviceMapper,
    cache: Box<dyn MetricCacheClient>,
    deviation: f64,
    previous_devices: HashSet<u64>,
    previous_workers: Vec<String>,
    last_rebalance_tick: Option<Instant>,
}

impl ControlLoop {
    pub fn new(
        catalog: Box<dyn DeviceSource>,
        mapper: WorkerDeviceMapper,
        cache: Box<dyn MetricCacheClient>,
        deviation: f64,
    ) -> Self {
        Self {
            catalog,
            mapper,
            cache,
            deviation,
            previous_devices: HashSet::new(),
            previous_workers: Vec::new(),
            last_rebalance_tick: None,
        }
    }

    /// Runs until `run` itself returns an error (coordination store failure bubbling out of a
    /// balance/publish cycle) — the caller (the election driver) treats that as fatal.
    pub async fn run(&mut self) -> SchedulerResult<()> {
        let mut ticker = interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.tick().await?;
        }
    }

    #[tracing::instrument(skip(self))]
    async fn tick(&mut self) -> SchedulerResult<()> {
        self.catalog.refresh().await;

        let device_snapshot = self.catalog.snapshot();
        let devices: HashSet<u64> = device_snapshot.iter().map(Device::id).collect();
        let workers = self.mapper.workers();
        let mut worker_identities: Vec<String> =
            workers.iter().map(|w| w.identity().to_string()).collect();
        worker_identities.sort();

        let devices_changed = devices != self.previous_devices;
        let workers_changed = worker_identities != self.previous_workers;
        let force = match self.last_rebalance_tick {
            None => true,
            Some(last) => last.elapsed() >= FORCE_REBALANCE_INTERVAL,
        };

        tracing::debug!(
            devices_changed,
            workers_changed,
            force,
            device_count = devices.len(),
            worker_count = worker_identities.len(),
            "tick decision"
        );

        if devices_changed || workers_changed || force {
            tracing::info!(
                devices_changed,
                workers_changed,
                force,
                "rebalancing"
            );
            let device_map = device_snapshot.into_iter().map(|d| (d.id(), d)).collect();
            let result = balancer::balance(workers, device_map, self.cache.as_ref(), self.deviation).await?;
            self.mapper.publish(&result).await?;
            self.last_rebalance_tick = Some(Instant::now());
            self.previous_devices = devices;
            self.previous_workers = worker_identities;
            tracing::info!("rebalance published");
        } else {
            tracing::debug!("no change, skipping rebalance");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::catalog::FakeDeviceSource;
    use crate::coordination::{CoordinationClient, MemCoordinationClient};

    /// Counts `get_fields` calls so tests can tell whether a tick actually ran the balancer
    /// (the only place the cache is consulted) without threading a separate publish counter
    /// through the coordination store.
    #[derive(Default)]
    struct CountingCache {
        reads: AtomicUsize,
    }

    #[async_trait]
    impl MetricCacheClient for CountingCache {
        async fn begin_batch(&self) {}
        async fn end_batch(&self) -> SchedulerResult<()> {
            Ok(())
        }
        async fn get_fields(&self, _key: &str, fields: &[&str]) -> SchedulerResult<Vec<Option<String>>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(vec![None; fields.len()])
        }
        async fn set_fields(&self, _key: &str, _fields: &[(&str, &str)]) -> SchedulerResult<()> {
            Ok(())
        }
        async fn increment(&self, _key: &str, _field: &str, _delta: f64) -> SchedulerResult<()> {
            Ok(())
        }
    }

    /// Creates a mapper over a single pre-existing worker `w1` and waits for the mapper's
    /// children-watch to pick it up, then wraps it into a `ControlLoop`.
    async fn new_loop_with_one_worker(
        catalog: FakeDeviceSource,
        reads: &Arc<CountingCache>,
    ) -> ControlLoop {
        let client: Arc<dyn CoordinationClient> = Arc::new(MemCoordinationClient::new());
        client.create("/processing/workers/w1", None, true).await.unwrap();

        let mapper = WorkerDeviceMapper::new(
            client,
            "/processing/workers".to_string(),
            "/processing/worker_dev".to_string(),
        )
        .await
        .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(mapper.workers().len(), 1);

        ControlLoop::new(Box::new(catalog), mapper, Box::new(reads.clone()), 0.1)
    }

    #[async_trait]
    impl MetricCacheClient for Arc<CountingCache> {
        async fn begin_batch(&self) {
            CountingCache::begin_batch(self).await
        }
        async fn end_batch(&self) -> SchedulerResult<()> {
            CountingCache::end_batch(self).await
        }
        async fn get_fields(&self, key: &str, fields: &[&str]) -> SchedulerResult<Vec<Option<String>>> {
            CountingCache::get_fields(self, key, fields).await
        }
        async fn set_fields(&self, key: &str, fields: &[(&str, &str)]) -> SchedulerResult<()> {
            CountingCache::set_fields(self, key, fields).await
        }
        async fn increment(&self, key: &str, field: &str, delta: f64) -> SchedulerResult<()> {
            CountingCache::increment(self, key, field, delta).await
        }
    }

    #[tokio::test]
    async fn first_tick_always_rebalances() {
        let reads = Arc::new(CountingCache::default());
        let catalog = FakeDeviceSource::new(1..=4);
        let mut loop_ = new_loop_with_one_worker(catalog, &reads).await;

        loop_.tick().await.unwrap();
        assert_eq!(reads.reads.load(Ordering::SeqCst), 4, "first tick must rebalance unconditionally");
    }

    #[tokio::test]
    async fn second_tick_with_no_change_is_a_no_op() {
        let reads = Arc::new(CountingCache::default());
        let catalog = FakeDeviceSource::new(1..=4);
        let mut loop_ = new_loop_with_one_worker(catalog, &reads).await;

        loop_.tick().await.unwrap();
        let after_first = reads.reads.load(Ordering::SeqCst);
        assert!(after_first > 0);

        loop_.tick().await.unwrap();
        assert_eq!(
            reads.reads.load(Ordering::SeqCst),
            after_first,
            "an unchanged device/worker set well within the force window must not rebalance again"
        );
    }

    #[tokio::test]
    async fn device_set_change_forces_a_rebalance_on_the_next_tick() {
        let reads = Arc::new(CountingCache::default());
        let catalog = FakeDeviceSource::new(1..=4);
        let mut loop_ = new_loop_with_one_worker(catalog, &reads).await;

        loop_.tick().await.unwrap();
        let after_first = reads.reads.load(Ordering::SeqCst);

        loop_.catalog = Box::new(FakeDeviceSource::new(1..=5));
        loop_.tick().await.unwrap();
        assert_eq!(
            reads.reads.load(Ordering::SeqCst),
            after_first + 5,
            "a new device set must trigger a fresh rebalance"
        );
    }
}
