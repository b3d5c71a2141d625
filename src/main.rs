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

//! Binary entrypoint: parses configuration, wires up the coordination client, device catalog,
//! metric cache client and mapper, then runs the leader election driver forever.
//!
//! CLI/env parsing and logging init follow the teacher's `meta-node` binary
//! (`examples/RisingwaveLabs-risingwave/src/meta/src/bin/meta-node.rs`-style `clap::Parser` +
//! `tracing_subscriber::EnvFilter` setup). A fatal error anywhere in the run loop is propagated
//! out of `main` so the process exits non-zero, matching the teacher's
//! `join_handle.await.unwrap()` habit of letting failures surface rather than swallowing them.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use devsched::cache::RedisMetricCacheClient;
use devsched::catalog::DeviceCatalog;
use devsched::config::SchedulerConfig;
use devsched::control_loop::ControlLoop;
use devsched::coordination::{CoordinationClient, EtcdCoordinationClient};
use devsched::election::LeaderElectionDriver;
use devsched::mapper::WorkerDeviceMapper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = SchedulerConfig::parse();
    let identity = config.resolved_identity();
    tracing::info!(%identity, "starting scheduler");

    let coordination = EtcdCoordinationClient::connect(config.zoo_endpoints()).await?;
    let client: Arc<dyn CoordinationClient> = Arc::new(coordination);

    let catalog = DeviceCatalog::connect(
        &config.database_url,
        &config.device_table,
        &config.device_id_column,
        &config.device_enabled_column,
        &config.device_processable_column,
    )
    .await?;

    let cache = RedisMetricCacheClient::connect(&config.redis_url()).await?;

    let mapper = WorkerDeviceMapper::new(client.clone(), config.worker_path(), config.assign_path()).await?;

    let control_loop = ControlLoop::new(
        Box::new(catalog),
        mapper,
        Box::new(cache),
        devsched::balancer::WORKER_DEVIATION,
    );
    let driver = LeaderElectionDriver::new(client, config.election_path(), identity);

    driver.run(control_loop).await?;
    Ok(())
}
