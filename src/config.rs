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

//! Process configuration, loaded from the environment via `clap`'s `env` support — the same
//! `#[clap(long, env = "RW_...")]` style the teacher uses for `MetaNodeOpts`
//! (`examples/RisingwaveLabs-risingwave/src/meta/src/lib.rs`), with defaults matching §6/§7 of
//! the specification. Injected explicitly through constructors rather than read from ambient
//! globals, per design note "Global configuration".

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "devsched", about = "Stream-processing fleet scheduler")]
pub struct SchedulerConfig {
    /// Comma-separated coordination store endpoints.
    #[arg(long, env = "ZOO_HOSTS", default_value = "127.0.0.1:2379")]
    pub zoo_hosts: String,

    /// Parent prefix for the workers/worker_dev/election paths.
    #[arg(long, env = "SCHED_COORD_PREFIX", default_value = "/processing")]
    pub coord_prefix: String,

    /// Relational DSN for the device catalog.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    #[arg(long, env = "DEVICE_TABLE", default_value = "m_controldata_device")]
    pub device_table: String,

    #[arg(long, env = "DEVICE_ID_COLUMN", default_value = "id")]
    pub device_id_column: String,

    #[arg(long, env = "DEVICE_ENABLED_COLUMN", default_value = "enabled")]
    pub device_enabled_column: String,

    #[arg(long, env = "DEVICE_PROCESSABLE_COLUMN", default_value = "processable")]
    pub device_processable_column: String,

    #[arg(long, env = "REDIS_HOST", default_value = "localhost")]
    pub redis_host: String,

    #[arg(long, env = "REDIS_PORT", default_value_t = 6379)]
    pub redis_port: u16,

    #[arg(long, env = "REDIS_DB", default_value_t = 0)]
    pub redis_db: i64,

    /// Scheduler identity, unique per process. Defaults to `hostname:pid`.
    #[arg(long, env = "SCHED_IDENTITY")]
    pub identity: Option<String>,
}

impl SchedulerConfig {
    pub fn zoo_endpoints(&self) -> Vec<String> {
        self.zoo_hosts.split(',').map(str::trim).map(str::to_string).collect()
    }

    pub fn worker_path(&self) -> String {
        format!("{}/workers", self.coord_prefix)
    }

    pub fn assign_path(&self) -> String {
        format!("{}/worker_dev", self.coord_prefix)
    }

    pub fn election_path(&self) -> String {
        format!("{}/election", self.coord_prefix)
    }

    pub fn resolved_identity(&self) -> String {
        self.identity.clone().unwrap_or_else(|| {
            let host = hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown-host".to_string());
            format!("{host}:{}", std::process::id())
        })
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/{}", self.redis_host, self.redis_port, self.redis_db)
    }
}
