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

//! Device Catalog — a periodically refreshed snapshot of enabled, processable device ids
//! read from an external relational source.
//!
//! Grounded on `examples/original_source/infrastructure/db.py`'s `DeviceStorage`: the same
//! rate-limited refresh-or-return-cached contract, translated from a `SELECT ... ORDER BY id`
//! query over `m_controldata_device` to a parameterized `sqlx` query (schema names come from
//! [`crate::config::SchedulerConfig`] rather than being hardcoded, per §6's configuration
//! surface).

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::time::Instant;

use crate::error::SchedulerResult;
use crate::model::Device;

/// Refreshes are self-rate-limited to at most once per this interval; extra calls within the
/// window are no-ops that return the cached snapshot.
pub const UPDATE_INTERVAL: Duration = Duration::from_secs(30);

/// What the control loop needs from a device source: a periodic refresh and a point-in-time
/// snapshot. Exists so `control_loop` can be driven by an in-memory double in tests instead of
/// a live Postgres connection.
#[async_trait]
pub trait DeviceSource: Send + Sync {
    async fn refresh(&self);
    fn snapshot(&self) -> Vec<Device>;
}

struct State {
    devices: HashSet<u64>,
    last_refresh: Option<Instant>,
}

pub struct DeviceCatalog {
    pool: PgPool,
    query: String,
    state: Mutex<State>,
}

impl DeviceCatalog {
    pub async fn connect(
        database_url: &str,
        table: &str,
        id_column: &str,
        enabled_column: &str,
        processable_column: &str,
    ) -> SchedulerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let query = format!(
            "SELECT {id_column} FROM {table} WHERE {enabled_column} = true AND {processable_column} = true ORDER BY {id_column}"
        );
        Ok(Self {
            pool,
            query,
            state: Mutex::new(State {
                devices: HashSet::new(),
                last_refresh: None,
            }),
        })
    }

    /// Returns the last fetched set of enabled/processable devices, freshly constructed (so
    /// telemetry fields start at zero until the balancer's cache fetch fills them in).
    pub fn snapshot(&self) -> Vec<Device> {
        self.state
            .lock()
            .devices
            .iter()
            .map(|&id| Device::new(id))
            .collect()
    }

    /// Re-queries the relational source, subject to [`UPDATE_INTERVAL`] rate limiting. On
    /// query failure, the previous snapshot is retained and the error is logged — balancing
    /// proceeds as if the device set is unchanged (§7).
    pub async fn refresh(&self) {
        {
            let state = self.state.lock();
            if let Some(last) = state.last_refresh {
                if last.elapsed() < UPDATE_INTERVAL {
                    return;
                }
            }
        }

        match self.fetch_ids().await {
            Ok(ids) => {
                let mut state = self.state.lock();
                state.devices = ids;
                state.last_refresh = Some(Instant::now());
            }
            Err(e) => {
                tracing::warn!("device catalog refresh failed, retaining previous snapshot: {e}");
                self.state.lock().last_refresh = Some(Instant::now());
            }
        }
    }

    async fn fetch_ids(&self) -> SchedulerResult<HashSet<u64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(&self.query).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id,)| id as u64).collect())
    }
}

// Inherent methods take priority over trait methods in method-call resolution, so these
// delegate to `DeviceCatalog::refresh`/`::snapshot` above rather than recursing.
#[async_trait]
impl DeviceSource for DeviceCatalog {
    async fn refresh(&self) {
        self.refresh().await
    }

    fn snapshot(&self) -> Vec<Device> {
        self.snapshot()
    }
}

#[cfg(test)]
pub(crate) struct FakeDeviceSource {
    ids: Mutex<HashSet<u64>>,
}

#[cfg(test)]
impl FakeDeviceSource {
    pub(crate) fn new(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            ids: Mutex::new(ids.into_iter().collect()),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl DeviceSource for FakeDeviceSource {
    async fn refresh(&self) {}

    fn snapshot(&self) -> Vec<Device> {
        self.ids.lock().iter().map(|&id| Device::new(id)).collect()
    }
}
