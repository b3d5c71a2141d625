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

//! Metric Cache Client — per-device message-count and processing-time counters, read and
//! atomically reset by the scheduler once per balance.
//!
//! Contract and key/field shape grounded directly on
//! `examples/original_source/infrastructure/cache.py` (`hmget`/`hmset`/`hincrbyfloat` against a
//! `device:{id}` hash), translated onto the real `redis` crate's async multiplexed connection.
//! A missing cache is a soft failure (§7): callers get back all-zero values rather than an
//! error, which folds the balancer into count-only mode exactly as the original
//! `fetch_cache_data`'s bare `except AttributeError: pass` did when `self.redis` was `None`.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::error::SchedulerResult;

pub const COUNT_FIELD: &str = "msg_count";
pub const PROC_TIME_FIELD: &str = "proc_time";
pub const RESET_VALUE: &str = "0";
/// Written by the data path, never read here — named so a data-path implementation or test
/// fixture has one source of truth for the key instead of a magic string (§4.3 supplement).
pub const SYSTEM_KEY: &str = "system";

pub fn device_key(id: u64) -> String {
    format!("device:{id}")
}

#[async_trait]
pub trait MetricCacheClient: Send + Sync {
    /// Starts buffering subsequent `set_fields`/`increment` calls. No-op if pipelining isn't
    /// supported by the backend.
    async fn begin_batch(&self);

    /// Flushes whatever was buffered since `begin_batch` atomically. No-op if pipelining isn't
    /// supported.
    async fn end_batch(&self) -> SchedulerResult<()>;

    /// Reads `fields` of `key`'s hash. A missing field (or a missing key) is represented as
    /// `None`, which callers interpret as zero.
    async fn get_fields(&self, key: &str, fields: &[&str]) -> SchedulerResult<Vec<Option<String>>>;

    async fn set_fields(&self, key: &str, fields: &[(&str, &str)]) -> SchedulerResult<()>;

    async fn increment(&self, key: &str, field: &str, delta: f64) -> SchedulerResult<()>;
}

/// Redis-backed implementation. `begin_batch`/`end_batch` swap in a buffered `redis::Pipeline`
/// for the duration of the batch, matching `cache.py`'s `start_transaction`/`end_transaction`
/// swapping `self._submitter` between the plain client and `self._redis.pipeline()`.
pub struct RedisMetricCacheClient {
    conn: MultiplexedConnection,
    pipeline: Mutex<Option<redis::Pipeline>>,
}

impl RedisMetricCacheClient {
    pub async fn connect(redis_url: &str) -> SchedulerResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        Ok(Self {
            conn,
            pipeline: Mutex::new(None),
        })
    }
}

#[async_trait]
impl MetricCacheClient for RedisMetricCacheClient {
    async fn begin_batch(&self) {
        *self.pipeline.lock() = Some(redis::pipe());
    }

    async fn end_batch(&self) -> SchedulerResult<()> {
        let pipeline = self.pipeline.lock().take();
        if let Some(pipeline) = pipeline {
            let mut conn = self.conn.clone();
            let _: () = pipeline.query_async(&mut conn).await?;
        }
        Ok(())
    }

    async fn get_fields(&self, key: &str, fields: &[&str]) -> SchedulerResult<Vec<Option<String>>> {
        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = conn.hget(key, fields).await?;
        Ok(values)
    }

    async fn set_fields(&self, key: &str, fields: &[(&str, &str)]) -> SchedulerResult<()> {
        let mut guard = self.pipeline.lock();
        if let Some(pipeline) = guard.as_mut() {
            pipeline.hset_multiple(key, fields);
            return Ok(());
        }
        drop(guard);
        let mut conn = self.conn.clone();
        let _: () = conn.hset_multiple(key, fields).await?;
        Ok(())
    }

    async fn increment(&self, key: &str, field: &str, delta: f64) -> SchedulerResult<()> {
        let mut guard = self.pipeline.lock();
        if let Some(pipeline) = guard.as_mut() {
            pipeline.hincr(key, field, delta);
            return Ok(());
        }
        drop(guard);
        let mut conn = self.conn.clone();
        let _: () = conn.hincr(key, field, delta).await?;
        Ok(())
    }
}
