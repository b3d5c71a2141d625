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

//! The balancer — the core device-to-worker assignment algorithm.
//!
//! Grounded on `examples/original_source/service/scheduler.py`'s `balance_devices_per_worker`
//! and its two strategies, `balance_with_load_indexes` and `balance_with_count_per_worker`,
//! reproduced here field-for-field including the `decimal_points`/threshold/strict-`<`
//! subtleties called out in §4.5 and §9 of the specification. `balance` itself is async only
//! because the load-aware strategy needs one round trip through the metric cache
//! ([`fetch_and_reset`]) before it can decide which of the two strategies applies.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::cache::{device_key, MetricCacheClient, COUNT_FIELD, PROC_TIME_FIELD, RESET_VALUE};
use crate::error::SchedulerResult;
use crate::model::{by_count_then_min_id, by_load_then_count, by_load_then_id, Device, Worker};

/// Fractional slack allowed above the perfectly-even per-worker load share before the
/// stickiness pass refuses to keep a device on its current worker (§4.5).
pub const WORKER_DEVIATION: f64 = 0.1;

/// Rebalances `devices` across `workers`, consulting `cache` for telemetry accumulated since
/// the previous call.
///
/// Returns `workers` unchanged (and untouched) if either input is empty — there is nothing to
/// assign, and resetting cache counters on an empty device set would needlessly discard
/// telemetry that hasn't been claimed by anyone yet.
pub async fn balance(
    mut workers: Vec<Worker>,
    devices: HashMap<u64, Device>,
    cache: &dyn MetricCacheClient,
    deviation: f64,
) -> SchedulerResult<Vec<Worker>> {
    if workers.is_empty() || devices.is_empty() {
        return Ok(workers);
    }

    let mut devices = devices;
    let (system_msg_count, interval) = fetch_and_reset(&mut devices, cache).await;

    if system_msg_count > 0 {
        balance_with_load_indexes(&mut workers, devices, system_msg_count, interval, deviation);
    } else {
        balance_with_count_per_worker(&mut workers, devices);
    }

    Ok(workers)
}

/// Reads each device's accumulated `msg_count`/`proc_time` out of the cache, resets those
/// fields to zero, and zeroes the device's carried-over `load_index`. A cache miss for a
/// device (key absent, or an unparsable value) is treated as zero rather than an error —
/// the cache being cold folds the balancer into count-only mode exactly like an
/// all-zero-telemetry tick would (§7). A cache *failure* (connection dropped mid-batch, a
/// reset write erroring) is the same soft failure, not a hard error: it's logged and the
/// affected device's telemetry is treated as zero, mirroring [`crate::catalog::DeviceCatalog`]'s
/// refresh-failure handling so a Redis blip degrades to count-only balancing instead of
/// crashing the control loop.
async fn fetch_and_reset(devices: &mut HashMap<u64, Device>, cache: &dyn MetricCacheClient) -> (u64, f64) {
    let mut system_msg_count: u64 = 0;
    let mut interval: f64 = 0.0;

    for device in devices.values_mut() {
        let key = device_key(device.id());
        let values = match cache.get_fields(&key, &[COUNT_FIELD, PROC_TIME_FIELD]).await {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!("metric cache read for device {} failed, treating as zero telemetry: {e}", device.id());
                Vec::new()
            }
        };
        let msg_count: u64 = values
            .first()
            .and_then(|v| v.as_deref())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let proc_time: f64 = values
            .get(1)
            .and_then(|v| v.as_deref())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0);

        device.msg_count = msg_count;
        device.proc_time = proc_time;
        device.load_index = 0.0;
        system_msg_count += msg_count;
        interval += proc_time;
    }

    cache.begin_batch().await;
    for &id in devices.keys() {
        if let Err(e) = cache
            .set_fields(
                &device_key(id),
                &[(COUNT_FIELD, RESET_VALUE), (PROC_TIME_FIELD, RESET_VALUE)],
            )
            .await
        {
            tracing::warn!("metric cache reset for device {id} failed, counters may be stale next tick: {e}");
        }
    }
    if let Err(e) = cache.end_batch().await {
        tracing::warn!("metric cache batch commit failed, counters may be stale next tick: {e}");
    }

    (system_msg_count, interval)
}

/// Number of decimal places used when rounding load indexes and thresholds, scaled to the
/// device-count magnitude so indexes for large fleets don't collapse to indistinguishable
/// rounded values.
fn decimal_points(device_count: usize) -> i32 {
    let digits = if device_count == 0 {
        1
    } else {
        device_count.to_string().len()
    };
    ((digits as f64) * 9.0 / 4.0).ceil() as i32
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Load-aware strategy: devices carry a weighted share of system-wide message volume and
/// processing time, workers keep as much of their prior assignment as fits under a threshold,
/// and whatever's left over is handed to whichever worker is currently least loaded.
fn balance_with_load_indexes(
    workers: &mut Vec<Worker>,
    mut devices: HashMap<u64, Device>,
    system_msg_count: u64,
    interval: f64,
    deviation: f64,
) {
    let decimals = decimal_points(devices.len());
    let load_per_worker = round_to(1.0 / workers.len() as f64, decimals);
    let threshold = load_per_worker * (1.0 + deviation);

    for device in devices.values_mut() {
        device.load_index = if interval == 0.0 || system_msg_count == 0 {
            0.0
        } else {
            round_to(
                (device.proc_time * 0.7 / interval
                    + device.msg_count as f64 * 0.3 / system_msg_count as f64)
                    / (0.7 + 0.3),
                decimals,
            )
        };
    }

    // Descending by each worker's load index from the *previous* balance, carried over until
    // that worker is processed below.
    workers.sort_by(|a, b| by_load_then_count(b, a));

    for worker in workers.iter_mut() {
        let prior_ids: Vec<u64> = worker.device_ids();
        worker.load_index = 0.0;

        let mut candidates: Vec<Device> = prior_ids
            .into_iter()
            .filter_map(|id| devices.get(&id).cloned())
            .collect();
        candidates.sort_by(|a, b| by_load_then_id(b, a));

        let mut claimed = HashMap::new();
        for device in candidates {
            if worker.load_index + device.load_index < threshold {
                worker.load_index += device.load_index;
                devices.remove(&device.id());
                claimed.insert(device.id(), device);
            }
        }
        worker.set_devices(claimed);
    }

    let mut free: Vec<Device> = devices.into_values().collect();
    free.sort_by(|a, b| by_load_then_id(b, a));

    for device in free {
        workers.sort_by(|a, b| by_load_then_count(a, b));
        if let Some(worker) = workers.first_mut() {
            worker.load_index += device.load_index;
            worker.add_device(device);
        }
    }
}

/// Count-only strategy, used whenever there is no telemetry to weigh devices by (a cold cache,
/// or a genuinely idle fleet). Devices are distributed so worker device counts differ by at
/// most one, preferring to keep each worker's prior devices.
fn balance_with_count_per_worker(workers: &mut Vec<Worker>, devices: HashMap<u64, Device>) {
    let mut targets = get_devices_per_worker(workers.len(), devices.len());
    let mut free = devices;

    // Descending by prior (device_count, min_device_id): workers holding the most devices
    // claim their target first, fixed before any worker is mutated.
    workers.sort_by(|a, b| by_count_then_min_id(b, a));

    for worker in workers.iter_mut() {
        let target = *targets.iter().max().unwrap_or(&0);
        if let Some(pos) = targets.iter().position(|&t| t == target) {
            targets.remove(pos);
        }

        let prior_ids: HashSet<u64> = worker.devices().keys().copied().collect();
        worker.load_index = 0.0;

        let mut ids: Vec<u64> = free.keys().copied().collect();
        ids.sort_unstable();

        let mut claimed = HashMap::new();
        for id in ids {
            if claimed.len() >= target {
                break;
            }
            if prior_ids.contains(&id) {
                if let Some(device) = free.remove(&id) {
                    claimed.insert(id, device);
                }
            }
        }
        worker.set_devices(claimed);
    }

    let mut leftover_ids: Vec<u64> = free.keys().copied().collect();
    leftover_ids.sort_unstable();

    for id in leftover_ids {
        workers.sort_by(|a, b| by_count_then_min_id(a, b));
        if let Some(worker) = workers.first_mut() {
            if let Some(device) = free.remove(&id) {
                worker.add_device(device);
            }
        }
    }
}

/// Target device count per worker, most-loaded worker first: repeatedly takes
/// `ceil(remaining_devices / remaining_workers)`. E.g. 3 workers / 8 devices → `[3, 3, 2]`.
fn get_devices_per_worker(worker_count: usize, devices_count: usize) -> Vec<usize> {
    let mut result = Vec::with_capacity(worker_count);
    let mut workers_left = worker_count;
    let mut devices_left = devices_count;

    while workers_left > 0 {
        let per_worker = (devices_left + workers_left - 1) / workers_left;
        result.push(per_worker);
        devices_left = devices_left.saturating_sub(per_worker);
        workers_left -= 1;
    }

    result
}
