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

use std::cmp::Ordering;
use std::collections::HashMap;

use super::device::Device;

/// A worker process in the fleet, identified by an opaque, stable-for-its-session string
/// assigned by the worker itself on registration.
///
/// Equality and hashing are by [`Worker::identity`] alone.
#[derive(Debug, Clone)]
pub struct Worker {
    identity: String,
    devices: HashMap<u64, Device>,
    pub load_index: f64,
}

impl Worker {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            devices: HashMap::new(),
            load_index: 0.0,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn devices(&self) -> &HashMap<u64, Device> {
        &self.devices
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn contains(&self, device_id: u64) -> bool {
        self.devices.contains_key(&device_id)
    }

    pub fn set_devices(&mut self, devices: HashMap<u64, Device>) {
        self.devices = devices;
    }

    pub fn add_device(&mut self, device: Device) {
        self.devices.insert(device.id(), device);
    }

    /// `min(device.id for device in self.devices)`, or `0` on an empty set — mirrors the
    /// `ValueError` fallback in the original `_sort_workers` helper.
    pub fn min_device_id(&self) -> u64 {
        self.devices.keys().min().copied().unwrap_or(0)
    }

    pub fn device_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.devices.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl PartialEq for Worker {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for Worker {}

/// Ascending by `(load_index, device_count)` — the load-aware worker ordering.
pub fn by_load_then_count(a: &Worker, b: &Worker) -> Ordering {
    a.load_index
        .partial_cmp(&b.load_index)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.device_count().cmp(&b.device_count()))
}

/// Ascending by `(device_count, min_device_id)` — the count-only worker ordering, used so
/// workers that already hold the most devices (and the highest-numbered ones) sort last in
/// the leftover pass and first when claiming their target count.
pub fn by_count_then_min_id(a: &Worker, b: &Worker) -> Ordering {
    a.device_count()
        .cmp(&b.device_count())
        .then_with(|| a.min_device_id().cmp(&b.min_device_id()))
}
