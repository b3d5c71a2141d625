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

/// A processable input channel, identified by a stable numeric id.
///
/// Equality and hashing are by [`Device::id`] alone; [`msg_count`](Device::msg_count),
/// [`proc_time`](Device::proc_time) and [`load_index`](Device::load_index) are telemetry
/// attached at balancing time and do not participate in identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    id: u64,
    pub msg_count: u64,
    pub proc_time: f64,
    pub load_index: f64,
    /// Reserved for future reprocessing support. Carried but never branched on.
    pub reprocessing: bool,
}

impl Device {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            msg_count: 0,
            proc_time: 0.0,
            load_index: 0.0,
            reprocessing: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Eq for Device {}

/// Ascending by `(load_index, id)`, matching the scheduler's device orderings.
pub fn by_load_then_id(a: &Device, b: &Device) -> Ordering {
    a.load_index
        .partial_cmp(&b.load_index)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.id.cmp(&b.id))
}
