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

//! Core entities. Devices and workers hash by explicit identity (`Device::id`,
//! `Worker::identity`) rather than leaning on ambient `Hash`/`Eq` derives across their whole
//! state, and orderings are free comparator functions rather than a single baked-in `Ord` —
//! both per the design notes carried over from the distilled specification.

mod device;
mod worker;

pub use device::{by_load_then_id, Device};
pub use worker::{by_count_then_min_id, by_load_then_count, Worker};
