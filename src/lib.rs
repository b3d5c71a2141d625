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

//! Control-plane scheduler for a stream-processing fleet.
//!
//! Balances devices across a dynamic set of worker processes, publishing the assignment
//! through a coordination store and reacting to worker membership changes and telemetry, under
//! a leader-elected active scheduler replica. Module layout mirrors the teacher's `src/meta`
//! split: a thin coordination abstraction at the bottom, independent catalog/cache/mapper
//! clients above it, the balancer as a pure function, and a control loop + election driver
//! wiring everything together.

pub mod balancer;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod control_loop;
pub mod coordination;
pub mod election;
pub mod error;
pub mod mapper;
pub mod model;
