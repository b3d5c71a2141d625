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

//! Leader Election Driver — blocks until this replica is the active scheduler, then runs the
//! control loop until leadership is lost or the loop itself fails.
//!
//! Grounded on the leader/follower `watch` channel handoff in
//! `examples/RisingwaveLabs-risingwave/src/meta/src/rpc/server.rs`'s `rpc_serve_with_store`,
//! adapted from "spawn RPC services on win" to "run the control loop on win". A control-loop
//! error is treated as fatal and propagated to the caller (ultimately `main`, which exits
//! non-zero) rather than silently rejoining the election.

use std::sync::Arc;

use crate::control_loop::ControlLoop;
use crate::coordination::CoordinationClient;
use crate::error::SchedulerResult;

pub struct LeaderElectionDriver {
    client: Arc<dyn CoordinationClient>,
    election_path: String,
    identity: String,
}

impl LeaderElectionDriver {
    pub fn new(client: Arc<dyn CoordinationClient>, election_path: String, identity: String) -> Self {
        Self {
            client,
            election_path,
            identity,
        }
    }

    /// Runs forever: campaign, run the control loop while leading, and on leadership loss go
    /// back to campaigning. Returns only if the control loop itself returns an error.
    pub async fn run(&self, mut control_loop: ControlLoop) -> SchedulerResult<()> {
        loop {
            tracing::info!(identity = %self.identity, "campaigning for leadership");
            let handle = self.client.campaign(&self.election_path, &self.identity).await?;
            tracing::info!(identity = %self.identity, "won leadership, starting control loop");

            tokio::select! {
                result = control_loop.run() => {
                    return result;
                }
                _ = handle.lost => {
                    tracing::warn!(identity = %self.identity, "lost leadership, rejoining election");
                }
            }
        }
    }
}
