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

//! In-memory coordination store, used as a test double so balancer/mapper/control-loop logic
//! can be exercised without a live etcd cluster — grounded on the teacher's `MemStore`
//! (referenced from `rpc/server.rs`'s `MetaStoreBackend::Mem` branch and exercised in
//! `manager/cluster.rs`'s `#[tokio::test]` suite).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::{ChildrenWatcher, CoordinationClient, LeadershipHandle};
use crate::error::{CoordinationError, SchedulerResult};

#[derive(Default)]
struct Inner {
    nodes: HashMap<String, Vec<u8>>,
    watchers: HashMap<String, Vec<ChildrenWatcher>>,
    leaders: HashMap<String, (String, oneshot::Sender<()>)>,
}

#[derive(Clone, Default)]
pub struct MemCoordinationClient {
    inner: Arc<Mutex<Inner>>,
}

impl MemCoordinationClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn direct_children(inner: &Inner, path: &str) -> Vec<String> {
        let prefix = format!("{path}/");
        let mut names: Vec<String> = inner
            .nodes
            .keys()
            .filter_map(|key| key.strip_prefix(prefix.as_str()))
            .map(|rest| rest.split('/').next().unwrap_or(rest).to_string())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    fn notify(inner: &Inner, path: &str) {
        if let Some(watchers) = inner.watchers.get(path) {
            let children = Self::direct_children(inner, path);
            for watcher in watchers {
                watcher(children.clone());
            }
        }
    }

    /// Test-only hook for exercising leader failover (spec.md §8 scenario 6): forces the
    /// current leader of `path` to lose leadership so another campaign can win.
    pub fn force_leadership_loss(&self, path: &str) {
        if let Some((_, tx)) = self.inner.lock().leaders.remove(path) {
            let _ = tx.send(());
        }
    }
}

#[async_trait]
impl CoordinationClient for MemCoordinationClient {
    async fn create(
        &self,
        path: &str,
        value: Option<Vec<u8>>,
        _ephemeral: bool,
    ) -> SchedulerResult<bool> {
        let mut inner = self.inner.lock();
        if inner.nodes.contains_key(path) {
            return Ok(false);
        }
        inner.nodes.insert(path.to_string(), value.unwrap_or_default());
        if let Some((parent, _)) = path.rsplit_once('/') {
            if !parent.is_empty() {
                Self::notify(&inner, parent);
            }
        }
        Ok(true)
    }

    async fn set(&self, path: &str, value: Vec<u8>) -> SchedulerResult<()> {
        let mut inner = self.inner.lock();
        inner.nodes.insert(path.to_string(), value);
        Ok(())
    }

    async fn get(&self, path: &str) -> SchedulerResult<Vec<u8>> {
        self.inner
            .lock()
            .nodes
            .get(path)
            .cloned()
            .ok_or_else(|| CoordinationError::NotFound(path.to_string()).into())
    }

    async fn children(&self, path: &str) -> SchedulerResult<Vec<String>> {
        let inner = self.inner.lock();
        if !inner.nodes.contains_key(path) {
            return Err(CoordinationError::NotFound(path.to_string()).into());
        }
        Ok(Self::direct_children(&inner, path))
    }

    async fn delete(&self, path: &str, recursive: bool) -> SchedulerResult<bool> {
        let mut inner = self.inner.lock();
        let children = Self::direct_children(&inner, path);
        if !children.is_empty() && !recursive {
            return Ok(false);
        }
        let prefix = format!("{path}/");
        inner.nodes.retain(|key, _| !(key == path || key.starts_with(&prefix)));
        if let Some((parent, _)) = path.rsplit_once('/') {
            if !parent.is_empty() {
                Self::notify(&inner, parent);
            }
        }
        Ok(true)
    }

    async fn watch_children(&self, path: &str, on_change: ChildrenWatcher) -> SchedulerResult<()> {
        let mut inner = self.inner.lock();
        inner.nodes.entry(path.to_string()).or_default();
        let current = Self::direct_children(&inner, path);
        inner.watchers.entry(path.to_string()).or_default().push(on_change.clone());
        drop(inner);
        on_change(current);
        Ok(())
    }

    async fn campaign(&self, path: &str, identity: &str) -> SchedulerResult<LeadershipHandle> {
        loop {
            {
                let mut inner = self.inner.lock();
                if !inner.leaders.contains_key(path) {
                    let (tx, rx) = oneshot::channel();
                    inner.leaders.insert(path.to_string(), (identity.to_string(), tx));
                    return Ok(LeadershipHandle { lost: rx });
                }
            }
            tokio::task::yield_now().await;
        }
    }
}
