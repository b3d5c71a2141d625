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

//! Crate-wide error taxonomy.
//!
//! Shaped like `backup_restore/error.rs` in the teacher: one variant per subsystem that can
//! fail in a way the control loop needs to react to, plus a catch-all for everything else.
//! Transient coordination faults never reach this type — they are retried to exhaustion (or
//! forever) inside [`crate::coordination::retry`] and only escape as [`SchedulerError::Coordination`]
//! once the retry policy itself gives up.

use thiserror::Error;

pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("coordination store error: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("device catalog query failed: {0}")]
    Catalog(#[source] anyhow::Error),

    #[error("balancer precondition violated: {0}")]
    Balancer(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<redis::RedisError> for SchedulerError {
    fn from(e: redis::RedisError) -> Self {
        SchedulerError::Other(anyhow::anyhow!(e))
    }
}

impl From<sqlx::Error> for SchedulerError {
    fn from(e: sqlx::Error) -> Self {
        SchedulerError::Catalog(anyhow::anyhow!(e))
    }
}

/// Errors surfaced by a [`crate::coordination::CoordinationClient`].
///
/// `NotFound` and `NotEmpty` are expected control-flow outcomes callers are meant to match on
/// (§7: "treated as expected control-flow outcomes"), not failures; `Transient` is the class
/// the retry wrapper loops on, and only reaches a caller after the retry policy is exhausted
/// (which, with the default forever-mode policy, never happens in production).
#[derive(Error, Debug)]
pub enum CoordinationError {
    #[error("node not found: {0}")]
    NotFound(String),

    #[error("node not empty: {0}")]
    NotEmpty(String),

    #[error("transient coordination fault: {0}")]
    Transient(#[source] anyhow::Error),
}

impl CoordinationError {
    /// Whether the retry wrapper should keep retrying on this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoordinationError::Transient(_))
    }
}
