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

//! A retry policy as a first-class value, not a control-flow decorator (design note:
//! "Retry policy as a value"). Grounded on the `ExponentialBackoff` + `jitter` strategy used
//! around recovery operations in the teacher's `barrier/recovery.rs`, generalized with an
//! explicit "is this retryable" predicate so transient coordination faults loop forever while
//! anything else surfaces on the first attempt.

use std::future::Future;
use std::time::Duration;

use tokio_retry::strategy::{jitter, ExponentialBackoff};

/// Bounded exponential backoff, expressed as data rather than baked into call sites.
///
/// `max_attempts == 0` means retry forever, matching the coordination client's default
/// (connection loss, session expiry and timeouts are retried with no attempt cap).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    pub max_attempts: usize,
}

impl RetryPolicy {
    /// The coordination client's default: initial 1s, multiplier 2, cap 60s, unbounded
    /// attempts.
    pub const fn coordination_default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2,
            max_delay: Duration::from_secs(60),
            max_attempts: 0,
        }
    }

    fn strategy(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        let multiplier = self.multiplier.max(1) as u64;
        let factor = (self.initial_delay.as_millis() as u64 / multiplier).max(1);
        let backoff = ExponentialBackoff::from_millis(multiplier)
            .factor(factor)
            .max_delay(self.max_delay)
            .map(jitter);
        if self.max_attempts == 0 {
            Box::new(backoff)
        } else {
            Box::new(backoff.take(self.max_attempts))
        }
    }
}

/// Runs `op` under `policy`, retrying while `is_retryable(&err)` holds and the policy still
/// has attempts left. Returns the first non-retryable error, or the last error once attempts
/// are exhausted.
pub async fn execute<T, E, Op, Fut, Retryable>(
    policy: &RetryPolicy,
    is_retryable: Retryable,
    mut op: Op,
) -> Result<T, E>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    Retryable: Fn(&E) -> bool,
{
    let mut delays = policy.strategy();
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable(&err) => match delays.next() {
                Some(delay) => {
                    tracing::warn!("transient error, retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
                None => return Err(err),
            },
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let attempts = AtomicUsize::new(0);
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            multiplier: 2,
            max_delay: Duration::from_millis(5),
            max_attempts: 5,
        };

        let result: Result<u32, &'static str> = execute(
            &policy,
            |_: &&str| true,
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient")
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_surface_immediately() {
        let attempts = AtomicUsize::new(0);
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            multiplier: 2,
            max_delay: Duration::from_millis(5),
            max_attempts: 5,
        };

        let result: Result<u32, &'static str> = execute(
            &policy,
            |_: &&str| false,
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move { Err("permanent") }
            },
        )
        .await;

        assert_eq!(result, Err("permanent"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
