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

//! Node value framing for the coordination store.
//!
//! §6 requires a documented, neutral framing in place of the original's language-specific
//! object graph. This crate uses a one-byte format version followed by a `bincode`-encoded
//! payload: `[0x01, ...bincode(T)]`. Version `1` is the only defined version; any other
//! leading byte (or an empty buffer) is a decode error, so a reader can never silently
//! misinterpret a value written by an incompatible writer.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{CoordinationError, SchedulerResult};

const FORMAT_VERSION: u8 = 1;

pub fn encode<T: Serialize>(value: &T) -> SchedulerResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(64);
    buf.push(FORMAT_VERSION);
    bincode::serialize_into(&mut buf, value)
        .map_err(|e| CoordinationError::Transient(anyhow::anyhow!(e)))?;
    Ok(buf)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> SchedulerResult<T> {
    match bytes.first() {
        Some(&FORMAT_VERSION) => bincode::deserialize(&bytes[1..])
            .map_err(|e| CoordinationError::Transient(anyhow::anyhow!(e)).into()),
        Some(other) => Err(CoordinationError::Transient(anyhow::anyhow!(
            "unsupported node value format version {other}"
        ))
        .into()),
        None => Err(CoordinationError::Transient(anyhow::anyhow!(
            "empty node value"
        ))
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_device_id_lists() {
        let ids: Vec<u64> = vec![1, 2, 3, 9];
        let encoded = encode(&ids).unwrap();
        assert_eq!(encoded[0], FORMAT_VERSION);
        let decoded: Vec<u64> = decode(&encoded).unwrap();
        assert_eq!(ids, decoded);
    }

    #[test]
    fn rejects_unknown_format_version() {
        let bytes = [0xFFu8, 1, 2, 3];
        let result: SchedulerResult<Vec<u64>> = decode(&bytes);
        assert!(result.is_err());
    }
}
