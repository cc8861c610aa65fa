// Copyright 2025 Chris Custine
//
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

//! Capabilities the engine consumes but does not implement.
//!
//! Network retrieval is split into [`TileFetcher`] (called from worker
//! threads) and [`TimeListFetcher`] (called wherever the time series is
//! refreshed). Decoding is a [`TileDecoder`], always called on the thread that
//! polls the cache, since that is where the decoded handle will be used.
//!
//! [`http`] provides blocking HTTP implementations of both fetchers.

pub mod http;

use std::thread;
use std::time::Duration;

use log::debug;
use serde::Deserialize;

use crate::error::{DecodeError, FetchError};
use crate::key::{NowcastMode, NowcastTimestamp, TileKey};

/// Upper bound on entries kept from a served time list.
pub const MAX_TIME_LIST_ENTRIES: usize = 120;

/// Blocking retrieval of encoded tile bytes.
pub trait TileFetcher: Send + Sync {
    fn fetch_tile(&self, key: &TileKey) -> Result<Vec<u8>, FetchError>;
}

impl<F> TileFetcher for F
where
    F: Fn(&TileKey) -> Result<Vec<u8>, FetchError> + Send + Sync,
{
    fn fetch_tile(&self, key: &TileKey) -> Result<Vec<u8>, FetchError> {
        self(key)
    }
}

/// Blocking retrieval of the ordered frame list for a mode.
pub trait TimeListFetcher {
    fn fetch_time_list(&self, mode: NowcastMode) -> Result<Vec<NowcastTimestamp>, FetchError>;
}

impl<F> TimeListFetcher for F
where
    F: Fn(NowcastMode) -> Result<Vec<NowcastTimestamp>, FetchError>,
{
    fn fetch_time_list(&self, mode: NowcastMode) -> Result<Vec<NowcastTimestamp>, FetchError> {
        self(mode)
    }
}

/// Turns encoded bytes into a drawable handle.
///
/// Must be invoked from the execution context that will use the handle; the
/// cache guarantees this by decoding lazily inside
/// [`crate::cache::TileCache::get_or_fetch`].
pub trait TileDecoder {
    /// The decoded resource. Released when the last handle to it drops.
    type Image: Send + Sync + 'static;

    fn decode(&self, key: &TileKey, bytes: &[u8]) -> Result<Self::Image, DecodeError>;
}

/// How often a worker retries a failed tile fetch before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves like one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each one after.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(1 << shift)
    }

    /// Run `op` until it succeeds or the attempts are used up, sleeping
    /// between attempts. Returns the last error on failure.
    pub fn run<T, E, F>(&self, mut op: F) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Result<T, E>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    let delay = self.backoff(attempt);
                    debug!("Attempt {attempt}/{attempts} failed ({e}), retrying in {delay:?}");
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

/// Parse a served time list: a JSON array of objects carrying at least
/// `basetime` and `validtime`. Extra fields are ignored and at most
/// [`MAX_TIME_LIST_ENTRIES`] entries are kept, in served order.
pub fn parse_time_list(bytes: &[u8]) -> Result<Vec<NowcastTimestamp>, FetchError> {
    #[derive(Deserialize)]
    struct Entry {
        basetime: String,
        validtime: String,
    }

    let entries: Vec<Entry> = serde_json::from_slice(bytes)?;
    if entries.is_empty() {
        return Err(FetchError::EmptyTimeList);
    }

    Ok(entries
        .into_iter()
        .take(MAX_TIME_LIST_ENTRIES)
        .map(|e| NowcastTimestamp::new(e.basetime, e.validtime))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_parse_time_list() {
        let json = br#"[
            {"basetime":"20250301123500","validtime":"20250301123500","elements":["hrpns"]},
            {"basetime":"20250301123000","validtime":"20250301123000","elements":["hrpns"]}
        ]"#;
        let times = parse_time_list(json).unwrap();
        assert_eq!(times.len(), 2);
        assert_eq!(times[0].base_time(), "20250301123500");
        assert_eq!(times[1].valid_time(), "20250301123000");
    }

    #[test]
    fn test_parse_time_list_bounded() {
        let entries: Vec<String> = (0..200)
            .map(|i| format!(r#"{{"basetime":"b{i}","validtime":"v{i}"}}"#))
            .collect();
        let json = format!("[{}]", entries.join(","));
        let times = parse_time_list(json.as_bytes()).unwrap();
        assert_eq!(times.len(), MAX_TIME_LIST_ENTRIES);
        assert_eq!(times[0].valid_time(), "v0");
    }

    #[test]
    fn test_parse_time_list_errors() {
        assert!(matches!(parse_time_list(b"[]"), Err(FetchError::EmptyTimeList)));
        assert!(matches!(
            parse_time_list(b"{not json"),
            Err(FetchError::MalformedTimeList(_))
        ));
    }

    #[test]
    fn test_retry_policy_stops_at_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::ZERO,
        };
        let calls = Cell::new(0);
        let result: Result<(), FetchError> = policy.run(|| {
            calls.set(calls.get() + 1);
            Err(FetchError::Status(503))
        });
        assert!(matches!(result, Err(FetchError::Status(503))));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_policy_returns_first_success() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::ZERO,
        };
        let calls = Cell::new(0);
        let result: Result<u32, FetchError> = policy.run(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 2 {
                Err(FetchError::EmptyBody)
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(250));
        assert_eq!(policy.backoff(2), Duration::from_millis(500));
        assert_eq!(policy.backoff(3), Duration::from_millis(1000));
        assert_eq!(RetryPolicy::none().max_attempts, 1);
    }
}
