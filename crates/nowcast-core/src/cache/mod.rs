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

//! Bounded, deduplicating tile cache.
//!
//! Entries move through a small state machine:
//!
//! ```text
//! (absent) --request--> Pending --fetched--> BytesReady --decoded--> Decoded
//!                          |                      |
//!                          +--fetch failed--> (absent)    +--bad image--> Failed
//! ```
//!
//! The map lock is only ever held for lookups and state changes. Fetches run
//! on the scheduler's workers with the lock released, and decoding happens on
//! the polling thread, also outside the lock.
//!
//! Eviction is strict LRU by last access, run after every insertion that
//! pushes the cache past capacity.

use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, warn};

use crate::fetch::{TileDecoder, TileFetcher};
use crate::key::TileKey;
use crate::scheduler::{FetchJob, FetchOutcome, FetchScheduler, SchedulerConfig};

/// Default maximum number of entries.
pub const DEFAULT_CAPACITY: usize = 256;

/// Configuration for [`TileCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries kept after an eviction pass. At least one.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Observable state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Fetch scheduled or running.
    Pending,
    /// Bytes arrived; decoded on the next poll.
    BytesReady,
    /// Decoded handle available.
    Decoded,
    /// Bytes could not be decoded. Stays until evicted or invalidated.
    Failed,
}

/// Point-in-time counts for status display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub pending: usize,
    pub bytes_ready: usize,
    pub decoded: usize,
    pub failed: usize,
    /// Fetch jobs waiting for a worker.
    pub queued_jobs: usize,
}

enum Slot<I> {
    Pending,
    BytesReady(Vec<u8>),
    /// Bytes taken out for decoding on the polling thread.
    Decoding,
    Decoded(Arc<I>),
    Failed,
}

impl<I> Slot<I> {
    fn state(&self) -> EntryState {
        match self {
            Self::Pending => EntryState::Pending,
            Self::BytesReady(_) | Self::Decoding => EntryState::BytesReady,
            Self::Decoded(_) => EntryState::Decoded,
            Self::Failed => EntryState::Failed,
        }
    }
}

struct CacheEntry<I> {
    slot: Slot<I>,
    /// Logical access time; larger is more recent.
    last_access: u64,
    /// Identifies the fetch that created this entry.
    ticket: u64,
}

enum Lookup<I> {
    Ready(Arc<I>),
    NotReady,
    Decode(Vec<u8>),
    Missing,
}

struct Entries<I> {
    map: HashMap<TileKey, CacheEntry<I>>,
    clock: u64,
    next_ticket: u64,
}

impl<I> Entries<I> {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            clock: 0,
            next_ticket: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn lookup(&mut self, key: &TileKey) -> Lookup<I> {
        let now = self.tick();
        let Some(entry) = self.map.get_mut(key) else {
            return Lookup::Missing;
        };
        entry.last_access = now;

        match &mut entry.slot {
            Slot::Decoded(image) => Lookup::Ready(Arc::clone(image)),
            Slot::BytesReady(bytes) => {
                let bytes = mem::take(bytes);
                entry.slot = Slot::Decoding;
                Lookup::Decode(bytes)
            }
            Slot::Pending | Slot::Decoding | Slot::Failed => Lookup::NotReady,
        }
    }

    /// Insert a pending placeholder and return its ticket.
    fn insert_pending(&mut self, key: TileKey) -> u64 {
        let now = self.tick();
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.map.insert(
            key,
            CacheEntry {
                slot: Slot::Pending,
                last_access: now,
                ticket,
            },
        );
        ticket
    }

    /// Drop least recently used entries until at most `capacity` remain.
    fn evict_to(&mut self, capacity: usize) -> usize {
        if self.map.len() <= capacity {
            return 0;
        }

        let mut by_age: Vec<(u64, TileKey)> = self
            .map
            .iter()
            .map(|(key, entry)| (entry.last_access, key.clone()))
            .collect();
        by_age.sort_unstable_by_key(|(last_access, _)| *last_access);

        let excess = self.map.len() - capacity;
        for (_, key) in by_age.into_iter().take(excess) {
            self.map.remove(&key);
        }
        excess
    }

    /// Apply a finished fetch, unless the entry it was for is gone.
    fn commit(&mut self, outcome: FetchOutcome) -> bool {
        let FetchOutcome { job, result } = outcome;
        let current = self.map.get(&job.key).is_some_and(|entry| {
            entry.ticket == job.ticket && matches!(entry.slot, Slot::Pending)
        });
        if !current {
            debug!("Discarding fetch result for {}: entry was evicted", job.key);
            return false;
        }

        match result {
            Ok(bytes) => {
                if let Some(entry) = self.map.get_mut(&job.key) {
                    entry.slot = Slot::BytesReady(bytes);
                }
                true
            }
            Err(e) => {
                warn!("Failed to fetch {}: {}", job.key, e);
                self.map.remove(&job.key);
                false
            }
        }
    }
}

fn lock<I>(entries: &Mutex<Entries<I>>) -> MutexGuard<'_, Entries<I>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs on a worker thread. Signals the consumer only when bytes were stored.
fn on_fetch_complete<I>(entries: &Mutex<Entries<I>>, ready_tx: &Sender<()>, outcome: FetchOutcome) {
    let applied = lock(entries).commit(outcome);
    if applied {
        let _ = ready_tx.try_send(());
    }
}

/// Concurrent tile cache backed by a [`FetchScheduler`].
///
/// Polled from one consumer thread; [`TileCache::get_or_fetch`] never blocks
/// on the network.
pub struct TileCache<D: TileDecoder> {
    entries: Arc<Mutex<Entries<D::Image>>>,
    capacity: usize,
    decoder: D,
    ready_rx: Receiver<()>,
    scheduler: FetchScheduler,
}

impl<D: TileDecoder> std::fmt::Debug for TileCache<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCache")
            .field("entries", &self.len())
            .field("capacity", &self.capacity)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl<D: TileDecoder> TileCache<D> {
    /// Create the cache and start its fetch workers.
    pub fn new(
        config: &CacheConfig,
        scheduler: &SchedulerConfig,
        fetcher: Arc<dyn TileFetcher>,
        decoder: D,
    ) -> Self {
        let entries = Arc::new(Mutex::new(Entries::new()));
        // One slot: completions coalesce into a single pending signal
        let (ready_tx, ready_rx) = bounded::<()>(1);

        let shared = Arc::clone(&entries);
        let scheduler = FetchScheduler::spawn(scheduler, fetcher, move |outcome| {
            on_fetch_complete(&shared, &ready_tx, outcome);
        });

        Self {
            entries,
            capacity: config.capacity.max(1),
            decoder,
            ready_rx,
            scheduler,
        }
    }

    /// Return the decoded handle for `key` if it is ready, scheduling a fetch
    /// on first request.
    ///
    /// - Decoded: returns the handle and marks the entry recently used.
    /// - Bytes arrived: decodes now, on this thread, then returns the handle.
    /// - Pending or Failed: returns `None`.
    /// - Absent: inserts a placeholder, evicts past capacity, queues exactly
    ///   one fetch and returns `None`.
    pub fn get_or_fetch(&self, key: &TileKey) -> Option<Arc<D::Image>> {
        let mut entries = lock(&self.entries);
        let bytes = match entries.lookup(key) {
            Lookup::Ready(image) => return Some(image),
            Lookup::NotReady => return None,
            Lookup::Decode(bytes) => bytes,
            Lookup::Missing => {
                let ticket = entries.insert_pending(key.clone());
                let evicted = entries.evict_to(self.capacity);
                drop(entries);

                if evicted > 0 {
                    debug!("Evicted {evicted} tiles");
                }
                self.scheduler.submit(FetchJob {
                    key: key.clone(),
                    ticket,
                });
                return None;
            }
        };
        drop(entries);

        let decoded = self.decoder.decode(key, &bytes);

        let mut entries = lock(&self.entries);
        // Cleared or replaced while decoding: hand out the image but keep it out of the map
        let entry = entries
            .map
            .get_mut(key)
            .filter(|entry| matches!(entry.slot, Slot::Decoding));
        match (decoded, entry) {
            (Ok(image), Some(entry)) => {
                let image = Arc::new(image);
                entry.slot = Slot::Decoded(Arc::clone(&image));
                Some(image)
            }
            (Ok(image), None) => Some(Arc::new(image)),
            (Err(e), entry) => {
                warn!("Failed to decode {key}: {e}");
                if let Some(entry) = entry {
                    entry.slot = Slot::Failed;
                }
                None
            }
        }
    }

    /// State of the entry for `key`, without touching its access time.
    #[must_use]
    pub fn state(&self, key: &TileKey) -> Option<EntryState> {
        lock(&self.entries).map.get(key).map(|entry| entry.slot.state())
    }

    #[must_use]
    pub fn contains(&self, key: &TileKey) -> bool {
        lock(&self.entries).map.contains_key(key)
    }

    /// Remove the entry for `key` so the next request fetches it again.
    /// This is how a Failed entry is retried.
    pub fn invalidate(&self, key: &TileKey) -> bool {
        lock(&self.entries).map.remove(key).is_some()
    }

    /// Drop every entry. In-flight fetches finish and are discarded.
    pub fn clear(&self) {
        lock(&self.entries).map.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.entries).map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Receiver that yields once after one or more tiles became ready since
    /// it was last drained. Consumers re-poll on the next frame.
    #[must_use]
    pub fn ready_signal(&self) -> Receiver<()> {
        self.ready_rx.clone()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let entries = lock(&self.entries);
        let mut stats = CacheStats {
            entries: entries.map.len(),
            capacity: self.capacity,
            queued_jobs: self.scheduler.queued(),
            ..CacheStats::default()
        };
        for entry in entries.map.values() {
            match entry.slot.state() {
                EntryState::Pending => stats.pending += 1,
                EntryState::BytesReady => stats.bytes_ready += 1,
                EntryState::Decoded => stats.decoded += 1,
                EntryState::Failed => stats.failed += 1,
            }
        }
        stats
    }
}
