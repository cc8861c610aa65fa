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

//! Fixed-size worker pool for blocking tile fetches.
//!
//! Jobs are plain [`FetchJob`] values pushed onto a single FIFO queue. Each
//! worker pops a job, runs the fetcher (with the configured retry policy) and
//! hands the [`FetchOutcome`] to a completion callback. There is no priority
//! and no per-job cancellation: a job that is no longer wanted still runs, and
//! whoever receives the outcome decides whether it still matters.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info};

use crate::error::FetchError;
use crate::fetch::{RetryPolicy, TileFetcher};
use crate::key::TileKey;

/// Configuration for the fetch worker pool.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads. Zero is treated as one.
    pub workers: usize,
    /// Retry policy applied to each job.
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            retry: RetryPolicy::default(),
        }
    }
}

/// Fetch the tile for `key`.
///
/// `ticket` identifies the request that scheduled the job so a late result can
/// be matched against the entry it was meant for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchJob {
    pub key: TileKey,
    pub ticket: u64,
}

/// Result of running a [`FetchJob`].
#[derive(Debug)]
pub struct FetchOutcome {
    pub job: FetchJob,
    pub result: Result<Vec<u8>, FetchError>,
}

/// Handle to the worker pool. Dropping it shuts the pool down.
pub struct FetchScheduler {
    job_tx: Option<Sender<FetchJob>>,
    workers: Vec<JoinHandle<()>>,
    queued: Arc<AtomicUsize>,
    stopping: Arc<AtomicBool>,
}

impl std::fmt::Debug for FetchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchScheduler")
            .field("workers", &self.workers.len())
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}

impl FetchScheduler {
    /// Start the workers. `on_complete` runs on the worker thread that
    /// finished the job.
    pub fn spawn<C>(config: &SchedulerConfig, fetcher: Arc<dyn TileFetcher>, on_complete: C) -> Self
    where
        C: Fn(FetchOutcome) + Send + Sync + 'static,
    {
        let (job_tx, job_rx) = unbounded::<FetchJob>();
        let queued = Arc::new(AtomicUsize::new(0));
        let stopping = Arc::new(AtomicBool::new(false));
        let on_complete = Arc::new(on_complete);

        let count = config.workers.max(1);
        let mut workers = Vec::with_capacity(count);
        for id in 0..count {
            let worker = Worker {
                jobs: job_rx.clone(),
                fetcher: Arc::clone(&fetcher),
                retry: config.retry,
                queued: Arc::clone(&queued),
                stopping: Arc::clone(&stopping),
            };
            let on_complete = Arc::clone(&on_complete);

            match thread::Builder::new()
                .name(format!("tile-fetch-{id}"))
                .spawn(move || worker.run(&*on_complete))
            {
                Ok(handle) => workers.push(handle),
                Err(e) => error!("Failed to spawn fetch worker {id}: {e}"),
            }
        }
        info!("Started {} tile fetch workers", workers.len());

        Self {
            job_tx: Some(job_tx),
            workers,
            queued,
            stopping,
        }
    }

    /// Queue a job. Returns `false` if the pool has been shut down.
    pub fn submit(&self, job: FetchJob) -> bool {
        let Some(tx) = &self.job_tx else {
            return false;
        };
        self.queued.fetch_add(1, Ordering::SeqCst);
        if tx.send(job).is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Jobs waiting for a worker.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop accepting jobs, skip everything still queued, and wait for
    /// running fetches to finish.
    pub fn shutdown(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        // Disconnects the queue once the workers have drained it
        if self.job_tx.take().is_none() {
            return;
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Fetch worker panicked");
            }
        }
        info!("Tile fetch workers stopped");
    }
}

impl Drop for FetchScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    jobs: Receiver<FetchJob>,
    fetcher: Arc<dyn TileFetcher>,
    retry: RetryPolicy,
    queued: Arc<AtomicUsize>,
    stopping: Arc<AtomicBool>,
}

impl Worker {
    fn run(self, on_complete: &dyn Fn(FetchOutcome)) {
        while let Ok(job) = self.jobs.recv() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            if self.stopping.load(Ordering::SeqCst) {
                debug!("Skipping {} during shutdown", job.key);
                continue;
            }

            let result = self.retry.run(|| self.fetcher.fetch_tile(&job.key));
            on_complete(FetchOutcome { job, result });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::sync::Mutex;
    use std::time::Duration;

    fn fetcher<F>(f: F) -> Arc<dyn TileFetcher>
    where
        F: Fn(&TileKey) -> Result<Vec<u8>, FetchError> + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    fn job(x: u32, ticket: u64) -> FetchJob {
        FetchJob {
            key: TileKey::base_map(3, x, 0),
            ticket,
        }
    }

    #[test]
    fn test_runs_every_job() {
        let fetcher = fetcher(|key| Ok(key.path().into_bytes()));
        let (done_tx, done_rx) = unbounded();
        let scheduler = FetchScheduler::spawn(&SchedulerConfig::default(), fetcher, move |o| {
            let _ = done_tx.send(o);
        });
        assert_eq!(scheduler.worker_count(), 4);

        for i in 0..20 {
            assert!(scheduler.submit(job(i, u64::from(i))));
        }

        let mut tickets: Vec<u64> = (0..20)
            .map(|_| {
                let outcome = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
                assert_eq!(outcome.result.unwrap(), outcome.job.key.path().into_bytes());
                outcome.job.ticket
            })
            .collect();
        tickets.sort_unstable();
        assert_eq!(tickets, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_single_worker_is_fifo() {
        let fetcher = fetcher(|_| Ok(vec![1]));
        let order = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = unbounded();
        let sink = Arc::clone(&order);
        let config = SchedulerConfig {
            workers: 1,
            retry: RetryPolicy::none(),
        };
        let scheduler = FetchScheduler::spawn(&config, fetcher, move |o| {
            sink.lock().unwrap().push(o.job.ticket);
            let _ = done_tx.send(());
        });

        for i in 0..10 {
            scheduler.submit(job(i, u64::from(i)));
        }
        for _ in 0..10 {
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<u64>>());
    }

    #[test]
    fn test_failures_are_reported_after_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let fetcher = fetcher(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::Status(404))
        });
        let (done_tx, done_rx) = unbounded();
        let config = SchedulerConfig {
            workers: 1,
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
            },
        };
        let _scheduler = {
            let scheduler = FetchScheduler::spawn(&config, fetcher, move |o| {
                let _ = done_tx.send(o);
            });
            scheduler.submit(job(0, 0));
            scheduler
        };

        let outcome = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(outcome.result, Err(FetchError::Status(404))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_shutdown_skips_queued_jobs() {
        let (started_tx, started_rx) = bounded(1);
        let (gate_tx, gate_rx) = bounded::<()>(1);
        let fetcher = fetcher(move |_| {
            let _ = started_tx.try_send(());
            let _ = gate_rx.recv();
            Ok(vec![0])
        });
        let (done_tx, done_rx) = unbounded();
        let config = SchedulerConfig {
            workers: 1,
            retry: RetryPolicy::none(),
        };
        let mut scheduler = FetchScheduler::spawn(&config, fetcher, move |o| {
            let _ = done_tx.send(o.job.ticket);
        });

        for i in 0..3 {
            scheduler.submit(job(i, u64::from(i)));
        }
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let release = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let _ = gate_tx.send(());
        });
        scheduler.shutdown();
        release.join().unwrap();

        assert_eq!(done_rx.try_iter().collect::<Vec<_>>(), vec![0]);
        assert_eq!(scheduler.queued(), 0);
        assert!(!scheduler.submit(job(9, 9)));
    }
}
