//! Failed-request retry cache with bounded batch replay.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crossbeam_queue::SegQueue;
use tracing::{debug, info};

use crate::domain::request::Request;

/// A request that failed dispatch, waiting in the cache.
#[derive(Debug)]
pub struct CachedRequest {
    /// The original request, replayed as-is.
    pub request: Request,
    /// When the request entered the cache.
    pub enqueued_at: Instant,
}

/// What one replay pass accomplished.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    /// Entries that dispatched successfully and left the cache.
    pub replayed: usize,
    /// Entries that failed again and went back to the tail.
    pub requeued: usize,
    /// True when the pass was skipped because another one was running.
    pub skipped: bool,
}

/// FIFO cache of requests that failed dispatch.
///
/// Entries leave only through successful replay; a replay failure re-enqueues
/// at the tail. The queue itself is unbounded; what is bounded is each replay
/// pass, so a deep queue can never stall a cycle. At most one pass runs at a
/// time; a concurrent caller gets a silent no-op rather than queueing up.
#[derive(Debug, Default)]
pub struct RetryCache {
    queue: SegQueue<CachedRequest>,
    replaying: AtomicBool,
}

impl RetryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a failed request to the tail.
    pub fn enqueue(&self, request: Request) {
        self.queue.push(CachedRequest {
            request,
            enqueued_at: Instant::now(),
        });
        info!(pending = self.queue.len(), "request cached for retry");
    }

    /// Whether anything is waiting for replay.
    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Number of entries waiting for replay.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Pop the head entry, if any.
    pub fn dequeue_one(&self) -> Option<CachedRequest> {
        self.queue.pop()
    }

    /// Replay up to `max_batch` entries through `dispatch`.
    ///
    /// Successes are discarded; failures go back to the tail and count
    /// against a pass-level retry ceiling that stops the pass early once
    /// reached. `flush_all` (shutdown only) widens the pass to every entry
    /// present at the start and ignores the ceiling; each entry is still
    /// attempted at most once per pass, so a flush terminates even when
    /// every backend is down.
    pub async fn replay_batch<F, Fut>(
        &self,
        dispatch: F,
        max_batch: usize,
        max_retries_per_pass: usize,
        flush_all: bool,
    ) -> ReplayStats
    where
        F: Fn(Request) -> Fut,
        Fut: Future<Output = bool>,
    {
        if self
            .replaying
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return ReplayStats {
                skipped: true,
                ..ReplayStats::default()
            };
        }

        let budget = if flush_all {
            self.queue.len()
        } else {
            max_batch.min(self.queue.len())
        };
        let mut stats = ReplayStats::default();
        let mut failures_this_pass = 0;

        for _ in 0..budget {
            let Some(entry) = self.queue.pop() else { break };
            let age_ms = entry.enqueued_at.elapsed().as_millis() as u64;

            if dispatch(entry.request.clone()).await {
                stats.replayed += 1;
                debug!(age_ms, remaining = self.queue.len(), "cached request replayed");
            } else {
                self.queue.push(entry);
                stats.requeued += 1;
                failures_this_pass += 1;
                if !flush_all && failures_this_pass >= max_retries_per_pass {
                    debug!(
                        failures = failures_this_pass,
                        "replay pass stopped at retry ceiling"
                    );
                    break;
                }
            }
        }

        self.replaying.store(false, Ordering::Release);
        stats
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::*;

    fn requests(paths: &[&str]) -> Vec<Request> {
        paths.iter().map(|path| Request::new(*path)).collect()
    }

    #[tokio::test]
    async fn replays_in_fifo_order() {
        let cache = RetryCache::new();
        for request in requests(&["/a", "/b", "/c"]) {
            cache.enqueue(request);
        }

        let order = Mutex::new(Vec::new());
        let stats = cache
            .replay_batch(
                |req| {
                    order.lock().unwrap().push(req.path);
                    async { true }
                },
                10,
                3,
                false,
            )
            .await;

        assert_eq!(stats.replayed, 3);
        assert_eq!(stats.requeued, 0);
        assert!(cache.is_empty());
        assert_eq!(*order.lock().unwrap(), vec!["/a", "/b", "/c"]);
    }

    #[tokio::test]
    async fn failed_entries_requeue_at_the_tail_in_order() {
        let cache = RetryCache::new();
        for request in requests(&["/a", "/b", "/c", "/d", "/e"]) {
            cache.enqueue(request);
        }

        // /b and /d fail during replay; the rest succeed.
        let failing: HashSet<&str> = ["/b", "/d"].into();
        let stats = cache
            .replay_batch(
                |req| {
                    let fail = failing.contains(req.path.as_str());
                    async move { !fail }
                },
                5,
                5,
                false,
            )
            .await;

        assert_eq!(stats.replayed, 3);
        assert_eq!(stats.requeued, 2);
        let survivors: Vec<_> = std::iter::from_fn(|| cache.dequeue_one())
            .map(|entry| entry.request.path)
            .collect();
        assert_eq!(survivors, vec!["/b", "/d"]);
    }

    #[tokio::test]
    async fn pass_stops_at_the_retry_ceiling() {
        let cache = RetryCache::new();
        for request in requests(&["/a", "/b", "/c", "/d", "/e"]) {
            cache.enqueue(request);
        }

        let attempts = Mutex::new(0usize);
        let stats = cache
            .replay_batch(
                |_| {
                    *attempts.lock().unwrap() += 1;
                    async { false }
                },
                5,
                2,
                false,
            )
            .await;

        assert_eq!(*attempts.lock().unwrap(), 2);
        assert_eq!(stats.requeued, 2);
        assert_eq!(cache.len(), 5);
    }

    #[tokio::test]
    async fn batch_size_bounds_an_ordinary_pass() {
        let cache = RetryCache::new();
        for request in requests(&["/a", "/b", "/c", "/d", "/e"]) {
            cache.enqueue(request);
        }

        let stats = cache.replay_batch(|_| async { true }, 2, 3, false).await;
        assert_eq!(stats.replayed, 2);
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test]
    async fn flush_attempts_every_entry_despite_failures() {
        let cache = RetryCache::new();
        for request in requests(&["/a", "/b", "/c", "/d", "/e"]) {
            cache.enqueue(request);
        }

        let attempts = Mutex::new(0usize);
        let stats = cache
            .replay_batch(
                |_| {
                    *attempts.lock().unwrap() += 1;
                    async { false }
                },
                1,
                1,
                true,
            )
            .await;

        // Every entry tried exactly once; persistent failures survive the
        // flush instead of looping forever.
        assert_eq!(*attempts.lock().unwrap(), 5);
        assert_eq!(stats.requeued, 5);
        assert_eq!(cache.len(), 5);
    }

    #[tokio::test]
    async fn concurrent_pass_is_a_silent_no_op() {
        let cache = RetryCache::new();
        cache.enqueue(Request::default());
        cache.replaying.store(true, Ordering::Release);

        let stats = cache.replay_batch(|_| async { true }, 10, 3, false).await;
        assert!(stats.skipped);
        assert_eq!(cache.len(), 1);

        cache.replaying.store(false, Ordering::Release);
        let stats = cache.replay_batch(|_| async { true }, 10, 3, false).await;
        assert_eq!(stats.replayed, 1);
    }
}
