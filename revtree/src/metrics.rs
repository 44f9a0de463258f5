use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Metrics collector, if active, it provides Counters and Timers
#[derive(Clone)]
pub struct Metrics {
    metrics: Option<Arc<ActiveMetrics>>,
}

/// Metrics that can be collected during execution
#[derive(PartialEq, Eq, Hash, Debug)]
pub enum Metric {
    /// Counter of node page requests
    PageRequests,
    /// Counter of node page requests which had to reconstruct the page
    PageCacheMisses,
    /// Counter of node page versions read for reconstruction
    SnapshotPagesScanned,
    /// Counter of committed revisions
    Commits,
    /// Timer used to record average page reconstruction time
    PageFetchTime,
    /// Timer used to record average commit time
    CommitTime,
}

struct ActiveMetrics {
    page_requests: AtomicU64,
    page_cache_misses: AtomicU64,
    snapshot_pages_scanned: AtomicU64,
    commits: AtomicU64,
    page_fetch_time: Timer,
    commit_time: Timer,
}

/// A point-in-time copy of the collected metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub page_requests: u64,
    pub page_cache_misses: u64,
    pub snapshot_pages_scanned: u64,
    pub commits: u64,
    /// Mean page reconstruction time in nanoseconds.
    pub page_fetch_mean: Option<u64>,
    /// Mean commit time in nanoseconds.
    pub commit_mean: Option<u64>,
}

impl Metrics {
    /// Returns the Metrics object, active or not based on the specified input
    pub fn new(active: bool) -> Self {
        Self {
            metrics: if active {
                Some(Arc::new(ActiveMetrics {
                    page_requests: AtomicU64::new(0),
                    page_cache_misses: AtomicU64::new(0),
                    snapshot_pages_scanned: AtomicU64::new(0),
                    commits: AtomicU64::new(0),
                    page_fetch_time: Timer::new(),
                    commit_time: Timer::new(),
                }))
            } else {
                None
            },
        }
    }

    /// Increase the Counter specified by the input
    ///
    /// panics if the specified [`Metric`] is not a Counter
    pub fn count(&self, metric: Metric) {
        self.count_n(metric, 1);
    }

    /// Increase the Counter specified by the input by `n`
    ///
    /// panics if the specified [`Metric`] is not a Counter
    pub fn count_n(&self, metric: Metric, n: u64) {
        if let Some(ref metrics) = self.metrics {
            let counter = match metric {
                Metric::PageRequests => &metrics.page_requests,
                Metric::PageCacheMisses => &metrics.page_cache_misses,
                Metric::SnapshotPagesScanned => &metrics.snapshot_pages_scanned,
                Metric::Commits => &metrics.commits,
                _ => panic!("Specified metric is not a Counter"),
            };

            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Returns a guard that, when dropped, will record the time passed since creation
    ///
    /// panics if the specified [`Metric`] is not a Timer
    pub fn record<'a>(&'a self, metric: Metric) -> Option<impl Drop + 'a> {
        self.metrics.as_ref().map(|metrics| {
            let timer = match metric {
                Metric::PageFetchTime => &metrics.page_fetch_time,
                Metric::CommitTime => &metrics.commit_time,
                _ => panic!("Specified metric is not a Timer"),
            };

            timer.record()
        })
    }

    /// The collected values, or `None` if collection is not active.
    pub fn snapshot(&self) -> Option<MetricsSnapshot> {
        self.metrics.as_ref().map(|metrics| MetricsSnapshot {
            page_requests: metrics.page_requests.load(Ordering::Relaxed),
            page_cache_misses: metrics.page_cache_misses.load(Ordering::Relaxed),
            snapshot_pages_scanned: metrics.snapshot_pages_scanned.load(Ordering::Relaxed),
            commits: metrics.commits.load(Ordering::Relaxed),
            page_fetch_mean: metrics.page_fetch_time.mean(),
            commit_mean: metrics.commit_time.mean(),
        })
    }

    /// Emit the collected metrics as a tracing event
    pub fn log(&self) {
        let Some(snapshot) = self.snapshot() else {
            tracing::info!("metrics collection was not activated");
            return;
        };

        let miss_percentage = if snapshot.page_requests != 0 {
            (snapshot.page_cache_misses as f64 / snapshot.page_requests as f64) * 100.0
        } else {
            0.0
        };

        tracing::info!(
            page_requests = snapshot.page_requests,
            page_cache_misses = snapshot.page_cache_misses,
            miss_percentage = %format!("{miss_percentage:.2}%"),
            snapshot_pages_scanned = snapshot.snapshot_pages_scanned,
            commits = snapshot.commits,
            page_fetch_mean = ?snapshot.page_fetch_mean.map(pretty_display_ns),
            commit_mean = ?snapshot.commit_mean.map(pretty_display_ns),
            "metrics"
        );
    }
}

fn pretty_display_ns(ns: u64) -> String {
    // preserve 3 sig figs at minimum.
    let (val, unit) = if ns > 100 * 1_000_000_000 {
        (ns / 1_000_000_000, "s")
    } else if ns > 100 * 1_000_000 {
        (ns / 1_000_000, "ms")
    } else if ns > 100 * 1_000 {
        (ns / 1_000, "us")
    } else {
        (ns, "ns")
    };

    format!("{val} {unit}")
}

struct Timer {
    number_of_records: AtomicU64,
    sum: AtomicU64,
}

impl Timer {
    fn new() -> Self {
        Timer {
            number_of_records: AtomicU64::new(0),
            sum: AtomicU64::new(0),
        }
    }

    fn mean(&self) -> Option<u64> {
        let n = self.number_of_records.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);
        sum.checked_div(n)
    }

    fn record<'a>(&'a self) -> impl Drop + 'a {
        struct TimerGuard<'a> {
            start: std::time::Instant,
            n: &'a AtomicU64,
            sum: &'a AtomicU64,
        }

        impl Drop for TimerGuard<'_> {
            fn drop(&mut self) {
                let elapsed = self.start.elapsed().as_nanos() as u64;
                self.n.fetch_add(1, Ordering::Relaxed);
                self.sum.fetch_add(elapsed, Ordering::Relaxed);
            }
        }

        TimerGuard {
            start: std::time::Instant::now(),
            n: &self.number_of_records,
            sum: &self.sum,
        }
    }
}
