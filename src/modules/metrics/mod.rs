//! Fetch metrics.
//!
//! Global and per-domain counters with a rolling latency window for average
//! and p95. Any 2xx counts as success; 403/429 additionally count as
//! blocks.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const DEFAULT_WINDOW: usize = 128;
const MIN_WINDOW: usize = 16;

#[derive(Debug, Clone)]
pub struct GlobalStats {
    pub started_at: DateTime<Utc>,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub blocks: u64,
    pub skipped: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            total_requests: 0,
            successes: 0,
            failures: 0,
            blocks: 0,
            skipped: 0,
            average_latency: None,
            p95_latency: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DomainStats {
    pub domain: String,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub blocks: u64,
    /// Fetches refused locally because the circuit was open.
    pub skipped: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
    pub consecutive_failures: u32,
    pub last_status: Option<u16>,
}

impl DomainStats {
    fn from_accumulator(domain: &str, acc: &DomainAccumulator) -> Self {
        let (avg, p95) = latency_stats(acc.latencies.iter().copied());
        Self {
            domain: domain.to_string(),
            total_requests: acc.total_requests,
            successes: acc.successes,
            failures: acc.failures,
            blocks: acc.blocks,
            skipped: acc.skipped,
            average_latency: avg,
            p95_latency: p95,
            consecutive_failures: acc.consecutive_failures,
            last_status: acc.last_status,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub global: GlobalStats,
    pub domains: Vec<DomainStats>,
}

#[derive(Debug)]
struct DomainAccumulator {
    total_requests: u64,
    successes: u64,
    failures: u64,
    blocks: u64,
    skipped: u64,
    latencies: VecDeque<Duration>,
    max_window: usize,
    consecutive_failures: u32,
    last_status: Option<u16>,
}

impl DomainAccumulator {
    fn new(max_window: usize) -> Self {
        Self {
            total_requests: 0,
            successes: 0,
            failures: 0,
            blocks: 0,
            skipped: 0,
            latencies: VecDeque::with_capacity(max_window),
            max_window,
            consecutive_failures: 0,
            last_status: None,
        }
    }

    fn record(&mut self, status: u16, latency: Duration) {
        self.total_requests += 1;
        self.last_status = Some(status);

        if is_success(status) {
            self.successes += 1;
            self.consecutive_failures = 0;
        } else {
            self.failures += 1;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }
        if is_block(status) {
            self.blocks += 1;
        }

        if self.latencies.len() == self.max_window {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }

    fn record_error(&mut self) {
        self.total_requests += 1;
        self.failures += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_status = Some(0);
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

fn is_block(status: u16) -> bool {
    matches!(status, 403 | 429)
}

fn latency_stats(samples: impl Iterator<Item = Duration>) -> (Option<Duration>, Option<Duration>) {
    let mut samples: Vec<Duration> = samples.collect();
    if samples.is_empty() {
        return (None, None);
    }
    samples.sort_unstable();
    let avg = samples.iter().map(Duration::as_secs_f64).sum::<f64>() / samples.len() as f64;
    let p95_index = ((samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
    (Some(Duration::from_secs_f64(avg)), Some(samples[p95_index]))
}

#[derive(Debug)]
struct MetricsState {
    global: GlobalStats,
    max_window: usize,
    domains: HashMap<String, DomainAccumulator>,
}

impl MetricsState {
    fn new(max_window: usize) -> Self {
        Self {
            global: GlobalStats::default(),
            max_window,
            domains: HashMap::new(),
        }
    }

    fn accumulator_mut(&mut self, domain: &str) -> &mut DomainAccumulator {
        let window = self.max_window;
        self.domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainAccumulator::new(window))
    }
}

/// Thread-safe metrics collector shared by the orchestrator and handlers.
#[derive(Clone, Debug)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(window.max(MIN_WINDOW)))),
        }
    }

    pub fn record_response(&self, domain: &str, status: u16, latency: Duration) {
        let mut guard = self.lock();
        guard.global.total_requests += 1;
        if is_success(status) {
            guard.global.successes += 1;
        } else {
            guard.global.failures += 1;
        }
        if is_block(status) {
            guard.global.blocks += 1;
        }

        guard.global.average_latency = Some(match guard.global.average_latency {
            Some(avg) => Duration::from_secs_f64(avg.as_secs_f64() * 0.9 + latency.as_secs_f64() * 0.1),
            None => latency,
        });

        guard.accumulator_mut(domain).record(status, latency);

        let all = guard
            .domains
            .values()
            .flat_map(|acc| acc.latencies.iter().copied())
            .collect::<Vec<_>>();
        guard.global.p95_latency = latency_stats(all.into_iter()).1;
    }

    /// An attempt that produced no response.
    pub fn record_error(&self, domain: &str) {
        let mut guard = self.lock();
        guard.global.total_requests += 1;
        guard.global.failures += 1;
        guard.accumulator_mut(domain).record_error();
    }

    /// A fetch refused before any request was sent.
    pub fn record_skip(&self, domain: &str) {
        let mut guard = self.lock();
        guard.global.skipped += 1;
        guard.accumulator_mut(domain).skipped += 1;
    }

    pub fn domain(&self, domain: &str) -> Option<DomainStats> {
        let guard = self.lock();
        guard
            .domains
            .get(domain)
            .map(|acc| DomainStats::from_accumulator(domain, acc))
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let guard = self.lock();
        let mut domains: Vec<DomainStats> = guard
            .domains
            .iter()
            .map(|(domain, acc)| DomainStats::from_accumulator(domain, acc))
            .collect();
        domains.sort_by(|a, b| a.domain.cmp(&b.domain));
        MetricsSnapshot {
            global: guard.global.clone(),
            domains,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
