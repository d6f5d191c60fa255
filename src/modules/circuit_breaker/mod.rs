//! Per-domain circuit breaker.
//!
//! Tracks consecutive failures for each domain and stops traffic to domains
//! that keep failing until a cool-down elapses. After the cool-down a single
//! probe is let through; its outcome decides whether the circuit closes again
//! or reopens with a fresh timer.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use super::state::{DomainStateMap, normalize_domain};

/// Circuit state for a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Traffic flows normally.
    Closed,
    /// Domain is considered blocked; callers must skip it.
    Open,
    /// Cool-down elapsed; one probe request is in flight.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(300),
        }
    }
}

/// Snapshot of one domain's circuit.
#[derive(Debug, Clone)]
pub struct DomainCircuit {
    pub domain: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<Instant>,
    pub success_count: u64,
    /// When the outstanding half-open probe was handed out.
    pub probe_started_at: Option<Instant>,
}

impl DomainCircuit {
    fn closed(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            success_count: 0,
            probe_started_at: None,
        }
    }
}

/// Thread-safe circuit breaker keyed by normalized domain.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: DomainStateMap<DomainCircuit>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: CircuitBreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                timeout: config.timeout,
            },
            circuits: DomainStateMap::new(),
        }
    }

    pub fn with_threshold(failure_threshold: u32, timeout: Duration) -> Self {
        Self::new(CircuitBreakerConfig {
            failure_threshold,
            timeout,
        })
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    pub fn record_success(&self, domain: &str) {
        let domain = normalize_domain(domain);
        self.circuits.update_or_insert_with(
            &domain,
            || DomainCircuit::closed(&domain),
            |circuit| {
                circuit.probe_started_at = None;
                circuit.consecutive_failures = 0;
                circuit.success_count = circuit.success_count.saturating_add(1);
                if circuit.state != CircuitState::Closed {
                    log::info!("circuit closed for {domain} after successful probe");
                }
                circuit.state = CircuitState::Closed;
            },
        );
    }

    pub fn record_failure(&self, domain: &str) {
        let domain = normalize_domain(domain);
        let threshold = self.config.failure_threshold;
        self.circuits.update_or_insert_with(
            &domain,
            || DomainCircuit::closed(&domain),
            |circuit| {
                circuit.probe_started_at = None;
                circuit.consecutive_failures = circuit.consecutive_failures.saturating_add(1);
                circuit.last_failure_at = Some(Instant::now());

                match circuit.state {
                    CircuitState::HalfOpen => {
                        circuit.state = CircuitState::Open;
                        log::warn!("circuit reopened for {domain}: probe failed");
                    }
                    CircuitState::Closed if circuit.consecutive_failures >= threshold => {
                        circuit.state = CircuitState::Open;
                        log::warn!(
                            "circuit opened for {domain} after {} consecutive failures",
                            circuit.consecutive_failures
                        );
                    }
                    _ => {}
                }
            },
        );
    }

    /// Returns whether requests to `domain` must be skipped right now.
    ///
    /// The first query after the cool-down moves an open circuit to half-open
    /// and returns `false`, handing out the single probe. Later queries return
    /// `true` until the probe is resolved by [`record_success`],
    /// [`record_failure`] or [`release_probe`]. A probe that stays unresolved
    /// for a whole cool-down is considered lost and a new one is handed out.
    ///
    /// [`record_success`]: Self::record_success
    /// [`record_failure`]: Self::record_failure
    /// [`release_probe`]: Self::release_probe
    pub fn is_open(&self, domain: &str) -> bool {
        let domain = normalize_domain(domain);
        let timeout = self.config.timeout;
        self.circuits
            .update_existing(&domain, |circuit| match circuit.state {
                CircuitState::Closed => false,
                CircuitState::HalfOpen => match circuit.probe_started_at {
                    Some(started) if started.elapsed() < timeout => true,
                    _ => {
                        circuit.probe_started_at = Some(Instant::now());
                        log::info!("circuit half-open for {domain}, probe handed out again");
                        false
                    }
                },
                CircuitState::Open => {
                    let cooled_down = circuit
                        .last_failure_at
                        .map(|at| at.elapsed() >= timeout)
                        .unwrap_or(true);
                    if cooled_down {
                        circuit.state = CircuitState::HalfOpen;
                        circuit.probe_started_at = Some(Instant::now());
                        log::info!("circuit half-open for {domain}, allowing one probe");
                    }
                    !cooled_down
                }
            })
            .unwrap_or(false)
    }

    /// Gives back a half-open probe whose outcome said nothing about the
    /// domain's health, so the next caller may probe instead.
    pub fn release_probe(&self, domain: &str) {
        let domain = normalize_domain(domain);
        self.circuits.update_existing(&domain, |circuit| {
            if circuit.state == CircuitState::HalfOpen {
                circuit.probe_started_at = None;
            }
        });
    }

    pub fn state(&self, domain: &str) -> CircuitState {
        self.circuits
            .read(&normalize_domain(domain), |circuit| circuit.state)
            .unwrap_or(CircuitState::Closed)
    }

    pub fn snapshot(&self, domain: &str) -> Option<DomainCircuit> {
        self.circuits.get(&normalize_domain(domain))
    }

    pub fn reset(&self, domain: &str) {
        let domain = normalize_domain(domain);
        if self
            .circuits
            .update_existing(&domain, |circuit| *circuit = DomainCircuit::closed(&domain))
            .is_some()
        {
            log::info!("circuit reset for {domain}");
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, timeout_secs: u64) -> CircuitBreaker {
        CircuitBreaker::with_threshold(threshold, Duration::from_secs(timeout_secs))
    }

    #[test]
    fn unknown_domain_is_closed() {
        let cb = CircuitBreaker::default();
        assert!(!cb.is_open("nowhere.test"));
        assert_eq!(cb.state("nowhere.test"), CircuitState::Closed);
        assert!(cb.snapshot("nowhere.test").is_none());
    }

    #[test]
    fn opens_at_threshold() {
        let cb = breaker(5, 300);
        for _ in 0..4 {
            cb.record_failure("a.com");
            assert!(!cb.is_open("a.com"));
        }
        cb.record_failure("a.com");
        assert!(cb.is_open("a.com"));
        assert_eq!(cb.state("a.com"), CircuitState::Open);
        assert!(!cb.is_open("b.com"));
    }

    #[test]
    fn success_resets_failure_streak() {
        let cb = breaker(3, 300);
        cb.record_failure("a.com");
        cb.record_failure("a.com");
        cb.record_success("a.com");
        cb.record_failure("a.com");
        assert!(!cb.is_open("a.com"));
        let snapshot = cb.snapshot("a.com").unwrap();
        assert_eq!(snapshot.consecutive_failures, 1);
        assert_eq!(snapshot.success_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn single_probe_after_timeout_then_reopens_on_failure() {
        let cb = breaker(5, 300);
        for _ in 0..5 {
            cb.record_failure("a.com");
        }
        assert!(cb.is_open("a.com"));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(!cb.is_open("a.com"));
        assert_eq!(cb.state("a.com"), CircuitState::HalfOpen);

        cb.record_failure("a.com");
        assert_eq!(cb.state("a.com"), CircuitState::Open);
        assert!(cb.is_open("a.com"));

        tokio::time::advance(Duration::from_secs(150)).await;
        assert!(cb.is_open("a.com"), "timer restarts from the failed probe");
    }

    #[tokio::test(start_paused = true)]
    async fn successful_probe_closes() {
        let cb = breaker(2, 10);
        cb.record_failure("a.com");
        cb.record_failure("a.com");
        assert!(cb.is_open("a.com"));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!cb.is_open("a.com"));
        cb.record_success("a.com");
        assert_eq!(cb.state("a.com"), CircuitState::Closed);
        assert!(!cb.is_open("a.com"));
        assert_eq!(cb.snapshot("a.com").unwrap().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_one_caller_at_a_time() {
        let cb = breaker(1, 60);
        cb.record_failure("a.com");
        tokio::time::advance(Duration::from_secs(60)).await;

        assert!(!cb.is_open("a.com"));
        assert!(cb.is_open("a.com"), "second caller must wait for the probe");
        assert!(cb.is_open("www.a.com"));
        assert_eq!(cb.state("a.com"), CircuitState::HalfOpen);

        cb.record_success("a.com");
        assert!(!cb.is_open("a.com"));
        assert!(!cb.is_open("a.com"));
    }

    #[tokio::test(start_paused = true)]
    async fn released_or_stale_half_open_slot_is_handed_out_again() {
        let cb = breaker(1, 60);
        cb.record_failure("a.com");
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!cb.is_open("a.com"));

        cb.release_probe("a.com");
        assert!(!cb.is_open("a.com"));
        assert!(cb.is_open("a.com"));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!cb.is_open("a.com"), "an unresolved probe expires after a cool-down");
        assert!(cb.is_open("a.com"));
    }

    #[test]
    fn host_variants_share_one_circuit() {
        let cb = breaker(2, 300);
        cb.record_failure("www.A.com");
        cb.record_failure("a.com:443");
        assert!(cb.is_open("a.com"));
        assert_eq!(cb.snapshot("WWW.a.com").unwrap().consecutive_failures, 2);
        cb.reset("www.a.com");
        assert_eq!(cb.state("a.com"), CircuitState::Closed);
    }

    #[test]
    fn reset_restores_closed_circuit() {
        let cb = breaker(1, 300);
        cb.record_failure("a.com");
        assert!(cb.is_open("a.com"));
        cb.reset("a.com");
        assert!(!cb.is_open("a.com"));
        assert_eq!(cb.snapshot("a.com").unwrap().consecutive_failures, 0);
    }
}
