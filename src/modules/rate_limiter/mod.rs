//! Adaptive per-domain pacing.
//!
//! Each domain carries its own `(min_delay, max_delay)` window. Blocks (403 /
//! 429) widen the window once a streak builds up, sustained clean successes
//! narrow it back toward the base envelope, and the inter-request delay is
//! drawn from a normal distribution centred inside the window so pauses
//! cluster around human-looking values instead of spreading uniformly.

use rand::Rng;
use std::time::Duration;

use super::state::{DomainStateMap, normalize_domain};

/// Tunable constants for the adaptive envelope.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub base_min_delay: f64,
    pub base_max_delay: f64,
    /// Hard ceiling applied to `min_delay` while escalating.
    pub ceiling_min_delay: f64,
    /// Hard ceiling applied to `max_delay` while escalating.
    pub ceiling_max_delay: f64,
    /// Shrink the window every N clean successes.
    pub recovery_every: u64,
    pub recovery_factor: f64,
    /// Start widening once `consecutive_errors` exceeds this value.
    pub escalate_after: u32,
    pub escalation_step: f64,
    pub severe_after: u32,
    pub severe_penalty: f64,
    pub moderate_after: u32,
    pub moderate_penalty: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_min_delay: 1.5,
            base_max_delay: 4.0,
            ceiling_min_delay: 10.0,
            ceiling_max_delay: 20.0,
            recovery_every: 10,
            recovery_factor: 0.9,
            escalate_after: 2,
            escalation_step: 0.3,
            severe_after: 5,
            severe_penalty: 2.5,
            moderate_after: 3,
            moderate_penalty: 1.5,
        }
    }
}

impl RateLimitConfig {
    pub fn with_base(mut self, min_delay: f64, max_delay: f64) -> Self {
        self.base_min_delay = min_delay;
        self.base_max_delay = max_delay;
        self
    }
}

/// Per-domain statistics and current delay window.
#[derive(Debug, Clone)]
pub struct DomainRateStats {
    pub domain: String,
    pub success_count: u64,
    pub error_count: u32,
    pub consecutive_errors: u32,
    pub avg_response_time: Duration,
    pub current_min_delay: Duration,
    pub current_max_delay: Duration,
}

#[derive(Debug, Clone)]
struct DomainRateState {
    success_count: u64,
    error_count: u32,
    consecutive_errors: u32,
    avg_response_secs: f64,
    min_delay: f64,
    max_delay: f64,
}

impl DomainRateState {
    fn new(config: &RateLimitConfig, first_response_secs: f64) -> Self {
        Self {
            success_count: 0,
            error_count: 0,
            consecutive_errors: 0,
            avg_response_secs: if first_response_secs > 0.0 {
                first_response_secs
            } else {
                1.0
            },
            min_delay: config.base_min_delay,
            max_delay: config.base_max_delay,
        }
    }

    fn snapshot(&self, domain: &str) -> DomainRateStats {
        DomainRateStats {
            domain: domain.to_string(),
            success_count: self.success_count,
            error_count: self.error_count,
            consecutive_errors: self.consecutive_errors,
            avg_response_time: Duration::from_secs_f64(self.avg_response_secs.max(0.0)),
            current_min_delay: Duration::from_secs_f64(self.min_delay),
            current_max_delay: Duration::from_secs_f64(self.max_delay),
        }
    }
}

/// Response-driven rate limiter keyed by normalized domain.
#[derive(Debug, Clone)]
pub struct AdaptiveRateLimiter {
    config: RateLimitConfig,
    domains: DomainStateMap<DomainRateState>,
}

impl AdaptiveRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let base_min = config.base_min_delay.max(0.0);
        let base_max = config.base_max_delay.max(base_min);
        Self {
            config: RateLimitConfig {
                base_min_delay: base_min,
                base_max_delay: base_max,
                ceiling_min_delay: config.ceiling_min_delay.max(base_min),
                ceiling_max_delay: config.ceiling_max_delay.max(base_max),
                recovery_every: config.recovery_every.max(1),
                ..config
            },
            domains: DomainStateMap::new(),
        }
    }

    pub fn with_base_delays(min_delay: f64, max_delay: f64) -> Self {
        Self::new(RateLimitConfig::default().with_base(min_delay, max_delay))
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Feeds one observed response into the domain's envelope. `status` 0
    /// stands for "no HTTP response" (timeout, connection error).
    pub fn record_response(&self, domain: &str, status: u16, response_time: Duration) {
        let domain = normalize_domain(domain);
        let config = self.config;
        let response_secs = response_time.as_secs_f64();

        self.domains.update_or_insert_with(
            &domain,
            || DomainRateState::new(&config, response_secs),
            |state| {
                match status {
                    200 => {
                        state.success_count = state.success_count.saturating_add(1);
                        state.consecutive_errors = 0;
                        state.error_count = state.error_count.saturating_sub(1);

                        if state.success_count % config.recovery_every == 0 && state.error_count == 0 {
                            let previous = (state.min_delay, state.max_delay);
                            if state.min_delay > config.base_min_delay {
                                state.min_delay =
                                    (state.min_delay * config.recovery_factor).max(config.base_min_delay);
                            }
                            if state.max_delay > config.base_max_delay {
                                state.max_delay =
                                    (state.max_delay * config.recovery_factor).max(config.base_max_delay);
                            }
                            if previous != (state.min_delay, state.max_delay) {
                                log::debug!(
                                    "delays narrowed for {domain} to {:.2}s..{:.2}s",
                                    state.min_delay,
                                    state.max_delay
                                );
                            }
                        }
                    }
                    403 | 429 => {
                        state.error_count = state.error_count.saturating_add(1);
                        state.consecutive_errors = state.consecutive_errors.saturating_add(1);

                        if state.consecutive_errors > config.escalate_after {
                            let multiplier =
                                1.0 + f64::from(state.consecutive_errors) * config.escalation_step;
                            state.min_delay =
                                (state.min_delay * multiplier).min(config.ceiling_min_delay);
                            state.max_delay =
                                (state.max_delay * multiplier).min(config.ceiling_max_delay);
                            log::warn!(
                                "delays widened for {domain} after {} consecutive blocks ({:.2}s..{:.2}s)",
                                state.consecutive_errors,
                                state.min_delay,
                                state.max_delay
                            );
                        }
                    }
                    _ => {}
                }

                if response_secs > 0.0 {
                    state.avg_response_secs = (state.avg_response_secs + response_secs) / 2.0;
                }
            },
        );
    }

    /// Delay to apply before the next request to `domain`.
    pub fn delay(&self, domain: &str) -> Duration {
        let config = self.config;
        let (min_delay, max_delay, penalty) = self
            .domains
            .read(&normalize_domain(domain), |state| {
                let penalty = if state.consecutive_errors > config.severe_after {
                    config.severe_penalty
                } else if state.error_count > config.moderate_after {
                    config.moderate_penalty
                } else {
                    1.0
                };
                (state.min_delay, state.max_delay, penalty)
            })
            .unwrap_or((config.base_min_delay, config.base_max_delay, 1.0));

        let mut rng = rand::thread_rng();
        let sampled = sample_centered(&mut rng, min_delay, max_delay);
        Duration::from_secs_f64((sampled * penalty).clamp(min_delay, max_delay))
    }

    pub fn stats(&self, domain: &str) -> Option<DomainRateStats> {
        let domain = normalize_domain(domain);
        self.domains.read(&domain, |state| state.snapshot(&domain))
    }

    pub fn reset_domain(&self, domain: &str) {
        let domain = normalize_domain(domain);
        if self.domains.remove(&domain).is_some() {
            log::debug!("rate statistics reset for {domain}");
        }
    }
}

impl Default for AdaptiveRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

/// Normal draw centred on the window midpoint with std-dev `range / 4`,
/// clamped to the window.
fn sample_centered<R: Rng>(rng: &mut R, min_delay: f64, max_delay: f64) -> f64 {
    if max_delay <= min_delay {
        return min_delay;
    }
    let mean = (min_delay + max_delay) / 2.0;
    let std_dev = (max_delay - min_delay) / 4.0;
    (mean + std_dev * standard_normal(rng)).clamp(min_delay, max_delay)
}

// Box-Muller transform.
fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.r#gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> AdaptiveRateLimiter {
        AdaptiveRateLimiter::with_base_delays(1.5, 4.0)
    }

    #[test]
    fn fresh_domain_uses_base_window() {
        let limiter = limiter();
        for _ in 0..200 {
            let delay = limiter.delay("example.com").as_secs_f64();
            assert!((1.5..=4.0).contains(&delay), "delay {delay} outside base window");
        }
        assert!(limiter.stats("example.com").is_none());
    }

    #[test]
    fn repeated_blocks_saturate_at_ceiling() {
        let limiter = limiter();
        for _ in 0..10 {
            limiter.record_response("a.com", 403, Duration::from_millis(300));
        }
        let stats = limiter.stats("a.com").unwrap();
        assert_eq!(stats.consecutive_errors, 10);
        assert_eq!(stats.current_max_delay, Duration::from_secs(20));
        assert_eq!(stats.current_min_delay, Duration::from_secs(10));

        let mut highest: f64 = 0.0;
        for _ in 0..500 {
            let delay = limiter.delay("a.com").as_secs_f64();
            assert!(delay <= 20.0, "delay {delay} exceeded ceiling");
            assert!(delay >= 10.0);
            highest = highest.max(delay);
        }
        assert!(highest > 15.0);
    }

    #[test]
    fn first_two_blocks_do_not_widen() {
        let limiter = limiter();
        limiter.record_response("a.com", 429, Duration::ZERO);
        limiter.record_response("a.com", 429, Duration::ZERO);
        let stats = limiter.stats("a.com").unwrap();
        assert_eq!(stats.current_min_delay, Duration::from_secs_f64(1.5));
        assert_eq!(stats.current_max_delay, Duration::from_secs_f64(4.0));

        limiter.record_response("a.com", 429, Duration::ZERO);
        let stats = limiter.stats("a.com").unwrap();
        assert!(stats.current_max_delay > Duration::from_secs_f64(4.0));
    }

    #[test]
    fn clean_success_streak_narrows_back_toward_base() {
        let limiter = limiter();
        for _ in 0..4 {
            limiter.record_response("a.com", 403, Duration::ZERO);
        }
        let widened = limiter.stats("a.com").unwrap().current_max_delay;

        // Error count decays first, then every tenth clean success shrinks.
        for _ in 0..40 {
            limiter.record_response("a.com", 200, Duration::from_millis(200));
        }
        let stats = limiter.stats("a.com").unwrap();
        assert_eq!(stats.error_count, 0);
        assert_eq!(stats.consecutive_errors, 0);
        assert!(stats.current_max_delay < widened);
        assert!(stats.current_min_delay >= Duration::from_secs_f64(1.5));
        assert!(stats.current_max_delay >= Duration::from_secs_f64(4.0));
    }

    #[test]
    fn host_variants_share_one_window() {
        let limiter = limiter();
        for host in ["www.a.com", "A.com", "a.com:8080"] {
            limiter.record_response(host, 403, Duration::ZERO);
        }
        let stats = limiter.stats("www.a.com").unwrap();
        assert_eq!(stats.domain, "a.com");
        assert_eq!(stats.consecutive_errors, 3);

        limiter.reset_domain("WWW.A.COM");
        assert!(limiter.stats("a.com").is_none());
    }

    #[test]
    fn unknown_status_only_updates_latency() {
        let limiter = limiter();
        limiter.record_response("a.com", 0, Duration::from_secs(3));
        limiter.record_response("a.com", 500, Duration::from_secs(1));
        let stats = limiter.stats("a.com").unwrap();
        assert_eq!(stats.error_count, 0);
        assert_eq!(stats.success_count, 0);
        assert_eq!(stats.avg_response_time, Duration::from_secs(2));
    }

    #[test]
    fn penalised_delay_stays_inside_window() {
        let limiter = limiter();
        // Four blocks push error_count over the moderate threshold.
        for _ in 0..4 {
            limiter.record_response("a.com", 429, Duration::ZERO);
        }
        let stats = limiter.stats("a.com").unwrap();
        for _ in 0..200 {
            let delay = limiter.delay("a.com");
            assert!(delay >= stats.current_min_delay && delay <= stats.current_max_delay);
        }
    }

    #[test]
    fn sampling_clusters_around_midpoint() {
        let mut rng = rand::thread_rng();
        let samples: Vec<f64> = (0..2000).map(|_| sample_centered(&mut rng, 1.0, 5.0)).collect();
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        assert!((mean - 3.0).abs() < 0.2, "mean {mean} drifted from midpoint");
    }
}
