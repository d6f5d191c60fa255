//! High level fetch orchestration.
//!
//! Wires the circuit breaker, adaptive rate limiter, fingerprint manager,
//! session store, referer manager and warm-up into a single `fetch` call that
//! retries transient failures, rotates identity on blocks and keeps every
//! per-domain record consistent even when the caller drops the future.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use http::header::{COOKIE, HeaderMap, HeaderValue, REFERER};
use rand::Rng;
use thiserror::Error;
use tokio::time::{Instant, sleep, timeout};
use url::Url;

use crate::config::{ConfigError, FetchConfig};
use crate::modules::circuit_breaker::CircuitBreaker;
use crate::modules::events::{
	BlockedEvent, ErrorEvent, EventDispatcher, EventHandler, FetchEvent, LoggingHandler,
	MetricsHandler, PostResponseEvent, PreRequestEvent, RetryEvent, WarmupEvent,
};
use crate::modules::fingerprint::{Fingerprint, FingerprintManager};
use crate::modules::identity::IdentityPool;
use crate::modules::metrics::MetricsCollector;
use crate::modules::rate_limiter::{AdaptiveRateLimiter, RateLimitConfig};
use crate::modules::referer::RefererManager;
use crate::modules::session::{CookieMap, SessionStore};
use crate::modules::state::{DomainStateMap, domain_of, normalize_domain};
use crate::modules::warmup::{SessionWarmup, WarmupOutcome};
use crate::transport::{
	ReqwestTransport, Transport, TransportError, TransportRequest, TransportResponse,
};

/// Cap on the backoff exponent so huge retry budgets cannot overflow.
const MAX_BACKOFF_EXPONENT: u32 = 16;
const WIDE_JITTER_SECS: f64 = 2.0;
const NARROW_JITTER_SECS: f64 = 1.0;

/// Result alias used across the orchestration layer.
pub type FetchResult<T> = Result<T, FetchError>;

/// Error surfaced by [`FetchOrchestrator::fetch`].
#[derive(Debug, Error)]
pub enum FetchError {
	/// The domain's circuit is open. Skip or defer it.
	#[error("{domain} is temporarily blocked (circuit open)")]
	BlockedDomain { domain: String },
	#[error("retries exhausted for {domain} (last status {}, last error {})", display_status(.last_status), display_error(.last_error))]
	ExhaustedRetries {
		domain: String,
		last_status: Option<u16>,
		last_error: Option<TransportError>,
	},
	#[error("transport error: {0}")]
	Transport(#[from] TransportError),
	#[error("invalid url {url:?}: {reason}")]
	InvalidUrl { url: String, reason: String },
	#[error("deadline exceeded while fetching from {domain}")]
	DeadlineExceeded { domain: String },
	#[error("invalid configuration: {0}")]
	Config(#[from] ConfigError),
}

fn display_status(status: &Option<u16>) -> String {
	status.map_or_else(|| "none".to_string(), |status| status.to_string())
}

fn display_error(error: &Option<TransportError>) -> String {
	error
		.as_ref()
		.map_or_else(|| "none".to_string(), ToString::to_string)
}

/// Why an attempt is worth repeating.
#[derive(Debug, Clone)]
pub enum RetryReason {
	/// 403 or 429: the site is pushing back on this identity.
	Blocked(u16),
	/// 5xx or 408.
	ServerStatus(u16),
	/// Any other status outside 2xx. Retried, but says nothing about the
	/// domain's health.
	OtherStatus(u16),
	Transport(TransportError),
}

impl RetryReason {
	pub fn is_block(&self) -> bool {
		matches!(self, RetryReason::Blocked(_))
	}

	pub fn status(&self) -> Option<u16> {
		match self {
			RetryReason::Blocked(status)
			| RetryReason::ServerStatus(status)
			| RetryReason::OtherStatus(status) => Some(*status),
			RetryReason::Transport(_) => None,
		}
	}

	/// Whether the attempt counts against the domain's circuit.
	pub fn is_breaker_failure(&self) -> bool {
		!matches!(self, RetryReason::OtherStatus(_))
	}

	/// Status reported to the rate limiter; server errors and transport
	/// failures count as "no response".
	fn limiter_status(&self) -> u16 {
		match self {
			RetryReason::Blocked(status) | RetryReason::OtherStatus(status) => *status,
			RetryReason::ServerStatus(_) | RetryReason::Transport(_) => 0,
		}
	}

	/// Upper bound of the uniform backoff jitter.
	fn jitter_secs(&self) -> f64 {
		match self {
			RetryReason::Blocked(_) | RetryReason::OtherStatus(_) => WIDE_JITTER_SECS,
			RetryReason::ServerStatus(_) | RetryReason::Transport(_) => NARROW_JITTER_SECS,
		}
	}
}

impl fmt::Display for RetryReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RetryReason::Blocked(status) => write!(f, "blocked with status {status}"),
			RetryReason::ServerStatus(status) => write!(f, "server returned {status}"),
			RetryReason::OtherStatus(status) => write!(f, "unexpected status {status}"),
			RetryReason::Transport(err) => write!(f, "{err}"),
		}
	}
}

/// Tagged result of one attempt; drives the retry loop.
#[derive(Debug)]
pub enum AttemptOutcome {
	Success(TransportResponse),
	Retryable(RetryReason),
	Fatal(FetchError),
}

/// Classifies a transport result.
///
/// Any 2xx is success and every other status is worth another attempt. Only
/// a request that cannot be built at all is final.
pub fn classify(result: Result<TransportResponse, TransportError>) -> AttemptOutcome {
	match result {
		Ok(response) => match response.status {
			200..=299 => AttemptOutcome::Success(response),
			403 | 429 => AttemptOutcome::Retryable(RetryReason::Blocked(response.status)),
			408 | 500..=599 => AttemptOutcome::Retryable(RetryReason::ServerStatus(response.status)),
			status => AttemptOutcome::Retryable(RetryReason::OtherStatus(status)),
		},
		Err(err) if err.is_retryable() => AttemptOutcome::Retryable(RetryReason::Transport(err)),
		Err(err) => AttemptOutcome::Fatal(FetchError::Transport(err)),
	}
}

/// Fluent builder for [`FetchOrchestrator`].
pub struct FetchOrchestratorBuilder {
	config: FetchConfig,
	transport: Option<Arc<dyn Transport>>,
	identities: Option<IdentityPool>,
	referers: Option<RefererManager>,
	session_dir: Option<PathBuf>,
	warmup_targets: Option<HashMap<String, Url>>,
	rate_limit: Option<RateLimitConfig>,
	enable_metrics: bool,
	handlers: Vec<Arc<dyn EventHandler>>,
}

impl FetchOrchestratorBuilder {
	pub fn new() -> Self {
		Self {
			config: FetchConfig::default(),
			transport: None,
			identities: None,
			referers: None,
			session_dir: None,
			warmup_targets: None,
			rate_limit: None,
			enable_metrics: true,
			handlers: Vec::new(),
		}
	}

	pub fn with_config(mut self, config: FetchConfig) -> Self {
		self.config = config;
		self
	}

	pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
		self.transport = Some(transport);
		self
	}

	pub fn with_identity_pool(mut self, pool: IdentityPool) -> Self {
		self.identities = Some(pool);
		self
	}

	pub fn with_referer_manager(mut self, referers: RefererManager) -> Self {
		self.referers = Some(referers);
		self
	}

	/// Overrides `DATA_DIR/cookies` as the session directory.
	pub fn with_session_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.session_dir = Some(dir.into());
		self
	}

	/// Replaces the warm-up allow-list (domain to home page).
	pub fn with_warmup_targets(mut self, targets: HashMap<String, Url>) -> Self {
		self.warmup_targets = Some(targets);
		self
	}

	/// Overrides every limiter constant. Base delays still come from the
	/// configured delay range.
	pub fn with_rate_limit_config(mut self, config: RateLimitConfig) -> Self {
		self.rate_limit = Some(config);
		self
	}

	pub fn with_max_retries(mut self, retries: u32) -> Self {
		self.config.max_retries = retries;
		self
	}

	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.config.request_timeout = timeout;
		self
	}

	/// Base of the retry backoff and the fixed pacing delay.
	pub fn with_base_delay(mut self, delay: Duration) -> Self {
		self.config.scraping_delay = delay;
		self
	}

	pub fn with_delay_range(mut self, min: Duration, max: Duration) -> Self {
		self.config.min_delay = min;
		self.config.max_delay = max;
		self
	}

	pub fn with_circuit_breaker(mut self, threshold: u32, timeout: Duration) -> Self {
		self.config.circuit_breaker_threshold = threshold;
		self.config.circuit_breaker_timeout = timeout;
		self
	}

	pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
		self.config.session_ttl = ttl;
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	pub fn disable_metrics(mut self) -> Self {
		self.enable_metrics = false;
		self
	}

	pub fn disable_circuit_breaker(mut self) -> Self {
		self.config.features.circuit_breaker = false;
		self
	}

	pub fn disable_adaptive_rate_limiting(mut self) -> Self {
		self.config.features.adaptive_rate_limiting = false;
		self
	}

	pub fn disable_session_persistence(mut self) -> Self {
		self.config.features.session_persistence = false;
		self
	}

	pub fn disable_session_warmup(mut self) -> Self {
		self.config.features.session_warmup = false;
		self
	}

	pub fn disable_referer_headers(mut self) -> Self {
		self.config.features.referer_headers = false;
		self
	}

	pub fn disable_user_agent_rotation(mut self) -> Self {
		self.config.features.user_agent_rotation = false;
		self
	}

	pub fn disable_fingerprint_consistency(mut self) -> Self {
		self.config.features.fingerprint_consistency = false;
		self
	}

	pub fn disable_random_delay(mut self) -> Self {
		self.config.features.random_delay = false;
		self
	}

	pub fn build(self) -> FetchResult<FetchOrchestrator> {
		FetchOrchestrator::with_parts(self)
	}
}

impl Default for FetchOrchestratorBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Main fetch orchestrator.
///
/// Cheap to share behind an `Arc`; all per-domain state is internally
/// synchronized and fetches for different domains never wait on each other.
pub struct FetchOrchestrator {
	config: FetchConfig,
	transport: Arc<dyn Transport>,
	breaker: Option<CircuitBreaker>,
	limiter: Option<AdaptiveRateLimiter>,
	fingerprints: FingerprintManager,
	referers: Option<RefererManager>,
	sessions: Option<SessionStore>,
	warmup: Option<SessionWarmup>,
	jars: DomainStateMap<CookieMap>,
	metrics: Option<MetricsCollector>,
	events: Arc<EventDispatcher>,
}

impl FetchOrchestrator {
	/// Orchestrator with default configuration and the reqwest transport.
	pub fn new() -> FetchResult<Self> {
		FetchOrchestratorBuilder::new().build()
	}

	/// Orchestrator configured from the process environment.
	pub fn from_env() -> FetchResult<Self> {
		FetchOrchestratorBuilder::new()
			.with_config(FetchConfig::from_env()?)
			.build()
	}

	pub fn builder() -> FetchOrchestratorBuilder {
		FetchOrchestratorBuilder::new()
	}

	fn with_parts(parts: FetchOrchestratorBuilder) -> FetchResult<Self> {
		let config = parts.config;
		config.validate()?;
		let features = config.features;

		let transport: Arc<dyn Transport> = match parts.transport {
			Some(transport) => transport,
			None => Arc::new(ReqwestTransport::new()?),
		};

		let pool = parts.identities.unwrap_or_default();
		let pool = if features.user_agent_rotation {
			pool
		} else {
			IdentityPool::single(pool.first())
		};

		let breaker = features
			.circuit_breaker
			.then(|| CircuitBreaker::new(config.circuit_breaker_config()));

		let limiter = features.adaptive_rate_limiting.then(|| {
			let base = config.rate_limit_config();
			let limits = parts
				.rate_limit
				.map(|custom| custom.with_base(base.base_min_delay, base.base_max_delay))
				.unwrap_or(base);
			AdaptiveRateLimiter::new(limits)
		});

		let referers = features
			.referer_headers
			.then(|| parts.referers.unwrap_or_default());

		let sessions = features.session_persistence.then(|| {
			SessionStore::new(parts.session_dir.unwrap_or_else(|| config.cookie_dir()))
		});

		let warmup = features.session_warmup.then(|| {
			let warmup = match parts.warmup_targets {
				Some(targets) => SessionWarmup::with_targets(Arc::clone(&transport), targets),
				None => SessionWarmup::new(Arc::clone(&transport)),
			};
			warmup.with_timeout(config.request_timeout)
		});

		let metrics = parts.enable_metrics.then(MetricsCollector::new);

		let mut events = EventDispatcher::new();
		events.register_handler(Arc::new(LoggingHandler));
		if let Some(ref collector) = metrics {
			events.register_handler(Arc::new(MetricsHandler::new(collector.clone())));
		}
		for handler in parts.handlers {
			events.register_handler(handler);
		}

		Ok(Self {
			config,
			transport,
			breaker,
			limiter,
			fingerprints: FingerprintManager::new(pool),
			referers,
			sessions,
			warmup,
			jars: DomainStateMap::new(),
			metrics,
			events: Arc::new(events),
		})
	}

	/// Fetches `url` and returns the body of a 2xx response.
	pub async fn fetch(&self, url: &str) -> FetchResult<String> {
		self.fetch_with_params(url, &[]).await
	}

	/// Fetches `url` with extra query parameters.
	pub async fn fetch_with_params(&self, url: &str, params: &[(&str, &str)]) -> FetchResult<String> {
		let (url, domain) = parse_target(url)?;
		let params = params
			.iter()
			.map(|(key, value)| (key.to_string(), value.to_string()))
			.collect();
		self.run(url, domain, params).await
	}

	/// Like [`fetch_with_params`](Self::fetch_with_params) but gives up once
	/// `deadline` elapses. An attempt still waiting on the transport is
	/// recorded as a failure.
	pub async fn fetch_with_deadline(
		&self,
		url: &str,
		params: &[(&str, &str)],
		deadline: Duration,
	) -> FetchResult<String> {
		let (_, domain) = parse_target(url)?;
		match timeout(deadline, self.fetch_with_params(url, params)).await {
			Ok(result) => result,
			Err(_) => {
				log::warn!("deadline of {:.2}s exceeded for {domain}", deadline.as_secs_f64());
				Err(FetchError::DeadlineExceeded { domain })
			}
		}
	}

	async fn run(&self, url: Url, domain: String, params: Vec<(String, String)>) -> FetchResult<String> {
		if self.circuit_is_open(&domain) {
			return Err(FetchError::BlockedDomain { domain });
		}

		let fingerprint = self.fingerprint_for_fetch();
		self.warm_up(&domain, &fingerprint).await;
		self.load_cookies(&domain).await;

		let max_retries = self.config.max_retries.max(1);
		let mut last_status = None;
		let mut last_error = None;

		for attempt in 0..max_retries {
			if attempt > 0 && self.circuit_is_open(&domain) {
				return Err(FetchError::BlockedDomain { domain });
			}

			let request = TransportRequest::get(url.clone(), self.config.request_timeout)
				.with_params(params.clone())
				.with_headers(self.request_headers(&url, &domain, &fingerprint));

			self.events.dispatch(FetchEvent::PreRequest(PreRequestEvent {
				domain: domain.clone(),
				url: url.clone(),
				attempt,
				user_agent: fingerprint.user_agent().to_string(),
				timestamp: Utc::now(),
			}));

			let started = Instant::now();
			let guard = AttemptGuard::new(self, &domain, attempt, started);
			let result = self.transport.get(&request).await;
			guard.disarm();
			let elapsed = started.elapsed();

			if let Ok(response) = &result {
				self.events.dispatch(FetchEvent::PostResponse(PostResponseEvent {
					domain: domain.clone(),
					url: response.url.clone(),
					attempt,
					status: response.status,
					latency: elapsed,
					timestamp: Utc::now(),
				}));
				// Challenge cookies set on a block must ride along on the retry.
				if !response.cookies.is_empty() {
					self.jars.update(&domain, |jar| jar.extend(response.cookies.clone()));
				}
			}

			match classify(result) {
				AttemptOutcome::Success(response) => {
					self.on_success(&domain, elapsed).await;
					let pause = self.pacing_delay(&domain);
					log::debug!("{domain}: pausing {:.2}s before next request", pause.as_secs_f64());
					sleep(pause).await;
					return Ok(response.body);
				}
				AttemptOutcome::Retryable(reason) => {
					self.on_retryable(&domain, attempt, &reason, elapsed);
					last_status = reason.status().or(last_status);
					if let RetryReason::Transport(err) = &reason {
						last_error = Some(err.clone());
					}

					if attempt + 1 < max_retries {
						let backoff = self.backoff(attempt, &reason);
						self.events.dispatch(FetchEvent::Retry(RetryEvent {
							domain: domain.clone(),
							attempt,
							reason: reason.to_string(),
							scheduled_after: backoff,
							timestamp: Utc::now(),
						}));
						sleep(backoff).await;
					}
				}
				AttemptOutcome::Fatal(err) => {
					if let Some(breaker) = &self.breaker {
						breaker.release_probe(&domain);
					}
					self.events.dispatch(FetchEvent::Error(ErrorEvent {
						domain: domain.clone(),
						attempt,
						error: err.to_string(),
						timestamp: Utc::now(),
					}));
					return Err(err);
				}
			}
		}

		log::warn!("{domain}: giving up after {max_retries} attempts");
		Err(FetchError::ExhaustedRetries {
			domain,
			last_status,
			last_error,
		})
	}

	fn circuit_is_open(&self, domain: &str) -> bool {
		let open = self
			.breaker
			.as_ref()
			.is_some_and(|breaker| breaker.is_open(domain));
		if open {
			self.events.dispatch(FetchEvent::Blocked(BlockedEvent {
				domain: domain.to_string(),
				status: None,
				timestamp: Utc::now(),
			}));
		}
		open
	}

	/// Fingerprint used by every attempt of one fetch.
	fn fingerprint_for_fetch(&self) -> Fingerprint {
		if self.config.features.fingerprint_consistency {
			self.fingerprints.current()
		} else {
			Fingerprint::from_identity(self.fingerprints.pool().random())
		}
	}

	async fn warm_up(&self, domain: &str, fingerprint: &Fingerprint) {
		let Some(warmup) = &self.warmup else {
			return;
		};
		let success = match warmup.run(domain, &fingerprint.headers()).await {
			WarmupOutcome::NotRequired | WarmupOutcome::AlreadyWarm => return,
			WarmupOutcome::Warmed(cookies) => {
				self.jars.update(domain, |jar| jar.extend(cookies));
				true
			}
			WarmupOutcome::Failed => false,
		};
		self.events.dispatch(FetchEvent::Warmup(WarmupEvent {
			domain: domain.to_string(),
			success,
			timestamp: Utc::now(),
		}));
	}

	async fn load_cookies(&self, domain: &str) {
		let Some(sessions) = &self.sessions else {
			return;
		};
		let persisted = sessions.load(domain).await;
		if persisted.is_empty() {
			return;
		}
		self.jars.update(domain, |jar| {
			for (name, value) in persisted {
				jar.entry(name).or_insert(value);
			}
		});
	}

	fn request_headers(&self, url: &Url, domain: &str, fingerprint: &Fingerprint) -> HeaderMap {
		let mut headers = fingerprint.headers();

		if let Some(referer) = self
			.referers
			.as_ref()
			.and_then(|referers| referers.referer(url.as_str()))
		{
			match HeaderValue::from_str(&referer) {
				Ok(value) => {
					headers.insert(REFERER, value);
				}
				Err(_) => log::warn!("skipping invalid referer {referer:?}"),
			}
		}

		let cookie_header = self
			.jars
			.read(domain, |jar| {
				jar.iter()
					.map(|(name, value)| format!("{name}={value}"))
					.collect::<Vec<_>>()
					.join("; ")
			})
			.filter(|header| !header.is_empty());
		if let Some(cookie_header) = cookie_header {
			match HeaderValue::from_str(&cookie_header) {
				Ok(value) => {
					headers.insert(COOKIE, value);
				}
				Err(_) => log::warn!("{domain}: cookie jar holds values that are not valid header text"),
			}
		}

		headers
	}

	async fn on_success(&self, domain: &str, elapsed: Duration) {
		if let Some(breaker) = &self.breaker {
			breaker.record_success(domain);
		}
		if let Some(limiter) = &self.limiter {
			limiter.record_response(domain, 200, elapsed);
		}

		let jar = self.jars.get(domain).unwrap_or_default();

		if let Some(sessions) = &self.sessions
			&& !jar.is_empty()
			&& let Err(err) = sessions.merge(domain, &jar, self.config.session_ttl).await
		{
			log::warn!("failed to persist cookies for {domain}: {err}");
		}
	}

	fn on_retryable(&self, domain: &str, attempt: u32, reason: &RetryReason, elapsed: Duration) {
		if let Some(breaker) = &self.breaker {
			if reason.is_breaker_failure() {
				breaker.record_failure(domain);
			} else {
				breaker.release_probe(domain);
			}
		}
		if let Some(limiter) = &self.limiter {
			limiter.record_response(domain, reason.limiter_status(), elapsed);
		}

		match reason {
			RetryReason::Blocked(status) => {
				self.events.dispatch(FetchEvent::Blocked(BlockedEvent {
					domain: domain.to_string(),
					status: Some(*status),
					timestamp: Utc::now(),
				}));
				if self.config.features.user_agent_rotation {
					self.fingerprints.reset();
				}
			}
			RetryReason::Transport(err) => {
				self.events.dispatch(FetchEvent::Error(ErrorEvent {
					domain: domain.to_string(),
					attempt,
					error: err.to_string(),
					timestamp: Utc::now(),
				}));
			}
			RetryReason::ServerStatus(_) | RetryReason::OtherStatus(_) => {}
		}
	}

	/// `base * 2^attempt` plus jitter; HTTP rejections get the wider jitter.
	fn backoff(&self, attempt: u32, reason: &RetryReason) -> Duration {
		let base = self.config.scraping_delay.as_secs_f64();
		let exponent = attempt.min(MAX_BACKOFF_EXPONENT) as i32;
		let jitter = rand::thread_rng().gen_range(0.0..reason.jitter_secs());
		Duration::from_secs_f64(base * 2f64.powi(exponent) + jitter)
	}

	/// Pause after a successful fetch.
	fn pacing_delay(&self, domain: &str) -> Duration {
		if let Some(limiter) = &self.limiter {
			return limiter.delay(domain);
		}
		if self.config.features.random_delay {
			let min = self.config.min_delay.as_secs_f64();
			let max = self.config.max_delay.as_secs_f64();
			if max > min {
				return Duration::from_secs_f64(rand::thread_rng().gen_range(min..=max));
			}
		}
		self.config.scraping_delay
	}

	pub fn config(&self) -> &FetchConfig {
		&self.config
	}

	pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
		self.breaker.as_ref()
	}

	pub fn rate_limiter(&self) -> Option<&AdaptiveRateLimiter> {
		self.limiter.as_ref()
	}

	pub fn fingerprints(&self) -> &FingerprintManager {
		&self.fingerprints
	}

	pub fn referers(&self) -> Option<&RefererManager> {
		self.referers.as_ref()
	}

	pub fn session_store(&self) -> Option<&SessionStore> {
		self.sessions.as_ref()
	}

	pub fn warmup(&self) -> Option<&SessionWarmup> {
		self.warmup.as_ref()
	}

	pub fn metrics(&self) -> Option<&MetricsCollector> {
		self.metrics.as_ref()
	}

	/// In-memory cookies currently sent to `domain`.
	pub fn cookies(&self, domain: &str) -> CookieMap {
		self.jars.get(&normalize_domain(domain)).unwrap_or_default()
	}
}

impl fmt::Debug for FetchOrchestrator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FetchOrchestrator")
			.field("config", &self.config)
			.field("circuit_breaker", &self.breaker.is_some())
			.field("rate_limiter", &self.limiter.is_some())
			.field("sessions", &self.sessions.as_ref().map(SessionStore::dir))
			.field("warmup", &self.warmup.is_some())
			.field("events", &self.events)
			.finish()
	}
}

fn parse_target(raw: &str) -> FetchResult<(Url, String)> {
	let invalid = |reason: String| FetchError::InvalidUrl {
		url: raw.to_string(),
		reason,
	};
	let url = Url::parse(raw).map_err(|err| invalid(err.to_string()))?;
	if !matches!(url.scheme(), "http" | "https") {
		return Err(invalid(format!("unsupported scheme {}", url.scheme())));
	}
	let domain = domain_of(&url).ok_or_else(|| invalid("missing host".to_string()))?;
	Ok((url, domain))
}

/// Records an attempt as failed if it is dropped before the transport
/// returned, so cancelled fetches still count against the domain.
struct AttemptGuard<'a> {
	orchestrator: &'a FetchOrchestrator,
	domain: &'a str,
	attempt: u32,
	started: Instant,
	armed: bool,
}

impl<'a> AttemptGuard<'a> {
	fn new(orchestrator: &'a FetchOrchestrator, domain: &'a str, attempt: u32, started: Instant) -> Self {
		Self {
			orchestrator,
			domain,
			attempt,
			started,
			armed: true,
		}
	}

	fn disarm(mut self) {
		self.armed = false;
	}
}

impl Drop for AttemptGuard<'_> {
	fn drop(&mut self) {
		if !self.armed {
			return;
		}
		log::debug!("{}: attempt cancelled before a response arrived", self.domain);
		if let Some(breaker) = &self.orchestrator.breaker {
			breaker.record_failure(self.domain);
		}
		if let Some(limiter) = &self.orchestrator.limiter {
			limiter.record_response(self.domain, 0, self.started.elapsed());
		}
		self.orchestrator.events.dispatch(FetchEvent::Error(ErrorEvent {
			domain: self.domain.to_string(),
			attempt: self.attempt,
			error: "cancelled before a response arrived".into(),
			timestamp: Utc::now(),
		}));
	}
}
