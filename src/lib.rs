//! # resilient-fetch
//!
//! Page fetching for crawlers that talk to bot-hostile sites repeatedly
//! without getting permanently blocked.
//!
//! Every request goes through a per-domain pipeline: a circuit breaker that
//! stops hammering failing domains, an adaptive rate limiter that widens its
//! pauses when the site pushes back, a coherent browser fingerprint that stays
//! fixed for a whole fetch, persistent cookie sessions, plausible referers and
//! a one-time warm-up visit for sites that dislike cold deep links.
//!
//! ## Features
//!
//! - Async fetch with retry, exponential backoff and jitter
//! - Per-domain circuit breaking and adaptive pacing
//! - Browser identity rotation with matching client hints
//! - Cookie sessions persisted across restarts
//! - Pluggable transport (reqwest by default)
//! - Configuration from environment variables
//!
//! ## Example
//!
//! ```no_run
//! use resilient_fetch::FetchOrchestrator;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fetcher = FetchOrchestrator::from_env()?;
//!     let body = fetcher.fetch("https://example.com/jobs?q=rust").await?;
//!     println!("{} bytes", body.len());
//!     Ok(())
//! }
//! ```

mod fetcher;

pub mod config;
pub mod modules;
pub mod transport;

pub use crate::fetcher::{
    AttemptOutcome,
    FetchError,
    FetchOrchestrator,
    FetchOrchestratorBuilder,
    FetchResult,
    RetryReason,
    classify,
};

pub use crate::config::{ConfigError, FeatureFlags, FetchConfig};

pub use crate::transport::{
    ReqwestTransport,
    Transport,
    TransportError,
    TransportRequest,
    TransportResponse,
};

pub use crate::modules::{
    AdaptiveRateLimiter,
    BrowserFamily,
    CircuitBreaker,
    CircuitBreakerConfig,
    CircuitState,
    CookieMap,
    DomainCircuit,
    DomainRateStats,
    DomainStats,
    EventDispatcher,
    EventHandler,
    FetchEvent,
    Fingerprint,
    FingerprintManager,
    GlobalStats,
    Identity,
    IdentityError,
    IdentityPool,
    LoggingHandler,
    MetricsCollector,
    MetricsHandler,
    MetricsSnapshot,
    PlatformHint,
    RateLimitConfig,
    RefererManager,
    SessionRecord,
    SessionStore,
    SessionStoreError,
    SessionWarmup,
    WarmupOutcome,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
