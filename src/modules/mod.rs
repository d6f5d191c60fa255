//! Per-domain resilience services.
//!
//! Each component keeps its own keyed state and can be used standalone; the
//! orchestrator composes them into one fetch pipeline.

pub mod circuit_breaker;
pub mod events;
pub mod fingerprint;
pub mod identity;
pub mod metrics;
pub mod rate_limiter;
pub mod referer;
pub mod session;
pub mod state;
pub mod warmup;

// Re-export commonly used types
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, DomainCircuit};
pub use events::{
    BlockedEvent, ErrorEvent, EventDispatcher, EventHandler, FetchEvent, LoggingHandler,
    MetricsHandler, PostResponseEvent, PreRequestEvent, RetryEvent, WarmupEvent,
};
pub use fingerprint::{Dimensions, Fingerprint, FingerprintManager};
pub use identity::{BrowserFamily, Identity, IdentityError, IdentityPool, PlatformHint};
pub use metrics::{DomainStats, GlobalStats, MetricsCollector, MetricsSnapshot};
pub use rate_limiter::{AdaptiveRateLimiter, DomainRateStats, RateLimitConfig};
pub use referer::RefererManager;
pub use session::{CookieMap, SessionRecord, SessionStore, SessionStoreError};
pub use state::{DomainStateMap, domain_of, normalize_domain};
pub use warmup::{SessionWarmup, WarmupOutcome};
