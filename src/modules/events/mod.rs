//! Fetch lifecycle events.
//!
//! The orchestrator reports every attempt, response, retry, block and warm-up
//! through an [`EventDispatcher`]; handlers turn them into logs, metrics or
//! anything else a caller registers.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::metrics::MetricsCollector;

#[derive(Debug, Clone)]
pub struct PreRequestEvent {
    pub domain: String,
    pub url: Url,
    pub attempt: u32,
    pub user_agent: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PostResponseEvent {
    pub domain: String,
    pub url: Url,
    pub attempt: u32,
    pub status: u16,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub domain: String,
    pub attempt: u32,
    pub reason: String,
    pub scheduled_after: Duration,
    pub timestamp: DateTime<Utc>,
}

/// A domain refused service, or was skipped because its circuit is open.
#[derive(Debug, Clone)]
pub struct BlockedEvent {
    pub domain: String,
    /// `None` when the fetch was skipped by the circuit breaker.
    pub status: Option<u16>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct WarmupEvent {
    pub domain: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub domain: String,
    pub attempt: u32,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum FetchEvent {
    PreRequest(PreRequestEvent),
    PostResponse(PostResponseEvent),
    Retry(RetryEvent),
    Blocked(BlockedEvent),
    Warmup(WarmupEvent),
    Error(ErrorEvent),
}

impl FetchEvent {
    pub fn domain(&self) -> &str {
        match self {
            FetchEvent::PreRequest(event) => &event.domain,
            FetchEvent::PostResponse(event) => &event.domain,
            FetchEvent::Retry(event) => &event.domain,
            FetchEvent::Blocked(event) => &event.domain,
            FetchEvent::Warmup(event) => &event.domain,
            FetchEvent::Error(event) => &event.domain,
        }
    }
}

pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &FetchEvent);
}

/// Broadcasts events to registered handlers, in registration order.
#[derive(Default, Clone)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn dispatch(&self, event: FetchEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &FetchEvent) {
        match event {
            FetchEvent::PreRequest(pre) => {
                log::debug!("-> GET {} (attempt {})", pre.url, pre.attempt + 1);
            }
            FetchEvent::PostResponse(post) => {
                log::debug!(
                    "<- {} {} ({:.2}s)",
                    post.url,
                    post.status,
                    post.latency.as_secs_f64()
                );
            }
            FetchEvent::Retry(retry) => {
                log::info!(
                    "retry {} attempt {} after {:.2}s: {}",
                    retry.domain,
                    retry.attempt + 1,
                    retry.scheduled_after.as_secs_f64(),
                    retry.reason
                );
            }
            FetchEvent::Blocked(blocked) => match blocked.status {
                Some(status) => log::warn!("{} blocked the request with {status}", blocked.domain),
                None => log::warn!("skipping {}: circuit open", blocked.domain),
            },
            FetchEvent::Warmup(warmup) => {
                log::info!("warm-up {} success={}", warmup.domain, warmup.success);
            }
            FetchEvent::Error(error) => {
                log::warn!("error {} -> {}", error.domain, error.error);
            }
        }
    }
}

/// Feeds the metrics collector.
#[derive(Clone, Debug)]
pub struct MetricsHandler {
    metrics: MetricsCollector,
}

impl MetricsHandler {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self { metrics }
    }
}

impl EventHandler for MetricsHandler {
    fn handle(&self, event: &FetchEvent) {
        match event {
            FetchEvent::PostResponse(post) => {
                self.metrics
                    .record_response(&post.domain, post.status, post.latency);
            }
            FetchEvent::Error(error) => {
                self.metrics.record_error(&error.domain);
            }
            FetchEvent::Blocked(blocked) if blocked.status.is_none() => {
                self.metrics.record_skip(&blocked.domain);
            }
            _ => {}
        }
    }
}
