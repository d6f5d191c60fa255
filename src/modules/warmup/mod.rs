//! One-time session warm-up.
//!
//! Some sites treat a cold deep link as suspicious. For allow-listed domains
//! the home page is visited once per process before the first real fetch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::HeaderMap;
use url::Url;

use super::session::CookieMap;
use super::state::{DomainStateMap, normalize_domain};
use crate::transport::{Transport, TransportRequest};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of a warm-up call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarmupOutcome {
    /// Domain is not on the allow-list.
    NotRequired,
    /// An earlier call already warmed the domain.
    AlreadyWarm,
    /// The home page answered 2xx; carries any cookies it set.
    Warmed(CookieMap),
    /// The visit failed; the domain stays cold and a later call retries.
    Failed,
}

impl WarmupOutcome {
    pub fn is_ready(&self) -> bool {
        !matches!(self, WarmupOutcome::Failed)
    }
}

pub struct SessionWarmup {
    transport: Arc<dyn Transport>,
    targets: HashMap<String, Url>,
    timeout: Duration,
    warmed: DomainStateMap<()>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionWarmup {
    /// Warm-up with the default allow-list (`indeed.com`).
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let mut targets = HashMap::new();
        if let Ok(home) = Url::parse("https://www.indeed.com") {
            targets.insert("indeed.com".to_string(), home);
        }
        Self::with_targets(transport, targets)
    }

    /// Warm-up with a custom allow-list of domain to home page.
    pub fn with_targets(transport: Arc<dyn Transport>, targets: HashMap<String, Url>) -> Self {
        Self {
            transport,
            targets: targets
                .into_iter()
                .map(|(domain, home)| (normalize_domain(&domain), home))
                .collect(),
            timeout: DEFAULT_TIMEOUT,
            warmed: DomainStateMap::new(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn needs_warmup(&self, domain: &str) -> bool {
        self.targets.contains_key(&normalize_domain(domain))
    }

    pub fn is_warmed(&self, domain: &str) -> bool {
        self.warmed.contains(&normalize_domain(domain))
    }

    /// Visits the home page if needed. Returns false only when a required
    /// warm-up failed.
    pub async fn warm_up(&self, domain: &str, headers: &HeaderMap) -> bool {
        self.run(domain, headers).await.is_ready()
    }

    /// Like [`warm_up`](Self::warm_up) but reports what happened.
    pub async fn run(&self, domain: &str, headers: &HeaderMap) -> WarmupOutcome {
        let domain = normalize_domain(domain);
        let Some(home) = self.targets.get(&domain) else {
            return WarmupOutcome::NotRequired;
        };
        if self.warmed.contains(&domain) {
            return WarmupOutcome::AlreadyWarm;
        }

        let lock = self.domain_lock(&domain);
        let _guard = lock.lock().await;
        if self.warmed.contains(&domain) {
            return WarmupOutcome::AlreadyWarm;
        }

        log::info!("warming up session for {domain} via {home}");
        let request = TransportRequest::get(home.clone(), self.timeout).with_headers(headers.clone());
        match self.transport.get(&request).await {
            Ok(response) if response.is_ok() => {
                self.warmed.update_or_insert_with(&domain, || (), |_| ());
                log::info!("session warm-up for {domain} succeeded");
                WarmupOutcome::Warmed(response.cookies)
            }
            Ok(response) => {
                log::warn!(
                    "session warm-up for {domain} returned status {}",
                    response.status
                );
                WarmupOutcome::Failed
            }
            Err(err) => {
                log::warn!("session warm-up for {domain} failed: {err}");
                WarmupOutcome::Failed
            }
        }
    }

    /// Forgets every warmed domain.
    pub fn reset(&self) {
        self.warmed.clear_all();
    }

    fn domain_lock(&self, domain: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(domain.to_string()).or_default())
    }
}

impl std::fmt::Debug for SessionWarmup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionWarmup")
            .field("targets", &self.targets)
            .field("timeout", &self.timeout)
            .field("warmed", &self.warmed.domains())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{TransportError, TransportResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTransport {
        calls: AtomicUsize,
        status: u16,
    }

    impl CountingTransport {
        fn new(status: u16) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                status,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn get(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            let mut cookies = CookieMap::new();
            cookies.insert("CTK".into(), "warm".into());
            Ok(TransportResponse {
                status: self.status,
                body: String::new(),
                cookies,
                url: request.url.clone(),
            })
        }
    }

    #[tokio::test]
    async fn warms_allow_listed_domain_once() {
        let transport = CountingTransport::new(200);
        let warmup = SessionWarmup::new(transport.clone());
        let headers = HeaderMap::new();

        assert!(warmup.needs_warmup("www.indeed.com"));
        assert!(!warmup.needs_warmup("linkedin.com"));

        let first = warmup.run("indeed.com", &headers).await;
        assert!(matches!(first, WarmupOutcome::Warmed(ref jar) if jar["CTK"] == "warm"));
        assert_eq!(transport.calls(), 1);

        assert!(warmup.warm_up("indeed.com", &headers).await);
        assert_eq!(transport.calls(), 1);
        assert!(warmup.is_warmed("www.indeed.com"));

        assert!(warmup.warm_up("linkedin.com", &headers).await);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn failed_warmup_is_retried_later() {
        let transport = CountingTransport::new(503);
        let warmup = SessionWarmup::new(transport.clone());

        assert!(!warmup.warm_up("indeed.com", &HeaderMap::new()).await);
        assert!(!warmup.is_warmed("indeed.com"));
        assert!(!warmup.warm_up("indeed.com", &HeaderMap::new()).await);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn concurrent_warmups_share_one_request() {
        let transport = CountingTransport::new(200);
        let warmup = Arc::new(SessionWarmup::new(transport.clone()));

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let warmup = Arc::clone(&warmup);
                tokio::spawn(async move { warmup.warm_up("indeed.com", &HeaderMap::new()).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert_eq!(transport.calls(), 1);

        warmup.reset();
        assert!(!warmup.is_warmed("indeed.com"));
    }

    #[tokio::test]
    async fn custom_targets_are_normalized() {
        let transport = CountingTransport::new(200);
        let targets = HashMap::from([(
            "WWW.Example.com".to_string(),
            Url::parse("https://example.com/").unwrap(),
        )]);
        let warmup = SessionWarmup::with_targets(transport.clone(), targets);
        assert!(warmup.needs_warmup("example.com"));
        assert!(!warmup.needs_warmup("indeed.com"));
        assert!(warmup.warm_up("example.com", &HeaderMap::new()).await);
        assert_eq!(transport.calls(), 1);
    }
}
