//! Shared per-domain state containers.
//!
//! Every resilience component keys its bookkeeping by normalized domain. The
//! map here keeps that bookkeeping behind a lock that is only held for short,
//! synchronous read-modify-write updates, so work on one domain never waits on
//! network activity for another.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use url::Url;

/// Normalizes a host or authority into the key used by every per-domain map.
///
/// Lowercases, drops any port and strips a single leading `www.`.
pub fn normalize_domain(host: &str) -> String {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    let host = match host.rsplit_once(':') {
        Some((name, port)) if !name.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            name.to_string()
        }
        _ => host,
    };
    host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
}

/// Extracts the normalized domain from a parsed URL.
pub fn domain_of(url: &Url) -> Option<String> {
    url.host_str()
        .map(normalize_domain)
        .filter(|domain| !domain.is_empty())
}

/// Thread-safe map of lazily created per-domain state.
#[derive(Debug)]
pub struct DomainStateMap<T> {
    inner: Arc<RwLock<HashMap<String, T>>>,
}

impl<T> Clone for DomainStateMap<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> DomainStateMap<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Runs `f` against the domain's entry, creating it with `init` first when
    /// absent. The whole update happens under one write lock.
    pub fn update_or_insert_with<R, I, F>(&self, domain: &str, init: I, f: F) -> R
    where
        I: FnOnce() -> T,
        F: FnOnce(&mut T) -> R,
    {
        let mut guard = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let state = guard.entry(domain.to_string()).or_insert_with(init);
        f(state)
    }

    /// Runs `f` against an existing entry only.
    pub fn update_existing<R, F>(&self, domain: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        let mut guard = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.get_mut(domain).map(f)
    }

    pub fn read<R, F>(&self, domain: &str, f: F) -> Option<R>
    where
        F: FnOnce(&T) -> R,
    {
        let guard = self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.get(domain).map(f)
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.read(domain, |_| ()).is_some()
    }

    pub fn remove(&self, domain: &str) -> Option<T> {
        let mut guard = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.remove(domain)
    }

    pub fn clear_all(&self) {
        let mut guard = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.clear();
    }

    pub fn domains(&self) -> Vec<String> {
        let guard = self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.keys().cloned().collect()
    }
}

impl<T: Clone> DomainStateMap<T> {
    pub fn get(&self, domain: &str) -> Option<T> {
        self.read(domain, T::clone)
    }
}

impl<T: Default> DomainStateMap<T> {
    pub fn update<R, F>(&self, domain: &str, f: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        self.update_or_insert_with(domain, T::default, f)
    }
}

impl<T> Default for DomainStateMap<T> {
    fn default() -> Self {
        Self::new()
    }
}
