//! Plausible `Referer` synthesis.
//!
//! Known job boards get a curated pool of search-result pages and their own
//! landing pages; every other domain falls back to generic search engines.

use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use url::Url;

use super::state::{domain_of, normalize_domain};

static CURATED_REFERERS: Lazy<HashMap<&'static str, Vec<&'static str>>> = Lazy::new(|| {
    HashMap::from([
        (
            "indeed.com",
            vec![
                "https://www.google.com/search?q=jobs",
                "https://www.google.com/search?q=indeed+jobs",
                "https://www.google.com/",
                "https://www.bing.com/search?q=indeed",
                "https://www.bing.com/search?q=jobs",
                "https://www.linkedin.com/jobs/",
                "https://www.indeed.com/",
            ],
        ),
        (
            "linkedin.com",
            vec![
                "https://www.google.com/search?q=linkedin+jobs",
                "https://www.google.com/search?q=jobs",
                "https://www.linkedin.com/feed/",
                "https://www.linkedin.com/jobs/",
                "https://www.linkedin.com/",
                "https://www.bing.com/search?q=linkedin",
            ],
        ),
        (
            "stackoverflow.com",
            vec![
                "https://www.google.com/search?q=stack+overflow+jobs",
                "https://www.google.com/search?q=developer+jobs",
                "https://stackoverflow.com/",
                "https://stackoverflow.com/jobs",
            ],
        ),
        (
            "github.com",
            vec![
                "https://www.google.com/search?q=github+jobs",
                "https://www.google.com/search?q=developer+jobs",
                "https://github.com/",
                "https://github.com/jobs",
            ],
        ),
        (
            "remoteok.com",
            vec![
                "https://www.google.com/search?q=remote+jobs",
                "https://www.google.com/search?q=remoteok",
                "https://remoteok.com/",
            ],
        ),
        (
            "weworkremotely.com",
            vec![
                "https://www.google.com/search?q=we+work+remotely",
                "https://www.google.com/search?q=remote+jobs",
                "https://weworkremotely.com/",
            ],
        ),
    ])
});

const GENERIC_REFERERS: &[&str] = &[
    "https://www.google.com/",
    "https://www.google.com/search?q=jobs",
    "https://www.bing.com/",
    "https://www.bing.com/search?q=jobs",
    "https://duckduckgo.com/",
];

/// Picks referers from curated per-domain pools.
#[derive(Debug, Clone)]
pub struct RefererManager {
    per_domain: HashMap<String, Vec<String>>,
    generic: Vec<String>,
}

impl RefererManager {
    pub fn new() -> Self {
        Self {
            per_domain: CURATED_REFERERS
                .iter()
                .map(|(domain, pool)| {
                    (
                        domain.to_string(),
                        pool.iter().map(|referer| referer.to_string()).collect(),
                    )
                })
                .collect(),
            generic: GENERIC_REFERERS.iter().map(|referer| referer.to_string()).collect(),
        }
    }

    /// Adds or replaces the pool for a domain.
    pub fn with_domain_pool<I, S>(mut self, domain: &str, referers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.per_domain.insert(
            normalize_domain(domain),
            referers.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Referer for a target URL. Unparsable URLs get a generic referer.
    pub fn referer(&self, target_url: &str) -> Option<String> {
        match Url::parse(target_url).ok().as_ref().and_then(domain_of) {
            Some(domain) => self.referer_for_domain(&domain),
            None => self.pick(&self.generic),
        }
    }

    pub fn referer_for_domain(&self, domain: &str) -> Option<String> {
        let domain = normalize_domain(domain);
        let pool = self.per_domain.get(&domain).unwrap_or(&self.generic);
        self.pick(pool)
    }

    fn pick(&self, pool: &[String]) -> Option<String> {
        pool.choose(&mut rand::thread_rng()).cloned()
    }
}

impl Default for RefererManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curated_domains_use_their_pool() {
        let manager = RefererManager::new();
        let pool = &CURATED_REFERERS["indeed.com"];
        for _ in 0..50 {
            let referer = manager.referer("https://www.Indeed.com/jobs?q=rust").unwrap();
            assert!(pool.contains(&referer.as_str()));
        }
    }

    #[test]
    fn unknown_and_invalid_targets_use_generic_pool() {
        let manager = RefererManager::new();
        for target in ["https://example.org/page", "not a url"] {
            let referer = manager.referer(target).unwrap();
            assert!(GENERIC_REFERERS.contains(&referer.as_str()));
        }
    }

    #[test]
    fn custom_pools_override_and_empty_pools_yield_none() {
        let manager = RefererManager::new()
            .with_domain_pool("www.Example.com", ["https://news.example.net/"])
            .with_domain_pool("quiet.test", Vec::<String>::new());
        assert_eq!(
            manager.referer("https://example.com/a").as_deref(),
            Some("https://news.example.net/")
        );
        assert_eq!(manager.referer_for_domain("quiet.test"), None);
    }
}
