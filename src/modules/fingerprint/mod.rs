//! Coherent browser fingerprints.
//!
//! A fingerprint bundles the identity with the viewport, screen, platform,
//! language and timezone a real browser on that OS would report. One bundle
//! stays current until it is explicitly reset, so every header and viewport
//! decision made in between agrees with every other.

use http::header::{
    ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CACHE_CONTROL, HeaderMap, HeaderName, HeaderValue,
    UPGRADE_INSECURE_REQUESTS, USER_AGENT,
};
use std::sync::{Arc, Mutex};

use super::identity::{BrowserFamily, Identity, IdentityPool, PlatformHint};

const SPANISH_FIRST: &str = "es-ES,es;q=0.9,en-US;q=0.8,en;q=0.7";
const ENGLISH_FIRST: &str = "en-US,en;q=0.9";
const DEFAULT_TIMEZONE: &str = "America/Bogota";
const DEFAULT_TIMEZONE_OFFSET: i32 = -300;
const ACCEPT_DOCUMENT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub identity: Identity,
    pub viewport: Dimensions,
    pub screen: Dimensions,
    pub platform: String,
    pub language: String,
    pub timezone: String,
    /// Minutes relative to UTC.
    pub timezone_offset: i32,
}

impl Fingerprint {
    /// Derives the full bundle from an identity's platform hints.
    pub fn from_identity(identity: Identity) -> Self {
        let (viewport, platform) = match identity.platform() {
            PlatformHint::Windows => (Dimensions::new(1920, 1080), "Win32"),
            PlatformHint::MacOs => (Dimensions::new(1440, 900), "MacIntel"),
            PlatformHint::Linux => (Dimensions::new(1920, 1080), "Linux x86_64"),
            PlatformHint::Other => (Dimensions::new(1920, 1080), "Win32"),
        };

        let language = if identity.browser() == BrowserFamily::Safari {
            ENGLISH_FIRST
        } else {
            SPANISH_FIRST
        };

        Self {
            identity,
            viewport,
            screen: viewport,
            platform: platform.to_string(),
            language: language.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            timezone_offset: DEFAULT_TIMEZONE_OFFSET,
        }
    }

    pub fn user_agent(&self) -> &str {
        self.identity.user_agent()
    }

    /// Realistic navigation headers consistent with this fingerprint.
    ///
    /// Client hints are only emitted for Chromium identities, with the
    /// platform hint matching the user-agent's OS.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        insert(&mut headers, USER_AGENT, self.user_agent());
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_DOCUMENT));
        insert(&mut headers, ACCEPT_LANGUAGE, &self.language);
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate, br"));
        headers.insert(HeaderName::from_static("dnt"), HeaderValue::from_static("1"));
        headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
        headers.insert(
            HeaderName::from_static("sec-fetch-dest"),
            HeaderValue::from_static("document"),
        );
        headers.insert(
            HeaderName::from_static("sec-fetch-mode"),
            HeaderValue::from_static("navigate"),
        );
        headers.insert(
            HeaderName::from_static("sec-fetch-site"),
            HeaderValue::from_static("none"),
        );
        headers.insert(
            HeaderName::from_static("sec-fetch-user"),
            HeaderValue::from_static("?1"),
        );
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));

        if self.identity.browser().is_chromium() {
            let major = self.identity.chromium_major().unwrap_or("120");
            let brand = match self.identity.browser() {
                BrowserFamily::Edge => "Microsoft Edge",
                _ => "Google Chrome",
            };
            let sec_ch_ua =
                format!("\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"{major}\", \"{brand}\";v=\"{major}\"");
            insert(&mut headers, HeaderName::from_static("sec-ch-ua"), &sec_ch_ua);
            headers.insert(
                HeaderName::from_static("sec-ch-ua-mobile"),
                HeaderValue::from_static("?0"),
            );
            headers.insert(
                HeaderName::from_static("sec-ch-ua-platform"),
                HeaderValue::from_static(self.identity.platform().client_hint()),
            );
        }

        headers
    }
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    // Pool entries are plain ASCII; anything else is skipped rather than sent.
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    } else {
        log::warn!("skipping non-ascii value for header {name}");
    }
}

/// Holds the single current fingerprint, generating it lazily.
#[derive(Debug, Clone)]
pub struct FingerprintManager {
    pool: IdentityPool,
    current: Arc<Mutex<Option<Fingerprint>>>,
}

impl FingerprintManager {
    pub fn new(pool: IdentityPool) -> Self {
        Self {
            pool,
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Current fingerprint, generating one if none is active.
    pub fn current(&self) -> Fingerprint {
        let mut guard = self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .get_or_insert_with(|| {
                let fingerprint = Fingerprint::from_identity(self.pool.random());
                log::debug!("generated fingerprint {}", fingerprint.user_agent());
                fingerprint
            })
            .clone()
    }

    /// Discards the current fingerprint; the next [`current`](Self::current)
    /// call draws a fresh identity.
    pub fn reset(&self) {
        let mut guard = self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = None;
    }

    pub fn has_current(&self) -> bool {
        self.current
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    pub fn viewport(&self) -> Dimensions {
        self.current().viewport
    }

    pub fn screen(&self) -> Dimensions {
        self.current().screen
    }

    pub fn pool(&self) -> &IdentityPool {
        &self.pool
    }
}

impl Default for FingerprintManager {
    fn default() -> Self {
        Self::new(IdentityPool::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint_for(agent: &'static str) -> Fingerprint {
        Fingerprint::from_identity(Identity::from_user_agent(agent))
    }

    #[test]
    fn current_is_stable_until_reset() {
        let manager = FingerprintManager::default();
        assert!(!manager.has_current());
        let first = manager.current();
        for _ in 0..10 {
            assert_eq!(manager.current(), first);
        }
        manager.reset();
        assert!(!manager.has_current());
        let _ = manager.current();
        assert!(manager.has_current());
    }

    #[test]
    fn reset_can_change_identity() {
        let pool = IdentityPool::from_user_agents([
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
        ])
        .unwrap();
        let manager = FingerprintManager::new(pool);
        let first = manager.current();
        let changed = (0..64).any(|_| {
            manager.reset();
            manager.current() != first
        });
        assert!(changed);
    }

    #[test]
    fn derives_platform_specific_values() {
        let mac_safari = fingerprint_for(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
        );
        assert_eq!(mac_safari.viewport, Dimensions::new(1440, 900));
        assert_eq!(mac_safari.platform, "MacIntel");
        assert_eq!(mac_safari.language, ENGLISH_FIRST);

        let mac_chrome = fingerprint_for(
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        );
        assert_eq!(mac_chrome.language, SPANISH_FIRST);

        let linux = fingerprint_for(
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        );
        assert_eq!(linux.platform, "Linux x86_64");
        assert_eq!(linux.screen, linux.viewport);
        assert_eq!(linux.timezone, "America/Bogota");
        assert_eq!(linux.timezone_offset, -300);
    }

    #[test]
    fn client_hints_follow_browser_and_platform() {
        let linux_chrome = fingerprint_for(
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
        );
        let headers = linux_chrome.headers();
        assert_eq!(headers.get("sec-ch-ua-platform").unwrap(), "\"Linux\"");
        assert!(headers.get("sec-ch-ua").unwrap().to_str().unwrap().contains("v=\"119\""));
        assert_eq!(headers.get(USER_AGENT).unwrap(), linux_chrome.user_agent());

        let firefox = fingerprint_for(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
        );
        let headers = firefox.headers();
        assert!(headers.get("sec-ch-ua").is_none());
        assert_eq!(headers.get(ACCEPT_LANGUAGE).unwrap(), SPANISH_FIRST);
    }
}
