//! Browser identity pool.
//!
//! Responsibilities:
//! - Hold a curated list of realistic desktop user-agents.
//! - Derive the platform and browser family each user-agent implies.
//! - Provide uniform random selection, optionally filtered.

use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::thread_rng;
use std::borrow::Cow;
use std::fmt;

const CURATED_USER_AGENTS: &[&str] = &[
    // Chrome / Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 11.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    // Chrome / macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_5_1) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    // Chrome / Linux
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    // Firefox / Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (Windows NT 11.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    // Firefox / macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:120.0) Gecko/20100101 Firefox/120.0",
    // Safari / macOS
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_5_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    // Edge / Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36 Edg/119.0.0.0",
];

static CURATED_IDENTITIES: Lazy<Vec<Identity>> = Lazy::new(|| {
    CURATED_USER_AGENTS
        .iter()
        .map(|agent| Identity::from_user_agent(*agent))
        .collect()
});

/// Operating system implied by a user-agent string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformHint {
    Windows,
    MacOs,
    Linux,
    Other,
}

impl PlatformHint {
    pub fn detect(user_agent: &str) -> Self {
        if user_agent.contains("Windows") {
            PlatformHint::Windows
        } else if user_agent.contains("Macintosh") {
            PlatformHint::MacOs
        } else if user_agent.contains("Linux") {
            PlatformHint::Linux
        } else {
            PlatformHint::Other
        }
    }

    /// Value used by the `sec-ch-ua-platform` client hint.
    pub fn client_hint(self) -> &'static str {
        match self {
            PlatformHint::Windows | PlatformHint::Other => "\"Windows\"",
            PlatformHint::MacOs => "\"macOS\"",
            PlatformHint::Linux => "\"Linux\"",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrowserFamily {
    Chrome,
    Edge,
    Firefox,
    Safari,
    Other,
}

impl BrowserFamily {
    pub fn detect(user_agent: &str) -> Self {
        if user_agent.contains("Edg/") {
            BrowserFamily::Edge
        } else if user_agent.contains("Chrome/") {
            BrowserFamily::Chrome
        } else if user_agent.contains("Firefox/") {
            BrowserFamily::Firefox
        } else if user_agent.contains("Safari/") {
            BrowserFamily::Safari
        } else {
            BrowserFamily::Other
        }
    }

    pub fn is_chromium(self) -> bool {
        matches!(self, BrowserFamily::Chrome | BrowserFamily::Edge)
    }
}

/// One browser identity. Immutable once chosen.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    user_agent: Cow<'static, str>,
    platform: PlatformHint,
    browser: BrowserFamily,
}

impl Identity {
    pub fn from_user_agent(user_agent: impl Into<Cow<'static, str>>) -> Self {
        let user_agent = user_agent.into();
        let platform = PlatformHint::detect(&user_agent);
        let browser = BrowserFamily::detect(&user_agent);
        Self {
            user_agent,
            platform,
            browser,
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn platform(&self) -> PlatformHint {
        self.platform
    }

    pub fn browser(&self) -> BrowserFamily {
        self.browser
    }

    /// Major version token for Chromium identities (e.g. `120`).
    pub fn chromium_major(&self) -> Option<&str> {
        let start = self.user_agent.find("Chrome/")? + "Chrome/".len();
        let rest = &self.user_agent[start..];
        rest.split('.').next().filter(|major| !major.is_empty())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user_agent)
    }
}

/// Pool of identities to draw from.
#[derive(Debug, Clone)]
pub struct IdentityPool {
    identities: Vec<Identity>,
}

impl IdentityPool {
    /// Builds a pool from custom user-agent strings.
    pub fn from_user_agents<I, S>(agents: I) -> Result<Self, IdentityError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let identities: Vec<Identity> = agents
            .into_iter()
            .map(Into::into)
            .map(|agent| agent.trim().to_string())
            .filter(|agent| !agent.is_empty())
            .map(Identity::from_user_agent)
            .collect();

        if identities.is_empty() {
            return Err(IdentityError::EmptyPool);
        }
        Ok(Self { identities })
    }

    /// Pool that always yields `identity`.
    pub fn single(identity: Identity) -> Self {
        Self {
            identities: vec![identity],
        }
    }

    /// Restricts the pool to the given platform and/or browser family.
    pub fn filtered(
        &self,
        platform: Option<PlatformHint>,
        browser: Option<BrowserFamily>,
    ) -> Result<Self, IdentityError> {
        let identities: Vec<Identity> = self
            .identities
            .iter()
            .filter(|identity| platform.is_none_or(|p| identity.platform == p))
            .filter(|identity| browser.is_none_or(|b| identity.browser == b))
            .cloned()
            .collect();

        if identities.is_empty() {
            return Err(IdentityError::NoMatch { platform, browser });
        }
        Ok(Self { identities })
    }

    /// Uniformly random identity.
    pub fn random(&self) -> Identity {
        let mut rng = thread_rng();
        self.identities
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| self.first())
    }

    /// Deterministic identity used when rotation is disabled.
    pub fn first(&self) -> Identity {
        self.identities
            .first()
            .cloned()
            .unwrap_or_else(|| Identity::from_user_agent(CURATED_USER_AGENTS[0]))
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.identities.iter()
    }
}

impl Default for IdentityPool {
    fn default() -> Self {
        Self {
            identities: CURATED_IDENTITIES.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity pool is empty")]
    EmptyPool,
    #[error("no identity matches platform {platform:?} / browser {browser:?}")]
    NoMatch {
        platform: Option<PlatformHint>,
        browser: Option<BrowserFamily>,
    },
}
