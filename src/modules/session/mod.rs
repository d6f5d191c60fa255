//! Persistent per-domain cookie sessions.
//!
//! Each domain gets one JSON record under the store directory holding its
//! cookies and an expiry. Records survive restarts; expired, missing or
//! unreadable records all load as an empty cookie set so a bad file never
//! blocks fetching.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use super::state::normalize_domain;

/// Cookie name to value. Ordered so headers and files are stable.
pub type CookieMap = BTreeMap<String, String>;

/// The persisted form of one domain's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub domain: String,
    pub cookies: CookieMap,
    pub expires_at: DateTime<Utc>,
    pub saved_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("session io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("session record at {path} is not valid json: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode session for {domain}: {source}")]
    Encode {
        domain: String,
        #[source]
        source: serde_json::Error,
    },
}

impl SessionStoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        SessionStoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Directory-backed session store.
///
/// Writes go through a temp file and a rename, so readers in this or another
/// process see either the old record or the new one. Same-domain
/// read-modify-write cycles in this process are serialized by [`merge`](Self::merge).
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name stem for a domain: `.`, `/` and `:` become `_`.
    pub fn slug(domain: &str) -> String {
        normalize_domain(domain)
            .chars()
            .map(|c| match c {
                '.' | '/' | ':' => '_',
                other => other,
            })
            .collect()
    }

    pub fn path_for(&self, domain: &str) -> PathBuf {
        self.dir.join(format!("{}_cookies.json", Self::slug(domain)))
    }

    /// Live cookies for `domain`, or an empty map.
    pub async fn load(&self, domain: &str) -> CookieMap {
        match self.read_record(domain).await {
            Ok(Some(record)) if !record.is_expired_at(Utc::now()) => {
                log::debug!("loaded {} cookies for {domain}", record.cookies.len());
                record.cookies
            }
            Ok(Some(_)) => {
                log::debug!("session for {domain} expired");
                CookieMap::new()
            }
            Ok(None) => CookieMap::new(),
            Err(err) => {
                log::warn!("ignoring unreadable session for {domain}: {err}");
                CookieMap::new()
            }
        }
    }

    /// Raw record on disk, expired or not.
    pub async fn read_record(&self, domain: &str) -> Result<Option<SessionRecord>, SessionStoreError> {
        let path = self.path_for(domain);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(SessionStoreError::io(&path, err)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| SessionStoreError::Corrupt { path, source })
    }

    /// Overwrites the record for `domain`.
    pub async fn save(
        &self,
        domain: &str,
        cookies: &CookieMap,
        ttl: Duration,
    ) -> Result<(), SessionStoreError> {
        let now = Utc::now();
        let expires_at = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let record = SessionRecord {
            domain: normalize_domain(domain),
            cookies: cookies.clone(),
            expires_at,
            saved_at: now,
        };
        self.write_record(&record).await
    }

    /// Merges `cookies` into the live record and saves the union.
    ///
    /// Concurrent merges for one domain run one after another; newer values
    /// win per cookie name. Returns the merged set.
    pub async fn merge(
        &self,
        domain: &str,
        cookies: &CookieMap,
        ttl: Duration,
    ) -> Result<CookieMap, SessionStoreError> {
        let lock = self.domain_lock(domain);
        let _guard = lock.lock().await;

        let mut merged = self.load(domain).await;
        merged.extend(cookies.iter().map(|(name, value)| (name.clone(), value.clone())));
        self.save(domain, &merged, ttl).await?;
        Ok(merged)
    }

    /// Removes the record. Missing records are fine.
    pub async fn clear(&self, domain: &str) -> Result<(), SessionStoreError> {
        let path = self.path_for(domain);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                log::debug!("cleared session for {domain}");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SessionStoreError::io(&path, err)),
        }
    }

    async fn write_record(&self, record: &SessionRecord) -> Result<(), SessionStoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| SessionStoreError::io(&self.dir, err))?;

        let body = serde_json::to_vec_pretty(record).map_err(|source| SessionStoreError::Encode {
            domain: record.domain.clone(),
            source,
        })?;

        let path = self.path_for(&record.domain);
        let suffix: u64 = rand::thread_rng().r#gen();
        let tmp = self
            .dir
            .join(format!("{}_cookies.json.tmp-{suffix:016x}", Self::slug(&record.domain)));

        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|err| SessionStoreError::io(&tmp, err))?;
        file.write_all(&body)
            .await
            .map_err(|err| SessionStoreError::io(&tmp, err))?;
        file.flush()
            .await
            .map_err(|err| SessionStoreError::io(&tmp, err))?;
        drop(file);

        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(SessionStoreError::io(&path, err));
        }

        log::debug!(
            "saved {} cookies for {} until {}",
            record.cookies.len(),
            record.domain,
            record.expires_at.to_rfc3339()
        );
        Ok(())
    }

    fn domain_lock(&self, domain: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(normalize_domain(domain)).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cookies(pairs: &[(&str, &str)]) -> CookieMap {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn slug_is_filesystem_safe() {
        assert_eq!(SessionStore::slug("www.Indeed.com"), "indeed_com");
        assert_eq!(SessionStore::slug("api.example.org:8443"), "api_example_org");
        assert_eq!(SessionStore::slug("a/b:c"), "a_b_c");
    }

    #[tokio::test]
    async fn save_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        let jar = cookies(&[("sid", "abc"), ("pref", "1")]);

        store.save("indeed.com", &jar, Duration::from_secs(3600)).await.unwrap();

        assert!(store.path_for("indeed.com").ends_with("indeed_com_cookies.json"));
        assert_eq!(store.load("indeed.com").await, jar);
        assert!(store.load("other.com").await.is_empty());

        let raw = std::fs::read_to_string(store.path_for("indeed.com")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["domain"], "indeed.com");
        assert_eq!(value["cookies"]["sid"], "abc");
        assert!(value["expires_at"].as_str().is_some());
    }

    #[tokio::test]
    async fn expired_and_corrupt_records_load_empty() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());

        let expired = SessionRecord {
            domain: "a.com".into(),
            cookies: cookies(&[("sid", "old")]),
            expires_at: Utc::now() - TimeDelta::hours(1),
            saved_at: Utc::now() - TimeDelta::hours(25),
        };
        std::fs::write(store.path_for("a.com"), serde_json::to_vec(&expired).unwrap()).unwrap();
        assert!(store.load("a.com").await.is_empty());
        assert_eq!(store.read_record("a.com").await.unwrap(), Some(expired));

        std::fs::write(store.path_for("b.com"), b"{not json").unwrap();
        assert!(store.load("b.com").await.is_empty());
        assert!(matches!(
            store.read_record("b.com").await,
            Err(SessionStoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn clear_removes_and_tolerates_missing() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("nested"));
        store
            .save("a.com", &cookies(&[("k", "v")]), Duration::from_secs(60))
            .await
            .unwrap();
        store.clear("a.com").await.unwrap();
        assert!(store.load("a.com").await.is_empty());
        store.clear("a.com").await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_merges_keep_every_cookie() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let jar = cookies(&[(format!("c{i}").as_str(), "v")]);
                    store.merge("a.com", &jar, Duration::from_secs(60)).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let loaded = store.load("a.com").await;
        assert_eq!(loaded.len(), 8);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn merge_overwrites_by_name() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        store
            .save("a.com", &cookies(&[("sid", "1"), ("keep", "x")]), Duration::from_secs(60))
            .await
            .unwrap();
        let merged = store
            .merge("a.com", &cookies(&[("sid", "2")]), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(merged, cookies(&[("sid", "2"), ("keep", "x")]));
    }
}
