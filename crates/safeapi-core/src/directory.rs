//! Partner key directory.
//!
//! Maps a partner username to its public key. Entries are fetched from an
//! external [`PartnerSource`] on first use and cached with a sliding
//! expiration: every hit pushes the deadline out by the configured TTL.
//!
//! Concurrent misses for the same username are not coalesced. Each caller
//! queries the source and the last insert wins; the records are equivalent.
//!
//! Expired entries are dropped when looked up and on every [`preload`].
//! Entries that are never looked up again stay until the host calls
//! [`purge_expired`] (or reloads); hosts should run it periodically.
//!
//! [`preload`]: PartnerKeyDirectory::preload
//! [`purge_expired`]: PartnerKeyDirectory::purge_expired

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use safeapi_crypto::{DigestMode, KeyBlobError, RsaKey};

/// Default sliding TTL for cached partners: one day.
pub const DEFAULT_PARTNER_TTL: Duration = Duration::from_secs(86_400);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("unknown partner: {0}")]
    UnknownPartner(String),
    #[error("partner {0} has no public key")]
    MissingPublicKey(String),
    #[error("public key for partner {username} is malformed: {source}")]
    MalformedKey {
        username: String,
        source: KeyBlobError,
    },
    #[error("directory lookup failed: {0}")]
    Unavailable(String),
}

/// A partner as stored by the external directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerRecord {
    pub username: String,
    /// Numeric user id.
    pub id: i64,
    pub partner_id: i64,
    #[serde(default)]
    pub display_name: String,
    /// Base64 SubjectPublicKeyInfo.
    pub public_key: String,
    /// Signature digest; the directory default applies when absent.
    #[serde(default)]
    pub digest: Option<DigestMode>,
}

/// A resolved partner with parsed key material.
#[derive(Debug, Clone)]
pub struct PartnerIdentity {
    pub username: String,
    pub id: i64,
    pub partner_id: i64,
    pub display_name: String,
    pub key: RsaKey,
}

/// External directory collaborator.
#[async_trait]
pub trait PartnerSource: Send + Sync {
    /// Look up one partner.
    ///
    /// * `Ok(Some(record))` - partner found
    /// * `Ok(None)` - no such partner
    /// * `Err` - the directory could not be reached
    async fn lookup_partner(&self, username: &str) -> Result<Option<PartnerRecord>, String>;

    /// Bulk listing used to warm the cache at startup.
    async fn list_partners(&self) -> Result<Vec<PartnerRecord>, String>;
}

/// Fixed in-memory partner list.
#[derive(Debug, Clone, Default)]
pub struct StaticPartnerSource {
    records: Vec<PartnerRecord>,
}

impl StaticPartnerSource {
    pub fn new(records: Vec<PartnerRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl PartnerSource for StaticPartnerSource {
    async fn lookup_partner(&self, username: &str) -> Result<Option<PartnerRecord>, String> {
        Ok(self.records.iter().find(|r| r.username == username).cloned())
    }

    async fn list_partners(&self) -> Result<Vec<PartnerRecord>, String> {
        Ok(self.records.clone())
    }
}

struct CacheEntry {
    identity: Arc<PartnerIdentity>,
    last_access: Instant,
}

/// Cache of partner keys in front of a [`PartnerSource`].
pub struct PartnerKeyDirectory {
    source: Arc<dyn PartnerSource>,
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    default_digest: DigestMode,
}

impl PartnerKeyDirectory {
    pub fn new(source: Arc<dyn PartnerSource>) -> Self {
        Self::with_ttl(source, DEFAULT_PARTNER_TTL)
    }

    pub fn with_ttl(source: Arc<dyn PartnerSource>, ttl: Duration) -> Self {
        Self {
            source,
            entries: DashMap::new(),
            ttl,
            default_digest: DigestMode::default(),
        }
    }

    /// Digest used for partners whose record does not name one.
    pub fn with_default_digest(mut self, digest: DigestMode) -> Self {
        self.default_digest = digest;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub async fn lookup(&self, username: &str) -> Result<Arc<PartnerIdentity>, DirectoryError> {
        self.lookup_at(username, Instant::now()).await
    }

    /// Lookup against an explicit clock.
    pub async fn lookup_at(
        &self,
        username: &str,
        now: Instant,
    ) -> Result<Arc<PartnerIdentity>, DirectoryError> {
        if let Some(identity) = self.cached(username, now) {
            return Ok(identity);
        }

        debug!(partner = %username, "partner cache miss");
        let record = self
            .source
            .lookup_partner(username)
            .await
            .map_err(DirectoryError::Unavailable)?
            .ok_or_else(|| DirectoryError::UnknownPartner(username.to_string()))?;

        let identity = Arc::new(self.resolve(record)?);
        self.entries.insert(
            username.to_string(),
            CacheEntry {
                identity: identity.clone(),
                last_access: now,
            },
        );
        Ok(identity)
    }

    /// Warm the cache from the source's bulk listing.
    ///
    /// Expired entries are purged first. Records without a usable key are
    /// skipped. Returns how many were cached.
    pub async fn preload(&self) -> Result<usize, DirectoryError> {
        let records = self
            .source
            .list_partners()
            .await
            .map_err(DirectoryError::Unavailable)?;

        let now = Instant::now();
        let purged = self.purge_expired_at(now);
        if purged > 0 {
            debug!(purged, "expired partners purged");
        }
        let mut loaded = 0;
        for record in records {
            let username = record.username.clone();
            match self.resolve(record) {
                Ok(identity) => {
                    self.entries.insert(
                        username,
                        CacheEntry {
                            identity: Arc::new(identity),
                            last_access: now,
                        },
                    );
                    loaded += 1;
                }
                Err(e) => warn!(partner = %username, error = %e, "skipping partner during preload"),
            }
        }
        debug!(loaded, "partner cache preloaded");
        Ok(loaded)
    }

    /// Drop one partner from the cache. Returns whether it was present.
    pub fn invalidate(&self, username: &str) -> bool {
        self.entries.remove(username).is_some()
    }

    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    /// Remove every entry idle for at least the TTL as of `now`.
    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.last_access) < self.ttl);
        before.saturating_sub(self.entries.len())
    }

    fn cached(&self, username: &str, now: Instant) -> Option<Arc<PartnerIdentity>> {
        {
            let mut entry = self.entries.get_mut(username)?;
            if now.saturating_duration_since(entry.last_access) < self.ttl {
                if now > entry.last_access {
                    entry.last_access = now;
                }
                return Some(entry.identity.clone());
            }
        }
        // Guard released above; remove only if still stale.
        self.entries.remove_if(username, |_, entry| {
            now.saturating_duration_since(entry.last_access) >= self.ttl
        });
        None
    }

    fn resolve(&self, record: PartnerRecord) -> Result<PartnerIdentity, DirectoryError> {
        if record.public_key.trim().is_empty() {
            return Err(DirectoryError::MissingPublicKey(record.username));
        }
        let digest = record.digest.unwrap_or(self.default_digest);
        let key = RsaKey::from_public_blob(&record.public_key, digest).map_err(|source| {
            DirectoryError::MalformedKey {
                username: record.username.clone(),
                source,
            }
        })?;
        Ok(PartnerIdentity {
            username: record.username,
            id: record.id,
            partner_id: record.partner_id,
            display_name: record.display_name,
            key,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use safeapi_crypto::test_keys;

    /// In-memory directory that counts calls.
    pub(crate) struct TestSource {
        records: Mutex<HashMap<String, PartnerRecord>>,
        pub lookups: AtomicUsize,
        pub delay: Option<Duration>,
        pub offline: bool,
    }

    impl TestSource {
        pub fn new() -> Self {
            Self {
                records: Mutex::new(HashMap::new()),
                lookups: AtomicUsize::new(0),
                delay: None,
                offline: false,
            }
        }

        pub fn with_partner(self, username: &str, public_key: &str) -> Self {
            self.records.lock().unwrap().insert(
                username.to_string(),
                PartnerRecord {
                    username: username.to_string(),
                    id: 7,
                    partner_id: 70,
                    display_name: format!("{username} Ltd"),
                    public_key: public_key.to_string(),
                    digest: None,
                },
            );
            self
        }

        pub fn remove(&self, username: &str) {
            self.records.lock().unwrap().remove(username);
        }

        pub fn lookups(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PartnerSource for TestSource {
        async fn lookup_partner(&self, username: &str) -> Result<Option<PartnerRecord>, String> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.offline {
                return Err("connection refused".into());
            }
            Ok(self.records.lock().unwrap().get(username).cloned())
        }

        async fn list_partners(&self) -> Result<Vec<PartnerRecord>, String> {
            if self.offline {
                return Err("connection refused".into());
            }
            Ok(self.records.lock().unwrap().values().cloned().collect())
        }
    }

    fn directory(source: TestSource) -> (Arc<TestSource>, PartnerKeyDirectory) {
        let source = Arc::new(source);
        let dir = PartnerKeyDirectory::new(source.clone());
        (source, dir)
    }

    #[tokio::test]
    async fn test_lookup_caches_partner() {
        let (source, dir) = directory(TestSource::new().with_partner("acme", test_keys::PARTNER_PUBLIC));

        let first = dir.lookup("acme").await.unwrap();
        let second = dir.lookup("acme").await.unwrap();

        assert_eq!(source.lookups(), 1);
        assert_eq!(first.id, 7);
        assert_eq!(first.partner_id, 70);
        assert_eq!(first.display_name, "acme Ltd");
        assert_eq!(first.key.digest(), DigestMode::Sha256);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(dir.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_partner() {
        let (_, dir) = directory(TestSource::new());
        assert_eq!(
            dir.lookup("ghost").await.unwrap_err(),
            DirectoryError::UnknownPartner("ghost".into())
        );
        assert!(dir.is_empty());
    }

    #[tokio::test]
    async fn test_empty_public_key() {
        let (_, dir) = directory(TestSource::new().with_partner("acme", "  "));
        assert_eq!(
            dir.lookup("acme").await.unwrap_err(),
            DirectoryError::MissingPublicKey("acme".into())
        );
    }

    #[tokio::test]
    async fn test_malformed_public_key_is_not_cached() {
        let (source, dir) = directory(TestSource::new().with_partner("acme", test_keys::PARTNER_PRIVATE));
        assert!(matches!(
            dir.lookup("acme").await.unwrap_err(),
            DirectoryError::MalformedKey { .. }
        ));
        assert!(dir.lookup("acme").await.is_err());
        assert_eq!(source.lookups(), 2);
    }

    #[tokio::test]
    async fn test_source_failure_propagates_without_retry() {
        let mut source = TestSource::new().with_partner("acme", test_keys::PARTNER_PUBLIC);
        source.offline = true;
        let (source, dir) = directory(source);

        assert_eq!(
            dir.lookup("acme").await.unwrap_err(),
            DirectoryError::Unavailable("connection refused".into())
        );
        assert_eq!(source.lookups(), 1);
    }

    #[tokio::test]
    async fn test_sliding_expiration() {
        let (source, dir) = directory(TestSource::new().with_partner("acme", test_keys::PARTNER_PUBLIC));
        let hour = Duration::from_secs(3600);
        let t0 = Instant::now();

        dir.lookup_at("acme", t0).await.unwrap();
        // Each hit inside the window slides it forward.
        dir.lookup_at("acme", t0 + hour * 23).await.unwrap();
        dir.lookup_at("acme", t0 + hour * 46).await.unwrap();
        assert_eq!(source.lookups(), 1);

        // A full idle day after the last hit forces a refetch.
        dir.lookup_at("acme", t0 + hour * 70).await.unwrap();
        assert_eq!(source.lookups(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_misses_both_succeed() {
        let mut source = TestSource::new().with_partner("acme", test_keys::PARTNER_PUBLIC);
        source.delay = Some(Duration::from_millis(20));
        let (source, dir) = directory(source);

        let (a, b) = tokio::join!(dir.lookup("acme"), dir.lookup("acme"));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.key.material().modulus(), b.key.material().modulus());
        assert!((1..=2).contains(&source.lookups()));
        assert_eq!(dir.len(), 1);
    }

    #[tokio::test]
    async fn test_preload_skips_bad_records() {
        let (source, dir) = directory(
            TestSource::new()
                .with_partner("acme", test_keys::PARTNER_PUBLIC)
                .with_partner("globex", test_keys::SERVER_PUBLIC)
                .with_partner("initech", ""),
        );

        assert_eq!(dir.preload().await.unwrap(), 2);
        assert_eq!(dir.len(), 2);

        dir.lookup("acme").await.unwrap();
        dir.lookup("globex").await.unwrap();
        assert_eq!(source.lookups(), 0);
    }

    #[tokio::test]
    async fn test_preload_failure() {
        let mut source = TestSource::new();
        source.offline = true;
        let (_, dir) = directory(source);
        assert!(matches!(dir.preload().await, Err(DirectoryError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_invalidate_and_purge() {
        let (source, dir) = directory(
            TestSource::new()
                .with_partner("acme", test_keys::PARTNER_PUBLIC)
                .with_partner("globex", test_keys::SERVER_PUBLIC),
        );
        let t0 = Instant::now();
        dir.lookup_at("acme", t0).await.unwrap();
        dir.lookup_at("globex", t0 + Duration::from_secs(3600)).await.unwrap();

        assert!(dir.invalidate("acme"));
        assert!(!dir.invalidate("acme"));
        dir.lookup_at("acme", t0).await.unwrap();
        assert_eq!(source.lookups(), 3);

        assert_eq!(dir.purge_expired_at(t0 + DEFAULT_PARTNER_TTL), 1);
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.purge_expired_at(t0 + DEFAULT_PARTNER_TTL * 2), 1);
        assert!(dir.is_empty());
    }

    #[tokio::test]
    async fn test_record_digest_overrides_default() {
        let source = TestSource::new().with_partner("legacy", test_keys::PARTNER_PUBLIC);
        source
            .records
            .lock()
            .unwrap()
            .get_mut("legacy")
            .unwrap()
            .digest = Some(DigestMode::Sha1);
        let (_, dir) = directory(source);

        assert_eq!(dir.lookup("legacy").await.unwrap().key.digest(), DigestMode::Sha1);
    }

    #[test]
    fn test_record_deserializes_without_optional_fields() {
        let record: PartnerRecord = serde_json::from_str(
            r#"{"username":"acme","id":1,"partner_id":2,"public_key":"AAAA"}"#,
        )
        .unwrap();
        assert_eq!(record.display_name, "");
        assert_eq!(record.digest, None);
    }

    #[tokio::test]
    async fn test_preload_purges_expired_entries() {
        let source = Arc::new(
            TestSource::new()
                .with_partner("acme", test_keys::PARTNER_PUBLIC)
                .with_partner("globex", test_keys::STRANGER_PUBLIC),
        );
        let dir = PartnerKeyDirectory::with_ttl(source.clone(), Duration::from_millis(20));
        dir.lookup("acme").await.unwrap();
        dir.lookup("globex").await.unwrap();
        assert_eq!(dir.len(), 2);

        tokio::time::sleep(Duration::from_millis(60)).await;
        source.remove("globex");

        assert_eq!(dir.preload().await.unwrap(), 1);
        assert_eq!(dir.len(), 1);
        assert!(!dir.invalidate("globex"));
    }

    #[tokio::test]
    async fn test_static_source() {
        let record = PartnerRecord {
            username: "acme".into(),
            id: 1,
            partner_id: 2,
            display_name: String::new(),
            public_key: test_keys::PARTNER_PUBLIC.into(),
            digest: None,
        };
        let dir = PartnerKeyDirectory::new(Arc::new(StaticPartnerSource::new(vec![record])));

        assert_eq!(dir.lookup("acme").await.unwrap().partner_id, 2);
        assert_eq!(
            dir.lookup("ghost").await.unwrap_err(),
            DirectoryError::UnknownPartner("ghost".into())
        );
        assert_eq!(dir.preload().await.unwrap(), 1);
    }
}
