//! Tiered in-memory cache with per-namespace TTL and size bounds.
//!
//! Each namespace is a sharded map, so writers to different keys never
//! block each other and writes to the same key are serialized by the shard.
//! Entries expire lazily on read and eagerly on sweep. Over the cap, the
//! least recently touched entry is evicted first.
//!
//! The classification namespace can be backed by the `classification_cache`
//! table: misses consult the table, inserts write through, sweeps prune.

pub mod policy;
pub mod sweeper;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::db::{self, SharedConnection};
use crate::models::{ClassificationResult, ConflictRecord, ParseResult, RecordSource};
use crate::pipeline::reconcile::DuplicateAssessment;
use crate::pipeline_config::{CacheConfig, NamespaceConfig};

pub use policy::{company_tag, identity_tags, title_tag, ttl_for};
pub use sweeper::{spawn_sweeper, SweeperHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Classification,
    Parse,
    ManualLookup,
    ConflictCheck,
    DuplicateCheck,
}

impl Namespace {
    pub const ALL: [Namespace; 5] = [
        Namespace::Classification,
        Namespace::Parse,
        Namespace::ManualLookup,
        Namespace::ConflictCheck,
        Namespace::DuplicateCheck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::Parse => "parse",
            Self::ManualLookup => "manual_lookup",
            Self::ConflictCheck => "conflict_check",
            Self::DuplicateCheck => "duplicate_check",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// What a cache entry holds; one variant per namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Classification(ClassificationResult),
    Parse(ParseResult),
    /// Candidate record ids for a manual company+title lookup.
    Records(Vec<Uuid>),
    Conflicts(Vec<ConflictRecord>),
    Duplicate(DuplicateAssessment),
}

impl CacheValue {
    pub fn into_classification(self) -> Option<ClassificationResult> {
        match self {
            Self::Classification(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_parse(self) -> Option<ParseResult> {
        match self {
            Self::Parse(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_records(self) -> Option<Vec<Uuid>> {
        match self {
            Self::Records(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_conflicts(self) -> Option<Vec<ConflictRecord>> {
        match self {
            Self::Conflicts(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_duplicate(self) -> Option<DuplicateAssessment> {
        match self {
            Self::Duplicate(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: CacheValue,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub ttl: Duration,
    pub source: RecordSource,
    /// Company/title tags used for invalidation on edits.
    pub tags: Vec<String>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at);
        match age.to_std() {
            Ok(age) => age >= self.ttl,
            // Created "in the future" relative to `now`.
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceStats {
    pub namespace: Namespace,
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

#[derive(Default)]
struct NamespaceStore {
    entries: DashMap<String, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

pub struct TieredCache {
    config: CacheConfig,
    stores: [NamespaceStore; 5],
    persistence: Option<SharedConnection>,
}

impl TieredCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            stores: Default::default(),
            persistence: None,
        }
    }

    /// Cache whose classification namespace writes through to `conn`.
    pub fn with_persistence(config: CacheConfig, conn: SharedConnection) -> Self {
        let persist = config.persist_classifications;
        let mut cache = Self::new(config);
        if persist {
            cache.persistence = Some(conn);
        }
        cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn store(&self, ns: Namespace) -> &NamespaceStore {
        &self.stores[ns.index()]
    }

    fn namespace_config(&self, ns: Namespace) -> &NamespaceConfig {
        match ns {
            Namespace::Classification => &self.config.classification,
            Namespace::Parse => &self.config.parse,
            Namespace::ManualLookup => &self.config.manual_lookup,
            Namespace::ConflictCheck => &self.config.conflict_check,
            Namespace::DuplicateCheck => &self.config.duplicate_check,
        }
    }

    // ── Reads ─────────────────────────────────────────────────

    pub fn get(&self, ns: Namespace, key: &str) -> Option<CacheValue> {
        self.get_at(ns, key, Utc::now())
    }

    pub fn get_at(&self, ns: Namespace, key: &str, now: DateTime<Utc>) -> Option<CacheValue> {
        let store = self.store(ns);

        if let Some(mut entry) = store.entries.get_mut(key) {
            if !entry.is_expired(now) {
                entry.last_access = now;
                store.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        }

        if store.entries.remove_if(key, |_, e| e.is_expired(now)).is_some() {
            store.expirations.fetch_add(1, Ordering::Relaxed);
        }

        if ns == Namespace::Classification {
            if let Some(value) = self.hydrate_classification(key, now) {
                store.hits.fetch_add(1, Ordering::Relaxed);
                return Some(value);
            }
        }

        store.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn hydrate_classification(&self, key: &str, now: DateTime<Utc>) -> Option<CacheValue> {
        let conn = self.persistence.as_ref()?;
        let ttl = self.config.classification.ttl();
        let min_created_at_ms = now.timestamp_millis() - ttl.as_millis() as i64;

        let row = {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            db::get_persisted_classification(&conn, key, min_created_at_ms)
        };

        match row {
            Ok(Some(persisted)) => {
                let created_at = DateTime::from_timestamp_millis(persisted.created_at_ms).unwrap_or(now);
                let value = CacheValue::Classification(persisted.result);
                self.put(
                    Namespace::Classification,
                    key,
                    CacheEntry {
                        value: value.clone(),
                        created_at,
                        last_access: now,
                        ttl,
                        source: RecordSource::AutoInferred,
                        tags: Vec::new(),
                    },
                );
                tracing::debug!("Classification hydrated from disk");
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Persisted classification lookup failed");
                None
            }
        }
    }

    // ── Writes ────────────────────────────────────────────────

    /// Insert `value` with the TTL implied by `source`. Returns false when
    /// the source is never cached.
    pub fn insert(
        &self,
        ns: Namespace,
        key: &str,
        value: CacheValue,
        source: RecordSource,
        tags: Vec<String>,
    ) -> bool {
        self.insert_at(ns, key, value, source, tags, Utc::now())
    }

    pub fn insert_at(
        &self,
        ns: Namespace,
        key: &str,
        value: CacheValue,
        source: RecordSource,
        tags: Vec<String>,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(ttl) = ttl_for(self.namespace_config(ns), source, &self.config) else {
            return false;
        };

        if let (Namespace::Classification, CacheValue::Classification(result), Some(conn)) =
            (ns, &value, &self.persistence)
        {
            let persisted = db::PersistedClassification {
                content_hash: key.to_string(),
                result: *result,
                created_at_ms: now.timestamp_millis(),
            };
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = db::upsert_persisted_classification(&conn, &persisted) {
                tracing::warn!(error = %e, "Failed to persist classification");
            }
        }

        self.put(
            ns,
            key,
            CacheEntry {
                value,
                created_at: now,
                last_access: now,
                ttl,
                source,
                tags,
            },
        );
        true
    }

    fn put(&self, ns: Namespace, key: &str, entry: CacheEntry) {
        let store = self.store(ns);
        store.entries.insert(key.to_string(), entry);

        let max = self.namespace_config(ns).max_entries;
        while store.entries.len() > max {
            let oldest = store
                .entries
                .iter()
                .min_by_key(|e| e.value().last_access)
                .map(|e| e.key().clone());
            match oldest {
                Some(victim) => {
                    if store.entries.remove(&victim).is_some() {
                        store.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => break,
            }
        }
    }

    pub fn remove(&self, ns: Namespace, key: &str) {
        self.store(ns).entries.remove(key);
        if let (Namespace::Classification, Some(conn)) = (ns, &self.persistence) {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = db::delete_persisted_classification(&conn, key) {
                tracing::warn!(error = %e, "Failed to delete persisted classification");
            }
        }
    }

    // ── Invalidation ──────────────────────────────────────────

    /// Drop every entry, in every namespace, tagged with this company or
    /// title. Returns the number of entries removed.
    pub fn invalidate_company_title(&self, company: Option<&str>, title: Option<&str>) -> usize {
        self.invalidate_company_title_in(&Namespace::ALL, company, title)
    }

    /// `invalidate_company_title` restricted to `namespaces`.
    pub fn invalidate_company_title_in(
        &self,
        namespaces: &[Namespace],
        company: Option<&str>,
        title: Option<&str>,
    ) -> usize {
        let tags = identity_tags(company, title);
        if tags.is_empty() {
            return 0;
        }
        let mut removed = 0usize;
        for store in namespaces.iter().map(|ns| self.store(*ns)) {
            store.entries.retain(|_, entry| {
                let hit = entry.tags.iter().any(|t| tags.contains(t));
                if hit {
                    removed += 1;
                }
                !hit
            });
        }
        if removed > 0 {
            tracing::debug!(removed, "Cache entries invalidated by identity");
        }
        removed
    }

    /// Remove all expired entries, and expired persisted rows.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0usize;
        for store in &self.stores {
            let mut expired = 0u64;
            store.entries.retain(|_, entry| {
                let keep = !entry.is_expired(now);
                if !keep {
                    expired += 1;
                }
                keep
            });
            store.expirations.fetch_add(expired, Ordering::Relaxed);
            removed += expired as usize;
        }

        if let Some(conn) = &self.persistence {
            let cutoff = now.timestamp_millis() - self.config.classification.ttl().as_millis() as i64;
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            match db::prune_persisted_classifications(&conn, cutoff) {
                Ok(pruned) if pruned > 0 => tracing::debug!(pruned, "Expired classifications pruned"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Failed to prune persisted classifications"),
            }
        }

        if removed > 0 {
            tracing::debug!(removed, "Cache sweep removed expired entries");
        }
        removed
    }

    pub fn len(&self, ns: Namespace) -> usize {
        self.store(ns).entries.len()
    }

    pub fn stats(&self) -> Vec<NamespaceStats> {
        Namespace::ALL
            .iter()
            .map(|ns| {
                let store = self.store(*ns);
                NamespaceStats {
                    namespace: *ns,
                    size: store.entries.len(),
                    hits: store.hits.load(Ordering::Relaxed),
                    misses: store.misses.load(Ordering::Relaxed),
                    evictions: store.evictions.load(Ordering::Relaxed),
                    expirations: store.expirations.load(Ordering::Relaxed),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::models::RiskLevel;

    fn classification(job: bool) -> CacheValue {
        CacheValue::Classification(ClassificationResult {
            is_job_related: job,
            risk_level: RiskLevel::Low,
        })
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn small_config(max_entries: usize) -> CacheConfig {
        let mut config = CacheConfig::default();
        config.parse = NamespaceConfig {
            ttl_secs: 60,
            max_entries,
        };
        config
    }

    #[test]
    fn present_before_ttl_absent_after() {
        let cache = TieredCache::new(small_config(10));
        let ttl = chrono::Duration::seconds(60);
        let eps = chrono::Duration::milliseconds(1);
        cache.insert_at(Namespace::Parse, "k", classification(true), RecordSource::AutoInferred, vec![], t0());

        assert!(cache.get_at(Namespace::Parse, "k", t0() + ttl - eps).is_some());
        assert!(cache.get_at(Namespace::Parse, "k", t0() + ttl + eps).is_none());
        assert_eq!(cache.len(Namespace::Parse), 0);
    }

    #[test]
    fn manual_created_not_stored() {
        let cache = TieredCache::new(CacheConfig::default());
        let stored = cache.insert(
            Namespace::ManualLookup,
            "k",
            CacheValue::Records(vec![]),
            RecordSource::ManualCreated,
            vec![],
        );
        assert!(!stored);
        assert!(cache.get(Namespace::ManualLookup, "k").is_none());
    }

    #[test]
    fn evicts_least_recently_touched() {
        let cache = TieredCache::new(small_config(2));
        let s = chrono::Duration::seconds(1);
        cache.insert_at(Namespace::Parse, "a", classification(true), RecordSource::AutoInferred, vec![], t0());
        cache.insert_at(Namespace::Parse, "b", classification(true), RecordSource::AutoInferred, vec![], t0() + s);
        // Touch "a" so "b" becomes the oldest.
        assert!(cache.get_at(Namespace::Parse, "a", t0() + s * 2).is_some());
        cache.insert_at(Namespace::Parse, "c", classification(true), RecordSource::AutoInferred, vec![], t0() + s * 3);

        assert_eq!(cache.len(Namespace::Parse), 2);
        assert!(cache.get_at(Namespace::Parse, "a", t0() + s * 4).is_some());
        assert!(cache.get_at(Namespace::Parse, "b", t0() + s * 4).is_none());
        assert!(cache.get_at(Namespace::Parse, "c", t0() + s * 4).is_some());

        let parse = cache.stats().into_iter().find(|s| s.namespace == Namespace::Parse).unwrap();
        assert_eq!(parse.evictions, 1);
    }

    #[test]
    fn namespaces_are_isolated() {
        let cache = TieredCache::new(CacheConfig::default());
        cache.insert(Namespace::Parse, "k", classification(true), RecordSource::AutoInferred, vec![]);
        assert!(cache.get(Namespace::DuplicateCheck, "k").is_none());
        assert!(cache.get(Namespace::Parse, "k").is_some());
    }

    #[test]
    fn invalidation_hits_every_namespace_by_tag() {
        let cache = TieredCache::new(CacheConfig::default());
        let tags = identity_tags(Some("Acme"), Some("Data Analyst"));
        cache.insert(Namespace::Parse, "p", classification(true), RecordSource::AutoInferred, tags.clone());
        cache.insert(
            Namespace::DuplicateCheck,
            "d",
            CacheValue::Duplicate(DuplicateAssessment::none()),
            RecordSource::AutoInferred,
            vec![title_tag("data analyst")],
        );
        cache.insert(
            Namespace::Parse,
            "other",
            classification(true),
            RecordSource::AutoInferred,
            identity_tags(Some("Globex"), None),
        );

        let removed = cache.invalidate_company_title(Some("ACME"), Some("Data  Analyst"));
        assert_eq!(removed, 2);
        assert!(cache.get(Namespace::Parse, "p").is_none());
        assert!(cache.get(Namespace::DuplicateCheck, "d").is_none());
        assert!(cache.get(Namespace::Parse, "other").is_some());
    }

    #[test]
    fn scoped_invalidation_leaves_other_namespaces() {
        let cache = TieredCache::new(CacheConfig::default());
        let tags = identity_tags(Some("Acme"), None);
        cache.insert(Namespace::Parse, "p", classification(true), RecordSource::AutoInferred, tags.clone());
        cache.insert(
            Namespace::DuplicateCheck,
            "d",
            CacheValue::Duplicate(DuplicateAssessment::none()),
            RecordSource::AutoInferred,
            tags,
        );

        let removed = cache.invalidate_company_title_in(&[Namespace::DuplicateCheck], Some("acme"), None);
        assert_eq!(removed, 1);
        assert!(cache.get(Namespace::Parse, "p").is_some());
        assert!(cache.get(Namespace::DuplicateCheck, "d").is_none());
    }

    #[test]
    fn sweep_removes_only_expired() {
        let cache = TieredCache::new(small_config(10));
        cache.insert_at(Namespace::Parse, "old", classification(true), RecordSource::AutoInferred, vec![], t0());
        cache.insert_at(
            Namespace::Parse,
            "new",
            classification(true),
            RecordSource::AutoInferred,
            vec![],
            t0() + chrono::Duration::seconds(50),
        );
        let removed = cache.sweep_at(t0() + chrono::Duration::seconds(70));
        assert_eq!(removed, 1);
        assert_eq!(cache.len(Namespace::Parse), 1);
    }

    #[test]
    fn stats_count_hits_and_misses() {
        let cache = TieredCache::new(CacheConfig::default());
        cache.insert(Namespace::Parse, "k", classification(true), RecordSource::AutoInferred, vec![]);
        cache.get(Namespace::Parse, "k");
        cache.get(Namespace::Parse, "missing");
        let parse = cache.stats().into_iter().find(|s| s.namespace == Namespace::Parse).unwrap();
        assert_eq!(parse.hits, 1);
        assert_eq!(parse.misses, 1);
        assert_eq!(parse.size, 1);
    }

    #[test]
    fn classification_survives_restart_via_disk() {
        let conn: SharedConnection = Arc::new(Mutex::new(open_memory_database().unwrap()));
        let first = TieredCache::with_persistence(CacheConfig::default(), conn.clone());
        first.insert(Namespace::Classification, "h1", classification(true), RecordSource::AutoInferred, vec![]);

        let second = TieredCache::with_persistence(CacheConfig::default(), conn);
        assert_eq!(second.len(Namespace::Classification), 0);
        let hit = second.get(Namespace::Classification, "h1").and_then(CacheValue::into_classification);
        assert_eq!(hit.map(|c| c.is_job_related), Some(true));
        assert_eq!(second.len(Namespace::Classification), 1);
    }

    #[test]
    fn expired_disk_rows_are_not_hydrated_and_are_pruned() {
        let conn: SharedConnection = Arc::new(Mutex::new(open_memory_database().unwrap()));
        let cache = TieredCache::with_persistence(CacheConfig::default(), conn.clone());
        cache.insert_at(Namespace::Classification, "h1", classification(true), RecordSource::AutoInferred, vec![], t0());

        let later = t0() + chrono::Duration::hours(25);
        let fresh = TieredCache::with_persistence(CacheConfig::default(), conn.clone());
        assert!(fresh.get_at(Namespace::Classification, "h1", later).is_none());

        fresh.sweep_at(later);
        let guard = conn.lock().unwrap();
        let row = db::get_persisted_classification(&guard, "h1", 0).unwrap();
        assert!(row.is_none());
    }
}
