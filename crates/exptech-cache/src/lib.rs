//! # ExpTech Cache
//!
//! Versioned cache generations for the ExpTech offline engine.
//!
//! ## Features
//!
//! - **Generations**: versioned, timestamped cache identifiers
//! - **Cache**: request URL → stored response snapshots
//! - **CacheStorage**: named caches with an optional byte budget
//! - **GenerationManager**: open, prune, and clear generations
//!
//! ## Architecture
//!
//! ```text
//! GenerationManager (one active generation per engine)
//!     │
//!     └── CacheStorage
//!             ├── "experience-tech-v1.0.1-100" (stale, pruned)
//!             └── "experience-tech-v1.0.1-200" (current)
//!                     └── URL → CacheEntry
//! ```
//!
//! Stale generations are deleted wholesale on activation; the active
//! generation's name embeds a load-time stamp so it never collides with
//! a previously persisted one.

use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, trace};

// ==================== Errors ====================

/// Errors that can occur in cache storage operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Quota exceeded: {needed} bytes needed, {budget} byte budget")]
    QuotaExceeded { needed: usize, budget: usize },

    #[error("Invalid generation id: {0}")]
    InvalidGenerationId(String),
}

// ==================== Generation Id ====================

/// Identifier of one cache generation.
///
/// Formats as `{prefix}-v{version}-{stamp}`, e.g.
/// `experience-tech-v1.0.1-1718822400000`. The stamp makes a freshly
/// loaded engine's generation distinct from any prior one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenerationId {
    prefix: String,
    version: String,
    stamp: u64,
}

impl GenerationId {
    /// Create a generation id with an explicit stamp.
    pub fn new(prefix: impl Into<String>, version: impl Into<String>, stamp: u64) -> Self {
        Self {
            prefix: prefix.into(),
            version: version.into(),
            stamp,
        }
    }

    /// Create a generation id stamped with the current wall-clock time.
    pub fn now(prefix: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new(prefix, version, exptech_common::unix_time_ms())
    }

    /// Parse a cache name back into a generation id.
    pub fn parse(name: &str) -> Result<Self, CacheError> {
        let invalid = || CacheError::InvalidGenerationId(name.to_string());

        let (rest, stamp) = name.rsplit_once('-').ok_or_else(invalid)?;
        let stamp = stamp.parse::<u64>().map_err(|_| invalid())?;
        let (prefix, version) = rest.rsplit_once("-v").ok_or_else(invalid)?;
        if prefix.is_empty() || version.is_empty() {
            return Err(invalid());
        }

        Ok(Self::new(prefix, version, stamp))
    }

    /// Semantic version component.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Load-time stamp component.
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    /// The cache store name for this generation.
    pub fn cache_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-v{}-{}", self.prefix, self.version, self.stamp)
    }
}

// ==================== Cache Entry ====================

/// A stored response snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method (GET-only by construction).
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response status text.
    pub status_text: String,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Write time (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Approximate in-memory size, used for budget accounting.
    pub fn byte_size(&self) -> usize {
        self.url.len()
            + self.body.len()
            + self
                .headers
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }
}

// ==================== Cache Stats ====================

/// Statistics for one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries.
    pub entries: usize,
    /// Stored bytes.
    pub size_bytes: usize,
    /// Lookup hits.
    pub hits: u64,
    /// Lookup misses.
    pub misses: u64,
}

impl CacheStats {
    /// Hit rate over all lookups.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// ==================== Cache ====================

/// One named cache: URL → stored response snapshot.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<String, CacheEntry>,
    bytes: usize,
    hits: u64,
    misses: u64,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
            bytes: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Match a request URL, recording hit/miss.
    pub fn match_url(&mut self, url: &str) -> Option<&CacheEntry> {
        match self.entries.get(url) {
            Some(entry) => {
                self.hits += 1;
                Some(entry)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert an entry, overwriting any previous one for the same URL.
    pub fn put(&mut self, entry: CacheEntry) {
        if let Some(old) = self.entries.get(&entry.url) {
            self.bytes -= old.byte_size();
        }
        self.bytes += entry.byte_size();
        self.entries.insert(entry.url.clone(), entry);
    }

    /// Delete an entry.
    pub fn delete(&mut self, url: &str) -> bool {
        match self.entries.remove(url) {
            Some(old) => {
                self.bytes -= old.byte_size();
                true
            }
            None => false,
        }
    }

    /// All cached URLs.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stored bytes.
    pub fn byte_size(&self) -> usize {
        self.bytes
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            size_bytes: self.bytes,
            hits: self.hits,
            misses: self.misses,
        }
    }
}

// ==================== Cache Storage ====================

/// Named cache stores with an optional overall byte budget.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
    max_bytes: Option<usize>,
}

impl CacheStorage {
    /// Create unbounded cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create cache storage with a byte budget across all caches.
    pub fn with_budget(max_bytes: usize) -> Self {
        Self {
            caches: HashMap::new(),
            max_bytes: Some(max_bytes),
        }
    }

    /// Open a cache (creates if absent).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Check if a cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache and all its entries.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// All cache names.
    pub fn keys(&self) -> Vec<String> {
        self.caches.keys().cloned().collect()
    }

    /// Total bytes stored across all caches.
    pub fn total_bytes(&self) -> usize {
        self.caches.values().map(|c| c.byte_size()).sum()
    }

    /// Insert an entry into the named cache, enforcing the byte budget.
    pub fn put(&mut self, name: &str, entry: CacheEntry) -> Result<(), CacheError> {
        if let Some(budget) = self.max_bytes {
            let replaced = self
                .caches
                .get(name)
                .and_then(|c| c.entries.get(&entry.url))
                .map(|old| old.byte_size())
                .unwrap_or(0);
            let needed = self.total_bytes() - replaced + entry.byte_size();
            if needed > budget {
                return Err(CacheError::QuotaExceeded { needed, budget });
            }
        }
        self.open(name).put(entry);
        Ok(())
    }
}

// ==================== Generation Manager ====================

/// Owns the active generation and its store.
///
/// All entry reads and writes go through the manager; other components
/// never touch the store directly.
#[derive(Debug, Clone)]
pub struct GenerationManager {
    id: GenerationId,
    storage: Arc<RwLock<CacheStorage>>,
}

impl GenerationManager {
    /// Create a manager for the given generation over shared storage.
    pub fn new(id: GenerationId, storage: Arc<RwLock<CacheStorage>>) -> Self {
        Self { id, storage }
    }

    /// The active generation id.
    pub fn id(&self) -> &GenerationId {
        &self.id
    }

    /// Shared handle to the underlying storage.
    pub fn storage(&self) -> Arc<RwLock<CacheStorage>> {
        Arc::clone(&self.storage)
    }

    /// Open (create if absent) the active generation's store.
    pub async fn open_current(&self) -> Result<(), CacheError> {
        let mut storage = self.storage.write().await;
        storage.open(&self.id.cache_name());
        trace!(generation = %self.id, "opened current generation");
        Ok(())
    }

    /// Delete every store whose name differs from the active generation.
    ///
    /// Idempotent: a second run finds nothing left to delete. Returns the
    /// names that were removed.
    pub async fn prune_stale(&self) -> Result<Vec<String>, CacheError> {
        let current = self.id.cache_name();
        let mut storage = self.storage.write().await;

        let stale: Vec<String> = storage
            .keys()
            .into_iter()
            .filter(|name| *name != current)
            .collect();

        for name in &stale {
            storage.delete(name);
            debug!(stale = %name, current = %current, "pruned stale generation");
        }

        Ok(stale)
    }

    /// Delete every store, the active generation's included.
    ///
    /// The generation id itself is unaffected; it is not derived from
    /// cache contents. Returns the number of stores removed.
    pub async fn clear_all(&self) -> Result<usize, CacheError> {
        let mut storage = self.storage.write().await;
        let names = storage.keys();
        for name in &names {
            storage.delete(name);
        }
        debug!(removed = names.len(), "cleared all cache generations");
        Ok(names.len())
    }

    /// Write an entry into the active generation.
    pub async fn put(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let mut storage = self.storage.write().await;
        storage.put(&self.id.cache_name(), entry)
    }

    /// Look up an entry in the active generation by exact URL.
    pub async fn lookup(&self, url: &str) -> Option<CacheEntry> {
        let mut storage = self.storage.write().await;
        if !storage.has(&self.id.cache_name()) {
            return None;
        }
        storage.open(&self.id.cache_name()).match_url(url).cloned()
    }

    /// Statistics for the active generation's store, if it exists.
    pub async fn stats(&self) -> Option<CacheStats> {
        let storage = self.storage.read().await;
        storage
            .caches
            .get(&self.id.cache_name())
            .map(|c| c.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(url: &str, body: &[u8]) -> CacheEntry {
        CacheEntry {
            url: url.to_string(),
            method: "GET".to_string(),
            status: 200,
            status_text: "OK".to_string(),
            headers: HashMap::new(),
            body: body.to_vec(),
            cached_at: 0,
        }
    }

    fn manager(id: GenerationId) -> GenerationManager {
        GenerationManager::new(id, Arc::new(RwLock::new(CacheStorage::new())))
    }

    #[test]
    fn test_generation_id_format() {
        let id = GenerationId::new("experience-tech", "1.0.1", 1718822400000);
        assert_eq!(id.to_string(), "experience-tech-v1.0.1-1718822400000");
    }

    #[test]
    fn test_generation_id_parse_round_trip() {
        let id = GenerationId::new("experience-tech", "1.0.1", 42);
        let parsed = GenerationId::parse(&id.cache_name()).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.version(), "1.0.1");
        assert_eq!(parsed.stamp(), 42);
    }

    #[test]
    fn test_generation_id_parse_rejects_garbage() {
        assert!(GenerationId::parse("no-version-here").is_err());
        assert!(GenerationId::parse("").is_err());
        assert!(GenerationId::parse("prefix-v1.0-notanumber").is_err());
    }

    #[test]
    fn test_generation_id_now_uses_clock_stamp() {
        let before = exptech_common::unix_time_ms();
        let id = GenerationId::now("app", "1.0.0");
        assert!(id.stamp() >= before);
    }

    #[test]
    fn test_generation_ids_distinct_across_loads() {
        let a = GenerationId::new("app", "1.0.0", 100);
        let b = GenerationId::new("app", "1.0.0", 200);
        assert_ne!(a.cache_name(), b.cache_name());
    }

    #[test]
    fn test_cache_put_and_match() {
        let mut cache = Cache::new("v1");
        cache.put(entry("/index.html", b"<html>"));

        assert!(cache.match_url("/index.html").is_some());
        assert!(cache.match_url("/other.html").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_cache_byte_accounting_on_overwrite() {
        let mut cache = Cache::new("v1");
        cache.put(entry("/a", b"aaaaaaaaaa"));
        let first = cache.byte_size();

        cache.put(entry("/a", b"bb"));
        assert_eq!(cache.byte_size(), first - 10 + 2);
        assert_eq!(cache.len(), 1);

        assert!(cache.delete("/a"));
        assert_eq!(cache.byte_size(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_storage_open_delete() {
        let mut storage = CacheStorage::new();
        assert!(!storage.has("v1"));

        storage.open("v1");
        assert!(storage.has("v1"));

        assert!(storage.delete("v1"));
        assert!(!storage.has("v1"));
    }

    #[test]
    fn test_storage_budget_enforced() {
        let mut storage = CacheStorage::with_budget(16);
        storage
            .put("v1", entry("/a", b"123456"))
            .expect("within budget");

        let err = storage.put("v1", entry("/b", b"0123456789abcdef")).unwrap_err();
        assert!(matches!(err, CacheError::QuotaExceeded { .. }));

        // The failed write left the store unchanged.
        assert_eq!(storage.open("v1").len(), 1);
    }

    #[test]
    fn test_storage_budget_allows_replacement() {
        let mut storage = CacheStorage::with_budget(16);
        storage.put("v1", entry("/a", b"0123456789")).unwrap();
        // Replacing /a frees its old bytes first.
        storage.put("v1", entry("/a", b"0123456789abcd")).unwrap();
        assert_eq!(storage.open("v1").len(), 1);
    }

    #[tokio::test]
    async fn test_prune_stale_leaves_only_current() {
        let id = GenerationId::new("experience-tech", "1.0.1", 200);
        let mgr = manager(id.clone());

        {
            let storage = mgr.storage();
            let mut storage = storage.write().await;
            storage.open("experience-tech-v1.0.1-100");
        }
        mgr.open_current().await.unwrap();

        let removed = mgr.prune_stale().await.unwrap();
        assert_eq!(removed, vec!["experience-tech-v1.0.1-100".to_string()]);

        let storage = mgr.storage();
        let storage = storage.read().await;
        assert_eq!(storage.keys(), vec![id.cache_name()]);
    }

    #[tokio::test]
    async fn test_prune_stale_idempotent() {
        let mgr = manager(GenerationId::new("app", "2.0.0", 7));
        mgr.open_current().await.unwrap();

        {
            let storage = mgr.storage();
            let mut storage = storage.write().await;
            storage.open("app-v1.0.0-1");
            storage.open("app-v1.9.0-3");
        }

        assert_eq!(mgr.prune_stale().await.unwrap().len(), 2);
        assert_eq!(mgr.prune_stale().await.unwrap().len(), 0);

        let storage = mgr.storage();
        assert_eq!(storage.read().await.keys().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_all_keeps_generation_id() {
        let id = GenerationId::new("app", "1.0.0", 99);
        let mgr = manager(id.clone());
        mgr.open_current().await.unwrap();
        mgr.put(entry("/a", b"x")).await.unwrap();

        assert_eq!(mgr.clear_all().await.unwrap(), 1);
        assert!(mgr.lookup("/a").await.is_none());
        // Identity is not derived from cache contents.
        assert_eq!(mgr.id(), &id);
    }

    #[tokio::test]
    async fn test_put_then_lookup_round_trip() {
        let mgr = manager(GenerationId::new("app", "1.0.0", 1));
        mgr.open_current().await.unwrap();

        mgr.put(entry("/data.json", b"{}")).await.unwrap();
        let found = mgr.lookup("/data.json").await.expect("cached");
        assert_eq!(found.body, b"{}");
        assert_eq!(found.status, 200);

        assert!(mgr.lookup("/missing.json").await.is_none());
    }

    #[tokio::test]
    async fn test_stats_absent_before_open() {
        let mgr = manager(GenerationId::new("app", "1.0.0", 1));
        assert!(mgr.stats().await.is_none());

        mgr.open_current().await.unwrap();
        assert_eq!(mgr.stats().await.unwrap().entries, 0);
    }

    #[test]
    fn test_cache_entry_serde() {
        let e = entry("/index.html", b"<html>");
        let json = serde_json::to_string(&e).unwrap();
        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.url, "/index.html");
        assert_eq!(back.body, b"<html>");
    }
}
