//! Result caching for optimized queries
//!
//! Keys are SHA-256 digests of a statistical fingerprint of the query vector
//! plus the scalar parameters that change results. Entries expire after the
//! configured TTL and the globally oldest entry is evicted once the size limit
//! is reached.

use crate::config::CacheConfig;
use crate::errors::{CacheError, CacheResult};
use crate::optimization::statistics::QueryStatistics;
use crate::query::{GraphType, Query};
use crate::sanitize::Sanitize;
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Components sampled from each end and the middle of a vector
const FINGERPRINT_SAMPLES: usize = 3;

/// Cached value with its insertion time
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub inserted_at: Instant,
    pub timestamp: DateTime<Utc>,
}

impl<V> CacheEntry<V> {
    pub fn age(&self) -> Duration {
        self.inserted_at.elapsed()
    }
}

/// Cache counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

/// TTL and size bounded result cache
pub struct ResultCache<V> {
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    ttl: Duration,
    enabled: bool,
    statistics: Arc<QueryStatistics>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<V: Sanitize + Clone> ResultCache<V> {
    pub fn new(config: &CacheConfig, statistics: Arc<QueryStatistics>) -> Self {
        let capacity = NonZeroUsize::new(config.size_limit).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl: Duration::from_secs_f64(config.ttl_secs.max(0.0)),
            enabled: config.enabled,
            statistics,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Present and not older than the TTL
    pub fn is_valid(&self, key: &str) -> bool {
        self.entries
            .lock()
            .peek(key)
            .map_or(false, |entry| entry.age() <= self.ttl)
    }

    /// Fetch a cached value; stale entries are purged and reported as expired
    pub fn get(&self, key: &str) -> CacheResult<V> {
        let mut entries = self.entries.lock();
        let age = entries.peek(key).map(CacheEntry::age);
        match age {
            Some(age) if age <= self.ttl => {
                let value = entries
                    .peek(key)
                    .map(|entry| entry.value.clone())
                    .ok_or_else(|| CacheError::Miss {
                        key: key.to_string(),
                    })?;
                drop(entries);
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.statistics.record_cache_hit();
                trace!(key = %key, "Cache hit");
                Ok(value)
            }
            Some(age) => {
                entries.pop(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::Expired {
                    key: key.to_string(),
                    age_ms: age.as_millis() as u64,
                })
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::Miss {
                    key: key.to_string(),
                })
            }
        }
    }

    /// Store a sanitized copy of `value`
    pub fn put(&self, key: &str, value: V) {
        if !self.enabled {
            return;
        }
        let entry = CacheEntry {
            value: value.sanitize(),
            inserted_at: Instant::now(),
            timestamp: Utc::now(),
        };
        // Lookups only peek, so LRU order is insertion order
        if let Some((evicted, _)) = self.entries.lock().push(key.to_string(), entry) {
            if evicted != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(evicted = %evicted, "Evicted oldest cache entry");
            }
        }
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries.lock().pop(key).map(|entry| entry.value)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        CacheStats {
            entries: entries.len(),
            capacity: entries.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

/// Derive the cache key for a query against one graph type
///
/// The full vector never enters the key, only its statistical fingerprint.
/// Vectors with non-finite components fall back to a coarser key built from
/// the scalar parameters and the vector length.
pub fn cache_key(query: &Query, graph_type: GraphType) -> String {
    let mut material = String::new();
    match query.query_vector.as_deref() {
        Some(vector) => match vector_fingerprint(vector) {
            Some(fingerprint) => material.push_str(&fingerprint),
            None => {
                let _ = write!(material, "coarse:len={}", vector.len());
            }
        },
        None => material.push_str("novector"),
    }

    let mut edge_types: Vec<&str> = query.edge_types().iter().map(String::as_str).collect();
    edge_types.sort_unstable();
    let _ = write!(
        material,
        "|edges={}|top_k={}|depth={}|min_sim={:.6}|graph={}",
        edge_types.join(","),
        query.top_k(),
        query.max_depth(),
        query.min_similarity(),
        graph_type,
    );
    if let Some(text) = &query.query_text {
        let _ = write!(material, "|text={}", text);
    }
    if !query.entity_ids.is_empty() {
        let ids: Vec<&str> = query.entity_ids.iter().map(String::as_str).collect();
        let _ = write!(material, "|entities={}", ids.join(","));
    }
    for (label, entity) in [("source", &query.source_entity), ("target", &query.target_entity)] {
        if let Some(entity) = entity {
            let _ = write!(material, "|{}={}", label, entity);
        }
    }

    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    hex::encode(hasher.finalize())
}

/// Length, mean, min, max, std-dev and first/middle/last components
fn vector_fingerprint(vector: &[f32]) -> Option<String> {
    if vector.is_empty() || vector.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let n = vector.len() as f64;
    let mean = vector.iter().map(|v| *v as f64).sum::<f64>() / n;
    let variance = vector.iter().map(|v| (*v as f64 - mean).powi(2)).sum::<f64>() / n;
    let min = vector.iter().copied().fold(f32::INFINITY, f32::min);
    let max = vector.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    let k = FINGERPRINT_SAMPLES.min(vector.len());
    let mid = vector.len() / 2;
    let mid_start = mid.saturating_sub(k / 2).min(vector.len() - k);
    let samples = vector[..k]
        .iter()
        .chain(&vector[mid_start..mid_start + k])
        .chain(&vector[vector.len() - k..])
        .map(|v| format!("{:.6}", v))
        .collect::<Vec<_>>()
        .join(",");

    Some(format!(
        "len={}|mean={:.6}|min={:.6}|max={:.6}|std={:.6}|samples={}",
        vector.len(),
        mean,
        min,
        max,
        variance.sqrt(),
        samples
    ))
}
