//! Classification cache
//!
//! Remembers confident classifications keyed by normalized description so
//! repeated descriptions skip rule matching and AI calls.
//!
//! - Keys: lowercase, punctuation replaced by spaces, whitespace collapsed,
//!   optionally suffixed with the rounded amount (`{key}_{amount}`)
//! - TTL: entries older than the configured TTL miss and are dropped
//! - Size bound: before inserting a new key at capacity, expired entries go
//!   first, then the least-accessed ones
//! - Similarity: Jaccard over token sets finds near-identical descriptions
//!
//! Entries sit behind an `RwLock`; access counters are atomics so lookups
//! only need the read lock.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CacheConfig;
use crate::models::Provenance;

/// Minimum cached confidence for a similarity hit to be trusted
const SIMILAR_MIN_CONFIDENCE: f64 = 0.8;

/// What the cache remembers about a description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedClassification {
    pub category_id: i64,
    pub confidence: f64,
    /// Source that originally produced the classification
    pub source: Provenance,
    pub rule_id: Option<i64>,
}

/// Approximate hit returned by `find_similar`
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarHit {
    pub key: String,
    pub similarity: f64,
    pub value: CachedClassification,
}

/// Snapshot form of one entry, used for persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub normalized: String,
    pub value: CachedClassification,
    pub written_at: DateTime<Utc>,
    pub access_count: u64,
}

/// Aggregate numbers for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_accesses: u64,
    pub avg_confidence: f64,
    /// Most accessed keys, descending
    pub top: Vec<(String, u64)>,
}

struct Slot {
    normalized: String,
    tokens: HashSet<String>,
    value: CachedClassification,
    written_at: DateTime<Utc>,
    accesses: AtomicU64,
}

impl Slot {
    fn new(normalized: String, value: CachedClassification, written_at: DateTime<Utc>, accesses: u64) -> Self {
        let tokens = tokens_of(&normalized);
        Self {
            normalized,
            tokens,
            value,
            written_at,
            accesses: AtomicU64::new(accesses),
        }
    }
}

/// Normalize a description into its cache key form
pub fn normalize_description(description: &str) -> String {
    let cleaned: String = description
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .to_lowercase();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Full cache key, optionally bucketed by rounded amount
pub fn cache_key(description: &str, amount: Option<f64>) -> String {
    let normalized = normalize_description(description);
    match amount {
        Some(a) if a.is_finite() => format!("{}_{}", normalized, a.round() as i64),
        _ => normalized,
    }
}

fn tokens_of(normalized: &str) -> HashSet<String> {
    normalized.split_whitespace().map(str::to_string).collect()
}

/// Jaccard similarity of two token sets
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Thread-safe, bounded classification cache
pub struct ClassificationCache {
    entries: RwLock<HashMap<String, Slot>>,
    ttl: Duration,
    max_entries: usize,
}

impl ClassificationCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_limits(config.ttl(), config.max_entries)
    }

    pub fn with_limits(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Slot>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Slot>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    fn is_expired(&self, slot: &Slot, now: DateTime<Utc>) -> bool {
        now - slot.written_at > self.ttl
    }

    /// Exact lookup; a hit counts as one access
    pub fn get(&self, description: &str, amount: Option<f64>) -> Option<CachedClassification> {
        let key = cache_key(description, amount);
        let now = Utc::now();
        {
            let entries = self.read();
            match entries.get(&key) {
                None => return None,
                Some(slot) if !self.is_expired(slot, now) => {
                    slot.accesses.fetch_add(1, Ordering::Relaxed);
                    return Some(slot.value.clone());
                }
                Some(_) => {}
            }
        }

        // Expired: drop it unless someone refreshed it in the meantime
        let mut entries = self.write();
        if entries
            .get(&key)
            .is_some_and(|slot| self.is_expired(slot, now))
        {
            entries.remove(&key);
            debug!(key = %key, "Cache entry expired");
        }
        None
    }

    /// Insert or overwrite an entry
    ///
    /// Expired entries are purged and the bound is enforced before the
    /// write, so the cache never holds more than `max_entries`.
    pub fn set(&self, description: &str, value: CachedClassification, amount: Option<f64>) {
        let key = cache_key(description, amount);
        let normalized = normalize_description(description);
        if normalized.is_empty() {
            return;
        }
        self.insert_at(key, normalized, value, Utc::now(), None);
    }

    fn insert_at(
        &self,
        key: String,
        normalized: String,
        value: CachedClassification,
        written_at: DateTime<Utc>,
        accesses: Option<u64>,
    ) {
        let mut entries = self.write();
        self.make_room(&mut entries, &key);

        let accesses = accesses.unwrap_or_else(|| {
            entries
                .get(&key)
                .map_or(0, |slot| slot.accesses.load(Ordering::Relaxed))
        });
        entries.insert(key, Slot::new(normalized, value, written_at, accesses));
    }

    /// Drop expired entries, then, if `key` is new and the cache is full,
    /// the least accessed ones (oldest first on ties)
    fn make_room(&self, entries: &mut HashMap<String, Slot>, key: &str) {
        let now = Utc::now();
        let before = entries.len();
        entries.retain(|_, slot| !self.is_expired(slot, now));
        let expired = before - entries.len();

        let mut evicted = 0;
        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            let excess = entries.len() + 1 - self.max_entries;
            let mut ranked: Vec<(u64, DateTime<Utc>, String)> = entries
                .iter()
                .map(|(k, s)| (s.accesses.load(Ordering::Relaxed), s.written_at, k.clone()))
                .collect();
            ranked.sort();
            for (_, _, key) in ranked.into_iter().take(excess) {
                entries.remove(&key);
                evicted += 1;
            }
        }

        if expired > 0 || evicted > 0 {
            debug!(expired, evicted, "Cache cleanup before insert");
        }
    }

    /// Best approximate match for a description
    ///
    /// Accepted only when similarity reaches `threshold` and the cached
    /// confidence exceeds 0.8. A hit counts as one access.
    pub fn find_similar(&self, description: &str, threshold: f64) -> Option<SimilarHit> {
        let tokens = tokens_of(&normalize_description(description));
        if tokens.is_empty() {
            return None;
        }

        let now = Utc::now();
        let entries = self.read();
        let mut best: Option<(&String, &Slot, f64)> = None;

        for (key, slot) in entries.iter() {
            if self.is_expired(slot, now) || slot.value.confidence <= SIMILAR_MIN_CONFIDENCE {
                continue;
            }
            let similarity = jaccard(&tokens, &slot.tokens);
            if similarity < threshold {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_key, best_slot, best_sim)) => {
                    similarity > best_sim
                        || (similarity == best_sim
                            && (slot.value.confidence > best_slot.value.confidence
                                || (slot.value.confidence == best_slot.value.confidence
                                    && key < best_key)))
                }
            };
            if better {
                best = Some((key, slot, similarity));
            }
        }

        best.map(|(key, slot, similarity)| {
            slot.accesses.fetch_add(1, Ordering::Relaxed);
            SimilarHit {
                key: key.clone(),
                similarity,
                value: slot.value.clone(),
            }
        })
    }

    /// Drop one entry
    pub fn invalidate(&self, description: &str, amount: Option<f64>) -> bool {
        let key = cache_key(description, amount);
        self.write().remove(&key).is_some()
    }

    /// Drop every entry whose normalized description contains `fragment`
    pub fn invalidate_containing(&self, fragment: &str) -> usize {
        let needle = normalize_description(fragment);
        if needle.is_empty() {
            return 0;
        }
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, slot| !slot.normalized.contains(&needle));
        before - entries.len()
    }

    /// Drop every entry pointing at a category
    pub fn invalidate_category(&self, category_id: i64) -> usize {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, slot| slot.value.category_id != category_id);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn stats(&self, top: usize) -> CacheStats {
        let entries = self.read();
        let total_accesses = entries
            .values()
            .map(|s| s.accesses.load(Ordering::Relaxed))
            .sum();
        let avg_confidence = if entries.is_empty() {
            0.0
        } else {
            entries.values().map(|s| s.value.confidence).sum::<f64>() / entries.len() as f64
        };
        let mut ranked: Vec<(String, u64)> = entries
            .iter()
            .map(|(k, s)| (k.clone(), s.accesses.load(Ordering::Relaxed)))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(top);

        CacheStats {
            entries: entries.len(),
            total_accesses,
            avg_confidence,
            top: ranked,
        }
    }

    /// Copy of all live entries
    pub fn snapshot(&self) -> Vec<CacheEntry> {
        let now = Utc::now();
        let entries = self.read();
        let mut out: Vec<CacheEntry> = entries
            .iter()
            .filter(|(_, slot)| !self.is_expired(slot, now))
            .map(|(key, slot)| CacheEntry {
                key: key.clone(),
                normalized: slot.normalized.clone(),
                value: slot.value.clone(),
                written_at: slot.written_at,
                access_count: slot.accesses.load(Ordering::Relaxed),
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    /// Load persisted entries, skipping expired ones; returns how many were kept
    pub fn restore(&self, snapshot: Vec<CacheEntry>) -> usize {
        let now = Utc::now();
        let mut restored = 0;
        for entry in snapshot {
            if now - entry.written_at > self.ttl {
                continue;
            }
            self.insert_at(
                entry.key,
                entry.normalized,
                entry.value,
                entry.written_at,
                Some(entry.access_count),
            );
            restored += 1;
        }
        restored
    }

    #[cfg(test)]
    fn backdate(&self, description: &str, amount: Option<f64>, age: Duration) {
        let key = cache_key(description, amount);
        if let Some(slot) = self.write().get_mut(&key) {
            slot.written_at = Utc::now() - age;
        }
    }
}
