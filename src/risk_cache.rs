//! Time-boxed cache of merchant risk analyses
//!
//! Entries expire lazily on read, and inserts sweep out everything expired at
//! most once per TTL. Invalidation is by exact identity through a reverse
//! index from each merchant/user id to the keys that mention it.

use crate::risk_analysis::RiskAnalysisResult;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub merchant_id: String,
    pub user_id: Option<String>,
}

impl CacheKey {
    pub fn new(merchant_id: &str, user_id: Option<&str>) -> Self {
        Self {
            merchant_id: merchant_id.to_string(),
            user_id: user_id.map(str::to_string),
        }
    }

    fn identities(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.merchant_id.as_str()).chain(self.user_id.as_deref())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: RiskAnalysisResult,
    computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub invalidations: u64,
}

#[derive(Debug, Clone)]
pub struct RiskCache {
    entries: HashMap<CacheKey, CacheEntry>,
    by_identity: HashMap<String, HashSet<CacheKey>>,
    ttl: Duration,
    last_sweep: Option<DateTime<Utc>>,
    stats: CacheStats,
}

impl RiskCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            by_identity: HashMap::new(),
            ttl,
            last_sweep: None,
            stats: CacheStats::default(),
        }
    }

    /// Fetch a fresh entry, dropping it if it has outlived the TTL
    pub fn get(
        &mut self,
        merchant_id: &str,
        user_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<RiskAnalysisResult> {
        let key = CacheKey::new(merchant_id, user_id);

        let computed_at = match self.entries.get(&key) {
            Some(entry) => entry.computed_at,
            None => {
                self.stats.misses += 1;
                return None;
            }
        };

        if now.signed_duration_since(computed_at) >= self.ttl {
            self.remove(&key);
            self.stats.expirations += 1;
            self.stats.misses += 1;
            return None;
        }

        self.stats.hits += 1;
        self.entries.get(&key).map(|entry| entry.result.clone())
    }

    /// Publish a fully computed result
    pub fn insert(&mut self, result: RiskAnalysisResult, now: DateTime<Utc>) {
        let sweep_due = match self.last_sweep {
            Some(last) => now.signed_duration_since(last) >= self.ttl,
            None => true,
        };
        if sweep_due {
            self.purge_expired(now);
            self.last_sweep = Some(now);
        }

        let key = CacheKey::new(&result.merchant_id, result.user_id.as_deref());
        for identity in key.identities() {
            self.by_identity
                .entry(identity.to_string())
                .or_default()
                .insert(key.clone());
        }
        self.entries.insert(
            key,
            CacheEntry {
                result,
                computed_at: now,
            },
        );
    }

    /// Drop every entry that has outlived the TTL
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl;
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| now.signed_duration_since(entry.computed_at) >= ttl)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        self.stats.expirations += expired.len() as u64;
        expired.len()
    }

    /// Drop every entry whose merchant or user is exactly `identity`
    pub fn invalidate(&mut self, identity: &str) -> usize {
        let Some(keys) = self.by_identity.remove(identity) else {
            return 0;
        };

        let mut removed = 0;
        for key in keys {
            if self.remove(&key) {
                removed += 1;
            }
        }
        self.stats.invalidations += removed as u64;
        removed
    }

    fn remove(&mut self, key: &CacheKey) -> bool {
        let existed = self.entries.remove(key).is_some();
        for identity in key.identities() {
            if let Some(keys) = self.by_identity.get_mut(identity) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_identity.remove(identity);
                }
            }
        }
        existed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_identity.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            ..self.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_for(merchant_id: &str, user_id: Option<&str>) -> RiskAnalysisResult {
        let mut result = RiskAnalysisResult::unknown_merchant(merchant_id, user_id);
        result.factors = vec![format!("cached for {}", merchant_id)];
        result
    }

    #[test]
    fn test_hit_and_miss() {
        let mut cache = RiskCache::new(Duration::hours(1));
        let now = Utc::now();

        assert!(cache.get("M1", None, now).is_none());
        cache.insert(result_for("M1", None), now);

        let hit = cache.get("M1", None, now + Duration::minutes(10)).unwrap();
        assert_eq!(hit.factors, vec!["cached for M1".to_string()]);

        // User context is part of the key
        assert!(cache.get("M1", Some("U1"), now).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_ttl_expiry() {
        let mut cache = RiskCache::new(Duration::seconds(3600));
        let now = Utc::now();
        cache.insert(result_for("M1", Some("U1")), now);

        assert!(cache
            .get("M1", Some("U1"), now + Duration::seconds(3599))
            .is_some());
        assert!(cache
            .get("M1", Some("U1"), now + Duration::seconds(3600))
            .is_none());

        // Expired entries are dropped, index included
        assert!(cache.is_empty());
        assert_eq!(cache.invalidate("U1"), 0);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_invalidate_by_merchant_or_user() {
        let mut cache = RiskCache::new(Duration::hours(1));
        let now = Utc::now();

        cache.insert(result_for("M1", None), now);
        cache.insert(result_for("M1", Some("U1")), now);
        cache.insert(result_for("M2", Some("U1")), now);
        cache.insert(result_for("M2", Some("U2")), now);

        assert_eq!(cache.invalidate("U1"), 2);
        assert!(cache.get("M1", None, now).is_some());
        assert!(cache.get("M2", Some("U2"), now).is_some());
        assert!(cache.get("M1", Some("U1"), now).is_none());

        assert_eq!(cache.invalidate("M1"), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().invalidations, 3);
    }

    #[test]
    fn test_invalidation_is_exact_match() {
        let mut cache = RiskCache::new(Duration::hours(1));
        let now = Utc::now();

        cache.insert(result_for("M10", None), now);
        cache.insert(result_for("XM1", Some("U10")), now);

        // "M1" is a substring of both keys but names neither
        assert_eq!(cache.invalidate("M1"), 0);
        assert_eq!(cache.invalidate("U1"), 0);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_reinsert_replaces_entry() {
        let mut cache = RiskCache::new(Duration::hours(1));
        let now = Utc::now();

        cache.insert(result_for("M1", None), now);
        let mut updated = result_for("M1", None);
        updated.risk_score = 0.9;
        cache.insert(updated, now);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("M1", None, now).unwrap().risk_score, 0.9);
        assert_eq!(cache.invalidate("M1"), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insert_sweeps_unread_expired_entries() {
        let mut cache = RiskCache::new(Duration::hours(1));
        let now = Utc::now();

        cache.insert(result_for("M1", Some("U1")), now);
        cache.insert(result_for("M2", None), now + Duration::minutes(30));
        // Not due yet: last sweep was under an hour ago
        assert_eq!(cache.len(), 2);

        cache.insert(result_for("M3", None), now + Duration::minutes(61));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().expirations, 1);
        assert_eq!(cache.invalidate("U1"), 0);
        assert!(cache.get("M2", None, now + Duration::minutes(61)).is_some());
    }

    #[test]
    fn test_purge_expired() {
        let mut cache = RiskCache::new(Duration::seconds(10));
        let now = Utc::now();
        cache.insert(result_for("M1", None), now);
        cache.insert(result_for("M2", Some("U2")), now);

        assert_eq!(cache.purge_expired(now + Duration::seconds(9)), 0);
        assert_eq!(cache.purge_expired(now + Duration::seconds(10)), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.invalidate("U2"), 0);
    }

    #[test]
    fn test_clear() {
        let mut cache = RiskCache::new(Duration::hours(1));
        let now = Utc::now();
        cache.insert(result_for("M1", Some("U1")), now);
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.invalidate("U1"), 0);
    }
}
