//! Keyed result memoization with TTL.
//!
//! Primary backend is an embedded sled tree; when it cannot be opened
//! the layer degrades to a process-local map with the same interface.
//! The fallback is not shared across instances, a documented trade-off.

use crate::config::CacheConfig;
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// SHA-256 over the canonical form of (query, enabled toggles, sorted
/// parameters)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    #[must_use]
    pub fn compute(query: &str, toggles: &[&str], params: &BTreeMap<String, String>) -> Self {
        let mut canonical = String::new();
        canonical.push_str("query=");
        canonical.push_str(query);
        canonical.push_str("\ntoggles=");
        canonical.push_str(&toggles.join(","));
        canonical.push_str("\nparams=");
        for (key, value) in params {
            canonical.push_str(key);
            canonical.push('=');
            canonical.push_str(value);
            canonical.push(';');
        }

        let digest = Sha256::digest(canonical.as_bytes());
        Self(format!("search:{digest:x}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stored envelope: payload plus expiry bookkeeping. The envelope is
/// bincode on disk; the payload itself is JSON because cached values
/// carry self-describing fields (`source_specific`) that a compact
/// format cannot round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEnvelope {
    payload: Vec<u8>,
    created_at: u64,
    expires_at: u64,
}

impl CacheEnvelope {
    fn new(payload: Vec<u8>, ttl: Duration) -> Self {
        let now = unix_now();
        Self {
            payload,
            created_at: now,
            expires_at: now.saturating_add(ttl.as_secs()),
        }
    }

    fn is_expired(&self) -> bool {
        unix_now() >= self.expires_at
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

enum Backend {
    Sled(sled::Db),
    Memory(Mutex<HashMap<String, CacheEnvelope>>),
}

/// Health snapshot returned by `CacheLayer::health`
#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub primary_available: bool,
    pub entries: usize,
}

/// TTL cache with a sled primary and an in-memory fallback
pub struct CacheLayer {
    backend: Backend,
}

impl CacheLayer {
    /// Open the configured backend, degrading to memory on failure.
    /// Never returns an error: cache unavailability is a warning, not a
    /// pipeline failure.
    #[must_use]
    pub fn open(config: &CacheConfig) -> Self {
        let path = config
            .path
            .clone()
            .unwrap_or_else(Self::default_path);

        match sled::open(&path) {
            Ok(db) => {
                info!("Cache backend open at {:?}", path);
                Self {
                    backend: Backend::Sled(db),
                }
            }
            Err(e) => {
                warn!(
                    "Cache backend unavailable at {:?} ({e}); falling back to in-memory store",
                    path
                );
                Self::memory()
            }
        }
    }

    /// Purely in-process cache (tests, fallback)
    #[must_use]
    pub fn memory() -> Self {
        Self {
            backend: Backend::Memory(Mutex::new(HashMap::new())),
        }
    }

    fn default_path() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("omics-oracle")
            .join("results")
    }

    /// Fetch and decode a value; expired entries are removed and miss
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let envelope = match &self.backend {
            Backend::Sled(db) => {
                let raw = db.get(key.as_bytes()).map_err(|e| Error::Cache {
                    operation: "get".to_string(),
                    reason: e.to_string(),
                })?;
                match raw {
                    Some(bytes) => bincode::deserialize::<CacheEnvelope>(&bytes).ok(),
                    None => None,
                }
            }
            Backend::Memory(map) => {
                let map = map.lock().expect("cache mutex poisoned");
                map.get(key).cloned()
            }
        };

        let Some(envelope) = envelope else {
            return Ok(None);
        };

        if envelope.is_expired() {
            debug!("Cache entry expired: {key}");
            self.remove(key)?;
            return Ok(None);
        }

        match serde_json::from_slice(&envelope.payload) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                // schema drift; drop the stale entry
                warn!("Cache payload undecodable for {key}: {e}");
                self.remove(key)?;
                Ok(None)
            }
        }
    }

    /// Store a value with TTL
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let payload = serde_json::to_vec(value).map_err(|e| Error::Cache {
            operation: "set".to_string(),
            reason: e.to_string(),
        })?;
        let envelope = CacheEnvelope::new(payload, ttl);

        match &self.backend {
            Backend::Sled(db) => {
                let bytes = bincode::serialize(&envelope).map_err(|e| Error::Cache {
                    operation: "set".to_string(),
                    reason: e.to_string(),
                })?;
                db.insert(key.as_bytes(), bytes).map_err(|e| Error::Cache {
                    operation: "set".to_string(),
                    reason: e.to_string(),
                })?;
            }
            Backend::Memory(map) => {
                map.lock()
                    .expect("cache mutex poisoned")
                    .insert(key.to_string(), envelope);
            }
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match &self.backend {
            Backend::Sled(db) => {
                db.remove(key.as_bytes()).map_err(|e| Error::Cache {
                    operation: "remove".to_string(),
                    reason: e.to_string(),
                })?;
            }
            Backend::Memory(map) => {
                map.lock().expect("cache mutex poisoned").remove(key);
            }
        }
        Ok(())
    }

    /// Drop every entry whose key starts with `prefix`; returns the
    /// number removed
    pub fn invalidate(&self, prefix: &str) -> Result<u64> {
        let mut removed = 0;
        match &self.backend {
            Backend::Sled(db) => {
                let keys: Vec<sled::IVec> = db
                    .scan_prefix(prefix.as_bytes())
                    .keys()
                    .filter_map(std::result::Result::ok)
                    .collect();
                for key in keys {
                    db.remove(&key).map_err(|e| Error::Cache {
                        operation: "invalidate".to_string(),
                        reason: e.to_string(),
                    })?;
                    removed += 1;
                }
            }
            Backend::Memory(map) => {
                let mut map = map.lock().expect("cache mutex poisoned");
                let keys: Vec<String> = map
                    .keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect();
                for key in keys {
                    map.remove(&key);
                    removed += 1;
                }
            }
        }
        info!("Invalidated {removed} cache entries under prefix {prefix}");
        Ok(removed)
    }

    /// Atomically increment a counter key, setting TTL on first use.
    /// The primary backend uses sled's compare-free update-and-fetch;
    /// the fallback approximates with the process-local lock.
    pub fn increment(&self, key: &str, ttl: Duration) -> Result<u64> {
        match &self.backend {
            Backend::Sled(db) => {
                let updated = db
                    .update_and_fetch(key.as_bytes(), |old| {
                        let envelope = old
                            .and_then(|bytes| bincode::deserialize::<CacheEnvelope>(bytes).ok())
                            .filter(|e| !e.is_expired());
                        let count: u64 = envelope
                            .as_ref()
                            .and_then(|e| serde_json::from_slice(&e.payload).ok())
                            .unwrap_or(0);
                        let next = CacheEnvelope {
                            payload: serde_json::to_vec(&(count + 1)).unwrap_or_default(),
                            created_at: envelope.as_ref().map_or_else(unix_now, |e| e.created_at),
                            expires_at: envelope
                                .as_ref()
                                .map_or_else(|| unix_now() + ttl.as_secs(), |e| e.expires_at),
                        };
                        bincode::serialize(&next).ok()
                    })
                    .map_err(|e| Error::Cache {
                        operation: "increment".to_string(),
                        reason: e.to_string(),
                    })?;

                let count = updated
                    .and_then(|bytes| bincode::deserialize::<CacheEnvelope>(&bytes).ok())
                    .and_then(|e| serde_json::from_slice::<u64>(&e.payload).ok())
                    .unwrap_or(0);
                Ok(count)
            }
            Backend::Memory(map) => {
                let mut map = map.lock().expect("cache mutex poisoned");
                let current: u64 = map
                    .get(key)
                    .filter(|e| !e.is_expired())
                    .and_then(|e| serde_json::from_slice(&e.payload).ok())
                    .unwrap_or(0);
                let next = current + 1;
                let payload = serde_json::to_vec(&next).map_err(|e| Error::Cache {
                    operation: "increment".to_string(),
                    reason: e.to_string(),
                })?;
                map.insert(key.to_string(), CacheEnvelope::new(payload, ttl));
                Ok(next)
            }
        }
    }

    /// Backend status
    #[must_use]
    pub fn health(&self) -> CacheHealth {
        match &self.backend {
            Backend::Sled(db) => CacheHealth {
                primary_available: true,
                entries: db.len(),
            },
            Backend::Memory(map) => CacheHealth {
                primary_available: false,
                entries: map.lock().map(|m| m.len()).unwrap_or(0),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_stable_and_sensitive() {
        let params: BTreeMap<String, String> =
            [("max_results".to_string(), "20".to_string())].into();
        let a = CacheKey::compute("crispr", &["enable_pubmed"], &params);
        let b = CacheKey::compute("crispr", &["enable_pubmed"], &params);
        assert_eq!(a, b);

        let c = CacheKey::compute("crispr", &["enable_pubmed", "enable_openalex"], &params);
        assert_ne!(a, c);
        let d = CacheKey::compute("crispr cas9", &["enable_pubmed"], &params);
        assert_ne!(a, d);
    }

    #[test]
    fn memory_round_trip_and_expiry() {
        let cache = CacheLayer::memory();
        cache
            .set("search:k1", &vec![1u32, 2, 3], Duration::from_secs(60))
            .unwrap();
        let got: Option<Vec<u32>> = cache.get("search:k1").unwrap();
        assert_eq!(got, Some(vec![1, 2, 3]));

        // zero TTL expires immediately
        cache
            .set("search:k2", &"v".to_string(), Duration::from_secs(0))
            .unwrap();
        let got: Option<String> = cache.get("search:k2").unwrap();
        assert_eq!(got, None);
    }

    #[test]
    fn invalidate_by_prefix() {
        let cache = CacheLayer::memory();
        cache.set("search:a", &1u8, Duration::from_secs(60)).unwrap();
        cache.set("search:b", &2u8, Duration::from_secs(60)).unwrap();
        cache.set("quota:x", &3u8, Duration::from_secs(60)).unwrap();

        assert_eq!(cache.invalidate("search:").unwrap(), 2);
        assert_eq!(cache.get::<u8>("search:a").unwrap(), None);
        assert_eq!(cache.get::<u8>("quota:x").unwrap(), Some(3));
    }

    #[test]
    fn increment_counts_up() {
        let cache = CacheLayer::memory();
        assert_eq!(cache.increment("quota:s", Duration::from_secs(60)).unwrap(), 1);
        assert_eq!(cache.increment("quota:s", Duration::from_secs(60)).unwrap(), 2);
        assert_eq!(cache.increment("quota:s", Duration::from_secs(60)).unwrap(), 3);
    }

    #[test]
    fn sled_backend_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            enabled: true,
            path: Some(dir.path().join("db")),
            result_ttl_days: 1,
        };
        let cache = CacheLayer::open(&config);
        assert!(cache.health().primary_available);

        cache
            .set("search:k", &"value".to_string(), Duration::from_secs(60))
            .unwrap();
        let got: Option<String> = cache.get("search:k").unwrap();
        assert_eq!(got.as_deref(), Some("value"));
    }
}
