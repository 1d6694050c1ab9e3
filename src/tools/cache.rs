//! In-process caching for tool results
//!
//! Uses moka async cache (Send + Sync, TTL-based eviction). Entries carry
//! their own TTL because tools declare per-tool lifetimes; the cache-wide
//! ceiling only bounds memory.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;
use serde::Serialize;
use serde_json::Value;

use super::canonical_json;
use super::traits::ToolResult;

/// Upper bound on how long any entry may live regardless of its own TTL
const CACHE_CEILING: Duration = Duration::from_secs(3600);

#[derive(Clone)]
struct CachedEntry {
    result: ToolResult,
    inserted_at: Instant,
    ttl: Duration,
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
    pub hit_rate: f64,
}

/// Keyed result cache shared by all cacheable tools
#[derive(Clone)]
pub struct ToolCache {
    entries: Cache<String, CachedEntry>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl ToolCache {
    /// Create a new cache with default settings
    pub fn new() -> Self {
        ToolCache {
            entries: Cache::builder()
                .max_capacity(1000)
                .time_to_live(CACHE_CEILING)
                .build(),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cache key for a (tool, arguments) pair: key-sorted JSON so field
    /// ordering never splits entries.
    pub fn key(tool_name: &str, args: &Value) -> String {
        format!("{}:{}", tool_name, canonical_json(args))
    }

    /// Look up a fresh entry; expired entries count as misses.
    pub async fn get(&self, key: &str) -> Option<ToolResult> {
        match self.entries.get(key).await {
            Some(entry) if entry.inserted_at.elapsed() <= entry.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.result)
            }
            Some(_) => {
                self.entries.invalidate(key).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a result under the tool's TTL.
    pub async fn put(&self, key: String, result: ToolResult, ttl: Duration) {
        self.entries
            .insert(
                key,
                CachedEntry {
                    result,
                    inserted_at: Instant::now(),
                    ttl,
                },
            )
            .await;
    }

    /// Drop all entries.
    pub fn invalidate_all(&self) {
        self.entries.invalidate_all();
    }

    /// Current hit/miss statistics.
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            entries: self.entries.entry_count(),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

impl Default for ToolCache {
    fn default() -> Self {
        Self::new()
    }
}
