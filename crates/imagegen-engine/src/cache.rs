use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use imagegen_contracts::providers::Operation;
use imagegen_contracts::ProviderResult;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);
/// Expired entries are swept on write once the table grows past this size.
pub const CACHE_CLEANUP_THRESHOLD: usize = 100;

#[derive(Debug, Clone)]
struct CacheEntry {
    result: ProviderResult,
    stored_at: Instant,
}

/// Request fields that make two calls interchangeable.
#[derive(Debug, Clone, Copy)]
pub struct CacheKeyParts<'a> {
    pub provider: &'a str,
    pub operation: Operation,
    pub prompt: &'a str,
    pub model: &'a str,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub seed: Option<u64>,
    /// Digest of the source image (and mask) for edits.
    pub source_digest: Option<&'a str>,
}

impl CacheKeyParts<'_> {
    pub fn key(&self) -> String {
        let normalized_prompt = self.prompt.split_whitespace().collect::<Vec<&str>>().join(" ");
        stable_hash(&json!({
            "provider": self.provider,
            "operation": self.operation.as_str(),
            "prompt": normalized_prompt,
            "model": self.model.trim(),
            "width": self.width,
            "height": self.height,
            "seed": self.seed,
            "source": self.source_digest,
        }))
    }
}

/// In-memory, best-effort response cache shared by every adapter.
#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    cleanup_threshold: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(CACHE_TTL, CACHE_CLEANUP_THRESHOLD)
    }
}

impl ResponseCache {
    pub fn new(ttl: Duration, cleanup_threshold: usize) -> Self {
        Self {
            ttl,
            cleanup_threshold,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<ProviderResult> {
        self.get_at(key, Instant::now())
    }

    pub fn insert(&self, key: String, result: ProviderResult) {
        self.insert_at(key, result, Instant::now());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn get_at(&self, key: &str, now: Instant) -> Option<ProviderResult> {
        let entries = self.lock();
        let entry = entries.get(key)?;
        if now.saturating_duration_since(entry.stored_at) >= self.ttl {
            return None;
        }
        Some(entry.result.clone())
    }

    pub(crate) fn insert_at(&self, key: String, result: ProviderResult, now: Instant) {
        let mut entries = self.lock();
        entries.insert(
            key,
            CacheEntry {
                result,
                stored_at: now,
            },
        );
        if entries.len() > self.cleanup_threshold {
            let ttl = self.ttl;
            let before = entries.len();
            entries.retain(|_, entry| now.saturating_duration_since(entry.stored_at) < ttl);
            tracing::debug!(
                evicted = before - entries.len(),
                remaining = entries.len(),
                "swept expired cache entries"
            );
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn stable_hash(payload: &Value) -> String {
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    digest_bytes(&bytes)
}
