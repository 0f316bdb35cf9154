// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use regex::Regex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::error::{CacheError, MissCause};
use crate::remote::RemoteCacheLayer;
use crate::stats::CacheStats;

#[derive(Debug, Clone)]
struct Item {
    value: Vec<u8>,
    created_at: SystemTime,
    expires_at: SystemTime,
    hit_count: u64,
}

#[derive(Debug, Default)]
struct Inner {
    items: HashMap<String, Item>,
    hits: u64,
    misses: u64,
    evictions: u64,
    last_access: Option<SystemTime>,
}

/// Tuning knobs for the L1 layer.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_items: usize,
    pub default_ttl: Duration,
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_items: 10_000, default_ttl: Duration::from_secs(300), cleanup_interval: Duration::from_secs(60) }
    }
}

/// Two-tier key/value cache: a mandatory in-memory L1 plus an optional
/// [`RemoteCacheLayer`] (L2). Constructed as an explicit dependency — never a
/// hidden global — with a `started` flag observable by tests.
pub struct Cache {
    inner: Mutex<Inner>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    remote: Option<Arc<dyn RemoteCacheLayer>>,
    started: AtomicBool,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    /// Per-key locks backing [`Cache::get_or_build`]'s at-most-one-build
    /// guarantee. Entries are never removed; the registry grows with the
    /// set of distinct fingerprints ever built, not with call volume.
    build_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Cache {
    /// Construct a cache with the system clock and spawn its background
    /// sweeper. Must be called from within a running Tokio runtime.
    pub fn new(config: CacheConfig) -> Arc<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        let cache = Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            config,
            clock,
            remote: None,
            started: AtomicBool::new(true),
            sweeper: Mutex::new(None),
            build_locks: Mutex::new(HashMap::new()),
        });
        cache.spawn_sweeper();
        cache
    }

    pub fn with_remote(config: CacheConfig, clock: Arc<dyn Clock>, remote: Arc<dyn RemoteCacheLayer>) -> Arc<Self> {
        let cache = Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            config,
            clock,
            remote: Some(remote),
            started: AtomicBool::new(true),
            sweeper: Mutex::new(None),
            build_locks: Mutex::new(HashMap::new()),
        });
        cache.spawn_sweeper();
        cache
    }

    /// Construct without spawning the sweeper task — for tests that drive
    /// expiry manually via [`Cache::sweep`] and don't run inside a Tokio
    /// runtime.
    pub fn without_sweeper(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            config,
            clock,
            remote: None,
            started: AtomicBool::new(true),
            sweeper: Mutex::new(None),
            build_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn spawn_sweeper(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let interval = self.config.cleanup_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else { break };
                if !cache.is_started() {
                    break;
                }
                cache.sweep();
            }
        });
        *self.sweeper.lock().unwrap() = Some(handle);
    }

    /// Delete every entry whose `expires_at` has passed. Exposed directly so
    /// tests can invoke one sweep cycle without waiting on the interval.
    pub fn sweep(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap();
        let before = inner.items.len();
        inner.items.retain(|_, item| item.expires_at > now);
        let removed = before - inner.items.len();
        if removed > 0 {
            debug!(removed, "cache sweep removed expired entries");
        }
    }

    /// Stop the background sweeper. Idempotent.
    pub fn close(&self) {
        self.started.store(false, Ordering::SeqCst);
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap();
        match inner.items.get(key) {
            None => {
                inner.misses += 1;
                Err(CacheError::miss("get", key, MissCause::NotFound))
            }
            Some(item) if item.expires_at <= now => {
                inner.items.remove(key);
                inner.misses += 1;
                Err(CacheError::miss("get", key, MissCause::Expired))
            }
            Some(_) => {
                let item = inner.items.get_mut(key).expect("checked present above");
                item.hit_count += 1;
                let value = item.value.clone();
                inner.hits += 1;
                inner.last_access = Some(now);
                Ok(value)
            }
        }
    }

    /// `ttl = None` (or a non-positive duration) applies the configured
    /// default TTL.
    pub fn set(&self, key: impl Into<String>, value: &[u8], ttl: Option<Duration>) {
        let key = key.into();
        let now = self.clock.now();
        let ttl = ttl.filter(|t| !t.is_zero()).unwrap_or(self.config.default_ttl);
        let mut inner = self.inner.lock().unwrap();
        if !inner.items.contains_key(&key) && inner.items.len() >= self.config.max_items {
            evict_one(&mut inner);
        }
        inner.items.insert(key, Item { value: value.to_vec(), created_at: now, expires_at: now + ttl, hit_count: 0 });
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().unwrap().items.remove(key).is_some()
    }

    pub fn exists(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap();
        match inner.items.get(key) {
            Some(item) if item.expires_at > now => true,
            Some(_) => {
                inner.items.remove(key);
                false
            }
            None => false,
        }
    }

    pub fn get_many(&self, keys: &[String]) -> HashMap<String, Vec<u8>> {
        keys.iter().filter_map(|k| self.get(k).ok().map(|v| (k.clone(), v))).collect()
    }

    pub fn set_many(&self, items: Vec<(String, Vec<u8>, Option<Duration>)>) {
        for (key, value, ttl) in items {
            self.set(key, &value, ttl);
        }
    }

    /// Compile `pattern` as a regex and delete every matching key. Returns
    /// the number of entries removed. Idempotent: a second call against the
    /// same state removes zero entries.
    pub fn delete_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        let re = Regex::new(pattern)?;
        let mut inner = self.inner.lock().unwrap();
        let before = inner.items.len();
        inner.items.retain(|k, _| !re.is_match(k));
        Ok(before - inner.items.len())
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.items.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            item_count: inner.items.len(),
            byte_size: inner.items.values().map(|i| i.value.len()).sum(),
            last_access: inner.last_access,
            layer: Some("l1".to_string()),
        }
    }

    /// Best-effort consult of the optional L2 layer. Absence is a no-op, not
    /// an error: `set`/`get` on L1 alone remain fully functional.
    pub async fn remote_get(&self, key: &str) -> Option<Vec<u8>> {
        match &self.remote {
            Some(r) => r.get(key).await,
            None => None,
        }
    }

    pub async fn remote_set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        if let Some(r) = &self.remote {
            r.set(key, value, ttl).await;
        }
    }

    fn build_lock(&self, key: &str) -> Arc<AsyncMutex<()>> {
        self.build_locks.lock().unwrap().entry(key.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Get `key`, or build it exactly once and cache the result. Concurrent
    /// callers for the same key block on a per-key lock rather than each
    /// running `build`; the cache is checked again after the lock is
    /// acquired, so only the caller that actually wins the race runs it.
    pub async fn get_or_build<F, Fut, E>(&self, key: &str, ttl: Option<Duration>, build: F) -> Result<Vec<u8>, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<u8>, E>>,
    {
        if let Ok(v) = self.get(key) {
            return Ok(v);
        }
        let lock = self.build_lock(key);
        let _guard = lock.lock().await;
        if let Ok(v) = self.get(key) {
            return Ok(v);
        }
        let value = build().await?;
        self.set(key, &value, ttl);
        Ok(value)
    }
}

fn evict_one(inner: &mut Inner) {
    if let Some(key) = inner
        .items
        .iter()
        .min_by(|a, b| a.1.created_at.cmp(&b.1.created_at).then_with(|| a.0.cmp(b.0)))
        .map(|(k, _)| k.clone())
    {
        inner.items.remove(&key);
        inner.evictions += 1;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
