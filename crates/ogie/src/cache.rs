// ABOUTME: Metadata cache abstraction, an in-memory LRU cache with TTL, and stable cache-key generation.
// ABOUTME: Keys combine the normalized URL with only the options that change extraction output.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::options::ExtractOptions;
use crate::result::Metadata;
use crate::urls::normalize_url;

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_SIZE: usize = 100;

/// Storage backend for extracted metadata.
///
/// Errors are never surfaced to extraction callers: a failed `get` is a
/// miss and a failed `set` is ignored.
pub trait MetadataCache: fmt::Debug + Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<Metadata>>;
    fn set(&self, key: &str, value: Metadata) -> anyhow::Result<()>;
}

/// Called with each entry dropped for capacity or expiry.
pub type EvictionCallback = Arc<dyn Fn(&str, &Metadata) + Send + Sync>;

#[derive(Clone)]
pub struct CacheOptions {
    pub ttl: Duration,
    pub max_size: usize,
    pub on_eviction: Option<EvictionCallback>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_size: DEFAULT_MAX_SIZE,
            on_eviction: None,
        }
    }
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("ttl", &self.ttl)
            .field("max_size", &self.max_size)
            .field("on_eviction", &self.on_eviction.is_some())
            .finish()
    }
}

struct Entry {
    value: Metadata,
    expires_at: Instant,
    tick: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    // tick -> key, oldest first
    recency: BTreeMap<u64, String>,
    next_tick: u64,
}

impl Inner {
    fn touch(&mut self, key: &str) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        Some(entry)
    }

    fn pop_oldest(&mut self) -> Option<(String, Entry)> {
        let (_, key) = self.recency.pop_first()?;
        let entry = self.entries.remove(&key)?;
        Some((key, entry))
    }

    fn remove_if_expired(&mut self, key: &str, now: Instant) -> Option<(String, Metadata)> {
        let expired = self.entries.get(key).is_some_and(|e| e.expires_at <= now);
        if !expired {
            return None;
        }
        self.remove(key).map(|e| (key.to_string(), e.value))
    }
}

/// Bounded LRU cache with a per-entry time-to-live.
pub struct MemoryCache {
    inner: Mutex<Inner>,
    ttl: Duration,
    max_size: usize,
    on_eviction: Option<EvictionCallback>,
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("len", &self.len())
            .field("ttl", &self.ttl)
            .field("max_size", &self.max_size)
            .finish()
    }
}

impl MemoryCache {
    pub fn new(options: CacheOptions) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            ttl: options.ttl,
            max_size: options.max_size.max(1),
            on_eviction: options.on_eviction,
        }
    }

    fn notify(&self, evicted: Vec<(String, Metadata)>) {
        if let Some(cb) = &self.on_eviction {
            for (key, value) in &evicted {
                cb(key, value);
            }
        }
    }

    /// Look up a live entry and mark it most recently used.
    pub fn lookup(&self, key: &str) -> Option<Metadata> {
        let now = Instant::now();
        let (found, evicted) = {
            let mut inner = self.inner.lock();
            match inner.remove_if_expired(key, now) {
                Some(evicted) => (None, vec![evicted]),
                None => {
                    inner.touch(key);
                    (inner.entries.get(key).map(|e| e.value.clone()), Vec::new())
                }
            }
        };
        self.notify(evicted);
        found
    }

    /// Insert or replace an entry, evicting the least recently used ones over capacity.
    pub fn insert(&self, key: &str, value: Metadata) {
        let expires_at = Instant::now() + self.ttl;
        let evicted = {
            let mut inner = self.inner.lock();
            inner.remove(key);
            let tick = inner.next_tick;
            inner.next_tick += 1;
            inner.entries.insert(
                key.to_string(),
                Entry {
                    value,
                    expires_at,
                    tick,
                },
            );
            inner.recency.insert(tick, key.to_string());

            let mut evicted = Vec::new();
            while inner.entries.len() > self.max_size {
                match inner.pop_oldest() {
                    Some((k, e)) => evicted.push((k, e.value)),
                    None => break,
                }
            }
            evicted
        };
        self.notify(evicted);
    }

    /// Whether a live entry exists. Does not affect recency.
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        let inner = self.inner.lock();
        inner.entries.get(key).is_some_and(|e| e.expires_at > now)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.recency.clear();
    }

    /// Number of stored entries, including ones not yet purged after expiry.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining lifetime of a live entry.
    pub fn expires_in(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let inner = self.inner.lock();
        inner
            .entries
            .get(key)
            .and_then(|e| e.expires_at.checked_duration_since(now))
            .filter(|d| !d.is_zero())
    }
}

impl MetadataCache for MemoryCache {
    fn get(&self, key: &str) -> anyhow::Result<Option<Metadata>> {
        Ok(self.lookup(key))
    }

    fn set(&self, key: &str, value: Metadata) -> anyhow::Result<()> {
        self.insert(key, value);
        Ok(())
    }
}

/// Create a shared in-memory cache.
pub fn create_cache(options: CacheOptions) -> Arc<MemoryCache> {
    Arc::new(MemoryCache::new(options))
}

fn headers_fingerprint(options: &ExtractOptions) -> Option<String> {
    if options.headers.is_empty() {
        return None;
    }
    let mut pairs: Vec<(String, &str)> = options
        .headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.as_str()))
        .collect();
    pairs.sort();
    Some(
        pairs
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v))
            .collect::<Vec<_>>()
            .join("|"),
    )
}

/// Stable cache key: `normalized-url` or `normalized-url::sorted,option,pairs`.
///
/// Operational settings (`bypass_cache`, the cache handle itself) never
/// contribute to the key.
pub fn generate_cache_key(url: &str, options: &ExtractOptions) -> String {
    let mut pairs: Vec<String> = Vec::new();
    let flags = [
        ("onlyOpenGraph", options.only_open_graph),
        ("fetchOEmbed", options.fetch_oembed),
        ("convertCharset", options.convert_charset),
        ("allowPrivateUrls", options.allow_private_urls),
    ];
    for (name, value) in flags {
        if let Some(v) = value {
            pairs.push(format!("{}:{}", name, v));
        }
    }
    if let Some(ua) = &options.user_agent {
        pairs.push(format!("userAgent:{}", ua));
    }
    if let Some(timeout) = options.timeout {
        pairs.push(format!("timeout:{}", timeout.as_millis()));
    }
    if let Some(max) = options.max_redirects {
        pairs.push(format!("maxRedirects:{}", max));
    }
    if let Some(headers) = headers_fingerprint(options) {
        pairs.push(format!("headers:{}", headers));
    }

    let normalized = normalize_url(url);
    if pairs.is_empty() {
        return normalized;
    }
    pairs.sort();
    format!("{}::{}", normalized, pairs.join(","))
}
