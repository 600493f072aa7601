//! Parsed task headers per historical version.
//!
//! Keys combine the commit id with the SHA-256 of the content, so two versions
//! only share an entry when their bytes are identical.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;
use web_time::Instant;

use crate::markdown::{self, TaskHeader};
use crate::store::{CommitId, ContentHash};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    commit: CommitId,
    content: ContentHash,
}

struct Entry {
    header: Option<TaskHeader>,
    inserted: Instant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub len: usize,
}

struct Inner {
    entries: HashMap<CacheKey, Entry>,
    /// Insertion order, oldest first
    order: VecDeque<CacheKey>,
    last_sweep: Instant,
    stats: CacheStats,
}

/// Bounded, TTL-limited cache of parsed headers.
pub struct MetadataCache {
    inner: Mutex<Inner>,
    capacity: usize,
    ttl: Duration,
    sweep_interval: Duration,
}

impl MetadataCache {
    pub fn new(capacity: usize, ttl: Duration, sweep_interval: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                last_sweep: Instant::now(),
                stats: CacheStats::default(),
            }),
            capacity: capacity.max(1),
            ttl,
            sweep_interval,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Header of `content` as stored at `commit`, parsed at most once per TTL.
    pub fn get_or_parse(&self, commit: &CommitId, content: &str) -> Option<TaskHeader> {
        let key = CacheKey {
            commit: commit.clone(),
            content: ContentHash::from_content(content),
        };

        let mut inner = self.lock();
        if inner.last_sweep.elapsed() >= self.sweep_interval {
            self.sweep_locked(&mut inner);
        }

        let fresh = inner
            .entries
            .get(&key)
            .filter(|entry| entry.inserted.elapsed() < self.ttl)
            .map(|entry| entry.header.clone());
        if let Some(header) = fresh {
            inner.stats.hits += 1;
            return header;
        }

        inner.stats.misses += 1;
        let header = markdown::parse(content).header;
        if inner.entries.remove(&key).is_some() {
            inner.order.retain(|k| k != &key);
        }
        inner.order.push_back(key.clone());
        inner.entries.insert(
            key,
            Entry {
                header: header.clone(),
                inserted: Instant::now(),
            },
        );
        while inner.entries.len() > self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
            inner.stats.evictions += 1;
        }
        header
    }

    /// Drop expired entries now.
    pub fn sweep(&self) {
        let mut inner = self.lock();
        self.sweep_locked(&mut inner);
    }

    fn sweep_locked(&self, inner: &mut Inner) {
        let before = inner.entries.len();
        let ttl = self.ttl;
        inner.entries.retain(|_, entry| entry.inserted.elapsed() < ttl);
        let Inner { entries, order, .. } = &mut *inner;
        order.retain(|key| entries.contains_key(key));
        let expired = before - inner.entries.len();
        inner.stats.evictions += expired as u64;
        inner.last_sweep = Instant::now();
        if expired > 0 {
            debug!(expired, remaining = inner.entries.len(), "Swept metadata cache");
        }
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            len: inner.entries.len(),
            ..inner.stats
        }
    }

    /// Sweep every `sweep_interval` in the background until the cache is dropped.
    pub fn spawn_sweeper(cache: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(cache);
        let interval = cache.sweep_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match weak.upgrade() {
                    Some(cache) => cache.sweep(),
                    None => break,
                }
            }
        })
    }
}
