//! In-memory networked cache with per-entry expiry.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::domain::{NetworkCache, Tier};
use crate::error::{Error, Result};

struct Stored {
    value: Bytes,
    expires_at: Instant,
}

/// [`NetworkCache`] backed by a `DashMap`.
pub struct InMemoryNetworkCache {
    entries: DashMap<String, Stored>,
    available: AtomicBool,
    latency_us: AtomicU64,
    gets: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl Default for InMemoryNetworkCache {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            available: AtomicBool::new(true),
            latency_us: AtomicU64::new(0),
            gets: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }
}

impl InMemoryNetworkCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate connection loss.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Delay every operation by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_us
            .store(latency.as_micros() as u64, Ordering::SeqCst);
    }

    /// Whether `key` is present and unexpired.
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map_or(false, |e| e.expires_at > Instant::now())
    }

    /// Stored entries, expired ones included until next touched
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get operations served
    pub fn gets(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    /// Set operations served
    pub fn sets(&self) -> u64 {
        self.sets.load(Ordering::Relaxed)
    }

    /// Delete operations served
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    async fn enter(&self) -> Result<()> {
        let latency = self.latency_us.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_micros(latency)).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::tier_unavailable(Tier::L2, "cache connection lost"))
        }
    }
}

#[async_trait]
impl NetworkCache for InMemoryNetworkCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.enter().await?;
        self.gets.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let value = self
            .entries
            .get(key)
            .map(|e| (e.expires_at > now).then(|| e.value.clone()));
        match value {
            Some(Some(bytes)) => Ok(Some(bytes)),
            Some(None) => {
                self.entries.remove_if(key, |_, e| e.expires_at <= now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.enter().await?;
        self.sets.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            key.to_string(),
            Stored {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.enter().await?;
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(self.entries.remove(key).is_some())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
        self.enter().await?;
        self.deletes.fetch_add(1, Ordering::Relaxed);
        let before = self.entries.len();
        self.entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}
