//! Bounded Connection Pool
//!
//! Caps concurrent calls to a remote tier. Acquisition waits at most
//! `acquire_timeout`; callers treat a failed acquisition as a tier miss, never
//! as a fatal error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

/// Pool of connection slots
pub struct ConnectionPool {
    name: String,
    slots: Arc<Semaphore>,
    size: usize,
    acquire_timeout: Duration,
    acquired: AtomicU64,
    timeouts: AtomicU64,
}

/// A checked-out slot; returned to the pool on drop.
#[derive(Debug)]
pub struct PooledConnection {
    _permit: OwnedSemaphorePermit,
}

impl ConnectionPool {
    /// Create a pool with `size` slots.
    pub fn new(name: impl Into<String>, size: usize, acquire_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            slots: Arc::new(Semaphore::new(size.max(1))),
            size: size.max(1),
            acquire_timeout,
            acquired: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    /// Check out a slot, waiting at most the acquire timeout.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let acquire = Arc::clone(&self.slots).acquire_owned();
        match tokio::time::timeout(self.acquire_timeout, acquire).await {
            Ok(Ok(permit)) => {
                self.acquired.fetch_add(1, Ordering::Relaxed);
                Ok(PooledConnection { _permit: permit })
            }
            Ok(Err(_closed)) => Err(Error::tier_unavailable(
                &self.name,
                "connection pool is closed",
            )),
            Err(_elapsed) => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                Err(Error::PoolExhausted {
                    pool: self.name.clone(),
                    waited: self.acquire_timeout,
                })
            }
        }
    }

    /// Refuse all further acquisitions (connection loss).
    pub fn close(&self) {
        self.slots.close();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots not currently checked out
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Successful acquisitions
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    /// Acquisitions that gave up waiting
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }
}
