//! Background View Refresher
//!
//! Materialized-view refresh runs on its own cancellable task, fully
//! decoupled from request handling. Scheduling only records the scope in a
//! pending set and wakes the worker, so callers never wait on a refresh.
//!
//! ```text
//!  schedule(scope) ──► pending set ──notify──► worker ──► L4 refresh
//!                      (coalesced)             │  ▲        (retry with
//!                                              │  └─────── backoff)
//!                                              ▼
//!                                   Fresh │ Stale (exhausted)
//! ```
//!
//! Exhausted retries leave the scope stale, log at `error`, and bump the
//! refresh-failure metric; nothing is raised to the request that triggered it.
//! A successful refresh drops every cached list in L1 and L2, since lists
//! read from the views before it may be missing what it projected.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::cache::KeyPurpose;
use crate::context::EngineContext;
use crate::domain::ViewScope;
use crate::error::{Error, Result};

/// Concrete scopes tracked individually; `All` fans out to both.
const TRACKED: [ViewScope; 2] = [ViewScope::Geographic, ViewScope::External];

/// Refresh state of one view scope
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RefreshState {
    /// Last refresh succeeded (or none was ever needed)
    Fresh,
    /// Queued, not started
    Pending,
    /// A refresh attempt is running
    Refreshing { attempt: u32 },
    /// Retries exhausted; readers see the last good projection
    Stale { attempts: u32, reason: String },
}

/// Status of one view scope
#[derive(Debug, Clone, Serialize)]
pub struct ScopeStatus {
    pub scope: ViewScope,
    pub state: RefreshState,
    pub last_refreshed: Option<DateTime<Utc>>,
    pub failures: u64,
}

impl ScopeStatus {
    fn new(scope: ViewScope) -> Self {
        Self {
            scope,
            state: RefreshState::Fresh,
            last_refreshed: None,
            failures: 0,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self.state, RefreshState::Stale { .. })
    }
}

/// Coalescing, retrying background refresher.
pub struct ViewRefresher {
    ctx: Arc<EngineContext>,
    pending: Mutex<HashSet<ViewScope>>,
    wake: Notify,
    idle: watch::Sender<bool>,
    status: Mutex<HashMap<ViewScope, ScopeStatus>>,
    cancel: CancellationToken,
    scheduled: AtomicU64,
    coalesced: AtomicU64,
    completed: AtomicU64,
}

impl ViewRefresher {
    pub fn new(ctx: Arc<EngineContext>) -> Arc<Self> {
        let (idle, _) = watch::channel(true);
        Arc::new(Self {
            ctx,
            pending: Mutex::new(HashSet::new()),
            wake: Notify::new(),
            idle,
            status: Mutex::new(TRACKED.iter().map(|s| (*s, ScopeStatus::new(*s))).collect()),
            cancel: CancellationToken::new(),
            scheduled: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        })
    }

    /// Start the worker task.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let refresher = Arc::clone(self);
        tokio::spawn(async move { refresher.run().await })
    }

    /// Queue a refresh of `scope` without waiting for it.
    ///
    /// Returns `false` when an already-pending scope covers it.
    pub fn schedule(&self, scope: ViewScope) -> bool {
        let queued = {
            let mut pending = self.pending.lock();
            if pending.iter().any(|p| p.covers(scope)) {
                false
            } else {
                if scope == ViewScope::All {
                    pending.clear();
                }
                pending.insert(scope);
                self.idle.send_replace(false);
                true
            }
        };

        if queued {
            self.scheduled.fetch_add(1, Ordering::Relaxed);
            self.set_state(scope, RefreshState::Pending);
            self.wake.notify_one();
        } else {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
        }
        queued
    }

    /// Stop the worker, abandoning any running attempt or backoff.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait until nothing is pending or running.
    pub async fn wait_idle(&self) {
        let mut idle = self.idle.subscribe();
        // the sender lives in self, so the channel cannot close here
        let _ = idle.wait_for(|idle| *idle).await;
    }

    /// Status of every tracked scope
    pub fn status(&self) -> Vec<ScopeStatus> {
        let status = self.status.lock();
        TRACKED
            .iter()
            .filter_map(|s| status.get(s).cloned())
            .collect()
    }

    /// Scopes whose last refresh exhausted its retries
    pub fn stale_scopes(&self) -> Vec<ViewScope> {
        self.status()
            .into_iter()
            .filter(ScopeStatus::is_stale)
            .map(|s| s.scope)
            .collect()
    }

    pub fn is_stale(&self, scope: ViewScope) -> bool {
        self.status()
            .iter()
            .any(|s| scope.covers(s.scope) && s.is_stale())
    }

    /// Scopes queued and not yet picked up
    pub fn pending(&self) -> Vec<ViewScope> {
        self.pending.lock().iter().copied().collect()
    }

    /// Refreshes that were queued
    pub fn scheduled_refreshes(&self) -> u64 {
        self.scheduled.load(Ordering::Relaxed)
    }

    /// Requests absorbed by an already-pending refresh
    pub fn coalesced_refreshes(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    /// Refreshes that succeeded
    pub fn completed_refreshes(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Worker
    // =========================================================================

    async fn run(self: Arc<Self>) {
        info!("view refresher started");
        loop {
            let batch: Vec<ViewScope> = self.pending.lock().drain().collect();

            if batch.is_empty() {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = self.wake.notified() => continue,
                }
            }

            for scope in batch {
                if self.cancel.is_cancelled() {
                    break;
                }
                // failure is already logged, recorded and reflected in status
                let _ = self.refresh_with_retry(scope).await;
            }

            {
                let pending = self.pending.lock();
                if pending.is_empty() {
                    self.idle.send_replace(true);
                }
            }
        }
        self.idle.send_replace(true);
        info!("view refresher stopped");
    }

    /// Refresh `scope` now, retrying with bounded exponential backoff.
    ///
    /// Shutdown abandons the running attempt or backoff and leaves the scope
    /// stale with the number of attempts actually started.
    #[instrument(skip(self, scope), fields(scope = %scope))]
    pub async fn refresh_with_retry(&self, scope: ViewScope) -> Result<()> {
        let run_id = Uuid::new_v4();
        let max_attempts = self.ctx.config.view_refresh_retry_max.max(1);
        let mut attempts = 0;
        let mut last_error = String::new();

        while attempts < max_attempts {
            attempts += 1;
            self.set_state(scope, RefreshState::Refreshing { attempt: attempts });

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => None,
                result = self.ctx.l4.refresh(scope) => Some(result),
            };
            match outcome {
                None => {
                    last_error = "refresher shut down".to_string();
                    break;
                }
                Some(Ok(())) => {
                    self.drop_cached_lists().await;
                    self.mark_fresh(scope);
                    self.completed.fetch_add(1, Ordering::Relaxed);
                    self.ctx.metrics.record_refresh(true);
                    info!(%run_id, attempt = attempts, "views refreshed");
                    return Ok(());
                }
                Some(Err(e)) => {
                    warn!(%run_id, attempt = attempts, max_attempts, error = %e, "view refresh attempt failed");
                    last_error = e.to_string();
                }
            }

            if attempts < max_attempts {
                let delay = self.ctx.config.refresh_backoff(attempts);
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        last_error = "refresher shut down".to_string();
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        error!(
            %run_id,
            attempts,
            reason = %last_error,
            "view refresh gave up; views left stale"
        );
        self.mark_stale(scope, attempts, &last_error);
        self.ctx.metrics.record_refresh(false);
        Err(Error::RefreshFailure {
            scope: scope.to_string(),
            attempts,
            reason: last_error,
        })
    }

    /// Drop every cached ancestor and descendant list.
    ///
    /// Lists served from the views before this refresh may predate it.
    async fn drop_cached_lists(&self) {
        let namespaces = [
            KeyPurpose::Ancestors.namespace(),
            KeyPurpose::Descendants.namespace(),
        ];
        self.ctx.l1.advance_generation();

        let mut removed = 0;
        for namespace in &namespaces {
            match self.ctx.l2.invalidate_prefix(namespace).await {
                Ok(n) => removed += n,
                Err(e) => warn!(%namespace, error = %e, "cached lists left in L2 after refresh"),
            }
        }
        for namespace in &namespaces {
            removed += self.ctx.l1.invalidate_prefix(namespace) as u64;
        }
        self.ctx.metrics.record_invalidation(removed, 0);
        debug!(removed, "cached lists dropped after refresh");
    }

    fn set_state(&self, scope: ViewScope, state: RefreshState) {
        let mut status = self.status.lock();
        for tracked in TRACKED.iter().filter(|t| scope.covers(**t)) {
            if let Some(entry) = status.get_mut(tracked) {
                entry.state = state.clone();
            }
        }
    }

    fn mark_fresh(&self, scope: ViewScope) {
        let now = Utc::now();
        let mut status = self.status.lock();
        for tracked in TRACKED.iter().filter(|t| scope.covers(**t)) {
            if let Some(entry) = status.get_mut(tracked) {
                entry.state = RefreshState::Fresh;
                entry.last_refreshed = Some(now);
            }
        }
    }

    fn mark_stale(&self, scope: ViewScope, attempts: u32, reason: &str) {
        let mut status = self.status.lock();
        for tracked in TRACKED.iter().filter(|t| scope.covers(**t)) {
            if let Some(entry) = status.get_mut(tracked) {
                entry.state = RefreshState::Stale {
                    attempts,
                    reason: reason.to_string(),
                };
                entry.failures += 1;
            }
        }
    }
}
