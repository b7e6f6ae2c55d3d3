//! Idempotent creates.
//!
//! A create carrying an idempotency key runs at most once per
//! `(operation, key)` within the retention window. Later calls with the same
//! key receive the stored result. Concurrent calls with the same key wait
//! for the first one instead of racing it; a waiter gives up after
//! `in_flight_wait` measured from its own arrival.
//!
//! Only successful results are stored. If the computing call fails or is
//! cancelled, its in-flight marker is removed and the next caller (or a
//! waiter) runs the computation itself.
//!
//! Reusing a key with a different payload returns the original result; the
//! payload is not compared.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};

/// Create operations that accept an idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    CreateStory,
    CreateEpic,
    CreateTask,
    CreateIssue,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateStory => "create_story",
            Self::CreateEpic => "create_epic",
            Self::CreateTask => "create_task",
            Self::CreateIssue => "create_issue",
        }
    }
}

/// Configuration for the idempotency cache.
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// How long a stored result is replayed
    pub ttl: Duration,
    /// How long a concurrent caller waits for an in-flight computation
    pub in_flight_wait: Duration,
    /// How often expired records are swept
    pub cleanup_interval: Duration,
    /// Soft ceiling on stored records before an eager sweep
    pub max_entries: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(86400), // 24 hours
            in_flight_wait: Duration::from_secs(10),
            cleanup_interval: Duration::from_secs(300),
            max_entries: 10_000,
        }
    }
}

impl IdempotencyConfig {
    pub fn from_bridge(config: &BridgeConfig) -> Self {
        Self {
            ttl: config.idempotency_ttl,
            in_flight_wait: config.idempotency_wait,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    op: OperationKind,
    /// SHA-256 of the client key, so entry size does not depend on input.
    digest: String,
}

impl CacheKey {
    fn new(op: OperationKind, raw: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(raw.as_bytes());
        Self {
            op,
            digest: format!("{:x}", hasher.finalize()),
        }
    }

    fn short(&self) -> &str {
        &self.digest[..12]
    }
}

#[derive(Debug)]
enum Slot {
    InFlight { notify: Arc<Notify>, token: u64 },
    Done { value: Value, expires_at: Instant },
}

enum Claim {
    Owner { token: u64, notify: Arc<Notify> },
    Wait(Arc<Notify>),
    Hit(Value),
}

/// Process-wide idempotency record store.
pub struct IdempotencyCache {
    entries: DashMap<CacheKey, Slot>,
    config: IdempotencyConfig,
    next_token: AtomicU64,
}

impl IdempotencyCache {
    pub fn new(config: IdempotencyConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            next_token: AtomicU64::new(1),
        }
    }

    /// Number of stored or in-flight records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the stored result for `(op, key)` or run `compute` once.
    ///
    /// `None` or blank keys bypass the cache entirely.
    pub async fn get_or_create<F, Fut>(
        &self,
        op: OperationKind,
        key: Option<&str>,
        compute: F,
    ) -> BridgeResult<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = BridgeResult<Value>>,
    {
        let Some(raw_key) = key.filter(|k| !k.trim().is_empty()) else {
            return compute().await;
        };
        let cache_key = CacheKey::new(op, raw_key);
        let deadline = Instant::now() + self.config.in_flight_wait;

        let (token, notify) = loop {
            match self.claim(&cache_key) {
                Claim::Hit(value) => {
                    debug!(op = op.as_str(), key = cache_key.short(), "Replaying idempotent result");
                    return Ok(value);
                }
                Claim::Owner { token, notify } => break (token, notify),
                Claim::Wait(notify) => {
                    let notified = notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();

                    if !self.is_in_flight_with(&cache_key, &notify) {
                        continue;
                    }

                    let now = Instant::now();
                    if now >= deadline
                        || tokio::time::timeout(deadline - now, notified).await.is_err()
                    {
                        if let Some(value) = self.stored(&cache_key) {
                            return Ok(value);
                        }
                        warn!(
                            op = op.as_str(),
                            key = cache_key.short(),
                            "Gave up waiting for in-flight idempotent create"
                        );
                        return Err(BridgeError::IdempotencyInFlight {
                            key: raw_key.to_string(),
                        });
                    }
                }
            }
        };

        let guard = InFlightGuard {
            cache: self,
            key: &cache_key,
            token,
            notify,
        };

        let value = compute().await?;

        self.entries.insert(
            cache_key.clone(),
            Slot::Done {
                value: value.clone(),
                expires_at: Instant::now() + self.config.ttl,
            },
        );
        if self.entries.len() > self.config.max_entries {
            self.purge_expired();
        }
        debug!(op = op.as_str(), key = cache_key.short(), "Stored idempotent result");
        drop(guard);
        Ok(value)
    }

    fn claim(&self, key: &CacheKey) -> Claim {
        let now = Instant::now();
        match self.entries.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                let (token, notify) = self.new_marker();
                vacant.insert(Slot::InFlight {
                    notify: Arc::clone(&notify),
                    token,
                });
                Claim::Owner { token, notify }
            }
            Entry::Occupied(mut occupied) => match occupied.get() {
                Slot::Done { value, expires_at } if *expires_at > now => Claim::Hit(value.clone()),
                Slot::Done { .. } => {
                    let (token, notify) = self.new_marker();
                    occupied.insert(Slot::InFlight {
                        notify: Arc::clone(&notify),
                        token,
                    });
                    Claim::Owner { token, notify }
                }
                Slot::InFlight { notify, .. } => Claim::Wait(Arc::clone(notify)),
            },
        }
    }

    fn new_marker(&self) -> (u64, Arc<Notify>) {
        (
            self.next_token.fetch_add(1, Ordering::Relaxed),
            Arc::new(Notify::new()),
        )
    }

    fn is_in_flight_with(&self, key: &CacheKey, notify: &Arc<Notify>) -> bool {
        self.entries.get(key).is_some_and(|slot| {
            matches!(&*slot, Slot::InFlight { notify: current, .. } if Arc::ptr_eq(current, notify))
        })
    }

    fn stored(&self, key: &CacheKey) -> Option<Value> {
        let now = Instant::now();
        self.entries.get(key).and_then(|slot| match &*slot {
            Slot::Done { value, expires_at } if *expires_at > now => Some(value.clone()),
            _ => None,
        })
    }

    /// Drop expired records; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, slot| !matches!(slot, Slot::Done { expires_at, .. } if *expires_at <= now));
        before.saturating_sub(self.entries.len())
    }

    /// Periodically purge expired records until `shutdown` is cancelled.
    pub fn spawn_cleanup(self: &Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        let interval_duration = self.config.cleanup_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_duration);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Idempotency cleanup stopping due to shutdown");
                        break;
                    }
                    _ = interval.tick() => {
                        let removed = cache.purge_expired();
                        if removed > 0 {
                            info!(removed, remaining = cache.len(), "Purged expired idempotency records");
                        }
                    }
                }
            }
        })
    }
}

/// Clears the in-flight marker and wakes waiters when the owner finishes.
///
/// On success the marker has already been replaced by the stored result, so
/// only a marker still carrying our token is removed.
struct InFlightGuard<'a> {
    cache: &'a IdempotencyCache,
    key: &'a CacheKey,
    token: u64,
    notify: Arc<Notify>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let token = self.token;
        self.cache.entries.remove_if(self.key, |_, slot| {
            matches!(slot, Slot::InFlight { token: t, .. } if *t == token)
        });
        self.notify.notify_waiters();
    }
}
