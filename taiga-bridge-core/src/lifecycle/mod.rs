//! Streaming session lifecycle.
//!
//! The [`SessionManager`] owns the registry of live MCP streaming sessions
//! for both transports. It is started once before traffic is accepted and
//! stopped once on shutdown:
//!
//! ```text
//! Idle → Running → Stopped
//! ```
//!
//! Each session owns a bounded outbound channel (server → client messages)
//! and a cancellation token. A session ends on the first of: client
//! disconnect, idle timeout, explicit termination, or shutdown. Removing a
//! session drops its sender, which ends any stream reading from it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BridgeConfig;

pub mod health;

pub use health::{ReadinessResponse, health_router};

// ============================================================================
// Types
// ============================================================================

/// Which transport a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionKind {
    EventStream,
    StreamableHttp,
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EventStream => write!(f, "event-stream"),
            Self::StreamableHttp => write!(f, "streamable-http"),
        }
    }
}

/// Manager state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Constructed, not yet accepting sessions
    Idle,
    /// Accepting sessions
    Running,
    /// Shut down; no further sessions
    Stopped,
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientDisconnect,
    IdleTimeout,
    Terminated,
    Shutdown,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientDisconnect => write!(f, "client_disconnect"),
            Self::IdleTimeout => write!(f, "idle_timeout"),
            Self::Terminated => write!(f, "terminated"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session manager already started")]
    AlreadyStarted,

    #[error("Session manager is not accepting sessions")]
    NotAccepting,

    #[error("Session not found: {id}")]
    NotFound { id: String },

    #[error("Session {id} already has an open stream")]
    StreamAlreadyOpen { id: String },

    #[error("Session {id} closed")]
    Closed { id: String },
}

/// Snapshot of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub kind: SessionKind,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub idle_for: Duration,
}

/// Configuration for the session manager.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sessions without activity for this long are reclaimed
    pub idle_timeout: Duration,
    /// How often the reaper looks for idle sessions
    pub reap_interval: Duration,
    /// Capacity of each session's outbound channel
    pub outbound_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(1800),
            reap_interval: Duration::from_secs(60),
            outbound_capacity: 64,
        }
    }
}

impl SessionConfig {
    pub fn from_bridge(config: &BridgeConfig) -> Self {
        Self {
            idle_timeout: config.session_idle_timeout,
            reap_interval: config.session_reap_interval,
            ..Default::default()
        }
    }
}

struct SessionEntry {
    kind: SessionKind,
    created_at: DateTime<Utc>,
    last_activity: Mutex<Instant>,
    outbound_tx: mpsc::Sender<Value>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Value>>>,
    cancel: CancellationToken,
}

impl SessionEntry {
    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }
}

// ============================================================================
// Session Manager
// ============================================================================

/// Process-wide registry of streaming sessions.
///
/// Transports go through this type for every registry access; the map is
/// never exposed.
pub struct SessionManager {
    sessions: DashMap<String, SessionEntry>,
    state: ArcSwap<ManagerState>,
    started: AtomicBool,
    stopped: AtomicBool,
    shutdown_token: CancellationToken,
    reaper: Mutex<Option<JoinHandle<()>>>,
    config: SessionConfig,
    started_at: std::time::Instant,
    version: &'static str,
}

impl SessionManager {
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            state: ArcSwap::new(Arc::new(ManagerState::Idle)),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
            reaper: Mutex::new(None),
            config,
            started_at: std::time::Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    #[must_use]
    pub fn state(&self) -> ManagerState {
        **self.state.load()
    }

    #[must_use]
    pub fn is_accepting(&self) -> bool {
        matches!(self.state(), ManagerState::Running)
    }

    #[must_use]
    pub fn version(&self) -> &'static str {
        self.version
    }

    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Token cancelled when the manager stops.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Begin accepting sessions and start the idle reaper.
    ///
    /// Succeeds exactly once; any later call (including a concurrent one)
    /// returns [`SessionError::AlreadyStarted`].
    pub fn start(self: &Arc<Self>) -> Result<(), SessionError> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SessionError::AlreadyStarted);
        }

        self.state.store(Arc::new(ManagerState::Running));
        *self.reaper.lock() = Some(self.spawn_reaper());
        info!(
            idle_timeout_secs = self.config.idle_timeout.as_secs(),
            "Session manager started"
        );
        Ok(())
    }

    /// Close every session and refuse further registrations.
    ///
    /// Returns the number of sessions closed. Only the first call does work.
    pub fn stop(&self) -> usize {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return 0;
        }
        self.state.store(Arc::new(ManagerState::Stopped));
        self.shutdown_token.cancel();
        if let Some(handle) = self.reaper.lock().take() {
            handle.abort();
        }

        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let closed = ids
            .iter()
            .filter(|id| self.close(id, CloseReason::Shutdown))
            .count();
        info!(closed, "Session manager stopped");
        closed
    }

    /// Register a new session.
    pub fn open(self: &Arc<Self>, kind: SessionKind) -> Result<SessionGuard, SessionError> {
        if !self.is_accepting() {
            return Err(SessionError::NotAccepting);
        }

        let id = Uuid::new_v4().simple().to_string();
        let (tx, rx) = mpsc::channel(self.config.outbound_capacity);
        let cancel = self.shutdown_token.child_token();

        self.sessions.insert(
            id.clone(),
            SessionEntry {
                kind,
                created_at: Utc::now(),
                last_activity: Mutex::new(Instant::now()),
                outbound_tx: tx,
                outbound_rx: Mutex::new(Some(rx)),
                cancel: cancel.clone(),
            },
        );

        // stop() may have run between the check and the insert
        if !self.is_accepting() {
            self.close(&id, CloseReason::Shutdown);
            return Err(SessionError::NotAccepting);
        }

        info!(session_id = %id, kind = %kind, "Session opened");
        Ok(SessionGuard {
            manager: Arc::clone(self),
            id,
            cancel,
            armed: true,
        })
    }

    /// Remove a session. Returns `false` if it was already gone.
    pub fn close(&self, id: &str, reason: CloseReason) -> bool {
        let Some((_, entry)) = self.sessions.remove(id) else {
            return false;
        };
        entry.cancel.cancel();
        let lifetime = Utc::now().signed_duration_since(entry.created_at);
        info!(
            session_id = %id,
            kind = %entry.kind,
            reason = %reason,
            lifetime_secs = lifetime.num_seconds(),
            "Session closed"
        );
        true
    }

    /// Record activity on a session owned by the `kind` transport.
    ///
    /// A session opened by the other transport is reported as not found.
    pub fn touch(&self, id: &str, kind: SessionKind) -> Result<(), SessionError> {
        self.sessions
            .get(id)
            .filter(|entry| entry.kind == kind)
            .map(|entry| entry.touch())
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })
    }

    /// Queue a server → client message on the session's stream.
    pub async fn deliver(&self, id: &str, message: Value) -> Result<(), SessionError> {
        let tx = {
            let entry = self
                .sessions
                .get(id)
                .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
            entry.touch();
            entry.outbound_tx.clone()
        };
        tx.send(message)
            .await
            .map_err(|_| SessionError::Closed { id: id.to_string() })
    }

    /// Take the reading half of the session's outbound channel.
    ///
    /// Only one reader may hold it at a time; it is handed back to the
    /// session when the returned [`OutboundReceiver`] is dropped.
    pub fn take_outbound(self: &Arc<Self>, id: &str) -> Result<OutboundReceiver, SessionError> {
        let entry = self
            .sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        let rx = entry
            .outbound_rx
            .lock()
            .take()
            .ok_or_else(|| SessionError::StreamAlreadyOpen { id: id.to_string() })?;
        entry.touch();
        Ok(OutboundReceiver {
            manager: Arc::downgrade(self),
            id: id.to_string(),
            rx: Some(rx),
        })
    }

    pub fn info(&self, id: &str) -> Option<SessionInfo> {
        self.sessions.get(id).map(|entry| SessionInfo {
            id: id.to_string(),
            kind: entry.kind,
            created_at: entry.created_at,
            idle_for: entry.idle_for(),
        })
    }

    /// Cancellation token of a live session.
    pub fn cancellation(&self, id: &str) -> Option<CancellationToken> {
        self.sessions.get(id).map(|entry| entry.cancel.clone())
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Close sessions idle for longer than the configured timeout.
    pub fn reap_idle(&self) -> usize {
        let idle_timeout = self.config.idle_timeout;
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.idle_for() >= idle_timeout)
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .iter()
            .filter(|id| self.close(id, CloseReason::IdleTimeout))
            .count()
    }

    fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        let shutdown = self.shutdown_token.clone();
        let interval_duration = self.config.reap_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_duration);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Session reaper stopping due to shutdown");
                        break;
                    }
                    _ = interval.tick() => {
                        let Some(manager) = manager.upgrade() else {
                            break;
                        };
                        let reaped = manager.reap_idle();
                        if reaped > 0 {
                            warn!(
                                reaped,
                                remaining = manager.active_count(),
                                "Reclaimed idle sessions"
                            );
                        }
                    }
                }
            }
        })
    }
}

// ============================================================================
// Guards
// ============================================================================

/// Handle to an open session; closes it when dropped.
///
/// Call [`SessionGuard::detach`] to leave the session registered after the
/// handle goes away (the streamable transport keeps sessions across
/// requests).
pub struct SessionGuard {
    manager: Arc<SessionManager>,
    id: String,
    cancel: CancellationToken,
    armed: bool,
}

impl SessionGuard {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Cancelled when the session is closed for any reason.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Keep the session alive beyond this handle; returns its id.
    pub fn detach(mut self) -> String {
        self.armed = false;
        std::mem::take(&mut self.id)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.armed {
            self.manager.close(&self.id, CloseReason::ClientDisconnect);
        }
    }
}

/// Exclusive reader of a session's outbound messages.
pub struct OutboundReceiver {
    manager: std::sync::Weak<SessionManager>,
    id: String,
    rx: Option<mpsc::Receiver<Value>>,
}

impl OutboundReceiver {
    /// Next queued message; `None` once the session is closed.
    pub async fn recv(&mut self) -> Option<Value> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

impl Drop for OutboundReceiver {
    fn drop(&mut self) {
        let (Some(rx), Some(manager)) = (self.rx.take(), self.manager.upgrade()) else {
            return;
        };
        if let Some(entry) = manager.sessions.get(&self.id) {
            *entry.outbound_rx.lock() = Some(rx);
        }
    }
}
