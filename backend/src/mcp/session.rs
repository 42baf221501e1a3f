//! MCP session management.
//!
//! Maps session ids to live protocol channels, each bound to the principal
//! that created it. Sessions are evicted inline (no background task): every
//! request first runs [`SessionStore::maintain`], which expires idle
//! sessions and then trims the store back to its capacity by dropping the
//! least recently used entries.

use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::channel::ProtocolChannel;

/// Idle time after which a session expires.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Maximum number of live sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 250;

/// Eviction bounds for a [`SessionStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub ttl: Duration,
    pub max_sessions: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_SESSION_TTL,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

/// Error type for session store operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("Session id already registered: {0}")]
    DuplicateId(String),
}

/// Stored state for one session.
struct SessionEntry {
    channel: Arc<dyn ProtocolChannel>,
    principal_key: String,
    created_at: Instant,
    last_used_at: Instant,
}

impl SessionEntry {
    fn handle(&self, id: &str) -> SessionHandle {
        SessionHandle {
            id: id.to_string(),
            channel: self.channel.clone(),
            principal_key: self.principal_key.clone(),
            created_at: self.created_at,
            last_used_at: self.last_used_at,
        }
    }
}

/// A snapshot of a session, lent out for the duration of one request.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: String,
    pub channel: Arc<dyn ProtocolChannel>,
    pub principal_key: String,
    pub created_at: Instant,
    pub last_used_at: Instant,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("principal_key", &self.principal_key)
            .field("created_at", &self.created_at)
            .field("last_used_at", &self.last_used_at)
            .finish_non_exhaustive()
    }
}

/// Outcome of resolving a session id for a principal.
#[derive(Debug)]
pub enum Resolution {
    /// The session exists, belongs to the caller and has been touched.
    Continue(SessionHandle),
    /// The session belonged to someone else and has been destroyed.
    Mismatch,
    /// No such session.
    NotFound,
}

/// What a [`SessionStore::maintain`] pass removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub evicted: usize,
}

/// Close a channel, logging instead of propagating any failure.
///
/// Eviction must never fail a later request because an old session did not
/// shut down cleanly.
pub fn close_best_effort(session_id: &str, channel: &dyn ProtocolChannel) {
    if let Err(e) = channel.close() {
        warn!("Failed to close MCP session {}: {}", session_id, e);
    }
}

/// In-process registry of MCP sessions.
///
/// Cloning shares the same underlying map. All operations take one lock and
/// never hold it across channel I/O.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, SessionEntry>>>,
    limits: SessionLimits,
}

impl SessionStore {
    /// Create a store with the default limits.
    pub fn new() -> Self {
        Self::with_limits(SessionLimits::default())
    }

    pub fn with_limits(limits: SessionLimits) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            limits,
        }
    }

    pub fn limits(&self) -> SessionLimits {
        self.limits
    }

    /// Get a session by id.
    pub fn lookup(&self, id: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.lock();
        sessions.get(id).map(|entry| entry.handle(id))
    }

    /// Register a new session.
    ///
    /// Ids come from a collision-free generator, so a duplicate is an
    /// internal consistency error.
    pub fn insert(
        &self,
        id: String,
        channel: Arc<dyn ProtocolChannel>,
        principal_key: String,
        now: Instant,
    ) -> Result<SessionHandle, SessionStoreError> {
        let mut sessions = self.sessions.lock();
        match sessions.entry(id) {
            Entry::Occupied(occupied) => Err(SessionStoreError::DuplicateId(occupied.key().clone())),
            Entry::Vacant(vacant) => {
                let id = vacant.key().clone();
                let entry = vacant.insert(SessionEntry {
                    channel,
                    principal_key,
                    created_at: now,
                    last_used_at: now,
                });
                info!("Created MCP session: {}", id);
                Ok(entry.handle(&id))
            }
        }
    }

    /// Record use of a session. `last_used_at` never moves backwards.
    pub fn touch(&self, id: &str, now: Instant) {
        let mut sessions = self.sessions.lock();
        if let Some(entry) = sessions.get_mut(id) {
            entry.last_used_at = entry.last_used_at.max(now);
        }
    }

    /// Close and remove a session. Returns whether one was removed.
    pub fn remove(&self, id: &str) -> bool {
        let mut sessions = self.sessions.lock();
        let removed = destroy(&mut sessions, id);
        if removed {
            info!("Terminated MCP session: {}", id);
        }
        removed
    }

    /// Resolve `id` on behalf of `principal_key`.
    ///
    /// A session presented by the wrong principal is destroyed, not merely
    /// refused, so it cannot be used by anyone afterwards.
    pub fn resolve(&self, id: &str, principal_key: &str, now: Instant) -> Resolution {
        let mut sessions = self.sessions.lock();
        let Some(entry) = sessions.get_mut(id) else {
            return Resolution::NotFound;
        };

        if entry.principal_key != principal_key {
            destroy(&mut sessions, id);
            warn!("MCP session {} presented by a different principal; destroyed", id);
            return Resolution::Mismatch;
        }

        entry.last_used_at = entry.last_used_at.max(now);
        Resolution::Continue(entry.handle(id))
    }

    /// Expire idle sessions, then evict least recently used ones down to capacity.
    pub fn maintain(&self, now: Instant) -> MaintenanceReport {
        let mut sessions = self.sessions.lock();
        let mut report = MaintenanceReport::default();

        let ttl = self.limits.ttl;
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_used_at) > ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            if destroy(&mut sessions, &id) {
                info!("Expired idle MCP session: {}", id);
                report.expired += 1;
            }
        }

        let max = self.limits.max_sessions;
        if sessions.len() > max {
            let mut by_last_used: Vec<(Instant, String)> = sessions
                .iter()
                .map(|(id, entry)| (entry.last_used_at, id.clone()))
                .collect();
            by_last_used.sort();

            let over = sessions.len() - max;
            for (_, id) in by_last_used.into_iter().take(over) {
                if destroy(&mut sessions, &id) {
                    info!("Evicted MCP session over capacity: {}", id);
                    report.evicted += 1;
                }
            }
        }

        if report != MaintenanceReport::default() {
            debug!(
                "MCP session maintenance: {} expired, {} evicted, {} remaining",
                report.expired,
                report.evicted,
                sessions.len()
            );
        }
        report
    }

    /// Close and remove every session. Called at shutdown.
    pub fn drain(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let drained = sessions.len();
        for (id, entry) in sessions.drain() {
            close_best_effort(&id, entry.channel.as_ref());
        }
        if drained > 0 {
            info!("Drained {} MCP sessions", drained);
        }
        drained
    }

    /// Get the number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Close the channel, then drop the entry.
fn destroy(sessions: &mut HashMap<String, SessionEntry>, id: &str) -> bool {
    match sessions.get(id) {
        Some(entry) => {
            close_best_effort(id, entry.channel.as_ref());
            sessions.remove(id);
            true
        }
        None => false,
    }
}
