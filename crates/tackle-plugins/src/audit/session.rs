//! In-flight execution sessions.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;

use crate::error::PluginError;

const SESSION_TARGET: &str = "tackle_plugins::audit::session";

/// Number of finished sessions kept for inspection.
const RECENT_CAPACITY: usize = 64;

/// Shared cancellation signal observed by running backends.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An execution session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    session_id: String,
    plugin_id: String,
    #[serde(with = "time::serde::rfc3339")]
    started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    ended_at: Option<OffsetDateTime>,
}

impl Session {
    /// Returns the session identifier.
    #[must_use]
    pub const fn session_id(&self) -> &str {
        self.session_id.as_str()
    }

    /// Returns the plugin being executed.
    #[must_use]
    pub const fn plugin_id(&self) -> &str {
        self.plugin_id.as_str()
    }

    /// Returns when the session opened.
    #[must_use]
    pub const fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    /// Returns when the session closed, if it has.
    #[must_use]
    pub const fn ended_at(&self) -> Option<OffsetDateTime> {
        self.ended_at
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    active: HashMap<String, (Session, CancelFlag)>,
    recent: VecDeque<Session>,
}

/// Tracks open sessions and enforces the per-plugin concurrency limit.
#[derive(Debug, Clone)]
pub struct SessionTracker {
    state: Arc<Mutex<TrackerState>>,
    max_per_plugin: usize,
}

impl SessionTracker {
    /// Creates a tracker admitting at most `max_per_plugin` concurrent
    /// sessions for any single plugin.
    #[must_use]
    pub fn new(max_per_plugin: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackerState::default())),
            max_per_plugin: max_per_plugin.max(1),
        }
    }

    /// Opens a session, returning a guard that closes it on drop.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Busy`] when the plugin is at its concurrency
    /// limit and [`PluginError::Validation`] when `session_id` is in use.
    pub fn open(&self, session_id: &str, plugin_id: &str) -> Result<SessionGuard, PluginError> {
        let mut state = self.lock();
        if state.active.contains_key(session_id) {
            return Err(PluginError::invalid(format!(
                "session '{session_id}' is already active"
            )));
        }
        let in_flight = state
            .active
            .values()
            .filter(|(session, _)| session.plugin_id == plugin_id)
            .count();
        if in_flight >= self.max_per_plugin {
            return Err(PluginError::Busy {
                plugin: plugin_id.to_owned(),
                limit: self.max_per_plugin,
            });
        }

        let cancel = CancelFlag::default();
        let session = Session {
            session_id: session_id.to_owned(),
            plugin_id: plugin_id.to_owned(),
            started_at: OffsetDateTime::now_utc(),
            ended_at: None,
        };
        state
            .active
            .insert(session_id.to_owned(), (session, cancel.clone()));
        debug!(target: SESSION_TARGET, session_id, plugin = plugin_id, "session opened");

        Ok(SessionGuard {
            tracker: self.clone(),
            session_id: session_id.to_owned(),
            cancel,
        })
    }

    /// Signals cancellation to a running session.
    ///
    /// Returns false when no such session is active.
    pub fn cancel(&self, session_id: &str) -> bool {
        let state = self.lock();
        state.active.get(session_id).is_some_and(|(_, flag)| {
            flag.cancel();
            true
        })
    }

    /// Returns the currently open sessions.
    #[must_use]
    pub fn active(&self) -> Vec<Session> {
        self.lock()
            .active
            .values()
            .map(|(session, _)| session.clone())
            .collect()
    }

    /// Returns recently closed sessions, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<Session> {
        self.lock().recent.iter().cloned().collect()
    }

    fn close(&self, session_id: &str) {
        let mut state = self.lock();
        if let Some((mut session, _)) = state.active.remove(session_id) {
            session.ended_at = Some(OffsetDateTime::now_utc());
            if state.recent.len() == RECENT_CAPACITY {
                state.recent.pop_front();
            }
            state.recent.push_back(session);
            debug!(target: SESSION_TARGET, session_id, "session closed");
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Closes its session when dropped.
#[derive(Debug)]
pub struct SessionGuard {
    tracker: SessionTracker,
    session_id: String,
    cancel: CancelFlag,
}

impl SessionGuard {
    /// Returns the session identifier.
    #[must_use]
    pub const fn session_id(&self) -> &str {
        self.session_id.as_str()
    }

    /// Returns the session's cancellation flag.
    #[must_use]
    pub const fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.tracker.close(&self.session_id);
    }
}
