//! Session store contract and the in-memory backend.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::state::{ScopedDelta, State, StateMap, apply_to_map};
use super::types::{Session, SessionId, SessionSummary, sort_summaries};
use super::{SessionError, SessionResult};
use crate::event::Event;
use crate::runner::LoadedExecutionContext;

/// Filters applied by [`SessionStore::get_session`] to the returned event log.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GetSessionConfig {
    /// Keep only the last `n` events.
    pub num_recent_events: Option<usize>,
    /// Keep only events at or after this instant.
    pub after_timestamp: Option<DateTime<Utc>>,
}

impl GetSessionConfig {
    pub fn recent(n: usize) -> Self {
        Self {
            num_recent_events: Some(n),
            ..Default::default()
        }
    }

    pub fn after(timestamp: DateTime<Utc>) -> Self {
        Self {
            after_timestamp: Some(timestamp),
            ..Default::default()
        }
    }

    pub fn apply(&self, mut events: Vec<Event>) -> Vec<Event> {
        if let Some(after) = self.after_timestamp {
            events.retain(|e| e.timestamp() >= after);
        }
        if let Some(n) = self.num_recent_events
            && events.len() > n
        {
            events.drain(..events.len() - n);
        }
        events
    }
}

/// Durable storage for sessions, keyed by `(app_name, user_id, session_id)`.
///
/// `append_event` must make the new event and its state delta visible
/// together: no reader may observe one without the other.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    fn name(&self) -> &str;

    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        initial_state: Option<StateMap>,
        session_id: Option<SessionId>,
    ) -> SessionResult<Session>;

    async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
        config: GetSessionConfig,
    ) -> SessionResult<Session>;

    async fn list_sessions(&self, app_name: &str, user_id: &str)
    -> SessionResult<Vec<SessionSummary>>;

    /// Returns whether a session was removed.
    async fn delete_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
    ) -> SessionResult<bool>;

    /// Persist `event` and apply it to `session`.
    ///
    /// Partial events are returned untouched and never stored.
    async fn append_event(&self, session: &mut Session, event: Event) -> SessionResult<Event>;

    /// Re-point a loaded context at another existing session.
    async fn switch_active_session(
        &self,
        context: &mut LoadedExecutionContext,
        session_id: SessionId,
    ) -> SessionResult<()> {
        self.get_session(
            context.app_name(),
            context.user_id(),
            &session_id,
            GetSessionConfig::recent(0),
        )
        .await?;
        tracing::debug!(
            app = %context.app_name(),
            from = %context.session_id(),
            to = %session_id,
            "Switching active session"
        );
        context.set_session_id(session_id);
        Ok(())
    }
}

/// The creation event for `initial_state`, if anything in it is persistable.
///
/// Stores append it as the first event of a new session, so the log alone
/// reproduces the session's state.
pub(crate) fn creation_event(initial_state: Option<StateMap>) -> Option<Event> {
    let mut state = initial_state?;
    state.retain(|key, _| !super::is_temp_key(key));
    (!state.is_empty()).then(|| Event::initial_state(state))
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct SessionKey {
    app_name: String,
    user_id: String,
    session_id: SessionId,
}

impl SessionKey {
    fn new(app_name: &str, user_id: &str, session_id: &SessionId) -> Self {
        Self {
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    // Stored sessions hold only session-scoped state.
    sessions: HashMap<SessionKey, Session>,
    app_state: HashMap<String, StateMap>,
    user_state: HashMap<(String, String), StateMap>,
}

impl MemoryInner {
    fn view(&self, stored: &Session, config: &GetSessionConfig) -> Session {
        let empty = StateMap::new();
        let app = self.app_state.get(stored.app_name()).unwrap_or(&empty);
        let user = self
            .user_state
            .get(&(stored.app_name().to_string(), stored.user_id().to_string()))
            .unwrap_or(&empty);
        let mut session = stored.clone();
        session.set_state(State::merged(stored.state().as_map(), app, user));
        session.set_events(config.apply(stored.events().to_vec()));
        session
    }

    /// Apply `event` to a stored session and the shared scopes it touches.
    fn record(&mut self, key: &SessionKey, event: &Event) -> SessionResult<()> {
        let scoped = ScopedDelta::split(&event.actions().state_delta);
        let Some(stored) = self.sessions.get_mut(key) else {
            return Err(SessionError::NotFound {
                id: key.session_id.to_string(),
            });
        };
        let mut session_only = State::from_map(stored.state().as_map().clone());
        session_only.apply_delta(&scoped.session);
        stored.apply_event(event);
        stored.set_state(session_only);

        if !scoped.app.is_empty() {
            apply_to_map(
                self.app_state.entry(key.app_name.clone()).or_default(),
                &scoped.app,
            );
        }
        if !scoped.user.is_empty() {
            apply_to_map(
                self.user_state
                    .entry((key.app_name.clone(), key.user_id.clone()))
                    .or_default(),
                &scoped.user,
            );
        }
        Ok(())
    }
}

/// In-memory store (for testing and single-instance deployments)
#[derive(Debug, Default, Clone)]
pub struct MemorySessionStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored sessions
    pub async fn count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Clear all sessions and shared state
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.sessions.clear();
        inner.app_state.clear();
        inner.user_state.clear();
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        initial_state: Option<StateMap>,
        session_id: Option<SessionId>,
    ) -> SessionResult<Session> {
        let id = session_id.unwrap_or_default();
        let key = SessionKey::new(app_name, user_id, &id);
        let mut inner = self.inner.write().await;
        if inner.sessions.contains_key(&key) {
            return Err(SessionError::AlreadyExists { id: id.to_string() });
        }

        inner
            .sessions
            .insert(key.clone(), Session::new(id, app_name, user_id));
        if let Some(seed) = creation_event(initial_state) {
            inner.record(&key, &seed)?;
        }
        let stored = &inner.sessions[&key];
        Ok(inner.view(stored, &GetSessionConfig::default()))
    }

    async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
        config: GetSessionConfig,
    ) -> SessionResult<Session> {
        let inner = self.inner.read().await;
        let stored = inner
            .sessions
            .get(&SessionKey::new(app_name, user_id, session_id))
            .ok_or_else(|| SessionError::NotFound {
                id: session_id.to_string(),
            })?;
        Ok(inner.view(stored, &config))
    }

    async fn list_sessions(
        &self,
        app_name: &str,
        user_id: &str,
    ) -> SessionResult<Vec<SessionSummary>> {
        let inner = self.inner.read().await;
        let mut summaries: Vec<_> = inner
            .sessions
            .iter()
            .filter(|(k, _)| k.app_name == app_name && k.user_id == user_id)
            .map(|(_, s)| s.summary())
            .collect();
        sort_summaries(&mut summaries);
        Ok(summaries)
    }

    async fn delete_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
    ) -> SessionResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .sessions
            .remove(&SessionKey::new(app_name, user_id, session_id))
            .is_some())
    }

    async fn append_event(&self, session: &mut Session, event: Event) -> SessionResult<Event> {
        if event.is_partial() {
            return Ok(event);
        }
        let key = SessionKey::new(session.app_name(), session.user_id(), session.id());
        self.inner.write().await.record(&key, &event)?;

        session.apply_event(&event);
        Ok(event)
    }
}
