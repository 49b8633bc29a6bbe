//! The session aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::State;
use crate::event::Event;

/// Unique session identifier
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One conversation: identity, scoped state and the ordered event log.
///
/// `state` is a projection of the event log. It changes only through
/// [`Session::apply_event`], which is what every store runs when appending.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    app_name: String,
    user_id: String,
    state: State,
    events: Vec<Event>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, app_name: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            app_name: app_name.into(),
            user_id: user_id.into(),
            state: State::new(),
            events: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Reassemble a session loaded from storage.
    pub fn from_parts(
        id: SessionId,
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        state: State,
        events: Vec<Event>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            app_name: app_name.into(),
            user_id: user_id.into(),
            state,
            events,
            created_at,
            updated_at,
        }
    }

    /// Rebuild a session by folding every event's delta over `base`.
    pub fn replay(
        id: SessionId,
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        base: State,
        events: impl IntoIterator<Item = Event>,
    ) -> Self {
        let mut session = Self::new(id, app_name, user_id);
        session.state = base;
        for event in events {
            session.apply_event(&event);
        }
        if let Some(first) = session.events.first() {
            session.created_at = first.timestamp();
        }
        session
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn last_event(&self) -> Option<&Event> {
        self.events.last()
    }

    /// Apply an event: merge its delta into state and record it.
    ///
    /// Partial events are ignored. The recorded copy has `temp:` keys
    /// stripped while the live state keeps them for the rest of the
    /// invocation.
    pub fn apply_event(&mut self, event: &Event) {
        if event.is_partial() {
            return;
        }
        self.state.apply_delta(&event.actions().state_delta);
        self.events.push(event.for_persistence());
        self.updated_at = event.timestamp();
    }

    pub(crate) fn set_events(&mut self, events: Vec<Event>) {
        self.events = events;
    }

    pub(crate) fn set_state(&mut self, state: State) {
        self.state = state;
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            app_name: self.app_name.clone(),
            user_id: self.user_id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            event_count: self.events.len(),
        }
    }
}

/// Listing entry; carries no event log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub app_name: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub event_count: usize,
}

/// Sort summaries most recently updated first.
pub(crate) fn sort_summaries(summaries: &mut [SessionSummary]) {
    summaries.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}
