//! Scoped key-value state.
//!
//! Keys select their scope by prefix: `app:` is shared across the whole
//! application, `user:` across every session of one user, `temp:` lives only
//! for the current invocation, and unprefixed keys belong to the session.

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub const APP_PREFIX: &str = "app:";
pub const USER_PREFIX: &str = "user:";
pub const TEMP_PREFIX: &str = "temp:";

pub type StateMap = Map<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateScope {
    App,
    User,
    Session,
    Temp,
}

impl StateScope {
    pub fn of(key: &str) -> Self {
        if key.starts_with(APP_PREFIX) {
            Self::App
        } else if key.starts_with(USER_PREFIX) {
            Self::User
        } else if key.starts_with(TEMP_PREFIX) {
            Self::Temp
        } else {
            Self::Session
        }
    }
}

pub fn is_temp_key(key: &str) -> bool {
    key.starts_with(TEMP_PREFIX)
}

/// A state delta partitioned by persistence scope. `temp:` keys are dropped.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScopedDelta {
    pub app: StateMap,
    pub user: StateMap,
    pub session: StateMap,
}

impl ScopedDelta {
    pub fn split(delta: &StateMap) -> Self {
        let mut scoped = Self::default();
        for (key, value) in delta {
            let target = match StateScope::of(key) {
                StateScope::App => &mut scoped.app,
                StateScope::User => &mut scoped.user,
                StateScope::Session => &mut scoped.session,
                StateScope::Temp => continue,
            };
            target.insert(key.clone(), value.clone());
        }
        scoped
    }

    pub fn is_empty(&self) -> bool {
        self.app.is_empty() && self.user.is_empty() && self.session.is_empty()
    }
}

/// Session state as seen by agents: the session's own keys merged with the
/// app- and user-scoped keys.
///
/// Mutation is crate-private; state only changes by applying an event's
/// `state_delta`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State {
    values: StateMap,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: StateMap) -> Self {
        Self { values }
    }

    /// Merge scoped maps into the view agents see. Session keys win on clash.
    pub fn merged(session: &StateMap, app: &StateMap, user: &StateMap) -> Self {
        let mut values = StateMap::new();
        values.extend(app.iter().map(|(k, v)| (k.clone(), v.clone())));
        values.extend(user.iter().map(|(k, v)| (k.clone(), v.clone())));
        values.extend(session.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn as_map(&self) -> &StateMap {
        &self.values
    }

    /// Keys of a single scope.
    pub fn scope(&self, scope: StateScope) -> StateMap {
        self.values
            .iter()
            .filter(|(k, _)| StateScope::of(k) == scope)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Copy without invocation-local keys.
    pub fn without_temp(&self) -> Self {
        Self {
            values: self
                .values
                .iter()
                .filter(|(k, _)| !is_temp_key(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// A `null` value removes the key.
    pub(crate) fn apply_delta(&mut self, delta: &StateMap) {
        for (key, value) in delta {
            if value.is_null() {
                self.values.remove(key);
            } else {
                self.values.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Apply a delta to a raw map with the same `null`-removes rule as [`State`].
pub(crate) fn apply_to_map(target: &mut StateMap, delta: &StateMap) {
    for (key, value) in delta {
        if value.is_null() {
            target.remove(key);
        } else {
            target.insert(key.clone(), value.clone());
        }
    }
}
