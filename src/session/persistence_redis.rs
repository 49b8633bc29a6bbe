//! Redis session store.
//!
//! Enable with the `redis-backend` feature flag. Every append runs as one
//! MULTI/EXEC pipeline so the event and its state writes commit together.
//!
//! ```text
//! {prefix}{app}:app_state                  HASH  key -> JSON value
//! {prefix}{app}:{user}:user_state          HASH  key -> JSON value
//! {prefix}{app}:{user}:sessions            ZSET  session id scored by update time
//! {prefix}{app}:{user}:{session}:meta      STRING timestamps
//! {prefix}{app}:{user}:{session}:state     HASH  key -> JSON value
//! {prefix}{app}:{user}:{session}:events    LIST  event JSON
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use super::persistence::{GetSessionConfig, SessionStore, creation_event};
use super::state::{ScopedDelta, State, StateMap};
use super::types::{Session, SessionId, SessionSummary};
use super::{RetryPolicy, SessionError, SessionResult, StorageResultExt, validate_id};
use crate::event::Event;

#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub key_prefix: String,
    pub connection_timeout: Duration,
    /// Applied when acquiring connections.
    pub retry: RetryPolicy,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            key_prefix: "agent_runtime:".to_string(),
            connection_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

impl RedisConfig {
    pub fn prefix(mut self, prefix: impl Into<String>) -> SessionResult<Self> {
        let prefix = prefix.into();
        if !prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
        {
            return Err(SessionError::InvalidId {
                message: format!(
                    "Invalid key prefix '{}': only ASCII alphanumeric, underscore, and colon allowed",
                    prefix
                ),
            });
        }
        self.key_prefix = prefix;
        Ok(self)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionMeta {
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

pub struct RedisSessionStore {
    client: Arc<redis::Client>,
    config: RedisConfig,
}

fn decode_hash(raw: HashMap<String, String>) -> SessionResult<StateMap> {
    raw.into_iter()
        .map(|(k, v)| Ok((k, serde_json::from_str(&v)?)))
        .collect()
}

/// Queue HSET/HDEL for a delta; `null` removes the field.
fn write_delta(pipe: &mut redis::Pipeline, key: &str, delta: &StateMap) -> SessionResult<()> {
    for (field, value) in delta {
        if value.is_null() {
            pipe.cmd("HDEL").arg(key).arg(field).ignore();
        } else {
            pipe.cmd("HSET")
                .arg(key)
                .arg(field)
                .arg(serde_json::to_string(value)?)
                .ignore();
        }
    }
    Ok(())
}

impl RedisSessionStore {
    pub fn new(redis_url: &str) -> SessionResult<Self> {
        Self::from_config(redis_url, RedisConfig::default())
    }

    pub fn from_config(redis_url: &str, config: RedisConfig) -> SessionResult<Self> {
        let client = redis::Client::open(redis_url).storage_err()?;
        Ok(Self {
            client: Arc::new(client),
            config,
        })
    }

    fn app_state_key(&self, app_name: &str) -> String {
        format!("{}{}:app_state", self.config.key_prefix, app_name)
    }

    fn user_state_key(&self, app_name: &str, user_id: &str) -> String {
        format!("{}{}:{}:user_state", self.config.key_prefix, app_name, user_id)
    }

    fn index_key(&self, app_name: &str, user_id: &str) -> String {
        format!("{}{}:{}:sessions", self.config.key_prefix, app_name, user_id)
    }

    fn session_key(&self, app_name: &str, user_id: &str, id: &SessionId, part: &str) -> String {
        format!(
            "{}{}:{}:{}:{}",
            self.config.key_prefix, app_name, user_id, id, part
        )
    }

    fn validate(app_name: &str, user_id: &str, id: &SessionId) -> SessionResult<()> {
        validate_id("app name", app_name)?;
        validate_id("user id", user_id)?;
        validate_id("session id", id.as_str())
    }

    async fn get_connection(&self) -> SessionResult<redis::aio::MultiplexedConnection> {
        self.config
            .retry
            .run(Self::is_retryable, || async {
                tokio::time::timeout(
                    self.config.connection_timeout,
                    self.client.get_multiplexed_async_connection(),
                )
                .await
                .storage_err_ctx("connection timeout")?
                .storage_err()
            })
            .await
    }

    fn is_retryable(error: &SessionError) -> bool {
        match error {
            SessionError::Storage { message } => {
                message.contains("timeout")
                    || message.contains("connection")
                    || message.contains("BUSY")
                    || message.contains("LOADING")
                    || message.contains("CLUSTERDOWN")
            }
            _ => false,
        }
    }

    async fn load_meta(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        app_name: &str,
        user_id: &str,
        id: &SessionId,
    ) -> SessionResult<Option<SessionMeta>> {
        let raw: Option<String> = conn
            .get(self.session_key(app_name, user_id, id, "meta"))
            .await
            .storage_err()?;
        raw.map(|json| serde_json::from_str(&json).map_err(SessionError::from))
            .transpose()
    }

    async fn shared_state(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        app_name: &str,
        user_id: &str,
    ) -> SessionResult<(StateMap, StateMap)> {
        let app: HashMap<String, String> = conn
            .hgetall(self.app_state_key(app_name))
            .await
            .storage_err()?;
        let user: HashMap<String, String> = conn
            .hgetall(self.user_state_key(app_name, user_id))
            .await
            .storage_err()?;
        Ok((decode_hash(app)?, decode_hash(user)?))
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    fn name(&self) -> &str {
        "redis"
    }

    #[tracing::instrument(skip(self, initial_state), fields(store = "redis"))]
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        initial_state: Option<StateMap>,
        session_id: Option<SessionId>,
    ) -> SessionResult<Session> {
        let id = session_id.unwrap_or_default();
        Self::validate(app_name, user_id, &id)?;
        let seed = creation_event(initial_state);
        let scoped = seed
            .as_ref()
            .map(|e| ScopedDelta::split(&e.actions().state_delta))
            .unwrap_or_default();
        let now = seed.as_ref().map(Event::timestamp).unwrap_or_else(Utc::now);
        let meta = serde_json::to_string(&SessionMeta {
            created_at: now,
            updated_at: now,
        })?;

        let mut conn = self.get_connection().await?;
        let claimed: Option<String> = redis::cmd("SET")
            .arg(self.session_key(app_name, user_id, &id, "meta"))
            .arg(&meta)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .storage_err()?;
        if claimed.is_none() {
            return Err(SessionError::AlreadyExists { id: id.to_string() });
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        if let Some(seed) = &seed {
            pipe.cmd("RPUSH")
                .arg(self.session_key(app_name, user_id, &id, "events"))
                .arg(serde_json::to_string(seed)?)
                .ignore();
        }
        write_delta(
            &mut pipe,
            &self.session_key(app_name, user_id, &id, "state"),
            &scoped.session,
        )?;
        write_delta(&mut pipe, &self.app_state_key(app_name), &scoped.app)?;
        write_delta(&mut pipe, &self.user_state_key(app_name, user_id), &scoped.user)?;
        pipe.cmd("ZADD")
            .arg(self.index_key(app_name, user_id))
            .arg(now.timestamp_millis())
            .arg(id.as_str())
            .ignore();
        pipe.query_async::<()>(&mut conn).await.storage_err()?;

        let (app, user) = self.shared_state(&mut conn, app_name, user_id).await?;
        Ok(Session::from_parts(
            id,
            app_name,
            user_id,
            State::merged(&scoped.session, &app, &user),
            seed.into_iter().collect(),
            now,
            now,
        ))
    }

    async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
        config: GetSessionConfig,
    ) -> SessionResult<Session> {
        Self::validate(app_name, user_id, session_id)?;
        let mut conn = self.get_connection().await?;
        let meta = self
            .load_meta(&mut conn, app_name, user_id, session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound {
                id: session_id.to_string(),
            })?;

        let state: HashMap<String, String> = conn
            .hgetall(self.session_key(app_name, user_id, session_id, "state"))
            .await
            .storage_err()?;
        let raw_events: Vec<String> = conn
            .lrange(self.session_key(app_name, user_id, session_id, "events"), 0, -1)
            .await
            .storage_err()?;
        let events = raw_events
            .iter()
            .map(|json| serde_json::from_str::<Event>(json).map_err(SessionError::from))
            .collect::<SessionResult<Vec<_>>>()?;
        let (app, user) = self.shared_state(&mut conn, app_name, user_id).await?;

        Ok(Session::from_parts(
            session_id.clone(),
            app_name,
            user_id,
            State::merged(&decode_hash(state)?, &app, &user),
            config.apply(events),
            meta.created_at,
            meta.updated_at,
        ))
    }

    async fn list_sessions(
        &self,
        app_name: &str,
        user_id: &str,
    ) -> SessionResult<Vec<SessionSummary>> {
        validate_id("app name", app_name)?;
        validate_id("user id", user_id)?;
        let mut conn = self.get_connection().await?;
        let ids: Vec<String> = conn
            .zrevrange(self.index_key(app_name, user_id), 0, -1)
            .await
            .storage_err()?;

        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids.into_iter().map(SessionId::from) {
            let Some(meta) = self.load_meta(&mut conn, app_name, user_id, &id).await? else {
                continue;
            };
            let event_count: usize = conn
                .llen(self.session_key(app_name, user_id, &id, "events"))
                .await
                .storage_err()?;
            summaries.push(SessionSummary {
                id,
                app_name: app_name.to_string(),
                user_id: user_id.to_string(),
                created_at: meta.created_at,
                updated_at: meta.updated_at,
                event_count,
            });
        }
        Ok(summaries)
    }

    async fn delete_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
    ) -> SessionResult<bool> {
        Self::validate(app_name, user_id, session_id)?;
        let mut conn = self.get_connection().await?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("DEL")
            .arg(self.session_key(app_name, user_id, session_id, "meta"))
            .cmd("DEL")
            .arg(self.session_key(app_name, user_id, session_id, "state"))
            .ignore()
            .cmd("DEL")
            .arg(self.session_key(app_name, user_id, session_id, "events"))
            .ignore()
            .cmd("ZREM")
            .arg(self.index_key(app_name, user_id))
            .arg(session_id.as_str())
            .ignore();
        let (deleted,): (i64,) = pipe.query_async(&mut conn).await.storage_err()?;
        Ok(deleted > 0)
    }

    #[tracing::instrument(skip_all, fields(store = "redis", session_id = %session.id()))]
    async fn append_event(&self, session: &mut Session, event: Event) -> SessionResult<Event> {
        if event.is_partial() {
            return Ok(event);
        }
        let (app_name, user_id, id) = (session.app_name(), session.user_id(), session.id());
        let persisted = event.for_persistence();
        let scoped = ScopedDelta::split(&persisted.actions().state_delta);

        let mut conn = self.get_connection().await?;
        let meta = self
            .load_meta(&mut conn, app_name, user_id, id)
            .await?
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        let meta = serde_json::to_string(&SessionMeta {
            created_at: meta.created_at,
            updated_at: event.timestamp(),
        })?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("RPUSH")
            .arg(self.session_key(app_name, user_id, id, "events"))
            .arg(serde_json::to_string(&persisted)?)
            .ignore();
        write_delta(
            &mut pipe,
            &self.session_key(app_name, user_id, id, "state"),
            &scoped.session,
        )?;
        write_delta(&mut pipe, &self.app_state_key(app_name), &scoped.app)?;
        write_delta(&mut pipe, &self.user_state_key(app_name, user_id), &scoped.user)?;
        pipe.cmd("SET")
            .arg(self.session_key(app_name, user_id, id, "meta"))
            .arg(meta)
            .ignore();
        pipe.cmd("ZADD")
            .arg(self.index_key(app_name, user_id))
            .arg(event.timestamp().timestamp_millis())
            .arg(id.as_str())
            .ignore();
        pipe.query_async::<()>(&mut conn).await.storage_err()?;

        session.apply_event(&event);
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_validation() {
        assert!(RedisConfig::default().prefix("app_1:").is_ok());
        assert!(RedisConfig::default().prefix("bad prefix").is_err());
    }

    #[test]
    fn test_key_layout() {
        let store = RedisSessionStore::new("redis://127.0.0.1/").unwrap();
        let id = SessionId::from("s1");
        assert_eq!(
            store.session_key("app", "u1", &id, "events"),
            "agent_runtime:app:u1:s1:events"
        );
        assert_eq!(store.app_state_key("app"), "agent_runtime:app:app_state");
    }

    #[test]
    fn test_decode_hash() {
        let raw = HashMap::from([("count".to_string(), "3".to_string())]);
        let decoded = decode_hash(raw).unwrap();
        assert_eq!(decoded["count"], serde_json::json!(3));
    }
}
