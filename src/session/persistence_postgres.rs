//! PostgreSQL session store.
//!
//! Enable with the `postgres` feature flag. Appending an event inserts the
//! event row and merges every scoped state delta inside one transaction.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use super::persistence::{GetSessionConfig, SessionStore, creation_event};
use super::state::{ScopedDelta, State, StateMap};
use super::types::{Session, SessionId, SessionSummary};
use super::{SessionError, SessionResult, StorageResultExt};
use crate::event::Event;

#[derive(Clone, Debug)]
pub struct PostgresConfig {
    /// Prefix for every table this store creates.
    pub table_prefix: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            table_prefix: "agent_runtime".to_string(),
        }
    }
}

impl PostgresConfig {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            table_prefix: prefix.into(),
        }
    }

    fn sessions(&self) -> String {
        format!("{}_sessions", self.table_prefix)
    }

    fn events(&self) -> String {
        format!("{}_events", self.table_prefix)
    }

    fn app_states(&self) -> String {
        format!("{}_app_states", self.table_prefix)
    }

    fn user_states(&self) -> String {
        format!("{}_user_states", self.table_prefix)
    }
}

pub struct PostgresSessionStore {
    pool: Arc<PgPool>,
    config: PostgresConfig,
}

fn to_map(value: serde_json::Value) -> StateMap {
    match value {
        serde_json::Value::Object(map) => map,
        _ => StateMap::new(),
    }
}

impl PostgresSessionStore {
    pub async fn new(database_url: &str) -> SessionResult<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .storage_err_ctx("Failed to connect")?;
        Ok(Self::with_pool(Arc::new(pool), PostgresConfig::default()))
    }

    /// Create with an existing connection pool.
    pub fn with_pool(pool: Arc<PgPool>, config: PostgresConfig) -> Self {
        Self { pool, config }
    }

    pub async fn migrate(&self) -> SessionResult<()> {
        let statements = [
            format!(
                r#"CREATE TABLE IF NOT EXISTS {sessions} (
                    app_name VARCHAR(255) NOT NULL,
                    user_id VARCHAR(255) NOT NULL,
                    id VARCHAR(255) NOT NULL,
                    state JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    PRIMARY KEY (app_name, user_id, id)
                )"#,
                sessions = self.config.sessions()
            ),
            format!(
                r#"CREATE TABLE IF NOT EXISTS {events} (
                    seq BIGSERIAL PRIMARY KEY,
                    app_name VARCHAR(255) NOT NULL,
                    user_id VARCHAR(255) NOT NULL,
                    session_id VARCHAR(255) NOT NULL,
                    event_id VARCHAR(255) NOT NULL,
                    data JSONB NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    FOREIGN KEY (app_name, user_id, session_id)
                        REFERENCES {sessions} (app_name, user_id, id) ON DELETE CASCADE
                )"#,
                events = self.config.events(),
                sessions = self.config.sessions()
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{events}_session ON {events} (app_name, user_id, session_id, seq)",
                events = self.config.events()
            ),
            format!(
                r#"CREATE TABLE IF NOT EXISTS {} (
                    app_name VARCHAR(255) PRIMARY KEY,
                    state JSONB NOT NULL DEFAULT '{{}}'::jsonb
                )"#,
                self.config.app_states()
            ),
            format!(
                r#"CREATE TABLE IF NOT EXISTS {} (
                    app_name VARCHAR(255) NOT NULL,
                    user_id VARCHAR(255) NOT NULL,
                    state JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                    PRIMARY KEY (app_name, user_id)
                )"#,
                self.config.user_states()
            ),
        ];
        for statement in statements {
            sqlx::query(&statement)
                .execute(&*self.pool)
                .await
                .storage_err_ctx("Migration failed")?;
        }
        Ok(())
    }

    async fn insert_event(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        session: (&str, &str, &SessionId),
        event: &Event,
    ) -> SessionResult<()> {
        let (app_name, user_id, session_id) = session;
        let query = format!(
            r#"INSERT INTO {} (app_name, user_id, session_id, event_id, data, created_at)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
            self.config.events()
        );
        sqlx::query(&query)
            .bind(app_name)
            .bind(user_id)
            .bind(session_id.as_str())
            .bind(&event.id().0)
            .bind(serde_json::to_value(event)?)
            .bind(event.timestamp())
            .execute(&mut **tx)
            .await
            .storage_err_ctx("Failed to insert event")?;
        Ok(())
    }

    // `jsonb_strip_nulls` turns a null delta value into a key removal.
    async fn merge_shared(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        app_name: &str,
        user_id: &str,
        scoped: &ScopedDelta,
    ) -> SessionResult<()> {
        if !scoped.app.is_empty() {
            let query = format!(
                r#"INSERT INTO {t} (app_name, state) VALUES ($1, jsonb_strip_nulls($2))
                   ON CONFLICT (app_name) DO UPDATE SET state = jsonb_strip_nulls({t}.state || $2)"#,
                t = self.config.app_states()
            );
            sqlx::query(&query)
                .bind(app_name)
                .bind(serde_json::Value::Object(scoped.app.clone()))
                .execute(&mut **tx)
                .await
                .storage_err_ctx("Failed to merge app state")?;
        }
        if !scoped.user.is_empty() {
            let query = format!(
                r#"INSERT INTO {t} (app_name, user_id, state) VALUES ($1, $2, jsonb_strip_nulls($3))
                   ON CONFLICT (app_name, user_id) DO UPDATE SET state = jsonb_strip_nulls({t}.state || $3)"#,
                t = self.config.user_states()
            );
            sqlx::query(&query)
                .bind(app_name)
                .bind(user_id)
                .bind(serde_json::Value::Object(scoped.user.clone()))
                .execute(&mut **tx)
                .await
                .storage_err_ctx("Failed to merge user state")?;
        }
        Ok(())
    }

    async fn shared_state(&self, app_name: &str, user_id: &str) -> SessionResult<(StateMap, StateMap)> {
        let app_query = format!("SELECT state FROM {} WHERE app_name = $1", self.config.app_states());
        let app = sqlx::query(&app_query)
            .bind(app_name)
            .fetch_optional(&*self.pool)
            .await
            .storage_err()?
            .map(|row| row.try_get::<serde_json::Value, _>("state"))
            .transpose()
            .storage_err()?
            .map(to_map)
            .unwrap_or_default();

        let user_query = format!(
            "SELECT state FROM {} WHERE app_name = $1 AND user_id = $2",
            self.config.user_states()
        );
        let user = sqlx::query(&user_query)
            .bind(app_name)
            .bind(user_id)
            .fetch_optional(&*self.pool)
            .await
            .storage_err()?
            .map(|row| row.try_get::<serde_json::Value, _>("state"))
            .transpose()
            .storage_err()?
            .map(to_map)
            .unwrap_or_default();

        Ok((app, user))
    }

    fn summary_from_row(row: &PgRow) -> SessionResult<SessionSummary> {
        Ok(SessionSummary {
            id: SessionId::from(row.try_get::<String, _>("id").storage_err()?),
            app_name: row.try_get("app_name").storage_err()?,
            user_id: row.try_get("user_id").storage_err()?,
            created_at: row.try_get("created_at").storage_err()?,
            updated_at: row.try_get("updated_at").storage_err()?,
            event_count: row.try_get::<i64, _>("event_count").storage_err()? as usize,
        })
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    fn name(&self) -> &str {
        "postgres"
    }

    #[tracing::instrument(skip(self, initial_state), fields(store = "postgres"))]
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        initial_state: Option<StateMap>,
        session_id: Option<SessionId>,
    ) -> SessionResult<Session> {
        let id = session_id.unwrap_or_default();
        let seed = creation_event(initial_state);
        let scoped = seed
            .as_ref()
            .map(|e| ScopedDelta::split(&e.actions().state_delta))
            .unwrap_or_default();
        let now = seed.as_ref().map(Event::timestamp).unwrap_or_else(Utc::now);

        let mut tx = self.pool.begin().await.storage_err()?;
        let query = format!(
            r#"INSERT INTO {} (app_name, user_id, id, state, created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $5)
               ON CONFLICT DO NOTHING"#,
            self.config.sessions()
        );
        let inserted = sqlx::query(&query)
            .bind(app_name)
            .bind(user_id)
            .bind(id.as_str())
            .bind(serde_json::Value::Object(scoped.session.clone()))
            .bind(now)
            .execute(&mut *tx)
            .await
            .storage_err_ctx("Failed to insert session")?;
        if inserted.rows_affected() == 0 {
            return Err(SessionError::AlreadyExists { id: id.to_string() });
        }
        if let Some(seed) = &seed {
            self.insert_event(&mut tx, (app_name, user_id, &id), seed).await?;
        }
        self.merge_shared(&mut tx, app_name, user_id, &scoped).await?;
        tx.commit().await.storage_err()?;

        let (app, user) = self.shared_state(app_name, user_id).await?;
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
        let query = format!(
            "SELECT state, created_at, updated_at FROM {} WHERE app_name = $1 AND user_id = $2 AND id = $3",
            self.config.sessions()
        );
        let row = sqlx::query(&query)
            .bind(app_name)
            .bind(user_id)
            .bind(session_id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .storage_err()?
            .ok_or_else(|| SessionError::NotFound {
                id: session_id.to_string(),
            })?;
        let state = to_map(row.try_get("state").storage_err()?);
        let created_at: DateTime<Utc> = row.try_get("created_at").storage_err()?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at").storage_err()?;

        let events_query = format!(
            r#"SELECT data FROM {} WHERE app_name = $1 AND user_id = $2 AND session_id = $3
               ORDER BY seq ASC"#,
            self.config.events()
        );
        let events = sqlx::query(&events_query)
            .bind(app_name)
            .bind(user_id)
            .bind(session_id.as_str())
            .fetch_all(&*self.pool)
            .await
            .storage_err()?
            .iter()
            .map(|row| {
                let data: serde_json::Value = row.try_get("data").storage_err()?;
                Ok(serde_json::from_value::<Event>(data)?)
            })
            .collect::<SessionResult<Vec<_>>>()?;

        let (app, user) = self.shared_state(app_name, user_id).await?;
        Ok(Session::from_parts(
            session_id.clone(),
            app_name,
            user_id,
            State::merged(&state, &app, &user),
            config.apply(events),
            created_at,
            updated_at,
        ))
    }

    async fn list_sessions(
        &self,
        app_name: &str,
        user_id: &str,
    ) -> SessionResult<Vec<SessionSummary>> {
        let query = format!(
            r#"SELECT s.app_name, s.user_id, s.id, s.created_at, s.updated_at,
                      (SELECT COUNT(*) FROM {events} e
                        WHERE e.app_name = s.app_name AND e.user_id = s.user_id AND e.session_id = s.id)
                        AS event_count
               FROM {sessions} s
               WHERE s.app_name = $1 AND s.user_id = $2
               ORDER BY s.updated_at DESC, s.id ASC"#,
            events = self.config.events(),
            sessions = self.config.sessions()
        );
        let rows = sqlx::query(&query)
            .bind(app_name)
            .bind(user_id)
            .fetch_all(&*self.pool)
            .await
            .storage_err()?;
        rows.iter().map(Self::summary_from_row).collect()
    }

    async fn delete_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
    ) -> SessionResult<bool> {
        let query = format!(
            "DELETE FROM {} WHERE app_name = $1 AND user_id = $2 AND id = $3",
            self.config.sessions()
        );
        let result = sqlx::query(&query)
            .bind(app_name)
            .bind(user_id)
            .bind(session_id.as_str())
            .execute(&*self.pool)
            .await
            .storage_err()?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip_all, fields(store = "postgres", session_id = %session.id()))]
    async fn append_event(&self, session: &mut Session, event: Event) -> SessionResult<Event> {
        if event.is_partial() {
            return Ok(event);
        }
        let persisted = event.for_persistence();
        let scoped = ScopedDelta::split(&persisted.actions().state_delta);

        let mut tx = self.pool.begin().await.storage_err()?;
        let update = format!(
            r#"UPDATE {} SET state = jsonb_strip_nulls(state || $4), updated_at = $5
               WHERE app_name = $1 AND user_id = $2 AND id = $3"#,
            self.config.sessions()
        );
        let updated = sqlx::query(&update)
            .bind(session.app_name())
            .bind(session.user_id())
            .bind(session.id().as_str())
            .bind(serde_json::Value::Object(scoped.session.clone()))
            .bind(event.timestamp())
            .execute(&mut *tx)
            .await
            .storage_err_ctx("Failed to update session state")?;
        if updated.rows_affected() == 0 {
            return Err(SessionError::NotFound {
                id: session.id().to_string(),
            });
        }

        self.insert_event(
            &mut tx,
            (session.app_name(), session.user_id(), session.id()),
            &persisted,
        )
        .await?;

        self.merge_shared(&mut tx, session.app_name(), session.user_id(), &scoped)
            .await?;
        tx.commit().await.storage_err()?;

        session.apply_event(&event);
        Ok(event)
    }
}
