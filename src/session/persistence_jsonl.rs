//! JSONL file-backed session store.
//!
//! Each session is one append-only file. The first line holds the session
//! metadata and its initial session-scoped state; every further line is one
//! event. App- and user-scoped state live in small JSON files that are
//! replaced atomically (write to a temp file, then rename).
//!
//! # File Structure
//!
//! ```text
//! {base_dir}/
//! └── {app_name}/
//!     ├── app_state.json
//!     └── {user_id}/
//!         ├── user_state.json
//!         ├── {session_id}.jsonl
//!         └── ...
//! ```

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::persistence::{GetSessionConfig, SessionStore, creation_event};
use super::state::{ScopedDelta, State, StateMap, StateScope, apply_to_map};
use super::types::{Session, SessionId, SessionSummary, sort_summaries};
use super::{SessionError, SessionResult, validate_id};
use crate::event::Event;

const SESSION_EXT: &str = "jsonl";
const APP_STATE_FILE: &str = "app_state.json";
const USER_STATE_FILE: &str = "user_state.json";

// ============================================================================
// Configuration
// ============================================================================

/// Sync mode for file operations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// No explicit sync (OS buffering only).
    #[default]
    None,
    /// Sync after every write (safest, slowest).
    OnWrite,
}

#[derive(Clone, Debug)]
pub struct JsonlConfig {
    /// Root directory for session files.
    pub base_dir: PathBuf,
    pub sync_mode: SyncMode,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        let base_dir = directories::ProjectDirs::from("", "", "agent-runtime")
            .map(|dirs| dirs.data_dir().join("sessions"))
            .unwrap_or_else(|| PathBuf::from(".agent-runtime").join("sessions"));
        Self {
            base_dir,
            sync_mode: SyncMode::default(),
        }
    }
}

impl JsonlConfig {
    pub fn builder() -> JsonlConfigBuilder {
        JsonlConfigBuilder::default()
    }

    fn app_dir(&self, app_name: &str) -> PathBuf {
        self.base_dir.join(app_name)
    }

    fn user_dir(&self, app_name: &str, user_id: &str) -> PathBuf {
        self.app_dir(app_name).join(user_id)
    }
}

/// Builder for JsonlConfig.
#[derive(Default)]
pub struct JsonlConfigBuilder {
    base_dir: Option<PathBuf>,
    sync_mode: Option<SyncMode>,
}

impl JsonlConfigBuilder {
    pub fn base_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(path.into());
        self
    }

    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = Some(mode);
        self
    }

    pub fn build(self) -> JsonlConfig {
        let default = JsonlConfig::default();
        JsonlConfig {
            base_dir: self.base_dir.unwrap_or(default.base_dir),
            sync_mode: self.sync_mode.unwrap_or(default.sync_mode),
        }
    }
}

// ============================================================================
// Entry Types
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JsonlEntry {
    Meta(SessionMetaEntry),
    Event { event: Box<Event> },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SessionMetaEntry {
    session_id: SessionId,
    app_name: String,
    user_id: String,
    created_at: DateTime<Utc>,
}

// ============================================================================
// File Operations (blocking, run via spawn_blocking)
// ============================================================================

fn io_err(context: &str, path: &Path, e: impl std::fmt::Display) -> SessionError {
    SessionError::Storage {
        message: format!("{} {}: {}", context, path.display(), e),
    }
}

fn read_entries_sync(path: &Path) -> SessionResult<Vec<JsonlEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = std::fs::File::open(path).map_err(|e| io_err("Failed to open", path, e))?;
    let reader = BufReader::with_capacity(64 * 1024, file);
    let mut entries = Vec::with_capacity(128);

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| SessionError::Storage {
            message: format!("Read error at line {}: {}", line_num + 1, e),
        })?;

        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<JsonlEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = line_num + 1,
                    error = %e,
                    "Skipping malformed JSONL entry"
                );
            }
        }
    }

    Ok(entries)
}

fn append_entries_sync(path: &Path, entries: &[JsonlEntry], sync: bool) -> SessionResult<()> {
    if entries.is_empty() {
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| io_err("Failed to create directory", parent, e))?;
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_err("Failed to open for writing", path, e))?;

    let mut writer = std::io::BufWriter::with_capacity(64 * 1024, file);

    for entry in entries {
        serde_json::to_writer(&mut writer, entry)?;
        writeln!(writer).map_err(|e| io_err("Write failed", path, e))?;
    }

    writer
        .flush()
        .map_err(|e| io_err("Flush failed", path, e))?;

    if sync {
        writer
            .into_inner()
            .map_err(|e| io_err("Buffer error", path, e.error()))?
            .sync_all()
            .map_err(|e| io_err("Sync failed", path, e))?;
    }

    Ok(())
}

fn read_state_sync(path: &Path) -> SessionResult<StateMap> {
    if !path.exists() {
        return Ok(StateMap::new());
    }
    let bytes = std::fs::read(path).map_err(|e| io_err("Failed to read", path, e))?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn write_state_sync(path: &Path, state: &StateMap, sync: bool) -> SessionResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| io_err("Failed to create directory", parent, e))?;

    let tmp_path = parent.join(format!(".state.{}.tmp", uuid::Uuid::new_v4().simple()));
    let content = serde_json::to_vec_pretty(state)?;

    let result = (|| -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(&content)?;
        if sync {
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, path)
    })();

    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(io_err("Failed to write", path, e));
    }
    Ok(())
}

fn update_state_sync(path: &Path, delta: &StateMap, sync: bool) -> SessionResult<()> {
    if delta.is_empty() {
        return Ok(());
    }
    let mut state = read_state_sync(path)?;
    apply_to_map(&mut state, delta);
    write_state_sync(path, &state, sync)
}

/// Meta line plus events, folded into a session holding only session-scoped state.
fn reconstruct(entries: Vec<JsonlEntry>) -> Option<Session> {
    let mut entries = entries.into_iter();
    let meta = match entries.next() {
        Some(JsonlEntry::Meta(meta)) => meta,
        _ => return None,
    };
    let events: Vec<Event> = entries
        .filter_map(|entry| match entry {
            JsonlEntry::Event { event } => Some(*event),
            JsonlEntry::Meta(_) => None,
        })
        .collect();

    let replayed = Session::replay(
        meta.session_id.clone(),
        meta.app_name.clone(),
        meta.user_id.clone(),
        State::new(),
        events,
    );
    let updated_at = replayed
        .last_event()
        .map(|e| e.timestamp())
        .unwrap_or(meta.created_at);
    Some(Session::from_parts(
        meta.session_id,
        meta.app_name,
        meta.user_id,
        State::from_map(replayed.state().scope(StateScope::Session)),
        replayed.events().to_vec(),
        meta.created_at,
        updated_at,
    ))
}

async fn blocking<T, F>(f: F) -> SessionResult<T>
where
    F: FnOnce() -> SessionResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SessionError::Storage {
            message: format!("Task join error: {}", e),
        })?
}

// ============================================================================
// JSONL Store Implementation
// ============================================================================

pub struct JsonlSessionStore {
    config: JsonlConfig,
    // Writers hold the write half so an event and its state files land together.
    lock: Arc<RwLock<()>>,
}

impl JsonlSessionStore {
    pub async fn new(config: JsonlConfig) -> SessionResult<Self> {
        tokio::fs::create_dir_all(&config.base_dir)
            .await
            .map_err(|e| io_err("Failed to create", &config.base_dir, e))?;

        Ok(Self {
            config,
            lock: Arc::new(RwLock::new(())),
        })
    }

    pub async fn default_config() -> SessionResult<Self> {
        Self::new(JsonlConfig::default()).await
    }

    fn sync(&self) -> bool {
        self.config.sync_mode == SyncMode::OnWrite
    }

    fn session_path(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
    ) -> SessionResult<PathBuf> {
        validate_id("app name", app_name)?;
        validate_id("user id", user_id)?;
        validate_id("session id", session_id.as_str())?;
        Ok(self
            .config
            .user_dir(app_name, user_id)
            .join(format!("{}.{}", session_id, SESSION_EXT)))
    }

    fn app_state_path(&self, app_name: &str) -> PathBuf {
        self.config.app_dir(app_name).join(APP_STATE_FILE)
    }

    fn user_state_path(&self, app_name: &str, user_id: &str) -> PathBuf {
        self.config.user_dir(app_name, user_id).join(USER_STATE_FILE)
    }

    async fn shared_state(&self, app_name: &str, user_id: &str) -> SessionResult<(StateMap, StateMap)> {
        let app_path = self.app_state_path(app_name);
        let user_path = self.user_state_path(app_name, user_id);
        blocking(move || Ok((read_state_sync(&app_path)?, read_state_sync(&user_path)?))).await
    }

    async fn load_stored(&self, path: PathBuf) -> SessionResult<Option<Session>> {
        let entries = blocking(move || read_entries_sync(&path)).await?;
        Ok(reconstruct(entries))
    }
}

#[async_trait::async_trait]
impl SessionStore for JsonlSessionStore {
    fn name(&self) -> &str {
        "jsonl"
    }

    #[tracing::instrument(skip(self, initial_state), fields(store = "jsonl"))]
    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        initial_state: Option<StateMap>,
        session_id: Option<SessionId>,
    ) -> SessionResult<Session> {
        let id = session_id.unwrap_or_default();
        let path = self.session_path(app_name, user_id, &id)?;
        let seed = creation_event(initial_state);
        let scoped = seed
            .as_ref()
            .map(|e| ScopedDelta::split(&e.actions().state_delta))
            .unwrap_or_default();

        let _guard = self.lock.write().await;
        if path.exists() {
            return Err(SessionError::AlreadyExists { id: id.to_string() });
        }

        let created_at = seed.as_ref().map(Event::timestamp).unwrap_or_else(Utc::now);
        let mut entries = vec![JsonlEntry::Meta(SessionMetaEntry {
            session_id: id.clone(),
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            created_at,
        })];
        entries.extend(seed.iter().map(|event| JsonlEntry::Event {
            event: Box::new(event.clone()),
        }));
        let app_path = self.app_state_path(app_name);
        let user_path = self.user_state_path(app_name, user_id);
        let sync = self.sync();
        let (app_state, user_state) = blocking(move || {
            append_entries_sync(&path, &entries, sync)?;
            update_state_sync(&app_path, &scoped.app, sync)?;
            update_state_sync(&user_path, &scoped.user, sync)?;
            Ok((read_state_sync(&app_path)?, read_state_sync(&user_path)?))
        })
        .await?;

        tracing::debug!(session_id = %id, seeded = seed.is_some(), "Created session file");
        let replayed = Session::replay(id.clone(), app_name, user_id, State::new(), seed);
        Ok(Session::from_parts(
            id,
            app_name,
            user_id,
            State::merged(
                &replayed.state().scope(StateScope::Session),
                &app_state,
                &user_state,
            ),
            replayed.events().to_vec(),
            created_at,
            created_at,
        ))
    }

    async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
        config: GetSessionConfig,
    ) -> SessionResult<Session> {
        let path = self.session_path(app_name, user_id, session_id)?;
        let _guard = self.lock.read().await;

        let mut session = self
            .load_stored(path)
            .await?
            .ok_or_else(|| SessionError::NotFound {
                id: session_id.to_string(),
            })?;
        let (app_state, user_state) = self.shared_state(app_name, user_id).await?;
        session.set_state(State::merged(
            session.state().as_map(),
            &app_state,
            &user_state,
        ));
        session.set_events(config.apply(session.events().to_vec()));
        Ok(session)
    }

    async fn list_sessions(
        &self,
        app_name: &str,
        user_id: &str,
    ) -> SessionResult<Vec<SessionSummary>> {
        validate_id("app name", app_name)?;
        validate_id("user id", user_id)?;
        let dir = self.config.user_dir(app_name, user_id);
        let _guard = self.lock.read().await;

        let mut summaries = blocking(move || {
            let mut summaries = Vec::new();
            let read_dir = match std::fs::read_dir(&dir) {
                Ok(read_dir) => read_dir,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(summaries),
                Err(e) => return Err(io_err("Failed to read directory", &dir, e)),
            };
            for entry in read_dir.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(SESSION_EXT) {
                    continue;
                }
                if let Some(session) = reconstruct(read_entries_sync(&path)?) {
                    summaries.push(session.summary());
                }
            }
            Ok(summaries)
        })
        .await?;

        sort_summaries(&mut summaries);
        Ok(summaries)
    }

    async fn delete_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
    ) -> SessionResult<bool> {
        let path = self.session_path(app_name, user_id, session_id)?;
        let _guard = self.lock.write().await;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err("Failed to delete", &path, e)),
        }
    }

    #[tracing::instrument(skip_all, fields(store = "jsonl", session_id = %session.id()))]
    async fn append_event(&self, session: &mut Session, event: Event) -> SessionResult<Event> {
        if event.is_partial() {
            return Ok(event);
        }
        let path = self.session_path(session.app_name(), session.user_id(), session.id())?;
        let scoped = ScopedDelta::split(&event.actions().state_delta);
        let entry = JsonlEntry::Event {
            event: Box::new(event.for_persistence()),
        };
        let app_path = self.app_state_path(session.app_name());
        let user_path = self.user_state_path(session.app_name(), session.user_id());
        let sync = self.sync();

        let _guard = self.lock.write().await;
        if !path.exists() {
            return Err(SessionError::NotFound {
                id: session.id().to_string(),
            });
        }
        blocking(move || {
            append_entries_sync(&path, &[entry], sync)?;
            update_state_sync(&app_path, &scoped.app, sync)?;
            update_state_sync(&user_path, &scoped.user, sync)
        })
        .await?;

        session.apply_event(&event);
        Ok(event)
    }
}
