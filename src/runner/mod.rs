//! Top-level entry point tying a session store, an agent tree and a model
//! registry together.

mod loaded;

pub use loaded::LoadedExecutionContext;

use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::agent::{Agent, AgentTree, InvocationContext};
use crate::config::{ConfigError, RunConfig};
use crate::event::{Event, InvocationId};
use crate::model::{Model, ModelRegistry};
use crate::session::{
    GetSessionConfig, MemorySessionStore, Session, SessionError, SessionId, SessionStore,
};
use crate::types::Content;
use crate::{Error, Result};

#[derive(Default)]
pub struct RunnerBuilder {
    app_name: Option<String>,
    agent: Option<Arc<dyn Agent>>,
    store: Option<Arc<dyn SessionStore>>,
    models: ModelRegistry,
    config: RunConfig,
}

impl RunnerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    /// Root of the agent tree.
    pub fn agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Defaults to a fresh [`MemorySessionStore`].
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn models(mut self, models: ModelRegistry) -> Self {
        self.models = models;
        self
    }

    pub fn model(mut self, model: Arc<dyn Model>) -> Self {
        self.models.register(model);
        self
    }

    pub fn config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the agent tree and the run configuration.
    pub fn build(self) -> Result<Runner> {
        let app_name = self
            .app_name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| ConfigError::NotFound {
                key: "app_name".into(),
            })?;
        let agent = self
            .agent
            .ok_or_else(|| Error::composition("runner has no root agent"))?;
        self.config.validate()?;
        let agents = AgentTree::build(agent)?;

        debug!(
            app = %app_name,
            root = %agents.root().name(),
            agents = agents.len(),
            models = self.models.len(),
            "Runner built"
        );
        Ok(Runner {
            inner: Arc::new(RunnerInner {
                app_name,
                agents: Arc::new(agents),
                store: self
                    .store
                    .unwrap_or_else(|| Arc::new(MemorySessionStore::new())),
                models: Arc::new(self.models),
                config: Arc::new(self.config),
                in_flight: DashMap::new(),
            }),
        })
    }
}

struct RunnerInner {
    app_name: String,
    agents: Arc<AgentTree>,
    store: Arc<dyn SessionStore>,
    models: Arc<ModelRegistry>,
    config: Arc<RunConfig>,
    /// Invocations currently streaming, keyed by `user/session`.
    in_flight: DashMap<String, InvocationId>,
}

/// Runs the agent tree against stored sessions.
///
/// Every event an agent produces is appended to the store before it is
/// yielded. Failures end the stream with a terminal error event that is
/// not persisted.
#[derive(Clone)]
pub struct Runner {
    inner: Arc<RunnerInner>,
}

/// Removes an in-flight marker when the invocation stream is dropped.
struct InFlight {
    runner: Runner,
    key: String,
    invocation_id: InvocationId,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.runner
            .inner
            .in_flight
            .remove_if(&self.key, |_, current| *current == self.invocation_id);
    }
}

impl Runner {
    pub fn builder() -> RunnerBuilder {
        RunnerBuilder::new()
    }

    pub fn app_name(&self) -> &str {
        &self.inner.app_name
    }

    pub fn root_agent(&self) -> &Arc<dyn Agent> {
        self.inner.agents.root()
    }

    pub fn agents(&self) -> &AgentTree {
        &self.inner.agents
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &RunConfig {
        &self.inner.config
    }

    /// Number of invocations currently being streamed.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Open (or create) a session and bind it to a reusable context.
    pub async fn load(
        &self,
        user_id: impl Into<String>,
        session_id: SessionId,
    ) -> Result<LoadedExecutionContext> {
        let user_id = user_id.into();
        self.open_session(&user_id, &session_id).await?;
        Ok(LoadedExecutionContext::new(self.clone(), user_id, session_id))
    }

    /// Process one user message.
    ///
    /// The session is created with `session_id` if it does not exist. The
    /// incoming message is persisted but not echoed. The stream ends after
    /// the agent finishes or after a single terminal error event.
    pub fn run(
        &self,
        user_id: &str,
        session_id: &SessionId,
        message: Content,
    ) -> BoxStream<'static, Event> {
        let runner = self.clone();
        let user_id = user_id.to_string();
        let session_id = session_id.clone();

        Box::pin(async_stream::stream! {
            let invocation_id = InvocationId::new();
            let root = runner.root_agent().name().to_string();
            info!(
                app = %runner.app_name(),
                user = %user_id,
                session_id = %session_id,
                invocation_id = %invocation_id,
                "Invocation started"
            );

            let session = match runner.open_session(&user_id, &session_id).await {
                Ok(session) => session,
                Err(e) => {
                    yield terminal_event(&invocation_id, &root, &e);
                    return;
                }
            };
            let _in_flight = runner.track(&user_id, &session_id, &invocation_id);
            let session = Arc::new(RwLock::new(session));

            let user_event = Event::user_message(invocation_id.clone(), message.clone());
            let appended = runner
                .inner
                .store
                .append_event(&mut *session.write().await, user_event)
                .await;
            if let Err(e) = appended {
                yield terminal_event(&invocation_id, &root, &Error::from(e));
                return;
            }

            let agent = runner.select_agent(&*session.read().await, &message);
            debug!(invocation_id = %invocation_id, agent = %agent.name(), "Selected agent");
            let ctx = InvocationContext::new(
                invocation_id.clone(),
                agent.name(),
                Some(message),
                Arc::clone(&session),
                Arc::clone(&runner.inner.config),
                Arc::clone(&runner.inner.agents),
                Arc::clone(&runner.inner.models),
            );
            let author = agent.name().to_string();

            let mut events = agent.run(ctx);
            while let Some(item) = events.next().await {
                let event = match item {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(invocation_id = %invocation_id, error = %e, code = e.code(), "Invocation failed");
                        yield terminal_event(&invocation_id, &author, &e);
                        return;
                    }
                };
                if event.is_partial() {
                    yield event;
                    continue;
                }
                let persisted = runner
                    .inner
                    .store
                    .append_event(&mut *session.write().await, event)
                    .await;
                match persisted {
                    Ok(event) => yield event,
                    Err(e) => {
                        let e = Error::from(e);
                        warn!(invocation_id = %invocation_id, error = %e, "Failed to persist event");
                        yield terminal_event(&invocation_id, &author, &e);
                        return;
                    }
                }
            }
            info!(invocation_id = %invocation_id, "Invocation complete");
        })
    }

    #[instrument(skip(self), fields(app = %self.app_name()))]
    async fn open_session(&self, user_id: &str, session_id: &SessionId) -> Result<Session> {
        let store = &self.inner.store;
        let app = self.app_name();
        match store
            .get_session(app, user_id, session_id, GetSessionConfig::default())
            .await
        {
            Ok(session) => Ok(session),
            Err(SessionError::NotFound { .. }) => {
                match store
                    .create_session(app, user_id, None, Some(session_id.clone()))
                    .await
                {
                    Ok(session) => Ok(session),
                    // Lost a creation race; the other writer's session is as good.
                    Err(SessionError::AlreadyExists { .. }) => Ok(store
                        .get_session(app, user_id, session_id, GetSessionConfig::default())
                        .await?),
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn track(&self, user_id: &str, session_id: &SessionId, invocation_id: &InvocationId) -> InFlight {
        let key = format!("{user_id}/{session_id}");
        if let Some(previous) = self.inner.in_flight.insert(key.clone(), invocation_id.clone()) {
            warn!(
                session_id = %session_id,
                previous = %previous,
                current = %invocation_id,
                "Concurrent invocations on one session are not serialized"
            );
        }
        InFlight {
            runner: self.clone(),
            key,
            invocation_id: invocation_id.clone(),
        }
    }

    /// Agent that should handle `message`.
    ///
    /// A function response goes back to the agent that issued the matching
    /// call. Otherwise the most recent agent that spoke keeps the
    /// conversation if every agent from it up to the root is an LLM agent
    /// that allows transfer to its parent. Everything else goes to the root.
    fn select_agent(&self, session: &Session, message: &Content) -> Arc<dyn Agent> {
        let tree = &self.inner.agents;

        if let Some(response) = message.function_responses_iter().next() {
            let caller = session.events().iter().rev().find(|event| {
                event
                    .function_calls()
                    .iter()
                    .any(|call| call.id == response.id)
            });
            if let Some(agent) = caller.and_then(|event| tree.get(event.author())) {
                return Arc::clone(agent);
            }
        }

        for event in session.events().iter().rev().filter(|e| !e.is_user()) {
            let Some(agent) = tree.get(event.author()) else {
                continue;
            };
            if agent.name() == tree.root().name() || self.is_transferable(agent) {
                return Arc::clone(agent);
            }
        }
        Arc::clone(tree.root())
    }

    fn is_transferable(&self, agent: &Arc<dyn Agent>) -> bool {
        let tree = &self.inner.agents;
        std::iter::once(agent)
            .chain(tree.ancestors(agent.name()))
            .all(|a| a.as_llm().is_some_and(|llm| !llm.disallow_transfer_to_parent()))
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("app_name", &self.inner.app_name)
            .field("agents", &self.inner.agents)
            .field("store", &self.inner.store.name())
            .finish_non_exhaustive()
    }
}

fn terminal_event(invocation_id: &InvocationId, author: &str, error: &Error) -> Event {
    Event::error(invocation_id.clone(), author, error.code(), error.to_string())
}

#[cfg(test)]
mod tests;
