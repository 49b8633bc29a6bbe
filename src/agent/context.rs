use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::RwLock;

use super::{Agent, AgentTree};
use crate::config::RunConfig;
use crate::event::InvocationId;
use crate::model::ModelRegistry;
use crate::session::{Session, State};
use crate::types::Content;
use crate::{Error, Result};

/// Everything one agent run can see: the live session, the agent tree, the
/// model registry and the invocation-wide limits.
///
/// Cloning is cheap; the session and counters are shared.
#[derive(Clone)]
pub struct InvocationContext {
    invocation_id: InvocationId,
    agent_name: String,
    branch: Option<String>,
    user_content: Option<Content>,
    session: Arc<RwLock<Session>>,
    run_config: Arc<RunConfig>,
    agents: Arc<AgentTree>,
    models: Arc<ModelRegistry>,
    llm_calls: Arc<AtomicUsize>,
}

impl InvocationContext {
    pub(crate) fn new(
        invocation_id: InvocationId,
        agent_name: impl Into<String>,
        user_content: Option<Content>,
        session: Arc<RwLock<Session>>,
        run_config: Arc<RunConfig>,
        agents: Arc<AgentTree>,
        models: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            invocation_id,
            agent_name: agent_name.into(),
            branch: None,
            user_content,
            session,
            run_config,
            agents,
            models,
            llm_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn invocation_id(&self) -> &InvocationId {
        &self.invocation_id
    }

    /// Agent currently executing under this context.
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    pub fn user_content(&self) -> Option<&Content> {
        self.user_content.as_ref()
    }

    pub fn session(&self) -> &Arc<RwLock<Session>> {
        &self.session
    }

    pub fn run_config(&self) -> &RunConfig {
        &self.run_config
    }

    pub fn agents(&self) -> &AgentTree {
        &self.agents
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn agent(&self) -> Option<&Arc<dyn Agent>> {
        self.agents.get(&self.agent_name)
    }

    /// Snapshot of the session state as of the last persisted event.
    pub async fn state(&self) -> State {
        self.session.read().await.state().clone()
    }

    pub async fn session_snapshot(&self) -> Session {
        self.session.read().await.clone()
    }

    /// Same invocation and branch, running `agent_name`.
    pub fn for_agent(&self, agent_name: &str) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            ..self.clone()
        }
    }

    /// Context for `child` running in its own branch under `parent`, so that
    /// concurrent siblings do not see each other's conversation.
    pub fn for_branch(&self, parent: &str, child: &str) -> Self {
        let branch = match &self.branch {
            Some(current) => format!("{current}.{child}"),
            None => format!("{parent}.{child}"),
        };
        Self {
            agent_name: child.to_string(),
            branch: Some(branch),
            ..self.clone()
        }
    }

    /// Count one model call against `max_llm_calls`.
    pub fn count_llm_call(&self) -> Result<usize> {
        let calls = self.llm_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let max = self.run_config.max_llm_calls;
        if max > 0 && calls > max {
            return Err(Error::FlowExhausted {
                limit: "max_llm_calls",
                max,
            });
        }
        Ok(calls)
    }

    pub fn llm_calls(&self) -> usize {
        self.llm_calls.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("invocation_id", &self.invocation_id)
            .field("agent_name", &self.agent_name)
            .field("branch", &self.branch)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::invocation_context as context_for;
    use crate::agent::{LlmAgent, ParallelAgent};

    fn leaf(name: &str) -> Arc<dyn Agent> {
        Arc::new(LlmAgent::builder(name).build().unwrap())
    }

    #[test]
    fn test_branch_naming() {
        let root: Arc<dyn Agent> =
            Arc::new(ParallelAgent::new("fan", vec![leaf("a"), leaf("b")]).unwrap());
        let ctx = context_for(root, RunConfig::default());

        let a = ctx.for_branch("fan", "a");
        assert_eq!(a.branch(), Some("fan.a"));
        assert_eq!(a.agent_name(), "a");

        let nested = a.for_branch("a", "x");
        assert_eq!(nested.branch(), Some("fan.a.x"));
        assert_eq!(ctx.for_agent("b").branch(), None);
    }

    #[test]
    fn test_llm_call_budget() {
        let ctx = context_for(leaf("solo"), RunConfig::default().with_max_llm_calls(2));
        assert_eq!(ctx.count_llm_call().unwrap(), 1);
        // Clones share the counter.
        assert_eq!(ctx.for_agent("solo").count_llm_call().unwrap(), 2);
        assert!(matches!(
            ctx.count_llm_call(),
            Err(Error::FlowExhausted {
                limit: "max_llm_calls",
                max: 2
            })
        ));

        let unlimited = context_for(leaf("solo"), RunConfig::default().with_max_llm_calls(0));
        for _ in 0..1000 {
            unlimited.count_llm_call().unwrap();
        }
    }
}
