use std::sync::Arc;

use futures::StreamExt;

use super::{Agent, AgentCore, AgentKind, EventStream, InvocationContext};
use crate::session::State;
use crate::Result;

/// Checked against session state before each iteration; `false` stops the loop.
pub type LoopCondition = Arc<dyn Fn(&State) -> bool + Send + Sync>;

/// Re-runs one wrapped agent until `max_iterations`, a failing condition,
/// or an escalating event (such as the `exit_loop` tool).
pub struct LoopAgent {
    core: AgentCore,
    max_iterations: Option<usize>,
    condition: Option<LoopCondition>,
}

impl LoopAgent {
    pub fn new(name: impl Into<String>, agent: Arc<dyn Agent>) -> Result<Self> {
        let mut core = AgentCore::new(name);
        core.attach(agent)?;
        Ok(Self {
            core,
            max_iterations: None,
            condition: None,
        })
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&State) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.core.set_description(description);
        self
    }

    pub fn max_iterations(&self) -> Option<usize> {
        self.max_iterations
    }
}

impl Agent for LoopAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Loop
    }

    fn run(self: Arc<Self>, ctx: InvocationContext) -> EventStream {
        let agent = self;
        Box::pin(async_stream::stream! {
            let Some(child) = agent.core.sub_agents().first() else {
                return;
            };
            let mut iteration = 0usize;
            loop {
                if agent.max_iterations.is_some_and(|max| iteration >= max) {
                    tracing::debug!(agent = %agent.core.name(), iteration, "Loop reached max iterations");
                    break;
                }
                if let Some(condition) = &agent.condition
                    && !condition(&ctx.state().await)
                {
                    tracing::debug!(agent = %agent.core.name(), iteration, "Loop condition no longer holds");
                    break;
                }
                iteration += 1;
                tracing::debug!(agent = %agent.core.name(), iteration, "Loop iteration");

                let mut events = Arc::clone(child).run(ctx.for_agent(child.name()));
                while let Some(item) = events.next().await {
                    match item {
                        Ok(event) => {
                            let escalate = event.actions().escalate;
                            yield Ok(event);
                            if escalate {
                                tracing::debug!(agent = %agent.core.name(), iteration, "Loop escalated");
                                return;
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for LoopAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopAgent")
            .field("core", &self.core)
            .field("max_iterations", &self.max_iterations)
            .field("has_condition", &self.condition.is_some())
            .finish()
    }
}
