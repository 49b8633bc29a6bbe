use std::sync::Arc;

use futures::StreamExt;

use super::{Agent, AgentCore, AgentKind, EventStream, InvocationContext};
use crate::Result;

/// Runs its children one after another, each seeing everything the earlier
/// children appended to the session.
#[derive(Debug)]
pub struct SequentialAgent {
    core: AgentCore,
}

impl SequentialAgent {
    pub fn new(name: impl Into<String>, sub_agents: Vec<Arc<dyn Agent>>) -> Result<Self> {
        let mut core = AgentCore::new(name);
        core.attach_all(sub_agents)?;
        Ok(Self { core })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.core.set_description(description);
        self
    }
}

impl Agent for SequentialAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Sequential
    }

    fn run(self: Arc<Self>, ctx: InvocationContext) -> EventStream {
        let agent = self;
        Box::pin(async_stream::stream! {
            for child in agent.core.sub_agents() {
                tracing::debug!(
                    invocation_id = %ctx.invocation_id(),
                    agent = %agent.core.name(),
                    child = %child.name(),
                    "Sequential step"
                );
                let mut events = Arc::clone(child).run(ctx.for_agent(child.name()));
                while let Some(item) = events.next().await {
                    match item {
                        Ok(event) => yield Ok(event),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::LlmAgent;
    use crate::config::RunConfig;
    use crate::testing::{ScriptedModel, invocation_context};

    fn step(name: &str, model: Arc<ScriptedModel>) -> Arc<dyn Agent> {
        Arc::new(LlmAgent::builder(name).model(model).build().unwrap())
    }

    #[tokio::test]
    async fn test_children_run_in_order() {
        let agent: Arc<dyn Agent> = Arc::new(
            SequentialAgent::new(
                "pipeline",
                vec![
                    step("draft", Arc::new(ScriptedModel::replying("m1", ["draft text"]))),
                    step("review", Arc::new(ScriptedModel::replying("m2", ["looks good"]))),
                ],
            )
            .unwrap(),
        );
        let ctx = invocation_context(Arc::clone(&agent), RunConfig::default());

        let events: Vec<_> = agent.run(ctx).collect().await;
        let authors: Vec<String> = events
            .into_iter()
            .map(|e| e.unwrap().author().to_string())
            .collect();
        assert_eq!(authors, vec!["draft", "review"]);
    }

    #[tokio::test]
    async fn test_failure_stops_remaining_children() {
        let later = Arc::new(ScriptedModel::replying("m2", ["unused"]));
        let agent: Arc<dyn Agent> = Arc::new(
            SequentialAgent::new(
                "pipeline",
                vec![
                    step("broken", Arc::new(ScriptedModel::failing("m1", "offline"))),
                    step("later", later.clone()),
                ],
            )
            .unwrap(),
        );
        let ctx = invocation_context(Arc::clone(&agent), RunConfig::default());

        let events: Vec<_> = agent.run(ctx).collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_err());
        assert_eq!(later.calls(), 0);
    }
}
