use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};

use super::{Agent, AgentCore, AgentKind, EventStream, InvocationContext};
use crate::event::Event;
use crate::{Error, Result};

type Delivery = (Result<Event>, oneshot::Sender<()>);

/// Runs all children concurrently, each in its own branch.
///
/// Children share the session but not their conversation: history for a
/// child only includes events from its own branch and from before the
/// fan-out. Each child task hands events over a bounded channel and waits
/// for the consumer to acknowledge (persist) an event before producing the
/// next, so a child always reads state that includes its own writes.
#[derive(Debug)]
pub struct ParallelAgent {
    core: AgentCore,
}

impl ParallelAgent {
    /// Fails if two children declare the same output key.
    pub fn new(name: impl Into<String>, sub_agents: Vec<Arc<dyn Agent>>) -> Result<Self> {
        let name = name.into();
        let mut seen = HashSet::new();
        for child in &sub_agents {
            if let Some(key) = child.output_key()
                && !seen.insert(key.to_string())
            {
                return Err(Error::composition(format!(
                    "parallel agent '{name}': output key '{key}' is declared by more than one child"
                )));
            }
        }
        let mut core = AgentCore::new(name);
        core.attach_all(sub_agents)?;
        Ok(Self { core })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.core.set_description(description);
        self
    }
}

impl Agent for ParallelAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Parallel
    }

    fn run(self: Arc<Self>, ctx: InvocationContext) -> EventStream {
        let agent = self;
        Box::pin(async_stream::stream! {
            let (tx, mut rx) = mpsc::channel::<Delivery>(ctx.run_config().parallel_buffer);
            let mut handles = Vec::with_capacity(agent.core.sub_agents().len());

            for child in agent.core.sub_agents() {
                let child_ctx = ctx.for_branch(agent.core.name(), child.name());
                let mut events = Arc::clone(child).run(child_ctx);
                let tx = tx.clone();
                handles.push(tokio::spawn(async move {
                    while let Some(item) = events.next().await {
                        let failed = item.is_err();
                        let (ack_tx, ack_rx) = oneshot::channel();
                        if tx.send((item, ack_tx)).await.is_err() || ack_rx.await.is_err() {
                            break;
                        }
                        if failed {
                            break;
                        }
                    }
                }));
            }
            drop(tx);

            while let Some((item, ack)) = rx.recv().await {
                let failed = item.is_err();
                yield item;
                let _ = ack.send(());
                if failed {
                    tracing::warn!(agent = %agent.core.name(), "Parallel child failed, cancelling siblings");
                    break;
                }
            }
            for handle in handles {
                handle.abort();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::LlmAgent;

    fn keyed(name: &str, key: &str) -> Arc<dyn Agent> {
        Arc::new(LlmAgent::builder(name).output_key(key).build().unwrap())
    }

    #[test]
    fn test_duplicate_output_keys_rejected() {
        let err = ParallelAgent::new("fan", vec![keyed("a", "out"), keyed("b", "out")])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAgentComposition(ref m) if m.contains("out")));
    }

    #[test]
    fn test_distinct_output_keys_accepted() {
        let agent =
            ParallelAgent::new("fan", vec![keyed("a", "price"), keyed("b", "sentiment")]).unwrap();
        assert_eq!(agent.kind(), AgentKind::Parallel);
        assert_eq!(agent.sub_agents().len(), 2);
    }
}
