//! Agents and their composition.
//!
//! Every agent exposes a [`AgentCore`] (name, description, owned children)
//! and produces a lazy [`EventStream`] for one invocation. Leaf
//! [`LlmAgent`]s run the turn state machine in [`crate::flow`]; the
//! composites only decide which children run and when.

mod base;
mod context;
mod graph;
mod llm;
mod loop_agent;
mod parallel;
mod sequential;
mod tree;

pub use base::AgentCore;
pub use context::InvocationContext;
pub use graph::{GraphAgent, GraphAgentBuilder, GraphNode, Guard};
pub use llm::{IncludeContents, LlmAgent, LlmAgentBuilder};
pub use loop_agent::{LoopAgent, LoopCondition};
pub use parallel::ParallelAgent;
pub use sequential::SequentialAgent;
pub use tree::AgentTree;

pub(crate) use llm::ModelSource;

use std::sync::Arc;

use futures::stream::BoxStream;

use crate::event::Event;

/// Lazy sequence of events produced by one agent run.
pub type EventStream = BoxStream<'static, crate::Result<Event>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentKind {
    Llm,
    Sequential,
    Parallel,
    Loop,
    Graph,
    /// User-defined agent implementing [`Agent`] directly
    Custom,
}

pub trait Agent: Send + Sync {
    fn core(&self) -> &AgentCore;

    fn kind(&self) -> AgentKind;

    fn name(&self) -> &str {
        self.core().name()
    }

    fn description(&self) -> &str {
        self.core().description()
    }

    fn sub_agents(&self) -> &[Arc<dyn Agent>] {
        self.core().sub_agents()
    }

    /// State key the agent's final text is written to, if any.
    fn output_key(&self) -> Option<&str> {
        None
    }

    fn as_llm(&self) -> Option<&LlmAgent> {
        None
    }

    /// Start one run. Nothing happens until the stream is polled; each event
    /// is produced only after the previous one has been consumed.
    fn run(self: Arc<Self>, ctx: InvocationContext) -> EventStream;
}

impl std::fmt::Debug for dyn Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}
