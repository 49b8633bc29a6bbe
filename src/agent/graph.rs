use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;

use super::{Agent, AgentCore, AgentKind, EventStream, InvocationContext};
use crate::session::State;
use crate::{Error, Result};

/// Decides whether a node may be entered, given the state left by its
/// predecessor.
pub type Guard = Arc<dyn Fn(&State) -> bool + Send + Sync>;

pub struct GraphNode {
    name: String,
    agent: Arc<dyn Agent>,
    successors: Vec<String>,
    guard: Option<Guard>,
}

impl GraphNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    pub fn successors(&self) -> &[String] {
        &self.successors
    }

    fn admits(&self, state: &State) -> bool {
        self.guard.as_ref().is_none_or(|guard| guard(state))
    }
}

impl std::fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphNode")
            .field("name", &self.name)
            .field("agent", &self.agent.name())
            .field("successors", &self.successors)
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}

/// Routes between named nodes.
///
/// After a node's agent finishes, the guards of all its successors are
/// evaluated against the session state and the first declared successor
/// whose guard holds runs next. Traversal ends when no successor is
/// admitted, when an event escalates, or with `FlowExhausted` once
/// `max_graph_steps` nodes have run.
#[derive(Debug)]
pub struct GraphAgent {
    core: AgentCore,
    nodes: Vec<GraphNode>,
    edges: Vec<Vec<usize>>,
    root: usize,
}

impl GraphAgent {
    pub fn builder(name: impl Into<String>) -> GraphAgentBuilder {
        GraphAgentBuilder::new(name)
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn root(&self) -> &GraphNode {
        &self.nodes[self.root]
    }

    fn next_node(&self, current: usize, state: &State) -> Option<usize> {
        let admitted: Vec<usize> = self.edges[current]
            .iter()
            .copied()
            .filter(|&i| self.nodes[i].admits(state))
            .collect();
        tracing::debug!(
            graph = %self.core.name(),
            from = %self.nodes[current].name,
            admitted = ?admitted.iter().map(|&i| self.nodes[i].name.as_str()).collect::<Vec<_>>(),
            "Evaluated successor guards"
        );
        admitted.first().copied()
    }
}

impl Agent for GraphAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Graph
    }

    fn run(self: Arc<Self>, ctx: InvocationContext) -> EventStream {
        let graph = self;
        Box::pin(async_stream::stream! {
            let max_steps = ctx.run_config().max_graph_steps;
            let mut current = Some(graph.root);
            let mut steps = 0usize;

            while let Some(index) = current {
                if steps >= max_steps {
                    yield Err(Error::FlowExhausted {
                        limit: "max_graph_steps",
                        max: max_steps,
                    });
                    return;
                }
                steps += 1;

                let node = &graph.nodes[index];
                tracing::debug!(graph = %graph.core.name(), node = %node.name, step = steps, "Entering graph node");

                let mut events = Arc::clone(&node.agent).run(ctx.for_agent(node.agent.name()));
                while let Some(item) = events.next().await {
                    match item {
                        Ok(event) => {
                            let escalate = event.actions().escalate;
                            yield Ok(event);
                            if escalate {
                                return;
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }

                current = graph.next_node(index, &ctx.state().await);
            }
        })
    }
}

pub struct GraphAgentBuilder {
    name: String,
    description: String,
    nodes: Vec<GraphNode>,
    root: Option<String>,
}

impl GraphAgentBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            nodes: Vec::new(),
            root: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn node<S>(
        self,
        name: impl Into<String>,
        agent: Arc<dyn Agent>,
        successors: impl IntoIterator<Item = S>,
    ) -> Self
    where
        S: Into<String>,
    {
        self.push_node(name.into(), agent, successors, None)
    }

    pub fn guarded_node<S, F>(
        self,
        name: impl Into<String>,
        agent: Arc<dyn Agent>,
        successors: impl IntoIterator<Item = S>,
        guard: F,
    ) -> Self
    where
        S: Into<String>,
        F: Fn(&State) -> bool + Send + Sync + 'static,
    {
        self.push_node(name.into(), agent, successors, Some(Arc::new(guard)))
    }

    fn push_node<S: Into<String>>(
        mut self,
        name: String,
        agent: Arc<dyn Agent>,
        successors: impl IntoIterator<Item = S>,
        guard: Option<Guard>,
    ) -> Self {
        self.nodes.push(GraphNode {
            name,
            agent,
            successors: successors.into_iter().map(Into::into).collect(),
            guard,
        });
        self
    }

    /// Entry node; defaults to the first node added.
    pub fn root(mut self, name: impl Into<String>) -> Self {
        self.root = Some(name.into());
        self
    }

    pub fn build(self) -> Result<GraphAgent> {
        let invalid = |message: String| Error::composition(format!("graph '{}': {message}", self.name));

        let mut index = HashMap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if index.insert(node.name.clone(), i).is_some() {
                return Err(invalid(format!("duplicate node '{}'", node.name)));
            }
        }

        let root = match &self.root {
            Some(name) => *index
                .get(name)
                .ok_or_else(|| invalid(format!("unknown root node '{name}'")))?,
            None if self.nodes.is_empty() => return Err(invalid("no nodes".into())),
            None => 0,
        };

        let mut edges = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let resolved = node
                .successors
                .iter()
                .map(|s| {
                    index.get(s).copied().ok_or_else(|| {
                        invalid(format!("node '{}' points to unknown node '{s}'", node.name))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            edges.push(resolved);
        }

        let mut core = AgentCore::new(self.name.clone()).with_description(self.description.clone());
        core.attach_all(self.nodes.iter().map(|n| Arc::clone(&n.agent)))?;

        Ok(GraphAgent {
            core,
            nodes: self.nodes,
            edges,
            root,
        })
    }
}
