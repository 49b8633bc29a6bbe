use std::collections::HashMap;
use std::sync::Arc;

use super::Agent;
use crate::event::USER_AUTHOR;
use crate::{Error, Result};

/// Flattened view of an agent hierarchy: an arena of agents with parent
/// indices and a name index. Built once per runner.
pub struct AgentTree {
    nodes: Vec<Arc<dyn Agent>>,
    parents: Vec<Option<usize>>,
    by_name: HashMap<String, usize>,
}

impl AgentTree {
    /// Index `root` and its descendants. Names must be non-empty, must not
    /// be `user`, and must be unique across the whole tree.
    pub fn build(root: Arc<dyn Agent>) -> Result<Self> {
        let mut tree = Self {
            nodes: Vec::new(),
            parents: Vec::new(),
            by_name: HashMap::new(),
        };
        tree.insert(root, None)?;
        Ok(tree)
    }

    fn insert(&mut self, agent: Arc<dyn Agent>, parent: Option<usize>) -> Result<()> {
        let name = agent.name().to_string();
        if name.trim().is_empty() {
            return Err(Error::composition("agent name must not be empty"));
        }
        if name == USER_AUTHOR {
            return Err(Error::composition(format!(
                "agent name '{USER_AUTHOR}' is reserved"
            )));
        }
        if self.by_name.contains_key(&name) {
            return Err(Error::composition(format!(
                "agent name '{name}' appears more than once"
            )));
        }

        let index = self.nodes.len();
        let children = agent.sub_agents().to_vec();
        self.nodes.push(agent);
        self.parents.push(parent);
        self.by_name.insert(name, index);

        for child in children {
            self.insert(child, Some(index))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Arc<dyn Agent> {
        &self.nodes[0]
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Agent>> {
        self.by_name.get(name).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn parent(&self, name: &str) -> Option<&Arc<dyn Agent>> {
        let index = *self.by_name.get(name)?;
        self.parents[index].map(|p| &self.nodes[p])
    }

    /// Ancestors of `name`, nearest first.
    pub fn ancestors(&self, name: &str) -> Vec<&Arc<dyn Agent>> {
        let mut chain = Vec::new();
        let mut current = self.by_name.get(name).and_then(|&i| self.parents[i]);
        while let Some(index) = current {
            chain.push(&self.nodes[index]);
            current = self.parents[index];
        }
        chain
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|a| a.name())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl std::fmt::Debug for AgentTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTree")
            .field("agents", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{LlmAgent, SequentialAgent};

    fn leaf(name: &str) -> Arc<dyn Agent> {
        Arc::new(LlmAgent::builder(name).build().unwrap())
    }

    #[test]
    fn test_tree_indexes_descendants() {
        let inner = SequentialAgent::new("inner", vec![leaf("a"), leaf("b")]).unwrap();
        let root = LlmAgent::builder("root")
            .sub_agent(Arc::new(inner))
            .sub_agent(leaf("c"))
            .build()
            .unwrap();
        let tree = AgentTree::build(Arc::new(root)).unwrap();

        assert_eq!(tree.len(), 5);
        assert_eq!(tree.root().name(), "root");
        assert_eq!(tree.parent("a").map(|a| a.name()), Some("inner"));
        let ancestors: Vec<&str> = tree.ancestors("b").iter().map(|a| a.name()).collect();
        assert_eq!(ancestors, vec!["inner", "root"]);
        assert!(tree.parent("root").is_none());
    }

    #[test]
    fn test_tree_rejects_reserved_and_duplicate_names() {
        assert!(AgentTree::build(leaf("user")).is_err());
        assert!(AgentTree::build(leaf("")).is_err());

        let nested = SequentialAgent::new("x", vec![leaf("dup")]).unwrap();
        let root = SequentialAgent::new("root", vec![Arc::new(nested), leaf("dup")]).unwrap();
        let err = AgentTree::build(Arc::new(root)).unwrap_err();
        assert!(matches!(err, Error::InvalidAgentComposition(ref m) if m.contains("dup")));
    }
}
