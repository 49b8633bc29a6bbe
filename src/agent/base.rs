use std::sync::{Arc, OnceLock};

use super::Agent;
use crate::{Error, Result};

/// Identity and children shared by every agent kind.
///
/// Children are owned; the parent is recorded by name only and can be set
/// once, so an agent attached to one composite cannot join another.
pub struct AgentCore {
    name: String,
    description: String,
    parent: OnceLock<String>,
    sub_agents: Vec<Arc<dyn Agent>>,
}

impl AgentCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parent: OnceLock::new(),
            sub_agents: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parent_name(&self) -> Option<&str> {
        self.parent.get().map(String::as_str)
    }

    pub fn sub_agents(&self) -> &[Arc<dyn Agent>] {
        &self.sub_agents
    }

    pub fn find_sub_agent(&self, name: &str) -> Option<&Arc<dyn Agent>> {
        self.sub_agents.iter().find(|a| a.name() == name)
    }

    pub fn attach(&mut self, child: Arc<dyn Agent>) -> Result<()> {
        self.attach_all([child])
    }

    /// Attach `children` in order. Nothing is claimed unless every child is
    /// accepted.
    pub fn attach_all(&mut self, children: impl IntoIterator<Item = Arc<dyn Agent>>) -> Result<()> {
        let children: Vec<Arc<dyn Agent>> = children.into_iter().collect();
        for (i, child) in children.iter().enumerate() {
            self.check_child(child, &children[..i])?;
        }
        for child in &children {
            if child.core().parent.set(self.name.clone()).is_err() {
                return Err(self.already_parented(child));
            }
        }
        self.sub_agents.extend(children);
        Ok(())
    }

    fn check_child(&self, child: &Arc<dyn Agent>, pending: &[Arc<dyn Agent>]) -> Result<()> {
        if child.name() == self.name {
            return Err(Error::composition(format!(
                "agent '{}' cannot be its own child",
                self.name
            )));
        }
        let taken = self.find_sub_agent(child.name()).is_some()
            || pending.iter().any(|a| a.name() == child.name());
        if taken {
            return Err(Error::composition(format!(
                "agent '{}' already has a child named '{}'",
                self.name,
                child.name()
            )));
        }
        if child.core().parent_name().is_some() {
            return Err(self.already_parented(child));
        }
        Ok(())
    }

    fn already_parented(&self, child: &Arc<dyn Agent>) -> Error {
        Error::composition(format!(
            "agent '{}' already belongs to '{}'",
            child.name(),
            child.core().parent_name().unwrap_or_default()
        ))
    }
}

impl std::fmt::Debug for AgentCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentCore")
            .field("name", &self.name)
            .field("parent", &self.parent.get())
            .field(
                "sub_agents",
                &self.sub_agents.iter().map(|a| a.name()).collect::<Vec<_>>(),
            )
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
    fn test_attach_records_parent() {
        let child = leaf("child");
        let mut core = AgentCore::new("parent");
        core.attach(child.clone()).unwrap();
        assert_eq!(child.core().parent_name(), Some("parent"));
        assert!(core.find_sub_agent("child").is_some());
    }

    #[test]
    fn test_child_cannot_have_two_parents() {
        let child = leaf("shared");
        SequentialAgent::new("first", vec![child.clone()]).unwrap();
        let err = SequentialAgent::new("second", vec![child]).unwrap_err();
        assert!(matches!(err, Error::InvalidAgentComposition(ref m) if m.contains("first")));
    }

    #[test]
    fn test_duplicate_child_names_rejected() {
        let err = SequentialAgent::new("seq", vec![leaf("a"), leaf("a")]).unwrap_err();
        assert!(matches!(err, Error::InvalidAgentComposition(_)));
    }

    #[test]
    fn test_failed_composite_claims_no_children() {
        let first = leaf("first");
        let owned = leaf("owned");
        SequentialAgent::new("owner", vec![owned.clone()]).unwrap();

        let err = SequentialAgent::new("rejected", vec![first.clone(), owned]).unwrap_err();
        assert!(matches!(err, Error::InvalidAgentComposition(ref m) if m.contains("owner")));
        assert_eq!(first.core().parent_name(), None);

        let dup = SequentialAgent::new("dup", vec![first.clone(), leaf("first")]).unwrap_err();
        assert!(matches!(dup, Error::InvalidAgentComposition(_)));
        assert_eq!(first.core().parent_name(), None);

        SequentialAgent::new("retry", vec![first.clone()]).unwrap();
        assert_eq!(first.core().parent_name(), Some("retry"));
    }
}
