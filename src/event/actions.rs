//! Side-effect directives carried by an event.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::StateMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventActions {
    /// Stop signal bubbled to the enclosing composite agent.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub escalate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_to_agent: Option<String>,
    /// The tool result is the answer; no follow-up model call.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip_summarization: bool,
    #[serde(default, skip_serializing_if = "StateMap::is_empty")]
    pub state_delta: StateMap,
}

impl EventActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_escalate(mut self) -> Self {
        self.escalate = true;
        self
    }

    pub fn with_skip_summarization(mut self) -> Self {
        self.skip_summarization = true;
        self
    }

    pub fn with_transfer(mut self, agent: impl Into<String>) -> Self {
        self.transfer_to_agent = Some(agent.into());
        self
    }

    pub fn with_state(mut self, key: impl Into<String>, value: Value) -> Self {
        self.state_delta.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        !self.escalate
            && !self.skip_summarization
            && self.transfer_to_agent.is_none()
            && self.state_delta.is_empty()
    }

    /// Merge `other` into `self`; later values win for state keys and transfer target.
    pub fn merge(&mut self, other: EventActions) {
        self.escalate |= other.escalate;
        self.skip_summarization |= other.skip_summarization;
        if other.transfer_to_agent.is_some() {
            self.transfer_to_agent = other.transfer_to_agent;
        }
        self.state_delta.extend(other.state_delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_actions() {
        let mut base = EventActions::new().with_state("a", json!(1));
        base.merge(
            EventActions::new()
                .with_state("a", json!(2))
                .with_state("b", json!(3))
                .with_escalate(),
        );
        assert!(base.escalate);
        assert!(!base.skip_summarization);
        assert_eq!(base.state_delta["a"], json!(2));
        assert_eq!(base.state_delta["b"], json!(3));
    }

    #[test]
    fn test_empty_actions_serialize_compact() {
        let value = serde_json::to_value(EventActions::new()).unwrap();
        assert_eq!(value, json!({}));
        assert!(EventActions::new().is_empty());
    }
}
