//! Planning strategies that decorate model requests and responses.
//!
//! A planner gets two hooks around every model call made by the flow:
//! [`Planner::pre_request`] before the request is sent, and
//! [`Planner::post_response`] on the parts of each complete response. It
//! never changes the flow's control decisions.

mod plan_react;

pub use plan_react::{
    ACTION_TAG, FINAL_ANSWER_TAG, PLANNING_TAG, PlanReActPlanner, REASONING_TAG, REPLANNING_TAG,
};

use crate::model::{LlmRequest, ThinkingConfig};
use crate::types::Part;

pub trait Planner: Send + Sync {
    fn pre_request(&self, request: &mut LlmRequest);

    fn post_response(&self, parts: Vec<Part>) -> Vec<Part> {
        parts
    }
}

/// Delegates planning to the model's native thinking mode.
#[derive(Clone, Debug, Default)]
pub struct BuiltInPlanner {
    thinking: ThinkingConfig,
}

impl BuiltInPlanner {
    pub fn new(thinking: ThinkingConfig) -> Self {
        Self { thinking }
    }

    pub fn with_budget(budget_tokens: u32) -> Self {
        Self::new(ThinkingConfig {
            include_thoughts: true,
            budget_tokens: Some(budget_tokens),
        })
    }
}

impl Planner for BuiltInPlanner {
    fn pre_request(&self, request: &mut LlmRequest) {
        request.config.thinking = Some(self.thinking.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_built_in_planner_sets_thinking() {
        let mut request = LlmRequest::new("m");
        BuiltInPlanner::with_budget(1024).pre_request(&mut request);
        let thinking = request.config.thinking.unwrap();
        assert!(thinking.include_thoughts);
        assert_eq!(thinking.budget_tokens, Some(1024));
    }
}
