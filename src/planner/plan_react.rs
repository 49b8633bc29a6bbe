use super::Planner;
use crate::model::LlmRequest;
use crate::types::Part;

pub const PLANNING_TAG: &str = "/*PLANNING*/";
pub const REPLANNING_TAG: &str = "/*REPLANNING*/";
pub const REASONING_TAG: &str = "/*REASONING*/";
pub const ACTION_TAG: &str = "/*ACTION*/";
pub const FINAL_ANSWER_TAG: &str = "/*FINAL_ANSWER*/";

const THOUGHT_TAGS: [&str; 4] = [PLANNING_TAG, REPLANNING_TAG, REASONING_TAG, ACTION_TAG];

/// Plan / reason / act prompting for models without native thinking.
///
/// Text before the final-answer tag, and text led by a planning tag, is
/// marked as thought. Text after the first function call is dropped so the
/// call is acted on before the model keeps talking.
#[derive(Clone, Debug, Default)]
pub struct PlanReActPlanner;

impl PlanReActPlanner {
    pub fn new() -> Self {
        Self
    }

    fn instruction() -> String {
        format!(
            "When answering the question, try to leverage the available tools to gather the information instead of your memorized knowledge.\n\n\
             Follow this process when answering the question: (1) first come up with a plan in natural language text format; \
             (2) then use tools to execute the plan and provide reasoning between tool code snippets to make a summary of current state and next step; \
             (3) in the end, return one final answer.\n\n\
             Follow this format when answering the question: (1) the planning part should be under {PLANNING_TAG}; \
             (2) the tool code snippets should be under {ACTION_TAG}, and the reasoning parts should be under {REASONING_TAG}; \
             (3) the final answer part should be under {FINAL_ANSWER_TAG}.\n\n\
             If the initial plan cannot be successfully executed, revise the plan under {REPLANNING_TAG} and continue."
        )
    }
}

impl Planner for PlanReActPlanner {
    fn pre_request(&self, request: &mut LlmRequest) {
        request.append_instruction(Self::instruction());
    }

    fn post_response(&self, parts: Vec<Part>) -> Vec<Part> {
        let mut out = Vec::with_capacity(parts.len());
        let mut seen_call = false;

        for part in parts {
            match part {
                Part::FunctionCall(call) => {
                    if call.name.is_empty() {
                        continue;
                    }
                    seen_call = true;
                    out.push(Part::FunctionCall(call));
                }
                _ if seen_call => {}
                Part::Text {
                    text,
                    thought: false,
                } => split_text(&text, &mut out),
                other => out.push(other),
            }
        }
        out
    }
}

fn split_text(text: &str, out: &mut Vec<Part>) {
    if let Some(idx) = text.rfind(FINAL_ANSWER_TAG) {
        let (reasoning, answer) = text.split_at(idx);
        if !reasoning.trim().is_empty() {
            out.push(Part::thought(reasoning.trim_end()));
        }
        let answer = answer[FINAL_ANSWER_TAG.len()..].trim();
        if !answer.is_empty() {
            out.push(Part::text(answer));
        }
    } else if THOUGHT_TAGS.iter().any(|tag| text.trim_start().starts_with(tag)) {
        out.push(Part::thought(text));
    } else {
        out.push(Part::text(text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FunctionCall;
    use serde_json::json;

    #[test]
    fn test_instruction_appended() {
        let mut request = LlmRequest::new("m");
        request.system_instruction = Some("Be brief.".into());
        PlanReActPlanner.pre_request(&mut request);
        let instruction = request.system_instruction.unwrap();
        assert!(instruction.starts_with("Be brief."));
        assert!(instruction.contains(FINAL_ANSWER_TAG));
    }

    #[test]
    fn test_final_answer_split() {
        let parts = vec![Part::text(format!(
            "{PLANNING_TAG} look it up {FINAL_ANSWER_TAG} 42"
        ))];
        let out = PlanReActPlanner.post_response(parts);
        assert_eq!(out.len(), 2);
        assert!(out[0].is_thought());
        assert_eq!(out[1].as_text(), Some("42"));
        assert!(!out[1].is_thought());
    }

    #[test]
    fn test_plan_marked_as_thought() {
        let out = PlanReActPlanner.post_response(vec![Part::text(format!("{PLANNING_TAG} step 1"))]);
        assert!(out[0].is_thought());
    }

    #[test]
    fn test_text_after_call_dropped() {
        let out = PlanReActPlanner.post_response(vec![
            Part::text(format!("{ACTION_TAG} calling")),
            Part::FunctionCall(FunctionCall::new("search", json!({}))),
            Part::text("trailing"),
        ]);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[1], Part::FunctionCall(_)));
    }
}
