//! Tools the engine itself understands.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};

use super::context::ToolContext;
use super::error::ToolError;
use super::traits::SchemaTool;
use crate::types::ToolDeclaration;

pub const EXIT_LOOP_TOOL: &str = "exit_loop";
pub const TRANSFER_TO_AGENT_TOOL: &str = "transfer_to_agent";

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ExitLoopArgs {}

/// Ends the enclosing loop agent: sets `escalate` and `skip_summarization`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExitLoopTool;

#[async_trait]
impl SchemaTool for ExitLoopTool {
    type Args = ExitLoopArgs;
    const NAME: &'static str = EXIT_LOOP_TOOL;
    const DESCRIPTION: &'static str =
        "Exits the current loop. Call this only when the task is complete and no further iteration is needed.";

    async fn handle(&self, _args: ExitLoopArgs, context: &ToolContext) -> Result<Value, ToolError> {
        context.escalate();
        context.skip_summarization();
        Ok(json!({}))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TransferArgs {
    /// Name of the agent that should handle the conversation next.
    pub agent_name: String,
}

/// Hands the conversation to another agent in the tree.
///
/// The flow declares it automatically whenever the calling agent has
/// transfer targets and validates the target before acting on it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransferToAgentTool;

impl TransferToAgentTool {
    /// Declaration restricted to the given target names.
    pub fn declaration_for(targets: &[String]) -> ToolDeclaration {
        let mut parameters = Self::parameter_schema();
        if let Some(agent_name) = parameters.pointer_mut("/properties/agent_name") {
            agent_name["enum"] = json!(targets);
        }
        ToolDeclaration::new(Self::NAME, Self::DESCRIPTION, parameters)
    }

    /// Instruction text describing the available targets.
    pub fn instruction(targets: &[(String, String)]) -> String {
        let mut text = String::from(
            "You can transfer the conversation to another agent when it is better suited to answer. \
             To do so, call the `transfer_to_agent` function with the agent's name.\n\nAvailable agents:",
        );
        for (name, description) in targets {
            text.push_str(&format!("\n- {}: {}", name, description));
        }
        text
    }
}

#[async_trait]
impl SchemaTool for TransferToAgentTool {
    type Args = TransferArgs;
    const NAME: &'static str = TRANSFER_TO_AGENT_TOOL;
    const DESCRIPTION: &'static str = "Transfer the conversation to another agent.";

    async fn handle(&self, args: TransferArgs, context: &ToolContext) -> Result<Value, ToolError> {
        if args.agent_name.trim().is_empty() {
            return Err(ToolError::invalid_input("agent_name must not be empty"));
        }
        context.transfer_to_agent(args.agent_name.clone());
        Ok(json!({"transferred_to": args.agent_name}))
    }
}
