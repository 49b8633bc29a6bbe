//! Function-call dispatch for one model response.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::agent::{Agent, InvocationContext, LlmAgent};
use crate::event::{Event, EventActions};
use crate::tools::{TRANSFER_TO_AGENT_TOOL, Tool, ToolContext, TransferToAgentTool};
use crate::types::{Content, FunctionCall, FunctionResponse};
use crate::{Error, Result};

/// Outcome of dispatching every call in a function-call event.
pub struct Dispatch {
    pub event: Event,
    /// Some call targeted a long-running tool.
    pub long_running: bool,
}

fn resolve_tool(agent: &LlmAgent, name: &str, targets: &[(String, String)]) -> Option<Arc<dyn Tool>> {
    if name == TRANSFER_TO_AGENT_TOOL && !targets.is_empty() {
        return Some(Arc::new(TransferToAgentTool));
    }
    agent.tools().get(name).cloned()
}

fn as_object(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        other => json!({ "result": other }),
    }
}

/// Invoke each call in order and fold the results into one response event.
///
/// Unknown tools and non-fatal tool errors become `{"error": ...}`
/// responses so the model can recover. A failing tool marked fatal aborts
/// the turn with [`Error::ToolInvocation`].
pub async fn dispatch(
    agent: &LlmAgent,
    ctx: &InvocationContext,
    calls: &[FunctionCall],
    targets: &[(String, String)],
) -> Result<Dispatch> {
    let state = Arc::new(ctx.state().await);
    let mut actions = EventActions::default();
    let mut responses = Vec::with_capacity(calls.len());
    let mut long_running = false;

    for call in calls {
        let Some(tool) = resolve_tool(agent, &call.name, targets) else {
            warn!(agent = %agent.name(), tool = %call.name, "Model called an unknown tool");
            responses.push(FunctionResponse::new(
                &call.id,
                &call.name,
                json!({ "error": format!("Tool '{}' is not available", call.name) }),
            ));
            continue;
        };
        long_running |= tool.is_long_running();

        let tool_ctx = ToolContext::new(
            ctx.invocation_id().clone(),
            agent.name(),
            &call.id,
            Arc::clone(&state),
        );
        debug!(agent = %agent.name(), tool = %call.name, call_id = %call.id, "Invoking tool");

        let mut response = match tool.invoke(call.args.clone(), &tool_ctx).await {
            Ok(value) => as_object(value),
            Err(e) if tool.is_fatal() => {
                return Err(Error::ToolInvocation {
                    tool: call.name.clone(),
                    message: e.to_string(),
                });
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool failed");
                json!({ "error": e.to_string() })
            }
        };

        let mut call_actions = tool_ctx.actions();
        if let Some(target) = &call_actions.transfer_to_agent
            && !targets.iter().any(|(name, _)| name == target)
        {
            response = json!({ "error": format!("Agent '{target}' is not a valid transfer target") });
            call_actions.transfer_to_agent = None;
        }
        actions.merge(call_actions);
        responses.push(FunctionResponse::new(&call.id, &call.name, response));
    }

    let event = Event::builder(ctx.invocation_id().clone(), agent.name())
        .branch(ctx.branch().map(str::to_string))
        .content(Content::function_responses(responses))
        .actions(actions)
        .build();
    Ok(Dispatch {
        event,
        long_running,
    })
}
