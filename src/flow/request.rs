//! Request assembly: instruction templating, transfer targets and
//! branch-scoped history.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::Value;

use crate::agent::{Agent, AgentTree, IncludeContents, InvocationContext, LlmAgent};
use crate::config::ConfigError;
use crate::event::Event;
use crate::model::{LlmRequest, Model};
use crate::session::State;
use crate::tools::TransferToAgentTool;
use crate::types::{Content, Part, Role};
use crate::{Error, ModelError, Result};

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{((?:(?:app|user|temp):)?[A-Za-z_][A-Za-z0-9_]*)(\?)?\}")
            .expect("valid placeholder regex")
    })
}

/// Replace `{key}` and `{key?}` placeholders with state values.
///
/// A missing `{key}` is a configuration error; a missing `{key?}` renders
/// as nothing. Strings are inserted verbatim, other values as JSON.
pub fn inject_state(template: &str, state: &State) -> Result<String> {
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;
    for caps in placeholder_regex().captures_iter(template) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        rendered.push_str(&template[last..whole.start()]);
        last = whole.end();

        let optional = caps.get(2).is_some();
        match state.get(key.as_str()) {
            Some(Value::String(s)) => rendered.push_str(s),
            Some(Value::Null) => {}
            Some(other) => rendered.push_str(&other.to_string()),
            None if optional => {}
            None => {
                return Err(Error::Config(ConfigError::NotFound {
                    key: key.as_str().to_string(),
                }));
            }
        }
    }
    rendered.push_str(&template[last..]);
    Ok(rendered)
}

/// Agents `agent` may hand the conversation to, as `(name, description)`.
///
/// Children always qualify. The parent and peers qualify only when the
/// parent is itself an LLM agent and the corresponding `disallow_*` flag is
/// off.
pub fn transfer_targets(agent: &LlmAgent, tree: &AgentTree) -> Vec<(String, String)> {
    let describe = |a: &Arc<dyn Agent>| (a.name().to_string(), a.description().to_string());
    let mut targets: Vec<(String, String)> = agent.core().sub_agents().iter().map(describe).collect();

    if let Some(parent) = tree.parent(agent.name())
        && parent.as_llm().is_some()
    {
        if !agent.disallow_transfer_to_parent() {
            targets.push(describe(parent));
        }
        if !agent.disallow_transfer_to_peers() {
            targets.extend(
                parent
                    .sub_agents()
                    .iter()
                    .filter(|peer| peer.name() != agent.name())
                    .map(describe),
            );
        }
    }
    targets
}

/// The agent's own model, else the nearest LLM ancestor's, else the
/// configured default.
pub fn resolve_model(agent: &LlmAgent, ctx: &InvocationContext) -> Result<Arc<dyn Model>> {
    if let Some(source) = agent.model_source() {
        return source.resolve(ctx.models());
    }
    for ancestor in ctx.agents().ancestors(agent.name()) {
        if let Some(source) = ancestor.as_llm().and_then(LlmAgent::model_source) {
            return source.resolve(ctx.models());
        }
    }
    match &ctx.run_config().default_model {
        Some(name) => Ok(ctx.models().resolve(name)?),
        None => Err(ModelError::NoModel(agent.name().to_string()).into()),
    }
}

/// Whether an event recorded on `event_branch` is visible from `current`.
///
/// Events without a branch are visible everywhere, and a context without a
/// branch sees everything. Otherwise the event's branch must equal the
/// current one or be one of its ancestors.
pub fn branch_visible(current: Option<&str>, event_branch: Option<&str>) -> bool {
    match (current, event_branch) {
        (None, _) | (_, None) => true,
        (Some(current), Some(event)) => {
            current == event
                || current
                    .strip_prefix(event)
                    .is_some_and(|rest| rest.starts_with('.'))
        }
    }
}

/// Conversation history for a model request.
pub fn build_contents(
    events: &[Event],
    agent_name: &str,
    branch: Option<&str>,
    include: IncludeContents,
) -> Vec<Content> {
    let visible: Vec<&Event> = events
        .iter()
        .filter(|e| !e.is_partial() && !e.is_error() && e.has_content())
        .filter(|e| branch_visible(branch, e.branch()))
        .collect();

    let start = match include {
        IncludeContents::Default => 0,
        IncludeContents::None => visible.iter().rposition(|e| e.is_user()).unwrap_or(0),
    };

    visible[start..]
        .iter()
        .filter_map(|event| {
            if event.is_user() || event.author() == agent_name {
                own_content(event)
            } else {
                reframe_foreign(event)
            }
        })
        .collect()
}

fn own_content(event: &Event) -> Option<Content> {
    let content = event.content()?;
    let parts: Vec<Part> = content
        .parts
        .iter()
        .filter(|p| !p.is_thought() && !p.is_empty())
        .cloned()
        .collect();
    (!parts.is_empty()).then(|| Content::new(content.role, parts))
}

/// Another agent's output, presented to this agent as user-side context.
fn reframe_foreign(event: &Event) -> Option<Content> {
    let content = event.content()?;
    let author = event.author();
    let mut parts = vec![Part::text("For context:")];
    for part in &content.parts {
        match part {
            Part::Text { thought: true, .. } => {}
            Part::Text { text, .. } if text.trim().is_empty() => {}
            Part::Text { text, .. } => parts.push(Part::text(format!("[{author}] said: {text}"))),
            Part::FunctionCall(call) => parts.push(Part::text(format!(
                "[{author}] called tool `{}` with parameters: {}",
                call.name, call.args
            ))),
            Part::FunctionResponse(response) => parts.push(Part::text(format!(
                "[{author}] `{}` tool returned result: {}",
                response.name, response.response
            ))),
        }
    }
    (parts.len() > 1).then(|| Content::new(Role::User, parts))
}

/// Assemble the request for the next model call of `agent`.
pub async fn build_request(
    agent: &LlmAgent,
    ctx: &InvocationContext,
    model_name: &str,
    targets: &[(String, String)],
) -> Result<LlmRequest> {
    let session = ctx.session().read().await;
    let mut request = LlmRequest::new(model_name);

    request.append_instruction(inject_state(agent.instruction(), session.state())?);
    request.tools = agent.tools().declarations();
    if !targets.is_empty() {
        let names: Vec<String> = targets.iter().map(|(name, _)| name.clone()).collect();
        request.append_instruction(TransferToAgentTool::instruction(targets));
        request.tools.push(TransferToAgentTool::declaration_for(&names));
    }

    request.contents = build_contents(
        session.events(),
        agent.name(),
        ctx.branch(),
        agent.include_contents(),
    );
    drop(session);

    request.config = agent.generate_config().clone();
    request.stream = ctx.run_config().is_streaming();
    if let Some(planner) = agent.planner() {
        planner.pre_request(&mut request);
    }
    Ok(request)
}
