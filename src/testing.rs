//! Deterministic doubles for driving the engine in tests.
//!
//! [`ScriptedModel`] replays pre-recorded response turns, one per model
//! call, and records every request it receives.

use std::collections::VecDeque;
use std::sync::Mutex;

use futures::{StreamExt, stream};
use serde_json::Value;

use crate::model::{LlmRequest, Model, ModelError, ModelStream, ResponseFragment};
use crate::types::FunctionCall;

enum Script {
    Turns(VecDeque<Vec<ResponseFragment>>),
    Repeat(Vec<ResponseFragment>),
    Fail(String),
}

pub struct ScriptedModel {
    name: String,
    script: Mutex<Script>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedModel {
    /// One entry of `turns` per model call. Calls beyond the script fail.
    pub fn new(name: impl Into<String>, turns: Vec<Vec<ResponseFragment>>) -> Self {
        Self::with_script(name, Script::Turns(turns.into()))
    }

    /// Each call answers with the next text as a single complete fragment.
    pub fn replying<S: Into<String>>(
        name: impl Into<String>,
        replies: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::new(
            name,
            replies
                .into_iter()
                .map(|text| vec![ResponseFragment::text(text)])
                .collect(),
        )
    }

    /// Every call answers with the same turn.
    pub fn repeating(name: impl Into<String>, turn: Vec<ResponseFragment>) -> Self {
        Self::with_script(name, Script::Repeat(turn))
    }

    /// Every call is rejected as unavailable.
    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_script(name, Script::Fail(message.into()))
    }

    fn with_script(name: impl Into<String>, script: Script) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Number of `generate` calls so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn last_request(&self) -> Option<LlmRequest> {
        self.requests.lock().ok().and_then(|r| r.last().cloned())
    }

    fn next_turn(&self) -> Result<Vec<ResponseFragment>, ModelError> {
        let mut script = self
            .script
            .lock()
            .map_err(|_| ModelError::unavailable(&self.name, "script lock poisoned"))?;
        match &mut *script {
            Script::Turns(turns) => turns
                .pop_front()
                .ok_or_else(|| ModelError::unavailable(&self.name, "script exhausted")),
            Script::Repeat(turn) => Ok(turn.clone()),
            Script::Fail(message) => Err(ModelError::unavailable(&self.name, message.clone())),
        }
    }
}

#[async_trait::async_trait]
impl Model for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: LlmRequest) -> Result<ModelStream, ModelError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let turn = self.next_turn()?;
        Ok(stream::iter(turn.into_iter().map(Ok)).boxed())
    }
}

impl std::fmt::Debug for ScriptedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedModel")
            .field("name", &self.name)
            .field("calls", &self.calls())
            .finish()
    }
}

/// A complete fragment calling one tool.
pub fn call(name: &str, args: Value) -> ResponseFragment {
    ResponseFragment::function_calls(vec![FunctionCall::new(name, args)])
}

/// A complete text fragment.
pub fn text(text: &str) -> ResponseFragment {
    ResponseFragment::text(text)
}

/// A partial text fragment.
pub fn partial(text: &str) -> ResponseFragment {
    ResponseFragment::partial_text(text)
}

/// Context for running `root` directly against an empty in-memory session.
#[cfg(test)]
pub(crate) fn invocation_context(
    root: std::sync::Arc<dyn crate::agent::Agent>,
    config: crate::config::RunConfig,
) -> crate::agent::InvocationContext {
    use std::sync::Arc;

    use crate::agent::{Agent, AgentTree, InvocationContext};
    use crate::event::InvocationId;
    use crate::model::ModelRegistry;
    use crate::session::{Session, SessionId};

    let name = root.name().to_string();
    let tree = AgentTree::build(root).expect("valid agent tree");
    InvocationContext::new(
        InvocationId::from("inv-test"),
        name,
        None,
        Arc::new(tokio::sync::RwLock::new(Session::new(
            SessionId::from("s1"),
            "app",
            "user",
        ))),
        Arc::new(config),
        Arc::new(tree),
        Arc::new(ModelRegistry::new()),
    )
}

/// Drive an agent the way the runner does: record a user turn, then apply
/// each non-partial event to the session before asking for the next one.
#[cfg(test)]
pub(crate) async fn drive(
    agent: std::sync::Arc<dyn crate::agent::Agent>,
    ctx: crate::agent::InvocationContext,
) -> Vec<crate::Result<crate::event::Event>> {
    use crate::event::Event;
    use crate::types::Content;

    ctx.session()
        .write()
        .await
        .apply_event(&Event::user_message(
            ctx.invocation_id().clone(),
            Content::user("go"),
        ));
    let mut events = agent.run(ctx.clone());
    let mut out = Vec::new();
    while let Some(item) = events.next().await {
        if let Ok(event) = &item
            && !event.is_partial()
        {
            ctx.session().write().await.apply_event(event);
        }
        out.push(item);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_scripted_turns_in_order() {
        let model = ScriptedModel::new(
            "fake",
            vec![vec![partial("a"), text("ab")], vec![call("tool", json!({}))]],
        );

        let first: Vec<_> = model
            .generate(LlmRequest::new("fake"))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(first.len(), 2);

        let second: Vec<_> = model
            .generate(LlmRequest::new("fake"))
            .await
            .unwrap()
            .collect()
            .await;
        assert!(second[0].as_ref().unwrap().has_function_calls());

        assert!(model.generate(LlmRequest::new("fake")).await.is_err());
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn test_failing_and_repeating() {
        let failing = ScriptedModel::failing("down", "offline");
        let err = failing.generate(LlmRequest::new("down")).await.err().unwrap();
        assert!(err.to_string().contains("offline"));

        let repeating = ScriptedModel::repeating("loop", vec![text("again")]);
        for _ in 0..3 {
            assert!(repeating.generate(LlmRequest::new("loop")).await.is_ok());
        }
        assert_eq!(repeating.calls(), 3);
    }
}
