//! Per-call context handed to tools.

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use crate::event::{EventActions, InvocationId};
use crate::session::State;

/// Scoped view of session state plus a sink for side-effect directives.
///
/// Writes go to a pending [`EventActions`] that the flow attaches to the
/// function-response event; the session itself is only changed when that
/// event is appended.
#[derive(Clone, Debug)]
pub struct ToolContext {
    invocation_id: InvocationId,
    agent_name: String,
    function_call_id: String,
    state: Arc<State>,
    actions: Arc<Mutex<EventActions>>,
}

impl ToolContext {
    pub fn new(
        invocation_id: InvocationId,
        agent_name: impl Into<String>,
        function_call_id: impl Into<String>,
        state: Arc<State>,
    ) -> Self {
        Self {
            invocation_id,
            agent_name: agent_name.into(),
            function_call_id: function_call_id.into(),
            state,
            actions: Arc::new(Mutex::new(EventActions::default())),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test(agent_name: &str) -> Self {
        Self::new(
            InvocationId::from("inv-test"),
            agent_name,
            "call-test",
            Arc::new(State::new()),
        )
    }

    pub fn invocation_id(&self) -> &InvocationId {
        &self.invocation_id
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn function_call_id(&self) -> &str {
        &self.function_call_id
    }

    fn lock(&self) -> MutexGuard<'_, EventActions> {
        self.actions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reads see this call's own pending writes first.
    pub fn get_state(&self, key: &str) -> Option<Value> {
        if let Some(pending) = self.lock().state_delta.get(key) {
            return (!pending.is_null()).then(|| pending.clone());
        }
        self.state.get(key).cloned()
    }

    pub fn set_state(&self, key: impl Into<String>, value: Value) {
        self.lock().state_delta.insert(key.into(), value);
    }

    pub fn remove_state(&self, key: impl Into<String>) {
        self.lock().state_delta.insert(key.into(), Value::Null);
    }

    pub fn escalate(&self) {
        self.lock().escalate = true;
    }

    pub fn skip_summarization(&self) {
        self.lock().skip_summarization = true;
    }

    pub fn transfer_to_agent(&self, agent_name: impl Into<String>) {
        self.lock().transfer_to_agent = Some(agent_name.into());
    }

    /// Snapshot of the directives recorded so far.
    pub fn actions(&self) -> EventActions {
        self.lock().clone()
    }
}
