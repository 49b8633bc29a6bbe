//! Append-only records of conversation activity.
//!
//! An [`Event`] is one contribution to a session: a user message, a model
//! response (possibly a partial streaming fragment), a tool call, a tool
//! result, or a terminal error. Events are built once through
//! [`EventBuilder`] and never mutated afterwards; side effects travel in
//! their [`EventActions`].

mod actions;

pub use actions::EventActions;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::StateMap;
use crate::types::{Content, FunctionCall, FunctionResponse};

/// Author string used for events produced by the human participant.
pub const USER_AUTHOR: &str = "user";

#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Groups every event produced by one runner call.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvocationId(pub String);

impl InvocationId {
    pub fn new() -> Self {
        Self(format!("inv-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InvocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InvocationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: EventId,
    invocation_id: InvocationId,
    author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    branch: Option<String>,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    partial: bool,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    actions: EventActions,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    long_running_tool_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

impl Event {
    pub fn builder(invocation_id: InvocationId, author: impl Into<String>) -> EventBuilder {
        EventBuilder::new(invocation_id, author)
    }

    /// A message from the human participant.
    pub fn user_message(invocation_id: InvocationId, content: Content) -> Self {
        Self::builder(invocation_id, USER_AUTHOR).content(content).build()
    }

    /// Records the state a session starts with. It has no content, so it
    /// never reaches a model request.
    pub fn initial_state(state: StateMap) -> Self {
        Self::builder(InvocationId::new(), USER_AUTHOR)
            .actions(EventActions {
                state_delta: state,
                ..EventActions::default()
            })
            .turn_complete(true)
            .build()
    }

    /// A terminal error event closing an invocation.
    pub fn error(
        invocation_id: InvocationId,
        author: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::builder(invocation_id, author)
            .error(code, message)
            .turn_complete(true)
            .build()
    }

    pub fn id(&self) -> &EventId {
        &self.id
    }

    pub fn invocation_id(&self) -> &InvocationId {
        &self.invocation_id
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn content(&self) -> Option<&Content> {
        self.content.as_ref()
    }

    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn is_turn_complete(&self) -> bool {
        self.turn_complete
    }

    pub fn actions(&self) -> &EventActions {
        &self.actions
    }

    pub fn long_running_tool_ids(&self) -> &BTreeSet<String> {
        &self.long_running_tool_ids
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error_code.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn is_user(&self) -> bool {
        self.author == USER_AUTHOR
    }

    pub fn is_error(&self) -> bool {
        self.error_code.is_some()
    }

    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.content
            .as_ref()
            .map(|c| c.function_calls_iter().collect())
            .unwrap_or_default()
    }

    pub fn function_responses(&self) -> Vec<&FunctionResponse> {
        self.content
            .as_ref()
            .map(|c| c.function_responses_iter().collect())
            .unwrap_or_default()
    }

    /// Non-thought text of the content, empty when there is none.
    pub fn text(&self) -> String {
        self.content.as_ref().map(Content::text).unwrap_or_default()
    }

    /// Whether the event concludes its agent's turn.
    ///
    /// Partial fragments and events with outstanding long-running tool calls
    /// are never final. A tool result with `skip_summarization` is the answer
    /// itself. Otherwise the event must carry neither a function call nor a
    /// function response.
    pub fn is_final_response(&self) -> bool {
        if self.partial || !self.long_running_tool_ids.is_empty() {
            return false;
        }
        if self.actions.skip_summarization {
            return true;
        }
        self.function_calls().is_empty() && self.function_responses().is_empty()
    }

    /// Whether there is anything to display.
    pub fn has_content(&self) -> bool {
        self.content.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Copy of this event as a store persists it: `temp:` state keys dropped.
    pub(crate) fn for_persistence(&self) -> Self {
        let mut persisted = self.clone();
        persisted
            .actions
            .state_delta
            .retain(|key, _| !crate::session::is_temp_key(key));
        persisted
    }
}

pub struct EventBuilder {
    event: Event,
}

impl EventBuilder {
    pub fn new(invocation_id: InvocationId, author: impl Into<String>) -> Self {
        Self {
            event: Event {
                id: EventId::new(),
                invocation_id,
                author: author.into(),
                branch: None,
                timestamp: Utc::now(),
                content: None,
                partial: false,
                turn_complete: false,
                actions: EventActions::default(),
                long_running_tool_ids: BTreeSet::new(),
                error_code: None,
                error_message: None,
            },
        }
    }

    pub fn id(mut self, id: EventId) -> Self {
        self.event.id = id;
        self
    }

    pub fn branch(mut self, branch: Option<String>) -> Self {
        self.event.branch = branch;
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.event.timestamp = timestamp;
        self
    }

    pub fn content(mut self, content: Content) -> Self {
        self.event.content = Some(content);
        self
    }

    pub fn maybe_content(mut self, content: Option<Content>) -> Self {
        self.event.content = content;
        self
    }

    pub fn partial(mut self, partial: bool) -> Self {
        self.event.partial = partial;
        self
    }

    pub fn turn_complete(mut self, turn_complete: bool) -> Self {
        self.event.turn_complete = turn_complete;
        self
    }

    pub fn actions(mut self, actions: EventActions) -> Self {
        self.event.actions = actions;
        self
    }

    pub fn long_running_tool_ids(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.event.long_running_tool_ids = ids.into_iter().collect();
        self
    }

    pub fn error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.event.error_code = Some(code.into());
        self.event.error_message = Some(message.into());
        self
    }

    pub fn build(self) -> Event {
        self.event
    }
}
