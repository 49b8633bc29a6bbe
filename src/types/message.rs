//! Conversation roles and content payloads.

use serde::{Deserialize, Serialize};

use super::content::{FunctionCall, FunctionResponse, Part};

/// Role of a content producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Human participant, and tool results fed back to the model
    User,
    /// Language model output
    Model,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Model => write!(f, "model"),
        }
    }
}

/// Structured payload of an event or a model request turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, vec![Part::text(text)])
    }

    pub fn function_calls(calls: Vec<FunctionCall>) -> Self {
        Self::new(Role::Model, calls.into_iter().map(Part::FunctionCall).collect())
    }

    pub fn function_responses(responses: Vec<FunctionResponse>) -> Self {
        Self::new(
            Role::User,
            responses.into_iter().map(Part::FunctionResponse).collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(Part::is_empty)
    }

    /// Concatenated non-thought text of all parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text, thought: false } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn function_calls_iter(&self) -> impl Iterator<Item = &FunctionCall> {
        self.parts.iter().filter_map(|p| match p {
            Part::FunctionCall(call) => Some(call),
            _ => None,
        })
    }

    pub fn function_responses_iter(&self) -> impl Iterator<Item = &FunctionResponse> {
        self.parts.iter().filter_map(|p| match p {
            Part::FunctionResponse(response) => Some(response),
            _ => None,
        })
    }
}
