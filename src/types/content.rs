//! Content parts: text, function calls and function responses.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Prefix of call ids generated by the engine when a model omits one.
pub const GENERATED_CALL_ID_PREFIX: &str = "call-";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
        /// Reasoning text that is shown to callers but never fed back as an answer.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        thought: bool,
    },
    FunctionCall(FunctionCall),
    FunctionResponse(FunctionResponse),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            thought: false,
        }
    }

    pub fn thought(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            thought: true,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn is_thought(&self) -> bool {
        matches!(self, Self::Text { thought: true, .. })
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Text { text, .. } if text.is_empty())
    }
}

impl From<&str> for Part {
    fn from(text: &str) -> Self {
        Part::text(text)
    }
}

impl From<String> for Part {
    fn from(text: String) -> Self {
        Part::text(text)
    }
}

impl From<FunctionCall> for Part {
    fn from(call: FunctionCall) -> Self {
        Part::FunctionCall(call)
    }
}

impl From<FunctionResponse> for Part {
    fn from(response: FunctionResponse) -> Self {
        Part::FunctionResponse(response)
    }
}

/// Structured request from the model to invoke a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            id: generate_call_id(),
            name: name.into(),
            args,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Result of a tool invocation, correlated to its call by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

impl FunctionResponse {
    pub fn new(id: impl Into<String>, name: impl Into<String>, response: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            response,
        }
    }

    pub fn is_error(&self) -> bool {
        self.response.get("error").is_some()
    }
}

pub fn generate_call_id() -> String {
    format!("{}{}", GENERATED_CALL_ID_PREFIX, Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_part_serialization_tags() {
        let part = Part::FunctionCall(FunctionCall::new("lookup", json!({"q": 1})).with_id("c1"));
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["type"], "function_call");
        assert_eq!(value["name"], "lookup");

        let text = serde_json::to_value(Part::text("hi")).unwrap();
        assert!(text.get("thought").is_none());
    }

    #[test]
    fn test_generated_call_ids_unique() {
        let a = FunctionCall::new("t", Value::Null);
        let b = FunctionCall::new("t", Value::Null);
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with(GENERATED_CALL_ID_PREFIX));
    }

    #[test]
    fn test_function_response_error_detection() {
        assert!(FunctionResponse::new("1", "t", json!({"error": "boom"})).is_error());
        assert!(!FunctionResponse::new("1", "t", json!({"result": 1})).is_error());
    }
}
