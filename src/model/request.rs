use serde::{Deserialize, Serialize};

use crate::types::{Content, FunctionCall, Role, ToolDeclaration};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ThinkingConfig {
    #[serde(default)]
    pub include_thoughts: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,
}

/// One model call: instruction, history, tool declarations and sampling options.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    pub contents: Vec<Content>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDeclaration>,
    #[serde(default)]
    pub config: GenerateConfig,
    /// Whether partial fragments are wanted.
    #[serde(default)]
    pub stream: bool,
}

impl LlmRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Append text to the system instruction, separated by a blank line.
    pub fn append_instruction(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if text.is_empty() {
            return;
        }
        match &mut self.system_instruction {
            Some(existing) if !existing.is_empty() => {
                existing.push_str("\n\n");
                existing.push_str(text);
            }
            _ => self.system_instruction = Some(text.to_string()),
        }
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }
}

/// One element of a model's response stream.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseFragment {
    #[serde(default)]
    pub content: Option<Content>,
    /// Intermediate fragment superseded by a later complete one.
    #[serde(default)]
    pub partial: bool,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ResponseFragment {
    pub fn new(content: Content) -> Self {
        Self {
            content: Some(content),
            ..Default::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Content::model(text)).complete()
    }

    pub fn partial_text(text: impl Into<String>) -> Self {
        Self {
            content: Some(Content::model(text)),
            partial: true,
            ..Default::default()
        }
    }

    pub fn function_calls(calls: Vec<FunctionCall>) -> Self {
        Self::new(Content::function_calls(calls)).complete()
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: Some(code.into()),
            error_message: Some(message.into()),
            turn_complete: true,
            ..Default::default()
        }
    }

    pub fn complete(mut self) -> Self {
        self.turn_complete = true;
        self
    }

    pub fn role(&self) -> Option<Role> {
        self.content.as_ref().map(|c| c.role)
    }

    pub fn function_calls_iter(&self) -> impl Iterator<Item = &FunctionCall> {
        self.content
            .iter()
            .flat_map(|content| content.function_calls_iter())
    }

    pub fn has_function_calls(&self) -> bool {
        self.function_calls_iter().next().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.content.as_ref().is_none_or(Content::is_empty) && self.error_code.is_none()
    }
}
