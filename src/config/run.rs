//! Per-invocation execution limits and defaults.

use serde::{Deserialize, Serialize};

use super::provider::{ConfigProvider, ConfigProviderExt};
use super::{ConfigError, ConfigResult, ValidationErrors};

pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 10;
pub const DEFAULT_MAX_LLM_CALLS: usize = 500;
pub const DEFAULT_MAX_GRAPH_STEPS: usize = 64;
pub const DEFAULT_PARALLEL_BUFFER: usize = 16;

/// Whether the model is asked to stream partial fragments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingMode {
    #[default]
    None,
    Sse,
}

impl std::str::FromStr for StreamingMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "sse" => Ok(Self::Sse),
            other => Err(ConfigError::InvalidValue {
                key: "run.streaming_mode".into(),
                message: format!("expected 'none' or 'sse', got '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Tool-call rounds allowed per agent turn.
    pub max_tool_iterations: usize,
    /// Model calls allowed per invocation across all agents. 0 disables the limit.
    pub max_llm_calls: usize,
    pub streaming_mode: StreamingMode,
    /// Node executions allowed per graph traversal.
    pub max_graph_steps: usize,
    /// Capacity of the channel parallel children write into.
    pub parallel_buffer: usize,
    /// Registry name used when no agent in the chain declares a model.
    pub default_model: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            max_llm_calls: DEFAULT_MAX_LLM_CALLS,
            streaming_mode: StreamingMode::None,
            max_graph_steps: DEFAULT_MAX_GRAPH_STEPS,
            parallel_buffer: DEFAULT_PARALLEL_BUFFER,
            default_model: None,
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_tool_iterations(mut self, n: usize) -> Self {
        self.max_tool_iterations = n;
        self
    }

    pub fn with_max_llm_calls(mut self, n: usize) -> Self {
        self.max_llm_calls = n;
        self
    }

    pub fn with_streaming_mode(mut self, mode: StreamingMode) -> Self {
        self.streaming_mode = mode;
        self
    }

    pub fn with_max_graph_steps(mut self, n: usize) -> Self {
        self.max_graph_steps = n;
        self
    }

    pub fn with_parallel_buffer(mut self, n: usize) -> Self {
        self.parallel_buffer = n;
        self
    }

    pub fn with_default_model(mut self, name: impl Into<String>) -> Self {
        self.default_model = Some(name.into());
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming_mode == StreamingMode::Sse
    }

    /// Overlay `run.*` keys from `provider` on the defaults, then validate.
    pub async fn load(provider: &dyn ConfigProvider) -> ConfigResult<Self> {
        let mut config = Self::default();

        config.max_tool_iterations = provider
            .get_or("run.max_tool_iterations", config.max_tool_iterations)
            .await?;
        config.max_llm_calls = provider
            .get_or("run.max_llm_calls", config.max_llm_calls)
            .await?;
        config.max_graph_steps = provider
            .get_or("run.max_graph_steps", config.max_graph_steps)
            .await?;
        config.parallel_buffer = provider
            .get_or("run.parallel_buffer", config.parallel_buffer)
            .await?;
        if let Some(mode) = provider.get_string("run.streaming_mode").await? {
            config.streaming_mode = mode.parse()?;
        }
        if let Some(model) = provider.get_string("run.default_model").await?
            && !model.is_empty()
        {
            config.default_model = Some(model);
        }

        config.validate()?;
        tracing::debug!(provider = provider.name(), ?config, "Run config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        if self.max_tool_iterations == 0 {
            errors.push(ConfigError::InvalidValue {
                key: "run.max_tool_iterations".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.parallel_buffer == 0 {
            errors.push(ConfigError::InvalidValue {
                key: "run.parallel_buffer".into(),
                message: "must be at least 1".into(),
            });
        }
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::ValidationErrors(ValidationErrors(errors))),
        }
    }
}
