use std::sync::Arc;

use super::{Agent, AgentCore, AgentKind, EventStream, InvocationContext};
use crate::model::{GenerateConfig, Model, ModelRegistry};
use crate::planner::Planner;
use crate::tools::{TRANSFER_TO_AGENT_TOOL, Tool, ToolRegistry};
use crate::{Error, Result};

/// How much conversation history goes into each model request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IncludeContents {
    /// Full branch-visible history
    #[default]
    Default,
    /// Only the current user turn
    None,
}

#[derive(Clone)]
pub(crate) enum ModelSource {
    Named(String),
    Instance(Arc<dyn Model>),
}

impl ModelSource {
    pub(crate) fn resolve(&self, registry: &ModelRegistry) -> Result<Arc<dyn Model>> {
        match self {
            ModelSource::Instance(model) => Ok(Arc::clone(model)),
            ModelSource::Named(name) => Ok(registry.resolve(name)?),
        }
    }
}

impl std::fmt::Debug for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelSource::Named(name) => write!(f, "Named({name})"),
            ModelSource::Instance(model) => write!(f, "Instance({})", model.name()),
        }
    }
}

/// Leaf agent driven by a language model and its tools.
pub struct LlmAgent {
    core: AgentCore,
    model: Option<ModelSource>,
    instruction: String,
    tools: ToolRegistry,
    output_key: Option<String>,
    planner: Option<Arc<dyn Planner>>,
    include_contents: IncludeContents,
    disallow_transfer_to_parent: bool,
    disallow_transfer_to_peers: bool,
    generate_config: GenerateConfig,
}

impl LlmAgent {
    pub fn builder(name: impl Into<String>) -> LlmAgentBuilder {
        LlmAgentBuilder::new(name)
    }

    /// Instruction template; `{key}` and `{key?}` are filled from state.
    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn planner(&self) -> Option<&Arc<dyn Planner>> {
        self.planner.as_ref()
    }

    pub fn include_contents(&self) -> IncludeContents {
        self.include_contents
    }

    pub fn disallow_transfer_to_parent(&self) -> bool {
        self.disallow_transfer_to_parent
    }

    pub fn disallow_transfer_to_peers(&self) -> bool {
        self.disallow_transfer_to_peers
    }

    pub fn generate_config(&self) -> &GenerateConfig {
        &self.generate_config
    }

    pub(crate) fn model_source(&self) -> Option<&ModelSource> {
        self.model.as_ref()
    }
}

impl Agent for LlmAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Llm
    }

    fn output_key(&self) -> Option<&str> {
        self.output_key.as_deref()
    }

    fn as_llm(&self) -> Option<&LlmAgent> {
        Some(self)
    }

    fn run(self: Arc<Self>, ctx: InvocationContext) -> EventStream {
        crate::flow::run(self, ctx)
    }
}

impl std::fmt::Debug for LlmAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmAgent")
            .field("core", &self.core)
            .field("model", &self.model)
            .field("tools", &self.tools.names())
            .field("output_key", &self.output_key)
            .field("include_contents", &self.include_contents)
            .finish_non_exhaustive()
    }
}

pub struct LlmAgentBuilder {
    name: String,
    description: String,
    model: Option<ModelSource>,
    instruction: String,
    tools: ToolRegistry,
    output_key: Option<String>,
    planner: Option<Arc<dyn Planner>>,
    include_contents: IncludeContents,
    disallow_transfer_to_parent: bool,
    disallow_transfer_to_peers: bool,
    generate_config: GenerateConfig,
    sub_agents: Vec<Arc<dyn Agent>>,
}

impl LlmAgentBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            model: None,
            instruction: String::new(),
            tools: ToolRegistry::new(),
            output_key: None,
            planner: None,
            include_contents: IncludeContents::Default,
            disallow_transfer_to_parent: false,
            disallow_transfer_to_peers: false,
            generate_config: GenerateConfig::default(),
            sub_agents: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn model(mut self, model: Arc<dyn Model>) -> Self {
        self.model = Some(ModelSource::Instance(model));
        self
    }

    /// Resolve the model by name from the runner's registry.
    pub fn model_name(mut self, name: impl Into<String>) -> Self {
        self.model = Some(ModelSource::Named(name.into()));
        self
    }

    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        for tool in tools {
            self.tools.register(tool);
        }
        self
    }

    pub fn output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    pub fn planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn include_contents(mut self, include: IncludeContents) -> Self {
        self.include_contents = include;
        self
    }

    pub fn disallow_transfer_to_parent(mut self, disallow: bool) -> Self {
        self.disallow_transfer_to_parent = disallow;
        self
    }

    pub fn disallow_transfer_to_peers(mut self, disallow: bool) -> Self {
        self.disallow_transfer_to_peers = disallow;
        self
    }

    pub fn generate_config(mut self, config: GenerateConfig) -> Self {
        self.generate_config = config;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.generate_config.temperature = Some(temperature);
        self
    }

    pub fn sub_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.sub_agents.push(agent);
        self
    }

    pub fn build(self) -> Result<LlmAgent> {
        if self.tools.contains(TRANSFER_TO_AGENT_TOOL) {
            return Err(Error::composition(format!(
                "tool name '{TRANSFER_TO_AGENT_TOOL}' is reserved (agent '{}')",
                self.name
            )));
        }
        let mut core = AgentCore::new(self.name).with_description(self.description);
        core.attach_all(self.sub_agents)?;

        Ok(LlmAgent {
            core,
            model: self.model,
            instruction: self.instruction,
            tools: self.tools,
            output_key: self.output_key,
            planner: self.planner,
            include_contents: self.include_contents,
            disallow_transfer_to_parent: self.disallow_transfer_to_parent,
            disallow_transfer_to_peers: self.disallow_transfer_to_peers,
            generate_config: self.generate_config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;
    use crate::tools::{ExitLoopTool, FunctionTool};
    use serde_json::json;

    #[test]
    fn test_builder_sets_fields() {
        let agent = LlmAgent::builder("writer")
            .description("Writes things")
            .model(Arc::new(ScriptedModel::new("fake", vec![])))
            .instruction("Write about {topic}.")
            .tool(Arc::new(ExitLoopTool))
            .output_key("draft")
            .include_contents(IncludeContents::None)
            .temperature(0.2)
            .build()
            .unwrap();

        assert_eq!(agent.name(), "writer");
        assert_eq!(agent.description(), "Writes things");
        assert_eq!(agent.kind(), AgentKind::Llm);
        assert_eq!(agent.output_key(), Some("draft"));
        assert!(agent.tools().contains("exit_loop"));
        assert_eq!(agent.include_contents(), IncludeContents::None);
        assert_eq!(agent.generate_config().temperature, Some(0.2));
        assert!(agent.as_llm().is_some());
    }

    #[test]
    fn test_reserved_tool_name_rejected() {
        let tool = FunctionTool::new(TRANSFER_TO_AGENT_TOOL, "clash", |_, _| async {
            Ok(json!({}))
        });
        let err = LlmAgent::builder("a").tool(Arc::new(tool)).build().unwrap_err();
        assert!(matches!(err, Error::InvalidAgentComposition(_)));
    }

    #[test]
    fn test_named_model_resolves_from_registry() {
        let registry =
            ModelRegistry::new().with_model(Arc::new(ScriptedModel::new("fake", vec![])));
        let source = ModelSource::Named("fake".into());
        assert_eq!(source.resolve(&registry).unwrap().name(), "fake");
        assert!(ModelSource::Named("missing".into()).resolve(&registry).is_err());
    }
}
