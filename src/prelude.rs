//! Common imports for building and running agents.
//!
//! ```rust
//! use agent_runtime::prelude::*;
//! ```

pub use crate::agent::{
    Agent, AgentKind, GraphAgent, IncludeContents, LlmAgent, LoopAgent, ParallelAgent,
    SequentialAgent,
};
pub use crate::config::{RunConfig, StreamingMode};
pub use crate::event::{Event, EventActions};
pub use crate::model::{Model, ModelRegistry, ResponseFragment};
pub use crate::runner::Runner;
pub use crate::session::{GetSessionConfig, MemorySessionStore, SessionId, SessionStore, State};
pub use crate::tools::{ExitLoopTool, FunctionTool, SchemaTool, Tool, ToolContext, ToolError};
pub use crate::types::{Content, FunctionCall, FunctionResponse, Part};
pub use crate::{Error, Result};
