//! Tool invocation contract, registry and built-in control tools.

mod builtin;
mod context;
mod error;
mod function;
mod registry;
mod traits;

pub use builtin::{
    EXIT_LOOP_TOOL, ExitLoopArgs, ExitLoopTool, TRANSFER_TO_AGENT_TOOL, TransferArgs,
    TransferToAgentTool,
};
pub use context::ToolContext;
pub use error::ToolError;
pub use function::FunctionTool;
pub use registry::ToolRegistry;
pub use traits::{SchemaTool, Tool};
