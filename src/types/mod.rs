//! Core conversation types shared by events, models and tools.

pub mod content;
pub mod message;
pub mod tool;

pub use content::{FunctionCall, FunctionResponse, Part, generate_call_id};
pub use message::{Content, Role};
pub use tool::ToolDeclaration;
