//! # agent-runtime
//!
//! Execution engine for conversational AI agents: an immutable event model,
//! replayable sessions with scoped state, a per-agent turn loop that drives a
//! model and its tools, and composite agents that arrange other agents into
//! sequential, parallel, looped and graph-routed pipelines.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use agent_runtime::prelude::*;
//! use agent_runtime::testing::ScriptedModel;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let model = Arc::new(ScriptedModel::replying("scripted", ["Hello!"]));
//!     let agent = LlmAgent::builder("greeter")
//!         .model(model)
//!         .instruction("Greet the user.")
//!         .build()?;
//!
//!     let runner = Runner::builder()
//!         .app_name("demo")
//!         .agent(Arc::new(agent))
//!         .store(Arc::new(MemorySessionStore::new()))
//!         .build()?;
//!
//!     let mut events = runner.run("alice", &SessionId::from("s1"), Content::user("hi"));
//!     while let Some(event) = events.next().await {
//!         if event.is_final_response() {
//!             println!("{}", event.text());
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod agent;
pub mod config;
pub mod event;
pub mod flow;
pub mod model;
pub mod planner;
pub mod prelude;
pub mod runner;
pub mod session;
pub mod testing;
pub mod tools;
pub mod types;

pub use agent::{
    Agent, AgentKind, GraphAgent, InvocationContext, LlmAgent, LoopAgent, ParallelAgent,
    SequentialAgent,
};
pub use config::{ConfigError, RunConfig, StreamingMode};
pub use event::{Event, EventActions, InvocationId};
pub use model::{LlmRequest, Model, ModelError, ModelRegistry, ResponseFragment};
pub use runner::{LoadedExecutionContext, Runner, RunnerBuilder};
pub use session::{
    MemorySessionStore, Session, SessionError, SessionId, SessionStore, State, StateMap,
};
pub use tools::{FunctionTool, SchemaTool, Tool, ToolContext, ToolError};
pub use types::{Content, FunctionCall, FunctionResponse, Part, Role};

/// Errors surfaced by the engine.
///
/// Recoverable tool failures never reach this type; they are folded into
/// function-response events. Everything here ends the current invocation.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("Session already exists: {id}")]
    DuplicateSession { id: String },

    /// A tool marked fatal failed.
    #[error("Tool '{tool}' failed: {message}")]
    ToolInvocation { tool: String, message: String },

    #[error("Flow exhausted: {limit} limit of {max} reached")]
    FlowExhausted { limit: &'static str, max: usize },

    #[error("Model '{model}' unavailable: {message}")]
    ModelUnavailable { model: String, message: String },

    /// Raised while assembling agents, never during a run.
    #[error("Invalid agent composition: {0}")]
    InvalidAgentComposition(String),

    #[error("Session store error: {0}")]
    Session(SessionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad agent composition, settings or instruction templates
    Configuration,
    /// Model or store hiccups that may succeed on retry
    Transient,
    /// Session lookups and conflicts
    Stateful,
    /// Iteration and call budgets
    ResourceLimit,
    Internal,
}

impl Error {
    pub fn composition(message: impl Into<String>) -> Self {
        Error::InvalidAgentComposition(message.into())
    }

    pub fn agent_not_found(name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: "agent",
            name: name.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidAgentComposition(_) | Error::Config(_) => ErrorCategory::Configuration,
            Error::ModelUnavailable { .. } => ErrorCategory::Transient,
            Error::Session(e) if e.is_transient() => ErrorCategory::Transient,
            Error::NotFound { .. } | Error::DuplicateSession { .. } | Error::Session(_) => {
                ErrorCategory::Stateful
            }
            Error::FlowExhausted { .. } => ErrorCategory::ResourceLimit,
            Error::ToolInvocation { .. } | Error::Json(_) | Error::Io(_) => {
                ErrorCategory::Internal
            }
        }
    }

    /// Stable code carried by terminal error events.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "NOT_FOUND",
            Error::DuplicateSession { .. } => "DUPLICATE_SESSION",
            Error::ToolInvocation { .. } => "TOOL_INVOCATION",
            Error::FlowExhausted { .. } => "FLOW_EXHAUSTED",
            Error::ModelUnavailable { .. } => "MODEL_UNAVAILABLE",
            Error::InvalidAgentComposition(_) => "INVALID_AGENT_COMPOSITION",
            Error::Session(_) => "SESSION_STORE",
            Error::Config(_) => "CONFIG",
            Error::Json(_) => "JSON",
            Error::Io(_) => "IO",
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    pub fn is_resource_limit(&self) -> bool {
        self.category() == ErrorCategory::ResourceLimit
    }
}

impl From<SessionError> for Error {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound { id } => Error::NotFound {
                kind: "session",
                name: id,
            },
            SessionError::AlreadyExists { id } => Error::DuplicateSession { id },
            other => Error::Session(other),
        }
    }
}

impl From<ModelError> for Error {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Unavailable { model, message } => Error::ModelUnavailable { model, message },
            ModelError::NotRegistered(model) => Error::ModelUnavailable {
                model,
                message: "not registered".into(),
            },
            other => Error::ModelUnavailable {
                model: String::new(),
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_mapping() {
        let err: Error = SessionError::NotFound { id: "s1".into() }.into();
        assert!(matches!(err, Error::NotFound { kind: "session", .. }));
        assert_eq!(err.code(), "NOT_FOUND");

        let err: Error = SessionError::AlreadyExists { id: "s1".into() }.into();
        assert!(matches!(err, Error::DuplicateSession { .. }));

        let err: Error = SessionError::Storage {
            message: "connection reset".into(),
        }
        .into();
        assert!(err.is_retryable());
        assert_eq!(err.code(), "SESSION_STORE");
    }

    #[test]
    fn test_categories() {
        let exhausted = Error::FlowExhausted {
            limit: "max_tool_iterations",
            max: 4,
        };
        assert!(exhausted.is_resource_limit());
        assert_eq!(exhausted.code(), "FLOW_EXHAUSTED");
        assert_eq!(
            exhausted.to_string(),
            "Flow exhausted: max_tool_iterations limit of 4 reached"
        );

        assert_eq!(
            Error::composition("dup").category(),
            ErrorCategory::Configuration
        );
        let model: Error = ModelError::unavailable("m", "down").into();
        assert!(model.is_retryable());
        assert_eq!(model.code(), "MODEL_UNAVAILABLE");
    }
}
