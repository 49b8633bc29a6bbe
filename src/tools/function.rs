//! Closure-backed tools.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use super::context::ToolContext;
use super::error::ToolError;
use super::traits::Tool;

type Handler = dyn Fn(Value, ToolContext) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync;

/// A tool defined by an async closure.
///
/// ```rust,no_run
/// use agent_runtime::tools::FunctionTool;
/// use serde_json::json;
///
/// let increment = FunctionTool::new("increment", "Add one to count", |_args, ctx| async move {
///     let count = ctx.get_state("count").and_then(|v| v.as_i64()).unwrap_or(0);
///     ctx.set_state("count", json!(count + 1));
///     Ok(json!({"count": count + 1}))
/// });
/// ```
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    description: String,
    schema: Value,
    long_running: bool,
    fatal: bool,
    handler: Arc<Handler>,
}

impl FunctionTool {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema: serde_json::json!({"type": "object", "properties": {}}),
            long_running: false,
            fatal: false,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn long_running(mut self) -> Self {
        self.long_running = true;
        self
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("long_running", &self.long_running)
            .field("fatal", &self.fatal)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameter_schema(&self) -> Value {
        self.schema.clone()
    }

    fn is_long_running(&self) -> bool {
        self.long_running
    }

    fn is_fatal(&self) -> bool {
        self.fatal
    }

    async fn invoke(&self, args: Value, context: &ToolContext) -> Result<Value, ToolError> {
        (self.handler)(args, context.clone()).await
    }
}
