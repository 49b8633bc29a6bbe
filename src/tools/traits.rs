//! Tool trait definitions.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::context::ToolContext;
use super::error::ToolError;
use crate::types::ToolDeclaration;

/// A capability the model may call by name.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameter_schema(&self) -> Value;

    /// The call returns before the work finishes; the turn pauses until a
    /// later message carries the real result.
    fn is_long_running(&self) -> bool {
        false
    }

    /// A failure of this tool ends the invocation instead of becoming an
    /// error response the model can react to.
    fn is_fatal(&self) -> bool {
        false
    }

    async fn invoke(&self, args: Value, context: &ToolContext) -> Result<Value, ToolError>;

    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration::new(self.name(), self.description(), self.parameter_schema())
            .with_long_running(self.is_long_running())
    }
}

/// Schema-based tool trait with automatic JSON schema generation.
///
/// Provides a higher-level abstraction over `Tool` with typed arguments
/// and schema derivation via schemars.
#[async_trait]
pub trait SchemaTool: Send + Sync {
    type Args: JsonSchema + DeserializeOwned + Send;
    const NAME: &'static str;
    const DESCRIPTION: &'static str;
    const LONG_RUNNING: bool = false;
    const FATAL: bool = false;

    async fn handle(&self, args: Self::Args, context: &ToolContext) -> Result<Value, ToolError>;

    fn parameter_schema() -> Value {
        let schema = schemars::schema_for!(Self::Args);
        let mut value =
            serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}));

        if let Some(obj) = value.as_object_mut()
            && !obj.contains_key("properties")
        {
            obj.insert("properties".to_string(), Value::Object(serde_json::Map::new()));
        }

        value
    }
}

#[async_trait]
impl<T: SchemaTool + 'static> Tool for T {
    fn name(&self) -> &str {
        T::NAME
    }

    fn description(&self) -> &str {
        T::DESCRIPTION
    }

    fn parameter_schema(&self) -> Value {
        T::parameter_schema()
    }

    fn is_long_running(&self) -> bool {
        T::LONG_RUNNING
    }

    fn is_fatal(&self) -> bool {
        T::FATAL
    }

    async fn invoke(&self, args: Value, context: &ToolContext) -> Result<Value, ToolError> {
        // Models omit arguments for parameterless tools.
        let args = if args.is_null() {
            Value::Object(Default::default())
        } else {
            args
        };
        match serde_json::from_value::<T::Args>(args) {
            Ok(typed) => SchemaTool::handle(self, typed, context).await,
            Err(e) => Err(ToolError::invalid_input(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize, JsonSchema)]
    struct AddArgs {
        a: i64,
        b: i64,
    }

    struct AddTool;

    #[async_trait]
    impl SchemaTool for AddTool {
        type Args = AddArgs;
        const NAME: &'static str = "add";
        const DESCRIPTION: &'static str = "Add two integers";

        async fn handle(&self, args: AddArgs, _context: &ToolContext) -> Result<Value, ToolError> {
            Ok(json!({"sum": args.a + args.b}))
        }
    }

    #[tokio::test]
    async fn test_schema_tool_invoke() {
        let ctx = ToolContext::for_test("add");
        let result = AddTool.invoke(json!({"a": 2, "b": 3}), &ctx).await.unwrap();
        assert_eq!(result, json!({"sum": 5}));
    }

    #[tokio::test]
    async fn test_schema_tool_rejects_bad_args() {
        let ctx = ToolContext::for_test("add");
        let err = AddTool.invoke(json!({"a": "x"}), &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput { .. }));
    }

    #[test]
    fn test_declaration_schema() {
        let decl = AddTool.declaration();
        assert_eq!(decl.name, "add");
        assert!(decl.parameters["properties"].get("a").is_some());
        assert!(!decl.long_running);
    }
}
