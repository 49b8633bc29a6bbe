use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::StreamExt;
use serde_json::{Value, json};

use crate::agent::{Agent, LlmAgent};
use crate::config::RunConfig;
use crate::event::Event;
use crate::model::ResponseFragment;
use crate::planner::{BuiltInPlanner, FINAL_ANSWER_TAG, PLANNING_TAG, PlanReActPlanner};
use crate::testing::{ScriptedModel, call, drive, invocation_context, partial, text};
use crate::tools::{ExitLoopTool, FunctionTool, ToolError};
use crate::{Error, Result};

fn ok_events(items: Vec<Result<Event>>) -> Vec<Event> {
    items.into_iter().map(|r| r.unwrap()).collect()
}

fn increment_tool() -> Arc<FunctionTool> {
    Arc::new(FunctionTool::new(
        "increment",
        "Adds one to the counter",
        |_args, ctx| async move {
            let count = ctx.get_state("count").and_then(|v| v.as_i64()).unwrap_or(0);
            ctx.set_state("count", json!(count + 1));
            Ok(json!({"count": count + 1}))
        },
    ))
}

fn llm(name: &str, model: Arc<ScriptedModel>) -> LlmAgent {
    LlmAgent::builder(name).model(model).build().unwrap()
}

#[tokio::test]
async fn test_partials_precede_final() {
    let model = Arc::new(ScriptedModel::new(
        "fake",
        vec![vec![partial("a"), partial("b"), text("ab")]],
    ));
    let agent: Arc<dyn Agent> = Arc::new(llm("writer", model));
    let ctx = invocation_context(Arc::clone(&agent), RunConfig::default());

    let events = ok_events(drive(agent, ctx).await);
    let shape: Vec<(bool, String)> = events
        .iter()
        .map(|e| (e.is_partial(), e.text()))
        .collect();
    assert_eq!(
        shape,
        vec![
            (true, "a".to_string()),
            (true, "b".to_string()),
            (false, "ab".to_string())
        ]
    );
    assert!(events[2].is_final_response());
    assert!(events.iter().all(|e| e.author() == "writer"));
}

#[tokio::test]
async fn test_tool_round_feeds_next_request() {
    let model = Arc::new(ScriptedModel::new(
        "fake",
        vec![vec![call("increment", json!({}))], vec![text("count is 1")]],
    ));
    let agent: Arc<dyn Agent> = Arc::new(
        LlmAgent::builder("counter")
            .model(model.clone())
            .tool(increment_tool())
            .output_key("summary")
            .build()
            .unwrap(),
    );
    let ctx = invocation_context(Arc::clone(&agent), RunConfig::default());

    let events = ok_events(drive(agent, ctx.clone()).await);
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].function_calls()[0].name, "increment");
    let response = events[1].function_responses()[0];
    assert_eq!(response.id, events[0].function_calls()[0].id);
    assert_eq!(response.response, json!({"count": 1}));
    assert_eq!(events[1].actions().state_delta.get("count"), Some(&json!(1)));
    assert!(events[2].is_final_response());
    assert_eq!(
        events[2].actions().state_delta.get("summary"),
        Some(&json!("count is 1"))
    );

    let second = &model.requests()[1];
    assert_eq!(second.contents.len(), 3);
    assert!(second.has_tool("increment"));

    let state = ctx.state().await;
    assert_eq!(state.get("count"), Some(&json!(1)));
    assert_eq!(state.get("summary"), Some(&json!("count is 1")));
}

#[tokio::test]
async fn test_skip_summarization_ends_turn() {
    let model = Arc::new(ScriptedModel::new("fake", vec![vec![call("exit_loop", json!({}))]]));
    let agent: Arc<dyn Agent> = Arc::new(
        LlmAgent::builder("worker")
            .model(model.clone())
            .tool(Arc::new(ExitLoopTool))
            .build()
            .unwrap(),
    );
    let ctx = invocation_context(Arc::clone(&agent), RunConfig::default());

    let events = ok_events(drive(agent, ctx).await);
    assert_eq!(events.len(), 2);
    assert!(events[1].actions().escalate);
    assert!(events[1].is_final_response());
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn test_tool_iterations_exhaust() {
    let model = Arc::new(ScriptedModel::repeating("fake", vec![call("again", json!({}))]));
    let again = FunctionTool::new("again", "Always asks for more", |_, _| async {
        Ok(json!({"more": true}))
    });
    let agent: Arc<dyn Agent> = Arc::new(
        LlmAgent::builder("stuck")
            .model(model.clone())
            .tool(Arc::new(again))
            .build()
            .unwrap(),
    );
    let ctx = invocation_context(
        Arc::clone(&agent),
        RunConfig::default().with_max_tool_iterations(2),
    );

    let items = drive(agent, ctx).await;
    assert_eq!(items.len(), 5);
    assert!(items[..4].iter().all(|r| r.is_ok()));
    assert!(matches!(
        items[4],
        Err(Error::FlowExhausted {
            limit: "max_tool_iterations",
            max: 2
        })
    ));
    assert_eq!(model.calls(), 3);
}

#[tokio::test]
async fn test_llm_call_budget_exhausts() {
    let model = Arc::new(ScriptedModel::repeating("fake", vec![call("increment", json!({}))]));
    let agent: Arc<dyn Agent> = Arc::new(
        LlmAgent::builder("counter")
            .model(model)
            .tool(increment_tool())
            .build()
            .unwrap(),
    );
    let ctx = invocation_context(Arc::clone(&agent), RunConfig::default().with_max_llm_calls(1));

    let items = drive(agent, ctx).await;
    assert_eq!(items.len(), 3);
    assert!(matches!(
        items[2],
        Err(Error::FlowExhausted {
            limit: "max_llm_calls",
            ..
        })
    ));
}

#[tokio::test]
async fn test_unknown_tool_and_tool_errors_are_recoverable() {
    let model = Arc::new(ScriptedModel::new(
        "fake",
        vec![
            vec![call("missing", json!({}))],
            vec![call("flaky", json!({}))],
            vec![text("recovered")],
        ],
    ));
    let flaky = FunctionTool::new("flaky", "Fails", |_, _| async {
        Err::<Value, _>(ToolError::execution_failed("disk full"))
    });
    let agent: Arc<dyn Agent> = Arc::new(
        LlmAgent::builder("resilient")
            .model(model)
            .tool(Arc::new(flaky))
            .build()
            .unwrap(),
    );
    let ctx = invocation_context(Arc::clone(&agent), RunConfig::default());

    let events = ok_events(drive(agent, ctx).await);
    assert_eq!(events.len(), 5);
    assert!(events[1].function_responses()[0].is_error());
    assert!(events[3].function_responses()[0].response["error"]
        .as_str()
        .unwrap()
        .contains("disk full"));
    assert_eq!(events[4].text(), "recovered");
}

#[tokio::test]
async fn test_fatal_tool_aborts_turn() {
    let model = Arc::new(ScriptedModel::new("fake", vec![vec![call("critical", json!({}))]]));
    let critical = FunctionTool::new("critical", "Must not fail", |_, _| async {
        Err::<Value, _>(ToolError::execution_failed("boom"))
    })
    .fatal();
    let agent: Arc<dyn Agent> = Arc::new(
        LlmAgent::builder("strict")
            .model(model)
            .tool(Arc::new(critical))
            .build()
            .unwrap(),
    );
    let ctx = invocation_context(Arc::clone(&agent), RunConfig::default());

    let items = drive(agent, ctx).await;
    assert_eq!(items.len(), 2);
    assert!(matches!(items[1], Err(Error::ToolInvocation { ref tool, .. }) if tool == "critical"));
}

#[tokio::test]
async fn test_long_running_tool_pauses_turn() {
    let model = Arc::new(ScriptedModel::new("fake", vec![vec![call("approve", json!({}))]]));
    let approve = FunctionTool::new("approve", "Asks a human", |_, _| async {
        Ok(json!({"status": "pending"}))
    })
    .long_running();
    let agent: Arc<dyn Agent> = Arc::new(
        LlmAgent::builder("clerk")
            .model(model.clone())
            .tool(Arc::new(approve))
            .build()
            .unwrap(),
    );
    let ctx = invocation_context(Arc::clone(&agent), RunConfig::default());

    let events = ok_events(drive(agent, ctx).await);
    assert_eq!(events.len(), 2);
    let call_id = events[0].function_calls()[0].id.clone();
    assert!(events[0].long_running_tool_ids().contains(&call_id));
    assert!(!events[0].is_final_response());
    assert_eq!(model.calls(), 1);
}

#[tokio::test]
async fn test_transfer_runs_target_in_same_invocation() {
    let root_model = Arc::new(ScriptedModel::new(
        "root-model",
        vec![vec![call("transfer_to_agent", json!({"agent_name": "helper"}))]],
    ));
    let helper_model = Arc::new(ScriptedModel::replying("helper-model", ["helped"]));
    let helper: Arc<dyn Agent> = Arc::new(
        LlmAgent::builder("helper")
            .description("Handles everything")
            .model(helper_model)
            .build()
            .unwrap(),
    );
    let root: Arc<dyn Agent> = Arc::new(
        LlmAgent::builder("root")
            .model(root_model.clone())
            .sub_agent(helper)
            .build()
            .unwrap(),
    );
    let ctx = invocation_context(Arc::clone(&root), RunConfig::default());

    let events = ok_events(drive(root, ctx).await);
    let authors: Vec<&str> = events.iter().map(|e| e.author()).collect();
    assert_eq!(authors, vec!["root", "root", "helper"]);
    assert_eq!(events[1].actions().transfer_to_agent.as_deref(), Some("helper"));
    assert_eq!(events[2].text(), "helped");

    let request = root_model.last_request().unwrap();
    assert!(request.has_tool("transfer_to_agent"));
    assert!(request.system_instruction.unwrap().contains("helper: Handles everything"));
}

#[tokio::test]
async fn test_transfer_to_unknown_agent_is_rejected() {
    let model = Arc::new(ScriptedModel::new(
        "fake",
        vec![
            vec![call("transfer_to_agent", json!({"agent_name": "ghost"}))],
            vec![text("staying")],
        ],
    ));
    let child: Arc<dyn Agent> = Arc::new(LlmAgent::builder("child").build().unwrap());
    let root: Arc<dyn Agent> = Arc::new(
        LlmAgent::builder("root")
            .model(model)
            .sub_agent(child)
            .build()
            .unwrap(),
    );
    let ctx = invocation_context(Arc::clone(&root), RunConfig::default());

    let events = ok_events(drive(root, ctx).await);
    assert_eq!(events.len(), 3);
    assert!(events[1].function_responses()[0].is_error());
    assert!(events[1].actions().transfer_to_agent.is_none());
    assert_eq!(events[2].text(), "staying");
}

#[tokio::test]
async fn test_model_resolution_failures() {
    let agent: Arc<dyn Agent> = Arc::new(LlmAgent::builder("orphan").build().unwrap());
    let ctx = invocation_context(Arc::clone(&agent), RunConfig::default());
    let items = drive(agent, ctx).await;
    assert_eq!(items.len(), 1);
    assert!(matches!(items[0], Err(Error::ModelUnavailable { .. })));

    let model = Arc::new(ScriptedModel::failing("down", "connection refused"));
    let agent: Arc<dyn Agent> = Arc::new(llm("unlucky", model));
    let ctx = invocation_context(Arc::clone(&agent), RunConfig::default());
    let items = drive(agent, ctx).await;
    assert!(matches!(items[0], Err(Error::ModelUnavailable { ref model, .. }) if model == "down"));
}

#[tokio::test]
async fn test_missing_instruction_key_is_config_error() {
    let model = Arc::new(ScriptedModel::replying("fake", ["unused"]));
    let agent: Arc<dyn Agent> = Arc::new(
        LlmAgent::builder("templated")
            .model(model.clone())
            .instruction("Summarize {topic}")
            .build()
            .unwrap(),
    );
    let ctx = invocation_context(Arc::clone(&agent), RunConfig::default());
    let items = drive(agent, ctx).await;
    assert!(matches!(items[0], Err(Error::Config(_))));
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn test_error_fragment_ends_turn() {
    let model = Arc::new(ScriptedModel::new(
        "fake",
        vec![vec![
            ResponseFragment::error("SAFETY", "blocked"),
            text("never seen"),
        ]],
    ));
    let agent: Arc<dyn Agent> = Arc::new(llm("careful", model));
    let ctx = invocation_context(Arc::clone(&agent), RunConfig::default());

    let events = ok_events(drive(agent, ctx).await);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].error_code(), Some("SAFETY"));
    assert!(events[0].is_turn_complete());
}

#[tokio::test]
async fn test_stream_only_advances_when_polled() {
    let invoked = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&invoked);
    let tool = FunctionTool::new("tick", "Counts invocations", move |_, _| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!({}))
        }
    });
    let model = Arc::new(ScriptedModel::new(
        "fake",
        vec![vec![call("tick", json!({}))], vec![text("done")]],
    ));
    let agent: Arc<dyn Agent> = Arc::new(
        LlmAgent::builder("lazy")
            .model(model)
            .tool(Arc::new(tool))
            .build()
            .unwrap(),
    );
    let ctx = invocation_context(Arc::clone(&agent), RunConfig::default());

    let mut events = agent.run(ctx);
    let first = events.next().await.unwrap().unwrap();
    assert_eq!(first.function_calls().len(), 1);
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    events.next().await.unwrap().unwrap();
    assert_eq!(invoked.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_plan_react_planner_shapes_request_and_answer() {
    let model = Arc::new(ScriptedModel::replying(
        "fake",
        [format!("{PLANNING_TAG} look it up {FINAL_ANSWER_TAG} 42")],
    ));
    let agent: Arc<dyn Agent> = Arc::new(
        LlmAgent::builder("planner")
            .model(model.clone())
            .instruction("Answer briefly.")
            .planner(Arc::new(PlanReActPlanner::new()))
            .output_key("answer")
            .build()
            .unwrap(),
    );
    let ctx = invocation_context(Arc::clone(&agent), RunConfig::default());

    let events = ok_events(drive(agent, ctx.clone()).await);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].text(), "42");
    let parts = &events[0].content().unwrap().parts;
    assert!(parts[0].is_thought());
    assert_eq!(
        events[0].actions().state_delta.get("answer"),
        Some(&json!("42"))
    );
    assert_eq!(ctx.state().await.get("answer"), Some(&json!("42")));

    let instruction = model.last_request().unwrap().system_instruction.unwrap();
    assert!(instruction.starts_with("Answer briefly."));
    assert!(instruction.contains(FINAL_ANSWER_TAG));
}

#[tokio::test]
async fn test_built_in_planner_requests_thinking() {
    let model = Arc::new(ScriptedModel::replying("fake", ["ok"]));
    let agent: Arc<dyn Agent> = Arc::new(
        LlmAgent::builder("thinker")
            .model(model.clone())
            .planner(Arc::new(BuiltInPlanner::with_budget(256)))
            .build()
            .unwrap(),
    );
    let ctx = invocation_context(Arc::clone(&agent), RunConfig::default());

    let events = ok_events(drive(agent, ctx).await);
    assert_eq!(events[0].text(), "ok");
    let thinking = model.last_request().unwrap().config.thinking.unwrap();
    assert_eq!(thinking.budget_tokens, Some(256));
}
