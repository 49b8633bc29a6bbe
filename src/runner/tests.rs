use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::StreamExt;
use serde_json::json;

use super::*;
use crate::agent::LlmAgent;
use crate::session::{SessionSummary, StateMap};
use crate::testing::{ScriptedModel, call, text};
use crate::tools::FunctionTool;
use crate::types::FunctionResponse;

fn llm(name: &str, model: Arc<ScriptedModel>) -> Arc<dyn Agent> {
    Arc::new(LlmAgent::builder(name).model(model).build().unwrap())
}

fn runner(agent: Arc<dyn Agent>, store: Arc<dyn SessionStore>) -> Runner {
    Runner::builder()
        .app_name("app")
        .agent(agent)
        .store(store)
        .build()
        .unwrap()
}

async fn collect(runner: &Runner, session: &str, message: Content) -> Vec<Event> {
    runner
        .run("alice", &SessionId::from(session), message)
        .collect()
        .await
}

async fn stored_events(store: &dyn SessionStore, session: &str) -> Vec<Event> {
    store
        .get_session("app", "alice", &SessionId::from(session), GetSessionConfig::default())
        .await
        .unwrap()
        .events()
        .to_vec()
}

/// Delegates to memory but fails every append after the first `allowed`.
struct FlakyStore {
    inner: MemorySessionStore,
    allowed: usize,
    appends: AtomicUsize,
}

#[async_trait::async_trait]
impl SessionStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        initial_state: Option<StateMap>,
        session_id: Option<SessionId>,
    ) -> crate::session::SessionResult<Session> {
        self.inner
            .create_session(app_name, user_id, initial_state, session_id)
            .await
    }

    async fn get_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
        config: GetSessionConfig,
    ) -> crate::session::SessionResult<Session> {
        self.inner
            .get_session(app_name, user_id, session_id, config)
            .await
    }

    async fn list_sessions(
        &self,
        app_name: &str,
        user_id: &str,
    ) -> crate::session::SessionResult<Vec<SessionSummary>> {
        self.inner.list_sessions(app_name, user_id).await
    }

    async fn delete_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &SessionId,
    ) -> crate::session::SessionResult<bool> {
        self.inner
            .delete_session(app_name, user_id, session_id)
            .await
    }

    async fn append_event(
        &self,
        session: &mut Session,
        event: Event,
    ) -> crate::session::SessionResult<Event> {
        if self.appends.fetch_add(1, Ordering::SeqCst) >= self.allowed {
            return Err(SessionError::Storage {
                message: "disk full".into(),
            });
        }
        self.inner.append_event(session, event).await
    }
}

#[tokio::test]
async fn test_run_persists_events_without_echoing_user() {
    let store = Arc::new(MemorySessionStore::new());
    let model = Arc::new(ScriptedModel::replying("fake", ["hello alice"]));
    let runner = runner(llm("greeter", model), store.clone());

    let events = collect(&runner, "s1", Content::user("hi")).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].author(), "greeter");
    assert_eq!(events[0].text(), "hello alice");

    let stored = stored_events(store.as_ref(), "s1").await;
    assert_eq!(stored.len(), 2);
    assert!(stored[0].is_user());
    assert_eq!(stored[1].id(), events[0].id());
    assert_eq!(stored[0].invocation_id(), stored[1].invocation_id());
    assert_eq!(runner.in_flight(), 0);
}

#[tokio::test]
async fn test_transferred_agent_keeps_the_conversation() {
    let root_model = Arc::new(ScriptedModel::new(
        "root-model",
        vec![vec![call("transfer_to_agent", json!({"agent_name": "helper"}))]],
    ));
    let helper_model = Arc::new(ScriptedModel::replying("helper-model", ["first", "second"]));
    let helper = llm("helper", helper_model);
    let root: Arc<dyn Agent> = Arc::new(
        LlmAgent::builder("root")
            .model(root_model.clone())
            .sub_agent(helper)
            .build()
            .unwrap(),
    );
    let runner = runner(root, Arc::new(MemorySessionStore::new()));

    let first = collect(&runner, "s1", Content::user("help me")).await;
    let authors: Vec<&str> = first.iter().map(|e| e.author()).collect();
    assert_eq!(authors, vec!["root", "root", "helper"]);

    let second = collect(&runner, "s1", Content::user("and again")).await;
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].author(), "helper");
    assert_eq!(second[0].text(), "second");
    assert_eq!(root_model.calls(), 1);
}

#[tokio::test]
async fn test_agent_disallowing_parent_transfer_hands_back_to_root() {
    let root_model = Arc::new(ScriptedModel::new(
        "root-model",
        vec![
            vec![call("transfer_to_agent", json!({"agent_name": "helper"}))],
            vec![text("root again")],
        ],
    ));
    let helper: Arc<dyn Agent> = Arc::new(
        LlmAgent::builder("helper")
            .model(Arc::new(ScriptedModel::replying("helper-model", ["done"])))
            .disallow_transfer_to_parent(true)
            .build()
            .unwrap(),
    );
    let root: Arc<dyn Agent> = Arc::new(
        LlmAgent::builder("root")
            .model(root_model)
            .sub_agent(helper)
            .build()
            .unwrap(),
    );
    let runner = runner(root, Arc::new(MemorySessionStore::new()));

    collect(&runner, "s1", Content::user("help me")).await;
    let second = collect(&runner, "s1", Content::user("thanks")).await;
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].author(), "root");
    assert_eq!(second[0].text(), "root again");
}

#[tokio::test]
async fn test_function_response_resumes_calling_agent() {
    let approve = FunctionTool::new("approve", "Asks a human", |_, _| async {
        Ok(json!({"status": "pending"}))
    })
    .long_running();
    let clerk_model = Arc::new(ScriptedModel::new(
        "clerk-model",
        vec![vec![call("approve", json!({}))], vec![text("approved")]],
    ));
    let clerk: Arc<dyn Agent> = Arc::new(
        LlmAgent::builder("clerk")
            .model(clerk_model.clone())
            .tool(Arc::new(approve))
            .disallow_transfer_to_parent(true)
            .build()
            .unwrap(),
    );
    let root_model = Arc::new(ScriptedModel::new(
        "root-model",
        vec![vec![call("transfer_to_agent", json!({"agent_name": "clerk"}))]],
    ));
    let root: Arc<dyn Agent> = Arc::new(
        LlmAgent::builder("root")
            .model(root_model.clone())
            .sub_agent(clerk)
            .build()
            .unwrap(),
    );
    let runner = runner(root, Arc::new(MemorySessionStore::new()));

    let first = collect(&runner, "s1", Content::user("buy it")).await;
    let pending = first
        .iter()
        .find(|e| !e.long_running_tool_ids().is_empty())
        .unwrap();
    assert_eq!(pending.author(), "clerk");
    let call_id = pending.function_calls()[0].id.clone();

    let reply = Content::function_responses(vec![FunctionResponse::new(
        call_id,
        "approve",
        json!({"status": "ok"}),
    )]);
    let second = collect(&runner, "s1", reply).await;
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].author(), "clerk");
    assert_eq!(second[0].text(), "approved");
    assert_eq!(root_model.calls(), 1);
    assert_eq!(clerk_model.calls(), 2);
}

#[tokio::test]
async fn test_model_failure_ends_with_unpersisted_error_event() {
    let store = Arc::new(MemorySessionStore::new());
    let model = Arc::new(ScriptedModel::failing("down", "offline"));
    let runner = runner(llm("agent", model), store.clone());

    let events = collect(&runner, "s1", Content::user("hi")).await;
    assert_eq!(events.len(), 1);
    assert!(events[0].is_error());
    assert_eq!(events[0].error_code(), Some("MODEL_UNAVAILABLE"));
    assert!(events[0].is_turn_complete());

    let stored = stored_events(store.as_ref(), "s1").await;
    assert_eq!(stored.len(), 1);
    assert!(stored[0].is_user());
}

#[tokio::test]
async fn test_store_failure_ends_stream() {
    let store = Arc::new(FlakyStore {
        inner: MemorySessionStore::new(),
        allowed: 1,
        appends: AtomicUsize::new(0),
    });
    let model = Arc::new(ScriptedModel::replying("fake", ["never stored"]));
    let runner = runner(llm("agent", model), store.clone());

    let events = collect(&runner, "s1", Content::user("hi")).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].error_code(), Some("SESSION_STORE"));
    assert!(events[0].error_message().unwrap().contains("disk full"));
    assert_eq!(stored_events(store.as_ref(), "s1").await.len(), 1);
}

#[tokio::test]
async fn test_load_and_switch_session() {
    let store = Arc::new(MemorySessionStore::new());
    let model = Arc::new(ScriptedModel::replying("fake", ["one", "two"]));
    let runner = runner(llm("agent", model), store.clone());

    let mut loaded = runner.load("alice", SessionId::from("a")).await.unwrap();
    assert_eq!(loaded.app_name(), "app");
    assert_eq!(loaded.agent().name(), "agent");
    assert_eq!(store.count().await, 1);

    store
        .create_session("app", "alice", None, Some(SessionId::from("b")))
        .await
        .unwrap();
    loaded.switch_session(SessionId::from("b")).await.unwrap();
    assert_eq!(loaded.session_id().as_str(), "b");

    let events: Vec<Event> = loaded.run(Content::user("hi")).collect().await;
    assert_eq!(events[0].text(), "one");
    assert_eq!(stored_events(store.as_ref(), "b").await.len(), 2);
    assert!(stored_events(store.as_ref(), "a").await.is_empty());

    let err = loaded.switch_session(SessionId::from("missing")).await;
    assert!(matches!(err, Err(Error::NotFound { kind: "session", .. })));
    assert_eq!(loaded.session_id().as_str(), "b");
}

#[test]
fn test_builder_validation() {
    let model = Arc::new(ScriptedModel::replying("fake", ["x"]));

    let missing_agent = Runner::builder().app_name("app").build();
    assert!(matches!(missing_agent, Err(Error::InvalidAgentComposition(_))));

    let missing_app = Runner::builder().agent(llm("a", model.clone())).build();
    assert!(matches!(missing_app, Err(Error::Config(_))));

    let bad_config = Runner::builder()
        .app_name("app")
        .agent(llm("a", model))
        .config(RunConfig::default().with_parallel_buffer(0))
        .build();
    assert!(matches!(bad_config, Err(Error::Config(_))));
}
