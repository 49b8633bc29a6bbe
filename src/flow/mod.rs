//! The turn state machine of an [`LlmAgent`].
//!
//! ```text
//! BuildRequest -> AwaitModel -> (stream ends) -> DispatchTools -> BuildRequest ...
//!                     |                               |
//!                     +-> Done (no calls)             +-> Transfer / Done
//! ```
//!
//! Partial fragments are forwarded as they arrive. Function calls are
//! dispatched once the model stream ends, and their results feed the next
//! request. The machine advances only when the consumer polls, so every
//! event has been persisted by the runner before the next one is computed.

mod functions;
mod request;

pub use request::{branch_visible, build_contents, inject_state, resolve_model, transfer_targets};

use std::mem;
use std::sync::Arc;

use futures::{StreamExt, stream};
use tracing::{debug, info};

use crate::agent::{Agent, EventStream, InvocationContext, LlmAgent};
use crate::event::{Event, EventActions, EventBuilder};
use crate::model::{ModelStream, ResponseFragment};
use crate::types::{FunctionCall, Part, generate_call_id};
use crate::{Error, Result};

/// Run one turn of `agent`.
pub fn run(agent: Arc<LlmAgent>, ctx: InvocationContext) -> EventStream {
    let flow = Flow::new(agent, ctx);
    stream::unfold(flow, |mut flow| async move {
        flow.next_event().await.map(|event| (event, flow))
    })
    .boxed()
}

enum Phase {
    BuildRequest,
    AwaitModel(Box<AwaitingModel>),
    DispatchTools(Vec<FunctionCall>),
    StartTransfer(String),
    Transfer(EventStream),
    Done,
}

struct AwaitingModel {
    model_name: String,
    stream: ModelStream,
    pending_calls: Vec<FunctionCall>,
}

enum FragmentOutcome {
    Emit(Event),
    EmitAndStop(Event),
    Skip,
    Fail(Error),
}

struct Flow {
    agent: Arc<LlmAgent>,
    ctx: InvocationContext,
    targets: Vec<(String, String)>,
    phase: Phase,
    tool_rounds: usize,
}

impl Flow {
    fn new(agent: Arc<LlmAgent>, ctx: InvocationContext) -> Self {
        let targets = transfer_targets(&agent, ctx.agents());
        Self {
            agent,
            ctx,
            targets,
            phase: Phase::BuildRequest,
            tool_rounds: 0,
        }
    }

    fn event(&self) -> EventBuilder {
        Event::builder(self.ctx.invocation_id().clone(), self.agent.name())
            .branch(self.ctx.branch().map(str::to_string))
    }

    async fn next_event(&mut self) -> Option<Result<Event>> {
        loop {
            match mem::replace(&mut self.phase, Phase::Done) {
                Phase::BuildRequest => {
                    if let Err(e) = self.do_build_request().await {
                        return Some(Err(e));
                    }
                }
                Phase::AwaitModel(mut awaiting) => match awaiting.stream.next().await {
                    None => {
                        let calls = mem::take(&mut awaiting.pending_calls);
                        if !calls.is_empty() {
                            self.phase = Phase::DispatchTools(calls);
                        }
                    }
                    Some(Err(e)) => {
                        return Some(Err(Error::ModelUnavailable {
                            model: awaiting.model_name,
                            message: e.to_string(),
                        }));
                    }
                    Some(Ok(fragment)) => match self.handle_fragment(fragment, &mut awaiting) {
                        FragmentOutcome::Emit(event) => {
                            self.phase = Phase::AwaitModel(awaiting);
                            return Some(Ok(event));
                        }
                        FragmentOutcome::EmitAndStop(event) => return Some(Ok(event)),
                        FragmentOutcome::Skip => self.phase = Phase::AwaitModel(awaiting),
                        FragmentOutcome::Fail(e) => return Some(Err(e)),
                    },
                },
                Phase::DispatchTools(calls) => return Some(self.do_dispatch(&calls).await),
                Phase::StartTransfer(target) => {
                    let Some(next) = self.ctx.agents().get(&target).cloned() else {
                        return Some(Err(Error::agent_not_found(target)));
                    };
                    info!(
                        invocation_id = %self.ctx.invocation_id(),
                        from = %self.agent.name(),
                        to = %target,
                        "Transferring conversation"
                    );
                    self.phase = Phase::Transfer(next.run(self.ctx.for_agent(&target)));
                }
                Phase::Transfer(mut events) => {
                    let item = events.next().await?;
                    if item.is_ok() {
                        self.phase = Phase::Transfer(events);
                    }
                    return Some(item);
                }
                Phase::Done => return None,
            }
        }
    }

    async fn do_build_request(&mut self) -> Result<()> {
        self.ctx.count_llm_call()?;
        let model = resolve_model(&self.agent, &self.ctx)?;
        let request =
            request::build_request(&self.agent, &self.ctx, model.name(), &self.targets).await?;
        debug!(
            invocation_id = %self.ctx.invocation_id(),
            agent = %self.agent.name(),
            model = %model.name(),
            contents = request.contents.len(),
            tools = request.tools.len(),
            "Calling model"
        );

        let stream = model
            .generate(request)
            .await
            .map_err(|e| Error::ModelUnavailable {
                model: model.name().to_string(),
                message: e.to_string(),
            })?;
        self.phase = Phase::AwaitModel(Box::new(AwaitingModel {
            model_name: model.name().to_string(),
            stream,
            pending_calls: Vec::new(),
        }));
        Ok(())
    }

    fn handle_fragment(
        &self,
        fragment: ResponseFragment,
        awaiting: &mut AwaitingModel,
    ) -> FragmentOutcome {
        if let Some(code) = fragment.error_code {
            let message = fragment.error_message.unwrap_or_default();
            let event = self
                .event()
                .maybe_content(fragment.content)
                .error(code, message)
                .turn_complete(true)
                .build();
            return FragmentOutcome::EmitAndStop(event);
        }

        if fragment.partial {
            return match fragment.content {
                Some(content) if !content.is_empty() => FragmentOutcome::Emit(
                    self.event().content(content).partial(true).build(),
                ),
                _ => FragmentOutcome::Skip,
            };
        }

        let Some(mut content) = fragment.content.filter(|c| !c.is_empty()) else {
            return FragmentOutcome::Skip;
        };
        if let Some(planner) = self.agent.planner() {
            content.parts = planner.post_response(mem::take(&mut content.parts));
        }
        for part in &mut content.parts {
            if let Part::FunctionCall(call) = part
                && call.id.is_empty()
            {
                call.id = generate_call_id();
            }
        }

        let calls: Vec<FunctionCall> = content.function_calls_iter().cloned().collect();
        let max = self.ctx.run_config().max_tool_iterations;
        if !calls.is_empty() && self.tool_rounds >= max {
            return FragmentOutcome::Fail(Error::FlowExhausted {
                limit: "max_tool_iterations",
                max,
            });
        }

        let long_running: Vec<String> = calls
            .iter()
            .filter(|call| {
                self.agent
                    .tools()
                    .get(&call.name)
                    .is_some_and(|tool| tool.is_long_running())
            })
            .map(|call| call.id.clone())
            .collect();

        let mut actions = EventActions::default();
        if calls.is_empty()
            && let Some(key) = self.agent.output_key()
        {
            actions = actions.with_state(key, serde_json::Value::String(content.text()));
        }

        awaiting.pending_calls.extend(calls);
        FragmentOutcome::Emit(
            self.event()
                .content(content)
                .turn_complete(fragment.turn_complete)
                .long_running_tool_ids(long_running)
                .actions(actions)
                .build(),
        )
    }

    async fn do_dispatch(&mut self, calls: &[FunctionCall]) -> Result<Event> {
        let dispatch = functions::dispatch(&self.agent, &self.ctx, calls, &self.targets).await?;
        let actions = dispatch.event.actions();

        if let Some(target) = &actions.transfer_to_agent {
            self.phase = Phase::StartTransfer(target.clone());
        } else if dispatch.long_running {
            debug!(agent = %self.agent.name(), "Pausing turn for long-running tool");
        } else if actions.skip_summarization || actions.escalate {
            debug!(
                agent = %self.agent.name(),
                escalate = actions.escalate,
                "Tool ended the turn"
            );
        } else {
            self.tool_rounds += 1;
            self.phase = Phase::BuildRequest;
        }
        Ok(dispatch.event)
    }
}

#[cfg(test)]
mod tests;
