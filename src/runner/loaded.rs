use std::sync::Arc;

use futures::stream::BoxStream;

use super::Runner;
use crate::Result;
use crate::agent::Agent;
use crate::event::Event;
use crate::session::{SessionId, SessionStore};
use crate::types::Content;

/// A runner bound to one user and their active session.
///
/// Obtained from [`Runner::load`]. The agent tree is shared with the runner,
/// so switching sessions never rebuilds agents.
#[derive(Debug, Clone)]
pub struct LoadedExecutionContext {
    runner: Runner,
    user_id: String,
    session_id: SessionId,
}

impl LoadedExecutionContext {
    pub(crate) fn new(runner: Runner, user_id: String, session_id: SessionId) -> Self {
        Self {
            runner,
            user_id,
            session_id,
        }
    }

    pub fn app_name(&self) -> &str {
        self.runner.app_name()
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        self.runner.root_agent()
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        self.runner.store()
    }

    pub(crate) fn set_session_id(&mut self, session_id: SessionId) {
        self.session_id = session_id;
    }

    /// Point this context at another existing session.
    pub async fn switch_session(&mut self, session_id: SessionId) -> Result<()> {
        let store = Arc::clone(self.runner.store());
        store.switch_active_session(self, session_id).await?;
        Ok(())
    }

    /// Send a message into the active session.
    pub fn run(&self, message: Content) -> BoxStream<'static, Event> {
        self.runner.run(&self.user_id, &self.session_id, message)
    }
}
