//! Stopping state: release the session

use super::Context;
use crate::coordination::Session;

/// Terminal state
pub struct StoppingState {
    session: Option<Box<dyn Session>>,
}

impl StoppingState {
    /// Create a stopping state that will release `session`, if any
    pub fn new(session: Option<Box<dyn Session>>) -> Self {
        Self { session }
    }

    /// Wait for shutdown, then close the session.
    ///
    /// Closing drops the session's ephemeral nodes, so a leader's marker
    /// becomes free for the other nodes.
    pub async fn transition(mut self, ctx: &Context) {
        ctx.cancel.cancelled().await;

        match self.session.take() {
            Some(mut session) => {
                tracing::info!(session = %session.id(), "Stopping, closing coordination session");
                session.close().await;
            }
            None => tracing::info!("Stopping, no coordination session to close"),
        }
    }
}
