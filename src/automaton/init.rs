//! Init state: establish the first coordination session

use super::{AttempterState, Context, FailoverState, State};
use crate::coordination::SessionStatus;
use crate::error::Result;

/// One-shot initial state
pub struct InitState;

impl InitState {
    /// Connect once. A failed connect call is fatal; a session that is not
    /// live yet is left for Failover to recover.
    pub async fn transition(self, ctx: &Context) -> Result<State> {
        let endpoints = &ctx.config.coordination.endpoints;
        tracing::info!("Initializing coordination session with {}", endpoints.join(", "));

        let session = ctx
            .coordinator
            .connect(endpoints, ctx.config.connect_timeout())
            .await
            .inspect_err(|e| tracing::error!("Connect failed: {}", e))?;

        if session.status() != SessionStatus::Live {
            tracing::warn!(session = %session.id(), "Session not live after connect, entering failover");
            return Ok(State::Failover(FailoverState::new(Some(session))));
        }

        tracing::info!(session = %session.id(), "Coordination session live");
        Ok(State::Attempter(AttempterState::new(session)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::testing::Node;
    use crate::coordination::Namespace;
    use crate::error::Error;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_live_session_goes_to_attempter() {
        let node = Node::new(Arc::new(Namespace::new()));
        let next = InitState.transition(&node.ctx).await.unwrap();
        assert_eq!(next.name(), "Attempter");
    }

    #[tokio::test]
    async fn test_unestablished_session_goes_to_failover() {
        let node = Node::new(Arc::new(Namespace::new()));
        node.coordinator.unestablished_next_connects(1);

        let next = InitState.transition(&node.ctx).await.unwrap();
        assert_eq!(next.name(), "Failover");
    }

    #[tokio::test]
    async fn test_connect_error_is_fatal() {
        let node = Node::new(Arc::new(Namespace::new()));
        node.coordinator.fail_next_connects(1);

        let err = InitState.transition(&node.ctx).await.err().unwrap();
        assert!(matches!(err, Error::Connect { .. }));
        assert_eq!(node.coordinator.connect_calls(), 1);
    }
}
