//! Attempter state: race for the election marker

use super::{Context, FailoverState, LeaderState, State, StoppingState};
use crate::coordination::{Acl, Session, SessionStatus};
use crate::error::Error;

/// Waits one poll interval, then tries to become leader
pub struct AttempterState {
    session: Box<dyn Session>,
}

impl AttempterState {
    /// Create an attempter owning `session`
    pub fn new(session: Box<dyn Session>) -> Self {
        Self { session }
    }

    pub(crate) fn into_session(self) -> Box<dyn Session> {
        self.session
    }

    /// One poll tick. Never fails: a lost race or a failed request just
    /// means trying again on the next tick.
    pub async fn transition(self, ctx: &Context) -> State {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                return State::Stopping(StoppingState::new(Some(self.session)));
            }
            _ = tokio::time::sleep(ctx.config.attempter_interval()) => {}
        }

        self.attempt(ctx).await
    }

    async fn attempt(self, ctx: &Context) -> State {
        if ctx.cancel.is_cancelled() {
            return State::Stopping(StoppingState::new(Some(self.session)));
        }

        if self.session.status() != SessionStatus::Live {
            tracing::warn!(session = %self.session.id(), "Session no longer live, entering failover");
            return State::Failover(FailoverState::new(Some(self.session)));
        }

        let path = &ctx.config.election.path;
        match self.session.exists(path).await {
            Ok(true) => {
                tracing::info!(path = %path, "Election marker exists, another node is the leader");
                return State::Attempter(self);
            }
            Ok(false) => {}
            Err(e) => return self.after_error("check election marker", e),
        }

        let payload = ctx.config.election.payload.as_bytes();
        match self.session.create_ephemeral(path, payload, Acl::Open).await {
            Ok(()) => {
                tracing::info!(session = %self.session.id(), path = %path, "Created election marker, becoming LEADER");
                State::Leader(LeaderState::new(self.session))
            }
            Err(Error::NodeExists(_)) => {
                tracing::info!(path = %path, "Another node created the election marker first");
                State::Attempter(self)
            }
            Err(e) => self.after_error("create election marker", e),
        }
    }

    /// Retry on the next tick unless the error says the session is unusable
    fn after_error(self, action: &str, e: Error) -> State {
        if e.is_retryable() {
            tracing::warn!("Failed to {}, retrying next tick: {}", action, e);
            State::Attempter(self)
        } else {
            tracing::warn!(session = %self.session.id(), "Failed to {}, entering failover: {}", action, e);
            State::Failover(FailoverState::new(Some(self.session)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::testing::Node;
    use crate::coordination::{Acl, Namespace};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_absent_marker_is_created() {
        let namespace = Arc::new(Namespace::new());
        let node = Node::new(Arc::clone(&namespace));
        let state = AttempterState::new(node.session().await);

        let next = state.transition(&node.ctx).await;

        assert_eq!(next.name(), "Leader");
        assert!(namespace.get("/leader-election").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_marker_keeps_attempting() {
        let namespace = Arc::new(Namespace::new());
        let holder = Node::new(Arc::clone(&namespace));
        let holder_session = holder.session().await;
        holder_session
            .create_ephemeral("/leader-election", b"other", Acl::Open)
            .await
            .unwrap();

        let node = Node::new(Arc::clone(&namespace));
        let next = AttempterState::new(node.session().await).transition(&node.ctx).await;

        assert_eq!(next.name(), "Attempter");
        assert_eq!(namespace.get("/leader-election").unwrap().data, b"other");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session_goes_to_failover() {
        let namespace = Arc::new(Namespace::new());
        let node = Node::new(Arc::clone(&namespace));
        let state = AttempterState::new(node.session().await);

        node.coordinator.expire_all();
        let next = state.attempt(&node.ctx).await;

        assert_eq!(next.name(), "Failover");
        assert!(namespace.get("/leader-election").is_none());
    }

    /// Reports the marker absent so the create races a peer that already won
    struct StaleExists(Box<dyn Session>);

    #[async_trait::async_trait]
    impl Session for StaleExists {
        fn id(&self) -> String {
            self.0.id()
        }

        fn status(&self) -> SessionStatus {
            self.0.status()
        }

        async fn exists(&self, _path: &str) -> crate::Result<bool> {
            Ok(false)
        }

        async fn create_ephemeral(&self, path: &str, payload: &[u8], acl: Acl) -> crate::Result<()> {
            self.0.create_ephemeral(path, payload, acl).await
        }

        async fn close(&mut self) {
            self.0.close().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_race_stays_attempter() {
        let namespace = Arc::new(Namespace::new());
        let peer = Node::new(Arc::clone(&namespace));
        let peer_session = peer.session().await;
        peer_session
            .create_ephemeral("/leader-election", b"peer", Acl::Open)
            .await
            .unwrap();

        let node = Node::new(Arc::clone(&namespace));
        let session = Box::new(StaleExists(node.session().await));
        let next = AttempterState::new(session).attempt(&node.ctx).await;

        assert_eq!(next.name(), "Attempter");
        assert_eq!(namespace.get("/leader-election").unwrap().data, b"peer");
    }

    /// Looks live but fails every request with a fixed error
    struct Failing {
        inner: Box<dyn Session>,
        error: fn() -> Error,
    }

    #[async_trait::async_trait]
    impl Session for Failing {
        fn id(&self) -> String {
            self.inner.id()
        }

        fn status(&self) -> SessionStatus {
            SessionStatus::Live
        }

        async fn exists(&self, _path: &str) -> crate::Result<bool> {
            Err((self.error)())
        }

        async fn create_ephemeral(&self, _path: &str, _payload: &[u8], _acl: Acl) -> crate::Result<()> {
            Err((self.error)())
        }

        async fn close(&mut self) {
            self.inner.close().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_keeps_attempting() {
        let node = Node::new(Arc::new(Namespace::new()));
        let session = Box::new(Failing {
            inner: node.session().await,
            error: || Error::Coordination("broken pipe".into()),
        });

        let next = AttempterState::new(session).attempt(&node.ctx).await;
        assert_eq!(next.name(), "Attempter");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_reply_goes_to_failover() {
        let node = Node::new(Arc::new(Namespace::new()));
        let session = Box::new(Failing {
            inner: node.session().await,
            error: || Error::SessionExpired,
        });

        let next = AttempterState::new(session).attempt(&node.ctx).await;
        assert_eq!(next.name(), "Failover");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_goes_to_stopping() {
        let node = Node::new(Arc::new(Namespace::new()));
        let state = AttempterState::new(node.session().await);
        node.ctx.cancel.cancel();

        let next = state.transition(&node.ctx).await;
        assert_eq!(next.name(), "Stopping");
    }
}
