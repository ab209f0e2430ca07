//! Leader state: hold the election marker and prove liveness

use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::{Context, FailoverState, State, StoppingState};
use crate::coordination::{Session, SessionStatus};
use crate::error::Result;
use crate::storage::{self, LivenessRecord};

/// Outcome of one heartbeat
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Tick {
    /// Artifact written, with the names pruned to stay within capacity
    Written { name: String, pruned: Vec<String> },
    /// The session is gone, and with it the marker
    SessionLost,
}

/// Owns the session whose ephemeral node is the election marker
pub struct LeaderState {
    session: Box<dyn Session>,
}

impl LeaderState {
    /// Create a leader owning `session`
    pub fn new(session: Box<dyn Session>) -> Self {
        Self { session }
    }

    pub(crate) fn into_session(self) -> Box<dyn Session> {
        self.session
    }

    /// Heartbeat until the session is lost or shutdown is requested.
    ///
    /// Artifact I/O errors are fatal.
    pub async fn transition(self, ctx: &Context) -> Result<State> {
        let period = ctx.config.leader_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(session = %self.session.id(), "Leading, heartbeat every {:?}", period);

        loop {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    return Ok(State::Stopping(StoppingState::new(Some(self.session))));
                }
                _ = ticker.tick() => {}
            }

            match self.tick(ctx).await? {
                Tick::SessionLost => {
                    tracing::warn!(session = %self.session.id(), "Leadership lost with session, entering failover");
                    return Ok(State::Failover(FailoverState::new(Some(self.session))));
                }
                Tick::Written { name, pruned } => {
                    tracing::debug!(artifact = %name, pruned = pruned.len(), "Heartbeat written");
                }
            }
        }
    }

    pub(crate) async fn tick(&self, ctx: &Context) -> Result<Tick> {
        if self.session.status() != SessionStatus::Live {
            return Ok(Tick::SessionLost);
        }

        let record = LivenessRecord {
            session: self.session.id(),
            path: ctx.config.election.path.clone(),
            written_at: chrono::Utc::now(),
        };
        let name = record.artifact_name();
        let body = serde_json::to_vec(&record)?;

        ctx.store
            .write(&name, &body)
            .await
            .inspect_err(|e| tracing::error!(artifact = %name, "Failed to write liveness artifact: {}", e))?;

        let pruned = storage::prune(ctx.store.as_ref(), ctx.config.storage.capacity, &name).await?;
        for old in &pruned {
            tracing::debug!(artifact = %old, "Pruned liveness artifact");
        }

        Ok(Tick::Written { name, pruned })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::testing::{fast_config, Node};
    use crate::coordination::{Acl, CoordinationServer, Namespace, TcpCoordinator};
    use crate::error::Error;
    use crate::storage::{ArtifactStore, MemoryStore};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    #[tokio::test(start_paused = true)]
    async fn test_tick_writes_and_prunes() {
        let store = MemoryStore::with_artifacts(["f1", "f2", "f3"]);
        let node = Node::with_store(Arc::new(Namespace::new()), store);
        let leader = LeaderState::new(node.session().await);

        let tick = leader.tick(&node.ctx).await.unwrap();

        let Tick::Written { name, pruned } = tick else {
            panic!("expected a written artifact");
        };
        assert_eq!(pruned, vec!["f1", "f2"]);
        let remaining = node.store.list().await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.contains(&name));

        let body = node.store.read(&name).await.unwrap();
        let record: LivenessRecord = serde_json::from_slice(&body).unwrap();
        assert_eq!(record.session, leader.session.id());
        assert_eq!(record.path, "/leader-election");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session_goes_to_failover() {
        let node = Node::new(Arc::new(Namespace::new()));
        let leader = LeaderState::new(node.session().await);
        node.coordinator.expire_all();

        let next = leader.transition(&node.ctx).await.unwrap();

        assert_eq!(next.name(), "Failover");
        assert!(node.store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tcp_leader_steps_down_when_service_stops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let server_cancel = CancellationToken::new();
        let server = CoordinationServer::new(Arc::new(Namespace::new()));
        let token = server_cancel.clone();
        tokio::spawn(async move { server.run(listener, token).await });

        let mut config = fast_config();
        config.coordination.endpoints = vec![address];
        let ctx = Context::new(
            config,
            Arc::new(TcpCoordinator::new(Duration::from_millis(300), Duration::from_millis(100))),
            Arc::new(MemoryStore::new()),
            CancellationToken::new(),
        );
        let session = ctx
            .coordinator
            .connect(&ctx.config.coordination.endpoints, Duration::from_secs(1))
            .await
            .unwrap();
        session.create_ephemeral("/leader-election", b"", Acl::Open).await.unwrap();

        server_cancel.cancel();
        let next = tokio::time::timeout(Duration::from_secs(2), LeaderState::new(session).transition(&ctx))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(next.name(), "Failover");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_goes_to_stopping() {
        let node = Node::new(Arc::new(Namespace::new()));
        let leader = LeaderState::new(node.session().await);
        node.ctx.cancel.cancel();

        let next = leader.transition(&node.ctx).await.unwrap();
        assert_eq!(next.name(), "Stopping");
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_stay_within_capacity() {
        let node = Node::new(Arc::new(Namespace::new()));
        let leader = LeaderState::new(node.session().await);

        for _ in 0..5 {
            leader.tick(&node.ctx).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(node.store.list().await.unwrap().len() <= node.ctx.config.storage.capacity);
    }

    /// Rejects every write
    struct ReadOnlyStore;

    #[async_trait::async_trait]
    impl ArtifactStore for ReadOnlyStore {
        async fn write(&self, name: &str, _bytes: &[u8]) -> crate::Result<()> {
            Err(Error::ArtifactIo {
                path: PathBuf::from(name),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }

        async fn list(&self) -> crate::Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn remove(&self, _name: &str) -> crate::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_is_fatal() {
        let mut node = Node::new(Arc::new(Namespace::new()));
        node.ctx.store = Arc::new(ReadOnlyStore) as Arc<dyn ArtifactStore>;
        let leader = LeaderState::new(node.session().await);

        let err = leader.transition(&node.ctx).await.err().unwrap();
        assert!(matches!(err, Error::ArtifactIo { .. }));
    }
}
