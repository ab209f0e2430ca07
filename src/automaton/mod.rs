//! Election Automaton
//!
//! A node moves through a closed set of states:
//!
//! ```text
//! Init -> Attempter <-> (Leader | Failover) -> Stopping
//! ```
//!
//! Each state owns exactly what it needs, most importantly the coordination
//! session, and hands it to its successor by value. Only one state exists at
//! a time; the [`LoopRunner`] replaces it with whatever its transition
//! returns until a transition yields no next state.

mod init;
mod attempter;
mod failover;
mod leader;
mod stopping;
mod runner;

pub use init::InitState;
pub use attempter::AttempterState;
pub use failover::{Backoff, FailoverState};
pub use leader::LeaderState;
pub use stopping::StoppingState;
pub use runner::LoopRunner;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::ElectConfig;
use crate::coordination::Coordinator;
use crate::error::Result;
use crate::storage::ArtifactStore;

/// Collaborators shared by every state, built once at startup
pub struct Context {
    /// Node configuration
    pub config: ElectConfig,
    /// Coordination service client
    pub coordinator: Arc<dyn Coordinator>,
    /// Liveness artifact store
    pub store: Arc<dyn ArtifactStore>,
    /// Level-triggered shutdown signal
    pub cancel: CancellationToken,
}

impl Context {
    /// Create a new context
    pub fn new(
        config: ElectConfig,
        coordinator: Arc<dyn Coordinator>,
        store: Arc<dyn ArtifactStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            coordinator,
            store,
            cancel,
        }
    }
}

/// The automaton's current state
pub enum State {
    /// Establish the first session
    Init(InitState),
    /// Poll for the election marker and try to create it
    Attempter(AttempterState),
    /// Recover a lost or never-established session
    Failover(FailoverState),
    /// Hold the marker and write liveness artifacts
    Leader(LeaderState),
    /// Release the session and finish
    Stopping(StoppingState),
}

impl State {
    /// The initial state of every node
    pub fn init() -> Self {
        State::Init(InitState)
    }

    /// State name used in logs and metric labels
    pub fn name(&self) -> &'static str {
        match self {
            State::Init(_) => "Init",
            State::Attempter(_) => "Attempter",
            State::Failover(_) => "Failover",
            State::Leader(_) => "Leader",
            State::Stopping(_) => "Stopping",
        }
    }

    /// Check if this is the terminal state
    pub fn is_stopping(&self) -> bool {
        matches!(self, State::Stopping(_))
    }

    /// Run this state until it yields its successor.
    ///
    /// `Ok(None)` means the automaton has finished.
    pub async fn transition(self, ctx: &Context) -> Result<Option<State>> {
        match self {
            State::Init(state) => state.transition(ctx).await.map(Some),
            State::Attempter(state) => Ok(Some(state.transition(ctx).await)),
            State::Failover(state) => state.transition(ctx).await.map(Some),
            State::Leader(state) => state.transition(ctx).await.map(Some),
            State::Stopping(state) => {
                state.transition(ctx).await;
                Ok(None)
            }
        }
    }

    /// Hand this state's session to a Stopping state without doing any I/O
    pub fn into_stopping(self) -> State {
        let session = match self {
            State::Init(_) => None,
            State::Attempter(state) => Some(state.into_session()),
            State::Failover(state) => state.into_lost_session(),
            State::Leader(state) => Some(state.into_session()),
            State::Stopping(state) => return State::Stopping(state),
        };
        State::Stopping(StoppingState::new(session))
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for automaton tests

    use std::sync::Arc;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::Context;
    use crate::config::ElectConfig;
    use crate::coordination::{Coordinator, MemoryCoordinator, Namespace, Session};
    use crate::storage::MemoryStore;

    /// Config with short intervals and a small failover bound
    pub fn fast_config() -> ElectConfig {
        let mut config = ElectConfig::default();
        config.coordination.endpoints = vec!["memory:2181".to_string()];
        config.election.attempter_interval_ms = 10;
        config.election.leader_interval_ms = 10;
        config.failover.max_attempts = 3;
        config.failover.backoff_base_ms = 10;
        config.failover.backoff_max_ms = 40;
        config.storage.capacity = 2;
        config
    }

    /// One node's view of a shared namespace
    pub struct Node {
        pub ctx: Context,
        pub coordinator: Arc<MemoryCoordinator>,
        pub store: Arc<MemoryStore>,
    }

    impl Node {
        pub fn new(namespace: Arc<Namespace>) -> Self {
            Self::with_store(namespace, MemoryStore::new())
        }

        pub fn with_store(namespace: Arc<Namespace>, store: MemoryStore) -> Self {
            let coordinator = Arc::new(MemoryCoordinator::new(namespace));
            let store = Arc::new(store);
            let ctx = Context::new(
                fast_config(),
                Arc::clone(&coordinator) as Arc<dyn Coordinator>,
                Arc::clone(&store) as Arc<dyn crate::storage::ArtifactStore>,
                CancellationToken::new(),
            );
            Self { ctx, coordinator, store }
        }

        pub async fn session(&self) -> Box<dyn Session> {
            self.coordinator
                .connect(&self.ctx.config.coordination.endpoints, Duration::from_secs(1))
                .await
                .unwrap()
        }
    }
}
