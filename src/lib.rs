//! WolfElect - Leader Election Node
//!
//! A node that competes with its peers for leadership through an ephemeral
//! marker on a coordination service, and proves liveness while it leads.
//!
//! # Architecture
//!
//! Each node runs a small state machine (see [`automaton`]):
//!
//! - **Init** establishes the first coordination session
//! - **Attempter** polls the election marker and races to create it
//! - **Leader** writes liveness artifacts on a heartbeat, keeping a bounded
//!   number of them
//! - **Failover** re-establishes a lost session with bounded, backed-off
//!   retries
//! - **Stopping** closes the session, which frees the marker
//!
//! Exactly one session can hold the marker at a time; the coordination
//! service's atomic create decides every race.
//!
//! # Features
//!
//! - Pluggable coordination service, with a bundled TCP service and an
//!   in-process namespace for tests
//! - Prometheus metrics for state, time in state and transitions
//! - Cooperative shutdown from any state

pub mod config;
pub mod error;
pub mod coordination;
pub mod storage;
pub mod metrics;
pub mod automaton;
pub mod api;

pub use config::ElectConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::automaton::{Context, LoopRunner, State};
    pub use crate::config::ElectConfig;
    pub use crate::coordination::{Coordinator, Session, SessionStatus, TcpCoordinator};
    pub use crate::error::{Error, Result};
    pub use crate::metrics::Metrics;
    pub use crate::storage::{ArtifactStore, DirStore};
}
