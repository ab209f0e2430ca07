//! Coordination Module
//!
//! The election only needs a handful of primitives from the coordination
//! service: session liveness, an existence check, atomic creation of an
//! ephemeral node, and close. They are expressed as traits so the automaton
//! runs the same against the bundled TCP service and the in-process one.

pub mod namespace;
pub mod protocol;
mod memory;
mod client;
mod server;

pub use namespace::{Namespace, SessionId};
pub use memory::{MemoryCoordinator, MemorySession};
pub use client::{TcpCoordinator, TcpSession};
pub use server::CoordinationServer;

use std::time::Duration;

use crate::error::Result;

/// Liveness of a coordination session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// The service holds the session; its ephemeral nodes exist
    Live,
    /// Not established yet, or lost
    NotLive,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Live => write!(f, "LIVE"),
            SessionStatus::NotLive => write!(f, "NOT_LIVE"),
        }
    }
}

/// Access control applied to a created node.
///
/// The bundled service keeps every node world-accessible, so `Open` is the
/// only control a session can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acl {
    /// Anyone may read, write or delete the node
    Open,
}

/// Client side of the coordination service
#[async_trait::async_trait]
pub trait Coordinator: Send + Sync {
    /// Establish a session against one of `endpoints`.
    ///
    /// An `Err` means the request itself was unusable. A service that could
    /// not be reached in time yields a session whose status is `NotLive`.
    async fn connect(&self, endpoints: &[String], timeout: Duration) -> Result<Box<dyn Session>>;
}

/// An exclusively owned session with the coordination service
#[async_trait::async_trait]
pub trait Session: Send + Sync {
    /// Identity of this session, stable for its lifetime
    fn id(&self) -> String;

    /// Current liveness
    fn status(&self) -> SessionStatus;

    /// Check whether a node exists at `path`
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Atomically create an ephemeral node owned by this session.
    ///
    /// Fails with `Error::NodeExists` when any node is already at `path`.
    async fn create_ephemeral(&self, path: &str, payload: &[u8], acl: Acl) -> Result<()>;

    /// Release the session and its ephemeral nodes. Safe to call repeatedly.
    async fn close(&mut self);
}
