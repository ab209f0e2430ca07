//! Coordination Namespace
//!
//! The authoritative store behind the bundled coordination service: a flat
//! namespace of absolute paths plus the sessions that own ephemeral nodes.
//! Every mutation happens under one lock, which is what makes `create`
//! atomic across racing sessions.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Identifier of a coordination session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A node in the namespace
#[derive(Debug, Clone)]
pub struct Node {
    /// Stored payload
    pub data: Vec<u8>,
    /// Session whose end deletes this node
    pub owner: SessionId,
}

struct SessionEntry {
    timeout: Duration,
    last_heard: Instant,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, SessionEntry>,
    nodes: BTreeMap<String, Node>,
}

impl Inner {
    fn end_session(&mut self, id: SessionId) -> usize {
        if self.sessions.remove(&id).is_none() {
            return 0;
        }
        let before = self.nodes.len();
        self.nodes.retain(|_, node| node.owner != id);
        before - self.nodes.len()
    }

    fn require_session(&mut self, id: SessionId) -> Result<()> {
        match self.sessions.get_mut(&id) {
            Some(entry) => {
                entry.last_heard = Instant::now();
                Ok(())
            }
            None => Err(Error::SessionExpired),
        }
    }
}

/// Session-aware node namespace
#[derive(Default)]
pub struct Namespace {
    inner: Mutex<Inner>,
}

impl Namespace {
    /// Create an empty namespace
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every critical section leaves Inner consistent, so a poisoned lock is still usable
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Open a new session that expires after `timeout` of silence
    pub fn open_session(&self, timeout: Duration) -> SessionId {
        let mut inner = self.lock();
        let id = loop {
            let candidate = SessionId(rand::random());
            if !inner.sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        inner.sessions.insert(id, SessionEntry {
            timeout,
            last_heard: Instant::now(),
        });
        tracing::debug!(session = %id, "Session opened");
        id
    }

    /// Record that the session is still alive
    pub fn touch(&self, id: SessionId) -> Result<()> {
        self.lock().require_session(id)
    }

    /// Check whether the namespace still holds the session
    pub fn is_alive(&self, id: SessionId) -> bool {
        self.lock().sessions.contains_key(&id)
    }

    /// Check whether a node exists at `path`
    pub fn exists(&self, id: SessionId, path: &str) -> Result<bool> {
        validate_path(path)?;
        let mut inner = self.lock();
        inner.require_session(id)?;
        Ok(inner.nodes.contains_key(path))
    }

    /// Create an ephemeral node owned by `id`; fails if `path` is taken
    pub fn create_ephemeral(&self, id: SessionId, path: &str, data: &[u8]) -> Result<()> {
        validate_path(path)?;
        let mut inner = self.lock();
        inner.require_session(id)?;

        if inner.nodes.contains_key(path) {
            return Err(Error::NodeExists(path.to_string()));
        }

        inner.nodes.insert(path.to_string(), Node {
            data: data.to_vec(),
            owner: id,
        });
        tracing::debug!(session = %id, path, "Ephemeral node created");
        Ok(())
    }

    /// End a session, deleting its ephemeral nodes. Unknown ids are ignored.
    pub fn close_session(&self, id: SessionId) {
        let removed = self.lock().end_session(id);
        tracing::debug!(session = %id, removed, "Session closed");
    }

    /// Expire every session silent for longer than its timeout
    pub fn expire_silent(&self) -> Vec<SessionId> {
        let mut inner = self.lock();
        let expired: Vec<SessionId> = inner
            .sessions
            .iter()
            .filter(|(_, entry)| entry.last_heard.elapsed() > entry.timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            let removed = inner.end_session(*id);
            tracing::info!(session = %id, removed, "Session expired");
        }
        expired
    }

    /// Snapshot the node at `path`
    pub fn get(&self, path: &str) -> Option<Node> {
        self.lock().nodes.get(path).cloned()
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }
}

fn validate_path(path: &str) -> Result<()> {
    if !path.starts_with('/') || path.len() < 2 || path.ends_with('/') {
        return Err(Error::Coordination(format!("invalid node path {:?}", path)));
    }
    Ok(())
}
