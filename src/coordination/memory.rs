//! In-Process Coordinator
//!
//! Hands out sessions directly on a shared [`Namespace`]. Several nodes in
//! one process can race on the same namespace, and faults (expired sessions,
//! failed or slow connects) can be injected on demand.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::coordination::{Acl, Coordinator, Namespace, Session, SessionId, SessionStatus};
use crate::error::{Error, Result};

#[derive(Default)]
struct Faults {
    /// Connect calls that will fail outright
    failing_connects: u32,
    /// Connect calls that will return a session that never became live
    unestablished_connects: u32,
}

/// Coordinator backed by an in-process namespace
pub struct MemoryCoordinator {
    namespace: Arc<Namespace>,
    session_timeout: Duration,
    faults: Mutex<Faults>,
    issued: Mutex<Vec<SessionId>>,
    connect_calls: AtomicU32,
}

impl MemoryCoordinator {
    /// Create a coordinator over `namespace`
    pub fn new(namespace: Arc<Namespace>) -> Self {
        Self {
            namespace,
            session_timeout: Duration::from_secs(3600),
            faults: Mutex::new(Faults::default()),
            issued: Mutex::new(Vec::new()),
            connect_calls: AtomicU32::new(0),
        }
    }

    /// The namespace sessions are opened on
    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.namespace
    }

    /// Make the next `n` connect calls fail with a connect error
    pub fn fail_next_connects(&self, n: u32) {
        self.faults.lock().unwrap_or_else(|e| e.into_inner()).failing_connects = n;
    }

    /// Make the next `n` connect calls return a session that is not live
    pub fn unestablished_next_connects(&self, n: u32) {
        self.faults.lock().unwrap_or_else(|e| e.into_inner()).unestablished_connects = n;
    }

    /// Number of connect calls made so far
    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Expire every session this coordinator has handed out
    pub fn expire_all(&self) {
        let issued = std::mem::take(&mut *self.issued.lock().unwrap_or_else(|e| e.into_inner()));
        for id in issued {
            self.namespace.close_session(id);
        }
    }
}

#[async_trait::async_trait]
impl Coordinator for MemoryCoordinator {
    async fn connect(&self, endpoints: &[String], _timeout: Duration) -> Result<Box<dyn Session>> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        {
            let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
            if faults.failing_connects > 0 {
                faults.failing_connects -= 1;
                return Err(Error::Connect {
                    endpoints: endpoints.join(","),
                    reason: "injected connect failure".into(),
                });
            }
            if faults.unestablished_connects > 0 {
                faults.unestablished_connects -= 1;
                return Ok(Box::new(MemorySession {
                    id: None,
                    namespace: Arc::clone(&self.namespace),
                    closed: false,
                }));
            }
        }

        let id = self.namespace.open_session(self.session_timeout);
        self.issued.lock().unwrap_or_else(|e| e.into_inner()).push(id);

        Ok(Box::new(MemorySession {
            id: Some(id),
            namespace: Arc::clone(&self.namespace),
            closed: false,
        }))
    }
}

/// Session on an in-process namespace
pub struct MemorySession {
    id: Option<SessionId>,
    namespace: Arc<Namespace>,
    closed: bool,
}

impl MemorySession {
    fn live_id(&self) -> Result<SessionId> {
        match self.id {
            Some(id) if !self.closed => Ok(id),
            _ => Err(Error::SessionExpired),
        }
    }
}

#[async_trait::async_trait]
impl Session for MemorySession {
    fn id(&self) -> String {
        match self.id {
            Some(id) => id.to_string(),
            None => "unestablished".to_string(),
        }
    }

    fn status(&self) -> SessionStatus {
        match self.live_id() {
            Ok(id) if self.namespace.is_alive(id) => SessionStatus::Live,
            _ => SessionStatus::NotLive,
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.namespace.exists(self.live_id()?, path)
    }

    async fn create_ephemeral(&self, path: &str, payload: &[u8], _acl: Acl) -> Result<()> {
        self.namespace.create_ephemeral(self.live_id()?, path, payload)
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(id) = self.id {
            self.namespace.close_session(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> Vec<String> {
        vec!["memory".to_string()]
    }

    #[tokio::test]
    async fn test_connect_and_create() {
        let coordinator = MemoryCoordinator::new(Arc::new(Namespace::new()));
        let session = coordinator.connect(&endpoints(), Duration::from_secs(1)).await.unwrap();

        assert_eq!(session.status(), SessionStatus::Live);
        assert!(!session.exists("/leader").await.unwrap());
        session.create_ephemeral("/leader", b"me", Acl::Open).await.unwrap();
        assert!(session.exists("/leader").await.unwrap());
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let coordinator = MemoryCoordinator::new(Arc::new(Namespace::new()));
        coordinator.fail_next_connects(1);
        coordinator.unestablished_next_connects(1);

        assert!(coordinator.connect(&endpoints(), Duration::from_secs(1)).await.is_err());
        let session = coordinator.connect(&endpoints(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(session.status(), SessionStatus::NotLive);
        assert!(session.exists("/leader").await.is_err());

        let session = coordinator.connect(&endpoints(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(session.status(), SessionStatus::Live);
        assert_eq!(coordinator.connect_calls(), 3);
    }

    #[tokio::test]
    async fn test_expire_and_close() {
        let coordinator = MemoryCoordinator::new(Arc::new(Namespace::new()));
        let mut session = coordinator.connect(&endpoints(), Duration::from_secs(1)).await.unwrap();
        session.create_ephemeral("/leader", b"me", Acl::Open).await.unwrap();

        coordinator.expire_all();
        assert_eq!(session.status(), SessionStatus::NotLive);
        assert!(coordinator.namespace().get("/leader").is_none());

        session.close().await;
        session.close().await;
        assert_eq!(session.status(), SessionStatus::NotLive);
    }
}
