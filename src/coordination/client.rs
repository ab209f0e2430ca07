//! Coordination Client
//!
//! TCP client for the bundled coordination server. A session owns one
//! connection; a background keep-alive pings it so the server does not
//! expire it. Once a request fails the session is lost for good and the
//! election has to build a new one.
//!
//! The client also stops trusting a session it has not heard from for two
//! thirds of the negotiated timeout, well before the server's reaper can
//! expire it and hand its ephemeral nodes to someone else.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

use super::protocol::{read_message, write_message, ErrorCode, Message};
use super::{Acl, Coordinator, Session, SessionId, SessionStatus};
use crate::error::{Error, Result};

/// Coordinator that talks to a coordination server over TCP
pub struct TcpCoordinator {
    /// Session timeout requested from the server
    session_timeout: Duration,
    /// Per-request timeout
    request_timeout: Duration,
}

impl TcpCoordinator {
    /// Create a new coordinator
    pub fn new(session_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            session_timeout,
            request_timeout,
        }
    }

    /// Open a session on the first endpoint that answers
    async fn establish(&self, endpoints: &[String], per_endpoint: Duration) -> Option<(TcpStream, SessionId, Duration, String)> {
        for endpoint in endpoints {
            match timeout(per_endpoint, self.open_session(endpoint)).await {
                Ok(Ok((stream, id, negotiated))) => return Some((stream, id, negotiated, endpoint.clone())),
                Ok(Err(e)) => tracing::debug!("Session with {} not established: {}", endpoint, e),
                Err(_) => tracing::debug!("Session with {} timed out", endpoint),
            }
        }
        None
    }

    async fn open_session(&self, endpoint: &str) -> Result<(TcpStream, SessionId, Duration)> {
        let mut stream = TcpStream::connect(endpoint).await.map_err(|e| Error::ConnectionFailed {
            address: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        stream.set_nodelay(true)?;

        let (mut reader, mut writer) = stream.split();
        let request = Message::OpenSession {
            timeout_ms: self.session_timeout.as_millis() as u64,
        };
        write_message(&mut writer, &request).await?;
        let response = read_message(&mut reader).await?;

        match response {
            Message::SessionOpened { session_id, timeout_ms } => {
                Ok((stream, SessionId(session_id), Duration::from_millis(timeout_ms)))
            }
            other => Err(Error::Coordination(format!(
                "unexpected {} while opening session",
                other.type_name()
            ))),
        }
    }
}

#[async_trait::async_trait]
impl Coordinator for TcpCoordinator {
    async fn connect(&self, endpoints: &[String], connect_timeout: Duration) -> Result<Box<dyn Session>> {
        validate_endpoints(endpoints)?;

        let per_endpoint = (connect_timeout / endpoints.len() as u32).max(Duration::from_millis(1));
        let established = timeout(connect_timeout, self.establish(endpoints, per_endpoint))
            .await
            .ok()
            .flatten();

        let Some((stream, id, negotiated, endpoint)) = established else {
            tracing::warn!("No coordination endpoint granted a session within {:?}", connect_timeout);
            return Ok(Box::new(TcpSession::unestablished(self.request_timeout)));
        };

        tracing::info!(session = %id, endpoint = %endpoint, "Coordination session established");
        Ok(Box::new(TcpSession::established(stream, id, negotiated, self.request_timeout)))
    }
}

/// Reject endpoint lists no connection attempt could use
fn validate_endpoints(endpoints: &[String]) -> Result<()> {
    let fail = |reason: String| Error::Connect {
        endpoints: endpoints.join(","),
        reason,
    };

    if endpoints.is_empty() {
        return Err(fail("no endpoints given".into()));
    }

    for endpoint in endpoints {
        let valid = match endpoint.rsplit_once(':') {
            Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
            None => false,
        };
        if !valid {
            return Err(fail(format!("endpoint {:?} is not host:port", endpoint)));
        }
    }

    Ok(())
}

/// State shared between a session and its keep-alive task
struct Shared {
    live: AtomicBool,
    conn: Mutex<Option<TcpStream>>,
    request_timeout: Duration,
    /// Silence after which the session is treated as lost
    trust_window: Duration,
    last_heard: StdMutex<Instant>,
}

impl Shared {
    fn new(stream: Option<TcpStream>, session_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            live: AtomicBool::new(stream.is_some()),
            conn: Mutex::new(stream),
            request_timeout: request_timeout.min(session_timeout / 3),
            trust_window: session_timeout * 2 / 3,
            last_heard: StdMutex::new(Instant::now()),
        }
    }

    fn mark_lost(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            tracing::warn!("Coordination session lost");
        }
    }

    fn heard(&self) {
        *self.last_heard.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    /// Live, and heard from recently enough that the server cannot have expired it
    fn is_live(&self) -> bool {
        if !self.live.load(Ordering::SeqCst) {
            return false;
        }
        let silent_for = self.last_heard.lock().unwrap_or_else(|e| e.into_inner()).elapsed();
        if silent_for >= self.trust_window {
            tracing::warn!("No reply from coordination service for {:?}", silent_for);
            self.mark_lost();
            return false;
        }
        true
    }

    /// Send one request and wait for its response
    async fn request(&self, message: Message) -> Result<Message> {
        if !self.is_live() {
            return Err(Error::SessionExpired);
        }

        let mut guard = self.conn.lock().await;
        let Some(stream) = guard.as_mut() else {
            return Err(Error::SessionExpired);
        };

        let exchange = async {
            let (mut reader, mut writer) = stream.split();
            write_message(&mut writer, &message).await?;
            read_message(&mut reader).await
        };

        let outcome = timeout(self.request_timeout, exchange).await;
        match outcome {
            Ok(Ok(Message::Error { code: ErrorCode::SessionExpired | ErrorCode::NoSession, .. })) => {
                *guard = None;
                self.mark_lost();
                Err(Error::SessionExpired)
            }
            Ok(Ok(response)) => {
                self.heard();
                Ok(response)
            }
            Ok(Err(e)) => {
                *guard = None;
                self.mark_lost();
                Err(Error::Coordination(e.to_string()))
            }
            Err(_) => {
                *guard = None;
                self.mark_lost();
                Err(Error::ConnectionTimeout(format!("{} request", message.type_name())))
            }
        }
    }
}

/// Session held over a TCP connection
pub struct TcpSession {
    id: Option<SessionId>,
    shared: Arc<Shared>,
    keepalive: Option<JoinHandle<()>>,
    closed: bool,
}

impl TcpSession {
    fn established(stream: TcpStream, id: SessionId, session_timeout: Duration, request_timeout: Duration) -> Self {
        let shared = Arc::new(Shared::new(Some(stream), session_timeout, request_timeout));

        let ping_every = session_timeout / 3;
        let ping_shared = Arc::clone(&shared);
        let keepalive = tokio::spawn(async move {
            loop {
                tokio::time::sleep(ping_every).await;
                match ping_shared.request(Message::Ping).await {
                    Ok(Message::Pong) => {}
                    Ok(other) => tracing::warn!("Unexpected {} in reply to Ping", other.type_name()),
                    Err(e) => {
                        tracing::warn!("Keep-alive failed: {}", e);
                        break;
                    }
                }
            }
        });

        Self {
            id: Some(id),
            shared,
            keepalive: Some(keepalive),
            closed: false,
        }
    }

    fn unestablished(request_timeout: Duration) -> Self {
        Self {
            id: None,
            shared: Arc::new(Shared::new(None, Duration::ZERO, request_timeout)),
            keepalive: None,
            closed: false,
        }
    }
}

#[async_trait::async_trait]
impl Session for TcpSession {
    fn id(&self) -> String {
        match self.id {
            Some(id) => id.to_string(),
            None => "unestablished".to_string(),
        }
    }

    fn status(&self) -> SessionStatus {
        if !self.closed && self.shared.is_live() {
            SessionStatus::Live
        } else {
            SessionStatus::NotLive
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        match self.shared.request(Message::Exists { path: path.to_string() }).await? {
            Message::ExistsResponse { exists } => Ok(exists),
            Message::Error { message, .. } => Err(Error::Coordination(message)),
            other => Err(Error::Coordination(format!("unexpected {}", other.type_name()))),
        }
    }

    async fn create_ephemeral(&self, path: &str, payload: &[u8], _acl: Acl) -> Result<()> {
        let request = Message::CreateEphemeral {
            path: path.to_string(),
            data: payload.to_vec(),
        };
        match self.shared.request(request).await? {
            Message::Created { .. } => Ok(()),
            Message::Error { code: ErrorCode::NodeExists, .. } => Err(Error::NodeExists(path.to_string())),
            Message::Error { message, .. } => Err(Error::Coordination(message)),
            other => Err(Error::Coordination(format!("unexpected {}", other.type_name()))),
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(keepalive) = self.keepalive.take() {
            keepalive.abort();
        }

        if self.shared.live.load(Ordering::SeqCst) {
            if let Err(e) = self.shared.request(Message::CloseSession).await {
                tracing::debug!("CloseSession not acknowledged: {}", e);
            }
        }
        self.shared.live.store(false, Ordering::SeqCst);
        *self.shared.conn.lock().await = None;
    }
}

impl Drop for TcpSession {
    fn drop(&mut self) {
        if let Some(keepalive) = self.keepalive.take() {
            keepalive.abort();
        }
    }
}
