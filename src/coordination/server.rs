//! Coordination Server
//!
//! TCP front end for a [`Namespace`]. Each connection carries at most one
//! session; the session ends with the connection, on `CloseSession`, or when
//! the reaper finds it silent for longer than its timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use super::protocol::{read_message, write_message, ErrorCode, Message};
use super::{Namespace, SessionId};
use crate::error::{Error, Result};

/// How often silent sessions are swept
const REAP_INTERVAL: Duration = Duration::from_millis(500);

/// Bounds applied to the session timeout a client asks for
const MIN_SESSION_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_SESSION_TIMEOUT: Duration = Duration::from_secs(60);

/// Coordination service over TCP
pub struct CoordinationServer {
    namespace: Arc<Namespace>,
}

impl CoordinationServer {
    /// Create a server for `namespace`
    pub fn new(namespace: Arc<Namespace>) -> Self {
        Self { namespace }
    }

    /// Serve connections from `listener` until `cancel` fires
    pub async fn run(&self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        tracing::info!("Coordination server listening on {}", listener.local_addr()?);

        let reaper_ns = Arc::clone(&self.namespace);
        let reaper_cancel = cancel.clone();
        let reaper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REAP_INTERVAL);
            loop {
                tokio::select! {
                    _ = reaper_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        reaper_ns.expire_silent();
                    }
                }
            }
        });

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let peer_addr = addr.to_string();
                            let namespace = Arc::clone(&self.namespace);
                            let conn_cancel = cancel.child_token();

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(socket, &peer_addr, namespace, conn_cancel).await {
                                    tracing::warn!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }

        reaper.abort();
        tracing::info!("Coordination server stopped");
        Ok(())
    }
}

/// Serve one connection, ending its session when the connection goes away
async fn handle_connection(
    socket: TcpStream,
    peer_addr: &str,
    namespace: Arc<Namespace>,
    cancel: CancellationToken,
) -> Result<()> {
    socket.set_nodelay(true)?;
    let (mut reader, mut writer) = socket.into_split();
    let mut session: Option<SessionId> = None;

    let result = loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            message = read_message(&mut reader) => message,
        };

        let message = match message {
            Ok(message) => message,
            Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break Ok(()),
            Err(e) => break Err(e),
        };
        tracing::trace!("Received {} from {}", message.type_name(), peer_addr);

        let (response, done) = respond(&namespace, &mut session, message);
        if let Err(e) = write_message(&mut writer, &response).await {
            break Err(e);
        }
        if done {
            break Ok(());
        }
    };

    if let Some(id) = session {
        namespace.close_session(id);
    }
    result
}

/// Apply one request; the flag is set when the connection should close
fn respond(namespace: &Namespace, session: &mut Option<SessionId>, message: Message) -> (Message, bool) {
    if let Message::OpenSession { timeout_ms } = message {
        if session.is_some() {
            return (invalid("session already open on this connection"), false);
        }
        let timeout = Duration::from_millis(timeout_ms).clamp(MIN_SESSION_TIMEOUT, MAX_SESSION_TIMEOUT);
        let id = namespace.open_session(timeout);
        *session = Some(id);
        return (
            Message::SessionOpened {
                session_id: id.0,
                timeout_ms: timeout.as_millis() as u64,
            },
            false,
        );
    }

    let Some(id) = *session else {
        return (
            Message::Error {
                code: ErrorCode::NoSession,
                message: "no session open on this connection".into(),
            },
            false,
        );
    };

    let result = match message {
        Message::Ping => namespace.touch(id).map(|_| Message::Pong),
        Message::Exists { path } => namespace
            .exists(id, &path)
            .map(|exists| Message::ExistsResponse { exists }),
        Message::CreateEphemeral { path, data } => namespace
            .create_ephemeral(id, &path, &data)
            .map(|_| Message::Created { path }),
        Message::CloseSession => {
            namespace.close_session(id);
            *session = None;
            return (Message::SessionClosed, true);
        }
        other => return (invalid(&format!("unexpected {}", other.type_name())), false),
    };

    match result {
        Ok(response) => (response, false),
        Err(e) => (Message::from_error(&e), false),
    }
}

fn invalid(reason: &str) -> Message {
    Message::Error {
        code: ErrorCode::InvalidRequest,
        message: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_need_a_session() {
        let ns = Namespace::new();
        let mut session = None;

        let (response, done) = respond(&ns, &mut session, Message::Ping);
        assert!(matches!(response, Message::Error { code: ErrorCode::NoSession, .. }));
        assert!(!done);
    }

    #[test]
    fn test_session_lifecycle() {
        let ns = Namespace::new();
        let mut session = None;

        let (response, _) = respond(&ns, &mut session, Message::OpenSession { timeout_ms: 1 });
        match response {
            Message::SessionOpened { timeout_ms, .. } => assert_eq!(timeout_ms, 100),
            other => panic!("Wrong message type: {}", other.type_name()),
        }

        let create = Message::CreateEphemeral {
            path: "/leader".into(),
            data: vec![],
        };
        let (response, _) = respond(&ns, &mut session, create.clone());
        assert!(matches!(response, Message::Created { .. }));
        let (response, _) = respond(&ns, &mut session, create);
        assert!(matches!(response, Message::Error { code: ErrorCode::NodeExists, .. }));

        let (response, done) = respond(&ns, &mut session, Message::CloseSession);
        assert!(matches!(response, Message::SessionClosed));
        assert!(done);
        assert!(ns.get("/leader").is_none());
        assert_eq!(ns.session_count(), 0);
    }
}
