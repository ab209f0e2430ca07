//! WolfElect Error Types

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for WolfElect operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfElect error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Coordination errors
    #[error("Connect to coordination service [{endpoints}] failed: {reason}")]
    Connect { endpoints: String, reason: String },

    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Coordination request failed: {0}")]
    Coordination(String),

    #[error("Coordination session expired")]
    SessionExpired,

    #[error("Failover retry bound exceeded after {attempts} attempts")]
    RetryBoundExceeded { attempts: u32 },

    // Liveness artifact errors
    #[error("Liveness artifact I/O on {path:?}: {source}")]
    ArtifactIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Automaton errors
    #[error("state {state}: {source}")]
    State {
        state: &'static str,
        #[source]
        source: Box<Error>,
    },

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    #[error("Protocol serialization error: {0}")]
    Protocol(#[from] bincode::Error),

    #[error("Artifact serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if a polling state may log this error and try again next tick
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NodeExists(_)
                | Error::Coordination(_)
                | Error::ConnectionFailed { .. }
                | Error::ConnectionTimeout(_)
                | Error::Network(_)
        )
    }

    /// Annotate an error with the name of the state that produced it
    pub fn in_state(self, state: &'static str) -> Self {
        Error::State {
            state,
            source: Box::new(self),
        }
    }

    /// Strip runner annotations, returning the error a state raised
    pub fn root(&self) -> &Error {
        match self {
            Error::State { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_annotation() {
        let err = Error::RetryBoundExceeded { attempts: 5 }.in_state("Failover");
        assert_eq!(
            err.to_string(),
            "state Failover: Failover retry bound exceeded after 5 attempts"
        );
        assert!(matches!(err.root(), Error::RetryBoundExceeded { attempts: 5 }));
    }

    #[test]
    fn test_retryable() {
        assert!(Error::NodeExists("/leader-election".into()).is_retryable());
        assert!(Error::Coordination("broken pipe".into()).is_retryable());
        assert!(!Error::SessionExpired.is_retryable());
        assert!(!Error::RetryBoundExceeded { attempts: 1 }.is_retryable());
    }
}
