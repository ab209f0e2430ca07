//! Liveness Artifact Storage
//!
//! The leader proves it is alive by writing an artifact on every heartbeat
//! and pruning the oldest ones so at most `capacity` remain.

mod dir;
mod memory;

pub use dir::DirStore;
pub use memory::MemoryStore;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A directory-like store of named artifacts
#[async_trait::async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Write (or replace) the artifact `name`
    async fn write(&self, name: &str, bytes: &[u8]) -> Result<()>;

    /// Artifact names in the store's listing order
    async fn list(&self) -> Result<Vec<String>>;

    /// Delete the artifact `name`
    async fn remove(&self, name: &str) -> Result<()>;
}

/// Body of a liveness artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessRecord {
    /// Session that held leadership when the artifact was written
    pub session: String,
    /// Election marker path
    pub path: String,
    /// When the artifact was written
    pub written_at: chrono::DateTime<chrono::Utc>,
}

impl LivenessRecord {
    /// Artifact name: zero-padded unix millis then the session identity.
    ///
    /// Names from one writer sort in creation order.
    pub fn artifact_name(&self) -> String {
        format!("{:013}-{}", self.written_at.timestamp_millis(), self.session)
    }
}

/// Delete artifacts beyond `capacity`, oldest first in listing order.
///
/// `keep` is never deleted, so the artifact written this tick survives
/// whatever order the store lists in. Returns the deleted names.
pub async fn prune(store: &dyn ArtifactStore, capacity: usize, keep: &str) -> Result<Vec<String>> {
    let names = store.list().await?;
    if names.len() <= capacity {
        return Ok(Vec::new());
    }

    let surplus = names.len() - capacity;
    let doomed: Vec<String> = names
        .into_iter()
        .filter(|name| name != keep)
        .take(surplus)
        .collect();

    for name in &doomed {
        store.remove(name).await?;
    }
    Ok(doomed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_artifact_name() {
        let record = LivenessRecord {
            session: "00000000000000ab".into(),
            path: "/leader-election".into(),
            written_at: chrono::Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
        };
        assert_eq!(record.artifact_name(), "1700000000123-00000000000000ab");
    }

    #[tokio::test]
    async fn test_prune_to_capacity() {
        let store = MemoryStore::with_artifacts(["f1", "f2", "f3", "f4"]);

        let deleted = prune(&store, 2, "f4").await.unwrap();

        assert_eq!(deleted, vec!["f1", "f2"]);
        assert_eq!(store.list().await.unwrap(), vec!["f3", "f4"]);
    }

    #[tokio::test]
    async fn test_prune_spares_newest_in_any_order() {
        // Newest artifact listed first
        let store = MemoryStore::with_artifacts(["f4", "f1", "f2", "f3"]);

        prune(&store, 2, "f4").await.unwrap();

        let remaining = store.list().await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.contains(&"f4".to_string()));
    }

    #[tokio::test]
    async fn test_prune_under_capacity_is_noop() {
        let store = MemoryStore::with_artifacts(["f1"]);
        assert!(prune(&store, 2, "f1").await.unwrap().is_empty());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
