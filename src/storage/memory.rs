//! In-memory artifact store

use std::path::PathBuf;

use tokio::sync::RwLock;

use super::ArtifactStore;
use crate::error::{Error, Result};

/// Insertion-ordered in-memory store
#[derive(Default)]
pub struct MemoryStore {
    artifacts: RwLock<Vec<(String, Vec<u8>)>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding empty artifacts with the given names, in order
    pub fn with_artifacts<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let artifacts = names.into_iter().map(|name| (name.into(), Vec::new())).collect();
        Self {
            artifacts: RwLock::new(artifacts),
        }
    }

    /// Contents of the artifact `name`
    pub async fn read(&self, name: &str) -> Option<Vec<u8>> {
        self.artifacts
            .read()
            .await
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, bytes)| bytes.clone())
    }
}

#[async_trait::async_trait]
impl ArtifactStore for MemoryStore {
    async fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let mut artifacts = self.artifacts.write().await;
        match artifacts.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = bytes.to_vec(),
            None => artifacts.push((name.to_string(), bytes.to_vec())),
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.artifacts.read().await.iter().map(|(n, _)| n.clone()).collect())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let mut artifacts = self.artifacts.write().await;
        match artifacts.iter().position(|(n, _)| n == name) {
            Some(index) => {
                artifacts.remove(index);
                Ok(())
            }
            None => Err(Error::ArtifactIo {
                path: PathBuf::from(name),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }),
        }
    }
}
