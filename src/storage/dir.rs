//! Directory-backed artifact store

use std::path::{Path, PathBuf};

use super::ArtifactStore;
use crate::error::{Error, Result};

/// Stores each artifact as a file in one directory
pub struct DirStore {
    dir: PathBuf,
}

impl DirStore {
    /// Create a store rooted at `dir`; the directory is created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn io_error(path: PathBuf) -> impl FnOnce(std::io::Error) -> Error {
        move |source| Error::ArtifactIo { path, source }
    }
}

#[async_trait::async_trait]
impl ArtifactStore for DirStore {
    async fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(Self::io_error(self.dir.clone()))?;

        let path = self.dir.join(name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(Self::io_error(path))
    }

    /// Regular files only, sorted by name (`read_dir` order is unspecified)
    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_error(self.dir.clone())(e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(Self::io_error(self.dir.clone()))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(Self::io_error(entry.path()))?;
            if !file_type.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                // Never one of ours, so it is neither counted nor pruned
                Err(name) => tracing::warn!(dir = ?self.dir, "Ignoring non UTF-8 file name {:?}", name),
            }
        }

        names.sort();
        Ok(names)
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let path = self.dir.join(name);
        tokio::fs::remove_file(&path)
            .await
            .map_err(Self::io_error(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_write_list_remove() {
        let dir = tempdir().unwrap();
        let store = DirStore::new(dir.path().join("artifacts"));

        assert!(store.list().await.unwrap().is_empty());

        store.write("0000000000002-b", b"two").await.unwrap();
        store.write("0000000000001-a", b"one").await.unwrap();
        std::fs::create_dir(store.dir().join("nested")).unwrap();

        assert_eq!(
            store.list().await.unwrap(),
            vec!["0000000000001-a", "0000000000002-b"]
        );

        store.remove("0000000000001-a").await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["0000000000002-b"]);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_non_utf8_names_are_skipped() {
        use std::os::unix::ffi::OsStrExt;

        let dir = tempdir().unwrap();
        let store = DirStore::new(dir.path());
        store.write("0000000000001-a", b"one").await.unwrap();
        std::fs::write(dir.path().join(std::ffi::OsStr::from_bytes(b"bad-\xff")), b"").unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["0000000000001-a"]);
    }

    #[tokio::test]
    async fn test_remove_missing_is_artifact_error() {
        let dir = tempdir().unwrap();
        let store = DirStore::new(dir.path());

        let err = store.remove("missing").await.unwrap_err();
        assert!(matches!(err, Error::ArtifactIo { .. }));
    }
}
