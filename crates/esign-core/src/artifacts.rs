use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Durable storage for rendered documents and captured signature images.
///
/// Keys are relative, `/`-separated paths derived from contract and session ids.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Writes the artifact atomically: readers see either nothing or the full bytes.
    async fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()>;

    async fn get(&self, key: &str) -> io::Result<Vec<u8>>;

    async fn exists(&self, key: &str) -> io::Result<bool>;

    async fn remove(&self, key: &str) -> io::Result<()>;
}

/// Filesystem artifact store rooted at a documents directory.
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    root: PathBuf,
}

impl FileArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> io::Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("artifact key '{key}' escapes the documents root"),
            ));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.resolve(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "artifact has no parent"))?;
        tokio::fs::create_dir_all(parent).await?;

        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("artifact");
        let tmp_path = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        let written = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp_path, &path).await
        }
        .await;

        if written.is_err() {
            let _ = tokio::fs::remove_file(&tmp_path).await;
        }
        written
    }

    async fn get(&self, key: &str) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.resolve(key)?).await
    }

    async fn exists(&self, key: &str) -> io::Result<bool> {
        tokio::fs::try_exists(self.resolve(key)?).await
    }

    async fn remove(&self, key: &str) -> io::Result<()> {
        match tokio::fs::remove_file(self.resolve(key)?).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// BLAKE3 content digest, lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}
