//! Directory-backed blob store for post artifacts (images and the like).
//!
//! Blobs live outside the document store and are coupled to posts only
//! through the `artifact` reference field. Deleting a name that is already
//! gone is success, not failure, so cascade steps can be retried.

use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Invalid artifact name: {0}")]
    InvalidName(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type ArtifactResult<T> = Result<T, ArtifactError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyAbsent,
}

pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> ArtifactResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Blob names are flat: no separators, no parent traversal.
    fn path_for(&self, name: &str) -> ArtifactResult<PathBuf> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(ArtifactError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    /// Store a blob durably under `name`, replacing any previous content.
    pub fn store(&self, name: &str, bytes: &[u8]) -> ArtifactResult<()> {
        let path = self.path_for(name)?;
        // write-then-rename so a crash never leaves a half-written blob
        let tmp = self.root.join(format!(".{}.tmp", name));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn read(&self, name: &str) -> ArtifactResult<Option<Vec<u8>>> {
        let path = self.path_for(name)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).map(|p| p.is_file()).unwrap_or(false)
    }

    pub fn delete(&self, name: &str) -> ArtifactResult<DeleteOutcome> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(DeleteOutcome::AlreadyAbsent),
            Err(e) => Err(e.into()),
        }
    }
}

/// Guess a content type from the blob name's extension for serving.
pub fn content_type_for(name: &str) -> &'static str {
    match name.rsplit('.').next().map(|ext| ext.to_ascii_lowercase()) {
        Some(ext) => match ext.as_str() {
            "jpg" | "jpeg" => "image/jpeg",
            "png" => "image/png",
            "gif" => "image/gif",
            "webp" => "image/webp",
            "svg" => "image/svg+xml",
            "mp4" => "video/mp4",
            _ => "application/octet-stream",
        },
        None => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, ArtifactStore) {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_store_and_read() {
        let (_dir, store) = temp_store();
        store.store("cat.png", &[1, 2, 3]).unwrap();
        assert_eq!(store.read("cat.png").unwrap(), Some(vec![1, 2, 3]));
        assert!(store.exists("cat.png"));
    }

    #[test]
    fn test_read_missing() {
        let (_dir, store) = temp_store();
        assert_eq!(store.read("nothing.png").unwrap(), None);
    }

    #[test]
    fn test_delete_then_delete_again() {
        let (_dir, store) = temp_store();
        store.store("x.png", b"bytes").unwrap();
        assert_eq!(store.delete("x.png").unwrap(), DeleteOutcome::Deleted);
        assert_eq!(store.delete("x.png").unwrap(), DeleteOutcome::AlreadyAbsent);
    }

    #[test]
    fn test_rejects_traversal_names() {
        let (_dir, store) = temp_store();
        assert!(matches!(
            store.store("../escape", b"no"),
            Err(ArtifactError::InvalidName(_))
        ));
        assert!(matches!(
            store.delete("a/b"),
            Err(ArtifactError::InvalidName(_))
        ));
    }

    #[test]
    fn test_content_type_guessing() {
        assert_eq!(content_type_for("photo.JPG"), "image/jpeg");
        assert_eq!(content_type_for("a.png"), "image/png");
        assert_eq!(content_type_for("blob"), "application/octet-stream");
    }
}
