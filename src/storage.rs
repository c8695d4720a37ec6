//! Object storage for uploaded course files.
//!
//! Objects live at `{owner}/{course}/{epoch-millis}.{ext}`. The bucket is private:
//! [`UserBucket`] only lets a caller touch paths whose first segment is their own id.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("An object already exists at {0}")]
    AlreadyExists(String),

    #[error("Path {0} is outside the caller's namespace")]
    Forbidden(String),

    #[error("Invalid storage path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Bucket rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Token error: {0}")]
    Token(#[from] gcp_auth::Error),
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Never overwrites: a path that already holds an object fails with [`StorageError::AlreadyExists`].
    async fn upload(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<(), StorageError>;

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Removing a path that holds no object is not an error.
    async fn remove(&self, paths: &[String]) -> Result<(), StorageError>;
}

fn path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[0-9a-f-]{36}/[0-9a-f-]{36}/[0-9]+(\.[A-Za-z0-9]+)?$").expect("storage path pattern")
    })
}

/// Extension of an uploaded filename, as stored in the object path.
/// Anything that is not plain alphanumeric is dropped rather than carried into the path.
pub fn file_extension(filename: &str) -> Option<String> {
    let base = filename.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(filename);
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_string())
}

pub fn storage_path(owner: Uuid, course_id: Uuid, filename: &str, epoch_millis: i64) -> String {
    match file_extension(filename) {
        Some(ext) => format!("{}/{}/{}.{}", owner, course_id, epoch_millis, ext),
        None => format!("{}/{}/{}", owner, course_id, epoch_millis),
    }
}

/// Checks the shape of `path` and that its first segment is `owner`.
pub fn authorize_path(owner: Uuid, path: &str) -> Result<(), StorageError> {
    if !path_pattern().is_match(path) {
        return Err(StorageError::InvalidPath(path.to_string()));
    }

    let first = path.split('/').next().unwrap_or_default();
    if first != owner.to_string() {
        return Err(StorageError::Forbidden(path.to_string()));
    }

    Ok(())
}

/// A caller's view of the bucket. Every path is authorized before it reaches the backend.
pub struct UserBucket<'a> {
    storage: &'a dyn ObjectStorage,
    owner: Uuid,
}

impl<'a> UserBucket<'a> {
    pub fn new(storage: &'a dyn ObjectStorage, owner: Uuid) -> Self {
        Self { storage, owner }
    }

    pub async fn upload(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        authorize_path(self.owner, path)?;
        self.storage.upload(path, data, content_type).await
    }

    pub async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        authorize_path(self.owner, path)?;
        self.storage.download(path).await
    }

    pub async fn remove(&self, paths: &[String]) -> Result<(), StorageError> {
        for path in paths {
            authorize_path(self.owner, path)?;
        }
        if paths.is_empty() {
            return Ok(());
        }
        self.storage.remove(paths).await
    }
}

/// Keeps objects in process memory.
#[derive(Default)]
pub struct MemoryBucket {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.objects.read().await.contains_key(path)
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }
}

#[async_trait]
impl ObjectStorage for MemoryBucket {
    async fn upload(&self, path: &str, data: Vec<u8>, _content_type: &str) -> Result<(), StorageError> {
        let mut objects = self.objects.write().await;
        if objects.contains_key(path) {
            return Err(StorageError::AlreadyExists(path.to_string()));
        }
        objects.insert(path.to_string(), data);
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn remove(&self, paths: &[String]) -> Result<(), StorageError> {
        let mut objects = self.objects.write().await;
        for path in paths {
            objects.remove(path);
        }
        Ok(())
    }
}

/// Stores objects as files under a root directory, for local deployments.
pub struct LocalBucket {
    root: PathBuf,
}

impl LocalBucket {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStorage for LocalBucket {
    async fn upload(&self, path: &str, data: Vec<u8>, _content_type: &str) -> Result<(), StorageError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = match tokio::fs::OpenOptions::new().write(true).create_new(true).open(&target).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let target = self.resolve(path)?;
        match tokio::fs::read(target).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound(path.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, paths: &[String]) -> Result<(), StorageError> {
        for path in paths {
            let target = self.resolve(path)?;
            match tokio::fs::remove_file(target).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_uses_owner_course_and_extension() {
        let owner = Uuid::new_v4();
        let course = Uuid::new_v4();
        let path = storage_path(owner, course, "syllabus.pdf", 1_700_000_000_123);
        assert_eq!(path, format!("{}/{}/1700000000123.pdf", owner, course));
        assert!(authorize_path(owner, &path).is_ok());
    }

    #[test]
    fn extension_edge_cases() {
        assert_eq!(file_extension("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(file_extension("README"), None);
        assert_eq!(file_extension(".bashrc"), None);
        assert_eq!(file_extension("notes."), None);
        assert_eq!(file_extension("evil.p/df"), None);
        assert_eq!(file_extension("dir/scan.PNG").as_deref(), Some("PNG"));
    }

    #[test]
    fn foreign_namespace_is_forbidden() {
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        let path = storage_path(other, Uuid::new_v4(), "a.txt", 1);
        assert!(matches!(authorize_path(owner, &path), Err(StorageError::Forbidden(_))));
    }

    #[test]
    fn traversal_paths_are_invalid() {
        let owner = Uuid::new_v4();
        let path = format!("{}/../../etc/passwd", owner);
        assert!(matches!(authorize_path(owner, &path), Err(StorageError::InvalidPath(_))));
    }

    #[tokio::test]
    async fn local_bucket_roundtrip_and_idempotent_remove() {
        let root = std::env::temp_dir().join(format!("courseorganizer-bucket-{}", Uuid::new_v4()));
        let bucket = LocalBucket::new(&root);
        let path = storage_path(Uuid::new_v4(), Uuid::new_v4(), "a.txt", 42);

        bucket.upload(&path, b"hello".to_vec(), "text/plain").await.unwrap();
        assert_eq!(bucket.download(&path).await.unwrap(), b"hello");
        assert!(matches!(
            bucket.upload(&path, b"again".to_vec(), "text/plain").await,
            Err(StorageError::AlreadyExists(_))
        ));

        bucket.remove(&[path.clone()]).await.unwrap();
        bucket.remove(&[path.clone()]).await.unwrap();
        assert!(matches!(bucket.download(&path).await, Err(StorageError::NotFound(_))));

        let _ = std::fs::remove_dir_all(root);
    }
}
