//! Operations that touch both the bucket and the store.
//!
//! Upload: `Pending -> StorageCommitted -> MetadataCommitted`. If the row cannot be
//! written once the object is in the bucket, the object is removed again.
//!
//! Delete: `Pending -> StorageRemoved -> MetadataRemoved`. The object goes first, so a
//! failure leaves either the untouched pair or a row whose object is already gone.
//! Removing a missing object succeeds, so repeating the delete finishes that second case.

use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::models::{FileRecord, NewFileRecord};
use crate::storage::{storage_path, StorageError, UserBucket};
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Pending,
    StorageCommitted,
    MetadataCommitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStage {
    Pending,
    StorageRemoved,
    MetadataRemoved,
}

#[derive(thiserror::Error, Debug)]
pub enum TransferError {
    /// Nothing was written.
    #[error("Storage write failed: {0}")]
    StorageWrite(#[source] StorageError),

    /// The object was written and then removed again.
    #[error("Metadata insert failed, uploaded object removed: {0}")]
    MetadataRejected(#[source] StoreError),

    /// The session ended between the two steps; the object was removed again.
    #[error("Session ended before the upload finished")]
    SessionEnded,

    /// Removing the object after a failed second step also failed.
    #[error("Object {path} is orphaned: {cause}")]
    Orphaned { path: String, cause: String },

    /// Nothing was removed.
    #[error("Storage removal failed: {0}")]
    StorageRemove(#[source] StorageError),

    /// The object is gone but its row is still there.
    #[error("Row for removed object {path} could not be deleted: {source}")]
    DanglingMetadata {
        path: String,
        #[source]
        source: StoreError,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub struct UploadRequest {
    pub owner: Uuid,
    pub course_id: Uuid,
    pub filename: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

pub struct Upload<'a> {
    store: &'a dyn Store,
    bucket: &'a UserBucket<'a>,
    stage: UploadStage,
    record: NewFileRecord,
}

impl<'a> Upload<'a> {
    pub fn new(store: &'a dyn Store, bucket: &'a UserBucket<'a>, request: &UploadRequest, epoch_millis: i64) -> Self {
        let record = NewFileRecord {
            id: Uuid::new_v4(),
            owner_id: request.owner,
            course_id: request.course_id,
            filename: request.filename.clone(),
            storage_path: storage_path(request.owner, request.course_id, &request.filename, epoch_millis),
            size_bytes: request.data.len() as i64,
            mime_type: request.mime_type.clone(),
        };

        Self { store, bucket, stage: UploadStage::Pending, record }
    }

    pub fn stage(&self) -> UploadStage {
        self.stage
    }

    pub fn path(&self) -> &str {
        &self.record.storage_path
    }

    pub async fn commit_storage(&mut self, data: Vec<u8>) -> Result<(), TransferError> {
        debug_assert_eq!(self.stage, UploadStage::Pending);
        self.bucket
            .upload(&self.record.storage_path, data, &self.record.mime_type)
            .await
            .map_err(TransferError::StorageWrite)?;
        self.stage = UploadStage::StorageCommitted;
        debug!(path = %self.record.storage_path, "Object stored");
        Ok(())
    }

    pub async fn commit_metadata(&mut self) -> Result<FileRecord, TransferError> {
        debug_assert_eq!(self.stage, UploadStage::StorageCommitted);
        match self.store.insert_file(self.record.clone()).await {
            Ok(file) => {
                self.stage = UploadStage::MetadataCommitted;
                Ok(file)
            }
            Err(e) => Err(self.roll_back(TransferError::MetadataRejected(e)).await),
        }
    }

    /// Gives up after the object was stored, removing it again.
    pub async fn abandon(&mut self) -> TransferError {
        self.roll_back(TransferError::SessionEnded).await
    }

    async fn roll_back(&mut self, reason: TransferError) -> TransferError {
        let path = self.record.storage_path.clone();
        match self.bucket.remove(&[path.clone()]).await {
            Ok(()) => {
                self.stage = UploadStage::Pending;
                warn!(%path, "Upload rolled back: {}", reason);
                reason
            }
            Err(e) => {
                error!(%path, "Upload left an orphaned object: {} (removal failed: {})", reason, e);
                TransferError::Orphaned { path, cause: reason.to_string() }
            }
        }
    }
}

/// Stores the bytes and then the row. `session_alive` is asked in between; a `false`
/// answer rolls the object back.
pub async fn upload_file(
    store: &dyn Store,
    bucket: &UserBucket<'_>,
    request: UploadRequest,
    epoch_millis: i64,
    mut session_alive: impl FnMut() -> bool,
) -> Result<FileRecord, TransferError> {
    let mut upload = Upload::new(store, bucket, &request, epoch_millis);
    upload.commit_storage(request.data).await?;

    if !session_alive() {
        return Err(upload.abandon().await);
    }

    upload.commit_metadata().await
}

pub struct Delete<'a> {
    store: &'a dyn Store,
    bucket: &'a UserBucket<'a>,
    stage: DeleteStage,
}

impl<'a> Delete<'a> {
    pub fn new(store: &'a dyn Store, bucket: &'a UserBucket<'a>) -> Self {
        Self { store, bucket, stage: DeleteStage::Pending }
    }

    pub fn stage(&self) -> DeleteStage {
        self.stage
    }

    pub async fn run(&mut self, file: &FileRecord) -> Result<(), TransferError> {
        self.bucket
            .remove(&[file.storage_path.clone()])
            .await
            .map_err(TransferError::StorageRemove)?;
        self.stage = DeleteStage::StorageRemoved;

        match self.store.delete_file(file.owner_id, file.id).await {
            Ok(_) => {
                self.stage = DeleteStage::MetadataRemoved;
                Ok(())
            }
            Err(source) => {
                warn!(path = %file.storage_path, "Object removed but its row remains: {}", source);
                Err(TransferError::DanglingMetadata { path: file.storage_path.clone(), source })
            }
        }
    }
}

pub async fn delete_file(store: &dyn Store, bucket: &UserBucket<'_>, file: &FileRecord) -> Result<(), TransferError> {
    Delete::new(store, bucket).run(file).await
}

/// Removes every object of a course, then the course row with its notes and file rows.
/// Returns whether the course existed.
pub async fn delete_course(
    store: &dyn Store,
    bucket: &UserBucket<'_>,
    owner: Uuid,
    course_id: Uuid,
) -> Result<bool, TransferError> {
    let paths: Vec<String> = store
        .list_course_files(owner, course_id)
        .await?
        .into_iter()
        .map(|f| f.storage_path)
        .collect();

    bucket.remove(&paths).await.map_err(TransferError::StorageRemove)?;
    Ok(store.delete_course(owner, course_id).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::models::{default_color, Course, CourseStatus, NewCourse};
    use crate::storage::{MemoryBucket, ObjectStorage};
    use async_trait::async_trait;

    /// Bucket whose removals always fail.
    #[derive(Default)]
    struct StuckBucket {
        inner: MemoryBucket,
    }

    #[async_trait]
    impl ObjectStorage for StuckBucket {
        async fn upload(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
            self.inner.upload(path, data, content_type).await
        }

        async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
            self.inner.download(path).await
        }

        async fn remove(&self, _paths: &[String]) -> Result<(), StorageError> {
            Err(StorageError::Rejected { status: 503, body: "unavailable".into() })
        }
    }

    async fn course_for(store: &MemoryStore, owner: Uuid) -> Course {
        store
            .insert_course(NewCourse {
                id: Uuid::new_v4(),
                owner_id: owner,
                title: "Algebra".into(),
                description: None,
                color: default_color(),
                status: CourseStatus::Active,
            })
            .await
            .unwrap()
    }

    fn request(owner: Uuid, course_id: Uuid, filename: &str) -> UploadRequest {
        UploadRequest {
            owner,
            course_id,
            filename: filename.into(),
            mime_type: "application/pdf".into(),
            data: b"%PDF-1.7".to_vec(),
        }
    }

    #[tokio::test]
    async fn upload_commits_object_then_row() {
        let store = MemoryStore::new();
        let storage = MemoryBucket::new();
        let owner = Uuid::new_v4();
        let course = course_for(&store, owner).await;
        let bucket = UserBucket::new(&storage, owner);

        let req = request(owner, course.id, "syllabus.pdf");
        let mut upload = Upload::new(&store, &bucket, &req, 1_700_000_000_000);
        assert_eq!(upload.stage(), UploadStage::Pending);
        upload.commit_storage(req.data.clone()).await.unwrap();
        assert_eq!(upload.stage(), UploadStage::StorageCommitted);
        let file = upload.commit_metadata().await.unwrap();
        assert_eq!(upload.stage(), UploadStage::MetadataCommitted);

        assert_eq!(file.size_bytes, 8);
        assert!(storage.contains(&file.storage_path).await);
    }

    #[tokio::test]
    async fn rejected_row_removes_the_stored_object() {
        let store = MemoryStore::new();
        let storage = MemoryBucket::new();
        let owner = Uuid::new_v4();
        let bucket = UserBucket::new(&storage, owner);

        // course does not exist, so the row insert fails
        let result = upload_file(&store, &bucket, request(owner, Uuid::new_v4(), "a.pdf"), 5, || true).await;
        assert!(matches!(result, Err(TransferError::MetadataRejected(StoreError::ForeignCourse(_)))));
        assert_eq!(storage.len().await, 0);
    }

    #[tokio::test]
    async fn ended_session_rolls_back_upload() {
        let store = MemoryStore::new();
        let storage = MemoryBucket::new();
        let owner = Uuid::new_v4();
        let course = course_for(&store, owner).await;
        let bucket = UserBucket::new(&storage, owner);

        let result = upload_file(&store, &bucket, request(owner, course.id, "a.pdf"), 5, || false).await;
        assert!(matches!(result, Err(TransferError::SessionEnded)));
        assert_eq!(storage.len().await, 0);
        assert!(store.list_course_files(owner, course.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_rollback_reports_orphan() {
        let store = MemoryStore::new();
        let storage = StuckBucket::default();
        let owner = Uuid::new_v4();
        let bucket = UserBucket::new(&storage, owner);

        let result = upload_file(&store, &bucket, request(owner, Uuid::new_v4(), "a.pdf"), 9, || true).await;
        match result {
            Err(TransferError::Orphaned { path, .. }) => assert!(storage.inner.contains(&path).await),
            other => panic!("expected orphan, got {:?}", other.map(|f| f.id)),
        }
    }

    #[tokio::test]
    async fn delete_removes_object_then_row() {
        let store = MemoryStore::new();
        let storage = MemoryBucket::new();
        let owner = Uuid::new_v4();
        let course = course_for(&store, owner).await;
        let bucket = UserBucket::new(&storage, owner);
        let file = upload_file(&store, &bucket, request(owner, course.id, "a.pdf"), 7, || true).await.unwrap();

        let mut delete = Delete::new(&store, &bucket);
        delete.run(&file).await.unwrap();
        assert_eq!(delete.stage(), DeleteStage::MetadataRemoved);
        assert!(matches!(bucket.download(&file.storage_path).await, Err(StorageError::NotFound(_))));
        assert!(store.get_file(owner, file.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_object_removal_keeps_the_row() {
        let store = MemoryStore::new();
        let storage = StuckBucket::default();
        let owner = Uuid::new_v4();
        let course = course_for(&store, owner).await;
        let bucket = UserBucket::new(&storage, owner);
        let file = upload_file(&store, &bucket, request(owner, course.id, "a.pdf"), 7, || true).await.unwrap();

        let mut delete = Delete::new(&store, &bucket);
        assert!(matches!(delete.run(&file).await, Err(TransferError::StorageRemove(_))));
        assert_eq!(delete.stage(), DeleteStage::Pending);
        assert!(store.get_file(owner, file.id).await.unwrap().is_some());
        assert!(storage.inner.contains(&file.storage_path).await);
    }

    #[tokio::test]
    async fn course_delete_clears_its_objects() {
        let store = MemoryStore::new();
        let storage = MemoryBucket::new();
        let owner = Uuid::new_v4();
        let course = course_for(&store, owner).await;
        let bucket = UserBucket::new(&storage, owner);
        upload_file(&store, &bucket, request(owner, course.id, "a.pdf"), 1, || true).await.unwrap();
        upload_file(&store, &bucket, request(owner, course.id, "b.pdf"), 2, || true).await.unwrap();

        assert!(delete_course(&store, &bucket, owner, course.id).await.unwrap());
        assert_eq!(storage.len().await, 0);
        assert!(store.get_course(owner, course.id).await.unwrap().is_none());
    }
}
