use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::authentication::CurrentUser;
use crate::error::AppError;
use crate::models::{FileRecord, COURSE_FILE_FIELD};
use crate::routes::COURSES_ROUTE;
use crate::storage::{ObjectStorage, StorageError, UserBucket};
use crate::store::{Store, StoreError};
use crate::transfer::{self, TransferError, UploadRequest};

fn file_not_found(file_id: Uuid) -> AppError {
    AppError::not_found(format!("File with id {} not found", file_id), None)
}

fn course_not_found(course_id: Uuid) -> AppError {
    AppError::not_found(format!("Course with id {} not found", course_id), Some(COURSES_ROUTE))
}

struct UploadedPart {
    filename: String,
    mime_type: String,
    data: Vec<u8>,
}

/// The body limit surfaces as a multipart error; it gets its own status.
fn multipart_failure(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError::PayloadTooLarge("Uploaded file is too large".to_string());
    }
    AppError::validation(format!("Malformed upload: {}", e))
}

async fn read_upload(mut multipart: Multipart) -> Result<UploadedPart, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(multipart_failure)?
    {
        if field.name() != Some(COURSE_FILE_FIELD) {
            continue;
        }

        let filename = field
            .file_name()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| AppError::validation("Uploaded file must have a name"))?;
        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(multipart_failure)?
            .to_vec();

        debug!(%filename, size = data.len(), "Received upload");
        return Ok(UploadedPart { filename, mime_type, data });
    }

    Err(AppError::validation(format!("Missing `{}` field", COURSE_FILE_FIELD)))
}

pub async fn upload_file(
    State(store): State<Arc<dyn Store>>,
    State(storage): State<Arc<dyn ObjectStorage>>,
    mut user: CurrentUser,
    Path(course_id): Path<Uuid>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<FileRecord>), AppError> {
    let owner = user.id();
    let part = read_upload(multipart).await?;

    store
        .get_course(owner, course_id)
        .await
        .map_err(|e| AppError::backend("cannot upload file", e))?
        .ok_or_else(|| course_not_found(course_id))?;

    let bucket = UserBucket::new(storage.as_ref(), owner);
    let request = UploadRequest {
        owner,
        course_id,
        filename: part.filename,
        mime_type: part.mime_type,
        data: part.data,
    };
    let now_millis = chrono::Utc::now().timestamp_millis();

    match transfer::upload_file(store.as_ref(), &bucket, request, now_millis, || user.still_signed_in()).await {
        Ok(file) => {
            info!(file_id = %file.id, path = %file.storage_path, "Uploaded file");
            Ok((StatusCode::CREATED, Json(file)))
        }
        Err(TransferError::SessionEnded) => Err(AppError::Unauthenticated),
        Err(TransferError::MetadataRejected(StoreError::ForeignCourse(_))) => Err(course_not_found(course_id)),
        Err(e) => Err(AppError::backend("cannot upload file", e)),
    }
}

/// A path outside the caller's namespace is a 403; anything else is a backend failure.
fn storage_failure(action: &'static str, e: StorageError) -> AppError {
    match e {
        StorageError::Forbidden(path) => AppError::Forbidden(format!("Path {} is outside your storage", path)),
        e => AppError::backend(action, e),
    }
}

fn attachment_disposition(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}

pub async fn download_file(
    State(store): State<Arc<dyn Store>>,
    State(storage): State<Arc<dyn ObjectStorage>>,
    user: CurrentUser,
    Path(file_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let owner = user.id();
    let file = store
        .get_file(owner, file_id)
        .await
        .map_err(|e| AppError::backend("cannot download file", e))?
        .ok_or_else(|| file_not_found(file_id))?;

    let bucket = UserBucket::new(storage.as_ref(), owner);
    let data = match bucket.download(&file.storage_path).await {
        Ok(data) => data,
        Err(StorageError::NotFound(_)) => return Err(file_not_found(file_id)),
        Err(e) => return Err(storage_failure("cannot download file", e)),
    };

    let headers = [
        (header::CONTENT_TYPE, file.mime_type.clone()),
        (header::CONTENT_DISPOSITION, attachment_disposition(&file.filename)),
    ];
    Ok((headers, data))
}

pub async fn delete_file(
    State(store): State<Arc<dyn Store>>,
    State(storage): State<Arc<dyn ObjectStorage>>,
    user: CurrentUser,
    Path(file_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let owner = user.id();
    let file = store
        .get_file(owner, file_id)
        .await
        .map_err(|e| AppError::backend("cannot delete file", e))?
        .ok_or_else(|| file_not_found(file_id))?;

    let bucket = UserBucket::new(storage.as_ref(), owner);
    match transfer::delete_file(store.as_ref(), &bucket, &file).await {
        Ok(()) => {}
        Err(TransferError::StorageRemove(e)) => return Err(storage_failure("cannot delete file", e)),
        Err(e) => return Err(AppError::backend("cannot delete file", e)),
    }

    info!(%file_id, path = %file.storage_path, "Deleted file");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_strips_quotes() {
        assert_eq!(attachment_disposition("a\"b.pdf"), "attachment; filename=\"a_b.pdf\"");
        assert_eq!(attachment_disposition("syllabus.pdf"), "attachment; filename=\"syllabus.pdf\"");
    }
}
