//! Blob and upload session routes

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderName, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use serde::Deserialize;
use uuid::Uuid;

use crate::digest::{Digest, validate_repository};
use crate::error::{RegistryError, RegistryResult};
use crate::registry::Registry;

pub(crate) const DOCKER_CONTENT_DIGEST: HeaderName = HeaderName::from_static("docker-content-digest");
const DOCKER_UPLOAD_UUID: HeaderName = HeaderName::from_static("docker-upload-uuid");

/// Router for blob operations
pub fn router() -> Router<Registry> {
    Router::new()
        .route(
            "/v2/{name}/blobs/{digest}",
            get(get_blob).head(head_blob).put(put_blob),
        )
        .route("/v2/{name}/blobs/uploads/", post(start_blob_upload))
        .route(
            "/v2/{name}/blobs/uploads/{uuid}",
            get(upload_status)
                .patch(patch_blob_upload)
                .put(complete_blob_upload)
                .delete(cancel_blob_upload),
        )
}

#[derive(Debug, Deserialize)]
struct DigestParam {
    digest: Option<String>,
}

fn upload_id(uuid: &str) -> RegistryResult<Uuid> {
    Uuid::parse_str(uuid).map_err(|_| RegistryError::UploadNotFound(uuid.to_string()))
}

fn upload_location(name: &str, id: &Uuid) -> String {
    format!("/v2/{name}/blobs/uploads/{id}")
}

/// `Range` header value for `received` bytes.
fn range(received: u64) -> String {
    format!("0-{}", received.saturating_sub(1))
}

/// Start offset from a `Content-Range: <start>-<end>` header.
fn content_range_start(headers: &HeaderMap) -> RegistryResult<Option<u64>> {
    let Some(value) = headers.get(header::CONTENT_RANGE) else {
        return Ok(None);
    };

    let invalid = || RegistryError::BlobUploadInvalid("malformed Content-Range".into());
    let value = value.to_str().map_err(|_| invalid())?;
    let value = value.strip_prefix("bytes ").unwrap_or(value);
    let (start, _end) = value.split_once('-').ok_or_else(invalid)?;
    start.trim().parse().map(Some).map_err(|_| invalid())
}

fn created(name: &str, digest: &Digest) -> Response {
    (
        StatusCode::CREATED,
        [
            (header::LOCATION, format!("/v2/{name}/blobs/{digest}")),
            (DOCKER_CONTENT_DIGEST, digest.to_string()),
            (header::CONTENT_LENGTH, "0".to_string()),
        ],
    )
        .into_response()
}

/// Get a blob
async fn get_blob(
    State(registry): State<Registry>,
    Path((name, digest)): Path<(String, String)>,
) -> RegistryResult<Response> {
    validate_repository(&name)?;
    let digest = Digest::parse(&digest)?;

    let data = registry.storage().get_blob(&digest).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (DOCKER_CONTENT_DIGEST, digest.to_string()),
        ],
        data,
    )
        .into_response())
}

/// Check if a blob exists
async fn head_blob(
    State(registry): State<Registry>,
    Path((name, digest)): Path<(String, String)>,
) -> RegistryResult<Response> {
    validate_repository(&name)?;
    let digest = Digest::parse(&digest)?;

    let size = registry.storage().head_blob(&digest).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, size.to_string()),
            (DOCKER_CONTENT_DIGEST, digest.to_string()),
        ],
    )
        .into_response())
}

/// Monolithic upload straight to the blob's address
async fn put_blob(
    State(registry): State<Registry>,
    Path((name, digest)): Path<(String, String)>,
    body: Bytes,
) -> RegistryResult<Response> {
    let digest = registry.put_blob(&name, Some(&digest), &body).await?;
    Ok(created(&name, &digest))
}

/// Start a blob upload session, or upload in one request when `digest` is given
async fn start_blob_upload(
    State(registry): State<Registry>,
    Path(name): Path<String>,
    Query(params): Query<DigestParam>,
    body: Bytes,
) -> RegistryResult<Response> {
    validate_repository(&name)?;

    if let Some(digest) = params.digest.as_deref() {
        let digest = registry.put_blob(&name, Some(digest), &body).await?;
        return Ok(created(&name, &digest));
    }

    let id = registry.uploads().initiate(&name);

    Ok((
        StatusCode::ACCEPTED,
        [
            (header::LOCATION, upload_location(&name, &id)),
            (header::RANGE, "0-0".to_string()),
            (DOCKER_UPLOAD_UUID, id.to_string()),
            (header::CONTENT_LENGTH, "0".to_string()),
        ],
    )
        .into_response())
}

/// Progress of an upload session
async fn upload_status(
    State(registry): State<Registry>,
    Path((name, uuid)): Path<(String, String)>,
) -> RegistryResult<Response> {
    let id = upload_id(&uuid)?;
    let status = registry.uploads().status(&name, &id).await?;

    Ok((
        StatusCode::NO_CONTENT,
        [
            (header::LOCATION, upload_location(&name, &id)),
            (header::RANGE, range(status.received)),
            (DOCKER_UPLOAD_UUID, id.to_string()),
        ],
    )
        .into_response())
}

/// Append a chunk to an upload session
async fn patch_blob_upload(
    State(registry): State<Registry>,
    Path((name, uuid)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> RegistryResult<Response> {
    let id = upload_id(&uuid)?;
    let start = content_range_start(&headers)?;

    let received = registry.uploads().append(&name, &id, &body, start).await?;

    Ok((
        StatusCode::ACCEPTED,
        [
            (header::LOCATION, upload_location(&name, &id)),
            (header::RANGE, range(received)),
            (DOCKER_UPLOAD_UUID, id.to_string()),
            (header::CONTENT_LENGTH, "0".to_string()),
        ],
    )
        .into_response())
}

/// Complete a blob upload
async fn complete_blob_upload(
    State(registry): State<Registry>,
    Path((name, uuid)): Path<(String, String)>,
    Query(params): Query<DigestParam>,
    body: Bytes,
) -> RegistryResult<Response> {
    let id = Uuid::parse_str(&uuid).map_err(|_| RegistryError::UploadConflict {
        upload: uuid.clone(),
        state: "unknown",
    })?;

    let digest = registry
        .uploads()
        .finalize(&name, &id, params.digest.as_deref(), &body)
        .await?;

    Ok(created(&name, &digest))
}

/// Cancel a blob upload
async fn cancel_blob_upload(
    State(registry): State<Registry>,
    Path((name, uuid)): Path<(String, String)>,
) -> RegistryResult<StatusCode> {
    let id = upload_id(&uuid)?;
    registry.uploads().abort(&name, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn ranges_are_inclusive() {
        assert_eq!(range(3), "0-2");
        assert_eq!(range(0), "0-0");
    }

    #[test]
    fn content_range_start_offsets() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_range_start(&headers).unwrap(), None);

        headers.insert(header::CONTENT_RANGE, HeaderValue::from_static("3-5"));
        assert_eq!(content_range_start(&headers).unwrap(), Some(3));

        headers.insert(header::CONTENT_RANGE, HeaderValue::from_static("bytes 0-9"));
        assert_eq!(content_range_start(&headers).unwrap(), Some(0));

        headers.insert(header::CONTENT_RANGE, HeaderValue::from_static("nonsense"));
        assert!(matches!(
            content_range_start(&headers),
            Err(RegistryError::BlobUploadInvalid(_))
        ));
    }

    #[test]
    fn malformed_upload_ids_are_not_found() {
        assert!(matches!(
            upload_id("not-a-uuid"),
            Err(RegistryError::UploadNotFound(_))
        ));
    }
}
