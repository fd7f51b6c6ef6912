//! Manifest operations for the registry

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;

use crate::blob::DOCKER_CONTENT_DIGEST;
use crate::digest::Reference;
use crate::error::RegistryResult;
use crate::registry::Registry;

const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
const DOCKER_MANIFEST_V1: &str = "application/vnd.docker.distribution.manifest.v1+json";
const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

/// Router for manifest operations
pub fn router() -> Router<Registry> {
    Router::new()
        .route(
            "/v2/{name}/manifests/{reference}",
            get(get_manifest)
                .head(head_manifest)
                .put(put_manifest)
                .delete(delete_manifest),
        )
        .route("/v2/{name}/tags/list", get(list_tags))
}

/// Get a manifest
async fn get_manifest(
    State(registry): State<Registry>,
    Path((name, reference)): Path<(String, String)>,
) -> RegistryResult<Response> {
    let reference = Reference::parse(&reference)?;
    let manifest = registry.get_manifest(&name, &reference).await?;

    let content_type = detect_manifest_type(&manifest.data);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (DOCKER_CONTENT_DIGEST, manifest.digest.to_string()),
        ],
        manifest.data,
    )
        .into_response())
}

/// Check if a manifest exists
async fn head_manifest(
    State(registry): State<Registry>,
    Path((name, reference)): Path<(String, String)>,
) -> RegistryResult<Response> {
    let reference = Reference::parse(&reference)?;
    let manifest = registry.get_manifest(&name, &reference).await?;

    let content_type = detect_manifest_type(&manifest.data);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (DOCKER_CONTENT_DIGEST, manifest.digest.to_string()),
            (header::CONTENT_LENGTH, manifest.data.len().to_string()),
        ],
    )
        .into_response())
}

/// Put a manifest
async fn put_manifest(
    State(registry): State<Registry>,
    Path((name, reference)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> RegistryResult<Response> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    if let Some(content_type) = content_type.filter(|value| !is_known_manifest_type(value)) {
        tracing::debug!(%content_type, "unrecognized manifest content type");
    }

    let reference = Reference::parse(&reference)?;
    let digest = registry.put_manifest(&name, &reference, &body).await?;

    let location = format!("/v2/{name}/manifests/{digest}");

    Ok((
        StatusCode::CREATED,
        [
            (header::LOCATION, location),
            (DOCKER_CONTENT_DIGEST, digest.to_string()),
            (header::CONTENT_LENGTH, "0".to_string()),
        ],
    )
        .into_response())
}

/// Delete a manifest
async fn delete_manifest(
    State(registry): State<Registry>,
    Path((name, reference)): Path<(String, String)>,
) -> RegistryResult<StatusCode> {
    let reference = Reference::parse(&reference)?;
    registry.delete_manifest(&name, &reference).await?;
    Ok(StatusCode::ACCEPTED)
}

/// List tags for a repository
async fn list_tags(
    State(registry): State<Registry>,
    Path(name): Path<String>,
) -> RegistryResult<Json<TagList>> {
    let tags = registry.list_tags(&name).await?;
    Ok(Json(TagList { name, tags }))
}

/// Tag list response
#[derive(Debug, serde::Serialize)]
struct TagList {
    name: String,
    tags: Vec<String>,
}

/// Detect manifest type from content
fn detect_manifest_type(data: &[u8]) -> String {
    let Ok(json) = serde_json::from_slice::<serde_json::Value>(data) else {
        return OCI_MANIFEST.to_string();
    };

    if let Some(media_type) = json.get("mediaType").and_then(|v| v.as_str()) {
        return media_type.to_string();
    }

    let is_list = json.get("manifests").is_some();
    let docker_config = json
        .pointer("/config/mediaType")
        .and_then(|v| v.as_str())
        .is_some_and(|media_type| media_type.starts_with("application/vnd.docker."));

    let media_type = match json.get("schemaVersion").and_then(|v| v.as_u64()) {
        Some(1) => DOCKER_MANIFEST_V1,
        Some(2) if is_list && docker_config => DOCKER_MANIFEST_LIST,
        Some(2) if is_list => OCI_INDEX,
        Some(2) if docker_config => DOCKER_MANIFEST_V2,
        _ => OCI_MANIFEST,
    };
    media_type.to_string()
}

/// Whether a `Content-Type` names one of the well known manifest formats
fn is_known_manifest_type(content_type: &str) -> bool {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim();

    matches!(
        media_type,
        DOCKER_MANIFEST_V1
            | "application/vnd.docker.distribution.manifest.v1+prettyjws"
            | DOCKER_MANIFEST_V2
            | DOCKER_MANIFEST_LIST
            | OCI_MANIFEST
            | OCI_INDEX
            | "application/json"
    )
}
