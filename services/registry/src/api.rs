//! API server builder and router

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Json, Response};
use axum::routing::get;
use serde_json::json;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::Instrument as _;

use crate::auth::AuthConfig;
use crate::error::RegistryResult;
use crate::images::{ImageService, StoredImages};
use crate::registry::{DEFAULT_UPLOAD_TTL, Registry};
use crate::storage::RegistryStorage;

/// Bucket used when none is configured
pub const DEFAULT_BUCKET: &str = "registry";

/// Base URL used for chart downloads when none is configured
pub const DEFAULT_BASE_URL: &str = "http://localhost:3030";

/// Largest request body accepted by default, 512 MiB
pub const DEFAULT_MAX_BODY_SIZE: usize = 512 * 1024 * 1024;

/// Registry builder for configuring and creating the registry service
#[derive(Debug)]
pub struct RegistryBuilder {
    storage: Option<storage::Storage>,
    bucket: Option<String>,
    base_url: Option<String>,
    auth: AuthConfig,
    images: Option<Arc<dyn ImageService>>,
    stored_images: bool,
    upload_ttl: Duration,
    max_body_size: usize,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    /// Create a new registry builder
    pub fn new() -> Self {
        Self {
            storage: None,
            bucket: None,
            base_url: None,
            auth: AuthConfig::default(),
            images: None,
            stored_images: false,
            upload_ttl: DEFAULT_UPLOAD_TTL,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Set the storage backend. Defaults to in-memory storage.
    pub fn storage(mut self, storage: storage::Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the bucket name for storage
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Public URL of this registry, used for chart download links in `index.yaml`
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Require Basic credentials on the OCI routes
    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    /// Hand container image manifests to `images`
    pub fn image_service(mut self, images: Arc<dyn ImageService>) -> Self {
        self.images = Some(images);
        self
    }

    /// Keep container image manifests in the registry's own storage
    pub fn with_stored_images(mut self) -> Self {
        self.stored_images = true;
        self
    }

    /// Idle time before an upload session is swept
    pub fn upload_ttl(mut self, ttl: Duration) -> Self {
        self.upload_ttl = ttl;
        self
    }

    /// Largest request body accepted
    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    /// Build the registry service
    ///
    /// Returns a Router that can be served with any tower-compatible server
    pub fn build(self) -> Router {
        self.into_parts().1
    }

    /// Build the registry, returning the shared state alongside the router.
    ///
    /// The state is needed to run upload sweeps next to the server.
    pub fn into_parts(self) -> (Registry, Router) {
        let storage = self
            .storage
            .unwrap_or_else(|| storage::MemoryStorage::new().into());
        let bucket = self.bucket.unwrap_or_else(|| DEFAULT_BUCKET.to_string());
        let base_url = self.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let registry_storage = RegistryStorage::new(storage, bucket);
        let mut registry =
            Registry::new(registry_storage.clone(), &base_url).with_upload_ttl(self.upload_ttl);

        let images = self.images.or_else(|| {
            self.stored_images
                .then(|| Arc::new(StoredImages::new(registry_storage)) as Arc<dyn ImageService>)
        });
        if let Some(images) = images {
            registry = registry.with_images(images);
        }

        let router = router(registry.clone(), Arc::new(self.auth), self.max_body_size);
        (registry, router)
    }
}

fn router(registry: Registry, auth: Arc<AuthConfig>, max_body_size: usize) -> Router {
    let oci = Router::new()
        .route("/v2/", get(api_version_check))
        .route("/v2/_catalog", get(catalog))
        .merge(crate::blob::router())
        .merge(crate::manifest::router())
        .route_layer(middleware::from_fn_with_state(auth, crate::auth::basic_auth))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("docker-distribution-api-version"),
            HeaderValue::from_static("registry/2.0"),
        ));

    Router::new()
        .merge(oci)
        .merge(crate::chart::router())
        .route("/health", get(health))
        .layer(middleware::from_fn(trace_request))
        .layer(DefaultBodyLimit::max(max_body_size))
        .with_state(registry)
}

async fn trace_request(request: Request, next: Next) -> Response {
    let span = tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
    );

    async move {
        let response = next.run(request).await;
        tracing::debug!(status = %response.status(), "handled request");
        response
    }
    .instrument(span)
    .await
}

/// API version check endpoint
///
/// Returns 200 OK to indicate the registry is available
async fn api_version_check() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "apiVersion": "2.0",
            "docker-content-digest": true,
            "oci-distribution-spec": "v1.0",
        })),
    )
}

#[derive(Debug, serde::Serialize)]
struct Catalog {
    repositories: Vec<String>,
}

async fn catalog(State(registry): State<Registry>) -> RegistryResult<Json<Catalog>> {
    let repositories = registry.catalog().await?;
    Ok(Json(Catalog { repositories }))
}

async fn health() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let storage = storage::MemoryStorage::with_buckets(&["test"]);
        let _registry = RegistryBuilder::new()
            .storage(storage.into())
            .bucket("test")
            .build();
    }

    #[test]
    fn test_builder_defaults() {
        let (registry, _router) = RegistryBuilder::new()
            .with_stored_images()
            .upload_ttl(Duration::from_secs(60))
            .into_parts();
        assert!(registry.uploads().is_empty());
    }
}
