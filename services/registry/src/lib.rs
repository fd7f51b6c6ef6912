//! # Helm chart and OCI registry
//!
//! One content addressed store served two ways:
//!
//! - a Helm chart repository: `POST /chart` uploads, `GET /index.yaml`, and
//!   chart downloads;
//! - the [OCI Distribution](https://github.com/opencontainers/distribution-spec)
//!   API: blobs, chunked uploads, manifests, tags and the catalog.
//!
//! Helm charts pushed over OCI (`helm push oci://...`) are extracted from
//! their content layer into the chart repository, so they show up in
//! `index.yaml` like uploaded charts. Container image manifests are handed to
//! an [`ImageService`].
//!
//! ## Example
//!
//! ```no_run
//! use chart_registry::RegistryBuilder;
//! use storage::MemoryStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = MemoryStorage::with_buckets(&["registry"]);
//! let registry = RegistryBuilder::new()
//!     .storage(storage.into())
//!     .bucket("registry")
//!     .base_url("https://charts.example.com")
//!     .build();
//!
//! // Use the registry service with axum or any tower-compatible server
//! # Ok(())
//! # }
//! ```

mod api;
mod artifact;
mod auth;
mod blob;
mod chart;
mod config;
mod digest;
mod error;
pub mod helm;
mod images;
mod layout;
mod manifest;
mod registry;
mod storage;
mod upload;

pub use api::{DEFAULT_BASE_URL, DEFAULT_BUCKET, DEFAULT_MAX_BODY_SIZE, RegistryBuilder};
pub use artifact::{ArtifactType, Descriptor, Manifest};
pub use auth::{AuthConfig, User};
pub use config::{Config, LogFormat};
pub use digest::{Digest, Reference};
pub use error::{RegistryError, RegistryResult};
pub use images::{ImageService, ImageSummary, StoredImages};
pub use layout::ManifestArea;
pub use registry::{DEFAULT_UPLOAD_TTL, Registry};
pub use self::storage::{RegistryStorage, StoredManifest};
pub use upload::{UploadSessions, UploadState, UploadStatus};
