//! The registry core shared by the OCI and Helm surfaces

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::artifact::{ArtifactType, Manifest};
use crate::digest::{Digest, Reference, validate_repository};
use crate::error::{RegistryError, RegistryResult};
use crate::helm::ChartService;
use crate::images::ImageService;
use crate::layout::ManifestArea;
use crate::storage::{RegistryStorage, StoredManifest};
use crate::upload::UploadSessions;

/// Where a classified manifest is persisted.
#[derive(Debug)]
enum ArtifactHandler<'a> {
    /// Extract the chart from its layer, then keep the manifest as an artifact
    HelmChart(&'a ChartService),
    /// Hand the manifest to the image service
    ContainerImage(&'a dyn ImageService),
    /// Keep the manifest as-is in the artifact area
    Generic,
}

/// How long an upload session may sit idle before it is swept.
pub const DEFAULT_UPLOAD_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Shared state behind every route.
#[derive(Debug, Clone)]
pub struct Registry {
    storage: RegistryStorage,
    uploads: UploadSessions,
    charts: ChartService,
    images: Option<Arc<dyn ImageService>>,
    upload_ttl: Duration,
}

impl Registry {
    /// A registry over `storage`, publishing chart URLs under `base_url`.
    pub fn new(storage: RegistryStorage, base_url: &str) -> Self {
        Self {
            uploads: UploadSessions::new(storage.clone()),
            charts: ChartService::new(storage.clone(), base_url),
            images: None,
            upload_ttl: DEFAULT_UPLOAD_TTL,
            storage,
        }
    }

    /// Delegate container images to `images`.
    pub fn with_images(mut self, images: Arc<dyn ImageService>) -> Self {
        self.images = Some(images);
        self
    }

    /// Idle time after which [`Registry::sweep_uploads`] drops a session.
    pub fn with_upload_ttl(mut self, ttl: Duration) -> Self {
        self.upload_ttl = ttl;
        self
    }

    /// Abort upload sessions idle for longer than the upload TTL.
    pub async fn sweep_uploads(&self) -> usize {
        self.uploads.sweep_expired(self.upload_ttl).await
    }

    /// Content addressed storage
    pub fn storage(&self) -> &RegistryStorage {
        &self.storage
    }

    /// Blob upload sessions
    pub fn uploads(&self) -> &UploadSessions {
        &self.uploads
    }

    /// Helm chart repository
    pub fn charts(&self) -> &ChartService {
        &self.charts
    }

    /// Store a blob sent in one request.
    ///
    /// The digest is computed from `data`. When the client declared one,
    /// it must agree.
    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    pub async fn put_blob(
        &self,
        repository: &str,
        declared: Option<&str>,
        data: &[u8],
    ) -> RegistryResult<Digest> {
        validate_repository(repository)?;

        let actual = Digest::of(data);
        if let Some(declared) = declared {
            let declared = Digest::parse(declared)?;
            if declared != actual {
                return Err(RegistryError::DigestMismatch {
                    expected: declared.to_string(),
                    actual: actual.to_string(),
                });
            }
        }

        self.storage.put_blob(&actual, data).await?;
        Ok(actual)
    }

    fn handler(&self, artifact: ArtifactType) -> ArtifactHandler<'_> {
        match artifact {
            ArtifactType::HelmChart => ArtifactHandler::HelmChart(&self.charts),
            ArtifactType::ContainerImage => match &self.images {
                Some(images) => ArtifactHandler::ContainerImage(images.as_ref()),
                None => {
                    tracing::warn!("no image service configured, storing image as artifact");
                    ArtifactHandler::Generic
                }
            },
            ArtifactType::Unknown => {
                tracing::warn!("unrecognized artifact type, storing as generic artifact");
                ArtifactHandler::Generic
            }
        }
    }

    /// Classify and store a manifest, returning its digest.
    ///
    /// A Helm chart manifest also stores the chart from its content layer and
    /// rebuilds the index before returning.
    #[tracing::instrument(skip(self, data), fields(size = data.len(), artifact_type))]
    pub async fn put_manifest(
        &self,
        repository: &str,
        reference: &Reference,
        data: &[u8],
    ) -> RegistryResult<Digest> {
        validate_repository(repository)?;

        let digest = Digest::of(data);
        if let Reference::Digest(expected) = reference {
            if *expected != digest {
                return Err(RegistryError::DigestMismatch {
                    expected: expected.to_string(),
                    actual: digest.to_string(),
                });
            }
        }

        let manifest = Manifest::parse(data)?;
        let artifact = manifest.artifact_type();
        tracing::Span::current().record("artifact_type", artifact.as_str());

        match self.handler(artifact) {
            ArtifactHandler::HelmChart(charts) => {
                let chart = self.chart_content(&manifest).await?;
                let metadata = charts
                    .save_chart(&chart, &format!("{repository}.tgz"))
                    .await?;
                tracing::debug!(name = %metadata.name, version = %metadata.version, "extracted chart from manifest");

                self.storage
                    .put_manifest(ManifestArea::Artifacts, repository, reference, data)
                    .await
            }
            ArtifactHandler::ContainerImage(images) => {
                images.save_image(repository, reference, data).await
            }
            ArtifactHandler::Generic => {
                self.storage
                    .put_manifest(ManifestArea::Artifacts, repository, reference, data)
                    .await
            }
        }
    }

    /// The chart tarball named by a chart manifest's content layer.
    async fn chart_content(&self, manifest: &Manifest) -> RegistryResult<Vec<u8>> {
        let layer = manifest
            .chart_layer()
            .ok_or_else(|| RegistryError::InvalidManifest("chart manifest has no chart layer".into()))?;
        let digest = Digest::parse(&layer.digest)?;

        self.storage.get_blob(&digest).await.map_err(|err| match err {
            RegistryError::BlobNotFound(digest) => RegistryError::ManifestBlobUnknown(digest),
            other => other,
        })
    }

    /// Resolve a manifest by tag or digest.
    pub async fn get_manifest(
        &self,
        repository: &str,
        reference: &Reference,
    ) -> RegistryResult<StoredManifest> {
        validate_repository(repository)?;

        if let Some(manifest) = self
            .storage
            .get_manifest_in(ManifestArea::Artifacts, repository, reference)
            .await?
        {
            return Ok(manifest);
        }

        match &self.images {
            Some(images) => {
                let data = images.get_image_manifest(repository, reference).await?;
                Ok(StoredManifest {
                    area: ManifestArea::Images,
                    digest: Digest::of(&data),
                    data,
                })
            }
            None => self
                .storage
                .get_manifest_in(ManifestArea::Images, repository, reference)
                .await?
                .ok_or_else(|| RegistryError::ManifestNotFound(format!("{repository}:{reference}"))),
        }
    }

    /// Delete a manifest from whichever area holds it.
    pub async fn delete_manifest(&self, repository: &str, reference: &Reference) -> RegistryResult<()> {
        validate_repository(repository)?;

        match self
            .storage
            .delete_manifest(ManifestArea::Artifacts, repository, reference)
            .await
        {
            Err(RegistryError::ManifestNotFound(_)) => {}
            other => return other,
        }

        match &self.images {
            Some(images) => images.delete_image(repository, reference).await,
            None => {
                self.storage
                    .delete_manifest(ManifestArea::Images, repository, reference)
                    .await
            }
        }
    }

    /// Tags of a repository: manifest tags in both areas and chart versions.
    pub async fn list_tags(&self, repository: &str) -> RegistryResult<Vec<String>> {
        validate_repository(repository)?;

        let mut tags: BTreeSet<String> = self
            .storage
            .list_tags(ManifestArea::Artifacts, repository)
            .await?
            .into_iter()
            .collect();

        let images = match &self.images {
            Some(images) => images.list_tags(repository).await?,
            None => self.storage.list_tags(ManifestArea::Images, repository).await?,
        };
        tags.extend(images);
        tags.extend(self.charts.list_versions(repository).await?);

        Ok(tags.into_iter().collect())
    }

    /// Every repository name known to either surface.
    pub async fn catalog(&self) -> RegistryResult<Vec<String>> {
        let mut repositories: BTreeSet<String> = self.charts.chart_names().await?.into_iter().collect();
        repositories.extend(self.storage.list_repositories(ManifestArea::Artifacts).await?);

        match &self.images {
            Some(images) => {
                repositories.extend(images.list_images().await?.into_iter().map(|image| image.name))
            }
            None => repositories.extend(self.storage.list_repositories(ManifestArea::Images).await?),
        }

        Ok(repositories.into_iter().collect())
    }
}
