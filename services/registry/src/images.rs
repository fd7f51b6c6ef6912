//! Container image collaborator
//!
//! Manifests classified as container images are handed to an
//! [`ImageService`]. [`StoredImages`] keeps them in the images area of the
//! registry's own store.

use std::fmt;

use serde::Serialize;

use crate::digest::{Digest, Reference};
use crate::error::{RegistryError, RegistryResult};
use crate::layout::ManifestArea;
use crate::storage::RegistryStorage;

/// A container repository and its tags
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageSummary {
    /// Repository name
    pub name: String,
    /// Tags, sorted
    pub tags: Vec<String>,
}

/// Persistence for container image manifests.
#[async_trait::async_trait]
pub trait ImageService: fmt::Debug + Send + Sync {
    /// Store an image manifest, returning its digest.
    async fn save_image(
        &self,
        repository: &str,
        reference: &Reference,
        manifest: &[u8],
    ) -> RegistryResult<Digest>;

    /// Every image repository with its tags.
    async fn list_images(&self) -> RegistryResult<Vec<ImageSummary>>;

    /// Tags of one image repository.
    async fn list_tags(&self, repository: &str) -> RegistryResult<Vec<String>>;

    /// Fetch an image manifest.
    async fn get_image_manifest(&self, repository: &str, reference: &Reference) -> RegistryResult<Vec<u8>>;

    /// Remove an image manifest.
    async fn delete_image(&self, repository: &str, reference: &Reference) -> RegistryResult<()>;
}

/// Image manifests kept alongside everything else in registry storage.
#[derive(Debug, Clone)]
pub struct StoredImages {
    storage: RegistryStorage,
}

impl StoredImages {
    /// Keep images in `storage`
    pub fn new(storage: RegistryStorage) -> Self {
        Self { storage }
    }
}

#[async_trait::async_trait]
impl ImageService for StoredImages {
    async fn save_image(
        &self,
        repository: &str,
        reference: &Reference,
        manifest: &[u8],
    ) -> RegistryResult<Digest> {
        self.storage
            .put_manifest(ManifestArea::Images, repository, reference, manifest)
            .await
    }

    async fn list_images(&self) -> RegistryResult<Vec<ImageSummary>> {
        let mut images = Vec::new();
        for name in self.storage.list_repositories(ManifestArea::Images).await? {
            let tags = self.list_tags(&name).await?;
            images.push(ImageSummary { name, tags });
        }
        Ok(images)
    }

    async fn list_tags(&self, repository: &str) -> RegistryResult<Vec<String>> {
        self.storage.list_tags(ManifestArea::Images, repository).await
    }

    async fn get_image_manifest(&self, repository: &str, reference: &Reference) -> RegistryResult<Vec<u8>> {
        self.storage
            .get_manifest_in(ManifestArea::Images, repository, reference)
            .await?
            .map(|manifest| manifest.data)
            .ok_or_else(|| RegistryError::ManifestNotFound(format!("{repository}:{reference}")))
    }

    async fn delete_image(&self, repository: &str, reference: &Reference) -> RegistryResult<()> {
        self.storage
            .delete_manifest(ManifestArea::Images, repository, reference)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::MemoryStorage;

    fn images() -> StoredImages {
        StoredImages::new(RegistryStorage::new(MemoryStorage::new().into(), "test"))
    }

    #[tokio::test]
    async fn save_list_get_delete() {
        let images = images();
        let latest = Reference::Tag("latest".into());
        let manifest = br#"{"schemaVersion":2}"#;

        let digest = images.save_image("nginx", &latest, manifest).await.unwrap();
        images
            .save_image("nginx", &Reference::Tag("1.25".into()), manifest)
            .await
            .unwrap();

        assert_eq!(
            images.list_images().await.unwrap(),
            vec![ImageSummary {
                name: "nginx".into(),
                tags: vec!["1.25".into(), "latest".into()],
            }]
        );
        assert_eq!(
            images
                .get_image_manifest("nginx", &Reference::Digest(digest))
                .await
                .unwrap(),
            manifest
        );

        images.delete_image("nginx", &latest).await.unwrap();
        assert_eq!(images.list_tags("nginx").await.unwrap(), vec!["1.25"]);
        assert!(matches!(
            images.get_image_manifest("nginx", &latest).await,
            Err(RegistryError::ManifestNotFound(_))
        ));
    }
}
