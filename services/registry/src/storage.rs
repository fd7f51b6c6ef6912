//! Storage layer for the registry
//!
//! Blobs are content addressed and immutable. Manifests are stored per
//! repository under the reference they were pushed with.

use std::collections::BTreeSet;

use camino::Utf8Path;
use storage::{Metadata, StorageBucket, StorageError};

use crate::digest::{Digest, Reference};
use crate::error::{RegistryError, RegistryResult};
use crate::layout::{self, ManifestArea};

/// A manifest as found in storage.
#[derive(Debug, Clone)]
pub struct StoredManifest {
    /// Which area the manifest was found in
    pub area: ManifestArea,
    /// Digest of the manifest bytes
    pub digest: Digest,
    /// The manifest document
    pub data: Vec<u8>,
}

/// Registry storage backend
#[derive(Clone, Debug)]
pub struct RegistryStorage {
    bucket: StorageBucket,
}

impl RegistryStorage {
    /// Create a new registry storage
    pub fn new(storage: storage::Storage, bucket: impl Into<String>) -> Self {
        Self {
            bucket: storage.bucket(bucket),
        }
    }

    pub(crate) async fn read(&self, path: &Utf8Path) -> Result<Vec<u8>, StorageError> {
        let mut data = Vec::new();
        self.bucket.download(path, &mut data).await?;
        Ok(data)
    }

    pub(crate) async fn read_optional(&self, path: &Utf8Path) -> RegistryResult<Option<Vec<u8>>> {
        match self.read(path).await {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub(crate) async fn write(&self, path: &Utf8Path, mut data: &[u8]) -> RegistryResult<()> {
        self.bucket.upload(path, &mut data).await?;
        Ok(())
    }

    pub(crate) async fn append(&self, path: &Utf8Path, mut data: &[u8]) -> RegistryResult<u64> {
        Ok(self.bucket.append(path, &mut data).await?)
    }

    pub(crate) async fn metadata(&self, path: &Utf8Path) -> Result<Metadata, StorageError> {
        self.bucket.metadata(path).await
    }

    pub(crate) async fn exists(&self, path: &Utf8Path) -> RegistryResult<bool> {
        match self.metadata(path).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    pub(crate) async fn list(&self, prefix: &Utf8Path) -> RegistryResult<Vec<String>> {
        Ok(self.bucket.list(Some(prefix)).await?)
    }

    pub(crate) async fn rename(&self, from: &Utf8Path, to: &Utf8Path) -> Result<(), StorageError> {
        self.bucket.rename(from, to).await
    }

    pub(crate) async fn remove(&self, path: &Utf8Path) -> Result<(), StorageError> {
        self.bucket.delete(path).await
    }

    /// Store a blob under `digest`.
    ///
    /// The digest is trusted: callers hash the bytes before getting here.
    /// Writing a digest which already exists is a no-op.
    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    pub async fn put_blob(&self, digest: &Digest, data: &[u8]) -> RegistryResult<()> {
        let path = layout::blob(digest);
        if self.exists(&path).await? {
            tracing::debug!("blob already present");
            return Ok(());
        }

        self.write(&path, data).await?;
        tracing::info!(%path, "stored blob");
        Ok(())
    }

    /// Move a staged upload into the blob store.
    pub(crate) async fn commit_blob(&self, staged: &Utf8Path, digest: &Digest) -> RegistryResult<()> {
        self.rename(staged, &layout::blob(digest))
            .await
            .map_err(|err| RegistryError::Internal(format!("committing {staged} as {digest}: {err}")))
    }

    /// Get a blob
    pub async fn get_blob(&self, digest: &Digest) -> RegistryResult<Vec<u8>> {
        self.read(&layout::blob(digest))
            .await
            .map_err(|err| RegistryError::not_found_or(err, || RegistryError::BlobNotFound(digest.to_string())))
    }

    /// Size of a blob, without reading it
    pub async fn head_blob(&self, digest: &Digest) -> RegistryResult<u64> {
        self.metadata(&layout::blob(digest))
            .await
            .map(|metadata| metadata.size)
            .map_err(|err| RegistryError::not_found_or(err, || RegistryError::BlobNotFound(digest.to_string())))
    }

    /// Store a manifest under its reference, returning its digest.
    #[tracing::instrument(skip(self, data))]
    pub async fn put_manifest(
        &self,
        area: ManifestArea,
        repository: &str,
        reference: &Reference,
        data: &[u8],
    ) -> RegistryResult<Digest> {
        let digest = Digest::of(data);
        let path = layout::manifest(area, repository, reference);
        self.write(&path, data).await?;
        tracing::info!(%digest, %path, "stored manifest");
        Ok(digest)
    }

    /// Find a manifest in one area.
    ///
    /// Tags are read directly. Digests are resolved by hashing every manifest
    /// in the repository until one matches, which is linear in the number of
    /// manifests stored for the repository.
    pub async fn get_manifest_in(
        &self,
        area: ManifestArea,
        repository: &str,
        reference: &Reference,
    ) -> RegistryResult<Option<StoredManifest>> {
        let found = |data: Vec<u8>, digest: Digest| StoredManifest { area, digest, data };

        match reference {
            Reference::Tag(_) => {
                let path = layout::manifest(area, repository, reference);
                Ok(self
                    .read_optional(&path)
                    .await?
                    .map(|data| {
                        let digest = Digest::of(&data);
                        found(data, digest)
                    }))
            }
            Reference::Digest(wanted) => {
                for path in self.manifest_files(area, repository).await? {
                    let Some(data) = self.read_optional(Utf8Path::new(&path)).await? else {
                        continue;
                    };
                    let digest = Digest::of(&data);
                    if &digest == wanted {
                        return Ok(Some(found(data, digest)));
                    }
                }
                Ok(None)
            }
        }
    }

    /// Find a manifest, checking the artifact area before the image area.
    pub async fn get_manifest(&self, repository: &str, reference: &Reference) -> RegistryResult<StoredManifest> {
        for area in ManifestArea::ALL {
            if let Some(manifest) = self.get_manifest_in(area, repository, reference).await? {
                return Ok(manifest);
            }
        }

        Err(RegistryError::ManifestNotFound(format!("{repository}:{reference}")))
    }

    /// Delete every manifest file in `area` which `reference` resolves to.
    ///
    /// Deleting by digest also removes tags pointing at the same content.
    pub async fn delete_manifest(
        &self,
        area: ManifestArea,
        repository: &str,
        reference: &Reference,
    ) -> RegistryResult<()> {
        let targets: Vec<String> = match reference {
            Reference::Tag(_) => vec![layout::manifest(area, repository, reference).into_string()],
            Reference::Digest(wanted) => {
                let mut targets = Vec::new();
                for path in self.manifest_files(area, repository).await? {
                    let data = self.read_optional(Utf8Path::new(&path)).await?;
                    if data.is_some_and(|data| &Digest::of(&data) == wanted) {
                        targets.push(path);
                    }
                }
                targets
            }
        };

        let mut deleted = 0;
        for path in &targets {
            match self.remove(Utf8Path::new(path)).await {
                Ok(()) => deleted += 1,
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }

        if deleted == 0 {
            return Err(RegistryError::ManifestNotFound(format!("{repository}:{reference}")));
        }

        tracing::info!(%reference, ?area, deleted, "deleted manifest");
        Ok(())
    }

    /// Tags stored for a repository in one area, sorted.
    pub async fn list_tags(&self, area: ManifestArea, repository: &str) -> RegistryResult<Vec<String>> {
        let tags: BTreeSet<String> = self
            .manifest_files(area, repository)
            .await?
            .iter()
            .filter_map(|path| layout::manifest_reference(Utf8Path::new(path)))
            .filter(|reference| crate::digest::is_valid_tag(reference))
            .map(str::to_owned)
            .collect();

        Ok(tags.into_iter().collect())
    }

    /// Repositories with at least one manifest in one area, sorted.
    pub async fn list_repositories(&self, area: ManifestArea) -> RegistryResult<Vec<String>> {
        let repositories: BTreeSet<String> = self
            .list(area.root())
            .await?
            .iter()
            .filter_map(|path| area.repository_of(path))
            .map(str::to_owned)
            .collect();

        Ok(repositories.into_iter().collect())
    }

    /// Manifest files directly inside the repository's directory.
    async fn manifest_files(&self, area: ManifestArea, repository: &str) -> RegistryResult<Vec<String>> {
        let directory = area.directory(repository);
        let files = self.list(&directory).await?;

        Ok(files
            .into_iter()
            .filter(|path| {
                let path = Utf8Path::new(path);
                path.parent() == Some(directory.as_path()) && layout::manifest_reference(path).is_some()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::MemoryStorage;

    fn test_storage() -> RegistryStorage {
        let storage = MemoryStorage::with_buckets(&["test"]);
        RegistryStorage::new(storage.into(), "test")
    }

    fn tag(tag: &str) -> Reference {
        Reference::Tag(tag.to_string())
    }

    #[tokio::test]
    async fn test_blob_storage() {
        let storage = test_storage();
        let data = b"test data";
        let digest = Digest::of(data);

        storage.put_blob(&digest, data).await.unwrap();
        assert_eq!(storage.head_blob(&digest).await.unwrap(), data.len() as u64);
        assert_eq!(storage.get_blob(&digest).await.unwrap(), data);

        // Second write of the same digest is a no-op.
        storage.put_blob(&digest, data).await.unwrap();
        assert_eq!(storage.get_blob(&digest).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_missing_blob() {
        let storage = test_storage();
        let digest = Digest::of(b"never stored");

        assert!(matches!(
            storage.get_blob(&digest).await,
            Err(RegistryError::BlobNotFound(_))
        ));
        assert!(matches!(
            storage.head_blob(&digest).await,
            Err(RegistryError::BlobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_manifest_storage() {
        let storage = test_storage();
        let manifest = br#"{"schemaVersion":2}"#;

        let digest = storage
            .put_manifest(ManifestArea::Artifacts, "test-repo", &tag("latest"), manifest)
            .await
            .unwrap();
        assert_eq!(digest, Digest::of(manifest));

        let by_tag = storage.get_manifest("test-repo", &tag("latest")).await.unwrap();
        assert_eq!(by_tag.data, manifest);
        assert_eq!(by_tag.area, ManifestArea::Artifacts);

        let by_digest = storage
            .get_manifest("test-repo", &Reference::Digest(digest.clone()))
            .await
            .unwrap();
        assert_eq!(by_digest.data, manifest);
        assert_eq!(by_digest.digest, digest);
    }

    #[tokio::test]
    async fn test_digest_lookup_scans_image_area() {
        let storage = test_storage();
        let manifest = br#"{"schemaVersion":2,"config":{}}"#;

        let digest = storage
            .put_manifest(ManifestArea::Images, "nginx", &tag("1.25"), manifest)
            .await
            .unwrap();

        let found = storage
            .get_manifest("nginx", &Reference::Digest(digest))
            .await
            .unwrap();
        assert_eq!(found.area, ManifestArea::Images);
    }

    #[tokio::test]
    async fn test_mismatched_digest_is_not_found() {
        let storage = test_storage();
        storage
            .put_manifest(ManifestArea::Artifacts, "demo", &tag("1.0.0"), b"{}")
            .await
            .unwrap();

        let other = Reference::Digest(Digest::of(b"something else"));
        assert!(matches!(
            storage.get_manifest("demo", &other).await,
            Err(RegistryError::ManifestNotFound(_))
        ));
        assert!(matches!(
            storage.get_manifest("missing", &tag("1.0.0")).await,
            Err(RegistryError::ManifestNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_tags() {
        let storage = test_storage();
        let manifest = b"test manifest";

        for reference in ["v1.0", "v1.1", "latest"] {
            storage
                .put_manifest(ManifestArea::Artifacts, "test-repo", &tag(reference), manifest)
                .await
                .unwrap();
        }
        storage
            .put_manifest(
                ManifestArea::Artifacts,
                "test-repo",
                &Reference::Digest(Digest::of(manifest)),
                manifest,
            )
            .await
            .unwrap();

        let tags = storage.list_tags(ManifestArea::Artifacts, "test-repo").await.unwrap();
        assert_eq!(tags, vec!["latest", "v1.0", "v1.1"]);
    }

    #[tokio::test]
    async fn test_list_repositories() {
        let storage = test_storage();
        storage
            .put_manifest(ManifestArea::Artifacts, "demo", &tag("1.0.0"), b"{}")
            .await
            .unwrap();
        storage
            .put_manifest(ManifestArea::Images, "nginx", &tag("latest"), b"{}")
            .await
            .unwrap();

        assert_eq!(
            storage.list_repositories(ManifestArea::Artifacts).await.unwrap(),
            vec!["demo"]
        );
        assert_eq!(
            storage.list_repositories(ManifestArea::Images).await.unwrap(),
            vec!["nginx"]
        );
    }

    #[tokio::test]
    async fn test_delete_by_digest_removes_tags() {
        let storage = test_storage();
        let manifest = br#"{"schemaVersion":2}"#;
        let digest = storage
            .put_manifest(ManifestArea::Artifacts, "demo", &tag("1.0.0"), manifest)
            .await
            .unwrap();
        storage
            .put_manifest(ManifestArea::Artifacts, "demo", &tag("stable"), manifest)
            .await
            .unwrap();

        storage
            .delete_manifest(ManifestArea::Artifacts, "demo", &Reference::Digest(digest))
            .await
            .unwrap();

        assert!(storage.list_tags(ManifestArea::Artifacts, "demo").await.unwrap().is_empty());
        assert!(matches!(
            storage
                .delete_manifest(ManifestArea::Artifacts, "demo", &tag("1.0.0"))
                .await,
            Err(RegistryError::ManifestNotFound(_))
        ));
    }
}
