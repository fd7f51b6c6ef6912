//! Helm chart repository
//!
//! Chart tarballs live under `charts/` with the canonical name
//! `<name>-<version>.tgz`, and every change rebuilds `index.yaml`.

pub mod index;
pub mod metadata;

use std::collections::BTreeMap;

use camino::Utf8Path;
use serde::Serialize;

use crate::error::{RegistryError, RegistryResult};
use crate::layout;
use crate::storage::RegistryStorage;

pub use self::index::{ChartVersion, IndexBuilder, IndexFile};
pub use self::metadata::{ChartMetadata, Dependency, extract_metadata};

/// All stored versions of one chart
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartGroup {
    /// Chart name
    pub name: String,
    /// Versions, newest first
    pub versions: Vec<ChartMetadata>,
}

/// Stores chart tarballs and keeps the index current.
#[derive(Debug, Clone)]
pub struct ChartService {
    storage: RegistryStorage,
    index: IndexBuilder,
}

impl ChartService {
    /// Charts in `storage`, with download URLs under `base_url`.
    pub fn new(storage: RegistryStorage, base_url: &str) -> Self {
        let index = IndexBuilder::new(storage.clone(), base_url);
        Self { storage, index }
    }

    /// The index builder behind this service.
    pub fn index(&self) -> &IndexBuilder {
        &self.index
    }

    /// Validate and store a chart tarball, then rebuild the index.
    ///
    /// The tarball is stored under the name and version from its
    /// `Chart.yaml`, whatever `filename` it was uploaded as. Re-uploading a
    /// version replaces it.
    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    pub async fn save_chart(&self, data: &[u8], filename: &str) -> RegistryResult<ChartMetadata> {
        if Utf8Path::new(filename).extension() != Some(layout::CHART_EXTENSION) {
            return Err(RegistryError::InvalidChart(format!(
                "{filename} is not a .{} file",
                layout::CHART_EXTENSION
            )));
        }

        let metadata = extract_metadata(data)?;
        let path = layout::chart(&metadata.name, &metadata.version);
        self.storage.write(&path, data).await?;
        tracing::info!(name = %metadata.name, version = %metadata.version, %path, "stored chart");

        self.index.rebuild().await?;
        Ok(metadata)
    }

    /// The tarball for one chart version.
    pub async fn get_chart(&self, name: &str, version: &str) -> RegistryResult<Vec<u8>> {
        let path = self.chart_path(name, version)?;
        self.storage
            .read(&path)
            .await
            .map_err(|err| RegistryError::not_found_or(err, || not_found(name, version)))
    }

    /// A tarball by the file name used in index URLs.
    pub async fn get_chart_file(&self, filename: &str) -> RegistryResult<Vec<u8>> {
        let missing = || RegistryError::ChartNotFound {
            name: filename.to_string(),
            version: String::new(),
        };

        let path = layout::chart_file(filename).ok_or_else(missing)?;
        self.storage
            .read(&path)
            .await
            .map_err(|err| RegistryError::not_found_or(err, missing))
    }

    /// Whether a chart version is stored.
    pub async fn chart_exists(&self, name: &str, version: &str) -> RegistryResult<bool> {
        match self.chart_path(name, version) {
            Ok(path) => self.storage.exists(&path).await,
            Err(_) => Ok(false),
        }
    }

    /// Metadata of one stored chart version.
    pub async fn chart_details(&self, name: &str, version: &str) -> RegistryResult<ChartMetadata> {
        let data = self.get_chart(name, version).await?;
        extract_metadata(&data)
    }

    /// Remove a chart version and rebuild the index.
    #[tracing::instrument(skip(self))]
    pub async fn delete_chart(&self, name: &str, version: &str) -> RegistryResult<()> {
        let path = self.chart_path(name, version)?;
        self.storage
            .remove(&path)
            .await
            .map_err(|err| RegistryError::not_found_or(err, || not_found(name, version)))?;
        tracing::info!(%path, "deleted chart");

        self.index.rebuild().await?;
        Ok(())
    }

    /// Every stored chart grouped by name, skipping unreadable tarballs.
    pub async fn list_charts(&self) -> RegistryResult<Vec<ChartGroup>> {
        let mut groups: BTreeMap<String, Vec<ChartMetadata>> = BTreeMap::new();
        for chart in self.index.scan().await? {
            groups
                .entry(chart.metadata.name.clone())
                .or_default()
                .push(chart.metadata);
        }

        Ok(groups
            .into_iter()
            .map(|(name, mut versions)| {
                versions.sort_by(|a, b| index::compare_versions(&b.version, &a.version));
                ChartGroup { name, versions }
            })
            .collect())
    }

    /// Versions stored for a chart name, newest first.
    pub async fn list_versions(&self, name: &str) -> RegistryResult<Vec<String>> {
        let index = self.index.build().await?;
        Ok(index
            .entries
            .get(name)
            .map(|versions| versions.iter().map(|v| v.version.clone()).collect())
            .unwrap_or_default())
    }

    /// Names of every stored chart.
    pub async fn chart_names(&self) -> RegistryResult<Vec<String>> {
        let index = self.index.build().await?;
        Ok(index.entries.into_keys().collect())
    }

    fn chart_path(&self, name: &str, version: &str) -> RegistryResult<camino::Utf8PathBuf> {
        if metadata::is_valid_name(name) && metadata::is_valid_version(version) {
            Ok(layout::chart(name, version))
        } else {
            Err(not_found(name, version))
        }
    }
}

fn not_found(name: &str, version: &str) -> RegistryError {
    RegistryError::ChartNotFound {
        name: name.to_string(),
        version: version.to_string(),
    }
}
