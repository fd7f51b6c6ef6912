//! The Helm repository `index.yaml`

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::metadata::{ChartMetadata, extract_metadata};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::layout;
use crate::storage::RegistryStorage;

/// The published catalog of charts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexFile {
    /// Always `v1`
    pub api_version: String,
    /// When this index was built
    pub generated: DateTime<Utc>,
    /// Chart name to versions, newest first
    pub entries: BTreeMap<String, Vec<ChartVersion>>,
}

/// One chart version in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartVersion {
    /// Chart name
    pub name: String,
    /// Chart version
    pub version: String,
    /// One-line description from `Chart.yaml`
    #[serde(default)]
    pub description: String,
    /// Version of the packaged application
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_version: String,
    /// Chart API version, `v1` or `v2`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    /// When the tarball was stored
    pub created: DateTime<Utc>,
    /// Hex SHA-256 of the tarball
    pub digest: String,
    /// Download locations
    pub urls: Vec<String>,
}

/// A readable chart tarball found in storage
#[derive(Debug, Clone)]
pub(crate) struct ScannedChart {
    pub(crate) metadata: ChartMetadata,
    pub(crate) entry: ChartVersion,
}

/// Compare chart versions numerically where both sides are numbers.
pub(crate) fn compare_versions(a: &str, b: &str) -> Ordering {
    let split = |v: &str| -> Vec<String> { v.split(['.', '-', '+']).map(str::to_owned).collect() };
    let (a, b) = (split(a), split(b));

    for (x, y) in a.iter().zip(&b) {
        let order = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => x.cmp(y),
        };
        if order != Ordering::Equal {
            return order;
        }
    }
    a.len().cmp(&b.len())
}

/// Rebuilds `index.yaml` from the chart tarballs in storage.
///
/// Rebuilds are serialized: two concurrent rebuilds run one after the other,
/// and each writes a complete index.
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    storage: RegistryStorage,
    base_url: Arc<str>,
    lock: Arc<Mutex<()>>,
}

impl IndexBuilder {
    /// Chart URLs are `{base_url}/charts/{file}`.
    pub fn new(storage: RegistryStorage, base_url: &str) -> Self {
        Self {
            storage,
            base_url: base_url.trim_end_matches('/').into(),
            lock: Default::default(),
        }
    }

    /// Read every chart tarball once.
    ///
    /// Tarballs which cannot be read or parsed are skipped with a warning.
    pub(crate) async fn scan(&self) -> RegistryResult<Vec<ScannedChart>> {
        let mut charts = Vec::new();

        for path in self.storage.list(Utf8Path::new(layout::CHARTS)).await? {
            let path = Utf8Path::new(&path);
            let Some(filename) = chart_filename(path) else {
                continue;
            };

            let data = match self.storage.read(path).await {
                Ok(data) => data,
                Err(error) => {
                    tracing::warn!(%path, %error, "skipping unreadable chart");
                    continue;
                }
            };

            let metadata = match extract_metadata(&data) {
                Ok(metadata) => metadata,
                Err(error) => {
                    tracing::warn!(%path, %error, "skipping corrupt chart");
                    continue;
                }
            };

            let created = match self.storage.metadata(path).await {
                Ok(stored) => stored.created,
                Err(error) => {
                    tracing::warn!(%path, %error, "chart vanished during index build");
                    continue;
                }
            };

            let digest = Digest::of(&data);
            tracing::trace!(name = %metadata.name, version = %metadata.version, digest = %digest, "indexed chart");

            let entry = ChartVersion {
                name: metadata.name.clone(),
                version: metadata.version.clone(),
                description: metadata.description.clone(),
                app_version: metadata.app_version.clone(),
                api_version: metadata.api_version.clone(),
                created,
                digest: digest.hex().to_string(),
                urls: vec![format!("{}/{}/{}", self.base_url, layout::CHARTS, filename)],
            };
            charts.push(ScannedChart { metadata, entry });
        }

        Ok(charts)
    }

    /// Build the index from the current charts without writing it.
    ///
    /// Tarballs which cannot be read or parsed are skipped with a warning.
    pub async fn build(&self) -> RegistryResult<IndexFile> {
        let mut entries: BTreeMap<String, Vec<ChartVersion>> = BTreeMap::new();
        for chart in self.scan().await? {
            entries
                .entry(chart.entry.name.clone())
                .or_default()
                .push(chart.entry);
        }

        for versions in entries.values_mut() {
            versions.sort_by(|a, b| compare_versions(&b.version, &a.version));
        }

        Ok(IndexFile {
            api_version: "v1".into(),
            generated: Utc::now(),
            entries,
        })
    }

    /// Rebuild and overwrite `index.yaml`, returning what was written.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild(&self) -> RegistryResult<Vec<u8>> {
        let _guard = self.lock.lock().await;

        let index = self.build().await?;
        let yaml = serde_yaml::to_string(&index)
            .map_err(|err| RegistryError::Internal(format!("serializing index: {err}")))?;

        self.storage.write(layout::index(), yaml.as_bytes()).await?;
        tracing::info!(charts = index.entries.len(), "rebuilt index");
        Ok(yaml.into_bytes())
    }

    /// The current `index.yaml`, building it first if it was never written.
    pub async fn load_or_rebuild(&self) -> RegistryResult<Vec<u8>> {
        match self.storage.read_optional(layout::index()).await? {
            Some(data) => Ok(data),
            None => self.rebuild().await,
        }
    }
}

fn chart_filename(path: &Utf8Path) -> Option<&str> {
    let in_charts = path.parent() == Some(Utf8Path::new(layout::CHARTS));
    let is_tarball = path.extension() == Some(layout::CHART_EXTENSION);
    (in_charts && is_tarball).then(|| path.file_name()).flatten()
}
