//! Reading `Chart.yaml` out of a packaged chart

use std::io::Read;
use std::path::{Component, Path};

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, RegistryResult};

const CHART_FILE: &str = "Chart.yaml";

/// A chart dependency as declared in `Chart.yaml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Dependency chart name
    pub name: String,
    /// Version constraint
    #[serde(default)]
    pub version: String,
    /// Repository URL
    #[serde(default)]
    pub repository: String,
}

/// Metadata from a chart's `Chart.yaml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// Chart name
    pub name: String,
    /// Chart version
    pub version: String,
    /// One line description
    #[serde(default)]
    pub description: String,
    /// Chart API version, `v1` or `v2`
    #[serde(default)]
    pub api_version: String,
    /// `application` or `library`
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub chart_type: String,
    /// Version of the packaged application
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_version: String,
    /// Declared dependencies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
}

fn invalid(err: impl std::fmt::Display) -> RegistryError {
    RegistryError::InvalidChart(err.to_string())
}

/// Whether a chart name can be used as a file name component.
pub(crate) fn is_valid_name(name: &str) -> bool {
    crate::digest::validate_repository(name).is_ok()
}

/// Versions allow semver build metadata as well as tag characters.
pub(crate) fn is_valid_version(version: &str) -> bool {
    !version.is_empty()
        && !version.contains("..")
        && version
            .bytes()
            .next()
            .is_some_and(|b| b.is_ascii_alphanumeric())
        && version
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-' | b'+'))
}

/// `Chart.yaml` at the archive root or one directory down.
fn is_chart_file(path: &Path) -> bool {
    let parts: Vec<_> = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();

    match parts.as_slice() {
        [Component::Normal(file)] => *file == CHART_FILE,
        [Component::Normal(_), Component::Normal(file)] => *file == CHART_FILE,
        _ => false,
    }
}

/// Parse the metadata of a gzipped chart tarball.
pub fn extract_metadata(archive: &[u8]) -> RegistryResult<ChartMetadata> {
    let mut archive = tar::Archive::new(GzDecoder::new(archive));

    for entry in archive.entries().map_err(invalid)? {
        let mut entry = entry.map_err(invalid)?;
        if !is_chart_file(&entry.path().map_err(invalid)?) {
            continue;
        }

        let mut contents = String::new();
        entry.read_to_string(&mut contents).map_err(invalid)?;

        let metadata: ChartMetadata = serde_yaml::from_str(&contents)
            .map_err(|err| RegistryError::InvalidChart(format!("{CHART_FILE}: {err}")))?;

        if !is_valid_name(&metadata.name) {
            return Err(RegistryError::InvalidChart(format!(
                "invalid chart name {:?}",
                metadata.name
            )));
        }
        if !is_valid_version(&metadata.version) {
            return Err(RegistryError::InvalidChart(format!(
                "invalid chart version {:?}",
                metadata.version
            )));
        }

        return Ok(metadata);
    }

    Err(RegistryError::InvalidChart(format!("no {CHART_FILE} in archive")))
}
