//! OCI manifest documents and what kind of artifact they describe

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, RegistryResult};

/// Config media type of a Helm chart pushed as an OCI artifact
pub const HELM_CONFIG_MEDIA_TYPE: &str = "application/vnd.cncf.helm.config.v1+json";

/// Layer media type holding the chart tarball
pub const HELM_CHART_LAYER_MEDIA_TYPE: &str = "application/vnd.cncf.helm.chart.content.v1.tar+gzip";

/// Config media types of container images
pub const IMAGE_CONFIG_MEDIA_TYPES: &[&str] = &[
    "application/vnd.oci.image.config.v1+json",
    "application/vnd.docker.container.image.v1+json",
];

/// Prefixes of container image layer media types
const IMAGE_LAYER_PREFIXES: &[&str] = &[
    "application/vnd.oci.image.layer.",
    "application/vnd.docker.image.rootfs.",
];

/// A reference to a blob from inside a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content
    #[serde(default)]
    pub media_type: String,
    /// Digest of the referenced content
    #[serde(default)]
    pub digest: String,
    /// Size in bytes
    #[serde(default)]
    pub size: u64,
}

/// An OCI image or artifact manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Always 2 for current manifests
    #[serde(default)]
    pub schema_version: u32,
    /// Manifest media type, when stated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Config descriptor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Descriptor>,
    /// Layer descriptors
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

impl Manifest {
    /// Parse a manifest document.
    pub fn parse(data: &[u8]) -> RegistryResult<Self> {
        serde_json::from_slice(data).map_err(|err| RegistryError::InvalidManifest(err.to_string()))
    }

    /// What this manifest describes.
    pub fn artifact_type(&self) -> ArtifactType {
        ArtifactType::classify(self)
    }

    /// The layer carrying a Helm chart tarball.
    pub fn chart_layer(&self) -> Option<&Descriptor> {
        self.layers
            .iter()
            .find(|layer| layer.media_type == HELM_CHART_LAYER_MEDIA_TYPE)
    }

    fn config_media_type(&self) -> Option<&str> {
        self.config.as_ref().map(|config| config.media_type.as_str())
    }

    fn has_container_media_types(&self) -> bool {
        let config = self
            .config_media_type()
            .is_some_and(|media_type| IMAGE_CONFIG_MEDIA_TYPES.contains(&media_type));
        let layers = self.layers.iter().any(|layer| {
            IMAGE_LAYER_PREFIXES
                .iter()
                .any(|prefix| layer.media_type.starts_with(prefix))
        });
        config || layers
    }
}

/// The kind of artifact a manifest describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactType {
    /// A Helm chart pushed with `helm push`
    HelmChart,
    /// A container image
    ContainerImage,
    /// Anything else
    Unknown,
}

impl ArtifactType {
    /// Classify a manifest from its config and layer media types.
    pub fn classify(manifest: &Manifest) -> Self {
        let config = manifest.config_media_type();

        if config == Some(HELM_CONFIG_MEDIA_TYPE) {
            return ArtifactType::HelmChart;
        }

        if config.is_some_and(|media_type| IMAGE_CONFIG_MEDIA_TYPES.contains(&media_type)) {
            return ArtifactType::ContainerImage;
        }

        if !manifest.has_container_media_types() && manifest.chart_layer().is_some() {
            return ArtifactType::HelmChart;
        }

        ArtifactType::Unknown
    }

    /// Name used in logs
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactType::HelmChart => "helm-chart",
            ArtifactType::ContainerImage => "container-image",
            ArtifactType::Unknown => "unknown",
        }
    }
}
