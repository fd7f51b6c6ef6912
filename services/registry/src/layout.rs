//! Where things live in the bucket.
//!
//! ```text
//! blobs/sha256/<hex>
//! uploads/<session>
//! manifests/<repository>/<reference>.json
//! images/<repository>/manifests/<reference>.json
//! charts/<name>-<version>.tgz
//! index.yaml
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use uuid::Uuid;

use crate::digest::{Digest, Reference};

pub(crate) const CHARTS: &str = "charts";
pub(crate) const INDEX: &str = "index.yaml";
pub(crate) const MANIFESTS: &str = "manifests";
pub(crate) const IMAGES: &str = "images";

const MANIFEST_EXTENSION: &str = "json";
pub(crate) const CHART_EXTENSION: &str = "tgz";

/// The two places a manifest can be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestArea {
    /// Helm chart and generic OCI artifact manifests
    Artifacts,
    /// Container image manifests
    Images,
}

impl ManifestArea {
    /// Lookup order for manifests addressed without an area.
    pub const ALL: [ManifestArea; 2] = [ManifestArea::Artifacts, ManifestArea::Images];

    /// Directory holding every manifest of `repository` in this area.
    pub(crate) fn directory(self, repository: &str) -> Utf8PathBuf {
        match self {
            ManifestArea::Artifacts => Utf8Path::new(MANIFESTS).join(repository),
            ManifestArea::Images => Utf8Path::new(IMAGES).join(repository).join(MANIFESTS),
        }
    }

    /// Recover the repository name from a listed path.
    pub(crate) fn repository_of(self, path: &str) -> Option<&str> {
        let mut parts = Utf8Path::new(path).components().map(|c| c.as_str());
        match self {
            ManifestArea::Artifacts => {
                let (root, repository, _file) = (parts.next()?, parts.next()?, parts.next()?);
                (root == MANIFESTS && parts.next().is_none()).then_some(repository)
            }
            ManifestArea::Images => {
                let (root, repository, manifests, _file) =
                    (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
                (root == IMAGES && manifests == MANIFESTS && parts.next().is_none())
                    .then_some(repository)
            }
        }
    }

    /// Root of this area, for listing repositories.
    pub(crate) fn root(self) -> &'static Utf8Path {
        match self {
            ManifestArea::Artifacts => Utf8Path::new(MANIFESTS),
            ManifestArea::Images => Utf8Path::new(IMAGES),
        }
    }
}

pub(crate) fn blob(digest: &Digest) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("blobs/{}/{}", Digest::ALGORITHM, digest.hex()))
}

pub(crate) fn upload(session: &Uuid) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("uploads/{session}"))
}

pub(crate) fn manifest(area: ManifestArea, repository: &str, reference: &Reference) -> Utf8PathBuf {
    area.directory(repository)
        .join(format!("{reference}.{MANIFEST_EXTENSION}"))
}

/// The reference a manifest file was stored under, if `path` is a manifest file.
pub(crate) fn manifest_reference(path: &Utf8Path) -> Option<&str> {
    (path.extension() == Some(MANIFEST_EXTENSION))
        .then(|| path.file_stem())
        .flatten()
}

pub(crate) fn chart_filename(name: &str, version: &str) -> String {
    format!("{name}-{version}.{CHART_EXTENSION}")
}

pub(crate) fn chart(name: &str, version: &str) -> Utf8PathBuf {
    Utf8Path::new(CHARTS).join(chart_filename(name, version))
}

/// A chart tarball by file name, if the name is a plain `.tgz` file name.
pub(crate) fn chart_file(filename: &str) -> Option<Utf8PathBuf> {
    let plain = !filename.is_empty()
        && !filename.starts_with('.')
        && !filename.contains(['/', '\\'])
        && Utf8Path::new(filename).extension() == Some(CHART_EXTENSION);
    plain.then(|| Utf8Path::new(CHARTS).join(filename))
}

pub(crate) fn index() -> &'static Utf8Path {
    Utf8Path::new(INDEX)
}
