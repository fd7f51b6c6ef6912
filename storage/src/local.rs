use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use eyre::WrapErr;
use tokio::io::{self, AsyncWriteExt};
use tracing::Instrument;

use storage_driver::{Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer};

/// Suffix for in-flight uploads, which are renamed into place once complete.
const PARTIAL_SUFFIX: &str = ".partial";

/// Storage driver backed by a directory on the local filesystem.
///
/// Each bucket is a subdirectory of the root. Uploads are written to a hidden
/// sibling file and renamed over the destination, so readers never observe a
/// partially written object.
#[derive(Debug)]
pub struct LocalDriver {
    root: Utf8PathBuf,
}

impl LocalDriver {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    /// The directory holding all buckets.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn bucket_root(&self, bucket: &str) -> Utf8PathBuf {
        self.root.join(bucket)
    }

    fn path(&self, bucket: &str, remote: &Utf8Path) -> Result<Utf8PathBuf, StorageError> {
        let escapes = remote
            .components()
            .any(|c| !matches!(c, Utf8Component::Normal(_) | Utf8Component::CurDir));
        if escapes || remote.as_str().is_empty() {
            return Err(StorageError::builder(
                self.name(),
                StorageErrorKind::InvalidRequest,
                format!("path must be relative to the bucket: {remote}"),
            )
            .bucket(bucket)
            .path(remote.as_str())
            .build());
        }

        Ok(self.bucket_root(bucket).join(remote))
    }

    fn io_error(&self, bucket: &str, remote: &Utf8Path, context: &str, err: io::Error) -> StorageError {
        StorageError::io(self.name(), err)
            .bucket(bucket)
            .path(remote.as_str())
            .context(context)
            .build()
    }

    async fn create_parent(&self, bucket: &str, remote: &Utf8Path, path: &Utf8Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| self.io_error(bucket, remote, "create_dir_all", err))?;
        }
        Ok(())
    }
}

fn partial_path(path: &Utf8Path) -> Utf8PathBuf {
    let name = path.file_name().unwrap_or("object");
    path.with_file_name(format!(
        ".{name}.{}{PARTIAL_SUFFIX}",
        uuid::Uuid::new_v4().simple()
    ))
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let path = self.path(bucket, remote)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|err| self.io_error(bucket, remote, "metadata", err))?;

        if !metadata.is_file() {
            return Err(StorageError::builder(
                self.name(),
                StorageErrorKind::NotFound,
                format!("not a file: {remote}"),
            )
            .bucket(bucket)
            .path(remote.as_str())
            .build());
        }

        // Not every filesystem records a birth time.
        let created = metadata
            .created()
            .or_else(|_| metadata.modified())
            .map_err(|err| self.io_error(bucket, remote, "timestamp", err))?;

        Ok(Metadata {
            size: metadata.len(),
            created: created.into(),
        })
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let path = self.path(bucket, remote)?;
        tokio::fs::remove_file(path)
            .await
            .map_err(|err| self.io_error(bucket, remote, "remove_file", err))?;
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote)?;
        self.create_parent(bucket, remote, &path).await?;

        let partial = partial_path(&path);
        let written: io::Result<()> = async {
            let mut writer = io::BufWriter::new(tokio::fs::File::create(&partial).await?);
            io::copy(local, &mut writer).await?;
            writer.shutdown().await?;
            tokio::fs::rename(&partial, &path).await
        }
        .await;

        if let Err(err) = written {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(self.io_error(bucket, remote, "write", err));
        }

        Ok(())
    }

    async fn append(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<u64, StorageError> {
        let path = self.path(bucket, remote)?;
        self.create_parent(bucket, remote, &path).await?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|err| self.io_error(bucket, remote, "open for append", err))?;

        io::copy(local, &mut file)
            .await
            .map_err(|err| self.io_error(bucket, remote, "append", err))?;
        file.flush()
            .await
            .map_err(|err| self.io_error(bucket, remote, "flush", err))?;

        let metadata = file
            .metadata()
            .await
            .map_err(|err| self.io_error(bucket, remote, "metadata", err))?;
        Ok(metadata.len())
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote)?;

        let mut reader = io::BufReader::new(
            tokio::fs::File::open(&path)
                .await
                .map_err(|err| self.io_error(bucket, remote, "open remote file", err))?,
        );

        io::copy(&mut reader, local)
            .await
            .map_err(|err| self.io_error(bucket, remote, "copy", err))?;

        local
            .flush()
            .await
            .map_err(|err| self.io_error(bucket, remote, "flush writer", err))?;

        Ok(())
    }

    async fn rename(
        &self,
        bucket: &str,
        from: &Utf8Path,
        to: &Utf8Path,
    ) -> Result<(), StorageError> {
        let source = self.path(bucket, from)?;
        let target = self.path(bucket, to)?;

        self.create_parent(bucket, to, &target).await?;
        tokio::fs::rename(&source, &target)
            .await
            .map_err(|err| self.io_error(bucket, from, "rename", err))?;
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        let base = self.bucket_root(bucket);
        let start = match prefix {
            Some(prefix) => self.path(bucket, prefix)?,
            None => base.clone(),
        };

        let items = tokio::task::spawn_blocking(move || collect_list(&base, &start))
            .in_current_span()
            .await
            .wrap_err("local driver: list task")
            .map_err(StorageError::with(self.name(), StorageErrorKind::Other))?
            .map_err(StorageError::with(self.name(), StorageErrorKind::Io))?;

        tracing::debug!("Found {} entries", items.len());
        Ok(items)
    }
}

#[tracing::instrument]
fn collect_list(base: &Utf8Path, start: &Utf8Path) -> eyre::Result<Vec<String>> {
    let mut files = Vec::new();
    if start.is_dir() {
        visit(start, &mut files).wrap_err_with(|| format!("walking {start}"))?;
    }

    let mut items: Vec<String> = files
        .into_iter()
        .filter_map(|p| p.strip_prefix(base).ok().map(|p| p.as_str().to_owned()))
        .collect();
    items.sort();
    Ok(items)
}

fn visit(path: &Utf8Path, files: &mut Vec<Utf8PathBuf>) -> eyre::Result<()> {
    for entry in path.read_dir_utf8()? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            visit(entry.path(), files)?;
        } else if !entry.file_name().ends_with(PARTIAL_SUFFIX) {
            files.push(entry.path().to_owned())
        }
    }

    Ok(())
}
