use std::collections::{BTreeMap, HashMap};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tokio::{io::AsyncWriteExt, sync::RwLock};

use storage_driver::{Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer};

#[derive(Debug)]
struct MemoryFileItem {
    created: DateTime<Utc>,
    data: Vec<u8>,
}

impl AsRef<[u8]> for MemoryFileItem {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for MemoryFileItem {
    fn from(data: Vec<u8>) -> Self {
        Self {
            created: Utc::now(),
            data,
        }
    }
}

impl From<&MemoryFileItem> for Metadata {
    fn from(value: &MemoryFileItem) -> Self {
        Self {
            created: value.created,
            size: value.data.len() as u64,
        }
    }
}

type Bucket = BTreeMap<Utf8PathBuf, MemoryFileItem>;

/// Storage driver that stores files in memory.
///
/// Buckets are created on first write. Useful for tests and throwaway servers.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl MemoryStorage {
    /// Create a new `MemoryStorage` instance, with no buckets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new `MemoryStorage` instance, with the given buckets.
    pub fn with_buckets(buckets: &[&str]) -> Self {
        let map = buckets
            .iter()
            .map(|bucket| (bucket.to_string(), Bucket::new()))
            .collect();

        Self {
            buckets: RwLock::new(map),
        }
    }

    fn not_found(&self, bucket: &str, remote: &Utf8Path) -> StorageError {
        StorageError::builder(
            self.name(),
            StorageErrorKind::NotFound,
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Path not found: {remote}"),
            ),
        )
        .bucket(bucket)
        .path(remote.as_str())
        .build()
    }

    fn io_error(&self, bucket: &str, remote: &Utf8Path, err: std::io::Error) -> StorageError {
        StorageError::io(self.name(), err)
            .bucket(bucket)
            .path(remote.as_str())
            .build()
    }
}

#[async_trait::async_trait]
impl Driver for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let buckets = self.buckets.read().await;
        buckets
            .get(bucket)
            .and_then(|files| files.get(remote))
            .map(Metadata::from)
            .ok_or_else(|| self.not_found(bucket, remote))
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        buckets
            .get_mut(bucket)
            .and_then(|files| files.remove(remote))
            .map(|_| ())
            .ok_or_else(|| self.not_found(bucket, remote))
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let mut buf = Vec::new();

        tokio::io::copy(local, &mut buf)
            .await
            .map_err(|err| self.io_error(bucket, remote, err))?;

        let mut buckets = self.buckets.write().await;
        let files = buckets.entry(bucket.to_string()).or_default();
        files.insert(remote.to_owned(), buf.into());

        Ok(())
    }

    async fn append(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<u64, StorageError> {
        let mut buf = Vec::new();

        tokio::io::copy(local, &mut buf)
            .await
            .map_err(|err| self.io_error(bucket, remote, err))?;

        let mut buckets = self.buckets.write().await;
        let item = buckets
            .entry(bucket.to_string())
            .or_default()
            .entry(remote.to_owned())
            .or_insert_with(|| Vec::new().into());
        item.data.extend_from_slice(&buf);

        Ok(item.data.len() as u64)
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let buckets = self.buckets.read().await;
        let mut buf = buckets
            .get(bucket)
            .and_then(|files| files.get(remote))
            .ok_or_else(|| self.not_found(bucket, remote))?
            .as_ref();

        tokio::io::copy(&mut buf, local)
            .await
            .map_err(|err| self.io_error(bucket, remote, err))?;

        local
            .flush()
            .await
            .map_err(|err| self.io_error(bucket, remote, err))?;

        Ok(())
    }

    async fn rename(
        &self,
        bucket: &str,
        from: &Utf8Path,
        to: &Utf8Path,
    ) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        let files = buckets
            .get_mut(bucket)
            .ok_or_else(|| self.not_found(bucket, from))?;
        let item = files
            .remove(from)
            .ok_or_else(|| self.not_found(bucket, from))?;
        files.insert(to.to_owned(), item);
        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        tracing::trace!(%bucket, ?prefix, "list memory bucket");

        let buckets = self.buckets.read().await;
        let Some(files) = buckets.get(bucket) else {
            return Ok(Vec::new());
        };

        Ok(files
            .keys()
            .filter(|path| prefix.map_or(true, |prefix| path.starts_with(prefix)))
            .map(|path| path.to_string())
            .collect())
    }
}
