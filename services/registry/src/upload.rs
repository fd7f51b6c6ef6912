//! Chunked blob upload sessions
//!
//! A session moves `Initiated -> Accumulating -> Finalized`, or to `Aborted`
//! when cancelled or swept after sitting idle. Chunks are appended in order
//! and hashed as they arrive, so finalizing only compares digests.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest as _, Sha256};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::layout;
use crate::storage::RegistryStorage;

/// Lifecycle state of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Created, no bytes received
    Initiated,
    /// At least one chunk received
    Accumulating,
    /// Committed to the blob store
    Finalized,
    /// Cancelled or expired
    Aborted,
}

impl UploadState {
    fn is_open(self) -> bool {
        matches!(self, UploadState::Initiated | UploadState::Accumulating)
    }

    fn as_str(self) -> &'static str {
        match self {
            UploadState::Initiated => "initiated",
            UploadState::Accumulating => "accumulating",
            UploadState::Finalized => "finalized",
            UploadState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of an upload, as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadStatus {
    /// Current state
    pub state: UploadState,
    /// Bytes staged so far
    pub received: u64,
}

#[derive(Debug)]
struct UploadSession {
    state: UploadState,
    received: u64,
    hasher: Sha256,
    /// Digest of a finalize tail which was staged but never committed
    staged_tail: Option<Digest>,
    last_activity: Instant,
}

impl UploadSession {
    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn status(&self) -> UploadStatus {
        UploadStatus {
            state: self.state,
            received: self.received,
        }
    }
}

#[derive(Debug, Clone)]
struct SessionHandle {
    repository: Arc<str>,
    session: Arc<Mutex<UploadSession>>,
}

/// All in-flight upload sessions.
///
/// Session bookkeeping lives in memory. Staged bytes live in storage under
/// `uploads/<id>`. Each session is guarded by its own lock, so a chunk append
/// and a finalize on the same session never interleave.
#[derive(Debug, Clone)]
pub struct UploadSessions {
    storage: RegistryStorage,
    sessions: Arc<DashMap<Uuid, SessionHandle>>,
}

impl UploadSessions {
    /// Create an empty session table
    pub fn new(storage: RegistryStorage) -> Self {
        Self {
            storage,
            sessions: Default::default(),
        }
    }

    /// Number of sessions still tracked, in any state
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are tracked
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Start a new session for `repository`.
    pub fn initiate(&self, repository: &str) -> Uuid {
        let id = Uuid::new_v4();
        let session = UploadSession {
            state: UploadState::Initiated,
            received: 0,
            hasher: Sha256::new(),
            staged_tail: None,
            last_activity: Instant::now(),
        };
        self.sessions.insert(
            id,
            SessionHandle {
                repository: repository.into(),
                session: Arc::new(Mutex::new(session)),
            },
        );
        tracing::debug!(upload = %id, %repository, "upload initiated");
        id
    }

    fn open(&self, repository: &str, id: &Uuid) -> RegistryResult<Arc<Mutex<UploadSession>>> {
        self.sessions
            .get(id)
            .filter(|entry| &*entry.repository == repository)
            .map(|entry| entry.session.clone())
            .ok_or_else(|| RegistryError::UploadNotFound(id.to_string()))
    }

    /// Append a chunk, returning the total bytes staged.
    ///
    /// When the client states where the chunk starts, it must start exactly
    /// where the previous chunk ended.
    #[tracing::instrument(skip(self, chunk), fields(size = chunk.len()))]
    pub async fn append(
        &self,
        repository: &str,
        id: &Uuid,
        chunk: &[u8],
        start: Option<u64>,
    ) -> RegistryResult<u64> {
        let handle = self.open(repository, id)?;
        let mut session = handle.lock().await;

        if !session.state.is_open() {
            return Err(RegistryError::UploadConflict {
                upload: id.to_string(),
                state: session.state.as_str(),
            });
        }

        if chunk.is_empty() {
            return Err(RegistryError::BlobUploadInvalid("empty chunk".into()));
        }

        if let Some(start) = start {
            if start != session.received {
                return Err(RegistryError::RangeNotSatisfiable {
                    expected: session.received,
                });
            }
        }

        let total = self.storage.append(&layout::upload(id), chunk).await?;
        session.hasher.update(chunk);
        session.staged_tail = None;
        session.received = total;
        session.state = UploadState::Accumulating;
        session.touch();

        tracing::debug!(total, "chunk staged");
        Ok(total)
    }

    /// Current progress of a session.
    pub async fn status(&self, repository: &str, id: &Uuid) -> RegistryResult<UploadStatus> {
        let handle = self.open(repository, id)?;
        let session = handle.lock().await;
        Ok(session.status())
    }

    /// Commit the session's bytes to the blob store under `declared`.
    ///
    /// A non-empty `tail` is appended first. The digest of everything staged
    /// must equal `declared`; on mismatch nothing is written and the session
    /// stays open for another attempt.
    #[tracing::instrument(skip(self, tail), fields(tail = tail.len()))]
    pub async fn finalize(
        &self,
        repository: &str,
        id: &Uuid,
        declared: Option<&str>,
        tail: &[u8],
    ) -> RegistryResult<Digest> {
        let conflict = |state: &'static str| RegistryError::UploadConflict {
            upload: id.to_string(),
            state,
        };

        let handle = self.open(repository, id).map_err(|err| match err {
            RegistryError::UploadNotFound(_) => conflict("unknown"),
            other => other,
        })?;
        let mut session = handle.lock().await;

        if !session.state.is_open() {
            return Err(conflict(session.state.as_str()));
        }

        let declared = declared
            .ok_or_else(|| RegistryError::BlobUploadInvalid("missing digest parameter".into()))
            .and_then(Digest::parse)?;

        // A retry after a failed commit resends a tail that is already staged.
        let tail_digest = (!tail.is_empty()).then(|| Digest::of(tail));
        let tail = if tail_digest.is_some() && tail_digest == session.staged_tail {
            &[][..]
        } else {
            tail
        };

        let mut hasher = session.hasher.clone();
        hasher.update(tail);
        let actual = Digest::from_hasher(hasher);
        if actual != declared {
            return Err(RegistryError::DigestMismatch {
                expected: declared.to_string(),
                actual: actual.to_string(),
            });
        }

        let staged = layout::upload(id);
        if !tail.is_empty() {
            session.received = self.storage.append(&staged, tail).await?;
            session.hasher.update(tail);
            session.staged_tail = tail_digest;
            session.state = UploadState::Accumulating;
        }

        self.storage.commit_blob(&staged, &actual).await?;
        session.staged_tail = None;
        session.state = UploadState::Finalized;
        session.touch();

        tracing::info!(digest = %actual, size = session.received, "upload finalized");
        Ok(actual)
    }

    /// Cancel a session and discard its staged bytes.
    pub async fn abort(&self, repository: &str, id: &Uuid) -> RegistryResult<()> {
        let handle = self.open(repository, id)?;
        let mut session = handle.lock().await;

        if !session.state.is_open() {
            return Err(RegistryError::UploadConflict {
                upload: id.to_string(),
                state: session.state.as_str(),
            });
        }

        self.discard(id).await?;
        session.state = UploadState::Aborted;
        session.touch();
        tracing::debug!(upload = %id, "upload aborted");
        Ok(())
    }

    /// Forget sessions idle for at least `ttl`, discarding staged bytes of
    /// sessions which never finished. Returns how many were removed.
    ///
    /// Sessions busy with a request are skipped.
    pub async fn sweep_expired(&self, ttl: Duration) -> usize {
        let candidates: Vec<(Uuid, Arc<Mutex<UploadSession>>)> = self
            .sessions
            .iter()
            .map(|entry| (*entry.key(), entry.session.clone()))
            .collect();

        let mut removed = 0;
        for (id, handle) in candidates {
            let Ok(mut session) = handle.try_lock() else {
                continue;
            };
            if session.last_activity.elapsed() < ttl {
                continue;
            }

            if session.state.is_open() {
                if let Err(error) = self.discard(&id).await {
                    tracing::warn!(upload = %id, %error, "failed to discard expired upload");
                    continue;
                }
                session.state = UploadState::Aborted;
            }

            self.sessions.remove(&id);
            removed += 1;
        }

        if removed > 0 {
            tracing::info!(removed, "swept expired uploads");
        }
        removed
    }

    async fn discard(&self, id: &Uuid) -> RegistryResult<()> {
        match self.storage.remove(&layout::upload(id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
