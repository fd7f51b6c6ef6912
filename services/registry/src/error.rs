//! Error types for the registry

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error types for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Blob not found
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// Manifest not found
    #[error("manifest not found: {0}")]
    ManifestNotFound(String),

    /// Chart not found
    #[error("chart not found: {name}-{version}")]
    ChartNotFound {
        /// Chart name
        name: String,
        /// Chart version
        version: String,
    },

    /// Upload session not found
    #[error("upload not found: {0}")]
    UploadNotFound(String),

    /// Invalid digest format
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// Invalid tag or reference
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// Invalid repository name
    #[error("invalid repository name: {0}")]
    InvalidRepository(String),

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// The uploaded chart could not be read
    #[error("invalid chart: {0}")]
    InvalidChart(String),

    /// Blob upload invalid
    #[error("blob upload invalid: {0}")]
    BlobUploadInvalid(String),

    /// A manifest references a blob which was never uploaded
    #[error("manifest references unknown blob: {0}")]
    ManifestBlobUnknown(String),

    /// Digest mismatch
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Expected digest
        expected: String,
        /// Actual digest
        actual: String,
    },

    /// Upload session is not accepting this operation
    #[error("upload {upload} is {state}")]
    UploadConflict {
        /// Upload session id
        upload: String,
        /// Current session state
        state: &'static str,
    },

    /// Range not satisfiable
    #[error("range not satisfiable: expected chunk at offset {expected}")]
    RangeNotSatisfiable {
        /// Bytes received so far
        expected: u64,
    },

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),

    /// Internal failure which is not a storage error
    #[error("internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::BlobNotFound(_)
            | RegistryError::ManifestNotFound(_)
            | RegistryError::ChartNotFound { .. }
            | RegistryError::UploadNotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::InvalidDigest(_)
            | RegistryError::InvalidReference(_)
            | RegistryError::InvalidRepository(_)
            | RegistryError::InvalidManifest(_)
            | RegistryError::InvalidChart(_)
            | RegistryError::BlobUploadInvalid(_)
            | RegistryError::ManifestBlobUnknown(_)
            | RegistryError::DigestMismatch { .. } => StatusCode::BAD_REQUEST,
            RegistryError::UploadConflict { .. } => StatusCode::CONFLICT,
            RegistryError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            RegistryError::Storage(_) | RegistryError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get the error code for OCI error responses
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::BlobNotFound(_) => "BLOB_UNKNOWN",
            RegistryError::ManifestNotFound(_) | RegistryError::ChartNotFound { .. } => {
                "MANIFEST_UNKNOWN"
            }
            RegistryError::UploadNotFound(_) | RegistryError::UploadConflict { .. } => {
                "BLOB_UPLOAD_UNKNOWN"
            }
            RegistryError::InvalidDigest(_) | RegistryError::DigestMismatch { .. } => {
                "DIGEST_INVALID"
            }
            RegistryError::InvalidReference(_) => "TAG_INVALID",
            RegistryError::InvalidRepository(_) => "NAME_INVALID",
            RegistryError::InvalidManifest(_) | RegistryError::InvalidChart(_) => {
                "MANIFEST_INVALID"
            }
            RegistryError::ManifestBlobUnknown(_) => "MANIFEST_BLOB_UNKNOWN",
            RegistryError::BlobUploadInvalid(_) | RegistryError::RangeNotSatisfiable { .. } => {
                "BLOB_UPLOAD_INVALID"
            }
            RegistryError::Storage(_) | RegistryError::Internal(_) => "UNKNOWN",
        }
    }

    pub(crate) fn not_found_or(
        err: storage::StorageError,
        missing: impl FnOnce() -> RegistryError,
    ) -> RegistryError {
        if err.is_not_found() {
            missing()
        } else {
            err.into()
        }
    }
}

/// OCI error response format
#[derive(Debug, serde::Serialize)]
pub(crate) struct ErrorResponse {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl ErrorResponse {
    pub(crate) fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            errors: vec![ErrorDetail {
                code,
                message: message.into(),
            }],
        }
    }
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }

        let body = ErrorResponse::new(self.error_code(), self.to_string());
        (status, axum::Json(body)).into_response()
    }
}
