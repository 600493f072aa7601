//! Remote store trait definition and error types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a remote store.
///
/// The variants split into three classes that drive retry decisions:
/// - retryable within a budget: `TransientNetwork`, `Timeout`
/// - fatal, never retried: `RateLimited`, `Forbidden`
/// - semantic, handled by the caller: everything else
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Not found: {path}")]
    NotFound { path: String },

    #[error("Already exists: {path}")]
    AlreadyExists { path: String },

    #[error("Version conflict for {path}: expected {expected}")]
    VersionConflict { path: String, expected: String },

    #[error("Rate limited by remote store")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Transient network error: {message}")]
    TransientNetwork { message: String },

    #[error("Timed out during {operation}")]
    Timeout { operation: String },

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Whether the error may go away on its own and the call can be repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::TransientNetwork { .. } | StoreError::Timeout { .. }
        )
    }

    /// Authorization and rate-limit errors. These stop any retry loop immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::RateLimited { .. } | StoreError::Forbidden { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Classify an HTTP-style status code from a contents API response.
    ///
    /// `path` names the resource the request targeted. Unknown 4xx codes map to
    /// `Forbidden` so they are never retried; unknown 5xx codes are transient.
    pub fn from_status(status: u16, path: &str, message: &str) -> Self {
        match status {
            404 => StoreError::NotFound {
                path: path.to_string(),
            },
            409 | 412 => StoreError::VersionConflict {
                path: path.to_string(),
                expected: message.to_string(),
            },
            // Contents APIs answer 422 when a create omits the revision of an existing file
            422 => StoreError::AlreadyExists {
                path: path.to_string(),
            },
            429 => StoreError::RateLimited { retry_after: None },
            408 | 504 => StoreError::Timeout {
                operation: format!("request for {}", path),
            },
            401 | 403 => StoreError::Forbidden {
                message: message.to_string(),
            },
            500..=599 => StoreError::TransientNetwork {
                message: format!("{}: {}", status, message),
            },
            _ => StoreError::Forbidden {
                message: format!("unexpected status {}: {}", status, message),
            },
        }
    }
}

/// Opaque revision identifier of the bytes stored at a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a commit in the store's history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryKind {
    File,
    Dir,
}

/// Directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// File or directory name (not full path)
    pub name: String,
    /// Full path from the store root
    pub path: String,
    /// Revision of the file bytes (directories carry the token of their tree)
    pub version_token: VersionToken,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// File contents together with the revision they were read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub content: String,
    pub version_token: VersionToken,
}

/// An immutable entry of the store's commit history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRecord {
    pub version_id: CommitId,
    pub message: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    /// Path the document occupied at this commit, when the store reports it
    pub historical_path: Option<String>,
}

/// Abstract contract of the hosted, version-controlled content store.
///
/// Every call may fail transiently. Implementations are not expected to offer
/// read-after-write consistency for directory listings: a write can take an
/// unbounded (but finite) time to show up in `list_directory`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List a folder. Fails with `NotFound` when the folder does not exist (yet).
    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>>;

    /// Read a file and the revision it was read at.
    async fn read_file(&self, path: &str) -> Result<FileContent>;

    /// Write a whole file.
    ///
    /// With `base_version`, the write only succeeds if it is still the current
    /// revision (`VersionConflict` otherwise). Without it the write is a create;
    /// stores that need the current revision to overwrite answer `AlreadyExists`.
    async fn write_file(
        &self,
        path: &str,
        content: &str,
        message: &str,
        base_version: Option<&VersionToken>,
    ) -> Result<VersionToken>;

    /// Delete a file if `version_token` is still its current revision.
    async fn delete_file(&self, path: &str, version_token: &VersionToken, message: &str)
    -> Result<()>;

    /// Commits that touched `path`, most recent first.
    async fn list_commits(&self, path: &str) -> Result<Vec<CommitRecord>>;

    /// Content of the file at exactly `path` as of commit `version_id`.
    async fn read_file_at_commit(&self, path: &str, version_id: &CommitId) -> Result<String>;

    /// Folder listing as of commit `version_id`.
    async fn list_directory_at(&self, path: &str, version_id: &CommitId) -> Result<Vec<DirEntry>>;
}

// Allows sharing one store between an engine, a reconstructor and test code
#[async_trait]
impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>> {
        (**self).list_directory(path).await
    }

    async fn read_file(&self, path: &str) -> Result<FileContent> {
        (**self).read_file(path).await
    }

    async fn write_file(
        &self,
        path: &str,
        content: &str,
        message: &str,
        base_version: Option<&VersionToken>,
    ) -> Result<VersionToken> {
        (**self)
            .write_file(path, content, message, base_version)
            .await
    }

    async fn delete_file(
        &self,
        path: &str,
        version_token: &VersionToken,
        message: &str,
    ) -> Result<()> {
        (**self).delete_file(path, version_token, message).await
    }

    async fn list_commits(&self, path: &str) -> Result<Vec<CommitRecord>> {
        (**self).list_commits(path).await
    }

    async fn read_file_at_commit(&self, path: &str, version_id: &CommitId) -> Result<String> {
        (**self).read_file_at_commit(path, version_id).await
    }

    async fn list_directory_at(&self, path: &str, version_id: &CommitId) -> Result<Vec<DirEntry>> {
        (**self).list_directory_at(path, version_id).await
    }
}
