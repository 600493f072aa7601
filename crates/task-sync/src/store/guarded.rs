//! Per-call timeout and transient-error retry around any `RemoteStore`.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::traits::{CommitId, CommitRecord, DirEntry, FileContent, RemoteStore, Result, VersionToken};
use crate::retry::{RetryPolicy, timed, with_retry};

/// Wraps a store so that every call runs under `timeout` and is retried on
/// `TransientNetwork` and `Timeout` within `policy`.
///
/// Conditional writes and deletes are retried as well: a retried write that
/// already landed comes back as `VersionConflict` or `AlreadyExists`, which the
/// engine handles like any other conflict.
pub struct GuardedStore<S: ?Sized> {
    inner: Arc<S>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl<S: ?Sized> Clone for GuardedStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            policy: self.policy.clone(),
            timeout: self.timeout,
        }
    }
}

impl<S: RemoteStore + ?Sized> GuardedStore<S> {
    pub fn new(inner: Arc<S>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            inner,
            policy,
            timeout,
        }
    }
}

#[async_trait]
impl<S: RemoteStore + ?Sized> RemoteStore for GuardedStore<S> {
    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>> {
        with_retry(&self.policy, "list_directory", || {
            timed(self.timeout, "list_directory", self.inner.list_directory(path))
        })
        .await
    }

    async fn read_file(&self, path: &str) -> Result<FileContent> {
        with_retry(&self.policy, "read_file", || {
            timed(self.timeout, "read_file", self.inner.read_file(path))
        })
        .await
    }

    async fn write_file(
        &self,
        path: &str,
        content: &str,
        message: &str,
        base_version: Option<&VersionToken>,
    ) -> Result<VersionToken> {
        with_retry(&self.policy, "write_file", || {
            timed(
                self.timeout,
                "write_file",
                self.inner.write_file(path, content, message, base_version),
            )
        })
        .await
    }

    async fn delete_file(&self, path: &str, version_token: &VersionToken, message: &str) -> Result<()> {
        with_retry(&self.policy, "delete_file", || {
            timed(
                self.timeout,
                "delete_file",
                self.inner.delete_file(path, version_token, message),
            )
        })
        .await
    }

    async fn list_commits(&self, path: &str) -> Result<Vec<CommitRecord>> {
        with_retry(&self.policy, "list_commits", || {
            timed(self.timeout, "list_commits", self.inner.list_commits(path))
        })
        .await
    }

    async fn read_file_at_commit(&self, path: &str, version_id: &CommitId) -> Result<String> {
        with_retry(&self.policy, "read_file_at_commit", || {
            timed(
                self.timeout,
                "read_file_at_commit",
                self.inner.read_file_at_commit(path, version_id),
            )
        })
        .await
    }

    async fn list_directory_at(&self, path: &str, version_id: &CommitId) -> Result<Vec<DirEntry>> {
        with_retry(&self.policy, "list_directory_at", || {
            timed(
                self.timeout,
                "list_directory_at",
                self.inner.list_directory_at(path, version_id),
            )
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, StoreError, StoreOp};

    fn guarded(store: &Arc<InMemoryStore>) -> GuardedStore<InMemoryStore> {
        GuardedStore::new(
            Arc::clone(store),
            RetryPolicy::fixed(3, Duration::from_millis(1)),
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let store = Arc::new(InMemoryStore::new());
        store.seed("todos/a.md", "a");
        store.inject_fault_times(
            StoreOp::ReadFile,
            None,
            StoreError::TransientNetwork {
                message: "502".into(),
            },
            2,
        );

        let file = guarded(&store).read_file("todos/a.md").await.unwrap();
        assert_eq!(file.content, "a");
        assert_eq!(store.call_count(StoreOp::ReadFile), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_is_not_retried() {
        let store = Arc::new(InMemoryStore::new());
        store.inject_fault(
            StoreOp::ListDirectory,
            None,
            StoreError::RateLimited { retry_after: None },
        );

        let err = guarded(&store).list_directory("todos").await.unwrap_err();
        assert!(matches!(err, StoreError::RateLimited { .. }));
        assert_eq!(store.call_count(StoreOp::ListDirectory), 1);
    }

    #[tokio::test]
    async fn test_slow_calls_time_out() {
        let store = Arc::new(InMemoryStore::new());
        store.seed("todos/a.md", "a");
        store.set_latency(StoreOp::ReadFile, Duration::from_millis(500));

        let err = guarded(&store).read_file("todos/a.md").await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout { .. }));
        assert_eq!(store.call_count(StoreOp::ReadFile), 3);
    }
}
