//! In-memory remote store for tests and local experiments.
//!
//! Behaves like a hosted contents API with commit history:
//! - every write and delete is a commit touching exactly one path
//! - version tokens are SHA-256 hashes of the file content
//! - directory listings can lag behind writes by a configurable number of
//!   listing calls, which models eventual consistency
//! - faults, latency and concurrent external writes can be injected per operation

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::content_hash::ContentHash;
use super::traits::{
    CommitId, CommitRecord, DirEntry, EntryKind, FileContent, RemoteStore, Result, StoreError,
    VersionToken,
};

/// Store operations, used to target injected faults and latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    ListDirectory,
    ReadFile,
    WriteFile,
    DeleteFile,
    ListCommits,
    ReadFileAtCommit,
    ListDirectoryAt,
}

struct Fault {
    op: StoreOp,
    path: Option<String>,
    error: StoreError,
    remaining: u32,
}

struct Commit {
    id: CommitId,
    message: String,
    author: String,
    timestamp: chrono::DateTime<Utc>,
    path: String,
    /// None for deletions
    content: Option<String>,
}

/// A change not yet reflected in directory listings.
struct LaggingChange {
    path: String,
    token: Option<VersionToken>,
    /// Listing calls left before the change becomes visible
    remaining: u32,
}

#[derive(Default)]
struct State {
    files: BTreeMap<String, FileContent>,
    /// What `list_directory` currently reports
    listed: BTreeMap<String, VersionToken>,
    lagging: Vec<LaggingChange>,
    listing_lag: u32,
    commits: Vec<Commit>,
    faults: Vec<Fault>,
    interleaved: HashMap<String, VecDeque<String>>,
    /// Keyed by operation and, when scoped, path
    latency: HashMap<(StoreOp, Option<String>), Duration>,
    calls: HashMap<StoreOp, usize>,
}

impl State {
    fn take_fault(&mut self, op: StoreOp, path: &str) -> Option<StoreError> {
        let index = self
            .faults
            .iter()
            .position(|f| f.op == op && f.path.as_deref().is_none_or(|p| p == path))?;
        let fault = &mut self.faults[index];
        let error = fault.error.clone();
        fault.remaining = fault.remaining.saturating_sub(1);
        if fault.remaining == 0 {
            self.faults.remove(index);
        }
        Some(error)
    }

    /// Record a commit and update the file table. Listing visibility follows
    /// the configured lag unless `visible_now` is set.
    fn apply(
        &mut self,
        author: &str,
        message: &str,
        path: &str,
        content: Option<String>,
        visible_now: bool,
    ) -> Option<VersionToken> {
        let token = match &content {
            Some(content) => {
                let token = ContentHash::from_content(content).into_token();
                self.files.insert(
                    path.to_string(),
                    FileContent {
                        content: content.clone(),
                        version_token: token.clone(),
                    },
                );
                Some(token)
            }
            None => {
                self.files.remove(path);
                None
            }
        };

        let id = self.next_commit_id(message, path);
        self.commits.push(Commit {
            id,
            message: message.to_string(),
            author: author.to_string(),
            timestamp: Utc::now(),
            path: path.to_string(),
            content,
        });

        if visible_now || self.listing_lag == 0 {
            set_listed(&mut self.listed, path, token.clone());
        } else {
            self.lagging.push(LaggingChange {
                path: path.to_string(),
                token: token.clone(),
                remaining: self.listing_lag,
            });
        }
        token
    }

    fn next_commit_id(&self, message: &str, path: &str) -> CommitId {
        let parent = self.commits.last().map(|c| c.id.as_str()).unwrap_or("");
        let mut hasher = Sha256::new();
        hasher.update(format!("{}\n{}\n{}\n{}", parent, self.commits.len(), path, message));
        let hex = hex::encode(hasher.finalize());
        CommitId::new(&hex[..40])
    }

    /// Called once per listing: changes whose countdown ran out become visible.
    fn advance_listing(&mut self) {
        let mut still_lagging = Vec::with_capacity(self.lagging.len());
        for mut change in self.lagging.drain(..) {
            if change.remaining == 0 {
                set_listed(&mut self.listed, &change.path, change.token);
            } else {
                change.remaining -= 1;
                still_lagging.push(change);
            }
        }
        self.lagging = still_lagging;
    }

    fn commit_index(&self, version_id: &CommitId) -> Option<usize> {
        self.commits.iter().position(|c| &c.id == version_id)
    }

    /// Replay history up to and including commit `index`.
    fn snapshot_at(&self, index: usize) -> BTreeMap<String, VersionToken> {
        let mut files = BTreeMap::new();
        for commit in &self.commits[..=index] {
            let token = commit
                .content
                .as_deref()
                .map(|c| ContentHash::from_content(c).into_token());
            set_listed(&mut files, &commit.path, token);
        }
        files
    }
}

fn set_listed(listed: &mut BTreeMap<String, VersionToken>, path: &str, token: Option<VersionToken>) {
    match token {
        Some(token) => {
            listed.insert(path.to_string(), token);
        }
        None => {
            listed.remove(path);
        }
    }
}

fn normalize_path(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn validate_file_path(path: &str) -> Result<()> {
    if path.is_empty() || path.split('/').any(|segment| segment.is_empty() || segment == "..") {
        return Err(StoreError::InvalidPath {
            path: path.to_string(),
            reason: "empty segment or parent reference".to_string(),
        });
    }
    Ok(())
}

/// Direct children of `folder` in a path -> token table.
fn list_children(files: &BTreeMap<String, VersionToken>, folder: &str) -> Result<Vec<DirEntry>> {
    let prefix = if folder.is_empty() {
        String::new()
    } else {
        format!("{}/", folder)
    };

    let mut entries = Vec::new();
    let mut dirs: BTreeMap<String, Sha256> = BTreeMap::new();
    let mut found = false;

    for (path, token) in files.range(prefix.clone()..) {
        let Some(rest) = path.strip_prefix(&prefix) else {
            break;
        };
        found = true;
        match rest.split_once('/') {
            None => entries.push(DirEntry {
                name: rest.to_string(),
                path: path.clone(),
                version_token: token.clone(),
                kind: EntryKind::File,
            }),
            Some((dir, _)) => {
                let hasher = dirs.entry(dir.to_string()).or_default();
                hasher.update(path.as_bytes());
                hasher.update(token.as_str().as_bytes());
            }
        }
    }

    if !found && !folder.is_empty() {
        return Err(StoreError::NotFound {
            path: folder.to_string(),
        });
    }

    for (name, hasher) in dirs {
        entries.push(DirEntry {
            path: format!("{}{}", prefix, name),
            name,
            version_token: VersionToken::new(hex::encode(hasher.finalize())),
            kind: EntryKind::Dir,
        });
    }
    Ok(entries)
}

/// In-memory remote store
pub struct InMemoryStore {
    state: Mutex<State>,
    author: String,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_author("task-sync")
    }

    /// Create a store that attributes engine commits to `author`.
    pub fn with_author(author: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            author: author.into(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Count the call, apply injected latency, then any injected fault.
    async fn enter(&self, op: StoreOp, path: &str) -> Result<()> {
        let (latency, fault) = {
            let mut state = self.lock();
            *state.calls.entry(op).or_default() += 1;
            let latency = state
                .latency
                .get(&(op, Some(path.to_string())))
                .or_else(|| state.latency.get(&(op, None)))
                .copied();
            (latency, state.take_fault(op, path))
        };
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }
        match fault {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    // ==================== Test controls ====================

    /// Delay write visibility in `list_directory` by `calls` listing calls.
    /// `u32::MAX` keeps changes out of listings indefinitely.
    pub fn set_listing_lag(&self, calls: u32) {
        self.lock().listing_lag = calls;
    }

    /// Make every lagging change visible immediately.
    pub fn flush_listing(&self) {
        let mut state = self.lock();
        for change in std::mem::take(&mut state.lagging) {
            set_listed(&mut state.listed, &change.path, change.token);
        }
    }

    /// Fail the next call of `op` (optionally only for `path`) with `error`.
    pub fn inject_fault(&self, op: StoreOp, path: Option<&str>, error: StoreError) {
        self.inject_fault_times(op, path, error, 1);
    }

    /// Fail the next `times` calls of `op` with `error`.
    pub fn inject_fault_times(&self, op: StoreOp, path: Option<&str>, error: StoreError, times: u32) {
        self.lock().faults.push(Fault {
            op,
            path: path.map(normalize_path),
            error,
            remaining: times,
        });
    }

    /// Apply `content` as someone else's commit right before the next
    /// conditional write to `path`, simulating a concurrent editor.
    pub fn interleave_write(&self, path: &str, content: &str) {
        self.lock()
            .interleaved
            .entry(normalize_path(path))
            .or_default()
            .push_back(content.to_string());
    }

    /// Delay every call of `op` by `delay`.
    pub fn set_latency(&self, op: StoreOp, delay: Duration) {
        self.lock().latency.insert((op, None), delay);
    }

    /// Delay calls of `op` on `path` only.
    pub fn set_path_latency(&self, op: StoreOp, path: &str, delay: Duration) {
        self.lock()
            .latency
            .insert((op, Some(normalize_path(path))), delay);
    }

    pub fn call_count(&self, op: StoreOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Write a file outside of any engine, visible to listings immediately.
    pub fn seed(&self, path: &str, content: &str) -> VersionToken {
        let path = normalize_path(path);
        self.lock()
            .apply("seed", "Seed", &path, Some(content.to_string()), true)
            .unwrap_or_else(|| ContentHash::from_content(content).into_token())
    }

    /// Write a file as another client would; listing visibility follows the lag.
    pub fn external_write(&self, path: &str, content: &str) -> VersionToken {
        let path = normalize_path(path);
        self.lock()
            .apply(
                "external-writer",
                "External edit",
                &path,
                Some(content.to_string()),
                false,
            )
            .unwrap_or_else(|| ContentHash::from_content(content).into_token())
    }

    /// Delete a file as another client would.
    pub fn external_delete(&self, path: &str) {
        let path = normalize_path(path);
        self.lock()
            .apply("external-writer", "External delete", &path, None, false);
    }

    pub fn content(&self, path: &str) -> Option<String> {
        self.lock()
            .files
            .get(&normalize_path(path))
            .map(|f| f.content.clone())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.lock().files.contains_key(&normalize_path(path))
    }

    /// All stored file paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }

    /// Commit ids, oldest first.
    pub fn commit_ids(&self) -> Vec<CommitId> {
        self.lock().commits.iter().map(|c| c.id.clone()).collect()
    }

    pub fn latest_commit(&self) -> Option<CommitId> {
        self.lock().commits.last().map(|c| c.id.clone())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>> {
        let path = normalize_path(path);
        self.enter(StoreOp::ListDirectory, &path).await?;
        let mut state = self.lock();
        state.advance_listing();
        list_children(&state.listed, &path)
    }

    async fn read_file(&self, path: &str) -> Result<FileContent> {
        let path = normalize_path(path);
        self.enter(StoreOp::ReadFile, &path).await?;
        self.lock()
            .files
            .get(&path)
            .cloned()
            .ok_or(StoreError::NotFound { path })
    }

    async fn write_file(
        &self,
        path: &str,
        content: &str,
        message: &str,
        base_version: Option<&VersionToken>,
    ) -> Result<VersionToken> {
        let path = normalize_path(path);
        self.enter(StoreOp::WriteFile, &path).await?;
        validate_file_path(&path)?;

        let mut state = self.lock();
        if base_version.is_some() {
            let external = state
                .interleaved
                .get_mut(&path)
                .and_then(|queue| queue.pop_front());
            if let Some(external) = external {
                state.apply(
                    "external-writer",
                    "Concurrent edit",
                    &path,
                    Some(external),
                    false,
                );
            }
        }

        let current = state.files.get(&path).map(|f| f.version_token.clone());
        match (base_version, current) {
            (Some(base), current) if current.as_ref() != Some(base) => {
                Err(StoreError::VersionConflict {
                    path,
                    expected: base.to_string(),
                })
            }
            (None, Some(_)) => Err(StoreError::AlreadyExists { path }),
            _ => {
                let author = self.author.clone();
                state
                    .apply(&author, message, &path, Some(content.to_string()), false)
                    .ok_or(StoreError::NotFound { path })
            }
        }
    }

    async fn delete_file(
        &self,
        path: &str,
        version_token: &VersionToken,
        message: &str,
    ) -> Result<()> {
        let path = normalize_path(path);
        self.enter(StoreOp::DeleteFile, &path).await?;

        let mut state = self.lock();
        let current = state
            .files
            .get(&path)
            .map(|f| f.version_token.clone())
            .ok_or_else(|| StoreError::NotFound { path: path.clone() })?;
        if &current != version_token {
            return Err(StoreError::VersionConflict {
                path,
                expected: version_token.to_string(),
            });
        }
        let author = self.author.clone();
        state.apply(&author, message, &path, None, false);
        Ok(())
    }

    async fn list_commits(&self, path: &str) -> Result<Vec<CommitRecord>> {
        let path = normalize_path(path);
        self.enter(StoreOp::ListCommits, &path).await?;
        let state = self.lock();
        // Folder paths match every commit below them
        let prefix = format!("{}/", path);
        Ok(state
            .commits
            .iter()
            .rev()
            .filter(|c| c.path == path || path.is_empty() || c.path.starts_with(&prefix))
            .map(|c| CommitRecord {
                version_id: c.id.clone(),
                message: c.message.clone(),
                author: c.author.clone(),
                timestamp: c.timestamp,
                historical_path: Some(c.path.clone()),
            })
            .collect())
    }

    async fn read_file_at_commit(&self, path: &str, version_id: &CommitId) -> Result<String> {
        let path = normalize_path(path);
        self.enter(StoreOp::ReadFileAtCommit, &path).await?;
        let state = self.lock();
        let index = state
            .commit_index(version_id)
            .ok_or_else(|| StoreError::NotFound { path: path.clone() })?;
        state.commits[..=index]
            .iter()
            .rev()
            .find(|c| c.path == path)
            .and_then(|c| c.content.clone())
            .ok_or(StoreError::NotFound { path })
    }

    async fn list_directory_at(&self, path: &str, version_id: &CommitId) -> Result<Vec<DirEntry>> {
        let path = normalize_path(path);
        self.enter(StoreOp::ListDirectoryAt, &path).await?;
        let state = self.lock();
        let index = state
            .commit_index(version_id)
            .ok_or_else(|| StoreError::NotFound { path: path.clone() })?;
        list_children(&state.snapshot_at(index), &path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(entries: &[DirEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let store = InMemoryStore::new();

        let token = store
            .write_file("todos/a.md", "hello", "Create a", None)
            .await
            .unwrap();

        let file = store.read_file("todos/a.md").await.unwrap();
        assert_eq!(file.content, "hello");
        assert_eq!(file.version_token, token);

        let entries = store.list_directory("todos").await.unwrap();
        assert_eq!(names(&entries), vec!["a.md"]);

        store.delete_file("todos/a.md", &token, "Delete a").await.unwrap();
        assert!(store.read_file("todos/a.md").await.unwrap_err().is_not_found());
        assert!(store.list_directory("todos").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_conditional_write_rejects_stale_token() {
        let store = InMemoryStore::new();
        let v1 = store.seed("todos/a.md", "one");
        store
            .write_file("todos/a.md", "two", "Edit", Some(&v1))
            .await
            .unwrap();

        let err = store
            .write_file("todos/a.md", "three", "Edit again", Some(&v1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));
        assert_eq!(store.content("todos/a.md").unwrap(), "two");
    }

    #[tokio::test]
    async fn test_create_over_existing_file_is_rejected() {
        let store = InMemoryStore::new();
        store.seed("todos/a.md", "one");

        let err = store
            .write_file("todos/a.md", "other", "Create", None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::AlreadyExists {
                path: "todos/a.md".into()
            }
        );
    }

    #[tokio::test]
    async fn test_listing_lags_behind_writes() {
        let store = InMemoryStore::new();
        store.set_listing_lag(2);
        store
            .write_file("todos/a.md", "hello", "Create", None)
            .await
            .unwrap();

        // Reads are consistent, listings are not
        assert!(store.read_file("todos/a.md").await.is_ok());
        assert!(store.list_directory("todos").await.is_err());
        assert!(store.list_directory("todos").await.is_err());
        assert_eq!(names(&store.list_directory("todos").await.unwrap()), vec!["a.md"]);
    }

    #[tokio::test]
    async fn test_subdirectories_are_listed() {
        let store = InMemoryStore::new();
        store.seed("todos/a.md", "a");
        store.seed("todos/archive/b.md", "b");

        let entries = store.list_directory("todos").await.unwrap();
        assert_eq!(names(&entries), vec!["a.md", "archive"]);
        assert_eq!(entries[1].kind, EntryKind::Dir);
        assert_eq!(entries[1].path, "todos/archive");
    }

    #[tokio::test]
    async fn test_read_at_commit_and_history() {
        let store = InMemoryStore::new();
        let v1 = store.seed("todos/a.md", "one");
        let first = store.latest_commit().unwrap();
        store
            .write_file("todos/a.md", "two", "Edit", Some(&v1))
            .await
            .unwrap();
        let second = store.latest_commit().unwrap();

        assert_eq!(store.read_file_at_commit("todos/a.md", &first).await.unwrap(), "one");
        assert_eq!(store.read_file_at_commit("todos/a.md", &second).await.unwrap(), "two");
        assert!(
            store
                .read_file_at_commit("todos/b.md", &second)
                .await
                .unwrap_err()
                .is_not_found()
        );

        let history = store.list_commits("todos/a.md").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version_id, second);
        assert_eq!(history[0].message, "Edit");
        assert_eq!(history[1].version_id, first);
    }

    #[tokio::test]
    async fn test_folder_history_covers_children() {
        let store = InMemoryStore::new();
        store.seed("todos/a.md", "a");
        store.seed("todos/b.md", "b");
        store.seed("other/c.md", "c");

        let history = store.list_commits("todos").await.unwrap();
        let paths: Vec<_> = history
            .iter()
            .filter_map(|c| c.historical_path.as_deref())
            .collect();
        assert_eq!(paths, vec!["todos/b.md", "todos/a.md"]);
    }

    #[tokio::test]
    async fn test_list_directory_at_commit() {
        let store = InMemoryStore::new();
        store.seed("todos/a.md", "a");
        let before = store.latest_commit().unwrap();
        store.seed("todos/b.md", "b");

        let then = store.list_directory_at("todos", &before).await.unwrap();
        assert_eq!(names(&then), vec!["a.md"]);
        let now = store.list_directory("todos").await.unwrap();
        assert_eq!(names(&now), vec!["a.md", "b.md"]);
    }

    #[tokio::test]
    async fn test_injected_faults_are_consumed() {
        let store = InMemoryStore::new();
        store.seed("todos/a.md", "a");
        store.inject_fault_times(
            StoreOp::ReadFile,
            Some("todos/a.md"),
            StoreError::TransientNetwork {
                message: "reset".into(),
            },
            2,
        );

        assert!(store.read_file("todos/a.md").await.is_err());
        assert!(store.read_file("todos/a.md").await.is_err());
        assert!(store.read_file("todos/a.md").await.is_ok());
        assert_eq!(store.call_count(StoreOp::ReadFile), 3);
    }

    #[tokio::test]
    async fn test_interleaved_write_causes_conflict() {
        let store = InMemoryStore::new();
        let v1 = store.seed("todos/a.md", "one");
        store.interleave_write("todos/a.md", "theirs");

        let err = store
            .write_file("todos/a.md", "ours", "Edit", Some(&v1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));
        assert_eq!(store.content("todos/a.md").unwrap(), "theirs");
    }

    #[tokio::test]
    async fn test_invalid_paths_are_rejected() {
        let store = InMemoryStore::new();
        let err = store
            .write_file("todos/../secret.md", "x", "Create", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath { .. }));
    }
}
