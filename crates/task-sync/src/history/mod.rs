//! History reconstruction.
//!
//! Reads a document as it was at any commit. When the file did not exist at
//! the requested path at that commit (it was renamed, archived or restored
//! later), candidate paths are discovered from the store's history and tried
//! in order. A content found that way is flagged `found_via_similarity` since
//! the match is heuristic.

mod cache;

pub use cache::{CacheStats, MetadataCache};

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{HistoryConfig, SyncConfig};
use crate::markdown::{self, TaskHeader};
use crate::path;
use crate::store::{CommitId, CommitRecord, GuardedStore, RemoteStore, StoreError};

/// Siblings whose names are less alike than this are never tried.
const MIN_SIBLING_SIMILARITY: f64 = 0.5;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("No content for {path} at {version_id} ({} candidate path(s) tried)", .tried.len())]
    NotFound {
        path: String,
        version_id: CommitId,
        tried: Vec<String>,
    },
}

pub type Result<T> = std::result::Result<T, HistoryError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalContent {
    /// Stored bytes, untransformed
    pub content: String,
    pub version_id: CommitId,
    pub requested_path: String,
    pub resolved_path: String,
    pub found_via_similarity: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalMetadata {
    pub version_id: CommitId,
    pub requested_path: String,
    pub resolved_path: String,
    pub found_via_similarity: bool,
    /// Derived from the resolved path
    pub archived: bool,
    /// `None` when the stored file had no header
    pub header: Option<TaskHeader>,
}

pub struct HistoryReconstructor<S: RemoteStore + ?Sized> {
    store: GuardedStore<S>,
    config: HistoryConfig,
    cache: Arc<MetadataCache>,
}

impl<S: RemoteStore + ?Sized + 'static> HistoryReconstructor<S> {
    pub fn new(store: Arc<S>, config: &SyncConfig) -> Self {
        let history = config.history.clone();
        let cache = Arc::new(MetadataCache::new(
            history.cache_capacity,
            history.cache_ttl,
            history.cache_sweep_interval,
        ));
        Self {
            store: GuardedStore::new(store, config.network.clone(), history.call_timeout),
            config: history,
            cache,
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Sweep the metadata cache in the background. Expired entries are also
    /// dropped lazily on access, so this is optional.
    pub fn spawn_cache_sweeper(&self) -> JoinHandle<()> {
        MetadataCache::spawn_sweeper(&self.cache)
    }

    /// Commits that touched `path`, most recent first.
    pub async fn list_history(&self, path: &str) -> Result<Vec<CommitRecord>> {
        Ok(self.store.list_commits(path).await?)
    }

    /// Content of the document at `path` as of commit `version_id`.
    pub async fn get_content_at(&self, path: &str, version_id: &CommitId) -> Result<HistoricalContent> {
        match self.store.read_file_at_commit(path, version_id).await {
            Ok(content) => {
                return Ok(HistoricalContent {
                    content,
                    version_id: version_id.clone(),
                    requested_path: path.to_string(),
                    resolved_path: path.to_string(),
                    found_via_similarity: false,
                });
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        debug!(path, version = %version_id, "Not at requested path, discovering historical paths");
        let mut search = Search::new(path, self.config.max_candidates);

        let counterpart = vec![path::counterpart(path)];
        if let Some(found) = self.try_each(&mut search, counterpart, version_id).await? {
            return Ok(found);
        }

        let own_history = self.history_or_empty(path).await?;
        let candidates = from_own_history(path, &own_history, version_id);
        if let Some(found) = self.try_each(&mut search, candidates, version_id).await? {
            return Ok(found);
        }

        if let Some(origin) = own_history.last() {
            let folder = path::parent_folder(path);
            let folder_history = self.history_or_empty(folder).await?;
            let candidates = from_folder_history(path, &own_history, &folder_history);
            if let Some(found) = self
                .try_moved_from(&mut search, candidates, &origin.version_id, version_id)
                .await?
            {
                return Ok(found);
            }
        }

        let candidates = self.siblings_at(path, version_id).await?;
        if let Some(found) = self.try_each(&mut search, candidates, version_id).await? {
            return Ok(found);
        }

        warn!(path, version = %version_id, tried = search.tried.len(), "No historical path found");
        Err(HistoryError::NotFound {
            path: path.to_string(),
            version_id: version_id.clone(),
            tried: search.tried,
        })
    }

    /// Parsed header of the document at `path` as of commit `version_id`.
    pub async fn metadata_at(&self, path: &str, version_id: &CommitId) -> Result<HistoricalMetadata> {
        let found = self.get_content_at(path, version_id).await?;
        let header = self.cache.get_or_parse(&found.version_id, &found.content);
        Ok(HistoricalMetadata {
            archived: path::is_archived(&found.resolved_path),
            version_id: found.version_id,
            requested_path: found.requested_path,
            resolved_path: found.resolved_path,
            found_via_similarity: found.found_via_similarity,
            header,
        })
    }

    /// Read candidates in order until one exists at the commit.
    async fn try_each(
        &self,
        search: &mut Search,
        candidates: Vec<String>,
        version_id: &CommitId,
    ) -> Result<Option<HistoricalContent>> {
        for candidate in candidates {
            if !search.admit(&candidate) {
                if search.is_full() {
                    break;
                }
                continue;
            }
            if let Some(found) = self.read_candidate(search, candidate, version_id).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Like `try_each`, but only for candidates that held the same body as the
    /// requested path when that path was created at `origin`.
    ///
    /// A move writes the new path before deleting the old one, so at `origin`
    /// the old path still exists with the moved body. Files merely edited
    /// around the same time fail this check.
    async fn try_moved_from(
        &self,
        search: &mut Search,
        candidates: Vec<String>,
        origin: &CommitId,
        version_id: &CommitId,
    ) -> Result<Option<HistoricalContent>> {
        if candidates.is_empty() || search.is_full() {
            return Ok(None);
        }
        let moved_body = match self.store.read_file_at_commit(&search.requested, origin).await {
            Ok(content) => markdown::parse(&content).body,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                debug!(origin = %origin, error = %e, "First version unreadable, skipping folder history");
                return Ok(None);
            }
        };

        for candidate in candidates {
            if !search.admit(&candidate) {
                if search.is_full() {
                    break;
                }
                continue;
            }
            match self.store.read_file_at_commit(&candidate, origin).await {
                Ok(content) if markdown::parse(&content).body == moved_body => {}
                Ok(_) => {
                    debug!(candidate = %candidate, "Body differs from the moved document");
                    continue;
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    debug!(candidate = %candidate, error = %e, "Candidate rejected");
                    continue;
                }
            }
            if let Some(found) = self.read_candidate(search, candidate, version_id).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    async fn read_candidate(
        &self,
        search: &Search,
        candidate: String,
        version_id: &CommitId,
    ) -> Result<Option<HistoricalContent>> {
        match self.store.read_file_at_commit(&candidate, version_id).await {
            Ok(content) => {
                info!(
                    requested = %search.requested,
                    resolved = %candidate,
                    version = %version_id,
                    "Historical content found via path discovery"
                );
                Ok(Some(HistoricalContent {
                    content,
                    version_id: version_id.clone(),
                    requested_path: search.requested.clone(),
                    resolved_path: candidate,
                    found_via_similarity: true,
                }))
            }
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                debug!(candidate = %candidate, error = %e, "Candidate rejected");
                Ok(None)
            }
        }
    }

    /// Commit list of `path`; a missing or unreachable history is empty.
    async fn history_or_empty(&self, path: &str) -> Result<Vec<CommitRecord>> {
        match self.store.list_commits(path).await {
            Ok(records) => Ok(records),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                debug!(path, error = %e, "History unavailable for discovery");
                Ok(Vec::new())
            }
        }
    }

    /// Same-extension files next to `path` at the commit, most similar name first.
    async fn siblings_at(&self, path: &str, version_id: &CommitId) -> Result<Vec<String>> {
        let folder = path::parent_folder(path);
        let entries = match self.store.list_directory_at(folder, version_id).await {
            Ok(entries) => entries,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                debug!(folder, error = %e, "Listing unavailable for discovery");
                return Ok(Vec::new());
            }
        };

        let mut ranked: Vec<(f64, String)> = entries
            .into_iter()
            .filter(|entry| entry.is_file() && same_extension(&entry.path, path))
            .map(|entry| (similarity(&entry.path, path), entry.path))
            .filter(|(score, _)| *score >= MIN_SIBLING_SIMILARITY)
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        Ok(ranked.into_iter().map(|(_, path)| path).collect())
    }
}

/// Bookkeeping shared by all discovery stages.
struct Search {
    requested: String,
    tried: Vec<String>,
    seen: HashSet<String>,
    limit: usize,
}

impl Search {
    fn new(requested: &str, limit: usize) -> Self {
        Self {
            requested: requested.to_string(),
            tried: Vec::new(),
            seen: HashSet::from([requested.to_string()]),
            limit,
        }
    }

    fn is_full(&self) -> bool {
        self.tried.len() >= self.limit
    }

    /// Record `candidate` as tried, unless it was seen already or the budget is spent.
    fn admit(&mut self, candidate: &str) -> bool {
        if self.is_full() || !self.seen.insert(candidate.to_string()) {
            return false;
        }
        self.tried.push(candidate.to_string());
        true
    }
}

fn position(records: &[CommitRecord], version_id: &CommitId) -> Option<usize> {
    records.iter().position(|r| &r.version_id == version_id)
}

/// Paths the store reports for this document's own commits, nearest to the
/// requested commit first.
fn from_own_history(requested: &str, history: &[CommitRecord], version_id: &CommitId) -> Vec<String> {
    let anchor = position(history, version_id).unwrap_or(0);
    nearest_paths(requested, history, anchor)
}

/// Paths touched in the folder around the commit that introduced `requested`.
///
/// A move writes the new path and deletes the old one in adjacent commits, so
/// the old path sits right next to the oldest commit of the new one. Paths
/// that never existed have no such commit and get no candidates here.
fn from_folder_history(
    requested: &str,
    own_history: &[CommitRecord],
    folder_history: &[CommitRecord],
) -> Vec<String> {
    let anchor = own_history
        .last()
        .and_then(|first| position(folder_history, &first.version_id));
    match anchor {
        Some(anchor) => nearest_paths(requested, folder_history, anchor),
        None => Vec::new(),
    }
}

/// Distinct historical paths of `records` (most recent first), ordered by
/// distance from `anchor`. At equal distance the newer neighbour wins, then
/// the name closer to `requested`.
fn nearest_paths(requested: &str, records: &[CommitRecord], anchor: usize) -> Vec<String> {
    // (distance, older than anchor)
    let mut best: HashMap<&str, (usize, bool)> = HashMap::new();
    for (index, record) in records.iter().enumerate() {
        let Some(path) = record.historical_path.as_deref() else {
            continue;
        };
        if path == requested || !same_extension(path, requested) {
            continue;
        }
        let rank = (index.abs_diff(anchor), index > anchor);
        best.entry(path)
            .and_modify(|r| *r = (*r).min(rank))
            .or_insert(rank);
    }

    let mut ranked: Vec<((usize, bool), f64, &str)> = best
        .into_iter()
        .map(|(path, rank)| (rank, similarity(path, requested), path))
        .collect();
    ranked.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| b.1.total_cmp(&a.1))
            .then_with(|| a.2.cmp(&b.2))
    });
    ranked.into_iter().map(|(_, _, path)| path.to_string()).collect()
}

fn extension(path: &str) -> Option<&str> {
    path::file_name(path).rsplit_once('.').map(|(_, ext)| ext)
}

fn same_extension(a: &str, b: &str) -> bool {
    extension(a) == extension(b)
}

/// File stem without the date stamp, lowercased.
fn name_key(path: &str) -> String {
    let name = path::file_name(path);
    let stem = name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name);
    let stem = if path::date_prefix(path).is_some() {
        stem.get(10..).unwrap_or_default().trim_start_matches('-')
    } else {
        stem
    };
    stem.to_lowercase()
}

/// Dice coefficient over character bigrams of the two file names, in `0.0..=1.0`.
fn similarity(a: &str, b: &str) -> f64 {
    let a = name_key(a);
    let b = name_key(b);
    if a == b {
        return 1.0;
    }

    let bigrams = |s: &str| {
        let chars: Vec<char> = s.chars().collect();
        let mut counts: HashMap<(char, char), usize> = HashMap::new();
        for pair in chars.windows(2) {
            *counts.entry((pair[0], pair[1])).or_default() += 1;
        }
        counts
    };
    let a = bigrams(&a);
    let b = bigrams(&b);
    let total: usize = a.values().sum::<usize>() + b.values().sum::<usize>();
    if total == 0 {
        return 0.0;
    }
    let shared: usize = a
        .iter()
        .map(|(pair, count)| (*count).min(b.get(pair).copied().unwrap_or(0)))
        .sum();
    (2 * shared) as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::store::{InMemoryStore, StoreOp};
    use std::time::Duration;

    fn reconstructor(store: &Arc<InMemoryStore>) -> HistoryReconstructor<InMemoryStore> {
        let mut config = SyncConfig::new("todos");
        config.network = RetryPolicy::fixed(2, Duration::from_millis(1));
        HistoryReconstructor::new(Arc::clone(store), &config)
    }

    /// Move `from` to `to` the way the engine does: write, then delete.
    fn move_file(store: &InMemoryStore, from: &str, to: &str) {
        let content = store.content(from).unwrap();
        store.external_write(to, &content);
        store.external_delete(from);
    }

    #[test]
    fn test_similarity_ignores_date_stamp() {
        assert_eq!(
            similarity("todos/2026-01-01-launch.md", "todos/2026-03-05-launch.md"),
            1.0
        );
        let close = similarity("todos/2026-01-01-launch-plan.md", "todos/launch-plans.md");
        let far = similarity("todos/2026-01-01-groceries.md", "todos/launch-plans.md");
        assert!(close > far, "{close} <= {far}");
        assert_eq!(similarity("todos/a.md", "todos/b.md"), 0.0);
    }

    #[tokio::test]
    async fn test_exact_hit_returns_stored_bytes() {
        let store = Arc::new(InMemoryStore::new());
        let raw = "---\ntitle: Launch\n---\n\n  trailing spaces  \n\n\n";
        store.seed("todos/2026-01-01-launch.md", raw);
        let commit = store.latest_commit().unwrap();
        store.external_write("todos/2026-01-01-launch.md", "later");

        let found = reconstructor(&store)
            .get_content_at("todos/2026-01-01-launch.md", &commit)
            .await
            .unwrap();
        assert_eq!(found.content, raw);
        assert!(!found.found_via_similarity);
        assert_eq!(found.resolved_path, found.requested_path);
    }

    #[tokio::test]
    async fn test_archived_document_found_at_active_path() {
        let store = Arc::new(InMemoryStore::new());
        store.seed("todos/2026-01-01-launch.md", "before archive");
        let commit = store.latest_commit().unwrap();
        move_file(&store, "todos/2026-01-01-launch.md", "todos/archive/2026-01-01-launch.md");

        let found = reconstructor(&store)
            .get_content_at("todos/archive/2026-01-01-launch.md", &commit)
            .await
            .unwrap();
        assert!(found.found_via_similarity);
        assert_eq!(found.resolved_path, "todos/2026-01-01-launch.md");
        assert_eq!(found.content, "before archive");
    }

    #[tokio::test]
    async fn test_renamed_document_found_through_folder_history() {
        let store = Arc::new(InMemoryStore::new());
        store.seed("todos/2026-01-01-groceries.md", "milk");
        store.seed("todos/2026-01-01-launch.md", "v1");
        store.external_write("todos/2026-01-01-launch.md", "v2");
        let before_rename = store.latest_commit().unwrap();
        move_file(&store, "todos/2026-01-01-launch.md", "todos/2026-01-01-ship-it.md");
        store.seed("todos/2026-01-02-unrelated.md", "noise");

        let found = reconstructor(&store)
            .get_content_at("todos/2026-01-01-ship-it.md", &before_rename)
            .await
            .unwrap();
        assert!(found.found_via_similarity);
        assert_eq!(found.requested_path, "todos/2026-01-01-ship-it.md");
        assert_eq!(found.resolved_path, "todos/2026-01-01-launch.md");
        assert_eq!(found.content, "v2");
    }

    #[tokio::test]
    async fn test_rename_ignores_file_edited_just_before() {
        let store = Arc::new(InMemoryStore::new());
        store.seed("todos/2026-01-01-launch.md", "launch content");
        store.seed("todos/2026-01-01-groceries.md", "milk");
        store.external_write("todos/2026-01-01-groceries.md", "milk and eggs");
        let before_rename = store.latest_commit().unwrap();
        move_file(&store, "todos/2026-01-01-launch.md", "todos/2026-01-01-ship-it.md");

        let found = reconstructor(&store)
            .get_content_at("todos/2026-01-01-ship-it.md", &before_rename)
            .await
            .unwrap();
        assert_eq!(found.resolved_path, "todos/2026-01-01-launch.md");
        assert_eq!(found.content, "launch content");
    }

    #[tokio::test]
    async fn test_folder_candidate_with_other_body_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        store.seed("todos/2026-01-01-groceries.md", "milk");
        let commit = store.latest_commit().unwrap();
        store.external_write("todos/2026-01-01-groceries.md", "milk and eggs");
        store.seed("todos/2026-01-01-ship-it.md", "unrelated");

        let err = reconstructor(&store)
            .get_content_at("todos/2026-01-01-ship-it.md", &commit)
            .await
            .unwrap_err();
        match err {
            HistoryError::NotFound { tried, .. } => {
                assert!(tried.contains(&"todos/2026-01-01-groceries.md".to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_nearest_paths_prefers_newer_neighbour() {
        let record = |id: &str, path: &str| CommitRecord {
            version_id: CommitId::new(id),
            message: String::new(),
            author: String::new(),
            timestamp: chrono::Utc::now(),
            historical_path: Some(path.to_string()),
        };
        // Most recent first; the anchor is the write of the new path
        let records = vec![
            record("c4", "todos/zebra.md"),
            record("c3", "todos/new.md"),
            record("c2", "todos/apple.md"),
        ];
        assert_eq!(
            nearest_paths("todos/new.md", &records, 1),
            vec!["todos/zebra.md", "todos/apple.md"]
        );
    }

    #[tokio::test]
    async fn test_siblings_used_when_history_is_unavailable() {
        let store = Arc::new(InMemoryStore::new());
        store.seed("todos/2026-01-01-groceries.md", "milk");
        store.seed("todos/2026-01-01-launch-plan.md", "plan");
        let commit = store.latest_commit().unwrap();
        store.inject_fault_times(
            StoreOp::ListCommits,
            None,
            StoreError::TransientNetwork {
                message: "reset".into(),
            },
            10,
        );

        let found = reconstructor(&store)
            .get_content_at("todos/2026-01-05-launch-plans.md", &commit)
            .await
            .unwrap();
        assert_eq!(found.resolved_path, "todos/2026-01-01-launch-plan.md");
        assert_eq!(found.content, "plan");
    }

    #[tokio::test]
    async fn test_not_found_lists_tried_paths() {
        let store = Arc::new(InMemoryStore::new());
        store.seed("todos/notes.txt", "not a task");
        let commit = store.latest_commit().unwrap();

        let err = reconstructor(&store)
            .get_content_at("todos/2026-01-01-launch.md", &commit)
            .await
            .unwrap_err();
        match err {
            HistoryError::NotFound { path, tried, .. } => {
                assert_eq!(path, "todos/2026-01-01-launch.md");
                assert_eq!(tried, vec!["todos/archive/2026-01-01-launch.md"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_candidates_bounded() {
        let store = Arc::new(InMemoryStore::new());
        store.seed("todos/2026-01-01-launch.md", "v1");
        let commit = store.latest_commit().unwrap();
        move_file(&store, "todos/2026-01-01-launch.md", "todos/2026-01-01-ship.md");

        let mut config = SyncConfig::new("todos");
        config.history.max_candidates = 1;
        let err = HistoryReconstructor::new(Arc::clone(&store), &config)
            .get_content_at("todos/2026-01-01-ship.md", &commit)
            .await
            .unwrap_err();
        match err {
            HistoryError::NotFound { tried, .. } => {
                assert_eq!(tried, vec!["todos/archive/2026-01-01-ship.md"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Exact read plus the single admitted candidate
        assert_eq!(store.call_count(StoreOp::ReadFileAtCommit), 2);
    }

    #[tokio::test]
    async fn test_dissimilar_siblings_are_not_tried() {
        let store = Arc::new(InMemoryStore::new());
        store.seed("todos/2026-01-01-groceries.md", "milk");
        let commit = store.latest_commit().unwrap();

        let err = reconstructor(&store)
            .get_content_at("todos/2026-01-01-launch.md", &commit)
            .await
            .unwrap_err();
        assert!(matches!(err, HistoryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_discovery() {
        let store = Arc::new(InMemoryStore::new());
        store.seed("todos/2026-01-01-launch.md", "v1");
        let commit = store.latest_commit().unwrap();
        store.inject_fault(
            StoreOp::ReadFileAtCommit,
            Some("todos/2026-01-01-launch.md"),
            StoreError::RateLimited { retry_after: None },
        );

        let err = reconstructor(&store)
            .get_content_at("todos/archive/2026-01-01-launch.md", &commit)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HistoryError::Store(StoreError::RateLimited { .. })
        ));
        assert_eq!(store.call_count(StoreOp::ReadFileAtCommit), 2);
        assert_eq!(store.call_count(StoreOp::ListCommits), 0);
    }

    #[tokio::test]
    async fn test_metadata_at_uses_cache() {
        let store = Arc::new(InMemoryStore::new());
        store.seed(
            "todos/2026-01-01-launch.md",
            "---\ntitle: Launch\npriority: 1\ntags: [ops]\n---\n\nGo.",
        );
        let commit = store.latest_commit().unwrap();
        let history = reconstructor(&store);

        let first = history
            .metadata_at("todos/2026-01-01-launch.md", &commit)
            .await
            .unwrap();
        let second = history
            .metadata_at("todos/2026-01-01-launch.md", &commit)
            .await
            .unwrap();
        assert_eq!(first, second);
        let header = first.header.unwrap();
        assert_eq!(header.title, "Launch");
        assert_eq!(header.priority, 1);
        assert!(!first.archived);

        let stats = history.cache_stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn test_list_history_delegates() {
        let store = Arc::new(InMemoryStore::new());
        store.seed("todos/a.md", "one");
        store.external_write("todos/a.md", "two");

        let history = reconstructor(&store).list_history("todos/a.md").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].message, "External edit");
    }
}
