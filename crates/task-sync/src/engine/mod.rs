//! Sync engine.
//!
//! Applies create, update, move and delete operations to the remote store
//! under optimistic concurrency and keeps the local `TodoCache` in step.
//!
//! The store does not guarantee read-after-write consistency for listings, so
//! creates and deletes are followed by a bounded visibility poll. A poll that
//! runs out of attempts is not an error: the write already happened, and the
//! outcome says `Visibility::Unresolved`.

mod moves;
mod overlay;

use chrono::Utc;
use futures::future::{join, join_all};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::TodoCache;
use crate::config::SyncConfig;
use crate::document::{DocId, Document, InvalidPriority, MetadataUpdate, TaskDraft};
use crate::events::{EventBus, SyncEvent, now_ms};
use crate::path::{self, PathError, TASK_EXTENSION};
use crate::queue::{
    MoveIntent, MoveStep, OperationKind, OperationQueue, OperationState, PendingOperation,
};
use crate::retry::{PollOutcome, RetryPolicy, poll_until};
use crate::store::{GuardedStore, RemoteStore, StoreError, VersionToken};
use overlay::ListingOverlay;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Unknown document: {0}")]
    UnknownDocument(DocId),

    #[error("Title {title:?} produces an empty slug")]
    EmptySlug { title: String },

    #[error("No free path for '{slug}' in {folder} after {attempts} attempts")]
    PathExhausted {
        folder: String,
        slug: String,
        attempts: u32,
    },

    #[error("Version conflict on {path} after {attempts} attempt(s)")]
    VersionConflict {
        path: String,
        attempts: u32,
        /// Remote content as last seen
        remote_content: Option<String>,
    },

    #[error("Move of {id} stopped after {completed:?}, {pending:?} still pending: {cause}")]
    PartialFailure {
        id: DocId,
        completed: MoveStep,
        pending: MoveStep,
        intent: MoveIntent,
        #[source]
        cause: StoreError,
    },

    #[error(transparent)]
    InvalidPriority(#[from] InvalidPriority),

    #[error("No interrupted operation to resume for {0}")]
    NothingToResume(DocId),

    #[error("Invalid saved operations: {0}")]
    SavedOperations(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    fn from_path(err: PathError, title: &str) -> Self {
        match err {
            PathError::EmptySlug => SyncError::EmptySlug {
                title: title.to_string(),
            },
            PathError::Exhausted {
                folder,
                slug,
                attempts,
            } => SyncError::PathExhausted {
                folder,
                slug,
                attempts,
            },
            PathError::Store(e) => SyncError::Store(e),
        }
    }

    /// Whether the failure means the remote copy diverged from ours.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            SyncError::VersionConflict { .. }
                | SyncError::Store(
                    StoreError::VersionConflict { .. }
                        | StoreError::AlreadyExists { .. }
                        | StoreError::NotFound { .. }
                )
        )
    }
}

/// Whether a change was observed in the folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Visibility {
    Confirmed {
        attempts: u32,
    },
    /// The write happened but the listing did not reflect it within the poll budget
    Unresolved {
        attempts: u32,
        #[serde(rename = "lastError")]
        last_error: Option<String>,
    },
    /// A newer operation on the same document cancelled the poll
    Superseded,
}

impl Visibility {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Visibility::Confirmed { .. })
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, Visibility::Unresolved { .. })
    }
}

impl From<PollOutcome> for Visibility {
    fn from(outcome: PollOutcome) -> Self {
        match outcome {
            PollOutcome::Confirmed { attempts } => Visibility::Confirmed { attempts },
            PollOutcome::Exhausted {
                attempts,
                last_error,
            } => Visibility::Unresolved {
                attempts,
                last_error,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub document: Document,
    pub visibility: Visibility,
    /// The path was already taken by an identical task, which was adopted
    pub adopted: bool,
}

#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    pub id: DocId,
    pub path: String,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Documents in the cache afterwards
    pub documents: usize,
    /// Files read because they were new or changed
    pub read: usize,
    pub removed: usize,
    /// Documents left alone because an operation owned them
    pub skipped: usize,
}

fn doc_key(id: &DocId) -> String {
    format!("doc:{}", id)
}

/// Poll a folder listing until `path` is (or is no longer) listed.
async fn poll_listing<S: RemoteStore + ?Sized>(
    store: GuardedStore<S>,
    policy: RetryPolicy,
    folder: String,
    path: String,
    present: bool,
    operation: &'static str,
) -> PollOutcome {
    poll_until(&policy, operation, || async {
        match store.list_directory(&folder).await {
            Ok(entries) => Ok(entries.iter().any(|e| e.path == path) == present),
            // The folder itself disappears with its last file
            Err(e) if e.is_not_found() => Ok(!present),
            Err(e) => Err(e),
        }
    })
    .await
}

async fn finish_poll(handle: JoinHandle<PollOutcome>) -> Visibility {
    match handle.await {
        Ok(outcome) => outcome.into(),
        Err(e) if e.is_cancelled() => Visibility::Superseded,
        Err(e) => Visibility::Unresolved {
            attempts: 0,
            last_error: Some(e.to_string()),
        },
    }
}

/// Sync engine for the task documents of one project folder.
pub struct SyncEngine<S: RemoteStore + ?Sized + 'static> {
    store: GuardedStore<S>,
    config: SyncConfig,
    cache: TodoCache,
    queue: OperationQueue,
    pending: Mutex<HashMap<DocId, PendingOperation>>,
    overlay: ListingOverlay,
    events: Arc<EventBus>,
}

impl<S: RemoteStore + ?Sized + 'static> SyncEngine<S> {
    pub fn new(store: Arc<S>, config: SyncConfig) -> Self {
        let store = GuardedStore::new(store, config.network.clone(), config.call_timeout);
        Self {
            store,
            overlay: ListingOverlay::new(config.listing_grace),
            config,
            cache: TodoCache::new(),
            queue: OperationQueue::new(),
            pending: Mutex::new(HashMap::new()),
            events: Arc::new(EventBus::new()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Cached documents, active ones first.
    pub fn documents(&self) -> Vec<Document> {
        self.cache.snapshot()
    }

    pub fn get(&self, id: &DocId) -> Option<Document> {
        self.cache.get(id)
    }

    pub fn find_by_path(&self, path: &str) -> Option<Document> {
        self.cache.by_path(path)
    }

    /// The unfinished or failed operation recorded for `id`, if any.
    pub fn pending(&self, id: &DocId) -> Option<PendingOperation> {
        self.pending_map().get(id).cloned()
    }

    /// Current state of `id`. `None` for documents this engine never saw.
    pub fn state(&self, id: &DocId) -> Option<OperationState> {
        self.pending_map()
            .get(id)
            .map(|p| p.state)
            .or_else(|| self.cache.get(id).map(|_| OperationState::Clean))
    }

    /// Re-attach a pending operation saved by an earlier session.
    ///
    /// For an interrupted move the old copy is dropped from the cache again,
    /// and `resume` can finish the move.
    pub fn restore_pending(&self, id: &DocId, operation: PendingOperation) -> Result<()> {
        if self.cache.get(id).is_none() {
            return Err(SyncError::UnknownDocument(id.clone()));
        }
        if let Some(intent) = &operation.intent {
            self.cache.retain(|d| d.path != intent.from || &d.id == id);
        }
        self.pending_map().insert(id.clone(), operation);
        Ok(())
    }

    /// Interrupted moves as JSON, to be handed to `import_interrupted` by a
    /// later session.
    pub fn export_interrupted(&self) -> Result<String> {
        let mut moves: Vec<PendingOperation> = self
            .pending_map()
            .values()
            .filter(|p| p.is_resumable())
            .cloned()
            .collect();
        moves.sort_by(|a, b| {
            let to = |p: &PendingOperation| p.intent.as_ref().map(|i| i.to.clone());
            to(a).cmp(&to(b))
        });
        Ok(serde_json::to_string(&moves)?)
    }

    /// Re-attach moves saved by `export_interrupted` to the documents now
    /// cached at their target paths. Ids are not stable across sessions, so
    /// moves are matched by path. Returns how many were attached.
    pub fn import_interrupted(&self, json: &str) -> Result<usize> {
        let moves: Vec<PendingOperation> = serde_json::from_str(json)?;
        let mut attached = 0;
        for operation in moves {
            let Some(intent) = &operation.intent else {
                continue;
            };
            match self.cache.by_path(&intent.to) {
                Some(document) => {
                    self.restore_pending(&document.id, operation)?;
                    attached += 1;
                }
                None => debug!(to = %intent.to, "Saved move has no cached target, dropping it"),
            }
        }
        Ok(attached)
    }

    // ==================== Create ====================

    /// Create a task with default metadata.
    pub async fn create(&self, title: &str, body: &str) -> Result<CreateOutcome> {
        self.create_with(TaskDraft::new(title, body)).await
    }

    pub async fn create_with(&self, draft: TaskDraft) -> Result<CreateOutcome> {
        let slug = path::slugify(&draft.title);
        if slug.is_empty() {
            return Err(SyncError::EmptySlug { title: draft.title });
        }
        let created_at = draft.created_at.unwrap_or_else(Utc::now);
        let stamp = path::date_stamp(&created_at);
        let folder = self.config.project_folder.clone();

        // Local creates of the same title on the same day take turns
        let create_key = format!("create:{}", path::candidate_path(&folder, &stamp, &slug, 1));
        let create_slot = self.queue.acquire(&create_key).await;

        let content = draft.render(created_at);
        let (document, adopted) = self
            .write_new(&folder, &stamp, &slug, &draft, &content)
            .await?;

        let key = doc_key(&document.id);
        let slot = self.queue.acquire(&key).await;
        drop(create_slot);

        self.cache.insert(document.clone());
        self.overlay.mark_written(&document.path);
        self.pending_map().insert(
            document.id.clone(),
            PendingOperation::new(OperationKind::Create, OperationState::PendingWrite),
        );
        info!(id = %document.id, path = %document.path, adopted, "Task created");

        let generation = slot.generation();
        let handle = slot.spawn_poll(poll_listing(
            self.store.clone(),
            self.config.poll.clone(),
            folder,
            document.path.clone(),
            true,
            "create",
        ));
        drop(slot);

        let visibility = finish_poll(handle).await;
        if self.queue.is_current(&key, generation) {
            match &visibility {
                Visibility::Confirmed { .. } => {
                    self.overlay.settle(&document.path);
                    self.clear_pending(&document.id);
                }
                Visibility::Unresolved { attempts, .. } => self.fail(
                    &document.id,
                    OperationState::PendingWrite,
                    format!("not listed after {} polls", attempts),
                ),
                Visibility::Superseded => {}
            }
        }
        if visibility != Visibility::Superseded {
            self.events.emit(SyncEvent::DocumentCreated {
                id: document.id.clone(),
                path: document.path.clone(),
                visible: visibility.is_confirmed(),
                timestamp: now_ms(),
            });
        }

        Ok(CreateOutcome {
            document,
            visibility,
            adopted,
        })
    }

    /// Write a new task file at the first free path.
    ///
    /// A concurrent writer can take the resolved path between resolution and
    /// write. If it holds the same task it is adopted, otherwise the path is
    /// resolved again past it.
    async fn write_new(
        &self,
        folder: &str,
        stamp: &str,
        slug: &str,
        draft: &TaskDraft,
        content: &str,
    ) -> Result<(Document, bool)> {
        let attempts = self.config.max_path_attempts;
        let message = format!("Create task: {}", draft.title);

        for _ in 0..attempts {
            let path = path::resolve_path(&self.store, folder, stamp, slug, None, attempts)
                .await
                .map_err(|e| SyncError::from_path(e, &draft.title))?;

            match self.store.write_file(&path, content, &message, None).await {
                Ok(token) => {
                    let id = DocId::derive(&token, &path);
                    return Ok((Document::from_content(id, &path, content, token), false));
                }
                Err(StoreError::AlreadyExists { .. }) => {
                    let existing = match self.store.read_file(&path).await {
                        Ok(file) => file,
                        Err(e) if e.is_not_found() => continue,
                        Err(e) => return Err(e.into()),
                    };
                    let id = self
                        .cache
                        .by_path(&path)
                        .map(|d| d.id)
                        .unwrap_or_else(|| DocId::derive(&existing.version_token, &path));
                    let document =
                        Document::from_content(id, &path, &existing.content, existing.version_token);
                    if document.same_task(&draft.title, &draft.body) {
                        info!(path = %path, "Path already holds this task, adopting it");
                        return Ok((document, true));
                    }
                    debug!(path = %path, "Path taken concurrently, resolving again");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SyncError::PathExhausted {
            folder: folder.to_string(),
            slug: slug.to_string(),
            attempts,
        })
    }

    // ==================== Update ====================

    /// Replace the body (and optionally metadata) of a document.
    ///
    /// The file is re-read right before writing and written conditionally on
    /// that version. Conflicts are retried with a fresh read up to
    /// `conflict_retries` times; after that the conflict is returned with the
    /// remote content and nothing is overwritten.
    pub async fn update(
        &self,
        id: &DocId,
        body: &str,
        metadata: Option<MetadataUpdate>,
    ) -> Result<Document> {
        let _slot = self.queue.acquire(&doc_key(id)).await;
        let document = self
            .cache
            .get(id)
            .ok_or_else(|| SyncError::UnknownDocument(id.clone()))?;
        self.begin(id, OperationKind::Update, OperationState::PendingWrite);

        match self.write_update(&document, body, metadata.as_ref()).await {
            Ok(updated) => {
                self.cache.insert(updated.clone());
                self.finish(id);
                Ok(updated)
            }
            Err(err) => {
                let state = if err.is_conflict() {
                    OperationState::Conflict
                } else {
                    OperationState::Clean
                };
                self.fail(id, state, &err);
                Err(err)
            }
        }
    }

    async fn write_update(
        &self,
        document: &Document,
        body: &str,
        metadata: Option<&MetadataUpdate>,
    ) -> Result<Document> {
        let max_attempts = self.config.conflict_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self.store.read_file(&document.path).await?;
            let mut next = Document::from_content(
                document.id.clone(),
                &document.path,
                &current.content,
                current.version_token.clone(),
            );
            next.body = body.to_string();
            if let Some(update) = metadata {
                if let Some(priority) = update.priority {
                    next.metadata.priority = priority;
                }
                if let Some(tags) = &update.tags {
                    next.metadata.tags = tags.clone();
                }
            }

            let content = next.render();
            if content == current.content {
                debug!(id = %document.id, "Update leaves the file unchanged");
                return Ok(next);
            }

            let message = format!("Update task: {}", next.title);
            match self
                .store
                .write_file(&document.path, &content, &message, Some(&current.version_token))
                .await
            {
                Ok(token) => {
                    next.version_token = token;
                    info!(id = %document.id, path = %document.path, attempt, "Task updated");
                    self.events.emit(SyncEvent::DocumentUpdated {
                        id: document.id.clone(),
                        path: document.path.clone(),
                        retries: attempt - 1,
                        timestamp: now_ms(),
                    });
                    return Ok(next);
                }
                Err(StoreError::VersionConflict { .. }) => {
                    warn!(id = %document.id, path = %document.path, attempt, "Version conflict on update");
                    self.events.emit(SyncEvent::ConflictDetected {
                        id: document.id.clone(),
                        path: document.path.clone(),
                        attempt,
                        timestamp: now_ms(),
                    });
                    if attempt >= max_attempts {
                        let remote_content = match self.store.read_file(&document.path).await {
                            Ok(file) => Some(file.content),
                            Err(_) => Some(current.content),
                        };
                        return Err(SyncError::VersionConflict {
                            path: document.path.clone(),
                            attempts: attempt,
                            remote_content,
                        });
                    }
                    self.bump_attempts(&document.id);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    // ==================== Delete ====================

    /// Delete a document, then wait for the listing to stop reporting it.
    pub async fn delete(&self, id: &DocId) -> Result<DeleteOutcome> {
        let key = doc_key(id);
        let slot = self.queue.acquire(&key).await;
        let document = self
            .cache
            .get(id)
            .ok_or_else(|| SyncError::UnknownDocument(id.clone()))?;
        self.begin(id, OperationKind::Delete, OperationState::PendingDelete);

        let message = format!("Delete task: {}", document.title);
        match self
            .store
            .delete_file(&document.path, &document.version_token, &message)
            .await
        {
            Ok(()) => {}
            Err(StoreError::NotFound { .. }) => {
                debug!(id = %id, path = %document.path, "Task already gone");
            }
            Err(StoreError::VersionConflict { .. }) => {
                let remote_content = self
                    .store
                    .read_file(&document.path)
                    .await
                    .ok()
                    .map(|f| f.content);
                let err = SyncError::VersionConflict {
                    path: document.path.clone(),
                    attempts: 1,
                    remote_content,
                };
                warn!(id = %id, path = %document.path, "Task changed remotely, not deleting");
                self.events.emit(SyncEvent::ConflictDetected {
                    id: id.clone(),
                    path: document.path.clone(),
                    attempt: 1,
                    timestamp: now_ms(),
                });
                self.fail(id, OperationState::Conflict, &err);
                return Err(err);
            }
            Err(e) => {
                let err = SyncError::from(e);
                self.fail(id, OperationState::Clean, &err);
                return Err(err);
            }
        }

        self.cache.remove(id);
        self.overlay.mark_deleted(&document.path);
        info!(id = %id, path = %document.path, "Task deleted");

        let generation = slot.generation();
        let handle = slot.spawn_poll(poll_listing(
            self.store.clone(),
            self.config.poll.clone(),
            path::parent_folder(&document.path).to_string(),
            document.path.clone(),
            false,
            "delete",
        ));
        drop(slot);

        let visibility = finish_poll(handle).await;
        if self.queue.is_current(&key, generation) {
            match &visibility {
                Visibility::Confirmed { .. } => {
                    self.overlay.settle(&document.path);
                    self.set_state(id, OperationState::Deleted, None);
                }
                Visibility::Unresolved { attempts, .. } => self.fail(
                    id,
                    OperationState::PendingDelete,
                    format!("still listed after {} polls", attempts),
                ),
                Visibility::Superseded => {}
            }
        }
        if visibility != Visibility::Superseded {
            self.events.emit(SyncEvent::DocumentDeleted {
                id: id.clone(),
                path: document.path.clone(),
                confirmed: visibility.is_confirmed(),
                timestamp: now_ms(),
            });
        }

        Ok(DeleteOutcome {
            id: id.clone(),
            path: document.path,
            visibility,
        })
    }

    // ==================== Refresh ====================

    /// Project the project folder and its archive folder into the cache.
    ///
    /// Unchanged files keep their cached documents and ids; new and changed
    /// files are read concurrently. Documents owned by a running operation are
    /// left alone. The engine's own recent writes and deletes win over a
    /// listing that does not show them yet.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let (active, archived) = join(
            self.list_tasks(&self.config.project_folder),
            self.list_tasks(&self.config.archive_folder()),
        )
        .await;
        let listed: HashMap<String, VersionToken> = active?.into_iter().chain(archived?).collect();
        let listed_paths: HashSet<String> = listed.keys().cloned().collect();
        self.overlay.reconcile(&listed_paths);

        // Old copies of interrupted moves are not separate documents
        let old_copies: HashSet<String> = self
            .pending_map()
            .values()
            .filter_map(|p| p.intent.as_ref().map(|i| i.from.clone()))
            .collect();

        let mut report = RefreshReport::default();
        // Changed documents remember the slot generation they were planned at
        let mut reads: Vec<(Option<(DocId, u64)>, String)> = Vec::new();
        let cached = self.cache.snapshot();
        let cached_paths: HashSet<String> = cached.iter().map(|d| d.path.clone()).collect();

        for document in cached {
            let Some(slot) = self.queue.try_acquire(&doc_key(&document.id)) else {
                report.skipped += 1;
                continue;
            };
            match listed.get(&document.path) {
                Some(token) if *token == document.version_token => {}
                Some(_) => reads.push((
                    Some((document.id.clone(), slot.generation())),
                    document.path.clone(),
                )),
                None if self.overlay.is_written(&document.path) => {}
                None => {
                    self.cache.remove(&document.id);
                    report.removed += 1;
                }
            }
            if listed.contains_key(&document.path) {
                self.settle_create(&document.id);
            }
        }

        for path in listed.keys() {
            if cached_paths.contains(path) || old_copies.contains(path) || self.overlay.is_deleted(path) {
                continue;
            }
            reads.push((None, path.clone()));
        }

        // Slots are free while reading; results are applied under a brief
        // `try_acquire` and dropped if an operation ran in between.
        let results = join_all(reads.into_iter().map(|(planned, path)| async move {
            let result = self.store.read_file(&path).await;
            (planned, path, result)
        }))
        .await;

        let mut fatal = None;
        for (planned, path, result) in results {
            let _slot = match &planned {
                Some((id, generation)) => match self.queue.try_acquire(&doc_key(id)) {
                    Some(slot) if slot.generation() == *generation => Some(slot),
                    _ => {
                        debug!(path = %path, "Document changed during refresh, keeping it");
                        report.skipped += 1;
                        continue;
                    }
                },
                None => None,
            };
            match result {
                Ok(file) => {
                    let document = match planned {
                        Some((id, _)) => {
                            Document::from_content(id, &path, &file.content, file.version_token)
                        }
                        None if self.cache.by_path(&path).is_some() => continue,
                        None => Document::load(&path, &file),
                    };
                    self.cache.insert(document);
                    report.read += 1;
                }
                Err(e) if e.is_not_found() => {
                    if let Some((id, _)) = planned {
                        self.cache.remove(&id);
                        report.removed += 1;
                    }
                }
                Err(e) if e.is_fatal() => {
                    fatal.get_or_insert(e);
                }
                Err(e) => warn!(path = %path, error = %e, "Skipping unreadable task"),
            }
        }

        self.queue.prune();
        if let Some(e) = fatal {
            return Err(e.into());
        }

        report.documents = self.cache.len();
        debug!(?report, "Refreshed working set");
        self.events.emit(SyncEvent::Refreshed {
            documents: report.documents,
            skipped: report.skipped,
            timestamp: now_ms(),
        });
        Ok(report)
    }

    /// Task files directly inside `folder`. A missing folder has none.
    async fn list_tasks(&self, folder: &str) -> Result<Vec<(String, VersionToken)>> {
        match self.store.list_directory(folder).await {
            Ok(entries) => Ok(entries
                .into_iter()
                .filter(|e| e.is_file() && e.name.ends_with(TASK_EXTENSION))
                .map(|e| (e.path, e.version_token))
                .collect()),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    // ==================== Pending operations ====================

    fn pending_map(&self) -> MutexGuard<'_, HashMap<DocId, PendingOperation>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start an operation. An interrupted move's intent survives it.
    fn begin(&self, id: &DocId, kind: OperationKind, state: OperationState) {
        let mut pending = self.pending_map();
        let intent = pending.get(id).and_then(|p| p.intent.clone());
        let mut operation = PendingOperation::new(kind, state);
        operation.attempts = 1;
        operation.intent = intent;
        pending.insert(id.clone(), operation);
    }

    fn bump_attempts(&self, id: &DocId) {
        if let Some(operation) = self.pending_map().get_mut(id) {
            operation.attempts += 1;
        }
    }

    fn set_state(&self, id: &DocId, state: OperationState, last_error: Option<String>) {
        if let Some(operation) = self.pending_map().get_mut(id) {
            operation.state = state;
            operation.last_error = last_error;
        }
    }

    fn fail(&self, id: &DocId, state: OperationState, error: impl fmt::Display) {
        self.set_state(id, state, Some(error.to_string()));
    }

    fn set_intent(&self, id: &DocId, intent: MoveIntent) {
        let mut pending = self.pending_map();
        let operation = pending
            .entry(id.clone())
            .or_insert_with(|| PendingOperation::new(OperationKind::Move, OperationState::PendingDelete));
        operation.kind = OperationKind::Move;
        operation.state = OperationState::PendingDelete;
        operation.intent = Some(intent);
    }

    fn pending_intent(&self, id: &DocId) -> Option<MoveIntent> {
        self.pending_map().get(id).and_then(|p| p.intent.clone())
    }

    fn clear_pending(&self, id: &DocId) {
        self.pending_map().remove(id);
    }

    /// Operation done. A still-open move intent stays pending.
    fn finish(&self, id: &DocId) {
        let mut pending = self.pending_map();
        match pending.get_mut(id) {
            Some(operation) if operation.intent.is_some() => {
                operation.kind = OperationKind::Move;
                operation.state = OperationState::PendingDelete;
                operation.last_error = None;
            }
            Some(_) => {
                pending.remove(id);
            }
            None => {}
        }
    }

    /// A create whose path now shows up in a listing is settled.
    fn settle_create(&self, id: &DocId) {
        let mut pending = self.pending_map();
        if pending.get(id).is_some_and(|p| {
            p.kind == OperationKind::Create && p.state == OperationState::PendingWrite
        }) {
            pending.remove(id);
        }
    }
}
