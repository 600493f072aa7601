//! Two-phase moves: write the new path, then delete the old one.
//!
//! The store has no atomic rename. Between the two steps the document exists
//! twice; if the delete fails the move is recorded as a `MoveIntent` and
//! reported as `PartialFailure`. `resume`, or issuing the same move again,
//! performs only the delete.

use tracing::{debug, info, warn};

use super::{Result, SyncEngine, SyncError, doc_key};
use crate::document::{DocId, Document};
use crate::events::{SyncEvent, now_ms};
use crate::path;
use crate::queue::{MoveIntent, MoveStep, OperationKind, OperationState};
use crate::store::{RemoteStore, StoreError};

impl<S: RemoteStore + ?Sized + 'static> SyncEngine<S> {
    /// Move a document to `new_path`. Moving to the current path is a no-op.
    pub async fn move_to(&self, id: &DocId, new_path: &str) -> Result<Document> {
        let new_path = new_path.trim_matches('/').to_string();
        self.relocate(id, |_| new_path).await
    }

    /// Move a document into the archive folder next to it.
    pub async fn archive(&self, id: &DocId) -> Result<Document> {
        self.relocate(id, |document| path::archive_path(&document.path))
            .await
    }

    /// Move an archived document back to its active folder.
    pub async fn unarchive(&self, id: &DocId) -> Result<Document> {
        self.relocate(id, |document| path::unarchive_path(&document.path))
            .await
    }

    /// Change a document's title and move it to the matching file name.
    ///
    /// The date stamp of the current file name is kept. A title whose slug
    /// maps to the current path only rewrites the header.
    pub async fn rename(&self, id: &DocId, title: &str) -> Result<Document> {
        let slug = path::slugify(title);
        if slug.is_empty() {
            return Err(SyncError::EmptySlug {
                title: title.to_string(),
            });
        }

        let _slot = self.queue.acquire(&doc_key(id)).await;
        let document = self
            .cache
            .get(id)
            .ok_or_else(|| SyncError::UnknownDocument(id.clone()))?;

        let stamp = match path::date_prefix(&document.path) {
            Some(date) => date.format("%Y-%m-%d").to_string(),
            None => path::date_stamp(&document.metadata.created_at),
        };
        let target = path::resolve_path(
            &self.store,
            path::parent_folder(&document.path),
            &stamp,
            &slug,
            Some(&document.path),
            self.config.max_path_attempts,
        )
        .await
        .map_err(|e| SyncError::from_path(e, title))?;

        self.move_locked(document, target, Some(title)).await
    }

    /// Finish an interrupted move by deleting the old copy.
    pub async fn resume(&self, id: &DocId) -> Result<Document> {
        let _slot = self.queue.acquire(&doc_key(id)).await;
        let document = self
            .cache
            .get(id)
            .ok_or_else(|| SyncError::UnknownDocument(id.clone()))?;
        let intent = self
            .pending_intent(id)
            .ok_or_else(|| SyncError::NothingToResume(id.clone()))?;
        self.finish_move(&document, intent).await
    }

    async fn relocate(&self, id: &DocId, target: impl FnOnce(&Document) -> String) -> Result<Document> {
        let _slot = self.queue.acquire(&doc_key(id)).await;
        let document = self
            .cache
            .get(id)
            .ok_or_else(|| SyncError::UnknownDocument(id.clone()))?;
        let to = target(&document);
        self.move_locked(document, to, None).await
    }

    /// Move while holding the document's slot. `title` rewrites the header.
    async fn move_locked(&self, mut document: Document, to: String, title: Option<&str>) -> Result<Document> {
        if let Some(intent) = self.pending_intent(&document.id) {
            let same_move = intent.to == to && title.is_none_or(|t| t == document.title);
            if same_move {
                return self.finish_move(&document, intent).await;
            }
            info!(id = %document.id, from = %intent.from, "Finishing interrupted move first");
            document = self.finish_move(&document, intent).await?;
        }

        if to == document.path && title.is_none_or(|t| t == document.title) {
            debug!(id = %document.id, path = %to, "Already at target path");
            return Ok(document);
        }

        self.begin(&document.id, OperationKind::Move, OperationState::PendingWrite);
        self.write_then_delete(&document, &to, title).await
    }

    async fn write_then_delete(&self, document: &Document, to: &str, title: Option<&str>) -> Result<Document> {
        let id = &document.id;
        let current = match self.store.read_file(&document.path).await {
            Ok(file) => file,
            Err(e) => return Err(self.move_failed(id, e.into())),
        };

        let mut moved = Document::from_content(
            id.clone(),
            to,
            &current.content,
            current.version_token.clone(),
        );
        // Plain moves copy the bytes as they are
        let (content, message) = match title {
            Some(title) => {
                let message = format!("Rename task: {} -> {}", moved.title, title);
                moved.title = title.to_string();
                (moved.render(), message)
            }
            None => (
                current.content.clone(),
                format!("Move task: {} -> {}", document.path, to),
            ),
        };

        if to == document.path {
            // Same file name: rewrite in place against the version just read
            return match self
                .store
                .write_file(to, &content, &message, Some(&current.version_token))
                .await
            {
                Ok(token) => {
                    moved.version_token = token;
                    self.cache.insert(moved.clone());
                    self.finish(id);
                    self.events.emit(SyncEvent::DocumentUpdated {
                        id: id.clone(),
                        path: to.to_string(),
                        retries: 0,
                        timestamp: now_ms(),
                    });
                    Ok(moved)
                }
                Err(e) => Err(self.move_failed(id, e.into())),
            };
        }

        let to_token = match self.store.write_file(to, &content, &message, None).await {
            Ok(token) => token,
            Err(StoreError::AlreadyExists { path }) => {
                // A copy left by an earlier attempt counts as written
                match self.store.read_file(to).await {
                    Ok(existing) if existing.content == content => existing.version_token,
                    _ => {
                        return Err(self.move_failed(id, StoreError::AlreadyExists { path }.into()));
                    }
                }
            }
            Err(e) => return Err(self.move_failed(id, e.into())),
        };
        debug!(id = %id, from = %document.path, to, "Move wrote new copy");

        moved.version_token = to_token.clone();
        self.overlay.mark_written(to);
        self.cache.insert(moved.clone());
        let intent = MoveIntent {
            from: document.path.clone(),
            to: to.to_string(),
            from_token: current.version_token,
            to_token,
        };
        self.set_intent(id, intent.clone());
        self.finish_move(&moved, intent).await
    }

    /// Delete step of a move. `document` is the cached document, normally
    /// already at the new path.
    async fn finish_move(&self, document: &Document, intent: MoveIntent) -> Result<Document> {
        let id = &document.id;
        let message = format!("Move task: {} -> {}", intent.from, intent.to);

        match self
            .store
            .delete_file(&intent.from, &intent.from_token, &message)
            .await
        {
            Ok(()) => {}
            Err(StoreError::NotFound { .. }) => {
                debug!(id = %id, path = %intent.from, "Old copy already gone");
            }
            Err(StoreError::VersionConflict { .. }) => {
                let remote_content = self
                    .store
                    .read_file(&intent.from)
                    .await
                    .ok()
                    .map(|f| f.content);
                let err = SyncError::VersionConflict {
                    path: intent.from.clone(),
                    attempts: 1,
                    remote_content,
                };
                warn!(id = %id, path = %intent.from, "Old copy changed since the move started");
                self.events.emit(SyncEvent::ConflictDetected {
                    id: id.clone(),
                    path: intent.from.clone(),
                    attempt: 1,
                    timestamp: now_ms(),
                });
                self.fail(id, OperationState::Conflict, &err);
                return Err(err);
            }
            Err(cause) => {
                warn!(id = %id, from = %intent.from, to = %intent.to, error = %cause, "Move left a copy behind");
                self.bump_attempts(id);
                self.fail(id, OperationState::PendingDelete, &cause);
                self.events.emit(SyncEvent::PartialFailure {
                    id: id.clone(),
                    from: intent.from.clone(),
                    to: intent.to.clone(),
                    error: cause.to_string(),
                    timestamp: now_ms(),
                });
                return Err(SyncError::PartialFailure {
                    id: id.clone(),
                    completed: MoveStep::Write,
                    pending: MoveStep::Delete,
                    intent,
                    cause,
                });
            }
        }

        self.overlay.mark_deleted(&intent.from);
        let moved = if document.path == intent.to {
            document.clone()
        } else {
            document.relocated(&intent.to, intent.to_token.clone())
        };
        self.cache.insert(moved.clone());
        self.clear_pending(id);
        info!(id = %id, from = %intent.from, to = %intent.to, "Task moved");
        self.events.emit(SyncEvent::DocumentMoved {
            id: id.clone(),
            from: intent.from,
            to: intent.to,
            timestamp: now_ms(),
        });
        Ok(moved)
    }

    /// Record a move that failed before anything changed remotely.
    fn move_failed(&self, id: &DocId, err: SyncError) -> SyncError {
        let state = if err.is_conflict() {
            OperationState::Conflict
        } else {
            OperationState::Clean
        };
        self.fail(id, state, &err);
        err
    }
}
