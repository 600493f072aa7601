//! task-sync: Sync engine and history reconstruction for task documents kept
//! in a hosted, version-controlled, eventually consistent content store.
//!
//! This crate provides:
//! - The `RemoteStore` contract plus an in-memory store for tests
//! - Conflict-free, date-stamped path resolution
//! - Create, update, move and delete under optimistic concurrency, with
//!   bounded visibility polling for listings that lag behind writes
//! - Content and metadata of a document at any commit, following renames

pub mod cache;
pub mod config;
pub mod document;
pub mod engine;
pub mod events;
pub mod history;
pub mod markdown;
pub mod path;
pub mod queue;
pub mod retry;
pub mod store;

pub use cache::TodoCache;
pub use config::{ConfigError, HistoryConfig, SyncConfig};
pub use document::{DocId, Document, MetadataUpdate, Priority, TaskDraft, TaskMetadata};
pub use engine::{CreateOutcome, DeleteOutcome, RefreshReport, SyncEngine, SyncError, Visibility};
pub use events::{EventBus, Subscription, SyncEvent};
pub use history::{HistoricalContent, HistoricalMetadata, HistoryError, HistoryReconstructor};
pub use queue::{MoveIntent, OperationState, PendingOperation};
pub use retry::RetryPolicy;
pub use store::{CommitId, CommitRecord, InMemoryStore, RemoteStore, StoreError, VersionToken};
