//! Per-document operation queue.
//!
//! Every operation on a document runs while holding that document's slot, a
//! FIFO `tokio::sync::Mutex`, so operations on one document never interleave
//! while operations on different documents run concurrently.
//!
//! Visibility polls run after the slot is released, as spawned tasks registered
//! on the slot. Acquiring the slot for the next operation aborts the outstanding
//! poll and bumps the slot generation; the superseded operation sees both and
//! leaves state alone.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::debug;

use crate::store::VersionToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Create,
    Update,
    Move,
    Delete,
}

/// Per-document state.
///
/// `Clean -> PendingWrite -> {Clean | Conflict}` and
/// `Clean -> PendingDelete -> {Deleted | Conflict}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationState {
    Clean,
    PendingWrite,
    PendingDelete,
    Conflict,
    Deleted,
}

/// Step of a two-phase move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MoveStep {
    Write,
    Delete,
}

/// Resumable marker of a move whose write landed but whose delete did not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveIntent {
    pub from: String,
    pub to: String,
    /// Token of the old copy, required to delete it
    pub from_token: VersionToken,
    /// Token of the new copy
    pub to_token: VersionToken,
}

/// Last operation issued for a document, kept while it is unfinished or failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    pub kind: OperationKind,
    pub state: OperationState,
    pub attempts: u32,
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<MoveIntent>,
}

impl PendingOperation {
    pub fn new(kind: OperationKind, state: OperationState) -> Self {
        Self {
            kind,
            state,
            attempts: 0,
            last_error: None,
            intent: None,
        }
    }

    /// Whether a later call can pick this operation up again.
    pub fn is_resumable(&self) -> bool {
        self.intent.is_some()
    }
}

struct Slot {
    lock: Arc<tokio::sync::Mutex<()>>,
    generation: AtomicU64,
    poll: Mutex<Option<AbortHandle>>,
}

impl Slot {
    fn new() -> Self {
        Self {
            lock: Arc::new(tokio::sync::Mutex::new(())),
            generation: AtomicU64::new(0),
            poll: Mutex::new(None),
        }
    }

    fn poll(&self) -> MutexGuard<'_, Option<AbortHandle>> {
        self.poll.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Ownership of a queue slot. Dropping it lets the next operation in.
pub struct SlotGuard {
    generation: u64,
    slot: Arc<Slot>,
    _guard: OwnedMutexGuard<()>,
}

impl SlotGuard {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Spawn a poll owned by this operation. The poll keeps running after the
    /// guard is dropped until it finishes or the next operation aborts it.
    pub fn spawn_poll<F>(&self, poll: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handle = tokio::spawn(poll);
        if let Some(previous) = self.slot.poll().replace(handle.abort_handle()) {
            previous.abort();
        }
        handle
    }
}

#[derive(Default)]
pub struct OperationQueue {
    slots: Mutex<HashMap<String, Arc<Slot>>>,
    /// Source of generations, shared by all slots so a pruned and recreated
    /// slot never hands out a value seen before
    generations: AtomicU64,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Arc<Slot>>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn slot(&self, key: &str) -> Arc<Slot> {
        Arc::clone(
            self.slots()
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Slot::new())),
        )
    }

    /// Wait for the slot of `key`, in arrival order.
    pub async fn acquire(&self, key: &str) -> SlotGuard {
        let slot = self.slot(key);
        let guard = Arc::clone(&slot.lock).lock_owned().await;
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        slot.generation.store(generation, Ordering::SeqCst);
        if let Some(poll) = slot.poll().take() {
            if !poll.is_finished() {
                debug!(key, "Cancelling poll of superseded operation");
            }
            poll.abort();
        }
        SlotGuard {
            generation,
            slot,
            _guard: guard,
        }
    }

    /// Take the slot of `key` only if nobody holds it.
    ///
    /// Meant for read-only passes over many documents: it neither supersedes
    /// the previous operation nor cancels its poll.
    pub fn try_acquire(&self, key: &str) -> Option<SlotGuard> {
        let slot = self.slot(key);
        let guard = Arc::clone(&slot.lock).try_lock_owned().ok()?;
        let generation = slot.generation.load(Ordering::SeqCst);
        Some(SlotGuard {
            generation,
            slot,
            _guard: guard,
        })
    }

    /// Whether the operation holding `generation` is still the latest one for `key`.
    pub fn is_current(&self, key: &str, generation: u64) -> bool {
        self.slots()
            .get(key)
            .is_some_and(|slot| slot.generation.load(Ordering::SeqCst) == generation)
    }

    /// Drop slots that are idle and have no running poll.
    pub fn prune(&self) {
        self.slots().retain(|_, slot| {
            let busy = Arc::strong_count(&slot.lock) > 1 || slot.lock.try_lock().is_err();
            let polling = slot.poll().as_ref().is_some_and(|p| !p.is_finished());
            busy || polling || Arc::strong_count(slot) > 1
        });
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
