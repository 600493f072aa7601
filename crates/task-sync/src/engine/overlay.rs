//! Local knowledge of changes the remote listing has not caught up with yet.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use web_time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Written,
    Deleted,
}

/// Paths this engine wrote or deleted that the listing may still misreport.
///
/// Entries go away once a listing agrees with them, or after `grace` so a
/// change made elsewhere later is not masked forever.
pub(crate) struct ListingOverlay {
    changes: Mutex<HashMap<String, (Change, Instant)>>,
    grace: Duration,
}

impl ListingOverlay {
    pub fn new(grace: Duration) -> Self {
        Self {
            changes: Mutex::new(HashMap::new()),
            grace,
        }
    }

    fn changes(&self) -> MutexGuard<'_, HashMap<String, (Change, Instant)>> {
        self.changes.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn mark_written(&self, path: &str) {
        self.changes()
            .insert(path.to_string(), (Change::Written, Instant::now()));
    }

    pub fn mark_deleted(&self, path: &str) {
        self.changes()
            .insert(path.to_string(), (Change::Deleted, Instant::now()));
    }

    fn is(&self, path: &str, change: Change) -> bool {
        self.changes()
            .get(path)
            .is_some_and(|(c, at)| *c == change && at.elapsed() < self.grace)
    }

    /// A poll saw the listing agree with our change.
    pub fn settle(&self, path: &str) {
        self.changes().remove(path);
    }

    /// Written by us, possibly not listed yet.
    pub fn is_written(&self, path: &str) -> bool {
        self.is(path, Change::Written)
    }

    /// Deleted by us, possibly still listed.
    pub fn is_deleted(&self, path: &str) -> bool {
        self.is(path, Change::Deleted)
    }

    /// Drop entries the listing now agrees with, and expired ones.
    pub fn reconcile(&self, listed: &HashSet<String>) {
        let grace = self.grace;
        self.changes().retain(|path, (change, at)| {
            let settled = match change {
                Change::Written => listed.contains(path),
                Change::Deleted => !listed.contains(path),
            };
            !settled && at.elapsed() < grace
        });
    }

    pub fn len(&self) -> usize {
        self.changes().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconcile_settles_entries() {
        let overlay = ListingOverlay::new(Duration::from_secs(60));
        overlay.mark_written("todos/new.md");
        overlay.mark_deleted("todos/old.md");

        // Listing still stale on both
        let stale: HashSet<String> = ["todos/old.md".to_string()].into();
        overlay.reconcile(&stale);
        assert!(overlay.is_written("todos/new.md"));
        assert!(overlay.is_deleted("todos/old.md"));

        let fresh: HashSet<String> = ["todos/new.md".to_string()].into();
        overlay.reconcile(&fresh);
        assert_eq!(overlay.len(), 0);
    }

    #[test]
    fn test_entries_expire() {
        let overlay = ListingOverlay::new(Duration::ZERO);
        overlay.mark_written("todos/new.md");
        assert!(!overlay.is_written("todos/new.md"));
        overlay.reconcile(&HashSet::new());
        assert_eq!(overlay.len(), 0);
    }

    #[test]
    fn test_settled_path_is_forgotten() {
        let overlay = ListingOverlay::new(Duration::from_secs(60));
        overlay.mark_written("todos/a.md");
        overlay.settle("todos/a.md");
        assert!(!overlay.is_written("todos/a.md"));
        assert_eq!(overlay.len(), 0);
    }

    #[test]
    fn test_latest_change_wins() {
        let overlay = ListingOverlay::new(Duration::from_secs(60));
        overlay.mark_written("todos/a.md");
        overlay.mark_deleted("todos/a.md");
        assert!(overlay.is_deleted("todos/a.md"));
        assert!(!overlay.is_written("todos/a.md"));
    }
}
