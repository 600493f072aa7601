//! Remote store abstraction.

mod content_hash;
mod guarded;
mod memory;
mod traits;

pub use content_hash::ContentHash;
pub use guarded::GuardedStore;
pub use memory::{InMemoryStore, StoreOp};
pub use traits::{
    CommitId, CommitRecord, DirEntry, EntryKind, FileContent, RemoteStore, Result, StoreError,
    VersionToken,
};
