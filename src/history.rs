//! Read-only view over a store's history

use crate::commit::Commit;
use crate::error::SnapshotResult;
use crate::store::VersionStore;

/// Listing and inspection of snapshots
///
/// Holds only a shared borrow of the store and never mutates it, so it does
/// not go through a job's execution lane and may be used concurrently.
#[derive(Clone, Copy)]
pub struct History<'a> {
    store: &'a VersionStore,
}

impl<'a> History<'a> {
    pub fn new(store: &'a VersionStore) -> Self {
        Self { store }
    }

    /// All snapshots, newest first.
    pub async fn list(&self) -> SnapshotResult<Vec<Commit>> {
        self.store.commits().await
    }

    /// One snapshot, `None` when the id is unknown.
    pub async fn get(&self, id: &str) -> SnapshotResult<Option<Commit>> {
        self.store.commit_by_id(id).await
    }

    /// Latest snapshot, `None` when nothing was captured yet.
    pub async fn head(&self) -> SnapshotResult<Option<Commit>> {
        self.store.head().await
    }

    /// Paths changed in the working tree since `id`.
    pub async fn diff(&self, id: &str) -> SnapshotResult<Vec<String>> {
        self.store.diff(id).await
    }
}
