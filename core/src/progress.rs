use crate::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Observer for long-running operations. Every hook defaults to a no-op and
/// none of them can influence the outcome.
///
/// Counts passed to the per-item hooks start at 1 and strictly increase
/// within one operation, even when the work itself runs concurrently.
#[allow(unused_variables)]
pub trait Progress: Send + Sync {
    fn index_before_walk(&self, data_path: &str) {}
    fn index_walk(&self, path: &str) {}
    fn index_before_get_latest_files(&self, total: usize) {}
    fn index_get_latest_file(&self, count: usize, total: usize) {}
    fn index_upsert_files(&self, total: usize) {}
    fn index_upsert_file(&self, count: usize, total: usize) {}

    fn checkout_before_walk(&self, data_path: &str) {}
    fn checkout_walk(&self, path: &str) {}
    fn checkout_upsert_files(&self, total: usize) {}
    fn checkout_upsert_file(&self, count: usize, total: usize) {}
    fn checkout_remove_files(&self, total: usize) {}
    fn checkout_remove_file(&self, count: usize, total: usize) {}

    fn purge_delete_objects(&self, total: usize) {}
    fn purge_delete_object(&self, count: usize, total: usize) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {}

/// Cooperative cancellation shared between a caller and a running operation.
/// Checked between files; work already in flight completes.
#[derive(Debug, Default, Clone)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}
