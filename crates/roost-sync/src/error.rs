use thiserror::Error;

use roost_backend::StoreError;

/// Failure taxonomy of the synchronization layer. Backend errors are
/// converted at the operation boundary; nothing below this surfaces to
/// callers.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A read failed. The caller shows an empty/error state, never a
    /// partial list.
    #[error("fetch failed: {0}")]
    Fetch(#[source] StoreError),

    /// A write failed after the optimistic local apply; the apply has been
    /// rolled back.
    #[error("persist failed: {0}")]
    Persist(#[source] StoreError),

    /// Rejected before any network call.
    #[error("{0}")]
    Validation(String),

    /// No active session; the caller routes to login instead of showing an
    /// error.
    #[error("no active session")]
    AuthRequired,
}
