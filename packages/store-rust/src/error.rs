//! Errors surfaced by the multi-backend store and transactions.

use multistore_core::ScopeError;

use crate::backend::BackendError;
use crate::transaction::TransactionState;

/// Error returned by [`MultiStore`](crate::MultiStore) and
/// [`MultiTransaction`](crate::MultiTransaction) operations.
///
/// Fan-out writes and commits are not compensated: when a `Backend` error is
/// returned from `set`, `remove`, `commit` or `clear`, backends that already
/// succeeded keep their changes.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A scope named a backend that is not registered. Raised before any
    /// backend I/O.
    #[error(transparent)]
    Scope(#[from] ScopeError),
    /// A call to one backend failed.
    #[error("backend '{backend}' failed: {source}")]
    Backend {
        backend: String,
        #[source]
        source: BackendError,
    },
    /// The multi-backend transaction is no longer open.
    #[error("transaction is already {0}")]
    TransactionFinished(TransactionState),
}

impl StoreError {
    pub(crate) fn backend(name: &str, source: BackendError) -> Self {
        Self::Backend {
            backend: name.to_string(),
            source,
        }
    }

    /// Whether the failure was a backend's optimistic-concurrency conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Backend { source, .. } if source.is_conflict())
    }

    /// Name of the failing backend, if the error came from one.
    #[must_use]
    pub fn backend_name(&self) -> Option<&str> {
        match self {
            Self::Backend { backend, .. } => Some(backend),
            _ => None,
        }
    }
}

/// Returns the first error of a completed fan-out, if any.
pub(crate) fn first_error<T>(results: Vec<Result<T, StoreError>>) -> Result<Vec<T>, StoreError> {
    results.into_iter().collect()
}
