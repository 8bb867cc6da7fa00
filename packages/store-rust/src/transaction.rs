//! Multi-backend transaction: one native transaction per registered backend,
//! committed or canceled together as best-effort parallel fan-out.

use std::fmt;
use std::sync::Arc;

use futures_util::future::join_all;
use multistore_core::{KeyValuePair, Registry, ScanArgs, ScopeError, StorageScope, Tuple};
use parking_lot::Mutex;
use serde::Serialize;

use crate::backend::{BackendTransaction, StoreValue};
use crate::error::{first_error, StoreError};
use crate::operator::ScopedOperator;

/// Lifecycle of a [`MultiTransaction`]. `Committed` and `Canceled` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    Open,
    Committed,
    Canceled,
}

impl TransactionState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Open)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Committed => "committed",
            Self::Canceled => "canceled",
        })
    }
}

type Handle<V> = Arc<dyn BackendTransaction<V>>;

/// A transaction spanning every backend of a
/// [`MultiStore`](crate::MultiStore).
///
/// Holds a native transaction for every registered backend, regardless of
/// the scope it was opened with, so [`with_scope`](Self::with_scope) can
/// address any of them. Commit is not atomic across backends: if one backend
/// fails to commit, the others that succeeded stay committed.
pub struct MultiTransaction<V: StoreValue> {
    handles: Registry<Handle<V>>,
    operator: ScopedOperator<dyn BackendTransaction<V>>,
    state: Mutex<TransactionState>,
}

impl<V: StoreValue> MultiTransaction<V> {
    pub(crate) fn new(
        handles: Registry<Handle<V>>,
        scope: Option<&StorageScope>,
    ) -> Result<Self, ScopeError> {
        let operator = ScopedOperator::resolve(&handles, scope)?;
        Ok(Self {
            handles,
            operator,
            state: Mutex::new(TransactionState::Open),
        })
    }

    #[must_use]
    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        match self.state() {
            TransactionState::Open => Ok(()),
            finished => Err(StoreError::TransactionFinished(finished)),
        }
    }

    /// Merged scan over the transaction's read scope, observing its own
    /// staged writes where the backend supports it.
    ///
    /// # Errors
    ///
    /// [`StoreError::TransactionFinished`] once committed or canceled, or the
    /// first backend failure.
    pub async fn scan(&self, args: &ScanArgs) -> Result<Vec<KeyValuePair<V>>, StoreError> {
        self.ensure_open()?;
        self.operator.scan(args).await
    }

    /// # Errors
    ///
    /// Same as [`scan`](Self::scan).
    pub async fn exists(&self, key: &Tuple) -> Result<bool, StoreError> {
        self.ensure_open()?;
        self.operator.exists(key).await
    }

    /// Stages `key = value` on every backend of the write scope.
    ///
    /// # Errors
    ///
    /// [`StoreError::TransactionFinished`] once committed or canceled, or the
    /// first backend failure.
    pub async fn set(&self, key: &Tuple, value: V) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.operator.set(key, value).await
    }

    /// Stages removal of `key` on every backend of the write scope.
    ///
    /// # Errors
    ///
    /// Same as [`set`](Self::set).
    pub async fn remove(&self, key: &Tuple) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.operator.remove(key).await
    }

    /// An operator with a different scope over this transaction's already
    /// open handles. Its writes land in this transaction.
    ///
    /// The operator talks to the backend transactions directly and does not
    /// see this transaction's state. Once the transaction is committed or
    /// canceled, its calls fail with [`StoreError::Backend`] wrapping
    /// [`BackendError::TransactionFinished`](crate::BackendError::TransactionFinished),
    /// not with [`StoreError::TransactionFinished`].
    ///
    /// # Errors
    ///
    /// [`ScopeError::UnknownBackend`] if `scope` names an unregistered
    /// backend.
    pub fn with_scope(
        &self,
        scope: &StorageScope,
    ) -> Result<ScopedOperator<dyn BackendTransaction<V>>, ScopeError> {
        ScopedOperator::resolve(&self.handles, Some(scope))
    }

    /// Moves out of `Open`, returning the previous state.
    fn finish(&self, next: TransactionState) -> TransactionState {
        let mut state = self.state.lock();
        let previous = *state;
        if previous == TransactionState::Open {
            *state = next;
        }
        previous
    }

    /// Commits every backend transaction concurrently.
    ///
    /// Calling `commit` or `cancel` again afterwards logs a warning and does
    /// nothing.
    ///
    /// # Errors
    ///
    /// The first backend commit failure. Backends that committed are not
    /// rolled back and the transaction stays `Committed`.
    pub async fn commit(&self) -> Result<(), StoreError> {
        let previous = self.finish(TransactionState::Committed);
        if previous.is_terminal() {
            tracing::warn!(state = %previous, "commit on a finished transaction ignored");
            return Ok(());
        }

        tracing::debug!(backends = self.handles.len(), "committing multi-backend transaction");
        let results = join_all(self.handles.all().iter().map(|b| async move {
            b.handle
                .commit()
                .await
                .map_err(|source| StoreError::backend(&b.name, source))
        }))
        .await;
        first_error(results).map(|_| ())
    }

    /// Cancels every backend transaction concurrently.
    ///
    /// # Errors
    ///
    /// The first backend cancel failure.
    pub async fn cancel(&self) -> Result<(), StoreError> {
        let previous = self.finish(TransactionState::Canceled);
        if previous.is_terminal() {
            tracing::warn!(state = %previous, "cancel on a finished transaction ignored");
            return Ok(());
        }

        tracing::debug!(backends = self.handles.len(), "canceling multi-backend transaction");
        let results = join_all(self.handles.all().iter().map(|b| async move {
            b.handle
                .cancel()
                .await
                .map_err(|source| StoreError::backend(&b.name, source))
        }))
        .await;
        first_error(results).map(|_| ())
    }
}

impl<V: StoreValue> fmt::Debug for MultiTransaction<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiTransaction")
            .field("backends", &self.handles.names().collect::<Vec<_>>())
            .field("state", &self.state())
            .finish()
    }
}
