//! Scope-bound read/write fan-out over a fixed set of backend handles.
//!
//! A [`ScopedOperator`] is built once from a registry and a scope; its read
//! and write handle lists never change afterwards. `H` is either a raw
//! backend (`dyn OrderedBackend<V>`, reads only) or a native transaction
//! (`dyn BackendTransaction<V>`, reads and writes).

use std::fmt;
use std::sync::Arc;

use futures_util::future::{join_all, try_join_all};
use multistore_core::{
    merge_entries, KeyValuePair, Named, Registry, ScanArgs, ScopeContext, ScopeError, StorageScope,
    Tuple,
};

use crate::backend::{BackendTransaction, StoreValue, TupleRead};
use crate::error::{first_error, StoreError};

/// Read and write fan-out over the handles a scope resolved to.
///
/// Obtained from [`MultiTransaction::with_scope`](crate::MultiTransaction::with_scope)
/// or built directly with [`resolve`](Self::resolve).
pub struct ScopedOperator<H: ?Sized> {
    read: Vec<Named<Arc<H>>>,
    write: Vec<Named<Arc<H>>>,
}

impl<H: ?Sized> Clone for ScopedOperator<H> {
    fn clone(&self) -> Self {
        Self {
            read: self.read.clone(),
            write: self.write.clone(),
        }
    }
}

impl<H: ?Sized> fmt::Debug for ScopedOperator<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedOperator")
            .field("read", &self.read_backends().collect::<Vec<_>>())
            .field("write", &self.write_backends().collect::<Vec<_>>())
            .finish()
    }
}

impl<H: ?Sized> ScopedOperator<H> {
    /// Resolves both halves of `scope` against `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::UnknownBackend`] if the scope names an
    /// unregistered backend.
    pub fn resolve(
        registry: &Registry<Arc<H>>,
        scope: Option<&StorageScope>,
    ) -> Result<Self, ScopeError> {
        Ok(Self {
            read: registry.resolve(scope, ScopeContext::Read)?,
            write: registry.resolve(scope, ScopeContext::Write)?,
        })
    }

    /// Names of the backends consulted by reads, in resolution order.
    pub fn read_backends(&self) -> impl Iterator<Item = &str> {
        self.read.iter().map(|b| b.name.as_str())
    }

    /// Names of the backends receiving writes, in resolution order.
    pub fn write_backends(&self) -> impl Iterator<Item = &str> {
        self.write.iter().map(|b| b.name.as_str())
    }

    /// Scans every read backend concurrently and merges the results into one
    /// ordered sequence.
    ///
    /// Each backend receives the same `args`; the merged output is truncated
    /// to `args.limit`. Entries present in several backends appear once per
    /// backend.
    ///
    /// # Errors
    ///
    /// Returns the first backend failure; no partial result is returned.
    pub async fn scan(&self, args: &ScanArgs) -> Result<Vec<KeyValuePair<H::Value>>, StoreError>
    where
        H: TupleRead,
    {
        tracing::debug!(backends = self.read.len(), reverse = args.reverse, "fan-out scan");
        let per_backend = try_join_all(self.read.iter().map(|b| async move {
            b.handle
                .scan(args)
                .await
                .map_err(|source| StoreError::backend(&b.name, source))
        }))
        .await?;

        let mut merged = merge_entries(per_backend, args.reverse);
        if let Some(limit) = args.limit {
            merged.truncate(limit);
        }
        Ok(merged)
    }

    /// Whether any read backend holds `key`.
    ///
    /// # Errors
    ///
    /// Returns the first backend failure.
    pub async fn exists(&self, key: &Tuple) -> Result<bool, StoreError>
    where
        H: TupleRead,
    {
        let found = try_join_all(self.read.iter().map(|b| async move {
            b.handle
                .exists(key)
                .await
                .map_err(|source| StoreError::backend(&b.name, source))
        }))
        .await?;
        Ok(found.into_iter().any(|present| present))
    }

    /// Stages `key = value` on every write backend.
    ///
    /// # Errors
    ///
    /// Every backend is attempted; the first failure is returned and
    /// backends that accepted the write keep it.
    pub async fn set<V: StoreValue>(&self, key: &Tuple, value: V) -> Result<(), StoreError>
    where
        H: BackendTransaction<V>,
    {
        let results = join_all(self.write.iter().map(|b| {
            let value = value.clone();
            async move {
                b.handle
                    .set(key, value)
                    .await
                    .map_err(|source| StoreError::backend(&b.name, source))
            }
        }))
        .await;
        first_error(results).map(|_| ())
    }

    /// Stages removal of `key` on every write backend.
    ///
    /// # Errors
    ///
    /// Same policy as [`set`](Self::set).
    pub async fn remove<V: StoreValue>(&self, key: &Tuple) -> Result<(), StoreError>
    where
        H: BackendTransaction<V>,
    {
        let results = join_all(self.write.iter().map(|b| async move {
            b.handle
                .remove(key)
                .await
                .map_err(|source| StoreError::backend(&b.name, source))
        }))
        .await;
        first_error(results).map(|_| ())
    }
}
