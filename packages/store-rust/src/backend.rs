//! Contract every ordered key-value backend fulfills.
//!
//! The coordinator never looks inside a backend: it reads through
//! [`TupleRead`], opens native transactions through
//! [`OrderedBackend::transact`], and writes through [`BackendTransaction`].
//! Implementations live in [`crate::backends`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::{join_all, BoxFuture};
use multistore_core::{KeyValuePair, ScanArgs, Tuple};

/// Bounds every stored value type must satisfy.
pub trait StoreValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> StoreValue for T {}

/// Failure of a single backend call.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Optimistic concurrency check failed; the transaction applied nothing.
    #[error("transaction conflict: data read by the transaction changed before commit")]
    Conflict,
    /// The native transaction was already committed or canceled.
    #[error("transaction already committed or canceled")]
    TransactionFinished,
    /// Any other failure of the underlying storage.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl BackendError {
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}

/// Writes committed to a backend, as delivered to subscribers.
///
/// Keys are relative to the subscribed handle's subspace.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteBatch<V> {
    pub set: Vec<KeyValuePair<V>>,
    pub remove: Vec<Tuple>,
}

impl<V> WriteBatch<V> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty()
    }
}

impl<V> Default for WriteBatch<V> {
    fn default() -> Self {
        Self {
            set: Vec::new(),
            remove: Vec::new(),
        }
    }
}

/// Subscriber callback. Invoked once per committed batch that touches the
/// subscribed range.
pub type Callback<V> = Arc<dyn Fn(WriteBatch<V>) + Send + Sync>;

/// Handle to an active subscription.
///
/// Dropping the handle without calling [`unsubscribe`](Self::unsubscribe)
/// leaves the listener registered.
#[must_use = "a subscription stays active until unsubscribe() is awaited"]
pub struct Subscription {
    unsubscribe: BoxFuture<'static, ()>,
}

impl Subscription {
    /// Wraps the future that tears the subscription down.
    pub fn new<F>(unsubscribe: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            unsubscribe: Box::pin(unsubscribe),
        }
    }

    /// Combines several subscriptions into one whose unsubscribe completes
    /// once every part has unsubscribed.
    pub fn all(parts: Vec<Subscription>) -> Self {
        Self::new(async move {
            join_all(parts.into_iter().map(|part| part.unsubscribe)).await;
        })
    }

    /// Removes the subscription.
    pub async fn unsubscribe(self) {
        self.unsubscribe.await;
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Read operations shared by backends and their transactions.
#[async_trait]
pub trait TupleRead: Send + Sync {
    type Value: StoreValue;

    /// Entries within `args`, ordered by key (descending if `args.reverse`),
    /// at most `args.limit` of them.
    async fn scan(&self, args: &ScanArgs)
        -> Result<Vec<KeyValuePair<Self::Value>>, BackendError>;

    /// Whether `key` is present.
    async fn exists(&self, key: &Tuple) -> Result<bool, BackendError>;
}

/// A named, independently addressable ordered key-value store.
///
/// Used as `Arc<dyn OrderedBackend<V>>`.
#[async_trait]
pub trait OrderedBackend<V: StoreValue>: TupleRead<Value = V> {
    /// Registers `callback` for committed writes whose keys fall in `args`.
    async fn subscribe(
        &self,
        args: &ScanArgs,
        callback: Callback<V>,
    ) -> Result<Subscription, BackendError>;

    /// Opens a native transaction.
    async fn transact(&self) -> Result<Arc<dyn BackendTransaction<V>>, BackendError>;

    /// A view restricted to keys under `prefix`, with `prefix` stripped from
    /// observed keys and prepended to written ones.
    fn subspace(&self, prefix: &Tuple) -> Arc<dyn OrderedBackend<V>>;
}

/// Native transaction of one backend.
///
/// Writes are staged until [`commit`](Self::commit). After commit or cancel
/// every call fails with [`BackendError::TransactionFinished`].
#[async_trait]
pub trait BackendTransaction<V: StoreValue>: TupleRead<Value = V> {
    async fn set(&self, key: &Tuple, value: V) -> Result<(), BackendError>;

    async fn remove(&self, key: &Tuple) -> Result<(), BackendError>;

    async fn commit(&self) -> Result<(), BackendError>;

    async fn cancel(&self) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn combined_subscription_runs_every_part() {
        let counter = Arc::new(AtomicUsize::new(0));
        let parts = (0..3)
            .map(|_| {
                let counter = Arc::clone(&counter);
                Subscription::new(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        let combined = Subscription::all(parts);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        combined.unsubscribe().await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn write_batch_emptiness() {
        let mut batch: WriteBatch<u8> = WriteBatch::default();
        assert!(batch.is_empty());
        batch.remove.push(Tuple::empty());
        assert!(!batch.is_empty());
    }

    #[test]
    fn conflict_is_detectable() {
        assert!(BackendError::Conflict.is_conflict());
        assert!(!BackendError::TransactionFinished.is_conflict());
        assert!(!BackendError::Storage(anyhow::anyhow!("disk")).is_conflict());
    }
}
