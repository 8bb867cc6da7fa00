//! The multi-backend store: several named ordered backends presented as one
//! logical keyspace.

use std::fmt;
use std::sync::Arc;

use futures_util::future::{join_all, BoxFuture};
use multistore_core::{
    KeyValuePair, Registry, ScanArgs, ScopeContext, ScopeError, StorageScope, Tuple,
};

use crate::backend::{
    BackendError, BackendTransaction, Callback, OrderedBackend, StoreValue, Subscription,
    TupleRead,
};
use crate::config::MultiStoreConfig;
use crate::error::{first_error, StoreError};
use crate::operator::ScopedOperator;
use crate::transaction::MultiTransaction;

type Backend<V> = Arc<dyn OrderedBackend<V>>;

/// Routes reads and writes over a fixed set of named backends.
///
/// Reads fan out to the backends of the read scope and merge their sorted
/// results. Writes only happen through transactions ([`transact`],
/// [`auto_transact`]), which fan out to the write scope. Cloning is cheap and
/// shares the backends.
///
/// [`transact`]: Self::transact
/// [`auto_transact`]: Self::auto_transact
pub struct MultiStore<V: StoreValue> {
    registry: Registry<Backend<V>>,
    config: MultiStoreConfig,
}

impl<V: StoreValue> Clone for MultiStore<V> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            config: self.config.clone(),
        }
    }
}

impl<V: StoreValue> MultiStore<V> {
    /// Builds a store over `backends`, registered in iteration order.
    ///
    /// # Errors
    ///
    /// [`ScopeError::DuplicateBackend`] if a name repeats, or
    /// [`ScopeError::UnknownBackend`] if the configured default scope names
    /// an unregistered backend.
    pub fn new<N, I>(backends: I, config: MultiStoreConfig) -> Result<Self, ScopeError>
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, Backend<V>)>,
    {
        let registry = Registry::new(backends)?;
        if let Some(scope) = &config.default_scope {
            registry.validate(scope)?;
        }
        tracing::debug!(
            backends = ?registry.names().collect::<Vec<_>>(),
            "multi-backend store created"
        );
        Ok(Self { registry, config })
    }

    #[must_use]
    pub fn config(&self) -> &MultiStoreConfig {
        &self.config
    }

    /// Registered backend names, in registration order.
    pub fn backend_names(&self) -> impl Iterator<Item = &str> {
        self.registry.names()
    }

    /// The backend registered as `name`.
    #[must_use]
    pub fn backend(&self, name: &str) -> Option<&Backend<V>> {
        self.registry.get(name)
    }

    /// A store over the same backends with `scope` as its default scope.
    ///
    /// # Errors
    ///
    /// [`ScopeError::UnknownBackend`] if `scope` names an unregistered
    /// backend.
    pub fn with_scope(&self, scope: StorageScope) -> Result<Self, ScopeError> {
        self.registry.validate(&scope)?;
        Ok(Self {
            registry: self.registry.clone(),
            config: MultiStoreConfig {
                default_scope: Some(scope),
                ..self.config.clone()
            },
        })
    }

    /// A store whose backends only see keys under `prefix`, with `prefix`
    /// stripped from every observed key and prepended to every written one.
    #[must_use]
    pub fn subspace(&self, prefix: &Tuple) -> Self {
        Self {
            registry: self.registry.map(|_, backend| backend.subspace(prefix)),
            config: self.config.clone(),
        }
    }

    fn default_scope(&self) -> Option<&StorageScope> {
        self.config.default_scope.as_ref()
    }

    fn operator(&self) -> Result<ScopedOperator<dyn OrderedBackend<V>>, ScopeError> {
        ScopedOperator::resolve(&self.registry, self.default_scope())
    }

    /// Entries within `args` across the read scope, as one ordered sequence.
    ///
    /// # Errors
    ///
    /// The first backend failure; partial results are discarded.
    pub async fn scan(&self, args: &ScanArgs) -> Result<Vec<KeyValuePair<V>>, StoreError> {
        self.operator()?.scan(args).await
    }

    /// Whether any backend of the read scope holds `key`.
    ///
    /// # Errors
    ///
    /// The first backend failure.
    pub async fn exists(&self, key: &Tuple) -> Result<bool, StoreError> {
        self.operator()?.exists(key).await
    }

    /// Subscribes `callback` on every backend of the read scope.
    ///
    /// Each backend invokes `callback` on its own; batches from different
    /// backends are not merged or ordered relative to each other.
    ///
    /// # Errors
    ///
    /// The first backend failure. Subscriptions already established on other
    /// backends are removed before returning.
    pub async fn subscribe(
        &self,
        args: &ScanArgs,
        callback: Callback<V>,
    ) -> Result<Subscription, StoreError> {
        let backends = self.registry.resolve(self.default_scope(), ScopeContext::Read)?;
        tracing::debug!(backends = backends.len(), "fan-out subscribe");

        let results = join_all(backends.iter().map(|b| {
            let callback = Arc::clone(&callback);
            async move {
                b.handle
                    .subscribe(args, callback)
                    .await
                    .map_err(|source| StoreError::backend(&b.name, source))
            }
        }))
        .await;

        let mut established = Vec::with_capacity(results.len());
        let mut failure = None;
        for result in results {
            match result {
                Ok(subscription) => established.push(subscription),
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }

        if let Some(err) = failure {
            tracing::warn!(
                error = %err,
                rolled_back = established.len(),
                "subscribe failed, removing partial subscriptions"
            );
            Subscription::all(established).unsubscribe().await;
            return Err(err);
        }
        Ok(Subscription::all(established))
    }

    /// Opens a transaction on every registered backend, reading and writing
    /// through `scope` (or the default scope).
    ///
    /// # Errors
    ///
    /// [`StoreError::Scope`] before any backend is touched, or the first
    /// backend that fails to open. Transactions already opened on other
    /// backends are canceled.
    pub async fn transact(
        &self,
        scope: Option<&StorageScope>,
    ) -> Result<MultiTransaction<V>, StoreError> {
        let scope = scope.or(self.default_scope());
        if let Some(scope) = scope {
            self.registry.validate(scope)?;
        }

        let opened = join_all(self.registry.all().iter().map(|b| async move {
            b.handle
                .transact()
                .await
                .map(|handle| (b.name.clone(), handle))
                .map_err(|source| StoreError::backend(&b.name, source))
        }))
        .await;

        let mut handles: Vec<(String, Arc<dyn BackendTransaction<V>>)> = Vec::new();
        let mut failure = None;
        for result in opened {
            match result {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }
        if let Some(err) = failure {
            let canceled = join_all(handles.iter().map(|(name, handle)| async move {
                (name, handle.cancel().await)
            }))
            .await;
            for (name, result) in canceled {
                if let Err(cancel_err) = result {
                    tracing::warn!(
                        backend = %name,
                        error = %cancel_err,
                        "cancel after failed transaction open failed"
                    );
                }
            }
            return Err(err);
        }

        let handles = Registry::new(handles)?;
        Ok(MultiTransaction::new(handles, scope)?)
    }

    /// Runs `f` inside a fresh transaction and commits it.
    ///
    /// If `f` fails the transaction is canceled and the error returned. If
    /// the commit reports a backend conflict, the whole attempt is repeated
    /// with a new transaction, up to
    /// [`max_transaction_retries`](MultiStoreConfig::max_transaction_retries)
    /// times. Backends that committed before another backend conflicted keep
    /// their writes, so `f` should write idempotently. The transaction is
    /// always finished when this returns.
    ///
    /// ```ignore
    /// store
    ///     .auto_transact(None, |tx| {
    ///         Box::pin(async move {
    ///             tx.set(&tuple!["counter"], 1).await?;
    ///             Ok::<_, StoreError>(())
    ///         })
    ///     })
    ///     .await?;
    /// ```
    ///
    /// # Errors
    ///
    /// The error of `f`, the first non-conflict commit failure, or the
    /// conflict once retries are exhausted.
    pub async fn auto_transact<T, E, F>(
        &self,
        scope: Option<&StorageScope>,
        mut f: F,
    ) -> Result<T, E>
    where
        F: for<'t> FnMut(&'t MultiTransaction<V>) -> BoxFuture<'t, Result<T, E>>,
        E: From<StoreError>,
    {
        let mut retries = 0;
        loop {
            let tx = self.transact(scope).await?;
            let value = match f(&tx).await {
                Ok(value) => value,
                Err(err) => {
                    if let Err(cancel_err) = tx.cancel().await {
                        tracing::warn!(
                            error = %cancel_err,
                            "cancel after failed transaction body failed"
                        );
                    }
                    return Err(err);
                }
            };

            match tx.commit().await {
                Ok(()) => return Ok(value),
                Err(err) if err.is_conflict() && retries < self.config.max_transaction_retries => {
                    retries += 1;
                    tracing::warn!(
                        error = %err,
                        attempt = retries,
                        max = self.config.max_transaction_retries,
                        "transaction conflict, retrying"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Removes every entry from every backend.
    ///
    /// Each backend is cleared in its own transaction, concurrently. A
    /// failure on one backend does not undo clears that succeeded elsewhere.
    ///
    /// # Errors
    ///
    /// The first backend failure, after every backend has finished.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let results = join_all(self.registry.all().iter().map(|b| async move {
            let removed = clear_backend(b.handle.as_ref())
                .await
                .map_err(|source| StoreError::backend(&b.name, source))?;
            tracing::info!(backend = %b.name, removed, "backend cleared");
            Ok(())
        }))
        .await;
        first_error(results).map(|_| ())
    }
}

async fn clear_backend<V: StoreValue>(
    backend: &dyn OrderedBackend<V>,
) -> Result<usize, BackendError> {
    let tx = backend.transact().await?;
    let removed = async {
        let entries = tx.scan(&ScanArgs::all()).await?;
        for entry in &entries {
            tx.remove(&entry.key).await?;
        }
        Ok::<_, BackendError>(entries.len())
    }
    .await;

    match removed {
        Ok(count) => {
            tx.commit().await?;
            Ok(count)
        }
        Err(err) => {
            if let Err(cancel_err) = tx.cancel().await {
                tracing::warn!(error = %cancel_err, "cancel after failed clear failed");
            }
            Err(err)
        }
    }
}

impl<V: StoreValue> fmt::Debug for MultiStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiStore")
            .field("backends", &self.registry.names().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use multistore_core::tuple;
    use parking_lot::Mutex;

    use super::*;
    use crate::backend::WriteBatch;
    use crate::backends::MemoryBackend;
    use crate::test_support::{init_tracing, FaultyBackend};

    fn erase<B: OrderedBackend<String> + 'static>(backend: &Arc<B>) -> Backend<String> {
        Arc::clone(backend) as Backend<String>
    }

    fn pair() -> (Arc<MemoryBackend<String>>, Arc<MemoryBackend<String>>) {
        let a = Arc::new(MemoryBackend::from_entries([
            (tuple![1], "x".to_string()),
            (tuple![3], "z".to_string()),
        ]));
        let b = Arc::new(MemoryBackend::from_entries([(tuple![2], "y".to_string())]));
        (a, b)
    }

    fn store(a: &Arc<MemoryBackend<String>>, b: &Arc<MemoryBackend<String>>) -> MultiStore<String> {
        MultiStore::new([("a", erase(a)), ("b", erase(b))], MultiStoreConfig::default()).unwrap()
    }

    fn values(entries: &[KeyValuePair<String>]) -> Vec<&str> {
        entries.iter().map(|e| e.value.as_str()).collect()
    }

    fn filled(count: i64) -> MemoryBackend<String> {
        MemoryBackend::from_entries((0..count).map(|i| (tuple![i], format!("v{i}"))))
    }

    #[tokio::test]
    async fn scan_merges_in_both_directions() {
        let (a, b) = pair();
        let store = store(&a, &b);

        let asc = store.scan(&ScanArgs::all()).await.unwrap();
        assert_eq!(values(&asc), vec!["x", "y", "z"]);
        let keys: Vec<Tuple> = asc.iter().map(|e| e.key.clone()).collect();
        assert_eq!(keys, vec![tuple![1], tuple![2], tuple![3]]);

        let desc = store.scan(&ScanArgs::all().reverse()).await.unwrap();
        assert_eq!(values(&desc), vec!["z", "y", "x"]);
    }

    #[tokio::test]
    async fn scoped_write_only_reaches_named_backend() {
        let (a, b) = pair();
        let store = store(&a, &b);

        let scope = StorageScope::write_only(["a"]);
        let tx = store.transact(Some(&scope)).await.unwrap();
        tx.set(&tuple![5], "v".to_string()).await.unwrap();
        tx.commit().await.unwrap();

        assert!(a.exists(&tuple![5]).await.unwrap());
        assert!(!b.exists(&tuple![5]).await.unwrap());
        assert!(store.exists(&tuple![5]).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_scope_fails_before_backend_io() {
        let a = Arc::new(FaultyBackend::new(MemoryBackend::<String>::new()));
        let store = MultiStore::new([("a", erase(&a))], MultiStoreConfig::default()).unwrap();

        let scope = StorageScope::read_only(["nope"]);
        let err = store.transact(Some(&scope)).await.unwrap_err();
        assert!(matches!(err, StoreError::Scope(ScopeError::UnknownBackend { .. })));
        assert_eq!(a.commits() + a.cancels(), 0);

        assert!(store.with_scope(scope.clone()).is_err());
        let bad = MultiStore::new([("a", erase(&a))], MultiStoreConfig::with_scope(scope));
        assert!(bad.is_err());
    }

    #[test]
    fn duplicate_backend_names_are_rejected() {
        let (a, _) = pair();
        let err = MultiStore::new([("a", erase(&a)), ("a", erase(&a))], MultiStoreConfig::default())
            .unwrap_err();
        assert_eq!(err, ScopeError::DuplicateBackend { name: "a".to_string() });
    }

    #[tokio::test]
    async fn default_scope_and_with_scope_steer_reads() {
        let (a, b) = pair();
        let store = store(&a, &b);
        let only_b = store.with_scope(StorageScope::read_only(["b"])).unwrap();

        assert_eq!(values(&only_b.scan(&ScanArgs::all()).await.unwrap()), vec!["y"]);
        assert!(!only_b.exists(&tuple![1]).await.unwrap());
        assert!(store.exists(&tuple![1]).await.unwrap());
        assert_eq!(only_b.backend_names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(only_b.backend("b").is_some());
    }

    #[tokio::test]
    async fn exists_false_when_every_backend_is_empty() {
        let a = Arc::new(MemoryBackend::<String>::new());
        let b = Arc::new(MemoryBackend::<String>::new());
        assert!(!store(&a, &b).exists(&tuple![1]).await.unwrap());
    }

    #[tokio::test]
    async fn backend_scan_failure_discards_partial_results() {
        let (a, _) = pair();
        let broken = Arc::new(FaultyBackend::new(MemoryBackend::<String>::new()));
        broken.fail_scan(true);
        let store =
            MultiStore::new([("a", erase(&a)), ("broken", erase(&broken))], MultiStoreConfig::default())
                .unwrap();

        let err = store.scan(&ScanArgs::all()).await.unwrap_err();
        assert_eq!(err.backend_name(), Some("broken"));
        assert!(store.exists(&tuple![1]).await.is_err());
    }

    #[tokio::test]
    async fn subspace_strips_and_prepends_prefix() {
        let (a, b) = pair();
        let store = store(&a, &b);
        let users = store.subspace(&tuple!["users"]);

        let tx = users.transact(Some(&StorageScope::write_only(["a"]))).await.unwrap();
        tx.set(&tuple![7], "seven".to_string()).await.unwrap();
        tx.commit().await.unwrap();

        assert!(a.exists(&tuple!["users", 7]).await.unwrap());
        let seen = users.scan(&ScanArgs::all()).await.unwrap();
        assert_eq!(seen, vec![KeyValuePair::new(tuple![7], "seven".to_string())]);

        let nested = users.subspace(&tuple![7]);
        assert!(nested.exists(&Tuple::empty()).await.unwrap());
    }

    #[tokio::test]
    async fn subscribe_fans_out_and_unsubscribes_everywhere() {
        let (a, b) = pair();
        let store = store(&a, &b);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: Callback<String> =
            Arc::new(move |batch: WriteBatch<String>| sink.lock().push(batch));
        let sub = store.subscribe(&ScanArgs::all(), callback).await.unwrap();
        assert_eq!(a.subscriber_count(), 1);
        assert_eq!(b.subscriber_count(), 1);

        let tx = store.transact(None).await.unwrap();
        tx.set(&tuple![4], "w".to_string()).await.unwrap();
        tx.commit().await.unwrap();
        // One batch per backend; no cross-backend merge.
        assert_eq!(seen.lock().len(), 2);

        sub.unsubscribe().await;
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(b.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn failed_subscribe_rolls_back_established_ones() {
        let a = Arc::new(MemoryBackend::<String>::new());
        let broken = Arc::new(FaultyBackend::new(MemoryBackend::<String>::new()));
        broken.fail_subscribe(true);
        let store =
            MultiStore::new([("a", erase(&a)), ("broken", erase(&broken))], MultiStoreConfig::default())
                .unwrap();

        let callback: Callback<String> = Arc::new(|_: WriteBatch<String>| {});
        let err = store.subscribe(&ScanArgs::all(), callback).await.unwrap_err();
        assert_eq!(err.backend_name(), Some("broken"));
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(broken.subscribes(), 0);
    }

    #[tokio::test]
    async fn failed_transact_cancels_opened_handles() {
        let a = Arc::new(FaultyBackend::new(MemoryBackend::<String>::new()));
        let broken = Arc::new(FaultyBackend::new(MemoryBackend::<String>::new()));
        broken.fail_transact(true);
        let store =
            MultiStore::new([("a", erase(&a)), ("broken", erase(&broken))], MultiStoreConfig::default())
                .unwrap();

        let err = store.transact(None).await.unwrap_err();
        assert_eq!(err.backend_name(), Some("broken"));
        assert_eq!(a.cancels(), 1);
    }

    #[tokio::test]
    async fn subscribe_reaches_only_the_read_scope() {
        let (a, b) = pair();
        let store = store(&a, &b).with_scope(StorageScope::read_only(["b"])).unwrap();

        let callback: Callback<String> = Arc::new(|_: WriteBatch<String>| {});
        let sub = store.subscribe(&ScanArgs::all(), callback).await.unwrap();
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(b.subscriber_count(), 1);

        sub.unsubscribe().await;
        assert_eq!(b.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn auto_transact_routes_writes_to_the_given_scope() {
        let a = Arc::new(MemoryBackend::<String>::new());
        let b = Arc::new(MemoryBackend::<String>::new());
        let store = store(&a, &b);

        let scope = StorageScope::write_only(["a"]);
        store
            .auto_transact(Some(&scope), |tx| {
                Box::pin(async move {
                    tx.set(&tuple![1], "one".to_string()).await?;
                    Ok::<_, StoreError>(())
                })
            })
            .await
            .unwrap();

        assert!(a.exists(&tuple![1]).await.unwrap());
        assert!(!b.exists(&tuple![1]).await.unwrap());
    }

    #[tokio::test]
    async fn subspace_keeps_the_default_scope() {
        let (a, b) = pair();
        let scope = StorageScope::read_only(["b"]);
        let store = store(&a, &b).with_scope(scope.clone()).unwrap();
        let nested = store.subspace(&tuple!["users"]);

        assert_eq!(nested.config().default_scope, Some(scope));

        let tx = nested.transact(None).await.unwrap();
        tx.set(&tuple![1], "u1".to_string()).await.unwrap();
        tx.commit().await.unwrap();
        assert!(a.exists(&tuple!["users", 1]).await.unwrap());

        // Reads stay on "b", which the write above also reached.
        let seen = nested.scan(&ScanArgs::all()).await.unwrap();
        assert_eq!(seen, vec![KeyValuePair::new(tuple![1], "u1".to_string())]);
    }

    #[tokio::test]
    async fn failed_transact_reports_open_error_when_cleanup_cancel_fails() {
        init_tracing();
        let a = Arc::new(FaultyBackend::new(MemoryBackend::<String>::new()));
        let broken = Arc::new(FaultyBackend::new(MemoryBackend::<String>::new()));
        a.fail_cancel(true);
        broken.fail_transact(true);
        let store =
            MultiStore::new([("a", erase(&a)), ("broken", erase(&broken))], MultiStoreConfig::default())
                .unwrap();

        let err = store.transact(None).await.unwrap_err();
        assert_eq!(err.backend_name(), Some("broken"));
        assert_eq!(a.cancels(), 1);
    }

    #[tokio::test]
    async fn clear_reports_scan_error_when_cleanup_cancel_fails() {
        let a = Arc::new(FaultyBackend::new(filled(3)));
        a.fail_scan(true);
        a.fail_cancel(true);
        let store = MultiStore::new([("a", erase(&a))], MultiStoreConfig::default()).unwrap();

        let err = store.clear().await.unwrap_err();
        assert_eq!(err.backend_name(), Some("a"));
        assert!(err.to_string().contains("injected scan failure"));
        assert_eq!(a.cancels(), 1);
        assert_eq!(a.commits(), 0);
    }

    #[tokio::test]
    async fn clear_empties_every_backend() {
        init_tracing();
        let a = Arc::new(filled(10));
        let b = Arc::new(filled(10));
        let store = store(&a, &b);

        store.clear().await.unwrap();
        assert!(a.is_empty());
        assert!(b.is_empty());
    }

    #[tokio::test]
    async fn clear_is_not_atomic_across_backends() {
        let a = Arc::new(FaultyBackend::new(filled(10)));
        let b = Arc::new(filled(10));
        a.fail_commit(true);
        let store = MultiStore::new([("a", erase(&a)), ("b", erase(&b))], MultiStoreConfig::default())
            .unwrap();

        let err = store.clear().await.unwrap_err();
        assert_eq!(err.backend_name(), Some("a"));
        assert!(b.is_empty());
        assert_eq!(a.scan(&ScanArgs::all()).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn auto_transact_commits_on_success() {
        let (a, b) = pair();
        let store = store(&a, &b);

        let count = store
            .auto_transact(None, |tx| {
                Box::pin(async move {
                    tx.set(&tuple![9], "nine".to_string()).await?;
                    let seen = tx.scan(&ScanArgs::all()).await?;
                    Ok::<_, StoreError>(seen.len())
                })
            })
            .await
            .unwrap();

        // Staged write is visible in both backends' transactions.
        assert_eq!(count, 5);
        assert!(a.exists(&tuple![9]).await.unwrap());
        assert!(b.exists(&tuple![9]).await.unwrap());
    }

    #[derive(Debug, thiserror::Error)]
    enum AppError {
        #[error("rejected")]
        Rejected,
        #[error(transparent)]
        Store(#[from] StoreError),
    }

    #[tokio::test]
    async fn auto_transact_cancels_on_callback_error() {
        let a = Arc::new(FaultyBackend::new(MemoryBackend::<String>::new()));
        let store = MultiStore::new([("a", erase(&a))], MultiStoreConfig::default()).unwrap();

        let result: Result<(), AppError> = store
            .auto_transact(None, |tx| {
                Box::pin(async move {
                    tx.set(&tuple![1], "x".to_string()).await?;
                    Err(AppError::Rejected)
                })
            })
            .await;

        assert!(matches!(result, Err(AppError::Rejected)));
        assert_eq!(a.cancels(), 1);
        assert_eq!(a.commits(), 0);
        assert!(!a.exists(&tuple![1]).await.unwrap());
    }

    /// Commits `k = value` directly on `backend`, outside any running
    /// multi-backend transaction.
    async fn write_behind_back(backend: &MemoryBackend<String>, value: &str) {
        let other = backend.transact().await.unwrap();
        other.set(&tuple!["k"], value.to_string()).await.unwrap();
        other.commit().await.unwrap();
    }

    #[tokio::test]
    async fn auto_transact_retries_conflicts() {
        init_tracing();
        let a = Arc::new(MemoryBackend::<String>::new());
        let store = MultiStore::new([("a", erase(&a))], MultiStoreConfig::default()).unwrap();
        let attempts = Arc::new(Mutex::new(0_u32));

        let outcome = store
            .auto_transact(None, |tx| {
                let a = Arc::clone(&a);
                let attempts = Arc::clone(&attempts);
                Box::pin(async move {
                    tx.exists(&tuple!["k"]).await?;
                    let first = {
                        let mut n = attempts.lock();
                        *n += 1;
                        *n == 1
                    };
                    if first {
                        // A concurrent writer touches the key this attempt read.
                        write_behind_back(&a, "other").await;
                    }
                    tx.set(&tuple!["k"], "mine".to_string()).await?;
                    Ok::<_, StoreError>(())
                })
            })
            .await;

        outcome.unwrap();
        assert_eq!(*attempts.lock(), 2);
        let stored = a.scan(&ScanArgs::all()).await.unwrap();
        assert_eq!(values(&stored), vec!["mine"]);
    }

    #[tokio::test]
    async fn auto_transact_gives_up_after_max_retries() {
        let a = Arc::new(MemoryBackend::<String>::new());
        let config = MultiStoreConfig {
            max_transaction_retries: 0,
            ..MultiStoreConfig::default()
        };
        let store = MultiStore::new([("a", erase(&a))], config).unwrap();

        let err = store
            .auto_transact(None, |tx| {
                let a = Arc::clone(&a);
                Box::pin(async move {
                    tx.exists(&tuple!["k"]).await?;
                    write_behind_back(&a, "other").await;
                    tx.set(&tuple!["k"], "mine".to_string()).await?;
                    Ok::<_, StoreError>(())
                })
            })
            .await
            .unwrap_err();

        assert!(err.is_conflict());
    }
}
