//! Test helpers: a backend wrapper that counts calls and fails on demand.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use multistore_core::{KeyValuePair, ScanArgs, Tuple};

use crate::backend::{
    BackendError, BackendTransaction, Callback, OrderedBackend, StoreValue, Subscription, TupleRead,
};

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[derive(Default)]
struct Faults {
    fail_scan: AtomicBool,
    fail_subscribe: AtomicBool,
    fail_transact: AtomicBool,
    fail_commit: AtomicBool,
    fail_cancel: AtomicBool,
    commits: AtomicUsize,
    cancels: AtomicUsize,
    subscribes: AtomicUsize,
}

fn injected(op: &str) -> BackendError {
    BackendError::Storage(anyhow::anyhow!("injected {op} failure"))
}

/// Wraps a backend; shares its fault switches and counters with every
/// subspace and transaction derived from it.
pub(crate) struct FaultyBackend<V: StoreValue> {
    inner: Arc<dyn OrderedBackend<V>>,
    faults: Arc<Faults>,
}

impl<V: StoreValue> FaultyBackend<V> {
    pub(crate) fn new(inner: impl OrderedBackend<V> + 'static) -> Self {
        Self {
            inner: Arc::new(inner),
            faults: Arc::default(),
        }
    }

    pub(crate) fn fail_scan(&self, on: bool) {
        self.faults.fail_scan.store(on, Ordering::SeqCst);
    }

    pub(crate) fn fail_subscribe(&self, on: bool) {
        self.faults.fail_subscribe.store(on, Ordering::SeqCst);
    }

    pub(crate) fn fail_transact(&self, on: bool) {
        self.faults.fail_transact.store(on, Ordering::SeqCst);
    }

    pub(crate) fn fail_commit(&self, on: bool) {
        self.faults.fail_commit.store(on, Ordering::SeqCst);
    }

    pub(crate) fn fail_cancel(&self, on: bool) {
        self.faults.fail_cancel.store(on, Ordering::SeqCst);
    }

    /// Backend transaction commits attempted.
    pub(crate) fn commits(&self) -> usize {
        self.faults.commits.load(Ordering::SeqCst)
    }

    pub(crate) fn cancels(&self) -> usize {
        self.faults.cancels.load(Ordering::SeqCst)
    }

    pub(crate) fn subscribes(&self) -> usize {
        self.faults.subscribes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<V: StoreValue> TupleRead for FaultyBackend<V> {
    type Value = V;

    async fn scan(&self, args: &ScanArgs) -> Result<Vec<KeyValuePair<V>>, BackendError> {
        if self.faults.fail_scan.load(Ordering::SeqCst) {
            return Err(injected("scan"));
        }
        self.inner.scan(args).await
    }

    async fn exists(&self, key: &Tuple) -> Result<bool, BackendError> {
        if self.faults.fail_scan.load(Ordering::SeqCst) {
            return Err(injected("exists"));
        }
        self.inner.exists(key).await
    }
}

#[async_trait]
impl<V: StoreValue> OrderedBackend<V> for FaultyBackend<V> {
    async fn subscribe(
        &self,
        args: &ScanArgs,
        callback: Callback<V>,
    ) -> Result<Subscription, BackendError> {
        if self.faults.fail_subscribe.load(Ordering::SeqCst) {
            return Err(injected("subscribe"));
        }
        self.faults.subscribes.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribe(args, callback).await
    }

    async fn transact(&self) -> Result<Arc<dyn BackendTransaction<V>>, BackendError> {
        if self.faults.fail_transact.load(Ordering::SeqCst) {
            return Err(injected("transact"));
        }
        Ok(Arc::new(FaultyTransaction {
            inner: self.inner.transact().await?,
            faults: Arc::clone(&self.faults),
        }))
    }

    fn subspace(&self, prefix: &Tuple) -> Arc<dyn OrderedBackend<V>> {
        Arc::new(Self {
            inner: self.inner.subspace(prefix),
            faults: Arc::clone(&self.faults),
        })
    }
}

struct FaultyTransaction<V: StoreValue> {
    inner: Arc<dyn BackendTransaction<V>>,
    faults: Arc<Faults>,
}

#[async_trait]
impl<V: StoreValue> TupleRead for FaultyTransaction<V> {
    type Value = V;

    async fn scan(&self, args: &ScanArgs) -> Result<Vec<KeyValuePair<V>>, BackendError> {
        if self.faults.fail_scan.load(Ordering::SeqCst) {
            return Err(injected("scan"));
        }
        self.inner.scan(args).await
    }

    async fn exists(&self, key: &Tuple) -> Result<bool, BackendError> {
        self.inner.exists(key).await
    }
}

#[async_trait]
impl<V: StoreValue> BackendTransaction<V> for FaultyTransaction<V> {
    async fn set(&self, key: &Tuple, value: V) -> Result<(), BackendError> {
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &Tuple) -> Result<(), BackendError> {
        self.inner.remove(key).await
    }

    async fn commit(&self) -> Result<(), BackendError> {
        self.faults.commits.fetch_add(1, Ordering::SeqCst);
        if self.faults.fail_commit.load(Ordering::SeqCst) {
            self.inner.cancel().await?;
            return Err(injected("commit"));
        }
        self.inner.commit().await
    }

    async fn cancel(&self) -> Result<(), BackendError> {
        self.faults.cancels.fetch_add(1, Ordering::SeqCst);
        if self.faults.fail_cancel.load(Ordering::SeqCst) {
            self.inner.cancel().await?;
            return Err(injected("cancel"));
        }
        self.inner.cancel().await
    }
}
