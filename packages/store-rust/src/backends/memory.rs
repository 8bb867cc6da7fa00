//! In-memory [`OrderedBackend`] with optimistic transactions.
//!
//! Entries live in a `BTreeMap` ordered by the tuple comparator. Transactions
//! stage writes locally (reads see their own writes) and validate at commit
//! that nothing they read was changed by a commit made after they began.
//! Suitable for tests, caches, and any ephemeral store.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use multistore_core::{KeyValuePair, ScanArgs, Tuple};
use parking_lot::{Mutex, RwLock};

use crate::backend::{
    BackendError, BackendTransaction, Callback, OrderedBackend, StoreValue, Subscription, TupleRead,
};
use crate::backends::listeners::ListenerSet;

struct MemoryState<V> {
    entries: BTreeMap<Tuple, V>,
    /// Version of the last commit that wrote each key. Pruned below the
    /// oldest open transaction.
    modified: BTreeMap<Tuple, u64>,
    version: u64,
    /// Begin versions of open transactions, with multiplicity.
    open: BTreeMap<u64, usize>,
}

impl<V: Clone> MemoryState<V> {
    /// Committed entries in `args` (prefix and bounds only), ascending.
    fn range(&self, args: &ScanArgs) -> Vec<(Tuple, V)> {
        self.entries
            .range(args.prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&args.prefix))
            .filter(|(key, _)| args.contains(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn register(&mut self) -> u64 {
        *self.open.entry(self.version).or_insert(0) += 1;
        self.version
    }

    fn release(&mut self, begin: u64) {
        if let Some(count) = self.open.get_mut(&begin) {
            *count -= 1;
            if *count == 0 {
                self.open.remove(&begin);
            }
        }
        let floor = self.open.keys().next().copied().unwrap_or(self.version);
        self.modified.retain(|_, version| *version > floor);
    }
}

struct Shared<V> {
    state: RwLock<MemoryState<V>>,
    listeners: Arc<ListenerSet<V>>,
}

/// In-memory ordered backend.
///
/// Cloning the `Arc` of a backend or taking a [`subspace`](OrderedBackend::subspace)
/// shares the same underlying entries.
pub struct MemoryBackend<V> {
    shared: Arc<Shared<V>>,
    prefix: Tuple,
}

impl<V: StoreValue> MemoryBackend<V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(MemoryState {
                    entries: BTreeMap::new(),
                    modified: BTreeMap::new(),
                    version: 0,
                    open: BTreeMap::new(),
                }),
                listeners: Arc::new(ListenerSet::new()),
            }),
            prefix: Tuple::empty(),
        }
    }

    /// Creates a backend pre-populated with `entries`.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Tuple, V)>,
    {
        let backend = Self::new();
        backend.shared.state.write().entries.extend(entries);
        backend
    }

    /// Number of entries visible through this handle.
    #[must_use]
    pub fn len(&self) -> usize {
        let state = self.shared.state.read();
        state
            .entries
            .range(self.prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&self.prefix))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of active subscriptions on the underlying store.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.listeners.len()
    }

    fn strip(&self, entries: Vec<(Tuple, V)>) -> Vec<KeyValuePair<V>> {
        entries
            .into_iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(&self.prefix)
                    .map(|relative| KeyValuePair::new(relative, value))
            })
            .collect()
    }
}

impl<V: StoreValue> Default for MemoryBackend<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V: StoreValue> TupleRead for MemoryBackend<V> {
    type Value = V;

    async fn scan(&self, args: &ScanArgs) -> Result<Vec<KeyValuePair<V>>, BackendError> {
        let absolute = args.within(&self.prefix);
        let entries = self.shared.state.read().range(&absolute);
        Ok(absolute.finish(self.strip(entries)))
    }

    async fn exists(&self, key: &Tuple) -> Result<bool, BackendError> {
        let absolute = self.prefix.concat(key);
        Ok(self.shared.state.read().entries.contains_key(&absolute))
    }
}

#[async_trait]
impl<V: StoreValue> OrderedBackend<V> for MemoryBackend<V> {
    async fn subscribe(
        &self,
        args: &ScanArgs,
        callback: Callback<V>,
    ) -> Result<Subscription, BackendError> {
        Ok(self
            .shared
            .listeners
            .add(args.within(&self.prefix), self.prefix.clone(), callback))
    }

    async fn transact(&self) -> Result<Arc<dyn BackendTransaction<V>>, BackendError> {
        let begin = self.shared.state.write().register();
        Ok(Arc::new(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            prefix: self.prefix.clone(),
            begin,
            inner: Mutex::new(TxInner {
                writes: BTreeMap::new(),
                read_keys: Vec::new(),
                read_ranges: Vec::new(),
                finished: false,
            }),
        }))
    }

    fn subspace(&self, prefix: &Tuple) -> Arc<dyn OrderedBackend<V>> {
        Arc::new(Self {
            shared: Arc::clone(&self.shared),
            prefix: self.prefix.concat(prefix),
        })
    }
}

struct TxInner<V> {
    /// Staged writes by absolute key; `None` stages a removal.
    writes: BTreeMap<Tuple, Option<V>>,
    read_keys: Vec<Tuple>,
    read_ranges: Vec<ScanArgs>,
    finished: bool,
}

struct MemoryTransaction<V: StoreValue> {
    shared: Arc<Shared<V>>,
    prefix: Tuple,
    begin: u64,
    inner: Mutex<TxInner<V>>,
}

impl<V: StoreValue> MemoryTransaction<V> {
    fn finish(&self, inner: &mut TxInner<V>) {
        inner.finished = true;
        inner.writes.clear();
        self.shared.state.write().release(self.begin);
    }
}

#[async_trait]
impl<V: StoreValue> TupleRead for MemoryTransaction<V> {
    type Value = V;

    async fn scan(&self, args: &ScanArgs) -> Result<Vec<KeyValuePair<V>>, BackendError> {
        let absolute = args.within(&self.prefix);
        let mut inner = self.inner.lock();
        if inner.finished {
            return Err(BackendError::TransactionFinished);
        }

        let mut view: BTreeMap<Tuple, V> =
            self.shared.state.read().range(&absolute).into_iter().collect();
        let staged = inner
            .writes
            .range(absolute.prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&absolute.prefix))
            .filter(|(key, _)| absolute.contains(key));
        for (key, write) in staged {
            match write {
                Some(value) => view.insert(key.clone(), value.clone()),
                None => view.remove(key),
            };
        }
        inner.read_ranges.push(absolute.clone());
        drop(inner);

        let entries = view
            .into_iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(&self.prefix)
                    .map(|relative| KeyValuePair::new(relative, value))
            })
            .collect();
        Ok(absolute.finish(entries))
    }

    async fn exists(&self, key: &Tuple) -> Result<bool, BackendError> {
        let absolute = self.prefix.concat(key);
        let mut inner = self.inner.lock();
        if inner.finished {
            return Err(BackendError::TransactionFinished);
        }
        let present = match inner.writes.get(&absolute) {
            Some(write) => write.is_some(),
            None => self.shared.state.read().entries.contains_key(&absolute),
        };
        inner.read_keys.push(absolute);
        Ok(present)
    }
}

#[async_trait]
impl<V: StoreValue> BackendTransaction<V> for MemoryTransaction<V> {
    async fn set(&self, key: &Tuple, value: V) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        if inner.finished {
            return Err(BackendError::TransactionFinished);
        }
        inner.writes.insert(self.prefix.concat(key), Some(value));
        Ok(())
    }

    async fn remove(&self, key: &Tuple) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        if inner.finished {
            return Err(BackendError::TransactionFinished);
        }
        inner.writes.insert(self.prefix.concat(key), None);
        Ok(())
    }

    async fn commit(&self) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        if inner.finished {
            return Err(BackendError::TransactionFinished);
        }
        inner.finished = true;
        let writes = std::mem::take(&mut inner.writes);

        {
            let mut state = self.shared.state.write();
            let conflicted = state
                .modified
                .iter()
                .filter(|(_, version)| **version > self.begin)
                .any(|(key, _)| {
                    inner.read_keys.contains(key)
                        || inner.read_ranges.iter().any(|range| range.contains(key))
                });
            if conflicted {
                state.release(self.begin);
                tracing::debug!(begin = self.begin, "memory transaction conflicted");
                return Err(BackendError::Conflict);
            }

            if !writes.is_empty() {
                state.version += 1;
                let version = state.version;
                for (key, write) in &writes {
                    match write {
                        Some(value) => state.entries.insert(key.clone(), value.clone()),
                        None => state.entries.remove(key),
                    };
                    state.modified.insert(key.clone(), version);
                }
            }
            state.release(self.begin);
        }
        drop(inner);

        self.shared.listeners.notify(writes.iter());
        Ok(())
    }

    async fn cancel(&self) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        if inner.finished {
            return Err(BackendError::TransactionFinished);
        }
        self.finish(&mut inner);
        Ok(())
    }
}

impl<V: StoreValue> Drop for MemoryTransaction<V> {
    fn drop(&mut self) {
        if !self.inner.get_mut().finished {
            self.shared.state.write().release(self.begin);
        }
    }
}
