//! Persistent [`OrderedBackend`] over a `redb` database file.
//!
//! Keys are stored with the order-preserving tuple codec, so redb's byte
//! order is the tuple order and range scans map directly onto table ranges.
//! Values are `MessagePack` (via `rmp-serde`).
//!
//! Transactions buffer writes in memory and apply them in one redb write
//! transaction at commit. redb serializes writers, so there is no conflict
//! detection: the last commit wins.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use multistore_core::codec::{byte_range, decode_tuple, encode_tuple};
use multistore_core::{KeyValuePair, ScanArgs, Tuple};
use parking_lot::Mutex;
use redb::{AccessGuard, Database, StorageError, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::{
    BackendError, BackendTransaction, Callback, OrderedBackend, StoreValue, Subscription, TupleRead,
};
use crate::backends::listeners::ListenerSet;

const TUPLES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("tuples");

/// Values a redb backend can persist.
pub trait PersistentValue: StoreValue + Serialize + DeserializeOwned {}

impl<T: StoreValue + Serialize + DeserializeOwned> PersistentValue for T {}

struct Shared<V> {
    db: Database,
    listeners: Arc<ListenerSet<V>>,
}

/// Ordered backend persisted in a single redb file.
pub struct RedbBackend<V> {
    shared: Arc<Shared<V>>,
    prefix: Tuple,
}

impl<V: PersistentValue> RedbBackend<V> {
    /// Opens (or creates) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Storage`] if the file cannot be opened or the
    /// table cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let path = path.as_ref();
        let db = Database::create(path)
            .with_context(|| format!("failed to open redb database at {}", path.display()))?;

        let txn = db.begin_write().context("failed to begin redb write")?;
        txn.open_table(TUPLES).context("failed to create tuple table")?;
        txn.commit().context("failed to commit table creation")?;

        tracing::debug!(path = %path.display(), "opened redb backend");
        Ok(Self {
            shared: Arc::new(Shared {
                db,
                listeners: Arc::new(ListenerSet::new()),
            }),
            prefix: Tuple::empty(),
        })
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

/// Runs synchronous redb work off the async executor.
async fn blocking<T, F>(work: F) -> Result<T, BackendError>
where
    F: FnOnce() -> Result<T, BackendError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .context("redb worker task failed")?
}

fn decode_value<V: DeserializeOwned>(bytes: &[u8]) -> Result<V, BackendError> {
    Ok(rmp_serde::from_slice(bytes).context("failed to decode stored value")?)
}

fn encode_value<V: Serialize>(value: &V) -> Result<Vec<u8>, BackendError> {
    Ok(rmp_serde::to_vec_named(value).context("failed to encode value")?)
}

/// Reads committed entries selected by `args` (absolute), honoring
/// `reverse` and `limit`.
fn read_range<V: DeserializeOwned>(
    db: &Database,
    args: &ScanArgs,
) -> Result<Vec<(Tuple, V)>, BackendError> {
    let Some((start, end)) = byte_range(args) else {
        return Ok(Vec::new());
    };
    let txn = db.begin_read().context("failed to begin redb read")?;
    let table = txn.open_table(TUPLES).context("failed to open tuple table")?;
    let range = table
        .range::<&[u8]>(start.as_slice()..end.as_slice())
        .context("failed to open range")?;
    let limit = args.limit.unwrap_or(usize::MAX);
    if args.reverse {
        range.rev().take(limit).map(decode_row).collect()
    } else {
        range.take(limit).map(decode_row).collect()
    }
}

type Row<'a> = Result<(AccessGuard<'a, &'static [u8]>, AccessGuard<'a, &'static [u8]>), StorageError>;

fn decode_row<V: DeserializeOwned>(row: Row<'_>) -> Result<(Tuple, V), BackendError> {
    let (key, value) = row.context("failed to read row")?;
    let key = decode_tuple(key.value()).context("stored key is not a valid tuple")?;
    Ok((key, decode_value(value.value())?))
}

fn contains_key(db: &Database, key: &[u8]) -> Result<bool, BackendError> {
    let txn = db.begin_read().context("failed to begin redb read")?;
    let table = txn.open_table(TUPLES).context("failed to open tuple table")?;
    Ok(table.get(key).context("failed to read key")?.is_some())
}

#[async_trait]
impl<V: PersistentValue> TupleRead for RedbBackend<V> {
    type Value = V;

    async fn scan(&self, args: &ScanArgs) -> Result<Vec<KeyValuePair<V>>, BackendError> {
        let absolute = args.within(&self.prefix);
        let shared = Arc::clone(&self.shared);
        let entries = blocking(move || read_range(&shared.db, &absolute)).await?;
        Ok(self.strip(entries))
    }

    async fn exists(&self, key: &Tuple) -> Result<bool, BackendError> {
        let encoded = encode_tuple(&self.prefix.concat(key));
        let shared = Arc::clone(&self.shared);
        blocking(move || contains_key(&shared.db, &encoded)).await
    }
}

#[async_trait]
impl<V: PersistentValue> OrderedBackend<V> for RedbBackend<V> {
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
        Ok(Arc::new(RedbTransaction {
            shared: Arc::clone(&self.shared),
            prefix: self.prefix.clone(),
            inner: Mutex::new(TxInner {
                writes: BTreeMap::new(),
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
    writes: BTreeMap<Tuple, Option<V>>,
    finished: bool,
}

struct RedbTransaction<V> {
    shared: Arc<Shared<V>>,
    prefix: Tuple,
    inner: Mutex<TxInner<V>>,
}

impl<V: PersistentValue> RedbTransaction<V> {
    /// Staged writes under `args` (absolute), ascending.
    fn staged(&self, args: &ScanArgs) -> Result<Vec<(Tuple, Option<V>)>, BackendError> {
        let inner = self.inner.lock();
        if inner.finished {
            return Err(BackendError::TransactionFinished);
        }
        Ok(inner
            .writes
            .range(args.prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&args.prefix))
            .filter(|(key, _)| args.contains(key))
            .map(|(key, write)| (key.clone(), write.clone()))
            .collect())
    }

    fn stage(&self, key: &Tuple, write: Option<V>) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        if inner.finished {
            return Err(BackendError::TransactionFinished);
        }
        inner.writes.insert(self.prefix.concat(key), write);
        Ok(())
    }
}

#[async_trait]
impl<V: PersistentValue> TupleRead for RedbTransaction<V> {
    type Value = V;

    async fn scan(&self, args: &ScanArgs) -> Result<Vec<KeyValuePair<V>>, BackendError> {
        let absolute = args.within(&self.prefix);
        let staged = self.staged(&absolute)?;

        // Overlaying staged writes can change which entries fall inside the
        // limit, so read the full ascending range and order afterwards.
        let unordered = ScanArgs {
            reverse: false,
            limit: None,
            ..absolute.clone()
        };
        let shared = Arc::clone(&self.shared);
        let committed = blocking(move || read_range::<V>(&shared.db, &unordered)).await?;

        let mut view: BTreeMap<Tuple, V> = committed.into_iter().collect();
        for (key, write) in staged {
            match write {
                Some(value) => view.insert(key, value),
                None => view.remove(&key),
            };
        }

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
        {
            let inner = self.inner.lock();
            if inner.finished {
                return Err(BackendError::TransactionFinished);
            }
            if let Some(write) = inner.writes.get(&absolute) {
                return Ok(write.is_some());
            }
        }
        let encoded = encode_tuple(&absolute);
        let shared = Arc::clone(&self.shared);
        blocking(move || contains_key(&shared.db, &encoded)).await
    }
}

#[async_trait]
impl<V: PersistentValue> BackendTransaction<V> for RedbTransaction<V> {
    async fn set(&self, key: &Tuple, value: V) -> Result<(), BackendError> {
        self.stage(key, Some(value))
    }

    async fn remove(&self, key: &Tuple) -> Result<(), BackendError> {
        self.stage(key, None)
    }

    async fn commit(&self) -> Result<(), BackendError> {
        let writes = {
            let mut inner = self.inner.lock();
            if inner.finished {
                return Err(BackendError::TransactionFinished);
            }
            inner.finished = true;
            std::mem::take(&mut inner.writes)
        };
        if writes.is_empty() {
            return Ok(());
        }

        let mut encoded = Vec::with_capacity(writes.len());
        for (key, write) in &writes {
            let value = write.as_ref().map(encode_value).transpose()?;
            encoded.push((encode_tuple(key), value));
        }

        let shared = Arc::clone(&self.shared);
        blocking(move || {
            let txn = shared.db.begin_write().context("failed to begin redb write")?;
            {
                let mut table = txn.open_table(TUPLES).context("failed to open tuple table")?;
                for (key, value) in &encoded {
                    match value {
                        Some(bytes) => {
                            table
                                .insert(key.as_slice(), bytes.as_slice())
                                .context("failed to write key")?;
                        }
                        None => {
                            table.remove(key.as_slice()).context("failed to remove key")?;
                        }
                    }
                }
            }
            txn.commit().context("failed to commit redb transaction")?;
            Ok(())
        })
        .await?;

        self.shared.listeners.notify(writes.iter());
        Ok(())
    }

    async fn cancel(&self) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        if inner.finished {
            return Err(BackendError::TransactionFinished);
        }
        inner.finished = true;
        inner.writes.clear();
        Ok(())
    }
}
