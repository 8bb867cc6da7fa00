//! Range subscribers of a single backend.
//!
//! Both bundled backends keep one [`ListenerSet`] per underlying store and
//! call [`ListenerSet::notify`] after every successful commit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use multistore_core::{KeyValuePair, ScanArgs, Tuple};

use crate::backend::{Callback, StoreValue, Subscription, WriteBatch};

struct Listener<V> {
    /// Subscribed range in absolute (unprefixed) key space.
    args: ScanArgs,
    /// Subspace prefix of the subscribing handle, stripped before delivery.
    strip: Tuple,
    callback: Callback<V>,
}

pub(crate) struct ListenerSet<V> {
    next_id: AtomicU64,
    listeners: DashMap<u64, Listener<V>>,
}

impl<V: StoreValue> ListenerSet<V> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            listeners: DashMap::new(),
        }
    }

    /// Registers a listener. `args` must already be absolute and start with
    /// `strip`.
    pub(crate) fn add(self: &Arc<Self>, args: ScanArgs, strip: Tuple, callback: Callback<V>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(id, Listener { args, strip, callback });

        let set = Arc::clone(self);
        Subscription::new(async move {
            set.listeners.remove(&id);
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Delivers committed writes (absolute keys, `None` = removal) to every
    /// listener whose range they touch.
    pub(crate) fn notify<'a, I>(&self, writes: I)
    where
        I: IntoIterator<Item = (&'a Tuple, &'a Option<V>)> + Clone,
    {
        if self.listeners.is_empty() {
            return;
        }

        // Collect first: callbacks run without holding map shards, so they
        // may subscribe or unsubscribe.
        let deliveries: Vec<(Callback<V>, WriteBatch<V>)> = self
            .listeners
            .iter()
            .filter_map(|entry| {
                let listener = entry.value();
                let mut batch = WriteBatch::default();
                for (key, write) in writes.clone() {
                    if !listener.args.contains(key) {
                        continue;
                    }
                    let Some(relative) = key.strip_prefix(&listener.strip) else {
                        continue;
                    };
                    match write {
                        Some(value) => batch.set.push(KeyValuePair::new(relative, value.clone())),
                        None => batch.remove.push(relative),
                    }
                }
                (!batch.is_empty()).then(|| (Arc::clone(&listener.callback), batch))
            })
            .collect();

        for (callback, batch) in deliveries {
            callback(batch);
        }
    }
}
