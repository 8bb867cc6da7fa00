//! Multistore: several ordered key-value backends presented as one store.
//!
//! Reads fan out to a configurable subset of backends and their sorted
//! results are merged into one ordered sequence. Writes go through
//! [`MultiTransaction`], which holds one native transaction per backend and
//! commits them together. Commits are parallel and best-effort: there is no
//! cross-backend atomicity.

pub mod backend;
pub mod backends;
pub mod config;
pub mod error;
pub mod operator;
pub mod store;
pub mod transaction;

#[cfg(test)]
pub(crate) mod test_support;

pub use backend::{
    BackendError, BackendTransaction, Callback, OrderedBackend, StoreValue, Subscription,
    TupleRead, WriteBatch,
};
pub use backends::MemoryBackend;
#[cfg(feature = "redb")]
pub use backends::RedbBackend;
pub use config::MultiStoreConfig;
pub use error::StoreError;
pub use multistore_core::{
    tuple, Element, KeyValuePair, ScanArgs, ScopeContext, ScopeError, StorageScope, Tuple,
};
pub use operator::ScopedOperator;
pub use store::MultiStore;
pub use transaction::{MultiTransaction, TransactionState};
