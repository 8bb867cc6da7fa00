//! Configuration for [`MultiStore`](crate::MultiStore).

use multistore_core::StorageScope;
use serde::Deserialize;

/// Store-level configuration.
///
/// Deserializable so it can be embedded in a caller's configuration file;
/// missing fields take their default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MultiStoreConfig {
    /// Scope used when an operation does not pass its own.
    /// `None` routes every read and write to every backend.
    pub default_scope: Option<StorageScope>,
    /// How many times `auto_transact` retries after a backend reports a
    /// commit conflict. 0 disables retrying.
    pub max_transaction_retries: u32,
}

impl Default for MultiStoreConfig {
    fn default() -> Self {
        Self {
            default_scope: None,
            max_transaction_retries: 10,
        }
    }
}

impl MultiStoreConfig {
    #[must_use]
    pub fn with_scope(scope: StorageScope) -> Self {
        Self {
            default_scope: Some(scope),
            ..Self::default()
        }
    }
}
