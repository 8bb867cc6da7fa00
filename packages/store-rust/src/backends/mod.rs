//! Bundled [`OrderedBackend`](crate::backend::OrderedBackend) implementations.

mod listeners;
pub mod memory;
#[cfg(feature = "redb")]
pub mod redb;

pub use memory::MemoryBackend;
#[cfg(feature = "redb")]
pub use redb::{PersistentValue, RedbBackend};
