//! Multistore Core: tuples, the tuple comparator, k-way merge, scope
//! resolution, and the order-preserving key codec.
//!
//! Everything here is synchronous and free of I/O. The async coordination
//! layer lives in the `multistore` crate.

pub mod codec;
pub mod merge;
pub mod scan;
pub mod scope;
pub mod tuple;

pub use codec::{decode_tuple, encode_tuple, CodecError};
pub use merge::{merge_entries, merge_sorted};
pub use scan::ScanArgs;
pub use scope::{Named, Registry, ScopeContext, ScopeError, StorageScope};
pub use tuple::{compare_element, compare_tuple, Element, KeyValuePair, Tuple};
