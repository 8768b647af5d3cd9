//! A SIMD-accelerated, copy-on-write Swiss table for 64-bit hosts.
//!
//! Two layers:
//!
//! - [`raw::RawTable`] is the engine: paired control-byte/entry storage,
//!   a SIMD group probe, and insert/lookup/delete/rehash. It consumes a
//!   hash the caller already computed and only ever needs `K: Eq`.
//! - [`map::SwissMap`] is the thin layer most callers want: it owns a
//!   [`std::hash::BuildHasher`], derives the hash per call, and adds the
//!   construction/iteration sugar (`FromIterator`, `Extend`, indexing)
//!   that doesn't belong in the engine itself.
//!
//! Cloning either type is a cheap refcount bump on a shared storage
//! buffer — the clone only pays for a private copy the first time either
//! handle is mutated.

mod iter;
mod probe;
mod raw;
mod storage;

pub mod error;
pub mod map;
pub mod simd;

pub use error::{Result, TableError};
pub use iter::{Iter, IterMut};
pub use map::{DefaultHashBuilder, SwissMap};
pub use raw::{RawTable, TableConfig};
