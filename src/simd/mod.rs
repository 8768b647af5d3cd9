//! Hashing primitives used by the outer map layer.
//!
//! The raw table (`crate::raw`) never hashes anything itself — it consumes
//! a precomputed 64-bit hash and only needs `K: Eq`. Turning a key into
//! that hash is `SwissMap`'s job (`crate::map`), and this module is where
//! it gets the hash functions to do it with.

pub mod hash;
