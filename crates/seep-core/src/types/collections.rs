//! Hash collections used across Seep crates.
//!
//! FxHash is a non-cryptographic hasher; analysis keys are short strings
//! and integer ids, where it is measurably faster than SipHash.

pub use rustc_hash::{FxHashMap, FxHashSet};
