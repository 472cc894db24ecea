use core::hash::Hash;
use std::hash::Hasher;

#[cfg(feature = "std-hash")]
pub mod default {
    pub use std::collections::hash_map::DefaultHasher;

    #[inline]
    pub fn new() -> DefaultHasher {
        DefaultHasher::new()
    }
}

#[cfg(not(feature = "std-hash"))]
pub mod default {
    pub use ahash::AHasher as DefaultHasher;

    #[inline]
    pub fn new() -> DefaultHasher {
        DefaultHasher::default()
    }
}

/// Hash a single value with whichever default hasher is active.
///
/// The hasher is unseeded so the same key hashes identically for the
/// lifetime of the process, which the keyed cache relies on.
#[inline]
pub fn hash_one<T: Hash + ?Sized>(v: &T) -> u64 {
    let mut h = default::new();
    v.hash(&mut h);
    h.finish()
}
