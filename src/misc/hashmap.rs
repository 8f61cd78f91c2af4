use std::collections::HashMap as OriginalHashMap;
use std::hash::BuildHasherDefault;
use twox_hash::XxHash64;
use nohash_hasher::{IntMap, IntSet};

/// Arbitrary HashMap using more performant hashing algorithm
/// Used for pattern keys (aisle + order set)
pub type FullHashMap<K, V> = OriginalHashMap<K, V, BuildHasherDefault<XxHash64>>;

/// Set of int-like ids (column ids), hashed as themselves
pub type HashSet<K> = IntSet<K>;

/// HashMap for Int Types (k values, column ids) without rehashing
pub type HashMap<K,V> = IntMap<K,V>;
