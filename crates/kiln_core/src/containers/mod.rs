//! Fixed-capacity containers

mod hashtable;

pub use hashtable::{hash_name, HashTable, HashTableError, PointerTable};
