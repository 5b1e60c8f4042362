mod id_vec;
pub use id_vec::IdVec;

mod timer;
pub use timer::Timer;

pub type Hasher = std::hash::BuildHasherDefault<rustc_hash::FxHasher>;
pub type HashMap<K, V> = std::collections::HashMap<K, V, Hasher>;
pub type HashSet<T> = std::collections::HashSet<T, Hasher>;

/// Create an empty Fx-hashed map with the given capacity.
pub fn hash_map<K, V>(cap: usize) -> HashMap<K, V> {
    HashMap::with_capacity_and_hasher(cap, Hasher::default())
}

/// Create an empty Fx-hashed set with the given capacity.
pub fn hash_set<T>(cap: usize) -> HashSet<T> {
    HashSet::with_capacity_and_hasher(cap, Hasher::default())
}

/// Lock a mutex, recovering the data if a previous holder panicked.
/// Critical sections in this workspace never leave data half-updated.
pub fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
