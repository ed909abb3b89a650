use std::hash;

use crate::lang::marker::PhantomShorten;

// === ConstSafeBuildHasherDefault === //

pub struct ConstSafeBuildHasherDefault<T>(PhantomShorten<T>);

impl<T> ConstSafeBuildHasherDefault<T> {
	pub const fn new() -> Self {
		Self(std::marker::PhantomData)
	}
}

impl<T: Default + hash::Hasher> hash::BuildHasher for ConstSafeBuildHasherDefault<T> {
	type Hasher = T;

	fn build_hasher(&self) -> Self::Hasher {
		T::default()
	}
}

impl<T> Default for ConstSafeBuildHasherDefault<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> Clone for ConstSafeBuildHasherDefault<T> {
	fn clone(&self) -> Self {
		Self::new()
	}
}

// === Hash Maps === //

pub type FxHashBuilder = ConstSafeBuildHasherDefault<fxhash::FxHasher>;
pub type FxHashMap<K, V> = hashbrown::HashMap<K, V, FxHashBuilder>;
pub type FxHashSet<T> = hashbrown::HashSet<T, FxHashBuilder>;

/// A concurrent map hashed with [fxhash]. Used for caches which are read far more often than they
/// are written.
pub type FxDashMap<K, V> = dashmap::DashMap<K, V, FxHashBuilder>;

pub fn new_fx_dash_map<K: Eq + hash::Hash, V>() -> FxDashMap<K, V> {
	dashmap::DashMap::with_hasher(FxHashBuilder::new())
}
