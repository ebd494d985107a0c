//! Map adapters over `NodeTable<(K, V), First, ..>`.

use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::iter::FusedIterator;
use core::ops::Index;

use hashbrown::hash_map::DefaultHashBuilder;

use crate::alloc::{AllocStrategy, Global};
use crate::config::TableConfig;
use crate::error::{alloc_failed, InsertFailure, NodeInsertError, TableError};
use crate::key::{DefaultEq, First, KeyEq};
use crate::node::{Cursor, InsertReturn, Insertion, NodeHandle};
use crate::node_table::{self, NodeTable};

/// Node handle extracted from a map.
pub type MapNodeHandle<K, V> = NodeHandle<(K, V)>;

/// Result of inserting a map node handle.
pub type MapInsertReturn<K, V> = InsertReturn<(K, V)>;

/// Hash map with unique keys. Inserting an existing key is rejected, not
/// overwritten.
pub struct UnorderedMap<K, V, S = DefaultHashBuilder, E = DefaultEq, A: AllocStrategy = Global> {
    table: NodeTable<(K, V), First, S, E, A>,
}

/// Hash map that keeps every inserted pair; pairs with equal keys are
/// adjacent in iteration order.
pub struct UnorderedMultiMap<K, V, S = DefaultHashBuilder, E = DefaultEq, A: AllocStrategy = Global>
{
    table: NodeTable<(K, V), First, S, E, A>,
}

/// Iterator over `(&K, &V)` in bucket order.
pub struct Iter<'a, K, V> {
    inner: node_table::Iter<'a, (K, V)>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, (k, v))| (k, v))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}
impl<K, V> FusedIterator for Iter<'_, K, V> {}

/// Values stored under one key of a multimap.
pub struct GetAll<'a, K, V> {
    inner: node_table::EqualRange<'a, (K, V)>,
}

impl<'a, K, V> Iterator for GetAll<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<&'a V> {
        self.inner.next().map(|(_, (_, v))| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for GetAll<'_, K, V> {}

/// Owning iterator over `(K, V)`.
pub struct IntoIter<K, V> {
    inner: node_table::IntoIter<(K, V)>,
}

impl<K, V> Iterator for IntoIter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for IntoIter<K, V> {}

// Operations shared by both map flavors that do not depend on hashing.
macro_rules! map_common {
    ($map:ident) => {
        impl<K, V> $map<K, V> {
            pub fn new() -> Self {
                Self {
                    table: NodeTable::new(),
                }
            }

            pub fn with_capacity(n: usize) -> Self {
                Self {
                    table: NodeTable::with_capacity(n),
                }
            }
        }

        impl<K, V, S, E, A> Default for $map<K, V, S, E, A>
        where
            S: Default,
            E: Default,
            A: AllocStrategy + Default,
        {
            fn default() -> Self {
                Self {
                    table: NodeTable::default(),
                }
            }
        }

        impl<K, V, S, E, A: AllocStrategy> $map<K, V, S, E, A> {
            pub fn with_config_in(config: TableConfig, hasher: S, key_eq: E, alloc: A) -> Self {
                Self {
                    table: NodeTable::with_config_in(config, hasher, key_eq, alloc),
                }
            }

            pub fn with_hasher(hasher: S) -> Self
            where
                E: Default,
                A: Default,
            {
                Self {
                    table: NodeTable::with_hasher(hasher),
                }
            }

            /// The underlying engine.
            pub fn table(&self) -> &NodeTable<(K, V), First, S, E, A> {
                &self.table
            }

            pub fn len(&self) -> usize {
                self.table.len()
            }

            pub fn is_empty(&self) -> bool {
                self.table.is_empty()
            }

            pub fn iter(&self) -> Iter<'_, K, V> {
                Iter {
                    inner: self.table.iter(),
                }
            }

            /// Pairs together with their cursors.
            pub fn cursors(&self) -> node_table::Iter<'_, (K, V)> {
                self.table.iter()
            }

            pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
                self.iter().map(|(k, _)| k)
            }

            pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
                self.iter().map(|(_, v)| v)
            }

            /// Mutable values, in storage order rather than bucket order.
            pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> + '_ {
                self.table.values_mut().map(|(_, v)| v)
            }

            pub fn entry_at(&self, c: Cursor) -> Result<(&K, &V), TableError> {
                self.table.get(c).map(|(k, v)| (k, v))
            }

            pub fn value_at_mut(&mut self, c: Cursor) -> Result<&mut V, TableError> {
                self.table.get_mut(c).map(|(_, v)| v)
            }

            /// Remove the pair at `c`; returns the cursor of the following pair.
            pub fn erase_at(&mut self, c: Cursor) -> Result<Option<Cursor>, TableError> {
                self.table.erase_at(c)
            }

            pub fn extract_at(&mut self, c: Cursor) -> Result<MapNodeHandle<K, V>, TableError> {
                self.table.extract_at(c)
            }

            pub fn rehash(&mut self, n: usize) -> Result<(), TableError> {
                self.table.rehash(n)
            }

            pub fn reserve(&mut self, additional: usize) -> Result<(), TableError> {
                self.table.reserve(additional)
            }

            pub fn bucket_count(&self) -> usize {
                self.table.bucket_count()
            }

            pub fn bucket_len(&self, i: usize) -> usize {
                self.table.bucket_len(i)
            }

            /// Pairs chained in bucket `i`.
            pub fn bucket_iter(&self, i: usize) -> impl Iterator<Item = (&K, &V)> + '_ {
                self.table.bucket_iter(i).map(|(k, v)| (k, v))
            }

            pub fn load_factor(&self) -> f32 {
                self.table.load_factor()
            }

            pub fn max_load_factor(&self) -> f32 {
                self.table.max_load_factor()
            }

            pub fn set_max_load_factor(&mut self, mlf: f32) -> Result<(), TableError> {
                self.table.set_max_load_factor(mlf)
            }

            pub fn clear(&mut self) {
                self.table.clear()
            }

            pub fn drain(&mut self) -> IntoIter<K, V> {
                IntoIter {
                    inner: self.table.drain(),
                }
            }

            pub fn retain<F>(&mut self, mut keep: F)
            where
                F: FnMut(&K, &mut V) -> bool,
            {
                self.table.retain_mut(|(k, v)| keep(&*k, v))
            }

            pub fn swap(&mut self, other: &mut Self) {
                self.table.swap(&mut other.table)
            }

            pub fn try_clone(&self) -> Result<Self, TableError>
            where
                K: Clone,
                V: Clone,
                S: Clone,
                E: Clone,
                A: Clone,
            {
                Ok(Self {
                    table: self.table.try_clone()?,
                })
            }
        }

        impl<K, V, S, E, A> $map<K, V, S, E, A>
        where
            K: Hash,
            S: BuildHasher,
            E: KeyEq<K>,
            A: AllocStrategy,
        {
            pub fn find<Q>(&self, q: &Q) -> Option<Cursor>
            where
                K: Borrow<Q>,
                Q: ?Sized + Hash,
                E: KeyEq<Q>,
            {
                self.table.find(q)
            }

            pub fn contains_key<Q>(&self, q: &Q) -> bool
            where
                K: Borrow<Q>,
                Q: ?Sized + Hash,
                E: KeyEq<Q>,
            {
                self.table.contains(q)
            }

            /// First value stored under `q`.
            pub fn get<Q>(&self, q: &Q) -> Option<&V>
            where
                K: Borrow<Q>,
                Q: ?Sized + Hash,
                E: KeyEq<Q>,
            {
                let c = self.table.find(q)?;
                self.table.get(c).ok().map(|(_, v)| v)
            }

            pub fn get_mut<Q>(&mut self, q: &Q) -> Option<&mut V>
            where
                K: Borrow<Q>,
                Q: ?Sized + Hash,
                E: KeyEq<Q>,
            {
                let c = self.table.find(q)?;
                self.table.get_mut(c).ok().map(|(_, v)| v)
            }

            pub fn count<Q>(&self, q: &Q) -> usize
            where
                K: Borrow<Q>,
                Q: ?Sized + Hash,
                E: KeyEq<Q>,
            {
                self.table.count(q)
            }

            /// Remove every pair stored under `q`; returns how many were removed.
            pub fn erase<Q>(&mut self, q: &Q) -> usize
            where
                K: Borrow<Q>,
                Q: ?Sized + Hash,
                E: KeyEq<Q>,
            {
                self.table.erase(q)
            }

            /// Detach the first pair stored under `q`.
            pub fn extract<Q>(&mut self, q: &Q) -> Option<MapNodeHandle<K, V>>
            where
                K: Borrow<Q>,
                Q: ?Sized + Hash,
                E: KeyEq<Q>,
            {
                self.table.extract(q)
            }

            pub fn bucket<Q>(&self, q: &Q) -> Option<usize>
            where
                Q: ?Sized + Hash,
            {
                self.table.bucket(q)
            }
        }

        impl<K, V, S, E, A> PartialEq for $map<K, V, S, E, A>
        where
            K: Hash + PartialEq,
            V: PartialEq,
            S: BuildHasher,
            E: KeyEq<K>,
            A: AllocStrategy,
        {
            fn eq(&self, other: &Self) -> bool {
                self.table == other.table
            }
        }

        impl<K, V, S, E, A> Eq for $map<K, V, S, E, A>
        where
            K: Hash + Eq,
            V: Eq,
            S: BuildHasher,
            E: KeyEq<K>,
            A: AllocStrategy,
        {
        }

        impl<K, V, S, E, A> Clone for $map<K, V, S, E, A>
        where
            K: Clone,
            V: Clone,
            S: Clone,
            E: Clone,
            A: AllocStrategy + Clone,
        {
            fn clone(&self) -> Self {
                Self {
                    table: self.table.clone(),
                }
            }
        }

        impl<K, V, S, E, A> fmt::Debug for $map<K, V, S, E, A>
        where
            K: fmt::Debug,
            V: fmt::Debug,
            A: AllocStrategy,
        {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_map().entries(self.iter()).finish()
            }
        }

        impl<K, V, S, E, A: AllocStrategy> IntoIterator for $map<K, V, S, E, A> {
            type Item = (K, V);
            type IntoIter = IntoIter<K, V>;

            fn into_iter(self) -> IntoIter<K, V> {
                IntoIter {
                    inner: self.table.into_iter(),
                }
            }
        }

        impl<'a, K, V, S, E, A: AllocStrategy> IntoIterator for &'a $map<K, V, S, E, A> {
            type Item = (&'a K, &'a V);
            type IntoIter = Iter<'a, K, V>;

            fn into_iter(self) -> Iter<'a, K, V> {
                self.iter()
            }
        }

        impl<K, V, S, E, A> FromIterator<(K, V)> for $map<K, V, S, E, A>
        where
            K: Hash,
            S: BuildHasher + Default,
            E: KeyEq<K> + Default,
            A: AllocStrategy + Default,
        {
            fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
                let mut m = Self::default();
                m.extend(iter);
                m
            }
        }
    };
}

map_common!(UnorderedMap);
map_common!(UnorderedMultiMap);

impl<K, V, S, E, A> UnorderedMap<K, V, S, E, A>
where
    K: Hash,
    S: BuildHasher,
    E: KeyEq<K>,
    A: AllocStrategy,
{
    /// Insert `key -> value` unless the key is present. On a duplicate the
    /// pair comes back in `Insertion::KeyAlreadyExists`.
    pub fn insert(&mut self, key: K, value: V) -> Result<Insertion<(K, V)>, InsertFailure<(K, V)>> {
        self.table.insert_unique((key, value))
    }

    /// Value under `key`, inserting `default()` first when absent.
    pub fn get_or_insert_with<F>(&mut self, key: K, default: F) -> Result<&mut V, TableError>
    where
        F: FnOnce() -> V,
    {
        let (c, _) = self.table.insert_unique_with(key, |k| (k, default()))?;
        self.table.get_mut(c).map(|(_, v)| v)
    }

    pub fn insert_node(
        &mut self,
        node: MapNodeHandle<K, V>,
    ) -> Result<MapInsertReturn<K, V>, NodeInsertError<(K, V)>> {
        self.table.insert_node_unique(node)
    }

    /// Move the pairs of `source` whose keys are absent here.
    pub fn merge(&mut self, source: &mut Self) -> Result<(), TableError> {
        self.table.merge_unique(&mut source.table)
    }
}

impl<K, V, S, E, A> UnorderedMultiMap<K, V, S, E, A>
where
    K: Hash,
    S: BuildHasher,
    E: KeyEq<K>,
    A: AllocStrategy,
{
    pub fn insert(&mut self, key: K, value: V) -> Result<Cursor, InsertFailure<(K, V)>> {
        self.table.insert_multi((key, value))
    }

    /// Every value stored under `q`, in insertion order.
    pub fn get_all<Q>(&self, q: &Q) -> GetAll<'_, K, V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<Q>,
    {
        GetAll {
            inner: self.table.equal_range(q),
        }
    }

    /// The pairs stored under `q` together with their cursors.
    pub fn equal_range<Q>(&self, q: &Q) -> node_table::EqualRange<'_, (K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<Q>,
    {
        self.table.equal_range(q)
    }

    pub fn insert_node(
        &mut self,
        node: MapNodeHandle<K, V>,
    ) -> Result<Cursor, NodeInsertError<(K, V)>> {
        self.table.insert_node_multi(node)
    }

    /// Move every pair of `source` into this map.
    pub fn merge(&mut self, source: &mut Self) -> Result<(), TableError> {
        self.table.merge_multi(&mut source.table)
    }
}

impl<K, V, S, E, A> Extend<(K, V)> for UnorderedMap<K, V, S, E, A>
where
    K: Hash,
    S: BuildHasher,
    E: KeyEq<K>,
    A: AllocStrategy,
{
    /// Pairs whose key is already present are dropped.
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        if let Err(e) = self.table.reserve(iter.size_hint().0) {
            alloc_failed(e);
        }
        for (k, v) in iter {
            if let Err(f) = self.table.insert_unique((k, v)) {
                alloc_failed(f.error);
            }
        }
    }
}

impl<K, V, S, E, A> Extend<(K, V)> for UnorderedMultiMap<K, V, S, E, A>
where
    K: Hash,
    S: BuildHasher,
    E: KeyEq<K>,
    A: AllocStrategy,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        if let Err(e) = self.table.reserve(iter.size_hint().0) {
            alloc_failed(e);
        }
        for (k, v) in iter {
            if let Err(f) = self.table.insert_multi((k, v)) {
                alloc_failed(f.error);
            }
        }
    }
}

impl<K, Q, V, S, E, A> Index<&Q> for UnorderedMap<K, V, S, E, A>
where
    K: Hash + Borrow<Q>,
    Q: ?Sized + Hash,
    S: BuildHasher,
    E: KeyEq<K> + KeyEq<Q>,
    A: AllocStrategy,
{
    type Output = V;

    /// Panics if the key is absent.
    fn index(&self, key: &Q) -> &V {
        self.get(key).expect("key not found")
    }
}
