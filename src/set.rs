//! Set adapters over `NodeTable<T, Identity, ..>`. Stored values are their
//! own keys, so no mutable access to them is exposed.

use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::iter::FusedIterator;

use hashbrown::hash_map::DefaultHashBuilder;

use crate::alloc::{AllocStrategy, Global};
use crate::config::TableConfig;
use crate::error::{alloc_failed, InsertFailure, NodeInsertError, TableError};
use crate::key::{DefaultEq, Identity, KeyEq};
use crate::node::{Cursor, InsertReturn, Insertion, NodeHandle};
use crate::node_table::{self, NodeTable};

pub type SetNodeHandle<T> = NodeHandle<T>;

pub type SetInsertReturn<T> = InsertReturn<T>;

/// Hash set of unique values.
pub struct UnorderedSet<T, S = DefaultHashBuilder, E = DefaultEq, A: AllocStrategy = Global> {
    table: NodeTable<T, Identity, S, E, A>,
}

/// Hash multiset; equivalent values are adjacent in iteration order.
pub struct UnorderedMultiSet<T, S = DefaultHashBuilder, E = DefaultEq, A: AllocStrategy = Global> {
    table: NodeTable<T, Identity, S, E, A>,
}

pub struct Iter<'a, T> {
    inner: node_table::Iter<'a, T>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}
impl<T> FusedIterator for Iter<'_, T> {}

macro_rules! set_common {
    ($set:ident) => {
        impl<T> $set<T> {
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

        impl<T, S, E, A> Default for $set<T, S, E, A>
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

        impl<T, S, E, A: AllocStrategy> $set<T, S, E, A> {
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

            pub fn table(&self) -> &NodeTable<T, Identity, S, E, A> {
                &self.table
            }

            pub fn len(&self) -> usize {
                self.table.len()
            }

            pub fn is_empty(&self) -> bool {
                self.table.is_empty()
            }

            pub fn iter(&self) -> Iter<'_, T> {
                Iter {
                    inner: self.table.iter(),
                }
            }

            pub fn cursors(&self) -> node_table::Iter<'_, T> {
                self.table.iter()
            }

            pub fn get_at(&self, c: Cursor) -> Result<&T, TableError> {
                self.table.get(c)
            }

            pub fn erase_at(&mut self, c: Cursor) -> Result<Option<Cursor>, TableError> {
                self.table.erase_at(c)
            }

            pub fn extract_at(&mut self, c: Cursor) -> Result<SetNodeHandle<T>, TableError> {
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

            pub fn bucket_iter(&self, i: usize) -> impl Iterator<Item = &T> + '_ {
                self.table.bucket_iter(i)
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

            pub fn drain(&mut self) -> node_table::IntoIter<T> {
                self.table.drain()
            }

            pub fn retain<F>(&mut self, keep: F)
            where
                F: FnMut(&T) -> bool,
            {
                self.table.retain(keep)
            }

            pub fn swap(&mut self, other: &mut Self) {
                self.table.swap(&mut other.table)
            }

            pub fn try_clone(&self) -> Result<Self, TableError>
            where
                T: Clone,
                S: Clone,
                E: Clone,
                A: Clone,
            {
                Ok(Self {
                    table: self.table.try_clone()?,
                })
            }
        }

        impl<T, S, E, A> $set<T, S, E, A>
        where
            T: Hash,
            S: BuildHasher,
            E: KeyEq<T>,
            A: AllocStrategy,
        {
            pub fn find<Q>(&self, q: &Q) -> Option<Cursor>
            where
                T: Borrow<Q>,
                Q: ?Sized + Hash,
                E: KeyEq<Q>,
            {
                self.table.find(q)
            }

            pub fn contains<Q>(&self, q: &Q) -> bool
            where
                T: Borrow<Q>,
                Q: ?Sized + Hash,
                E: KeyEq<Q>,
            {
                self.table.contains(q)
            }

            pub fn get<Q>(&self, q: &Q) -> Option<&T>
            where
                T: Borrow<Q>,
                Q: ?Sized + Hash,
                E: KeyEq<Q>,
            {
                let c = self.table.find(q)?;
                self.table.get(c).ok()
            }

            pub fn count<Q>(&self, q: &Q) -> usize
            where
                T: Borrow<Q>,
                Q: ?Sized + Hash,
                E: KeyEq<Q>,
            {
                self.table.count(q)
            }

            /// Values equivalent to `q`, with their cursors.
            pub fn equal_range<Q>(&self, q: &Q) -> node_table::EqualRange<'_, T>
            where
                T: Borrow<Q>,
                Q: ?Sized + Hash,
                E: KeyEq<Q>,
            {
                self.table.equal_range(q)
            }

            pub fn erase<Q>(&mut self, q: &Q) -> usize
            where
                T: Borrow<Q>,
                Q: ?Sized + Hash,
                E: KeyEq<Q>,
            {
                self.table.erase(q)
            }

            pub fn extract<Q>(&mut self, q: &Q) -> Option<SetNodeHandle<T>>
            where
                T: Borrow<Q>,
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

        impl<T, S, E, A> PartialEq for $set<T, S, E, A>
        where
            T: Hash + PartialEq,
            S: BuildHasher,
            E: KeyEq<T>,
            A: AllocStrategy,
        {
            fn eq(&self, other: &Self) -> bool {
                self.table == other.table
            }
        }

        impl<T, S, E, A> Eq for $set<T, S, E, A>
        where
            T: Hash + Eq,
            S: BuildHasher,
            E: KeyEq<T>,
            A: AllocStrategy,
        {
        }

        impl<T, S, E, A> Clone for $set<T, S, E, A>
        where
            T: Clone,
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

        impl<T: fmt::Debug, S, E, A: AllocStrategy> fmt::Debug for $set<T, S, E, A> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_set().entries(self.iter()).finish()
            }
        }

        impl<T, S, E, A: AllocStrategy> IntoIterator for $set<T, S, E, A> {
            type Item = T;
            type IntoIter = node_table::IntoIter<T>;

            fn into_iter(self) -> node_table::IntoIter<T> {
                self.table.into_iter()
            }
        }

        impl<'a, T, S, E, A: AllocStrategy> IntoIterator for &'a $set<T, S, E, A> {
            type Item = &'a T;
            type IntoIter = Iter<'a, T>;

            fn into_iter(self) -> Iter<'a, T> {
                self.iter()
            }
        }

        impl<T, S, E, A> FromIterator<T> for $set<T, S, E, A>
        where
            T: Hash,
            S: BuildHasher + Default,
            E: KeyEq<T> + Default,
            A: AllocStrategy + Default,
        {
            fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
                let mut s = Self::default();
                s.extend(iter);
                s
            }
        }
    };
}

set_common!(UnorderedSet);
set_common!(UnorderedMultiSet);

impl<T, S, E, A> UnorderedSet<T, S, E, A>
where
    T: Hash,
    S: BuildHasher,
    E: KeyEq<T>,
    A: AllocStrategy,
{
    /// Insert `value` unless an equivalent value is present, in which case it
    /// comes back in `Insertion::KeyAlreadyExists`.
    pub fn insert(&mut self, value: T) -> Result<Insertion<T>, InsertFailure<T>> {
        self.table.insert_unique(value)
    }

    pub fn insert_node(
        &mut self,
        node: SetNodeHandle<T>,
    ) -> Result<SetInsertReturn<T>, NodeInsertError<T>> {
        self.table.insert_node_unique(node)
    }

    pub fn merge(&mut self, source: &mut Self) -> Result<(), TableError> {
        self.table.merge_unique(&mut source.table)
    }
}

impl<T, S, E, A> UnorderedMultiSet<T, S, E, A>
where
    T: Hash,
    S: BuildHasher,
    E: KeyEq<T>,
    A: AllocStrategy,
{
    pub fn insert(&mut self, value: T) -> Result<Cursor, InsertFailure<T>> {
        self.table.insert_multi(value)
    }

    pub fn insert_node(&mut self, node: SetNodeHandle<T>) -> Result<Cursor, NodeInsertError<T>> {
        self.table.insert_node_multi(node)
    }

    pub fn merge(&mut self, source: &mut Self) -> Result<(), TableError> {
        self.table.merge_multi(&mut source.table)
    }
}

impl<T, S, E, A> Extend<T> for UnorderedSet<T, S, E, A>
where
    T: Hash,
    S: BuildHasher,
    E: KeyEq<T>,
    A: AllocStrategy,
{
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        if let Err(e) = self.table.reserve(iter.size_hint().0) {
            alloc_failed(e);
        }
        for v in iter {
            if let Err(f) = self.table.insert_unique(v) {
                alloc_failed(f.error);
            }
        }
    }
}

impl<T, S, E, A> Extend<T> for UnorderedMultiSet<T, S, E, A>
where
    T: Hash,
    S: BuildHasher,
    E: KeyEq<T>,
    A: AllocStrategy,
{
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        if let Err(e) = self.table.reserve(iter.size_hint().0) {
            alloc_failed(e);
        }
        for v in iter {
            if let Err(f) = self.table.insert_multi(v) {
                alloc_failed(f.error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borrowed_lookup_on_string_set() {
        let s: UnorderedSet<String> = ["a", "bb", "ccc"].iter().map(|s| s.to_string()).collect();
        assert!(s.contains("bb"));
        assert_eq!(s.get("ccc").map(String::as_str), Some("ccc"));
        assert!(s.find("d").is_none());
    }

    #[test]
    fn multiset_counts_and_erases_whole_class() {
        let mut s: UnorderedMultiSet<i32> = [1, 2, 2, 3, 2].into_iter().collect();
        assert_eq!(s.len(), 5);
        assert_eq!(s.count(&2), 3);
        assert_eq!(s.erase(&2), 3);
        assert_eq!(s.count(&2), 0);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn duplicate_value_is_handed_back() {
        let mut s: UnorderedSet<Vec<u8>> = UnorderedSet::new();
        assert!(s.insert(vec![1]).unwrap().is_inserted());
        match s.insert(vec![1]).unwrap() {
            Insertion::KeyAlreadyExists { rejected, .. } => assert_eq!(rejected, vec![1]),
            Insertion::Inserted(_) => panic!("duplicate accepted"),
        }
    }

    #[test]
    fn debug_formats_as_set() {
        let mut s: UnorderedSet<i32> = UnorderedSet::new();
        s.insert(7).unwrap();
        assert_eq!(format!("{:?}", s), "{7}");
    }
}
