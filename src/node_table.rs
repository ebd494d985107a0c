//! NodeTable: the bucket-chained hash table engine behind every container.
//!
//! Layout
//! - Nodes live in a generational `SlotMap`; a node's slot key never changes
//!   while the node is in the table, so cursors survive inserts, rehashes and
//!   erasure of other nodes.
//! - `heads[b]` points at the first node of bucket `b`; nodes of one bucket
//!   form a doubly linked chain through `prev`/`next`.
//! - Each node caches its 64-bit hash. Rehashing never calls `Hash` again.
//! - Iteration order is bucket order, then chain order. Members of one
//!   equivalence class are always adjacent in their chain.

use core::alloc::Layout;
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::iter::FusedIterator;
use core::marker::PhantomData;

use hashbrown::hash_map::DefaultHashBuilder;
use slotmap::{DefaultKey, SlotMap};

use crate::alloc::{AllocStrategy, Global};
use crate::config::{buckets_for, normalize_load_factor, TableConfig};
use crate::error::{alloc_failed, AllocError, InsertFailure, NodeInsertError, TableError};
use crate::key::{DefaultEq, KeyEq, KeyOf};
use crate::node::{Cursor, InsertReturn, Insertion, NodeHandle, TableId};

#[derive(Clone, Debug)]
struct Node<T> {
    value: T,
    hash: u64,
    prev: Option<DefaultKey>,
    next: Option<DefaultKey>,
}

/// Generic node-based hash table.
///
/// - `T`: stored value.
/// - `X`: key extraction (`Identity` for sets, `First` for maps).
/// - `S`: hash builder.
/// - `E`: key equality predicate.
/// - `A`: allocation strategy.
///
/// Not internally synchronized. Shared references may be used from several
/// threads at once (`NodeTable` is `Sync` when its parameters are); mutation
/// needs `&mut`.
pub struct NodeTable<T, X, S = DefaultHashBuilder, E = DefaultEq, A: AllocStrategy = Global> {
    id: TableId,
    hasher: S,
    key_eq: E,
    alloc: A,
    config: TableConfig,
    heads: Vec<Option<DefaultKey>>,
    nodes: SlotMap<DefaultKey, Node<T>>,
    _key: PhantomData<fn() -> X>,
}

fn bucket_layout(n: usize) -> Result<Layout, AllocError> {
    Layout::array::<Option<DefaultKey>>(n).map_err(|_| AllocError::CapacityOverflow)
}

impl<T, X, S, E, A> NodeTable<T, X, S, E, A>
where
    S: Default,
    E: Default,
    A: AllocStrategy + Default,
{
    pub fn new() -> Self {
        Self::with_config_in(TableConfig::default(), S::default(), E::default(), A::default())
    }

    /// Empty table with room for `n` entries without rehashing.
    pub fn with_capacity(n: usize) -> Self {
        let mut t = Self::new();
        if let Err(e) = t.reserve(n) {
            alloc_failed(e);
        }
        t
    }
}

impl<T, X, S, E, A> Default for NodeTable<T, X, S, E, A>
where
    S: Default,
    E: Default,
    A: AllocStrategy + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, X, S, E, A> NodeTable<T, X, S, E, A>
where
    A: AllocStrategy,
{
    /// Empty table; nothing is allocated until the first insert or reserve.
    pub fn with_config_in(config: TableConfig, hasher: S, key_eq: E, alloc: A) -> Self {
        Self {
            id: TableId::fresh(),
            hasher,
            key_eq,
            alloc,
            config: config.normalized(),
            heads: Vec::new(),
            nodes: SlotMap::with_key(),
            _key: PhantomData,
        }
    }

    pub fn with_hasher(hasher: S) -> Self
    where
        E: Default,
        A: Default,
    {
        Self::with_config_in(TableConfig::default(), hasher, E::default(), A::default())
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    pub fn key_eq(&self) -> &E {
        &self.key_eq
    }

    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    pub fn config(&self) -> TableConfig {
        self.config
    }

    pub fn bucket_count(&self) -> usize {
        self.heads.len()
    }

    /// Number of nodes chained in bucket `i` (0 when out of range).
    pub fn bucket_len(&self, i: usize) -> usize {
        self.bucket_iter(i).count()
    }

    /// Values chained in bucket `i`, in chain order. Empty when out of range.
    pub fn bucket_iter(&self, i: usize) -> impl Iterator<Item = &T> + '_ {
        let head = self.heads.get(i).copied().flatten();
        core::iter::successors(head, move |k| self.nodes[*k].next)
            .map(move |k| &self.nodes[k].value)
    }

    pub fn load_factor(&self) -> f32 {
        if self.heads.is_empty() {
            0.0
        } else {
            self.len() as f32 / self.heads.len() as f32
        }
    }

    pub fn max_load_factor(&self) -> f32 {
        self.config.max_load_factor
    }

    /// Change the load bound, rehashing if the current load exceeds it. On
    /// failure the previous bound and layout are kept.
    pub fn set_max_load_factor(&mut self, mlf: f32) -> Result<(), TableError> {
        let previous = self.config.max_load_factor;
        self.config.max_load_factor = normalize_load_factor(mlf);
        if let Err(e) = self.grow_for(self.len()) {
            self.config.max_load_factor = previous;
            return Err(e);
        }
        Ok(())
    }

    #[inline]
    fn bucket_index(&self, hash: u64) -> usize {
        debug_assert!(!self.heads.is_empty());
        (hash as usize) & (self.heads.len() - 1)
    }

    fn node_layout() -> Layout {
        Layout::new::<Node<T>>()
    }

    fn grant_buckets(&self, n: usize) -> Result<Layout, AllocError> {
        let layout = bucket_layout(n)?;
        if n > 0 {
            self.alloc.allocate(layout)?;
        }
        Ok(layout)
    }

    fn release_buckets(&self, n: usize) {
        if n > 0 {
            if let Ok(layout) = bucket_layout(n) {
                self.alloc.deallocate(layout);
            }
        }
    }

    /// Admit one more node and make sure the bucket array can hold it. Either
    /// both succeed or nothing changes.
    fn reserve_one(&mut self) -> Result<(), TableError> {
        let layout = Self::node_layout();
        if let Err(e) = self.alloc.allocate(layout) {
            log::debug!("node allocation refused: {e}");
            return Err(e.into());
        }
        if let Err(e) = self.grow_for(self.len() + 1) {
            self.alloc.deallocate(layout);
            return Err(e);
        }
        Ok(())
    }

    /// Grow (never shrink) so that `len` entries respect the load bound.
    fn grow_for(&mut self, len: usize) -> Result<(), TableError> {
        let required = buckets_for(len, self.config.max_load_factor);
        if required <= self.heads.len() {
            return Ok(());
        }
        let target = required
            .max(self.heads.len() * 2)
            .max(self.config.min_buckets)
            .checked_next_power_of_two()
            .ok_or(AllocError::CapacityOverflow)?;
        self.rehash_to(target)
    }

    /// Redistribute every node over `new_count` buckets (zero or a power of
    /// two, large enough for the current length).
    ///
    /// The new array is obtained before anything is relinked, so a failure
    /// leaves the table untouched. Nodes are relinked in reverse iteration
    /// order by prepending, which keeps their relative order inside each
    /// destination bucket.
    fn rehash_to(&mut self, new_count: usize) -> Result<(), TableError> {
        let old_count = self.heads.len();
        if new_count == old_count {
            return Ok(());
        }
        debug_assert!(new_count == 0 || new_count.is_power_of_two());
        debug_assert!(new_count > 0 || self.is_empty());

        let layout = match self.grant_buckets(new_count) {
            Ok(l) => l,
            Err(e) => {
                log::debug!("bucket array of {new_count} refused: {e}");
                return Err(e.into());
            }
        };
        let mut heads: Vec<Option<DefaultKey>> = Vec::new();
        if heads.try_reserve_exact(new_count).is_err() {
            self.release_buckets(new_count);
            log::debug!("bucket array of {new_count} could not be reserved");
            return Err(AllocError::Refused { layout }.into());
        }
        heads.resize(new_count, None);

        let old_heads = core::mem::replace(&mut self.heads, heads);
        for &head in old_heads.iter().rev() {
            let Some(mut tail) = head else { continue };
            while let Some(n) = self.nodes[tail].next {
                tail = n;
            }
            let mut cur = Some(tail);
            while let Some(k) = cur {
                cur = self.nodes[k].prev;
                let b = self.bucket_index(self.nodes[k].hash);
                self.link_front(k, b);
            }
        }
        self.release_buckets(old_count);
        log::trace!(
            "rehash: {} -> {} buckets ({} nodes)",
            old_count,
            new_count,
            self.len()
        );
        Ok(())
    }

    /// Rehash to at least `n` buckets, and never fewer than the current
    /// length requires. `rehash(0)` shrinks to fit (and releases the bucket
    /// array of an empty table).
    pub fn rehash(&mut self, n: usize) -> Result<(), TableError> {
        let required = buckets_for(self.len(), self.config.max_load_factor);
        let want = n.max(required);
        let target = if want == 0 {
            0
        } else {
            want.max(self.config.min_buckets)
                .checked_next_power_of_two()
                .ok_or(AllocError::CapacityOverflow)?
        };
        self.rehash_to(target)
    }

    /// Make room for `additional` more entries without further rehashing.
    pub fn reserve(&mut self, additional: usize) -> Result<(), TableError> {
        let len = self
            .len()
            .checked_add(additional)
            .ok_or(AllocError::CapacityOverflow)?;
        self.grow_for(len)
    }

    fn link_front(&mut self, k: DefaultKey, bucket: usize) {
        let head = self.heads[bucket];
        {
            let node = &mut self.nodes[k];
            node.prev = None;
            node.next = head;
        }
        if let Some(h) = head {
            self.nodes[h].prev = Some(k);
        }
        self.heads[bucket] = Some(k);
    }

    fn link_after(&mut self, after: DefaultKey, k: DefaultKey) {
        let next = self.nodes[after].next;
        {
            let node = &mut self.nodes[k];
            node.prev = Some(after);
            node.next = next;
        }
        self.nodes[after].next = Some(k);
        if let Some(n) = next {
            self.nodes[n].prev = Some(k);
        }
    }

    fn unlink(&mut self, k: DefaultKey) {
        let (prev, next, hash) = {
            let node = &self.nodes[k];
            (node.prev, node.next, node.hash)
        };
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => {
                let b = self.bucket_index(hash);
                self.heads[b] = next;
            }
        }
        if let Some(n) = next {
            self.nodes[n].prev = prev;
        }
    }

    /// Store a node admitted by `reserve_one` and link it at the front of its
    /// bucket, or right after `after`.
    fn link_new(&mut self, hash: u64, value: T, after: Option<DefaultKey>) -> DefaultKey {
        let k = self.nodes.insert(Node {
            value,
            hash,
            prev: None,
            next: None,
        });
        match after {
            Some(a) => self.link_after(a, k),
            None => {
                let b = self.bucket_index(hash);
                self.link_front(k, b);
            }
        }
        k
    }

    fn remove_node(&mut self, k: DefaultKey) -> Node<T> {
        self.unlink(k);
        let node = self
            .nodes
            .remove(k)
            .expect("linked node must be present in storage");
        self.alloc.deallocate(Self::node_layout());
        node
    }

    fn first_key(&self) -> Option<DefaultKey> {
        self.heads.iter().find_map(|h| *h)
    }

    /// Next node in iteration order.
    fn successor(&self, k: DefaultKey) -> Option<DefaultKey> {
        let node = &self.nodes[k];
        if node.next.is_some() {
            return node.next;
        }
        let b = self.bucket_index(node.hash);
        self.heads[b + 1..].iter().find_map(|h| *h)
    }

    fn resolve(&self, c: Cursor) -> Result<DefaultKey, TableError> {
        let k = c.check_owner(self.id)?;
        if self.nodes.contains_key(k) {
            Ok(k)
        } else {
            Err(TableError::StaleCursor)
        }
    }

    #[inline]
    fn cursor(&self, k: DefaultKey) -> Cursor {
        Cursor::new(self.id, k)
    }

    /// Value at `c`.
    pub fn get(&self, c: Cursor) -> Result<&T, TableError> {
        let k = self.resolve(c)?;
        Ok(&self.nodes[k].value)
    }

    /// Mutable access is crate-internal: adapters only hand out the parts
    /// that do not affect the key.
    pub(crate) fn get_mut(&mut self, c: Cursor) -> Result<&mut T, TableError> {
        let k = self.resolve(c)?;
        Ok(&mut self.nodes[k].value)
    }

    /// Cursor to the first entry in iteration order.
    pub fn first(&self) -> Option<Cursor> {
        self.first_key().map(|k| self.cursor(k))
    }

    /// Cursor to the entry following `c` in iteration order.
    pub fn next_cursor(&self, c: Cursor) -> Result<Option<Cursor>, TableError> {
        let k = self.resolve(c)?;
        Ok(self.successor(k).map(|n| self.cursor(n)))
    }

    /// Remove exactly the entry at `c`. Returns the cursor of the entry that
    /// followed it.
    pub fn erase_at(&mut self, c: Cursor) -> Result<Option<Cursor>, TableError> {
        let k = self.resolve(c)?;
        let next = self.successor(k);
        drop(self.remove_node(k));
        Ok(next.map(|n| self.cursor(n)))
    }

    /// Detach the entry at `c` without destroying its value.
    pub fn extract_at(&mut self, c: Cursor) -> Result<NodeHandle<T>, TableError> {
        let k = self.resolve(c)?;
        let node = self.remove_node(k);
        Ok(NodeHandle::new(self.id, self.alloc.domain(), node.hash, node.value))
    }

    /// Entries with their cursors, in bucket order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            nodes: &self.nodes,
            heads: &self.heads,
            owner: self.id,
            bucket: 0,
            cur: None,
            remaining: self.nodes.len(),
        }
    }

    /// Mutable values in storage order. Crate-internal for the same reason
    /// as `get_mut`.
    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        self.nodes.values_mut().map(|n| &mut n.value)
    }

    /// Remove every entry; the bucket array is kept.
    pub fn clear(&mut self) {
        let layout = Self::node_layout();
        for _ in 0..self.nodes.len() {
            self.alloc.deallocate(layout);
        }
        self.nodes.clear();
        self.heads.fill(None);
    }

    /// Remove every entry, yielding the values in iteration order.
    pub fn drain(&mut self) -> IntoIter<T> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let layout = Self::node_layout();
        for b in 0..self.heads.len() {
            let mut cur = self.heads[b].take();
            while let Some(k) = cur {
                let Some(node) = self.nodes.remove(k) else { break };
                self.alloc.deallocate(layout);
                cur = node.next;
                out.push(node.value);
            }
        }
        debug_assert!(self.nodes.is_empty());
        IntoIter {
            inner: out.into_iter(),
        }
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&T) -> bool,
    {
        self.retain_mut(|v| keep(&*v))
    }

    pub(crate) fn retain_mut<F>(&mut self, mut keep: F)
    where
        F: FnMut(&mut T) -> bool,
    {
        for b in 0..self.heads.len() {
            let mut cur = self.heads[b];
            while let Some(k) = cur {
                cur = self.nodes[k].next;
                if !keep(&mut self.nodes[k].value) {
                    drop(self.remove_node(k));
                }
            }
        }
    }

    /// Exchange the complete contents of two tables in O(1). Cursors and
    /// node handles follow their nodes into the other instance.
    pub fn swap(&mut self, other: &mut Self) {
        core::mem::swap(self, other);
    }

    /// Deep copy with a fresh owner tag. Every node and the bucket array are
    /// admitted by the (cloned) allocation strategy first.
    pub fn try_clone(&self) -> Result<Self, TableError>
    where
        T: Clone,
        S: Clone,
        E: Clone,
        A: Clone,
    {
        let alloc = self.alloc.clone();
        let node_layout = Self::node_layout();
        let bucket_count = self.heads.len();
        let buckets = bucket_layout(bucket_count)?;
        if bucket_count > 0 {
            alloc.allocate(buckets)?;
        }
        let rollback = |granted: usize| {
            for _ in 0..granted {
                alloc.deallocate(node_layout);
            }
            if bucket_count > 0 {
                alloc.deallocate(buckets);
            }
        };
        for granted in 0..self.nodes.len() {
            if let Err(e) = alloc.allocate(node_layout) {
                rollback(granted);
                return Err(e.into());
            }
        }
        let mut heads = Vec::new();
        if heads.try_reserve_exact(bucket_count).is_err() {
            rollback(self.nodes.len());
            return Err(AllocError::Refused { layout: buckets }.into());
        }
        heads.extend_from_slice(&self.heads);
        Ok(Self {
            id: TableId::fresh(),
            hasher: self.hasher.clone(),
            key_eq: self.key_eq.clone(),
            alloc,
            config: self.config,
            heads,
            nodes: self.nodes.clone(),
            _key: PhantomData,
        })
    }
}

impl<T, X, S, E, A> NodeTable<T, X, S, E, A>
where
    X: KeyOf<T>,
    X::Key: Hash,
    S: BuildHasher,
    E: KeyEq<X::Key>,
    A: AllocStrategy,
{
    fn make_hash<Q>(&self, q: &Q) -> u64
    where
        Q: ?Sized + Hash,
    {
        self.hasher.hash_one(q)
    }

    fn find_hashed<Q>(&self, hash: u64, q: &Q) -> Option<DefaultKey>
    where
        X::Key: Borrow<Q>,
        Q: ?Sized,
        E: KeyEq<Q>,
    {
        if self.heads.is_empty() {
            return None;
        }
        let mut cur = self.heads[self.bucket_index(hash)];
        while let Some(k) = cur {
            if self.matches(k, hash, q) {
                return Some(k);
            }
            cur = self.nodes[k].next;
        }
        None
    }

    #[inline]
    fn matches<Q>(&self, k: DefaultKey, hash: u64, q: &Q) -> bool
    where
        X::Key: Borrow<Q>,
        Q: ?Sized,
        E: KeyEq<Q>,
    {
        let node = &self.nodes[k];
        node.hash == hash
            && KeyEq::<Q>::eq(
                &self.key_eq,
                <X::Key as Borrow<Q>>::borrow(X::key_of(&node.value)),
                q,
            )
    }

    fn same_class(&self, a: DefaultKey, b: DefaultKey) -> bool {
        let (na, nb) = (&self.nodes[a], &self.nodes[b]);
        na.hash == nb.hash
            && KeyEq::<X::Key>::eq(&self.key_eq, X::key_of(&na.value), X::key_of(&nb.value))
    }

    /// Last member of the equivalence class starting at `first`.
    fn group_last(&self, first: DefaultKey) -> DefaultKey {
        let mut last = first;
        while let Some(n) = self.nodes[last].next {
            if !self.same_class(first, n) {
                break;
            }
            last = n;
        }
        last
    }

    /// Cursor to an entry whose key is equivalent to `q`.
    pub fn find<Q>(&self, q: &Q) -> Option<Cursor>
    where
        X::Key: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<Q>,
    {
        let hash = self.make_hash(q);
        self.find_hashed(hash, q).map(|k| self.cursor(k))
    }

    pub fn contains<Q>(&self, q: &Q) -> bool
    where
        X::Key: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<Q>,
    {
        self.find(q).is_some()
    }

    /// Every entry equivalent to `q`, adjacent in iteration order.
    pub fn equal_range<Q>(&self, q: &Q) -> EqualRange<'_, T>
    where
        X::Key: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<Q>,
    {
        let hash = self.make_hash(q);
        let first = self.find_hashed(hash, q);
        let mut remaining = 0;
        let mut cur = first;
        while let Some(k) = cur {
            if !self.matches(k, hash, q) {
                break;
            }
            remaining += 1;
            cur = self.nodes[k].next;
        }
        EqualRange {
            nodes: &self.nodes,
            owner: self.id,
            cur: first,
            remaining,
        }
    }

    pub fn count<Q>(&self, q: &Q) -> usize
    where
        X::Key: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<Q>,
    {
        self.equal_range(q).len()
    }

    /// Bucket that `q` maps to, or `None` while no buckets exist.
    pub fn bucket<Q>(&self, q: &Q) -> Option<usize>
    where
        Q: ?Sized + Hash,
    {
        if self.heads.is_empty() {
            None
        } else {
            Some(self.bucket_index(self.make_hash(q)))
        }
    }

    /// Insert into a unique-keyed table. An equivalent key leaves the table
    /// untouched and hands the value back.
    pub fn insert_unique(&mut self, value: T) -> Result<Insertion<T>, InsertFailure<T>> {
        let hash = self.make_hash(X::key_of(&value));
        if let Some(k) = self.find_hashed(hash, X::key_of(&value)) {
            return Ok(Insertion::KeyAlreadyExists {
                existing: self.cursor(k),
                rejected: value,
            });
        }
        if let Err(error) = self.reserve_one() {
            return Err(InsertFailure { error, value });
        }
        let k = self.link_new(hash, value, None);
        Ok(Insertion::Inserted(self.cursor(k)))
    }

    /// Unique insert that builds the value only when `key` is absent.
    /// Returns the entry's cursor and whether it was inserted.
    pub fn insert_unique_with<Q, F>(&mut self, key: Q, make: F) -> Result<(Cursor, bool), TableError>
    where
        X::Key: Borrow<Q>,
        Q: Hash,
        E: KeyEq<Q>,
        F: FnOnce(Q) -> T,
    {
        let hash = self.make_hash(&key);
        if let Some(k) = self.find_hashed(hash, &key) {
            return Ok((self.cursor(k), false));
        }
        self.reserve_one()?;
        let value = make(key);
        let k = self.link_new(hash, value, None);
        Ok((self.cursor(k), true))
    }

    /// Insert into a multi-keyed table, directly after any entries already
    /// holding an equivalent key.
    pub fn insert_multi(&mut self, value: T) -> Result<Cursor, InsertFailure<T>> {
        let hash = self.make_hash(X::key_of(&value));
        if let Err(error) = self.reserve_one() {
            return Err(InsertFailure { error, value });
        }
        let after = self
            .find_hashed(hash, X::key_of(&value))
            .map(|first| self.group_last(first));
        let k = self.link_new(hash, value, after);
        Ok(self.cursor(k))
    }

    /// Remove every entry equivalent to `q`; returns how many were removed.
    pub fn erase<Q>(&mut self, q: &Q) -> usize
    where
        X::Key: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<Q>,
    {
        let hash = self.make_hash(q);
        let mut cur = self.find_hashed(hash, q);
        let mut removed = 0;
        while let Some(k) = cur {
            if !self.matches(k, hash, q) {
                break;
            }
            cur = self.nodes[k].next;
            drop(self.remove_node(k));
            removed += 1;
        }
        removed
    }

    /// Detach the first entry equivalent to `q`.
    pub fn extract<Q>(&mut self, q: &Q) -> Option<NodeHandle<T>>
    where
        X::Key: Borrow<Q>,
        Q: ?Sized + Hash,
        E: KeyEq<Q>,
    {
        let hash = self.make_hash(q);
        let k = self.find_hashed(hash, q)?;
        let node = self.remove_node(k);
        Some(NodeHandle::new(self.id, self.alloc.domain(), node.hash, node.value))
    }

    /// Accept a handle from any table in the same allocation domain. A
    /// handle from another table is rehashed with this table's hasher and
    /// retagged.
    fn adopt(&self, mut node: NodeHandle<T>) -> Result<NodeHandle<T>, NodeInsertError<T>> {
        if node.domain != self.alloc.domain() {
            return Err(NodeInsertError {
                error: TableError::IncompatibleContainer,
                node,
            });
        }
        if node.origin != self.id {
            node.hash = self.make_hash(X::key_of(&node.value));
            node.origin = self.id;
        }
        Ok(node)
    }

    /// Insert a node handle into a unique-keyed table.
    pub fn insert_node_unique(
        &mut self,
        node: NodeHandle<T>,
    ) -> Result<InsertReturn<T>, NodeInsertError<T>> {
        let node = self.adopt(node)?;
        if let Some(k) = self.find_hashed(node.hash, X::key_of(&node.value)) {
            return Ok(InsertReturn {
                position: self.cursor(k),
                inserted: false,
                node: Some(node),
            });
        }
        if let Err(error) = self.reserve_one() {
            return Err(NodeInsertError { error, node });
        }
        let NodeHandle { hash, value, .. } = node;
        let k = self.link_new(hash, value, None);
        Ok(InsertReturn {
            position: self.cursor(k),
            inserted: true,
            node: None,
        })
    }

    /// Insert a node handle into a multi-keyed table.
    pub fn insert_node_multi(&mut self, node: NodeHandle<T>) -> Result<Cursor, NodeInsertError<T>> {
        let node = self.adopt(node)?;
        if let Err(error) = self.reserve_one() {
            return Err(NodeInsertError { error, node });
        }
        let NodeHandle { hash, value, .. } = node;
        let after = self
            .find_hashed(hash, X::key_of(&value))
            .map(|first| self.group_last(first));
        let k = self.link_new(hash, value, after);
        Ok(self.cursor(k))
    }

    /// Move every node of `source` whose key is not already present here.
    /// Conflicting nodes stay in `source`. On allocation failure the node
    /// being moved stays in `source` and the error is returned.
    pub fn merge_unique(&mut self, source: &mut Self) -> Result<(), TableError> {
        let mut cur = source.first_key();
        while let Some(k) = cur {
            cur = source.successor(k);
            let (hash, present) = {
                let key = X::key_of(&source.nodes[k].value);
                let hash = self.make_hash(key);
                (hash, self.find_hashed(hash, key).is_some())
            };
            if present {
                continue;
            }
            self.reserve_one()?;
            let node = source.remove_node(k);
            self.link_new(hash, node.value, None);
        }
        Ok(())
    }

    /// Move every node of `source` into this multi-keyed table.
    pub fn merge_multi(&mut self, source: &mut Self) -> Result<(), TableError> {
        let mut cur = source.first_key();
        while let Some(k) = cur {
            cur = source.successor(k);
            let hash = self.make_hash(X::key_of(&source.nodes[k].value));
            self.reserve_one()?;
            let node = source.remove_node(k);
            let after = self
                .find_hashed(hash, X::key_of(&node.value))
                .map(|first| self.group_last(first));
            self.link_new(hash, node.value, after);
        }
        Ok(())
    }
}

impl<T, X, S, E, A> PartialEq for NodeTable<T, X, S, E, A>
where
    T: PartialEq,
    X: KeyOf<T>,
    X::Key: Hash,
    S: BuildHasher,
    E: KeyEq<X::Key>,
    A: AllocStrategy,
{
    /// Same multiset of entries, independent of layout and order.
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        let mut cur = self.first_key();
        while let Some(first) = cur {
            let last = self.group_last(first);
            let mine: Vec<&T> = group_values(&self.nodes, first, last);
            cur = self.successor(last);

            let key = X::key_of(&self.nodes[first].value);
            let hash = other.make_hash(key);
            let Some(their_first) = other.find_hashed(hash, key) else {
                return false;
            };
            let their_last = other.group_last(their_first);
            let theirs: Vec<&T> = group_values(&other.nodes, their_first, their_last);
            if !is_permutation(&mine, &theirs) {
                return false;
            }
        }
        true
    }
}

fn group_values<T>(
    nodes: &SlotMap<DefaultKey, Node<T>>,
    first: DefaultKey,
    last: DefaultKey,
) -> Vec<&T> {
    let mut out = Vec::new();
    let mut cur = Some(first);
    while let Some(k) = cur {
        out.push(&nodes[k].value);
        if k == last {
            break;
        }
        cur = nodes[k].next;
    }
    out
}

fn is_permutation<T: PartialEq>(a: &[&T], b: &[&T]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut used = vec![false; b.len()];
    a.iter().all(|x| {
        match (0..b.len()).find(|&i| !used[i] && b[i] == *x) {
            Some(i) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}

impl<T, X, S, E, A> Clone for NodeTable<T, X, S, E, A>
where
    T: Clone,
    S: Clone,
    E: Clone,
    A: AllocStrategy + Clone,
{
    fn clone(&self) -> Self {
        match self.try_clone() {
            Ok(t) => t,
            Err(e) => alloc_failed(e),
        }
    }
}

impl<T, X, S, E, A> Drop for NodeTable<T, X, S, E, A>
where
    A: AllocStrategy,
{
    fn drop(&mut self) {
        let layout = Self::node_layout();
        for _ in 0..self.nodes.len() {
            self.alloc.deallocate(layout);
        }
        self.release_buckets(self.heads.len());
    }
}

impl<T: fmt::Debug, X, S, E, A: AllocStrategy> fmt::Debug for NodeTable<T, X, S, E, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter().map(|(_, v)| v)).finish()
    }
}

impl<T, X, S, E, A: AllocStrategy> IntoIterator for NodeTable<T, X, S, E, A> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(mut self) -> IntoIter<T> {
        self.drain()
    }
}

impl<'a, T, X, S, E, A: AllocStrategy> IntoIterator for &'a NodeTable<T, X, S, E, A> {
    type Item = (Cursor, &'a T);
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

/// Iterator over `(Cursor, &T)` in bucket order.
pub struct Iter<'a, T> {
    nodes: &'a SlotMap<DefaultKey, Node<T>>,
    heads: &'a [Option<DefaultKey>],
    owner: TableId,
    bucket: usize,
    cur: Option<DefaultKey>,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (Cursor, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(k) = self.cur {
                let node = &self.nodes[k];
                self.cur = node.next;
                self.remaining -= 1;
                return Some((Cursor::new(self.owner, k), &node.value));
            }
            let head = self.heads.get(self.bucket)?;
            self.bucket += 1;
            self.cur = *head;
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}
impl<T> FusedIterator for Iter<'_, T> {}

impl<T> Clone for Iter<'_, T> {
    fn clone(&self) -> Self {
        Iter {
            nodes: self.nodes,
            heads: self.heads,
            owner: self.owner,
            bucket: self.bucket,
            cur: self.cur,
            remaining: self.remaining,
        }
    }
}

/// Iterator over one equivalence class.
pub struct EqualRange<'a, T> {
    nodes: &'a SlotMap<DefaultKey, Node<T>>,
    owner: TableId,
    cur: Option<DefaultKey>,
    remaining: usize,
}

impl<'a, T> Iterator for EqualRange<'a, T> {
    type Item = (Cursor, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let k = self.cur?;
        let node = &self.nodes[k];
        self.cur = node.next;
        self.remaining -= 1;
        Some((Cursor::new(self.owner, k), &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for EqualRange<'_, T> {}
impl<T> FusedIterator for EqualRange<'_, T> {}

/// Owning iterator returned by `drain` and `into_iter`.
pub struct IntoIter<T> {
    inner: std::vec::IntoIter<T>,
}

impl<T> Iterator for IntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T> ExactSizeIterator for IntoIter<T> {}
impl<T> FusedIterator for IntoIter<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Budget;
    use crate::config::MIN_BUCKETS;
    use crate::key::{First, Identity};
    use std::collections::BTreeSet;
    use std::hash::Hasher;

    type Map = NodeTable<(i32, &'static str), First>;

    #[derive(Clone, Default)]
    struct ConstBuildHasher;
    struct ConstHasher;
    impl BuildHasher for ConstBuildHasher {
        type Hasher = ConstHasher;
        fn build_hasher(&self) -> Self::Hasher {
            ConstHasher
        }
    }
    impl Hasher for ConstHasher {
        fn write(&mut self, _bytes: &[u8]) {}
        fn finish(&self) -> u64 {
            0
        }
    }

    /// Identity hasher for integer keys so bucket placement is predictable.
    #[derive(Clone, Default)]
    struct IdentityBuildHasher;
    #[derive(Default)]
    struct IdentityHasher(u64);
    impl BuildHasher for IdentityBuildHasher {
        type Hasher = IdentityHasher;
        fn build_hasher(&self) -> Self::Hasher {
            IdentityHasher(0)
        }
    }
    impl Hasher for IdentityHasher {
        fn write(&mut self, bytes: &[u8]) {
            for b in bytes {
                self.0 = (self.0 << 8) | *b as u64;
            }
        }
        fn write_i32(&mut self, i: i32) {
            self.0 = i as u32 as u64;
        }
        fn finish(&self) -> u64 {
            self.0
        }
    }

    /// Identity hashing shifted by a per-instance offset, so two tables of
    /// one type disagree on every hash.
    #[derive(Clone)]
    struct OffsetBuildHasher(u64);
    struct OffsetHasher {
        offset: u64,
        inner: IdentityHasher,
    }
    impl BuildHasher for OffsetBuildHasher {
        type Hasher = OffsetHasher;
        fn build_hasher(&self) -> Self::Hasher {
            OffsetHasher {
                offset: self.0,
                inner: IdentityHasher(0),
            }
        }
    }
    impl Hasher for OffsetHasher {
        fn write(&mut self, bytes: &[u8]) {
            self.inner.write(bytes)
        }
        fn write_i32(&mut self, i: i32) {
            self.inner.write_i32(i)
        }
        fn finish(&self) -> u64 {
            self.inner.finish().wrapping_add(self.offset)
        }
    }

    fn collect_keys<X, S, E, A>(t: &NodeTable<(i32, &'static str), X, S, E, A>) -> Vec<i32>
    where
        A: AllocStrategy,
    {
        t.iter().map(|(_, (k, _))| *k).collect()
    }

    /// Invariant: a duplicate key is rejected, the value comes back and the
    /// table is unchanged.
    #[test]
    fn duplicate_insert_rejected_and_value_returned() {
        let mut t = Map::new();
        let first = t.insert_unique((1, "a")).unwrap();
        assert!(first.is_inserted());
        match t.insert_unique((1, "z")).unwrap() {
            Insertion::KeyAlreadyExists { existing, rejected } => {
                assert_eq!(existing, first.cursor());
                assert_eq!(rejected, (1, "z"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(t.len(), 1);
        assert_eq!(t.get(first.cursor()).unwrap(), &(1, "a"));
    }

    /// The concrete unique-map scenario: find, erase count, miss, size.
    #[test]
    fn find_erase_scenario() {
        let mut t = Map::new();
        for (k, v) in [(1, "a"), (2, "b"), (3, "c")] {
            t.insert_unique((k, v)).unwrap();
        }
        let c = t.find(&2).expect("find 2");
        assert_eq!(t.get(c).unwrap().1, "b");
        assert_eq!(t.erase(&2), 1);
        assert!(t.find(&2).is_none());
        assert_eq!(t.len(), 2);
        assert_eq!(t.erase(&2), 0);
    }

    /// Invariant: entries of one class are adjacent and in insertion order
    /// relative to each other, even with other keys in the same bucket.
    #[test]
    fn multi_insert_keeps_class_contiguous() {
        let mut t: NodeTable<(i32, &'static str), First, ConstBuildHasher> =
            NodeTable::with_hasher(ConstBuildHasher);
        t.insert_multi((5, "x")).unwrap();
        t.insert_multi((7, "p")).unwrap();
        t.insert_multi((5, "y")).unwrap();
        t.insert_multi((7, "q")).unwrap();
        t.insert_multi((5, "z")).unwrap();

        assert_eq!(t.len(), 5);
        let keys = collect_keys(&t);
        let fives: Vec<usize> = keys
            .iter()
            .enumerate()
            .filter(|(_, k)| **k == 5)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(fives.len(), 3);
        assert_eq!(fives[2] - fives[0], 2, "class must be contiguous: {keys:?}");

        let vals: Vec<&str> = t.equal_range(&5).map(|(_, (_, v))| *v).collect();
        assert_eq!(vals, ["x", "y", "z"]);
        assert_eq!(t.count(&7), 2);
        assert_eq!(t.erase(&5), 3);
        assert_eq!(t.len(), 2);
        assert_eq!(t.count(&5), 0);
    }

    /// Invariant: growth keeps the bucket count a power of two and the load
    /// factor within bounds; every entry stays findable.
    #[test]
    fn growth_respects_load_factor() {
        let mut t: NodeTable<u32, Identity> = NodeTable::new();
        assert_eq!(t.bucket_count(), 0);
        assert!(t.find(&1).is_none());
        for i in 0..1000u32 {
            assert!(t.insert_unique(i).unwrap().is_inserted());
            assert!(t.bucket_count().is_power_of_two());
            assert!(t.load_factor() <= t.max_load_factor());
        }
        for i in 0..1000u32 {
            assert!(t.contains(&i));
        }
        let total: usize = (0..t.bucket_count()).map(|b| t.bucket_len(b)).sum();
        assert_eq!(total, 1000);
    }

    /// Invariant: every node sits in bucket `hash mod bucket_count`.
    #[test]
    fn nodes_live_in_their_hash_bucket() {
        let mut t: NodeTable<(i32, &'static str), First, IdentityBuildHasher> =
            NodeTable::with_hasher(IdentityBuildHasher);
        for k in 0..20 {
            t.insert_unique((k, "v")).unwrap();
        }
        let n = t.bucket_count();
        for k in 0..20 {
            assert_eq!(t.bucket(&k), Some(k as usize % n));
        }
        for b in 0..n {
            let expected = (0..20).filter(|k| *k as usize % n == b).count();
            assert_eq!(t.bucket_len(b), expected);
        }
    }

    /// Invariant: rehash (grow and shrink) preserves the entry multiset,
    /// class contiguity and within-class order; cursors keep resolving.
    #[test]
    fn rehash_preserves_entries_and_groups() {
        let mut t: NodeTable<(i32, &'static str), First, IdentityBuildHasher> =
            NodeTable::with_hasher(IdentityBuildHasher);
        for k in 0..12 {
            t.insert_multi((k, "a")).unwrap();
            t.insert_multi((k, "b")).unwrap();
        }
        let c = t.find(&3).unwrap();
        let before = t.clone();

        t.rehash(256).unwrap();
        assert_eq!(t.bucket_count(), 256);
        assert!(t == before);
        t.rehash(0).unwrap();
        assert_eq!(t.bucket_count(), 32);
        assert!(t == before);

        for k in 0..12 {
            let vals: Vec<&str> = t.equal_range(&k).map(|(_, (_, v))| *v).collect();
            assert_eq!(vals, ["a", "b"]);
        }
        assert_eq!(t.get(c).unwrap(), &(3, "a"));
    }

    #[test]
    fn rehash_zero_on_empty_releases_buckets() {
        let budget = Budget::new(1 << 20);
        let mut t: NodeTable<u8, Identity, DefaultHashBuilder, DefaultEq, Budget> =
            NodeTable::with_config_in(
                TableConfig::default(),
                DefaultHashBuilder::default(),
                DefaultEq,
                budget.clone(),
            );
        t.insert_unique(1).unwrap();
        assert!(budget.used() > 0);
        t.erase(&1);
        t.rehash(0).unwrap();
        assert_eq!(t.bucket_count(), 0);
        assert_eq!(budget.used(), 0);
    }

    /// Invariant: `erase_at` removes exactly one node, returns the next
    /// cursor in iteration order and leaves other cursors valid.
    #[test]
    fn erase_at_returns_successor_and_keeps_other_cursors() {
        let mut t = Map::new();
        for k in 0..10 {
            t.insert_unique((k, "v")).unwrap();
        }
        let order: Vec<Cursor> = t.iter().map(|(c, _)| c).collect();
        let next = t.erase_at(order[4]).unwrap();
        assert_eq!(next, Some(order[5]));
        assert_eq!(t.get(order[4]), Err(TableError::StaleCursor));
        for (i, c) in order.iter().enumerate() {
            if i != 4 {
                assert!(t.get(*c).is_ok());
            }
        }
        assert_eq!(t.erase_at(order[9]).unwrap(), None);
        assert_eq!(t.erase_at(order[9]), Err(TableError::StaleCursor));
        assert_eq!(t.len(), 8);
    }

    /// Walking with `first`/`next_cursor` visits the same sequence as `iter`.
    #[test]
    fn cursor_walk_matches_iter() {
        let mut t = Map::new();
        for k in 0..50 {
            t.insert_unique((k, "v")).unwrap();
        }
        let mut walked = Vec::new();
        let mut cur = t.first();
        while let Some(c) = cur {
            walked.push(c);
            cur = t.next_cursor(c).unwrap();
        }
        let iterated: Vec<Cursor> = t.iter().map(|(c, _)| c).collect();
        assert_eq!(walked, iterated);
        assert_eq!(t.iter().len(), 50);
    }

    /// Cursors from one table are refused by another.
    #[test]
    fn foreign_cursor_is_incompatible() {
        let mut a = Map::new();
        let mut b = Map::new();
        let ca = a.insert_unique((1, "a")).unwrap().cursor();
        b.insert_unique((1, "b")).unwrap();

        assert_eq!(b.get(ca), Err(TableError::IncompatibleContainer));
        assert_eq!(b.erase_at(ca), Err(TableError::IncompatibleContainer));
        assert_eq!(b.len(), 1);
        assert_eq!(a.get(ca).unwrap(), &(1, "a"));
    }

    /// A handle moving to another table in the same domain is hashed again
    /// with that table's hasher and chained where its key belongs there.
    #[test]
    fn handle_moves_between_tables_in_one_domain() {
        let mut a: NodeTable<(i32, &'static str), First, OffsetBuildHasher> =
            NodeTable::with_hasher(OffsetBuildHasher(0));
        let mut b: NodeTable<(i32, &'static str), First, OffsetBuildHasher> =
            NodeTable::with_hasher(OffsetBuildHasher(3));
        a.insert_unique((1, "moved")).unwrap();
        b.insert_unique((2, "stays")).unwrap();
        assert_eq!(b.bucket_count(), MIN_BUCKETS);

        let h = a.extract(&1).unwrap();
        assert_eq!(h.origin(), a.id());
        let r = b.insert_node_unique(h).unwrap();
        assert!(r.inserted);
        assert_eq!(b.bucket(&1), Some(4));
        let chained: Vec<i32> = b.bucket_iter(4).map(|(k, _)| *k).collect();
        assert_eq!(chained, [1]);
        assert_eq!(b.find(&1), Some(r.position));
        assert!(a.is_empty());

        // Moving it back uses a's hasher again.
        let h = b.extract_at(r.position).unwrap();
        assert_eq!(h.origin(), b.id());
        let r = a.insert_node_unique(h).unwrap();
        assert!(r.inserted);
        assert_eq!(a.bucket(&1), Some(1));
        assert_eq!(a.get(r.position).unwrap(), &(1, "moved"));
    }

    /// Handles carry their allocation domain; a table drawing from another
    /// budget refuses them and hands the node back.
    #[test]
    fn handle_refused_across_budgets() {
        type BudgetSet = NodeTable<u32, Identity, DefaultHashBuilder, DefaultEq, Budget>;
        let make = |b: &Budget| -> BudgetSet {
            NodeTable::with_config_in(
                TableConfig::default(),
                DefaultHashBuilder::default(),
                DefaultEq,
                b.clone(),
            )
        };
        let one = Budget::new(1 << 16);
        let two = Budget::new(1 << 16);
        let mut a = make(&one);
        let mut b = make(&two);
        let mut c = make(&one);
        a.insert_unique(5).unwrap();

        let h = a.extract(&5).unwrap();
        assert_eq!(h.domain(), one.domain());
        let err = b.insert_node_multi(h).unwrap_err();
        assert_eq!(err.error, TableError::IncompatibleContainer);
        assert!(b.is_empty());
        assert_eq!(two.used(), 0);

        let back = c.insert_node_unique(err.node).unwrap();
        assert!(back.inserted);
        assert!(c.contains(&5));
        assert!(a.is_empty());
    }

    /// Round trip: extract then re-insert restores an equal table.
    #[test]
    fn extract_reinsert_round_trip() {
        let mut t = Map::new();
        for (k, v) in [(1, "a"), (2, "b"), (3, "c")] {
            t.insert_unique((k, v)).unwrap();
        }
        let snapshot = t.clone();
        let h = t.extract(&2).unwrap();
        assert_eq!(t.len(), 2);
        assert!(t != snapshot);
        let r = t.insert_node_unique(h).unwrap();
        assert!(r.inserted);
        assert!(t == snapshot);
    }

    /// A handle whose key reappeared while it was detached is handed back.
    #[test]
    fn insert_node_duplicate_returns_handle() {
        let mut t = Map::new();
        let c = t.insert_unique((1, "old")).unwrap().cursor();
        let h = t.extract_at(c).unwrap();
        let c2 = t.insert_unique((1, "new")).unwrap().cursor();
        let r = t.insert_node_unique(h).unwrap();
        assert!(!r.inserted);
        assert_eq!(r.position, c2);
        assert_eq!(r.node.unwrap().into_value(), (1, "old"));
        assert_eq!(t.len(), 1);
    }

    /// Swap scenario: contents exchange and cursors follow their nodes.
    #[test]
    fn swap_moves_contents_and_cursors() {
        let mut a = Map::new();
        let mut b = Map::new();
        let ca = a.insert_unique((1, "a")).unwrap().cursor();
        b.insert_unique((2, "b")).unwrap();

        a.swap(&mut b);
        assert_eq!(collect_keys(&a), [2]);
        assert_eq!(collect_keys(&b), [1]);
        assert_eq!(b.get(ca).unwrap(), &(1, "a"));
        assert_eq!(a.get(ca), Err(TableError::IncompatibleContainer));
        assert_eq!(b.first(), Some(ca));
        assert_eq!(b.next_cursor(ca).unwrap(), None);
    }

    /// Equality ignores layout and insertion order.
    #[test]
    fn equality_is_layout_independent() {
        let mut a: NodeTable<(i32, &'static str), First> = NodeTable::new();
        let mut b: NodeTable<(i32, &'static str), First> = NodeTable::new();
        a.insert_multi((1, "x")).unwrap();
        a.insert_multi((1, "y")).unwrap();
        a.insert_multi((2, "z")).unwrap();
        b.rehash(1024).unwrap();
        b.insert_multi((2, "z")).unwrap();
        b.insert_multi((1, "y")).unwrap();
        b.insert_multi((1, "x")).unwrap();
        assert!(a == b);

        b.erase(&2);
        b.insert_multi((2, "w")).unwrap();
        assert!(a != b);

        let mut c = a.clone();
        c.insert_multi((1, "x")).unwrap();
        c.erase(&2);
        assert!(a != c, "same length but different class sizes");
    }

    /// Lookups stay correct when every key collides.
    #[test]
    fn collision_handling_with_const_hasher() {
        let mut t: NodeTable<String, Identity, ConstBuildHasher> =
            NodeTable::with_hasher(ConstBuildHasher);
        for s in ["a", "b", "c", "d"] {
            t.insert_unique(s.to_string()).unwrap();
        }
        assert_eq!(t.bucket_len(0), 4);
        assert!(t.contains("c"));
        assert_eq!(t.erase("b"), 1);
        assert!(!t.contains("b"));
        assert!(t.contains("d"));
        let seen: BTreeSet<&str> = t.iter().map(|(_, s)| s.as_str()).collect();
        assert_eq!(seen, BTreeSet::from(["a", "c", "d"]));
    }

    /// `insert_unique_with` runs the constructor only when inserting.
    #[test]
    fn insert_unique_with_is_lazy() {
        let mut t = Map::new();
        let mut calls = 0;
        let (c, inserted) = t
            .insert_unique_with(4, |k| {
                calls += 1;
                (k, "four")
            })
            .unwrap();
        assert!(inserted);
        let (c2, inserted2) = t
            .insert_unique_with(4, |k| {
                calls += 1;
                (k, "again")
            })
            .unwrap();
        assert!(!inserted2);
        assert_eq!(c, c2);
        assert_eq!(calls, 1);
        assert_eq!(t.get(c).unwrap().1, "four");
    }

    /// Strong guarantee: refused allocations leave the table as it was and
    /// hand the value back.
    #[test]
    fn allocation_failure_rolls_back() {
        let node = Layout::new::<Node<String>>().size();
        let buckets = bucket_layout(8).unwrap().size();
        let budget = Budget::new(buckets + 8 * node);
        let mut t: NodeTable<String, Identity, DefaultHashBuilder, DefaultEq, Budget> =
            NodeTable::with_config_in(
                TableConfig::default(),
                DefaultHashBuilder::default(),
                DefaultEq,
                budget.clone(),
            );
        for i in 0..8 {
            t.insert_unique(i.to_string()).unwrap();
        }
        assert_eq!(t.bucket_count(), 8);
        let used = budget.used();
        let snapshot: BTreeSet<String> = t.iter().map(|(_, s)| s.clone()).collect();

        let err = t.insert_unique("8".to_string()).unwrap_err();
        assert!(matches!(err.error, TableError::AllocationFailure(_)));
        assert_eq!(err.value, "8");
        assert_eq!(t.len(), 8);
        assert_eq!(t.bucket_count(), 8);
        assert_eq!(budget.used(), used);
        let after: BTreeSet<String> = t.iter().map(|(_, s)| s.clone()).collect();
        assert_eq!(after, snapshot);

        assert!(t.rehash(64).is_err());
        assert_eq!(t.bucket_count(), 8);

        // A duplicate is not an allocation and still reports normally.
        assert!(!t.insert_unique("3".to_string()).unwrap().is_inserted());

        drop(t);
        assert_eq!(budget.used(), 0);
    }

    /// Accounting balances across erase, extract, drain and clear.
    #[test]
    fn budget_balances_over_lifecycle() {
        let budget = Budget::new(usize::MAX);
        let mut t: NodeTable<(i32, &'static str), First, DefaultHashBuilder, DefaultEq, Budget> =
            NodeTable::with_config_in(
                TableConfig::default(),
                DefaultHashBuilder::default(),
                DefaultEq,
                budget.clone(),
            );
        for k in 0..40 {
            t.insert_multi((k % 10, "v")).unwrap();
        }
        let copy = t.clone();
        t.erase(&1);
        let _h = t.extract(&2).unwrap();
        let drained: Vec<_> = t.drain().collect();
        assert_eq!(drained.len(), 40 - 4 - 1);
        assert!(t.is_empty());
        drop(copy);
        t.insert_unique((1, "x")).unwrap();
        t.clear();
        t.rehash(0).unwrap();
        assert_eq!(budget.used(), 0);
    }

    #[test]
    fn drain_yields_iteration_order() {
        let mut t = Map::new();
        for k in 0..30 {
            t.insert_unique((k, "v")).unwrap();
        }
        let order = collect_keys(&t);
        let drained: Vec<i32> = t.drain().map(|(k, _)| k).collect();
        assert_eq!(drained, order);
        assert_eq!(t.len(), 0);
        t.insert_unique((1, "again")).unwrap();
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn retain_removes_rejected_entries() {
        let mut t: NodeTable<u32, Identity> = NodeTable::new();
        for i in 0..100 {
            t.insert_unique(i).unwrap();
        }
        t.retain(|v| v % 3 == 0);
        assert_eq!(t.len(), 34);
        assert!(t.iter().all(|(_, v)| v % 3 == 0));
    }

    #[test]
    fn merge_unique_leaves_conflicts_in_source() {
        let mut a = Map::new();
        let mut b = Map::new();
        a.insert_unique((1, "a1")).unwrap();
        b.insert_unique((1, "b1")).unwrap();
        b.insert_unique((2, "b2")).unwrap();
        a.merge_unique(&mut b).unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 1);
        assert_eq!(a.get(a.find(&1).unwrap()).unwrap().1, "a1");
        assert_eq!(b.get(b.find(&1).unwrap()).unwrap().1, "b1");

        let mut m: NodeTable<(i32, &'static str), First> = NodeTable::new();
        m.insert_multi((1, "m")).unwrap();
        m.merge_multi(&mut b).unwrap();
        m.merge_multi(&mut a).unwrap();
        assert_eq!(m.count(&1), 3);
        assert_eq!(m.count(&2), 1);
        assert!(a.is_empty() && b.is_empty());
    }

    #[test]
    fn set_max_load_factor_rehashes() {
        let mut t: NodeTable<u32, Identity> = NodeTable::new();
        for i in 0..64 {
            t.insert_unique(i).unwrap();
        }
        let before = t.bucket_count();
        t.set_max_load_factor(0.25).unwrap();
        assert!(t.bucket_count() >= 256);
        assert!(t.bucket_count() > before);
        assert!(t.load_factor() <= 0.25);
        t.set_max_load_factor(f32::INFINITY).unwrap();
        assert_eq!(t.max_load_factor(), crate::config::DEFAULT_MAX_LOAD_FACTOR);
    }

    /// A caller-supplied predicate decides equivalence. All keys hash to the
    /// same value here, so strings of equal length collapse into one class.
    #[test]
    fn custom_key_predicate() {
        fn same_len(a: &String, b: &String) -> bool {
            a.len() == b.len()
        }

        let mut t: NodeTable<String, Identity, ConstBuildHasher, fn(&String, &String) -> bool> =
            NodeTable::with_config_in(TableConfig::default(), ConstBuildHasher, same_len, Global);
        assert!(t.insert_unique("abc".to_string()).unwrap().is_inserted());
        assert!(!t.insert_unique("xyz".to_string()).unwrap().is_inserted());
        assert!(t.insert_unique("ab".to_string()).unwrap().is_inserted());
        assert!(t.contains(&"zzz".to_string()));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn table_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NodeTable<(String, u64), First>>();
        assert_send_sync::<Cursor>();
        assert_send_sync::<NodeHandle<String>>();
    }

    #[test]
    fn concurrent_readers() {
        let mut t: NodeTable<u64, Identity> = NodeTable::new();
        for i in 0..1000 {
            t.insert_unique(i).unwrap();
        }
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for i in 0..1000 {
                        assert!(t.contains(&i));
                    }
                });
            }
        });
    }
}
