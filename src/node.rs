//! Cursors, node handles and insert results.
//!
//! Every table carries a `TableId` owner tag. Cursors and node handles copy
//! the tag of the table that produced them, and every operation that
//! accepts one checks the tag first. The tag lives with the table's storage,
//! so `swap` moves it together with the nodes.

use core::sync::atomic::{AtomicU64, Ordering};
use slotmap::DefaultKey;

use crate::alloc::AllocDomain;
use crate::error::TableError;

static NEXT_TABLE_ID: AtomicU64 = AtomicU64::new(1);

/// Owner tag of one table's storage.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TableId(u64);

impl TableId {
    pub(crate) fn fresh() -> Self {
        TableId(NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Position of one entry inside a table.
///
/// A cursor stays valid while its entry is in the table, across inserts,
/// erasures of other entries and rehashes. Resolving it after its entry was
/// erased yields `StaleCursor`; resolving it against another table yields
/// `IncompatibleContainer`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Cursor {
    owner: TableId,
    node: DefaultKey,
}

impl Cursor {
    pub(crate) fn new(owner: TableId, node: DefaultKey) -> Self {
        Cursor { owner, node }
    }

    pub fn owner(&self) -> TableId {
        self.owner
    }

    #[inline]
    pub(crate) fn check_owner(&self, owner: TableId) -> Result<DefaultKey, TableError> {
        if self.owner == owner {
            Ok(self.node)
        } else {
            Err(TableError::IncompatibleContainer)
        }
    }
}

/// An entry removed from a table without being destroyed.
///
/// The handle owns the value exclusively. It can go into any table of the
/// same type whose allocation strategy shares its domain, or be consumed
/// with `into_value`. The origin table reuses the cached hash; any other
/// table hashes the key again with its own hasher.
pub struct NodeHandle<T> {
    pub(crate) origin: TableId,
    pub(crate) domain: AllocDomain,
    pub(crate) hash: u64,
    pub(crate) value: T,
}

impl<T> NodeHandle<T> {
    pub(crate) fn new(origin: TableId, domain: AllocDomain, hash: u64, value: T) -> Self {
        Self {
            origin,
            domain,
            hash,
            value,
        }
    }

    /// Tag of the table this node was extracted from.
    pub fn origin(&self) -> TableId {
        self.origin
    }

    /// Allocation domain of the table this node was extracted from.
    pub fn domain(&self) -> AllocDomain {
        self.domain
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

impl<K, V> NodeHandle<(K, V)> {
    pub fn key(&self) -> &K {
        &self.value.0
    }

    pub fn mapped(&self) -> &V {
        &self.value.1
    }

    /// The key is fixed while the node is detached; only the mapped value
    /// can change.
    pub fn mapped_mut(&mut self) -> &mut V {
        &mut self.value.1
    }

    pub fn into_pair(self) -> (K, V) {
        self.value
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for NodeHandle<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("origin", &self.origin)
            .field("domain", &self.domain)
            .field("value", &self.value)
            .finish()
    }
}

/// Result of inserting a value into a unique-keyed table.
#[derive(Debug)]
pub enum Insertion<T> {
    Inserted(Cursor),
    /// An equivalent key is present. Nothing was constructed; the value comes
    /// back untouched.
    KeyAlreadyExists { existing: Cursor, rejected: T },
}

impl<T> Insertion<T> {
    pub fn cursor(&self) -> Cursor {
        match self {
            Insertion::Inserted(c) => *c,
            Insertion::KeyAlreadyExists { existing, .. } => *existing,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, Insertion::Inserted(_))
    }
}

/// Result of inserting a node handle into a unique-keyed table.
///
/// On success `inserted` is true and `node` is `None`. On a duplicate key,
/// `position` names the existing entry and `node` returns the handle.
#[derive(Debug)]
pub struct InsertReturn<T> {
    pub position: Cursor,
    pub inserted: bool,
    pub node: Option<NodeHandle<T>>,
}
