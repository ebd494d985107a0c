//! unordered-table: a node-based hash table engine and the unordered
//! container family built on it (unique and multi maps, unique and multi
//! sets).
//!
//! Internal Design:
//!
//! Summary
//! - Goal: one engine, `NodeTable<T, X, S, E, A>`, parameterized by the
//!   stored value, key extraction, hash builder, key equality and an
//!   allocation strategy. The four containers are thin wrappers that fix
//!   `T` and `X`.
//! - Layers:
//!   - `node_table`: buckets, chaining, rehash, node extraction.
//!   - `map` / `set`: typed surfaces (`UnorderedMap`, `UnorderedMultiMap`,
//!     `UnorderedSet`, `UnorderedMultiSet`).
//!   - `key`, `alloc`, `config`: the capabilities the engine is generic over.
//!   - `node`, `error`: cursors, node handles and failure types shared by
//!     every layer.
//!
//! Storage
//! - Nodes live in a generational `slotmap::SlotMap`; buckets are an array
//!   of chain heads, each chain a doubly linked list through the slot keys.
//! - Bucket counts are zero or a power of two; the bucket of a node is its
//!   cached hash masked by `bucket_count - 1`.
//! - Each node caches its `u64` hash. Rehashing never calls `Hash` again.
//!
//! Equivalence classes
//! - Two entries are equivalent when their hashes match and the key
//!   predicate accepts them. Multi containers keep each class contiguous in
//!   its chain; rehash relinks nodes so the contiguity and the relative
//!   order inside each bucket survive.
//!
//! Cursors and node handles
//! - `Cursor` is a `Copy` position tagged with its table's `TableId`. It
//!   stays valid across unrelated erasures and rehashes. A cursor from
//!   another table yields `TableError::IncompatibleContainer`; one whose
//!   node is gone yields `TableError::StaleCursor`.
//! - `NodeHandle` owns an extracted value plus its hash, origin tag and
//!   allocation domain. It can be inserted into any table whose strategy
//!   shares that domain; a table other than the origin rehashes the key.
//!   `swap` exchanges owner tags too, so cursors and handles follow their
//!   nodes into the other instance.
//!
//! Failure model
//! - Every node and bucket array is admitted by the `AllocStrategy` before
//!   any structural change. A refusal leaves the table as it was and the
//!   value comes back inside `InsertFailure` / `NodeInsertError`.
//! - A duplicate key on unique insert is a result (`KeyAlreadyExists`), not
//!   an error.
//! - `Clone`, `Extend` and `FromIterator` cannot report failure; they go to
//!   `std::alloc::handle_alloc_error` like the std collections do.
//!
//! Concurrency
//! - No internal locking. Shared references may be read from many threads;
//!   mutation needs `&mut`.

pub mod alloc;
pub mod config;
pub mod error;
pub mod key;
pub mod map;
pub mod node;
pub mod node_table;
mod node_table_proptest;
pub mod set;

// Public surface
pub use alloc::{AllocDomain, AllocStrategy, Budget, Global};
pub use config::TableConfig;
pub use error::{AllocError, InsertFailure, NodeInsertError, TableError};
pub use key::{DefaultEq, First, Identity, KeyEq, KeyOf};
pub use map::{MapInsertReturn, MapNodeHandle, UnorderedMap, UnorderedMultiMap};
pub use node::{Cursor, InsertReturn, Insertion, NodeHandle, TableId};
pub use node_table::NodeTable;
pub use set::{SetInsertReturn, SetNodeHandle, UnorderedMultiSet, UnorderedSet};
