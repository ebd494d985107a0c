#![cfg(test)]

// Property tests for NodeTable kept inside the crate so they can reach the
// crate-internal accessors.

use crate::error::TableError;
use crate::key::First;
use crate::node::{Cursor, Insertion};
use crate::node_table::NodeTable;
use hashbrown::hash_map::DefaultHashBuilder;
use proptest::prelude::*;
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hasher};
use std::rc::Rc;

// Key newtype with Borrow<str> to exercise borrowed lookup.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
struct Key(String);
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::borrow::Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

type Table<S = DefaultHashBuilder> = NodeTable<(Key, i32), First, S>;

// Pool-indexed operations to improve shrinking: indices shrink to earlier keys,
// pool length shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, i32),
    InsertWith(usize, i32),
    Erase(usize),
    EraseAt(usize),
    Extract(usize),
    Find(usize),
    Contains(String),
    Rehash(usize),
    Iterate,
}

fn key_from(pool: &[String], i: usize) -> Key {
    Key(pool[i].clone())
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,5}", 1..=8).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let contains_pool = proptest::sample::select(pool.clone());
        let op = prop_oneof![
            (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::InsertWith(i, v)),
            idx.clone().prop_map(OpI::Erase),
            idx.clone().prop_map(OpI::EraseAt),
            idx.clone().prop_map(OpI::Extract),
            idx.clone().prop_map(OpI::Find),
            prop_oneof![
                contains_pool.prop_map(|s: String| s),
                "[a-z]{0,5}".prop_map(|s| s)
            ]
            .prop_map(OpI::Contains),
            (0usize..64).prop_map(OpI::Rehash),
            Just(OpI::Iterate),
        ];
        proptest::collection::vec(op, 1..60).prop_map(move |ops| (pool.clone(), ops))
    })
}

// Every node sits in the bucket its hash selects, and the load bound holds.
fn check_layout<S: BuildHasher>(sut: &Table<S>) -> Result<(), TestCaseError> {
    let mut total = 0;
    for b in 0..sut.bucket_count() {
        for (k, _) in sut.bucket_iter(b) {
            prop_assert_eq!(sut.bucket(k), Some(b), "{:?} chained in the wrong bucket", k);
            total += 1;
        }
        prop_assert_eq!(sut.bucket_len(b), sut.bucket_iter(b).count());
    }
    prop_assert_eq!(total, sut.len());
    if sut.bucket_count() > 0 {
        prop_assert!(sut.bucket_count().is_power_of_two());
        prop_assert!(sut.load_factor() <= sut.max_load_factor());
    }
    Ok(())
}

// State-machine equivalence against std::collections::HashMap, shared by the
// default-hasher and collision variants.
fn run_unique<S: BuildHasher>(
    mut sut: Table<S>,
    pool: &[String],
    ops: Vec<OpI>,
) -> Result<(), TestCaseError> {
    let mut model: HashMap<Key, i32> = HashMap::new();
    let mut live: HashMap<Key, Cursor> = HashMap::new();
    let mut stale: Vec<Cursor> = Vec::new();
    let make_calls = Rc::new(Cell::new(0));

    for op in ops {
        match op {
            OpI::Insert(i, v) => {
                let k = key_from(pool, i);
                let already = model.contains_key(&k);
                match sut.insert_unique((k.clone(), v)).expect("global strategy admits") {
                    Insertion::Inserted(c) => {
                        prop_assert!(!already, "insert must reject a duplicate");
                        prop_assert!(live.insert(k.clone(), c).is_none());
                        model.insert(k, v);
                    }
                    Insertion::KeyAlreadyExists { existing, rejected } => {
                        prop_assert!(already, "rejection only when the key exists");
                        prop_assert_eq!(Some(&existing), live.get(&k));
                        prop_assert_eq!(rejected, (k, v));
                    }
                }
            }
            OpI::InsertWith(i, v) => {
                let k = key_from(pool, i);
                let already = model.contains_key(&k);
                let counter = make_calls.clone();
                let before = counter.get();
                let (c, inserted) = sut
                    .insert_unique_with(k.clone(), move |k| {
                        counter.set(counter.get() + 1);
                        (k, v)
                    })
                    .expect("global strategy admits");
                prop_assert_eq!(inserted, !already);
                if inserted {
                    prop_assert_eq!(make_calls.get(), before + 1, "make must run once on insert");
                    live.insert(k.clone(), c);
                    model.insert(k, v);
                } else {
                    prop_assert_eq!(make_calls.get(), before, "make must not run on duplicate");
                    prop_assert_eq!(Some(&c), live.get(&k));
                }
            }
            OpI::Erase(i) => {
                let k = key_from(pool, i);
                let removed = sut.erase(k.0.as_str());
                prop_assert_eq!(removed, usize::from(model.remove(&k).is_some()));
                if let Some(c) = live.remove(&k) {
                    stale.push(c);
                }
            }
            OpI::EraseAt(i) => {
                let k = key_from(pool, i);
                if let Some(c) = live.remove(&k) {
                    let expected_next = sut.next_cursor(c).expect("live cursor resolves");
                    let next = sut.erase_at(c).expect("live cursor resolves");
                    prop_assert_eq!(next, expected_next);
                    model.remove(&k);
                    stale.push(c);
                }
            }
            OpI::Extract(i) => {
                let k = key_from(pool, i);
                match sut.extract(&k) {
                    Some(node) => {
                        prop_assert_eq!(node.key(), &k);
                        prop_assert_eq!(Some(node.mapped()), model.get(&k));
                        prop_assert!(sut.find(&k).is_none());
                        let ret = sut.insert_node_unique(node).expect("origin table accepts");
                        prop_assert!(ret.inserted);
                        prop_assert!(ret.node.is_none());
                        let old = live.insert(k, ret.position).expect("tracked cursor");
                        stale.push(old);
                    }
                    None => prop_assert!(!model.contains_key(&k)),
                }
            }
            OpI::Find(i) => {
                let k = key_from(pool, i);
                let found = sut.find(&k);
                prop_assert_eq!(found.is_some(), model.contains_key(&k));
                if let Some(c) = found {
                    prop_assert_eq!(Some(&c), live.get(&k));
                    prop_assert_eq!(Some(&sut.get(c).unwrap().1), model.get(&k));
                }
            }
            OpI::Contains(s) => {
                let has_model = model.keys().any(|k| k.0 == s);
                prop_assert_eq!(sut.contains(s.as_str()), has_model);
            }
            OpI::Rehash(n) => {
                let before: BTreeMap<Key, i32> =
                    sut.iter().map(|(_, (k, v))| (k.clone(), *v)).collect();
                sut.rehash(n).expect("global strategy admits");
                prop_assert!(sut.len() == 0 || sut.bucket_count() >= n);
                let after: BTreeMap<Key, i32> =
                    sut.iter().map(|(_, (k, v))| (k.clone(), *v)).collect();
                prop_assert_eq!(before, after);
            }
            OpI::Iterate => {
                let s_keys: BTreeSet<_> = sut.iter().map(|(_, (k, _))| k.clone()).collect();
                let m_keys: BTreeSet<_> = model.keys().cloned().collect();
                prop_assert_eq!(s_keys, m_keys);
                let walked = std::iter::successors(sut.first(), |&c| sut.next_cursor(c).unwrap())
                    .count();
                prop_assert_eq!(walked, sut.len());
            }
        }

        // Post-conditions after each op
        for &c in &stale {
            prop_assert_eq!(sut.get(c).err(), Some(TableError::StaleCursor));
        }
        for (k, &c) in &live {
            prop_assert_eq!(&sut.get(c).unwrap().0, k);
        }
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
        check_layout(&sut)?;
    }
    Ok(())
}

// Property: State-machine equivalence against std::collections::HashMap.
// Invariants exercised across random operation sequences:
// - Duplicate keys are rejected and the value comes back; lazy construction
//   runs only on insert.
// - `find`/`contains` parity; cursors of live entries stay stable across
//   inserts, erasures of other entries and rehashes.
// - `erase_at` returns the successor; erased and extracted cursors go stale.
// - Extract then re-insert restores the entry.
// - Every node lives in its hash bucket and the load bound holds.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        run_unique(Table::<DefaultHashBuilder>::new(), &pool, ops)?;
    }
}

// Collision variant using a constant hasher to stress equality resolution.
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

// Property: Same state-machine invariants as above, under worst-case
// collision behavior (constant hasher). Every node shares one bucket, so
// chain relinking and equality probing carry all the weight.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        run_unique(Table::with_hasher(ConstBuildHasher), &pool, ops)?;
    }
}

// Multi-keyed operations against a model of per-key value lists.
#[derive(Clone, Debug)]
enum MultiOp {
    Insert(usize, i32),
    Erase(usize),
    ExtractReinsert(usize),
    Rehash(usize),
}

fn arb_multi() -> impl Strategy<Value = (Vec<String>, Vec<MultiOp>)> {
    proptest::collection::vec("[a-c]{0,2}", 1..=6).prop_flat_map(|pool| {
        let idx = proptest::sample::select((0..pool.len()).collect::<Vec<_>>());
        let op = prop_oneof![
            4 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| MultiOp::Insert(i, v)),
            1 => idx.clone().prop_map(MultiOp::Erase),
            1 => idx.clone().prop_map(MultiOp::ExtractReinsert),
            1 => (0usize..32).prop_map(MultiOp::Rehash),
        ];
        proptest::collection::vec(op, 1..80).prop_map(move |ops| (pool.clone(), ops))
    })
}

// Keys of one equivalence class form a single run in iteration order.
fn check_contiguous<S: BuildHasher>(sut: &Table<S>) -> Result<(), TestCaseError> {
    let mut closed: BTreeSet<Key> = BTreeSet::new();
    let mut current: Option<&Key> = None;
    for (_, (k, _)) in sut.iter() {
        if current != Some(k) {
            if let Some(prev) = current {
                closed.insert(prev.clone());
            }
            prop_assert!(!closed.contains(k), "class {:?} split in iteration", k);
            current = Some(k);
        }
    }
    Ok(())
}

fn run_multi<S: BuildHasher>(
    mut sut: Table<S>,
    pool: &[String],
    ops: Vec<MultiOp>,
) -> Result<(), TestCaseError> {
    let mut model: HashMap<Key, Vec<i32>> = HashMap::new();
    for op in ops {
        match op {
            MultiOp::Insert(i, v) => {
                let k = key_from(pool, i);
                sut.insert_multi((k.clone(), v)).expect("global strategy admits");
                model.entry(k).or_default().push(v);
            }
            MultiOp::Erase(i) => {
                let k = key_from(pool, i);
                let expected = model.remove(&k).map_or(0, |vs| vs.len());
                prop_assert_eq!(sut.erase(&k), expected);
            }
            MultiOp::ExtractReinsert(i) => {
                let k = key_from(pool, i);
                if let Some(node) = sut.extract(&k) {
                    sut.insert_node_multi(node).expect("origin table accepts");
                }
            }
            MultiOp::Rehash(n) => {
                sut.rehash(n).expect("global strategy admits");
            }
        }

        prop_assert_eq!(sut.len(), model.values().map(Vec::len).sum::<usize>());
        for (k, vs) in &model {
            let mut got: Vec<i32> = sut.equal_range(k).map(|(_, (_, v))| *v).collect();
            let mut want = vs.clone();
            got.sort_unstable();
            want.sort_unstable();
            prop_assert_eq!(got, want);
        }
        check_contiguous(&sut)?;
        check_layout(&sut)?;
    }
    Ok(())
}

// Property: multi-keyed insert/erase/extract/rehash keep per-key multisets
// equal to the model and every class contiguous.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_multi_state_machine((pool, ops) in arb_multi()) {
        run_multi(Table::<DefaultHashBuilder>::new(), &pool, ops)?;
    }

    #[test]
    fn prop_multi_state_machine_with_collisions((pool, ops) in arb_multi()) {
        run_multi(Table::with_hasher(ConstBuildHasher), &pool, ops)?;
    }
}

// Property: equality ignores insertion order and bucket layout.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_equality_is_order_independent(
        entries in proptest::collection::vec(("[a-d]{1,2}", 0i32..4), 0..24),
        n in 0usize..64,
    ) {
        let mut a: Table = Table::new();
        let mut b: Table = Table::new();
        for (k, v) in &entries {
            a.insert_multi((Key(k.clone()), *v)).unwrap();
        }
        for (k, v) in entries.iter().rev() {
            b.insert_multi((Key(k.clone()), *v)).unwrap();
        }
        b.rehash(n).unwrap();
        prop_assert!(a == b);
        if let Some((k, v)) = entries.first() {
            b.insert_multi((Key(k.clone()), v.wrapping_add(1))).unwrap();
            prop_assert!(a != b);
        }
    }
}
