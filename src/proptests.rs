use super::*;

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use proptest_derive::Arbitrary;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Recomputes subtree heights and checks each stored balance factor against
/// them. Returns the subtree height.
fn check_subtree<K, V>(nodes: &[Node<K, V>], id: NodeId) -> i32 {
    if id.is_null() {
        return 0;
    }
    let node = &nodes[id.index()];
    let left = check_subtree(nodes, node.children[LEFT]);
    let right = check_subtree(nodes, node.children[RIGHT]);
    assert!(
        (right - left).abs() <= 1,
        "sibling heights differ by more than 1"
    );
    assert_eq!(
        i32::from(node.balance),
        right - left,
        "stored balance factor is stale"
    );
    1 + left.max(right)
}

/// Whole-tree checker: balance factors, key ordering per the comparator, and
/// the live/free partition of the arena.
fn validate<K, V, C: Comparator<K>>(t: &AvlTree<K, V, C>) {
    check_subtree(&t.nodes, t.root);

    let mut live = vec![false; t.nodes.len()];
    let mut stack = vec![t.root];
    let mut live_count = 0usize;
    while let Some(id) = stack.pop() {
        if id.is_null() {
            continue;
        }
        assert!(!live[id.index()], "node reachable twice");
        live[id.index()] = true;
        live_count += 1;
        let node = &t.nodes[id.index()];
        stack.push(node.children[LEFT]);
        stack.push(node.children[RIGHT]);
    }
    assert_eq!(live_count, t.len(), "reachable node count must match len");

    let mut free_count = 0usize;
    let mut free = t.free;
    while !free.is_null() {
        assert!(!live[free.index()], "free-list node reachable from the root");
        live[free.index()] = true;
        free_count += 1;
        free = t.nodes[free.index()].next;
    }
    assert_eq!(
        live_count + free_count,
        t.nodes.len(),
        "live tree and free-list must partition the arena"
    );

    let mut pairs = t.iter();
    if let Some((mut previous, _)) = pairs.next() {
        for (key, _) in pairs {
            assert_eq!(
                t.compare.cmp(previous, key),
                std::cmp::Ordering::Less,
                "in-order keys must be strictly increasing"
            );
            previous = key;
        }
    }
}

/// Keys are drawn from a small range so sequences hit duplicates, two-child
/// deletes, and free-list reuse often.
#[derive(Clone, Debug, Arbitrary)]
enum Op {
    #[proptest(weight = 5)]
    Add(#[proptest(strategy = "0u16..64")] u16, u32),
    #[proptest(weight = 3)]
    Delete(#[proptest(strategy = "0u16..64")] u16),
    #[proptest(weight = 2)]
    Update(#[proptest(strategy = "0u16..64")] u16, u32),
    #[proptest(weight = 2)]
    Get(#[proptest(strategy = "0u16..64")] u16),
    #[proptest(weight = 1)]
    Clear,
    #[proptest(weight = 1)]
    Purge,
}

fn apply(
    t: &mut AvlTree<u16, u32>,
    m: &mut BTreeMap<u16, u32>,
    removals: &mut usize,
    op: Op,
) -> Result<(), TestCaseError> {
    match op {
        Op::Add(k, v) => {
            let inserted = t.add(k, v);
            prop_assert_eq!(inserted, !m.contains_key(&k));
            m.entry(k).or_insert(v);
        }
        Op::Delete(k) => {
            let removed = t.delete(&k);
            prop_assert_eq!(removed, m.remove(&k).is_some());
            if removed {
                *removals += 1;
            }
        }
        Op::Update(k, v) => {
            let old = t.update(&k, v);
            prop_assert_eq!(old, m.get(&k).copied());
            if let Some(slot) = m.get_mut(&k) {
                *slot = v;
            }
        }
        Op::Get(k) => {
            prop_assert_eq!(t.get(&k).copied(), m.get(&k).copied());
        }
        Op::Clear => {
            *removals += m.len();
            t.clear();
            m.clear();
        }
        Op::Purge => {
            *removals += m.len();
            t.purge();
            m.clear();
        }
    }
    prop_assert_eq!(t.len(), m.len());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_oracle_equivalence(ops in prop::collection::vec(any::<Op>(), 0..400)) {
        let hook_calls = Rc::new(Cell::new(0usize));
        let counter = Rc::clone(&hook_calls);
        let mut t: AvlTree<u16, u32> =
            AvlTree::new().with_remove_hook(move |_, _| counter.set(counter.get() + 1));
        let mut m: BTreeMap<u16, u32> = BTreeMap::new();
        let mut removals = 0usize;

        for op in ops {
            apply(&mut t, &mut m, &mut removals, op)?;
            prop_assert_eq!(hook_calls.get(), removals);
        }

        validate(&t);
        let got: Vec<(u16, u32)> = t.iter().map(|(k, v)| (*k, *v)).collect();
        let expected: Vec<(u16, u32)> = m.iter().map(|(k, v)| (*k, *v)).collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_invariants_hold_after_every_op(ops in prop::collection::vec(any::<Op>(), 0..60)) {
        let mut t: AvlTree<u16, u32> = AvlTree::new();
        let mut m: BTreeMap<u16, u32> = BTreeMap::new();
        let mut removals = 0usize;

        for op in ops {
            apply(&mut t, &mut m, &mut removals, op)?;
            validate(&t);
        }
    }

    #[test]
    fn prop_add_all_then_delete_all_empties(keys in prop::collection::vec(any::<u16>(), 0..200)) {
        let mut t: AvlTree<u16, u16> = AvlTree::new();
        let mut distinct = std::collections::BTreeSet::new();
        for &k in &keys {
            prop_assert_eq!(t.add(k, k), distinct.insert(k));
        }
        validate(&t);
        for &k in &distinct {
            prop_assert!(t.delete(&k));
        }
        for &k in &distinct {
            prop_assert!(!t.delete(&k));
        }
        prop_assert_eq!(t.len(), 0);
        prop_assert_eq!(t.iter().count(), 0);
        validate(&t);
    }

    #[test]
    fn prop_reverse_comparator_iterates_descending(
        keys in prop::collection::vec(any::<u16>(), 0..200),
    ) {
        let mut t = AvlTree::with_comparator(OrderBy(|a: &u16, b: &u16| b.cmp(a)));
        let mut m: BTreeMap<u16, ()> = BTreeMap::new();
        for &k in &keys {
            prop_assert_eq!(t.add(k, ()), m.insert(k, ()).is_none());
        }
        validate(&t);
        let got: Vec<u16> = t.iter().map(|(k, _)| *k).collect();
        let expected: Vec<u16> = m.keys().rev().copied().collect();
        prop_assert_eq!(got, expected);
    }
}
