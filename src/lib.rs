//! # avl-rs
//!
//! An ordered map backed by an arena-allocated AVL tree with node recycling.
//!
//! Nodes live in a flat arena and refer to each other through 32-bit ids, so
//! the tree never juggles owning pointers. Deleting an entry does not release
//! its node: the node is chained onto an internal free-list and recycled by a
//! later insertion. Storage is only truly released by [`AvlTree::purge`] or by
//! dropping the tree.
//!
//! ## Example
//!
//! ```rust
//! use avl_rs::AvlTree;
//!
//! let mut tree: AvlTree<&str, i32> = AvlTree::new();
//! assert!(tree.add("foo", 123));
//! assert!(tree.add("bar", 456));
//! assert!(!tree.add("foo", 999)); // duplicate key, tree unchanged
//!
//! assert_eq!(tree.get(&"foo"), Some(&123));
//! assert_eq!(tree.update(&"foo", 999), Some(123));
//! assert!(tree.delete(&"foo"));
//!
//! let keys: Vec<&str> = tree.iter().map(|(k, _)| *k).collect();
//! assert_eq!(keys, vec!["bar"]);
//! ```

#![forbid(unsafe_code)]

use smallvec::SmallVec;
use std::cmp::Ordering;
use std::fmt;
use std::mem;

// =============================================================================
// Node ids
// =============================================================================

const LEFT: usize = 0;
const RIGHT: usize = 1;

/// Index of a node in the arena. All-ones is the null sentinel, so a child
/// link costs 4 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(transparent)]
struct NodeId(u32);

impl NodeId {
    const NULL: NodeId = NodeId(u32::MAX);

    fn from_usize(index: usize) -> Self {
        assert!(index < u32::MAX as usize, "node arena full");
        NodeId(index as u32)
    }

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    fn is_null(self) -> bool {
        self.0 == u32::MAX
    }
}

/// Child index for a comparison/imbalance sign: -1 is left, +1 is right.
#[inline]
fn side(sign: i8) -> usize {
    usize::from(sign > 0)
}

#[inline]
fn positive(value: i8) -> i8 {
    value.max(0)
}

// =============================================================================
// Nodes
// =============================================================================

/// Tree vertex. `balance` is the AVL balance factor (right subtree height
/// minus left subtree height); it may transiently reach ±2 mid-operation,
/// which triggers a rotation before the operation returns. `next` is
/// meaningful only while the node sits on the free-list.
struct Node<K, V> {
    key: K,
    value: V,
    children: [NodeId; 2],
    balance: i8,
    next: NodeId,
}

// =============================================================================
// Slots
// =============================================================================

/// The storage location currently holding a node id: the tree's root field or
/// one child cell of one node. Lets the balancing engine read and write "the
/// place this subtree hangs from" without special-casing the root.
#[derive(Clone, Copy)]
enum Slot {
    Root,
    Child(NodeId, usize),
}

impl Slot {
    #[inline]
    fn child(id: NodeId, sign: i8) -> Slot {
        Slot::Child(id, side(sign))
    }
}

// =============================================================================
// Comparator
// =============================================================================

/// Key ordering supplied by the caller.
///
/// The order must be a strict total order and must not change for the
/// lifetime of the tree; a comparator that violates this corrupts lookups and
/// is not detected.
pub trait Comparator<K> {
    fn cmp(&self, a: &K, b: &K) -> Ordering;
}

/// The `Ord`-based comparator used by [`AvlTree::new`].
#[derive(Clone, Copy, Debug, Default)]
pub struct NaturalOrder;

impl<K: Ord> Comparator<K> for NaturalOrder {
    #[inline]
    fn cmp(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

/// Adapter turning an ordering closure into a [`Comparator`].
#[derive(Clone, Copy, Debug)]
pub struct OrderBy<F>(pub F);

impl<K, F: Fn(&K, &K) -> Ordering> Comparator<K> for OrderBy<F> {
    #[inline]
    fn cmp(&self, a: &K, b: &K) -> Ordering {
        (self.0)(a, b)
    }
}

/// Hook invoked once per logically removed `(key, value)` pair.
type RemoveHook<K, V> = Box<dyn FnMut(&K, &V)>;

// =============================================================================
// Tree
// =============================================================================

/// Stack for in-order walks. AVL depth stays under 1.45·log2(n), so 16 inline
/// slots cover maps of a few thousand entries without touching the heap.
type TraversalStack = SmallVec<[NodeId; 16]>;

/// An ordered map: arena-allocated AVL tree with a free-list of retired
/// nodes.
///
/// Every arena slot is either reachable from the root or chained on the
/// free-list, never both. [`add`](Self::add) pops the free-list before
/// growing the arena, so a delete/add workload reaches a steady state with no
/// further allocation.
pub struct AvlTree<K, V, C = NaturalOrder> {
    nodes: Vec<Node<K, V>>,
    root: NodeId,
    free: NodeId,
    count: usize,
    compare: C,
    on_remove: Option<RemoveHook<K, V>>,
}

impl<K: Ord, V> AvlTree<K, V> {
    pub fn new() -> Self {
        Self::with_comparator(NaturalOrder)
    }
}

impl<K, V, C: Comparator<K>> AvlTree<K, V, C> {
    pub fn with_comparator(compare: C) -> Self {
        Self {
            nodes: Vec::new(),
            root: NodeId::NULL,
            free: NodeId::NULL,
            count: 0,
            compare,
            on_remove: None,
        }
    }

    /// Installs a hook that observes every logically removed pair: single
    /// deletes, the spliced-out pair of a two-child delete, and every pair
    /// drained by [`clear`](Self::clear) or [`purge`](Self::purge). It never
    /// fires for rejected duplicates or for values replaced by
    /// [`update`](Self::update).
    pub fn with_remove_hook(mut self, hook: impl FnMut(&K, &V) + 'static) -> Self {
        self.on_remove = Some(Box::new(hook));
        self
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Bytes held by the node arena, including free-listed nodes.
    pub fn memory_usage(&self) -> usize {
        self.nodes.capacity() * mem::size_of::<Node<K, V>>()
    }

    // -------------------------------------------------------------------------
    // Slot and arena plumbing
    // -------------------------------------------------------------------------

    #[inline]
    fn slot_get(&self, slot: Slot) -> NodeId {
        match slot {
            Slot::Root => self.root,
            Slot::Child(id, side) => self.nodes[id.index()].children[side],
        }
    }

    #[inline]
    fn slot_set(&mut self, slot: Slot, node: NodeId) {
        match slot {
            Slot::Root => self.root = node,
            Slot::Child(id, side) => self.nodes[id.index()].children[side] = node,
        }
    }

    /// Pops a retired node and overwrites it, or grows the arena.
    fn allocate(&mut self, key: K, value: V) -> NodeId {
        if self.free.is_null() {
            let id = NodeId::from_usize(self.nodes.len());
            self.nodes.push(Node {
                key,
                value,
                children: [NodeId::NULL; 2],
                balance: 0,
                next: NodeId::NULL,
            });
            id
        } else {
            let id = self.free;
            let node = &mut self.nodes[id.index()];
            self.free = node.next;
            node.key = key;
            node.value = value;
            node.children = [NodeId::NULL; 2];
            node.balance = 0;
            node.next = NodeId::NULL;
            id
        }
    }

    /// Chains an unlinked node onto the free-list. Its key and value stay in
    /// place until the slot is recycled or the arena is dropped.
    fn retire(&mut self, id: NodeId) {
        let head = self.free;
        self.nodes[id.index()].next = head;
        self.free = id;
    }

    fn notify_removed(&mut self, id: NodeId) {
        if let Some(hook) = self.on_remove.as_mut() {
            let node = &self.nodes[id.index()];
            hook(&node.key, &node.value);
        }
    }

    fn has_two_children(&self, id: NodeId) -> bool {
        let node = &self.nodes[id.index()];
        !node.children[LEFT].is_null() && !node.children[RIGHT].is_null()
    }

    /// The sole child of a node with at most one child.
    fn either_child(&self, id: NodeId) -> NodeId {
        let node = &self.nodes[id.index()];
        if node.children[LEFT].is_null() {
            node.children[RIGHT]
        } else {
            node.children[LEFT]
        }
    }

    fn swap_pairs(&mut self, a: NodeId, b: NodeId) {
        debug_assert_ne!(a, b);
        let (low, high) = if a.index() < b.index() {
            (a.index(), b.index())
        } else {
            (b.index(), a.index())
        };
        let (head, tail) = self.nodes.split_at_mut(high);
        mem::swap(&mut head[low].key, &mut tail[0].key);
        mem::swap(&mut head[low].value, &mut tail[0].value);
    }

    // -------------------------------------------------------------------------
    // Balancing engine
    // -------------------------------------------------------------------------

    /// Single rotation at the node held by `slot`, promoting its child on
    /// `sign` (+1 promotes the right child, i.e. a left rotation). Balance
    /// factors of both nodes are recomputed in closed form from the
    /// pre-rotation factors; only the three involved child cells and the two
    /// balance fields are touched.
    fn rotate(&mut self, slot: Slot, sign: i8) {
        let a = self.slot_get(slot);
        let b = self.nodes[a.index()].children[side(sign)];
        debug_assert!(!b.is_null(), "rotation requires a child on the heavy side");
        let inner = self.nodes[b.index()].children[side(-sign)];

        let ba = self.nodes[a.index()].balance;
        let bb = self.nodes[b.index()].balance;
        let ba_after = ba - sign * (1 + positive(sign * bb));
        let bb_after = bb + sign * ((sign * ba_after).min(0) - 1);

        self.nodes[a.index()].children[side(sign)] = inner;
        self.nodes[a.index()].balance = ba_after;
        self.nodes[b.index()].children[side(-sign)] = a;
        self.nodes[b.index()].balance = bb_after;
        self.slot_set(slot, b);
    }

    /// Retracing step: the child of the node at `slot` on side `sign` changed
    /// height by `child_delta` (±1). Folds the change into the node's balance
    /// factor, rotates if the factor reached ±2, and returns the resulting
    /// height change of the whole subtree for the caller to propagate.
    fn rebalance(&mut self, slot: Slot, sign: i8, child_delta: i8) -> i8 {
        debug_assert!(child_delta == -1 || child_delta == 1);
        let id = self.slot_get(slot);
        let before = self.nodes[id.index()].balance;
        let after = before + sign * child_delta;
        self.nodes[id.index()].balance = after;

        // Subtree height is 1 + the taller side, so only growth or shrink of
        // the taller side shows through to the parent.
        let mut delta = positive(sign * after) - positive(sign * before);

        if after.abs() > 1 {
            let heavy = after.signum();
            let child = self.nodes[id.index()].children[side(heavy)];
            let child_balance = self.nodes[child.index()].balance;
            if child_balance * heavy < 0 {
                // Inner grandchild is the tall one: rotate it outward first.
                self.rotate(Slot::child(id, heavy), -heavy);
                self.rotate(slot, heavy);
                delta -= 1;
            } else {
                self.rotate(slot, heavy);
                if child_balance != 0 {
                    delta -= 1;
                }
            }
        }
        delta
    }

    // -------------------------------------------------------------------------
    // Insert
    // -------------------------------------------------------------------------

    /// Adds an entry. Returns `false` (leaving the tree untouched and
    /// dropping `value`) if the key is already present;
    /// [`update`](Self::update) is the operation that replaces values.
    pub fn add(&mut self, key: K, value: V) -> bool {
        let (inserted, _) = self.insert_at(Slot::Root, key, value);
        if inserted {
            self.count += 1;
        }
        inserted
    }

    fn insert_at(&mut self, slot: Slot, key: K, value: V) -> (bool, i8) {
        let id = self.slot_get(slot);
        if id.is_null() {
            let node = self.allocate(key, value);
            self.slot_set(slot, node);
            return (true, 1);
        }

        let sign = match self.compare.cmp(&key, &self.nodes[id.index()].key) {
            Ordering::Equal => return (false, 0),
            Ordering::Less => -1,
            Ordering::Greater => 1,
        };
        let (inserted, delta) = self.insert_at(Slot::child(id, sign), key, value);
        if delta == 0 {
            (inserted, 0)
        } else {
            (inserted, self.rebalance(slot, sign, delta))
        }
    }

    // -------------------------------------------------------------------------
    // Delete
    // -------------------------------------------------------------------------

    /// Removes the entry for `key`, retiring its node onto the free-list.
    /// Returns `false` if the key is absent.
    pub fn delete(&mut self, key: &K) -> bool {
        let (removed, _) = self.remove_at(Slot::Root, key);
        if removed {
            self.count -= 1;
        }
        removed
    }

    fn remove_at(&mut self, slot: Slot, key: &K) -> (bool, i8) {
        let id = self.slot_get(slot);
        if id.is_null() {
            return (false, 0);
        }

        let sign = match self.compare.cmp(key, &self.nodes[id.index()].key) {
            Ordering::Equal => {
                return if self.has_two_children(id) {
                    // Swap the doomed pair down to the in-order predecessor,
                    // then splice the predecessor node out. The swap keeps
                    // the remove hook firing exactly once, with the pair that
                    // is actually leaving the tree.
                    let delta = self.remove_rightmost(Slot::Child(id, LEFT), id);
                    if delta == 0 {
                        (true, 0)
                    } else {
                        (true, self.rebalance(slot, -1, delta))
                    }
                } else {
                    self.notify_removed(id);
                    let child = self.either_child(id);
                    self.slot_set(slot, child);
                    self.retire(id);
                    (true, -1)
                };
            }
            Ordering::Less => -1,
            Ordering::Greater => 1,
        };
        let (removed, delta) = self.remove_at(Slot::child(id, sign), key);
        if delta == 0 {
            (removed, 0)
        } else {
            (removed, self.rebalance(slot, sign, delta))
        }
    }

    /// Walks the right-child chain under `slot` to the rightmost node,
    /// exchanges its key/value with `target`'s, unlinks it, and retraces on
    /// the way back up. Returns the height change of the subtree at `slot`.
    fn remove_rightmost(&mut self, slot: Slot, target: NodeId) -> i8 {
        let id = self.slot_get(slot);
        debug_assert!(!id.is_null());
        let right = self.nodes[id.index()].children[RIGHT];
        if right.is_null() {
            self.swap_pairs(id, target);
            self.notify_removed(id);
            let left = self.nodes[id.index()].children[LEFT];
            self.slot_set(slot, left);
            self.retire(id);
            return -1;
        }

        let delta = self.remove_rightmost(Slot::Child(id, RIGHT), target);
        if delta == 0 {
            0
        } else {
            self.rebalance(slot, 1, delta)
        }
    }

    // -------------------------------------------------------------------------
    // Lookup / update
    // -------------------------------------------------------------------------

    /// Plain binary-search descent shared by the non-balancing operations. No
    /// rotation, no free-list interaction.
    fn locate(&self, key: &K) -> NodeId {
        let mut current = self.root;
        while !current.is_null() {
            let node = &self.nodes[current.index()];
            current = match self.compare.cmp(key, &node.key) {
                Ordering::Equal => return current,
                Ordering::Less => node.children[LEFT],
                Ordering::Greater => node.children[RIGHT],
            };
        }
        NodeId::NULL
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let id = self.locate(key);
        if id.is_null() {
            None
        } else {
            Some(&self.nodes[id.index()].value)
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        !self.locate(key).is_null()
    }

    /// Replaces the value for an existing key and returns the previous value.
    /// A no-op returning `None` (and dropping `value`) if the key is absent.
    /// The remove hook does not fire: the pair is updated, not removed.
    pub fn update(&mut self, key: &K, value: V) -> Option<V> {
        let id = self.locate(key);
        if id.is_null() {
            return None;
        }
        Some(mem::replace(&mut self.nodes[id.index()].value, value))
    }

    // -------------------------------------------------------------------------
    // Clear / purge
    // -------------------------------------------------------------------------

    /// Removes every entry in key order, firing the remove hook for each and
    /// retiring every node onto the free-list for reuse by later inserts.
    pub fn clear(&mut self) {
        let mut stack = TraversalStack::new();
        let mut current = self.root;
        loop {
            while !current.is_null() {
                stack.push(current);
                current = self.nodes[current.index()].children[LEFT];
            }
            let Some(id) = stack.pop() else { break };
            current = self.nodes[id.index()].children[RIGHT];
            self.notify_removed(id);
            self.retire(id);
        }
        self.root = NodeId::NULL;
        self.count = 0;
    }

    /// [`clear`](Self::clear), then releases the free-list and the arena
    /// storage itself. The tree remains usable.
    pub fn purge(&mut self) {
        self.clear();
        self.free = NodeId::NULL;
        self.nodes = Vec::new();
    }

    // -------------------------------------------------------------------------
    // Iteration
    // -------------------------------------------------------------------------

    /// Lazy in-order traversal: pairs in ascending comparator order. Each
    /// call reads the current tree state; the shared borrow keeps the tree
    /// immutable for as long as the iterator lives.
    pub fn iter(&self) -> Iter<'_, K, V> {
        let mut stack = TraversalStack::new();
        let mut current = self.root;
        while !current.is_null() {
            stack.push(current);
            current = self.nodes[current.index()].children[LEFT];
        }
        Iter {
            nodes: &self.nodes,
            stack,
        }
    }
}

impl<K: Ord, V> Default for AvlTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, V: fmt::Debug, C: Comparator<K>> fmt::Debug for AvlTree<K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

pub struct Iter<'a, K, V> {
    nodes: &'a [Node<K, V>],
    stack: TraversalStack,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let node = &self.nodes[id.index()];
        let mut current = node.children[RIGHT];
        while !current.is_null() {
            self.stack.push(current);
            current = self.nodes[current.index()].children[LEFT];
        }
        Some((&node.key, &node.value))
    }
}

impl<'a, K, V, C: Comparator<K>> IntoIterator for &'a AvlTree<K, V, C> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}


#[cfg(test)]
mod proptests;
