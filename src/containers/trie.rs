//! Shared hash-trie header/cell machinery backing sets and maps.
//!
//! This is a classic persistent hash-array-mapped trie: every insert/delete
//! rebuilds only the nodes on the path from the root to the affected leaf,
//! sharing every untouched subtree via `Rc` ( "persistent
//! hash-trie containers over pointer graphs" redesign note). Because
//! unaffected subtrees are shared rather than copied, a container observed
//! through an old `Rc` handle is structurally unaffected by an operation on
//! a newer handle — this gives the copy-on-write guarantee of
//! without a separate `Rc::get_mut`-gated in-place-mutation fast path,
//! trading a little reuse on the single-owner case for a simpler sharing
//! story everywhere else.
//!
//! Leaves hold a "clash list": a `Vec<T>` kept sorted by `T::hash_code()`
//! ( "residual hash bits are used to order the clash list
//! within a leaf").

use std::rc::Rc;

/// Fan-out and shift distance for set/map header trees (/// `HEADER_SIZE`/`SHIFT_DIST`).
pub const HEADER_SIZE: usize = 16;
pub const SHIFT_DIST: u32 = 4;

/// Fan-out and shift distance for tuple/object header trees.
pub const OBJ_HEADER_SIZE: usize = 4;
pub const OBJ_SHIFT_DIST: u32 = 2;

/// Clash-list threshold before a leaf splits into a deeper header level
/// . 4 is a conventional HAMT fan-out/clash tradeoff.
pub const CLASH_SIZE: usize = 4;

/// An element storable in a trie leaf: something hashable whose identity
/// for clash-list lookup/replacement (`same_key`) may be narrower than full
/// equality (a map cell's `same_key` compares only its key field, not its
/// range).
pub trait TrieItem: Clone {
    fn hash_code(&self) -> u64;
    fn same_key(&self, other: &Self) -> bool;
}

#[derive(Debug)]
pub enum Node<T, const N: usize, const SHIFT: u32> {
    Leaf(Rc<Vec<T>>),
    Internal(Rc<[Option<Rc<Node<T, N, SHIFT>>>; N]>),
}

impl<T, const N: usize, const SHIFT: u32> Clone for Node<T, N, SHIFT> {
    fn clone(&self) -> Self {
        match self {
            Node::Leaf(v) => Node::Leaf(v.clone()),
            Node::Internal(c) => Node::Internal(c.clone()),
        }
    }
}

fn child_index<const N: usize, const SHIFT: u32>(hash: u64, depth: u32) -> usize {
    let shift = depth.saturating_mul(SHIFT);
    if shift >= 64 {
        return 0;
    }
    ((hash >> shift) as usize) & (N - 1)
}

fn collect_items<T: Clone, const N: usize, const SHIFT: u32>(node: &Node<T, N, SHIFT>, out: &mut Vec<T>) {
    match node {
        Node::Leaf(items) => out.extend_from_slice(items),
        Node::Internal(children) => {
            for child in children.iter().flatten() {
                collect_items(child, out);
            }
        }
    }
}

fn insert_node<T: TrieItem, const N: usize, const SHIFT: u32>(
    node: Option<&Rc<Node<T, N, SHIFT>>>,
    item: T,
    depth: u32,
) -> (Rc<Node<T, N, SHIFT>>, Option<T>) {
    match node {
        None => (Rc::new(Node::Leaf(Rc::new(vec![item]))), None),
        Some(n) => match n.as_ref() {
            Node::Leaf(items) => {
                if let Some(pos) = items.iter().position(|e| e.same_key(&item)) {
                    let old = items[pos].clone();
                    let mut v = (**items).clone();
                    v[pos] = item;
                    (Rc::new(Node::Leaf(Rc::new(v))), Some(old))
                } else if items.len() < CLASH_SIZE {
                    let mut v = (**items).clone();
                    let pos = v.partition_point(|e| e.hash_code() <= item.hash_code());
                    v.insert(pos, item);
                    (Rc::new(Node::Leaf(Rc::new(v))), None)
                } else {
                    let mut arr: [Option<Rc<Node<T, N, SHIFT>>>; N] = std::array::from_fn(|_| None);
                    for existing in items.iter().cloned() {
                        let idx = child_index::<N, SHIFT>(existing.hash_code(), depth);
                        let (child, _) = insert_node(arr[idx].as_ref(), existing, depth + 1);
                        arr[idx] = Some(child);
                    }
                    let idx = child_index::<N, SHIFT>(item.hash_code(), depth);
                    let (child, _) = insert_node(arr[idx].as_ref(), item, depth + 1);
                    arr[idx] = Some(child);
                    (Rc::new(Node::Internal(Rc::new(arr))), None)
                }
            }
            Node::Internal(children) => {
                let idx = child_index::<N, SHIFT>(item.hash_code(), depth);
                let (new_child, replaced) = insert_node(children[idx].as_ref(), item, depth + 1);
                let mut arr = (**children).clone();
                arr[idx] = Some(new_child);
                (Rc::new(Node::Internal(Rc::new(arr))), replaced)
            }
        },
    }
}

fn remove_node<T: TrieItem, const N: usize, const SHIFT: u32>(
    node: Option<&Rc<Node<T, N, SHIFT>>>,
    probe_hash: u64,
    same_key: impl Fn(&T) -> bool,
    depth: u32,
) -> (Option<Rc<Node<T, N, SHIFT>>>, Option<T>) {
    match node {
        None => (None, None),
        Some(n) => match n.as_ref() {
            Node::Leaf(items) => {
                if let Some(pos) = items.iter().position(|e| same_key(e)) {
                    let mut v = (**items).clone();
                    let old = v.remove(pos);
                    if v.is_empty() {
                        (None, Some(old))
                    } else {
                        (Some(Rc::new(Node::Leaf(Rc::new(v)))), Some(old))
                    }
                } else {
                    (Some(n.clone()), None)
                }
            }
            Node::Internal(children) => {
                let idx = child_index::<N, SHIFT>(probe_hash, depth);
                let (new_child, removed) = remove_node(children[idx].as_ref(), probe_hash, &same_key, depth + 1);
                if removed.is_none() {
                    return (Some(n.clone()), None);
                }
                let mut arr = (**children).clone();
                arr[idx] = new_child;
                let mut all = Vec::new();
                let mut any = false;
                for c in arr.iter().flatten() {
                    any = true;
                    collect_items(c, &mut all);
                }
                if !any {
                    return (None, removed);
                }
                if all.len() <= CLASH_SIZE {
                    all.sort_by_key(|e| e.hash_code());
                    return (Some(Rc::new(Node::Leaf(Rc::new(all)))), removed);
                }
                (Some(Rc::new(Node::Internal(Rc::new(arr)))), removed)
            }
        },
    }
}

fn find_node<'a, T: TrieItem, const N: usize, const SHIFT: u32>(
    node: Option<&'a Rc<Node<T, N, SHIFT>>>,
    probe_hash: u64,
    same_key: &impl Fn(&T) -> bool,
    depth: u32,
) -> Option<&'a T> {
    match node {
        None => None,
        Some(n) => match n.as_ref() {
            Node::Leaf(items) => items.iter().find(|e| same_key(e)),
            Node::Internal(children) => {
                let idx = child_index::<N, SHIFT>(probe_hash, depth);
                find_node(children[idx].as_ref(), probe_hash, same_key, depth + 1)
            }
        },
    }
}

/// A hash-trie header: root pointer plus a cardinality count and an
/// XOR-incremental hash cache.
#[derive(Debug)]
pub struct Header<T, const N: usize, const SHIFT: u32> {
    root: Option<Rc<Node<T, N, SHIFT>>>,
    count: usize,
    hash: u64,
}

impl<T, const N: usize, const SHIFT: u32> Clone for Header<T, N, SHIFT> {
    fn clone(&self) -> Self {
        Header { root: self.root.clone(), count: self.count, hash: self.hash }
    }
}

impl<T: TrieItem, const N: usize, const SHIFT: u32> Default for Header<T, N, SHIFT> {
    fn default() -> Self {
        Header { root: None, count: 0, hash: 0 }
    }
}

impl<T: TrieItem, const N: usize, const SHIFT: u32> Header<T, N, SHIFT> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Cached XOR-of-element-hashes.
    pub fn cached_hash(&self) -> u64 {
        self.hash
    }

    /// Inserts `item`, replacing any existing element with the same key.
    /// Returns the new header and the replaced item, if any.
    pub fn insert(&self, item: T) -> (Self, Option<T>) {
        let item_hash = item.hash_code();
        let (new_root, replaced) = insert_node(self.root.as_ref(), item, 0);
        let mut hash = self.hash ^ item_hash;
        let mut count = self.count;
        if let Some(old) = &replaced {
            hash ^= old.hash_code();
        } else {
            count += 1;
        }
        (Header { root: Some(new_root), count, hash }, replaced)
    }

    pub fn remove_by(&self, probe_hash: u64, same_key: impl Fn(&T) -> bool) -> (Self, Option<T>) {
        let (new_root, removed) = remove_node(self.root.as_ref(), probe_hash, same_key, 0);
        match &removed {
            None => (self.clone(), None),
            Some(old) => {
                let hash = self.hash ^ old.hash_code();
                (Header { root: new_root, count: self.count - 1, hash }, removed)
            }
        }
    }

    pub fn find_by(&self, probe_hash: u64, same_key: impl Fn(&T) -> bool) -> Option<&T> {
        find_node(self.root.as_ref(), probe_hash, &same_key, 0)
    }

    /// All elements in header-tree order, yielding each element once.
    pub fn iter_items(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.count);
        if let Some(root) = &self.root {
            collect_items(root, &mut out);
        }
        out
    }

    /// Leftmost non-empty leaf's clash-list head, deterministic given
    /// identical insertion history.
    pub fn arbitrary(&self) -> Option<&T> {
        fn leftmost<'a, T, const N: usize, const SHIFT: u32>(node: &'a Node<T, N, SHIFT>) -> Option<&'a T> {
            match node {
                Node::Leaf(items) => items.first(),
                Node::Internal(children) => children.iter().flatten().find_map(|c| leftmost(c)),
            }
        }
        self.root.as_ref().and_then(|r| leftmost(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct IntItem(u64);

    impl TrieItem for IntItem {
        fn hash_code(&self) -> u64 {
            self.0
        }
        fn same_key(&self, other: &Self) -> bool {
            self.0 == other.0
        }
    }

    type TestHeader = Header<IntItem, 16, 4>;

    #[test]
    fn insert_dedups_and_hash_is_xor_identity() {
        let h = TestHeader::new();
        let (h, _) = h.insert(IntItem(1));
        let (h2, replaced) = h.insert(IntItem(1));
        assert_eq!(h2.len(), 1);
        assert!(replaced.is_some());
        assert_eq!(h2.cached_hash(), h.cached_hash());
    }

    #[test]
    fn insert_many_splits_leaves_and_preserves_all_items() {
        let mut h = TestHeader::new();
        for i in 0..500u64 {
            let (next, _) = h.insert(IntItem(i));
            h = next;
        }
        assert_eq!(h.len(), 500);
        let mut items: Vec<u64> = h.iter_items().into_iter().map(|i| i.0).collect();
        items.sort();
        assert_eq!(items, (0..500).collect::<Vec<_>>());
    }

    #[test]
    fn remove_restores_prior_header_for_shared_owners() {
        let mut h = TestHeader::new();
        for i in 0..20u64 {
            let (next, _) = h.insert(IntItem(i));
            h = next;
        }
        let snapshot = h.clone();
        let (removed_header, removed) = h.remove_by(7, |e| e.0 == 7);
        assert!(removed.is_some());
        assert_eq!(removed_header.len(), 19);
        // the original snapshot (simulating another owner) is untouched.
        assert_eq!(snapshot.len(), 20);
        assert!(snapshot.find_by(7, |e| e.0 == 7).is_some());
    }

    #[test]
    fn cardinality_formula_holds() {
        let mut h = TestHeader::new();
        let mut expected = 0usize;
        for i in 0..50u64 {
            let existed = h.find_by(i % 10, |e| e.0 == i % 10).is_some();
            let (next, _) = h.insert(IntItem(i % 10));
            h = next;
            if !existed {
                expected += 1;
            }
        }
        assert_eq!(h.len(), expected);
    }
}
