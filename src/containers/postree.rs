//! Position-indexed persistent tree backing tuples and object instance
//! variables: the same hash-trie shape as sets and maps, but indexed by
//! position rather than hash.
//!
//! Indices are addressed most-significant-digit-first in base
//! [`HEADER_SIZE`] (unlike the hash tries in `trie.rs`, which consume hash
//! bits least-significant-first) so that growing the tree by one level
//! simply makes the existing root the leftmost child of a fresh internal
//! node — "the header expands by one level, pushing existing children
//! down" , with position order preserved.

use super::trie::{OBJ_HEADER_SIZE as HEADER_SIZE, OBJ_SHIFT_DIST as SHIFT_DIST};
use std::rc::Rc;

#[derive(Debug)]
enum Node<T> {
    Leaf(Rc<[Option<T>; HEADER_SIZE]>),
    Internal(Rc<[Option<Rc<Node<T>>>; HEADER_SIZE]>),
}

impl<T> Clone for Node<T> {
    fn clone(&self) -> Self {
        match self {
            Node::Leaf(a) => Node::Leaf(a.clone()),
            Node::Internal(a) => Node::Internal(a.clone()),
        }
    }
}

fn capacity(height: u32) -> usize {
    HEADER_SIZE.pow(height + 1)
}

fn get_node<T>(node: &Node<T>, height: u32, index: usize) -> Option<&T> {
    match node {
        Node::Leaf(arr) => arr[index].as_ref(),
        Node::Internal(children) => {
            let shift = SHIFT_DIST * height;
            let idx = (index >> shift) & (HEADER_SIZE - 1);
            let rest = index & ((1usize << shift) - 1);
            children[idx].as_deref().and_then(|child| get_node(child, height - 1, rest))
        }
    }
}

fn empty_leaf<T: Clone>() -> Node<T> {
    Node::Leaf(Rc::new(std::array::from_fn(|_| None)))
}

fn set_node<T: Clone>(node: Option<&Node<T>>, height: u32, index: usize, value: Option<T>) -> Node<T> {
    if height == 0 {
        let mut arr: [Option<T>; HEADER_SIZE] = match node {
            Some(Node::Leaf(a)) => (**a).clone(),
            _ => std::array::from_fn(|_| None),
        };
        arr[index] = value;
        return Node::Leaf(Rc::new(arr));
    }
    let shift = SHIFT_DIST * height;
    let idx = (index >> shift) & (HEADER_SIZE - 1);
    let rest = index & ((1usize << shift) - 1);
    let mut children: [Option<Rc<Node<T>>>; HEADER_SIZE] = match node {
        Some(Node::Internal(a)) => (**a).clone(),
        _ => std::array::from_fn(|_| None),
    };
    let child = set_node(children[idx].as_deref(), height - 1, rest, value);
    children[idx] = Some(Rc::new(child));
    Node::Internal(Rc::new(children))
}

/// A persistent, position-indexed tree. `len` is the tuple's/object's
/// logical length — the index one past the last slot that canonicalization
/// guarantees is non-empty.
#[derive(Debug)]
pub struct PosTree<T> {
    root: Option<Rc<Node<T>>>,
    height: u32,
    len: usize,
}

impl<T> Clone for PosTree<T> {
    fn clone(&self) -> Self {
        PosTree { root: self.root.clone(), height: self.height, len: self.len }
    }
}

impl<T: Clone> Default for PosTree<T> {
    fn default() -> Self {
        PosTree { root: None, height: 0, len: 0 }
    }
}

impl<T: Clone> PosTree<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `None` both for genuinely absent slots and for any index at or past
    /// `len` — both read as `omega` at the value-model boundary.
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        self.root.as_ref().and_then(|r| get_node(r, self.height, index))
    }

    /// Sets (or clears, with `value = None`) the element at `index`,
    /// growing the tree height if needed. Does not shrink or canonicalize —
    /// callers that can produce trailing `omega`s must call
    /// [`PosTree::canonicalize`] afterward.
    pub fn set(&self, index: usize, value: Option<T>) -> Self {
        let mut height = self.height;
        while index >= capacity(height) {
            height += 1;
        }
        let root = if height != self.height {
            let mut children: [Option<Rc<Node<T>>>; HEADER_SIZE] = std::array::from_fn(|_| None);
            children[0] = self.root.clone().or_else(|| Some(Rc::new(empty_leaf())));
            let mut grown = Node::Internal(Rc::new(children));
            for _ in (self.height + 1)..height {
                let mut wrap: [Option<Rc<Node<T>>>; HEADER_SIZE] = std::array::from_fn(|_| None);
                wrap[0] = Some(Rc::new(grown));
                grown = Node::Internal(Rc::new(wrap));
            }
            Some(Rc::new(grown))
        } else {
            self.root.clone()
        };
        let new_root = set_node(root.as_deref(), height, index, value);
        let len = self.len.max(index + 1);
        PosTree { root: Some(Rc::new(new_root)), height, len }
    }

    /// Appends a value at position `len`.
    pub fn push(&self, value: T) -> Self {
        let mut t = self.set(self.len, Some(value));
        t.len = self.len + 1;
        t
    }

    /// Strips trailing `None` slots and reduces tree height as far as
    /// possible. Mandatory after pop-from-end, slice-assignment, or
    /// concatenation of a sub-range.
    pub fn canonicalize(mut self) -> Self {
        while self.len > 0 && self.get(self.len - 1).is_none() {
            self.len -= 1;
        }
        while self.height > 0 && capacity(self.height - 1) >= self.len {
            self.height -= 1;
            self.root = match self.root.as_deref() {
                Some(Node::Internal(children)) => children[0].clone(),
                other => other.cloned(),
            };
        }
        if self.len == 0 {
            self.root = None;
            self.height = 0;
        }
        self
    }

    /// Builds a tree from a dense sequence of values (no gaps), used by
    /// `from_elements`/concatenation.
    pub fn from_values(values: impl IntoIterator<Item = T>) -> Self {
        let mut t = PosTree::new();
        for v in values {
            t = t.push(v);
        }
        t
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&T>> {
        (0..self.len).map(move |i| self.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_get_roundtrip() {
        let mut t: PosTree<i32> = PosTree::new();
        for i in 0..40 {
            t = t.push(i);
        }
        assert_eq!(t.len(), 40);
        for i in 0..40 {
            assert_eq!(t.get(i as usize), Some(&i));
        }
    }

    #[test]
    fn canonicalize_strips_trailing_none_and_shrinks() {
        let mut t: PosTree<i32> = PosTree::new();
        for i in 0..20 {
            t = t.push(i);
        }
        let t = t.set(19, None);
        let t = t.canonicalize();
        assert_eq!(t.len(), 19);
        assert_eq!(t.get(18), Some(&18));
    }

    #[test]
    fn clearing_interior_slot_reads_as_none_not_out_of_range() {
        let mut t: PosTree<i32> = PosTree::new();
        for i in 0..5 {
            t = t.push(i);
        }
        let t = t.set(2, None);
        assert_eq!(t.get(2), None);
        assert_eq!(t.len(), 5);
    }

    #[test]
    fn sharing_is_preserved_across_mutation() {
        let mut a: PosTree<i32> = PosTree::new();
        for i in 0..10 {
            a = a.push(i);
        }
        let snapshot = a.clone();
        let b = a.set(3, Some(999));
        assert_eq!(snapshot.get(3), Some(&3));
        assert_eq!(b.get(3), Some(&999));
    }
}
