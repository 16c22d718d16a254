//! Tuple container: a similar tree to sets/maps but indexed by position,
//! plus the concat/slice/slice-assignment primitives.

use super::postree::PosTree;
use crate::value::specifier::{value_eq, value_hash, Specifier};

/// A tuple's backing store: a position-indexed persistent tree of
/// specifiers, plus a cached XOR hash — tuples keep the XOR identity valid
/// at all times, unlike strings/bignums.
#[derive(Debug, Clone)]
pub struct Tuple {
    tree: PosTree<Specifier>,
    hash: u64,
}

impl Default for Tuple {
    fn default() -> Self {
        Tuple { tree: PosTree::new(), hash: 0 }
    }
}

fn elem_hash(index: usize, value: &Specifier) -> u64 {
    // Position participates in the hash so that `[1, 2]` and `[2, 1]`
    // don't collide under pure element-XOR: position is folded in via a
    // per-slot salt since position *is* part of a tuple element's identity,
    // unlike set/map membership.
    value_hash(value) ^ (index as u64).wrapping_mul(0x9E3779B97F4A7C15)
}

impl Tuple {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_elements(elements: Vec<Specifier>) -> Self {
        let mut t = Tuple::empty();
        for (i, e) in elements.into_iter().enumerate() {
            let h = elem_hash(i, &e);
            t.hash ^= h;
            t.tree = t.tree.push(e);
        }
        t
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn cached_hash(&self) -> u64 {
        self.hash
    }

    /// 1-based element access (`tupof`); absent positions and positions
    /// past the end read as `omega`.
    pub fn get(&self, one_based_index: i64) -> Specifier {
        if one_based_index < 1 {
            return Specifier::Omega;
        }
        let idx = (one_based_index - 1) as usize;
        self.tree.get(idx).cloned().unwrap_or(Specifier::Omega)
    }

    /// `sof`/`sofa` sinister assignment: sets position `one_based_index`,
    /// growing the tuple with `omega` gaps as needed, then re-canonicalizes
    /// and recomputes the cached hash (writes can both introduce and erase
    /// trailing omegas, so the hash is rebuilt rather than patched).
    pub fn set(&self, one_based_index: i64, value: Specifier) -> Tuple {
        if one_based_index < 1 {
            crate::error::giveup("tuple index below 1 in set");
        }
        let idx = (one_based_index - 1) as usize;
        let slot = if value.is_omega() { None } else { Some(value) };
        let tree = self.tree.set(idx, slot).canonicalize();
        Tuple::from_tree(tree)
    }

    fn from_tree(tree: PosTree<Specifier>) -> Tuple {
        let mut hash = 0u64;
        for (i, e) in tree.iter().enumerate() {
            if let Some(e) = e {
                hash ^= elem_hash(i, e);
            }
        }
        Tuple { tree, hash }
    }

    pub fn elements(&self) -> Vec<Specifier> {
        self.tree.iter().map(|e| e.cloned().unwrap_or(Specifier::Omega)).collect()
    }

    /// Concatenation (`+`): appends `other`'s elements after `self`'s,
    /// then canonicalizes.
    pub fn concat(&self, other: &Tuple) -> Tuple {
        let mut elems = self.elements();
        elems.extend(other.elements());
        Tuple::from_elements(elems)
    }

    /// 1-based, inclusive `[start, end]` slice.
    pub fn slice(&self, start: i64, end: i64) -> Tuple {
        if end < start {
            return Tuple::empty();
        }
        let mut out = Vec::new();
        let mut i = start;
        while i <= end {
            out.push(self.get(i));
            i += 1;
        }
        Tuple::from_elements(out)
    }

    /// Slice assignment: replaces `target[start..end)` (0-based, half-open)
    /// with `source`'s elements.
    ///
    /// 1. Copy target[0..start) into a fresh result.
    /// 2. Append source[0..len(source)) into the result.
    /// 3. Append target[end..len(target)) into the result.
    /// 4. Strip trailing omegas and shrink height (via [`Tuple::from_elements`]).
    pub fn slice_assign(target: &Tuple, start: usize, end: usize, source: &Tuple) -> Tuple {
        let mut result = Vec::new();
        let target_elems = target.elements();
        result.extend(target_elems.iter().take(start).cloned());
        result.extend(source.elements());
        if end < target_elems.len() {
            result.extend(target_elems[end..].iter().cloned());
        }
        Tuple::from_elements(result)
    }

    /// `fromb`: extracts the first element, delivering `(element, rest)`.
    pub fn from_first(&self) -> (Specifier, Tuple) {
        if self.is_empty() {
            return (Specifier::Omega, self.clone());
        }
        let elems = self.elements();
        (elems[0].clone(), Tuple::from_elements(elems[1..].to_vec()))
    }

    /// `frome`: extracts the last element, delivering `(element, rest)`.
    pub fn from_last(&self) -> (Specifier, Tuple) {
        if self.is_empty() {
            return (Specifier::Omega, self.clone());
        }
        let mut elems = self.elements();
        let last = elems.pop().unwrap();
        (last, Tuple::from_elements(elems))
    }

    pub fn value_eq(&self, other: &Tuple) -> bool {
        if self.len() != other.len() || self.hash != other.hash {
            return false;
        }
        self.elements().iter().zip(other.elements().iter()).all(|(a, b)| value_eq(a, b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_with_empty_is_identity() {
        let t = Tuple::from_elements(vec![Specifier::int(1), Specifier::int(2)]);
        let empty = Tuple::empty();
        assert!(t.concat(&empty).value_eq(&t));
        assert!(empty.concat(&t).value_eq(&t));
    }

    #[test]
    fn slice_extracts_inclusive_range() {
        // [10, 20, 30](2..3) -> [20, 30].
        let t = Tuple::from_elements(vec![Specifier::int(10), Specifier::int(20), Specifier::int(30)]);
        let sliced = t.slice(2, 3);
        assert!(sliced.value_eq(&Tuple::from_elements(vec![Specifier::int(20), Specifier::int(30)])));
    }

    #[test]
    fn clearing_trailing_slot_strips_it() {
        let t = Tuple::from_elements(vec![Specifier::int(1), Specifier::int(2), Specifier::int(3)]);
        let t = t.set(3, Specifier::Omega);
        assert_eq!(t.len(), 2);
        assert!(value_eq(&t.get(1), &Specifier::int(1)));
        assert!(value_eq(&t.get(2), &Specifier::int(2)));
    }

    #[test]
    fn clearing_an_interior_slot_does_not_strip_a_later_one() {
        // Canonicalization strips only *trailing* omegas: clearing position
        // 2 of [1,2,3] leaves position 3 (value 3) as the non-omega tail,
        // so the tuple keeps its length.
        let t = Tuple::from_elements(vec![Specifier::int(1), Specifier::int(2), Specifier::int(3)]);
        let t = t.set(2, Specifier::Omega);
        assert_eq!(t.len(), 3);
        assert!(t.get(2).is_omega());
    }

    #[test]
    fn clearing_middle_slot_keeps_length() {
        let t = Tuple::from_elements(vec![Specifier::int(1), Specifier::int(2), Specifier::int(3)]);
        let t = t.set(2, Specifier::Omega);
        assert_eq!(t.len(), 3);
        assert!(t.get(2).is_omega());
    }

    #[test]
    fn from_first_and_from_last_round_trip() {
        let t = Tuple::from_elements(vec![Specifier::int(1), Specifier::int(2), Specifier::int(3)]);
        let (first, rest) = t.from_first();
        assert!(value_eq(&first, &Specifier::int(1)));
        assert_eq!(rest.len(), 2);
        let (last, rest2) = t.from_last();
        assert!(value_eq(&last, &Specifier::int(3)));
        assert_eq!(rest2.len(), 2);
    }
}
