//! Set container operations.

use super::trie::{Header, HEADER_SIZE, SHIFT_DIST};
use crate::value::specifier::{value_hash, Specifier};
use std::rc::Rc;

pub type SetHeader = Header<Specifier, HEADER_SIZE, SHIFT_DIST>;

impl SetHeader {
    pub fn empty() -> Rc<SetHeader> {
        Rc::new(SetHeader::new())
    }

    /// `with`: insert `elem`, returning a new header via the usual
    /// sequence: hash, descend, splice-or-bail, XOR hash, grow as needed.
    /// `s with e with e = s with e` falls out because inserting an
    /// already-present element replaces it with an equal value, leaving
    /// the count and cached hash unchanged.
    pub fn with(&self, elem: Specifier) -> SetHeader {
        self.insert(elem).0
    }

    /// `less`: remove `elem` if present; a no-op on absent elements.
    pub fn less(&self, elem: &Specifier) -> SetHeader {
        self.remove_by(value_hash(elem), |e| crate::value::specifier::value_eq(e, elem)).0
    }

    pub fn contains(&self, elem: &Specifier) -> bool {
        self.find_by(value_hash(elem), |e| crate::value::specifier::value_eq(e, elem)).is_some()
    }

    /// `from`: extracts an arbitrary element, delivering `(element, rest)`.
    /// On empty input the element is `omega` and the container is left
    /// empty.
    pub fn from_arb(&self) -> (Specifier, SetHeader) {
        match self.arbitrary() {
            Some(elem) => {
                let elem = elem.clone();
                let rest = self.less(&elem);
                (elem, rest)
            }
            None => (Specifier::Omega, self.clone()),
        }
    }

    pub fn elements(&self) -> Vec<Specifier> {
        self.iter_items()
    }

    /// Deep value equality between two set headers: same cardinality and
    /// cached hash (cheap reject), then every element of one is present in
    /// the other.
    pub fn value_eq(&self, other: &SetHeader) -> bool {
        if self.len() != other.len() || self.cached_hash() != other.cached_hash() {
            return false;
        }
        self.elements().iter().all(|e| other.contains(e))
    }

    pub fn union(&self, other: &SetHeader) -> SetHeader {
        let mut result = self.clone();
        for e in other.elements() {
            result = result.with(e);
        }
        result
    }

    pub fn intersection(&self, other: &SetHeader) -> SetHeader {
        let mut result = SetHeader::new();
        for e in self.elements() {
            if other.contains(&e) {
                result = result.with(e);
            }
        }
        result
    }

    pub fn difference(&self, other: &SetHeader) -> SetHeader {
        let mut result = self.clone();
        for e in other.elements() {
            result = result.less(&e);
        }
        result
    }

    pub fn is_subset_of(&self, other: &SetHeader) -> bool {
        self.elements().iter().all(|e| other.contains(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_is_idempotent() {
        let s = SetHeader::new().with(Specifier::int(2));
        let s2 = s.with(Specifier::int(2));
        assert_eq!(s.len(), s2.len());
        assert!(s.value_eq(&s2));
    }

    #[test]
    fn cardinality_formula() {
        let s = SetHeader::new();
        let s = s.with(Specifier::int(1)).with(Specifier::int(2)).with(Specifier::int(3));
        assert_eq!(s.len(), 3);
        let s2 = s.with(Specifier::int(2));
        assert_eq!(s2.len(), s.len());
        let s3 = s.with(Specifier::int(4));
        assert_eq!(s3.len(), s.len() + 1);
    }

    #[test]
    fn from_arb_empties_and_round_trips() {
        let s = SetHeader::new().with(Specifier::int(1)).with(Specifier::int(2));
        let (elem, rest) = s.from_arb();
        assert!(!elem.is_omega());
        assert_eq!(rest.len(), 1);
        let restored = rest.with(elem);
        assert!(restored.value_eq(&s));
    }

    #[test]
    fn from_arb_on_empty_yields_omega() {
        let s = SetHeader::new();
        let (elem, rest) = s.from_arb();
        assert!(elem.is_omega());
        assert_eq!(rest.len(), 0);
    }
}
