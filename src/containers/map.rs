//! Map container operations, including the map-cell invariant.

use super::set::SetHeader;
use super::trie::{Header, TrieItem, HEADER_SIZE, SHIFT_DIST};
use crate::value::specifier::{value_eq, value_hash, Specifier};
use std::rc::Rc;

/// The range of a map cell: either single-valued or a value set, since
/// each map cell is either single-valued or carries a value set.
#[derive(Debug, Clone)]
pub enum MapValue {
    Single(Specifier),
    Multi(Rc<SetHeader>),
}

impl MapValue {
    pub fn is_multi_val(&self) -> bool {
        matches!(self, MapValue::Multi(_))
    }
}

#[derive(Debug, Clone)]
pub struct MapCell {
    pub key: Specifier,
    pub value: MapValue,
}

impl TrieItem for MapCell {
    fn hash_code(&self) -> u64 {
        value_hash(&self.key)
    }
    fn same_key(&self, other: &Self) -> bool {
        value_eq(&self.key, &other.key)
    }
}

pub type MapHeader = Header<MapCell, HEADER_SIZE, SHIFT_DIST>;

impl MapHeader {
    pub fn empty() -> Rc<MapHeader> {
        Rc::new(MapHeader::new())
    }

    /// Sinister single-value insert/replace (`sof`): if the key is already
    /// multi-valued this promotes the new scalar to a singleton set and
    /// unions it in, keeping the cell multi-valued.
    pub fn set_single(&self, key: Specifier, value: Specifier) -> MapHeader {
        if let Some(existing) = self.find_by(value_hash(&key), |c| value_eq(&c.key, &key)) {
            if let MapValue::Multi(set) = &existing.value {
                let set = set.with(value);
                return self.insert(MapCell { key, value: MapValue::Multi(set) }).0;
            }
        }
        self.insert(MapCell { key, value: MapValue::Single(value) }).0
    }

    /// Multi-valued sinister assignment (`sofa`): always stores (or
    /// unions into) a value set.
    pub fn set_multi(&self, key: Specifier, values: Rc<SetHeader>) -> MapHeader {
        self.insert(MapCell { key, value: MapValue::Multi(values) }).0
    }

    /// `with` on a map: insert a domain/range pair the way a set literal's
    /// `with` treats an element — the pair becomes (or extends) the range
    /// for its key instead of blindly overwriting.
    pub fn with_pair(&self, key: Specifier, value: Specifier) -> MapHeader {
        match self.find_by(value_hash(&key), |c| value_eq(&c.key, &key)) {
            None => self.insert(MapCell { key, value: MapValue::Single(value) }).0,
            Some(existing) => match &existing.value {
                MapValue::Single(old) => {
                    if value_eq(old, &value) {
                        self.clone()
                    } else {
                        let set = SetHeader::new().with(old.clone()).with(value);
                        self.insert(MapCell { key, value: MapValue::Multi(Rc::new(set)) }).0
                    }
                }
                MapValue::Multi(set) => {
                    let set = set.with(value);
                    self.insert(MapCell { key, value: MapValue::Multi(set) }).0
                }
            },
        }
    }

    pub fn less_key(&self, key: &Specifier) -> MapHeader {
        self.remove_by(value_hash(key), |c| value_eq(&c.key, key)).0
    }

    /// `of` (map apply): single-valued cell returns the range directly; a
    /// multi-value cell returns `omega` (single-apply to a multi-map is
    /// undefined); an absent key returns `omega`.
    pub fn apply(&self, key: &Specifier) -> Specifier {
        match self.find_by(value_hash(key), |c| value_eq(&c.key, key)) {
            None => Specifier::Omega,
            Some(cell) => match &cell.value {
                MapValue::Single(v) => v.clone(),
                MapValue::Multi(_) => Specifier::Omega,
            },
        }
    }

    /// `ofa`: always returns the value set, wrapping a single value into a
    /// singleton.
    pub fn apply_all(&self, key: &Specifier) -> Rc<SetHeader> {
        match self.find_by(value_hash(key), |c| value_eq(&c.key, key)) {
            None => SetHeader::empty(),
            Some(cell) => match &cell.value {
                MapValue::Single(v) => Rc::new(SetHeader::new().with(v.clone())),
                MapValue::Multi(set) => set.clone(),
            },
        }
    }

    pub fn domain(&self) -> Rc<SetHeader> {
        let mut set = SetHeader::new();
        for cell in self.cells() {
            set = set.with(cell.key.clone());
        }
        Rc::new(set)
    }

    pub fn range(&self) -> Rc<SetHeader> {
        let mut set = SetHeader::new();
        for cell in self.cells() {
            match &cell.value {
                MapValue::Single(v) => set = set.with(v.clone()),
                MapValue::Multi(vs) => {
                    for v in vs.elements() {
                        set = set.with(v);
                    }
                }
            }
        }
        Rc::new(set)
    }

    /// Re-materializes every `(key, value)` / `(key, value-set-element)`
    /// pair as a 2-tuple specifier; used by `binstr`'s map-as-a-set-of-
    /// 2-tuples encoding and by pair iteration.
    pub fn as_pairs(&self) -> Vec<Specifier> {
        let mut out = Vec::new();
        for cell in self.cells() {
            match &cell.value {
                MapValue::Single(v) => {
                    out.push(Specifier::Tuple(Rc::new(super::tuple::Tuple::from_elements(vec![
                        cell.key.clone(),
                        v.clone(),
                    ]))));
                }
                MapValue::Multi(vs) => {
                    for v in vs.elements() {
                        out.push(Specifier::Tuple(Rc::new(super::tuple::Tuple::from_elements(vec![
                            cell.key.clone(),
                            v,
                        ]))));
                    }
                }
            }
        }
        out
    }

    pub fn cells(&self) -> Vec<MapCell> {
        self.iter_items()
    }

    pub fn contains_key(&self, key: &Specifier) -> bool {
        self.find_by(value_hash(key), |c| value_eq(&c.key, key)).is_some()
    }

    pub fn value_eq(&self, other: &MapHeader) -> bool {
        if self.len() != other.len() {
            return false;
        }
        self.cells().iter().all(|cell| match other.find_by(value_hash(&cell.key), |c| value_eq(&c.key, &cell.key)) {
            None => false,
            Some(other_cell) => match (&cell.value, &other_cell.value) {
                (MapValue::Single(a), MapValue::Single(b)) => value_eq(a, b),
                (MapValue::Multi(a), MapValue::Multi(b)) => a.value_eq(b),
                _ => false,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_apply_returns_value_directly() {
        let m = MapHeader::new().with_pair(Specifier::int(1), Specifier::string("a"));
        let v = m.apply(&Specifier::int(1));
        assert!(value_eq(&v, &Specifier::string("a")));
    }

    #[test]
    fn duplicate_key_promotes_to_multi_valued() {
        let m = MapHeader::new()
            .with_pair(Specifier::int(1), Specifier::string("a"))
            .with_pair(Specifier::int(1), Specifier::string("b"));
        assert!(value_eq(&m.apply(&Specifier::int(1)), &Specifier::Omega));
        let all = m.apply_all(&Specifier::int(1));
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn ofa_wraps_single_value_as_singleton() {
        let m = MapHeader::new().with_pair(Specifier::int(1), Specifier::string("a"));
        let all = m.apply_all(&Specifier::int(1));
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn domain_and_range() {
        let m = MapHeader::new()
            .with_pair(Specifier::int(1), Specifier::string("a"))
            .with_pair(Specifier::int(2), Specifier::string("b"));
        assert_eq!(m.domain().len(), 2);
        assert_eq!(m.range().len(), 2);
    }
}
