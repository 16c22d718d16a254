//! Iterator semantics by form . Iterators are not
//! restartable and are finite exactly when their source is.
//!
//! Set/map/tuple/string/integer iterators are pre-materialized into a flat
//! `Vec` at `iter`-construction time and walked by index; this matches
//! "state is a stack of (header, index, height)" in observable behavior
//! (deterministic header-tree order) without needing explicit parent
//! backpointers during the walk ( redesign note). Object
//! iterators delegate to user `m_iterstart`/`m_iternext` methods, which
//! requires invoking the bytecode engine — so `IterState::Object` only
//! holds the receiver; `interp::engine` drives it.

use crate::containers::map::MapHeader;
use crate::containers::set::SetHeader;
use crate::containers::tuple::Tuple;
use crate::object::ObjectRef;
use crate::value::specifier::Specifier;
use crate::value::string::DxString;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug)]
pub enum IterState {
    Flat { items: Vec<Specifier>, pos: usize },
    Object { obj: ObjectRef, started: bool },
}

pub type IterRef = Rc<RefCell<IterState>>;

impl IterState {
    fn flat(items: Vec<Specifier>) -> IterRef {
        Rc::new(RefCell::new(IterState::Flat { items, pos: 0 }))
    }

    /// "set: yields each element once, in header-tree order."
    pub fn from_set(set: &SetHeader) -> IterRef {
        IterState::flat(set.elements())
    }

    /// "map (as iterated as pairs): yields each domain/range pair;
    /// multi-value cells are expanded by nesting a value-set iterator" —
    /// realized here as pre-expansion into one 2-tuple per pair, which is
    /// observationally identical to nested iteration.
    pub fn from_map(map: &MapHeader) -> IterRef {
        IterState::flat(map.as_pairs())
    }

    /// "tuple: yields elements in positional order; `omega` slots are
    /// skipped."
    pub fn from_tuple(t: &Tuple) -> IterRef {
        IterState::flat(t.elements().into_iter().filter(|e| !e.is_omega()).collect())
    }

    /// "string: yields one-character strings."
    pub fn from_string(s: &DxString) -> IterRef {
        IterState::flat(s.as_str().chars().map(|c| Specifier::string(c.to_string())).collect())
    }

    /// "integer short: yields 1..n as a finite range."
    pub fn from_short_int(n: i64) -> IterRef {
        let items = if n < 1 { Vec::new() } else { (1..=n).map(Specifier::int).collect() };
        IterState::flat(items)
    }

    /// "object: invokes the user `m_iterstart` and `m_iternext` methods."
    pub fn from_object(obj: ObjectRef) -> IterRef {
        Rc::new(RefCell::new(IterState::Object { obj, started: false }))
    }

    /// Advances a non-object iterator. Returns `None` once exhausted.
    /// Panics (giveup-style) if called on an `Object` iterator — those are
    /// driven by `interp::engine` via user method calls.
    pub fn advance(&mut self) -> Option<Specifier> {
        match self {
            IterState::Flat { items, pos } => {
                if *pos >= items.len() {
                    None
                } else {
                    let v = items[*pos].clone();
                    *pos += 1;
                    Some(v)
                }
            }
            IterState::Object { .. } => {
                crate::error::giveup("IterState::advance called directly on an object iterator")
            }
        }
    }
}
