//! Atom table and name interning.
//!
//! An atom is a globally unique identifier drawn from a monotonically
//! increasing counter. The same table is reused to intern the strings
//! backing unit and slot names, so that repeated lookups compare by
//! integer id rather than by string.

use indexmap::IndexSet;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A globally unique atom id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AtomId(pub u32);

impl fmt::Display for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An interned name id, dense and zero-based, distinct from [`AtomId`] so
/// that string interning (cheap, reusable across unit/slot tables) doesn't
/// consume the atom counter used for user-visible `atom` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NameId(pub u32);

/// Process-wide interner for name strings, shared by the unit and slot
/// tables . Backed by an `IndexSet` so the dense integer id
/// is simply the insertion index.
#[derive(Debug, Default)]
pub struct NameTable {
    names: IndexSet<Rc<str>>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `name`, returning its dense id. Idempotent.
    pub fn intern(&mut self, name: &str) -> NameId {
        if let Some(idx) = self.names.get_index_of(name) {
            return NameId(idx as u32);
        }
        let (idx, _) = self.names.insert_full(Rc::from(name));
        NameId(idx as u32)
    }

    pub fn resolve(&self, id: NameId) -> Option<&str> {
        self.names.get_index(id.0 as usize).map(|s| s.as_ref())
    }

    pub fn lookup(&self, name: &str) -> Option<NameId> {
        self.names.get_index_of(name).map(|idx| NameId(idx as u32))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Process-wide atom counter ( "the atom counter" is listed among
/// the process-wide state). The predefined `true`/`false` atoms are
/// reserved at fixed ids 0 and 1 so that `binstr`'s "always accepted"
/// exception can check by id without a table lookup.
#[derive(Debug)]
pub struct AtomTable {
    next: u32,
}

pub const ATOM_FALSE: AtomId = AtomId(0);
pub const ATOM_TRUE: AtomId = AtomId(1);

impl Default for AtomTable {
    fn default() -> Self {
        AtomTable { next: 2 }
    }
}

impl AtomTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh, never-before-seen atom id.
    pub fn fresh(&mut self) -> AtomId {
        let id = AtomId(self.next);
        self.next += 1;
        id
    }
}

/// Shared handle to the process-wide atom counter, cheaply cloneable so the
/// interpreter, loader, and file map can each hold a reference (
/// "process-wide state ... mutation points are during I/O primitives and
/// unit loading, both of which run in the single thread").
pub type SharedAtomTable = Rc<RefCell<AtomTable>>;

pub fn new_shared_atom_table() -> SharedAtomTable {
    Rc::new(RefCell::new(AtomTable::new()))
}
