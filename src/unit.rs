//! Unit table: process-wide cache of loaded compiled modules. A "unit" is
//! a program, class, package, process class, or native
//! library binding; loading one by name installs an [`UnitEntry`] here and
//! returns its stable [`UnitId`].

use crate::interp::opcode::Instruction;
use crate::interp::procedure::ProcRef;
use crate::slot::SlotInfoArray;
use crate::value::specifier::Specifier;
use std::cell::RefCell;
use std::collections::HashMap;

/// Stable index into the process-wide [`UnitTable`], which interns unit
/// names and caches their loaded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(pub u32);

/// Each inherited unit must be a class; each imported unit must be a
/// package, not a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Program,
    Class,
    Package,
    Process,
    Native,
}

impl UnitKind {
    pub fn can_be_inherited(self) -> bool {
        matches!(self, UnitKind::Class | UnitKind::Process)
    }

    pub fn can_be_imported(self) -> bool {
        matches!(self, UnitKind::Package)
    }
}

/// A fully loaded unit. Code and literal pools
/// are immutable after load; the spec block and error-extension map are
/// mutated during execution (spec-block slots hold running state, the
/// error map can be extended at runtime by `m_user`-style registration).
#[derive(Debug)]
pub struct UnitEntry {
    pub name: String,
    pub kind: UnitKind,
    pub source_timestamp: i64,
    /// Flattened unit vector: index 0 is always the
    /// predefined/built-in pseudo-unit, index 1 is self, then recursively
    /// loaded inherited units (propagated into ancestors' vectors), then
    /// imported units (not propagated).
    pub unit_vector: Vec<UnitId>,
    /// Subset of `unit_vector` reachable via inheritance only, used to
    /// propagate a newly loaded ancestor into every descendant's vector
    /// splices it into every ancestor's flattened unit vector.
    pub inherited: Vec<UnitId>,
    pub slot_info: SlotInfoArray,
    /// The unit's specifier data block: local variables, literal pools,
    /// and (for a running program) working storage.
    pub spec_block: RefCell<Vec<Specifier>>,
    pub init_code: Vec<Instruction>,
    pub body_code: Vec<Instruction>,
    /// Public symbol stream: name -> procedure, used for reflective
    /// lookup and error-extension registration.
    pub public_symbols: HashMap<String, ProcRef>,
    /// Per-unit error-extension map: string -> recovery procedure, built
    /// from (and extensible beyond) `public_symbols`.
    pub error_extensions: RefCell<HashMap<String, ProcRef>>,
    /// Whether the initialization code has already run — run at most once
    /// per unit, even if re-referenced from multiple imports, then
    /// discarded.
    pub initialized: RefCell<bool>,
}

impl UnitEntry {
    pub fn new(name: String, kind: UnitKind, source_timestamp: i64, spec_count: usize) -> Self {
        UnitEntry {
            name,
            kind,
            source_timestamp,
            unit_vector: Vec::new(),
            inherited: Vec::new(),
            slot_info: SlotInfoArray::new(),
            // sized to the declared specifier count plus one.
            spec_block: RefCell::new(vec![Specifier::Omega; spec_count + 1]),
            init_code: Vec::new(),
            body_code: Vec::new(),
            public_symbols: HashMap::new(),
            error_extensions: RefCell::new(HashMap::new()),
            initialized: RefCell::new(false),
        }
    }

    pub fn lookup_error_handler(&self, name: &str) -> Option<ProcRef> {
        self.error_extensions.borrow().get(name).cloned()
    }

    pub fn register_error_handler(&self, name: String, handler: ProcRef) {
        self.error_extensions.borrow_mut().insert(name, handler);
    }
}

/// Process-wide unit table: loading a unit by name that is already
/// cached simply returns the existing id.
#[derive(Debug, Default)]
pub struct UnitTable {
    entries: Vec<UnitEntry>,
    by_name: HashMap<String, UnitId>,
}

impl UnitTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, name: &str) -> Option<UnitId> {
        self.by_name.get(name).copied()
    }

    pub fn insert(&mut self, entry: UnitEntry) -> UnitId {
        let id = UnitId(self.entries.len() as u32);
        self.by_name.insert(entry.name.clone(), id);
        self.entries.push(entry);
        id
    }

    pub fn get(&self, id: UnitId) -> &UnitEntry {
        &self.entries[id.0 as usize]
    }

    /// Only used by `loader::load_unit` to fill in the fields (unit
    /// vector, slot info, code, literals) that aren't known until after
    /// the entry's id is reserved.
    pub fn get_mut(&mut self, id: UnitId) -> &mut UnitEntry {
        &mut self.entries[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Propagates a newly loaded unit's id into every already-loaded unit
    /// that inherits from it transitively. Since
    /// units load bottom-up (ancestors before descendants reference them),
    /// this crate resolves propagation at load time in `loader::load_unit`
    /// rather than by rewriting already-loaded vectors.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }
}
