//! Global slot table.
//!
//! A slot is a globally-numbered named attribute used for object field
//! access and method lookup; the same dense numbering space is shared by
//! every class so that a slot id means the same thing regardless of which
//! class defines it: one `total_slot_count`-numbered table.

use crate::symbol::{NameId, NameTable};
use std::collections::HashMap;

/// Globally-numbered slot id: the slot table maps name strings to dense
/// integer ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(pub u32);

/// What a slot denotes for a particular class (step 7: "for
/// each slot id, whether that slot is an instance variable, a method, or
/// absent").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Absent,
    InstanceVar { position: u32 },
    Method,
}

/// Per-class slot metadata (step 7).
#[derive(Debug, Clone)]
pub struct SlotInfo {
    pub kind: SlotKind,
    pub is_public: bool,
    /// Unit index (into the owning unit's flattened unit vector) of the
    /// class that actually defines this slot — may differ from the class
    /// being queried when the slot is inherited.
    pub in_class: u32,
    /// For `SlotKind::Method`, the spec-block offset of the bound
    /// procedure literal.
    pub proc_offset: Option<u32>,
}

impl SlotInfo {
    pub fn absent() -> Self {
        SlotInfo { kind: SlotKind::Absent, is_public: false, in_class: 0, proc_offset: None }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self.kind, SlotKind::Absent)
    }

    pub fn is_method(&self) -> bool {
        matches!(self.kind, SlotKind::Method)
    }

    pub fn is_instance_var(&self) -> bool {
        matches!(self.kind, SlotKind::InstanceVar { .. })
    }
}

/// Process-wide slot name table: interns slot names into a single dense
/// numbering space.
#[derive(Debug, Default)]
pub struct SlotTable {
    names: NameTable,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// First-pass interning (pass 1): interns every slot name,
    /// independent of which class(es) use it.
    pub fn intern(&mut self, name: &str) -> SlotId {
        SlotId(self.names.intern(name).0)
    }

    pub fn lookup(&self, name: &str) -> Option<SlotId> {
        self.names.lookup(name).map(|NameId(id)| SlotId(id))
    }

    pub fn name_of(&self, slot: SlotId) -> Option<&str> {
        self.names.resolve(NameId(slot.0))
    }

    pub fn count(&self) -> u32 {
        self.names.len() as u32
    }
}

/// Per-class second pass: a dense array of [`SlotInfo`] indexed by
/// [`SlotId`] (pass 2 of slot loading). Instance variables occupy the
/// prefix `[0, var_count)` of a separate per-class position space,
/// tracked here via `instance_vars`.
#[derive(Debug, Clone, Default)]
pub struct SlotInfoArray {
    entries: HashMap<SlotId, SlotInfo>,
    /// Instance variable slot ids, indexed by declaration position.
    pub instance_vars: Vec<SlotId>,
}

impl SlotInfoArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: SlotId) -> SlotInfo {
        self.entries.get(&slot).cloned().unwrap_or_else(SlotInfo::absent)
    }

    pub fn declare_instance_var(&mut self, slot: SlotId, in_class: u32, is_public: bool) {
        let position = self.instance_vars.len() as u32;
        self.instance_vars.push(slot);
        self.entries.insert(
            slot,
            SlotInfo { kind: SlotKind::InstanceVar { position }, is_public, in_class, proc_offset: None },
        );
    }

    pub fn declare_method(&mut self, slot: SlotId, in_class: u32, is_public: bool, proc_offset: u32) {
        self.entries.insert(
            slot,
            SlotInfo { kind: SlotKind::Method, is_public, in_class, proc_offset: Some(proc_offset) },
        );
    }

    /// "obj height": `floor(log_base_OBJ_HEADER_SIZE(var_count))`.
    pub fn obj_height(&self) -> u32 {
        let var_count = self.instance_vars.len() as u32;
        if var_count <= 1 {
            return 0;
        }
        (var_count as f64).log(crate::containers::trie::OBJ_HEADER_SIZE as f64).floor() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_ids_are_stable_and_dense() {
        let mut table = SlotTable::new();
        let a = table.intern("x");
        let b = table.intern("y");
        let a2 = table.intern("x");
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(table.count(), 2);
    }

    #[test]
    fn instance_vars_form_dense_prefix() {
        let mut table = SlotTable::new();
        let s1 = table.intern("a");
        let s2 = table.intern("b");
        let mut info = SlotInfoArray::new();
        info.declare_instance_var(s1, 1, true);
        info.declare_instance_var(s2, 1, false);
        assert_eq!(info.instance_vars, vec![s1, s2]);
        assert!(info.get(s1).is_instance_var());
        assert!(info.get(s2).is_instance_var());
    }
}
