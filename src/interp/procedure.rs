//! Procedure values, spec blocks, closures, and the at-most-one-active-copy
//! re-entrance rule.

use crate::object::ObjectRef;
use crate::unit::UnitId;
use crate::value::specifier::Specifier;
use std::cell::RefCell;
use std::rc::Rc;

/// A procedure value: unit, code offset, formal count, and the spec-block
/// slice that holds its locals and saved state.
#[derive(Debug)]
pub struct ProcRecord {
    pub unit: UnitId,
    pub code_offset: u32,
    pub formal_count: u32,
    pub spec_block_base: u32,
    pub spec_block_len: u32,
    /// Parent procedure, for nested-closure chaining.
    pub parent: Option<ProcRef>,
    /// `Some` when this value is a bound method: `call` binds `self` to
    /// the enclosing object before executing.
    pub bound_self: Option<ObjectRef>,
    /// Closure environment captured by `penviron`: taking `penviron` of a
    /// procedure at run time creates a closure by saving a copy of the
    /// enclosing spec block.
    pub environment: RefCell<Option<Rc<Vec<Specifier>>>>,
    /// At-most-one-active-copy bookkeeping: how many activations of this
    /// procedure are currently on the call stack.
    active_uses: RefCell<u32>,
    /// Snapshots of locals saved on re-entry, restored LIFO on the
    /// matching `leave` — the original spec block is restored on the
    /// corresponding return.
    saved_blocks: RefCell<Vec<Vec<Specifier>>>,
}

pub type ProcRef = Rc<ProcRecord>;

impl ProcRecord {
    pub fn new(
        unit: UnitId,
        code_offset: u32,
        formal_count: u32,
        spec_block_base: u32,
        spec_block_len: u32,
        parent: Option<ProcRef>,
    ) -> ProcRef {
        Rc::new(ProcRecord {
            unit,
            code_offset,
            formal_count,
            spec_block_base,
            spec_block_len,
            parent,
            bound_self: None,
            environment: RefCell::new(None),
            active_uses: RefCell::new(0),
            saved_blocks: RefCell::new(Vec::new()),
        })
    }

    /// Binds `self` for method dispatch, producing a distinct procedure
    /// value that shares this one's code/unit/offset.
    pub fn bind_self(self: &ProcRef, obj: ObjectRef) -> ProcRef {
        Rc::new(ProcRecord {
            unit: self.unit,
            code_offset: self.code_offset,
            formal_count: self.formal_count,
            spec_block_base: self.spec_block_base,
            spec_block_len: self.spec_block_len,
            parent: self.parent.clone(),
            bound_self: Some(obj),
            environment: RefCell::new(self.environment.borrow().clone()),
            active_uses: RefCell::new(0),
            saved_blocks: RefCell::new(Vec::new()),
        })
    }

    /// `penviron`: closes over a copy of `locals`.
    pub fn capture_environment(self: &ProcRef, locals: &[Specifier]) -> ProcRef {
        *self.environment.borrow_mut() = Some(Rc::new(locals.to_vec()));
        self.clone()
    }

    /// Called when the engine pushes a call frame for this procedure. If
    /// this is a re-entry (recursion or re-entrant closure invocation),
    /// `current_locals` — the slot range's contents from the *previous*
    /// activation — is snapshotted so it can be restored later.
    pub fn enter(&self, current_locals: &[Specifier]) {
        let mut uses = self.active_uses.borrow_mut();
        if *uses > 0 {
            self.saved_blocks.borrow_mut().push(current_locals.to_vec());
        }
        *uses += 1;
    }

    /// Called on the matching `return`. Returns the snapshot to restore
    /// into the unit's spec block, if this activation was a re-entry.
    pub fn leave(&self) -> Option<Vec<Specifier>> {
        let mut uses = self.active_uses.borrow_mut();
        *uses -= 1;
        if *uses > 0 {
            self.saved_blocks.borrow_mut().pop()
        } else {
            None
        }
    }

    pub fn active_use_count(&self) -> u32 {
        *self.active_uses.borrow()
    }
}
