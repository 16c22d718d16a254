//! Object header: instance variables addressed by slot position, plus an
//! optional process record backing `object`/`process` form values.

use crate::containers::postree::PosTree;
use crate::unit::UnitId;
use crate::value::specifier::Specifier;
use std::cell::RefCell;
use std::rc::Rc;

/// Lightweight-process bookkeeping carried directly on the object header
/// for `process`-form specifiers: a process value is a pointer to an
/// object header with an optional process record attached.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pub status: ProcessStatus,
    pub mailbox: crate::process::mailbox::MailboxRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Runnable,
    /// Blocked on an empty mailbox receive.
    WaitingOnMailbox,
    Terminated,
}

/// Object/process header tree: same shape as tuples, but for instance
/// variables instead of positional elements. `class` identifies the
/// defining unit for slot-info lookups.
#[derive(Debug)]
pub struct ObjectHeader {
    pub class: UnitId,
    vars: RefCell<PosTree<Specifier>>,
    pub process: RefCell<Option<ProcessRecord>>,
}

pub type ObjectRef = Rc<ObjectHeader>;

impl ObjectHeader {
    /// Allocates a fresh object with all `var_count` instance variables
    /// `omega`; `initobj` then runs the class's field initializers over
    /// this blank header.
    pub fn new(class: UnitId, var_count: usize) -> ObjectRef {
        let mut vars = PosTree::new();
        for _ in 0..var_count {
            vars = vars.push(Specifier::Omega);
        }
        Rc::new(ObjectHeader { class, vars: RefCell::new(vars), process: RefCell::new(None) })
    }

    pub fn new_process(class: UnitId, var_count: usize, mailbox: crate::process::mailbox::MailboxRef) -> ObjectRef {
        let obj = ObjectHeader::new(class, var_count);
        *obj.process.borrow_mut() = Some(ProcessRecord { status: ProcessStatus::Runnable, mailbox });
        obj
    }

    pub fn get_var(&self, position: u32) -> Specifier {
        self.vars.borrow().get(position as usize).cloned().unwrap_or(Specifier::Omega)
    }

    pub fn var_count(&self) -> usize {
        self.vars.borrow().len()
    }
}

/// Copy-on-write helper: centralizes the use-count==1 check in a
/// `make_mut` helper rather than duplicating it at every mutation site.
/// Slot assignment (`sslot`) always routes through this:
/// if `obj` is uniquely held its `RefCell` is mutated in place; otherwise a
/// fresh header sharing the same instance-variable tree (cheap, `Rc`-backed)
/// is allocated and mutated instead, leaving every other observer's view
/// of the original header untouched.
pub fn make_mut(obj: &ObjectRef) -> ObjectRef {
    if Rc::strong_count(obj) == 1 {
        obj.clone()
    } else {
        Rc::new(ObjectHeader {
            class: obj.class,
            vars: RefCell::new(obj.vars.borrow().clone()),
            process: RefCell::new(obj.process.borrow().clone()),
        })
    }
}

/// Sets instance variable `position` on `obj` under the copy-on-write rule
/// above, returning the (possibly new) object the caller must rebind its
/// specifier to.
pub fn set_var(obj: &ObjectRef, position: u32, value: Specifier) -> ObjectRef {
    let obj = make_mut(obj);
    let slot = if value.is_omega() { None } else { Some(value) };
    let new_vars = obj.vars.borrow().set(position as usize, slot);
    *obj.vars.borrow_mut() = new_vars;
    obj
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_object_vars_are_omega() {
        let obj = ObjectHeader::new(UnitId(0), 3);
        assert!(obj.get_var(0).is_omega());
        assert!(obj.get_var(2).is_omega());
    }

    #[test]
    fn shared_object_is_not_mutated_in_place() {
        let obj = ObjectHeader::new(UnitId(0), 2);
        let snapshot = obj.clone();
        let updated = set_var(&obj, 0, Specifier::int(42));
        assert!(snapshot.get_var(0).is_omega());
        assert!(crate::value::specifier::value_eq(&updated.get_var(0), &Specifier::int(42)));
    }

    #[test]
    fn unique_object_mutates_in_place_and_keeps_identity() {
        let obj = ObjectHeader::new(UnitId(0), 2);
        let ptr_before = Rc::as_ptr(&obj);
        let updated = set_var(&obj, 0, Specifier::int(7));
        assert_eq!(Rc::as_ptr(&updated), ptr_before);
    }
}
