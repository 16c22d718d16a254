//! The uniform tagged runtime value.
//!
//! `Specifier` is a plain Rust enum rather than the original's
//! fixed-size-payload `struct specifier_item` union: a tagged enum already
//! gives "the form tag strictly determines which payload field is live"
//! for free from the compiler, so there is no manual "biggest alias"
//! union to maintain . `Clone` on a `Specifier` is the
//! "marking" operation of (it bumps the pointed-to `Rc`'s
//! strong count); `Drop` is "unmarking".

use crate::containers::map::MapHeader;
use crate::containers::set::SetHeader;
use crate::containers::tuple::Tuple;
use crate::interp::iterator::IterRef;
use crate::interp::opcode::Label;
use crate::interp::procedure::ProcRef;
use crate::io::file::FileRef;
use crate::object::header::ObjectRef;
use crate::process::mailbox::MailboxRef;
use crate::symbol::AtomId;
use crate::value::integer::Integer;
use crate::value::string::DxString;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Uninterpreted native pointer payload. Out of scope beyond round-tripping
/// identity; no native-library call surface is implemented by this crate.
#[derive(Debug)]
pub struct OpaqueData(pub u64);

/// The form tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Form {
    Omega,
    Atom,
    Short,
    Long,
    Real,
    String,
    Set,
    Map,
    Tuple,
    Object,
    Process,
    Mailbox,
    Proc,
    Iter,
    File,
    Label,
    Opaque,
}

impl Form {
    /// Forms whose `binstr` encoding requires same-process-lifetime
    /// deserialization, except the predefined `true`/`false` atoms which
    /// are always accepted.
    pub fn is_non_portable(self) -> bool {
        matches!(self, Form::Proc | Form::Iter | Form::Mailbox | Form::Label | Form::Opaque | Form::File | Form::Atom)
    }
}

#[derive(Debug, Clone)]
pub enum Specifier {
    Omega,
    Atom(AtomId),
    Int(Integer),
    Real(Rc<f64>),
    Str(DxString),
    Set(Rc<SetHeader>),
    Map(Rc<MapHeader>),
    Tuple(Rc<Tuple>),
    Object(ObjectRef),
    Process(ObjectRef),
    Mailbox(MailboxRef),
    Proc(ProcRef),
    Iter(IterRef),
    File(FileRef),
    Label(Label),
    Opaque(Rc<OpaqueData>),
}

impl Specifier {
    pub fn form(&self) -> Form {
        match self {
            Specifier::Omega => Form::Omega,
            Specifier::Atom(_) => Form::Atom,
            Specifier::Int(Integer::Short(_)) => Form::Short,
            Specifier::Int(Integer::Long(_)) => Form::Long,
            Specifier::Real(_) => Form::Real,
            Specifier::Str(_) => Form::String,
            Specifier::Set(_) => Form::Set,
            Specifier::Map(_) => Form::Map,
            Specifier::Tuple(_) => Form::Tuple,
            Specifier::Object(_) => Form::Object,
            Specifier::Process(_) => Form::Process,
            Specifier::Mailbox(_) => Form::Mailbox,
            Specifier::Proc(_) => Form::Proc,
            Specifier::Iter(_) => Form::Iter,
            Specifier::File(_) => Form::File,
            Specifier::Label(_) => Form::Label,
            Specifier::Opaque(_) => Form::Opaque,
        }
    }

    pub fn is_omega(&self) -> bool {
        matches!(self, Specifier::Omega)
    }

    pub fn real(v: f64) -> Self {
        Specifier::Real(Rc::new(v))
    }

    pub fn int(v: i64) -> Self {
        Specifier::Int(Integer::Short(v))
    }

    pub fn string(s: impl Into<DxString>) -> Self {
        Specifier::Str(s.into())
    }

    pub fn truthy(&self) -> bool {
        matches!(self, Specifier::Atom(a) if *a == crate::symbol::ATOM_TRUE)
    }

    pub fn boolean(value: bool) -> Self {
        Specifier::Atom(if value { crate::symbol::ATOM_TRUE } else { crate::symbol::ATOM_FALSE })
    }
}

/// Deep value equality ('s round-trip/equality laws operate on
/// value semantics, not pointer identity). Composite forms short-circuit on
/// the cached XOR hash before descending into element-wise comparison.
pub fn value_eq(a: &Specifier, b: &Specifier) -> bool {
    use Specifier::*;
    match (a, b) {
        (Omega, Omega) => true,
        (Atom(x), Atom(y)) => x == y,
        (Int(x), Int(y)) => x == y,
        (Real(x), Real(y)) => x == y,
        (Str(x), Str(y)) => x == y,
        (Set(x), Set(y)) => Rc::ptr_eq(x, y) || x.value_eq(y),
        (Map(x), Map(y)) => Rc::ptr_eq(x, y) || x.value_eq(y),
        (Tuple(x), Tuple(y)) => Rc::ptr_eq(x, y) || x.value_eq(y),
        (Object(x), Object(y)) => Rc::ptr_eq(x, y),
        (Process(x), Process(y)) => Rc::ptr_eq(x, y),
        (Mailbox(x), Mailbox(y)) => Rc::ptr_eq(x, y),
        (Proc(x), Proc(y)) => Rc::ptr_eq(x, y),
        (Iter(x), Iter(y)) => Rc::ptr_eq(x, y),
        (File(x), File(y)) => Rc::ptr_eq(x, y),
        (Label(x), Label(y)) => x == y,
        (Opaque(x), Opaque(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

/// Value hash consistent with [`value_eq`] . Composite forms
/// reuse their container's cached XOR hash rather than rehashing elements.
pub fn value_hash(s: &Specifier) -> u64 {
    let mut h = std::collections::hash_map::DefaultHasher::new();
    s.form().hash(&mut h);
    match s {
        Specifier::Omega => {}
        Specifier::Atom(a) => a.0.hash(&mut h),
        Specifier::Int(i) => i.hash(&mut h),
        Specifier::Real(r) => r.to_bits().hash(&mut h),
        Specifier::Str(s) => s.as_str().hash(&mut h),
        Specifier::Set(set) => set.cached_hash().hash(&mut h),
        Specifier::Map(map) => map.cached_hash().hash(&mut h),
        Specifier::Tuple(t) => t.cached_hash().hash(&mut h),
        Specifier::Object(o) | Specifier::Process(o) => (Rc::as_ptr(o) as usize).hash(&mut h),
        Specifier::Mailbox(m) => (Rc::as_ptr(m) as usize).hash(&mut h),
        Specifier::Proc(p) => (Rc::as_ptr(p) as usize).hash(&mut h),
        Specifier::Iter(i) => (Rc::as_ptr(i) as usize).hash(&mut h),
        Specifier::File(f) => (Rc::as_ptr(f) as usize).hash(&mut h),
        Specifier::Label(l) => l.hash(&mut h),
        Specifier::Opaque(o) => (Rc::as_ptr(o) as usize).hash(&mut h),
    }
    h.finish()
}

impl crate::containers::trie::TrieItem for Specifier {
    fn hash_code(&self) -> u64 {
        value_hash(self)
    }
    fn same_key(&self, other: &Self) -> bool {
        value_eq(self, other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_eq_distinguishes_forms() {
        assert!(!value_eq(&Specifier::int(1), &Specifier::real(1.0)));
        assert!(value_eq(&Specifier::int(1), &Specifier::int(1)));
    }

    #[test]
    fn hash_is_consistent_with_eq() {
        let a = Specifier::string("hello");
        let b = Specifier::string("hello");
        assert!(value_eq(&a, &b));
        assert_eq!(value_hash(&a), value_hash(&b));
    }
}
