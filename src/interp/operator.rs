//! Operator dispatch protocol: form-case on the left operand, with
//! reflected-method fallback on the right via the `m_*`/`m_*_r` slot
//! names below.
//!
//! Keep the 1-1 correspondence between operator opcode and its `m_*` slot
//! name — do not fold left/right dispatch into one slot.

use crate::containers::set::SetHeader;
use crate::containers::tuple::Tuple as TupleContainer;
use crate::error::AbendError;
use crate::object::ObjectRef;
use crate::slot::SlotTable;
use crate::unit::UnitTable;
use crate::value::specifier::{value_eq, Specifier};
use std::rc::Rc;

/// Binary operators with an operator-dispatch protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mult,
    Div,
    Exp,
    Mod,
    Min,
    Max,
    With,
    Less,
    Lessf,
    Lt,
    In,
}

impl BinOp {
    /// The `(m_*, m_*_r)` slot names for reflected operator dispatch.
    pub fn slot_names(self) -> (&'static str, &'static str) {
        match self {
            BinOp::Add => ("m_add", "m_add_r"),
            BinOp::Sub => ("m_sub", "m_sub_r"),
            BinOp::Mult => ("m_mult", "m_mult_r"),
            BinOp::Div => ("m_div", "m_div_r"),
            BinOp::Exp => ("m_exp", "m_exp_r"),
            BinOp::Mod => ("m_mod", "m_mod_r"),
            BinOp::Min => ("m_min", "m_min_r"),
            BinOp::Max => ("m_max", "m_max_r"),
            BinOp::With => ("m_with", "m_with_r"),
            BinOp::Less => ("m_less", "m_less_r"),
            BinOp::Lessf => ("m_lessf", "m_lessf_r"),
            BinOp::Lt => ("m_lt", "m_lt_r"),
            BinOp::In => ("m_in", "m_in_r"),
        }
    }
}

/// Outcome of attempting to evaluate a binary operator.
pub enum Outcome {
    /// A built-in pair of forms produced a result directly.
    Value(Specifier),
    /// Neither operand was a recognized built-in pair, but one side is an
    /// `object`/`process` with a public `m_*`/`m_*_r` method — the engine
    /// must invoke it with the other operand as sole argument.
    InvokeMethod { receiver: ObjectRef, method_slot: u32, arg: Specifier },
    /// Neither a built-in pair nor a user method was found.
    TypeError,
}

/// Looks up a public method slot by name on `receiver`'s class: resolves
/// the name through the process-wide slot table, then checks the class's
/// own slot-info array for a public `Method` entry at that id, if present
/// and public per the call rules.
pub(crate) fn lookup_public_method(
    slot_table: &SlotTable,
    units: &UnitTable,
    receiver: &ObjectRef,
    name: &str,
) -> Option<u32> {
    let slot_id = slot_table.lookup(name)?;
    let info = units.get(receiver.class).slot_info.get(slot_id);
    if info.is_method() && info.is_public {
        Some(slot_id.0)
    } else {
        None
    }
}

/// Attempts the built-in evaluation for `op` over `(left, right)`. Returns
/// `None` if the form pair isn't a recognized built-in combination (the
/// caller then falls through to method dispatch).
pub fn eval_builtin(op: BinOp, left: &Specifier, right: &Specifier) -> Option<Result<Specifier, AbendError>> {
    use Specifier::*;
    match (op, left, right) {
        (BinOp::Add, Int(a), Int(b)) => Some(Ok(Int(a.checked_add(b)))),
        (BinOp::Add, Real(a), Real(b)) => Some(Ok(Specifier::real(**a + **b))),
        (BinOp::Add, Str(a), Str(b)) => Some(Ok(Str(a.concat(b)))),
        (BinOp::Add, Tuple(a), Tuple(b)) => Some(Ok(Specifier::Tuple(Rc::new(a.concat(b))))),

        (BinOp::Sub, Int(a), Int(b)) => Some(Ok(Int(a.checked_sub(b)))),
        (BinOp::Sub, Real(a), Real(b)) => Some(Ok(Specifier::real(**a - **b))),
        (BinOp::Sub, Set(a), Set(b)) => Some(Ok(Specifier::Set(Rc::new(a.difference(b))))),

        (BinOp::Mult, Int(a), Int(b)) => Some(Ok(Int(a.checked_mul(b)))),
        (BinOp::Mult, Real(a), Real(b)) => Some(Ok(Specifier::real(**a * **b))),
        (BinOp::Mult, Set(a), Set(b)) => Some(Ok(Specifier::Set(Rc::new(a.intersection(b))))),

        (BinOp::Div, Int(a), Int(b)) => match a.checked_div(b) {
            Some(r) => Some(Ok(Int(r))),
            None => Some(Err(AbendError::DivisionByZero)),
        },
        (BinOp::Div, Real(a), Real(b)) => {
            if **b == 0.0 {
                Some(Err(AbendError::DivisionByZero))
            } else {
                Some(Ok(Specifier::real(**a / **b)))
            }
        }

        (BinOp::Mod, Int(a), Int(b)) => match a.checked_mod(b) {
            Some(r) => Some(Ok(Int(r))),
            None => Some(Err(AbendError::DivisionByZero)),
        },

        (BinOp::Exp, Int(a), Int(b)) => Some(Ok(Int(a.pow(b)))),

        (BinOp::Min, Int(a), Int(b)) => Some(Ok(Int(a.clone().min(b.clone())))),
        (BinOp::Max, Int(a), Int(b)) => Some(Ok(Int(a.clone().max(b.clone())))),

        (BinOp::With, Set(s), elem) => Some(Ok(Specifier::Set(Rc::new(s.with(elem.clone()))))),
        (BinOp::With, Tuple(t), elem) => {
            let mut elems = t.elements();
            elems.push(elem.clone());
            Some(Ok(Specifier::Tuple(Rc::new(TupleContainer::from_elements(elems)))))
        }
        (BinOp::With, Map(m), Tuple(pair)) if pair.len() == 2 => {
            let key = pair.get(1);
            let value = pair.get(2);
            Some(Ok(Specifier::Map(Rc::new(m.with_pair(key, value)))))
        }

        (BinOp::Less, Set(s), elem) => Some(Ok(Specifier::Set(Rc::new(s.less(elem))))),
        (BinOp::Less, Map(m), key) => Some(Ok(Specifier::Map(Rc::new(m.less_key(key))))),

        (BinOp::Lessf, Map(m), key) => Some(Ok(Specifier::Map(Rc::new(m.less_key(key))))),

        (BinOp::Lt, Int(a), Int(b)) => Some(Ok(Specifier::boolean(a < b))),
        (BinOp::Lt, Real(a), Real(b)) => Some(Ok(Specifier::boolean(a < b))),
        (BinOp::Lt, Str(a), Str(b)) => Some(Ok(Specifier::boolean(a.as_str() < b.as_str()))),
        (BinOp::Lt, Set(a), Set(b)) => {
            Some(Ok(Specifier::boolean(a.is_subset_of(b) && a.len() != b.len())))
        }

        (BinOp::In, elem, Set(s)) => Some(Ok(Specifier::boolean(s.contains(elem)))),
        (BinOp::In, key, Map(m)) => Some(Ok(Specifier::boolean(m.contains_key(key)))),
        (BinOp::In, elem, Tuple(t)) => {
            Some(Ok(Specifier::boolean(t.elements().iter().any(|e| value_eq(e, elem)))))
        }

        _ => None,
    }
}

/// Full dispatch: try the built-in pair, then left-object method, then
/// reflected right-object method.
pub fn dispatch_binary(
    op: BinOp,
    left: &Specifier,
    right: &Specifier,
    units: &UnitTable,
    slot_table: &SlotTable,
) -> Outcome {
    if let Some(result) = eval_builtin(op, left, right) {
        return match result {
            Ok(v) => Outcome::Value(v),
            Err(_) => Outcome::TypeError,
        };
    }
    let (fwd, rev) = op.slot_names();
    if let Specifier::Object(obj) | Specifier::Process(obj) = left {
        if let Some(slot) = lookup_public_method(slot_table, units, obj, fwd) {
            return Outcome::InvokeMethod { receiver: obj.clone(), method_slot: slot, arg: right.clone() };
        }
    }
    if let Specifier::Object(obj) | Specifier::Process(obj) = right {
        if let Some(slot) = lookup_public_method(slot_table, units, obj, rev) {
            return Outcome::InvokeMethod { receiver: obj.clone(), method_slot: slot, arg: left.clone() };
        }
    }
    Outcome::TypeError
}

/// Outcome of attempting to evaluate a unary operation.
pub enum UnaryOutcome {
    /// A built-in form produced a result directly.
    Value(Specifier),
    /// The operand is an `object`/`process` with a public fallback method.
    InvokeMethod { receiver: ObjectRef, method_slot: u32 },
    /// Neither a built-in form nor a user method was found.
    TypeError,
}

/// The `m_*` slot name consulted when a unary built-in form doesn't match.
fn unary_slot_name(name: &str) -> &'static str {
    match name {
        "uminus" => "m_uminus",
        "arb" => "m_arb",
        "nelt" => "m_nelt",
        "domain" => "m_domain",
        "range" => "m_range",
        "pow" => "m_pow",
        "str" => "m_str",
        other => crate::error::giveup(&format!("unary_slot_name: unknown unary name {other}")),
    }
}

/// Unary operations with analogous object-method fallbacks: `arb`, `nelt`,
/// `domain`, `range`, `pow`, `uminus`, `str`, iterator start/next.
pub fn eval_unary_builtin(name: &str, operand: &Specifier) -> Option<Specifier> {
    match (name, operand) {
        ("uminus", Specifier::Int(i)) => Some(Specifier::Int(-i.clone())),
        ("uminus", Specifier::Real(r)) => Some(Specifier::real(-**r)),
        ("nelt", Specifier::Set(s)) => Some(Specifier::int(s.len() as i64)),
        ("nelt", Specifier::Map(m)) => Some(Specifier::int(m.len() as i64)),
        ("nelt", Specifier::Tuple(t)) => Some(Specifier::int(t.len() as i64)),
        ("nelt", Specifier::Str(s)) => Some(Specifier::int(s.len_chars() as i64)),
        ("arb", Specifier::Set(s)) => Some(s.from_arb().0),
        ("domain", Specifier::Map(m)) => Some(Specifier::Set(m.domain())),
        ("range", Specifier::Map(m)) => Some(Specifier::Set(m.range())),
        ("pow", Specifier::Set(s)) => Some(Specifier::Set(Rc::new(powerset(s)))),
        _ => None,
    }
}

/// The powerset of `s`, built by doubling a running collection of subsets
/// once per element.
fn powerset(s: &SetHeader) -> SetHeader {
    let mut power = vec![Rc::new(SetHeader::new())];
    for e in s.elements() {
        let mut grown = Vec::with_capacity(power.len() * 2);
        for subset in &power {
            grown.push(subset.clone());
            grown.push(Rc::new(subset.with(e.clone())));
        }
        power = grown;
    }
    let mut out = SetHeader::new();
    for subset in power {
        out = out.with(Specifier::Set(subset));
    }
    out
}

/// Full unary dispatch: try the built-in form, then the operand's
/// `m_*` method if it is an `object`/`process`.
pub fn dispatch_unary(name: &str, operand: &Specifier, units: &UnitTable, slot_table: &SlotTable) -> UnaryOutcome {
    if let Some(v) = eval_unary_builtin(name, operand) {
        return UnaryOutcome::Value(v);
    }
    if let Specifier::Object(obj) | Specifier::Process(obj) = operand {
        if let Some(slot) = lookup_public_method(slot_table, units, obj, unary_slot_name(name)) {
            return UnaryOutcome::InvokeMethod { receiver: obj.clone(), method_slot: slot };
        }
    }
    UnaryOutcome::TypeError
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::set::SetHeader;

    #[test]
    fn builtin_add_on_ints() {
        let out = eval_builtin(BinOp::Add, &Specifier::int(2), &Specifier::int(3));
        match out {
            Some(Ok(v)) => assert!(value_eq(&v, &Specifier::int(5))),
            _ => panic!("expected builtin add"),
        }
    }

    #[test]
    fn with_on_set_matches_container_op() {
        let s = Specifier::Set(Rc::new(SetHeader::new().with(Specifier::int(1))));
        let out = eval_builtin(BinOp::With, &s, &Specifier::int(2));
        match out {
            Some(Ok(Specifier::Set(s))) => assert_eq!(s.len(), 2),
            _ => panic!("expected with result"),
        }
    }

    #[test]
    fn unrecognized_pair_falls_through_to_none() {
        assert!(eval_builtin(BinOp::Add, &Specifier::Str("x".into()), &Specifier::int(1)).is_none());
    }

    #[test]
    fn division_by_zero_is_an_error_not_a_panic() {
        let out = eval_builtin(BinOp::Div, &Specifier::int(1), &Specifier::int(0));
        assert!(matches!(out, Some(Err(AbendError::DivisionByZero))));
    }
}
