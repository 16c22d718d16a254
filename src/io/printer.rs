//! Textual printer: hash-order printing, not value-sorted.
//!
//! Printing never sorts a set or map's elements into any canonical order —
//! it walks them exactly as `Header::iter_items`/`elements` deliver them
//! (insertion-derived header-tree order), matching the original's behavior
//! of printing whatever order the hash trie happens to hold.

use crate::interp::engine::Engine;
use crate::interp::operator;
use crate::value::integer::Integer;
use crate::value::specifier::Specifier;
use std::fmt::Write as _;

/// Renders `value` the way `print`/`str` would . Composite
/// forms recurse; `omega` prints as `om`, atoms print as `#<id>` except the
/// two predefined booleans, which print as `true`/`false`.
pub fn print_to_string(value: &Specifier) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Like [`print_to_string`], but consults `value`'s class for a public
/// `m_str` override before falling back to the built-in rendering — the
/// `print`/`printa`/`str` builtins go through this entry point so an object
/// can make itself printable.
pub fn print_with_engine(engine: &mut Engine, value: &Specifier) -> String {
    if let Specifier::Object(obj) | Specifier::Process(obj) = value {
        if let Some(slot) = operator::lookup_public_method(&engine.slots, &engine.units, obj, "m_str") {
            if let Ok(Specifier::Str(s)) = engine.invoke_method(obj, slot, vec![]) {
                return s.as_str().to_string();
            }
        }
    }
    print_to_string(value)
}

fn write_value(out: &mut String, value: &Specifier) {
    match value {
        Specifier::Omega => out.push_str("om"),
        Specifier::Atom(a) if *a == crate::symbol::ATOM_TRUE => out.push_str("true"),
        Specifier::Atom(a) if *a == crate::symbol::ATOM_FALSE => out.push_str("false"),
        Specifier::Atom(a) => {
            let _ = write!(out, "{a}");
        }
        Specifier::Int(i) => write_integer(out, i),
        Specifier::Real(r) => {
            let _ = write!(out, "{}", **r);
        }
        Specifier::Str(s) => {
            out.push('\'');
            for ch in s.as_str().chars() {
                if ch == '\'' {
                    out.push('\'');
                }
                out.push(ch);
            }
            out.push('\'');
        }
        Specifier::Set(s) => {
            out.push('{');
            for (i, e) in s.elements().into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, &e);
            }
            out.push('}');
        }
        Specifier::Map(m) => {
            out.push('{');
            for (i, pair) in m.as_pairs().into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, &pair);
            }
            out.push('}');
        }
        Specifier::Tuple(t) => {
            out.push('[');
            for (i, e) in t.elements().into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, &e);
            }
            out.push(']');
        }
        Specifier::Object(_) => out.push_str("<object>"),
        Specifier::Process(_) => out.push_str("<process>"),
        Specifier::Mailbox(_) => out.push_str("<mailbox>"),
        Specifier::Proc(_) => out.push_str("<procedure>"),
        Specifier::Iter(_) => out.push_str("<iterator>"),
        Specifier::File(f) => {
            let _ = write!(out, "<file {}>", f.name);
        }
        Specifier::Label(l) => {
            let _ = write!(out, "<label {}:{}>", l.unit.0, l.offset);
        }
        Specifier::Opaque(o) => {
            let _ = write!(out, "<opaque {:#x}>", o.0);
        }
    }
}

fn write_integer(out: &mut String, i: &Integer) {
    let _ = write!(out, "{i}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::set::SetHeader;
    use std::rc::Rc;

    #[test]
    fn omega_prints_as_om() {
        assert_eq!(print_to_string(&Specifier::Omega), "om");
    }

    #[test]
    fn booleans_print_by_name_not_atom_id() {
        assert_eq!(print_to_string(&Specifier::boolean(true)), "true");
        assert_eq!(print_to_string(&Specifier::boolean(false)), "false");
    }

    #[test]
    fn tuple_prints_bracketed_comma_separated() {
        let t = crate::containers::tuple::Tuple::from_elements(vec![Specifier::int(1), Specifier::int(2)]);
        assert_eq!(print_to_string(&Specifier::Tuple(Rc::new(t))), "[1,2]");
    }

    #[test]
    fn set_prints_in_header_tree_order_not_sorted() {
        let s = SetHeader::new().with(Specifier::int(2)).with(Specifier::int(1));
        let printed = print_to_string(&Specifier::Set(Rc::new(s.clone())));
        let mut expected = String::from("{");
        for (i, e) in s.elements().into_iter().enumerate() {
            if i > 0 {
                expected.push(',');
            }
            expected.push_str(&print_to_string(&e));
        }
        expected.push('}');
        assert_eq!(printed, expected);
    }

    #[test]
    fn string_literal_doubles_embedded_quotes() {
        let s = Specifier::string("it's");
        assert_eq!(print_to_string(&s), "'it''s'");
    }
}
