//! On-disk compiled-unit record. The compiler front end that produces
//! these bytes is out of scope here; this module only defines the wire
//! shape `load_unit` consumes.
//!
//! Field order mirrors the unit control record: inherits/imports/slots/
//! specifiers/integer/real/string/
//! procedure/label literal counts, then init/body instruction counts,
//! source timestamp, and unit type.

use binrw::{BinRead, BinWrite};

/// Length-prefixed byte string (SETL source text is not guaranteed to be
/// valid UTF-8 ahead of load, so the raw bytes are carried as-is and
/// validated in `loader::load_unit`).
#[derive(Debug, Clone, Default, BinRead, BinWrite)]
pub struct WireString {
    pub len: u32,
    #[br(count = len)]
    pub bytes: Vec<u8>,
}

impl WireString {
    pub fn new(s: &str) -> Self {
        WireString { len: s.len() as u32, bytes: s.as_bytes().to_vec() }
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// step 2 "unit type". `Native` loads a shared library;
/// every other tag loads init/body code directly from this record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(repr = u8)]
pub enum UnitKindTag {
    Program = 0,
    Class = 1,
    Package = 2,
    Process = 3,
    Native = 4,
}

/// An inherited or imported unit reference (step 6): the
/// referenced unit is resolved by name at load time, and its recorded
/// timestamp is checked against this one's expectation (step 7's
/// "needs recompile" check).
#[derive(Debug, Clone, BinRead, BinWrite)]
pub struct UnitRefRecord {
    pub name: WireString,
    pub expected_timestamp: i64,
}

/// One slot declaration (step 7). `in_class_index` indexes
/// this unit's own flattened unit vector; locally declared slots always
/// point at position 1 ("self").
#[derive(Debug, Clone, BinRead, BinWrite)]
pub struct SlotRecord {
    pub name: WireString,
    /// 0 = instance variable, 1 = method.
    pub kind: u8,
    pub is_public: u8,
    pub in_class_index: u32,
    /// Spec-block offset of the bound procedure literal; only meaningful
    /// when `kind == 1`.
    pub proc_offset: u32,
}

/// A procedure literal (step 9): unit index, code offset,
/// formal count, spec-block slice, and an optional parent for nested
/// closures.
#[derive(Debug, Clone, BinRead, BinWrite)]
pub struct ProcedureLiteralRecord {
    pub code_offset: u32,
    pub formal_count: u32,
    pub spec_block_base: u32,
    pub spec_block_len: u32,
    /// Index into this same record's `procedure_literals`, or `u32::MAX`
    /// for no parent.
    pub parent_index: u32,
}

/// A label literal (step 9): resolves to an instruction
/// pointer in this unit's own init or body code.
#[derive(Debug, Clone, BinRead, BinWrite)]
pub struct LabelLiteralRecord {
    /// 0 = init code, 1 = body code.
    pub segment: u8,
    pub offset: u32,
}

/// One bytecode operand on disk ('s tag scheme, serialized).
/// `tag`: 0 none, 1 int, 2 spec slot, 3 label, 4 slot (by name), 5 unit
/// (by flattened-vector index).
#[derive(Debug, Clone, BinRead, BinWrite)]
pub struct EncodedOperand {
    pub tag: u8,
    #[brw(if(tag == 1))]
    pub int_value: Option<i64>,
    #[brw(if(tag == 2))]
    pub spec_slot: Option<u32>,
    #[brw(if(tag == 3))]
    pub label_segment: Option<u8>,
    #[brw(if(tag == 3))]
    pub label_unit_index: Option<u32>,
    #[brw(if(tag == 3))]
    pub label_offset: Option<u32>,
    #[brw(if(tag == 4))]
    pub slot_name: Option<WireString>,
    #[brw(if(tag == 5))]
    pub unit_index: Option<u32>,
}

/// Opcode plus three operands , the wire counterpart of
/// [`crate::interp::opcode::Instruction`].
#[derive(Debug, Clone, BinRead, BinWrite)]
pub struct EncodedInstruction {
    pub opcode: u8,
    pub a: EncodedOperand,
    pub b: EncodedOperand,
    pub c: EncodedOperand,
}

/// A public-symbol stream entry (step 10): exported name to
/// procedure-literal index.
#[derive(Debug, Clone, BinRead, BinWrite)]
pub struct PublicSymbolRecord {
    pub name: WireString,
    pub procedure_index: u32,
}

/// The full compiled-unit record (step 2 and steps 5-10).
#[derive(Debug, Clone, BinRead, BinWrite)]
#[brw(little, magic = b"VHLU")]
pub struct CompiledUnit {
    pub unit_type: UnitKindTag,
    /// Nonzero for a package spec record with no compiled body.
    pub needs_body: u8,
    pub source_timestamp: i64,
    pub name: WireString,
    /// Shared-library path for `Native` units; empty otherwise.
    pub native_library_path: WireString,

    pub inherit_count: u32,
    #[br(count = inherit_count)]
    pub inherits: Vec<UnitRefRecord>,

    pub import_count: u32,
    #[br(count = import_count)]
    pub imports: Vec<UnitRefRecord>,

    /// Declared specifier count; the "plus one" sizing is applied by
    /// `UnitEntry::new`, not stored here.
    pub spec_count: u32,

    pub slot_count: u32,
    #[br(count = slot_count)]
    pub slots: Vec<SlotRecord>,

    pub int_literal_count: u32,
    #[br(count = int_literal_count)]
    pub int_literals: Vec<i64>,

    /// Bignum literals too wide for `i64`, carried as decimal text and
    /// parsed via `Integer`'s `FromStr` at load time.
    pub long_literal_count: u32,
    #[br(count = long_literal_count)]
    pub long_literals: Vec<WireString>,

    pub real_literal_count: u32,
    #[br(count = real_literal_count)]
    pub real_literals: Vec<f64>,

    pub string_literal_count: u32,
    #[br(count = string_literal_count)]
    pub string_literals: Vec<WireString>,

    pub procedure_literal_count: u32,
    #[br(count = procedure_literal_count)]
    pub procedure_literals: Vec<ProcedureLiteralRecord>,

    pub label_literal_count: u32,
    #[br(count = label_literal_count)]
    pub label_literals: Vec<LabelLiteralRecord>,

    pub init_instruction_count: u32,
    #[br(count = init_instruction_count)]
    pub init_code: Vec<EncodedInstruction>,

    pub body_instruction_count: u32,
    #[br(count = body_instruction_count)]
    pub body_code: Vec<EncodedInstruction>,

    pub public_symbol_count: u32,
    #[br(count = public_symbol_count)]
    pub public_symbols: Vec<PublicSymbolRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn wire_string_round_trips_through_bytes() {
        let s = WireString::new("hello");
        let mut buf = Vec::new();
        s.write(&mut Cursor::new(&mut buf)).unwrap();
        let back = WireString::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back.to_string_lossy(), "hello");
    }

    #[test]
    fn minimal_compiled_unit_round_trips() {
        let unit = CompiledUnit {
            unit_type: UnitKindTag::Program,
            needs_body: 0,
            source_timestamp: 42,
            name: WireString::new("main"),
            native_library_path: WireString::new(""),
            inherit_count: 0,
            inherits: vec![],
            import_count: 0,
            imports: vec![],
            spec_count: 4,
            slot_count: 0,
            slots: vec![],
            int_literal_count: 1,
            int_literals: vec![7],
            long_literal_count: 0,
            long_literals: vec![],
            real_literal_count: 0,
            real_literals: vec![],
            string_literal_count: 0,
            string_literals: vec![],
            procedure_literal_count: 0,
            procedure_literals: vec![],
            label_literal_count: 0,
            label_literals: vec![],
            init_instruction_count: 0,
            init_code: vec![],
            body_instruction_count: 1,
            body_code: vec![EncodedInstruction {
                opcode: 0,
                a: EncodedOperand {
                    tag: 1,
                    int_value: Some(7),
                    spec_slot: None,
                    label_segment: None,
                    label_unit_index: None,
                    label_offset: None,
                    slot_name: None,
                    unit_index: None,
                },
                b: EncodedOperand {
                    tag: 0,
                    int_value: None,
                    spec_slot: None,
                    label_segment: None,
                    label_unit_index: None,
                    label_offset: None,
                    slot_name: None,
                    unit_index: None,
                },
                c: EncodedOperand {
                    tag: 0,
                    int_value: None,
                    spec_slot: None,
                    label_segment: None,
                    label_unit_index: None,
                    label_offset: None,
                    slot_name: None,
                    unit_index: None,
                },
            }],
            public_symbol_count: 0,
            public_symbols: vec![],
        };
        let mut buf = Vec::new();
        unit.write(&mut Cursor::new(&mut buf)).unwrap();
        let back = CompiledUnit::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back.name.to_string_lossy(), "main");
        assert_eq!(back.body_code.len(), 1);
        assert_eq!(back.body_code[0].a.int_value, Some(7));
    }
}
