//! End-to-end scenarios spanning the loader and the dispatch loop,
//! hand-assembling `CompiledUnit` values directly rather than compiling
//! SETL source text (the compiler front end is out of scope).

use vhlrt::config::RuntimeConfig;
use vhlrt::containers::map::MapHeader;
use vhlrt::containers::set::SetHeader;
use vhlrt::containers::tuple::Tuple;
use vhlrt::error::LoaderError;
use vhlrt::interp::builtin::BuiltinOp;
use vhlrt::interp::engine::Engine;
use vhlrt::interp::opcode::Opcode;
use vhlrt::loader::format::{
    CompiledUnit, EncodedInstruction, EncodedOperand, SlotRecord, UnitKindTag, UnitRefRecord, WireString,
};
use vhlrt::loader::{load_unit, load_unit_from_bytes};
use vhlrt::value::integer::Integer;
use vhlrt::value::specifier::{value_eq, Specifier};
use std::rc::Rc;

fn no_operand() -> EncodedOperand {
    EncodedOperand {
        tag: 0,
        int_value: None,
        spec_slot: None,
        label_segment: None,
        label_unit_index: None,
        label_offset: None,
        slot_name: None,
        unit_index: None,
    }
}

fn int_operand(v: i64) -> EncodedOperand {
    EncodedOperand { tag: 1, int_value: Some(v), ..no_operand() }
}

fn spec_slot_operand(idx: u32) -> EncodedOperand {
    EncodedOperand { tag: 2, spec_slot: Some(idx), ..no_operand() }
}

fn instr(opcode: Opcode, a: EncodedOperand, b: EncodedOperand, c: EncodedOperand) -> EncodedInstruction {
    EncodedInstruction { opcode: opcode.into(), a, b, c }
}

fn nullary(opcode: Opcode) -> EncodedInstruction {
    instr(opcode, no_operand(), no_operand(), no_operand())
}

fn base_record(name: &str, spec_count: u32) -> CompiledUnit {
    CompiledUnit {
        unit_type: UnitKindTag::Program,
        needs_body: 0,
        source_timestamp: 1,
        name: WireString::new(name),
        native_library_path: WireString::new(""),
        inherit_count: 0,
        inherits: vec![],
        import_count: 0,
        imports: vec![],
        spec_count,
        slot_count: 0,
        slots: vec![],
        int_literal_count: 0,
        int_literals: vec![],
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
        body_instruction_count: 0,
        body_code: vec![],
        public_symbol_count: 0,
        public_symbols: vec![],
    }
}

fn encode(unit: &CompiledUnit) -> Vec<u8> {
    use binrw::BinWrite;
    let mut buf = Vec::new();
    unit.write(&mut std::io::Cursor::new(&mut buf)).unwrap();
    buf
}

#[test]
fn arithmetic_program_computes_and_stores_into_a_spec_slot() {
    let mut engine = Engine::new(RuntimeConfig::default());
    let mut record = base_record("arith", 3);
    record.body_code = vec![
        instr(Opcode::Push2, int_operand(3), int_operand(4), no_operand()),
        nullary(Opcode::Add),
        instr(Opcode::Pop1, spec_slot_operand(2), no_operand(), no_operand()),
        nullary(Opcode::Stop),
    ];
    record.body_instruction_count = record.body_code.len() as u32;
    let bytes = encode(&record);

    let id = load_unit_from_bytes(&mut engine, "arith", &bytes).unwrap();
    engine.run_body(id).unwrap();

    let block = engine.units.get(id).spec_block.borrow();
    assert!(value_eq(&block[2], &Specifier::int(7)));
}

#[test]
fn conditional_branch_skips_the_false_side() {
    let mut engine = Engine::new(RuntimeConfig::default());
    let mut record = base_record("branch", 3);
    // push two equal ints, GoEq jumps to offset 4, skipping the slot0 = 99
    // assignment so only the slot0 = 1 assignment at the jump target runs.
    record.body_code = vec![
        instr(Opcode::Push2, int_operand(5), int_operand(5), no_operand()),
        instr(
            Opcode::GoEq,
            EncodedOperand { tag: 3, label_segment: Some(1), label_unit_index: Some(u32::MAX), label_offset: Some(4), ..no_operand() },
            no_operand(),
            no_operand(),
        ),
        instr(Opcode::Push1, int_operand(99), no_operand(), no_operand()),
        instr(Opcode::Pop1, spec_slot_operand(0), no_operand(), no_operand()),
        instr(Opcode::Push1, int_operand(1), no_operand(), no_operand()),
        instr(Opcode::Pop1, spec_slot_operand(0), no_operand(), no_operand()),
        nullary(Opcode::Stop),
    ];
    record.body_instruction_count = record.body_code.len() as u32;
    let bytes = encode(&record);

    let id = load_unit_from_bytes(&mut engine, "branch", &bytes).unwrap();
    engine.run_body(id).unwrap();

    let block = engine.units.get(id).spec_block.borrow();
    assert!(value_eq(&block[0], &Specifier::int(1)));
}

#[test]
fn loading_the_same_unit_twice_returns_the_cached_id() {
    let mut engine = Engine::new(RuntimeConfig::default());
    let record = base_record("once", 1);
    let bytes = encode(&record);

    let first = load_unit_from_bytes(&mut engine, "once", &bytes).unwrap();
    let second = load_unit_from_bytes(&mut engine, "once", &bytes).unwrap();
    assert_eq!(first, second);
}

#[test]
fn a_package_control_record_with_no_body_is_refused() {
    let mut engine = Engine::new(RuntimeConfig::default());
    let mut record = base_record("needs_body", 0);
    record.unit_type = UnitKindTag::Package;
    record.needs_body = 1;
    let bytes = encode(&record);

    let err = load_unit_from_bytes(&mut engine, "needs_body", &bytes).unwrap_err();
    assert!(matches!(err, LoaderError::NeedsBody { .. }));
}

#[test]
fn a_class_can_inherit_a_previously_loaded_class_by_name() {
    let mut engine = Engine::new(RuntimeConfig::default());

    let mut base = base_record("base", 1);
    base.unit_type = UnitKindTag::Class;
    base.slot_count = 1;
    base.slots = vec![SlotRecord { name: WireString::new("v"), kind: 0, is_public: 1, in_class_index: 1, proc_offset: 0 }];
    let base_id = load_unit_from_bytes(&mut engine, "base", &encode(&base)).unwrap();
    let base_timestamp = engine.units.get(base_id).source_timestamp;

    let mut derived = base_record("derived", 1);
    derived.unit_type = UnitKindTag::Class;
    derived.inherit_count = 1;
    derived.inherits = vec![UnitRefRecord { name: WireString::new("base"), expected_timestamp: base_timestamp }];
    let derived_id = load_unit_from_bytes(&mut engine, "derived", &encode(&derived)).unwrap();

    let entry = engine.units.get(derived_id);
    assert!(entry.unit_vector.contains(&base_id));
    assert!(entry.inherited.contains(&base_id));
}

#[test]
fn inheriting_a_program_instead_of_a_class_is_rejected() {
    let mut engine = Engine::new(RuntimeConfig::default());
    let program = base_record("prog", 0);
    let program_id = load_unit_from_bytes(&mut engine, "prog", &encode(&program)).unwrap();
    let ts = engine.units.get(program_id).source_timestamp;

    let mut derived = base_record("bad_child", 0);
    derived.unit_type = UnitKindTag::Class;
    derived.inherit_count = 1;
    derived.inherits = vec![UnitRefRecord { name: WireString::new("prog"), expected_timestamp: ts }];
    let err = load_unit_from_bytes(&mut engine, "bad_child", &encode(&derived)).unwrap_err();
    assert!(matches!(err, LoaderError::InheritedMustBeClass { .. }));
}

#[test]
fn a_stale_inherit_timestamp_is_reported_as_needing_recompile() {
    let mut engine = Engine::new(RuntimeConfig::default());
    let base = base_record("base2", 0);
    let base = {
        let mut b = base;
        b.unit_type = UnitKindTag::Class;
        b
    };
    load_unit_from_bytes(&mut engine, "base2", &encode(&base)).unwrap();

    let mut derived = base_record("derived2", 0);
    derived.unit_type = UnitKindTag::Class;
    derived.inherit_count = 1;
    derived.inherits = vec![UnitRefRecord { name: WireString::new("base2"), expected_timestamp: 999 }];
    let err = load_unit_from_bytes(&mut engine, "derived2", &encode(&derived)).unwrap_err();
    assert!(matches!(err, LoaderError::NeedsRecompile { .. }));
}

#[test]
fn load_unit_reads_a_compiled_record_from_the_search_path() {
    let dir = tempfile::tempdir().unwrap();
    let record = base_record("ondisk", 0);
    std::fs::write(dir.path().join("ondisk.vhlu"), encode(&record)).unwrap();

    let config = RuntimeConfig::default().with_search_path(vec![dir.path().to_path_buf()]);
    let mut engine = Engine::new(config);
    let id = load_unit(&mut engine, "ondisk").unwrap();
    assert_eq!(engine.units.get(id).name, "ondisk");

    // second lookup hits the cache, not the filesystem.
    std::fs::remove_file(dir.path().join("ondisk.vhlu")).unwrap();
    let again = load_unit(&mut engine, "ondisk").unwrap();
    assert_eq!(id, again);
}

#[test]
fn a_native_unit_is_refused_for_lack_of_a_dynamic_loading_crate() {
    let mut engine = Engine::new(RuntimeConfig::default());
    let mut record = base_record("native_thing", 0);
    record.unit_type = UnitKindTag::Native;
    record.native_library_path = WireString::new("libsomething.so");
    let err = load_unit_from_bytes(&mut engine, "native_thing", &encode(&record)).unwrap_err();
    assert!(matches!(err, LoaderError::Native(_)));
}

#[test]
fn with_adds_an_element_to_a_set_literal() {
    let mut engine = Engine::new(RuntimeConfig::default());
    let mut record = base_record("with_set", 1);
    record.body_code = vec![
        instr(Opcode::Push3, int_operand(1), int_operand(2), int_operand(3)),
        instr(Opcode::SetLiteral, int_operand(3), no_operand(), no_operand()),
        instr(Opcode::Push1, int_operand(2), no_operand(), no_operand()),
        nullary(Opcode::With),
        instr(Opcode::Pop1, spec_slot_operand(0), no_operand(), no_operand()),
        nullary(Opcode::Stop),
    ];
    record.body_instruction_count = record.body_code.len() as u32;
    let bytes = encode(&record);

    let id = load_unit_from_bytes(&mut engine, "with_set", &bytes).unwrap();
    engine.run_body(id).unwrap();

    let expected = Specifier::Set(Rc::new(
        SetHeader::new().with(Specifier::int(1)).with(Specifier::int(2)).with(Specifier::int(3)),
    ));
    let block = engine.units.get(id).spec_block.borrow();
    assert!(value_eq(&block[0], &expected));
}

#[test]
fn slice_takes_a_two_element_window_of_a_tuple_literal() {
    let mut engine = Engine::new(RuntimeConfig::default());
    let mut record = base_record("slice_tuple", 2);
    record.body_code = vec![
        instr(Opcode::Push3, int_operand(10), int_operand(20), int_operand(30)),
        instr(Opcode::TupleLiteral, int_operand(3), no_operand(), no_operand()),
        instr(Opcode::Pop1, spec_slot_operand(0), no_operand(), no_operand()),
        instr(Opcode::Push2, int_operand(2), int_operand(3), no_operand()),
        instr(Opcode::Slice, spec_slot_operand(0), spec_slot_operand(1), no_operand()),
        nullary(Opcode::Stop),
    ];
    record.body_instruction_count = record.body_code.len() as u32;
    let bytes = encode(&record);

    let id = load_unit_from_bytes(&mut engine, "slice_tuple", &bytes).unwrap();
    engine.run_body(id).unwrap();

    let expected = Specifier::Tuple(Rc::new(Tuple::from_elements(vec![Specifier::int(20), Specifier::int(30)])));
    let block = engine.units.get(id).spec_block.borrow();
    assert!(value_eq(&block[1], &expected));
}

#[test]
fn of_looks_up_a_key_in_a_preset_map() {
    let mut engine = Engine::new(RuntimeConfig::default());
    let mut record = base_record("of_map", 2);
    record.body_code = vec![
        instr(Opcode::Of, spec_slot_operand(0), int_operand(1), spec_slot_operand(1)),
        nullary(Opcode::Stop),
    ];
    record.body_instruction_count = record.body_code.len() as u32;
    let bytes = encode(&record);

    let id = load_unit_from_bytes(&mut engine, "of_map", &bytes).unwrap();
    let map = MapHeader::new()
        .set_single(Specifier::int(1), Specifier::string("a"))
        .set_single(Specifier::int(2), Specifier::string("b"));
    engine.units.get(id).spec_block.borrow_mut()[0] = Specifier::Map(Rc::new(map));
    engine.run_body(id).unwrap();

    let block = engine.units.get(id).spec_block.borrow();
    assert!(value_eq(&block[1], &Specifier::string("a")));
}

#[test]
fn clearing_the_last_element_twice_shrinks_a_tuple_to_its_prefix() {
    // `t := [1,2,3]; t(2) := om` shrinks to `[1]` only because clearing
    // position 3 first (the trailing element) drops the tuple to `[1,2]`,
    // after which position 2 is itself the trailing element.
    let mut engine = Engine::new(RuntimeConfig::default());
    let mut record = base_record("clear_tail", 1);
    record.body_code = vec![
        instr(Opcode::Sof, spec_slot_operand(0), int_operand(3), no_operand()),
        instr(Opcode::Sof, spec_slot_operand(0), int_operand(2), no_operand()),
        nullary(Opcode::Stop),
    ];
    record.body_instruction_count = record.body_code.len() as u32;
    let bytes = encode(&record);

    let id = load_unit_from_bytes(&mut engine, "clear_tail", &bytes).unwrap();
    let tuple = Tuple::from_elements(vec![Specifier::int(1), Specifier::int(2), Specifier::int(3)]);
    engine.units.get(id).spec_block.borrow_mut()[0] = Specifier::Tuple(Rc::new(tuple));
    engine.run_body(id).unwrap();

    let expected = Specifier::Tuple(Rc::new(Tuple::from_elements(vec![Specifier::int(1)])));
    let block = engine.units.get(id).spec_block.borrow();
    assert!(value_eq(&block[0], &expected));
}

#[test]
fn str_and_unstr_round_trip_a_set_through_its_printed_form() {
    let mut engine = Engine::new(RuntimeConfig::default());
    let mut record = base_record("str_roundtrip", 1);
    record.body_code = vec![
        instr(Opcode::Push1, spec_slot_operand(0), no_operand(), no_operand()),
        instr(Opcode::Builtin, int_operand(BuiltinOp::Str as i64), int_operand(1), no_operand()),
        instr(Opcode::Builtin, int_operand(BuiltinOp::Unstr as i64), int_operand(1), no_operand()),
        instr(Opcode::Pop1, spec_slot_operand(0), no_operand(), no_operand()),
        nullary(Opcode::Stop),
    ];
    record.body_instruction_count = record.body_code.len() as u32;
    let bytes = encode(&record);

    let id = load_unit_from_bytes(&mut engine, "str_roundtrip", &bytes).unwrap();
    let original =
        SetHeader::new().with(Specifier::int(3)).with(Specifier::int(1)).with(Specifier::int(2));
    engine.units.get(id).spec_block.borrow_mut()[0] = Specifier::Set(Rc::new(original.clone()));
    engine.run_body(id).unwrap();

    let block = engine.units.get(id).spec_block.borrow();
    assert!(value_eq(&block[0], &Specifier::Set(Rc::new(original))));
}

#[test]
fn multiplying_two_eleven_digit_integers_promotes_to_a_bignum() {
    let mut engine = Engine::new(RuntimeConfig::default());
    let mut record = base_record("bignum_mult", 1);
    record.body_code = vec![
        instr(Opcode::Push2, int_operand(100_000_000_000), int_operand(100_000_000_000), no_operand()),
        nullary(Opcode::Mult),
        instr(Opcode::Pop1, spec_slot_operand(0), no_operand(), no_operand()),
        nullary(Opcode::Stop),
    ];
    record.body_instruction_count = record.body_code.len() as u32;
    let bytes = encode(&record);

    let id = load_unit_from_bytes(&mut engine, "bignum_mult", &bytes).unwrap();
    engine.run_body(id).unwrap();

    let expected = Specifier::Int("10000000000000000000000".parse::<Integer>().unwrap());
    let block = engine.units.get(id).spec_block.borrow();
    assert!(value_eq(&block[0], &expected));
}
