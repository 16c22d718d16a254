//! Unit loader: reads a compiled-unit record from disk (or an in-memory
//! buffer, for embedders and tests) and installs it into the process-wide
//! [`UnitTable`]/[`SlotTable`], following an eleven-step sequence — cache
//! check, control-record read, inherit/import resolution, two-pass slot
//! loading, code and literal-pool loading, public-symbol registration,
//! then one-time init-code execution.

pub mod format;

use crate::error::{LoaderError, LoaderResult};
use crate::interp::engine::Engine;
use crate::interp::opcode::{CodeSegment, Instruction, Label, Opcode, Operand};
use crate::interp::procedure::{ProcRecord, ProcRef};
use crate::slot::SlotId;
use crate::unit::{UnitEntry, UnitId, UnitKind};
use crate::value::integer::Integer;
use crate::value::specifier::Specifier;
use format::{CompiledUnit, EncodedInstruction, EncodedOperand, UnitKindTag};
use std::path::PathBuf;

const PREDEFINED_UNIT_NAME: &str = "$predefined";
/// Sentinel for "this label targets the unit currently being loaded"
/// (step 9); the self id isn't known until after the
/// record's control fields are already parsed.
const SELF_UNIT_SENTINEL: u32 = u32::MAX;

/// Loads `name`, returning its cached [`UnitId`] if already loaded
/// (step 1), otherwise locating and reading its compiled
/// record from `engine.config.library_search_path`.
pub fn load_unit(engine: &mut Engine, name: &str) -> LoaderResult<UnitId> {
    if let Some(id) = engine.units.lookup(name) {
        return Ok(id);
    }
    let path = find_unit_file(engine, name)?;
    let bytes = std::fs::read(&path).map_err(|source| LoaderError::Io { unit_name: name.to_string(), source })?;
    load_unit_from_bytes(engine, name, &bytes)
}

fn find_unit_file(engine: &Engine, name: &str) -> LoaderResult<PathBuf> {
    for dir in &engine.config.library_search_path {
        let candidate = dir.join(format!("{name}.vhlu"));
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(LoaderError::NotFound { unit_name: name.to_string() })
}

/// Ensures the predefined pseudo-unit (flattened unit vector position 0,
/// step 6) exists, creating an empty one on first use.
fn ensure_predefined_unit(engine: &mut Engine) -> UnitId {
    if let Some(id) = engine.units.lookup(PREDEFINED_UNIT_NAME) {
        return id;
    }
    let entry = UnitEntry::new(PREDEFINED_UNIT_NAME.to_string(), UnitKind::Package, 0, 0);
    engine.units.insert(entry)
}

/// Parses and installs a compiled-unit record already held in memory.
/// Exposed directly so embedders (and tests) can load units without a
/// filesystem round trip.
pub fn load_unit_from_bytes(engine: &mut Engine, name: &str, bytes: &[u8]) -> LoaderResult<UnitId> {
    if let Some(id) = engine.units.lookup(name) {
        return Ok(id);
    }

    let mut cursor = std::io::Cursor::new(bytes);
    let record: CompiledUnit =
        binrw::BinRead::read(&mut cursor).map_err(|e| LoaderError::Malformed(e.to_string()))?;

    let record_name = record.name.to_string_lossy();
    if record_name != name {
        return Err(LoaderError::Malformed(format!(
            "unit file name mismatch: expected {name}, found {record_name}"
        )));
    }

    // step 3: a package control record with no compiled body
    // is refused outright rather than partially loaded.
    if record.needs_body != 0 {
        return Err(LoaderError::NeedsBody { unit_name: name.to_string() });
    }

    let kind = match record.unit_type {
        UnitKindTag::Program => UnitKind::Program,
        UnitKindTag::Class => UnitKind::Class,
        UnitKindTag::Package => UnitKind::Package,
        UnitKindTag::Process => UnitKind::Process,
        UnitKindTag::Native => UnitKind::Native,
    };

    if kind == UnitKind::Native {
        return load_native_unit(name, &record);
    }

    let predefined_id = ensure_predefined_unit(engine);

    let entry = UnitEntry::new(name.to_string(), kind, record.source_timestamp, record.spec_count as usize);
    let self_id = engine.units.insert(entry);

    // step 6: resolve inherits (must be classes) then imports
    // (must be packages), building the flattened unit vector. Inherited
    // units propagate their own inherited set; imports do not.
    let mut unit_vector = vec![predefined_id, self_id];
    let mut inherited_ids: Vec<UnitId> = Vec::new();
    for inherit in &record.inherits {
        let ancestor_name = inherit.name.to_string_lossy();
        let ancestor_id = load_unit(engine, &ancestor_name)?;
        let ancestor = engine.units.get(ancestor_id);
        if !ancestor.kind.can_be_inherited() {
            return Err(LoaderError::InheritedMustBeClass { unit_name: ancestor_name });
        }
        if ancestor.source_timestamp != inherit.expected_timestamp {
            return Err(LoaderError::NeedsRecompile { unit_name: ancestor_name });
        }
        for id in std::iter::once(ancestor_id).chain(ancestor.inherited.iter().copied()) {
            if !inherited_ids.contains(&id) {
                inherited_ids.push(id);
            }
        }
    }
    unit_vector.extend(inherited_ids.iter().copied());

    for import in &record.imports {
        let import_name = import.name.to_string_lossy();
        let import_id = load_unit(engine, &import_name)?;
        let imported = engine.units.get(import_id);
        if !imported.kind.can_be_imported() {
            return Err(LoaderError::ExpectedPackage { unit_name: import_name });
        }
        if imported.source_timestamp != import.expected_timestamp {
            return Err(LoaderError::NeedsRecompile { unit_name: import_name });
        }
        unit_vector.push(import_id);
    }

    // step 7: pass 1 interns every slot name before pass 2
    // fills in kind/visibility/owner, independent of declaration order.
    let slot_ids: Vec<SlotId> = record.slots.iter().map(|s| engine.slots.intern(&s.name.to_string_lossy())).collect();

    let entry = engine.units.get_mut(self_id);
    entry.unit_vector = unit_vector.clone();
    entry.inherited = inherited_ids;

    for (slot_id, record_slot) in slot_ids.iter().zip(record.slots.iter()) {
        let is_public = record_slot.is_public != 0;
        match record_slot.kind {
            0 => entry.slot_info.declare_instance_var(*slot_id, record_slot.in_class_index, is_public),
            1 => entry.slot_info.declare_method(*slot_id, record_slot.in_class_index, is_public, record_slot.proc_offset),
            other => return Err(LoaderError::Malformed(format!("unknown slot kind {other}"))),
        }
    }

    // step 9: procedure literals reference earlier literals
    // by index for nested-closure parents, so they're built in file order.
    let mut procedures: Vec<ProcRef> = Vec::with_capacity(record.procedure_literals.len());
    for p in &record.procedure_literals {
        let parent = if p.parent_index == u32::MAX {
            None
        } else {
            Some(
                procedures
                    .get(p.parent_index as usize)
                    .cloned()
                    .ok_or_else(|| LoaderError::Malformed("procedure literal parent index out of range".into()))?,
            )
        };
        procedures.push(ProcRecord::new(self_id, p.code_offset, p.formal_count, p.spec_block_base, p.spec_block_len, parent));
    }

    let labels: Vec<Label> = record
        .label_literals
        .iter()
        .map(|l| Label { unit: self_id, segment: if l.segment == 0 { CodeSegment::Init } else { CodeSegment::Body }, offset: l.offset })
        .collect();

    // step 9: literal pools are written into the spec block
    // in fixed encounter order (int, long, real, string, procedure,
    // label) starting at slot 0 — the same order the compiler assigned
    // their SpecSlot operand indices in.
    {
        let mut block = entry.spec_block.borrow_mut();
        let mut slot = 0usize;
        for v in &record.int_literals {
            block[slot] = Specifier::Int(Integer::Short(*v));
            slot += 1;
        }
        for v in &record.long_literals {
            let text = v.to_string_lossy();
            let value: Integer = text.parse().map_err(|_| LoaderError::Malformed(format!("bad long literal {text}")))?;
            block[slot] = Specifier::Int(value);
            slot += 1;
        }
        for v in &record.real_literals {
            block[slot] = Specifier::real(*v);
            slot += 1;
        }
        for v in &record.string_literals {
            let text = v.to_string_lossy();
            block[slot] = Specifier::string(text);
            slot += 1;
        }
        for p in &procedures {
            block[slot] = Specifier::Proc(p.clone());
            slot += 1;
        }
        for l in &labels {
            block[slot] = Specifier::Label(*l);
            slot += 1;
        }
    }

    // step 8: resolve operands against the flattened unit
    // vector now that it's final.
    let init_code = record
        .init_code
        .iter()
        .map(|i| resolve_instruction(i, self_id, &unit_vector, engine))
        .collect::<LoaderResult<Vec<_>>>()?;
    let body_code = record
        .body_code
        .iter()
        .map(|i| resolve_instruction(i, self_id, &unit_vector, engine))
        .collect::<LoaderResult<Vec<_>>>()?;

    let entry = engine.units.get_mut(self_id);
    entry.init_code = init_code;
    entry.body_code = body_code;

    // step 10: public-symbol stream; error_extensions starts
    // as a copy, extensible later at runtime (`unit.rs`'s doc comment).
    for sym in &record.public_symbols {
        let proc = procedures
            .get(sym.procedure_index as usize)
            .cloned()
            .ok_or_else(|| LoaderError::Malformed("public symbol procedure index out of range".into()))?;
        let name = sym.name.to_string_lossy();
        entry.public_symbols.insert(name.clone(), proc.clone());
        entry.register_error_handler(name, proc);
    }

    // step 11: run the init code once, then it's never run
    // again even if the unit is re-referenced from another import.
    engine.run_init(self_id).map_err(|e| LoaderError::Malformed(format!("unit init code failed: {e}")))?;

    Ok(self_id)
}

fn load_native_unit(name: &str, record: &CompiledUnit) -> LoaderResult<UnitId> {
    let _ = record;
    Err(LoaderError::Native(format!(
        "native unit '{name}' requires dynamic library loading, which this build does not support"
    )))
}

fn resolve_instruction(
    encoded: &EncodedInstruction,
    self_id: UnitId,
    unit_vector: &[UnitId],
    engine: &Engine,
) -> LoaderResult<Instruction> {
    let opcode = Opcode::try_from(encoded.opcode)
        .map_err(|_| LoaderError::Malformed(format!("unknown opcode {}", encoded.opcode)))?;
    Ok(Instruction::new(
        opcode,
        resolve_operand(&encoded.a, self_id, unit_vector, engine)?,
        resolve_operand(&encoded.b, self_id, unit_vector, engine)?,
        resolve_operand(&encoded.c, self_id, unit_vector, engine)?,
    ))
}

fn resolve_operand(
    encoded: &EncodedOperand,
    self_id: UnitId,
    unit_vector: &[UnitId],
    engine: &Engine,
) -> LoaderResult<Operand> {
    let unit_at = |idx: u32| -> LoaderResult<UnitId> {
        unit_vector
            .get(idx as usize)
            .copied()
            .ok_or_else(|| LoaderError::Malformed(format!("unit vector index {idx} out of range")))
    };
    match encoded.tag {
        0 => Ok(Operand::None),
        1 => {
            let v = encoded.int_value.ok_or_else(|| LoaderError::Malformed("missing int operand payload".into()))?;
            Ok(Operand::Int(v))
        }
        2 => {
            let v = encoded.spec_slot.ok_or_else(|| LoaderError::Malformed("missing spec slot operand payload".into()))?;
            Ok(Operand::SpecSlot(v))
        }
        3 => {
            let segment = match encoded.label_segment {
                Some(0) => CodeSegment::Init,
                Some(1) => CodeSegment::Body,
                _ => return Err(LoaderError::Malformed("missing or invalid label segment".into())),
            };
            let unit_index = encoded.label_unit_index.ok_or_else(|| LoaderError::Malformed("missing label unit index".into()))?;
            let unit = if unit_index == SELF_UNIT_SENTINEL { self_id } else { unit_at(unit_index)? };
            let offset = encoded.label_offset.ok_or_else(|| LoaderError::Malformed("missing label offset".into()))?;
            Ok(Operand::Label(Label { unit, segment, offset }))
        }
        4 => {
            let name = encoded
                .slot_name
                .as_ref()
                .ok_or_else(|| LoaderError::Malformed("missing slot operand payload".into()))?
                .to_string_lossy();
            let slot = engine
                .slots
                .lookup(&name)
                .ok_or_else(|| LoaderError::Malformed(format!("unresolved slot name '{name}'")))?;
            Ok(Operand::Slot(slot))
        }
        5 => {
            let idx = encoded.unit_index.ok_or_else(|| LoaderError::Malformed("missing unit operand payload".into()))?;
            Ok(Operand::Unit(unit_at(idx)?))
        }
        other => Err(LoaderError::Malformed(format!("unknown operand tag {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::format::*;
    use super::*;
    use crate::config::RuntimeConfig;

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

    fn minimal_program(name: &str, body: Vec<EncodedInstruction>) -> CompiledUnit {
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
            spec_count: 4,
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
            body_instruction_count: body.len() as u32,
            body_code: body,
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
    fn loads_a_minimal_program_and_caches_it() {
        let mut engine = Engine::new(RuntimeConfig::default());
        let body = vec![EncodedInstruction { opcode: Opcode::Stop.into(), a: no_operand(), b: no_operand(), c: no_operand() }];
        let record = minimal_program("demo", body);
        let bytes = encode(&record);

        let id = load_unit_from_bytes(&mut engine, "demo", &bytes).unwrap();
        assert_eq!(engine.units.get(id).name, "demo");
        assert_eq!(engine.units.get(id).body_code.len(), 1);

        let again = load_unit_from_bytes(&mut engine, "demo", &bytes).unwrap();
        assert_eq!(id, again);
        assert_eq!(engine.units.len(), 2); // $predefined and demo, nothing duplicated
    }

    #[test]
    fn unit_vector_has_predefined_then_self() {
        let mut engine = Engine::new(RuntimeConfig::default());
        let record = minimal_program("demo", vec![]);
        let bytes = encode(&record);
        let id = load_unit_from_bytes(&mut engine, "demo", &bytes).unwrap();
        let entry = engine.units.get(id);
        assert_eq!(entry.unit_vector.len(), 2);
        assert_eq!(entry.unit_vector[1], id);
    }

    #[test]
    fn int_literal_lands_in_spec_block_at_slot_zero() {
        let mut engine = Engine::new(RuntimeConfig::default());
        let mut record = minimal_program("demo", vec![]);
        record.int_literal_count = 1;
        record.int_literals = vec![99];
        let bytes = encode(&record);
        let id = load_unit_from_bytes(&mut engine, "demo", &bytes).unwrap();
        let block = engine.units.get(id).spec_block.borrow();
        assert!(crate::value::specifier::value_eq(&block[0], &Specifier::int(99)));
    }

    #[test]
    fn package_control_record_with_no_body_is_refused() {
        let mut engine = Engine::new(RuntimeConfig::default());
        let mut record = minimal_program("stub", vec![]);
        record.unit_type = UnitKindTag::Package;
        record.needs_body = 1;
        let bytes = encode(&record);
        let err = load_unit_from_bytes(&mut engine, "stub", &bytes).unwrap_err();
        assert!(matches!(err, LoaderError::NeedsBody { .. }));
    }

    #[test]
    fn slot_pass_interns_names_and_records_visibility() {
        let mut engine = Engine::new(RuntimeConfig::default());
        let mut record = minimal_program("withslots", vec![]);
        record.unit_type = UnitKindTag::Class;
        record.slot_count = 1;
        record.slots = vec![SlotRecord { name: WireString::new("x"), kind: 0, is_public: 1, in_class_index: 1, proc_offset: 0 }];
        let bytes = encode(&record);
        let id = load_unit_from_bytes(&mut engine, "withslots", &bytes).unwrap();
        let slot_id = engine.slots.lookup("x").unwrap();
        let info = engine.units.get(id).slot_info.get(slot_id);
        assert!(info.is_instance_var());
        assert!(info.is_public);
    }

    #[test]
    fn operand_with_unit_tag_resolves_through_the_flattened_vector() {
        let mut engine = Engine::new(RuntimeConfig::default());
        let mut record = minimal_program("demo", vec![]);
        record.body_instruction_count = 1;
        record.body_code = vec![EncodedInstruction {
            opcode: Opcode::Push1.into(),
            a: EncodedOperand { tag: 5, unit_index: Some(0), ..int_operand(0) },
            b: no_operand(),
            c: no_operand(),
        }];
        let bytes = encode(&record);
        let id = load_unit_from_bytes(&mut engine, "demo", &bytes).unwrap();
        let entry = engine.units.get(id);
        assert_eq!(entry.body_code[0].operands[0].as_unit(), Some(entry.unit_vector[0]));
    }
}
