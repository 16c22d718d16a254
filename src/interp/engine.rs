//! The bytecode dispatch loop.
//!
//! A plain synchronous loop over an explicit call stack rather than a
//! coroutine-based design, so that nested synchronous calls (operator
//! method dispatch, iterator protocol) are just recursive pushes onto the
//! same stack. Suspension is modeled at exactly one
//! bytecode opcode, `Intcheck` (the suspension point at a loop back-edge)
//! — a process that hits it while it is the sole frame on its
//! own call stack yields back to the scheduler; hitting it from inside a
//! nested synchronous call (operator-dispatch method invocation, iterator
//! protocol) is a contradiction in a well-formed program and is a `giveup`.

use crate::error::{giveup, AbendError, AbendResult};
use crate::interp::iterator::IterState;
use crate::interp::opcode::{CodeSegment, Instruction, Label, Opcode, Operand};
use crate::interp::operator::{self, BinOp, Outcome};
use crate::interp::procedure::ProcRef;
use crate::io::file::FileTable;
use crate::object::{make_mut, set_var, ObjectHeader, ObjectRef, ProcessStatus};
use crate::process::{Mailbox, Scheduler};
use crate::slot::{SlotId, SlotTable};
use crate::symbol::{new_shared_atom_table, SharedAtomTable};
use crate::unit::{UnitId, UnitTable};
use crate::value::integer::Integer;
use crate::value::specifier::{value_eq, Specifier};
use crate::config::RuntimeConfig;
use std::collections::HashMap;
use std::rc::Rc;

/// One call-stack entry: the executing unit/segment/instruction pointer,
/// its operand stack, and (if this frame is a procedure activation) the
/// `ProcRecord` and bound `self` object.
struct Frame {
    unit: UnitId,
    segment: CodeSegment,
    ip: usize,
    stack: Vec<Specifier>,
    proc: Option<ProcRef>,
    self_obj: Option<ObjectRef>,
}

impl Frame {
    fn new(unit: UnitId, segment: CodeSegment, ip: usize) -> Self {
        Frame { unit, segment, ip, stack: Vec::new(), proc: None, self_obj: None }
    }
}

enum DispatchSignal {
    Continue,
    /// A frame just popped via `return`/`stop`.
    Halt,
    StopAll,
    /// `intcheck` back-edge hit at the process root.
    Yield,
}

enum RunSignal {
    Done,
    Yield,
    StopAll,
}

/// Outcome of driving one process to its next suspension point.
pub enum ProcessOutcome {
    Finished(Specifier),
    Suspended,
    StopAll,
}

/// The interpreter instance: every piece of process-wide state bundled
/// into one struct ( design note 5).
pub struct Engine {
    pub units: UnitTable,
    pub slots: SlotTable,
    pub atoms: SharedAtomTable,
    pub files: FileTable,
    pub config: RuntimeConfig,
    pub scheduler: Scheduler,
    call_stack: Vec<Frame>,
    suspended: HashMap<usize, Vec<Frame>>,
    last_filepos: (i64, i64),
    /// This process's own `binstr` identity, checked against any atom
    /// embedded in a value decoded by `getb`/`unstr`.
    process_header: crate::io::file::BinStrHeader,
}

impl Engine {
    pub fn new(config: RuntimeConfig) -> Self {
        Engine {
            units: UnitTable::new(),
            slots: SlotTable::new(),
            atoms: new_shared_atom_table(),
            files: FileTable::new(),
            config,
            scheduler: Scheduler::new(),
            call_stack: Vec::new(),
            suspended: HashMap::new(),
            last_filepos: (0, 0),
            process_header: crate::io::file::BinStrHeader {
                pid: std::process::id() as i32,
                timestamp: std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0),
            },
        }
    }

    fn code_len(&self, unit: UnitId, segment: CodeSegment) -> usize {
        let entry = self.units.get(unit);
        match segment {
            CodeSegment::Init => entry.init_code.len(),
            CodeSegment::Body => entry.body_code.len(),
        }
    }

    fn fetch(&self, unit: UnitId, segment: CodeSegment, ip: usize) -> Instruction {
        let entry = self.units.get(unit);
        let code = match segment {
            CodeSegment::Init => &entry.init_code,
            CodeSegment::Body => &entry.body_code,
        };
        Instruction { opcode: code[ip].opcode, operands: code[ip].operands.clone() }
    }

    fn get_spec(&self, unit: UnitId, idx: u32) -> Specifier {
        self.units.get(unit).spec_block.borrow()[idx as usize].clone()
    }

    fn set_spec(&self, unit: UnitId, idx: u32, value: Specifier) {
        self.units.get(unit).spec_block.borrow_mut()[idx as usize] = value;
    }

    /// Resolves an operand to a value. `SpecSlot` reads the current
    /// frame's defining unit's spec block; immediates and labels carry
    /// their own value.
    fn read_operand(&self, unit: UnitId, operand: &Operand) -> Specifier {
        match operand {
            Operand::SpecSlot(i) => self.get_spec(unit, *i),
            Operand::Int(n) => Specifier::int(*n),
            Operand::Label(l) => Specifier::Label(*l),
            Operand::Slot(_) | Operand::Unit(_) | Operand::None => Specifier::Omega,
        }
    }

    fn write_operand(&self, unit: UnitId, operand: &Operand, value: Specifier) {
        if let Operand::SpecSlot(i) = operand {
            self.set_spec(unit, *i, value);
        } else {
            giveup("write_operand targeted a non-spec-slot operand");
        }
    }

    fn top(&mut self) -> &mut Frame {
        self.call_stack.last_mut().unwrap_or_else(|| giveup("no active frame"))
    }

    fn push_value(&mut self, value: Specifier) {
        self.top().stack.push(value);
    }

    fn pop_value(&mut self) -> Specifier {
        self.top().stack.pop().unwrap_or_else(|| giveup("operand stack underflow"))
    }

    /// Pops two operands in stack-machine order: the right operand was
    /// pushed last, so it comes off first.
    fn pop_pair(&mut self) -> (Specifier, Specifier) {
        let right = self.pop_value();
        let left = self.pop_value();
        (left, right)
    }

    fn current_unit(&self) -> UnitId {
        self.call_stack.last().map(|f| f.unit).unwrap_or_else(|| giveup("no active frame"))
    }

    /// Looks up the procedure literal bound to a method slot (used by the
    /// operator-dispatch fallback): `in_class` is
    /// an index into `class`'s flattened unit vector, and `proc_offset`
    /// indexes that defining unit's own spec block.
    fn proc_for_slot(&self, class: UnitId, slot_id: u32) -> AbendResult<ProcRef> {
        let entry = self.units.get(class);
        let info = entry.slot_info.get(SlotId(slot_id));
        let offset = info
            .proc_offset
            .ok_or_else(|| AbendError::Custom("method slot has no bound procedure".into()))?;
        let defining_unit = entry.unit_vector[info.in_class as usize];
        match self.units.get(defining_unit).spec_block.borrow()[offset as usize].clone() {
            Specifier::Proc(p) => Ok(p),
            _ => Err(AbendError::Custom("method slot literal is not a procedure".into())),
        }
    }

    /// Pushes a call frame for `proc` with `args` bound as its formals,
    /// applying the at-most-one-active-copy save/restore rule.
    fn push_call(&mut self, proc: ProcRef, args: Vec<Specifier>) {
        if args.len() as u32 != proc.formal_count {
            giveup("call argument count does not match the procedure's formal count");
        }
        let entry = self.units.get(proc.unit);
        let base = proc.spec_block_base as usize;
        let len = proc.spec_block_len as usize;
        let current_locals = entry.spec_block.borrow()[base..base + len].to_vec();
        proc.enter(&current_locals);
        {
            let mut block = entry.spec_block.borrow_mut();
            for (i, a) in args.into_iter().enumerate() {
                block[base + i] = a;
            }
        }
        let mut frame = Frame::new(proc.unit, CodeSegment::Body, proc.code_offset as usize);
        frame.self_obj = proc.bound_self.clone();
        frame.proc = Some(proc);
        self.call_stack.push(frame);
    }

    /// `return`/`stop`: pops the current frame, restores any saved spec
    /// block, and delivers the frame's top-of-stack value to the new top
    /// frame (or records it as the process's final value).
    fn do_return(&mut self) -> Option<Specifier> {
        let frame = self.call_stack.pop().unwrap_or_else(|| giveup("return with an empty call stack"));
        let value = frame.stack.last().cloned().unwrap_or(Specifier::Omega);
        if let Some(proc) = &frame.proc {
            if let Some(restored) = proc.leave() {
                let entry = self.units.get(proc.unit);
                let base = proc.spec_block_base as usize;
                let mut block = entry.spec_block.borrow_mut();
                for (i, v) in restored.into_iter().enumerate() {
                    block[base + i] = v;
                }
            }
        }
        if let Some(top) = self.call_stack.last_mut() {
            top.stack.push(value.clone());
            None
        } else {
            Some(value)
        }
    }

    /// Drives the call stack until it shrinks to `target_depth` frames,
    /// used both as the top-level per-process driver (`target_depth == 0`)
    /// and to run a single synchronous nested call to completion (operator
    /// method dispatch, object iterator protocol).
    fn run_until(&mut self, target_depth: usize) -> AbendResult<RunSignal> {
        loop {
            if self.call_stack.len() <= target_depth {
                return Ok(RunSignal::Done);
            }
            match self.dispatch_one()? {
                DispatchSignal::Continue | DispatchSignal::Halt => {
                    if self.call_stack.len() <= target_depth {
                        return Ok(RunSignal::Done);
                    }
                }
                DispatchSignal::StopAll => return Ok(RunSignal::StopAll),
                DispatchSignal::Yield => {
                    if target_depth == 0 {
                        return Ok(RunSignal::Yield);
                    }
                    giveup("intcheck yielded from inside a nested synchronous call");
                }
            }
        }
    }

    /// Runs `proc` with `args` to completion synchronously and returns its
    /// result — used by operator-dispatch method invocation and by the
    /// object-iterator protocol.
    fn call_and_wait(&mut self, proc: ProcRef, args: Vec<Specifier>) -> AbendResult<Specifier> {
        let depth = self.call_stack.len();
        self.push_call(proc, args);
        match self.run_until(depth)? {
            RunSignal::Done => Ok(self.pop_value()),
            RunSignal::Yield => giveup("unexpected yield from a nested synchronous call"),
            RunSignal::StopAll => Err(AbendError::Custom("stopall during a nested call".into())),
        }
    }

    pub(crate) fn invoke_method(&mut self, receiver: &ObjectRef, method_slot: u32, args: Vec<Specifier>) -> AbendResult<Specifier> {
        let proc = self.proc_for_slot(receiver.class, method_slot)?;
        let bound = proc.bind_self(receiver.clone());
        self.call_and_wait(bound, args)
    }

    /// Dispatches `op` over a popped `(left, right)` pair and returns the
    /// raw result without pushing it — shared by `binary_op` (pushes the
    /// value as-is) and the relational opcodes that derive a boolean from
    /// it (`le`, `notin`, the conditional `go*` family).
    fn relational(&mut self, op: BinOp, left: &Specifier, right: &Specifier) -> AbendResult<Specifier> {
        match operator::dispatch_binary(op, left, right, &self.units, &self.slots) {
            Outcome::Value(v) => Ok(v),
            Outcome::InvokeMethod { receiver, method_slot, arg } => self.invoke_method(&receiver, method_slot, vec![arg]),
            Outcome::TypeError => Err(AbendError::TypeError(format!(
                "no applicable operator for {} and {}",
                crate::io::printer::print_to_string(left),
                crate::io::printer::print_to_string(right)
            ))),
        }
    }

    fn binary_op(&mut self, op: BinOp) -> AbendResult<()> {
        let (left, right) = self.pop_pair();
        let result = self.relational(op, &left, &right)?;
        self.push_value(result);
        Ok(())
    }

    /// Pops one operand and dispatches `name` (`uminus`/`arb`/`nelt`/
    /// `domain`/`range`/`pow`), falling back to the operand's `m_*` method
    /// when no built-in form matches.
    fn unary_op(&mut self, name: &'static str) -> AbendResult<()> {
        let v = self.pop_value();
        let result = match operator::dispatch_unary(name, &v, &self.units, &self.slots) {
            operator::UnaryOutcome::Value(r) => r,
            operator::UnaryOutcome::InvokeMethod { receiver, method_slot } => {
                self.invoke_method(&receiver, method_slot, vec![])?
            }
            operator::UnaryOutcome::TypeError => return Err(AbendError::bad_argument(name, &v)),
        };
        self.push_value(result);
        Ok(())
    }

    /// Validates that `file` is a handle this engine still considers open
    /// (present in `self.files`) and returns its `FileRef`. A handle whose
    /// `Specifier::File` is still reachable but whose atom was removed by
    /// `close` is rejected here even though the `Rc` itself is still alive.
    fn require_open_file(&self, value: &Specifier) -> AbendResult<crate::io::file::FileRef> {
        match value {
            Specifier::File(f) => {
                self.files.get(f.handle).ok_or(AbendError::BadFileHandle)
            }
            other => Err(AbendError::bad_argument("file", other)),
        }
    }

    fn arg_str(v: &Specifier) -> AbendResult<std::rc::Rc<str>> {
        match v {
            Specifier::Str(s) => Ok(std::rc::Rc::from(s.as_str())),
            other => Err(AbendError::bad_argument("builtin", other)),
        }
    }

    /// Dispatches one `Opcode::Builtin` call: the file/stream surface
    /// (`open`/`close`/`get`/`geta`/`getb`/`putb`/`print`/`printa`/`gets`/
    /// `puts`/`fsize`/`str`/`unstr`). Returns `Specifier::Omega` for the
    /// void operations (`close`, `putb`, `print`, `printa`, `puts`).
    fn call_builtin(&mut self, op: crate::interp::builtin::BuiltinOp, mut args: Vec<Specifier>) -> AbendResult<Specifier> {
        use crate::interp::builtin::BuiltinOp;
        use crate::io::file::FileRecord;
        use crate::io::reader::Reader;

        match op {
            BuiltinOp::Open => {
                if args.len() != 2 {
                    return Err(AbendError::WrongArity { expected: 2, got: args.len() });
                }
                let mode_str = Self::arg_str(&args.pop().unwrap())?;
                let name = Self::arg_str(&args.pop().unwrap())?;
                let handle = self.atoms.borrow_mut().fresh();
                let record = match &*mode_str {
                    "text-in" => FileRecord::open_text_in(&self.config, handle, &name),
                    "text-out" => FileRecord::open_text_out(&self.config, handle, &name),
                    "binary-in" => FileRecord::open_binary_in(&self.config, handle, &name),
                    "binary-out" => FileRecord::open_binary_out(&self.config, handle, &name),
                    "byte-in" => FileRecord::open_byte_in(&self.config, handle, &name),
                    "random" => FileRecord::open_random(&self.config, handle, &name),
                    other => return Err(AbendError::Custom(format!("unrecognized file mode {other}"))),
                }?;
                self.files.insert(record.clone());
                Ok(Specifier::File(record))
            }
            BuiltinOp::Close => {
                let file = args.pop().ok_or(AbendError::WrongArity { expected: 1, got: 0 })?;
                let f = self.require_open_file(&file)?;
                self.files.close(f.handle);
                Ok(Specifier::Omega)
            }
            BuiltinOp::Get => {
                let file = args.pop().ok_or(AbendError::WrongArity { expected: 1, got: 0 })?;
                let f = self.require_open_file(&file)?;
                Ok(match f.read_line()? {
                    Some(line) => Specifier::string(line),
                    None => Specifier::Omega,
                })
            }
            BuiltinOp::Geta => {
                let file = args.pop().ok_or(AbendError::WrongArity { expected: 1, got: 0 })?;
                let f = self.require_open_file(&file)?;
                match f.read_line()? {
                    Some(line) => {
                        let mut reader = Reader::new(&line);
                        Ok(reader.read_value().map_err(|_| AbendError::Custom("malformed literal in geta input".into()))?.unwrap_or(Specifier::Omega))
                    }
                    None => Ok(Specifier::Omega),
                }
            }
            BuiltinOp::Getb => {
                let file = args.pop().ok_or(AbendError::WrongArity { expected: 1, got: 0 })?;
                let f = self.require_open_file(&file)?;
                Ok(f.read_binstr_value(&self.process_header)?.unwrap_or(Specifier::Omega))
            }
            BuiltinOp::Putb => {
                if args.len() != 2 {
                    return Err(AbendError::WrongArity { expected: 2, got: args.len() });
                }
                let value = args.pop().unwrap();
                let file = args.pop().unwrap();
                let f = self.require_open_file(&file)?;
                f.write_binstr_value(&value, &self.process_header)?;
                Ok(Specifier::Omega)
            }
            BuiltinOp::Print | BuiltinOp::Printa => {
                if args.len() != 2 {
                    return Err(AbendError::WrongArity { expected: 2, got: args.len() });
                }
                let value = args.pop().unwrap();
                let file = args.pop().unwrap();
                let mut text = crate::io::printer::print_with_engine(self, &value);
                if op == BuiltinOp::Print {
                    text.push('\n');
                }
                match file {
                    Specifier::Omega => {
                        use std::io::Write as _;
                        print!("{text}");
                        let _ = std::io::stdout().flush();
                    }
                    other => self.require_open_file(&other)?.write_text(&text)?,
                }
                Ok(Specifier::Omega)
            }
            BuiltinOp::Gets => {
                if args.len() != 3 {
                    return Err(AbendError::WrongArity { expected: 3, got: args.len() });
                }
                let len = Self::to_i64(&args.pop().unwrap())?;
                let pos = Self::to_i64(&args.pop().unwrap())?;
                let file = args.pop().unwrap();
                let f = self.require_open_file(&file)?;
                let bytes = f.gets(pos, len.max(0) as usize)?;
                Ok(Specifier::string(String::from_utf8_lossy(&bytes).into_owned()))
            }
            BuiltinOp::Puts => {
                if args.len() != 3 {
                    return Err(AbendError::WrongArity { expected: 3, got: args.len() });
                }
                let value = args.pop().unwrap();
                let pos = Self::to_i64(&args.pop().unwrap())?;
                let file = args.pop().unwrap();
                let f = self.require_open_file(&file)?;
                let text = Self::arg_str(&value)?;
                f.puts(pos, text.as_bytes())?;
                Ok(Specifier::Omega)
            }
            BuiltinOp::Fsize => {
                let file = args.pop().ok_or(AbendError::WrongArity { expected: 1, got: 0 })?;
                let f = self.require_open_file(&file)?;
                Ok(Specifier::int(f.fsize()? as i64))
            }
            BuiltinOp::Str => {
                let value = args.pop().ok_or(AbendError::WrongArity { expected: 1, got: 0 })?;
                Ok(Specifier::string(crate::io::printer::print_with_engine(self, &value)))
            }
            BuiltinOp::Unstr => {
                let value = args.pop().ok_or(AbendError::WrongArity { expected: 1, got: 0 })?;
                let text = Self::arg_str(&value)?;
                let mut reader = Reader::new(&text);
                Ok(reader.read_value().map_err(|_| AbendError::Custom("malformed literal in unstr input".into()))?.unwrap_or(Specifier::Omega))
            }
        }
    }

    fn to_i64(v: &Specifier) -> AbendResult<i64> {
        match v {
            Specifier::Int(Integer::Short(n)) => Ok(*n),
            Specifier::Int(i) => i.as_i64().ok_or_else(|| AbendError::bad_argument("index", v)),
            _ => Err(AbendError::bad_argument("index", v)),
        }
    }

    fn make_iter(&self, source: &Specifier) -> AbendResult<Specifier> {
        let iter = match source {
            Specifier::Set(s) => IterState::from_set(s),
            Specifier::Map(m) => IterState::from_map(m),
            Specifier::Tuple(t) => IterState::from_tuple(t),
            Specifier::Str(s) => IterState::from_string(s),
            Specifier::Int(Integer::Short(n)) => IterState::from_short_int(*n),
            Specifier::Object(o) | Specifier::Process(o) => IterState::from_object(o.clone()),
            other => return Err(AbendError::bad_argument("iter", other)),
        };
        Ok(Specifier::Iter(iter))
    }

    /// `inext`: advances `iter_val` one step. Flat iterators advance
    /// in-process; object iterators drive the user's `m_iternext` (and, on
    /// first use, `m_iterstart`) through a nested synchronous call.
    fn advance_iter(&mut self, iter_val: &Specifier) -> AbendResult<Option<Specifier>> {
        let iter = match iter_val {
            Specifier::Iter(it) => it.clone(),
            other => return Err(AbendError::bad_argument("inext", other)),
        };
        let is_object = matches!(&*iter.borrow(), IterState::Object { .. });
        if !is_object {
            return Ok(iter.borrow_mut().advance());
        }
        let (obj, started) = match &*iter.borrow() {
            IterState::Object { obj, started } => (obj.clone(), *started),
            _ => unreachable!(),
        };
        if !started {
            let start_slot = self.slots.lookup("m_iterstart").and_then(|id| {
                let info = self.units.get(obj.class).slot_info.get(id);
                if info.is_method() && info.is_public {
                    Some(id.0)
                } else {
                    None
                }
            });
            if let Some(slot) = start_slot {
                let proc = self.proc_for_slot(obj.class, slot)?;
                self.call_and_wait(proc.bind_self(obj.clone()), vec![])?;
            }
            if let IterState::Object { started, .. } = &mut *iter.borrow_mut() {
                *started = true;
            }
        }
        let next_slot = self.slots.lookup("m_iternext").and_then(|id| {
            let info = self.units.get(obj.class).slot_info.get(id);
            if info.is_method() && info.is_public {
                Some(id.0)
            } else {
                None
            }
        });
        let slot = next_slot.ok_or_else(|| AbendError::UndefinedMethod("m_iternext"))?;
        let proc = self.proc_for_slot(obj.class, slot)?;
        let result = self.call_and_wait(proc.bind_self(obj), vec![])?;
        Ok(if result.is_omega() { None } else { Some(result) })
    }

    fn jump(&mut self, label: Label) {
        let frame = self.top();
        frame.segment = label.segment;
        frame.ip = label.offset as usize;
    }

    fn dispatch_one(&mut self) -> AbendResult<DispatchSignal> {
        let (unit, segment, ip) = {
            let frame = self.top();
            (frame.unit, frame.segment, frame.ip)
        };
        if ip >= self.code_len(unit, segment) {
            giveup("instruction pointer ran off the end of a code segment");
        }
        let instr = self.fetch(unit, segment, ip);
        self.top().ip += 1;
        let [op_a, op_b, op_c] = &instr.operands;

        match instr.opcode {
            // --- stack mechanics ---
            Opcode::Push1 | Opcode::Push2 | Opcode::Push3 => {
                for operand in &instr.operands {
                    if !matches!(operand, Operand::None) {
                        let v = self.read_operand(unit, operand);
                        self.push_value(v);
                    }
                }
            }
            Opcode::Pop1 | Opcode::Pop2 | Opcode::Pop3 => {
                let count = match instr.opcode {
                    Opcode::Pop1 => 1,
                    Opcode::Pop2 => 2,
                    _ => 3,
                };
                for operand in instr.operands[..count].iter().rev() {
                    let v = self.pop_value();
                    self.write_operand(unit, operand, v);
                }
            }
            Opcode::Erase => {
                self.pop_value();
            }

            // --- arithmetic / relational ---
            Opcode::Add => self.binary_op(BinOp::Add)?,
            Opcode::Sub => self.binary_op(BinOp::Sub)?,
            Opcode::Mult => self.binary_op(BinOp::Mult)?,
            Opcode::Div => self.binary_op(BinOp::Div)?,
            Opcode::Exp => self.binary_op(BinOp::Exp)?,
            Opcode::Mod => self.binary_op(BinOp::Mod)?,
            Opcode::Min => self.binary_op(BinOp::Min)?,
            Opcode::Max => self.binary_op(BinOp::Max)?,
            Opcode::Uminus => self.unary_op("uminus")?,
            Opcode::Eq => {
                let (l, r) = self.pop_pair();
                self.push_value(Specifier::boolean(value_eq(&l, &r)));
            }
            Opcode::Ne => {
                let (l, r) = self.pop_pair();
                self.push_value(Specifier::boolean(!value_eq(&l, &r)));
            }
            Opcode::Lt => self.binary_op(BinOp::Lt)?,
            Opcode::Le => {
                let (l, r) = self.pop_pair();
                let lt = self.relational(BinOp::Lt, &l, &r)?.truthy();
                self.push_value(Specifier::boolean(lt || value_eq(&l, &r)));
            }
            Opcode::In => self.binary_op(BinOp::In)?,
            Opcode::Notin => {
                let (l, r) = self.pop_pair();
                let in_result = self.relational(BinOp::In, &l, &r)?;
                self.push_value(Specifier::boolean(!in_result.truthy()));
            }
            Opcode::Incs => {
                let (l, r) = self.pop_pair();
                match (&l, &r) {
                    (Specifier::Set(a), Specifier::Set(b)) => {
                        self.push_value(Specifier::boolean(a.is_subset_of(b)))
                    }
                    _ => return Err(AbendError::bad_argument("incs", &l)),
                }
            }

            // --- container operations ---
            Opcode::With => self.binary_op(BinOp::With)?,
            Opcode::Less => self.binary_op(BinOp::Less)?,
            Opcode::Lessf => self.binary_op(BinOp::Lessf)?,
            Opcode::From => {
                let c = self.pop_value();
                match c {
                    Specifier::Set(s) => {
                        let (elem, rest) = s.from_arb();
                        self.push_value(Specifier::Set(Rc::new(rest)));
                        self.push_value(elem);
                    }
                    other => return Err(AbendError::bad_argument("from", &other)),
                }
            }
            Opcode::Fromb => {
                let c = self.pop_value();
                match c {
                    Specifier::Tuple(t) => {
                        let (elem, rest) = t.from_first();
                        self.push_value(Specifier::Tuple(Rc::new(rest)));
                        self.push_value(elem);
                    }
                    Specifier::Str(s) if !s.is_empty() => {
                        let ch = s.char_at(1).unwrap_or_else(|| giveup("fromb char_at inconsistent with non-empty string"));
                        self.push_value(Specifier::Str(s.slice(2, s.len_chars())));
                        self.push_value(Specifier::string(ch.to_string()));
                    }
                    other => return Err(AbendError::bad_argument("fromb", &other)),
                }
            }
            Opcode::Frome => {
                let c = self.pop_value();
                match c {
                    Specifier::Tuple(t) => {
                        let (elem, rest) = t.from_last();
                        self.push_value(Specifier::Tuple(Rc::new(rest)));
                        self.push_value(elem);
                    }
                    Specifier::Str(s) if !s.is_empty() => {
                        let n = s.len_chars();
                        let ch = s.char_at(n).unwrap_or_else(|| giveup("frome char_at inconsistent with non-empty string"));
                        self.push_value(Specifier::Str(s.slice(1, n - 1)));
                        self.push_value(Specifier::string(ch.to_string()));
                    }
                    other => return Err(AbendError::bad_argument("frome", &other)),
                }
            }
            Opcode::Pow => self.unary_op("pow")?,
            Opcode::Arb => self.unary_op("arb")?,
            Opcode::Nelt => self.unary_op("nelt")?,
            Opcode::Domain => self.unary_op("domain")?,
            Opcode::Range => self.unary_op("range")?,
            Opcode::Of => {
                let container = self.read_operand(unit, op_a);
                let key = self.read_operand(unit, op_b);
                let result = match &container {
                    Specifier::Tuple(t) => t.get(Self::to_i64(&key)?),
                    Specifier::Map(m) => m.apply(&key),
                    other => return Err(AbendError::bad_argument("of", other)),
                };
                self.write_operand(unit, op_c, result);
            }
            Opcode::Ofa => {
                let container = self.read_operand(unit, op_a);
                let key = self.read_operand(unit, op_b);
                match &container {
                    Specifier::Map(m) => self.write_operand(unit, op_c, Specifier::Set(m.apply_all(&key))),
                    other => return Err(AbendError::bad_argument("ofa", other)),
                }
            }
            Opcode::Of1 => {
                let container = self.read_operand(unit, op_a);
                let elems = match &container {
                    Specifier::Set(s) => s.elements(),
                    Specifier::Tuple(t) => t.elements(),
                    other => return Err(AbendError::bad_argument("of1", other)),
                };
                if elems.len() != 1 {
                    return Err(AbendError::Custom("of1 requires exactly one element".into()));
                }
                self.write_operand(unit, op_b, elems.into_iter().next().unwrap());
            }
            Opcode::Tupof => {
                let v = self.read_operand(unit, op_a);
                let t = match v {
                    Specifier::Tuple(t) => (*t).clone(),
                    Specifier::Set(s) => crate::containers::tuple::Tuple::from_elements(s.elements()),
                    other => return Err(AbendError::bad_argument("tupof", &other)),
                };
                self.write_operand(unit, op_b, Specifier::Tuple(Rc::new(t)));
            }
            Opcode::Slice => {
                let end = Self::to_i64(&self.pop_value())?;
                let start = Self::to_i64(&self.pop_value())?;
                let container = self.read_operand(unit, op_a);
                match &container {
                    Specifier::Tuple(t) => self.write_operand(unit, op_b, Specifier::Tuple(Rc::new(t.slice(start, end)))),
                    Specifier::Str(s) => self.write_operand(
                        unit,
                        op_b,
                        Specifier::Str(s.slice(start.max(0) as usize, end.max(0) as usize)),
                    ),
                    other => return Err(AbendError::bad_argument("slice", other)),
                }
            }
            Opcode::End => {
                let container = self.read_operand(unit, op_a);
                let start = Self::to_i64(&self.read_operand(unit, op_b))?;
                match &container {
                    Specifier::Tuple(t) => {
                        self.write_operand(unit, op_c, Specifier::Tuple(Rc::new(t.slice(start, t.len() as i64))))
                    }
                    Specifier::Str(s) => {
                        self.write_operand(unit, op_c, Specifier::Str(s.slice(start.max(0) as usize, s.len_chars())))
                    }
                    other => return Err(AbendError::bad_argument("end", other)),
                }
            }
            Opcode::Sof => {
                let container = self.read_operand(unit, op_a);
                let key = self.read_operand(unit, op_b);
                let value = self.read_operand(unit, op_c);
                let updated = match &container {
                    Specifier::Tuple(t) => Specifier::Tuple(Rc::new(t.set(Self::to_i64(&key)?, value))),
                    Specifier::Map(m) => Specifier::Map(Rc::new(m.set_single(key, value))),
                    other => return Err(AbendError::bad_argument("sof", other)),
                };
                self.write_operand(unit, op_a, updated);
            }
            Opcode::Sofa => {
                let container = self.read_operand(unit, op_a);
                let key = self.read_operand(unit, op_b);
                let values = self.read_operand(unit, op_c);
                match (&container, &values) {
                    (Specifier::Map(m), Specifier::Set(s)) => {
                        self.write_operand(unit, op_a, Specifier::Map(Rc::new(m.set_multi(key, s.clone()))))
                    }
                    _ => return Err(AbendError::bad_argument("sofa", &container)),
                }
            }
            Opcode::Sslice => {
                let source = self.pop_value();
                let end = Self::to_i64(&self.pop_value())?;
                let start = Self::to_i64(&self.pop_value())?;
                let container = self.read_operand(unit, op_a);
                match (&container, &source) {
                    (Specifier::Tuple(t), Specifier::Tuple(src)) => {
                        let updated = crate::containers::tuple::Tuple::slice_assign(
                            t,
                            (start - 1).max(0) as usize,
                            end.max(0) as usize,
                            src,
                        );
                        self.write_operand(unit, op_a, Specifier::Tuple(Rc::new(updated)));
                    }
                    _ => return Err(AbendError::bad_argument("sslice", &container)),
                }
            }
            Opcode::Send => {
                let source = self.pop_value();
                let start = Self::to_i64(&self.read_operand(unit, op_b))?;
                let container = self.read_operand(unit, op_a);
                match (&container, &source) {
                    (Specifier::Tuple(t), Specifier::Tuple(src)) => {
                        let updated =
                            crate::containers::tuple::Tuple::slice_assign(t, (start - 1).max(0) as usize, t.len(), src);
                        self.write_operand(unit, op_a, Specifier::Tuple(Rc::new(updated)));
                    }
                    _ => return Err(AbendError::bad_argument("send", &container)),
                }
            }
            Opcode::Smap => {
                let container = self.read_operand(unit, op_a);
                let key = self.read_operand(unit, op_b);
                let value = self.read_operand(unit, op_c);
                match &container {
                    Specifier::Map(m) => self.write_operand(unit, op_a, Specifier::Map(Rc::new(m.set_single(key, value)))),
                    other => return Err(AbendError::bad_argument("smap", other)),
                }
            }
            Opcode::SetLiteral => {
                let count = op_a.as_int().unwrap_or(0) as usize;
                let mut set = crate::containers::set::SetHeader::new();
                let mut elems = Vec::with_capacity(count);
                for _ in 0..count {
                    elems.push(self.pop_value());
                }
                for e in elems.into_iter().rev() {
                    set = set.with(e);
                }
                self.push_value(Specifier::Set(Rc::new(set)));
            }
            Opcode::TupleLiteral => {
                let count = op_a.as_int().unwrap_or(0) as usize;
                let mut elems = Vec::with_capacity(count);
                for _ in 0..count {
                    elems.push(self.pop_value());
                }
                elems.reverse();
                self.push_value(Specifier::Tuple(Rc::new(crate::containers::tuple::Tuple::from_elements(elems))));
            }

            // --- control flow ---
            Opcode::Go => self.jump(op_a.as_label().unwrap_or_else(|| giveup("go without a label operand"))),
            Opcode::Goind => {
                let v = self.read_operand(unit, op_a);
                match v {
                    Specifier::Label(l) => self.jump(l),
                    other => return Err(AbendError::bad_argument("goind", &other)),
                }
            }
            Opcode::Gotrue => {
                let cond = self.pop_value();
                if cond.truthy() {
                    self.jump(op_a.as_label().unwrap_or_else(|| giveup("gotrue without a label")));
                }
            }
            Opcode::Gofalse => {
                let cond = self.pop_value();
                if !cond.truthy() {
                    self.jump(op_a.as_label().unwrap_or_else(|| giveup("gofalse without a label")));
                }
            }
            Opcode::GoEq | Opcode::GoNe => {
                let (l, r) = self.pop_pair();
                let eq = value_eq(&l, &r);
                let take = if instr.opcode == Opcode::GoEq { eq } else { !eq };
                if take {
                    self.jump(op_a.as_label().unwrap_or_else(|| giveup("conditional go without a label")));
                }
            }
            Opcode::GoLt | Opcode::GoNlt | Opcode::GoLe | Opcode::GoNle => {
                let (l, r) = self.pop_pair();
                let lt = self.relational(BinOp::Lt, &l, &r)?.truthy();
                let le = lt || value_eq(&l, &r);
                let take = match instr.opcode {
                    Opcode::GoLt => lt,
                    Opcode::GoNlt => !lt,
                    Opcode::GoLe => le,
                    _ => !le,
                };
                if take {
                    self.jump(op_a.as_label().unwrap_or_else(|| giveup("conditional go without a label")));
                }
            }
            Opcode::GoIn | Opcode::GoNotin => {
                let (l, r) = self.pop_pair();
                let inn = self.relational(BinOp::In, &l, &r)?.truthy();
                let take = if instr.opcode == Opcode::GoIn { inn } else { !inn };
                if take {
                    self.jump(op_a.as_label().unwrap_or_else(|| giveup("conditional go without a label")));
                }
            }
            Opcode::GoIncs | Opcode::GoNincs => {
                let (l, r) = self.pop_pair();
                let incs = match (&l, &r) {
                    (Specifier::Set(a), Specifier::Set(b)) => a.is_subset_of(b),
                    _ => return Err(AbendError::bad_argument("goincs", &l)),
                };
                let take = if instr.opcode == Opcode::GoIncs { incs } else { !incs };
                if take {
                    self.jump(op_a.as_label().unwrap_or_else(|| giveup("conditional go without a label")));
                }
            }
            Opcode::Intcheck => {
                if self.call_stack.len() == 1 {
                    return Ok(DispatchSignal::Yield);
                }
            }
            Opcode::Stop | Opcode::Return => {
                self.do_return();
                return Ok(DispatchSignal::Halt);
            }
            Opcode::Stopall => return Ok(DispatchSignal::StopAll),

            // --- calls and iteration ---
            Opcode::Lcall | Opcode::Call => {
                let callee = if instr.opcode == Opcode::Lcall {
                    self.read_operand(unit, op_a)
                } else {
                    self.pop_value()
                };
                let arg_count = op_b.as_int().unwrap_or(0) as usize;
                let mut args = Vec::with_capacity(arg_count);
                for _ in 0..arg_count {
                    args.push(self.pop_value());
                }
                args.reverse();
                match callee {
                    Specifier::Proc(p) => self.push_call(p, args),
                    other => return Err(AbendError::bad_argument("call", &other)),
                }
            }
            Opcode::Iter => {
                let source = self.read_operand(unit, op_a);
                let it = self.make_iter(&source)?;
                self.write_operand(unit, op_b, it);
            }
            Opcode::Inext => {
                let iter_val = self.read_operand(unit, op_a);
                match self.advance_iter(&iter_val)? {
                    Some(v) => self.write_operand(unit, op_b, v),
                    None => self.jump(op_c.as_label().unwrap_or_else(|| giveup("inext without an exit label"))),
                }
            }
            Opcode::Builtin => {
                let tag = op_a.as_int().unwrap_or_else(|| giveup("builtin without a tag operand"));
                let builtin_op = crate::interp::builtin::BuiltinOp::try_from(tag as u8)
                    .unwrap_or_else(|_| giveup("unrecognized builtin tag"));
                let arg_count = op_b.as_int().unwrap_or(0) as usize;
                let mut args = Vec::with_capacity(arg_count);
                for _ in 0..arg_count {
                    args.push(self.pop_value());
                }
                args.reverse();
                let result = self.call_builtin(builtin_op, args)?;
                self.push_value(result);
            }

            // --- objects / processes ---
            Opcode::Initobj => {
                let class = op_a.as_unit().unwrap_or_else(|| giveup("initobj without a class operand"));
                let var_count = self.units.get(class).slot_info.instance_vars.len();
                let obj = ObjectHeader::new(class, var_count);
                self.write_operand(unit, op_b, Specifier::Object(obj));
            }
            Opcode::Initend => {}
            Opcode::Initproc => {
                let class = op_a.as_unit().unwrap_or_else(|| giveup("initproc without a class operand"));
                let var_count = self.units.get(class).slot_info.instance_vars.len();
                let mailbox = Mailbox::new();
                let proc_obj = ObjectHeader::new_process(class, var_count, mailbox);
                self.scheduler.spawn(proc_obj.clone());
                self.write_operand(unit, op_b, Specifier::Process(proc_obj));
            }
            Opcode::Initpend => {}
            Opcode::Slot => {
                let obj_val = self.read_operand(unit, op_a);
                let slot_id = op_b.as_slot().unwrap_or_else(|| giveup("slot without a slot-id operand"));
                let obj = match &obj_val {
                    Specifier::Object(o) | Specifier::Process(o) => o,
                    other => return Err(AbendError::bad_argument("slot", other)),
                };
                let info = self.units.get(obj.class).slot_info.get(slot_id);
                let value = match info.kind {
                    crate::slot::SlotKind::InstanceVar { position } => obj.get_var(position),
                    _ => return Err(AbendError::Custom("slot is not an instance variable".into())),
                };
                self.write_operand(unit, op_c, value);
            }
            Opcode::Sslot => {
                let obj_val = self.read_operand(unit, op_a);
                let slot_id = op_b.as_slot().unwrap_or_else(|| giveup("sslot without a slot-id operand"));
                let new_value = self.read_operand(unit, op_c);
                let obj = match &obj_val {
                    Specifier::Object(o) | Specifier::Process(o) => o.clone(),
                    other => return Err(AbendError::bad_argument("sslot", other)),
                };
                let info = self.units.get(obj.class).slot_info.get(slot_id);
                let position = match info.kind {
                    crate::slot::SlotKind::InstanceVar { position } => position,
                    _ => return Err(AbendError::Custom("sslot is not an instance variable".into())),
                };
                let updated = set_var(&obj, position, new_value);
                let rewrapped = if matches!(obj_val, Specifier::Process(_)) {
                    Specifier::Process(updated)
                } else {
                    Specifier::Object(updated)
                };
                self.write_operand(unit, op_a, rewrapped);
            }
            Opcode::Slotof => {
                let name_val = self.read_operand(unit, op_a);
                let name = match &name_val {
                    Specifier::Str(s) => s.as_str().to_string(),
                    other => return Err(AbendError::bad_argument("slotof", other)),
                };
                let result = match self.slots.lookup(&name) {
                    Some(id) => Specifier::int(id.0 as i64),
                    None => Specifier::Omega,
                };
                self.write_operand(unit, op_b, result);
            }
            Opcode::SelfOp => {
                let self_obj = self.top().self_obj.clone();
                match self_obj {
                    Some(obj) => self.write_operand(unit, op_a, Specifier::Object(obj)),
                    None => self.write_operand(unit, op_a, Specifier::Omega),
                }
            }
            Opcode::Penviron => {
                let proc_val = self.read_operand(unit, op_a);
                match proc_val {
                    Specifier::Proc(p) => {
                        let entry = self.units.get(p.unit);
                        let base = p.spec_block_base as usize;
                        let len = p.spec_block_len as usize;
                        let locals = entry.spec_block.borrow()[base..base + len].to_vec();
                        let captured = p.capture_environment(&locals);
                        self.write_operand(unit, op_a, Specifier::Proc(captured));
                    }
                    other => return Err(AbendError::bad_argument("penviron", &other)),
                }
            }
            Opcode::Menviron => {
                let proc_val = self.read_operand(unit, op_a);
                let obj_val = self.read_operand(unit, op_b);
                match (proc_val, &obj_val) {
                    (Specifier::Proc(p), Specifier::Object(o) | Specifier::Process(o)) => {
                        self.write_operand(unit, op_a, Specifier::Proc(p.bind_self(o.clone())));
                    }
                    (other, _) => return Err(AbendError::bad_argument("menviron", &other)),
                }
            }

            // --- debug ---
            Opcode::Filepos => {
                let line = op_a.as_int().unwrap_or(0);
                let col = op_b.as_int().unwrap_or(0);
                self.last_filepos = (line, col);
            }
            Opcode::Assert => {
                let cond = self.read_operand(unit, op_a);
                if !cond.truthy() {
                    let (line, col) = self.last_filepos;
                    return Err(AbendError::Custom(format!("assertion failed at {line}:{col}")));
                }
            }
        }
        Ok(DispatchSignal::Continue)
    }

    /// Runs `unit`'s initialization code exactly once.
    pub fn run_init(&mut self, unit: UnitId) -> AbendResult<()> {
        if *self.units.get(unit).initialized.borrow() {
            return Ok(());
        }
        if self.code_len(unit, CodeSegment::Init) > 0 {
            self.call_stack.push(Frame::new(unit, CodeSegment::Init, 0));
            match self.run_until(0)? {
                RunSignal::Done => {}
                RunSignal::StopAll => return Ok(()),
                RunSignal::Yield => giveup("intcheck yielded during unit initialization"),
            }
        }
        *self.units.get(unit).initialized.borrow_mut() = true;
        Ok(())
    }

    /// Runs `unit`'s body code from offset 0 to completion; this is
    /// the CLI driver's entry point for a `Program` unit.
    pub fn run_body(&mut self, unit: UnitId) -> AbendResult<Specifier> {
        self.call_stack.push(Frame::new(unit, CodeSegment::Body, 0));
        match self.run_until(0)? {
            RunSignal::Done => Ok(self.call_stack.last().map(|_| Specifier::Omega).unwrap_or(Specifier::Omega)),
            RunSignal::StopAll => Ok(Specifier::Omega),
            RunSignal::Yield => giveup("intcheck yielded outside of any scheduled process"),
        }
    }

    /// Drives the whole process pool to completion, resuming suspended
    /// processes' saved call stacks in FIFO order.
    pub fn run_scheduler(&mut self) -> AbendResult<()> {
        while let Some(proc) = self.scheduler.next_runnable() {
            let key = Rc::as_ptr(&proc) as *const () as usize;
            self.call_stack = self.suspended.remove(&key).unwrap_or_else(|| vec![Frame::new(proc.class, CodeSegment::Body, 0)]);
            if let Some(frame) = self.call_stack.first_mut() {
                if frame.self_obj.is_none() {
                    frame.self_obj = Some(proc.clone());
                }
            }
            match self.run_until(0)? {
                RunSignal::Done => {
                    if let Some(record) = proc.process.borrow_mut().as_mut() {
                        record.status = ProcessStatus::Terminated;
                    }
                }
                RunSignal::Yield => {
                    self.suspended.insert(key, std::mem::take(&mut self.call_stack));
                    self.scheduler.requeue(proc);
                }
                RunSignal::StopAll => {
                    self.call_stack.clear();
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::opcode::Instruction;
    use crate::unit::{UnitEntry, UnitKind};

    fn program_with(code: Vec<Instruction>) -> (Engine, UnitId) {
        let mut engine = Engine::new(RuntimeConfig::default());
        let mut entry = UnitEntry::new("main".into(), UnitKind::Program, 0, 4);
        entry.body_code = code;
        let unit = engine.units.insert(entry);
        (engine, unit)
    }

    #[test]
    fn pushes_two_literals_and_adds_them() {
        let (mut engine, unit) = program_with(vec![
            Instruction::new(Opcode::Push2, Operand::Int(2), Operand::Int(3), Operand::None),
            Instruction::new(Opcode::Add, Operand::None, Operand::None, Operand::None),
            Instruction::nullary(Opcode::Stop),
        ]);
        engine.call_stack.push(Frame::new(unit, CodeSegment::Body, 0));
        engine.run_until(0).unwrap();
    }

    #[test]
    fn go_true_jumps_over_a_push() {
        let (mut engine, unit) = program_with(vec![
            Instruction::new(Opcode::Push1, Operand::Int(1), Operand::None, Operand::None),
            Instruction::new(
                Opcode::Gotrue,
                Operand::Label(Label { unit: UnitId(0), segment: CodeSegment::Body, offset: 3 }),
                Operand::None,
                Operand::None,
            ),
            Instruction::new(Opcode::Push1, Operand::Int(99), Operand::None, Operand::None),
            Instruction::nullary(Opcode::Stop),
        ]);
        engine.call_stack.push(Frame::new(unit, CodeSegment::Body, 0));
        engine.run_until(0).unwrap();
    }

    #[test]
    fn set_literal_builds_from_popped_stack_values() {
        let (mut engine, unit) = program_with(vec![
            Instruction::new(Opcode::Push2, Operand::Int(1), Operand::Int(2), Operand::None),
            Instruction::new(Opcode::SetLiteral, Operand::Int(2), Operand::None, Operand::None),
            Instruction::nullary(Opcode::Stop),
        ]);
        engine.call_stack.push(Frame::new(unit, CodeSegment::Body, 0));
        engine.run_until(0).unwrap();
    }
}
