//! Bytecode instruction format: the operand-tagging scheme, with opcodes
//! as a `#[repr(u8)]` + `num_enum` enum.

use crate::slot::SlotId;
use crate::unit::UnitId;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Opcode families; this enum enumerates every named member.
#[allow(non_camel_case_types)]
#[derive(Debug, Eq, PartialEq, Copy, Clone, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Opcode {
    // stack mechanics
    Push1 = 0,
    Push2,
    Push3,
    Pop1,
    Pop2,
    Pop3,
    Erase,

    // arithmetic / relational
    Add,
    Sub,
    Mult,
    Div,
    Exp,
    Mod,
    Min,
    Max,
    Uminus,
    Eq,
    Ne,
    Lt,
    Le,
    In,
    Notin,
    Incs,

    // container
    With,
    Less,
    Lessf,
    From,
    Fromb,
    Frome,
    Pow,
    Arb,
    Nelt,
    Domain,
    Range,
    Of,
    Ofa,
    Of1,
    Tupof,
    Slice,
    End,
    Sof,
    Sofa,
    Sslice,
    Send,
    Smap,
    SetLiteral,
    TupleLiteral,

    // control flow
    Go,
    Goind,
    Gotrue,
    Gofalse,
    GoEq,
    GoNe,
    GoLt,
    GoNlt,
    GoLe,
    GoNle,
    GoIn,
    GoNotin,
    GoIncs,
    GoNincs,
    Intcheck,
    Stop,
    Stopall,

    // calls and iteration
    Lcall,
    Call,
    Return,
    Iter,
    Inext,
    /// Invokes a file/stream built-in (`open`/`close`/`get`/.../`fsize`);
    /// `op_a` carries the `BuiltinOp` tag, `op_b` the popped argument count.
    Builtin,

    // objects / processes
    Initobj,
    Initend,
    Initproc,
    Initpend,
    Slot,
    Sslot,
    Slotof,
    SelfOp,
    Penviron,
    Menviron,

    // debug
    Filepos,
    Assert,
}

/// Either the initialization code or the body code of the unit the label
/// belongs to: label literals resolve to instruction pointers in either
/// init or body code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeSegment {
    Init,
    Body,
}

/// A resolved instruction pointer (the `label` form).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label {
    pub unit: UnitId,
    pub segment: CodeSegment,
    pub offset: u32,
}

/// One bytecode operand, tagged at compile time as integer /
/// specifier-pointer / instruction-pointer / slot-id / class-pointer /
/// process-pointer.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    /// A plain integer immediate (formal counts, literal small ints).
    Int(i64),
    /// Index into the current frame's spec block — "specifier-pointer".
    SpecSlot(u32),
    /// "instruction-pointer".
    Label(Label),
    /// "slot-id".
    Slot(SlotId),
    /// "class-pointer" / "process-pointer" — both addressed by `UnitId`.
    Unit(UnitId),
}

impl Operand {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Operand::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_spec_slot(&self) -> Option<u32> {
        match self {
            Operand::SpecSlot(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_label(&self) -> Option<Label> {
        match self {
            Operand::Label(l) => Some(*l),
            _ => None,
        }
    }

    pub fn as_slot(&self) -> Option<SlotId> {
        match self {
            Operand::Slot(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_unit(&self) -> Option<UnitId> {
        match self {
            Operand::Unit(u) => Some(*u),
            _ => None,
        }
    }
}

/// Opcode plus three operands: the instruction format is fixed width.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: [Operand; 3],
}

impl Instruction {
    pub fn new(opcode: Opcode, a: Operand, b: Operand, c: Operand) -> Self {
        Instruction { opcode, operands: [a, b, c] }
    }

    pub fn nullary(opcode: Opcode) -> Self {
        Instruction { opcode, operands: [Operand::None, Operand::None, Operand::None] }
    }
}
