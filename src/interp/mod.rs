//! The bytecode interpreter.

pub mod builtin;
pub mod engine;
pub mod iterator;
pub mod opcode;
pub mod operator;
pub mod procedure;

pub use engine::Engine;
pub use opcode::{Instruction, Opcode, Operand};
