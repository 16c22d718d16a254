//! File/stream built-ins reachable from bytecode through `Opcode::Builtin`:
//! `open`/`close`/`get`/`geta`/`getb`/`putb`/`print`/`printa`/`gets`/`puts`/
//! `fsize`/`str`/`unstr`. Each variant names one call; `Engine::call_builtin`
//! does the argument-popping and dispatch.

use num_enum::{IntoPrimitive, TryFromPrimitive};

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum BuiltinOp {
    Open = 0,
    Close,
    Get,
    Geta,
    Getb,
    Putb,
    Print,
    Printa,
    Gets,
    Puts,
    Fsize,
    Str,
    Unstr,
}
