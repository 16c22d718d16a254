//! Error tiers.
//!
//! Tier 1 (type/arity) and tier 3 (I/O) errors are recoverable at the
//! top-level call boundary and are modeled as [`AbendError`]. Tier 2
//! (invariant violations) are not recoverable and are raised with
//! [`giveup`], which aborts the process — they must never arise from a
//! well-formed program. Tier 4 (loader) errors are [`LoaderError`].

use crate::value::specifier::Specifier;

/// Tier 1/3 errors: fail the current top-level call with a message that
/// names the offending operand by its printable form.
#[derive(Debug, thiserror::Error)]
pub enum AbendError {
    #[error("bad argument kind for builtin {builtin}: {operand}")]
    BadArgumentKind { builtin: &'static str, operand: String },

    #[error("wrong number of parameters: expected {expected}, got {got}")]
    WrongArity { expected: usize, got: usize },

    #[error("bad file handle")]
    BadFileHandle,

    #[error("attempt to print to non-text file")]
    NonTextFile,

    #[error("internal values not preserved across executions")]
    NonPortableValue,

    #[error("undefined method {0} for operand")]
    UndefinedMethod(&'static str),

    #[error("type error: {0}")]
    TypeError(String),

    #[error("I/O error on stream {stream}: {source}")]
    Io { stream: String, #[source] source: std::io::Error },

    #[error("division by zero")]
    DivisionByZero,

    #[error("index out of range")]
    IndexOutOfRange,

    #[error("{0}")]
    Custom(String),
}

impl AbendError {
    /// Builds a `BadArgumentKind` error naming the operand by its printable
    /// form.
    pub fn bad_argument(builtin: &'static str, operand: &Specifier) -> Self {
        AbendError::BadArgumentKind {
            builtin,
            operand: crate::io::printer::print_to_string(operand),
        }
    }
}

/// Tier 2: assertions on runtime data-structure integrity. These must never
/// arise from any well-formed program; hitting one terminates the process
/// immediately.
pub fn giveup(message: &str) -> ! {
    log::error!("giveup: {message}");
    panic!("giveup: {message}");
}

/// Tier 4: loader failures.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("package needs recompile: {unit_name} (timestamp mismatch)")]
    NeedsRecompile { unit_name: String },

    #[error("expected package, not program: {unit_name}")]
    ExpectedPackage { unit_name: String },

    #[error("unit needs body: {unit_name}")]
    NeedsBody { unit_name: String },

    #[error("inherited unit must be a class: {unit_name}")]
    InheritedMustBeClass { unit_name: String },

    #[error("unit not found: {unit_name}")]
    NotFound { unit_name: String },

    #[error("malformed unit record: {0}")]
    Malformed(String),

    #[error("I/O error loading unit {unit_name}: {source}")]
    Io { unit_name: String, #[source] source: std::io::Error },

    #[error("native library load error: {0}")]
    Native(String),
}

/// A convenience result alias used throughout the interpreter for tier
/// 1/3 errors.
pub type AbendResult<T> = Result<T, AbendError>;

/// A convenience result alias used throughout the loader for tier 4 errors.
pub type LoaderResult<T> = Result<T, LoaderError>;
