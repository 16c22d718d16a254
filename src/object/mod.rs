//! Object/process header tree and slot dispatch.

pub mod header;

pub use header::{make_mut, set_var, ObjectHeader, ObjectRef, ProcessRecord, ProcessStatus};
