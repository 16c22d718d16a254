//! I/O-to-value serialization: the textual reader/printer and the
//! self-describing binary codec, plus file handles.

pub mod binstr;
pub mod file;
pub mod printer;
pub mod reader;

pub use binstr::{binstr, unbinstr};
pub use file::{FileMode, FileRecord, FileRef, FileTable};
pub use printer::{print_to_string, print_with_engine};
pub use reader::{ReadError, Reader};
