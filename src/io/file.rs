//! File handles and modes, following the `setl2bin` magic-header shape.
//!
//! OS-level file/socket primitives are out of scope beyond what `std`
//! already supplies: this module wraps `std::fs`/`std::net::TcpStream`
//! behind a handle-by-atom indirection, so the interpreter never holds a
//! raw `fs::File` directly in a `Specifier`.

use crate::config::RuntimeConfig;
use crate::error::AbendError;
use crate::symbol::AtomId;
use crate::value::specifier::Specifier;
use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::net::TcpStream;
use std::rc::Rc;

/// File access modes ( table: text-in/text-out/binary-in/
/// binary-out/random/tcp/byte-in).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    TextIn,
    TextOut,
    BinaryIn,
    BinaryOut,
    Random,
    Tcp,
    ByteIn,
}

impl FileMode {
    pub fn is_input(self) -> bool {
        matches!(self, FileMode::TextIn | FileMode::BinaryIn | FileMode::ByteIn | FileMode::Random | FileMode::Tcp)
    }

    pub fn is_text(self) -> bool {
        matches!(self, FileMode::TextIn | FileMode::TextOut)
    }
}

enum Backing {
    Text(Option<BufReader<File>>, Option<BufWriter<File>>),
    Binary(File),
    Random(File),
    Tcp(TcpStream),
}

/// A single open file/stream. `handle` is the atom the interpreter's
/// specifiers address it by ( "files are addressed by atom
/// handle, not by raw descriptor").
pub struct FileRecord {
    pub handle: AtomId,
    pub mode: FileMode,
    pub name: String,
    backing: RefCell<Backing>,
    eof: RefCell<bool>,
}

pub type FileRef = Rc<FileRecord>;

/// `setl2bin` magic header written at the start of every binary-out file:
/// an 8-byte magic tag, the writing process id, and a creation timestamp.
/// Reading back a non-portable form checks the
/// timestamp against this header to enforce same-process-lifetime
/// round-tripping.
pub const SETL2BIN_MAGIC: [u8; 8] = *b"SETL2BIN";

#[derive(Debug, Clone, Copy)]
pub struct BinStrHeader {
    pub pid: i32,
    pub timestamp: i64,
}

impl BinStrHeader {
    pub fn write_to(&self, w: &mut impl Write) -> std::io::Result<()> {
        w.write_all(&SETL2BIN_MAGIC)?;
        w.write_all(&self.pid.to_le_bytes())?;
        w.write_all(&self.timestamp.to_le_bytes())?;
        Ok(())
    }

    pub fn read_from(r: &mut impl Read) -> std::io::Result<Self> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if magic != SETL2BIN_MAGIC {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "bad setl2bin magic"));
        }
        let mut pid_buf = [0u8; 4];
        r.read_exact(&mut pid_buf)?;
        let mut ts_buf = [0u8; 8];
        r.read_exact(&mut ts_buf)?;
        Ok(BinStrHeader { pid: i32::from_le_bytes(pid_buf), timestamp: i64::from_le_bytes(ts_buf) })
    }
}

impl FileRecord {
    /// `SAFE_MODE_FILE_NAMES` restriction: in safe mode, only the five
    /// predefined logical names may be opened.
    fn check_safe_mode(config: &RuntimeConfig, name: &str) -> Result<(), AbendError> {
        if !config.is_allowed_file_name(name) {
            return Err(AbendError::Custom(format!("safe mode forbids opening file {name}")));
        }
        Ok(())
    }

    pub fn open_text_in(config: &RuntimeConfig, handle: AtomId, name: &str) -> Result<FileRef, AbendError> {
        Self::check_safe_mode(config, name)?;
        let file = File::open(name).map_err(|e| AbendError::Io { stream: name.to_string(), source: e })?;
        Ok(Rc::new(FileRecord {
            handle,
            mode: FileMode::TextIn,
            name: name.to_string(),
            backing: RefCell::new(Backing::Text(Some(BufReader::new(file)), None)),
            eof: RefCell::new(false),
        }))
    }

    pub fn open_text_out(config: &RuntimeConfig, handle: AtomId, name: &str) -> Result<FileRef, AbendError> {
        Self::check_safe_mode(config, name)?;
        let file = File::create(name).map_err(|e| AbendError::Io { stream: name.to_string(), source: e })?;
        Ok(Rc::new(FileRecord {
            handle,
            mode: FileMode::TextOut,
            name: name.to_string(),
            backing: RefCell::new(Backing::Text(None, Some(BufWriter::new(file)))),
            eof: RefCell::new(false),
        }))
    }

    pub fn open_binary_out(config: &RuntimeConfig, handle: AtomId, name: &str) -> Result<FileRef, AbendError> {
        Self::check_safe_mode(config, name)?;
        let mut file = File::create(name).map_err(|e| AbendError::Io { stream: name.to_string(), source: e })?;
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let header = BinStrHeader { pid: std::process::id() as i32, timestamp };
        header.write_to(&mut file).map_err(|e| AbendError::Io { stream: name.to_string(), source: e })?;
        Ok(Rc::new(FileRecord {
            handle,
            mode: FileMode::BinaryOut,
            name: name.to_string(),
            backing: RefCell::new(Backing::Binary(file)),
            eof: RefCell::new(false),
        }))
    }

    /// Opens a file written by `open_binary_out`, consuming the leading
    /// `setl2bin` preamble so the cursor lands exactly where the first
    /// `putb`-written value begins.
    pub fn open_binary_in(config: &RuntimeConfig, handle: AtomId, name: &str) -> Result<FileRef, AbendError> {
        Self::check_safe_mode(config, name)?;
        let mut file = File::open(name).map_err(|e| AbendError::Io { stream: name.to_string(), source: e })?;
        BinStrHeader::read_from(&mut file).map_err(|e| AbendError::Io { stream: name.to_string(), source: e })?;
        Ok(Rc::new(FileRecord {
            handle,
            mode: FileMode::BinaryIn,
            name: name.to_string(),
            backing: RefCell::new(Backing::Binary(file)),
            eof: RefCell::new(false),
        }))
    }

    /// `byte-in` mode reads raw bytes with no `setl2bin` header expected,
    /// unlike `binary-in` — it shares `Backing::Binary` since `read_bytes`
    /// doesn't consult `mode` either way.
    pub fn open_byte_in(config: &RuntimeConfig, handle: AtomId, name: &str) -> Result<FileRef, AbendError> {
        Self::check_safe_mode(config, name)?;
        let file = File::open(name).map_err(|e| AbendError::Io { stream: name.to_string(), source: e })?;
        Ok(Rc::new(FileRecord {
            handle,
            mode: FileMode::ByteIn,
            name: name.to_string(),
            backing: RefCell::new(Backing::Binary(file)),
            eof: RefCell::new(false),
        }))
    }

    /// Opens for positioned `gets`/`puts` access, creating the file if it
    /// doesn't exist.
    pub fn open_random(config: &RuntimeConfig, handle: AtomId, name: &str) -> Result<FileRef, AbendError> {
        Self::check_safe_mode(config, name)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(name)
            .map_err(|e| AbendError::Io { stream: name.to_string(), source: e })?;
        Ok(Rc::new(FileRecord {
            handle,
            mode: FileMode::Random,
            name: name.to_string(),
            backing: RefCell::new(Backing::Random(file)),
            eof: RefCell::new(false),
        }))
    }

    /// Reads `len` bytes starting at the 1-based byte position `pos`.
    pub fn gets(&self, pos: i64, len: usize) -> Result<Vec<u8>, AbendError> {
        let mut backing = self.backing.borrow_mut();
        let file = match &mut *backing {
            Backing::Random(f) => f,
            _ => return Err(AbendError::BadFileHandle),
        };
        file.seek(SeekFrom::Start((pos - 1).max(0) as u64))
            .map_err(|e| AbendError::Io { stream: self.name.clone(), source: e })?;
        let mut buf = vec![0u8; len];
        let n = file.read(&mut buf).map_err(|e| AbendError::Io { stream: self.name.clone(), source: e })?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Writes `bytes` starting at the 1-based byte position `pos`.
    pub fn puts(&self, pos: i64, bytes: &[u8]) -> Result<(), AbendError> {
        let mut backing = self.backing.borrow_mut();
        let file = match &mut *backing {
            Backing::Random(f) => f,
            _ => return Err(AbendError::BadFileHandle),
        };
        file.seek(SeekFrom::Start((pos - 1).max(0) as u64))
            .map_err(|e| AbendError::Io { stream: self.name.clone(), source: e })?;
        file.write_all(bytes).map_err(|e| AbendError::Io { stream: self.name.clone(), source: e })
    }

    /// Current size in bytes of a random-access file.
    pub fn fsize(&self) -> Result<u64, AbendError> {
        let mut backing = self.backing.borrow_mut();
        let file = match &mut *backing {
            Backing::Random(f) => f,
            _ => return Err(AbendError::BadFileHandle),
        };
        file.seek(SeekFrom::End(0)).map_err(|e| AbendError::Io { stream: self.name.clone(), source: e })
    }

    pub fn connect_tcp(handle: AtomId, addr: &str) -> Result<FileRef, AbendError> {
        let stream = TcpStream::connect(addr).map_err(|e| AbendError::Io { stream: addr.to_string(), source: e })?;
        Ok(Rc::new(FileRecord {
            handle,
            mode: FileMode::Tcp,
            name: addr.to_string(),
            backing: RefCell::new(Backing::Tcp(stream)),
            eof: RefCell::new(false),
        }))
    }

    pub fn is_eof(&self) -> bool {
        *self.eof.borrow()
    }

    /// Reads one line of text, stripping the trailing newline (backs
    /// `read`/`reada`'s line-oriented input). Sets the EOF flag and
    /// returns `None` once the stream is exhausted.
    pub fn read_line(&self) -> Result<Option<String>, AbendError> {
        if !self.mode.is_text() || !self.mode.is_input() {
            return Err(AbendError::NonTextFile);
        }
        let mut backing = self.backing.borrow_mut();
        let reader = match &mut *backing {
            Backing::Text(Some(r), _) => r,
            _ => return Err(AbendError::BadFileHandle),
        };
        let mut line = String::new();
        let n = reader.read_line(&mut line).map_err(|e| AbendError::Io { stream: self.name.clone(), source: e })?;
        if n == 0 {
            *self.eof.borrow_mut() = true;
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    /// Writes text; printing to a non-text file is a tier-1 error
    /// (`AbendError::NonTextFile`).
    pub fn write_text(&self, text: &str) -> Result<(), AbendError> {
        if !self.mode.is_text() {
            return Err(AbendError::NonTextFile);
        }
        let mut backing = self.backing.borrow_mut();
        let writer = match &mut *backing {
            Backing::Text(_, Some(w)) => w,
            _ => return Err(AbendError::BadFileHandle),
        };
        writer.write_all(text.as_bytes()).map_err(|e| AbendError::Io { stream: self.name.clone(), source: e })?;
        Ok(())
    }

    pub fn write_bytes(&self, bytes: &[u8]) -> Result<(), AbendError> {
        let mut backing = self.backing.borrow_mut();
        match &mut *backing {
            Backing::Binary(f) => f.write_all(bytes).map_err(|e| AbendError::Io { stream: self.name.clone(), source: e }),
            Backing::Tcp(s) => s.write_all(bytes).map_err(|e| AbendError::Io { stream: self.name.clone(), source: e }),
            Backing::Text(..) | Backing::Random(..) => Err(AbendError::BadFileHandle),
        }
    }

    pub fn read_bytes(&self, buf: &mut [u8]) -> Result<usize, AbendError> {
        let mut backing = self.backing.borrow_mut();
        let n = match &mut *backing {
            Backing::Binary(f) => f.read(buf).map_err(|e| AbendError::Io { stream: self.name.clone(), source: e })?,
            Backing::Tcp(s) => s.read(buf).map_err(|e| AbendError::Io { stream: self.name.clone(), source: e })?,
            Backing::Text(..) | Backing::Random(..) => return Err(AbendError::BadFileHandle),
        };
        if n == 0 {
            *self.eof.borrow_mut() = true;
        }
        Ok(n)
    }

    fn seek_back(&self, n: usize) -> Result<(), AbendError> {
        let mut backing = self.backing.borrow_mut();
        match &mut *backing {
            Backing::Binary(f) => f
                .seek(SeekFrom::Current(-(n as i64)))
                .map(|_| ())
                .map_err(|e| AbendError::Io { stream: self.name.clone(), source: e }),
            _ => Err(AbendError::BadFileHandle),
        }
    }

    /// Writes one self-contained `binstr`-encoded value (`putb`).
    pub fn write_binstr_value(&self, value: &Specifier, header: &BinStrHeader) -> Result<(), AbendError> {
        let bytes = crate::io::binstr::binstr(value, header)?;
        self.write_bytes(&bytes)
    }

    /// Reads one self-contained `binstr`-encoded value (`getb`), growing its
    /// read buffer until a full value decodes, then seeking back over any
    /// unread trailing bytes so the next call picks up where this one left
    /// off. Returns `None` at EOF with nothing buffered yet.
    pub fn read_binstr_value(&self, header: &BinStrHeader) -> Result<Option<Specifier>, AbendError> {
        const CHUNK: usize = 4096;
        const MAX: usize = 16 * 1024 * 1024;
        let mut buf = Vec::new();
        loop {
            let mut chunk = vec![0u8; CHUNK];
            let n = self.read_bytes(&mut chunk)?;
            if n == 0 {
                if buf.is_empty() {
                    return Ok(None);
                }
                return Err(AbendError::Custom("truncated binstr value at end of file".into()));
            }
            buf.extend_from_slice(&chunk[..n]);
            match crate::io::binstr::unbinstr_prefix(&buf, header) {
                Ok((value, consumed)) => {
                    let leftover = buf.len() - consumed;
                    if leftover > 0 {
                        self.seek_back(leftover)?;
                    }
                    return Ok(Some(value));
                }
                Err(_) if buf.len() < MAX => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

/// Process-wide file map, keyed by atom handle ( "process-wide
/// state" includes the file table).
#[derive(Debug, Default)]
pub struct FileTable {
    files: std::collections::HashMap<AtomId, FileRef>,
}

impl std::fmt::Debug for FileRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRecord").field("handle", &self.handle).field("name", &self.name).finish()
    }
}

impl FileTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, file: FileRef) {
        self.files.insert(file.handle, file);
    }

    pub fn get(&self, handle: AtomId) -> Option<FileRef> {
        self.files.get(&handle).cloned()
    }

    pub fn close(&mut self, handle: AtomId) -> Option<FileRef> {
        self.files.remove(&handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_round_trip_through_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let config = RuntimeConfig::default();
        let handle = AtomId(10);
        let out = FileRecord::open_text_out(&config, handle, path.to_str().unwrap()).unwrap();
        out.write_text("hello\n").unwrap();
        drop(out);
        let in_file = FileRecord::open_text_in(&config, handle, path.to_str().unwrap()).unwrap();
        assert_eq!(in_file.read_line().unwrap(), Some("hello".to_string()));
        assert_eq!(in_file.read_line().unwrap(), None);
        assert!(in_file.is_eof());
    }

    #[test]
    fn safe_mode_rejects_arbitrary_file_names() {
        let mut config = RuntimeConfig::default();
        config.safe_mode = true;
        let err = FileRecord::open_text_out(&config, AtomId(1), "/tmp/not-allowed.txt");
        assert!(err.is_err());
    }

    #[test]
    fn binary_out_writes_setl2bin_magic_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let config = RuntimeConfig::default();
        FileRecord::open_binary_out(&config, AtomId(2), path.to_str().unwrap()).unwrap();
        let mut f = File::open(&path).unwrap();
        let header = BinStrHeader::read_from(&mut f).unwrap();
        assert_eq!(header.pid, std::process::id() as i32);
    }

    #[test]
    fn file_table_round_trips_by_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.txt");
        let config = RuntimeConfig::default();
        let handle = AtomId(3);
        let f = FileRecord::open_text_out(&config, handle, path.to_str().unwrap()).unwrap();
        let mut table = FileTable::new();
        table.insert(f);
        assert!(table.get(handle).is_some());
        assert!(table.close(handle).is_some());
        assert!(table.get(handle).is_none());
    }
}
