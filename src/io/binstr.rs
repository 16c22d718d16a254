//! Self-describing binary codec (`binstr`/`unbinstr`).
//!
//! Every encoded buffer opens with a `BinStrHeader` (pid + timestamp, the
//! same header `io::file` writes into a `setl2bin` binary-out file). A
//! decoded atom other than the two predefined booleans is checked against
//! the *current* process's header, since non-portable forms require a
//! same-process-lifetime round-trip, with `true`/`false` carved out as the
//! one exception.

use crate::containers::map::MapHeader;
use crate::containers::set::SetHeader;
use crate::containers::tuple::Tuple;
use crate::error::AbendError;
use crate::io::file::BinStrHeader;
use crate::symbol::{AtomId, ATOM_FALSE, ATOM_TRUE};
use crate::value::integer::Integer;
use crate::value::specifier::Specifier;
use num_bigint::BigInt;
use std::rc::Rc;

const TAG_OMEGA: u8 = 0;
const TAG_TRUE: u8 = 1;
const TAG_FALSE: u8 = 2;
const TAG_ATOM: u8 = 3;
const TAG_SHORT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_REAL: u8 = 6;
const TAG_STRING: u8 = 7;
const TAG_SET: u8 = 8;
const TAG_MAP: u8 = 9;
const TUPLE: u8 = 10;

fn not_portable(kind: &'static str) -> AbendError {
    AbendError::Custom(format!("{kind} has no portable binary representation"))
}

/// Encodes `value` into a self-contained byte buffer, prefixed by `header`.
pub fn binstr(value: &Specifier, header: &BinStrHeader) -> Result<Vec<u8>, AbendError> {
    let mut out = Vec::new();
    header.write_to(&mut out).map_err(|e| AbendError::Io { stream: "binstr".into(), source: e })?;
    write_value(&mut out, value)?;
    Ok(out)
}

/// Decodes a buffer produced by [`binstr`], checking any embedded atom
/// against `current`, the reading process's own header.
pub fn unbinstr(data: &[u8], current: &BinStrHeader) -> Result<Specifier, AbendError> {
    Ok(unbinstr_prefix(data, current)?.0)
}

/// Like [`unbinstr`], but also reports how many leading bytes of `data` the
/// decoded value actually consumed — `getb` uses this to put back the
/// unread tail of its read buffer for the next call.
pub(crate) fn unbinstr_prefix(data: &[u8], current: &BinStrHeader) -> Result<(Specifier, usize), AbendError> {
    let mut cursor = Cursor { data, pos: 0 };
    let header =
        BinStrHeader::read_from(&mut cursor).map_err(|e| AbendError::Io { stream: "binstr".into(), source: e })?;
    let value = read_value(&mut cursor, &header, current)?;
    Ok((value, cursor.pos))
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> std::io::Read for Cursor<'a> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], AbendError> {
        if self.pos + n > self.data.len() {
            return Err(AbendError::Custom("truncated binstr buffer".into()));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, AbendError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, AbendError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64, AbendError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> Result<f64, AbendError> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn bytes(&mut self) -> Result<&'a [u8], AbendError> {
        let len = self.u32()? as usize;
        self.take(len)
    }
}

fn push_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn write_value(out: &mut Vec<u8>, value: &Specifier) -> Result<(), AbendError> {
    match value {
        Specifier::Omega => out.push(TAG_OMEGA),
        Specifier::Atom(a) if *a == ATOM_TRUE => out.push(TAG_TRUE),
        Specifier::Atom(a) if *a == ATOM_FALSE => out.push(TAG_FALSE),
        Specifier::Atom(a) => {
            out.push(TAG_ATOM);
            out.extend_from_slice(&a.0.to_le_bytes());
        }
        Specifier::Int(Integer::Short(n)) => {
            out.push(TAG_SHORT);
            out.extend_from_slice(&n.to_le_bytes());
        }
        Specifier::Int(Integer::Long(big)) => {
            out.push(TAG_LONG);
            push_bytes(out, &big.to_signed_bytes_le());
        }
        Specifier::Real(r) => {
            out.push(TAG_REAL);
            out.extend_from_slice(&r.to_le_bytes());
        }
        Specifier::Str(s) => {
            out.push(TAG_STRING);
            push_bytes(out, s.as_str().as_bytes());
        }
        Specifier::Set(s) => {
            out.push(TAG_SET);
            let elems = s.elements();
            out.extend_from_slice(&(elems.len() as u32).to_le_bytes());
            for e in &elems {
                write_value(out, e)?;
            }
        }
        Specifier::Map(m) => {
            out.push(TAG_MAP);
            let pairs = m.as_pairs();
            out.extend_from_slice(&(pairs.len() as u32).to_le_bytes());
            for p in &pairs {
                write_value(out, p)?;
            }
        }
        Specifier::Tuple(t) => {
            out.push(TUPLE);
            let elems = t.elements();
            out.extend_from_slice(&(elems.len() as u32).to_le_bytes());
            for e in &elems {
                write_value(out, e)?;
            }
        }
        Specifier::Object(_) => return Err(not_portable("an object")),
        Specifier::Process(_) => return Err(not_portable("a process")),
        Specifier::Mailbox(_) => return Err(not_portable("a mailbox")),
        Specifier::Proc(_) => return Err(not_portable("a procedure value")),
        Specifier::Iter(_) => return Err(not_portable("an iterator")),
        Specifier::File(_) => return Err(not_portable("a file handle")),
        Specifier::Label(_) => return Err(not_portable("a label")),
        Specifier::Opaque(_) => return Err(not_portable("an opaque value")),
    }
    Ok(())
}

fn read_value(cursor: &mut Cursor<'_>, written: &BinStrHeader, current: &BinStrHeader) -> Result<Specifier, AbendError> {
    let tag = cursor.byte()?;
    match tag {
        TAG_OMEGA => Ok(Specifier::Omega),
        TAG_TRUE => Ok(Specifier::boolean(true)),
        TAG_FALSE => Ok(Specifier::boolean(false)),
        TAG_ATOM => {
            let id = cursor.u32()?;
            if written.pid != current.pid || written.timestamp != current.timestamp {
                return Err(AbendError::NonPortableValue);
            }
            Ok(Specifier::Atom(AtomId(id)))
        }
        TAG_SHORT => Ok(Specifier::Int(Integer::Short(cursor.i64()?))),
        TAG_LONG => {
            let bytes = cursor.bytes()?;
            Ok(Specifier::Int(Integer::from_bigint(BigInt::from_signed_bytes_le(bytes))))
        }
        TAG_REAL => Ok(Specifier::real(cursor.f64()?)),
        TAG_STRING => {
            let bytes = cursor.bytes()?;
            let s = std::str::from_utf8(bytes).map_err(|_| AbendError::Custom("invalid utf-8 in binstr string".into()))?;
            Ok(Specifier::string(s))
        }
        TAG_SET => {
            let count = cursor.u32()?;
            let mut set = SetHeader::new();
            for _ in 0..count {
                set = set.with(read_value(cursor, written, current)?);
            }
            Ok(Specifier::Set(Rc::new(set)))
        }
        TAG_MAP => {
            let count = cursor.u32()?;
            let mut map = MapHeader::new();
            for _ in 0..count {
                let pair = read_value(cursor, written, current)?;
                if let Specifier::Tuple(t) = &pair {
                    if t.len() == 2 {
                        map = map.set_single(t.get(1), t.get(2));
                        continue;
                    }
                }
                return Err(AbendError::Custom("malformed map pair in binstr buffer".into()));
            }
            Ok(Specifier::Map(Rc::new(map)))
        }
        TUPLE => {
            let count = cursor.u32()?;
            let mut elements = Vec::with_capacity(count as usize);
            for _ in 0..count {
                elements.push(read_value(cursor, written, current)?);
            }
            Ok(Specifier::Tuple(Rc::new(Tuple::from_elements(elements))))
        }
        other => Err(AbendError::Custom(format!("unknown binstr tag {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> BinStrHeader {
        BinStrHeader { pid: 4242, timestamp: 1000 }
    }

    #[test]
    fn round_trips_omega_and_booleans() {
        let h = header();
        for v in [Specifier::Omega, Specifier::boolean(true), Specifier::boolean(false)] {
            let buf = binstr(&v, &h).unwrap();
            let back = unbinstr(&buf, &h).unwrap();
            assert!(crate::value::specifier::value_eq(&v, &back));
        }
    }

    #[test]
    fn round_trips_short_and_long_integers() {
        let h = header();
        let short = Specifier::int(42);
        let long = Specifier::Int(Integer::from_bigint(BigInt::from(10).pow(30)));
        for v in [short, long] {
            let buf = binstr(&v, &h).unwrap();
            let back = unbinstr(&buf, &h).unwrap();
            assert!(crate::value::specifier::value_eq(&v, &back));
        }
    }

    #[test]
    fn round_trips_nested_set_and_tuple() {
        let h = header();
        let s = SetHeader::new().with(Specifier::int(1)).with(Specifier::int(2));
        let v = Specifier::Tuple(Rc::new(Tuple::from_elements(vec![
            Specifier::Set(Rc::new(s)),
            Specifier::string("hi"),
        ])));
        let buf = binstr(&v, &h).unwrap();
        let back = unbinstr(&buf, &h).unwrap();
        assert!(crate::value::specifier::value_eq(&v, &back));
    }

    #[test]
    fn atom_from_a_different_process_lifetime_is_rejected() {
        let written = BinStrHeader { pid: 1, timestamp: 100 };
        let current = BinStrHeader { pid: 2, timestamp: 200 };
        let buf = binstr(&Specifier::Atom(AtomId(7)), &written).unwrap();
        assert!(unbinstr(&buf, &current).is_err());
    }

    #[test]
    fn rejects_encoding_a_file_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let config = crate::config::RuntimeConfig::default();
        let file = crate::io::file::FileRecord::open_binary_out(&config, AtomId(1), path.to_str().unwrap()).unwrap();
        let v = Specifier::File(file);
        assert!(binstr(&v, &header()).is_err());
    }
}
