//! Textual reader: escape handling, based-literal syntax, and set/tuple
//! literal dedup/omega-strip rules.
//!
//! Backspace (0x08) counts as whitespace here, preserved from the original
//! lexer's behavior rather than "fixed".

use crate::containers::set::SetHeader;
use crate::containers::tuple::Tuple;
use crate::value::integer::Integer;
use crate::value::specifier::Specifier;
use std::iter::Peekable;
use std::rc::Rc;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    UnexpectedEnd,
    UnexpectedChar(char),
    BadNumber(String),
}

fn is_reader_whitespace(c: char) -> bool {
    c == ' ' || c == '\t' || c == '\n' || c == '\r' || c == '\u{8}'
}

/// A cursor over source text, used by `read`/`reada`/`reads`/`unstr`
/// . Each call to [`Reader::read_value`] consumes exactly
/// one literal and leaves the cursor positioned right after it.
pub struct Reader<'a> {
    chars: Peekable<Chars<'a>>,
    eof: bool,
}

impl<'a> Reader<'a> {
    pub fn new(src: &'a str) -> Self {
        Reader { chars: src.chars().peekable(), eof: false }
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some(&c) if is_reader_whitespace(c)) {
            self.chars.next();
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.chars.peek().copied()
    }

    /// Reads one value (`read`). Returns `None` and sets the EOF flag once
    /// the input is exhausted.
    pub fn read_value(&mut self) -> Result<Option<Specifier>, ReadError> {
        match self.peek() {
            None => {
                self.eof = true;
                Ok(None)
            }
            Some(c) if c.is_ascii_digit() => self.read_number().map(Some),
            Some('\'') => self.read_string().map(Some),
            Some('{') => self.read_set().map(Some),
            Some('[') => self.read_tuple().map(Some),
            Some(c) if c.is_alphabetic() || c == '_' => self.read_identifier().map(Some),
            Some(c) => Err(ReadError::UnexpectedChar(c)),
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut s = String::new();
        while matches!(self.chars.peek(), Some(&c) if pred(c)) {
            s.push(self.chars.next().unwrap());
        }
        s
    }

    /// `om` / `true` / `false`, plus otherwise-unrecognized bareword
    /// identifiers round-tripped as strings — the reader's only
    /// non-punctuated literal forms.
    fn read_identifier(&mut self) -> Result<Specifier, ReadError> {
        let word = self.take_while(|c| c.is_alphanumeric() || c == '_');
        match word.as_str() {
            "om" => Ok(Specifier::Omega),
            "true" => Ok(Specifier::boolean(true)),
            "false" => Ok(Specifier::boolean(false)),
            other => Ok(Specifier::string(other)),
        }
    }

    /// Plain or based integer literals (`16r1A`) and reals (`3.14`),
    /// promoting to `Integer::Long` on overflow.
    fn read_number(&mut self) -> Result<Specifier, ReadError> {
        let int_part = self.take_while(|c| c.is_ascii_digit());
        if matches!(self.chars.peek(), Some('r') | Some('R')) {
            self.chars.next();
            let radix: u32 = int_part.parse().map_err(|_| ReadError::BadNumber(int_part.clone()))?;
            if !(2..=36).contains(&radix) {
                return Err(ReadError::BadNumber(format!("{int_part}r")));
            }
            let digits = self.take_while(|c| c.is_alphanumeric());
            let value = Integer::from_string_radix(&digits, radix).map_err(|_| ReadError::BadNumber(digits))?;
            return Ok(Specifier::Int(value));
        }
        if matches!(self.chars.peek(), Some('.')) {
            let mut s = int_part.clone();
            s.push(self.chars.next().unwrap());
            s.push_str(&self.take_while(|c| c.is_ascii_digit()));
            if matches!(self.chars.peek(), Some('e') | Some('E')) {
                s.push(self.chars.next().unwrap());
                if matches!(self.chars.peek(), Some('+') | Some('-')) {
                    s.push(self.chars.next().unwrap());
                }
                s.push_str(&self.take_while(|c| c.is_ascii_digit()));
            }
            let value: f64 = s.parse().map_err(|_| ReadError::BadNumber(s))?;
            return Ok(Specifier::real(value));
        }
        let value: Integer = int_part.parse().map_err(|_| ReadError::BadNumber(int_part))?;
        Ok(Specifier::Int(value))
    }

    /// Quoted string with `''` as the sole escape for an embedded quote.
    fn read_string(&mut self) -> Result<Specifier, ReadError> {
        self.chars.next(); // opening quote
        let mut s = String::new();
        loop {
            match self.chars.next() {
                None => return Err(ReadError::UnexpectedEnd),
                Some('\'') => {
                    if matches!(self.chars.peek(), Some('\'')) {
                        self.chars.next();
                        s.push('\'');
                    } else {
                        break;
                    }
                }
                Some(c) => s.push(c),
            }
        }
        Ok(Specifier::string(s))
    }

    /// Set literal: duplicate elements are deduplicated by `SetHeader`'s
    /// own insert semantics — a set literal with a repeated element reads
    /// as if the repeat were absent.
    fn read_set(&mut self) -> Result<Specifier, ReadError> {
        self.chars.next(); // '{'
        let mut set = SetHeader::new();
        if self.peek() == Some('}') {
            self.chars.next();
            return Ok(Specifier::Set(Rc::new(set)));
        }
        loop {
            let elem = self.read_value()?.ok_or(ReadError::UnexpectedEnd)?;
            set = set.with(elem);
            match self.peek() {
                Some(',') => {
                    self.chars.next();
                }
                Some('}') => {
                    self.chars.next();
                    break;
                }
                Some(c) => return Err(ReadError::UnexpectedChar(c)),
                None => return Err(ReadError::UnexpectedEnd),
            }
        }
        Ok(Specifier::Set(Rc::new(set)))
    }

    /// Tuple literal. Trailing `om` elements are stripped before
    /// construction, matching canonicalization.
    fn read_tuple(&mut self) -> Result<Specifier, ReadError> {
        self.chars.next(); // '['
        let mut elements = Vec::new();
        if self.peek() == Some(']') {
            self.chars.next();
            return Ok(Specifier::Tuple(Rc::new(Tuple::empty())));
        }
        loop {
            let elem = self.read_value()?.ok_or(ReadError::UnexpectedEnd)?;
            elements.push(elem);
            match self.peek() {
                Some(',') => {
                    self.chars.next();
                }
                Some(']') => {
                    self.chars.next();
                    break;
                }
                Some(c) => return Err(ReadError::UnexpectedChar(c)),
                None => return Err(ReadError::UnexpectedEnd),
            }
        }
        while matches!(elements.last(), Some(e) if e.is_omega()) {
            elements.pop();
        }
        Ok(Specifier::Tuple(Rc::new(Tuple::from_elements(elements))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::specifier::value_eq;

    #[test]
    fn reads_om_true_false() {
        assert!(matches!(Reader::new("om").read_value(), Ok(Some(Specifier::Omega))));
        assert!(Reader::new("true").read_value().unwrap().unwrap().truthy());
        assert!(!Reader::new("false").read_value().unwrap().unwrap().truthy());
    }

    #[test]
    fn reads_backspace_as_whitespace() {
        let mut r = Reader::new("\u{8}\u{8}42");
        let v = r.read_value().unwrap().unwrap();
        assert!(value_eq(&v, &Specifier::int(42)));
    }

    #[test]
    fn reads_based_integer_literal() {
        let mut r = Reader::new("16rFF");
        let v = r.read_value().unwrap().unwrap();
        assert!(value_eq(&v, &Specifier::int(255)));
    }

    #[test]
    fn reads_quoted_string_with_doubled_quote_escape() {
        let mut r = Reader::new("'it''s'");
        let v = r.read_value().unwrap().unwrap();
        assert!(value_eq(&v, &Specifier::string("it's")));
    }

    #[test]
    fn set_literal_dedups_repeated_elements() {
        let mut r = Reader::new("{1,2,1}");
        let v = r.read_value().unwrap().unwrap();
        match v {
            Specifier::Set(s) => assert_eq!(s.len(), 2),
            _ => panic!("expected a set"),
        }
    }

    #[test]
    fn tuple_literal_strips_trailing_omega() {
        let mut r = Reader::new("[1,2,om]");
        let v = r.read_value().unwrap().unwrap();
        match v {
            Specifier::Tuple(t) => assert_eq!(t.len(), 2),
            _ => panic!("expected a tuple"),
        }
    }

    #[test]
    fn eof_flag_set_on_exhausted_input() {
        let mut r = Reader::new("   ");
        assert!(r.read_value().unwrap().is_none());
        assert!(r.is_eof());
    }
}
