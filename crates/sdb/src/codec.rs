//! Plaintext encoding of the record list
//!
//! One record per line, written as a literal tuple of four quoted strings:
//!
//! ```text
//! ('github.com', 'octocat', 's3cret', 'work account')
//! ```
//!
//! Decoding goes through a small parser that only knows primitive literal
//! forms (quoted strings, byte strings, numbers, tuples, lists, booleans,
//! `None`). Nothing in a line can name or invoke anything, so a tampered store
//! can at worst fail to decode.

use crate::record::{Record, RecordSet};
use thiserror::Error;

/// Nesting deeper than this is rejected outright
const MAX_DEPTH: usize = 32;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("store plaintext is not valid UTF-8")]
    Utf8,

    #[error("line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("line {line}: {message}")]
    Shape { line: usize, message: String },
}

/// A parsed primitive literal
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Bytes(Vec<u8>),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
    Tuple(Vec<Literal>),
    List(Vec<Literal>),
}

/// Render records as newline-terminated literal lines. The empty set encodes
/// to no bytes at all.
pub fn encode(records: &[Record]) -> Vec<u8> {
    let mut out = String::new();
    for record in records {
        out.push('(');
        push_quoted(&mut out, &record.domain);
        out.push_str(", ");
        push_quoted(&mut out, &record.username);
        out.push_str(", ");
        push_quoted(&mut out, &record.password);
        out.push_str(", ");
        push_quoted(&mut out, &record.notes);
        out.push_str(")\n");
    }
    out.into_bytes()
}

/// Parse every non-empty line back into a record
pub fn decode(bytes: &[u8]) -> Result<RecordSet, CodecError> {
    let text = std::str::from_utf8(bytes).map_err(|_| CodecError::Utf8)?;
    let mut records = Vec::new();
    for (idx, line) in text.split('\n').enumerate() {
        if line.is_empty() {
            continue;
        }
        let line_no = idx + 1;
        let literal = parse_literal(line).map_err(|(column, message)| CodecError::Syntax {
            line: line_no,
            column,
            message,
        })?;
        records.push(record_from_literal(literal).map_err(|message| CodecError::Shape {
            line: line_no,
            message,
        })?);
    }
    Ok(records)
}

/// Quote a string the same way the store has always written them: single
/// quotes unless the text contains a single quote and no double quote.
fn push_quoted(out: &mut String, s: &str) {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c if c.is_control() || c == '\u{2028}' || c == '\u{2029}' => {
                let v = c as u32;
                if v <= 0xff {
                    out.push_str(&format!("\\x{:02x}", v));
                } else if v <= 0xffff {
                    out.push_str(&format!("\\u{:04x}", v));
                } else {
                    out.push_str(&format!("\\U{:08x}", v));
                }
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}

fn record_from_literal(literal: Literal) -> Result<Record, String> {
    let fields = match literal {
        Literal::Tuple(items) | Literal::List(items) => items,
        other => return Err(format!("expected a 4-tuple, found {}", kind_name(&other))),
    };
    if fields.len() != 4 {
        return Err(format!("expected 4 fields, found {}", fields.len()));
    }
    let mut strings = Vec::with_capacity(4);
    for field in fields {
        strings.push(match field {
            Literal::Str(s) => s,
            Literal::Bytes(b) => {
                String::from_utf8(b).map_err(|_| "byte field is not valid UTF-8".to_string())?
            }
            other => return Err(format!("expected a string field, found {}", kind_name(&other))),
        });
    }
    let mut it = strings.into_iter();
    match (it.next(), it.next(), it.next(), it.next()) {
        (Some(domain), Some(username), Some(password), Some(notes)) => Ok(Record {
            domain,
            username,
            password,
            notes,
        }),
        _ => Err("expected 4 fields".to_string()),
    }
}

fn kind_name(literal: &Literal) -> &'static str {
    match literal {
        Literal::Str(_) => "string",
        Literal::Bytes(_) => "bytes",
        Literal::Int(_) => "integer",
        Literal::Float(_) => "float",
        Literal::Bool(_) => "boolean",
        Literal::None => "None",
        Literal::Tuple(_) => "tuple",
        Literal::List(_) => "list",
    }
}

/// Parse exactly one literal spanning the whole input. Errors carry a
/// 1-based column.
pub fn parse_literal(input: &str) -> Result<Literal, (usize, String)> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
    };
    let value = parser.value(0)?;
    parser.skip_ws();
    if parser.pos != parser.chars.len() {
        return Err(parser.error("trailing characters after literal"));
    }
    Ok(value)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

type ParseResult<T> = Result<T, (usize, String)>;

impl Parser {
    fn error(&self, message: impl Into<String>) -> (usize, String) {
        (self.pos + 1, message.into())
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t') | Some('\r')) {
            self.pos += 1;
        }
    }

    fn value(&mut self, depth: usize) -> ParseResult<Literal> {
        if depth > MAX_DEPTH {
            return Err(self.error("literal nested too deeply"));
        }
        self.skip_ws();
        match self.peek() {
            None => Err(self.error("unexpected end of line")),
            Some('(') => self.sequence(depth, ')').map(|(items, trailing_comma)| {
                // `(x)` is just a parenthesised value, `(x,)` is a tuple
                if items.len() == 1 && !trailing_comma {
                    items.into_iter().next().unwrap_or(Literal::Tuple(Vec::new()))
                } else {
                    Literal::Tuple(items)
                }
            }),
            Some('[') => self.sequence(depth, ']').map(|(items, _)| Literal::List(items)),
            Some('\'') | Some('"') => self.string(false, false),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.word_or_prefixed_string(),
            Some(c) => Err(self.error(format!("unexpected character {:?}", c))),
        }
    }

    /// Items up to `close`. Also reports whether the last item was followed
    /// by a comma.
    fn sequence(&mut self, depth: usize, close: char) -> ParseResult<(Vec<Literal>, bool)> {
        self.bump();
        let mut items = Vec::new();
        let mut trailing_comma = false;
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.bump();
                return Ok((items, trailing_comma));
            }
            items.push(self.value(depth + 1)?);
            trailing_comma = false;
            self.skip_ws();
            match self.bump() {
                Some(',') => trailing_comma = true,
                Some(c) if c == close => return Ok((items, false)),
                Some(c) => {
                    self.pos -= 1;
                    return Err(self.error(format!("expected ',' or {:?}, found {:?}", close, c)));
                }
                None => return Err(self.error(format!("unclosed sequence, expected {:?}", close))),
            }
        }
    }

    fn word_or_prefixed_string(&mut self) -> ParseResult<Literal> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();

        if matches!(self.peek(), Some('\'') | Some('"')) {
            let lower = word.to_ascii_lowercase();
            let (bytes, raw) = match lower.as_str() {
                "u" => (false, false),
                "r" => (false, true),
                "b" => (true, false),
                "br" | "rb" => (true, true),
                _ => {
                    self.pos = start;
                    return Err(self.error(format!("unknown string prefix {:?}", word)));
                }
            };
            return self.string(bytes, raw);
        }

        match word.as_str() {
            "True" => Ok(Literal::Bool(true)),
            "False" => Ok(Literal::Bool(false)),
            "None" => Ok(Literal::None),
            _ => {
                self.pos = start;
                Err(self.error(format!("names are not literals: {:?}", word)))
            }
        }
    }

    fn number(&mut self) -> ParseResult<Literal> {
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.pos += 1;
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' | '_' => {}
                '.' => is_float = true,
                'e' | 'E' => {
                    is_float = true;
                    if matches!(self.peek_at(1), Some('-') | Some('+')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        let parsed = if is_float {
            text.parse::<f64>().ok().map(Literal::Float)
        } else {
            text.parse::<i64>().ok().map(Literal::Int)
        };
        parsed.ok_or_else(|| (start + 1, format!("invalid number {:?}", text)))
    }

    fn string(&mut self, bytes: bool, raw: bool) -> ParseResult<Literal> {
        let quote = match self.bump() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(self.error("expected a quote")),
        };
        let mut text = String::new();
        let mut raw_bytes = Vec::new();
        loop {
            let c = self
                .bump()
                .ok_or_else(|| self.error("unterminated string"))?;
            if c == quote {
                break;
            }
            if c == '\n' {
                return Err(self.error("newline inside string"));
            }
            if c != '\\' || raw {
                if raw && c == '\\' {
                    // a raw string still cannot end on an escaped quote
                    if self.peek() == Some(quote) || self.peek() == Some('\\') {
                        let next = self.bump().unwrap_or('\\');
                        push_char(bytes, &mut text, &mut raw_bytes, '\\', self.pos)?;
                        push_char(bytes, &mut text, &mut raw_bytes, next, self.pos)?;
                        continue;
                    }
                }
                push_char(bytes, &mut text, &mut raw_bytes, c, self.pos)?;
                continue;
            }
            let escape = self
                .bump()
                .ok_or_else(|| self.error("unterminated escape"))?;
            match escape {
                '\\' | '\'' | '"' => push_char(bytes, &mut text, &mut raw_bytes, escape, self.pos)?,
                'a' => push_char(bytes, &mut text, &mut raw_bytes, '\x07', self.pos)?,
                'b' => push_char(bytes, &mut text, &mut raw_bytes, '\x08', self.pos)?,
                'f' => push_char(bytes, &mut text, &mut raw_bytes, '\x0c', self.pos)?,
                'n' => push_char(bytes, &mut text, &mut raw_bytes, '\n', self.pos)?,
                'r' => push_char(bytes, &mut text, &mut raw_bytes, '\r', self.pos)?,
                't' => push_char(bytes, &mut text, &mut raw_bytes, '\t', self.pos)?,
                'v' => push_char(bytes, &mut text, &mut raw_bytes, '\x0b', self.pos)?,
                '0'..='7' => {
                    let mut value = escape.to_digit(8).unwrap_or(0);
                    for _ in 0..2 {
                        match self.peek().and_then(|c| c.to_digit(8)) {
                            Some(d) => {
                                value = value * 8 + d;
                                self.pos += 1;
                            }
                            None => break,
                        }
                    }
                    self.push_code(bytes, &mut text, &mut raw_bytes, value)?;
                }
                'x' => {
                    let value = self.hex_digits(2)?;
                    self.push_code(bytes, &mut text, &mut raw_bytes, value)?;
                }
                'u' if !bytes => {
                    let value = self.hex_digits(4)?;
                    self.push_code(bytes, &mut text, &mut raw_bytes, value)?;
                }
                'U' if !bytes => {
                    let value = self.hex_digits(8)?;
                    self.push_code(bytes, &mut text, &mut raw_bytes, value)?;
                }
                'N' if !bytes => return Err(self.error("named unicode escapes are not supported")),
                other => {
                    // unknown escapes keep their backslash
                    push_char(bytes, &mut text, &mut raw_bytes, '\\', self.pos)?;
                    push_char(bytes, &mut text, &mut raw_bytes, other, self.pos)?;
                }
            }
        }
        Ok(if bytes {
            Literal::Bytes(raw_bytes)
        } else {
            Literal::Str(text)
        })
    }

    fn hex_digits(&mut self, count: usize) -> ParseResult<u32> {
        let mut value = 0u32;
        for _ in 0..count {
            let digit = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error(format!("expected {} hex digits", count)))?;
            value = value * 16 + digit;
        }
        Ok(value)
    }

    fn push_code(
        &self,
        bytes: bool,
        text: &mut String,
        raw_bytes: &mut Vec<u8>,
        value: u32,
    ) -> ParseResult<()> {
        if bytes {
            let byte = u8::try_from(value).map_err(|_| self.error("byte escape out of range"))?;
            raw_bytes.push(byte);
            return Ok(());
        }
        let c = char::from_u32(value).ok_or_else(|| self.error("invalid code point"))?;
        text.push(c);
        Ok(())
    }
}

fn push_char(
    bytes: bool,
    text: &mut String,
    raw_bytes: &mut Vec<u8>,
    c: char,
    pos: usize,
) -> ParseResult<()> {
    if bytes {
        if !c.is_ascii() {
            return Err((pos, "non-ASCII character in byte string".to_string()));
        }
        raw_bytes.push(c as u8);
    } else {
        text.push(c);
    }
    Ok(())
}
