//! Codec for the length-prefixed serialization format used by legacy
//! user-configuration blobs (`be_users.uc`) and registry values.
//!
//! Decoding is data-only: class names found in object payloads are carried
//! around as inert bytes and are never used to construct anything. Depending
//! on the [`ObjectPolicy`] such payloads either become placeholder values or
//! fail the decode outright.

use std::collections::HashMap;

use thiserror::Error;

/// Maximum nesting of arrays/objects accepted by the decoder.
pub const MAX_DEPTH: usize = 512;

/// Upper bound for up-front allocations driven by declared element counts.
const MAX_PREALLOC: usize = 1024;

/// What the decoder does when it meets an object (`O:`) or custom-serialized
/// object (`C:`) payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectPolicy {
    /// Keep the payload as an inert [`Value::Object`] / [`Value::Custom`].
    #[default]
    Inert,
    /// Fail with [`DecodeError::ObjectNotAllowed`].
    Reject,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("unexpected byte 0x{found:02x} at offset {offset}")]
    UnexpectedByte { offset: usize, found: u8 },

    #[error("invalid length at offset {offset}")]
    InvalidLength { offset: usize },

    #[error("invalid number at offset {offset}")]
    InvalidNumber { offset: usize },

    #[error("invalid array key at offset {offset}")]
    InvalidKey { offset: usize },

    #[error("trailing data at offset {offset}")]
    TrailingData { offset: usize },

    #[error("object of class {class:?} not allowed")]
    ObjectNotAllowed { class: String },

    #[error("unsupported token '{tag}' at offset {offset}")]
    Unsupported { offset: usize, tag: char },

    #[error("nesting deeper than {MAX_DEPTH} levels")]
    TooDeep,
}

/// Array key. Integer and string keys are distinct, as in the source format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Int(i64),
    Str(Vec<u8>),
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.as_bytes().to_vec())
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Int(n)
    }
}

/// Insertion-ordered key/value map.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Array {
    entries: Vec<(Key, Value)>,
}

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    /// Look up a string key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.get_key(&Key::from(key))
    }

    pub fn get_key(&self, key: &Key) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Insert or replace. A replaced entry keeps its position.
    pub fn insert(&mut self, key: impl Into<Key>, value: Value) -> Option<Value> {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }
}

impl<K: Into<Key>> FromIterator<(K, Value)> for Array {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut array = Array::new();
        for (k, v) in iter {
            array.insert(k, v);
        }
        array
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Vec<u8>),
    Array(Array),
    /// Object payload kept as plain data. The class is never resolved.
    Object { class: Vec<u8>, members: Array },
    /// Custom-serialized object payload, kept verbatim.
    Custom { class: Vec<u8>, payload: Vec<u8> },
}

impl Value {
    /// The string contents, if this is a UTF-8 string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Str(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.as_bytes().to_vec())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Array> for Value {
    fn from(array: Array) -> Self {
        Value::Array(array)
    }
}

/// Decode a complete serialized value. The whole input must be consumed.
pub fn decode(input: &[u8], policy: ObjectPolicy) -> Result<Value, DecodeError> {
    let mut parser = Parser {
        input,
        pos: 0,
        policy,
        depth: 0,
    };
    let value = parser.value()?;
    if parser.pos != input.len() {
        return Err(DecodeError::TrailingData { offset: parser.pos });
    }
    Ok(value)
}

/// Encode a value. `decode(&encode(v), ObjectPolicy::Inert)` yields `v`.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(&mut out, value);
    out
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    policy: ObjectPolicy,
    depth: usize,
}

impl Parser<'_> {
    fn next(&mut self) -> Result<u8, DecodeError> {
        let byte = *self
            .input
            .get(self.pos)
            .ok_or(DecodeError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    fn expect(&mut self, expected: u8) -> Result<(), DecodeError> {
        let offset = self.pos;
        let found = self.next()?;
        if found != expected {
            return Err(DecodeError::UnexpectedByte { offset, found });
        }
        Ok(())
    }

    fn take(&mut self, len: usize) -> Result<&[u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.input.len())
            .ok_or(DecodeError::UnexpectedEof)?;
        let slice = &self.input[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Raw token up to (and consuming) `terminator`.
    fn token_until(&mut self, terminator: u8) -> Result<(usize, &str), DecodeError> {
        let start = self.pos;
        let len = self.input[start..]
            .iter()
            .position(|b| *b == terminator)
            .ok_or(DecodeError::UnexpectedEof)?;
        self.pos = start + len + 1;
        let token = std::str::from_utf8(&self.input[start..start + len])
            .map_err(|_| DecodeError::InvalidNumber { offset: start })?;
        Ok((start, token))
    }

    fn int_until(&mut self, terminator: u8) -> Result<i64, DecodeError> {
        let (offset, token) = self.token_until(terminator)?;
        token
            .parse()
            .map_err(|_| DecodeError::InvalidNumber { offset })
    }

    fn float_until(&mut self, terminator: u8) -> Result<f64, DecodeError> {
        let (offset, token) = self.token_until(terminator)?;
        match token {
            "INF" => Ok(f64::INFINITY),
            "-INF" => Ok(f64::NEG_INFINITY),
            "NAN" => Ok(f64::NAN),
            _ => token
                .parse()
                .map_err(|_| DecodeError::InvalidNumber { offset }),
        }
    }

    fn length_until(&mut self, terminator: u8) -> Result<usize, DecodeError> {
        let (offset, token) = self.token_until(terminator)?;
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DecodeError::InvalidLength { offset });
        }
        token
            .parse()
            .map_err(|_| DecodeError::InvalidLength { offset })
    }

    /// `<len>:"<bytes>"`
    fn quoted(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.length_until(b':')?;
        self.expect(b'"')?;
        let bytes = self.take(len)?.to_vec();
        self.expect(b'"')?;
        Ok(bytes)
    }

    fn value(&mut self) -> Result<Value, DecodeError> {
        let offset = self.pos;
        match self.next()? {
            b'N' => {
                self.expect(b';')?;
                Ok(Value::Null)
            }
            b'b' => {
                self.expect(b':')?;
                let flag_offset = self.pos;
                let flag = match self.next()? {
                    b'0' => false,
                    b'1' => true,
                    found => {
                        return Err(DecodeError::UnexpectedByte {
                            offset: flag_offset,
                            found,
                        });
                    }
                };
                self.expect(b';')?;
                Ok(Value::Bool(flag))
            }
            b'i' => {
                self.expect(b':')?;
                Ok(Value::Int(self.int_until(b';')?))
            }
            b'd' => {
                self.expect(b':')?;
                Ok(Value::Float(self.float_until(b';')?))
            }
            b's' => {
                self.expect(b':')?;
                let bytes = self.quoted()?;
                self.expect(b';')?;
                Ok(Value::Str(bytes))
            }
            b'a' => {
                self.expect(b':')?;
                let count = self.length_until(b':')?;
                Ok(Value::Array(self.entries(count)?))
            }
            b'O' => {
                self.expect(b':')?;
                let class = self.quoted()?;
                self.check_object_allowed(&class)?;
                self.expect(b':')?;
                let count = self.length_until(b':')?;
                let members = self.entries(count)?;
                Ok(Value::Object { class, members })
            }
            b'C' => {
                self.expect(b':')?;
                let class = self.quoted()?;
                self.check_object_allowed(&class)?;
                self.expect(b':')?;
                let len = self.length_until(b':')?;
                self.expect(b'{')?;
                let payload = self.take(len)?.to_vec();
                self.expect(b'}')?;
                Ok(Value::Custom { class, payload })
            }
            tag @ (b'r' | b'R' | b'E') => Err(DecodeError::Unsupported {
                offset,
                tag: tag as char,
            }),
            found => Err(DecodeError::UnexpectedByte { offset, found }),
        }
    }

    fn check_object_allowed(&self, class: &[u8]) -> Result<(), DecodeError> {
        match self.policy {
            ObjectPolicy::Inert => Ok(()),
            ObjectPolicy::Reject => Err(DecodeError::ObjectNotAllowed {
                class: String::from_utf8_lossy(class).into_owned(),
            }),
        }
    }

    /// `{<key><value>...}` with exactly `count` pairs.
    fn entries(&mut self, count: usize) -> Result<Array, DecodeError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(DecodeError::TooDeep);
        }
        self.expect(b'{')?;
        let mut entries: Vec<(Key, Value)> = Vec::with_capacity(count.min(MAX_PREALLOC));
        let mut slots: HashMap<Key, usize> = HashMap::with_capacity(count.min(MAX_PREALLOC));
        for _ in 0..count {
            let key = self.key()?;
            let value = self.value()?;
            // Later duplicates win and keep the first position.
            match slots.get(&key) {
                Some(&slot) => entries[slot].1 = value,
                None => {
                    slots.insert(key.clone(), entries.len());
                    entries.push((key, value));
                }
            }
        }
        let array = Array { entries };
        self.expect(b'}')?;
        self.depth -= 1;
        Ok(array)
    }

    fn key(&mut self) -> Result<Key, DecodeError> {
        let offset = self.pos;
        match self.next()? {
            b'i' => {
                self.expect(b':')?;
                Ok(Key::Int(self.int_until(b';')?))
            }
            b's' => {
                self.expect(b':')?;
                let bytes = self.quoted()?;
                self.expect(b';')?;
                Ok(Key::Str(bytes))
            }
            _ => Err(DecodeError::InvalidKey { offset }),
        }
    }
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.extend_from_slice(b"N;"),
        Value::Bool(flag) => out.extend_from_slice(if *flag { b"b:1;" } else { b"b:0;" }),
        Value::Int(n) => out.extend_from_slice(format!("i:{n};").as_bytes()),
        Value::Float(f) => {
            out.extend_from_slice(b"d:");
            out.extend_from_slice(format_float(*f).as_bytes());
            out.push(b';');
        }
        Value::Str(bytes) => {
            out.push(b's');
            write_quoted(out, bytes);
            out.push(b';');
        }
        Value::Array(array) => {
            out.extend_from_slice(format!("a:{}:", array.len()).as_bytes());
            write_entries(out, array);
        }
        Value::Object { class, members } => {
            out.push(b'O');
            write_quoted(out, class);
            out.extend_from_slice(format!(":{}:", members.len()).as_bytes());
            write_entries(out, members);
        }
        Value::Custom { class, payload } => {
            out.push(b'C');
            write_quoted(out, class);
            out.extend_from_slice(format!(":{}:{{", payload.len()).as_bytes());
            out.extend_from_slice(payload);
            out.push(b'}');
        }
    }
}

/// `:<len>:"<bytes>"`
fn write_quoted(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(format!(":{}:\"", bytes.len()).as_bytes());
    out.extend_from_slice(bytes);
    out.push(b'"');
}

fn write_entries(out: &mut Vec<u8>, array: &Array) {
    out.push(b'{');
    for (key, value) in array.iter() {
        match key {
            Key::Int(n) => out.extend_from_slice(format!("i:{n};").as_bytes()),
            Key::Str(bytes) => {
                out.push(b's');
                write_quoted(out, bytes);
                out.push(b';');
            }
        }
        write_value(out, value);
    }
    out.push(b'}');
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "NAN".to_string()
    } else if f == f64::INFINITY {
        "INF".to_string()
    } else if f == f64::NEG_INFINITY {
        "-INF".to_string()
    } else {
        f.to_string()
    }
}
