//! Minimal streaming JSON tokenizer/parser and writer. No serde here on
//! purpose — the wire dialect is a small, fixed message shape and the bus
//! core has no `Serialize`/`Deserialize` impls to drive (properties are
//! runtime-shaped, not a single Rust type derive could cover).

use std::fmt;

use indexmap::IndexMap;

use indigo_support::error::{ErrorKind, NetworkError, NetworkResult};

#[derive(Debug, Clone, PartialEq)]
pub enum JsonValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<JsonValue>),
    Object(IndexMap<String, JsonValue>),
}

impl JsonValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            JsonValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            JsonValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            JsonValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[JsonValue]> {
        match self {
            JsonValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, JsonValue>> {
        match self {
            JsonValue::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.as_object().and_then(|map| map.get(key))
    }
}

impl fmt::Display for JsonValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write(self, f)
    }
}

fn write(value: &JsonValue, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        JsonValue::Null => f.write_str("null"),
        JsonValue::Bool(b) => write!(f, "{b}"),
        JsonValue::Number(n) => write!(f, "{n}"),
        JsonValue::String(s) => write_string(s, f),
        JsonValue::Array(items) => {
            f.write_str("[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write(item, f)?;
            }
            f.write_str("]")
        }
        JsonValue::Object(map) => {
            f.write_str("{")?;
            for (i, (key, value)) in map.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write_string(key, f)?;
                f.write_str(":")?;
                write(value, f)?;
            }
            f.write_str("}")
        }
    }
}

fn write_string(s: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if (c as u32) < 0x20 => write!(f, "\\u{:04x}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    f.write_str("\"")
}

pub fn to_string(value: &JsonValue) -> String {
    format!("{value}")
}

/// Feed bytes incrementally, drain complete top-level values. Mirrors the
/// same "return `Ok(None)` for an incomplete buffer" idiom the XML parser
/// uses, since both adapters sit behind the same connection-handling loop.
#[derive(Default)]
pub struct Parser {
    buffer: Vec<u8>,
}

impl Parser {
    pub fn new() -> Parser {
        Parser::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn next_value(&mut self) -> NetworkResult<Option<JsonValue>> {
        let chars: Vec<char> = match std::str::from_utf8(&self.buffer) {
            Ok(s) => s.chars().collect(),
            Err(err) if err.valid_up_to() == 0 && self.buffer.len() < 4 => return Ok(None),
            Err(err) => std::str::from_utf8(&self.buffer[..err.valid_up_to()])
                .unwrap()
                .chars()
                .collect(),
        };
        let start = skip_ws(&chars, 0);
        if start >= chars.len() {
            return Ok(None);
        }
        match parse_value(&chars, start)? {
            Some((value, consumed_chars)) => {
                let consumed_bytes: usize = chars[..consumed_chars].iter().map(|c| c.len_utf8()).sum();
                self.buffer.drain(0..consumed_bytes);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

fn skip_ws(chars: &[char], mut pos: usize) -> usize {
    while pos < chars.len() && chars[pos].is_whitespace() {
        pos += 1;
    }
    pos
}

fn parse_value(chars: &[char], pos: usize) -> NetworkResult<Option<(JsonValue, usize)>> {
    match chars.get(pos) {
        None => Ok(None),
        Some('{') => parse_object(chars, pos),
        Some('[') => parse_array(chars, pos),
        Some('"') => parse_string(chars, pos).map(|opt| opt.map(|(s, end)| (JsonValue::String(s), end))),
        Some('t') => parse_literal(chars, pos, "true", JsonValue::Bool(true)),
        Some('f') => parse_literal(chars, pos, "false", JsonValue::Bool(false)),
        Some('n') => parse_literal(chars, pos, "null", JsonValue::Null),
        Some(c) if c.is_ascii_digit() || *c == '-' => parse_number(chars, pos),
        Some(_) => Err(NetworkError::Fatal(ErrorKind::MalformedMessage)),
    }
}

fn parse_literal(chars: &[char], pos: usize, literal: &str, value: JsonValue) -> NetworkResult<Option<(JsonValue, usize)>> {
    let end = pos + literal.chars().count();
    if end > chars.len() {
        return Ok(None);
    }
    let candidate: String = chars[pos..end].iter().collect();
    if candidate == literal {
        Ok(Some((value, end)))
    } else {
        Err(NetworkError::Fatal(ErrorKind::MalformedMessage))
    }
}

fn parse_number(chars: &[char], pos: usize) -> NetworkResult<Option<(JsonValue, usize)>> {
    let mut end = pos;
    while end < chars.len() && (chars[end].is_ascii_digit() || "+-.eE".contains(chars[end])) {
        end += 1;
    }
    if end == chars.len() {
        return Ok(None);
    }
    let text: String = chars[pos..end].iter().collect();
    let number = text.parse::<f64>().map_err(|_| NetworkError::Fatal(ErrorKind::MalformedMessage))?;
    Ok(Some((JsonValue::Number(number), end)))
}

fn parse_string(chars: &[char], pos: usize) -> NetworkResult<Option<(String, usize)>> {
    let mut out = String::new();
    let mut i = pos + 1;
    loop {
        match chars.get(i) {
            None => return Ok(None),
            Some('"') => return Ok(Some((out, i + 1))),
            Some('\\') => {
                let escaped = match chars.get(i + 1) {
                    None => return Ok(None),
                    Some('"') => '"',
                    Some('\\') => '\\',
                    Some('/') => '/',
                    Some('n') => '\n',
                    Some('r') => '\r',
                    Some('t') => '\t',
                    Some('b') => '\u{8}',
                    Some('f') => '\u{c}',
                    Some('u') => {
                        if i + 6 > chars.len() {
                            return Ok(None);
                        }
                        let hex: String = chars[i + 2..i + 6].iter().collect();
                        let code = u32::from_str_radix(&hex, 16).map_err(|_| NetworkError::Fatal(ErrorKind::MalformedMessage))?;
                        out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                        i += 6;
                        continue;
                    }
                    Some(_) => return Err(NetworkError::Fatal(ErrorKind::MalformedMessage)),
                };
                out.push(escaped);
                i += 2;
            }
            Some(c) => {
                out.push(*c);
                i += 1;
            }
        }
    }
}

fn parse_array(chars: &[char], pos: usize) -> NetworkResult<Option<(JsonValue, usize)>> {
    let mut items = Vec::new();
    let mut i = skip_ws(chars, pos + 1);
    if chars.get(i) == Some(&']') {
        return Ok(Some((JsonValue::Array(items), i + 1)));
    }
    loop {
        match parse_value(chars, i)? {
            None => return Ok(None),
            Some((value, end)) => {
                items.push(value);
                i = skip_ws(chars, end);
            }
        }
        match chars.get(i) {
            None => return Ok(None),
            Some(',') => i = skip_ws(chars, i + 1),
            Some(']') => return Ok(Some((JsonValue::Array(items), i + 1))),
            Some(_) => return Err(NetworkError::Fatal(ErrorKind::MalformedMessage)),
        }
    }
}

fn parse_object(chars: &[char], pos: usize) -> NetworkResult<Option<(JsonValue, usize)>> {
    let mut map = IndexMap::new();
    let mut i = skip_ws(chars, pos + 1);
    if chars.get(i) == Some(&'}') {
        return Ok(Some((JsonValue::Object(map), i + 1)));
    }
    loop {
        if chars.get(i) != Some(&'"') {
            return Err(NetworkError::Fatal(ErrorKind::MalformedMessage));
        }
        let (key, after_key) = match parse_string(chars, i)? {
            Some(result) => result,
            None => return Ok(None),
        };
        i = skip_ws(chars, after_key);
        if chars.get(i) != Some(&':') {
            return Err(NetworkError::Fatal(ErrorKind::MalformedMessage));
        }
        i = skip_ws(chars, i + 1);
        let (value, after_value) = match parse_value(chars, i)? {
            Some(result) => result,
            None => return Ok(None),
        };
        map.insert(key, value);
        i = skip_ws(chars, after_value);
        match chars.get(i) {
            None => return Ok(None),
            Some(',') => i = skip_ws(chars, i + 1),
            Some('}') => return Ok(Some((JsonValue::Object(map), i + 1))),
            Some(_) => return Err(NetworkError::Fatal(ErrorKind::MalformedMessage)),
        }
    }
}

use std::fmt::Write as _;
