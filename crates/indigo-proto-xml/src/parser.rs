//! Hand-rolled byte-driven parser for the wire dialect's deliberately tiny
//! XML-like grammar: `defXXXVector`/`setXXXVector`/`newXXXVector`/
//! `delProperty`/`enableBLOB`/`getProperties`/`message` elements, each
//! either self-closing or containing a flat list of item elements with text
//! content. No general XML features (namespaces, CDATA, entities beyond the
//! five predefined ones, processing instructions) are supported — nothing in
//! the dialect uses them.
//!
//! Callers feed bytes as they arrive (`Parser::feed`) and drain complete
//! elements with `Parser::next_element`, which returns `Ok(None)` when the
//! buffered bytes don't yet contain a complete element — the same "wait for
//! more data" idiom `indigo_support::error::NetworkError::Wait` models for
//! the lower-level framing.

use std::collections::HashMap;

use indigo_support::error::{ErrorKind, NetworkError, NetworkResult};

#[derive(Debug, Clone)]
pub struct Element {
    pub name: String,
    pub attrs: HashMap<String, String>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(|s| s.as_str())
    }
}

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

    /// Attempts to parse one complete top-level element out of the buffer.
    /// Leading whitespace between elements is skipped.
    pub fn next_element(&mut self) -> NetworkResult<Option<Element>> {
        let start = skip_whitespace(&self.buffer, 0);
        if start >= self.buffer.len() {
            self.buffer.clear();
            return Ok(None);
        }
        match parse_element(&self.buffer, start)? {
            Some((element, consumed)) => {
                self.buffer.drain(0..consumed);
                Ok(Some(element))
            }
            None => Ok(None),
        }
    }
}

fn skip_whitespace(buf: &[u8], mut pos: usize) -> usize {
    while pos < buf.len() && buf[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

/// Parses one element starting at `pos` (which must point at `<`). Returns
/// `Ok(None)` if the buffer doesn't yet contain the complete element.
fn parse_element(buf: &[u8], pos: usize) -> NetworkResult<Option<(Element, usize)>> {
    if buf.get(pos) != Some(&b'<') {
        return Err(NetworkError::Fatal(ErrorKind::MalformedMessage));
    }
    let name_start = pos + 1;
    let name_end = match buf[name_start..].iter().position(|b| b.is_ascii_whitespace() || *b == b'>' || *b == b'/') {
        Some(rel) => name_start + rel,
        None => return Ok(None),
    };
    let name = std::str::from_utf8(&buf[name_start..name_end])
        .map_err(|_| NetworkError::Fatal(ErrorKind::MalformedMessage))?
        .to_string();

    let mut cursor = name_end;
    let mut attrs = HashMap::new();
    loop {
        cursor = skip_whitespace(buf, cursor);
        match buf.get(cursor) {
            None => return Ok(None),
            Some(b'/') => {
                if buf.get(cursor + 1) == Some(&b'>') {
                    return Ok(Some((
                        Element {
                            name,
                            attrs,
                            children: Vec::new(),
                            text: String::new(),
                        },
                        cursor + 2,
                    )));
                }
                return Err(NetworkError::Fatal(ErrorKind::MalformedMessage));
            }
            Some(b'>') => {
                cursor += 1;
                break;
            }
            Some(_) => match parse_attribute(buf, cursor)? {
                Some((key, value, next)) => {
                    attrs.insert(key, value);
                    cursor = next;
                }
                None => return Ok(None),
            },
        }
    }

    // Body: either nested item elements or a flat text run, up to the
    // matching closing tag.
    let close_tag = format!("</{name}>");
    let mut children = Vec::new();
    let mut text = String::new();
    loop {
        let body_start = skip_whitespace(buf, cursor);
        if buf[body_start..].starts_with(close_tag.as_bytes()) {
            return Ok(Some((Element { name, attrs, children, text }, body_start + close_tag.len())));
        }
        if buf.get(body_start) == Some(&b'<') {
            match parse_element(buf, body_start)? {
                Some((child, consumed)) => {
                    children.push(child);
                    cursor = consumed;
                }
                None => return Ok(None),
            }
        } else {
            let text_end = match buf[body_start..].iter().position(|b| *b == b'<') {
                Some(rel) => body_start + rel,
                None => return Ok(None),
            };
            text.push_str(
                std::str::from_utf8(&buf[body_start..text_end])
                    .map_err(|_| NetworkError::Fatal(ErrorKind::MalformedMessage))?
                    .trim(),
            );
            cursor = text_end;
        }
    }
}

fn parse_attribute(buf: &[u8], pos: usize) -> NetworkResult<Option<(String, String, usize)>> {
    let eq = match buf[pos..].iter().position(|b| *b == b'=') {
        Some(rel) => pos + rel,
        None => return Ok(None),
    };
    let key = std::str::from_utf8(&buf[pos..eq])
        .map_err(|_| NetworkError::Fatal(ErrorKind::MalformedMessage))?
        .trim()
        .to_string();
    let quote_pos = eq + 1;
    let quote = match buf.get(quote_pos) {
        Some(b) if *b == b'"' || *b == b'\'' => *b,
        Some(_) => return Err(NetworkError::Fatal(ErrorKind::MalformedMessage)),
        None => return Ok(None),
    };
    let value_start = quote_pos + 1;
    let value_end = match buf[value_start..].iter().position(|b| *b == quote) {
        Some(rel) => value_start + rel,
        None => return Ok(None),
    };
    let value = unescape(
        std::str::from_utf8(&buf[value_start..value_end]).map_err(|_| NetworkError::Fatal(ErrorKind::MalformedMessage))?,
    );
    Ok(Some((key, value, value_end + 1)))
}

fn unescape(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
