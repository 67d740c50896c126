//! Codec for legacy PHP-serialized arrays.
//!
//! Metadata blobs look like `a:2:{i:0;s:21:"https://x.com/a.png";i:1;...}`.
//! String values are decoded so they can be rewritten; every other value
//! (integers, booleans, nested arrays, ...) is kept as its raw source text so
//! re-encoding reproduces it exactly. String lengths count bytes, not chars.

use crate::error::{RehostError, Result};

/// Array key: PHP arrays allow integer and string keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayKey {
    Int(i64),
    Str(String),
}

/// Array value: decoded string or untouched raw encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayValue {
    Str(String),
    Raw(String),
}

/// Ordered key → value mapping decoded from one blob.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SerializedArray {
    entries: Vec<(ArrayKey, ArrayValue)>,
}

impl SerializedArray {
    pub fn decode(input: &str) -> Result<Self> {
        let mut parser = Parser { input, pos: 0 };
        let array = parser.parse_array()?;
        parser.skip_whitespace();
        if parser.pos != input.len() {
            return Err(parser.error("trailing data after array"));
        }
        Ok(array)
    }

    pub fn encode(&self) -> String {
        let mut out = format!("a:{}:{{", self.entries.len());
        for (key, value) in &self.entries {
            match key {
                ArrayKey::Int(i) => out.push_str(&format!("i:{};", i)),
                ArrayKey::Str(s) => push_string(&mut out, s),
            }
            match value {
                ArrayValue::Str(s) => push_string(&mut out, s),
                ArrayValue::Raw(raw) => out.push_str(raw),
            }
        }
        out.push('}');
        out
    }

    pub fn entries(&self) -> &[(ArrayKey, ArrayValue)] {
        &self.entries
    }

    /// Positions and values of every string entry, in order.
    pub fn string_values(&self) -> impl Iterator<Item = (usize, &str)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, (_, value))| match value {
                ArrayValue::Str(s) => Some((index, s.as_str())),
                ArrayValue::Raw(_) => None,
            })
    }

    /// Replace the string stored at entry `index`.
    pub fn set_string(&mut self, index: usize, value: String) {
        if let Some((_, slot)) = self.entries.get_mut(index) {
            *slot = ArrayValue::Str(value);
        }
    }
}

fn push_string(out: &mut String, s: &str) {
    out.push_str(&format!("s:{}:\"{}\";", s.len(), s));
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, message: &str) -> RehostError {
        RehostError::Codec {
            offset: self.pos,
            message: message.to_string(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    fn expect(&mut self, literal: &str) -> Result<()> {
        if self.rest().starts_with(literal) {
            self.pos += literal.len();
            Ok(())
        } else {
            Err(self.error(&format!("expected {:?}", literal)))
        }
    }

    /// Consume up to (and including) `delim`, returning the text before it.
    fn read_until(&mut self, delim: char) -> Result<&'a str> {
        let rest = self.rest();
        let end = rest
            .find(delim)
            .ok_or_else(|| self.error(&format!("missing {:?}", delim)))?;
        self.pos += end + delim.len_utf8();
        Ok(&rest[..end])
    }

    fn read_int(&mut self, delim: char) -> Result<i64> {
        let start = self.pos;
        let text = self.read_until(delim)?;
        text.trim().parse().map_err(|_| RehostError::Codec {
            offset: start,
            message: format!("invalid integer {:?}", text),
        })
    }

    /// `<len>:"<bytes>";` after the `s:` tag.
    fn read_string_body(&mut self) -> Result<String> {
        let len = self.read_int(':')?;
        let len = usize::try_from(len).map_err(|_| self.error("negative string length"))?;
        self.expect("\"")?;
        let end = self.pos + len;
        if end > self.input.len() || !self.input.is_char_boundary(end) {
            return Err(self.error("string length out of range"));
        }
        let value = self.input[self.pos..end].to_string();
        self.pos = end;
        self.expect("\";")?;
        Ok(value)
    }

    fn parse_array(&mut self) -> Result<SerializedArray> {
        self.skip_whitespace();
        self.expect("a:")?;
        let count = self.read_int(':')?;
        self.expect("{")?;

        let mut entries = Vec::with_capacity(count.clamp(0, 1024) as usize);
        for _ in 0..count {
            let key = self.parse_key()?;
            let value = self.parse_value()?;
            entries.push((key, value));
        }
        self.expect("}")?;
        Ok(SerializedArray { entries })
    }

    fn parse_key(&mut self) -> Result<ArrayKey> {
        if self.rest().starts_with("i:") {
            self.pos += 2;
            Ok(ArrayKey::Int(self.read_int(';')?))
        } else if self.rest().starts_with("s:") {
            self.pos += 2;
            Ok(ArrayKey::Str(self.read_string_body()?))
        } else {
            Err(self.error("expected integer or string key"))
        }
    }

    fn parse_value(&mut self) -> Result<ArrayValue> {
        if self.rest().starts_with("s:") {
            self.pos += 2;
            return Ok(ArrayValue::Str(self.read_string_body()?));
        }
        let start = self.pos;
        self.skip_value()?;
        Ok(ArrayValue::Raw(self.input[start..self.pos].to_string()))
    }

    fn skip_value(&mut self) -> Result<()> {
        let rest = self.rest();
        if rest.starts_with("N;") {
            self.pos += 2;
        } else if rest.starts_with("i:") || rest.starts_with("b:") || rest.starts_with("d:") {
            self.pos += 2;
            self.read_until(';')?;
        } else if rest.starts_with("s:") {
            self.pos += 2;
            self.read_string_body()?;
        } else if rest.starts_with("a:") {
            self.parse_array()?;
        } else {
            return Err(self.error("unsupported value type"));
        }
        Ok(())
    }
}
