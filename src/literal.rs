//! Parser for the JavaScript object-literal assignment Bandcamp embeds in
//! album and track pages (`var TralbumData = {...};`).
//!
//! The page ships this data as executable script. Evaluating it would hand
//! control to whatever the page decided to serve, so instead only the pure
//! data subset of the language is accepted: objects, arrays, strings,
//! numbers, booleans and null. Anything else fails closed with
//! [`Error::UnsupportedConstruct`].

use serde_json::{Map, Number, Value};

#[derive(Debug, PartialEq, snafu::Snafu)]
pub enum Error {
    #[snafu(display("no `var <name> = <literal>;` assignment found"))]
    NotFound,
    #[snafu(display("malformed literal at byte {}: {}", at, reason))]
    MalformedLiteral { at: usize, reason: String },
    #[snafu(display("unsupported construct at byte {}: {}", at, reason))]
    UnsupportedConstruct { at: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Parses the first `var <identifier> = <object-literal>;` statement of
/// `source` into a generic value. Trailing content after the terminating
/// `;` is ignored.
pub fn parse_embedded_object(source: &str) -> Result<Value> {
    let mut parser = Parser { src: source, pos: 0 };

    parser.skip_trivia();
    if !parser.eat_keyword("var") {
        return Err(Error::NotFound);
    }
    parser.skip_trivia();
    let name = parser.eat_identifier().ok_or(Error::NotFound)?;
    parser.skip_trivia();
    if !parser.eat(b'=') {
        return Err(Error::NotFound);
    }
    log::debug!("parsing embedded assignment of `{}`", name);

    let value = parser.value()?;
    parser.skip_trivia();
    if !parser.eat(b';') {
        return parser.malformed("missing statement terminator");
    }
    Ok(value)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.as_bytes().get(self.pos + offset).copied()
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Skips whitespace and comments. Comments carry no data, so they are
    /// benign as far as the fail-closed rule is concerned.
    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => self.pos += 1,
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(b) = self.peek() {
                        self.pos += 1;
                        if b == b'\n' {
                            break;
                        }
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    self.pos += 2;
                    while let Some(b) = self.peek() {
                        self.pos += 1;
                        if b == b'*' && self.peek() == Some(b'/') {
                            self.pos += 1;
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let end = self.pos + keyword.len();
        if self.src[self.pos..].starts_with(keyword)
            && self.src.as_bytes().get(end).map_or(true, |b| !is_ident_byte(*b))
        {
            self.pos = end;
            true
        } else {
            false
        }
    }

    fn eat_identifier(&mut self) -> Option<&'a str> {
        let start = self.pos;
        if self.peek().map_or(true, |b| b.is_ascii_digit() || !is_ident_byte(b)) {
            return None;
        }
        while self.peek().map_or(false, is_ident_byte) {
            self.pos += 1;
        }
        Some(&self.src[start..self.pos])
    }

    fn malformed<T>(&self, reason: impl Into<String>) -> Result<T> {
        Err(Error::MalformedLiteral {
            at: self.pos,
            reason: reason.into(),
        })
    }

    fn unsupported<T>(&self, reason: impl Into<String>) -> Result<T> {
        Err(Error::UnsupportedConstruct {
            at: self.pos,
            reason: reason.into(),
        })
    }

    /// One literal value. After the value, the next significant byte must
    /// close the enclosing construct or end the statement. An operator or
    /// call there means the source is an expression, not data.
    fn value(&mut self) -> Result<Value> {
        self.skip_trivia();
        let value = match self.peek() {
            Some(b'{') => self.object()?,
            Some(b'[') => self.array()?,
            Some(b'"') | Some(b'\'') => Value::String(self.string()?),
            Some(b) if b == b'-' || b == b'+' || b == b'.' || b.is_ascii_digit() => {
                self.number()?
            }
            Some(_) => {
                if self.eat_keyword("true") {
                    Value::Bool(true)
                } else if self.eat_keyword("false") {
                    Value::Bool(false)
                } else if self.eat_keyword("null") {
                    Value::Null
                } else {
                    return self.unsupported("expected a literal value");
                }
            }
            None => return self.malformed("unexpected end of input"),
        };

        self.skip_trivia();
        match self.peek() {
            None | Some(b',') | Some(b'}') | Some(b']') | Some(b';') => Ok(value),
            Some(_) => self.unsupported("expression where a literal was expected"),
        }
    }

    fn object(&mut self) -> Result<Value> {
        self.pos += 1; // {
        let mut map = Map::new();
        self.skip_trivia();
        if self.eat(b'}') {
            return Ok(Value::Object(map));
        }
        loop {
            self.skip_trivia();
            let key = self.key()?;
            self.skip_trivia();
            if !self.eat(b':') {
                return self.malformed("expected `:` after object key");
            }
            let value = self.value()?;
            map.insert(key, value);
            self.skip_trivia();
            if self.eat(b',') {
                self.skip_trivia();
                if self.eat(b'}') {
                    break; // trailing comma
                }
                continue;
            }
            if self.eat(b'}') {
                break;
            }
            return self.malformed("expected `,` or `}` in object");
        }
        Ok(Value::Object(map))
    }

    fn key(&mut self) -> Result<String> {
        match self.peek() {
            Some(b'"') | Some(b'\'') => self.string(),
            _ => match self.eat_identifier() {
                Some(ident) => Ok(ident.to_owned()),
                None => self.malformed("expected object key"),
            },
        }
    }

    fn array(&mut self) -> Result<Value> {
        self.pos += 1; // [
        let mut items = Vec::new();
        self.skip_trivia();
        if self.eat(b']') {
            return Ok(Value::Array(items));
        }
        loop {
            items.push(self.value()?);
            self.skip_trivia();
            if self.eat(b',') {
                self.skip_trivia();
                if self.eat(b']') {
                    break; // trailing comma
                }
                continue;
            }
            if self.eat(b']') {
                break;
            }
            return self.malformed("expected `,` or `]` in array");
        }
        Ok(Value::Array(items))
    }

    fn string(&mut self) -> Result<String> {
        let quote = match self.peek() {
            Some(q) => q as char,
            None => return self.malformed("expected string"),
        };
        self.pos += 1;
        let mut out = String::new();
        loop {
            let c = match self.bump_char() {
                Some(c) => c,
                None => return self.malformed("unterminated string"),
            };
            if c == quote {
                return Ok(out);
            }
            if c != '\\' {
                out.push(c);
                continue;
            }
            let escape = match self.bump_char() {
                Some(c) => c,
                None => return self.malformed("unterminated escape"),
            };
            match escape {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                'b' => out.push('\u{8}'),
                'f' => out.push('\u{c}'),
                '0' => out.push('\0'),
                'u' => out.push(self.unicode_escape()?),
                // Unknown escapes keep the escaped character itself.
                other => out.push(other),
            }
        }
    }

    fn bump_char(&mut self) -> Option<char> {
        let c = self.src[self.pos..].chars().next()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn unicode_escape(&mut self) -> Result<char> {
        let first = self.code_unit()?;
        if !(0xD800..=0xDBFF).contains(&first) {
            return match char::from_u32(first) {
                Some(c) => Ok(c),
                None => self.malformed("lone low surrogate in string"),
            };
        }
        // High surrogate, must pair with `\uDC00`..`\uDFFF`.
        if self.eat(b'\\') && self.eat(b'u') {
            let second = self.code_unit()?;
            if (0xDC00..=0xDFFF).contains(&second) {
                let combined = 0x10000 + ((first - 0xD800) << 10) + (second - 0xDC00);
                if let Some(c) = char::from_u32(combined) {
                    return Ok(c);
                }
            }
        }
        self.malformed("unpaired high surrogate in string")
    }

    fn code_unit(&mut self) -> Result<u32> {
        if self.pos + 4 > self.src.len() {
            return self.malformed("truncated unicode escape");
        }
        let digits = &self.src[self.pos..self.pos + 4];
        match u32::from_str_radix(digits, 16) {
            Ok(unit) => {
                self.pos += 4;
                Ok(unit)
            }
            Err(_) => self.malformed("invalid unicode escape"),
        }
    }

    fn number(&mut self) -> Result<Value> {
        let start = self.pos;
        let _ = self.eat(b'+') || self.eat(b'-');
        let mut is_float = false;
        while self.peek().map_or(false, |b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.eat(b'.') {
            is_float = true;
            while self.peek().map_or(false, |b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if self.peek() == Some(b'e') || self.peek() == Some(b'E') {
            is_float = true;
            self.pos += 1;
            let _ = self.eat(b'+') || self.eat(b'-');
            if !self.peek().map_or(false, |b| b.is_ascii_digit()) {
                return self.malformed("missing exponent digits");
            }
            while self.peek().map_or(false, |b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }

        let text = &self.src[start..self.pos];
        if !text.bytes().any(|b| b.is_ascii_digit()) {
            return self.malformed("expected number");
        }
        if !is_float {
            if let Ok(int) = text.parse::<i64>() {
                return Ok(Value::from(int));
            }
        }
        match text.parse::<f64>().ok().and_then(Number::from_f64) {
            Some(number) => Ok(Value::Number(number)),
            None => self.malformed("number out of range"),
        }
    }
}
