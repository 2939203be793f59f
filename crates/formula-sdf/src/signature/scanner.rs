use super::Primitive;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    LParen,
    RParen,
    /// `[`: the next type is the element of a one-dimensional array.
    Array1,
    /// `{`: the next type is the element of a two-dimensional array.
    Array2,
    TypeName(TypeTag),
    Eof,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTag {
    Primitive(Primitive),
    /// Fully qualified host type from `L<name>;`.
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the token in the signature text.
    pub position: usize,
}

/// Lazily tokenizes signature text.
///
/// The iterator yields exactly one `Eof` or `Error` token and then stops.
#[derive(Debug, Clone)]
pub struct Scanner<'a> {
    src: &'a str,
    pos: usize,
    done: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            done: false,
        }
    }

    fn scan(&mut self) -> Token {
        let position = self.pos;
        let Some(c) = self.src[self.pos..].chars().next() else {
            self.done = true;
            return Token {
                kind: TokenKind::Eof,
                position,
            };
        };
        self.pos += c.len_utf8();
        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::Array1,
            '{' => TokenKind::Array2,
            'L' => self.qualified_name(position),
            c => match Primitive::from_letter(c) {
                Some(p) => TokenKind::TypeName(TypeTag::Primitive(p)),
                None => TokenKind::Error(format!("illegal character '{c}'")),
            },
        };
        if matches!(kind, TokenKind::Error(_)) {
            self.done = true;
        }
        Token { kind, position }
    }

    fn qualified_name(&mut self, start: usize) -> TokenKind {
        let rest = &self.src[self.pos..];
        let Some(end) = rest.find(';') else {
            self.pos = self.src.len();
            return TokenKind::Error(format!(
                "unterminated type name starting at {start}, expected ';'"
            ));
        };
        let name = &rest[..end];
        self.pos += end + 1;
        if name.is_empty() {
            return TokenKind::Error("empty type name".to_string());
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_alphanumeric() || matches!(c, '.' | '_' | '+' | '`')))
        {
            return TokenKind::Error(format!("illegal character '{bad}' in type name '{name}'"));
        }
        TokenKind::TypeName(TypeTag::Named(name.to_string()))
    }
}

impl Iterator for Scanner<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.done {
            return None;
        }
        Some(self.scan())
    }
}
