//! Compact type signatures for external functions.
//!
//! A signature is a single type:
//!
//! - a primitive letter (see [`Primitive::from_letter`]),
//! - `L<qualified.Name>;` for a host type,
//! - `[T` or `{T` for a one- or two-dimensional array of `T`,
//! - `(A B ...)R` for a function taking `A B ...` and returning `R`.
//!
//! `(IID)D` is a function of two 32-bit integers and a double returning a double.

mod scanner;

use std::fmt;

pub use scanner::{Scanner, Token, TokenKind, TypeTag};

/// Nesting limit for parenthesized and array types.
const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Bool,
    Char,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    /// Carried as `f64`.
    Decimal,
    String,
    Object,
    Void,
    /// A spreadsheet [`Value`](crate::Value) passed through unchanged.
    Value,
}

impl Primitive {
    pub fn from_letter(c: char) -> Option<Self> {
        Some(match c {
            'Z' => Primitive::Bool,
            'C' => Primitive::Char,
            'B' => Primitive::I8,
            'b' => Primitive::U8,
            'S' => Primitive::I16,
            's' => Primitive::U16,
            'I' => Primitive::I32,
            'i' => Primitive::U32,
            'J' => Primitive::I64,
            'j' => Primitive::U64,
            'F' => Primitive::F32,
            'D' => Primitive::F64,
            'M' => Primitive::Decimal,
            'T' => Primitive::String,
            'O' => Primitive::Object,
            'V' => Primitive::Void,
            'W' => Primitive::Value,
            _ => return None,
        })
    }

    pub fn letter(self) -> char {
        match self {
            Primitive::Bool => 'Z',
            Primitive::Char => 'C',
            Primitive::I8 => 'B',
            Primitive::U8 => 'b',
            Primitive::I16 => 'S',
            Primitive::U16 => 's',
            Primitive::I32 => 'I',
            Primitive::U32 => 'i',
            Primitive::I64 => 'J',
            Primitive::U64 => 'j',
            Primitive::F32 => 'F',
            Primitive::F64 => 'D',
            Primitive::Decimal => 'M',
            Primitive::String => 'T',
            Primitive::Object => 'O',
            Primitive::Void => 'V',
            Primitive::Value => 'W',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NativeType {
    Primitive(Primitive),
    Named(String),
    Array { element: Box<NativeType>, rank: u8 },
    Function(FunctionType),
}

impl NativeType {
    pub fn array(element: NativeType, rank: u8) -> Self {
        NativeType::Array {
            element: Box::new(element),
            rank,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionType> {
        match self {
            NativeType::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, NativeType::Primitive(Primitive::Void))
    }
}

impl From<Primitive> for NativeType {
    fn from(p: Primitive) -> Self {
        NativeType::Primitive(p)
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeType::Primitive(p) => write!(f, "{}", p.letter()),
            NativeType::Named(name) => write!(f, "L{name};"),
            NativeType::Array { element, rank } => {
                f.write_str(if *rank == 1 { "[" } else { "{" })?;
                write!(f, "{element}")
            }
            NativeType::Function(func) => write!(f, "{func}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub args: Vec<NativeType>,
    pub result: Box<NativeType>,
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for arg in &self.args {
            write!(f, "{arg}")?;
        }
        write!(f, "){}", self.result)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (at {position})")]
pub struct SignatureError {
    pub message: String,
    /// Byte offset of the offending token.
    pub position: usize,
}

impl SignatureError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

/// Parses a complete signature. Trailing characters are an error.
pub fn parse_signature(text: &str) -> Result<NativeType, SignatureError> {
    let mut parser = Parser::new(text);
    let ty = parser.parse_type(0)?;
    let token = parser.next();
    match token.kind {
        TokenKind::Eof => Ok(ty),
        TokenKind::Error(message) => Err(SignatureError::new(message, token.position)),
        _ => Err(SignatureError::new(
            "extraneous characters after signature",
            token.position,
        )),
    }
}

/// Parses a signature that must be a function type.
pub fn parse_function_signature(text: &str) -> Result<FunctionType, SignatureError> {
    match parse_signature(text)? {
        NativeType::Function(f) => Ok(f),
        other => Err(SignatureError::new(
            format!("expected a function type, found '{other}'"),
            0,
        )),
    }
}

struct Parser<'a> {
    scanner: Scanner<'a>,
    peeked: Option<Token>,
    end: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            scanner: Scanner::new(text),
            peeked: None,
            end: text.len(),
        }
    }

    fn next(&mut self) -> Token {
        if let Some(token) = self.peeked.take() {
            return token;
        }
        self.scanner.next().unwrap_or(Token {
            kind: TokenKind::Eof,
            position: self.end,
        })
    }

    fn peek(&mut self) -> &TokenKind {
        let token = self.next();
        &self.peeked.insert(token).kind
    }

    fn parse_type(&mut self, depth: usize) -> Result<NativeType, SignatureError> {
        let token = self.next();
        if depth > MAX_NESTING {
            return Err(SignatureError::new(
                format!("signature nests deeper than {MAX_NESTING} levels"),
                token.position,
            ));
        }
        match token.kind {
            TokenKind::TypeName(TypeTag::Primitive(p)) => Ok(NativeType::Primitive(p)),
            TokenKind::TypeName(TypeTag::Named(name)) => Ok(NativeType::Named(name)),
            TokenKind::Array1 => Ok(NativeType::array(
                self.parse_element(depth, token.position)?,
                1,
            )),
            TokenKind::Array2 => Ok(NativeType::array(
                self.parse_element(depth, token.position)?,
                2,
            )),
            TokenKind::LParen => {
                let mut args = Vec::new();
                while *self.peek() != TokenKind::RParen {
                    let arg = self.parse_type(depth + 1)?;
                    if arg.is_void() {
                        return Err(SignatureError::new(
                            "void is only valid as a result type",
                            token.position,
                        ));
                    }
                    args.push(arg);
                }
                self.next();
                let result = self.parse_type(depth + 1)?;
                Ok(NativeType::Function(FunctionType {
                    args,
                    result: Box::new(result),
                }))
            }
            TokenKind::RParen => Err(SignatureError::new("unexpected ')'", token.position)),
            TokenKind::Eof => Err(SignatureError::new(
                "unexpected end of signature",
                token.position,
            )),
            TokenKind::Error(message) => Err(SignatureError::new(message, token.position)),
        }
    }

    fn parse_element(
        &mut self,
        depth: usize,
        position: usize,
    ) -> Result<NativeType, SignatureError> {
        let element = self.parse_type(depth + 1)?;
        if element.is_void() {
            return Err(SignatureError::new("array of void", position));
        }
        Ok(element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn parses_function_of_primitives() {
        let f = parse_function_signature("(IID)D").unwrap();
        assert_eq!(
            f,
            FunctionType {
                args: vec![Primitive::I32.into(), Primitive::I32.into(), Primitive::F64.into()],
                result: Box::new(Primitive::F64.into()),
            }
        );
    }

    #[test]
    fn parses_nested_types() {
        let ty = parse_signature("([D{LSystem.Text.StringBuilder;(T)Z)[T").unwrap();
        assert_eq!(
            ty,
            NativeType::Function(FunctionType {
                args: vec![
                    NativeType::array(Primitive::F64.into(), 1),
                    NativeType::array(NativeType::Named("System.Text.StringBuilder".into()), 2),
                    NativeType::Function(FunctionType {
                        args: vec![Primitive::String.into()],
                        result: Box::new(Primitive::Bool.into()),
                    }),
                ],
                result: Box::new(NativeType::array(Primitive::String.into(), 1)),
            })
        );
        assert_eq!(ty.to_string(), "([D{LSystem.Text.StringBuilder;(T)Z)[T");
    }

    #[test]
    fn empty_argument_list() {
        let f = parse_function_signature("()J").unwrap();
        assert!(f.args.is_empty());
        assert_eq!(*f.result, Primitive::I64.into());
    }

    #[test]
    fn rejects_trailing_characters() {
        let err = parse_signature("(D)DD").unwrap_err();
        assert_eq!(err.position, 4);
        assert!(err.message.contains("extraneous"));
    }

    #[test]
    fn rejects_missing_result() {
        let err = parse_signature("(DD)").unwrap_err();
        assert_eq!(err.message, "unexpected end of signature");
        assert_eq!(err.position, 4);
    }

    #[test]
    fn rejects_unclosed_argument_list() {
        assert!(parse_signature("(DD").is_err());
        assert!(parse_signature(")D").is_err());
    }

    #[test]
    fn reports_illegal_characters() {
        let err = parse_signature("(DX)D").unwrap_err();
        assert_eq!(err.message, "illegal character 'X'");
        assert_eq!(err.position, 2);
        assert_eq!(err.to_string(), "illegal character 'X' (at 2)");
    }

    #[test]
    fn rejects_void_arguments() {
        assert!(parse_signature("(V)D").is_err());
        assert!(parse_signature("[V").is_err());
        assert!(parse_signature("()V").is_ok());
    }

    #[test]
    fn function_signature_requires_parens() {
        let err = parse_function_signature("D").unwrap_err();
        assert!(err.message.contains("expected a function type"));
    }

    #[test]
    fn limits_nesting() {
        let deep = format!("{}D", "[".repeat(MAX_NESTING + 2));
        assert!(parse_signature(&deep).is_err());
        let shallow = format!("{}D", "[".repeat(8));
        assert!(parse_signature(&shallow).is_ok());
    }

    proptest! {
        #[test]
        fn scanner_terminates_with_one_final_token(src in "\\PC{0,40}") {
            let tokens: Vec<Token> = Scanner::new(&src).collect();
            let finals = tokens
                .iter()
                .filter(|t| matches!(t.kind, TokenKind::Eof | TokenKind::Error(_)))
                .count();
            prop_assert_eq!(finals, 1);
            prop_assert!(matches!(
                tokens.last().map(|t| &t.kind),
                Some(TokenKind::Eof | TokenKind::Error(_))
            ));
        }

        #[test]
        fn parser_never_panics(src in "[()\\[{LZCBbSsIiJjFDMTOVW;.a-z]{0,24}") {
            let _ = parse_signature(&src);
        }

        #[test]
        fn display_reparses(src in "\\(([IDTZ]|\\[D|\\{D){0,5}\\)[IDTZV]") {
            let ty = parse_signature(&src).unwrap();
            prop_assert_eq!(ty.to_string(), src);
        }
    }
}
