use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type SheetId = u32;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CellAddr {
    pub row: u32,
    pub col: u32,
}

impl CellAddr {
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Formats the address as `A1` (no absolute markers).
    pub fn to_a1(self) -> String {
        let mut letters = Vec::new();
        let mut n = self.col + 1;
        while n > 0 {
            let rem = (n - 1) % 26;
            letters.push((b'A' + rem as u8) as char);
            n = (n - 1) / 26;
        }
        let col: String = letters.into_iter().rev().collect();
        format!("{col}{}", self.row + 1)
    }
}

impl fmt::Display for CellAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

/// A cell pinned to a worksheet.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CellId {
    pub sheet: SheetId,
    pub addr: CellAddr,
}

impl CellId {
    pub const fn new(sheet: SheetId, addr: CellAddr) -> Self {
        Self { sheet, addr }
    }

    /// Parses an A1 address on `sheet`.
    pub fn from_a1(sheet: SheetId, a1: &str) -> Result<Self, AddressParseError> {
        Ok(Self {
            sheet,
            addr: parse_a1(a1)?,
        })
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}!{}", self.sheet, self.addr)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressParseError {
    #[error("invalid A1 address: {0}")]
    InvalidA1(String),
    #[error("column out of range")]
    ColumnOutOfRange,
    #[error("row out of range")]
    RowOutOfRange,
}

/// Parse an A1-style address like `A1` or `$B$12` into a 0-indexed [`CellAddr`].
pub fn parse_a1(input: &str) -> Result<CellAddr, AddressParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AddressParseError::InvalidA1(input.to_string()));
    }

    let mut chars = input.chars().peekable();
    if matches!(chars.peek(), Some('$')) {
        chars.next();
    }

    let mut col: u32 = 0;
    let mut col_len = 0;
    while let Some(ch) = chars.peek().copied() {
        if !ch.is_ascii_alphabetic() {
            break;
        }
        let digit = (ch.to_ascii_uppercase() as u8 - b'A' + 1) as u32;
        col = col
            .checked_mul(26)
            .and_then(|v| v.checked_add(digit))
            .ok_or(AddressParseError::ColumnOutOfRange)?;
        col_len += 1;
        chars.next();
    }
    if col_len == 0 {
        return Err(AddressParseError::InvalidA1(input.to_string()));
    }

    if matches!(chars.peek(), Some('$')) {
        chars.next();
    }

    let mut row: u32 = 0;
    let mut row_len = 0;
    while let Some(ch) = chars.peek().copied() {
        if !ch.is_ascii_digit() {
            break;
        }
        row = row
            .checked_mul(10)
            .and_then(|v| v.checked_add((ch as u8 - b'0') as u32))
            .ok_or(AddressParseError::RowOutOfRange)?;
        row_len += 1;
        chars.next();
    }

    if row_len == 0 || chars.next().is_some() {
        return Err(AddressParseError::InvalidA1(input.to_string()));
    }
    if row == 0 {
        return Err(AddressParseError::RowOutOfRange);
    }

    // Excel max is XFD (16384) columns and 1,048,576 rows.
    if col > 16_384 {
        return Err(AddressParseError::ColumnOutOfRange);
    }
    if row > 1_048_576 {
        return Err(AddressParseError::RowOutOfRange);
    }

    Ok(CellAddr {
        row: row - 1,
        col: col - 1,
    })
}
