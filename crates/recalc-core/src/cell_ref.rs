//! Cell addressing.
//!
//! Converts between zero-based `(row, col)` indices and A1-style text
//! (`"B5"`, `"AA100"`). Columns use bijective base-26 letters: `A` is 0,
//! `Z` is 25, `AA` is 26.
//!
//! ```
//! use recalc_core::CellRef;
//!
//! let cell: CellRef = "B3".parse().unwrap();
//! assert_eq!((cell.row, cell.col), (2, 1));
//! assert_eq!(cell.to_string(), "B3");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Convert a zero-based column index to letters (0 -> A, 25 -> Z, 26 -> AA).
pub fn col_to_letters(col: u32) -> String {
    let mut letters = Vec::new();
    let mut n = u64::from(col) + 1;
    while n > 0 {
        n -= 1;
        letters.push(b'A' + (n % 26) as u8);
        n /= 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Convert column letters to a zero-based index. Case-insensitive.
///
/// Returns `None` for empty input, non-letters, or columns beyond `u32`.
pub fn letters_to_col(letters: &str) -> Option<u32> {
    if letters.is_empty() {
        return None;
    }
    let mut acc: u64 = 0;
    for b in letters.bytes() {
        if !b.is_ascii_alphabetic() {
            return None;
        }
        let digit = u64::from(b.to_ascii_uppercase() - b'A') + 1;
        acc = acc.checked_mul(26)?.checked_add(digit)?;
        if acc > u64::from(u32::MAX) + 1 {
            return None;
        }
    }
    u32::try_from(acc - 1).ok()
}

/// A position within a sheet (zero-based).
///
/// Serializes as its A1 text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Parse A1 text, accepting lowercase letters and `$` absolute markers.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let text = text.strip_prefix('$').unwrap_or(text);
        let split = text.find(|c: char| !c.is_ascii_alphabetic())?;
        let (letters, rest) = text.split_at(split);
        let digits = rest.strip_prefix('$').unwrap_or(rest);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let col = letters_to_col(letters)?;
        let row = digits.parse::<u32>().ok()?.checked_sub(1)?;
        Some(Self { row, col })
    }

    /// Attach a sheet to this position.
    pub fn in_sheet(self, sheet_id: impl Into<String>) -> CellAddress {
        CellAddress::new(sheet_id, self.row, self.col)
    }
}

impl FromStr for CellRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| Error::InvalidCellRef(s.to_string()))
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", col_to_letters(self.col), u64::from(self.row) + 1)
    }
}

impl Serialize for CellRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CellRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        CellRef::parse(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid cell reference: {}", text)))
    }
}

/// A fully qualified cell: external sheet identifier plus position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellAddress {
    pub sheet_id: String,
    pub row: u32,
    pub col: u32,
}

impl CellAddress {
    pub fn new(sheet_id: impl Into<String>, row: u32, col: u32) -> Self {
        Self {
            sheet_id: sheet_id.into(),
            row,
            col,
        }
    }

    /// The sheet-less position of this address.
    pub fn cell_ref(&self) -> CellRef {
        CellRef::new(self.row, self.col)
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.sheet_id, self.cell_ref())
    }
}
