//! A1 notation for addressing tabs, rows and columns of a spreadsheet.
//!
//! Ranges look like `Stories!A2:L2`, `Users!A:A` or just `Stories`. Quoted tab
//! names (`'Donor List'!A:C`) are accepted for tabs that contain spaces.

use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

use crate::error::SheetError;

lazy_static! {
    static ref SPAN_REGEX: Regex =
        Regex::new(r"^([A-Za-z]{1,3})([0-9]*)(?::([A-Za-z]{1,3})([0-9]*))?$").unwrap();
    static ref PLAIN_TAB_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_]+$").unwrap();
}

/// Convert a 1-based column number to its letters (1 -> `A`, 27 -> `AA`).
pub fn col_to_letter(col: u32) -> String {
    let mut col = col;
    let mut result = String::new();
    while col > 0 {
        col -= 1;
        result.push(((col % 26) as u8 + b'A') as char);
        col /= 26;
    }
    result.chars().rev().collect()
}

/// Convert column letters to a 1-based column number (`A` -> 1, `ZZZ` -> 18278).
///
/// Lowercase letters are accepted.
pub fn letter_to_col(letters: &str) -> u32 {
    letters.chars().fold(0, |acc, c| {
        acc * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1)
    })
}

/// Rectangle of cells inside a tab. Row bounds are optional so that open
/// ranges like `A:L` or `A2:L` keep their meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellSpan {
    pub first_col: u32,
    pub first_row: Option<u32>,
    pub last_col: u32,
    pub last_row: Option<u32>,
}

/// A parsed A1 range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRange {
    pub tab: String,
    pub span: Option<CellSpan>,
}

impl SheetRange {
    /// Parse a range such as `Stories!A2:L5`.
    ///
    /// # Errors
    /// * `SheetError::InvalidRange` if the tab name is empty, the span is
    ///   malformed, a row is 0 or the span is inverted
    pub fn parse(input: &str) -> Result<Self, SheetError> {
        let invalid = || SheetError::InvalidRange(input.to_string());

        let (tab, rest) = split_tab(input).ok_or_else(invalid)?;
        if tab.is_empty() {
            return Err(invalid());
        }

        let Some(rest) = rest else {
            return Ok(SheetRange {
                tab,
                span: None,
            });
        };

        let caps = SPAN_REGEX.captures(rest).ok_or_else(invalid)?;
        let first_col = letter_to_col(&caps[1]);
        let first_row = parse_row(&caps[2]).map_err(|_| invalid())?;

        let (last_col, last_row) = match caps.get(3) {
            Some(col) => {
                let row = parse_row(caps.get(4).map_or("", |m| m.as_str())).map_err(|_| invalid())?;
                (letter_to_col(col.as_str()), row)
            }
            // A single cell reference
            None => (first_col, first_row),
        };

        if last_col < first_col {
            return Err(invalid());
        }
        if let (Some(first), Some(last)) = (first_row, last_row) {
            if last < first {
                return Err(invalid());
            }
        }

        Ok(SheetRange {
            tab,
            span: Some(CellSpan {
                first_col,
                first_row,
                last_col,
                last_row,
            }),
        })
    }

    /// Whole columns, e.g. `Stories!A:L`.
    pub fn columns(tab: &str, first_col: u32, last_col: u32) -> Self {
        SheetRange {
            tab: tab.to_string(),
            span: Some(CellSpan {
                first_col,
                first_row: None,
                last_col,
                last_row: None,
            }),
        }
    }

    /// A single row across a column span, e.g. `Stories!A5:L5`.
    pub fn row(tab: &str, first_col: u32, last_col: u32, row: u32) -> Self {
        SheetRange {
            tab: tab.to_string(),
            span: Some(CellSpan {
                first_col,
                first_row: Some(row),
                last_col,
                last_row: Some(row),
            }),
        }
    }

    /// Zero-based inclusive row bounds. `None` as the upper bound means
    /// "to the end of the tab".
    pub fn row_bounds(&self) -> (usize, Option<usize>) {
        match &self.span {
            Some(span) => (
                span.first_row.map_or(0, |r| r as usize - 1),
                span.last_row.map(|r| r as usize - 1),
            ),
            None => (0, None),
        }
    }

    /// Zero-based inclusive column bounds.
    pub fn col_bounds(&self) -> (usize, Option<usize>) {
        match &self.span {
            Some(span) => (span.first_col as usize - 1, Some(span.last_col as usize - 1)),
            None => (0, None),
        }
    }
}

impl fmt::Display for SheetRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if PLAIN_TAB_REGEX.is_match(&self.tab) {
            write!(f, "{}", self.tab)?;
        } else {
            write!(f, "'{}'", self.tab.replace('\'', "''"))?;
        }

        let Some(span) = &self.span else {
            return Ok(());
        };

        let row_str = |row: Option<u32>| row.map(|r| r.to_string()).unwrap_or_default();
        let first = format!("{}{}", col_to_letter(span.first_col), row_str(span.first_row));
        let last = format!("{}{}", col_to_letter(span.last_col), row_str(span.last_row));

        if first == last && span.first_row.is_some() {
            write!(f, "!{first}")
        } else {
            write!(f, "!{first}:{last}")
        }
    }
}

fn parse_row(digits: &str) -> Result<Option<u32>, ()> {
    if digits.is_empty() {
        return Ok(None);
    }
    match digits.parse::<u32>() {
        Ok(0) | Err(_) => Err(()),
        Ok(row) => Ok(Some(row)),
    }
}

// Splits `tab!span` into its parts, honouring quoted tab names.
fn split_tab(input: &str) -> Option<(String, Option<&str>)> {
    if let Some(quoted) = input.strip_prefix('\'') {
        let mut name = String::new();
        let mut chars = quoted.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c != '\'' {
                name.push(c);
                continue;
            }
            if let Some((_, '\'')) = chars.peek() {
                name.push('\'');
                chars.next();
                continue;
            }
            let rest = &quoted[i + 1..];
            return match rest.strip_prefix('!') {
                Some(span) => Some((name, Some(span))),
                None if rest.is_empty() => Some((name, None)),
                None => None,
            };
        }
        return None;
    }

    match input.split_once('!') {
        Some((tab, span)) => Some((tab.to_string(), Some(span))),
        None => Some((input.to_string(), None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letters_round_trip() {
        assert_eq!(col_to_letter(1), "A");
        assert_eq!(col_to_letter(12), "L");
        assert_eq!(col_to_letter(13), "M");
        assert_eq!(col_to_letter(27), "AA");
        assert_eq!(col_to_letter(703), "AAA");
        assert_eq!(col_to_letter(18278), "ZZZ");

        assert_eq!(letter_to_col("A"), 1);
        assert_eq!(letter_to_col("l"), 12);
        assert_eq!(letter_to_col("AZ"), 52);
        assert_eq!(letter_to_col("ZZZ"), 18278);

        for col in 1..=800 {
            assert_eq!(letter_to_col(&col_to_letter(col)), col);
        }
    }

    #[test]
    fn parses_open_column_range() {
        let range = SheetRange::parse("Stories!A:L").unwrap();
        assert_eq!(range.tab, "Stories");
        assert_eq!(range.row_bounds(), (0, None));
        assert_eq!(range.col_bounds(), (0, Some(11)));
        assert_eq!(range.to_string(), "Stories!A:L");
    }

    #[test]
    fn parses_bounded_and_single_cell_ranges() {
        let range = SheetRange::parse("Users!A3:M3").unwrap();
        assert_eq!(range.row_bounds(), (2, Some(2)));
        assert_eq!(range.col_bounds(), (0, Some(12)));

        let cell = SheetRange::parse("Users!B7").unwrap();
        assert_eq!(cell.row_bounds(), (6, Some(6)));
        assert_eq!(cell.col_bounds(), (1, Some(1)));
        assert_eq!(cell.to_string(), "Users!B7");

        let open = SheetRange::parse("Stories!A2:L").unwrap();
        assert_eq!(open.row_bounds(), (1, None));
    }

    #[test]
    fn parses_bare_and_quoted_tabs() {
        let bare = SheetRange::parse("Stories").unwrap();
        assert_eq!(bare.span, None);
        assert_eq!(bare.col_bounds(), (0, None));

        let quoted = SheetRange::parse("'Donor List'!A:C").unwrap();
        assert_eq!(quoted.tab, "Donor List");
        assert_eq!(quoted.to_string(), "'Donor List'!A:C");

        let escaped = SheetRange::parse("'Bob''s'!A1").unwrap();
        assert_eq!(escaped.tab, "Bob's");
    }

    #[test]
    fn rejects_malformed_ranges() {
        for bad in ["", "!A1", "Stories!", "Stories!1A", "Stories!A0", "Stories!L:A", "Stories!A5:B2", "'Open!A1"] {
            assert!(
                matches!(SheetRange::parse(bad), Err(SheetError::InvalidRange(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn builders_render_a1() {
        assert_eq!(SheetRange::row("Stories", 1, 12, 5).to_string(), "Stories!A5:L5");
        assert_eq!(SheetRange::columns("Users", 1, 1).to_string(), "Users!A:A");
    }
}
