//! A1 cell references and row shifting
//!
//! Inserting rows into a worksheet moves every reference below the insertion
//! point. [`RowShift`] applies that move to single cells, ranges, `sqref`
//! lists and formula text.

use crate::error::{CoaError, CoaResult};
use regex::Regex;
use rust_xlsxwriter::utility::{column_name_to_number, column_number_to_name};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Largest column index Excel accepts (XFD).
const MAX_COL: u16 = 16_383;
/// Largest row number Excel accepts.
const MAX_ROW: u32 = 1_048_576;

fn cell_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\$?)([A-Za-z]{1,3})(\$?)([0-9]+)$").expect("valid cell regex")
    })
}

fn formula_ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:(?P<sheet>'(?:[^']|'')+'|[A-Za-z_][A-Za-z0-9_.]*)!)?(?P<cabs>\$?)(?P<col>[A-Za-z]{1,3})(?P<rabs>\$?)(?P<row>[0-9]+)",
        )
        .expect("valid formula reference regex")
    })
}

/// A single cell in A1 notation.
///
/// `row` is 1-based as written in A1 notation; `col` is zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRef {
    pub col: u16,
    pub row: u32,
    pub col_absolute: bool,
    pub row_absolute: bool,
}

impl CellRef {
    pub fn new(col: u16, row: u32) -> Self {
        Self {
            col,
            row,
            col_absolute: false,
            row_absolute: false,
        }
    }

    /// Column letters of this cell, e.g. `"E"`.
    pub fn column_name(&self) -> String {
        column_number_to_name(self.col)
    }
}

impl FromStr for CellRef {
    type Err = CoaError;

    fn from_str(s: &str) -> CoaResult<Self> {
        let caps = cell_regex()
            .captures(s.trim())
            .ok_or_else(|| CoaError::Parse(format!("'{s}' is not an A1 cell reference")))?;
        let letters = caps[2].to_ascii_uppercase();
        let col = column_name_to_number(&letters);
        let row: u32 = caps[4]
            .parse()
            .map_err(|_| CoaError::Parse(format!("row number out of range in '{s}'")))?;
        if col > MAX_COL || row == 0 || row > MAX_ROW {
            return Err(CoaError::Parse(format!(
                "'{s}' lies outside the worksheet grid"
            )));
        }
        Ok(Self {
            col,
            row,
            col_absolute: !caps[1].is_empty(),
            row_absolute: !caps[3].is_empty(),
        })
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            if self.col_absolute { "$" } else { "" },
            self.column_name(),
            if self.row_absolute { "$" } else { "" },
            self.row
        )
    }
}

/// A rectangular range such as `A51:E56`. A single cell is a range whose
/// corners coincide and is rendered without the colon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRange {
    pub start: CellRef,
    pub end: CellRef,
}

impl CellRange {
    pub fn new(start: CellRef, end: CellRef) -> Self {
        Self { start, end }
    }

    pub fn first_row(&self) -> u32 {
        self.start.row.min(self.end.row)
    }

    pub fn last_row(&self) -> u32 {
        self.start.row.max(self.end.row)
    }

    pub fn first_col(&self) -> u16 {
        self.start.col.min(self.end.col)
    }

    pub fn last_col(&self) -> u16 {
        self.start.col.max(self.end.col)
    }

    pub fn height(&self) -> u32 {
        self.last_row() - self.first_row() + 1
    }

    pub fn contains_col(&self, col: u16) -> bool {
        (self.first_col()..=self.last_col()).contains(&col)
    }

    /// Same range with the bottom edge moved to `last_row`.
    pub fn with_last_row(mut self, last_row: u32) -> Self {
        if self.start.row > self.end.row {
            self.start.row = last_row;
        } else {
            self.end.row = last_row;
        }
        self
    }
}

impl FromStr for CellRange {
    type Err = CoaError;

    fn from_str(s: &str) -> CoaResult<Self> {
        match s.split_once(':') {
            Some((a, b)) => Ok(Self::new(a.parse()?, b.parse()?)),
            None => {
                let cell: CellRef = s.parse()?;
                Ok(Self::new(cell, cell))
            }
        }
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

/// Rows inserted directly below row `after`: every row number greater than
/// `after` moves down by `by`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowShift {
    pub after: u32,
    pub by: u32,
}

impl RowShift {
    pub fn new(after: u32, by: u32) -> Self {
        Self { after, by }
    }

    pub fn is_noop(&self) -> bool {
        self.by == 0
    }

    pub fn row(&self, row: u32) -> u32 {
        if row > self.after {
            row + self.by
        } else {
            row
        }
    }

    pub fn cell(&self, mut cell: CellRef) -> CellRef {
        cell.row = self.row(cell.row);
        cell
    }

    pub fn range(&self, range: CellRange) -> CellRange {
        CellRange::new(self.cell(range.start), self.cell(range.end))
    }

    /// Shift a single reference or range given as text.
    pub fn reference(&self, text: &str) -> CoaResult<String> {
        Ok(self.range(text.parse()?).to_string())
    }

    /// Shift a space-separated `sqref` list.
    pub fn sqref(&self, text: &str) -> CoaResult<String> {
        let shifted = text
            .split_whitespace()
            .map(|part| self.reference(part))
            .collect::<CoaResult<Vec<_>>>()?;
        Ok(shifted.join(" "))
    }

    /// Shift the cell references in a formula.
    ///
    /// References qualified with `sheet` are always shifted. Unqualified
    /// references are shifted only when `unqualified` is set, i.e. when the
    /// formula lives on `sheet` itself. String literals and structured table
    /// references are left alone.
    pub fn formula(&self, formula: &str, sheet: &str, unqualified: bool) -> String {
        if self.is_noop() {
            return formula.to_string();
        }

        let mut out = String::with_capacity(formula.len() + 8);
        let mut plain = String::new();
        let mut chars = formula.chars().peekable();
        let mut bracket_depth = 0usize;

        while let Some(ch) = chars.next() {
            match ch {
                '"' if bracket_depth == 0 => {
                    out.push_str(&self.shift_plain(&plain, sheet, unqualified));
                    plain.clear();
                    out.push(ch);
                    // `""` inside a literal is an escaped quote
                    while let Some(inner) = chars.next() {
                        out.push(inner);
                        if inner == '"' {
                            if chars.peek() == Some(&'"') {
                                out.push('"');
                                chars.next();
                            } else {
                                break;
                            }
                        }
                    }
                }
                '[' => {
                    if bracket_depth == 0 {
                        out.push_str(&self.shift_plain(&plain, sheet, unqualified));
                        plain.clear();
                    }
                    bracket_depth += 1;
                    out.push(ch);
                }
                ']' if bracket_depth > 0 => {
                    bracket_depth -= 1;
                    out.push(ch);
                }
                _ if bracket_depth > 0 => out.push(ch),
                _ => plain.push(ch),
            }
        }
        out.push_str(&self.shift_plain(&plain, sheet, unqualified));
        out
    }

    fn shift_plain(&self, text: &str, sheet: &str, unqualified: bool) -> String {
        if text.is_empty() {
            return String::new();
        }

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        // Sheet qualifier of the previous match, inherited by `Sheet!A1:B2`'s second corner
        let mut previous: Option<(usize, Option<String>)> = None;

        for caps in formula_ref_regex().captures_iter(text) {
            let whole = caps.get(0).expect("match 0 always present");
            let before = text[..whole.start()].chars().next_back();
            let after = text[whole.end()..].chars().next();

            let glued_before = before.is_some_and(|c| c.is_alphanumeric() || "_.$".contains(c));
            let glued_after =
                after.is_some_and(|c| c.is_alphanumeric() || "_(!".contains(c));
            if glued_before || glued_after {
                continue;
            }

            let mut qualifier = caps.name("sheet").map(|m| unquote_sheet(m.as_str()));
            if qualifier.is_none() {
                if let Some((end, inherited)) = &previous {
                    if *end + 1 == whole.start() && text[*end..].starts_with(':') {
                        qualifier = inherited.clone();
                    }
                }
            }

            let targets_sheet = match &qualifier {
                Some(name) => name.eq_ignore_ascii_case(sheet),
                None => unqualified,
            };
            previous = Some((whole.end(), qualifier));

            if !targets_sheet {
                continue;
            }
            let Ok(row) = caps["row"].parse::<u32>() else {
                continue;
            };
            let shifted = self.row(row);
            if shifted == row {
                continue;
            }

            out.push_str(&text[last..whole.start()]);
            if let Some(sheet_part) = caps.name("sheet") {
                out.push_str(sheet_part.as_str());
                out.push('!');
            }
            out.push_str(&caps["cabs"]);
            out.push_str(&caps["col"]);
            out.push_str(&caps["rabs"]);
            out.push_str(&shifted.to_string());
            last = whole.end();
        }

        out.push_str(&text[last..]);
        out
    }
}

fn unquote_sheet(raw: &str) -> String {
    raw.strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .map(|s| s.replace("''", "'"))
        .unwrap_or_else(|| raw.to_string())
}
