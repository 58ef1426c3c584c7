use crate::error::{CoaError, CoaResult};
use chrono::NaiveDate;
use indexmap::map::Entry;
use indexmap::IndexMap;
use std::fmt;

//==============================================================================
// Last-active date
//==============================================================================

/// The "last active" date ADS reports for a co-author.
///
/// ADS writes `YYYY/MM/DD` and uses day `00` when only the month is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActiveDate {
    Year(i32),
    Month { year: i32, month: u32 },
    Day(NaiveDate),
}

impl ActiveDate {
    /// Parse `YYYY/MM/DD`, `YYYY-MM-DD`, `YYYY/MM`, `YYYY-MM` or `YYYY`.
    pub fn parse(text: &str) -> CoaResult<Self> {
        let text = text.trim();
        let invalid = || CoaError::Parse(format!("'{text}' is not a YYYY/MM/DD date"));

        let parts: Vec<&str> = text.split(['/', '-']).collect();
        if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(invalid());
        }
        if parts[0].len() != 4 || parts[1..].iter().any(|p| p.len() > 2) {
            return Err(invalid());
        }
        if !parts.iter().all(|p| p.bytes().all(|b| b.is_ascii_digit())) {
            return Err(invalid());
        }
        let numbers = parts
            .iter()
            .map(|p| p.parse::<u32>().map_err(|_| invalid()))
            .collect::<CoaResult<Vec<u32>>>()?;

        let year = numbers[0] as i32;
        match numbers[1..] {
            [] => Ok(ActiveDate::Year(year)),
            [month] | [month, 0] if (1..=12).contains(&month) => {
                Ok(ActiveDate::Month { year, month })
            }
            [month, day] => NaiveDate::from_ymd_opt(year, month, day)
                .map(ActiveDate::Day)
                .ok_or_else(invalid),
            _ => Err(invalid()),
        }
    }

    /// Rendering used in the template's "Last Active" column.
    pub fn to_template_string(&self) -> String {
        match self {
            ActiveDate::Year(year) => format!("{year:04}"),
            ActiveDate::Month { year, month } => format!("{month:02}/{year:04}"),
            ActiveDate::Day(date) => date.format("%m/%d/%Y").to_string(),
        }
    }
}

impl fmt::Display for ActiveDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_template_string())
    }
}

//==============================================================================
// Records
//==============================================================================

/// One author/affiliation row of the ADS export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffiliationRecord {
    author: String,
    affiliation: String,
    last_active: Option<ActiveDate>,
    line: u64,
}

impl AffiliationRecord {
    /// Build a record; names are trimmed and internal whitespace collapsed.
    pub fn new(
        author: &str,
        affiliation: &str,
        last_active: Option<ActiveDate>,
        line: u64,
    ) -> Self {
        Self {
            author: normalize(author),
            affiliation: normalize(affiliation),
            last_active,
            line,
        }
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn affiliation(&self) -> &str {
        &self.affiliation
    }

    pub fn last_active(&self) -> Option<ActiveDate> {
        self.last_active
    }

    /// 1-based line in the source file.
    pub fn line(&self) -> u64 {
        self.line
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

//==============================================================================
// Author/affiliation table
//==============================================================================

/// Unique (author, affiliation) pairs in first-occurrence order.
#[derive(Debug, Clone, Default)]
pub struct AuthorAffiliationTable {
    records: IndexMap<(String, String), AffiliationRecord>,
    duplicates: usize,
}

impl AuthorAffiliationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record unless its pair is already present; the first occurrence
    /// wins. Returns whether the record was added.
    pub fn insert(&mut self, record: AffiliationRecord) -> bool {
        let key = (record.author.clone(), record.affiliation.clone());
        match self.records.entry(key) {
            Entry::Occupied(_) => {
                self.duplicates += 1;
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of rows dropped because their pair was already present.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn iter(&self) -> impl Iterator<Item = &AffiliationRecord> {
        self.records.values()
    }
}

impl FromIterator<AffiliationRecord> for AuthorAffiliationTable {
    fn from_iter<I: IntoIterator<Item = AffiliationRecord>>(iter: I) -> Self {
        let mut table = Self::new();
        for record in iter {
            table.insert(record);
        }
        table
    }
}
