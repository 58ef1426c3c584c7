//! Layout configuration
//!
//! The ADS column schema and the location of Table 4 in the NSF template are
//! external, versioned artifacts. Both are described here with built-in
//! defaults that match the current exports and template; a YAML file can
//! override any part of it.

use crate::error::{CoaError, CoaResult};
use crate::excel::{CellRange, CellRef};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Sheet holding Table 4 in the NSF template.
pub const DEFAULT_SHEET: &str = "NSF COA Template";
/// Table part name of Table 4.
pub const DEFAULT_TABLE: &str = "TableD";
/// Header row plus the five template data rows.
pub const DEFAULT_TABLE_RANGE: &str = "A51:E56";
/// Example person the unaltered template carries in Table 4.
pub const DEFAULT_SENTINEL_CELL: &str = "B52";
pub const DEFAULT_SENTINEL_VALUE: &str = "Alphaman, Lin";
/// Table 4 row type for co-authors.
pub const DEFAULT_KIND_MARKER: &str = "A:";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Layout {
    pub csv: CsvLayout,
    pub template: TemplateLayout,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderMode {
    /// Treat the first record as a header when it names a known column.
    #[default]
    Auto,
    Present,
    Absent,
}

/// Column layout of the ADS author-affiliations export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CsvLayout {
    pub header: HeaderMode,
    pub delimiter: char,
    /// Zero-based column positions used when the file has no header.
    pub author_column: usize,
    pub affiliation_column: usize,
    pub date_column: Option<usize>,
}

impl Default for CsvLayout {
    fn default() -> Self {
        Self {
            header: HeaderMode::Auto,
            delimiter: ',',
            author_column: 0,
            affiliation_column: 1,
            date_column: Some(2),
        }
    }
}

/// A cell that must hold a known value for the template to be accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Sentinel {
    pub cell: String,
    pub value: String,
}

/// Which table column receives which field. Columns are letters; unmapped
/// table columns are left blank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RowColumns {
    pub kind: Option<String>,
    pub author: String,
    pub affiliation: String,
    pub last_active: Option<String>,
}

impl Default for RowColumns {
    fn default() -> Self {
        Self {
            kind: Some("A".to_string()),
            author: "B".to_string(),
            affiliation: "C".to_string(),
            last_active: Some("E".to_string()),
        }
    }
}

/// Location and shape of Table 4 in the template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TemplateLayout {
    pub sheet: String,
    pub table: String,
    /// Expected range of the table, header row included.
    pub table_range: String,
    pub sentinel: Option<Sentinel>,
    pub kind_marker: String,
    pub columns: RowColumns,
}

impl Default for TemplateLayout {
    fn default() -> Self {
        Self {
            sheet: DEFAULT_SHEET.to_string(),
            table: DEFAULT_TABLE.to_string(),
            table_range: DEFAULT_TABLE_RANGE.to_string(),
            sentinel: Some(Sentinel {
                cell: DEFAULT_SENTINEL_CELL.to_string(),
                value: DEFAULT_SENTINEL_VALUE.to_string(),
            }),
            kind_marker: DEFAULT_KIND_MARKER.to_string(),
            columns: RowColumns::default(),
        }
    }
}

/// Table columns resolved to zero-based indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    pub kind: Option<u16>,
    pub author: u16,
    pub affiliation: u16,
    pub last_active: Option<u16>,
}

impl TemplateLayout {
    /// Parsed table range; it must have a header row and at least one data row.
    pub fn range(&self) -> CoaResult<CellRange> {
        let range: CellRange = self
            .table_range
            .parse()
            .map_err(|e| CoaError::Config(format!("table_range: {e}")))?;
        if range.height() < 2 {
            return Err(CoaError::Config(format!(
                "table_range {} needs a header row and at least one data row",
                self.table_range
            )));
        }
        Ok(range)
    }

    pub fn sentinel_cell(&self) -> CoaResult<Option<(CellRef, &str)>> {
        self.sentinel
            .as_ref()
            .map(|s| {
                s.cell
                    .parse::<CellRef>()
                    .map(|cell| (cell, s.value.as_str()))
                    .map_err(|e| CoaError::Config(format!("sentinel.cell: {e}")))
            })
            .transpose()
    }

    /// Resolve the column letters and check they are distinct and inside
    /// the table range.
    pub fn column_map(&self) -> CoaResult<ColumnMap> {
        let range = self.range()?;
        let mut seen = HashSet::new();
        let mut resolve = |field: &str, letters: &str| -> CoaResult<u16> {
            let col = format!("{letters}1")
                .parse::<CellRef>()
                .map_err(|_| {
                    CoaError::Config(format!("columns.{field}: '{letters}' is not a column"))
                })?
                .col;
            if !range.contains_col(col) {
                return Err(CoaError::Config(format!(
                    "columns.{field}: column {letters} is outside table range {}",
                    self.table_range
                )));
            }
            if !seen.insert(col) {
                return Err(CoaError::Config(format!(
                    "columns.{field}: column {letters} is mapped twice"
                )));
            }
            Ok(col)
        };

        let kind = self
            .columns
            .kind
            .as_deref()
            .map(|c| resolve("kind", c))
            .transpose()?;
        let author = resolve("author", &self.columns.author)?;
        let affiliation = resolve("affiliation", &self.columns.affiliation)?;
        let last_active = self
            .columns
            .last_active
            .as_deref()
            .map(|c| resolve("last_active", c))
            .transpose()?;

        Ok(ColumnMap {
            kind,
            author,
            affiliation,
            last_active,
        })
    }
}

impl CsvLayout {
    pub fn validate(&self) -> CoaResult<()> {
        if !self.delimiter.is_ascii() {
            return Err(CoaError::Config(format!(
                "csv.delimiter '{}' must be a single ASCII character",
                self.delimiter
            )));
        }
        if self.author_column == self.affiliation_column
            || Some(self.author_column) == self.date_column
            || Some(self.affiliation_column) == self.date_column
        {
            return Err(CoaError::Config(
                "csv columns must be distinct".to_string(),
            ));
        }
        Ok(())
    }
}

impl Layout {
    /// Load a layout override from YAML. Missing keys keep their defaults.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> CoaResult<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| CoaError::from_open("Layout file", path, e))?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> CoaResult<Self> {
        let layout: Layout = serde_yaml::from_str(yaml)
            .map_err(|e| CoaError::Config(format!("invalid layout YAML: {e}")))?;
        layout.validate()?;
        Ok(layout)
    }

    pub fn to_yaml(&self) -> CoaResult<String> {
        serde_yaml::to_string(self).map_err(|e| CoaError::Config(e.to_string()))
    }

    pub fn validate(&self) -> CoaResult<()> {
        self.csv.validate()?;
        self.template.column_map()?;
        self.template.sentinel_cell()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_layout_is_valid() {
        let layout = Layout::default();
        layout.validate().unwrap();
        let map = layout.template.column_map().unwrap();
        assert_eq!(
            map,
            ColumnMap {
                kind: Some(0),
                author: 1,
                affiliation: 2,
                last_active: Some(4),
            }
        );
    }

    #[test]
    fn test_yaml_override_keeps_defaults() {
        let layout = Layout::from_yaml_str(
            r#"
template:
  table_range: "A60:E70"
  sentinel: ~
csv:
  header: present
"#,
        )
        .unwrap();
        assert_eq!(layout.template.table_range, "A60:E70");
        assert_eq!(layout.template.sentinel, None);
        assert_eq!(layout.template.sheet, DEFAULT_SHEET);
        assert_eq!(layout.csv.header, HeaderMode::Present);
        assert_eq!(layout.csv.affiliation_column, 1);
    }

    #[test]
    fn test_yaml_round_trip() {
        let layout = Layout::default();
        let yaml = layout.to_yaml().unwrap();
        assert_eq!(Layout::from_yaml_str(&yaml).unwrap(), layout);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = Layout::from_yaml_str("template:\n  anchor: B52\n").unwrap_err();
        assert!(matches!(err, CoaError::Config(_)));
    }

    #[test]
    fn test_column_outside_table_rejected() {
        let mut layout = Layout::default();
        layout.template.columns.author = "F".to_string();
        let err = layout.validate().unwrap_err();
        assert!(err.to_string().contains("outside table range"));
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let mut layout = Layout::default();
        layout.template.columns.affiliation = "B".to_string();
        assert!(layout.validate().is_err());
    }

    #[test]
    fn test_single_row_table_rejected() {
        let mut layout = Layout::default();
        layout.template.table_range = "A51:E51".to_string();
        assert!(matches!(layout.validate(), Err(CoaError::Config(_))));
    }

    #[test]
    fn test_csv_columns_must_differ() {
        let mut layout = Layout::default();
        layout.csv.date_column = Some(0);
        assert!(layout.validate().is_err());
    }
}
