//! The NSF COA template
//!
//! [`CoaTemplate`] checks that a workbook is the expected template and writes
//! the author/affiliation table into Table 4. Only the parts that have to
//! change are rewritten; every other part of the package is carried over as
//! it was read.

use crate::error::{CoaError, CoaResult};
use crate::excel::package::{SheetEntry, XlsxPackage};
use crate::excel::reference::{CellRange, RowShift};
use crate::excel::sheet::{grow_range, shift_attr, FormulaEditor, SheetEditor, TableFill};
use crate::excel::xml::{self, attr, Attrs, Visit, XmlEditor};
use crate::layout::{ColumnMap, TemplateLayout};
use crate::types::AuthorAffiliationTable;
use calamine::{Data, Reader, Xlsx};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info, warn};

/// Default file name of the NSF COA template.
pub const DEFAULT_TEMPLATE_FILENAME: &str = "coa_template.xlsx";

/// Where NSF publishes the COA template.
pub const NSF_TEMPLATE_URL: &str = "https://www.nsf.gov/bfa/dias/policy/coa/coa_template.xlsx";

/// A table part attached to the Table 4 worksheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePart {
    pub path: String,
    pub name: String,
    pub range: CellRange,
}

/// Outcome of [`CoaTemplate::write_table4`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillSummary {
    /// Records written into the table.
    pub rows_written: usize,
    /// Worksheet rows inserted below the template's data rows.
    pub rows_inserted: u32,
    /// Table range after writing, header row included.
    pub range: CellRange,
}

/// A validated NSF COA template held in memory.
#[derive(Debug, Clone)]
pub struct CoaTemplate {
    package: XlsxPackage,
    layout: TemplateLayout,
    columns: ColumnMap,
    sheet: SheetEntry,
    table: TablePart,
    tables: Vec<TablePart>,
}

impl CoaTemplate {
    /// Open and validate the template at `path`.
    ///
    /// # Arguments
    /// * `path` - Path to the `.xlsx` template
    /// * `layout` - Where Table 4 is expected
    ///
    /// # Returns
    /// * `Ok(CoaTemplate)` - The template passed every structural check
    /// * `Err(CoaError::FileNotFound)` - No file at `path`
    /// * `Err(CoaError::TemplateStructure)` - Sheet, sentinel or table mismatch
    pub fn open<P: AsRef<Path>>(path: P, layout: &TemplateLayout) -> CoaResult<Self> {
        let package = XlsxPackage::open(path)?;
        Self::from_package(package, layout)
    }

    pub fn from_package(package: XlsxPackage, layout: &TemplateLayout) -> CoaResult<Self> {
        let expected = layout.range()?;
        let columns = layout.column_map()?;

        check_sheet_and_sentinel(&package, layout)?;

        let sheet = package
            .sheets()?
            .into_iter()
            .find(|s| s.name == layout.sheet)
            .ok_or_else(|| {
                CoaError::TemplateStructure(format!(
                    "worksheet '{}' has no part in the package",
                    layout.sheet
                ))
            })?;

        let tables = sheet_tables(&package, &sheet)?;
        let table = tables
            .iter()
            .find(|t| t.name == layout.table)
            .cloned()
            .ok_or_else(|| {
                CoaError::TemplateStructure(format!(
                    "table '{}' not found on worksheet '{}'",
                    layout.table, layout.sheet
                ))
            })?;

        if !same_area(table.range, expected) {
            return Err(CoaError::TemplateStructure(format!(
                "table '{}' spans {} but {} was expected",
                table.name, table.range, expected
            )));
        }

        debug!(
            sheet = %sheet.path,
            table = %table.path,
            range = %table.range,
            "template structure verified"
        );

        Ok(Self {
            package,
            layout: layout.clone(),
            columns,
            sheet,
            table,
            tables,
        })
    }

    /// Number of data rows the unmodified table holds.
    pub fn capacity(&self) -> u32 {
        self.table.range.height() - 1
    }

    pub fn table_range(&self) -> CellRange {
        self.table.range
    }

    /// Write `records` into Table 4, inserting rows when they outnumber the
    /// template's data rows. Rows the records do not use are blanked.
    pub fn write_table4(&mut self, records: &AuthorAffiliationTable) -> CoaResult<FillSummary> {
        let range = self.table.range;
        let capacity = self.capacity();
        let wanted = u32::try_from(records.len())
            .map_err(|_| CoaError::TemplateStructure("too many records".to_string()))?;
        let total = wanted.max(capacity);
        let extra = total - capacity;
        let shift = RowShift::new(range.last_row(), extra);

        let mut rows: Vec<BTreeMap<u16, String>> = records
            .iter()
            .map(|record| {
                let mut row = BTreeMap::new();
                if let Some(col) = self.columns.kind {
                    row.insert(col, self.layout.kind_marker.clone());
                }
                row.insert(self.columns.author, record.author().to_string());
                row.insert(self.columns.affiliation, record.affiliation().to_string());
                if let (Some(col), Some(date)) = (self.columns.last_active, record.last_active()) {
                    row.insert(col, date.to_template_string());
                }
                row
            })
            .collect();
        rows.resize(total as usize, BTreeMap::new());

        let fill = TableFill {
            first_row: range.first_row() + 1,
            last_template_row: range.last_row(),
            first_col: range.first_col(),
            last_col: range.last_col(),
            rows,
        };

        let sheet_xml = self.package.read_string(&self.sheet.path)?;
        let mut editor = SheetEditor::new(&self.sheet.name, shift, fill);
        let patched = xml::rewrite(&sheet_xml, &mut editor)?;
        if !editor.filled() {
            return Err(CoaError::TemplateStructure(format!(
                "worksheet '{}' has no cell data",
                self.sheet.name
            )));
        }
        self.package.replace(&self.sheet.path, patched)?;

        if extra > 0 {
            self.shift_dependents(shift)?;
            drop_calc_chain(&mut self.package)?;
            info!(rows = extra, after = range.last_row(), "inserted rows into Table 4");
        }

        let new_range = range.with_last_row(range.last_row() + extra);
        self.table.range = new_range;
        debug!(rows = records.len(), range = %new_range, "filled Table 4");

        Ok(FillSummary {
            rows_written: records.len(),
            rows_inserted: extra,
            range: new_range,
        })
    }

    /// Move references that depend on rows below the insertion point:
    /// table parts on the sheet, formulas on other sheets, defined names.
    fn shift_dependents(&mut self, shift: RowShift) -> CoaResult<()> {
        for table in &mut self.tables {
            let xml = self.package.read_string(&table.path)?;
            let patched = xml::rewrite(&xml, &mut TableEditor { shift })?;
            self.package.replace(&table.path, patched)?;
            table.range = grow_range(shift, &table.range.to_string())?.parse()?;
        }

        let mut formulas = FormulaEditor {
            sheet: &self.sheet.name,
            shift,
        };
        for sheet in self.package.sheets()? {
            if sheet.path == self.sheet.path {
                continue;
            }
            let xml = self.package.read_string(&sheet.path)?;
            let patched = xml::rewrite(&xml, &mut formulas)?;
            if patched != xml {
                debug!(sheet = %sheet.name, "shifted references on other worksheet");
                self.package.replace(&sheet.path, patched)?;
            }
        }

        let workbook = self.package.workbook_path()?;
        let xml = self.package.read_string(&workbook)?;
        let patched = xml::rewrite(&xml, &mut formulas)?;
        if patched != xml {
            self.package.replace(&workbook, patched)?;
        }
        Ok(())
    }

    /// Serialize the (possibly modified) package.
    pub fn to_bytes(&self) -> CoaResult<Vec<u8>> {
        self.package.to_bytes()
    }
}

fn check_sheet_and_sentinel(package: &XlsxPackage, layout: &TemplateLayout) -> CoaResult<()> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(package.source()))
        .map_err(|e| CoaError::TemplateStructure(format!("cannot read template: {e}")))?;

    let names = workbook.sheet_names();
    if !names.iter().any(|n| *n == layout.sheet) {
        return Err(CoaError::TemplateStructure(format!(
            "worksheet '{}' not found (sheets: {})",
            layout.sheet,
            names.join(", ")
        )));
    }

    let Some((cell, value)) = layout.sentinel_cell()? else {
        return Ok(());
    };
    let range = workbook
        .worksheet_range(&layout.sheet)
        .map_err(|e| CoaError::TemplateStructure(format!("cannot read '{}': {e}", layout.sheet)))?;

    match range.get_value((cell.row - 1, u32::from(cell.col))) {
        Some(Data::String(s)) if s.trim() == value => Ok(()),
        found => Err(CoaError::TemplateStructure(format!(
            "expected '{value}' in {cell}, found {}; is this the unaltered NSF template?",
            describe(found)
        ))),
    }
}

fn describe(value: Option<&Data>) -> String {
    match value {
        None | Some(Data::Empty) => "an empty cell".to_string(),
        Some(Data::String(s)) => format!("'{s}'"),
        Some(other) => format!("'{other}'"),
    }
}

/// Table parts related to `sheet`.
fn sheet_tables(package: &XlsxPackage, sheet: &SheetEntry) -> CoaResult<Vec<TablePart>> {
    let mut tables = Vec::new();
    for rel in package.relationships(&sheet.path)? {
        if !rel.is("table") {
            continue;
        }
        let xml = package.read_string(&rel.target)?;
        let Some(attrs) = xml::find_elements(&xml, "table")?.into_iter().next() else {
            continue;
        };
        let name = attr(&attrs, "displayName")
            .or_else(|| attr(&attrs, "name"))
            .unwrap_or_default()
            .to_string();
        let range = attr(&attrs, "ref")
            .ok_or_else(|| {
                CoaError::TemplateStructure(format!("table part '{}' has no range", rel.target))
            })?
            .parse()?;
        tables.push(TablePart {
            path: rel.target,
            name,
            range,
        });
    }
    Ok(tables)
}

fn same_area(a: CellRange, b: CellRange) -> bool {
    a.first_row() == b.first_row()
        && a.last_row() == b.last_row()
        && a.first_col() == b.first_col()
        && a.last_col() == b.last_col()
}

/// The calculation chain lists formula cells by address; after an insertion
/// it is stale, so it is dropped and the application rebuilds it.
fn drop_calc_chain(package: &mut XlsxPackage) -> CoaResult<()> {
    let workbook = package.workbook_path()?;
    let chain = package
        .relationships(&workbook)?
        .into_iter()
        .find(|rel| rel.is("calcChain"));
    if let Some(rel) = chain {
        package.remove_part(&workbook, &rel.target)?;
        warn!(part = %rel.target, "removed stale calculation chain");
    }
    Ok(())
}

/// Grows the table that ends on the insertion row and shifts tables below it.
struct TableEditor {
    shift: RowShift,
}

impl XmlEditor for TableEditor {
    fn element(&mut self, name: &str, _: Option<&str>, attrs: &mut Attrs) -> CoaResult<Visit> {
        if matches!(name, "table" | "autoFilter" | "sortState" | "sortCondition") {
            shift_attr(attrs, "ref", |v| grow_range(self.shift, v))?;
        }
        Ok(Visit::Keep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;
    use crate::types::AffiliationRecord;
    use pretty_assertions::assert_eq;
    use rust_xlsxwriter::{Table, Workbook};

    fn template_bytes(sheet: &str, sentinel: &str) -> Vec<u8> {
        template_bytes_with_table(sheet, sentinel, "TableD")
    }

    fn template_bytes_with_table(sheet: &str, sentinel: &str, table: &str) -> Vec<u8> {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(sheet).unwrap();
        worksheet.write_string(0, 0, "Header").unwrap();
        worksheet.write_string(51, 1, sentinel).unwrap();
        worksheet
            .add_table(50, 0, 55, 4, &Table::new().set_name(table))
            .unwrap();
        worksheet
            .add_table(57, 0, 67, 4, &Table::new().set_name("TableD5"))
            .unwrap();
        workbook.save_to_buffer().unwrap()
    }

    fn open(bytes: Vec<u8>) -> CoaResult<CoaTemplate> {
        let package = XlsxPackage::from_bytes(bytes)?;
        CoaTemplate::from_package(package, &Layout::default().template)
    }

    fn records(n: usize) -> AuthorAffiliationTable {
        (0..n)
            .map(|i| AffiliationRecord::new(&format!("Author {i}"), "Inst", None, i as u64 + 1))
            .collect()
    }

    #[test]
    fn test_open_default_template() {
        let template = open(template_bytes("NSF COA Template", "Alphaman, Lin")).unwrap();
        assert_eq!(template.capacity(), 5);
        assert_eq!(template.table_range().to_string(), "A51:E56");
    }

    #[test]
    fn test_wrong_sheet_rejected() {
        let err = open(template_bytes("Sheet1", "Alphaman, Lin")).unwrap_err();
        assert!(matches!(err, CoaError::TemplateStructure(_)));
        assert!(err.to_string().contains("NSF COA Template"));
    }

    #[test]
    fn test_sentinel_mismatch_rejected() {
        let err = open(template_bytes("NSF COA Template", "Someone Else")).unwrap_err();
        assert!(err.to_string().contains("Alphaman, Lin"), "{err}");
    }

    #[test]
    fn test_missing_table_rejected() {
        let bytes = template_bytes_with_table("NSF COA Template", "Alphaman, Lin", "Collaborators");
        let err = open(bytes).unwrap_err();
        assert!(matches!(err, CoaError::TemplateStructure(_)), "{err}");
        assert!(err.to_string().contains("'TableD'"), "{err}");
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_table_range_mismatch_rejected() {
        let mut layout = Layout::default().template;
        layout.table_range = "A51:E60".to_string();
        let package =
            XlsxPackage::from_bytes(template_bytes("NSF COA Template", "Alphaman, Lin")).unwrap();
        let err = CoaTemplate::from_package(package, &layout).unwrap_err();
        assert!(err.to_string().contains("A51:E56"), "{err}");
    }

    #[test]
    fn test_write_within_capacity_keeps_range() {
        let mut template = open(template_bytes("NSF COA Template", "Alphaman, Lin")).unwrap();
        let summary = template.write_table4(&records(3)).unwrap();
        assert_eq!(summary.rows_written, 3);
        assert_eq!(summary.rows_inserted, 0);
        assert_eq!(summary.range.to_string(), "A51:E56");
    }

    #[test]
    fn test_write_beyond_capacity_grows_and_shifts_tables() {
        let mut template = open(template_bytes("NSF COA Template", "Alphaman, Lin")).unwrap();
        let summary = template.write_table4(&records(8)).unwrap();
        assert_eq!(summary.rows_inserted, 3);
        assert_eq!(summary.range.to_string(), "A51:E59");

        let ranges: Vec<(String, String)> = template
            .tables
            .iter()
            .map(|t| (t.name.clone(), t.range.to_string()))
            .collect();
        assert!(ranges.contains(&("TableD".to_string(), "A51:E59".to_string())));
        assert!(ranges.contains(&("TableD5".to_string(), "A61:E71".to_string())));

        let reopened = open(template.to_bytes().unwrap());
        // The sentinel row now holds the first record
        assert!(matches!(reopened, Err(CoaError::TemplateStructure(_))));
    }
}
