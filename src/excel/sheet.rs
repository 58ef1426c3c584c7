//! Worksheet rewriting for Table 4
//!
//! [`SheetEditor`] rewrites the worksheet that holds the table: it replaces
//! the table's data rows with generated ones and moves everything below the
//! table down when rows are inserted. [`FormulaEditor`] applies the same
//! move to references from other parts (other sheets, defined names).

use crate::error::{CoaError, CoaResult};
use crate::excel::reference::{CellRange, CellRef, RowShift};
use crate::excel::xml::{local_name, Attrs, Visit, XmlChild, XmlEditor, XmlNode};
use std::collections::BTreeMap;

/// Data rows to write into the table.
#[derive(Debug, Clone)]
pub struct TableFill {
    /// First data row (1-based), directly below the header.
    pub first_row: u32,
    /// Last data row of the unmodified template.
    pub last_template_row: u32,
    pub first_col: u16,
    pub last_col: u16,
    /// One entry per output row: cell text by column. Rows past the records
    /// are empty and come out blank.
    pub rows: Vec<BTreeMap<u16, String>>,
}

impl TableFill {
    fn capacity(&self) -> u32 {
        self.last_template_row - self.first_row + 1
    }

    /// Template row whose styling output row `index` copies. The final row
    /// keeps the last template row's look; interior rows beyond the
    /// template copy the first data row.
    fn style_source(&self, index: u32, total: u32) -> u32 {
        if index + 1 == total {
            self.last_template_row
        } else if index + 1 < self.capacity() {
            self.first_row + index
        } else {
            self.first_row
        }
    }
}

pub struct SheetEditor<'a> {
    sheet: &'a str,
    shift: RowShift,
    fill: TableFill,
    filled: bool,
}

impl<'a> SheetEditor<'a> {
    pub fn new(sheet: &'a str, shift: RowShift, fill: TableFill) -> Self {
        Self {
            sheet,
            shift,
            fill,
            filled: false,
        }
    }

    /// Whether the table rows were written; false when the sheet has no
    /// `sheetData`.
    pub fn filled(&self) -> bool {
        self.filled
    }

    fn shift_formula(&self, text: &str) -> String {
        self.shift.formula(text, self.sheet, true)
    }

    /// Move a row (and its cells and formulas) according to the shift.
    fn shift_row(&self, mut row: XmlNode, number: u32) -> CoaResult<XmlNode> {
        let target = self.shift.row(number);
        row.set_attr("r", target.to_string());

        let mut next_col = 0u16;
        for cell in row.elements_mut() {
            if cell.local_name() != "c" {
                continue;
            }
            let col = cell_column(cell, next_col)?;
            next_col = col.saturating_add(1);
            cell.set_attr("r", CellRef::new(col, target).to_string());
            for formula in cell.elements_mut().filter(|n| n.local_name() == "f") {
                self.shift_formula_node(formula)?;
            }
        }
        Ok(row)
    }

    /// Shift an `sqref` list. Ranges covering the table's data rows down to
    /// the last template row are stretched over the inserted rows.
    fn grow_sqref(&self, text: &str) -> CoaResult<String> {
        let parts = text
            .split_whitespace()
            .map(|part| {
                let range: CellRange = part.parse()?;
                if range.first_row() <= self.fill.first_row {
                    grow_range(self.shift, part)
                } else {
                    Ok(self.shift.range(range).to_string())
                }
            })
            .collect::<CoaResult<Vec<_>>>()?;
        Ok(parts.join(" "))
    }

    fn in_table(&self, col: u16) -> bool {
        (self.fill.first_col..=self.fill.last_col).contains(&col)
    }

    fn shift_formula_node(&self, formula: &mut XmlNode) -> CoaResult<()> {
        if self.shift.is_noop() {
            return Ok(());
        }
        if let Some(reference) = formula.attr("ref").map(str::to_string) {
            formula.set_attr("ref", self.shift.reference(&reference)?);
        }
        let text = formula.text();
        if !text.is_empty() {
            formula.set_text(self.shift_formula(&text));
        }
        Ok(())
    }

    /// Build the table's data rows from the captured template rows.
    fn generate_rows(
        &self,
        prefix: &str,
        templates: &BTreeMap<u32, XmlNode>,
    ) -> CoaResult<Vec<XmlNode>> {
        let total = self.fill.rows.len() as u32;
        let mut rows = Vec::with_capacity(self.fill.rows.len());

        for (index, values) in self.fill.rows.iter().enumerate() {
            let index = index as u32;
            let number = self.fill.first_row + index;
            let source_number = self.fill.style_source(index, total);
            let source = templates.get(&source_number);

            let mut row = XmlNode::new(qualified(prefix, "row"));
            if let Some(source) = source {
                row.attrs = source.attrs.clone();
            }
            row.set_attr("r", number.to_string());

            let mut cells: BTreeMap<u16, XmlNode> = BTreeMap::new();
            let mut source_styles: BTreeMap<u16, String> = BTreeMap::new();
            if let Some(source) = source {
                for (col, cell) in cells_by_column(source)? {
                    if self.in_table(col) {
                        if let Some(style) = cell.attr("s") {
                            source_styles.insert(col, style.to_string());
                        }
                    }
                }
            }
            // Cells beside the table stay with their own row
            if let Some(own) = templates.get(&number) {
                for (col, cell) in cells_by_column(own)? {
                    if !self.in_table(col) {
                        let mut kept = cell.clone();
                        for formula in kept.elements_mut().filter(|n| n.local_name() == "f") {
                            self.shift_formula_node(formula)?;
                        }
                        cells.insert(col, kept);
                    }
                }
            }

            for col in self.fill.first_col..=self.fill.last_col {
                let mut cell = XmlNode::new(qualified(prefix, "c"))
                    .with_attr("r", CellRef::new(col, number).to_string());
                if let Some(style) = source_styles.get(&col) {
                    cell.set_attr("s", style.clone());
                }
                if let Some(text) = values.get(&col).filter(|t| !t.is_empty()) {
                    cell.set_attr("t", "inlineStr");
                    let mut t = XmlNode::new(qualified(prefix, "t")).with_text(text.clone());
                    if text.trim() != text {
                        t.set_attr("xml:space", "preserve");
                    }
                    cell = cell.with_child(XmlNode::new(qualified(prefix, "is")).with_child(t));
                }
                cells.insert(col, cell);
            }

            row.children = cells.into_values().map(XmlChild::Element).collect();
            rows.push(row);
        }
        Ok(rows)
    }

    fn rewrite_sheet_data(&mut self, mut sheet_data: XmlNode) -> CoaResult<XmlNode> {
        let prefix = prefix_of(&sheet_data.name).to_string();
        let mut templates: BTreeMap<u32, XmlNode> = BTreeMap::new();
        let mut rows: Vec<XmlNode> = Vec::new();
        let mut generated = false;
        let mut next_row = 1u32;

        for child in std::mem::take(&mut sheet_data.children) {
            let XmlChild::Element(row) = child else {
                continue;
            };
            if row.local_name() != "row" {
                rows.push(row);
                continue;
            }
            let number = match row.attr("r") {
                Some(r) => r.trim().parse::<u32>().map_err(|_| {
                    CoaError::TemplateStructure(format!("row number '{r}' is not valid"))
                })?,
                None => next_row,
            };
            next_row = number + 1;

            if number < self.fill.first_row {
                rows.push(self.shift_row(row, number)?);
            } else if number <= self.fill.last_template_row {
                templates.insert(number, row);
            } else {
                if !generated {
                    rows.extend(self.generate_rows(&prefix, &templates)?);
                    generated = true;
                }
                rows.push(self.shift_row(row, number)?);
            }
        }
        if !generated {
            rows.extend(self.generate_rows(&prefix, &templates)?);
        }

        sheet_data.children = rows.into_iter().map(XmlChild::Element).collect();
        self.filled = true;
        Ok(sheet_data)
    }
}

impl XmlEditor for SheetEditor<'_> {
    fn element(&mut self, name: &str, parent: Option<&str>, attrs: &mut Attrs) -> CoaResult<Visit> {
        if name == "sheetData" {
            return Ok(Visit::Capture);
        }
        if self.shift.is_noop() {
            return Ok(Visit::Keep);
        }

        match name {
            "dimension" => shift_attr(attrs, "ref", |v| grow_range(self.shift, v))?,
            "mergeCell" | "hyperlink" => shift_attr(attrs, "ref", |v| self.shift.reference(v))?,
            "autoFilter" if parent == Some("worksheet") => {
                shift_attr(attrs, "ref", |v| self.shift.reference(v))?
            }
            "conditionalFormatting" | "dataValidation" => {
                shift_attr(attrs, "sqref", |v| self.grow_sqref(v))?
            }
            "protectedRange" | "ignoredError" => {
                shift_attr(attrs, "sqref", |v| self.shift.sqref(v))?
            }
            "selection" => {
                shift_attr(attrs, "activeCell", |v| self.shift.reference(v))?;
                shift_attr(attrs, "sqref", |v| self.shift.sqref(v))?;
            }
            "pane" => shift_attr(attrs, "topLeftCell", |v| self.shift.reference(v))?,
            "brk" if parent == Some("rowBreaks") => shift_attr(attrs, "id", |v| {
                v.parse::<u32>()
                    .map(|row| self.shift.row(row).to_string())
                    .map_err(|_| CoaError::TemplateStructure(format!("bad row break '{v}'")))
            })?,
            _ => {}
        }
        Ok(Visit::Keep)
    }

    fn text(&mut self, parent: Option<&str>, text: &str) -> CoaResult<Option<String>> {
        match parent {
            Some("formula" | "formula1" | "formula2") if !self.shift.is_noop() => {
                Ok(Some(self.shift_formula(text)))
            }
            _ => Ok(None),
        }
    }

    fn captured(&mut self, node: XmlNode) -> CoaResult<Vec<XmlNode>> {
        Ok(vec![self.rewrite_sheet_data(node)?])
    }
}

/// Shifts references to `sheet` found in formulas of other parts: cell
/// formulas on other worksheets, conditional-format and validation formulas,
/// and workbook defined names.
pub struct FormulaEditor<'a> {
    pub sheet: &'a str,
    pub shift: RowShift,
}

impl XmlEditor for FormulaEditor<'_> {
    fn text(&mut self, parent: Option<&str>, text: &str) -> CoaResult<Option<String>> {
        match parent {
            Some("f" | "formula" | "formula1" | "formula2" | "definedName") => {
                let shifted = self.shift.formula(text, self.sheet, false);
                Ok((shifted != text).then_some(shifted))
            }
            _ => Ok(None),
        }
    }
}

/// Shift a range, or stretch it when it ends on the row the insertion
/// follows so that it covers the new rows.
pub(crate) fn grow_range(shift: RowShift, text: &str) -> CoaResult<String> {
    let range: CellRange = text.parse()?;
    if range.last_row() == shift.after {
        Ok(range.with_last_row(shift.after + shift.by).to_string())
    } else {
        Ok(shift.range(range).to_string())
    }
}

pub(crate) fn shift_attr<F>(attrs: &mut Attrs, key: &str, shift: F) -> CoaResult<()>
where
    F: FnOnce(&str) -> CoaResult<String>,
{
    if let Some(slot) = attrs.iter_mut().find(|(k, _)| k == key) {
        slot.1 = shift(&slot.1)?;
    }
    Ok(())
}

/// The `<c>` children of a row with their resolved columns.
fn cells_by_column(row: &XmlNode) -> CoaResult<Vec<(u16, &XmlNode)>> {
    let mut next_col = 0u16;
    let mut cells = Vec::new();
    for cell in row.elements().filter(|n| n.local_name() == "c") {
        let col = cell_column(cell, next_col)?;
        next_col = col.saturating_add(1);
        cells.push((col, cell));
    }
    Ok(cells)
}

/// Column of a `<c>` element: from its `r` attribute, or the next column
/// after the previous cell when `r` is omitted.
fn cell_column(cell: &XmlNode, next_col: u16) -> CoaResult<u16> {
    match cell.attr("r") {
        Some(r) => r
            .parse::<CellRef>()
            .map(|c| c.col)
            .map_err(|_| CoaError::TemplateStructure(format!("cell reference '{r}' is not valid"))),
        None => Ok(next_col),
    }
}

fn prefix_of(name: &str) -> &str {
    let local = local_name(name);
    &name[..name.len() - local.len()]
}

fn qualified(prefix: &str, local: &str) -> String {
    format!("{prefix}{local}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::excel::xml::rewrite;
    use pretty_assertions::assert_eq;

    const SHEET: &str = "NSF COA Template";

    fn fill(rows: &[&[(u16, &str)]], total: usize) -> TableFill {
        let mut out: Vec<BTreeMap<u16, String>> = rows
            .iter()
            .map(|r| r.iter().map(|(c, v)| (*c, v.to_string())).collect())
            .collect();
        out.resize(total, BTreeMap::new());
        TableFill {
            first_row: 2,
            last_template_row: 3,
            first_col: 0,
            last_col: 1,
            rows: out,
        }
    }

    #[test]
    fn test_style_source() {
        let f = fill(&[], 2);
        // capacity 2, no insertion: identity
        assert_eq!(f.style_source(0, 2), 2);
        assert_eq!(f.style_source(1, 2), 3);
        // four rows: interior rows copy the first data row, last keeps the last template row
        assert_eq!(f.style_source(0, 4), 2);
        assert_eq!(f.style_source(1, 4), 2);
        assert_eq!(f.style_source(2, 4), 2);
        assert_eq!(f.style_source(3, 4), 3);
    }

    #[test]
    fn test_fill_without_insertion_blanks_unused_rows() {
        let xml = concat!(
            r#"<worksheet><dimension ref="A1:B4"/><sheetData>"#,
            r#"<row r="1"><c r="A1" t="s"><v>0</v></c></row>"#,
            r#"<row r="2" ht="20"><c r="A2" s="3" t="s"><v>1</v></c><c r="B2" s="4"/><c r="C2"><v>9</v></c></row>"#,
            r#"<row r="3"><c r="A3" s="5" t="s"><v>2</v></c></row>"#,
            r#"<row r="4"><c r="A4"><f>A2</f></c></row>"#,
            r#"</sheetData></worksheet>"#
        );
        let mut editor = SheetEditor::new(SHEET, RowShift::new(3, 0), fill(&[&[(0, "A:"), (1, "Doe & Co")]], 2));
        let out = rewrite(xml, &mut editor).unwrap();
        assert!(editor.filled());
        assert_eq!(
            out,
            concat!(
                r#"<worksheet><dimension ref="A1:B4"/><sheetData>"#,
                r#"<row r="1"><c r="A1" t="s"><v>0</v></c></row>"#,
                r#"<row r="2" ht="20"><c r="A2" s="3" t="inlineStr"><is><t>A:</t></is></c><c r="B2" s="4" t="inlineStr"><is><t>Doe &amp; Co</t></is></c><c r="C2"><v>9</v></c></row>"#,
                r#"<row r="3"><c r="A3" s="5"/><c r="B3"/></row>"#,
                r#"<row r="4"><c r="A4"><f>A2</f></c></row>"#,
                r#"</sheetData></worksheet>"#
            )
        );
    }

    #[test]
    fn test_fill_with_insertion_shifts_rows_below() {
        let xml = concat!(
            r#"<worksheet><dimension ref="A1:B5"/><sheetData>"#,
            r#"<row r="2"><c r="A2" s="3"/></row>"#,
            r#"<row r="3"><c r="A3" s="5"/></row>"#,
            r#"<row r="5"><c r="A5"><f>SUM(A2:A3)+A5</f></c></row>"#,
            r#"</sheetData><mergeCells count="1"><mergeCell ref="A5:B5"/></mergeCells>"#,
            r#"<conditionalFormatting sqref="A4:B6"><cfRule type="expression"><formula>$A6&gt;0</formula></cfRule></conditionalFormatting>"#,
            r#"</worksheet>"#
        );
        let rows: &[&[(u16, &str)]] = &[&[(1, "one")], &[(1, "two")], &[(1, "three")]];
        let mut editor = SheetEditor::new(SHEET, RowShift::new(3, 1), fill(rows, 3));
        let out = rewrite(xml, &mut editor).unwrap();
        assert_eq!(
            out,
            concat!(
                r#"<worksheet><dimension ref="A1:B6"/><sheetData>"#,
                r#"<row r="2"><c r="A2" s="3"/><c r="B2" t="inlineStr"><is><t>one</t></is></c></row>"#,
                r#"<row r="3"><c r="A3" s="3"/><c r="B3" t="inlineStr"><is><t>two</t></is></c></row>"#,
                r#"<row r="4"><c r="A4" s="5"/><c r="B4" t="inlineStr"><is><t>three</t></is></c></row>"#,
                r#"<row r="6"><c r="A6"><f>SUM(A2:A3)+A6</f></c></row>"#,
                r#"</sheetData><mergeCells count="1"><mergeCell ref="A6:B6"/></mergeCells>"#,
                r#"<conditionalFormatting sqref="A5:B7"><cfRule type="expression"><formula>$A7&gt;0</formula></cfRule></conditionalFormatting>"#,
                r#"</worksheet>"#
            )
        );
    }

    #[test]
    fn test_validations_over_table_rows_grow_with_insertion() {
        let xml = concat!(
            r#"<worksheet><sheetData/>"#,
            r#"<conditionalFormatting sqref="A2:B3 D3 A5"><cfRule type="expression"><formula>A2=""</formula></cfRule></conditionalFormatting>"#,
            r#"<dataValidations count="1"><dataValidation type="list" sqref="A2:A3"><formula1>"A:,C:"</formula1></dataValidation></dataValidations>"#,
            r#"</worksheet>"#
        );
        let mut editor = SheetEditor::new(SHEET, RowShift::new(3, 2), fill(&[], 4));
        let out = rewrite(xml, &mut editor).unwrap();
        assert!(out.contains(r#"<conditionalFormatting sqref="A2:B5 D3 A7">"#), "{out}");
        assert!(out.contains(r#"<dataValidation type="list" sqref="A2:A5">"#), "{out}");
    }

    #[test]
    fn test_empty_sheet_data_still_gets_rows() {
        let xml = r#"<worksheet><sheetData/></worksheet>"#;
        let mut editor = SheetEditor::new(SHEET, RowShift::new(3, 0), fill(&[&[(0, "x")]], 2));
        let out = rewrite(xml, &mut editor).unwrap();
        assert_eq!(
            out,
            concat!(
                r#"<worksheet><sheetData>"#,
                r#"<row r="2"><c r="A2" t="inlineStr"><is><t>x</t></is></c><c r="B2"/></row>"#,
                r#"<row r="3"><c r="A3"/><c r="B3"/></row>"#,
                r#"</sheetData></worksheet>"#
            )
        );
    }

    #[test]
    fn test_formula_editor_only_touches_qualified_refs() {
        let xml = r#"<workbook><definedNames><definedName name="_xlnm.Print_Area" localSheetId="0">'NSF COA Template'!$A$1:$E$90</definedName><definedName name="other">Sheet2!$A$90</definedName></definedNames></workbook>"#;
        let mut editor = FormulaEditor {
            sheet: SHEET,
            shift: RowShift::new(56, 4),
        };
        let out = rewrite(xml, &mut editor).unwrap();
        assert!(out.contains("'NSF COA Template'!$A$1:$E$94"), "{out}");
        assert!(out.contains("Sheet2!$A$90"));
    }

    #[test]
    fn test_prefixed_names_are_preserved() {
        assert_eq!(prefix_of("x:sheetData"), "x:");
        assert_eq!(prefix_of("sheetData"), "");
        assert_eq!(qualified("x:", "row"), "x:row");
    }
}
