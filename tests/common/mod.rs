//! Shared fixtures: a stand-in for the NSF COA template built with
//! rust_xlsxwriter, plus helpers to read results back.

#![allow(dead_code)]

use ads2coa::excel::{find_elements, XlsxPackage};
use calamine::{open_workbook, Data, Range, Reader, Xlsx};
use rust_xlsxwriter::{Format, Table, TableColumn, Workbook};
use std::path::Path;

pub const SHEET: &str = "NSF COA Template";

/// Template with the same Table 4 geometry as the NSF workbook:
/// - `TableD` at A51:E56 with the example person in B52
/// - `TableD5` at A58:E68
/// - a merged signature line on row 70, a formula in A72 pointing at A60
/// - a note beside the table in F52
/// - a second sheet and a defined name referencing the COA sheet
pub fn write_template(path: &Path) {
    write_template_named(path, SHEET);
}

pub fn write_template_named(path: &Path, sheet_name: &str) {
    write_template_with_table(path, sheet_name, "TableD");
}

pub fn write_template_with_table(path: &Path, sheet_name: &str, table_name: &str) {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();

    let sheet = workbook.add_worksheet();
    sheet.set_name(sheet_name).unwrap();
    sheet
        .write_string_with_format(0, 0, "Collaborators and Other Affiliations", &bold)
        .unwrap();

    let headers = ["Type", "Name", "Organizational Affiliation", "Optional", "Last Active"];
    let columns: Vec<TableColumn> = headers
        .iter()
        .map(|h| TableColumn::new().set_header(*h))
        .collect();
    sheet
        .add_table(
            50,
            0,
            55,
            4,
            &Table::new().set_name(table_name).set_columns(&columns),
        )
        .unwrap();
    sheet.write_string(51, 0, "A:").unwrap();
    sheet.write_string(51, 1, "Alphaman, Lin").unwrap();
    sheet.write_string(51, 2, "Example University").unwrap();
    sheet.write_string(51, 4, "06/01/2022").unwrap();
    sheet.write_string(52, 1, "Betaman, Jin").unwrap();
    sheet.write_string(51, 5, "note").unwrap();

    sheet
        .add_table(57, 0, 67, 4, &Table::new().set_name("TableD5"))
        .unwrap();

    sheet
        .merge_range(69, 0, 69, 4, "Signature", &Format::new())
        .unwrap();
    sheet.write_formula(71, 0, "=A60").unwrap();

    let notes = workbook.add_worksheet();
    notes.set_name("Notes").unwrap();
    notes
        .write_formula(0, 0, "='NSF COA Template'!A60")
        .unwrap();
    notes
        .write_formula(1, 0, "='NSF COA Template'!B52")
        .unwrap();

    workbook
        .define_name("CoaArea", "='NSF COA Template'!$A$51:$E$68")
        .unwrap();

    workbook.save(path).unwrap();
}

pub fn write_csv(path: &Path, content: &str) {
    std::fs::write(path, content).unwrap();
}

/// Three unique co-authors plus one duplicate, as ADS exports them.
pub const ADS_CSV: &str = "\
\"Alphaman, Lin\",\"Univ. of Nowhere\",2022/06/01
\"Betaman, Jin\",\"Institute X\",2021/01/15
\"Gammaman, Kim\",\"Lab Y\",2020/03/00
\"Alphaman, Lin\",\"Univ. of Nowhere\",2019/01/01
";

/// CSV with `n` distinct authors.
pub fn numbered_csv(n: usize) -> String {
    (1..=n)
        .map(|i| format!("\"Author{i:02}, A\",\"Inst {i}\",2021/01/{:02}\n", i.min(28)))
        .collect()
}

pub fn read_sheet(path: &Path) -> Range<Data> {
    let mut workbook: Xlsx<_> = open_workbook(path).unwrap();
    workbook.worksheet_range(SHEET).unwrap()
}

/// Text of `cell` (A1 notation); empty for blank cells.
pub fn cell_text(range: &Range<Data>, cell: &str) -> String {
    let cell: ads2coa::excel::CellRef = cell.parse().unwrap();
    match range.get_value((cell.row - 1, u32::from(cell.col))) {
        Some(Data::String(s)) => s.clone(),
        Some(Data::Empty) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Row `row` of Table 4 as (type, name, affiliation, last active).
pub fn table_row(range: &Range<Data>, row: u32) -> (String, String, String, String) {
    (
        cell_text(range, &format!("A{row}")),
        cell_text(range, &format!("B{row}")),
        cell_text(range, &format!("C{row}")),
        cell_text(range, &format!("E{row}")),
    )
}

/// XML of the named worksheet.
pub fn sheet_xml(path: &Path, name: &str) -> String {
    let package = XlsxPackage::open(path).unwrap();
    let sheet = package
        .sheets()
        .unwrap()
        .into_iter()
        .find(|s| s.name == name)
        .unwrap();
    package.read_string(&sheet.path).unwrap()
}

/// (name, ref) of every table part in the package, sorted by name.
pub fn table_refs(path: &Path) -> Vec<(String, String)> {
    let package = XlsxPackage::open(path).unwrap();
    let names: Vec<String> = package
        .part_names()
        .filter(|n| n.starts_with("xl/tables/"))
        .map(str::to_string)
        .collect();
    let mut refs: Vec<(String, String)> = names
        .iter()
        .flat_map(|name| {
            let xml = package.read_string(name).unwrap();
            find_elements(&xml, "table").unwrap()
        })
        .map(|attrs| {
            let get = |key: &str| {
                attrs
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default()
            };
            (get("name"), get("ref"))
        })
        .collect();
    refs.sort();
    refs
}

pub fn workbook_xml(path: &Path) -> String {
    let package = XlsxPackage::open(path).unwrap();
    let workbook = package.workbook_path().unwrap();
    package.read_string(&workbook).unwrap()
}
