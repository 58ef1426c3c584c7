//! XLSX template handling
//!
//! This module patches the NSF COA workbook in place:
//! - `package`: zip container with entry order and metadata preserved
//! - `xml`: streaming rewrite of individual parts
//! - `reference`: A1 references and row shifting
//! - `sheet` / `template`: Table 4 validation and filling

mod package;
mod reference;
mod sheet;
mod template;
mod xml;

pub use package::{Relationship, SheetEntry, XlsxPackage};
pub use reference::{CellRange, CellRef, RowShift};
pub use template::{
    CoaTemplate, FillSummary, TablePart, DEFAULT_TEMPLATE_FILENAME, NSF_TEMPLATE_URL,
};
pub use xml::find_elements;
