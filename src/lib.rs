//! ads2coa - NSF COA Table 4 from ADS author affiliations
//!
//! This library reads the author-affiliations CSV exported from the
//! Astrophysics Data System and writes the unique co-author/affiliation
//! pairs into Table 4 of the NSF Collaborators & Other Affiliations
//! spreadsheet template.
//!
//! # Features
//!
//! - Header detection and configurable column layout for the CSV
//! - Order-preserving de-duplication of author/affiliation pairs
//! - Structural checks on the template before anything is written
//! - Row insertion when Table 4 overflows, with merged ranges, formulas,
//!   tables and defined names below it moved accordingly
//! - Byte-stable output: untouched package parts are carried over as-is
//!
//! # Example
//!
//! ```no_run
//! use ads2coa::excel::CoaTemplate;
//! use ads2coa::layout::Layout;
//! use ads2coa::parser::parse_affiliations;
//! use std::path::Path;
//!
//! let layout = Layout::default();
//! let records = parse_affiliations(Path::new("authorAffiliations.csv"), &layout.csv)?;
//!
//! let mut template = CoaTemplate::open("coa_template.xlsx", &layout.template)?;
//! let summary = template.write_table4(&records)?;
//! std::fs::write("doe_coa.xlsx", template.to_bytes()?)?;
//!
//! println!("Rows written: {}", summary.rows_written);
//! # Ok::<(), ads2coa::error::CoaError>(())
//! ```

pub mod cli;
pub mod converter;
pub mod error;
pub mod excel;
pub mod fetch;
pub mod layout;
pub mod parser;
pub mod types;

// Re-export commonly used types
pub use error::{CoaError, CoaResult};
pub use types::{ActiveDate, AffiliationRecord, AuthorAffiliationTable};
