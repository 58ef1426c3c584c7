//! The conversion pipeline: CSV in, filled COA workbook out.

use crate::error::{CoaError, CoaResult};
use crate::excel::{CellRange, CoaTemplate, NSF_TEMPLATE_URL};
use crate::fetch::{self, TemplateSource};
use crate::layout::Layout;
use crate::parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Output file name used when no surname is given.
pub const DEFAULT_OUTPUT_FILENAME: &str = "lastname_coa.xlsx";

/// Inputs of one conversion run.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub affiliations: PathBuf,
    pub template: PathBuf,
    pub output: PathBuf,
    pub layout: Layout,
    /// Download the template when it is missing.
    pub fetch_template: bool,
    /// Validate everything but write nothing.
    pub dry_run: bool,
}

/// What a conversion run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertReport {
    pub rows_written: usize,
    pub duplicates_dropped: usize,
    pub rows_inserted: u32,
    pub table_range: CellRange,
    pub template_source: TemplateSource,
    /// `None` for a dry run.
    pub output: Option<PathBuf>,
}

/// Run the whole pipeline.
///
/// Nothing is written unless every step succeeds; the output appears
/// atomically under its final name.
///
/// # Example
/// ```no_run
/// use ads2coa::converter::{convert, default_output_name, ConvertOptions};
/// use ads2coa::layout::Layout;
/// use std::path::PathBuf;
///
/// let report = convert(&ConvertOptions {
///     affiliations: PathBuf::from("authorAffiliations.csv"),
///     template: PathBuf::from("coa_template.xlsx"),
///     output: default_output_name(Some("Doe")),
///     layout: Layout::default(),
///     fetch_template: false,
///     dry_run: false,
/// })?;
/// println!("{} rows written", report.rows_written);
/// # Ok::<(), ads2coa::error::CoaError>(())
/// ```
pub fn convert(options: &ConvertOptions) -> CoaResult<ConvertReport> {
    options.layout.validate()?;

    let records = parser::parse_affiliations(&options.affiliations, &options.layout.csv)?;
    info!(
        rows = records.len(),
        duplicates = records.duplicates(),
        "read author affiliations"
    );

    let template_source =
        fetch::ensure_template(&options.template, options.fetch_template, NSF_TEMPLATE_URL)?;
    let mut template = CoaTemplate::open(&options.template, &options.layout.template)?;
    let summary = template.write_table4(&records)?;
    let bytes = template.to_bytes()?;

    let output = if options.dry_run {
        debug!(bytes = bytes.len(), "dry run, output not written");
        None
    } else {
        write_atomically(&options.output, &bytes)?;
        info!(path = %options.output.display(), "wrote COA workbook");
        Some(options.output.clone())
    };

    Ok(ConvertReport {
        rows_written: summary.rows_written,
        duplicates_dropped: records.duplicates(),
        rows_inserted: summary.rows_inserted,
        table_range: summary.range,
        template_source,
        output,
    })
}

/// `<surname>_coa.xlsx` with the surname lower-cased and spaces replaced by
/// underscores, or [`DEFAULT_OUTPUT_FILENAME`].
pub fn default_output_name(surname: Option<&str>) -> PathBuf {
    let stem = surname
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join("_").to_lowercase())
        .filter(|s| !s.is_empty());
    match stem {
        Some(stem) => PathBuf::from(format!("{stem}_coa.xlsx")),
        None => PathBuf::from(DEFAULT_OUTPUT_FILENAME),
    }
}

/// Write to a hidden sibling and rename it over `path`.
fn write_atomically(path: &Path, bytes: &[u8]) -> CoaResult<()> {
    let write_error = |source| CoaError::Write {
        path: path.to_path_buf(),
        source,
    };

    let file_name = path
        .file_name()
        .ok_or_else(|| CoaError::Config(format!("output path '{}' has no file name", path.display())))?;
    let mut temp_name = std::ffi::OsString::from(".");
    temp_name.push(file_name);
    temp_name.push(".tmp");
    let temp = path.with_file_name(temp_name);

    fs::write(&temp, bytes).map_err(write_error)?;
    if let Err(e) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(write_error(e));
    }
    Ok(())
}
