use crate::error::{CoaError, CoaResult};
use crate::layout::{CsvLayout, HeaderMode};
use crate::types::{ActiveDate, AffiliationRecord, AuthorAffiliationTable};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// Default name of the ADS author-affiliations export.
pub const DEFAULT_AFFILIATIONS_FILENAME: &str = "authorAffiliations.csv";

const AUTHOR_NAMES: &[&str] = &["author", "authors", "name", "author name"];
const AFFILIATION_NAMES: &[&str] = &["affiliation", "affiliations", "affil", "institution"];
const DATE_NAMES: &[&str] = &["date", "last active", "last active date", "year"];

/// Zero-based positions of the fields in each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Columns {
    author: usize,
    affiliation: usize,
    date: Option<usize>,
}

/// Parse an ADS author-affiliations export into a de-duplicated table.
///
/// # Arguments
/// * `path` - Path to the CSV export
/// * `layout` - Column layout and header handling
///
/// # Returns
/// * `Ok(AuthorAffiliationTable)` - Unique pairs in first-occurrence order
/// * `Err(CoaError::FileNotFound)` - The file does not exist
/// * `Err(CoaError::Parse)` / `Err(CoaError::Csv)` - Malformed content or
///   missing columns
///
/// # Example
/// ```no_run
/// use ads2coa::layout::CsvLayout;
/// use ads2coa::parser::parse_affiliations;
/// use std::path::Path;
///
/// let table = parse_affiliations(Path::new("authorAffiliations.csv"), &CsvLayout::default())?;
/// println!("{} co-authors", table.len());
/// # Ok::<(), ads2coa::error::CoaError>(())
/// ```
pub fn parse_affiliations(path: &Path, layout: &CsvLayout) -> CoaResult<AuthorAffiliationTable> {
    let file = File::open(path).map_err(|e| CoaError::from_open("Input CSV", path, e))?;
    debug!(path = %path.display(), "parsing author affiliations");
    parse_affiliations_from_reader(file, layout)
}

/// Same as [`parse_affiliations`] for any reader.
pub fn parse_affiliations_from_reader<R: Read>(
    reader: R,
    layout: &CsvLayout,
) -> CoaResult<AuthorAffiliationTable> {
    layout.validate()?;

    let mut csv = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .delimiter(layout.delimiter as u8)
        .from_reader(reader);

    let mut table = AuthorAffiliationTable::new();
    let mut columns: Option<Columns> = None;
    let mut first = true;

    for result in csv.records() {
        let mut record = result?;
        let line = record.position().map_or(0, |p| p.line());

        if first {
            first = false;
            strip_bom(&mut record);
            if is_header(&record, layout.header) {
                columns = Some(columns_from_header(&record)?);
                debug!(?columns, "located columns from header row");
                continue;
            }
        }

        if record.iter().all(str::is_empty) {
            continue;
        }

        let columns = *columns.get_or_insert(Columns {
            author: layout.author_column,
            affiliation: layout.affiliation_column,
            date: layout.date_column,
        });
        let parsed = parse_record(&record, columns, line)?;
        if !table.insert(parsed) {
            debug!(line, "dropped duplicate author/affiliation pair");
        }
    }

    if table.duplicates() > 0 {
        warn!(
            duplicates = table.duplicates(),
            "dropped duplicate author/affiliation pairs"
        );
    }
    debug!(rows = table.len(), "parsed author affiliations");
    Ok(table)
}

fn strip_bom(record: &mut StringRecord) {
    let Some(first) = record.get(0) else {
        return;
    };
    if let Some(stripped) = first.strip_prefix('\u{feff}') {
        let mut fields: Vec<String> = record.iter().map(str::to_string).collect();
        fields[0] = stripped.trim().to_string();
        let position = record.position().cloned();
        *record = StringRecord::from(fields);
        record.set_position(position);
    }
}

fn matches_any(field: &str, names: &[&str]) -> bool {
    let field = field.trim().to_lowercase();
    names.iter().any(|name| *name == field)
}

fn is_header(record: &StringRecord, mode: HeaderMode) -> bool {
    match mode {
        HeaderMode::Absent => false,
        HeaderMode::Present => true,
        HeaderMode::Auto => record.iter().any(|field| {
            matches_any(field, AUTHOR_NAMES)
                || matches_any(field, AFFILIATION_NAMES)
                || matches_any(field, DATE_NAMES)
        }),
    }
}

fn columns_from_header(header: &StringRecord) -> CoaResult<Columns> {
    let find = |names: &[&str]| header.iter().position(|field| matches_any(field, names));
    let author = find(AUTHOR_NAMES).ok_or_else(|| {
        CoaError::Parse(format!(
            "header has no author column (expected one of: {})",
            AUTHOR_NAMES.join(", ")
        ))
    })?;
    let affiliation = find(AFFILIATION_NAMES).ok_or_else(|| {
        CoaError::Parse(format!(
            "header has no affiliation column (expected one of: {})",
            AFFILIATION_NAMES.join(", ")
        ))
    })?;
    Ok(Columns {
        author,
        affiliation,
        date: find(DATE_NAMES),
    })
}

fn parse_record(record: &StringRecord, columns: Columns, line: u64) -> CoaResult<AffiliationRecord> {
    let author = record.get(columns.author).ok_or_else(|| {
        CoaError::Parse(format!(
            "line {line}: missing author column (field {})",
            columns.author + 1
        ))
    })?;
    let affiliation = record.get(columns.affiliation).ok_or_else(|| {
        CoaError::Parse(format!(
            "line {line}: missing affiliation column (field {})",
            columns.affiliation + 1
        ))
    })?;
    if author.is_empty() {
        return Err(CoaError::Parse(format!("line {line}: author name is empty")));
    }
    for (field, text) in [("author", author), ("affiliation", affiliation)] {
        if let Some(ch) = text.chars().find(|&c| is_forbidden_control(c)) {
            return Err(CoaError::Parse(format!(
                "line {line}: {field} contains control character U+{:04X}",
                u32::from(ch)
            )));
        }
    }

    let last_active = match columns.date.and_then(|i| record.get(i)) {
        Some(text) if !text.is_empty() => Some(
            ActiveDate::parse(text).map_err(|e| CoaError::Parse(format!("line {line}: {e}")))?,
        ),
        _ => None,
    };

    Ok(AffiliationRecord::new(author, affiliation, last_active, line))
}

/// Control characters XML 1.0 cannot carry; tab and line breaks are fine.
fn is_forbidden_control(ch: char) -> bool {
    matches!(ch, '\u{0}'..='\u{8}' | '\u{b}' | '\u{c}' | '\u{e}'..='\u{1f}')
}
