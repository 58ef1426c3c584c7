use std::path::PathBuf;
use thiserror::Error;

pub type CoaResult<T> = Result<T, CoaError>;

#[derive(Error, Debug)]
pub enum CoaError {
    #[error("{what} not found: {}{}", .path.display(), hint_suffix(.hint))]
    FileNotFound {
        what: &'static str,
        path: PathBuf,
        hint: Option<String>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Template structure error: {0}")]
    TemplateStructure(String),

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Layout configuration error: {0}")]
    Config(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("XLSX package error: {0}")]
    Zip(String),

    #[error("Template download failed: {0}")]
    Fetch(String),
}

fn hint_suffix(hint: &Option<String>) -> String {
    hint.as_deref().map(|h| format!(" ({h})")).unwrap_or_default()
}

impl CoaError {
    /// Process exit code reported for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CoaError::FileNotFound { .. } => 2,
            CoaError::Csv(_) | CoaError::Parse(_) => 3,
            CoaError::TemplateStructure(_) => 4,
            CoaError::Write { .. } => 5,
            CoaError::Config(_) => 6,
            CoaError::Io(_) | CoaError::Xml(_) | CoaError::Zip(_) | CoaError::Fetch(_) => 1,
        }
    }

    /// Missing-file error for `path`, or a plain IO error when it exists but
    /// could not be read.
    pub fn from_open(what: &'static str, path: &std::path::Path, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            CoaError::FileNotFound {
                what,
                path: path.to_path_buf(),
                hint: None,
            }
        } else {
            CoaError::Io(err)
        }
    }
}

impl From<quick_xml::Error> for CoaError {
    fn from(err: quick_xml::Error) -> Self {
        CoaError::Xml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for CoaError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        CoaError::Xml(err.to_string())
    }
}

impl From<zip::result::ZipError> for CoaError {
    fn from(err: zip::result::ZipError) -> Self {
        CoaError::Zip(err.to_string())
    }
}
