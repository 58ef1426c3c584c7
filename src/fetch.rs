//! Template download
//!
//! Fetches the NSF COA template with the system `curl` when it is missing.

use crate::error::{CoaError, CoaResult};
use crate::excel::NSF_TEMPLATE_URL;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Outcome of [`ensure_template`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateSource {
    /// The template was already on disk.
    Existing,
    /// The template was downloaded by this call.
    Downloaded,
}

/// Make sure a template exists at `path`.
///
/// When the file is missing it is downloaded from `url` if `fetch` is set;
/// otherwise the result is [`CoaError::FileNotFound`] with a hint pointing
/// at `--fetch-template`.
pub fn ensure_template(path: &Path, fetch: bool, url: &str) -> CoaResult<TemplateSource> {
    if path.exists() {
        return Ok(TemplateSource::Existing);
    }
    if !fetch {
        return Err(CoaError::FileNotFound {
            what: "Template",
            path: path.to_path_buf(),
            hint: Some(format!(
                "pass --fetch-template to download it from {NSF_TEMPLATE_URL}"
            )),
        });
    }
    download(url, path)?;
    Ok(TemplateSource::Downloaded)
}

/// Download `url` to `dest`. The file is written next to `dest` first and
/// renamed once curl succeeds.
pub fn download(url: &str, dest: &Path) -> CoaResult<()> {
    let partial = partial_path(dest);
    info!(url, dest = %dest.display(), "downloading template");

    let status = Command::new("curl")
        .arg("-fsSL")
        .arg("-o")
        .arg(&partial)
        .arg(url)
        .status()
        .map_err(|e| CoaError::Fetch(format!("could not run curl: {e}")))?;

    if !status.success() {
        let _ = fs::remove_file(&partial);
        return Err(CoaError::Fetch(format!(
            "curl exited with {status} while fetching {url}"
        )));
    }

    fs::rename(&partial, dest).map_err(|source| CoaError::Write {
        path: dest.to_path_buf(),
        source,
    })?;
    debug!(dest = %dest.display(), "template saved");
    Ok(())
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}
