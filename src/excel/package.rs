//! XLSX package access
//!
//! An `.xlsx` file is a zip archive of XML parts. [`XlsxPackage`] holds every
//! entry in memory so parts can be patched and the archive written back with
//! the original entry order, compression and timestamps.

use crate::error::{CoaError, CoaResult};
use crate::excel::xml::{self, attr, Attrs, Visit, XmlEditor};
use std::io::{Cursor, Read, Write};
use std::path::Path;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

const OFFICE_DOCUMENT_REL: &str = "/officeDocument";

/// One archive member.
#[derive(Debug, Clone)]
struct Entry {
    name: String,
    data: Vec<u8>,
    compression: CompressionMethod,
    modified: Option<DateTime>,
    unix_mode: Option<u32>,
    is_dir: bool,
}

/// A relationship from a `.rels` part, with its target resolved to a package path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub kind: String,
    pub target: String,
}

impl Relationship {
    /// True when the relationship type ends with `/suffix` (e.g. `table`).
    pub fn is(&self, suffix: &str) -> bool {
        self.kind
            .rsplit('/')
            .next()
            .is_some_and(|last| last == suffix.trim_start_matches('/'))
    }
}

/// A worksheet as listed in the workbook part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetEntry {
    pub name: String,
    pub path: String,
}

/// An in-memory XLSX package.
#[derive(Debug, Clone)]
pub struct XlsxPackage {
    source: Vec<u8>,
    entries: Vec<Entry>,
}

impl XlsxPackage {
    /// Load the package at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> CoaResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| CoaError::from_open("Template", path, e))?;
        debug!(path = %path.display(), bytes = bytes.len(), "loaded template package");
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> CoaResult<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice()))
            .map_err(|e| CoaError::TemplateStructure(format!("not an XLSX package: {e}")))?;

        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut file = archive.by_index(index)?;
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)?;
            entries.push(Entry {
                name: file.name().to_string(),
                data,
                compression: file.compression(),
                modified: file.last_modified(),
                unix_mode: file.unix_mode(),
                is_dir: file.is_dir(),
            });
        }
        drop(archive);

        Ok(Self {
            source: bytes,
            entries,
        })
    }

    /// The bytes the package was loaded from, unmodified.
    pub fn source(&self) -> &[u8] {
        &self.source
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    pub fn part_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter(|e| !e.is_dir).map(|e| e.name.as_str())
    }

    fn entry(&self, name: &str) -> Option<&Entry> {
        let name = name.trim_start_matches('/');
        self.entries.iter().find(|e| e.name == name)
    }

    /// Read a part as UTF-8 text.
    pub fn read_string(&self, name: &str) -> CoaResult<String> {
        let entry = self.entry(name).ok_or_else(|| {
            CoaError::TemplateStructure(format!("package part '{name}' is missing"))
        })?;
        String::from_utf8(entry.data.clone())
            .map_err(|e| CoaError::Xml(format!("part '{name}' is not UTF-8: {e}")))
    }

    /// Replace the contents of an existing part.
    pub fn replace(&mut self, name: &str, data: impl Into<Vec<u8>>) -> CoaResult<()> {
        let name = name.trim_start_matches('/');
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| CoaError::Zip(format!("cannot replace missing part '{name}'")))?;
        entry.data = data.into();
        Ok(())
    }

    /// Remove a part; returns whether it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let name = name.trim_start_matches('/');
        let before = self.entries.len();
        self.entries.retain(|e| e.name != name);
        before != self.entries.len()
    }

    /// Serialize the package.
    pub fn to_bytes(&self) -> CoaResult<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(self.source.len())));

        for entry in &self.entries {
            let mut options = SimpleFileOptions::default()
                .compression_method(entry.compression)
                .last_modified_time(entry.modified.unwrap_or_default());
            if let Some(mode) = entry.unix_mode {
                options = options.unix_permissions(mode);
            }

            if entry.is_dir {
                writer.add_directory(entry.name.as_str(), options)?;
                continue;
            }
            writer.start_file(entry.name.as_str(), options)?;
            writer.write_all(&entry.data)?;
        }

        Ok(writer.finish()?.into_inner())
    }

    /// Relationships declared for `part` (from `dir/_rels/name.rels`).
    /// Parts without a relationships file have none.
    pub fn relationships(&self, part: &str) -> CoaResult<Vec<Relationship>> {
        let rels_path = rels_path_for(part);
        if !self.contains(&rels_path) {
            return Ok(Vec::new());
        }
        let xml = self.read_string(&rels_path)?;
        let base = parent_dir(part);

        let mut relationships = Vec::new();
        for attrs in xml::find_elements(&xml, "Relationship")? {
            if attr(&attrs, "TargetMode") == Some("External") {
                continue;
            }
            let (Some(id), Some(kind), Some(target)) = (
                attr(&attrs, "Id"),
                attr(&attrs, "Type"),
                attr(&attrs, "Target"),
            ) else {
                continue;
            };
            relationships.push(Relationship {
                id: id.to_string(),
                kind: kind.to_string(),
                target: resolve_target(base, target),
            });
        }
        Ok(relationships)
    }

    /// Path of the main workbook part.
    pub fn workbook_path(&self) -> CoaResult<String> {
        self.relationships("")?
            .into_iter()
            .find(|rel| rel.is(OFFICE_DOCUMENT_REL))
            .map(|rel| rel.target)
            .ok_or_else(|| {
                CoaError::TemplateStructure("package has no workbook part".to_string())
            })
    }

    /// Worksheets in workbook order.
    pub fn sheets(&self) -> CoaResult<Vec<SheetEntry>> {
        let workbook = self.workbook_path()?;
        let rels = self.relationships(&workbook)?;
        let xml = self.read_string(&workbook)?;

        let mut sheets = Vec::new();
        for attrs in xml::find_elements(&xml, "sheet")? {
            let Some(name) = attr(&attrs, "name") else {
                continue;
            };
            let Some(rid) = attr(&attrs, "r:id").or_else(|| {
                attrs
                    .iter()
                    .find(|(k, _)| xml::local_name(k) == "id")
                    .map(|(_, v)| v.as_str())
            }) else {
                continue;
            };
            if let Some(rel) = rels.iter().find(|rel| rel.id == rid && rel.is("worksheet")) {
                sheets.push(SheetEntry {
                    name: name.to_string(),
                    path: rel.target.clone(),
                });
            }
        }
        Ok(sheets)
    }

    /// Drop a part together with the relationship pointing at it from
    /// `owner` and its content-type override.
    pub fn remove_part(&mut self, owner: &str, part: &str) -> CoaResult<()> {
        if !self.remove(part) {
            return Ok(());
        }

        let rels_path = rels_path_for(owner);
        if self.contains(&rels_path) {
            let base = parent_dir(owner).to_string();
            let xml = self.read_string(&rels_path)?;
            let mut dropper = DropMatching {
                element: "Relationship",
                matches: |attrs: &Attrs| {
                    attr(attrs, "Target").is_some_and(|t| resolve_target(&base, t) == part)
                },
            };
            let patched = xml::rewrite(&xml, &mut dropper)?;
            self.replace(&rels_path, patched)?;
        }

        const CONTENT_TYPES: &str = "[Content_Types].xml";
        if self.contains(CONTENT_TYPES) {
            let xml = self.read_string(CONTENT_TYPES)?;
            let part_name = format!("/{part}");
            let mut dropper = DropMatching {
                element: "Override",
                matches: |attrs: &Attrs| attr(attrs, "PartName") == Some(part_name.as_str()),
            };
            let patched = xml::rewrite(&xml, &mut dropper)?;
            self.replace(CONTENT_TYPES, patched)?;
        }

        debug!(part, "removed package part");
        Ok(())
    }
}

struct DropMatching<F> {
    element: &'static str,
    matches: F,
}

impl<F: Fn(&Attrs) -> bool> XmlEditor for DropMatching<F> {
    fn element(&mut self, name: &str, _: Option<&str>, attrs: &mut Attrs) -> CoaResult<Visit> {
        if name == self.element && (self.matches)(attrs) {
            Ok(Visit::Drop)
        } else {
            Ok(Visit::Keep)
        }
    }
}

/// `xl/worksheets/sheet1.xml` → `xl/worksheets/_rels/sheet1.xml.rels`;
/// the package root (`""`) → `_rels/.rels`.
fn rels_path_for(part: &str) -> String {
    let part = part.trim_start_matches('/');
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

fn parent_dir(part: &str) -> &str {
    part.trim_start_matches('/')
        .rsplit_once('/')
        .map_or("", |(dir, _)| dir)
}

/// Resolve a relationship target against the directory of its source part.
fn resolve_target(base: &str, target: &str) -> String {
    let joined = match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None if base.is_empty() => target.to_string(),
        None => format!("{base}/{target}"),
    };

    let mut parts: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}
