//! Find annotated test sources under the configured roots.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use crate::contract::parser::has_annotations;
use crate::core::errors::{DcvError, Result};

/// A source file that carries at least one annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCase {
    /// Path below its root without extension, `/`-separated.
    pub name: String,
    pub path: PathBuf,
    pub source: String,
}

impl DiscoveredCase {
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            source: source.into(),
        }
    }
}

/// Walk `roots` up to `max_depth` levels and load matching sources.
///
/// A root that is itself a file is taken as-is regardless of extension.
/// Hidden directories are not entered. Output is sorted by name.
pub fn discover(roots: &[PathBuf], extensions: &[String], max_depth: usize) -> Result<Vec<DiscoveredCase>> {
    let mut found = Vec::new();
    for root in roots {
        let meta = fs::metadata(root).map_err(|err| DcvError::io(root, err))?;
        if meta.is_file() {
            if let Some(case) = load_case(root, root.parent().unwrap_or(Path::new("")))? {
                found.push(case);
            }
            continue;
        }
        walk(root, root, extensions, max_depth, &mut found)?;
    }
    found.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));
    found.dedup_by(|a, b| a.path == b.path);
    Ok(found)
}

fn walk(
    root: &Path,
    dir: &Path,
    extensions: &[String],
    depth_left: usize,
    found: &mut Vec<DiscoveredCase>,
) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .map_err(|err| DcvError::io(dir, err))?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|err| DcvError::io(dir, err))?;
    entries.sort_by_key(fs::DirEntry::file_name);

    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type().map_err(|err| DcvError::io(&path, err))?;
        if file_type.is_dir() {
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if depth_left > 0 && !hidden {
                walk(root, &path, extensions, depth_left - 1, found)?;
            }
        } else if file_type.is_file()
            && has_extension(&path, extensions)
            && let Some(case) = load_case(&path, root)?
        {
            found.push(case);
        }
    }
    Ok(())
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
}

fn load_case(path: &Path, root: &Path) -> Result<Option<DiscoveredCase>> {
    let source = fs::read_to_string(path).map_err(|err| DcvError::io(path, err))?;
    if !has_annotations(&source) {
        return Ok(None);
    }
    Ok(Some(DiscoveredCase {
        name: case_name(path, root),
        path: path.to_path_buf(),
        source,
    }))
}

/// `root/dispatch/basic.jan` → `dispatch/basic`.
fn case_name(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path).with_extension("");
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
