//! Directory scanner for discovering 2DA tables and JSON overlays

use crate::error::Result;
use crate::parser::table_name;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extension of tabular files
pub const TABLE_EXTENSION: &str = "2da";
/// Extension of overlay files
pub const OVERLAY_EXTENSION: &str = "json";

/// Files found in one directory, keyed by lower-cased resource name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanResult {
    /// Directory that was scanned
    pub root: PathBuf,
    /// Resource name -> file path, sorted by name
    pub files: BTreeMap<String, PathBuf>,
    /// Files whose resource name collides with an earlier file (e.g. `A.2da`
    /// next to `a.2da`)
    pub collisions: Vec<(String, PathBuf)>,
}

impl ScanResult {
    /// Find a file by resource name
    pub fn find(&self, name: &str) -> Option<&Path> {
        self.files.get(name).map(PathBuf::as_path)
    }

    /// Get all resource names
    pub fn names(&self) -> Vec<&str> {
        self.files.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// List the `*.2da` files directly inside `root`
pub fn scan_tables<P: AsRef<Path>>(root: P) -> Result<ScanResult> {
    scan_directory(root.as_ref(), TABLE_EXTENSION)
}

/// List the `*.json` files directly inside `root`
pub fn scan_overlays<P: AsRef<Path>>(root: P) -> Result<ScanResult> {
    scan_directory(root.as_ref(), OVERLAY_EXTENSION)
}

/// Scan one directory (not recursive) for files with the given extension,
/// compared case-insensitively. A missing directory scans as empty.
pub fn scan_directory(root: &Path, extension: &str) -> Result<ScanResult> {
    let mut result = ScanResult {
        root: root.to_path_buf(),
        ..ScanResult::default()
    };

    if !root.is_dir() {
        return Ok(result);
    }

    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
        if !matches {
            continue;
        }

        let name = table_name(path);
        if result.files.contains_key(&name) {
            result.collisions.push((name, path.to_path_buf()));
        } else {
            result.files.insert(name, path.to_path_buf());
        }
    }

    Ok(result)
}
