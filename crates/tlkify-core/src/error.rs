//! Error types for tlkify-core

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// A single structural defect found in a 2DA table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Table name (lower-cased file stem)
    pub table: String,
    /// 1-based source line, when the defect maps to one
    pub line: Option<usize>,
    /// Human readable description
    pub message: String,
}

impl Violation {
    pub fn new(table: impl Into<String>, line: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}.2da:{}: {}", self.table, line, self.message),
            None => write!(f, "{}.2da: {}", self.table, self.message),
        }
    }
}

/// Errors that can occur in tlkify-core
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// One or more tables violate the 2DA structure
    #[error("{} structural defect(s):\n{}", .violations.len(), join_lines(.violations))]
    MalformedTable { violations: Vec<Violation> },

    /// The same table name was found in more than one input directory
    #[error("table '{name}' found in both {first} and {second}")]
    DuplicateTable {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// An overlay file could not be decoded
    #[error("invalid overlay '{path}': {message}")]
    InvalidOverlay { path: PathBuf, message: String },

    /// Overlay key that is not a column of its table
    #[error("{overlay}.json: row {id}: unknown column '{column}'")]
    UnknownColumn {
        overlay: String,
        id: usize,
        column: String,
    },

    /// The same row id appears twice in one overlay
    #[error("{overlay}.json: duplicate entries for row {id}")]
    DuplicateOverlayId { overlay: String, id: usize },

    /// Overlay row id that does not exist in its table
    #[error("{overlay}.json: row {id} does not exist in {overlay}.2da ({rows} rows)")]
    UnknownRow {
        overlay: String,
        id: usize,
        rows: usize,
    },

    /// Text outside the ISO-8859-1 charset
    #[error("{context}: character {ch:?} cannot be encoded as ISO-8859-1")]
    Unencodable { context: String, ch: char },

    /// A derivation lookup key with no match
    #[error("{table}.2da: row {row}: {key_column} '{key}' has no match in {source_table}.2da")]
    MissingCrossReference {
        table: String,
        row: usize,
        key_column: String,
        key: String,
        source_table: String,
    },

    /// A column required by a derivation rule is not declared
    #[error("{table}.2da: missing column '{column}' required for derivation")]
    MissingColumn { table: String, column: String },

    /// A string reference does not fit in the cell encoding
    #[error("string reference {id} overflows with offset {offset}")]
    StringRefOverflow { id: u32, offset: u32 },

    /// The base string table is malformed
    #[error("invalid string table '{path}': {message}")]
    StringTable { path: PathBuf, message: String },

    /// Invalid build configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Failed to write an output file
    #[error("failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to start an external tool
    #[error("failed to run {tool} ('{program}'): {source}")]
    ToolSpawn {
        tool: &'static str,
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An external tool exited with a non-zero status
    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: &'static str,
        status: String,
        stderr: String,
    },

    /// Several independent errors, reported together
    #[error("{} error(s):\n{}", .0.len(), join_lines(.0))]
    Aggregate(Vec<Error>),

    /// CSV export error from the csv crate
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Directory traversal error
    #[error("failed to traverse directory: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Fold a list of errors into one: `None` when empty, the error itself
    /// when alone, `Aggregate` otherwise.
    ///
    /// Nested aggregates and malformed-table reports are flattened so a
    /// caller sees one flat list of defects.
    pub fn collect(errors: Vec<Error>) -> Option<Error> {
        let mut violations = Vec::new();
        let mut others = Vec::new();
        for error in errors {
            flatten(error, &mut violations, &mut others);
        }
        if !violations.is_empty() {
            others.insert(0, Error::MalformedTable { violations });
        }
        match others.len() {
            0 => None,
            1 => others.pop(),
            _ => Some(Error::Aggregate(others)),
        }
    }
}

fn flatten(error: Error, violations: &mut Vec<Violation>, others: &mut Vec<Error>) {
    match error {
        Error::Aggregate(inner) => {
            for e in inner {
                flatten(e, violations, others);
            }
        }
        Error::MalformedTable { violations: v } => violations.extend(v),
        other => others.push(other),
    }
}

fn join_lines<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| format!("  {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}
