//! Core table types for representing 2DA data

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Token that marks a cell with no value
pub const EMPTY_TOKEN: &str = "****";

/// A parsed 2DA table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Resource name (lower-cased file stem, e.g. "spells")
    pub name: String,
    /// Column definitions, in declaration order
    pub columns: Vec<Column>,
    /// Row data, indexed by position
    pub rows: Vec<Row>,
    /// Value of the optional `DEFAULT:` line
    pub default: Option<CellValue>,
    /// Source file path
    pub source_path: PathBuf,
}

impl Table {
    /// Create a new empty table
    pub fn new(name: impl Into<String>, source_path: PathBuf) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            rows: Vec::new(),
            default: None,
            source_path,
        }
    }

    /// Get the number of columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Find a column by name (case-sensitive)
    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Find a row by its index
    pub fn find_row(&self, index: usize) -> Option<&Row> {
        self.rows.get(index).filter(|r| r.index == index)
    }

    /// Get a single cell by row index and column position
    pub fn cell(&self, row: usize, column: usize) -> Option<&CellValue> {
        self.find_row(row).and_then(|r| r.get(column))
    }
}

/// A column definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name as written in the header (e.g. "Name")
    pub name: String,
    /// Column position (0-based, not counting the row index)
    pub index: usize,
}

impl Column {
    /// Create a new column
    pub fn new(name: String, index: usize) -> Self {
        Self { name, index }
    }
}

/// A row of data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Row index as written in the first token of the line
    pub index: usize,
    /// Cell values for each column
    pub cells: Vec<CellValue>,
}

impl Row {
    /// Create a new row
    pub fn new(index: usize, cells: Vec<CellValue>) -> Self {
        Self { index, cells }
    }

    /// Get a cell value by column position
    pub fn get(&self, column: usize) -> Option<&CellValue> {
        self.cells.get(column)
    }
}

/// A single 2DA cell
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellValue {
    /// The `****` marker
    Empty,
    /// A bare token without whitespace
    Text(String),
    /// A double-quoted token, which may contain spaces
    Quoted(String),
}

impl CellValue {
    /// Parse a single unquoted token
    pub fn from_token(token: &str) -> Self {
        if token == EMPTY_TOKEN {
            CellValue::Empty
        } else {
            CellValue::Text(token.to_string())
        }
    }

    /// Wrap arbitrary text, quoting it when it cannot stand as a bare token
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.is_empty() || text == EMPTY_TOKEN || text.chars().any(char::is_whitespace) {
            CellValue::Quoted(text)
        } else {
            CellValue::Text(text)
        }
    }

    /// Check if the cell is empty
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// The cell's text without quoting, `None` for `****`
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Empty => None,
            CellValue::Text(s) | CellValue::Quoted(s) => Some(s),
        }
    }

    /// Render the cell as a 2DA token
    pub fn to_token(&self) -> String {
        match self {
            CellValue::Empty => EMPTY_TOKEN.to_string(),
            CellValue::Text(s) => s.clone(),
            CellValue::Quoted(s) => format!("\"{}\"", s),
        }
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Empty => write!(f, "{}", EMPTY_TOKEN),
            CellValue::Text(s) | CellValue::Quoted(s) => write!(f, "{}", s),
        }
    }
}
