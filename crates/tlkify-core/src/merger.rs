//! Merge engine for applying overlays to tables
//!
//! Merging never adds or removes rows. Each changed cell temporarily holds
//! the overlay text and is reported as a [`PendingString`]; the allocator
//! later swaps the text for a string reference.

use crate::error::{Error, Result};
use crate::overlay::Overlay;
use crate::table::{CellValue, Table};
use serde::{Deserialize, Serialize};

/// Where a pending string came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// Set explicitly by an overlay
    Overlay,
    /// Synthesized by a derivation rule
    Derived,
}

/// A cell whose text needs a string reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingString {
    /// Owning table name
    pub table: String,
    /// Row index
    pub row: usize,
    /// Column position
    pub column: usize,
    /// Text to intern
    pub text: String,
    pub origin: Origin,
}

impl PendingString {
    pub fn new(table: impl Into<String>, row: usize, column: usize, text: impl Into<String>, origin: Origin) -> Self {
        Self {
            table: table.into(),
            row,
            column,
            text: text.into(),
            origin,
        }
    }
}

/// A table with an overlay applied
#[derive(Debug, Clone, PartialEq)]
pub struct MergedTable {
    /// The new table snapshot
    pub table: Table,
    /// Changed cells, sorted by row then column
    pub changes: Vec<PendingString>,
}

impl MergedTable {
    /// Wrap a table that received no changes
    pub fn unchanged(table: Table) -> Self {
        Self {
            table,
            changes: Vec::new(),
        }
    }

    /// Text the overlay set for a cell, if it changed
    pub fn changed_text(&self, row: usize, column: usize) -> Option<&str> {
        self.changes
            .iter()
            .find(|c| c.row == row && c.column == column)
            .map(|c| c.text.as_str())
    }

    /// Whether any cell changed
    pub fn is_modified(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// Apply an overlay to a table, producing a new snapshot
///
/// A replacement identical to the cell's current text is not a change, so
/// it never consumes a string reference.
pub fn merge_table(table: &Table, overlay: Option<&Overlay>) -> Result<MergedTable> {
    let mut merged = table.clone();
    let mut changes = Vec::new();

    let Some(overlay) = overlay else {
        return Ok(MergedTable::unchanged(merged));
    };

    for entry in &overlay.entries {
        let row_count = merged.rows.len();
        let row = merged
            .rows
            .get_mut(entry.id)
            .filter(|r| r.index == entry.id)
            .ok_or_else(|| Error::UnknownRow {
                overlay: overlay.name.clone(),
                id: entry.id,
                rows: row_count,
            })?;

        for field in &entry.fields {
            let cell = row.cells.get_mut(field.column).ok_or_else(|| Error::UnknownColumn {
                overlay: overlay.name.clone(),
                id: entry.id,
                column: field.name.clone(),
            })?;

            if cell.as_text() == Some(field.text.as_str()) {
                continue;
            }

            *cell = CellValue::from_text(field.text.as_str());
            changes.push(PendingString::new(
                &table.name,
                entry.id,
                field.column,
                field.text.as_str(),
                Origin::Overlay,
            ));
        }
    }

    debug_assert_eq!(merged.rows.len(), table.rows.len());
    changes.sort_by_key(|c| (c.row, c.column));

    Ok(MergedTable {
        table: merged,
        changes,
    })
}
