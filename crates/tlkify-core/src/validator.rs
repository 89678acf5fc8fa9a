//! Structural checks over loaded tables
//!
//! The parser already rejects malformed text, but tables can also be built
//! or rewritten in memory. These checks run over every table of a build,
//! static ones included, before anything is merged.

use crate::error::{Error, Result, Violation};
use crate::table::Table;
use std::collections::HashSet;

/// Collect every structural violation of one table
pub fn check_table(table: &Table) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut push = |message: String| violations.push(Violation::new(&table.name, None, message));

    if table.columns.is_empty() {
        push("no columns declared".to_string());
    }

    let mut names = HashSet::new();
    for (position, column) in table.columns.iter().enumerate() {
        if !names.insert(column.name.as_str()) {
            push(format!("duplicate column '{}'", column.name));
        }
        if column.index != position {
            push(format!(
                "column '{}' records position {}, declared at {}",
                column.name, column.index, position
            ));
        }
    }

    for (position, row) in table.rows.iter().enumerate() {
        if row.index != position {
            push(format!(
                "row index {} out of sequence, expected {}",
                row.index, position
            ));
        }
        if row.cells.len() != table.columns.len() {
            push(format!(
                "row {} has {} cells, header declares {} columns",
                row.index,
                row.cells.len(),
                table.columns.len()
            ));
        }
    }

    violations
}

/// Validate a set of tables, reporting all violations at once
pub fn validate<'a, I>(tables: I) -> Result<()>
where
    I: IntoIterator<Item = &'a Table>,
{
    let violations: Vec<Violation> = tables.into_iter().flat_map(check_table).collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(Error::MalformedTable { violations })
    }
}
