//! Serialization of build outputs
//!
//! 2DA files are written in canonical form: the `2DA V2.0` marker, a blank or
//! `DEFAULT:` line, the header and one line per row, single-space separated,
//! `\n` line endings, ISO-8859-1 encoded.

use crate::charset;
use crate::error::{Error, Result, Violation};
use crate::parser::{MARKER, VERSION};
use crate::table::{CellValue, Table};
use crate::tlk::{self, TalkTable};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Render a table as 2DA text
pub fn render_2da(table: &Table) -> Result<String> {
    let mut violations = Vec::new();
    let mut out = String::new();

    out.push_str(MARKER);
    out.push(' ');
    out.push_str(VERSION);
    out.push('\n');
    if let Some(default) = &table.default {
        out.push_str("DEFAULT: ");
        out.push_str(&token(table, default, None, &mut violations));
    }
    out.push('\n');

    let header: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
    out.push_str(&header.join(" "));
    out.push('\n');

    for row in &table.rows {
        out.push_str(&row.index.to_string());
        for cell in &row.cells {
            out.push(' ');
            out.push_str(&token(table, cell, Some(row.index), &mut violations));
        }
        out.push('\n');
    }

    if violations.is_empty() {
        Ok(out)
    } else {
        Err(Error::MalformedTable { violations })
    }
}

fn token(table: &Table, cell: &CellValue, row: Option<usize>, violations: &mut Vec<Violation>) -> String {
    // a bare token only breaks when it would read back as quoted
    let writable = match cell {
        CellValue::Empty => true,
        CellValue::Text(text) => !text.starts_with('"') && !text.contains(['\n', '\r']),
        CellValue::Quoted(text) => !text.contains(['"', '\n', '\r']),
    };
    if !writable {
        let text = cell.as_text().unwrap_or_default();
        let location = row.map_or("DEFAULT".to_string(), |r| format!("row {}", r));
        violations.push(Violation::new(
            &table.name,
            None,
            format!("{}: cell {:?} cannot be written as a 2DA token", location, text),
        ));
    }
    cell.to_token()
}

/// Write a table as `<dir>/<name>.2da`
pub fn write_2da<P: AsRef<Path>>(table: &Table, dir: P) -> Result<PathBuf> {
    let path = dir.as_ref().join(format!("{}.2da", table.name));
    let text = render_2da(table)?;
    let bytes = charset::encode(&text, &format!("{}.2da", table.name))?;
    write_file(&path, &bytes)?;
    debug!(table = %table.name, rows = table.row_count(), path = %path.display(), "wrote 2DA");
    Ok(path)
}

/// Write a talk table in the binary TLK V3.0 format
pub fn write_talk_table<P: AsRef<Path>>(table: &TalkTable, path: P) -> Result<()> {
    let path = path.as_ref();
    let bytes = tlk::encode_tlk(table)?;
    write_file(path, &bytes)?;
    debug!(entries = table.len(), path = %path.display(), "wrote TLK");
    Ok(())
}

/// Write a talk table in the JSON document form
pub fn write_talk_table_json<P: AsRef<Path>>(table: &TalkTable, path: P) -> Result<()> {
    let path = path.as_ref();
    let json = tlk::encode_json(table)?;
    write_file(path, json.as_bytes())?;
    debug!(entries = table.len(), path = %path.display(), "wrote TLK JSON");
    Ok(())
}

/// Export a table as CSV, with the row index as the first column
///
/// Cells are written as plain text; `****` stays as is.
pub fn write_csv<P: AsRef<Path>>(table: &Table, path: P) -> Result<()> {
    let mut writer = csv::Writer::from_path(path.as_ref())?;

    let mut header = vec![String::new()];
    header.extend(table.columns.iter().map(|c| c.name.clone()));
    writer.write_record(&header)?;

    for row in &table.rows {
        let mut record = vec![row.index.to_string()];
        record.extend(row.cells.iter().map(|c| c.to_string()));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Export a table as pretty-printed JSON
pub fn write_json<P: AsRef<Path>>(table: &Table, path: P) -> Result<()> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(table)?;
    write_file(path, json.as_bytes())
}

/// Create or replace a file, creating parent directories as needed
pub fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let io_err = |source| Error::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(bytes).map_err(io_err)?;
    writer.flush().map_err(io_err)?;
    Ok(())
}
