//! Parser for 2DA V2.0 table files

use crate::charset;
use crate::error::{Error, Result, Violation};
use crate::table::{CellValue, Column, Row, Table};
use std::fs;
use std::path::Path;

/// Format marker expected on the first non-blank line
pub const MARKER: &str = "2DA";
/// Version token expected after the marker
pub const VERSION: &str = "V2.0";

const DEFAULT_PREFIX: &str = "DEFAULT:";

/// Parse a 2DA file into a Table, named after its lower-cased file stem
pub fn parse_2da<P: AsRef<Path>>(path: P) -> Result<Table> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| Error::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let name = table_name(path);
    let mut table = parse_2da_str(&charset::decode(&bytes), &name)?;
    table.source_path = path.to_path_buf();
    Ok(table)
}

/// Resource name of a 2DA path (lower-cased file stem)
pub fn table_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Parse 2DA text (useful for testing)
///
/// Every defect in the text is collected before failing, so one call
/// reports everything wrong with the file.
pub fn parse_2da_str(content: &str, name: &str) -> Result<Table> {
    let mut table = Table::new(name, format!("{}.2da", name).into());
    let mut violations = Vec::new();
    let violation = |line: Option<usize>, message: String| Violation::new(name, line, message);

    let mut lines = content
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line))
        .filter(|(_, line)| !line.trim().is_empty());

    // Format marker
    match lines.next() {
        Some((line_no, line)) => {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens.as_slice() {
                [MARKER, VERSION] => {}
                [MARKER, version, ..] => {
                    return Err(malformed(vec![violation(
                        Some(line_no),
                        format!("unsupported version '{}', expected {}", version, VERSION),
                    )]));
                }
                _ => {
                    return Err(malformed(vec![violation(
                        Some(line_no),
                        format!("missing '{} {}' marker", MARKER, VERSION),
                    )]));
                }
            }
        }
        None => {
            return Err(malformed(vec![violation(None, "file is empty".to_string())]));
        }
    }

    // Optional DEFAULT line, then the column header
    let mut header = lines.next();
    if let Some((line_no, line)) = header {
        if let Some(rest) = line.trim_start().strip_prefix(DEFAULT_PREFIX) {
            match tokenize(rest) {
                Ok(tokens) if tokens.len() == 1 => table.default = tokens.into_iter().next(),
                Ok(tokens) => violations.push(violation(
                    Some(line_no),
                    format!("DEFAULT expects one value, found {}", tokens.len()),
                )),
                Err(message) => violations.push(violation(Some(line_no), message)),
            }
            header = lines.next();
        }
    }

    let Some((header_line, header_text)) = header else {
        violations.push(violation(None, "missing column header".to_string()));
        return Err(malformed(violations));
    };

    match tokenize(header_text) {
        Ok(tokens) => {
            for (i, token) in tokens.into_iter().enumerate() {
                match token {
                    CellValue::Text(name) => table.columns.push(Column::new(name, i)),
                    other => violations.push(violation(
                        Some(header_line),
                        format!("invalid column name {}", other.to_token()),
                    )),
                }
            }
        }
        Err(message) => violations.push(violation(Some(header_line), message)),
    }

    if table.columns.is_empty() && violations.is_empty() {
        violations.push(violation(Some(header_line), "no columns declared".to_string()));
    }
    for (i, column) in table.columns.iter().enumerate() {
        if table.columns[..i].iter().any(|c| c.name == column.name) {
            violations.push(violation(
                Some(header_line),
                format!("duplicate column '{}'", column.name),
            ));
        }
    }

    // Data rows
    let mut expected = 0usize;
    for (line_no, line) in lines {
        let mut tokens = match tokenize(line) {
            Ok(tokens) => tokens.into_iter(),
            Err(message) => {
                violations.push(violation(Some(line_no), message));
                expected += 1;
                continue;
            }
        };

        let index = match tokens.next() {
            Some(CellValue::Text(token)) => token.parse::<usize>().ok(),
            _ => None,
        };
        let Some(index) = index else {
            violations.push(violation(Some(line_no), "row index is not a number".to_string()));
            expected += 1;
            continue;
        };

        if index != expected {
            violations.push(violation(
                Some(line_no),
                format!("row index {} out of sequence, expected {}", index, expected),
            ));
        }
        expected = index + 1;

        let cells: Vec<CellValue> = tokens.collect();
        if cells.len() != table.columns.len() {
            violations.push(violation(
                Some(line_no),
                format!(
                    "row {} has {} cells, header declares {} columns",
                    index,
                    cells.len(),
                    table.columns.len()
                ),
            ));
        }

        table.rows.push(Row::new(index, cells));
    }

    if violations.is_empty() {
        Ok(table)
    } else {
        Err(malformed(violations))
    }
}

fn malformed(violations: Vec<Violation>) -> Error {
    Error::MalformedTable { violations }
}

/// Split a line into cells, honoring double-quoted cells
fn tokenize(line: &str) -> std::result::Result<Vec<CellValue>, String> {
    let mut cells = Vec::new();
    let mut chars = line.char_indices().peekable();

    while let Some(&(start, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        if ch == '"' {
            chars.next();
            let content_start = start + 1;
            let end = loop {
                match chars.next() {
                    Some((i, '"')) => break i,
                    Some(_) => {}
                    None => return Err(format!("unterminated quoted cell starting at column {}", start + 1)),
                }
            };
            if let Some(&(_, next)) = chars.peek() {
                if !next.is_whitespace() {
                    return Err(format!("unexpected '{}' after quoted cell", next));
                }
            }
            cells.push(CellValue::Quoted(line[content_start..end].to_string()));
        } else {
            let mut end = line.len();
            while let Some(&(i, c)) = chars.peek() {
                if c.is_whitespace() {
                    end = i;
                    break;
                }
                chars.next();
            }
            cells.push(CellValue::from_token(&line[start..end]));
        }
    }

    Ok(cells)
}
