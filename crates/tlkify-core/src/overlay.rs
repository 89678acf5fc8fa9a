//! JSON overlays: per-row column overrides for one 2DA table
//!
//! An overlay file is a JSON array of objects. Each object carries the row
//! `id` and any number of column keys with string values:
//!
//! ```json
//! [
//!   { "id": 12, "Name": "Fireball", "SpellDesc": "A ball of fire." },
//!   { "id": 13, "Name": "Ice Storm", "SpellDesc": null }
//! ]
//! ```
//!
//! `null` and `""` leave the column untouched: a talk table cannot keep an
//! empty string apart from a missing one. Keys are checked against the table's
//! header while loading, so later stages only see resolved column positions.

use crate::charset;
use crate::error::{Error, Result};
use crate::table::Table;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// A validated overlay for one table
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    /// Name of the table this overlay applies to
    pub name: String,
    /// Source file path
    pub source_path: PathBuf,
    /// Entries in file order
    pub entries: Vec<OverlayEntry>,
}

impl Overlay {
    /// Find the entry for a row
    pub fn find_entry(&self, id: usize) -> Option<&OverlayEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Text the overlay sets for one cell, if any
    pub fn text(&self, id: usize, column: usize) -> Option<&str> {
        self.find_entry(id).and_then(|e| e.text(column))
    }

    /// Total number of fields over all entries
    pub fn field_count(&self) -> usize {
        self.entries.iter().map(|e| e.fields.len()).sum()
    }
}

/// The overrides for a single row
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayEntry {
    /// Row index
    pub id: usize,
    /// Fields sorted by column position
    pub fields: Vec<OverlayField>,
}

impl OverlayEntry {
    /// Text for a column position
    pub fn text(&self, column: usize) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.column == column)
            .map(|f| f.text.as_str())
    }
}

/// A single column override
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayField {
    /// Column position in the owning table
    pub column: usize,
    /// Column name
    pub name: String,
    /// Replacement text
    pub text: String,
}

/// One object of the overlay array, before validation
#[derive(Debug, Deserialize)]
struct RawEntry {
    id: u64,
    #[serde(flatten)]
    fields: BTreeMap<String, Option<String>>,
}

/// Load an overlay file and validate it against its table
pub fn load_overlay<P: AsRef<Path>>(path: P, table: &Table) -> Result<Overlay> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut overlay = parse_overlay_str(&content, table).map_err(|e| match e {
        Error::Json(source) => Error::InvalidOverlay {
            path: path.to_path_buf(),
            message: source.to_string(),
        },
        other => other,
    })?;
    overlay.source_path = path.to_path_buf();
    Ok(overlay)
}

/// Parse overlay JSON text and validate it against `table`
///
/// All authoring errors in the text are reported together.
pub fn parse_overlay_str(content: &str, table: &Table) -> Result<Overlay> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let raw: Vec<RawEntry> = serde_json::from_str(content)?;

    let name = table.name.clone();
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(raw.len());

    for record in raw {
        let id = usize::try_from(record.id).unwrap_or(usize::MAX);

        if !seen.insert(id) {
            errors.push(Error::DuplicateOverlayId {
                overlay: name.clone(),
                id,
            });
            continue;
        }

        if table.find_row(id).is_none() {
            errors.push(Error::UnknownRow {
                overlay: name.clone(),
                id,
                rows: table.row_count(),
            });
        }

        let mut fields = Vec::new();
        for (key, value) in record.fields {
            let Some(column) = table.find_column(&key) else {
                errors.push(Error::UnknownColumn {
                    overlay: name.clone(),
                    id,
                    column: key,
                });
                continue;
            };
            let Some(text) = value.filter(|text| !text.is_empty()) else {
                continue;
            };
            if let Err(e) = charset::check(&text, &format!("{}.json: row {}: {}", name, id, key)) {
                errors.push(e);
                continue;
            }
            fields.push(OverlayField {
                column: column.index,
                name: key,
                text,
            });
        }
        fields.sort_by_key(|f| f.column);

        entries.push(OverlayEntry { id, fields });
    }

    if let Some(error) = Error::collect(errors) {
        return Err(error);
    }

    Ok(Overlay {
        name,
        source_path: PathBuf::from(format!("{}.json", table.name)),
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_2da_str;

    fn spells() -> Table {
        parse_2da_str(
            "2DA V2.0\n\nLabel Name SpellDesc\n0 Acid 100 101\n1 Fire 102 103\n2 Ice 104 105\n",
            "spells",
        )
        .unwrap()
    }

    #[test]
    fn test_parse_overlay_resolves_columns() {
        let json = r#"[{"id": 1, "SpellDesc": "Burns.", "Name": "Fireball"}, {"id": 2, "Name": null}]"#;
        let overlay = parse_overlay_str(json, &spells()).unwrap();

        assert_eq!(overlay.name, "spells");
        assert_eq!(overlay.entries.len(), 2);
        let first = &overlay.entries[0];
        assert_eq!(first.id, 1);
        assert_eq!(first.fields[0].column, 1);
        assert_eq!(first.fields[0].text, "Fireball");
        assert_eq!(first.fields[1].name, "SpellDesc");
        assert!(overlay.entries[1].fields.is_empty());
        assert_eq!(overlay.text(1, 2), Some("Burns."));
        assert_eq!(overlay.field_count(), 2);
    }

    #[test]
    fn test_parse_overlay_skips_empty_text() {
        let json = r#"[{"id": 0, "Name": "", "SpellDesc": "Corrodes."}]"#;
        let overlay = parse_overlay_str(json, &spells()).unwrap();

        assert_eq!(overlay.field_count(), 1);
        assert_eq!(overlay.text(0, 1), None);
        assert_eq!(overlay.text(0, 2), Some("Corrodes."));
    }

    #[test]
    fn test_parse_overlay_rejects_duplicate_ids() {
        let json = r#"[{"id": 1, "Name": "a"}, {"id": 1, "Name": "b"}]"#;
        let err = parse_overlay_str(json, &spells()).unwrap_err();
        assert!(matches!(err, Error::DuplicateOverlayId { id: 1, .. }));
    }

    #[test]
    fn test_parse_overlay_rejects_unknown_column() {
        let json = r#"[{"id": 0, "Nmae": "typo"}]"#;
        let err = parse_overlay_str(json, &spells()).unwrap_err();
        match err {
            Error::UnknownColumn { column, id, .. } => {
                assert_eq!(column, "Nmae");
                assert_eq!(id, 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_overlay_rejects_unknown_row() {
        let json = r#"[{"id": 7, "Name": "x"}]"#;
        let err = parse_overlay_str(json, &spells()).unwrap_err();
        assert!(matches!(err, Error::UnknownRow { id: 7, rows: 3, .. }));
    }

    #[test]
    fn test_parse_overlay_reports_every_error() {
        let json = r#"[{"id": 9, "Bogus": "x"}, {"id": 0, "Name": "a"}, {"id": 0, "Name": "b"}]"#;
        match parse_overlay_str(json, &spells()).unwrap_err() {
            Error::Aggregate(errors) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_overlay_requires_id() {
        let err = parse_overlay_str(r#"[{"Name": "x"}]"#, &spells()).unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_parse_overlay_rejects_non_string_values() {
        let err = parse_overlay_str(r#"[{"id": 0, "Name": 5}]"#, &spells()).unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_parse_overlay_tolerates_bom() {
        let json = "\u{feff}[{\"id\": 0, \"Name\": \"x\"}]";
        assert!(parse_overlay_str(json, &spells()).is_ok());
    }

    #[test]
    fn test_parse_overlay_rejects_unencodable_text() {
        let json = r#"[{"id": 0, "Name": "It’s"}]"#;
        let err = parse_overlay_str(json, &spells()).unwrap_err();
        assert!(matches!(err, Error::Unencodable { .. }));
    }
}
