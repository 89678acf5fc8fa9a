//! Talk table codec
//!
//! Two encodings are supported:
//!
//! - the game's binary `TLK V3.0` format, little-endian, a 20-byte header
//!   followed by one 40-byte record per string reference and the string data
//! - the JSON form used by `nwn_tlk`: `{"language": n, "entries": [{"id", "text"}]}`,
//!   or a bare array of entries on input
//!
//! An entry with empty text is a gap in both encodings.

use crate::charset;
use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

pub const FILE_TYPE: &[u8; 4] = b"TLK ";
pub const FILE_VERSION: &[u8; 4] = b"V3.0";

/// Header size in bytes
pub const HEADER_SIZE: usize = 20;

/// String record size in bytes
pub const RECORD_SIZE: usize = 40;

/// Record flag marking an entry with text; sound flags are read and ignored
pub const FLAG_TEXT_PRESENT: u32 = 0x1;

/// In-memory talk table: language id plus sparse reference → text entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TalkTable {
    pub language: u32,
    pub entries: BTreeMap<u32, String>,
}

impl TalkTable {
    pub fn new(language: u32) -> Self {
        Self {
            language,
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, id: u32) -> Option<&str> {
        self.entries.get(&id).map(String::as_str)
    }

    /// Number of non-gap entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of records a dense encoding needs
    pub fn dense_len(&self) -> usize {
        self.entries
            .keys()
            .next_back()
            .map_or(0, |&max| max as usize + 1)
    }

    fn insert_text(&mut self, id: u32, text: String) {
        if !text.is_empty() {
            self.entries.insert(id, text);
        }
    }
}

/// Load a talk table, choosing the codec by file extension (`.tlk` or `.json`)
pub fn load_talk_table<P: AsRef<Path>>(path: P) -> Result<TalkTable> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| Error::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let decoded = match extension.as_deref() {
        Some("tlk") => decode_tlk(&bytes),
        Some("json") => decode_json(&bytes),
        _ => Err("expected a .tlk or .json file".to_string()),
    };

    decoded.map_err(|message| Error::StringTable {
        path: path.to_path_buf(),
        message,
    })
}

/// Parse binary TLK V3.0 data
pub fn parse_tlk(bytes: &[u8], path: &Path) -> Result<TalkTable> {
    decode_tlk(bytes).map_err(|message| Error::StringTable {
        path: path.to_path_buf(),
        message,
    })
}

/// Parse JSON talk table data
pub fn parse_json(content: &str, path: &Path) -> Result<TalkTable> {
    decode_json(content.as_bytes()).map_err(|message| Error::StringTable {
        path: path.to_path_buf(),
        message,
    })
}

fn decode_tlk(bytes: &[u8]) -> std::result::Result<TalkTable, String> {
    if bytes.len() < HEADER_SIZE {
        return Err(format!(
            "header too short: expected {} bytes, got {}",
            HEADER_SIZE,
            bytes.len()
        ));
    }

    let mut cursor = Cursor::new(bytes);
    let mut magic = [0u8; 4];
    let mut version = [0u8; 4];
    cursor.read_exact(&mut magic).map_err(|e| e.to_string())?;
    cursor.read_exact(&mut version).map_err(|e| e.to_string())?;
    if &magic != FILE_TYPE || &version != FILE_VERSION {
        return Err(format!(
            "not a TLK V3.0 file (found {:?} {:?})",
            String::from_utf8_lossy(&magic),
            String::from_utf8_lossy(&version)
        ));
    }

    let language = cursor.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
    let count = cursor.read_u32::<LittleEndian>().map_err(|e| e.to_string())? as usize;
    let strings_offset = cursor.read_u32::<LittleEndian>().map_err(|e| e.to_string())? as usize;

    let records_end = count
        .checked_mul(RECORD_SIZE)
        .and_then(|n| n.checked_add(HEADER_SIZE))
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| format!("truncated: {} records do not fit in {} bytes", count, bytes.len()))?;
    if strings_offset < records_end || strings_offset > bytes.len() {
        return Err(format!("string data offset {} out of bounds", strings_offset));
    }

    let mut table = TalkTable::new(language);
    for id in 0..count {
        let flags = cursor.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
        let mut sound = [0u8; 16];
        cursor.read_exact(&mut sound).map_err(|e| e.to_string())?;
        let _volume_variance = cursor.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
        let _pitch_variance = cursor.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
        let offset = cursor.read_u32::<LittleEndian>().map_err(|e| e.to_string())? as usize;
        let size = cursor.read_u32::<LittleEndian>().map_err(|e| e.to_string())? as usize;
        let _sound_length = cursor.read_f32::<LittleEndian>().map_err(|e| e.to_string())?;

        if flags & FLAG_TEXT_PRESENT == 0 {
            continue;
        }

        let start = strings_offset
            .checked_add(offset)
            .filter(|&s| s <= bytes.len())
            .ok_or_else(|| format!("entry {}: string offset {} out of bounds", id, offset))?;
        let end = start
            .checked_add(size)
            .filter(|&e| e <= bytes.len())
            .ok_or_else(|| format!("entry {}: string of {} bytes runs past end of file", id, size))?;

        let id = u32::try_from(id).map_err(|_| format!("entry {} exceeds the reference range", id))?;
        table.insert_text(id, charset::decode(&bytes[start..end]));
    }

    Ok(table)
}

/// Encode a talk table as binary TLK V3.0
///
/// Every reference from zero to the highest entry gets a record; gaps carry
/// no flags and no text.
pub fn encode_tlk(table: &TalkTable) -> Result<Vec<u8>> {
    let count = table.dense_len();
    let strings_offset = HEADER_SIZE + count * RECORD_SIZE;

    let mut records = Vec::with_capacity(count * RECORD_SIZE);
    let mut strings = Vec::new();
    for id in 0..count {
        let text = u32::try_from(id).ok().and_then(|id| table.get(id));
        let (flags, offset, size) = match text {
            Some(text) => {
                let bytes = charset::encode(text, &format!("string reference {}", id))?;
                let offset = strings.len();
                strings.extend_from_slice(&bytes);
                (FLAG_TEXT_PRESENT, offset, bytes.len())
            }
            None => (0, 0, 0),
        };

        records.write_u32::<LittleEndian>(flags)?;
        records.extend_from_slice(&[0u8; 16]);
        records.write_u32::<LittleEndian>(0)?;
        records.write_u32::<LittleEndian>(0)?;
        records.write_u32::<LittleEndian>(to_u32(offset)?)?;
        records.write_u32::<LittleEndian>(to_u32(size)?)?;
        records.write_f32::<LittleEndian>(0.0)?;
    }

    let mut out = Vec::with_capacity(strings_offset + strings.len());
    out.extend_from_slice(FILE_TYPE);
    out.extend_from_slice(FILE_VERSION);
    out.write_u32::<LittleEndian>(table.language)?;
    out.write_u32::<LittleEndian>(to_u32(count)?)?;
    out.write_u32::<LittleEndian>(to_u32(strings_offset)?)?;
    out.extend_from_slice(&records);
    out.extend_from_slice(&strings);
    Ok(out)
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::StringRefOverflow {
        id: u32::MAX,
        offset: 0,
    })
}

/// One entry of the JSON form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonEntry {
    pub id: u32,
    pub text: String,
}

/// The JSON document form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonTalkTable {
    #[serde(default)]
    pub language: u32,
    pub entries: Vec<JsonEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonInput {
    Document(JsonTalkTable),
    Entries(Vec<JsonEntry>),
}

fn decode_json(bytes: &[u8]) -> std::result::Result<TalkTable, String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let input: JsonInput = serde_json::from_slice(bytes)
        .map_err(|_| "expected {\"language\", \"entries\"} or an array of {\"id\", \"text\"}".to_string())?;

    let (language, entries) = match input {
        JsonInput::Document(doc) => (doc.language, doc.entries),
        JsonInput::Entries(entries) => (0, entries),
    };

    let mut table = TalkTable::new(language);
    for entry in entries {
        if table.entries.contains_key(&entry.id) {
            return Err(format!("duplicate entry for string reference {}", entry.id));
        }
        table.insert_text(entry.id, entry.text);
    }
    Ok(table)
}

/// Convert a talk table to its dense JSON document form
pub fn to_json_document(table: &TalkTable) -> JsonTalkTable {
    let entries = (0..table.dense_len())
        .filter_map(|id| u32::try_from(id).ok())
        .map(|id| JsonEntry {
            id,
            text: table.get(id).unwrap_or_default().to_string(),
        })
        .collect();

    JsonTalkTable {
        language: table.language,
        entries,
    }
}

/// Encode a talk table as pretty-printed JSON
pub fn encode_json(table: &TalkTable) -> Result<String> {
    for (id, text) in &table.entries {
        charset::check(text, &format!("string reference {}", id))?;
    }
    Ok(serde_json::to_string_pretty(&to_json_document(table))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn sample() -> TalkTable {
        let mut table = TalkTable::new(0);
        table.entries.insert(0, "Bad Strref".to_string());
        table.entries.insert(2, "Fireball".to_string());
        table.entries.insert(3, "Sorcière".to_string());
        table
    }

    #[test]
    fn test_decode_ignores_sound_fields() {
        let mut bytes = encode_tlk(&sample()).unwrap();
        let record = &mut bytes[HEADER_SIZE..HEADER_SIZE + RECORD_SIZE];
        record[0] = 0x7;
        record[4..15].copy_from_slice(b"vs_fireball");
        record[36..40].copy_from_slice(&1.5f32.to_le_bytes());

        let table = parse_tlk(&bytes, Path::new("dialog.tlk")).unwrap();
        assert_eq!(table, sample());
    }

    #[test]
    fn test_encode_tlk_layout() {
        let bytes = encode_tlk(&sample()).unwrap();

        assert_eq!(&bytes[0..4], b"TLK ");
        assert_eq!(&bytes[4..8], b"V3.0");
        let mut cursor = Cursor::new(&bytes[8..20]);
        assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 0);
        assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 4);
        assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), (HEADER_SIZE + 4 * RECORD_SIZE) as u32);

        // record 1 is a gap
        let gap = &bytes[HEADER_SIZE + RECORD_SIZE..HEADER_SIZE + 2 * RECORD_SIZE];
        assert!(gap.iter().all(|&b| b == 0));

        // Latin-1 string data at the end
        assert!(bytes.ends_with(b"Sorci\xE8re"));
    }

    #[test]
    fn test_decode_tlk_reads_back_entries() {
        let table = sample();
        let decoded = parse_tlk(&encode_tlk(&table).unwrap(), Path::new("x.tlk")).unwrap();
        assert_eq!(decoded, table);
        assert_eq!(decoded.get(1), None);
    }

    #[test]
    fn test_decode_tlk_rejects_bad_magic() {
        let mut bytes = encode_tlk(&sample()).unwrap();
        bytes[4..8].copy_from_slice(b"V4.0");
        let err = parse_tlk(&bytes, Path::new("x.tlk")).unwrap_err();
        assert!(matches!(err, Error::StringTable { .. }));
    }

    #[test]
    fn test_decode_tlk_rejects_truncation() {
        let bytes = encode_tlk(&sample()).unwrap();
        assert!(parse_tlk(&bytes[..HEADER_SIZE + RECORD_SIZE], Path::new("x.tlk")).is_err());
        assert!(parse_tlk(&bytes[..bytes.len() - 2], Path::new("x.tlk")).is_err());
        assert!(parse_tlk(&bytes[..10], Path::new("x.tlk")).is_err());
    }

    #[test]
    fn test_encode_tlk_rejects_unencodable_text() {
        let mut table = TalkTable::new(0);
        table.entries.insert(0, "It’s".to_string());
        assert!(matches!(encode_tlk(&table), Err(Error::Unencodable { .. })));
    }

    #[test]
    fn test_json_document_is_dense() {
        let doc = to_json_document(&sample());
        assert_eq!(doc.entries.len(), 4);
        assert_eq!(doc.entries[1], JsonEntry { id: 1, text: String::new() });
        assert_eq!(doc.entries[2].text, "Fireball");
    }

    #[test]
    fn test_parse_json_accepts_both_forms() {
        let doc = r#"{"language": 2, "entries": [{"id": 0, "text": "a"}, {"id": 4, "text": "b"}, {"id": 5, "text": ""}]}"#;
        let table = parse_json(doc, Path::new("base.json")).unwrap();
        assert_eq!(table.language, 2);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(4), Some("b"));

        let bare = r#"[{"id": 1, "text": "x"}]"#;
        let table = parse_json(bare, Path::new("base.json")).unwrap();
        assert_eq!(table.language, 0);
        assert_eq!(table.get(1), Some("x"));
    }

    #[test]
    fn test_parse_json_rejects_duplicates_and_garbage() {
        let dup = r#"[{"id": 1, "text": "x"}, {"id": 1, "text": "y"}]"#;
        assert!(parse_json(dup, Path::new("b.json")).is_err());
        assert!(parse_json(r#"{"entries": 3}"#, Path::new("b.json")).is_err());
    }

    #[test]
    fn test_load_talk_table_by_extension() {
        let dir = TempDir::new().unwrap();
        let tlk_path = dir.path().join("base.TLK");
        fs::write(&tlk_path, encode_tlk(&sample()).unwrap()).unwrap();
        assert_eq!(load_talk_table(&tlk_path).unwrap(), sample());

        let json_path = dir.path().join("base.json");
        let mut file = fs::File::create(&json_path).unwrap();
        file.write_all(encode_json(&sample()).unwrap().as_bytes()).unwrap();
        assert_eq!(load_talk_table(&json_path).unwrap(), sample());

        let other: PathBuf = dir.path().join("base.txt");
        fs::write(&other, "x").unwrap();
        assert!(matches!(load_talk_table(&other), Err(Error::StringTable { .. })));
    }
}
