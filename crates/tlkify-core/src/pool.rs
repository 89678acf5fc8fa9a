//! String pool and string reference allocation
//!
//! The pool maps string references to text and back. It is seeded from an
//! optional base talk table and only ever grows. The [`Allocator`] owns the
//! pool for the duration of a build; it assigns references in a fixed order
//! so the same inputs always produce the same references.

use crate::error::{Error, Result};
use crate::merger::PendingString;
use crate::table::{CellValue, Table};
use crate::tlk::TalkTable;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Added to every reference written into a 2DA cell; marks the reference as
/// pointing into the custom talk table rather than the game's dialog.tlk.
pub const CUSTOM_TLK_OFFSET: u32 = 0x0100_0000;

/// Bidirectional map between string references and text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringPool {
    language: u32,
    entries: BTreeMap<u32, String>,
    by_text: HashMap<String, u32>,
}

impl StringPool {
    /// Create an empty pool
    pub fn new(language: u32) -> Self {
        Self {
            language,
            ..Self::default()
        }
    }

    /// Seed a pool from an imported talk table
    ///
    /// When the import holds the same text twice, lookups resolve to the
    /// lowest reference.
    pub fn from_talk_table(table: TalkTable) -> Self {
        let mut pool = Self::new(table.language);
        for (id, text) in table.entries {
            pool.by_text.entry(text.clone()).or_insert(id);
            pool.entries.insert(id, text);
        }
        pool
    }

    /// Export the pool as a talk table
    pub fn to_talk_table(&self) -> TalkTable {
        TalkTable {
            language: self.language,
            entries: self.entries.clone(),
        }
    }

    pub fn language(&self) -> u32 {
        self.language
    }

    /// Text of a reference
    pub fn get(&self, id: u32) -> Option<&str> {
        self.entries.get(&id).map(String::as_str)
    }

    /// Reference of an exact text
    pub fn find(&self, text: &str) -> Option<u32> {
        self.by_text.get(text).copied()
    }

    pub fn contains_id(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    /// Highest occupied reference
    pub fn high_water(&self) -> Option<u32> {
        self.entries.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in reference order
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.entries.iter().map(|(&id, text)| (id, text.as_str()))
    }

    fn insert(&mut self, id: u32, text: &str) {
        debug_assert!(!self.entries.contains_key(&id));
        self.entries.insert(id, text.to_string());
        self.by_text.entry(text.to_string()).or_insert(id);
    }
}

/// The reference given to one pending string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub table: String,
    pub row: usize,
    pub column: usize,
    pub id: u32,
    /// Whether the text was already in the pool
    pub reused: bool,
}

/// Outcome of an allocation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationReport {
    /// Assignments in processing order
    pub assignments: Vec<Assignment>,
    /// Number of new pool entries
    pub allocated: usize,
    /// Number of texts resolved to an existing entry
    pub reused: usize,
}

/// Assigns string references to pending strings
#[derive(Debug, Clone)]
pub struct Allocator {
    pool: StringPool,
    reserved: BTreeMap<String, u32>,
    strref_offset: u32,
    general_cursor: u32,
    table_cursors: BTreeMap<String, u32>,
}

impl Allocator {
    /// Create an allocator over a seeded pool
    ///
    /// `reserved` maps a table name to the first reference its new strings
    /// may take. Other tables continue after the pool's high-water mark.
    pub fn new(pool: StringPool, reserved: BTreeMap<String, u32>, strref_offset: u32) -> Self {
        let general_cursor = pool.high_water().map_or(0, |h| h.saturating_add(1));
        Self {
            pool,
            reserved,
            strref_offset,
            general_cursor,
            table_cursors: BTreeMap::new(),
        }
    }

    pub fn pool(&self) -> &StringPool {
        &self.pool
    }

    pub fn into_pool(self) -> StringPool {
        self.pool
    }

    /// Sort pending strings into processing order: tables with a reserved
    /// range first, then by table name, row and column.
    pub fn canonical_order(&self, pending: &mut [PendingString]) {
        pending.sort_by(|a, b| {
            let a_key = (!self.reserved.contains_key(&a.table), &a.table, a.row, a.column);
            let b_key = (!self.reserved.contains_key(&b.table), &b.table, b.row, b.column);
            a_key.cmp(&b_key)
        });
    }

    /// Resolve a text to a reference, allocating one if the text is new.
    /// Returns the reference and whether it already existed.
    pub fn intern(&mut self, table: &str, text: &str) -> Result<(u32, bool)> {
        if let Some(id) = self.pool.find(text) {
            return Ok((id, true));
        }

        let id = match self.reserved.get(table) {
            Some(&floor) => {
                let cursor = self.table_cursors.entry(table.to_string()).or_insert(floor);
                let id = next_free(&self.pool, *cursor)?;
                *cursor = id.saturating_add(1);
                id
            }
            None => {
                let id = next_free(&self.pool, self.general_cursor)?;
                self.general_cursor = id.saturating_add(1);
                id
            }
        };

        self.pool.insert(id, text);
        Ok((id, false))
    }

    /// The cell value that refers to a reference
    pub fn cell_value(&self, id: u32) -> Result<CellValue> {
        let value = id.checked_add(self.strref_offset).ok_or(Error::StringRefOverflow {
            id,
            offset: self.strref_offset,
        })?;
        Ok(CellValue::Text(value.to_string()))
    }

    /// Assign references to every pending string and write them into the
    /// owning cells of `tables`
    pub fn allocate(
        &mut self,
        mut pending: Vec<PendingString>,
        tables: &mut BTreeMap<String, Table>,
    ) -> Result<AllocationReport> {
        self.canonical_order(&mut pending);

        let mut report = AllocationReport::default();
        for item in pending {
            let (id, reused) = self.intern(&item.table, &item.text)?;
            let value = self.cell_value(id)?;

            let table = tables
                .get_mut(&item.table)
                .ok_or_else(|| Error::Config(format!("no table named '{}'", item.table)))?;
            let rows = table.rows.len();
            let row = table
                .rows
                .get_mut(item.row)
                .ok_or_else(|| Error::UnknownRow {
                    overlay: item.table.clone(),
                    id: item.row,
                    rows,
                })?;
            let cell = row.cells.get_mut(item.column).ok_or_else(|| Error::MissingColumn {
                table: item.table.clone(),
                column: format!("#{}", item.column),
            })?;
            *cell = value;

            debug!(table = %item.table, row = item.row, column = item.column, id, reused, "assigned string reference");
            if reused {
                report.reused += 1;
            } else {
                report.allocated += 1;
            }
            report.assignments.push(Assignment {
                table: item.table,
                row: item.row,
                column: item.column,
                id,
                reused,
            });
        }

        info!(
            allocated = report.allocated,
            reused = report.reused,
            pool = self.pool.len(),
            "allocated string references"
        );
        Ok(report)
    }
}

fn next_free(pool: &StringPool, mut id: u32) -> Result<u32> {
    while pool.contains_id(id) {
        id = id.checked_add(1).ok_or(Error::StringRefOverflow { id, offset: 0 })?;
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merger::Origin;
    use crate::parser::parse_2da_str;
    use proptest::prelude::*;

    fn base_pool() -> StringPool {
        let mut entries = BTreeMap::new();
        entries.insert(0, "Hello".to_string());
        entries.insert(1, "World".to_string());
        entries.insert(3, "Hello".to_string());
        StringPool::from_talk_table(TalkTable { language: 0, entries })
    }

    fn pending(table: &str, row: usize, column: usize, text: &str) -> PendingString {
        PendingString::new(table, row, column, text, Origin::Overlay)
    }

    #[test]
    fn test_pool_seeding() {
        let pool = base_pool();
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.find("Hello"), Some(0));
        assert_eq!(pool.get(3), Some("Hello"));
        assert_eq!(pool.high_water(), Some(3));
        assert!(!pool.contains_id(2));
    }

    #[test]
    fn test_intern_reuses_and_continues_after_high_water() {
        let mut allocator = Allocator::new(base_pool(), BTreeMap::new(), 0);

        assert_eq!(allocator.intern("a", "World").unwrap(), (1, true));
        assert_eq!(allocator.intern("a", "New").unwrap(), (4, false));
        assert_eq!(allocator.intern("b", "New").unwrap(), (4, true));
        assert_eq!(allocator.intern("b", "Newer").unwrap(), (5, false));
    }

    #[test]
    fn test_reserved_range_floor() {
        let mut reserved = BTreeMap::new();
        reserved.insert("spells".to_string(), 10);
        let mut allocator = Allocator::new(base_pool(), reserved, 0);

        assert_eq!(allocator.intern("spells", "Fireball").unwrap(), (10, false));
        assert_eq!(allocator.intern("classes", "Wizard").unwrap(), (4, false));
        assert_eq!(allocator.intern("spells", "Burns.").unwrap(), (11, false));
    }

    #[test]
    fn test_cursors_skip_occupied_references() {
        let mut reserved = BTreeMap::new();
        reserved.insert("spells".to_string(), 1);
        let mut allocator = Allocator::new(base_pool(), reserved, 0);

        // 1 and 3 are taken by the base import
        assert_eq!(allocator.intern("spells", "a").unwrap(), (2, false));
        assert_eq!(allocator.intern("spells", "b").unwrap(), (4, false));
        // the general cursor starts at 4, which the range just took
        assert_eq!(allocator.intern("feat", "c").unwrap(), (5, false));
    }

    #[test]
    fn test_canonical_order_puts_reserved_tables_first() {
        let mut reserved = BTreeMap::new();
        reserved.insert("spells".to_string(), 100);
        let allocator = Allocator::new(StringPool::new(0), reserved, 0);

        let mut items = vec![
            pending("spells", 2, 0, "x"),
            pending("classes", 1, 1, "x"),
            pending("spells", 1, 3, "x"),
            pending("classes", 1, 0, "x"),
            pending("feat", 0, 0, "x"),
        ];
        allocator.canonical_order(&mut items);

        let order: Vec<(&str, usize, usize)> = items
            .iter()
            .map(|p| (p.table.as_str(), p.row, p.column))
            .collect();
        assert_eq!(
            order,
            vec![
                ("spells", 1, 3),
                ("spells", 2, 0),
                ("classes", 1, 0),
                ("classes", 1, 1),
                ("feat", 0, 0),
            ]
        );
    }

    #[test]
    fn test_allocate_writes_offset_references() {
        let mut tables = BTreeMap::new();
        tables.insert(
            "classes".to_string(),
            parse_2da_str("2DA V2.0\n\nLabel Name\n0 a 1\n1 b 2\n", "classes").unwrap(),
        );
        let mut allocator = Allocator::new(base_pool(), BTreeMap::new(), CUSTOM_TLK_OFFSET);

        let report = allocator
            .allocate(
                vec![pending("classes", 1, 1, "Mage"), pending("classes", 0, 1, "World")],
                &mut tables,
            )
            .unwrap();

        assert_eq!(report.allocated, 1);
        assert_eq!(report.reused, 1);
        let table = &tables["classes"];
        assert_eq!(table.rows[0].cells[1], CellValue::Text((CUSTOM_TLK_OFFSET + 1).to_string()));
        assert_eq!(table.rows[1].cells[1], CellValue::Text((CUSTOM_TLK_OFFSET + 4).to_string()));
        assert_eq!(allocator.pool().get(4), Some("Mage"));
    }

    #[test]
    fn test_cell_value_overflow() {
        let allocator = Allocator::new(StringPool::new(0), BTreeMap::new(), u32::MAX);
        assert!(matches!(
            allocator.cell_value(1),
            Err(Error::StringRefOverflow { id: 1, .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_allocation_is_deterministic_and_injective(
            texts in proptest::collection::vec("[a-c]{1,3}", 1..40),
            floor in 0u32..50,
        ) {
            let mut reserved = BTreeMap::new();
            reserved.insert("r".to_string(), floor);

            let run = || {
                let mut allocator = Allocator::new(base_pool(), reserved.clone(), 0);
                texts
                    .iter()
                    .enumerate()
                    .map(|(i, text)| {
                        let table = if i % 2 == 0 { "r" } else { "g" };
                        allocator.intern(table, text).map(|(id, _)| id)
                    })
                    .collect::<Result<Vec<u32>>>()
            };

            let first = run().unwrap();
            let second = run().unwrap();
            prop_assert_eq!(&first, &second);

            for (i, a) in texts.iter().enumerate() {
                for (j, b) in texts.iter().enumerate() {
                    prop_assert_eq!(a == b, first[i] == first[j]);
                }
            }
        }
    }
}
