//! Derivation of secondary strings that no overlay spells out
//!
//! Two kinds of rules exist:
//!
//! - **Inflect**: when an overlay sets a row's name, fill related columns
//!   (plural, adjective, lowercase forms) that still hold `****`. A target
//!   with a preferred source column is also filled when the overlay sets
//!   only that column.
//! - **Label**: for rows whose name is not overridden, build a label from
//!   another table's overlay text, found through a key column of the row
//!   (e.g. `iprp_spells.SpellIndex` -> `spells.Name`), optionally with a
//!   suffix taken from a column of the row itself.
//!
//! Every rule reads merged tables and overlay changes only, never the output
//! of another rule, so the rule order cannot change the result. A derived
//! value never replaces a cell that holds anything other than `****`.

use crate::error::{Error, Result};
use crate::merger::{MergedTable, Origin, PendingString};
use crate::table::{CellValue, Table};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// A word form produced from a name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Inflection {
    /// "Dwarf" -> "Dwarves"
    Plural,
    /// "Elf" -> "Elven"
    Adjective,
    /// "Elf" -> "elf"
    Lower,
    /// "Elf" -> "elven"
    LowerAdjective,
}

impl Inflection {
    /// Apply this inflection to a name
    pub fn apply(self, text: &str) -> String {
        match self {
            Inflection::Plural => plural(text),
            Inflection::Adjective => adjective(text),
            Inflection::Lower => text.to_lowercase(),
            Inflection::LowerAdjective => adjective(text).to_lowercase(),
        }
    }
}

/// A column filled from the row's name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InflectTarget {
    /// Column to fill
    pub column: String,
    /// Form derived from the name
    pub inflection: Inflection,
    /// When the row's overlay sets this column, derive from its text with
    /// the given inflection instead of from the name
    pub preferred: Option<(String, Inflection)>,
}

impl InflectTarget {
    pub fn new(column: impl Into<String>, inflection: Inflection) -> Self {
        Self {
            column: column.into(),
            inflection,
            preferred: None,
        }
    }

    pub fn preferring(mut self, column: impl Into<String>, inflection: Inflection) -> Self {
        self.preferred = Some((column.into(), inflection));
        self
    }
}

/// Condition a cross-referenced row must meet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFilter {
    pub column: String,
    pub expected: CellValue,
}

/// Cross-table label lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRule {
    /// Column of the row that receives the label
    pub target: String,
    /// Column of the row holding the source row index
    pub key_column: String,
    /// Table the key points into
    pub source_table: String,
    /// Column of the source table whose overlay text becomes the label
    pub source_column: String,
    /// Column of the row appended as " (<value>)"
    pub suffix_column: Option<String>,
    /// Conditions on the source row
    pub filters: Vec<SourceFilter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleKind {
    Inflect {
        name_column: String,
        targets: Vec<InflectTarget>,
    },
    Label(LabelRule),
}

/// A derivation rule bound to one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub table: String,
    pub kind: RuleKind,
}

impl Rule {
    fn targets(&self) -> Vec<&str> {
        match &self.kind {
            RuleKind::Inflect { targets, .. } => targets.iter().map(|t| t.column.as_str()).collect(),
            RuleKind::Label(label) => vec![label.target.as_str()],
        }
    }
}

/// An ordered, conflict-free set of rules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivationRules {
    rules: Vec<Rule>,
}

impl DerivationRules {
    /// Build a rule set, rejecting two rules that fill the same column
    pub fn new(rules: Vec<Rule>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for rule in &rules {
            for target in rule.targets() {
                if !seen.insert((rule.table.as_str(), target)) {
                    return Err(Error::Config(format!(
                        "two derivation rules fill {}.{}",
                        rule.table, target
                    )));
                }
            }
        }
        Ok(Self { rules })
    }

    /// A rule set that derives nothing
    pub fn none() -> Self {
        Self::default()
    }

    /// The rules for the standard NWN tables
    pub fn builtin() -> Self {
        use Inflection::*;

        let rules = vec![
            Rule {
                table: "classes".into(),
                kind: RuleKind::Inflect {
                    name_column: "Name".into(),
                    targets: vec![
                        InflectTarget::new("Plural", Plural),
                        InflectTarget::new("Lower", Lower),
                    ],
                },
            },
            Rule {
                table: "racialtypes".into(),
                kind: RuleKind::Inflect {
                    name_column: "Name".into(),
                    targets: vec![
                        InflectTarget::new("NamePlural", Plural),
                        InflectTarget::new("ConverName", Adjective),
                        InflectTarget::new("ConverNameLower", LowerAdjective)
                            .preferring("ConverName", Lower),
                    ],
                },
            },
            Rule {
                table: "iprp_spells".into(),
                kind: RuleKind::Label(LabelRule {
                    target: "Name".into(),
                    key_column: "SpellIndex".into(),
                    source_table: "spells".into(),
                    source_column: "Name".into(),
                    suffix_column: Some("CasterLvl".into()),
                    filters: vec![
                        SourceFilter {
                            column: "FeatID".into(),
                            expected: CellValue::Empty,
                        },
                        SourceFilter {
                            column: "UserType".into(),
                            expected: CellValue::Text("1".into()),
                        },
                    ],
                }),
            },
            Rule {
                table: "iprp_feats".into(),
                kind: RuleKind::Label(LabelRule {
                    target: "Name".into(),
                    key_column: "FeatIndex".into(),
                    source_table: "feat".into(),
                    source_column: "FEAT".into(),
                    suffix_column: None,
                    filters: Vec::new(),
                }),
            },
        ];

        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run every rule over the merged input tables
    ///
    /// Rules apply to `merged` tables only. Cross-references may also point
    /// into `statics`, which carry no overlay text and therefore never
    /// produce labels, but whose rows must still exist.
    pub fn derive(
        &self,
        merged: &BTreeMap<String, MergedTable>,
        statics: &BTreeMap<String, Table>,
    ) -> Result<Vec<PendingString>> {
        let mut derived = Vec::new();

        for rule in &self.rules {
            let Some(target) = merged.get(&rule.table) else {
                continue;
            };

            let before = derived.len();
            match &rule.kind {
                RuleKind::Inflect { name_column, targets } => {
                    derive_inflections(target, name_column, targets, &mut derived);
                }
                RuleKind::Label(label) => {
                    let source = match merged.get(&label.source_table) {
                        Some(m) => Some(SourceTable {
                            table: &m.table,
                            merged: Some(m),
                        }),
                        None => statics.get(&label.source_table).map(|t| SourceTable {
                            table: t,
                            merged: None,
                        }),
                    };
                    derive_labels(target, label, source, &mut derived)?;
                }
            }

            debug!(
                table = %rule.table,
                derived = derived.len() - before,
                "applied derivation rule"
            );
        }

        Ok(derived)
    }
}

struct SourceTable<'a> {
    table: &'a Table,
    merged: Option<&'a MergedTable>,
}

fn derive_inflections(
    target: &MergedTable,
    name_column: &str,
    targets: &[InflectTarget],
    out: &mut Vec<PendingString>,
) {
    let table = &target.table;
    let Some(name_column) = table.find_column(name_column) else {
        return;
    };

    // a row qualifies through its name or through any preferred source column
    let mut sources = BTreeSet::from([name_column.index]);
    for wanted in targets {
        if let Some(column) = wanted.preferred.as_ref().and_then(|(col, _)| table.find_column(col)) {
            sources.insert(column.index);
        }
    }
    let rows: BTreeSet<usize> = target
        .changes
        .iter()
        .filter(|c| c.origin == Origin::Overlay && sources.contains(&c.column))
        .map(|c| c.row)
        .collect();

    for row in rows {
        let name = target.changed_text(row, name_column.index);

        for wanted in targets {
            let Some(column) = table.find_column(&wanted.column) else {
                continue;
            };
            let is_empty = table.cell(row, column.index).is_some_and(CellValue::is_empty);
            if !is_empty {
                continue;
            }

            let preferred = wanted.preferred.as_ref().and_then(|(col, inflection)| {
                let col = table.find_column(col)?;
                target
                    .changed_text(row, col.index)
                    .map(|text| inflection.apply(text))
            });
            let Some(text) = preferred.or_else(|| name.map(|name| wanted.inflection.apply(name))) else {
                continue;
            };

            out.push(PendingString::new(&table.name, row, column.index, text, Origin::Derived));
        }
    }
}

fn derive_labels(
    target: &MergedTable,
    rule: &LabelRule,
    source: Option<SourceTable<'_>>,
    out: &mut Vec<PendingString>,
) -> Result<()> {
    let table = &target.table;
    let Some(target_column) = table.find_column(&rule.target) else {
        return Ok(());
    };
    let key_column = require_column(table, &rule.key_column)?;
    let suffix_column = rule
        .suffix_column
        .as_deref()
        .map(|name| require_column(table, name))
        .transpose()?;

    for row in &table.rows {
        if target.changed_text(row.index, target_column.index).is_some() {
            continue;
        }
        if !row.get(target_column.index).is_some_and(CellValue::is_empty) {
            continue;
        }

        let Some(key) = row.get(key_column.index).and_then(CellValue::as_text) else {
            continue;
        };

        let missing = || Error::MissingCrossReference {
            table: table.name.clone(),
            row: row.index,
            key_column: rule.key_column.clone(),
            key: key.to_string(),
            source_table: rule.source_table.clone(),
        };

        let source = source.as_ref().ok_or_else(missing)?;
        let index = key.parse::<usize>().map_err(|_| missing())?;
        let source_row = source.table.find_row(index).ok_or_else(missing)?;

        let mut accepted = true;
        for filter in &rule.filters {
            let column = require_column(source.table, &filter.column)?;
            if source_row.get(column.index).and_then(CellValue::as_text) != filter.expected.as_text() {
                accepted = false;
                break;
            }
        }
        if !accepted {
            continue;
        }

        let source_column = require_column(source.table, &rule.source_column)?;
        let Some(text) = source
            .merged
            .and_then(|m| m.changed_text(index, source_column.index))
        else {
            continue;
        };

        let label = match suffix_column {
            Some(column) => match row.get(column.index).and_then(CellValue::as_text) {
                Some(suffix) => format!("{} ({})", text, suffix),
                None => continue,
            },
            None => text.to_string(),
        };

        out.push(PendingString::new(
            &table.name,
            row.index,
            target_column.index,
            label,
            Origin::Derived,
        ));
    }

    Ok(())
}

fn require_column<'a>(table: &'a Table, name: &str) -> Result<&'a crate::table::Column> {
    table.find_column(name).ok_or_else(|| Error::MissingColumn {
        table: table.name.clone(),
        column: name.to_string(),
    })
}

/// Case-insensitive ASCII suffix test that also guarantees a char boundary
fn ends_with_ci(text: &str, suffix: &str) -> bool {
    text.len() >= suffix.len()
        && text.is_char_boundary(text.len() - suffix.len())
        && text[text.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

fn strip_chars(text: &str, n: usize) -> &str {
    &text[..text.len() - n]
}

/// A basic English plural of a noun
pub fn plural(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    if ["ch", "sh", "is"].iter().any(|s| ends_with_ci(text, s)) {
        return format!("{}es", text);
    }
    if ends_with_ci(text, "fe") {
        return format!("{}ves", strip_chars(text, 2));
    }
    if ends_with_ci(text, "lf") || ends_with_ci(text, "f") {
        return format!("{}ves", strip_chars(text, 1));
    }
    if ["s", "x", "z", "o"].iter().any(|s| ends_with_ci(text, s)) {
        return format!("{}es", text);
    }
    if ends_with_ci(text, "y") {
        let stem = strip_chars(text, 1);
        let after_consonant = stem
            .chars()
            .last()
            .is_some_and(|c| !"aeiouAEIOU".contains(c));
        if after_consonant {
            return format!("{}ies", stem);
        }
    }
    format!("{}s", text)
}

/// A basic English adjective form of a noun
pub fn adjective(text: &str) -> String {
    if ends_with_ci(text, "f") {
        format!("{}ven", strip_chars(text, 1))
    } else {
        text.to_string()
    }
}
