//! Build pipeline
//!
//! Stages run strictly in order: load, validate, merge, derive, allocate,
//! write. Load-stage defects (parse, overlay and structural) are collected
//! and reported together; every later failure aborts the build at once.
//!
//! Outputs are produced in a staging directory inside the output root and
//! only moved into place after the talk table and the archive both exist,
//! so a failed build never leaves a partial archive behind.

use crate::config::BuildConfig;
use crate::derive::DerivationRules;
use crate::error::{Error, Result};
use crate::merger::{merge_table, MergedTable, PendingString};
use crate::overlay::{load_overlay, Overlay};
use crate::parser::parse_2da;
use crate::pool::{AllocationReport, Allocator, StringPool};
use crate::scanner::{scan_overlays, scan_tables, ScanResult};
use crate::table::Table;
use crate::tlk::{load_talk_table, TalkTable};
use crate::tools::{Packager, TlkCompiler};
use crate::validator;
use crate::writer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the staging directory created inside the output root
pub const STAGING_DIR: &str = ".tlkify-staging";

/// Everything read from disk for one build
#[derive(Debug, Clone, Default)]
pub struct BuildInputs {
    /// Tables that receive overlays and derivations
    pub tables: BTreeMap<String, Table>,
    /// Tables packaged unchanged
    pub statics: BTreeMap<String, Table>,
    /// Overlays keyed by table name
    pub overlays: BTreeMap<String, Overlay>,
    /// Overlay files with no matching input table
    pub orphan_overlays: Vec<PathBuf>,
}

/// Result of the in-memory stages
#[derive(Debug, Clone)]
pub struct BuildOutput {
    /// Input tables with string references written in
    pub tables: BTreeMap<String, Table>,
    pub statics: BTreeMap<String, Table>,
    /// Final string pool
    pub talk_table: TalkTable,
    /// Names of input tables that received at least one string
    pub modified: Vec<String>,
    pub overlay_changes: usize,
    pub derived: usize,
    pub allocation: AllocationReport,
}

/// Paths of the published artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifacts {
    pub hak: PathBuf,
    pub tlk: PathBuf,
    /// Copies made into mirror output roots
    pub mirrors: Vec<PathBuf>,
}

/// Summary of a finished build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub tables: usize,
    pub static_tables: usize,
    pub overlays: usize,
    pub modified_tables: Vec<String>,
    pub overlay_changes: usize,
    pub derived: usize,
    pub allocated: usize,
    pub reused: usize,
    pub talk_table_entries: usize,
    pub artifacts: Artifacts,
}

/// Load every input of a build and check it
///
/// Parse errors, overlay errors, name collisions and structural violations
/// are gathered over all files before failing.
pub fn load_inputs(config: &BuildConfig) -> Result<BuildInputs> {
    let mut errors = Vec::new();

    let input_scan = scan_tables(&config.input_2da)?;
    let static_scan = scan_tables(&config.static_2da)?;
    let overlay_scan = scan_overlays(&config.input_json)?;

    for scan in [&input_scan, &static_scan, &overlay_scan] {
        collision_errors(scan, &mut errors);
    }
    for (name, path) in &static_scan.files {
        if let Some(first) = input_scan.find(name) {
            errors.push(Error::DuplicateTable {
                name: name.clone(),
                first: first.to_path_buf(),
                second: path.clone(),
            });
        }
    }

    let tables = parse_all(&input_scan, &mut errors);
    let statics = parse_all(&static_scan, &mut errors);
    info!(
        tables = tables.len(),
        statics = statics.len(),
        "loaded 2DA tables"
    );

    let mut overlays = BTreeMap::new();
    let mut orphan_overlays = Vec::new();
    for (name, path) in &overlay_scan.files {
        match tables.get(name) {
            Some(table) => match load_overlay(path, table) {
                Ok(overlay) => {
                    debug!(table = %name, entries = overlay.entries.len(), "loaded overlay");
                    overlays.insert(name.clone(), overlay);
                }
                Err(e) => errors.push(e),
            },
            // tables that failed to parse already reported their own error
            None if input_scan.find(name).is_some() => {}
            None => {
                info!(overlay = %path.display(), "no input table for overlay, skipping");
                orphan_overlays.push(path.clone());
            }
        }
    }
    info!(overlays = overlays.len(), "loaded overlays");

    if let Err(e) = validator::validate(tables.values().chain(statics.values())) {
        errors.push(e);
    }

    if let Some(error) = Error::collect(errors) {
        return Err(error);
    }

    Ok(BuildInputs {
        tables,
        statics,
        overlays,
        orphan_overlays,
    })
}

fn collision_errors(scan: &ScanResult, errors: &mut Vec<Error>) {
    for (name, second) in &scan.collisions {
        if let Some(first) = scan.find(name) {
            errors.push(Error::DuplicateTable {
                name: name.clone(),
                first: first.to_path_buf(),
                second: second.clone(),
            });
        }
    }
}

fn parse_all(scan: &ScanResult, errors: &mut Vec<Error>) -> BTreeMap<String, Table> {
    let mut tables = BTreeMap::new();
    for (name, path) in &scan.files {
        match parse_2da(path) {
            Ok(table) => {
                debug!(table = %name, rows = table.row_count(), columns = table.column_count(), "parsed 2DA");
                tables.insert(name.clone(), table);
            }
            Err(e) => errors.push(e),
        }
    }
    tables
}

/// Load the string pool a build starts from
pub fn load_base_pool(config: &BuildConfig) -> Result<StringPool> {
    match &config.base_tlk {
        Some(path) => {
            let table = load_talk_table(path)?;
            info!(
                path = %path.display(),
                entries = table.len(),
                language = table.language,
                "imported base talk table"
            );
            Ok(StringPool::from_talk_table(table))
        }
        None => Ok(StringPool::new(config.language)),
    }
}

/// Run merge, derivation and allocation over loaded inputs
pub fn transform(
    inputs: BuildInputs,
    pool: StringPool,
    rules: &DerivationRules,
    reserved: &BTreeMap<String, u32>,
    strref_offset: u32,
) -> Result<BuildOutput> {
    let BuildInputs {
        tables,
        statics,
        overlays,
        ..
    } = inputs;

    let mut merged: BTreeMap<String, MergedTable> = BTreeMap::new();
    for (name, table) in &tables {
        let result = merge_table(table, overlays.get(name))?;
        if result.is_modified() {
            debug!(table = %name, changes = result.changes.len(), "merged overlay");
        }
        merged.insert(name.clone(), result);
    }

    let derived = rules.derive(&merged, &statics)?;
    info!(derived = derived.len(), "derived strings");

    let mut pending: Vec<PendingString> = Vec::new();
    let mut tables: BTreeMap<String, Table> = BTreeMap::new();
    for (name, result) in merged {
        pending.extend(result.changes);
        tables.insert(name, result.table);
    }
    let overlay_changes = pending.len();
    info!(changes = overlay_changes, "merged overlays");
    pending.extend(derived.iter().cloned());

    let mut modified: Vec<String> = pending.iter().map(|p| p.table.clone()).collect();
    modified.sort();
    modified.dedup();

    let mut allocator = Allocator::new(pool, reserved.clone(), strref_offset);
    let allocation = allocator.allocate(pending, &mut tables)?;
    let talk_table = allocator.into_pool().to_talk_table();

    Ok(BuildOutput {
        tables,
        statics,
        talk_table,
        modified,
        overlay_changes,
        derived: derived.len(),
        allocation,
    })
}

/// Write outputs to the staging directory, pack them and publish
pub fn publish(
    config: &BuildConfig,
    output: &BuildOutput,
    packager: &dyn Packager,
    compiler: Option<&dyn TlkCompiler>,
) -> Result<Artifacts> {
    let staging = config.output_dir.join(STAGING_DIR);
    if staging.exists() {
        fs::remove_dir_all(&staging).map_err(|e| Error::Write {
            path: staging.clone(),
            source: e,
        })?;
    }

    let staged = stage(config, output, &staging, packager, compiler);
    let published = staged.and_then(|(hak, tlk)| {
        let artifacts = Artifacts {
            hak: config.hak_path(),
            tlk: config.tlk_path(),
            mirrors: Vec::new(),
        };
        move_into_place(&[(hak, artifacts.hak.clone()), (tlk, artifacts.tlk.clone())])?;
        Ok(artifacts)
    });

    // staging never outlives the build
    let cleanup = fs::remove_dir_all(&staging);
    let mut artifacts = published?;
    cleanup.map_err(|e| Error::Write {
        path: staging.clone(),
        source: e,
    })?;

    for mirror in &config.mirror_dirs {
        for (source, sub, name) in [
            (&artifacts.hak, "hak", &config.hak_name),
            (&artifacts.tlk, "tlk", &config.tlk_name),
        ] {
            let target = mirror.join(sub).join(name);
            copy_file(source, &target)?;
            artifacts.mirrors.push(target);
        }
        info!(mirror = %mirror.display(), "copied artifacts");
    }

    Ok(artifacts)
}

fn stage(
    config: &BuildConfig,
    output: &BuildOutput,
    staging: &Path,
    packager: &dyn Packager,
    compiler: Option<&dyn TlkCompiler>,
) -> Result<(PathBuf, PathBuf)> {
    let resources = staging.join("2da");
    fs::create_dir_all(&resources).map_err(|e| Error::Write {
        path: resources.clone(),
        source: e,
    })?;

    for table in output.tables.values().chain(output.statics.values()) {
        writer::write_2da(table, &resources)?;
    }
    info!(
        tables = output.tables.len() + output.statics.len(),
        dir = %resources.display(),
        "wrote 2DA files"
    );

    let tlk = staging.join(&config.tlk_name);
    match compiler {
        Some(compiler) => {
            let json = tlk.with_extension("json");
            writer::write_talk_table_json(&output.talk_table, &json)?;
            compiler.compile(&json, &tlk)?;
        }
        None => writer::write_talk_table(&output.talk_table, &tlk)?,
    }
    info!(entries = output.talk_table.len(), path = %tlk.display(), "wrote talk table");

    let hak = staging.join(&config.hak_name);
    packager.pack(&resources, &hak)?;
    if !hak.is_file() {
        return Err(Error::ToolFailed {
            tool: "nwn_erf",
            status: "success".to_string(),
            stderr: format!("no archive was produced at '{}'", hak.display()),
        });
    }
    if !tlk.is_file() {
        return Err(Error::ToolFailed {
            tool: "nwn_tlk",
            status: "success".to_string(),
            stderr: format!("no talk table was produced at '{}'", tlk.display()),
        });
    }

    Ok((hak, tlk))
}

/// Publish staged files together
///
/// Every file is first brought next to its target under a temporary name;
/// targets are only replaced once all of them arrived. A failed swap puts
/// the previous files back.
fn move_into_place(files: &[(PathBuf, PathBuf)]) -> Result<()> {
    for (_, target) in files {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::Write {
                path: target.clone(),
                source: e,
            })?;
        }
    }

    let mut incoming = Vec::new();
    for (source, target) in files {
        let next = sibling(target, "new");
        let moved = fs::rename(source, &next).or_else(|_| fs::copy(source, &next).map(|_| ()));
        if let Err(e) = moved {
            discard(&incoming);
            return Err(Error::Write { path: next, source: e });
        }
        incoming.push(next);
    }

    let mut swapped: Vec<(&Path, Option<PathBuf>)> = Vec::new();
    for ((_, target), next) in files.iter().zip(&incoming) {
        match swap_in(next, target) {
            Ok(backup) => swapped.push((target.as_path(), backup)),
            Err(e) => {
                for (target, backup) in swapped.iter().rev() {
                    restore(target, backup.as_deref());
                }
                discard(&incoming);
                return Err(e);
            }
        }
    }

    for (target, backup) in swapped {
        if let Some(backup) = backup {
            let _ = fs::remove_file(backup);
        }
        debug!(path = %target.display(), "published");
    }
    Ok(())
}

/// Replace `target` with `next`, returning where the previous file was kept
fn swap_in(next: &Path, target: &Path) -> Result<Option<PathBuf>> {
    let io_err = |e| Error::Write {
        path: target.to_path_buf(),
        source: e,
    };

    let backup = if target.exists() {
        let backup = sibling(target, "old");
        fs::rename(target, &backup).map_err(io_err)?;
        Some(backup)
    } else {
        None
    };

    if let Err(e) = fs::rename(next, target) {
        if let Some(backup) = &backup {
            let _ = fs::rename(backup, target);
        }
        return Err(io_err(e));
    }
    Ok(backup)
}

fn restore(target: &Path, backup: Option<&Path>) {
    let _ = fs::remove_file(target);
    if let Some(backup) = backup {
        let _ = fs::rename(backup, target);
    }
}

fn discard(paths: &[PathBuf]) {
    for path in paths {
        let _ = fs::remove_file(path);
    }
}

/// `<dir>/.<name>.<tag>` beside the target
fn sibling(target: &Path, tag: &str) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.{}", name, tag))
}

fn copy_file(source: &Path, target: &Path) -> Result<()> {
    let io_err = |e| Error::Write {
        path: target.to_path_buf(),
        source: e,
    };
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::copy(source, target).map_err(io_err)?;
    Ok(())
}

/// Run a complete build
pub fn run_build(
    config: &BuildConfig,
    packager: &dyn Packager,
    compiler: Option<&dyn TlkCompiler>,
) -> Result<BuildReport> {
    config.validate()?;

    let inputs = load_inputs(config)?;
    let overlays = inputs.overlays.len();

    let pool = load_base_pool(config)?;
    let rules = if config.derive {
        DerivationRules::builtin()
    } else {
        DerivationRules::none()
    };

    let output = transform(inputs, pool, &rules, &config.reserved_ranges, config.strref_offset)?;
    let artifacts = publish(config, &output, packager, compiler)?;

    info!(
        hak = %artifacts.hak.display(),
        tlk = %artifacts.tlk.display(),
        "build complete"
    );

    Ok(BuildReport {
        tables: output.tables.len(),
        static_tables: output.statics.len(),
        overlays,
        modified_tables: output.modified,
        overlay_changes: output.overlay_changes,
        derived: output.derived,
        allocated: output.allocation.allocated,
        reused: output.allocation.reused,
        talk_table_entries: output.talk_table.len(),
        artifacts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_2da_str;
    use crate::overlay::parse_overlay_str;
    use crate::table::CellValue;

    fn inputs(tables: &[(&str, &str)], overlays: &[(&str, &str)]) -> BuildInputs {
        let mut result = BuildInputs::default();
        for (name, text) in tables {
            result
                .tables
                .insert(name.to_string(), parse_2da_str(text, name).unwrap());
        }
        for (name, json) in overlays {
            let overlay = parse_overlay_str(json, &result.tables[*name]).unwrap();
            result.overlays.insert(name.to_string(), overlay);
        }
        result
    }

    const CLASSES: &str = "2DA V2.0\n\nLabel Name Plural Lower\n0 Barbarian 10 11 12\n1 Bard 13 **** ****\n";
    const FEAT: &str = "2DA V2.0\n\nLabel FEAT\n0 Alertness 20\n1 Dodge 21\n";

    #[test]
    fn test_transform_merges_derives_and_allocates() {
        let inputs = inputs(
            &[("classes", CLASSES), ("feat", FEAT)],
            &[
                ("classes", r#"[{"id": 1, "Name": "Skald"}]"#),
                ("feat", r#"[{"id": 1, "FEAT": "Skald"}]"#),
            ],
        );

        let output = transform(
            inputs,
            StringPool::new(0),
            &DerivationRules::builtin(),
            &BTreeMap::new(),
            0,
        )
        .unwrap();

        // classes: Name, Plural, Lower; feat: FEAT reuses "Skald"
        let classes = &output.tables["classes"];
        assert_eq!(classes.rows[1].cells[1], CellValue::Text("0".into()));
        assert_eq!(classes.rows[1].cells[2], CellValue::Text("1".into()));
        assert_eq!(classes.rows[1].cells[3], CellValue::Text("2".into()));
        assert_eq!(output.tables["feat"].rows[1].cells[1], CellValue::Text("0".into()));

        assert_eq!(output.talk_table.get(0), Some("Skald"));
        assert_eq!(output.talk_table.get(1), Some("Skalds"));
        assert_eq!(output.talk_table.get(2), Some("skald"));
        assert_eq!(output.overlay_changes, 2);
        assert_eq!(output.derived, 2);
        assert_eq!(output.allocation.reused, 1);
        assert_eq!(output.modified, vec!["classes".to_string(), "feat".to_string()]);
    }

    #[test]
    fn test_transform_without_overlays_is_identity() {
        let inputs = inputs(&[("classes", CLASSES)], &[]);
        let original = inputs.tables["classes"].clone();

        let output = transform(
            inputs,
            StringPool::new(0),
            &DerivationRules::builtin(),
            &BTreeMap::new(),
            16_777_216,
        )
        .unwrap();

        assert_eq!(output.tables["classes"], original);
        assert!(output.talk_table.is_empty());
        assert!(output.modified.is_empty());
    }

    #[test]
    fn test_move_into_place_keeps_previous_files_when_one_is_missing() {
        let dir = tempfile::TempDir::new().unwrap();
        let staged_hak = dir.path().join("staged.hak");
        fs::write(&staged_hak, "new hak").unwrap();
        let hak = dir.path().join("hak").join("mod.hak");
        let tlk = dir.path().join("tlk").join("mod.tlk");
        writer::write_file(&hak, b"old hak").unwrap();
        writer::write_file(&tlk, b"old tlk").unwrap();

        let err = move_into_place(&[
            (staged_hak, hak.clone()),
            (dir.path().join("missing.tlk"), tlk.clone()),
        ])
        .unwrap_err();

        assert!(matches!(err, Error::Write { .. }));
        assert_eq!(fs::read(&hak).unwrap(), b"old hak");
        assert_eq!(fs::read(&tlk).unwrap(), b"old tlk");
        assert_eq!(fs::read_dir(hak.parent().unwrap()).unwrap().count(), 1);
        assert_eq!(fs::read_dir(tlk.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn test_move_into_place_replaces_both_targets() {
        let dir = tempfile::TempDir::new().unwrap();
        let staged = [dir.path().join("a.hak"), dir.path().join("a.tlk")];
        fs::write(&staged[0], "hak").unwrap();
        fs::write(&staged[1], "tlk").unwrap();
        let hak = dir.path().join("out").join("hak").join("mod.hak");
        let tlk = dir.path().join("out").join("tlk").join("mod.tlk");
        writer::write_file(&hak, b"old").unwrap();

        move_into_place(&[(staged[0].clone(), hak.clone()), (staged[1].clone(), tlk.clone())]).unwrap();

        assert_eq!(fs::read(&hak).unwrap(), b"hak");
        assert_eq!(fs::read(&tlk).unwrap(), b"tlk");
        assert_eq!(fs::read_dir(hak.parent().unwrap()).unwrap().count(), 1);
        assert!(!staged[0].exists());
    }
}
