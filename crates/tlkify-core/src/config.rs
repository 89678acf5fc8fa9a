//! Build configuration (`tlkify.json`)
//!
//! Every key is optional. Relative paths are resolved against the directory
//! holding the configuration file, so a project can be built from anywhere.

use crate::error::{Error, Result};
use crate::pool::CUSTOM_TLK_OFFSET;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "tlkify.json";

/// Settings for one build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// 2DAs that receive overlays and derivations
    pub input_2da: PathBuf,
    /// Overlay files, one `<table>.json` per table
    pub input_json: PathBuf,
    /// 2DAs packaged unchanged
    pub static_2da: PathBuf,
    /// Output root; `hak/` and `tlk/` are created inside
    pub output_dir: PathBuf,
    /// Additional output roots that receive copies of the artifacts
    pub mirror_dirs: Vec<PathBuf>,
    pub hak_name: String,
    pub tlk_name: String,
    /// Talk table imported into the string pool before allocation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_tlk: Option<PathBuf>,
    /// Language id used when no base talk table sets one
    pub language: u32,
    /// Added to every string reference written into a 2DA cell
    pub strref_offset: u32,
    /// Table name → first string reference for its new strings
    pub reserved_ranges: BTreeMap<String, u32>,
    /// Run the built-in derivation rules
    pub derive: bool,
    pub tools: ToolsConfig,
}

impl Default for BuildConfig {
    fn default() -> Self {
        let mut reserved_ranges = BTreeMap::new();
        reserved_ranges.insert("spells".to_string(), 5000);

        Self {
            input_2da: PathBuf::from("input_2da"),
            input_json: PathBuf::from("input_json"),
            static_2da: PathBuf::from("static_2da"),
            output_dir: PathBuf::from("output"),
            mirror_dirs: Vec::new(),
            hak_name: "tlkify.hak".to_string(),
            tlk_name: "tlkify.tlk".to_string(),
            base_tlk: None,
            language: 0,
            strref_offset: CUSTOM_TLK_OFFSET,
            reserved_ranges,
            derive: true,
            tools: ToolsConfig::default(),
        }
    }
}

/// External tool locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    /// Archive packager; a bare name is looked up on `PATH`
    pub nwn_erf: PathBuf,
    /// JSON → TLK compiler; the built-in writer is used when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nwn_tlk: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            nwn_erf: PathBuf::from("nwn_erf"),
            nwn_tlk: None,
        }
    }
}

impl BuildConfig {
    /// Load a configuration file and resolve its relative paths
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut config: BuildConfig = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        config.resolve_paths(base);
        Ok(config)
    }

    /// Save the configuration as JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Make every relative path absolute against `base`
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        resolve(&mut self.input_2da);
        resolve(&mut self.input_json);
        resolve(&mut self.static_2da);
        resolve(&mut self.output_dir);
        self.mirror_dirs.iter_mut().for_each(resolve);
        self.base_tlk.iter_mut().for_each(resolve);

        // bare program names stay as PATH lookups
        if self.tools.nwn_erf.components().count() > 1 {
            resolve(&mut self.tools.nwn_erf);
        }
        if let Some(nwn_tlk) = self.tools.nwn_tlk.as_mut() {
            if nwn_tlk.components().count() > 1 {
                resolve(nwn_tlk);
            }
        }
    }

    /// Check the configuration against the filesystem
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        for (key, name) in [("hak_name", &self.hak_name), ("tlk_name", &self.tlk_name)] {
            if !is_plain_file_name(name) {
                problems.push(format!("{} must be a plain file name, got '{}'", key, name));
            }
        }

        if !self.input_2da.is_dir() {
            problems.push(format!(
                "input_2da directory '{}' does not exist",
                self.input_2da.display()
            ));
        }
        for (key, dir) in [("input_json", &self.input_json), ("static_2da", &self.static_2da)] {
            if dir.exists() && !dir.is_dir() {
                problems.push(format!("{} '{}' is not a directory", key, dir.display()));
            }
        }

        if let Some(base) = &self.base_tlk {
            let extension = base
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase);
            if !base.is_file() {
                problems.push(format!("base_tlk '{}' does not exist", base.display()));
            } else if !matches!(extension.as_deref(), Some("tlk") | Some("json")) {
                problems.push(format!("base_tlk '{}' must be a .tlk or .json file", base.display()));
            }
        }

        for name in self.reserved_ranges.keys() {
            if *name != name.to_lowercase() {
                problems.push(format!("reserved range table '{}' must be lower-case", name));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join("; ")))
        }
    }

    /// `<output_dir>/hak/<hak_name>`
    pub fn hak_path(&self) -> PathBuf {
        self.output_dir.join("hak").join(&self.hak_name)
    }

    /// `<output_dir>/tlk/<tlk_name>`
    pub fn tlk_path(&self) -> PathBuf {
        self.output_dir.join("tlk").join(&self.tlk_name)
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name)
        && !name.contains(['/', '\\'])
}
